use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_payload, payload_arg0_as_string, payload_object, to_json, AppState};
use crate::customers;
use crate::models::{CustomerType, CustomerUpdate, NewCustomer};

const ID_KEYS: &[&str] = &["id", "customerId", "customer_id"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    #[serde(alias = "customerId", alias = "customer_id")]
    id: String,
    #[serde(flatten)]
    changes: CustomerUpdate,
}

fn parse_customer_id(arg0: Option<Value>) -> Result<String, String> {
    payload_arg0_as_string(arg0, ID_KEYS).ok_or_else(|| "Missing customer id".to_string())
}

pub fn customer_create(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let new: NewCustomer = parse_payload(payload_object(arg0, "name"), "customer")?;
    let customer = customers::create_customer(&state.db, &user_id, new).map_err(String::from)?;
    to_json(&customer)
}

pub fn customer_get(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let id = parse_customer_id(arg0)?;
    let customer = customers::get_customer(&state.db, &user_id, &id).map_err(String::from)?;
    to_json(&customer)
}

/// Optional filter: `"supplier"` or `{ "type": "customer" }`.
pub fn customer_list(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let filter = payload_arg0_as_string(arg0, &["type", "customerType", "customer_type"])
        .map(|raw| raw.parse::<CustomerType>())
        .transpose()
        .map_err(String::from)?;
    let list = customers::list_customers(&state.db, &user_id, filter).map_err(String::from)?;
    to_json(&list)
}

pub fn customer_search(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let query = payload_arg0_as_string(arg0, &["query", "q", "term"]).unwrap_or_default();
    let list = customers::search_customers(&state.db, &user_id, &query).map_err(String::from)?;
    to_json(&list)
}

pub fn customer_find_by_phone(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let phone = payload_arg0_as_string(arg0, &["phone", "mobile"]).ok_or("Missing phone number")?;
    let found = customers::find_by_phone(&state.db, &user_id, &phone).map_err(String::from)?;
    to_json(&found)
}

pub fn customer_update(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let payload: UpdatePayload = parse_payload(payload_object(arg0, "id"), "customer update")?;
    let (customer, renamed) =
        customers::update_customer(&state.db, &user_id, &payload.id, payload.changes)
            .map_err(String::from)?;
    Ok(json!({ "customer": to_json(&customer)?, "entriesRenamed": renamed }))
}

pub fn customer_delete(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let id = parse_customer_id(arg0)?;
    let removed = customers::delete_customer(&state.db, &user_id, &id).map_err(String::from)?;
    Ok(json!({ "success": true, "entriesDeleted": removed }))
}

#[cfg(test)]
mod tests {
    use super::super::test_state::*;
    use super::*;

    #[tokio::test]
    async fn test_customer_crud() {
        let h = signed_in().await;
        let created = customer_create(
            Some(json!({
                "name": "Ram Bahadur",
                "phone": "984-1111111",
                "customerType": "customer"
            })),
            &h.state,
        )
        .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["phone"], "9841111111");

        let dup = customer_create(
            Some(json!({ "name": "Other", "phone": "9841111111", "type": "supplier" })),
            &h.state,
        )
        .unwrap_err();
        assert!(dup.contains("Ram Bahadur"), "{dup}");

        customer_create(Some(json!({ "name": "Shyam Suppliers", "type": "supplier" })), &h.state)
            .unwrap();

        let suppliers = customer_list(Some(json!("supplier")), &h.state).unwrap();
        assert_eq!(suppliers.as_array().unwrap().len(), 1);
        assert_eq!(customer_list(None, &h.state).unwrap().as_array().unwrap().len(), 2);
        assert!(customer_list(Some(json!("vendor")), &h.state).is_err());

        let found = customer_search(Some(json!({ "q": "ram" })), &h.state).unwrap();
        assert_eq!(found[0]["id"], id.as_str());
        let by_phone = customer_find_by_phone(Some(json!("+9779841111111")), &h.state).unwrap();
        assert_eq!(by_phone["id"], id.as_str());

        let updated = customer_update(
            Some(json!({ "customerId": id, "name": "Ram B. Thapa" })),
            &h.state,
        )
        .unwrap();
        assert_eq!(updated["customer"]["name"], "Ram B. Thapa");
        assert_eq!(updated["entriesRenamed"], 0);

        let deleted = customer_delete(Some(json!(id.clone())), &h.state).unwrap();
        assert_eq!(deleted["success"], true);
        assert!(customer_get(Some(json!({ "id": id })), &h.state).is_err());
    }

    #[tokio::test]
    async fn test_missing_id() {
        let h = signed_in().await;
        assert_eq!(customer_get(None, &h.state).unwrap_err(), "Missing customer id");
        assert_eq!(
            customer_find_by_phone(None, &h.state).unwrap_err(),
            "Missing phone number"
        );
    }
}
