use serde::Deserialize;
use serde_json::{json, Value};

use super::calendar::{parse_method, parse_rate_basis};
use super::{parse_payload, payload_arg0_as_string, payload_object, to_json, AppState};
use crate::calendar::BsDate;
use crate::models::{EntryUpdate, NewEntry, TransactionType};
use crate::transactions::{self, EntryFilter};

const ENTRY_ID_KEYS: &[&str] = &["id", "entryId", "entry_id", "transactionId"];
const CUSTOMER_ID_KEYS: &[&str] = &["customerId", "customer_id", "id"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    #[serde(default, alias = "customer_id")]
    customer_id: Option<String>,
    #[serde(default, alias = "start", alias = "startDate", alias = "start_date")]
    from: Option<BsDate>,
    #[serde(default, alias = "end", alias = "endDate", alias = "end_date")]
    to: Option<BsDate>,
    #[serde(default, alias = "transaction_type", alias = "type")]
    transaction_type: Option<TransactionType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    #[serde(alias = "entryId", alias = "entry_id", alias = "transactionId")]
    id: String,
    #[serde(flatten)]
    changes: EntryUpdate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerInterestPayload {
    #[serde(alias = "customer_id", alias = "id")]
    customer_id: String,
    rate: f64,
    #[serde(default, alias = "rate_basis", alias = "basis")]
    rate_basis: Option<String>,
    #[serde(default, alias = "frequency", alias = "method")]
    compounding: Option<String>,
    #[serde(default, alias = "as_of", alias = "date", alias = "end")]
    as_of: Option<BsDate>,
}

pub fn transaction_add(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let mut payload = payload_object(arg0, "customerId");
    if crate::value_str(&payload, &["transactionDate", "transaction_date", "date"]).is_none() {
        payload["transactionDate"] = json!(BsDate::today().map_err(String::from)?.to_string());
    }
    let new: NewEntry = parse_payload(payload, "transaction")?;
    let entry = transactions::add_entry(&state.db, &user_id, new).map_err(String::from)?;
    to_json(&entry)
}

pub fn transaction_get(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let id = payload_arg0_as_string(arg0, ENTRY_ID_KEYS).ok_or("Missing transaction id")?;
    let entry = transactions::get_entry(&state.db, &user_id, &id).map_err(String::from)?;
    to_json(&entry)
}

/// A bare string is taken as the customer id.
pub fn transaction_list(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let payload: ListPayload =
        parse_payload(payload_object(arg0, "customerId"), "transaction filter")?;
    let filter = EntryFilter {
        customer_id: payload.customer_id,
        from: payload.from,
        to: payload.to,
        transaction_type: payload.transaction_type,
    };
    let entries = transactions::list_entries(&state.db, &user_id, &filter).map_err(String::from)?;
    to_json(&entries)
}

pub fn transaction_update(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let payload: UpdatePayload = parse_payload(payload_object(arg0, "id"), "transaction update")?;
    let entry = transactions::update_entry(&state.db, &user_id, &payload.id, payload.changes)
        .map_err(String::from)?;
    to_json(&entry)
}

pub fn transaction_delete(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let id = payload_arg0_as_string(arg0, ENTRY_ID_KEYS).ok_or("Missing transaction id")?;
    transactions::delete_entry(&state.db, &user_id, &id).map_err(String::from)?;
    Ok(json!({ "success": true }))
}

pub fn balance_get(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let customer_id =
        payload_arg0_as_string(arg0, CUSTOMER_ID_KEYS).ok_or("Missing customer id")?;
    let balance =
        transactions::customer_balance(&state.db, &user_id, &customer_id).map_err(String::from)?;
    to_json(&balance)
}

pub fn ledger_summary(state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let summary = transactions::ledger_summary(&state.db, &user_id).map_err(String::from)?;
    to_json(&summary)
}

pub fn interest_for_customer(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let user_id = state.user_id()?;
    let payload: CustomerInterestPayload =
        parse_payload(payload_object(arg0, "customerId"), "interest")?;
    let as_of = match payload.as_of {
        Some(date) => date,
        None => BsDate::today().map_err(String::from)?,
    };
    let breakdown = transactions::interest_for_customer(
        &state.db,
        &user_id,
        &payload.customer_id,
        payload.rate,
        parse_rate_basis(payload.rate_basis.as_deref())?,
        parse_method(payload.compounding.as_deref())?,
        as_of,
    )
    .map_err(String::from)?;
    to_json(&breakdown)
}

#[cfg(test)]
mod tests {
    use super::super::customers::customer_create;
    use super::super::test_state::*;
    use super::*;

    async fn with_customer() -> (Harness, String) {
        let h = signed_in().await;
        let customer =
            customer_create(Some(json!({ "name": "Gita", "type": "customer" })), &h.state).unwrap();
        let id = customer["id"].as_str().unwrap().to_string();
        (h, id)
    }

    #[tokio::test]
    async fn test_add_update_delete_entry() {
        let (h, customer_id) = with_customer().await;
        let first = transaction_add(
            Some(json!({
                "customerId": customer_id,
                "amount": 1000,
                "transactionType": "given",
                "transactionDate": "2081-02-10"
            })),
            &h.state,
        )
        .unwrap();
        transaction_add(
            Some(json!({
                "customerId": customer_id,
                "amount": 400,
                "type": "received",
                "date": "2081-02-20",
                "description": "partial"
            })),
            &h.state,
        )
        .unwrap();

        let balance = balance_get(Some(json!(customer_id.clone())), &h.state).unwrap();
        assert_eq!(balance["balance"], 600.0);

        let first_id = first["id"].as_str().unwrap();
        let updated = transaction_update(
            Some(json!({ "entryId": first_id, "amount": 1500 })),
            &h.state,
        )
        .unwrap();
        assert_eq!(updated["balance_after"], 1500.0);
        let balance = balance_get(Some(json!({ "customerId": customer_id })), &h.state).unwrap();
        assert_eq!(balance["balance"], 1100.0);

        transaction_delete(Some(json!(first_id)), &h.state).unwrap();
        assert!(transaction_get(Some(json!({ "id": first_id })), &h.state).is_err());
        let balance = balance_get(Some(json!(customer_id.clone())), &h.state).unwrap();
        assert_eq!(balance["balance"], -400.0);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (h, customer_id) = with_customer().await;
        for (amount, kind, date) in [
            (100, "given", "2081-01-05"),
            (200, "given", "2081-03-05"),
            (50, "received", "2081-04-01"),
        ] {
            transaction_add(
                Some(json!({
                    "customerId": customer_id,
                    "amount": amount,
                    "type": kind,
                    "date": date
                })),
                &h.state,
            )
            .unwrap();
        }

        let all = transaction_list(Some(json!(customer_id.clone())), &h.state).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);

        let ranged = transaction_list(
            Some(json!({ "from": "2081-02-01", "to": "2081-04-01", "type": "given" })),
            &h.state,
        )
        .unwrap();
        assert_eq!(ranged.as_array().unwrap().len(), 1);
        assert_eq!(ranged[0]["amount"], 200.0);

        let backwards = json!({ "from": "2081-05-01", "to": "2081-04-01" });
        let err = transaction_list(Some(backwards), &h.state).unwrap_err();
        assert!(err.contains("before"));
    }

    #[tokio::test]
    async fn test_summary_and_interest() {
        let (h, customer_id) = with_customer().await;
        transaction_add(
            Some(json!({
                "customerId": customer_id,
                "amount": 10000,
                "type": "given",
                "date": "2080-01-01"
            })),
            &h.state,
        )
        .unwrap();

        let summary = ledger_summary(&h.state).unwrap();
        assert_eq!(summary["customerToReceive"], 10000.0);

        let interest = interest_for_customer(
            Some(json!({ "customerId": customer_id, "rate": 12, "asOf": "2081-01-01" })),
            &h.state,
        )
        .unwrap();
        assert_eq!(interest["interest"], 1200.0);

        let monthly = interest_for_customer(
            Some(json!({
                "customer_id": customer_id,
                "rate": 1,
                "basis": "monthly",
                "compounding": "yearly",
                "as_of": "2081-01-01"
            })),
            &h.state,
        )
        .unwrap();
        assert_eq!(monthly["total"], 11200.0);
    }
}
