//! Customers and suppliers.
//!
//! Every mutation writes the local row and its sync queue entry in one
//! SQLite transaction. Renaming a customer rewrites the name copied onto
//! each of its ledger entries and queues one UPDATE per entry.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{Error, Result};
use crate::models::{Customer, CustomerType, CustomerUpdate, EntityKind, NewCustomer, OperationKind};
use crate::{now_rfc3339, sync};

const MAX_NAME_LEN: usize = 100;

const CUSTOMER_COLUMNS: &str = "id, user_id, name, phone, customer_type, created_at, updated_at";

/// Digits only, with a leading `977` country code removed.
pub fn normalize_phone(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix("977") {
        Some(local) if local.len() == 10 => local.to_string(),
        _ => digits,
    }
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::validation("Customer name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "Customer name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_phone(raw: &str) -> Result<String> {
    let phone = normalize_phone(raw);
    if !phone.is_empty() && !(7..=15).contains(&phone.len()) {
        return Err(Error::validation("Phone number must have 7 to 15 digits"));
    }
    Ok(phone)
}

pub(crate) fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    let kind: String = row.get(4)?;
    Ok(Customer {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        customer_type: kind.parse().unwrap_or(CustomerType::Customer),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn ensure_phone_free(
    conn: &Connection,
    user_id: &str,
    phone: &str,
    except: Option<&str>,
) -> Result<()> {
    if phone.is_empty() {
        return Ok(());
    }
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM customers WHERE user_id = ?1 AND phone = ?2",
            params![user_id, phone],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match existing {
        Some((id, name)) if Some(id.as_str()) != except => Err(Error::Conflict(format!(
            "Phone {phone} is already used by {name}"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn load_customer(conn: &Connection, user_id: &str, id: &str) -> Result<Customer> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1 AND user_id = ?2"),
        params![id, user_id],
        customer_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("Customer"))
}

pub fn create_customer(db: &DbState, user_id: &str, new: NewCustomer) -> Result<Customer> {
    let name = validate_name(&new.name)?;
    let phone = validate_phone(&new.phone)?;

    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    ensure_phone_free(&tx, user_id, &phone, None)?;

    let now = now_rfc3339();
    let customer = Customer {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name,
        phone,
        customer_type: new.customer_type,
        created_at: now.clone(),
        updated_at: now,
    };
    tx.execute(
        "INSERT INTO customers (id, user_id, name, phone, customer_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            customer.id,
            customer.user_id,
            customer.name,
            customer.phone,
            customer.customer_type.as_str(),
            customer.created_at,
            customer.updated_at
        ],
    )?;
    sync::enqueue(
        &tx,
        OperationKind::Create,
        EntityKind::Customer,
        &customer.id,
        &serde_json::to_value(&customer)?,
    )?;
    tx.commit()?;

    info!(customer_id = %customer.id, kind = customer.customer_type.as_str(), "customer created");
    Ok(customer)
}

pub fn get_customer(db: &DbState, user_id: &str, id: &str) -> Result<Customer> {
    let conn = db.conn.lock()?;
    load_customer(&conn, user_id, id)
}

/// Customers ordered by name, optionally only one type.
pub fn list_customers(
    db: &DbState,
    user_id: &str,
    filter: Option<CustomerType>,
) -> Result<Vec<Customer>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers
         WHERE user_id = ?1 AND (?2 IS NULL OR customer_type = ?2)
         ORDER BY name COLLATE NOCASE, created_at"
    ))?;
    let rows = stmt
        .query_map(params![user_id, filter.map(CustomerType::as_str)], customer_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Case-insensitive name match, or phone match when the query is numeric.
pub fn search_customers(db: &DbState, user_id: &str, query: &str) -> Result<Vec<Customer>> {
    let query = query.trim();
    if query.is_empty() {
        return list_customers(db, user_id, None);
    }
    let is_phone = query
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' '));
    let (column, needle) = if is_phone {
        ("phone", format!("%{}%", normalize_phone(query)))
    } else {
        ("lower(name)", format!("%{}%", query.to_lowercase()))
    };

    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers
         WHERE user_id = ?1 AND {column} LIKE ?2
         ORDER BY name COLLATE NOCASE LIMIT 50"
    ))?;
    let rows = stmt
        .query_map(params![user_id, needle], customer_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn find_by_phone(db: &DbState, user_id: &str, phone: &str) -> Result<Option<Customer>> {
    let phone = normalize_phone(phone);
    if phone.is_empty() {
        return Ok(None);
    }
    let conn = db.conn.lock()?;
    Ok(conn
        .query_row(
            &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE user_id = ?1 AND phone = ?2"),
            params![user_id, phone],
            customer_from_row,
        )
        .optional()?)
}

/// Apply a partial update. Returns the customer and the number of ledger
/// entries whose copied name was rewritten.
pub fn update_customer(
    db: &DbState,
    user_id: &str,
    id: &str,
    update: CustomerUpdate,
) -> Result<(Customer, usize)> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let mut customer = load_customer(&tx, user_id, id)?;

    let mut renamed = false;
    if let Some(name) = update.name.as_deref() {
        let name = validate_name(name)?;
        renamed = name != customer.name;
        customer.name = name;
    }
    if let Some(phone) = update.phone.as_deref() {
        let phone = validate_phone(phone)?;
        ensure_phone_free(&tx, user_id, &phone, Some(id))?;
        customer.phone = phone;
    }
    if let Some(kind) = update.customer_type {
        customer.customer_type = kind;
    }
    customer.updated_at = now_rfc3339();

    tx.execute(
        "UPDATE customers SET name = ?1, phone = ?2, customer_type = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            customer.name,
            customer.phone,
            customer.customer_type.as_str(),
            customer.updated_at,
            customer.id
        ],
    )?;
    sync::enqueue(
        &tx,
        OperationKind::Update,
        EntityKind::Customer,
        &customer.id,
        &serde_json::to_value(&customer)?,
    )?;

    let mut entries_renamed = 0;
    if renamed {
        tx.execute(
            "UPDATE transaction_entries SET customer_name = ?1, updated_at = ?2
             WHERE customer_id = ?3",
            params![customer.name, customer.updated_at, customer.id],
        )?;
        let entry_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM transaction_entries WHERE customer_id = ?1")?;
            let ids = stmt
                .query_map(params![customer.id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        for entry_id in &entry_ids {
            let entry = crate::transactions::load_entry(&tx, user_id, entry_id)?;
            sync::enqueue(
                &tx,
                OperationKind::Update,
                EntityKind::TransactionEntry,
                entry_id,
                &serde_json::to_value(&entry)?,
            )?;
        }
        entries_renamed = entry_ids.len();
    }
    tx.commit()?;

    if renamed {
        info!(customer_id = %customer.id, entries = entries_renamed, "customer renamed");
    }
    Ok((customer, entries_renamed))
}

/// Delete a customer and its ledger. Returns the number of entries removed.
pub fn delete_customer(db: &DbState, user_id: &str, id: &str) -> Result<usize> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    load_customer(&tx, user_id, id)?;

    let entry_ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM transaction_entries WHERE customer_id = ?1")?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    for entry_id in &entry_ids {
        sync::enqueue(
            &tx,
            OperationKind::Delete,
            EntityKind::TransactionEntry,
            entry_id,
            &serde_json::json!({}),
        )?;
    }
    sync::enqueue(
        &tx,
        OperationKind::Delete,
        EntityKind::Customer,
        id,
        &serde_json::json!({}),
    )?;
    // Entries go with the customer through ON DELETE CASCADE.
    tx.execute("DELETE FROM customers WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(customer_id = %id, entries = entry_ids.len(), "customer deleted");
    Ok(entry_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::BsDate;
    use crate::models::{NewEntry, TransactionType};
    use crate::transactions;

    const USER: &str = "user-1";

    fn new_customer(name: &str, phone: &str, kind: CustomerType) -> NewCustomer {
        NewCustomer {
            name: name.into(),
            phone: phone.into(),
            customer_type: kind,
        }
    }

    fn create(
        db: &DbState,
        user_id: &str,
        name: &str,
        phone: &str,
        customer_type: CustomerType,
    ) -> Result<Customer> {
        create_customer(db, user_id, new_customer(name, phone, customer_type))
    }

    fn queue_summary(db: &DbState) -> Vec<(OperationKind, EntityKind)> {
        let conn = db.conn.lock().unwrap();
        sync::pending_operations(&conn, false)
            .unwrap()
            .into_iter()
            .map(|op| (op.kind, op.entity))
            .collect()
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+977 9841-234567"), "9841234567");
        assert_eq!(normalize_phone("01-4412345"), "014412345");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn test_create_validates_and_queues() {
        let db = DbState::open_in_memory().unwrap();
        assert!(matches!(
            create(&db, USER, "   ", "", CustomerType::Customer),
            Err(Error::Validation(_))
        ));

        let c = create(&db, USER, " Hari Traders ", "+977-9841234567", CustomerType::Supplier)
            .unwrap();
        assert_eq!(c.name, "Hari Traders");
        assert_eq!(c.phone, "9841234567");
        assert_eq!(queue_summary(&db), vec![(OperationKind::Create, EntityKind::Customer)]);
    }

    #[test]
    fn test_duplicate_phone_is_per_user() {
        let db = DbState::open_in_memory().unwrap();
        create(&db, USER, "Ram", "9841234567", CustomerType::Customer).unwrap();

        let err = create(&db, USER, "Shyam", "984-1234567", CustomerType::Customer).unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m.contains("Ram")));

        create(&db, "user-2", "Shyam", "9841234567", CustomerType::Customer).unwrap();
        // Blank phones never collide.
        create(&db, USER, "A", "", CustomerType::Customer).unwrap();
        create(&db, USER, "B", "", CustomerType::Customer).unwrap();
    }

    #[test]
    fn test_list_search_and_find() {
        let db = DbState::open_in_memory().unwrap();
        create(&db, USER, "sita", "9801111111", CustomerType::Customer).unwrap();
        create(&db, USER, "Bishal Suppliers", "9802222222", CustomerType::Supplier).unwrap();
        create(&db, USER, "Anita", "", CustomerType::Customer).unwrap();

        let all = list_customers(&db, USER, None).unwrap();
        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Anita", "Bishal Suppliers", "sita"]);

        let suppliers = list_customers(&db, USER, Some(CustomerType::Supplier)).unwrap();
        assert_eq!(suppliers.len(), 1);

        assert_eq!(search_customers(&db, USER, "ITA").unwrap().len(), 2);
        assert_eq!(search_customers(&db, USER, "2222").unwrap()[0].name, "Bishal Suppliers");
        assert!(find_by_phone(&db, USER, "+977 9801111111").unwrap().is_some());
        assert!(find_by_phone(&db, "other", "9801111111").unwrap().is_none());
    }

    #[test]
    fn test_rename_propagates_to_entries() {
        let db = DbState::open_in_memory().unwrap();
        let c = create(&db, USER, "Ram", "", CustomerType::Customer).unwrap();
        for amount in [100.0, 250.0] {
            transactions::add_entry(&db, USER, NewEntry {
                customer_id: c.id.clone(),
                amount,
                transaction_type: TransactionType::Given,
                description: String::new(),
                transaction_date: BsDate::new(2081, 5, 15).unwrap(),
            })
            .unwrap();
        }
        {
            // Pretend everything was uploaded already.
            let conn = db.conn.lock().unwrap();
            sync::clear_queue(&conn).unwrap();
        }

        let (updated, renamed) = update_customer(&db, USER, &c.id, CustomerUpdate {
            name: Some("Ram Bahadur".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(updated.name, "Ram Bahadur");
        assert_eq!(renamed, 2);

        let entries = transactions::list_entries(&db, USER, &transactions::EntryFilter {
            customer_id: Some(c.id.clone()),
            ..Default::default()
        })
        .unwrap();
        assert!(entries.iter().all(|e| e.customer_name == "Ram Bahadur"));

        let queued = queue_summary(&db);
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[0], (OperationKind::Update, EntityKind::Customer));
        assert_eq!(
            queued.iter().filter(|(_, e)| *e == EntityKind::TransactionEntry).count(),
            2
        );
    }

    #[test]
    fn test_update_phone_conflict_and_type_change() {
        let db = DbState::open_in_memory().unwrap();
        let a = create(&db, USER, "A", "9801111111", CustomerType::Customer).unwrap();
        create(&db, USER, "B", "9802222222", CustomerType::Customer).unwrap();

        let err = update_customer(&db, USER, &a.id, CustomerUpdate {
            phone: Some("9802222222".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Keeping its own number is fine.
        let (a, renamed) = update_customer(&db, USER, &a.id, CustomerUpdate {
            phone: Some("9801111111".into()),
            customer_type: Some(CustomerType::Supplier),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(a.customer_type, CustomerType::Supplier);
        assert_eq!(renamed, 0);
    }

    #[test]
    fn test_delete_cascades_and_queues() {
        let db = DbState::open_in_memory().unwrap();
        let c = create(&db, USER, "Gita", "", CustomerType::Customer).unwrap();
        transactions::add_entry(&db, USER, NewEntry {
            customer_id: c.id.clone(),
            amount: 500.0,
            transaction_type: TransactionType::Received,
            description: "advance".into(),
            transaction_date: BsDate::new(2081, 1, 1).unwrap(),
        })
        .unwrap();

        // Never synced: create + delete compact away entirely.
        assert_eq!(delete_customer(&db, USER, &c.id).unwrap(), 1);
        assert!(queue_summary(&db).is_empty());
        assert!(matches!(get_customer(&db, USER, &c.id), Err(Error::NotFound(_))));

        let c = create(&db, USER, "Hari", "", CustomerType::Customer).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            sync::clear_queue(&conn).unwrap();
        }
        delete_customer(&db, USER, &c.id).unwrap();
        assert_eq!(queue_summary(&db), vec![(OperationKind::Delete, EntityKind::Customer)]);
    }

    #[test]
    fn test_other_users_customers_are_invisible() {
        let db = DbState::open_in_memory().unwrap();
        let c = create(&db, USER, "Ram", "", CustomerType::Customer).unwrap();
        assert!(matches!(get_customer(&db, "intruder", &c.id), Err(Error::NotFound(_))));
        assert!(matches!(delete_customer(&db, "intruder", &c.id), Err(Error::NotFound(_))));
    }
}
