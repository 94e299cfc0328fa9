//! The ledger: money given to and received from customers.
//!
//! Each entry stores the running balance of its customer after that entry
//! (`balance_after`). Entries can be back-dated, so any insert, edit or
//! delete recomputes the running balance over the customer's whole ledger
//! in `(transaction_date, created_at)` order and queues an UPDATE for each
//! entry whose stored balance moved.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::BsDate;
use crate::customers::{customer_from_row, load_customer};
use crate::db::DbState;
use crate::error::{Error, Result};
use crate::interest::{self, InterestBreakdown, InterestMethod, InterestRequest, RateBasis};
use crate::models::{
    CustomerBalance, CustomerType, EntityKind, EntryUpdate, LedgerSummary, NewEntry,
    OperationKind, TransactionEntry, TransactionType,
};
use crate::{now_rfc3339, sync};

const MAX_AMOUNT: f64 = 1_000_000_000_000.0;
const MAX_DESCRIPTION_LEN: usize = 500;
/// Half a paisa; balances closer than this are equal.
const BALANCE_EPSILON: f64 = 0.005;

const ENTRY_COLUMNS: &str = "id, user_id, customer_id, customer_name, amount, transaction_type, \
     description, transaction_date, balance_after, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub customer_id: Option<String>,
    pub from: Option<BsDate>,
    pub to: Option<BsDate>,
    pub transaction_type: Option<TransactionType>,
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionEntry> {
    let kind: String = row.get(5)?;
    let date: String = row.get(7)?;
    let conversion = |idx: usize, e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(TransactionEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        customer_id: row.get(2)?,
        customer_name: row.get(3)?,
        amount: row.get(4)?,
        transaction_type: kind.parse().map_err(|e| conversion(5, e))?,
        description: row.get(6)?,
        transaction_date: date.parse().map_err(|e| conversion(7, e))?,
        balance_after: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn validate_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::validation("Amount must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::validation("Amount is too large"));
    }
    Ok(interest::round_money(amount))
}

fn validate_description(raw: &str) -> Result<String> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::validation(format!(
            "Description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(description.to_string())
}

pub(crate) fn load_entry(conn: &Connection, user_id: &str, id: &str) -> Result<TransactionEntry> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM transaction_entries WHERE id = ?1 AND user_id = ?2"),
        params![id, user_id],
        entry_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("Transaction"))
}

fn ledger_for(conn: &Connection, customer_id: &str) -> Result<Vec<TransactionEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM transaction_entries
         WHERE customer_id = ?1
         ORDER BY transaction_date, created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(params![customer_id], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Rewrite `balance_after` across a customer's ledger. Returns the ids of
/// entries whose stored balance changed.
pub fn recompute_balances(conn: &Connection, customer_id: &str) -> Result<Vec<String>> {
    let mut running = 0.0;
    let mut changed = Vec::new();
    for entry in ledger_for(conn, customer_id)? {
        running = interest::round_money(running + entry.transaction_type.signed(entry.amount));
        if (entry.balance_after - running).abs() >= BALANCE_EPSILON {
            conn.execute(
                "UPDATE transaction_entries SET balance_after = ?1 WHERE id = ?2",
                params![running, entry.id],
            )?;
            changed.push(entry.id);
        }
    }
    Ok(changed)
}

/// Recompute and queue UPDATEs for moved balances, except `skip` (which the
/// caller queues itself).
fn rebalance_and_queue(
    conn: &Connection,
    user_id: &str,
    customer_id: &str,
    skip: Option<&str>,
) -> Result<()> {
    let changed = recompute_balances(conn, customer_id)?;
    for id in changed.iter().filter(|id| Some(id.as_str()) != skip) {
        let entry = load_entry(conn, user_id, id)?;
        sync::enqueue(
            conn,
            OperationKind::Update,
            EntityKind::TransactionEntry,
            id,
            &serde_json::to_value(&entry)?,
        )?;
    }
    if !changed.is_empty() {
        debug!(customer_id, moved = changed.len(), "running balances recomputed");
    }
    Ok(())
}

pub fn add_entry(db: &DbState, user_id: &str, new: NewEntry) -> Result<TransactionEntry> {
    let amount = validate_amount(new.amount)?;
    let description = validate_description(&new.description)?;

    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let customer = load_customer(&tx, user_id, &new.customer_id)?;

    let now = now_rfc3339();
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO transaction_entries (id, user_id, customer_id, customer_name, amount,
            transaction_type, description, transaction_date, balance_after, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
        params![
            id,
            user_id,
            customer.id,
            customer.name,
            amount,
            new.transaction_type.as_str(),
            description,
            new.transaction_date.to_string(),
            now
        ],
    )?;
    rebalance_and_queue(&tx, user_id, &customer.id, Some(&id))?;
    let entry = load_entry(&tx, user_id, &id)?;
    sync::enqueue(
        &tx,
        OperationKind::Create,
        EntityKind::TransactionEntry,
        &id,
        &serde_json::to_value(&entry)?,
    )?;
    tx.commit()?;

    info!(
        entry_id = %entry.id,
        customer_id = %entry.customer_id,
        kind = entry.transaction_type.as_str(),
        date = %entry.transaction_date,
        "ledger entry added"
    );
    Ok(entry)
}

pub fn update_entry(
    db: &DbState,
    user_id: &str,
    id: &str,
    update: EntryUpdate,
) -> Result<TransactionEntry> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let mut entry = load_entry(&tx, user_id, id)?;

    if let Some(amount) = update.amount {
        entry.amount = validate_amount(amount)?;
    }
    if let Some(kind) = update.transaction_type {
        entry.transaction_type = kind;
    }
    if let Some(description) = update.description.as_deref() {
        entry.description = validate_description(description)?;
    }
    if let Some(date) = update.transaction_date {
        entry.transaction_date = date;
    }

    tx.execute(
        "UPDATE transaction_entries
         SET amount = ?1, transaction_type = ?2, description = ?3, transaction_date = ?4,
             updated_at = ?5
         WHERE id = ?6",
        params![
            entry.amount,
            entry.transaction_type.as_str(),
            entry.description,
            entry.transaction_date.to_string(),
            now_rfc3339(),
            entry.id
        ],
    )?;
    rebalance_and_queue(&tx, user_id, &entry.customer_id, Some(id))?;
    let entry = load_entry(&tx, user_id, id)?;
    sync::enqueue(
        &tx,
        OperationKind::Update,
        EntityKind::TransactionEntry,
        id,
        &serde_json::to_value(&entry)?,
    )?;
    tx.commit()?;
    Ok(entry)
}

pub fn delete_entry(db: &DbState, user_id: &str, id: &str) -> Result<()> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let entry = load_entry(&tx, user_id, id)?;

    tx.execute("DELETE FROM transaction_entries WHERE id = ?1", params![id])?;
    sync::enqueue(
        &tx,
        OperationKind::Delete,
        EntityKind::TransactionEntry,
        id,
        &serde_json::json!({}),
    )?;
    rebalance_and_queue(&tx, user_id, &entry.customer_id, None)?;
    tx.commit()?;

    info!(entry_id = %id, customer_id = %entry.customer_id, "ledger entry deleted");
    Ok(())
}

pub fn get_entry(db: &DbState, user_id: &str, id: &str) -> Result<TransactionEntry> {
    let conn = db.conn.lock()?;
    load_entry(&conn, user_id, id)
}

/// Entries in ledger order, narrowed by customer, BS date range and type.
pub fn list_entries(
    db: &DbState,
    user_id: &str,
    filter: &EntryFilter,
) -> Result<Vec<TransactionEntry>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if to < from {
            return Err(Error::validation(format!(
                "End date {to} is before start date {from}"
            )));
        }
    }
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM transaction_entries
         WHERE user_id = ?1
           AND (?2 IS NULL OR customer_id = ?2)
           AND (?3 IS NULL OR transaction_date >= ?3)
           AND (?4 IS NULL OR transaction_date <= ?4)
           AND (?5 IS NULL OR transaction_type = ?5)
         ORDER BY transaction_date, created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(
            params![
                user_id,
                filter.customer_id,
                filter.from.map(|d| d.to_string()),
                filter.to.map(|d| d.to_string()),
                filter.transaction_type.map(TransactionType::as_str),
            ],
            entry_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Default)]
struct Totals {
    given: f64,
    received: f64,
    count: i64,
    last_date: Option<String>,
}

fn totals_by_customer(conn: &Connection, user_id: &str) -> Result<HashMap<String, Totals>> {
    let mut stmt = conn.prepare(
        "SELECT customer_id,
                COALESCE(SUM(CASE WHEN transaction_type = 'given' THEN amount END), 0),
                COALESCE(SUM(CASE WHEN transaction_type = 'received' THEN amount END), 0),
                COUNT(*),
                MAX(transaction_date)
         FROM transaction_entries
         WHERE user_id = ?1
         GROUP BY customer_id",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            Totals {
                given: row.get(1)?,
                received: row.get(2)?,
                count: row.get(3)?,
                last_date: row.get(4)?,
            },
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
}

fn balance_for(customer: &crate::models::Customer, totals: Option<&Totals>) -> CustomerBalance {
    let (given, received, count, last) = match totals {
        Some(t) => (t.given, t.received, t.count, t.last_date.as_deref()),
        None => (0.0, 0.0, 0, None),
    };
    CustomerBalance {
        customer_id: customer.id.clone(),
        customer_name: customer.name.clone(),
        customer_type: customer.customer_type,
        total_given: interest::round_money(given),
        total_received: interest::round_money(received),
        balance: interest::round_money(given - received),
        entry_count: count,
        last_transaction_date: last.and_then(|d| d.parse().ok()),
    }
}

/// `sum(given) - sum(received)` for one customer. Positive means the
/// customer owes us.
pub fn customer_balance(db: &DbState, user_id: &str, customer_id: &str) -> Result<CustomerBalance> {
    let conn = db.conn.lock()?;
    let customer = load_customer(&conn, user_id, customer_id)?;
    let totals = totals_by_customer(&conn, user_id)?;
    Ok(balance_for(&customer, totals.get(customer_id)))
}

/// Totals across every customer and supplier of the user.
pub fn ledger_summary(db: &DbState, user_id: &str) -> Result<LedgerSummary> {
    let conn = db.conn.lock()?;
    let totals = totals_by_customer(&conn, user_id)?;
    let customers = {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, phone, customer_type, created_at, updated_at
             FROM customers WHERE user_id = ?1 ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![user_id], customer_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut summary = LedgerSummary {
        customer_count: customers.len(),
        ..Default::default()
    };
    for customer in &customers {
        let balance = balance_for(customer, totals.get(&customer.id));
        summary.total_given += balance.total_given;
        summary.total_received += balance.total_received;
        let (receive, give) = if balance.balance >= 0.0 {
            (balance.balance, 0.0)
        } else {
            (0.0, -balance.balance)
        };
        summary.to_receive += receive;
        summary.to_give += give;
        match customer.customer_type {
            CustomerType::Customer => {
                summary.customer_to_receive += receive;
                summary.customer_to_give += give;
            }
            CustomerType::Supplier => {
                summary.supplier_to_receive += receive;
                summary.supplier_to_give += give;
            }
        }
        summary.balances.push(balance);
    }

    for total in [
        &mut summary.total_given,
        &mut summary.total_received,
        &mut summary.to_receive,
        &mut summary.to_give,
        &mut summary.customer_to_receive,
        &mut summary.customer_to_give,
        &mut summary.supplier_to_receive,
        &mut summary.supplier_to_give,
    ] {
        *total = interest::round_money(*total);
    }
    Ok(summary)
}

/// Interest on a customer's outstanding balance, counted from the first
/// entry after the balance last stood at zero up to `as_of`.
pub fn interest_for_customer(
    db: &DbState,
    user_id: &str,
    customer_id: &str,
    rate: f64,
    rate_basis: RateBasis,
    method: InterestMethod,
    as_of: BsDate,
) -> Result<InterestBreakdown> {
    let ledger = {
        let conn = db.conn.lock()?;
        load_customer(&conn, user_id, customer_id)?;
        ledger_for(&conn, customer_id)?
    };

    let mut running = 0.0;
    let mut since: Option<BsDate> = None;
    for entry in &ledger {
        if entry.transaction_date > as_of {
            break;
        }
        running = interest::round_money(running + entry.transaction_type.signed(entry.amount));
        if running.abs() < BALANCE_EPSILON {
            since = None;
        } else if since.is_none() {
            since = Some(entry.transaction_date);
        }
    }

    let start = since.ok_or_else(|| Error::validation("Customer has no outstanding balance"))?;
    interest::calculate(&InterestRequest {
        principal: running.abs(),
        rate,
        rate_basis,
        start,
        end: as_of,
        method,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType::{Given, Received};
    use crate::customers::create_customer;
    use crate::interest::Frequency;
    use crate::models::NewCustomer;

    const USER: &str = "user-1";

    fn date(y: u16, m: u8, d: u8) -> BsDate {
        BsDate::new(y, m, d).unwrap()
    }

    fn customer(db: &DbState, name: &str, kind: CustomerType) -> String {
        create_customer(db, USER, NewCustomer {
            name: name.into(),
            phone: String::new(),
            customer_type: kind,
        })
        .unwrap()
        .id
    }

    fn entry(customer_id: &str, amount: f64, kind: TransactionType, on: BsDate) -> NewEntry {
        NewEntry {
            customer_id: customer_id.into(),
            amount,
            transaction_type: kind,
            description: String::new(),
            transaction_date: on,
        }
    }

    fn clear_queue(db: &DbState) {
        let conn = db.conn.lock().unwrap();
        sync::clear_queue(&conn).unwrap();
    }

    #[test]
    fn test_add_entry_validates() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Ram", CustomerType::Customer);
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                add_entry(&db, USER, entry(&c, bad, Given, date(2081, 1, 1))),
                Err(Error::Validation(_))
            ));
        }
        assert!(matches!(
            add_entry(&db, USER, entry("missing", 10.0, Given, date(2081, 1, 1))),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_running_balance_follows_bs_date_order() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Ram", CustomerType::Customer);

        let first = add_entry(&db, USER, entry(&c, 1000.0, Given, date(2081, 5, 1))).unwrap();
        assert_eq!(first.balance_after, 1000.0);
        assert_eq!(first.customer_name, "Ram");

        let later = add_entry(&db, USER, entry(&c, 400.0, Received, date(2081, 5, 15))).unwrap();
        assert_eq!(later.balance_after, 600.0);

        // Back-dated entry shifts everything after it.
        let early = add_entry(&db, USER, entry(&c, 250.0, Given, date(2081, 4, 20))).unwrap();
        assert_eq!(early.balance_after, 250.0);

        let ledger = list_entries(&db, USER, &EntryFilter {
            customer_id: Some(c.clone()),
            ..Default::default()
        })
        .unwrap();
        let balances: Vec<f64> = ledger.iter().map(|e| e.balance_after).collect();
        assert_eq!(balances, vec![250.0, 1250.0, 850.0]);
    }

    #[test]
    fn test_backdated_entry_queues_moved_balances() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Ram", CustomerType::Customer);
        add_entry(&db, USER, entry(&c, 100.0, Given, date(2081, 5, 1))).unwrap();
        clear_queue(&db);

        add_entry(&db, USER, entry(&c, 50.0, Given, date(2081, 4, 1))).unwrap();
        let conn = db.conn.lock().unwrap();
        let ops = sync::pending_operations(&conn, false).unwrap();
        let kinds: Vec<OperationKind> = ops.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Update, OperationKind::Create]);
        assert_eq!(ops[0].data["balance_after"], 150.0);
    }

    #[test]
    fn test_update_and_delete_rebalance() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Sita", CustomerType::Customer);
        let a = add_entry(&db, USER, entry(&c, 500.0, Given, date(2081, 1, 5))).unwrap();
        let b = add_entry(&db, USER, entry(&c, 200.0, Received, date(2081, 1, 10))).unwrap();

        let a = update_entry(&db, USER, &a.id, EntryUpdate {
            amount: Some(800.0),
            description: Some("  rice sacks ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(a.description, "rice sacks");
        assert_eq!(get_entry(&db, USER, &b.id).unwrap().balance_after, 600.0);

        delete_entry(&db, USER, &a.id).unwrap();
        assert_eq!(get_entry(&db, USER, &b.id).unwrap().balance_after, -200.0);
        assert!(matches!(get_entry(&db, USER, &a.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_entries_by_date_range_and_type() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Ram", CustomerType::Customer);
        add_entry(&db, USER, entry(&c, 10.0, Given, date(2080, 12, 30))).unwrap();
        add_entry(&db, USER, entry(&c, 20.0, Received, date(2081, 1, 1))).unwrap();
        add_entry(&db, USER, entry(&c, 30.0, Given, date(2081, 2, 1))).unwrap();

        let in_2081 = list_entries(&db, USER, &EntryFilter {
            from: Some(date(2081, 1, 1)),
            to: Some(date(2081, 12, 30)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(in_2081.len(), 2);

        let given = list_entries(&db, USER, &EntryFilter {
            transaction_type: Some(Given),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(given.len(), 2);

        assert!(list_entries(&db, USER, &EntryFilter {
            from: Some(date(2081, 2, 1)),
            to: Some(date(2081, 1, 1)),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_balances_and_summary() {
        let db = DbState::open_in_memory().unwrap();
        let ram = customer(&db, "Ram", CustomerType::Customer);
        let hari = customer(&db, "Hari Traders", CustomerType::Supplier);
        let idle = customer(&db, "Idle", CustomerType::Customer);

        add_entry(&db, USER, entry(&ram, 1500.0, Given, date(2081, 1, 1))).unwrap();
        add_entry(&db, USER, entry(&ram, 500.25, Received, date(2081, 1, 2))).unwrap();
        add_entry(&db, USER, entry(&hari, 3000.0, Received, date(2081, 1, 3))).unwrap();

        let balance = customer_balance(&db, USER, &ram).unwrap();
        assert_eq!(balance.balance, 999.75);
        assert_eq!(balance.entry_count, 2);
        assert_eq!(balance.last_transaction_date, Some(date(2081, 1, 2)));

        let empty = customer_balance(&db, USER, &idle).unwrap();
        assert_eq!(empty.balance, 0.0);
        assert_eq!(empty.last_transaction_date, None);

        let summary = ledger_summary(&db, USER).unwrap();
        assert_eq!(summary.customer_count, 3);
        assert_eq!(summary.total_given, 1500.0);
        assert_eq!(summary.total_received, 3500.25);
        assert_eq!(summary.to_receive, 999.75);
        assert_eq!(summary.to_give, 3000.0);
        assert_eq!(summary.customer_to_receive, 999.75);
        assert_eq!(summary.supplier_to_give, 3000.0);
        assert_eq!(summary.balances.len(), 3);
    }

    #[test]
    fn test_interest_counts_from_last_settlement() {
        let db = DbState::open_in_memory().unwrap();
        let c = customer(&db, "Ram", CustomerType::Customer);
        add_entry(&db, USER, entry(&c, 5000.0, Given, date(2080, 1, 1))).unwrap();
        add_entry(&db, USER, entry(&c, 5000.0, Received, date(2080, 6, 1))).unwrap();
        add_entry(&db, USER, entry(&c, 10000.0, Given, date(2081, 1, 1))).unwrap();

        let simple = interest_for_customer(
            &db,
            USER,
            &c,
            12.0,
            RateBasis::PerAnnum,
            InterestMethod::Simple,
            date(2082, 1, 1),
        )
        .unwrap();
        assert_eq!(simple.start, date(2081, 1, 1));
        assert_eq!(simple.principal, 10000.0);
        assert_eq!(simple.interest, 1200.0);

        let compound = interest_for_customer(
            &db,
            USER,
            &c,
            1.0,
            RateBasis::PerMonth,
            InterestMethod::Compound(Frequency::Yearly),
            date(2082, 1, 1),
        )
        .unwrap();
        assert_eq!(compound.interest, 1200.0);

        // Nothing owed on a date when the account was settled.
        assert!(interest_for_customer(
            &db,
            USER,
            &c,
            12.0,
            RateBasis::PerAnnum,
            InterestMethod::Simple,
            date(2080, 12, 1),
        )
        .is_err());
    }
}
