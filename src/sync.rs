//! Offline-first sync engine for Mero Hisab.
//!
//! Every local mutation of a customer, ledger entry or profile writes a row
//! into `pending_operations` in the same SQLite transaction as the change
//! itself. A background loop drains that queue against the remote store
//! (Firestore) in insertion order, and a pull step folds remote documents
//! back into the local tables.
//!
//! Queue rows for the same document are compacted at enqueue time so a burst
//! of offline edits turns into a single remote write.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::{Error, ErrorKind, Result};
use crate::firestore::RemoteStore;
use crate::calendar::BsDate;
use crate::models::{CustomerType, EntityKind, OperationKind, PendingOperation, TransactionType};
use crate::{customers, now_rfc3339, transactions};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

fn merge_objects(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Record a local mutation for later upload.
///
/// Call with the same connection (or transaction) that performed the write.
/// Pending rows for the same document are compacted:
/// - UPDATE after a pending CREATE or UPDATE is merged into that row;
/// - DELETE after a pending CREATE drops both, the document never left the device;
/// - DELETE after pending UPDATEs replaces them.
pub fn enqueue(
    conn: &Connection,
    kind: OperationKind,
    entity: EntityKind,
    entity_id: &str,
    data: &Value,
) -> Result<()> {
    let now = now_rfc3339();
    let latest: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT id, operation, data FROM pending_operations
             WHERE entity = ?1 AND entity_id = ?2 AND status = ?3
             ORDER BY id DESC LIMIT 1",
            params![entity.as_str(), entity_id, STATUS_PENDING],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((row_id, existing, existing_data)) = latest {
        let existing: OperationKind = existing.parse()?;
        match (existing, kind) {
            (OperationKind::Create | OperationKind::Update, OperationKind::Update) => {
                let mut merged: Value =
                    serde_json::from_str(&existing_data).unwrap_or_else(|_| json!({}));
                merge_objects(&mut merged, data);
                conn.execute(
                    "UPDATE pending_operations
                     SET data = ?1, timestamp = ?2, revision = revision + 1,
                         updated_at = datetime('now')
                     WHERE id = ?3",
                    params![merged.to_string(), now, row_id],
                )?;
                debug!(
                    entity = entity.as_str(),
                    entity_id,
                    "merged update into pending {existing}"
                );
                return Ok(());
            }
            (OperationKind::Create, OperationKind::Delete) => {
                conn.execute(
                    "DELETE FROM pending_operations
                     WHERE entity = ?1 AND entity_id = ?2 AND status = ?3",
                    params![entity.as_str(), entity_id, STATUS_PENDING],
                )?;
                debug!(entity = entity.as_str(), entity_id, "dropped unsynced create");
                return Ok(());
            }
            (OperationKind::Update, OperationKind::Delete) => {
                conn.execute(
                    "DELETE FROM pending_operations
                     WHERE entity = ?1 AND entity_id = ?2 AND status = ?3 AND operation = 'UPDATE'",
                    params![entity.as_str(), entity_id, STATUS_PENDING],
                )?;
            }
            _ => {}
        }
    }

    conn.execute(
        "INSERT INTO pending_operations (operation, entity, entity_id, data, status, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            kind.as_str(),
            entity.as_str(),
            entity_id,
            data.to_string(),
            STATUS_PENDING,
            now
        ],
    )?;
    Ok(())
}

fn operation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingOperation> {
    let kind: String = row.get(1)?;
    let entity: String = row.get(2)?;
    let data: String = row.get(4)?;
    let to_sql_err = |e: Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(PendingOperation {
        id: row.get(0)?,
        kind: kind.parse().map_err(to_sql_err)?,
        entity: entity.parse().map_err(to_sql_err)?,
        entity_id: row.get(3)?,
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        timestamp: row.get(5)?,
        status: row.get(6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        revision: row.get(9)?,
    })
}

const OPERATION_COLUMNS: &str =
    "id, operation, entity, entity_id, data, timestamp, status, attempts, last_error, revision";

/// Queue rows in upload order. Failed rows are included on request.
pub fn pending_operations(
    conn: &Connection,
    include_failed: bool,
) -> Result<Vec<PendingOperation>> {
    let sql = if include_failed {
        format!("SELECT {OPERATION_COLUMNS} FROM pending_operations ORDER BY id ASC")
    } else {
        format!(
            "SELECT {OPERATION_COLUMNS} FROM pending_operations
             WHERE status = 'pending' ORDER BY id ASC"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], operation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn next_pending(conn: &Connection) -> Result<Option<PendingOperation>> {
    let sql = format!(
        "SELECT {OPERATION_COLUMNS} FROM pending_operations
         WHERE status = 'pending' ORDER BY id ASC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [], operation_from_row).optional()?)
}

fn count_with_status(conn: &Connection, status: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM pending_operations WHERE status = ?1",
        params![status],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

pub fn pending_count(conn: &Connection) -> i64 {
    count_with_status(conn, STATUS_PENDING)
}

pub fn failed_count(conn: &Connection) -> i64 {
    count_with_status(conn, STATUS_FAILED)
}

fn has_pending_for(conn: &Connection, entity: EntityKind, entity_id: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM pending_operations
         WHERE entity = ?1 AND entity_id = ?2 AND status = 'pending' LIMIT 1",
        params![entity.as_str(), entity_id],
        |_| Ok(()),
    )
    .optional()
    .ok()
    .flatten()
    .is_some()
}

/// Drop every queued operation. Unsynced changes stay local only.
pub fn clear_queue(conn: &Connection) -> Result<usize> {
    let removed = conn.execute("DELETE FROM pending_operations", [])?;
    info!(removed, "sync queue cleared");
    Ok(removed)
}

pub fn clear_failed(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM pending_operations WHERE status = 'failed'",
        [],
    )?)
}

/// Put failed operations back in line with a fresh attempt budget.
pub fn retry_failed(conn: &Connection) -> Result<usize> {
    let requeued = conn.execute(
        "UPDATE pending_operations
         SET status = 'pending', attempts = 0, updated_at = datetime('now')
         WHERE status = 'failed'",
        [],
    )?;
    if requeued > 0 {
        info!(requeued, "failed operations re-queued");
    }
    Ok(requeued)
}

fn record_attempt_error(conn: &Connection, op_id: i64, error: &str, failed: bool) -> Result<()> {
    conn.execute(
        "UPDATE pending_operations
         SET attempts = attempts + 1, last_error = ?1,
             status = CASE WHEN ?2 THEN 'failed' ELSE status END,
             updated_at = datetime('now')
         WHERE id = ?3",
        params![error, failed, op_id],
    )?;
    Ok(())
}

fn local_table(entity: EntityKind) -> Option<&'static str> {
    match entity {
        EntityKind::Customer => Some("customers"),
        EntityKind::TransactionEntry => Some("transaction_entries"),
        EntityKind::Profile => None,
    }
}

fn local_row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1"),
            params![id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Settle the queue after `op` was uploaded.
///
/// Returns false when the row changed while the upload was in flight. A
/// merged edit keeps the row pending so the next pass uploads it. A local
/// delete that dropped an in-flight CREATE is re-queued as a DELETE, since
/// the document now exists remotely.
fn mark_synced(conn: &Connection, op: &PendingOperation) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM pending_operations WHERE id = ?1 AND revision = ?2",
        params![op.id, op.revision],
    )?;
    let table = local_table(op.entity);

    if removed == 0 {
        if let (Some(table), OperationKind::Create) = (table, op.kind) {
            let row_left = conn
                .query_row(
                    "SELECT 1 FROM pending_operations WHERE id = ?1",
                    params![op.id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !row_left
                && !local_row_exists(conn, table, &op.entity_id)?
                && !has_pending_for(conn, op.entity, &op.entity_id)
            {
                enqueue(conn, OperationKind::Delete, op.entity, &op.entity_id, &json!({}))?;
                debug!(
                    entity = op.entity.as_str(),
                    entity_id = %op.entity_id,
                    "re-queued delete for uploaded create"
                );
            }
        }
        return Ok(false);
    }

    if let (Some(table), OperationKind::Create | OperationKind::Update) = (table, op.kind) {
        conn.execute(
            &format!("UPDATE {table} SET synced_at = ?1 WHERE id = ?2"),
            params![now_rfc3339(), op.entity_id],
        )?;
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Flush
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub synced: usize,
    pub failed: usize,
    pub remaining: i64,
    /// Set when the cycle stopped early on a transient error.
    pub deferred_reason: Option<String>,
}

async fn apply<R: RemoteStore + ?Sized>(remote: &R, op: &PendingOperation) -> Result<()> {
    let collection = op.entity.collection();
    match op.kind {
        OperationKind::Create | OperationKind::Update => {
            remote.upsert(collection, &op.entity_id, &op.data).await
        }
        OperationKind::Delete => remote.delete(collection, &op.entity_id).await,
    }
}

/// Push pending operations to `remote`, oldest first.
///
/// Each operation gets up to `policy.max_attempts` tries with a fixed pause.
/// A network or timeout error that outlasts the budget ends the cycle and
/// leaves the rest of the queue untouched. Any other remote rejection marks
/// that operation failed and moves on. An auth error aborts the cycle and is
/// returned to the caller.
pub async fn flush<R: RemoteStore + ?Sized>(
    db: &DbState,
    remote: &R,
    policy: &RetryPolicy,
) -> Result<FlushReport> {
    let mut report = FlushReport::default();
    let max_attempts = policy.max_attempts.max(1);

    loop {
        let op = {
            let conn = db.conn.lock()?;
            next_pending(&conn)?
        };
        let Some(op) = op else { break };

        let mut attempt = 1;
        loop {
            match apply(remote, &op).await {
                Ok(()) => {
                    let conn = db.conn.lock()?;
                    if mark_synced(&conn, &op)? {
                        report.synced += 1;
                        debug!(
                            op_id = op.id,
                            kind = %op.kind,
                            entity = op.entity.as_str(),
                            "operation synced"
                        );
                    } else {
                        debug!(op_id = op.id, "operation changed during upload; kept queued");
                    }
                    break;
                }
                Err(e) => match e.kind() {
                    ErrorKind::Auth => {
                        let conn = db.conn.lock()?;
                        record_attempt_error(&conn, op.id, &e.to_string(), false)?;
                        warn!(
                            op_id = op.id,
                            error = %e,
                            "sync aborted: remote rejected credentials"
                        );
                        return Err(e);
                    }
                    kind if kind.is_retryable() => {
                        if attempt < max_attempts {
                            debug!(op_id = op.id, attempt, error = %e, "retrying operation");
                            attempt += 1;
                            tokio::time::sleep(policy.delay).await;
                            continue;
                        }
                        let conn = db.conn.lock()?;
                        record_attempt_error(&conn, op.id, &e.to_string(), false)?;
                        report.remaining = pending_count(&conn);
                        report.deferred_reason = Some(e.to_string());
                        info!(
                            op_id = op.id,
                            error = %e,
                            "remote unreachable; keeping queue for next cycle"
                        );
                        return Ok(report);
                    }
                    _ => {
                        let conn = db.conn.lock()?;
                        record_attempt_error(&conn, op.id, &e.to_string(), true)?;
                        report.failed += 1;
                        warn!(
                            op_id = op.id,
                            kind = %op.kind,
                            entity = op.entity.as_str(),
                            error = %e,
                            "operation rejected; marked failed"
                        );
                        break;
                    }
                },
            }
        }
    }

    let conn = db.conn.lock()?;
    report.remaining = pending_count(&conn);
    Ok(report)
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub customers: usize,
    pub entries: usize,
    pub removed: usize,
    pub skipped: usize,
}

fn doc_str(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_str(doc: &Value, key: &str) -> Result<String> {
    doc_str(doc, key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::validation(format!("missing {key}")))
}

/// A remote customer that passed the same checks as a local write.
struct RemoteCustomer {
    id: String,
    user_id: String,
    name: String,
    phone: String,
    customer_type: CustomerType,
}

fn parse_remote_customer(conn: &Connection, doc: &Value, user_id: &str) -> Result<RemoteCustomer> {
    let id = required_str(doc, "id")?;
    let name = required_str(doc, "name")?.trim().to_string();
    let customer_type: CustomerType = match doc_str(doc, "customer_type") {
        Some(raw) => raw.parse()?,
        None => CustomerType::Customer,
    };
    let phone = customers::normalize_phone(&doc_str(doc, "phone").unwrap_or_default());
    if !phone.is_empty() {
        let clash: Option<String> = conn
            .query_row(
                "SELECT id FROM customers WHERE user_id = ?1 AND phone = ?2 AND id <> ?3",
                params![user_id, phone, id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(other) = clash {
            return Err(Error::Conflict(format!("phone {phone} already used by {other}")));
        }
    }
    Ok(RemoteCustomer {
        id,
        user_id: user_id.to_string(),
        name,
        phone,
        customer_type,
    })
}

fn upsert_remote_customer(conn: &Connection, doc: &Value, customer: &RemoteCustomer) -> Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO customers
            (id, user_id, name, phone, customer_type, created_at, updated_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            phone = excluded.phone,
            customer_type = excluded.customer_type,
            updated_at = excluded.updated_at,
            synced_at = excluded.synced_at",
        params![
            customer.id,
            customer.user_id,
            customer.name,
            customer.phone,
            customer.customer_type.as_str(),
            doc_str(doc, "created_at").unwrap_or_else(|| now.clone()),
            doc_str(doc, "updated_at").unwrap_or_else(|| now.clone()),
            now,
        ],
    )?;
    Ok(())
}

struct RemoteEntry {
    id: String,
    user_id: String,
    customer_id: String,
    amount: f64,
    transaction_type: TransactionType,
    transaction_date: BsDate,
}

fn parse_remote_entry(conn: &Connection, doc: &Value, user_id: &str) -> Result<RemoteEntry> {
    let id = required_str(doc, "id")?;
    let customer_id = required_str(doc, "customer_id")?;
    let amount = doc
        .get("amount")
        .and_then(Value::as_f64)
        .filter(|a| a.is_finite() && *a > 0.0)
        .ok_or_else(|| Error::validation("amount must be a positive number"))?;
    let transaction_type: TransactionType = required_str(doc, "transaction_type")?.parse()?;
    let transaction_date: BsDate = required_str(doc, "transaction_date")?.parse()?;
    if !local_row_exists(conn, "customers", &customer_id)? {
        return Err(Error::not_found(format!("customer {customer_id}")));
    }
    Ok(RemoteEntry {
        id,
        user_id: user_id.to_string(),
        customer_id,
        amount,
        transaction_type,
        transaction_date,
    })
}

fn upsert_remote_entry(conn: &Connection, doc: &Value, entry: &RemoteEntry) -> Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO transaction_entries (id, user_id, customer_id, customer_name, amount,
            transaction_type, description, transaction_date, balance_after,
            created_at, updated_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            customer_name = excluded.customer_name,
            amount = excluded.amount,
            transaction_type = excluded.transaction_type,
            description = excluded.description,
            transaction_date = excluded.transaction_date,
            updated_at = excluded.updated_at,
            synced_at = excluded.synced_at",
        params![
            entry.id,
            entry.user_id,
            entry.customer_id,
            doc_str(doc, "customer_name").unwrap_or_default(),
            entry.amount,
            entry.transaction_type.as_str(),
            doc_str(doc, "description").unwrap_or_default(),
            entry.transaction_date.to_string(),
            doc_str(doc, "created_at").unwrap_or_else(|| now.clone()),
            doc_str(doc, "updated_at").unwrap_or_else(|| now.clone()),
            now,
        ],
    )?;
    Ok(())
}

/// Local rows that were synced before but no longer exist remotely.
fn remove_remote_deleted(
    conn: &Connection,
    table: &str,
    entity: EntityKind,
    user_id: &str,
    remote_ids: &HashSet<String>,
) -> Result<usize> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {table} WHERE user_id = ?1 AND synced_at IS NOT NULL"
    ))?;
    let local: Vec<String> = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    let mut removed = 0;
    for id in local {
        if remote_ids.contains(&id) || has_pending_for(conn, entity, &id) {
            continue;
        }
        removed += conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
    }
    Ok(removed)
}

/// Fold the user's remote documents into the local tables.
///
/// Documents with a pending local operation are skipped so unsynced edits
/// are never overwritten. Documents that fail local validation (bad date,
/// type or amount, a phone taken by another customer, an entry whose
/// customer is unknown) are logged and skipped; the rest still apply.
pub async fn pull_remote<R: RemoteStore + ?Sized>(
    db: &DbState,
    remote: &R,
    user_id: &str,
) -> Result<PullReport> {
    let customers = remote
        .query_by_user(EntityKind::Customer.collection(), user_id)
        .await?;
    let entries = remote
        .query_by_user(EntityKind::TransactionEntry.collection(), user_id)
        .await?;

    let mut report = PullReport::default();
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;

    let mut customer_ids = HashSet::new();
    for doc in &customers {
        let Some(id) = doc_str(doc, "id") else { continue };
        customer_ids.insert(id.clone());
        if has_pending_for(&tx, EntityKind::Customer, &id) {
            report.skipped += 1;
            continue;
        }
        match parse_remote_customer(&tx, doc, user_id) {
            Ok(customer) => {
                upsert_remote_customer(&tx, doc, &customer)?;
                report.customers += 1;
            }
            Err(e @ (Error::Validation(_) | Error::Conflict(_))) => {
                warn!(customer_id = %id, error = %e, "skipping invalid remote customer");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let mut entry_ids = HashSet::new();
    let mut touched = HashSet::new();
    for doc in &entries {
        let Some(id) = doc_str(doc, "id") else { continue };
        entry_ids.insert(id.clone());
        if has_pending_for(&tx, EntityKind::TransactionEntry, &id) {
            report.skipped += 1;
            continue;
        }
        match parse_remote_entry(&tx, doc, user_id) {
            Ok(entry) => {
                upsert_remote_entry(&tx, doc, &entry)?;
                touched.insert(entry.customer_id);
                report.entries += 1;
            }
            Err(e @ (Error::Validation(_) | Error::NotFound(_))) => {
                warn!(entry_id = %id, error = %e, "skipping invalid remote entry");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    report.removed += remove_remote_deleted(
        &tx,
        "transaction_entries",
        EntityKind::TransactionEntry,
        user_id,
        &entry_ids,
    )?;
    report.removed +=
        remove_remote_deleted(&tx, "customers", EntityKind::Customer, user_id, &customer_ids)?;

    for customer_id in &touched {
        transactions::recompute_balances(&tx, customer_id)?;
    }
    tx.commit()?;

    info!(
        customers = report.customers,
        entries = report.entries,
        removed = report.removed,
        skipped = report.skipped,
        "remote pull complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Status and background loop
// ---------------------------------------------------------------------------

pub struct SyncState {
    pub is_running: AtomicBool,
    pub is_online: AtomicBool,
    pub last_sync: Mutex<Option<String>>,
    pub last_error: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            is_running: AtomicBool::new(false),
            is_online: AtomicBool::new(false),
            last_sync: Mutex::new(None),
            last_error: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn record_success(&self) {
        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(Utc::now().to_rfc3339());
        }
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn record_error(&self, error: &str) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error.to_string());
        }
    }
}

pub fn get_sync_status(db: &DbState, state: &SyncState) -> Result<Value> {
    let conn = db.conn.lock()?;
    Ok(json!({
        "isOnline": state.is_online.load(Ordering::SeqCst),
        "isRunning": state.is_running.load(Ordering::SeqCst),
        "lastSync": state.last_sync.lock().ok().and_then(|g| g.clone()),
        "lastError": state.last_error.lock().ok().and_then(|g| g.clone()),
        "pendingCount": pending_count(&conn),
        "failedCount": failed_count(&conn),
    }))
}

/// Reachability check against the remote store.
pub async fn check_network_status<R: RemoteStore + ?Sized>(remote: &R) -> bool {
    remote.health().await.is_ok()
}

/// One full cycle: connectivity check, push, then pull for the signed-in user.
pub async fn run_sync_cycle<R: RemoteStore + ?Sized>(
    db: &DbState,
    remote: &R,
    state: &SyncState,
    policy: &RetryPolicy,
    user_id: Option<&str>,
) -> Result<FlushReport> {
    let online = check_network_status(remote).await;
    let was_online = state.is_online.swap(online, Ordering::SeqCst);
    if !online {
        if was_online {
            info!("network offline; queue kept for later");
        }
        return Err(Error::Network("remote store unreachable".into()));
    }
    if !was_online {
        info!("network available; draining sync queue");
    }

    let report = flush(db, remote, policy).await?;
    if report.deferred_reason.is_none() {
        if let Some(user_id) = user_id {
            pull_remote(db, remote, user_id).await?;
        }
    }
    Ok(report)
}

/// Spawn the periodic sync task. It runs until `state.stop()` is called.
pub fn start_sync_loop(
    db: Arc<DbState>,
    remote: Arc<dyn RemoteStore>,
    state: Arc<SyncState>,
    policy: RetryPolicy,
    interval: Duration,
    user_id: Option<String>,
) -> JoinHandle<()> {
    state.is_running.store(true, Ordering::SeqCst);
    let cancel = state.cancel.clone();

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "sync loop started");
        loop {
            match run_sync_cycle(&db, remote.as_ref(), &state, &policy, user_id.as_deref()).await {
                Ok(report) => {
                    if report.synced > 0 || report.failed > 0 {
                        info!(
                            synced = report.synced,
                            failed = report.failed,
                            remaining = report.remaining,
                            "sync cycle complete"
                        );
                    }
                    match &report.deferred_reason {
                        Some(reason) => state.record_error(reason),
                        None => state.record_success(),
                    }
                }
                Err(e) => {
                    if e.kind() == ErrorKind::Auth {
                        warn!(error = %e, "sync paused until the user signs in again");
                    } else {
                        debug!(error = %e, "sync cycle skipped");
                    }
                    state.record_error(&e.to_string());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        state.is_running.store(false, Ordering::SeqCst);
        info!("sync loop stopped");
    })
}
