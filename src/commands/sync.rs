use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tracing::info;

use super::{to_json, AppState};
use crate::sync::{self, RetryPolicy};

pub(crate) fn retry_policy(state: &AppState) -> RetryPolicy {
    RetryPolicy {
        max_attempts: state.config.sync_max_attempts,
        delay: state.config.sync_retry_delay,
    }
}

pub fn sync_status(state: &AppState) -> Result<Value, String> {
    let mut status = sync::get_sync_status(&state.db, &state.sync).map_err(String::from)?;
    status["remoteConfigured"] = json!(state.remote.is_some());
    Ok(status)
}

/// Push the queue now, then pull when signed in.
pub async fn sync_force(state: &AppState) -> Result<Value, String> {
    let remote = state.remote()?;
    let user_id = crate::auth::current_session(&state.auth).map(|s| s.user_id);
    let policy = retry_policy(state);

    match sync::run_sync_cycle(&state.db, remote.as_ref(), &state.sync, &policy, user_id.as_deref())
        .await
    {
        Ok(report) => {
            match &report.deferred_reason {
                Some(reason) => state.sync.record_error(reason),
                None => state.sync.record_success(),
            }
            info!(synced = report.synced, failed = report.failed, "manual sync finished");
            to_json(&report)
        }
        Err(e) => {
            state.sync.record_error(&e.to_string());
            Err(e.into())
        }
    }
}

pub async fn sync_pull(state: &AppState) -> Result<Value, String> {
    let remote = state.remote()?;
    let user_id = state.user_id()?;
    let report = sync::pull_remote(&state.db, remote.as_ref(), &user_id)
        .await
        .map_err(String::from)?;
    to_json(&report)
}

pub async fn sync_network_status(state: &AppState) -> Result<Value, String> {
    let online = match &state.remote {
        Some(remote) => sync::check_network_status(remote.as_ref()).await,
        None => false,
    };
    state.sync.is_online.store(online, Ordering::SeqCst);
    Ok(json!({ "isOnline": online }))
}

/// `{ "includeFailed": true }` (or bare `true`) lists failed rows too.
pub fn sync_queue_list(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let include_failed = match &arg0 {
        Some(Value::Bool(b)) => *b,
        Some(v) => {
            crate::value_bool(v, &["includeFailed", "include_failed", "all"]).unwrap_or(false)
        }
        None => false,
    };
    let conn = state.db.conn.lock().map_err(|e| e.to_string())?;
    let ops = sync::pending_operations(&conn, include_failed).map_err(String::from)?;
    to_json(&ops)
}

pub fn sync_queue_clear(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(|e| e.to_string())?;
    let removed = sync::clear_queue(&conn).map_err(String::from)?;
    Ok(json!({ "success": true, "removed": removed }))
}

pub fn sync_clear_failed(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(|e| e.to_string())?;
    let removed = sync::clear_failed(&conn).map_err(String::from)?;
    Ok(json!({ "success": true, "removed": removed }))
}

pub fn sync_retry_failed(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(|e| e.to_string())?;
    let requeued = sync::retry_failed(&conn).map_err(String::from)?;
    Ok(json!({ "success": true, "requeued": requeued }))
}
