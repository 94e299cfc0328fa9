//! Diagnostics for Mero Hisab.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, queue backlog, recent sync errors
//! - **Diagnostics export**: a redacted JSON report written to disk
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::Result;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 7;

/// Prefix of the rolling log files (`hisab.2026-10-18`).
pub const LOG_FILE_PREFIX: &str = "hisab";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

pub fn get_system_health(db: &DbState) -> Result<Value> {
    let conn = db.conn.lock()?;

    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "counts": db::table_counts(&conn),
        "syncBacklog": get_sync_backlog(&conn),
        "recentSyncErrors": get_recent_sync_errors(&conn, 20),
        "databaseSizeBytes": db_size,
        "about": get_about_info(),
    }))
}

fn get_sync_backlog(conn: &rusqlite::Connection) -> Value {
    let mut result = serde_json::Map::new();
    if let Ok(mut stmt) = conn.prepare(
        "SELECT entity, status, COUNT(*) FROM pending_operations GROUP BY entity, status",
    ) {
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .ok();
        if let Some(rows) = rows {
            for (entity, status, count) in rows.flatten() {
                let entry = result.entry(entity).or_insert_with(|| json!({}));
                entry[&status] = json!(count);
            }
        }
    }
    Value::Object(result)
}

fn get_recent_sync_errors(conn: &rusqlite::Connection, limit: i64) -> Vec<Value> {
    let mut errors = Vec::new();
    if let Ok(mut stmt) = conn.prepare(
        "SELECT id, operation, entity, entity_id, status, last_error, attempts, timestamp
         FROM pending_operations
         WHERE last_error IS NOT NULL AND last_error != ''
         ORDER BY updated_at DESC, id DESC LIMIT ?1",
    ) {
        if let Ok(rows) = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "operation": row.get::<_, String>(1)?,
                "entity": row.get::<_, String>(2)?,
                "entityId": row.get::<_, String>(3)?,
                "status": row.get::<_, String>(4)?,
                "lastError": row.get::<_, String>(5)?,
                "attempts": row.get::<_, i64>(6)?,
                "timestamp": row.get::<_, String>(7)?,
            }))
        }) {
            errors.extend(rows.flatten());
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write a redacted diagnostics report into `output_dir` and return its path.
pub fn export_diagnostics(db: &DbState, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;

    let health = get_system_health(db)?;
    let settings = {
        let conn = db.conn.lock()?;
        db::get_all_settings(&conn)
    };

    let report = redact_sensitive_fields(json!({
        "generatedAt": chrono::Utc::now().to_rfc3339(),
        "health": health,
        "settings": settings,
        "credentials": crate::storage::get_masked_config(),
    }));

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let path = output_dir.join(format!("hisab-diagnostics-{stamp}.json"));
    fs::write(&path, serde_json::to_vec_pretty(&report)?)?;
    info!(path = %path.display(), "diagnostics exported");
    Ok(path)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) && !value.is_boolean() {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    let sensitive_markers = [
        "api_key", "apikey", "secret", "password", "token", "otp", "phone",
    ];
    sensitive_markers
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Delete all but the newest `MAX_LOG_FILES` log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with(LOG_FILE_PREFIX) {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Newest first; ties broken by name so dated files sort predictably.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_system_health_with_empty_db() {
        let db = DbState::open_in_memory().unwrap();
        let health = get_system_health(&db).unwrap();
        assert_eq!(health["schemaVersion"], 2);
        assert_eq!(health["counts"]["customers"], 0);
        assert!(health["recentSyncErrors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_backlog_groups_by_entity_and_status() {
        let db = DbState::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO pending_operations (operation, entity, entity_id, status, last_error, timestamp)
                 VALUES ('CREATE', 'customer', 'c-1', 'pending', NULL, '2026-01-01T00:00:00Z'),
                        ('UPDATE', 'customer', 'c-2', 'failed', 'HTTP 400', '2026-01-01T00:00:01Z'),
                        ('CREATE', 'transaction_entry', 't-1', 'pending', NULL, '2026-01-01T00:00:02Z');",
            )
            .unwrap();
        }
        let health = get_system_health(&db).unwrap();
        assert_eq!(health["syncBacklog"]["customer"]["pending"], 1);
        assert_eq!(health["syncBacklog"]["customer"]["failed"], 1);
        assert_eq!(health["syncBacklog"]["transaction_entry"]["pending"], 1);
        assert_eq!(health["recentSyncErrors"][0]["lastError"], "HTTP 400");
    }

    #[test]
    fn test_redaction_keeps_flags() {
        let value = redact_sensitive_fields(json!({
            "smsAuthToken": "abc",
            "hasIdToken": true,
            "nested": { "phone": "9800000000", "name": "Sita" },
        }));
        assert_eq!(value["smsAuthToken"], "[REDACTED]");
        assert_eq!(value["hasIdToken"], true);
        assert_eq!(value["nested"]["phone"], "[REDACTED]");
        assert_eq!(value["nested"]["name"], "Sita");
    }

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=10 {
            fs::write(dir.path().join(format!("hisab.2026-10-{day:02}")), b"log").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        prune_old_logs(dir.path());

        let remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        let logs = remaining.iter().filter(|n| n.starts_with("hisab.")).count();
        assert_eq!(logs, MAX_LOG_FILES);
        assert!(remaining.contains(&"unrelated.txt".to_string()));
    }
}
