use serde_json::{json, Value};
use tracing::info;

use super::{payload_arg0_as_string, AppState};
use crate::db;
use crate::models::{Language, Theme};
use crate::preferences;

fn lock_err(e: impl std::fmt::Display) -> String {
    format!("Database lock failed: {e}")
}

pub fn settings_get_all(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(lock_err)?;
    Ok(json!({
        "preferences": preferences::snapshot(&conn),
        "settings": db::get_all_settings(&conn),
    }))
}

pub fn settings_get_theme(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(lock_err)?;
    Ok(json!({ "theme": preferences::get_theme(&conn).as_str() }))
}

pub fn settings_set_theme(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let raw = payload_arg0_as_string(arg0, &["theme", "value"]).ok_or("Missing theme")?;
    let theme: Theme = raw.parse().map_err(String::from)?;
    let conn = state.db.conn.lock().map_err(lock_err)?;
    preferences::set_theme(&conn, theme).map_err(String::from)?;
    Ok(json!({ "success": true, "theme": theme.as_str() }))
}

pub fn settings_get_language(state: &AppState) -> Result<Value, String> {
    let conn = state.db.conn.lock().map_err(lock_err)?;
    Ok(json!({ "language": preferences::get_language(&conn).as_str() }))
}

pub fn settings_set_language(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let raw = payload_arg0_as_string(arg0, &["language", "lang", "value"])
        .ok_or("Missing language")?;
    let language: Language = raw.parse().map_err(String::from)?;
    let conn = state.db.conn.lock().map_err(lock_err)?;
    preferences::set_language(&conn, language).map_err(String::from)?;
    Ok(json!({ "success": true, "language": language.as_str() }))
}

/// Format with the stored language unless the payload names one.
pub fn settings_format_amount(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let (amount, language) = match &arg0 {
        Some(Value::Number(n)) => (n.as_f64(), None),
        Some(v) => (
            crate::value_f64(v, &["amount", "value"]),
            crate::value_str(v, &["language", "lang"]),
        ),
        None => (None, None),
    };
    let amount = amount.ok_or("Missing amount")?;
    let language = match language {
        Some(raw) => raw.parse::<Language>().map_err(String::from)?,
        None => {
            let conn = state.db.conn.lock().map_err(lock_err)?;
            preferences::get_language(&conn)
        }
    };
    Ok(json!({
        "formatted": preferences::format_amount(amount, language),
        "language": language.as_str(),
    }))
}

pub fn settings_get_credentials() -> Value {
    let mut masked = crate::storage::get_masked_config();
    masked["configured"] = json!(crate::storage::is_configured());
    masked
}

pub fn settings_update_credentials(arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing credentials payload")?;
    crate::storage::update_credentials(&payload).map_err(String::from)
}

/// Remove stored secrets, preferences and the saved session. Ledger data
/// and the sync queue stay on disk.
pub fn settings_factory_reset(state: &AppState) -> Result<Value, String> {
    crate::storage::factory_reset().map_err(String::from)?;
    {
        let conn = state.db.conn.lock().map_err(lock_err)?;
        db::delete_all_settings(&conn, "preferences").map_err(String::from)?;
    }
    crate::auth::logout(&state.db, &state.auth).map_err(String::from)?;
    info!("factory reset complete");
    Ok(json!({ "success": true }))
}
