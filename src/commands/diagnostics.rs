use serde_json::{json, Value};
use std::path::PathBuf;

use super::{payload_arg0_as_string, AppState};
use crate::diagnostics;

pub fn diagnostics_about() -> Value {
    diagnostics::get_about_info()
}

pub fn diagnostics_health(state: &AppState) -> Result<Value, String> {
    let mut health = diagnostics::get_system_health(&state.db).map_err(String::from)?;
    health["remoteConfigured"] = json!(state.remote.is_some());
    health["smsConfigured"] = json!(state.sms.is_some());
    health["signedIn"] = json!(crate::auth::current_session(&state.auth).is_some());
    Ok(health)
}

/// Writes under `<data dir>/diagnostics` unless a directory is given.
pub fn diagnostics_export(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let dir = payload_arg0_as_string(arg0, &["dir", "outputDir", "output_dir", "path"])
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.data_dir.join("diagnostics"));
    let path = diagnostics::export_diagnostics(&state.db, &dir).map_err(String::from)?;
    Ok(json!({ "success": true, "path": path.display().to_string() }))
}
