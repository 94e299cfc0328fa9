//! Command handlers.
//!
//! Each handler takes the optional JSON payload a front end would send
//! (camelCase keys, snake_case accepted) and returns JSON or a
//! user-facing error message. `dispatch` routes by command name; names
//! use snake_case and `auth:request-otp` style aliases are normalized.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::AuthState;
use crate::config::AppConfig;
use crate::db::{self, DbState};
use crate::error::{Error, Result};
use crate::firestore::{FirestoreClient, RemoteStore};
use crate::sms::{AakashSms, SmsGateway};
use crate::sync::SyncState;

pub mod auth;
pub mod calendar;
pub mod customers;
pub mod diagnostics;
pub mod settings;
pub mod sync;
pub mod transactions;

/// Everything a command needs.
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<DbState>,
    pub auth: AuthState,
    pub sync: Arc<SyncState>,
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub sms: Option<Arc<dyn SmsGateway>>,
}

impl AppState {
    /// Open the database under `config.data_dir`, restore the saved
    /// session and build the remote clients that are configured.
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(db::init(&config.data_dir)?);

        let remote: Option<Arc<dyn RemoteStore>> = match FirestoreClient::from_config(&config)? {
            Some(client) => Some(Arc::new(client)),
            None => {
                debug!("Firebase not configured; running local-only");
                None
            }
        };
        let sms: Option<Arc<dyn SmsGateway>> = match AakashSms::from_config(&config)? {
            Some(gateway) => Some(Arc::new(gateway)),
            None => None,
        };

        let state = Self::with_parts(config, db, remote, sms);
        if let Some(session) = crate::auth::restore_session(&state.db, &state.auth)? {
            info!(user_id = %session.user_id, "session restored");
        }
        Ok(state)
    }

    pub fn with_parts(
        config: AppConfig,
        db: Arc<DbState>,
        remote: Option<Arc<dyn RemoteStore>>,
        sms: Option<Arc<dyn SmsGateway>>,
    ) -> Self {
        Self {
            config,
            db,
            auth: AuthState::new(),
            sync: Arc::new(SyncState::new()),
            remote,
            sms,
        }
    }

    pub(crate) fn user_id(&self) -> std::result::Result<String, String> {
        crate::auth::require_user(&self.auth).map_err(String::from)
    }

    pub(crate) fn remote(&self) -> std::result::Result<Arc<dyn RemoteStore>, String> {
        self.remote
            .clone()
            .ok_or_else(|| "Remote sync is not configured".to_string())
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Object payloads pass through; a bare string becomes `{ key: string }`.
pub(crate) fn payload_object(arg0: Option<Value>, scalar_key: &str) -> Value {
    match arg0 {
        Some(Value::Object(obj)) => Value::Object(obj),
        Some(Value::Null) | None => serde_json::json!({}),
        Some(v) => {
            let mut obj = serde_json::Map::new();
            obj.insert(scalar_key.to_string(), v);
            Value::Object(obj)
        }
    }
}

pub(crate) fn parse_payload<T: DeserializeOwned>(
    payload: Value,
    what: &str,
) -> std::result::Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// First non-empty string among `keys`.
pub(crate) fn payload_arg0_as_string(arg0: Option<Value>, keys: &[&str]) -> Option<String> {
    match arg0 {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(v) => crate::value_str(&v, keys),
        None => None,
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> std::result::Result<Value, String> {
    serde_json::to_value(value).map_err(|e| Error::from(e).to_string())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Names accepted by `dispatch`.
pub const COMMANDS: &[&str] = &[
    "bs_today",
    "bs_from_ad",
    "bs_to_ad",
    "bs_month",
    "bs_diff",
    "bs_add_days",
    "interest_calculate",
    "auth_request_otp",
    "auth_verify_otp",
    "auth_session",
    "auth_logout",
    "auth_update_profile",
    "customer_create",
    "customer_get",
    "customer_list",
    "customer_search",
    "customer_find_by_phone",
    "customer_update",
    "customer_delete",
    "transaction_add",
    "transaction_get",
    "transaction_list",
    "transaction_update",
    "transaction_delete",
    "balance_get",
    "ledger_summary",
    "interest_for_customer",
    "sync_status",
    "sync_force",
    "sync_pull",
    "sync_network_status",
    "sync_queue_list",
    "sync_queue_clear",
    "sync_clear_failed",
    "sync_retry_failed",
    "settings_get_all",
    "settings_get_theme",
    "settings_set_theme",
    "settings_get_language",
    "settings_set_language",
    "settings_format_amount",
    "settings_get_credentials",
    "settings_update_credentials",
    "settings_factory_reset",
    "diagnostics_about",
    "diagnostics_health",
    "diagnostics_export",
];

fn normalize_command(name: &str) -> String {
    name.trim().replace([':', '-', '.'], "_").to_ascii_lowercase()
}

pub async fn dispatch(
    name: &str,
    payload: Option<Value>,
    state: &AppState,
) -> std::result::Result<Value, String> {
    let command = normalize_command(name);
    debug!(command = %command, "dispatch");

    let result = match command.as_str() {
        "bs_today" => calendar::bs_today(),
        "bs_from_ad" => calendar::bs_from_ad(payload),
        "bs_to_ad" => calendar::bs_to_ad(payload),
        "bs_month" => calendar::bs_month(payload),
        "bs_diff" => calendar::bs_diff(payload),
        "bs_add_days" => calendar::bs_add_days(payload),
        "interest_calculate" => calendar::interest_calculate(payload),

        "auth_request_otp" => auth::auth_request_otp(payload, state).await,
        "auth_verify_otp" => auth::auth_verify_otp(payload, state).await,
        "auth_session" => Ok(auth::auth_session(state)),
        "auth_logout" => auth::auth_logout(state),
        "auth_update_profile" => auth::auth_update_profile(payload, state),

        "customer_create" => customers::customer_create(payload, state),
        "customer_get" => customers::customer_get(payload, state),
        "customer_list" => customers::customer_list(payload, state),
        "customer_search" => customers::customer_search(payload, state),
        "customer_find_by_phone" => customers::customer_find_by_phone(payload, state),
        "customer_update" => customers::customer_update(payload, state),
        "customer_delete" => customers::customer_delete(payload, state),

        "transaction_add" => transactions::transaction_add(payload, state),
        "transaction_get" => transactions::transaction_get(payload, state),
        "transaction_list" => transactions::transaction_list(payload, state),
        "transaction_update" => transactions::transaction_update(payload, state),
        "transaction_delete" => transactions::transaction_delete(payload, state),
        "balance_get" => transactions::balance_get(payload, state),
        "ledger_summary" => transactions::ledger_summary(state),
        "interest_for_customer" => transactions::interest_for_customer(payload, state),

        "sync_status" => sync::sync_status(state),
        "sync_force" => sync::sync_force(state).await,
        "sync_pull" => sync::sync_pull(state).await,
        "sync_network_status" => sync::sync_network_status(state).await,
        "sync_queue_list" => sync::sync_queue_list(payload, state),
        "sync_queue_clear" => sync::sync_queue_clear(state),
        "sync_clear_failed" => sync::sync_clear_failed(state),
        "sync_retry_failed" => sync::sync_retry_failed(state),

        "settings_get_all" => settings::settings_get_all(state),
        "settings_get_theme" => settings::settings_get_theme(state),
        "settings_set_theme" => settings::settings_set_theme(payload, state),
        "settings_get_language" => settings::settings_get_language(state),
        "settings_set_language" => settings::settings_set_language(payload, state),
        "settings_format_amount" => settings::settings_format_amount(payload, state),
        "settings_get_credentials" => Ok(settings::settings_get_credentials()),
        "settings_update_credentials" => settings::settings_update_credentials(payload),
        "settings_factory_reset" => settings::settings_factory_reset(state),

        "diagnostics_about" => Ok(diagnostics::diagnostics_about()),
        "diagnostics_health" => diagnostics::diagnostics_health(state),
        "diagnostics_export" => diagnostics::diagnostics_export(payload, state),

        other => Err(format!("Unknown command: {other}")),
    };

    if let Err(e) = &result {
        warn!(command = %command, error = %e, "command failed");
    }
    result
}


#[cfg(test)]
mod tests {
    use super::test_state::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("auth:request-otp"), "auth_request_otp");
        assert_eq!(normalize_command(" Sync.Force "), "sync_force");
    }

    #[test]
    fn test_payload_object_wraps_scalars() {
        assert_eq!(
            payload_object(Some(json!("c-1")), "customerId"),
            json!({ "customerId": "c-1" })
        );
        assert_eq!(payload_object(None, "x"), json!({}));
        assert_eq!(payload_object(Some(json!(5)), "amount"), json!({ "amount": 5 }));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = harness();
        let err = dispatch("printer_open_drawer", None, &h.state).await.unwrap_err();
        assert_eq!(err, "Unknown command: printer_open_drawer");
    }

    #[tokio::test]
    async fn test_every_listed_command_is_routed() {
        let h = harness();
        // These touch the OS keyring or write files.
        let skipped = [
            "settings_get_credentials",
            "settings_update_credentials",
            "settings_factory_reset",
            "diagnostics_export",
        ];
        for name in COMMANDS.iter().filter(|n| !skipped.contains(*n)) {
            // Payload-less calls may fail validation, but never as unknown.
            if let Err(e) = dispatch(name, None, &h.state).await {
                assert!(!e.starts_with("Unknown command"), "{name} not routed");
            }
        }
    }

    #[tokio::test]
    async fn test_ledger_commands_need_sign_in() {
        let h = harness();
        let err = dispatch("customer_list", None, &h.state).await.unwrap_err();
        assert!(err.contains("Not signed in"));
    }

    #[tokio::test]
    async fn test_end_to_end_offline_then_sync() {
        let h = signed_in().await;
        h.remote.set_online(false);

        let customer = dispatch(
            "customer:create",
            Some(json!({ "name": "Hari Traders", "phone": "9801234567", "type": "supplier" })),
            &h.state,
        )
        .await
        .unwrap();
        let customer_id = customer["id"].as_str().unwrap().to_string();

        dispatch(
            "transaction_add",
            Some(json!({
                "customer_id": customer_id,
                "amount": 2500,
                "type": "received",
                "date": "२०८१-०५-१५",
                "description": "dal"
            })),
            &h.state,
        )
        .await
        .unwrap();

        let status = dispatch("sync_status", None, &h.state).await.unwrap();
        // Profile, customer and entry.
        assert_eq!(status["pendingCount"], 3);

        assert!(dispatch("sync_force", None, &h.state).await.is_err());
        h.remote.set_online(true);
        let report = dispatch("sync_force", None, &h.state).await.unwrap();
        assert_eq!(report["synced"], 3);

        let doc = h.remote.get("customers", &customer_id).unwrap();
        assert_eq!(doc["name"], "Hari Traders");

        let summary = dispatch("ledger_summary", None, &h.state).await.unwrap();
        assert_eq!(summary["supplierToGive"], 2500.0);
    }
}
