//! Runtime configuration.
//!
//! Values come from `MERO_HISAB_*` environment variables, then the OS
//! credential store for secrets, then built-in defaults. User preferences
//! (theme, language) are not configuration; they live in `local_settings`.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::storage;

pub const ENV_DATA_DIR: &str = "MERO_HISAB_DATA_DIR";
pub const ENV_FIREBASE_PROJECT: &str = "MERO_HISAB_FIREBASE_PROJECT";
pub const ENV_FIREBASE_API_KEY: &str = "MERO_HISAB_FIREBASE_API_KEY";
pub const ENV_FIRESTORE_URL: &str = "MERO_HISAB_FIRESTORE_URL";
pub const ENV_SMS_URL: &str = "MERO_HISAB_SMS_URL";
pub const ENV_SMS_TOKEN: &str = "MERO_HISAB_SMS_TOKEN";
pub const ENV_SYNC_INTERVAL: &str = "MERO_HISAB_SYNC_INTERVAL_SECS";

const APP_DIR_NAME: &str = "com.merohisab.app";
const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const DEFAULT_SMS_URL: &str = "https://sms.aakashsms.com/sms/v3/send";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15;
const MIN_SYNC_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub firebase_project_id: Option<String>,
    pub firebase_api_key: Option<String>,
    pub firestore_url: String,
    pub sms_url: String,
    pub sms_auth_token: Option<String>,
    pub sync_interval_secs: u64,
    /// Attempts per pending operation within one flush.
    pub sync_max_attempts: u32,
    /// Fixed pause between attempts of the same operation.
    pub sync_retry_delay: Duration,
    pub request_timeout: Duration,
    pub connectivity_timeout: Duration,
    pub sms_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            firebase_project_id: None,
            firebase_api_key: None,
            firestore_url: DEFAULT_FIRESTORE_URL.to_string(),
            sms_url: DEFAULT_SMS_URL.to_string(),
            sms_auth_token: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            sync_max_attempts: 3,
            sync_retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            connectivity_timeout: Duration::from_secs(8),
            sms_timeout: Duration::from_secs(10),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Platform data directory (`%LOCALAPPDATA%`, `$XDG_DATA_HOME` or
/// `~/.local/share`) joined with the app directory name.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

impl AppConfig {
    /// Environment and defaults only. Never touches the credential store.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_nonempty(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        config.firebase_project_id = env_nonempty(ENV_FIREBASE_PROJECT);
        config.firebase_api_key = env_nonempty(ENV_FIREBASE_API_KEY);
        config.sms_auth_token = env_nonempty(ENV_SMS_TOKEN);
        if let Some(url) = env_nonempty(ENV_FIRESTORE_URL) {
            config.firestore_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = env_nonempty(ENV_SMS_URL) {
            config.sms_url = url;
        }
        if let Some(raw) = env_nonempty(ENV_SYNC_INTERVAL) {
            match raw.parse::<u64>() {
                Ok(secs) => config.sync_interval_secs = secs.max(MIN_SYNC_INTERVAL_SECS),
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_SYNC_INTERVAL}"),
            }
        }

        config
    }

    /// Fill secrets missing from the environment out of the credential
    /// store, and persist secrets given through the environment so later
    /// runs work without them.
    pub fn hydrate_credentials(&mut self) {
        let pairs: [(&mut Option<String>, &str); 3] = [
            (&mut self.firebase_project_id, storage::KEY_FIREBASE_PROJECT),
            (&mut self.firebase_api_key, storage::KEY_FIREBASE_API_KEY),
            (&mut self.sms_auth_token, storage::KEY_SMS_TOKEN),
        ];
        for (slot, key) in pairs {
            match slot.as_deref() {
                Some(value) => {
                    if storage::get_credential(key).as_deref() != Some(value) {
                        if let Err(e) = storage::set_credential(key, value) {
                            warn!(key, error = %e, "could not persist credential");
                        }
                    }
                }
                None => {
                    *slot = storage::get_credential(key);
                    if slot.is_some() {
                        debug!(key, "credential loaded from keyring");
                    }
                }
            }
        }
    }

    pub fn remote_configured(&self) -> bool {
        self.firebase_project_id.is_some() && self.firebase_api_key.is_some()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
