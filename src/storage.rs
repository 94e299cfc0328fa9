//! Secret storage using the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS Keychain, and on Linux the kernel keyring. Only secrets live here:
//! the Firebase web API key, the Aakash SMS token and the current Firebase
//! ID token. Everything else belongs in `local_settings`.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "mero-hisab";

// Credential keys
pub const KEY_FIREBASE_PROJECT: &str = "firebase_project_id";
pub const KEY_FIREBASE_API_KEY: &str = "firebase_api_key";
pub const KEY_SMS_TOKEN: &str = "sms_auth_token";
pub const KEY_ID_TOKEN: &str = "firebase_id_token";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_FIREBASE_PROJECT,
    KEY_FIREBASE_API_KEY,
    KEY_SMS_TOKEN,
    KEY_ID_TOKEN,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, key)?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

/// Show the first and last two characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Remote sync is possible once the project id and web API key are stored.
pub fn is_configured() -> bool {
    has_credential(KEY_FIREBASE_PROJECT) && has_credential(KEY_FIREBASE_API_KEY)
}

/// Stored credentials, with secrets masked.
pub fn get_masked_config() -> Value {
    let masked = |key: &str| get_credential(key).map(|v| mask_secret(&v));
    serde_json::json!({
        "firebaseProjectId": get_credential(KEY_FIREBASE_PROJECT),
        "firebaseApiKey": masked(KEY_FIREBASE_API_KEY),
        "smsAuthToken": masked(KEY_SMS_TOKEN),
        "hasIdToken": has_credential(KEY_ID_TOKEN),
    })
}

/// Store credentials supplied during setup.
///
/// Expected JSON shape (camelCase, snake_case accepted):
/// ```json
/// {
///   "firebaseProjectId": "...",
///   "firebaseApiKey": "...",
///   "smsAuthToken": "...",   // optional
///   "idToken": "..."         // optional
/// }
/// ```
pub fn update_credentials(payload: &Value) -> Result<Value> {
    let pick = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut stored = Vec::new();
    let fields: [(&[&str], &str); 4] = [
        (
            &["firebaseProjectId", "firebase_project_id", "projectId"],
            KEY_FIREBASE_PROJECT,
        ),
        (
            &["firebaseApiKey", "firebase_api_key", "apiKey"],
            KEY_FIREBASE_API_KEY,
        ),
        (&["smsAuthToken", "sms_auth_token", "smsToken"], KEY_SMS_TOKEN),
        (&["idToken", "id_token"], KEY_ID_TOKEN),
    ];
    for (aliases, key) in fields {
        if let Some(value) = pick(aliases) {
            set_credential(key, &value)?;
            stored.push(key);
        }
    }

    if stored.is_empty() {
        return Err(Error::validation("No credentials supplied"));
    }

    info!(keys = ?stored, "credentials updated");
    Ok(serde_json::json!({ "success": true, "stored": stored }))
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<Value> {
    info!("factory reset: deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}
