use serde::Deserialize;
use serde_json::Value;

use super::{parse_payload, payload_arg0_as_string, payload_object, to_json, AppState};
use crate::auth;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPayload {
    #[serde(alias = "mobile", alias = "phoneNumber", alias = "phone_number")]
    phone: String,
    #[serde(alias = "otp")]
    code: String,
}

pub async fn auth_request_otp(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let phone = payload_arg0_as_string(arg0, &["phone", "mobile", "phoneNumber", "phone_number"])
        .ok_or("Missing phone number")?;
    let sms = state
        .sms
        .clone()
        .ok_or("SMS gateway is not configured")?;
    let dispatch = auth::request_otp(&state.db, sms.as_ref(), &phone)
        .await
        .map_err(String::from)?;
    to_json(&dispatch)
}

pub async fn auth_verify_otp(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: VerifyPayload = parse_payload(payload_object(arg0, "phone"), "verification")?;
    auth::verify_otp(
        &state.db,
        &state.auth,
        state.remote.as_deref(),
        &payload.phone,
        &payload.code,
    )
    .await
    .map_err(String::from)?;
    Ok(auth::session_json(&state.auth))
}

pub fn auth_session(state: &AppState) -> Value {
    auth::session_json(&state.auth)
}

pub fn auth_logout(state: &AppState) -> Result<Value, String> {
    auth::logout(&state.db, &state.auth).map_err(String::from)?;
    Ok(serde_json::json!({ "success": true }))
}

pub fn auth_update_profile(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let name = payload_arg0_as_string(arg0, &["name", "displayName", "display_name"])
        .ok_or("Missing name")?;
    let profile = auth::update_profile_name(&state.db, &state.auth, &name).map_err(String::from)?;
    to_json(&profile)
}

#[cfg(test)]
mod tests {
    use super::super::test_state::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_and_verify() {
        let h = harness();
        let sent = auth_request_otp(Some(json!({ "mobile": "+977-9841234567" })), &h.state)
            .await
            .unwrap();
        assert_eq!(sent["phone"], "98******67");

        let code = h.sms.last_code();
        let last = code.chars().last().unwrap().to_digit(10).unwrap();
        let wrong = format!("{}{}", &code[..5], (last + 1) % 10);
        let err = auth_verify_otp(Some(json!({ "phone": "9841234567", "otp": wrong })), &h.state)
            .await
            .unwrap_err();
        assert!(err.contains("Invalid verification code"), "{err}");
        let err = auth_verify_otp(Some(json!({ "phone": "9841234567", "otp": "12ab56" })), &h.state)
            .await
            .unwrap_err();
        assert!(err.contains("6-digit"));

        let session =
            auth_verify_otp(Some(json!({ "phone": "9841234567", "code": code })), &h.state)
                .await
                .unwrap();
        assert_eq!(session["authenticated"], true);
        assert_eq!(auth_session(&h.state)["phone"], "98******67");
    }

    #[tokio::test]
    async fn test_profile_and_logout() {
        let h = signed_in().await;
        let profile = auth_update_profile(Some(json!("Sita Sharma")), &h.state).unwrap();
        assert_eq!(profile["name"], "Sita Sharma");
        assert!(auth_update_profile(Some(json!({ "name": "  " })), &h.state).is_err());

        auth_logout(&h.state).unwrap();
        assert_eq!(auth_session(&h.state)["authenticated"], false);
        assert!(auth_update_profile(Some(json!("Sita")), &h.state).is_err());
    }

    #[tokio::test]
    async fn test_request_without_phone() {
        let h = harness();
        let err = auth_request_otp(None, &h.state).await.unwrap_err();
        assert_eq!(err, "Missing phone number");
    }
}
