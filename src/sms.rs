//! Outbound SMS through the Aakash SMS HTTP API.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::mask_phone;
use crate::config::AppConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send `text` to a ten-digit Nepali mobile number.
    async fn send(&self, to: &str, text: &str) -> Result<()>;
}

pub struct AakashSms {
    client: Client,
    url: String,
    auth_token: String,
}

impl AakashSms {
    pub fn new(url: &str, auth_token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::State(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            auth_token: auth_token.to_string(),
        })
    }

    /// `None` when no SMS token is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>> {
        match config.sms_auth_token.as_deref() {
            Some(token) => Ok(Some(Self::new(&config.sms_url, token, config.sms_timeout)?)),
            None => Ok(None),
        }
    }

    fn request_url(&self, to: &str, text: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.url,
            &[
                ("auth_token", self.auth_token.as_str()),
                ("to", to),
                ("text", text),
            ],
        )
        .map_err(|e| Error::validation(format!("invalid SMS gateway URL: {e}")))
    }
}

/// Interpret an Aakash response body. The gateway answers 200 with
/// `"error": true` for rejected requests, and lists bad numbers under
/// `data.invalid`.
fn check_response(status: u16, body: &str) -> Result<()> {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = parsed
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();

    if status == 401 || status == 403 {
        return Err(Error::Auth(format!("SMS gateway: {message}")));
    }
    if !(200..300).contains(&status) {
        return Err(Error::Remote { status, message });
    }
    if parsed.get("error").and_then(Value::as_bool).unwrap_or(false) {
        return Err(Error::Remote { status, message });
    }
    let invalid = parsed
        .pointer("/data/invalid")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if invalid {
        return Err(Error::validation("SMS gateway rejected the phone number"));
    }
    Ok(())
}

#[async_trait]
impl SmsGateway for AakashSms {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        let url = self.request_url(to, text)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        match check_response(status, &body) {
            Ok(()) => {
                info!(to = %mask_phone(to), "sms queued");
                Ok(())
            }
            Err(e) => {
                warn!(to = %mask_phone(to), status, error = %e, "sms send failed");
                Err(e)
            }
        }
    }
}
