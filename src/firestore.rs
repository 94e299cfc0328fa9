//! Firestore REST client.
//!
//! The `customers`, `transaction_entries` and `profiles` collections are
//! reached over the REST API: documents are upserted with `PATCH`, removed
//! with `DELETE`, and listed by a field (usually `user_id`) with a
//! `:runQuery` structured query. JSON documents are converted to and from
//! Firestore's typed value encoding.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};

/// The seam between the sync engine and whatever stores documents remotely.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or fully replace a document.
    async fn upsert(&self, collection: &str, id: &str, data: &Value) -> Result<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All documents in `collection` whose string field `field` equals `value`.
    async fn query_by_field(&self, collection: &str, field: &str, value: &str)
        -> Result<Vec<Value>>;

    /// All documents in `collection` owned by `user_id`.
    async fn query_by_user(&self, collection: &str, user_id: &str) -> Result<Vec<Value>> {
        self.query_by_field(collection, "user_id", user_id).await
    }

    /// Cheap reachability check.
    async fn health(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Value encoding
// ---------------------------------------------------------------------------

/// Encode a JSON value as a Firestore `Value`.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // Firestore transmits int64 as a decimal string.
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn encode_fields(map: &Map<String, Value>) -> Value {
    let fields: Map<String, Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    Value::Object(fields)
}

/// Wrap a JSON object as a Firestore document body.
pub fn encode_document(data: &Value) -> Result<Value> {
    match data {
        Value::Object(map) => Ok(json!({ "fields": encode_fields(map) })),
        _ => Err(Error::validation("Firestore documents must be JSON objects")),
    }
}

/// Decode a Firestore `Value` back into plain JSON.
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    if let Some(s) = obj.get("stringValue").and_then(Value::as_str) {
        return Value::String(s.to_string());
    }
    if let Some(raw) = obj.get("integerValue") {
        let parsed = match raw {
            Value::String(s) => s.parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
        return parsed.map(Value::from).unwrap_or(Value::Null);
    }
    if let Some(raw) = obj.get("doubleValue") {
        let parsed = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        };
        return parsed.map(Value::from).unwrap_or(Value::Null);
    }
    if let Some(b) = obj.get("booleanValue").and_then(Value::as_bool) {
        return Value::Bool(b);
    }
    if let Some(ts) = obj.get("timestampValue").and_then(Value::as_str) {
        return Value::String(ts.to_string());
    }
    if let Some(arr) = obj.get("arrayValue") {
        let values = arr
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(map) = obj.get("mapValue") {
        return decode_fields(map.get("fields"));
    }
    Value::Null
}

fn decode_fields(fields: Option<&Value>) -> Value {
    let decoded: Map<String, Value> = fields
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
        .unwrap_or_default();
    Value::Object(decoded)
}

/// Decode a Firestore document; the id is taken from the resource name when
/// the fields do not carry one.
pub fn decode_document(doc: &Value) -> Value {
    let mut data = decode_fields(doc.get("fields"));
    let doc_id = doc
        .get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .map(str::to_string);
    if let (Value::Object(map), Some(id)) = (&mut data, doc_id) {
        map.entry("id").or_insert(Value::String(id));
    }
    data
}

/// Extract documents from a `:runQuery` response stream.
pub fn parse_run_query_response(body: &Value) -> Vec<Value> {
    body.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("document"))
                .map(decode_document)
                .collect()
        })
        .unwrap_or_default()
}

/// Turn an error response into an `Error`, using Google's error envelope
/// when present.
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status.as_u16() {
        401 | 403 => Error::Auth(message),
        code => Error::Remote {
            status: code,
            message,
        },
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FirestoreClient {
    client: Client,
    base_url: String,
    project_id: String,
    api_key: String,
    id_token: Option<String>,
    connectivity_timeout: Duration,
}

impl FirestoreClient {
    pub fn new(
        base_url: &str,
        project_id: &str,
        api_key: &str,
        request_timeout: Duration,
        connectivity_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::State(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            api_key: api_key.to_string(),
            id_token: None,
            connectivity_timeout,
        })
    }

    /// Build a client from config; `None` when Firebase is not configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>> {
        let (Some(project), Some(key)) = (
            config.firebase_project_id.as_deref(),
            config.firebase_api_key.as_deref(),
        ) else {
            return Ok(None);
        };
        let mut client = Self::new(
            &config.firestore_url,
            project,
            key,
            config.request_timeout,
            config.connectivity_timeout,
        )?;
        client.id_token = crate::storage::get_credential(crate::storage::KEY_ID_TOKEN);
        Ok(Some(client))
    }

    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url, self.project_id
        )
    }

    pub fn document_url(&self, collection: &str, id: &str) -> Result<Url> {
        let raw = format!("{}/{collection}/{id}", self.documents_root());
        Url::parse_with_params(&raw, &[("key", self.api_key.as_str())])
            .map_err(|e| Error::validation(format!("invalid Firestore URL: {e}")))
    }

    fn run_query_url(&self) -> Result<Url> {
        let raw = format!("{}:runQuery", self.documents_root());
        Url::parse_with_params(&raw, &[("key", self.api_key.as_str())])
            .map_err(|e| Error::validation(format!("invalid Firestore URL: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String)> {
        let mut req = self.client.request(method.clone(), url);
        if let Some(token) = &self.id_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        debug!(method = %method, status = status.as_u16(), "firestore request");
        Ok((status, text))
    }
}

#[async_trait]
impl RemoteStore for FirestoreClient {
    async fn upsert(&self, collection: &str, id: &str, data: &Value) -> Result<()> {
        let body = encode_document(data)?;
        let url = self.document_url(collection, id)?;
        let (status, text) = self.send(Method::PATCH, url, Some(&body)).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(status_error(status, &text))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.document_url(collection, id)?;
        let (status, text) = self.send(Method::DELETE, url, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(status_error(status, &text))
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value }
                    }
                }
            }
        });
        let url = self.run_query_url()?;
        let (status, text) = self.send(Method::POST, url, Some(&body)).await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        let parsed: Value = serde_json::from_str(&text)?;
        Ok(parse_run_query_response(&parsed))
    }

    async fn health(&self) -> Result<()> {
        // Any HTTP answer means the network path works.
        match self
            .client
            .head(&self.base_url)
            .timeout(self.connectivity_timeout)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "firestore health check failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_document_uses_typed_values() {
        let doc = encode_document(&json!({
            "name": "Hari Traders",
            "amount": 1500.5,
            "count": 3,
            "active": true,
            "note": null,
            "tags": ["rice", "dal"],
            "meta": { "source": "offline" }
        }))
        .unwrap();

        let fields = &doc["fields"];
        assert_eq!(fields["name"], json!({ "stringValue": "Hari Traders" }));
        assert_eq!(fields["amount"], json!({ "doubleValue": 1500.5 }));
        assert_eq!(fields["count"], json!({ "integerValue": "3" }));
        assert_eq!(fields["active"], json!({ "booleanValue": true }));
        assert_eq!(fields["note"], json!({ "nullValue": null }));
        assert_eq!(
            fields["tags"]["arrayValue"]["values"][1],
            json!({ "stringValue": "dal" })
        );
        assert_eq!(
            fields["meta"]["mapValue"]["fields"]["source"],
            json!({ "stringValue": "offline" })
        );
    }

    #[test]
    fn test_encode_document_rejects_non_objects() {
        assert!(encode_document(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_decode_document_takes_id_from_name() {
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/customers/cust-42",
            "fields": {
                "name": { "stringValue": "Sita" },
                "user_id": { "stringValue": "u-1" },
                "amount": { "doubleValue": 250 },
                "visits": { "integerValue": "12" },
                "created_at": { "timestampValue": "2024-08-31T10:00:00Z" }
            }
        });
        let decoded = decode_document(&doc);
        assert_eq!(decoded["id"], "cust-42");
        assert_eq!(decoded["name"], "Sita");
        assert_eq!(decoded["amount"].as_f64(), Some(250.0));
        assert_eq!(decoded["visits"], 12);
        assert_eq!(decoded["created_at"], "2024-08-31T10:00:00Z");
    }

    #[test]
    fn test_encode_then_decode_preserves_a_ledger_entry() {
        let entry = json!({
            "id": "t-1",
            "amount": 1200.75,
            "transaction_type": "given",
            "transaction_date": "2081-05-15",
            "balance_after": -300.0,
        });
        let encoded = encode_document(&entry).unwrap();
        let decoded = decode_document(&encoded);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_run_query_response_skips_read_time_only_rows() {
        let body = json!([
            { "readTime": "2024-08-31T10:00:00Z" },
            {
                "document": {
                    "name": "projects/p/databases/(default)/documents/customers/c-1",
                    "fields": { "name": { "stringValue": "Ram" } }
                },
                "readTime": "2024-08-31T10:00:00Z"
            }
        ]);
        let docs = parse_run_query_response(&body);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], "c-1");
    }

    #[test]
    fn test_status_error_reads_google_envelope() {
        let err = status_error(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"Missing or insufficient permissions.","status":"PERMISSION_DENIED"}}"#,
        );
        assert!(matches!(err, Error::Auth(ref m) if m == "Missing or insufficient permissions."));

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_document_url_carries_api_key() {
        let client = FirestoreClient::new(
            "https://firestore.googleapis.com/v1/",
            "mero-hisab",
            "key-1",
            Duration::from_secs(15),
            Duration::from_secs(8),
        )
        .unwrap();
        let url = client.document_url("customers", "c-1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/mero-hisab/databases/(default)/documents/customers/c-1?key=key-1"
        );
    }
}
