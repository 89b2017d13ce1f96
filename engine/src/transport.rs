//! The wire transport (§6): the sync engine's (C7) only network-facing
//! collaborator. [`Transport`] is the trait the engine depends on —
//! a genuine external collaborator per §1, never implemented by the
//! engine itself. [`HttpTransport`] is the reference client speaking
//! to the reference server (C9, `carry-server`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::delta::TypeIndex;
use crate::error::{Error, Result};
use crate::record::{Record, Timestamp};

/// The authoritative store's interface as seen by one client (§6). All
/// six queries the wire protocol defines map to one method each; the
/// `reconcile`/`resolve` responses return the raw decoded JSON for
/// `data` since only the engine (holding a [`crate::payload::TypeRegistry`])
/// can turn it into a [`TypeIndex`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn hash(&self) -> Result<String>;
    async fn add(&self, type_name: &str, record: &Record) -> Result<String>;
    async fn edit(&self, type_name: &str, record: &Record) -> Result<String>;
    async fn delete(&self, type_name: &str, record: &Record) -> Result<String>;
    async fn reconcile(&self, last_sync: Timestamp, delta: &TypeIndex) -> Result<(String, Value)>;
    async fn resolve(&self, chosen: &TypeIndex) -> Result<(String, Value)>;
}

/// A `reqwest`-based [`Transport`] against the reference server's single
/// dispatched `POST /sync` plus `GET /sync/hash` (§6).
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn check_status(status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "unexpected response status: {status}"
            )))
        }
    }

    async fn post(&self, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/sync", self.base_url))
            .header("Content-Type", "application/json; charset=UTF-8")
            .json(&body)
            .send()
            .await?;
        Self::check_status(response.status())?;
        Ok(response.json::<Value>().await?)
    }

    fn expect_string(value: Value, query: &str) -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Transport(format!("{query}: expected a string response")))
    }

    fn expect_reconcile_shape(value: Value) -> Result<(String, Value)> {
        let hash = value
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Reconcile("response missing \"hash\"".into()))?
            .to_string();
        let data = value.get("data").cloned().unwrap_or_else(|| json!({}));
        Ok((hash, data))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn hash(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/sync/hash", self.base_url))
            .send()
            .await?;
        Self::check_status(response.status())?;
        let value = response.json::<Value>().await?;
        Self::expect_string(value, "hash")
    }

    async fn add(&self, type_name: &str, record: &Record) -> Result<String> {
        let body = json!({"query": "add", "type": type_name, "instance": record.to_canonical()});
        Self::expect_string(self.post(body).await?, "add")
    }

    async fn edit(&self, type_name: &str, record: &Record) -> Result<String> {
        let body = json!({"query": "edit", "type": type_name, "instance": record.to_canonical()});
        Self::expect_string(self.post(body).await?, "edit")
    }

    async fn delete(&self, type_name: &str, record: &Record) -> Result<String> {
        let body =
            json!({"query": "delete", "type": type_name, "instance": record.to_canonical()});
        Self::expect_string(self.post(body).await?, "delete")
    }

    async fn reconcile(&self, last_sync: Timestamp, delta: &TypeIndex) -> Result<(String, Value)> {
        let body = json!({
            "query": "reconcile",
            "data": {"sync": last_sync, "instances": delta.to_json()},
        });
        Self::expect_reconcile_shape(self.post(body).await?)
    }

    async fn resolve(&self, chosen: &TypeIndex) -> Result<(String, Value)> {
        let body = json!({"query": "resolve", "data": chosen.to_json()});
        Self::expect_reconcile_shape(self.post(body).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_string_rejects_non_string() {
        let err = HttpTransport::expect_string(json!({"not": "a string"}), "hash").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn expect_reconcile_shape_requires_hash() {
        let err = HttpTransport::expect_reconcile_shape(json!({"data": {}})).unwrap_err();
        assert!(matches!(err, Error::Reconcile(_)));
    }

    #[test]
    fn expect_reconcile_shape_defaults_missing_data_to_empty_object() {
        let (hash, data) =
            HttpTransport::expect_reconcile_shape(json!({"hash": "abc"})).unwrap();
        assert_eq!(hash, "abc");
        assert_eq!(data, json!({}));
    }
}
