//! Thin wrappers over vendor REST APIs. Every adapter speaks `reqwest`
//! directly against a configurable base URL and returns typed values; callers
//! that need the uniform `{success, data, error}` shape go through
//! [`AdapterResult::from_outcome`].

pub mod calendar;
pub mod drive;
pub mod gmail;
pub mod groq;
pub mod search;
pub mod together;
pub mod wompi;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{AvaBotError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn from_outcome<T: Serialize>(operation: &str, outcome: Result<T>) -> Self {
        match outcome {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => Self::ok(data),
                Err(err) => Self::failed(err.to_string()),
            },
            Err(err) => {
                warn!(operation, error = %err, "adapter call failed");
                Self::failed(err.to_string())
            }
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .and_then(|value| value.as_str())
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("error desconocido")
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AvaBotError::Http(e.to_string()))
}

pub(crate) fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Reads the body once; non-2xx statuses become `Upstream` with the raw text.
pub(crate) async fn json_or_upstream(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AvaBotError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(AvaBotError::Upstream {
            status: status.as_u16(),
            body: text,
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| AvaBotError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_keeps_payload_or_error_text() {
        let ok = AdapterResult::from_outcome("drive_upload", Ok(json!({"url": "https://x"})));
        assert!(ok.success);
        assert_eq!(ok.field("url"), Some("https://x"));

        let failed = AdapterResult::from_outcome::<Value>(
            "drive_upload",
            Err(AvaBotError::Upstream {
                status: 500,
                body: "boom".to_string(),
            }),
        );
        assert!(!failed.success);
        assert!(failed.data.is_none());
        assert_eq!(failed.error_text(), "upstream returned 500: boom");
    }

    #[test]
    fn serializes_without_empty_fields() {
        let value = serde_json::to_value(AdapterResult::failed("nope")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "nope"}));
    }
}
