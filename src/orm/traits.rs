//! Core traits for the data-access layer
//!
//! [`Backend`] is the seam between the engine and whatever executes native
//! queries. The engine only needs a surface that accepts a [`BackendQuery`]
//! and answers with a `(data, error, count)` triple.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::builder::BackendQuery;

/// Error object returned by the data service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BackendError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    /// A failure with no service code, e.g. the request never got an answer.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Result of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    pub data: Option<JsonValue>,
    pub error: Option<BackendError>,
    pub count: Option<u64>,
}

impl BackendResponse {
    pub fn ok(data: Option<JsonValue>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn failed(error: BackendError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_count(mut self, count: Option<u64>) -> Self {
        self.count = count;
        self
    }
}

/// What the backend is authenticating with, for operator diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialInfo {
    pub present: bool,
    /// First few characters of the credential.
    pub prefix: Option<String>,
}

impl CredentialInfo {
    pub fn from_key(key: &str) -> Self {
        if key.is_empty() {
            return Self::default();
        }
        Self {
            present: true,
            prefix: Some(key.chars().take(8).collect()),
        }
    }
}

/// Executes native queries against the tabular data service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one request. Failures are reported in the response, never panicked.
    async fn execute(&self, query: &BackendQuery) -> BackendResponse;

    fn credential(&self) -> CredentialInfo {
        CredentialInfo::default()
    }
}

/// A record shape bound to a fixed table.
pub trait Model: DeserializeOwned + Send + Sync {
    /// Table name in the data service (e.g. "orders")
    const TABLE_NAME: &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_error_decodes_service_body() {
        let err: BackendError = serde_json::from_value(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint",
            "details": null,
            "hint": null
        }))
        .unwrap();
        assert_eq!(err.code.as_deref(), Some("23505"));
        assert!(err.details.is_none());
    }

    #[test]
    fn test_credential_prefix_is_truncated() {
        let info = CredentialInfo::from_key("eyJhbGciOiJIUzI1NiJ9.payload");
        assert!(info.present);
        assert_eq!(info.prefix.as_deref(), Some("eyJhbGci"));
        assert!(!CredentialInfo::from_key("").present);
    }
}
