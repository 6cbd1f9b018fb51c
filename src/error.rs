//! Error types for the data-access engine
//!
//! Every failure that leaves the engine names the operation and the table it
//! was running against, plus the backend's own message verbatim. Nothing in
//! this layer retries.

use thiserror::Error;

/// Backend error code for "single row expected, zero (or many) found".
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// Backend error code for an insufficient-privilege rejection.
pub const PERMISSION_DENIED_CODE: &str = "42501";

pub type Result<T, E = DataError> = std::result::Result<T, E>;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// The backend rejected the request (constraint violation, permission
    /// denial, malformed filter, transport failure).
    #[error("{operation} on {table} failed: {message}")]
    Backend {
        operation: &'static str,
        table: String,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    /// The query descriptor could not be decoded.
    #[error("invalid query for {table}: {reason}")]
    InvalidQuery { table: String, reason: String },

    /// Returned rows could not be converted into the requested record shape.
    #[error("failed to decode {table} rows: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    pub fn invalid_query(table: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::InvalidQuery {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Backend error code, when the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            DataError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(NOT_FOUND_CODE)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code() == Some(PERMISSION_DENIED_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(code: Option<&str>) -> DataError {
        DataError::Backend {
            operation: "findMany",
            table: "orders".to_string(),
            code: code.map(str::to_string),
            message: "boom".to_string(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn test_message_names_table_and_cause() {
        assert_eq!(backend(None).to_string(), "findMany on orders failed: boom");
    }

    #[test]
    fn test_code_classification() {
        assert!(backend(Some(NOT_FOUND_CODE)).is_not_found());
        assert!(backend(Some(PERMISSION_DENIED_CODE)).is_permission_denied());
        assert!(!backend(None).is_not_found());
        assert!(!DataError::invalid_query("orders", "bad").is_permission_denied());
    }
}
