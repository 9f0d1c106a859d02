//! Unified error handling for the walk-tracker library.
//!
//! Only caller-facing preconditions (`AlreadyTracking`, `PermissionDenied`)
//! are meant to reach the UI. Storage, provider and serialization errors are
//! produced by the lower layers and absorbed by the session store, which logs
//! them and keeps the live walk going.

use thiserror::Error;

/// Unified error type for walk-tracker operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalkError {
    /// A walk is already in progress; it must be stopped or cleared first
    #[error("A walk is already being tracked (session '{session_id}')")]
    AlreadyTracking { session_id: String },

    /// Location access was refused by the user or the platform
    #[error("Location permission denied")]
    PermissionDenied,

    /// Durable key-value storage failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// A snapshot or history blob could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Places provider request failed
    #[error("{}", http_message(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Invalid tracker configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn http_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl WalkError {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        WalkError::Storage {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        WalkError::Config {
            message: message.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for WalkError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        WalkError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for WalkError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        WalkError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for WalkError {
    fn from(err: serde_json::Error) -> Self {
        WalkError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for WalkError {
    fn from(err: rusqlite::Error) -> Self {
        WalkError::Storage {
            message: err.to_string(),
        }
    }
}

/// Result type alias for walk-tracker operations.
pub type Result<T> = std::result::Result<T, WalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WalkError::AlreadyTracking {
            session_id: "walk-1".to_string(),
        };
        assert!(err.to_string().contains("walk-1"));

        let err = WalkError::Http {
            message: "rate limited".to_string(),
            status_code: Some(429),
        };
        assert_eq!(err.to_string(), "HTTP error (429): rate limited");

        let err = WalkError::Http {
            message: "timeout".to_string(),
            status_code: None,
        };
        assert_eq!(err.to_string(), "HTTP error: timeout");
    }

    #[test]
    fn test_decode_error_maps_to_serialization() {
        let result: std::result::Result<String, _> = rmp_serde::from_slice(&[0xc1]);
        let err: WalkError = result.unwrap_err().into();
        assert!(matches!(err, WalkError::Serialization { .. }));
    }
}
