//! Error types for Compute Engine calls.

use crate::gcp::http::{ApiStatusError, ErrorEntry};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A mutation finished with errors reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiOperationError {
    /// Operation name, or the rejected call when no operation was created
    pub operation: String,
    pub errors: Vec<ErrorEntry>,
}

impl ApiOperationError {
    pub fn new(operation: impl Into<String>, errors: Vec<ErrorEntry>) -> Self {
        Self {
            operation: operation.into(),
            errors,
        }
    }

    /// A mutating request rejected outright by the API
    pub fn from_rejection(call: &str, api: &ApiStatusError) -> Self {
        Self::new(call, api.errors.clone())
    }

    /// Whether any entry carries `code`
    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

impl fmt::Display for ApiOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.operation)?;
        for (i, entry) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, entry.code, entry.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiOperationError {}

/// Errors raised by the compute client.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The operation (or the request that should have created it) failed.
    #[error(transparent)]
    Operation(#[from] ApiOperationError),
    /// The poll policy's time limit elapsed before the operation finished.
    #[error("timed out after {elapsed:?} ({attempts} polls) waiting for operation {operation}")]
    PollTimeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
    },
    /// Rejected locally before any request was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The startup script could not be read.
    #[error("failed to read startup script {}: {source}", path.display())]
    StartupScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Transport, authentication or decoding failure, passed through as-is.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ComputeError {
    pub fn as_operation_error(&self) -> Option<&ApiOperationError> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Map the failure of a mutating request
    ///
    /// Resource-level rejections (missing instance, name clash, bad request)
    /// become [`ApiOperationError`]; everything else passes through.
    pub(crate) fn from_submit(call: &str, err: anyhow::Error) -> Self {
        match err.downcast_ref::<ApiStatusError>() {
            Some(api) if api.is_resource_error() => {
                ApiOperationError::from_rejection(call, api).into()
            }
            _ => Self::Transport(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn entry(code: &str, message: &str) -> ErrorEntry {
        ErrorEntry {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_display_concatenates_every_entry() {
        let err = ApiOperationError::new(
            "operation-1",
            vec![entry("QUOTA_EXCEEDED", "Quota exceeded"), entry("BAD_IMAGE", "No such image")],
        );
        assert_eq!(
            err.to_string(),
            "operation-1 failed: QUOTA_EXCEEDED: Quota exceeded; BAD_IMAGE: No such image"
        );
    }

    #[test]
    fn test_submit_maps_not_found_to_operation_error() {
        let body = r#"{"error": {"code": 404, "message": "not found",
            "errors": [{"reason": "notFound", "message": "The resource 'demo' was not found"}]}}"#;
        let api = ApiStatusError::from_response(StatusCode::NOT_FOUND, body);

        let err = ComputeError::from_submit("delete demo", api.into());
        let op_err = err.as_operation_error().expect("operation error");
        assert!(op_err.has_code("notFound"));
        assert_eq!(op_err.operation, "delete demo");
    }

    #[test]
    fn test_submit_passes_auth_failures_through() {
        let api = ApiStatusError::from_response(StatusCode::UNAUTHORIZED, "");
        let err = ComputeError::from_submit("insert demo", api.into());
        assert!(matches!(err, ComputeError::Transport(_)));
    }
}
