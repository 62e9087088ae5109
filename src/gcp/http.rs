//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = match body.char_indices().nth(MAX_LOG_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... [truncated, {} bytes total]", &body[..cut], body.len()),
        None => body.to_string(),
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// One entry of a Google API error payload.
///
/// Both operation errors (`error.errors[]` on an Operation) and HTTP error
/// bodies use this shape; HTTP bodies call the code `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorEntry {
    #[serde(alias = "reason", default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Non-success HTTP response from a GCP API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiStatusError {
    pub status: StatusCode,
    pub message: String,
    pub errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

impl ApiStatusError {
    /// Build from a status code and the raw response body.
    ///
    /// Bodies that are not in Google's `{"error": {...}}` format still yield
    /// an error, with a single entry keyed by the status code.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let fallback_code = status.as_u16().to_string();

        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error }) => {
                let mut errors = error.errors;
                if errors.is_empty() {
                    errors.push(ErrorEntry {
                        code: error.status.unwrap_or(fallback_code),
                        message: error.message.clone(),
                    });
                }
                Self {
                    status,
                    message: error.message,
                    errors,
                }
            }
            Err(_) => Self {
                status,
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
                errors: vec![ErrorEntry {
                    code: fallback_code,
                    message: sanitize_for_log(body),
                }],
            },
        }
    }

    /// Whether the server rejected the request because of the target resource
    /// itself (missing, conflicting, malformed) rather than auth or availability
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self.status,
            StatusCode::BAD_REQUEST
                | StatusCode::NOT_FOUND
                | StatusCode::CONFLICT
                | StatusCode::PRECONDITION_FAILED
        )
    }
}

impl fmt::Display for ApiStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API request failed: {}", self.status)?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiStatusError {}

/// HTTP client wrapper for GCP API calls
#[derive(Clone, Debug)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gce-startup/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::GET, url, token, None).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::POST, url, token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::DELETE, url, token, None).await
    }

    /// The underlying reqwest client, for non-API calls such as token exchange
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        tracing::debug!("{} {}", method, url);

        let mut request: RequestBuilder = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only the sanitized/truncated body is logged
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(ApiStatusError::from_response(status, &response_body).into());
        }

        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).context("Failed to parse response JSON")
    }
}

/// Format a GCP API error for display
///
/// Known HTTP statuses get a short actionable message; anything else is
/// truncated to keep raw payloads off the console.
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.downcast_ref::<ApiStatusError>() {
        return match api.status {
            StatusCode::FORBIDDEN => "Permission denied. Check your GCP IAM permissions.".to_string(),
            StatusCode::UNAUTHORIZED => {
                "Authentication failed. Delete the credential store and sign in again.".to_string()
            }
            StatusCode::NOT_FOUND => "Resource not found.".to_string(),
            StatusCode::TOO_MANY_REQUESTS => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            StatusCode::BAD_REQUEST => "Invalid request. Check your parameters.".to_string(),
            StatusCode::CONFLICT => {
                "Resource conflict. The resource may already exist or be in use.".to_string()
            }
            s if s.is_server_error() => {
                "GCP service temporarily unavailable. Please try again.".to_string()
            }
            _ => "Request failed. Check your network connection and try again.".to_string(),
        };
    }

    let error_str = format!("{:#}", error);
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_google_error_body() {
        let body = r#"{"error": {"code": 404, "message": "The resource 'demo' was not found",
            "errors": [{"reason": "notFound", "domain": "global",
                        "message": "The resource 'demo' was not found"}]}}"#;
        let err = ApiStatusError::from_response(StatusCode::NOT_FOUND, body);

        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].code, "notFound");
        assert!(err.is_resource_error());
    }

    #[test]
    fn test_error_body_without_entries_uses_status() {
        let body = r#"{"error": {"code": 409, "message": "already exists", "status": "ALREADY_EXISTS"}}"#;
        let err = ApiStatusError::from_response(StatusCode::CONFLICT, body);

        assert_eq!(err.errors[0].code, "ALREADY_EXISTS");
        assert_eq!(err.errors[0].message, "already exists");
    }

    #[test]
    fn test_non_json_body_falls_back_to_status_code() {
        let err = ApiStatusError::from_response(StatusCode::BAD_GATEWAY, "<html>oops</html>");

        assert_eq!(err.errors[0].code, "502");
        assert!(!err.is_resource_error());
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let out = sanitize_for_log(&body);
        assert!(out.contains("truncated, 500 bytes total"));
    }

    #[test]
    fn test_format_gcp_error_maps_status() {
        let err: anyhow::Error = ApiStatusError::from_response(StatusCode::FORBIDDEN, "").into();
        assert!(format_gcp_error(&err).starts_with("Permission denied"));
    }
}
