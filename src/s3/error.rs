//! Error types for the S3 protocol engine
//!
//! Every public operation returns [`Result`]. Retries happen inside the
//! request pipeline, so an error seen by a caller is always final.

use http::{Method, StatusCode};
use thiserror::Error;

/// Boxed error used by transports and streaming bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server error envelope (`<Error>...</Error>`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub bucket_name: Option<String>,
    pub key: Option<String>,
    pub resource: Option<String>,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
    pub region: Option<String>,
    pub server: Option<String>,
}

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// Malformed caller input, detected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-2xx response from the server
    #[error(
        "{method} {uri} failed with HTTP {status}{}",
        .error.as_ref().map(|e| format!(": {} - {}", e.code, e.message)).unwrap_or_default()
    )]
    Http {
        method: Method,
        uri: String,
        status: StatusCode,
        error: Option<Box<ErrorResponse>>,
    },

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request build error: {0}")]
    Request(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

impl S3Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        S3Error::Validation(message.into())
    }

    /// HTTP status of a server error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            S3Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server error code (`NoSuchKey`, `SlowDown`, ...) if the body was parsed
    pub fn code(&self) -> Option<&str> {
        match self {
            S3Error::Http { error: Some(e), .. } => Some(e.code.as_str()),
            _ => None,
        }
    }

    /// Parsed server error envelope
    pub fn error_response(&self) -> Option<&ErrorResponse> {
        match self {
            S3Error::Http { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// True when the server status is one the retry policy treats as transient
    pub fn is_retryable_status(&self) -> bool {
        self.status()
            .is_some_and(crate::s3::retry::is_retryable_status)
    }

    /// True for 404 responses and `NoSuch*` error codes
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
            || self.code().is_some_and(|c| c.starts_with("NoSuch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_includes_server_fields() {
        let err = S3Error::Http {
            method: Method::GET,
            uri: "http://localhost:9000/bucket/key".to_string(),
            status: StatusCode::FORBIDDEN,
            error: Some(Box::new(ErrorResponse {
                code: "AccessDenied".to_string(),
                message: "Access Denied.".to_string(),
                ..Default::default()
            })),
        };

        let text = err.to_string();
        assert!(text.contains("GET http://localhost:9000/bucket/key"));
        assert!(text.contains("403"));
        assert!(text.contains("AccessDenied - Access Denied."));
        assert_eq!(err.code(), Some("AccessDenied"));
        assert!(!err.is_not_found());
        assert!(!err.is_retryable_status());
    }

    #[test]
    fn test_not_found_detection() {
        let err = S3Error::Http {
            method: Method::HEAD,
            uri: "http://localhost:9000/missing".to_string(),
            status: StatusCode::NOT_FOUND,
            error: None,
        };
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(!S3Error::Cancelled.is_not_found());
    }
}
