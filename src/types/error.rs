//! Error types for fabric-custody
//!
//! One error enum shared by the crypto helpers, the transit client, the
//! tethered-signer protocol and the enrollment orchestrator. Handshake and
//! signature-mismatch failures are security events: callers tear the
//! connection down instead of retrying.

use hyper::StatusCode;

/// Main error type for custody operations
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Signer busy: {0}")]
    Busy(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unsupported identity type: {0}")]
    UnsupportedIdentityType(String),

    #[error("Certificate authority error: {0}")]
    CertificateAuthority(String),

    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodyError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedCurve(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::KeyNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Protocol(_) => StatusCode::BAD_GATEWAY,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::SignatureVerification(_) => StatusCode::BAD_GATEWAY,
            Self::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ConnectionClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UnsupportedIdentityType(_) => StatusCode::BAD_REQUEST,
            Self::CertificateAuthority(_) => StatusCode::BAD_GATEWAY,
            Self::Datastore(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }

    /// Whether the failure must tear down the transport it happened on
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::SignatureVerification(_)
        )
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for CustodyError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for CustodyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Protocol(format!("malformed response body: {}", err))
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<hyper::Error> for CustodyError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CustodyError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<der::Error> for CustodyError {
    fn from(err: der::Error) -> Self {
        Self::Protocol(format!("DER error: {}", err))
    }
}

/// Result type alias for custody operations
pub type Result<T> = std::result::Result<T, CustodyError>;
