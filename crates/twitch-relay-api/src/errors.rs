//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::path::PathBuf;
use tracing::{error, warn};
use twitch_relay_core::{identity::IdentityError, webhook::WebhookError};

/// Webhook handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: missing EventSub headers, unknown message type or a
///   body that does not match its message type
/// - `401 Unauthorized`: the signature does not match
///
/// EventSub retries on any non-2xx, so none of these are transient from
/// the relay's point of view.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("{0}")]
    Processing(#[from] WebhookError),
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Processing(e) if e.is_authentication_failure() => StatusCode::UNAUTHORIZED,
            Self::Processing(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::UNAUTHORIZED {
            "Invalid signature".to_string()
        } else {
            self.to_string()
        };

        warn!(status = %status, error = %self, "Rejected webhook delivery");
        error_response(status, message)
    }
}

/// Login endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The identity service redirected back with an `error` parameter.
    #[error("Authorization was denied: {reason}")]
    AccessDenied { reason: String },

    /// The token belongs to someone other than the configured account.
    #[error("Logged in as unexpected account '{login}'")]
    UnexpectedAccount { login: String },

    /// No `Host` header and no public base URL to build the redirect URI from.
    #[error("Cannot determine redirect URI: missing Host header")]
    MissingHost,

    #[error("Identity service request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Identity service failure: {0}")]
    Identity(#[from] IdentityError),
}

impl LoginError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied { .. } | Self::UnexpectedAccount { .. } => StatusCode::UNAUTHORIZED,
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } | Self::Identity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            LoginError::AccessDenied { .. } | LoginError::UnexpectedAccount { .. } => {
                warn!(error = %self, "Login rejected");
                "Login rejected".to_string()
            }
            LoginError::MissingHost => self.to_string(),
            LoginError::Timeout { .. } | LoginError::Identity(_) => {
                // Provider response bodies go to the log only.
                error!(error = %self, "Login failed talking to the identity service");
                "Internal server error occurred. Please try again later.".to_string()
            }
        };

        error_response(status, message)
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({
        "error": message,
        "status": status.as_u16(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status, Json(body)).into_response()
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

impl ServiceError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
            Self::Tls(_) => 4,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Errors loading the subscriber listener's certificate and key
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("No certificates found in {}", .path.display())]
    NoCertificates { path: PathBuf },

    #[error("No private key found in {}", .path.display())]
    NoPrivateKey { path: PathBuf },

    #[error("Invalid TLS configuration: {message}")]
    Invalid { message: String },
}
