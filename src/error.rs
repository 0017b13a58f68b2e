//! Centralized error types for Workbridge.
//!
//! Every public service operation returns either a success payload or a single
//! `ServiceError`. The variants mirror the failure classes a caller needs to
//! distinguish: bad configuration, bad input, credentials, the network, and the
//! remote service itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Classification shared by `ServiceError` and failed `AzureResult`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Missing or invalid connection, type, or credential configuration.
    Configuration,
    /// Malformed caller input.
    Validation,
    /// Every available authentication strategy failed.
    Authentication,
    /// Network failure other than a timeout.
    Transport,
    /// The per-request timeout elapsed.
    TransportTimeout,
    /// The remote service answered with a non-2xx status.
    RemoteRejected,
    /// A success response whose body could not be read.
    DecodeError,
}

impl FailureKind {
    /// Stable label used as a message prefix.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "ConfigurationError",
            FailureKind::Validation => "ValidationError",
            FailureKind::Authentication => "AuthenticationError",
            FailureKind::Transport => "TransportError",
            FailureKind::TransportTimeout => "TransportTimeout",
            FailureKind::RemoteRejected => "RemoteRejected",
            FailureKind::DecodeError => "DecodeError",
        }
    }
}

/// Errors surfaced by the integration service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing/invalid connection or type, or no usable credential.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed caller input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Both strategies exhausted, or the only configured strategy failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network failure that is not a timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request exceeded its timeout.
    #[error("Request timed out: {0}")]
    TransportTimeout(String),

    /// The remote service returned an application-level error.
    #[error("Remote service rejected the request (HTTP {status}): {message}")]
    RemoteRejected {
        /// The HTTP status code.
        status: u16,
        /// Message extracted from the error payload.
        message: String,
    },

    /// A success-path response body could not be decoded.
    #[error("Could not decode response: {0}")]
    Decode(String),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::TransportTimeout(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

impl ServiceError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        ServiceError::Configuration(msg.into())
    }

    /// Create an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        ServiceError::Authentication(msg.into())
    }

    /// The failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            ServiceError::Configuration(_) => FailureKind::Configuration,
            ServiceError::Validation(_) => FailureKind::Validation,
            ServiceError::Authentication(_) => FailureKind::Authentication,
            ServiceError::Transport(_) => FailureKind::Transport,
            ServiceError::TransportTimeout(_) => FailureKind::TransportTimeout,
            ServiceError::RemoteRejected { .. } => FailureKind::RemoteRejected,
            ServiceError::Decode(_) => FailureKind::DecodeError,
        }
    }

    /// Whether a caller may safely retry the operation.
    ///
    /// Only meaningful for reads; writes are never retried to avoid
    /// duplicate creation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport(_) | ServiceError::TransportTimeout(_)
        )
    }

    /// Get a user-friendly message for display.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Configuration(msg) => format!("Configuration problem: {}", msg),
            ServiceError::Validation(msg) => format!("Invalid input: {}", msg),
            ServiceError::Authentication(_) => {
                "Authentication failed. Check the managed credential or personal access token."
                    .to_string()
            }
            ServiceError::Transport(_) => {
                "Connection failed. Please check your network and the organization URL.".to_string()
            }
            ServiceError::TransportTimeout(_) => {
                "Azure DevOps did not answer in time. Please try again.".to_string()
            }
            ServiceError::RemoteRejected { status, message } => {
                format!("Azure DevOps rejected the request ({}): {}", status, message)
            }
            ServiceError::Decode(_) => {
                "Unexpected response from Azure DevOps. The outcome is unknown.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_becomes_configuration() {
        let err: ServiceError = ConfigError::ConnectionNotFound("prod".to_string()).into();
        assert!(matches!(err, ServiceError::Configuration(_)));
        assert!(err.to_string().contains("prod"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ServiceError::validation("x").kind(),
            FailureKind::Validation
        );
        assert_eq!(
            ServiceError::RemoteRejected {
                status: 404,
                message: "gone".to_string()
            }
            .kind(),
            FailureKind::RemoteRejected
        );
        assert_eq!(
            ServiceError::Decode("bad".to_string()).kind(),
            FailureKind::DecodeError
        );
    }

    #[test]
    fn test_only_transport_failures_are_retryable() {
        assert!(ServiceError::Transport("reset".to_string()).is_retryable());
        assert!(ServiceError::TransportTimeout("30s".to_string()).is_retryable());
        assert!(!ServiceError::authentication("nope").is_retryable());
        assert!(!ServiceError::RemoteRejected {
            status: 500,
            message: "boom".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_user_message_remote_rejected() {
        let err = ServiceError::RemoteRejected {
            status: 404,
            message: "TF401232: Work item 7 does not exist".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("404"));
        assert!(msg.contains("TF401232"));
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FailureKind::DecodeError.label(), "DecodeError");
        assert_eq!(FailureKind::RemoteRejected.label(), "RemoteRejected");
    }
}
