//! Error types for the connection client registry.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant carries enough context for the UI layer to tell the user whether to
//! sign in again, fix a setting, or simply retry.

use thiserror::Error;

/// Sub-kinds of credential failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialErrorKind {
    /// Service account key file does not exist.
    FileNotFound,
    /// Key file exists but is not a usable service account key.
    Malformed,
    /// No refresh token on file, or the stored one was rejected.
    NotSignedIn,
    /// Token endpoint could not be reached or answered with an error.
    RefreshFailed,
}

impl CredentialErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file-not-found",
            Self::Malformed => "malformed",
            Self::NotSignedIn => "not-signed-in",
            Self::RefreshFailed => "refresh-failed",
        }
    }
}

impl std::fmt::Display for CredentialErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by registry operations.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Credential error ({kind}): {message}")]
    Credential {
        kind: CredentialErrorKind,
        message: String,
    },

    #[error("Operation '{operation}' is not supported for auth mode '{mode}'")]
    UnsupportedMode { operation: String, mode: String },

    #[error("Remote service unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl RegistryError {
    /// Create a credential error of the given kind.
    pub fn credential(kind: CredentialErrorKind, message: impl Into<String>) -> Self {
        Self::Credential {
            kind,
            message: message.into(),
        }
    }

    pub fn file_not_found(message: impl Into<String>) -> Self {
        Self::credential(CredentialErrorKind::FileNotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::credential(CredentialErrorKind::Malformed, message)
    }

    pub fn not_signed_in(message: impl Into<String>) -> Self {
        Self::credential(CredentialErrorKind::NotSignedIn, message)
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::credential(CredentialErrorKind::RefreshFailed, message)
    }

    /// Create an unsupported auth mode error.
    pub fn unsupported_mode(operation: impl Into<String>, mode: impl Into<String>) -> Self {
        Self::UnsupportedMode {
            operation: operation.into(),
            mode: mode.into(),
        }
    }

    /// Create a remote unavailable error.
    pub fn remote_unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Create a connection not found error.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Credential sub-kind, if this is a credential error.
    pub fn credential_kind(&self) -> Option<CredentialErrorKind> {
        match self {
            Self::Credential { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Credential { kind, .. } => Some(match kind {
                CredentialErrorKind::FileNotFound => {
                    "Check the service account key path in the connection settings"
                }
                CredentialErrorKind::Malformed => {
                    "Download a new JSON key for the service account and update the connection"
                }
                CredentialErrorKind::NotSignedIn => "Sign in with Google again",
                CredentialErrorKind::RefreshFailed => {
                    "Check network connectivity and try again; signing in again is not required"
                }
            }),
            Self::RemoteUnavailable { .. } => {
                Some("The service could not be reached. Try again in a moment")
            }
            Self::Configuration { .. } => {
                Some(
                    "Set the OAuth client id and secret, or point GOOGLE_APPLICATION_CREDENTIALS at a credentials file",
                )
            }
            _ => None,
        }
    }

    /// Check if this error is retryable without re-entering credentials.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. }
                | Self::Credential {
                    kind: CredentialErrorKind::RefreshFailed,
                    ..
                }
        )
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::storage(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::storage(format!("Invalid JSON: {}", err))
    }
}

impl From<crate::models::ConnectionConfigError> for RegistryError {
    fn from(err: crate::models::ConnectionConfigError) -> Self {
        RegistryError::invalid_input(err.to_string())
    }
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
