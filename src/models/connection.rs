//! Connection-related data models.
//!
//! A [`Connection`] is the user-declared binding of a display name to a remote
//! project, a database within it, and the way to authenticate against it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database id sentinel meaning "the project's default database".
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// Database a connection targets within its project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DatabaseTarget {
    /// The project's default database, `(default)`.
    #[default]
    Default,
    /// A named, non-default database.
    Named(String),
}

impl DatabaseTarget {
    /// Create a database target from an optional string.
    /// `None` and `"(default)"` both select the default database; empty strings are rejected.
    pub fn from_option(database: Option<&str>) -> Result<Self, ConnectionConfigError> {
        match database.map(str::trim) {
            None => Ok(Self::Default),
            Some("") => Err(ConnectionConfigError::EmptyDatabaseId),
            Some(DEFAULT_DATABASE_ID) => Ok(Self::Default),
            Some(db) => Ok(Self::Named(db.to_string())),
        }
    }

    /// Id as used in resource names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => DEFAULT_DATABASE_ID,
            Self::Named(name) => name,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl std::fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DatabaseTarget {
    type Error = ConnectionConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_option(Some(&value))
    }
}

impl From<DatabaseTarget> for String {
    fn from(target: DatabaseTarget) -> Self {
        target.as_str().to_string()
    }
}

/// How a connection authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Application default credentials from the environment.
    Adc,
    /// Service account JSON key at the given path, resolved lazily.
    ServiceAccountPath { path: PathBuf },
    /// Installation-wide Google sign-in (refresh token lives in the secret store).
    GoogleOAuth,
}

impl AuthMode {
    pub fn kind(&self) -> AuthModeKind {
        match self {
            Self::Adc => AuthModeKind::Adc,
            Self::ServiceAccountPath { .. } => AuthModeKind::ServiceAccountPath,
            Self::GoogleOAuth => AuthModeKind::GoogleOAuth,
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::GoogleOAuth)
    }

    pub fn service_account_path(&self) -> Option<&Path> {
        match self {
            Self::ServiceAccountPath { path } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind().fmt(f)
    }
}

/// Persisted discriminant of [`AuthMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthModeKind {
    #[serde(rename = "adc")]
    Adc,
    #[serde(rename = "serviceAccountPath")]
    ServiceAccountPath,
    #[serde(rename = "googleOAuth")]
    GoogleOAuth,
}

impl AuthModeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adc => "adc",
            Self::ServiceAccountPath => "serviceAccountPath",
            Self::GoogleOAuth => "googleOAuth",
        }
    }
}

impl std::fmt::Display for AuthModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical connection to a remote project and database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConnectionRecord", into = "ConnectionRecord")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub database_id: DatabaseTarget,
    pub auth: AuthMode,
}

impl Connection {
    /// Create a new connection with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        project_id: impl Into<String>,
        database_id: DatabaseTarget,
        auth: AuthMode,
    ) -> Result<Self, ConnectionConfigError> {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            name,
            project_id,
            database_id,
            auth,
        )
    }

    /// Create a connection with an explicit id.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        project_id: impl Into<String>,
        database_id: DatabaseTarget,
        auth: AuthMode,
    ) -> Result<Self, ConnectionConfigError> {
        let id = id.into();
        let project_id = project_id.into();

        if id.is_empty() {
            return Err(ConnectionConfigError::EmptyId);
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConnectionConfigError::InvalidId(id));
        }
        if project_id.trim().is_empty() {
            return Err(ConnectionConfigError::EmptyProjectId);
        }
        if let AuthMode::ServiceAccountPath { path } = &auth {
            if path.as_os_str().is_empty() {
                return Err(ConnectionConfigError::EmptyServiceAccountPath);
            }
        }

        Ok(Self {
            id,
            name: name.into(),
            project_id,
            database_id,
            auth,
        })
    }

    /// Short description for logs and listings. Never includes secrets.
    pub fn describe(&self) -> String {
        format!(
            "{} ({}/{}, {})",
            self.name, self.project_id, self.database_id, self.auth
        )
    }
}

/// On-disk shape of a connection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRecord {
    id: String,
    name: String,
    project_id: String,
    #[serde(default)]
    database_id: Option<String>,
    auth_mode: AuthModeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_account_path: Option<PathBuf>,
}

impl TryFrom<ConnectionRecord> for Connection {
    type Error = ConnectionConfigError;

    fn try_from(record: ConnectionRecord) -> Result<Self, Self::Error> {
        let auth = match (record.auth_mode, record.service_account_path) {
            (AuthModeKind::ServiceAccountPath, Some(path)) => AuthMode::ServiceAccountPath { path },
            (AuthModeKind::ServiceAccountPath, None) => {
                return Err(ConnectionConfigError::EmptyServiceAccountPath);
            }
            (kind, Some(_)) => return Err(ConnectionConfigError::UnexpectedServiceAccountPath(kind)),
            (AuthModeKind::Adc, None) => AuthMode::Adc,
            (AuthModeKind::GoogleOAuth, None) => AuthMode::GoogleOAuth,
        };
        let database_id = DatabaseTarget::from_option(record.database_id.as_deref())?;

        Connection::with_id(record.id, record.name, record.project_id, database_id, auth)
    }
}

impl From<Connection> for ConnectionRecord {
    fn from(connection: Connection) -> Self {
        let auth_mode = connection.auth.kind();
        let service_account_path = match connection.auth {
            AuthMode::ServiceAccountPath { path } => Some(path),
            _ => None,
        };
        Self {
            id: connection.id,
            name: connection.name,
            project_id: connection.project_id,
            database_id: Some(connection.database_id.into()),
            auth_mode,
            service_account_path,
        }
    }
}

/// Errors that can occur when creating a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    /// Connection ID is empty
    #[error("Connection ID cannot be empty")]
    EmptyId,

    /// Connection ID contains invalid characters
    #[error("Connection ID contains invalid characters: {0}")]
    InvalidId(String),

    #[error("Project ID cannot be empty")]
    EmptyProjectId,

    #[error("Database ID cannot be empty; use \"(default)\" for the default database")]
    EmptyDatabaseId,

    #[error("Auth mode serviceAccountPath requires a service account path")]
    EmptyServiceAccountPath,

    #[error("A service account path is only allowed with auth mode serviceAccountPath, not {0}")]
    UnexpectedServiceAccountPath(AuthModeKind),
}
