//! Credential resolution for admin-privileged clients.
//!
//! Service account keys are read lazily from disk; application default credentials
//! come from the environment and involve no file I/O here.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Parsed service account JSON key.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse and validate the contents of a key file.
    pub fn from_slice(bytes: &[u8]) -> RegistryResult<Self> {
        let key: ServiceAccountKey = serde_json::from_slice(bytes).map_err(|e| {
            RegistryError::malformed(format!("Not a service account key: {}", e))
        })?;

        if key.key_type != "service_account" {
            return Err(RegistryError::malformed(format!(
                "Unexpected key type '{}', expected 'service_account'",
                key.key_type
            )));
        }
        if key.private_key.trim().is_empty() {
            return Err(RegistryError::malformed("Key has an empty private_key"));
        }
        if key.client_email.trim().is_empty() {
            return Err(RegistryError::malformed("Key has an empty client_email"));
        }
        Ok(key)
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .finish_non_exhaustive()
    }
}

/// Credential an admin client is constructed with.
#[derive(Debug, Clone)]
pub enum Credential {
    ServiceAccount(Arc<ServiceAccountKey>),
    /// Ambient application default credentials.
    ApplicationDefault,
}

impl Credential {
    pub fn label(&self) -> &'static str {
        match self {
            Credential::ServiceAccount(_) => "service-account",
            Credential::ApplicationDefault => "application-default",
        }
    }

    pub fn client_email(&self) -> Option<&str> {
        match self {
            Credential::ServiceAccount(key) => Some(&key.client_email),
            Credential::ApplicationDefault => None,
        }
    }
}

/// Source of service account key bytes.
#[async_trait]
pub trait KeyLoader: Send + Sync {
    async fn read_key(&self, path: &Path) -> RegistryResult<Vec<u8>>;
}

/// Reads key files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsKeyLoader;

#[async_trait]
impl KeyLoader for FsKeyLoader {
    async fn read_key(&self, path: &Path) -> RegistryResult<Vec<u8>> {
        debug!(path = %path.display(), "Reading service account key");
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RegistryError::file_not_found(
                format!("Service account key not found: {}", path.display()),
            )),
            Err(e) => Err(RegistryError::file_not_found(format!(
                "Service account key unreadable: {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Load and parse the service account key at `path`.
pub async fn load_service_account_key(
    loader: &dyn KeyLoader,
    path: &Path,
) -> RegistryResult<ServiceAccountKey> {
    let bytes = loader.read_key(path).await?;
    ServiceAccountKey::from_slice(&bytes)
}
