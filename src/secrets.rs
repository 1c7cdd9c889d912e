//! Secret storage for the installation-wide OAuth refresh token.
//!
//! Secrets are kept apart from connection records. The registry only reads from the
//! store; the sign-in flow is the only writer.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use keyring::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Key the refresh token is stored under. One Google identity per installation.
pub const REFRESH_TOKEN_KEY: &str = "firestore-explorer.oauth.refreshToken";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> RegistryResult<()>;
    async fn delete(&self, key: &str) -> RegistryResult<()>;
}

/// Process-local store, used in tests and for ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_token(token: impl Into<String>) -> Self {
        let mut values = HashMap::new();
        values.insert(REFRESH_TOKEN_KEY.to_string(), token.into());
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> RegistryResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> RegistryResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Keychain service name secrets are filed under.
pub const KEYCHAIN_SERVICE: &str = "firestore-explorer";

/// Platform keychain store (macOS Keychain, Windows Credential Manager, Linux kernel
/// keyring). Each secret key is one keychain entry under [`KEYCHAIN_SERVICE`].
pub struct KeyringSecretStore {
    service: String,
    /// Entries are reused so every access to a key goes through the same credential.
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self::with_service(KEYCHAIN_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, key: &str) -> RegistryResult<Arc<Entry>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            return Ok(entry.clone());
        }
        let entry = Arc::new(Entry::new(&self.service, key).map_err(|e| {
            RegistryError::storage(format!("Failed to open keychain entry '{}': {}", key, e))
        })?);
        entries.insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    /// Run a blocking keychain call off the async runtime.
    async fn blocking<T, F>(&self, key: &str, call: F) -> RegistryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let entry = self.entry(key).await?;
        tokio::task::spawn_blocking(move || call(entry.as_ref()))
            .await
            .map_err(|e| RegistryError::storage(format!("Keychain task failed: {}", e)))?
            .map_err(|e| {
                warn!(key = %key, error = %e, "Keychain access failed");
                RegistryError::storage(format!("Failed to access keychain: {}", e))
            })
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyringSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringSecretStore")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        self.blocking(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> RegistryResult<()> {
        let value = value.to_string();
        self.blocking(key, move |entry| entry.set_password(&value))
            .await?;
        info!(key = %key, "Secret stored in keychain");
        Ok(())
    }

    async fn delete(&self, key: &str) -> RegistryResult<()> {
        self.blocking(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await?;
        debug!(key = %key, "Secret deleted from keychain");
        Ok(())
    }
}

/// JSON object on disk, for hosts without a usable keychain.
///
/// The file is only ever created with owner-only permissions on unix.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> RegistryResult<HashMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RegistryError::storage(format!(
                    "Secret store {} is corrupt: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling file created owner-only, then rename it over the store.
    async fn write_all(&self, values: &HashMap<String, String>) -> RegistryResult<()> {
        let json = serde_json::to_vec_pretty(values)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> RegistryResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values).await?;
        debug!(key = %key, "Secret stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> RegistryResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        if values.remove(key).is_some() {
            self.write_all(&values).await?;
            debug!(key = %key, "Secret deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySecretStore::new();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
        store.set(REFRESH_TOKEN_KEY, "rt").await.unwrap();
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("rt")
        );
        store.delete(REFRESH_TOKEN_KEY).await.unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keyring_store_round_trip() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeyringSecretStore::with_service("firestore-explorer-test");

        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
        store.set(REFRESH_TOKEN_KEY, "rt-keychain").await.unwrap();
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("rt-keychain")
        );
        store.delete(REFRESH_TOKEN_KEY).await.unwrap();
        store.delete(REFRESH_TOKEN_KEY).await.unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.json");

        FileSecretStore::new(&path)
            .set(REFRESH_TOKEN_KEY, "rt-1")
            .await
            .unwrap();

        let reopened = FileSecretStore::new(&path);
        assert_eq!(
            reopened.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("rt-1")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_replaces_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileSecretStore::new(&path);
        store.set(REFRESH_TOKEN_KEY, "rt-2").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("rt-2")
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileSecretStore::new(&path)
            .get(REFRESH_TOKEN_KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Storage { .. }));
    }
}
