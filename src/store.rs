//! JSON settings store for connection records.
//!
//! The file holds `{ "connections": [ ... ] }` with camelCase records. Writes go to a
//! sibling temp file first and are renamed into place.

use crate::error::{RegistryError, RegistryResult};
use crate::models::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    connections: Vec<Connection>,
}

/// Connection records backed by one JSON file.
#[derive(Debug)]
pub struct ConnectionStore {
    path: PathBuf,
    connections: RwLock<Vec<Connection>>,
}

impl ConnectionStore {
    /// Load the store from `path`; a missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let path = path.into();
        let connections = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => {
                let file: SettingsFile = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::storage(format!(
                        "Settings file {} is invalid: {}",
                        path.display(),
                        e
                    ))
                })?;
                file.connections
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), count = connections.len(), "Settings loaded");
        Ok(Self {
            path,
            connections: RwLock::new(connections),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Connection> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::connection_not_found(id))
    }

    /// Persist a new connection. Fails if the id is already taken.
    pub async fn add(&self, connection: Connection) -> RegistryResult<()> {
        let mut connections = self.connections.write().await;
        if connections.iter().any(|c| c.id == connection.id) {
            return Err(RegistryError::invalid_input(format!(
                "Connection '{}' already exists",
                connection.id
            )));
        }
        let mut updated = connections.clone();
        updated.push(connection);
        self.persist(&updated).await?;
        *connections = updated;
        Ok(())
    }

    /// Replace the record with the same id.
    pub async fn update(&self, connection: Connection) -> RegistryResult<()> {
        let mut connections = self.connections.write().await;
        let index = connections
            .iter()
            .position(|c| c.id == connection.id)
            .ok_or_else(|| RegistryError::connection_not_found(&connection.id))?;
        let mut updated = connections.clone();
        updated[index] = connection;
        self.persist(&updated).await?;
        *connections = updated;
        Ok(())
    }

    /// Delete a record, returning it.
    pub async fn remove(&self, id: &str) -> RegistryResult<Connection> {
        let mut connections = self.connections.write().await;
        let index = connections
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| RegistryError::connection_not_found(id))?;
        let mut updated = connections.clone();
        let removed = updated.remove(index);
        self.persist(&updated).await?;
        *connections = updated;
        Ok(removed)
    }

    async fn persist(&self, connections: &[Connection]) -> RegistryResult<()> {
        let file = SettingsFile {
            connections: connections.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), count = connections.len(), "Settings saved");
        Ok(())
    }
}
