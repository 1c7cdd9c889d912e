//! Settings-side operations that must keep the registry in sync.

use crate::error::RegistryResult;
use crate::models::{AuthMode, Connection, DatabaseTarget};
use crate::registry::{ConnectionClientRegistry, DisposeReport};
use crate::store::ConnectionStore;
use std::sync::Arc;
use tracing::info;

/// User input for a new connection; the id is generated on add.
#[derive(Debug, Clone)]
pub struct ConnectionDraft {
    pub name: String,
    pub project_id: String,
    pub database_id: DatabaseTarget,
    pub auth: AuthMode,
}

/// Connection CRUD that disposes cached clients whenever a record changes.
#[derive(Debug, Clone)]
pub struct ConnectionService {
    store: Arc<ConnectionStore>,
    registry: ConnectionClientRegistry,
}

impl ConnectionService {
    pub fn new(store: Arc<ConnectionStore>, registry: ConnectionClientRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionClientRegistry {
        &self.registry
    }

    pub async fn list(&self) -> Vec<Connection> {
        self.store.list().await
    }

    pub async fn get(&self, id: &str) -> RegistryResult<Connection> {
        self.store.get(id).await
    }

    pub async fn add(&self, draft: ConnectionDraft) -> RegistryResult<Connection> {
        let connection =
            Connection::new(draft.name, draft.project_id, draft.database_id, draft.auth)?;
        self.store.add(connection.clone()).await?;
        info!(
            connection_id = %connection.id,
            auth_mode = %connection.auth,
            "Connection added"
        );
        Ok(connection)
    }

    /// Persist new settings; the next resolution builds clients from them.
    pub async fn update(&self, connection: Connection) -> RegistryResult<DisposeReport> {
        let id = connection.id.clone();
        self.store.update(connection).await?;
        let report = self.registry.dispose_connection(&id).await;
        info!(connection_id = %id, "Connection updated");
        Ok(report)
    }

    pub async fn remove(&self, id: &str) -> RegistryResult<DisposeReport> {
        self.store.remove(id).await?;
        let report = self.registry.dispose_connection(id).await;
        info!(connection_id = %id, "Connection removed");
        Ok(report)
    }
}
