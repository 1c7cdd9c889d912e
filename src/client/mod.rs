//! Backend client handles and the factory that builds them.
//!
//! The registry never constructs clients itself; it asks a [`ClientFactory`]. The
//! default factory is [`RestClientFactory`], which produces REST-backed handles.

pub mod rest;

use crate::auth::{Credential, DelegatedCredential};
use crate::error::{RegistryError, RegistryResult};
use crate::models::DatabaseTarget;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;
use url::Url;

pub use rest::{RestAdminClient, RestClientFactory, RestDataClient};

/// Privileged client authenticated by a service account key or ambient credentials.
#[async_trait]
pub trait AdminClient: Send + Sync + std::fmt::Debug {
    fn project_id(&self) -> &str;

    fn credential(&self) -> &Credential;

    /// Identity Toolkit base URL for the project.
    fn identity_url(&self) -> &Url;

    /// Cloud Storage buckets URL.
    fn storage_url(&self) -> &Url;

    /// Attach a bearer token minted from this client's credential.
    ///
    /// Fails once the client was shut down.
    async fn authorize(&self, request: RequestBuilder) -> RegistryResult<RequestBuilder>;

    /// Authorized request against `url`.
    async fn request(&self, method: Method, url: Url) -> RegistryResult<RequestBuilder>;

    /// Graceful shutdown hook, called once when the client is disposed.
    async fn shutdown(&self) -> RegistryResult<()>;
}

/// Client scoped to document reads and writes against one database.
#[async_trait]
pub trait DataClient: Send + Sync + std::fmt::Debug {
    fn project_id(&self) -> &str;

    fn database_id(&self) -> &DatabaseTarget;

    /// True if authenticated through the signed-in user rather than an admin credential.
    fn is_delegated(&self) -> bool;

    /// `.../databases/{database}/documents`
    fn documents_url(&self) -> &Url;

    /// URL of the document or collection at `path` (slash separated, relative to the root).
    fn document_url(&self, path: &str) -> RegistryResult<Url> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(RegistryError::invalid_input("Document path cannot be empty"));
        }
        let mut url = self.documents_url().clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::invalid_input("Documents URL cannot be a base"))?
            .extend(segments);
        Ok(url)
    }

    /// Authorized request for the document or collection at `path`.
    ///
    /// Admin-backed clients use the admin credential's token, delegated clients the
    /// signed-in user's. Fails once the client was shut down.
    async fn request(&self, method: Method, path: &str) -> RegistryResult<RequestBuilder>;

    /// Graceful shutdown hook, called once when the client is disposed.
    async fn shutdown(&self) -> RegistryResult<()>;
}

pub type AdminHandle = Arc<dyn AdminClient>;
pub type DataHandle = Arc<dyn DataClient>;

/// Constructs backend clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create_admin_client(
        &self,
        project_id: &str,
        credential: Credential,
    ) -> RegistryResult<AdminHandle>;

    /// Derive a data client bound to `database` from an admin client.
    async fn create_data_client(
        &self,
        admin: &AdminHandle,
        database: &DatabaseTarget,
    ) -> RegistryResult<DataHandle>;

    /// Build a data client authenticated through a delegated OAuth credential.
    async fn create_delegated_data_client(
        &self,
        credential: Arc<DelegatedCredential>,
        project_id: &str,
        database: &DatabaseTarget,
    ) -> RegistryResult<DataHandle>;
}
