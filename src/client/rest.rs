//! REST-backed client handles.
//!
//! Construction performs no network I/O: handles carry the resolved endpoint URLs, a
//! shared HTTP client and a token source for the credential they authenticate with.
//! Shutdown marks the handle closed so later use fails instead of silently issuing
//! requests.

use crate::auth::{AdminTokenSource, Credential, DelegatedCredential, TokenEndpoint};
use crate::client::{AdminClient, AdminHandle, ClientFactory, DataClient, DataHandle};
use crate::config::{RegistryOptions, ServiceEndpoints};
use crate::error::{RegistryError, RegistryResult};
use crate::models::DatabaseTarget;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use url::Url;

/// Builds REST handles against the configured service endpoints.
#[derive(Clone)]
pub struct RestClientFactory {
    http: reqwest::Client,
    endpoints: ServiceEndpoints,
    token_endpoint: Arc<dyn TokenEndpoint>,
    adc_path: Option<PathBuf>,
    refresh_skew: chrono::Duration,
}

impl RestClientFactory {
    pub fn new(
        options: &RegistryOptions,
        token_endpoint: Arc<dyn TokenEndpoint>,
    ) -> RegistryResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.http_timeout())
            .build()
            .map_err(|e| {
                RegistryError::remote_unavailable(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            endpoints: options.endpoints.clone(),
            token_endpoint,
            adc_path: options.adc_credentials_path(),
            refresh_skew: options.token_refresh_skew(),
        })
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }
}

impl std::fmt::Debug for RestClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClientFactory")
            .field("endpoints", &self.endpoints)
            .field("adc_path", &self.adc_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientFactory for RestClientFactory {
    async fn create_admin_client(
        &self,
        project_id: &str,
        credential: Credential,
    ) -> RegistryResult<AdminHandle> {
        let identity_url = self.endpoints.identity_url(project_id)?;
        let storage_url = self.endpoints.storage_buckets_url()?;
        debug!(
            project_id = %project_id,
            credential = credential.label(),
            "Creating admin client"
        );
        let tokens = AdminTokenSource::new(
            credential,
            self.adc_path.clone(),
            self.token_endpoint.clone(),
            self.refresh_skew,
        );
        Ok(Arc::new(RestAdminClient {
            project_id: project_id.to_string(),
            tokens: Arc::new(tokens),
            identity_url,
            storage_url,
            http: self.http.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_data_client(
        &self,
        admin: &AdminHandle,
        database: &DatabaseTarget,
    ) -> RegistryResult<DataHandle> {
        let documents_url = self
            .endpoints
            .documents_url(admin.project_id(), database.as_str())?;
        debug!(
            project_id = %admin.project_id(),
            database = %database,
            "Creating data client from admin client"
        );
        Ok(Arc::new(RestDataClient {
            project_id: admin.project_id().to_string(),
            database: database.clone(),
            documents_url,
            auth: DataAuth::Admin(admin.clone()),
            http: self.http.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_delegated_data_client(
        &self,
        credential: Arc<DelegatedCredential>,
        project_id: &str,
        database: &DatabaseTarget,
    ) -> RegistryResult<DataHandle> {
        let documents_url = self.endpoints.documents_url(project_id, database.as_str())?;
        debug!(
            project_id = %project_id,
            database = %database,
            "Creating delegated data client"
        );
        Ok(Arc::new(RestDataClient {
            project_id: project_id.to_string(),
            database: database.clone(),
            documents_url,
            auth: DataAuth::Delegated(credential),
            http: self.http.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Admin handle for the identity and storage REST APIs.
#[derive(Debug)]
pub struct RestAdminClient {
    project_id: String,
    tokens: Arc<AdminTokenSource>,
    identity_url: Url,
    storage_url: Url,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl RestAdminClient {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AdminClient for RestAdminClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn credential(&self) -> &Credential {
        self.tokens.credential()
    }

    fn identity_url(&self) -> &Url {
        &self.identity_url
    }

    fn storage_url(&self) -> &Url {
        &self.storage_url
    }

    async fn authorize(&self, request: RequestBuilder) -> RegistryResult<RequestBuilder> {
        ensure_open(&self.closed)?;
        self.tokens.authorize(request).await
    }

    async fn request(&self, method: Method, url: Url) -> RegistryResult<RequestBuilder> {
        ensure_open(&self.closed)?;
        self.tokens.authorize(self.http.request(method, url)).await
    }

    async fn shutdown(&self) -> RegistryResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(project_id = %self.project_id, "Admin client shut down");
        }
        Ok(())
    }
}

/// How a data client authenticates its requests.
#[derive(Debug, Clone)]
pub enum DataAuth {
    Admin(AdminHandle),
    Delegated(Arc<DelegatedCredential>),
}

/// Firestore document client for one database.
#[derive(Debug)]
pub struct RestDataClient {
    project_id: String,
    database: DatabaseTarget,
    documents_url: Url,
    auth: DataAuth,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl RestDataClient {
    pub fn auth(&self) -> &DataAuth {
        &self.auth
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DataClient for RestDataClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn database_id(&self) -> &DatabaseTarget {
        &self.database
    }

    fn is_delegated(&self) -> bool {
        matches!(self.auth, DataAuth::Delegated(_))
    }

    fn documents_url(&self) -> &Url {
        &self.documents_url
    }

    async fn request(&self, method: Method, path: &str) -> RegistryResult<RequestBuilder> {
        ensure_open(&self.closed)?;
        let request = self.http.request(method, self.document_url(path)?);
        match &self.auth {
            DataAuth::Delegated(credential) => credential.authorize(request).await,
            DataAuth::Admin(admin) => admin.authorize(request).await,
        }
    }

    async fn shutdown(&self) -> RegistryResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                project_id = %self.project_id,
                database = %self.database,
                "Data client shut down"
            );
        }
        Ok(())
    }
}

fn ensure_open(closed: &AtomicBool) -> RegistryResult<()> {
    if closed.load(Ordering::Acquire) {
        return Err(RegistryError::remote_unavailable(
            "Client was disposed; resolve the connection again",
        ));
    }
    Ok(())
}
