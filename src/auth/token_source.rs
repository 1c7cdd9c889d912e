//! Bearer tokens for admin credentials.
//!
//! Service account keys sign an RS256 assertion that the token endpoint exchanges for
//! an access token. Application default credentials are located lazily on the first
//! token request: either a service account key or a gcloud authorized-user file.
//! Metadata-server credentials are not supported.

use crate::auth::credential::{Credential, ServiceAccountKey};
use crate::auth::oauth::{AccessToken, GOOGLE_TOKEN_ENDPOINT, OAuthClientConfig, TokenEndpoint};
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Scopes requested for admin access tokens.
pub const ADMIN_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/datastore",
];

const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Sign the JWT-bearer assertion for `key`.
pub fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> RegistryResult<String> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
        RegistryError::malformed(format!("Service account private key is not RSA PEM: {}", e))
    })?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: ADMIN_SCOPES.join(" "),
        aud: token_uri(key),
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| RegistryError::malformed(format!("Failed to sign assertion: {}", e)))
}

fn token_uri(key: &ServiceAccountKey) -> &str {
    key.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_ENDPOINT)
}

#[derive(Deserialize)]
struct AuthorizedUserFile {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct CredentialFileType {
    #[serde(rename = "type")]
    kind: String,
}

/// Where admin access tokens come from once the credential is resolved.
#[derive(Clone)]
enum GrantSource {
    ServiceAccount(Arc<ServiceAccountKey>),
    AuthorizedUser {
        config: Arc<OAuthClientConfig>,
        refresh_token: String,
    },
}

#[derive(Default)]
struct TokenState {
    source: Option<GrantSource>,
    token: Option<AccessToken>,
}

/// Cached access token for one admin credential.
pub struct AdminTokenSource {
    credential: Credential,
    adc_path: Option<PathBuf>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_skew: chrono::Duration,
    /// Held across the token request so concurrent callers share one exchange.
    state: Mutex<TokenState>,
}

impl AdminTokenSource {
    pub fn new(
        credential: Credential,
        adc_path: Option<PathBuf>,
        endpoint: Arc<dyn TokenEndpoint>,
        refresh_skew: chrono::Duration,
    ) -> Self {
        Self {
            credential,
            adc_path,
            endpoint,
            refresh_skew,
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Return a valid access token, exchanging a new one when missing or stale.
    pub async fn access_token(&self) -> RegistryResult<String> {
        let mut state = self.state.lock().await;

        if let Some(token) = state.token.as_ref() {
            if !token.is_stale(Utc::now(), self.refresh_skew) {
                return Ok(token.token.clone());
            }
        }

        let source = match &state.source {
            Some(source) => source.clone(),
            None => {
                let source = self.resolve_source().await?;
                state.source = Some(source.clone());
                source
            }
        };

        let response = match &source {
            GrantSource::ServiceAccount(key) => {
                let assertion = sign_assertion(key, Utc::now())?;
                self.endpoint
                    .exchange_assertion(token_uri(key), &assertion)
                    .await
            }
            GrantSource::AuthorizedUser {
                config,
                refresh_token,
            } => self.endpoint.refresh(config, refresh_token).await,
        };
        let response = response.inspect_err(|e| {
            warn!(credential = self.credential.label(), error = %e, "Admin token request failed");
        })?;

        let token = AccessToken::from_response(&response, Utc::now());
        info!(
            credential = self.credential.label(),
            expires_at = ?token.expires_at,
            "Admin access token issued"
        );
        let value = token.token.clone();
        state.token = Some(token);
        Ok(value)
    }

    /// Drop the cached access token so the next call exchanges a new one.
    pub async fn invalidate(&self) {
        self.state.lock().await.token.take();
    }

    /// Attach `Authorization: Bearer <token>` to a REST request.
    pub async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> RegistryResult<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn resolve_source(&self) -> RegistryResult<GrantSource> {
        match &self.credential {
            Credential::ServiceAccount(key) => Ok(GrantSource::ServiceAccount(key.clone())),
            Credential::ApplicationDefault => self.load_application_default().await,
        }
    }

    async fn load_application_default(&self) -> RegistryResult<GrantSource> {
        let path = self.adc_path.as_ref().ok_or_else(|| {
            RegistryError::configuration(
                "No application default credentials file could be located",
            )
        })?;

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::configuration(format!(
                    "No application default credentials at {}; run `gcloud auth application-default login` or set GOOGLE_APPLICATION_CREDENTIALS (metadata server credentials are not supported)",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RegistryError::file_not_found(format!(
                    "Application default credentials unreadable: {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        debug!(path = %path.display(), "Application default credentials loaded");

        let file_type: CredentialFileType = serde_json::from_slice(&bytes).map_err(|e| {
            RegistryError::malformed(format!("Invalid credentials file {}: {}", path.display(), e))
        })?;
        match file_type.kind.as_str() {
            "service_account" => Ok(GrantSource::ServiceAccount(Arc::new(
                ServiceAccountKey::from_slice(&bytes)?,
            ))),
            "authorized_user" => {
                let user: AuthorizedUserFile = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::malformed(format!("Invalid authorized user file: {}", e))
                })?;
                let mut config = OAuthClientConfig::new(user.client_id, user.client_secret);
                if let Some(uri) = user.token_uri {
                    config = config.with_token_endpoint(uri);
                }
                Ok(GrantSource::AuthorizedUser {
                    config: Arc::new(config),
                    refresh_token: user.refresh_token,
                })
            }
            other => Err(RegistryError::malformed(format!(
                "Unsupported credentials type '{}' in {}",
                other,
                path.display()
            ))),
        }
    }
}

impl std::fmt::Debug for AdminTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenSource")
            .field("credential", &self.credential.label())
            .field("adc_path", &self.adc_path)
            .finish_non_exhaustive()
    }
}
