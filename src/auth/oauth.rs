//! Delegated Google OAuth credentials.
//!
//! A [`DelegatedCredential`] wraps the installation-wide refresh token and caches the
//! short-lived access token minted from it. Refreshes are single-flight: concurrent
//! callers wait on the same mutex and share the token the first one obtained.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested at sign-in: Firestore data plus basic identity.
pub const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/datastore",
    "https://www.googleapis.com/auth/cloud-platform",
    "openid",
    "email",
    "profile",
];

/// OAuth client registration, fixed at build time.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    client_secret: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
}

impl OAuthClientConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            scopes: OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Client registration baked in at compile time, if the build provided one.
    pub fn from_build_env() -> Option<Self> {
        let id = option_env!("FIRESTORE_EXPLORER_OAUTH_CLIENT_ID")?;
        let secret = option_env!("FIRESTORE_EXPLORER_OAUTH_CLIENT_SECRET")?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(id, secret))
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// URL the sign-in collaborator opens in the browser.
    ///
    /// Requests offline access so the response carries a refresh token.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> RegistryResult<Url> {
        let mut url = Url::parse(&self.auth_endpoint).map_err(|e| {
            RegistryError::configuration(format!("Invalid authorization endpoint: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url)
    }
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response for a refresh-token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Access token plus its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn from_response(response: &TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            token: response.access_token.clone(),
            expires_at: response
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs)),
        }
    }

    /// True when the token expires within `skew` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + skew >= expires_at,
            None => false,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Grant type of a signed service account assertion.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Exchanges long-lived grants for access tokens.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Refresh-token grant.
    async fn refresh(
        &self,
        config: &OAuthClientConfig,
        refresh_token: &str,
    ) -> RegistryResult<TokenResponse>;

    /// JWT-bearer grant with a signed service account assertion.
    async fn exchange_assertion(
        &self,
        token_uri: &str,
        assertion: &str,
    ) -> RegistryResult<TokenResponse>;
}

/// Token endpoint grants over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(timeout: Duration) -> RegistryResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RegistryError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl HttpTokenEndpoint {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> RegistryResult<TokenResponse> {
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| RegistryError::refresh_failed(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RegistryError::refresh_failed(format!("Failed to read token response: {}", e))
        })?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                let detail = match &err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error.clone(),
                };
                // Revoked or expired grant: only new credentials help.
                if err.error == "invalid_grant" {
                    return Err(RegistryError::not_signed_in(format!(
                        "Grant was rejected ({})",
                        detail
                    )));
                }
                return Err(RegistryError::refresh_failed(format!(
                    "Token endpoint returned {}: {}",
                    status, detail
                )));
            }
            return Err(RegistryError::refresh_failed(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            RegistryError::refresh_failed(format!("Invalid token response: {}", e))
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(
        &self,
        config: &OAuthClientConfig,
        refresh_token: &str,
    ) -> RegistryResult<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret()),
            ("refresh_token", refresh_token),
        ];
        self.post_form(&config.token_endpoint, &form).await
    }

    async fn exchange_assertion(
        &self,
        token_uri: &str,
        assertion: &str,
    ) -> RegistryResult<TokenResponse> {
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)];
        self.post_form(token_uri, &form).await
    }
}

/// Refresh-token backed credential acting for the signed-in user.
pub struct DelegatedCredential {
    config: Arc<OAuthClientConfig>,
    refresh_token: String,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_skew: chrono::Duration,
    /// Held across the refresh request so concurrent callers share one refresh.
    cached: Mutex<Option<AccessToken>>,
}

impl DelegatedCredential {
    pub fn new(
        config: Arc<OAuthClientConfig>,
        refresh_token: impl Into<String>,
        endpoint: Arc<dyn TokenEndpoint>,
        refresh_skew: chrono::Duration,
    ) -> Self {
        Self {
            config,
            refresh_token: refresh_token.into(),
            endpoint,
            refresh_skew,
            cached: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Return a valid access token, refreshing it when missing or stale.
    pub async fn access_token(&self) -> RegistryResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if !token.is_stale(now, self.refresh_skew) {
                return Ok(token.token.clone());
            }
            debug!(expires_at = ?token.expires_at, "Access token stale, refreshing");
        }

        let response = match self.endpoint.refresh(&self.config, &self.refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Access token refresh failed");
                return Err(e);
            }
        };
        if response.refresh_token.is_some() {
            debug!("Token endpoint rotated the refresh token; keeping the stored one");
        }

        let token = AccessToken::from_response(&response, Utc::now());
        info!(expires_at = ?token.expires_at, "Access token refreshed");
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached access token so the next call refreshes.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    /// Attach `Authorization: Bearer <token>` to a REST request.
    pub async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> RegistryResult<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

impl std::fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("client_id", &self.config.client_id)
            .field("refresh_skew", &self.refresh_skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEndpoint {
        calls: AtomicUsize,
        expires_in: i64,
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn refresh(
            &self,
            _config: &OAuthClientConfig,
            refresh_token: &str,
        ) -> RegistryResult<TokenResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TokenResponse {
                access_token: format!("{}-access-{}", refresh_token, n),
                expires_in: Some(self.expires_in),
                token_type: Some("Bearer".to_string()),
                refresh_token: None,
                scope: None,
            })
        }

        async fn exchange_assertion(
            &self,
            _token_uri: &str,
            _assertion: &str,
        ) -> RegistryResult<TokenResponse> {
            Err(RegistryError::refresh_failed("not used"))
        }
    }

    struct FailingEndpoint;

    #[async_trait]
    impl TokenEndpoint for FailingEndpoint {
        async fn refresh(
            &self,
            _config: &OAuthClientConfig,
            _refresh_token: &str,
        ) -> RegistryResult<TokenResponse> {
            Err(RegistryError::refresh_failed("connection reset"))
        }

        async fn exchange_assertion(
            &self,
            _token_uri: &str,
            _assertion: &str,
        ) -> RegistryResult<TokenResponse> {
            Err(RegistryError::refresh_failed("connection reset"))
        }
    }

    fn credential(endpoint: Arc<dyn TokenEndpoint>, skew_secs: i64) -> DelegatedCredential {
        DelegatedCredential::new(
            Arc::new(OAuthClientConfig::new("client", "secret")),
            "rt",
            endpoint,
            chrono::Duration::seconds(skew_secs),
        )
    }

    #[test]
    fn test_access_token_staleness() {
        let now = Utc::now();
        let token = AccessToken {
            token: "t".to_string(),
            expires_at: Some(now + chrono::Duration::seconds(600)),
        };
        assert!(!token.is_stale(now, chrono::Duration::seconds(300)));
        assert!(token.is_stale(now, chrono::Duration::seconds(600)));

        let no_expiry = AccessToken {
            token: "t".to_string(),
            expires_at: None,
        };
        assert!(!no_expiry.is_stale(now, chrono::Duration::seconds(300)));
    }

    #[tokio::test]
    async fn test_token_cached_until_stale() {
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            expires_in: 3600,
        });
        let cred = credential(endpoint.clone(), 300);

        let first = cred.access_token().await.unwrap();
        let second = cred.access_token().await.unwrap();
        assert_eq!(first, "rt-access-1");
        assert_eq!(first, second);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_within_skew_is_refreshed() {
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            expires_in: 60,
        });
        let cred = credential(endpoint.clone(), 300);

        let first = cred.access_token().await.unwrap();
        let second = cred.access_token().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            expires_in: 3600,
        });
        let cred = Arc::new(credential(endpoint.clone(), 300));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cred = cred.clone();
                tokio::spawn(async move { cred.access_token().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "rt-access-1");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
            expires_in: 3600,
        });
        let cred = credential(endpoint.clone(), 300);

        cred.access_token().await.unwrap();
        cred.invalidate().await;
        assert_eq!(cred.access_token().await.unwrap(), "rt-access-2");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_retryable() {
        let cred = credential(Arc::new(FailingEndpoint), 300);
        let err = cred.access_token().await.unwrap_err();
        assert_eq!(err.credential_kind(), Some(CredentialErrorKind::RefreshFailed));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_authorization_url() {
        let config = OAuthClientConfig::new("my-client", "shh");
        let url = config
            .authorization_url("http://127.0.0.1:4242/callback", "xyz")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "my-client");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], "xyz");
        assert!(pairs["scope"].contains("auth/datastore"));
        assert!(!url.as_str().contains("shh"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = OAuthClientConfig::new("my-client", "super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));

        let cred = DelegatedCredential::new(
            Arc::new(config),
            "refresh-secret",
            Arc::new(FailingEndpoint),
            chrono::Duration::seconds(300),
        );
        assert!(!format!("{:?}", cred).contains("refresh-secret"));
    }
}
