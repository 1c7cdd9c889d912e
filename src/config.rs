//! Configuration handling for the explorer.
//!
//! This module provides configuration management via CLI arguments and environment
//! variables, and the [`RegistryOptions`] snapshot handed to the client registry.

use crate::auth::oauth::OAuthClientConfig;
use crate::error::{RegistryError, RegistryResult};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SETTINGS_PATH: &str = "connections.json";
pub const DEFAULT_TOKEN_REFRESH_SKEW_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com";
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Base URLs of the remote services reached by the REST handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub firestore: Url,
    pub identity: Url,
    pub storage: Url,
}

impl ServiceEndpoints {
    /// Production Google endpoints.
    pub fn google() -> Self {
        Self {
            firestore: Url::parse(DEFAULT_FIRESTORE_ENDPOINT).expect("valid firestore endpoint"),
            identity: Url::parse(DEFAULT_IDENTITY_ENDPOINT).expect("valid identity endpoint"),
            storage: Url::parse(DEFAULT_STORAGE_ENDPOINT).expect("valid storage endpoint"),
        }
    }

    /// Point the Firestore endpoint at a local emulator (`host:port`).
    pub fn with_firestore_emulator(mut self, host: &str) -> RegistryResult<Self> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(RegistryError::configuration("Emulator host cannot be empty"));
        }
        self.firestore = Url::parse(&format!("http://{}", host)).map_err(|e| {
            RegistryError::configuration(format!("Invalid emulator host '{}': {}", host, e))
        })?;
        Ok(self)
    }

    /// `.../v1/projects/{project}/databases/{database}/documents`
    pub fn documents_url(&self, project_id: &str, database_id: &str) -> RegistryResult<Url> {
        join_segments(
            &self.firestore,
            &["v1", "projects", project_id, "databases", database_id, "documents"],
        )
    }

    /// `.../v1/projects/{project}` on the identity toolkit API.
    pub fn identity_url(&self, project_id: &str) -> RegistryResult<Url> {
        join_segments(&self.identity, &["v1", "projects", project_id])
    }

    /// `.../storage/v1/b` bucket listing root.
    pub fn storage_buckets_url(&self) -> RegistryResult<Url> {
        join_segments(&self.storage, &["storage", "v1", "b"])
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self::google()
    }
}

/// Replace the path of `base` with the percent-encoded `segments`.
fn join_segments(base: &Url, segments: &[&str]) -> RegistryResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RegistryError::configuration(format!("Endpoint '{}' cannot be a base", base)))?
        .clear()
        .extend(segments);
    Ok(url)
}

/// Location `gcloud auth application-default login` writes to.
fn well_known_adc_path() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        PathBuf::from(std::env::var_os("APPDATA")?)
    } else {
        PathBuf::from(std::env::var_os("HOME")?).join(".config")
    };
    Some(
        base.join("gcloud")
            .join("application_default_credentials.json"),
    )
}

/// Configuration snapshot the registry is constructed with.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Directory relative service account key paths are resolved against.
    pub service_account_root: Option<PathBuf>,
    /// Explicit application default credentials file; the gcloud well-known file otherwise.
    pub adc_credentials: Option<PathBuf>,
    /// Cached OAuth access tokens are refreshed this many seconds before expiry.
    pub token_refresh_skew_secs: u64,
    /// Timeout for token endpoint and REST requests.
    pub http_timeout_secs: u64,
    pub endpoints: ServiceEndpoints,
}

impl RegistryOptions {
    /// Resolve a service account key path.
    ///
    /// Absolute paths are used as-is. Relative paths are joined to
    /// `service_account_root` when set, otherwise left relative to the working directory.
    pub fn resolve_key_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.service_account_root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Application default credentials file to use, if one can be located.
    pub fn adc_credentials_path(&self) -> Option<PathBuf> {
        self.adc_credentials.clone().or_else(well_known_adc_path)
    }

    pub fn token_refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_skew_secs.min(u32::MAX as u64) as i64)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            service_account_root: None,
            adc_credentials: None,
            token_refresh_skew_secs: DEFAULT_TOKEN_REFRESH_SKEW_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            endpoints: ServiceEndpoints::google(),
        }
    }
}

/// Auth mode accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthModeArg {
    /// Application default credentials
    Adc,
    /// Service account JSON key file
    ServiceAccount,
    /// Google sign-in
    Oauth,
}

/// Command to run against the configured connections.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List configured connections
    List,
    /// Add a connection to the settings file
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// Remote project id
        #[arg(long)]
        project: String,
        /// Database id, "(default)" when omitted
        #[arg(long)]
        database: Option<String>,
        /// Authentication mode
        #[arg(long, value_enum, default_value = "adc")]
        auth: AuthModeArg,
        /// Service account key path (required with --auth service-account)
        #[arg(long)]
        service_account_path: Option<PathBuf>,
    },
    /// Remove a connection and dispose its clients
    Remove { id: String },
    /// Resolve the data client of a connection
    Resolve { id: String },
    /// Print a bearer token for an OAuth connection
    Token { id: String },
    /// Resolve every connection and report failures
    Check,
}

/// Configuration for the explorer CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "firestore-explorer",
    about = "Browse Firestore projects through service-account, ADC or Google OAuth connections",
    version,
    author
)]
pub struct Config {
    /// Connection settings file
    #[arg(
        long,
        default_value = DEFAULT_SETTINGS_PATH,
        env = "FIRESTORE_EXPLORER_SETTINGS"
    )]
    pub settings: PathBuf,

    /// Keep the OAuth refresh token in this file instead of the OS keychain
    #[arg(long, env = "FIRESTORE_EXPLORER_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Application default credentials file (service account or authorized user JSON)
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub adc_credentials: Option<PathBuf>,

    /// Directory relative service account key paths are resolved against
    #[arg(long, env = "FIRESTORE_EXPLORER_SERVICE_ACCOUNT_ROOT")]
    pub service_account_root: Option<PathBuf>,

    /// Refresh OAuth access tokens this many seconds before they expire
    #[arg(
        long,
        default_value_t = DEFAULT_TOKEN_REFRESH_SKEW_SECS,
        env = "FIRESTORE_EXPLORER_TOKEN_REFRESH_SKEW"
    )]
    pub token_refresh_skew: u64,

    /// HTTP request timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_TIMEOUT_SECS,
        env = "FIRESTORE_EXPLORER_HTTP_TIMEOUT"
    )]
    pub http_timeout: u64,

    /// Firestore emulator host (host:port)
    #[arg(long, env = "FIRESTORE_EMULATOR_HOST")]
    pub emulator_host: Option<String>,

    /// OAuth client id, overrides the one baked in at build time
    #[arg(long, env = "FIRESTORE_EXPLORER_OAUTH_CLIENT_ID")]
    pub oauth_client_id: Option<String>,

    /// OAuth client secret, overrides the one baked in at build time
    #[arg(long, env = "FIRESTORE_EXPLORER_OAUTH_CLIENT_SECRET", hide_env_values = true)]
    pub oauth_client_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "FIRESTORE_EXPLORER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "FIRESTORE_EXPLORER_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            settings: PathBuf::from(DEFAULT_SETTINGS_PATH),
            secrets_file: None,
            adc_credentials: None,
            service_account_root: None,
            token_refresh_skew: DEFAULT_TOKEN_REFRESH_SKEW_SECS,
            http_timeout: DEFAULT_HTTP_TIMEOUT_SECS,
            emulator_host: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            log_level: "warn".to_string(),
            json_logs: false,
            command: Command::List,
        }
    }

    /// Build the registry configuration snapshot.
    pub fn registry_options(&self) -> RegistryResult<RegistryOptions> {
        let mut endpoints = ServiceEndpoints::google();
        if let Some(host) = &self.emulator_host {
            endpoints = endpoints.with_firestore_emulator(host)?;
        }
        Ok(RegistryOptions {
            service_account_root: self.service_account_root.clone(),
            adc_credentials: self.adc_credentials.clone(),
            token_refresh_skew_secs: self.token_refresh_skew,
            http_timeout_secs: self.http_timeout,
            endpoints,
        })
    }

    /// OAuth client configuration: runtime overrides first, then build-time values.
    pub fn oauth_client_config(&self) -> Option<OAuthClientConfig> {
        match (&self.oauth_client_id, &self.oauth_client_secret) {
            (Some(id), Some(secret)) => Some(OAuthClientConfig::new(id, secret)),
            _ => OAuthClientConfig::from_build_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
