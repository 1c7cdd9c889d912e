//! Authentication for backend clients.
//!
//! - [`credential`]: service account keys and application default credentials
//! - [`oauth`]: delegated Google OAuth credentials with cached access tokens
//! - [`token_source`]: bearer tokens for admin credentials

pub mod credential;
pub mod oauth;
pub mod token_source;

pub use credential::{Credential, FsKeyLoader, KeyLoader, ServiceAccountKey};
pub use oauth::{
    AccessToken, DelegatedCredential, HttpTokenEndpoint, OAuthClientConfig, TokenEndpoint,
    TokenResponse,
};
pub use token_source::AdminTokenSource;
