//! Firestore Explorer connection layer.
//!
//! Maps user-declared connections (project, database, auth mode) to cached backend
//! clients. Service account and ambient-credential connections get privileged admin
//! clients; Google sign-in connections get a delegated OAuth credential shared by one
//! installation-wide identity.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod secrets;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{CredentialErrorKind, RegistryError, RegistryResult};
pub use registry::{ConnectionClientRegistry, DisposeReport, ResolvedAuth};
pub use service::ConnectionService;
