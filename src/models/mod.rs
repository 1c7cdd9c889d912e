//! Data models for the explorer.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    AuthMode, AuthModeKind, Connection, ConnectionConfigError, DEFAULT_DATABASE_ID, DatabaseTarget,
};
