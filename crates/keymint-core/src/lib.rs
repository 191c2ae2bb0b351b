//! Keymint Core Library
//!
//! This crate provides the core functionality for Keymint, including:
//! - Signing key registry (issue, verify, expire, rotate, purge)
//! - Storage (SQLite with versioned migrations)
//! - Configuration persisted as TOML

pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, RegistryConfig};
    pub use crate::domain::signing::{KeyQuery, KeyRegistry, SigningKey, WriteKeyOptions};
    pub use crate::error::{Error, Result};
    pub use crate::storage::Database;
}
