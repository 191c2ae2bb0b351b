//! Signing key domain module
//!
//! Issues short random bearer tokens scoped to a use-case string, verifies
//! them, and retires them by deactivation, expiry or rotation.
//!
//! # Architecture
//!
//! - **Entities**: `SigningKey`, `NewSigningKey`, `KeyQuery`, `WriteKeyOptions`
//! - **Repository**: `SigningKeyRepository` trait with SQLite and in-memory implementations
//! - **Registry**: `KeyRegistry` orchestrating generation, verification and housekeeping
//!
//! # Key states
//!
//! `active` is a manual flag that only moves from true to false. Expiration is
//! not stored as a state: it is computed from `expiration` at verify time.
//!
//! # Example
//!
//! ```ignore
//! use keymint_core::domain::signing::{KeyRegistry, WriteKeyOptions};
//! use keymint_core::config::RegistryConfig;
//! use keymint_core::storage::Database;
//!
//! let db = Database::open("keys.db").await?;
//! let registry = KeyRegistry::sqlite(RegistryConfig::default(), &db)?;
//!
//! let sig = registry
//!     .write_key("password-reset", WriteKeyOptions::default().expires_in_hours(1.0))
//!     .await?;
//! assert!(registry.verify_key(&sig, "password-reset").await?);
//! registry.expire_key(&sig).await?;
//! ```

pub mod entity;
pub mod generator;
pub mod rate_limit;
pub mod registry;
pub mod repository;
pub mod repository_trait;
pub mod validation;

pub use entity::{KeyQuery, NewSigningKey, SigningKey, WriteKeyOptions};
pub use generator::{DEFAULT_BYTE_LENGTH, generate_key};
pub use rate_limit::RateLimiter;
pub use registry::KeyRegistry;
pub use repository::{InMemorySigningKeyRepository, SqliteSigningKeyRepository};
pub use repository_trait::SigningKeyRepository;
