//! Repository trait for signing key persistence
//!
//! The registry only talks to storage through this trait, so any relational
//! backend (or the in-memory one used in tests) can sit behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::entity::{KeyQuery, NewSigningKey, SigningKey};

/// Persistence collaborator for the key registry
///
/// Every method is a single transactional unit against the store.
#[async_trait]
pub trait SigningKeyRepository: Send + Sync {
    /// Insert a new key and return the stored record
    ///
    /// A signature that already exists yields `Error::DuplicateSignature`.
    async fn insert(&self, key: &NewSigningKey) -> Result<SigningKey>;

    /// Point lookup by signature
    async fn get_by_signature(&self, signature: &str) -> Result<Option<SigningKey>>;

    /// List keys matching every set filter, in insertion order
    async fn list(&self, query: &KeyQuery) -> Result<Vec<SigningKey>>;

    /// Flip an active key to inactive; returns whether a row changed
    async fn deactivate(&self, signature: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Atomically retire `signature` and insert its successor
    ///
    /// Returns `None` without changing anything if the old key is missing or
    /// already rotated.
    async fn rotate(
        &self,
        signature: &str,
        successor: &NewSigningKey,
    ) -> Result<Option<SigningKey>>;

    /// Physically delete a key; returns whether it existed
    async fn delete(&self, signature: &str) -> Result<bool>;

    /// Delete inactive keys that expired before `now` and were last touched
    /// before `untouched_since`; returns the number removed
    async fn delete_expired_inactive(
        &self,
        now: DateTime<Utc>,
        untouched_since: DateTime<Utc>,
    ) -> Result<u64>;
}
