//! Key registry
//!
//! Issues, verifies, expires and rotates signing keys on top of a
//! [`SigningKeyRepository`]. The registry holds no hidden global state: build
//! one with its configuration and store, then pass it to whatever needs it.

use super::entity::{KeyQuery, NewSigningKey, SigningKey, WriteKeyOptions};
use super::generator::{generate_key, validate_byte_length};
use super::rate_limit::RateLimiter;
use super::repository::SqliteSigningKeyRepository;
use super::repository_trait::SigningKeyRepository;
use super::validation::{expiration_offset, normalize_email, validate_scope};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::storage::Database;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many fresh signatures to try before giving up on a collision
const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Registry of scoped, expiring signing keys
pub struct KeyRegistry {
    repository: Arc<dyn SigningKeyRepository>,
    config: RegistryConfig,
    limiter: Option<RateLimiter>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("config", &self.config)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl KeyRegistry {
    /// Create a registry over any repository
    pub fn new(config: RegistryConfig, repository: Arc<dyn SigningKeyRepository>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let limiter = RateLimiter::from_config(&config.rate_limit);
        Ok(Self {
            repository,
            config,
            limiter,
        })
    }

    /// Create a registry backed by an already-migrated SQLite database
    pub fn sqlite(config: RegistryConfig, db: &Database) -> Result<Self> {
        Self::new(
            config,
            Arc::new(SqliteSigningKeyRepository::new(db.pool().clone())),
        )
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Issue a new key and return its signature
    pub async fn write_key(&self, scope: &str, options: WriteKeyOptions) -> Result<String> {
        let scope = validate_scope(scope)?;
        let email = normalize_email(options.email.as_deref())?;
        let length = validate_byte_length(options.signature_length.unwrap_or(self.config.byte_length))?;
        let offset = options.expiration_hours.map(expiration_offset).transpose()?;

        let now = Utc::now();
        let template = NewSigningKey {
            signature: String::new(),
            scope: scope.to_string(),
            email,
            expiration: offset.map(|d| now + d),
            active: options.active,
            previous_key: None,
            created_at: now,
        };

        let stored = self
            .insert_unique(length, template, |repo, key| async move { repo.insert(&key).await.map(Some) })
            .await?
            .ok_or_else(|| Error::Other("insert returned no key".to_string()))?;

        info!(
            id = stored.id,
            scope = %stored.scope,
            expires = ?stored.expiration,
            active = stored.active,
            "Issued signing key"
        );
        Ok(stored.signature)
    }

    /// Check that `signature` is active, unexpired and issued for `scope`
    ///
    /// Invalid keys are a normal `false`, never an error. An active key found
    /// past its expiration is deactivated on the way out; if that write fails
    /// it is logged and the result is still `false`.
    pub async fn verify_key(&self, signature: &str, scope: &str) -> Result<bool> {
        if let Some(limiter) = &self.limiter {
            limiter.check(signature).inspect_err(|_| {
                warn!(
                    max_requests = limiter.max_requests(),
                    period_secs = limiter.period().as_secs(),
                    "Verification rate limited"
                )
            })?;
        }

        let Some(key) = self.repository.get_by_signature(signature).await? else {
            debug!(scope, "Verification failed: unknown signature");
            return Ok(false);
        };

        let now = Utc::now();
        if key.active && key.is_expired_at(now) {
            match self.repository.deactivate(signature, now).await {
                Ok(_) => debug!(id = key.id, "Deactivated expired signing key"),
                Err(e) => warn!(id = key.id, error = %e, "Failed to deactivate expired signing key"),
            }
        }

        let valid = key.is_valid_for(scope, now);
        if !valid {
            debug!(
                id = key.id,
                active = key.active,
                expired = key.is_expired_at(now),
                expected = scope,
                actual = %key.scope,
                "Verification failed"
            );
        }
        Ok(valid)
    }

    /// Deactivate a key regardless of its expiration
    ///
    /// Returns true only when an active key was found and switched off; a
    /// second call on the same signature returns false.
    pub async fn expire_key(&self, signature: &str) -> Result<bool> {
        let changed = self.repository.deactivate(signature, Utc::now()).await?;
        if changed {
            info!("Expired signing key");
        }
        Ok(changed)
    }

    /// Point lookup
    pub async fn get_key(&self, signature: &str) -> Result<SigningKey> {
        self.repository
            .get_by_signature(signature)
            .await?
            .ok_or_else(|| Error::KeyNotFound(signature.to_string()))
    }

    /// All keys in insertion order, optionally filtered by scope and active flag
    pub async fn get_all(&self, scope: Option<&str>, active_only: bool) -> Result<Vec<SigningKey>> {
        let query = KeyQuery {
            scope: scope.map(str::to_string),
            active: active_only.then_some(true),
            ..Default::default()
        };
        self.repository.list(&query).await
    }

    /// Keys matching every set filter, in insertion order
    pub async fn query_keys(&self, query: &KeyQuery) -> Result<Vec<SigningKey>> {
        let mut query = query.clone();
        query.email = normalize_email(query.email.as_deref())?;
        self.repository.list(&query).await
    }

    /// Replace a key with a fresh successor carrying the same scope and email
    ///
    /// Without `expiration_hours` the successor gets the old key's original
    /// lifetime when that was positive, and no expiration otherwise. Returns
    /// `None` if the key is unknown, already rotated, or was revoked with
    /// [`expire_key`](Self::expire_key) before it expired.
    pub async fn rotate_key(
        &self,
        signature: &str,
        expiration_hours: Option<f64>,
    ) -> Result<Option<String>> {
        let offset = expiration_hours.map(expiration_offset).transpose()?;

        let Some(old) = self.repository.get_by_signature(signature).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if old.rotated {
            return Ok(None);
        }
        if !old.active && !old.is_expired_at(now) {
            debug!(id = old.id, "Refusing to rotate a revoked signing key");
            return Ok(None);
        }

        let lifetime = old.lifetime().filter(|d| *d > Duration::zero());
        let template = NewSigningKey {
            signature: String::new(),
            scope: old.scope.clone(),
            email: old.email.clone(),
            expiration: offset.or(lifetime).map(|d| now + d),
            active: true,
            previous_key: Some(old.signature.clone()),
            created_at: now,
        };

        let old_signature = old.signature.clone();
        let successor = self
            .insert_unique(self.config.byte_length, template, move |repo, key| {
                let old_signature = old_signature.clone();
                async move { repo.rotate(&old_signature, &key).await }
            })
            .await?;

        if let Some(new) = &successor {
            info!(old_id = old.id, new_id = new.id, scope = %new.scope, "Rotated signing key");
        }
        Ok(successor.map(|k| k.signature))
    }

    /// Rotate every active key expiring within `within_hours`
    ///
    /// Keys without an expiration, or whose expiration has already passed, are
    /// never due. A failure on one key is
    /// logged and does not stop the others. Returns `(old, new)` signature
    /// pairs for the keys that were rotated.
    pub async fn rotate_keys(
        &self,
        within_hours: f64,
        scope: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let now = Utc::now();
        let horizon = now + expiration_offset(within_hours)?;
        let query = KeyQuery {
            scope: scope.map(str::to_string),
            active: Some(true),
            ..Default::default()
        };

        let due: Vec<SigningKey> = self
            .repository
            .list(&query)
            .await?
            .into_iter()
            .filter(|k| !k.rotated && !k.is_expired_at(now))
            .filter(|k| k.expiration.is_some_and(|exp| exp <= horizon))
            .collect();

        let mut rotated = Vec::with_capacity(due.len());
        for key in due {
            match self.rotate_key(&key.signature, None).await {
                Ok(Some(new)) => rotated.push((key.signature, new)),
                Ok(None) => {}
                Err(e) => warn!(id = key.id, error = %e, "Failed to rotate signing key"),
            }
        }

        info!(count = rotated.len(), "Rotated keys due for expiration");
        Ok(rotated)
    }

    /// Physically remove a key
    pub async fn delete_key(&self, signature: &str) -> Result<bool> {
        let deleted = self.repository.delete(signature).await?;
        if deleted {
            info!("Deleted signing key");
        }
        Ok(deleted)
    }

    /// Remove inactive, expired keys untouched for longer than the retention window
    ///
    /// Housekeeping only: store failures are logged and reported as nothing removed.
    pub async fn purge_expired(&self) -> u64 {
        self.purge_expired_at(Utc::now()).await
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) -> u64 {
        let untouched_since = i64::try_from(self.config.retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self
            .repository
            .delete_expired_inactive(now, untouched_since)
            .await
        {
            Ok(removed) => {
                info!(removed, retention_hours = self.config.retention_hours, "Purged expired signing keys");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge expired signing keys");
                0
            }
        }
    }

    /// Run `store` with freshly generated signatures until one is not taken
    async fn insert_unique<F, Fut>(
        &self,
        length: usize,
        template: NewSigningKey,
        store: F,
    ) -> Result<Option<SigningKey>>
    where
        F: Fn(Arc<dyn SigningKeyRepository>, NewSigningKey) -> Fut,
        Fut: std::future::Future<Output = Result<Option<SigningKey>>>,
    {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let key = NewSigningKey {
                signature: generate_key(length),
                ..template.clone()
            };
            match store(Arc::clone(&self.repository), key).await {
                Err(Error::DuplicateSignature(_)) => {
                    warn!(attempt, "Generated signature collided, retrying");
                }
                other => return other,
            }
        }
        Err(Error::SignatureCollision(MAX_GENERATION_ATTEMPTS))
    }
}
