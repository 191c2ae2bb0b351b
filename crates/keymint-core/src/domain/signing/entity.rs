//! Signing key entities

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A persisted signing key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Surrogate key assigned by the store on insert
    pub id: i64,

    /// The token handed to callers
    pub signature: String,

    /// Caller-defined namespace (e.g. "password-reset", "api-key")
    pub scope: String,

    /// Optional identity association, stored lowercased
    pub email: Option<String>,

    /// When the key stops verifying; `None` means it never expires
    pub expiration: Option<DateTime<Utc>>,

    /// Manual validity flag, independent of expiration
    pub active: bool,

    /// Whether this key has been replaced by a successor
    pub rotated: bool,

    /// Signature of the key this one replaced
    pub previous_key: Option<String>,

    /// When the key was issued
    pub created_at: DateTime<Utc>,

    /// When the key was last mutated
    pub last_updated: DateTime<Utc>,
}

impl SigningKey {
    /// Whether the key's expiration has passed at `now`
    ///
    /// A key is still valid at the exact instant of its expiration.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| now > exp)
    }

    /// Whether the key would verify for `scope` at `now`
    pub fn is_valid_for(&self, scope: &str, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now) && self.scope == scope
    }

    /// The lifetime the key was issued with, if it expires
    pub fn lifetime(&self) -> Option<Duration> {
        self.expiration.map(|exp| exp - self.created_at)
    }
}

/// Insert payload for a new signing key
#[derive(Debug, Clone)]
pub struct NewSigningKey {
    pub signature: String,
    pub scope: String,
    pub email: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    pub active: bool,
    pub previous_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Options for issuing a key
#[derive(Debug, Clone, PartialEq)]
pub struct WriteKeyOptions {
    /// Hours from now until the key expires; fractional and negative values are allowed
    pub expiration_hours: Option<f64>,
    /// Initial state of the `active` flag
    pub active: bool,
    /// Identity to associate with the key
    pub email: Option<String>,
    /// Overrides the registry's configured byte length for this key
    pub signature_length: Option<usize>,
}

impl Default for WriteKeyOptions {
    fn default() -> Self {
        Self {
            expiration_hours: None,
            active: true,
            email: None,
            signature_length: None,
        }
    }
}

impl WriteKeyOptions {
    pub fn expires_in_hours(mut self, hours: f64) -> Self {
        self.expiration_hours = Some(hours);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn signature_length(mut self, length: usize) -> Self {
        self.signature_length = Some(length);
        self
    }
}

/// Filters for listing keys; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyQuery {
    pub scope: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
    pub previous_key: Option<String>,
}

impl KeyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn previous_key(mut self, signature: impl Into<String>) -> Self {
        self.previous_key = Some(signature.into());
        self
    }

    /// Whether a record satisfies every set filter
    pub fn matches(&self, key: &SigningKey) -> bool {
        self.scope.as_ref().is_none_or(|s| &key.scope == s)
            && self
                .email
                .as_ref()
                .is_none_or(|e| key.email.as_deref() == Some(e.as_str()))
            && self.active.is_none_or(|a| key.active == a)
            && self
                .previous_key
                .as_ref()
                .is_none_or(|p| key.previous_key.as_deref() == Some(p.as_str()))
    }
}
