//! Signing key repositories
//!
//! `SqliteSigningKeyRepository` is the production store; every mutating call is
//! one statement or one transaction. `InMemorySigningKeyRepository` mirrors its
//! semantics for tests and embedders that don't want a database file.

use super::entity::{KeyQuery, NewSigningKey, SigningKey};
use super::repository_trait::SigningKeyRepository;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Mutex;

/// Repository for signing key database operations
#[derive(Debug, Clone)]
pub struct SqliteSigningKeyRepository {
    pool: SqlitePool,
}

impl SqliteSigningKeyRepository {
    /// Create a new repository with the given connection pool
    ///
    /// The schema must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_key(row: &SqliteRow) -> Result<SigningKey> {
        Ok(SigningKey {
            id: row.try_get("id")?,
            signature: row.try_get("signature")?,
            scope: row.try_get("scope")?,
            email: row.try_get("email")?,
            expiration: row.try_get("expiration")?,
            active: row.try_get("active")?,
            rotated: row.try_get("rotated")?,
            previous_key: row.try_get("previous_key")?,
            created_at: row.try_get("created_at")?,
            last_updated: row.try_get("last_updated")?,
        })
    }

    async fn insert_with<'c, E>(executor: E, key: &NewSigningKey) -> Result<SigningKey>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO signing_keys (
                signature, scope, email, expiration, active,
                rotated, previous_key, created_at, last_updated
            )
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&key.signature)
        .bind(&key.scope)
        .bind(&key.email)
        .bind(key.expiration)
        .bind(key.active)
        .bind(&key.previous_key)
        .bind(key.created_at)
        .bind(key.created_at)
        .execute(executor)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::DuplicateSignature(key.signature.clone())
            }
            other => Error::DatabaseError(other),
        })?;

        Ok(SigningKey {
            id: result.last_insert_rowid(),
            signature: key.signature.clone(),
            scope: key.scope.clone(),
            email: key.email.clone(),
            expiration: key.expiration,
            active: key.active,
            rotated: false,
            previous_key: key.previous_key.clone(),
            created_at: key.created_at,
            last_updated: key.created_at,
        })
    }
}

#[async_trait]
impl SigningKeyRepository for SqliteSigningKeyRepository {
    async fn insert(&self, key: &NewSigningKey) -> Result<SigningKey> {
        Self::insert_with(&self.pool, key).await
    }

    async fn get_by_signature(&self, signature: &str) -> Result<Option<SigningKey>> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE signature = ?")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_key).transpose()
    }

    async fn list(&self, query: &KeyQuery) -> Result<Vec<SigningKey>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM signing_keys WHERE 1 = 1");

        if let Some(scope) = &query.scope {
            builder.push(" AND scope = ").push_bind(scope.as_str());
        }
        if let Some(email) = &query.email {
            builder.push(" AND email = ").push_bind(email.as_str());
        }
        if let Some(active) = query.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if let Some(previous_key) = &query.previous_key {
            builder
                .push(" AND previous_key = ")
                .push_bind(previous_key.as_str());
        }
        builder.push(" ORDER BY id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_key).collect()
    }

    async fn deactivate(&self, signature: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE signing_keys SET active = 0, last_updated = ? WHERE signature = ? AND active = 1",
        )
        .bind(at)
        .bind(signature)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate(
        &self,
        signature: &str,
        successor: &NewSigningKey,
    ) -> Result<Option<SigningKey>> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query(
            r#"
            UPDATE signing_keys
            SET active = 0, rotated = 1, last_updated = ?
            WHERE signature = ? AND rotated = 0
            "#,
        )
        .bind(successor.created_at)
        .bind(signature)
        .execute(&mut *tx)
        .await?;

        if retired.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = Self::insert_with(&mut *tx, successor).await?;
        tx.commit().await?;

        Ok(Some(inserted))
    }

    async fn delete(&self, signature: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM signing_keys WHERE signature = ?")
            .bind(signature)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_inactive(
        &self,
        now: DateTime<Utc>,
        untouched_since: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // Timestamps are compared in Rust rather than as SQLite text.
        let rows = sqlx::query(
            "SELECT * FROM signing_keys WHERE active = 0 AND expiration IS NOT NULL",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut removed = 0;
        for row in &rows {
            let key = Self::row_to_key(row)?;
            if key.is_expired_at(now) && key.last_updated < untouched_since {
                removed += sqlx::query("DELETE FROM signing_keys WHERE id = ?")
                    .bind(key.id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
        }

        tx.commit().await?;
        Ok(removed)
    }
}

/// In-memory signing key repository
///
/// Keeps records in insertion order and enforces signature uniqueness the
/// same way the SQLite schema does.
#[derive(Debug, Default)]
pub struct InMemorySigningKeyRepository {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    keys: Vec<SigningKey>,
    next_id: i64,
}

impl InMemoryState {
    fn push(&mut self, key: &NewSigningKey) -> Result<SigningKey> {
        if self.keys.iter().any(|k| k.signature == key.signature) {
            return Err(Error::DuplicateSignature(key.signature.clone()));
        }
        self.next_id += 1;
        let stored = SigningKey {
            id: self.next_id,
            signature: key.signature.clone(),
            scope: key.scope.clone(),
            email: key.email.clone(),
            expiration: key.expiration,
            active: key.active,
            rotated: false,
            previous_key: key.previous_key.clone(),
            created_at: key.created_at,
            last_updated: key.created_at,
        };
        self.keys.push(stored.clone());
        Ok(stored)
    }
}

impl InMemorySigningKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("in-memory key store poisoned".to_string()))
    }
}

#[async_trait]
impl SigningKeyRepository for InMemorySigningKeyRepository {
    async fn insert(&self, key: &NewSigningKey) -> Result<SigningKey> {
        self.lock()?.push(key)
    }

    async fn get_by_signature(&self, signature: &str) -> Result<Option<SigningKey>> {
        Ok(self
            .lock()?
            .keys
            .iter()
            .find(|k| k.signature == signature)
            .cloned())
    }

    async fn list(&self, query: &KeyQuery) -> Result<Vec<SigningKey>> {
        Ok(self
            .lock()?
            .keys
            .iter()
            .filter(|k| query.matches(k))
            .cloned()
            .collect())
    }

    async fn deactivate(&self, signature: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        match state
            .keys
            .iter_mut()
            .find(|k| k.signature == signature && k.active)
        {
            Some(key) => {
                key.active = false;
                key.last_updated = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate(
        &self,
        signature: &str,
        successor: &NewSigningKey,
    ) -> Result<Option<SigningKey>> {
        let mut state = self.lock()?;
        let Some(index) = state
            .keys
            .iter()
            .position(|k| k.signature == signature && !k.rotated)
        else {
            return Ok(None);
        };

        // Insert first so a duplicate successor leaves the old key untouched.
        let inserted = state.push(successor)?;
        let old = &mut state.keys[index];
        old.active = false;
        old.rotated = true;
        old.last_updated = successor.created_at;
        Ok(Some(inserted))
    }

    async fn delete(&self, signature: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.keys.len();
        state.keys.retain(|k| k.signature != signature);
        Ok(state.keys.len() < before)
    }

    async fn delete_expired_inactive(
        &self,
        now: DateTime<Utc>,
        untouched_since: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.lock()?;
        let before = state.keys.len();
        state.keys.retain(|k| {
            k.active || !k.is_expired_at(now) || k.last_updated >= untouched_since
        });
        Ok((before - state.keys.len()) as u64)
    }
}
