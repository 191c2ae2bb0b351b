//! Integration tests for the signing key registry
//!
//! These run the registry against real SQLite databases, both in memory and
//! on disk, through the public API only.

use chrono::{Duration, Utc};
use keymint_core::config::RegistryConfig;
use keymint_core::domain::signing::{KeyQuery, KeyRegistry, WriteKeyOptions};
use keymint_core::storage::Database;
use keymint_core::Error;
use std::collections::HashSet;
use tempfile::TempDir;

async fn in_memory_registry() -> (Database, KeyRegistry) {
    let db = Database::in_memory()
        .await
        .expect("Failed to create database");
    let registry = KeyRegistry::sqlite(RegistryConfig::default(), &db).unwrap();
    (db, registry)
}

#[tokio::test]
async fn test_reset_scenario() {
    let (_db, registry) = in_memory_registry().await;

    let sig = registry
        .write_key(
            "reset",
            WriteKeyOptions::default()
                .expires_in_hours(1.0)
                .email("a@b.com"),
        )
        .await
        .unwrap();

    let key = registry.get_key(&sig).await.unwrap();
    assert_eq!(key.scope, "reset");
    assert!(key.active);
    assert_eq!(key.email.as_deref(), Some("a@b.com"));
    let expected = Utc::now() + Duration::hours(1);
    let drift = (key.expiration.unwrap() - expected).num_seconds().abs();
    assert!(drift < 5, "expiration should be about one hour out");

    assert!(registry.verify_key(&sig, "reset").await.unwrap());
    assert!(!registry.verify_key(&sig, "other").await.unwrap());
    assert!(registry.expire_key(&sig).await.unwrap());
    assert!(!registry.verify_key(&sig, "reset").await.unwrap());
    assert!(!registry.expire_key(&sig).await.unwrap());

    let key = registry.get_key(&sig).await.unwrap();
    assert!(!key.active);
    assert!(key.last_updated >= key.created_at);
}

#[tokio::test]
async fn test_past_expiration_never_verifies() {
    let (_db, registry) = in_memory_registry().await;

    for hours in [-1.0, -0.01, -24.0 * 365.0] {
        let sig = registry
            .write_key("reset", WriteKeyOptions::default().expires_in_hours(hours))
            .await
            .unwrap();
        assert!(!registry.verify_key(&sig, "reset").await.unwrap());
        assert!(!registry.verify_key(&sig, "reset").await.unwrap());
        assert!(!registry.get_key(&sig).await.unwrap().active);
    }
}

#[tokio::test]
async fn test_expire_then_verify_is_false_from_any_state() {
    let (_db, registry) = in_memory_registry().await;

    let options = [
        WriteKeyOptions::default(),
        WriteKeyOptions::default().inactive(),
        WriteKeyOptions::default().expires_in_hours(-1.0),
        WriteKeyOptions::default().expires_in_hours(48.0),
    ];
    for opts in options {
        let sig = registry.write_key("email_verification", opts).await.unwrap();
        registry.expire_key(&sig).await.unwrap();
        assert!(!registry.verify_key(&sig, "email_verification").await.unwrap());
    }
}

#[tokio::test]
async fn test_signatures_unique_across_ten_thousand_writes() {
    let (_db, registry) = in_memory_registry().await;

    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let sig = registry
            .write_key("bulk", WriteKeyOptions::default().signature_length(16))
            .await
            .unwrap();
        assert!(seen.insert(sig), "signature generated twice");
    }
    assert_eq!(registry.get_all(Some("bulk"), false).await.unwrap().len(), 10_000);
}

#[tokio::test]
async fn test_get_all_in_insertion_order() {
    let (_db, registry) = in_memory_registry().await;

    let mut written = Vec::new();
    for (i, scope) in ["a", "b", "a", "c", "b"].iter().enumerate() {
        let mut opts = WriteKeyOptions::default();
        if i % 2 == 1 {
            opts = opts.inactive();
        }
        written.push(registry.write_key(scope, opts).await.unwrap());
    }

    let all: Vec<_> = registry
        .get_all(None, false)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.signature)
        .collect();
    assert_eq!(all, written);

    let active_a: Vec<_> = registry
        .get_all(Some("a"), true)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.signature)
        .collect();
    assert_eq!(active_a, vec![written[0].clone(), written[2].clone()]);

    registry.delete_key(&written[1]).await.unwrap();
    assert_eq!(registry.get_all(None, false).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_query_keys_filters() {
    let (_db, registry) = in_memory_registry().await;

    let key1 = registry
        .write_key("test1", WriteKeyOptions::default().email("Test1@Example.com"))
        .await
        .unwrap();
    registry
        .write_key("test2", WriteKeyOptions::default().email("test2@example.com"))
        .await
        .unwrap();

    let result = registry
        .query_keys(
            &KeyQuery::new()
                .active(true)
                .scope("test1")
                .email("TEST1@example.com"),
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].signature, key1);

    let result = registry
        .query_keys(&KeyQuery::new().email("test2@example.com"))
        .await
        .unwrap();
    assert!(result.iter().all(|k| k.email.as_deref() == Some("test2@example.com")));

    let result = registry
        .query_keys(&KeyQuery::new().active(true).scope("non-existent-scope"))
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_rotate_key_links_successor() {
    let (_db, registry) = in_memory_registry().await;

    let old = registry
        .write_key(
            "api",
            WriteKeyOptions::default()
                .expires_in_hours(24.0)
                .email("dev@example.com"),
        )
        .await
        .unwrap();

    let new = registry.rotate_key(&old, None).await.unwrap().unwrap();
    assert_ne!(new, old);

    let old_key = registry.get_key(&old).await.unwrap();
    let new_key = registry.get_key(&new).await.unwrap();
    assert!(!old_key.active && old_key.rotated);
    assert!(new_key.active && !new_key.rotated);
    assert_eq!(new_key.scope, old_key.scope);
    assert_eq!(new_key.email, old_key.email);
    assert_eq!(new_key.previous_key.as_deref(), Some(old.as_str()));
    assert_eq!(
        new_key.lifetime().unwrap().num_hours(),
        old_key.lifetime().unwrap().num_hours()
    );

    assert!(registry.verify_key(&new, "api").await.unwrap());
    assert!(!registry.verify_key(&old, "api").await.unwrap());

    assert!(registry.rotate_key(&old, None).await.unwrap().is_none());
    assert!(registry.rotate_key("missing", None).await.unwrap().is_none());

    let successors = registry
        .query_keys(&KeyQuery::new().previous_key(old.as_str()))
        .await
        .unwrap();
    assert_eq!(successors.len(), 1);
}

#[tokio::test]
async fn test_rotate_key_with_explicit_expiration() {
    let (_db, registry) = in_memory_registry().await;

    let old = registry
        .write_key("api", WriteKeyOptions::default())
        .await
        .unwrap();
    let new = registry.rotate_key(&old, Some(1.0 / 60.0)).await.unwrap().unwrap();

    let lifetime = registry.get_key(&new).await.unwrap().lifetime().unwrap();
    assert_eq!(lifetime, Duration::minutes(1));
}

#[tokio::test]
async fn test_rotate_keys_due_within_window() {
    let (_db, registry) = in_memory_registry().await;

    let soon1 = registry
        .write_key("test1", WriteKeyOptions::default().expires_in_hours(1.0))
        .await
        .unwrap();
    let soon2 = registry
        .write_key("test2", WriteKeyOptions::default().expires_in_hours(1.0))
        .await
        .unwrap();
    let late = registry
        .write_key("test3", WriteKeyOptions::default().expires_in_hours(2.0))
        .await
        .unwrap();
    let forever = registry
        .write_key("test3", WriteKeyOptions::default())
        .await
        .unwrap();

    let rotated = registry.rotate_keys(1.0, None).await.unwrap();
    let old: HashSet<_> = rotated.iter().map(|(o, _)| o.clone()).collect();
    assert_eq!(old, HashSet::from([soon1.clone(), soon2.clone()]));
    assert!(!registry.get_key(&soon1).await.unwrap().active);
    assert!(registry.get_key(&late).await.unwrap().active);

    // Scoped rotation with a wider window picks up the later key only.
    let rotated = registry.rotate_keys(2.0, Some("test3")).await.unwrap();
    assert_eq!(rotated.len(), 1);
    assert_eq!(rotated[0].0, late);
    assert!(registry.get_key(&forever).await.unwrap().active);

    let successor = registry.get_key(&rotated[0].1).await.unwrap();
    assert_eq!(successor.previous_key.as_deref(), Some(late.as_str()));
}

#[tokio::test]
async fn test_rotating_expired_key_does_not_breed_dead_rows() {
    let (_db, registry) = in_memory_registry().await;

    let expired = registry
        .write_key("reset", WriteKeyOptions::default().expires_in_hours(-1.0))
        .await
        .unwrap();

    for _ in 0..3 {
        assert!(registry.rotate_keys(1.0, None).await.unwrap().is_empty());
    }
    assert_eq!(registry.get_all(None, false).await.unwrap().len(), 1);

    let successor = registry.rotate_key(&expired, None).await.unwrap().unwrap();
    assert!(registry.verify_key(&successor, "reset").await.unwrap());
    assert!(registry.get_key(&successor).await.unwrap().expiration.is_none());
    assert!(registry.rotate_keys(1.0, None).await.unwrap().is_empty());
    assert_eq!(registry.get_all(None, false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_purge_leaves_live_keys() {
    let (_db, registry) = in_memory_registry().await;

    let live = registry
        .write_key("reset", WriteKeyOptions::default())
        .await
        .unwrap();
    let expired = registry
        .write_key("reset", WriteKeyOptions::default().expires_in_hours(-1.0))
        .await
        .unwrap();
    registry.verify_key(&expired, "reset").await.unwrap();

    // Inside the retention window nothing is removed.
    assert_eq!(registry.purge_expired().await, 0);
    assert!(registry.get_key(&live).await.is_ok());
    assert!(registry.get_key(&expired).await.is_ok());
}

#[tokio::test]
async fn test_purge_with_zero_retention() {
    let db = Database::in_memory().await.unwrap();
    let config = RegistryConfig {
        retention_hours: 0,
        ..Default::default()
    };
    let registry = KeyRegistry::sqlite(config, &db).unwrap();

    let expired = registry
        .write_key("reset", WriteKeyOptions::default().expires_in_hours(-1.0))
        .await
        .unwrap();
    registry.expire_key(&expired).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert_eq!(registry.purge_expired().await, 1);
    assert!(matches!(
        registry.get_key(&expired).await,
        Err(Error::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_purge_failure_is_not_fatal() {
    let (db, registry) = in_memory_registry().await;
    db.close().await;
    assert_eq!(registry.purge_expired().await, 0);
}

#[tokio::test]
async fn test_persistence_errors_propagate() {
    let (db, registry) = in_memory_registry().await;
    db.close().await;

    assert!(matches!(
        registry.write_key("reset", WriteKeyOptions::default()).await,
        Err(Error::DatabaseError(_))
    ));
    assert!(matches!(
        registry.verify_key("sig", "reset").await,
        Err(Error::DatabaseError(_))
    ));
}

#[tokio::test]
async fn test_keys_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("keys.db");

    let sig = {
        let db = Database::open(&path).await.unwrap();
        let registry = KeyRegistry::sqlite(RegistryConfig::default(), &db).unwrap();
        let sig = registry
            .write_key("api", WriteKeyOptions::default().expires_in_hours(365.0 * 24.0))
            .await
            .unwrap();
        db.close().await;
        sig
    };

    let db = Database::open(&path).await.unwrap();
    let registry = KeyRegistry::sqlite(RegistryConfig::default(), &db).unwrap();
    assert!(registry.verify_key(&sig, "api").await.unwrap());
    assert_eq!(registry.get_all(None, true).await.unwrap().len(), 1);
}
