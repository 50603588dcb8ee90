//! Stream key authentication and the single-publisher guarantee.
//!
//! `authenticate` resolves a key to its owner through the external
//! [`KeyStore`]. `acquire`/`release` maintain the table of keys that are
//! currently publishing. Claiming a key is a single `DashMap` entry
//! operation under the shard lock, so two racing publishers for the same
//! key can never both succeed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StaticKeyConfig;
use crate::retry::RetryPolicy;

pub type OwnerId = String;
pub type SessionId = String;

/// What the account system knows about a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    pub owner_id: OwnerId,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    #[must_use]
    pub fn is_revoked_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_some_and(|revoked| revoked <= now)
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key not found")]
    NotFound,
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the account system's stream keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn lookup_key(&self, key: &str) -> Result<KeyRecord, KeyStoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown stream key")]
    UnknownKey,
    #[error("stream key revoked")]
    RevokedKey,
    #[error("key lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stream key already publishing (held by session {holder})")]
pub struct AlreadyPublishing {
    pub holder: SessionId,
}

/// Keys served from configuration.
#[derive(Debug, Default)]
pub struct StaticKeyStore {
    keys: HashMap<String, KeyRecord>,
}

impl StaticKeyStore {
    #[must_use]
    pub fn from_config(keys: &[StaticKeyConfig]) -> Self {
        let issued_at = Utc::now();
        let keys = keys
            .iter()
            .map(|entry| {
                let record = KeyRecord {
                    key: entry.key.clone(),
                    owner_id: entry.owner_id.clone(),
                    issued_at,
                    revoked_at: entry.revoked.then_some(issued_at),
                };
                (entry.key.clone(), record)
            })
            .collect();
        Self { keys }
    }

    pub fn insert(&mut self, record: KeyRecord) {
        self.keys.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl KeyStore for StaticKeyStore {
    async fn lookup_key(&self, key: &str) -> Result<KeyRecord, KeyStoreError> {
        self.keys.get(key).cloned().ok_or(KeyStoreError::NotFound)
    }
}

pub struct KeyAuthenticator {
    store: Arc<dyn KeyStore>,
    /// key -> session currently publishing with it
    active: DashMap<String, SessionId>,
    retry: RetryPolicy,
}

impl KeyAuthenticator {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn KeyStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            active: DashMap::new(),
            retry,
        }
    }

    /// Resolves `key` to its owner. Store outages are retried with backoff
    /// before surfacing as [`AuthError::Lookup`].
    pub async fn authenticate(&self, key: &str) -> Result<OwnerId, AuthError> {
        if key.is_empty() {
            return Err(AuthError::UnknownKey);
        }

        let record = self
            .retry
            .run(
                "key lookup",
                |e: &KeyStoreError| matches!(e, KeyStoreError::Unavailable(_)),
                || self.store.lookup_key(key),
            )
            .await
            .map_err(|e| match e {
                KeyStoreError::NotFound => AuthError::UnknownKey,
                KeyStoreError::Unavailable(msg) => AuthError::Lookup(msg),
            })?;

        if record.is_revoked_at(Utc::now()) {
            return Err(AuthError::RevokedKey);
        }
        Ok(record.owner_id)
    }

    /// Claims `key` for `session_id`. Re-acquiring a key the session
    /// already holds succeeds.
    pub fn acquire(&self, key: &str, session_id: &str) -> Result<(), AlreadyPublishing> {
        match self.active.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get() == session_id => Ok(()),
            Entry::Occupied(entry) => Err(AlreadyPublishing {
                holder: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(session_id.to_string());
                tracing::debug!(session_id, "stream key acquired");
                Ok(())
            }
        }
    }

    /// Releases `key` if `session_id` holds it. Returns whether anything
    /// was released; releasing a key held by someone else is a no-op.
    pub fn release(&self, key: &str, session_id: &str) -> bool {
        let released = self
            .active
            .remove_if(key, |_, holder| holder == session_id)
            .is_some();
        if released {
            tracing::debug!(session_id, "stream key released");
        }
        released
    }

    #[must_use]
    pub fn holder(&self, key: &str) -> Option<SessionId> {
        self.active.get(key).map(|holder| holder.value().clone())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Extracts the stream key from a publish name.
///
/// OBS and ffmpeg send the key as the stream name; some tools put it in a
/// query string instead (`live?key=abc` or `live?token=abc`), which takes
/// precedence when present.
#[must_use]
pub fn extract_stream_key(publish_name: &str) -> &str {
    match publish_name.split_once('?') {
        Some((name, query)) => extract_key_from_query(query).unwrap_or(name),
        None => publish_name,
    }
}

fn extract_key_from_query(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        matches!(name, "key" | "token")
            .then_some(value)
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(key: &str, owner: &str) -> KeyRecord {
        KeyRecord {
            key: key.to_string(),
            owner_id: owner.to_string(),
            issued_at: Utc::now(),
            revoked_at: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_authenticate_known_key() {
        let store = StaticKeyStore::from_config(&[StaticKeyConfig {
            key: "key123".to_string(),
            owner_id: "U1".to_string(),
            revoked: false,
        }]);
        let auth = KeyAuthenticator::new(Arc::new(store));
        assert_eq!(auth.authenticate("key123").await.unwrap(), "U1");
    }

    #[tokio::test]
    async fn test_unknown_and_revoked_are_distinct() {
        let store = StaticKeyStore::from_config(&[StaticKeyConfig {
            key: "old".to_string(),
            owner_id: "U2".to_string(),
            revoked: true,
        }]);
        let auth = KeyAuthenticator::new(Arc::new(store));
        assert_eq!(auth.authenticate("nope").await, Err(AuthError::UnknownKey));
        assert_eq!(auth.authenticate("old").await, Err(AuthError::RevokedKey));
        assert_eq!(auth.authenticate("").await, Err(AuthError::UnknownKey));
    }

    #[tokio::test]
    async fn test_future_revocation_still_valid() {
        let mut store = StaticKeyStore::default();
        let mut rec = record("k", "U1");
        rec.revoked_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.insert(rec);
        let auth = KeyAuthenticator::new(Arc::new(store));
        assert_eq!(auth.authenticate("k").await.unwrap(), "U1");
    }

    #[tokio::test]
    async fn test_lookup_retried_on_outage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut store = MockKeyStore::new();
        store.expect_lookup_key().returning(move |key| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(KeyStoreError::Unavailable("connection reset".to_string()))
            } else {
                Ok(record(key, "U9"))
            }
        });

        let auth = KeyAuthenticator::with_retry(Arc::new(store), fast_retry());
        assert_eq!(auth.authenticate("abc").await.unwrap(), "U9");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookup_outage_exhausts_retries() {
        let mut store = MockKeyStore::new();
        store
            .expect_lookup_key()
            .times(3)
            .returning(|_| Err(KeyStoreError::Unavailable("down".to_string())));

        let auth = KeyAuthenticator::with_retry(Arc::new(store), fast_retry());
        assert!(matches!(
            auth.authenticate("abc").await,
            Err(AuthError::Lookup(_))
        ));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut store = MockKeyStore::new();
        store
            .expect_lookup_key()
            .times(1)
            .returning(|_| Err(KeyStoreError::NotFound));

        let auth = KeyAuthenticator::with_retry(Arc::new(store), fast_retry());
        assert_eq!(auth.authenticate("abc").await, Err(AuthError::UnknownKey));
    }

    #[test]
    fn test_acquire_release() {
        let auth = KeyAuthenticator::new(Arc::new(StaticKeyStore::default()));
        auth.acquire("k", "s1").unwrap();
        auth.acquire("k", "s1").unwrap();
        assert_eq!(
            auth.acquire("k", "s2"),
            Err(AlreadyPublishing {
                holder: "s1".to_string()
            })
        );

        // someone else's release does nothing
        assert!(!auth.release("k", "s2"));
        assert_eq!(auth.holder("k").as_deref(), Some("s1"));

        assert!(auth.release("k", "s1"));
        assert!(!auth.release("k", "s1"));
        assert_eq!(auth.active_count(), 0);
        auth.acquire("k", "s2").unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_single_winner() {
        let auth = Arc::new(KeyAuthenticator::new(Arc::new(StaticKeyStore::default())));

        for round in 0..50 {
            let key = format!("race-{round}");
            let barrier = Arc::new(tokio::sync::Barrier::new(8));
            let mut handles = Vec::new();
            for contender in 0..8 {
                let auth = Arc::clone(&auth);
                let barrier = Arc::clone(&barrier);
                let key = key.clone();
                handles.push(tokio::spawn(async move {
                    barrier.wait().await;
                    auth.acquire(&key, &format!("session-{contender}")).is_ok()
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round}");
        }
    }

    #[test]
    fn test_extract_stream_key() {
        assert_eq!(extract_stream_key("key123"), "key123");
        assert_eq!(extract_stream_key("live?key=abc"), "abc");
        assert_eq!(extract_stream_key("live?foo=1&token=xyz"), "xyz");
        assert_eq!(extract_stream_key("key123?foo=bar"), "key123");
        assert_eq!(extract_stream_key("key123?key="), "key123");
    }
}
