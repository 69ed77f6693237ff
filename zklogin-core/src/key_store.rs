//! Process-wide, time-bounded storage of ephemeral keypairs keyed by session id.
//!
//! Entries never touch durable storage. A restart discards every session.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use tracing::debug;

use crate::keys::{EphemeralKeyPair, EphemeralPublicKey};

/// Source of the current time in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time, in seconds since the Unix epoch.
    fn now_epoch_seconds(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs())
    }
}

/// A clock that only moves when told to. Used to test expiry without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Public result of issuing a new ephemeral key.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// Opaque session identifier.
    pub session_id: String,
    /// Public half of the new keypair.
    pub public_key: EphemeralPublicKey,
    /// Expiry, in seconds since the Unix epoch.
    pub expires_at: u64,
}

/// Storage contract for ephemeral keypairs.
///
/// Implementations may be durable (an external key-value store) as long as they keep these
/// semantics: last writer wins on `put`, expired entries are invisible to `get` even before they
/// are swept, and `sweep_expired` bounds the resident size by the number of live sessions.
pub trait EphemeralKeyStore: Send + Sync {
    /// Stores a keypair, replacing any previous entry for the session.
    fn put(&self, session_id: &str, key_pair: EphemeralKeyPair);

    /// Returns the live keypair for the session, if any.
    fn get(&self, session_id: &str) -> Option<Arc<EphemeralKeyPair>>;

    /// Drops the session. Returns whether an entry existed.
    fn delete(&self, session_id: &str) -> bool;

    /// Removes all expired entries. Returns how many were removed.
    fn sweep_expired(&self) -> usize;

    /// Number of resident entries, expired or not.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current time as seen by the store.
    fn now_epoch_seconds(&self) -> u64;

    /// Generates a fresh keypair for a new session and stores it.
    fn issue(&self, ttl: Duration) -> IssuedKey {
        let session_id = uuid::Uuid::new_v4().to_string();
        let expires_at = self.now_epoch_seconds().saturating_add(ttl.as_secs());
        let key_pair = EphemeralKeyPair::generate(expires_at);
        let public_key = *key_pair.public_key();
        self.put(&session_id, key_pair);
        IssuedKey {
            session_id,
            public_key,
            expires_at,
        }
    }
}

/// In-memory key store backed by a sharded concurrent map.
///
/// Mutations lock a single shard, so a sweep never blocks readers of other shards and never
/// holds a lock across a proof invocation.
pub struct InMemoryKeyStore {
    entries: DashMap<String, Arc<EphemeralKeyPair>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKeyStore {
    /// Creates an empty store on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryKeyStore")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl EphemeralKeyStore for InMemoryKeyStore {
    fn put(&self, session_id: &str, key_pair: EphemeralKeyPair) {
        self.entries
            .insert(session_id.to_string(), Arc::new(key_pair));
    }

    fn get(&self, session_id: &str) -> Option<Arc<EphemeralKeyPair>> {
        let now = self.clock.now_epoch_seconds();
        let entry = self.entries.get(session_id)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(Arc::clone(entry.value()))
    }

    fn delete(&self, session_id: &str) -> bool {
        self.entries.remove(session_id).is_some()
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_epoch_seconds();
        let before = self.entries.len();
        self.entries.retain(|_, key_pair| !key_pair.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "swept expired ephemeral keys");
        }
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn now_epoch_seconds(&self) -> u64 {
        self.clock.now_epoch_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const NOW: u64 = 1_700_000_000;

    fn store() -> (Arc<ManualClock>, InMemoryKeyStore) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = InMemoryKeyStore::with_clock(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_put_then_get() {
        let (_, store) = store();
        store.put("session", EphemeralKeyPair::from_seed([1u8; 32], NOW + 60));

        let key_pair = store.get("session").expect("live entry");
        assert_eq!(key_pair.expiry_epoch_seconds(), NOW + 60);
        assert!(store.get("other").is_none());
    }

    #[test]
    fn test_already_expired_entry_is_absent() {
        let (_, store) = store();
        store.put("session", EphemeralKeyPair::from_seed([1u8; 32], NOW - 1));

        assert!(store.get("session").is_none());
        // still resident until swept
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let (_, store) = store();
        let first = EphemeralKeyPair::from_seed([1u8; 32], NOW + 60);
        let second = EphemeralKeyPair::from_seed([2u8; 32], NOW + 120);
        let second_public = *second.public_key();

        store.put("session", first);
        store.put("session", second);

        let key_pair = store.get("session").unwrap();
        assert_eq!(*key_pair.public_key(), second_public);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let (_, store) = store();
        store.put("session", EphemeralKeyPair::from_seed([1u8; 32], NOW + 60));

        assert!(store.delete("session"));
        assert!(!store.delete("session"));
        assert!(store.get("session").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let (clock, store) = store();
        store.put("short", EphemeralKeyPair::from_seed([1u8; 32], NOW + 10));
        store.put("long", EphemeralKeyPair::from_seed([2u8; 32], NOW + 1000));

        assert_eq!(store.sweep_expired(), 0);

        clock.advance(Duration::from_secs(11));
        assert!(store.get("short").is_none());
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").is_some());
    }

    #[test]
    fn test_issue_stores_a_fresh_key() {
        let (_, store) = store();
        let issued = store.issue(Duration::from_secs(600));

        assert_eq!(issued.expires_at, NOW + 600);
        let key_pair = store.get(&issued.session_id).expect("issued key is stored");
        assert_eq!(*key_pair.public_key(), issued.public_key);

        let other = store.issue(Duration::from_secs(600));
        assert_ne!(other.session_id, issued.session_id);
        assert_ne!(other.public_key, issued.public_key);
    }

    #[test]
    fn test_concurrent_put_delete_sweep() {
        let (_, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8u8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..200u64 {
                        let session = format!("{worker}-{}", round % 10);
                        let expiry = if round % 3 == 0 { NOW - 1 } else { NOW + 60 };
                        store.put(&session, EphemeralKeyPair::from_seed([worker; 32], expiry));
                        if round % 7 == 0 {
                            store.delete(&session);
                        }
                        if round % 11 == 0 {
                            store.sweep_expired();
                        }
                        if let Some(key_pair) = store.get(&session) {
                            assert!(!key_pair.is_expired(NOW));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        store.sweep_expired();
        assert!(store.len() <= 80);
    }
}
