//! Server-side caching_sha2_password fast-path cache.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

/// Stage-2 hashes (`SHA256(SHA256(password))`) keyed by `(user, host)`.
///
/// Populated after a successful full authentication; consulted on the next
/// handshake so the client can be admitted on its scramble alone. Entries
/// must be evicted whenever the user's credential changes.
#[derive(Debug, Default, Clone)]
pub struct Sha2Cache {
    entries: Arc<DashMap<(String, String), [u8; 32]>>,
}

static GLOBAL: LazyLock<Sha2Cache> = LazyLock::new(Sha2Cache::new);

impl Sha2Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by servers that do not bring their own.
    pub fn global() -> Sha2Cache {
        GLOBAL.clone()
    }

    pub fn get(&self, user: &str, host: &str) -> Option<[u8; 32]> {
        self.entries
            .get(&(user.to_string(), host.to_string()))
            .map(|entry| *entry)
    }

    pub fn insert(&self, user: &str, host: &str, stage2: [u8; 32]) {
        self.entries
            .insert((user.to_string(), host.to_string()), stage2);
    }

    /// Drop the entry for `(user, host)`; returns whether one existed.
    pub fn evict(&self, user: &str, host: &str) -> bool {
        self.entries
            .remove(&(user.to_string(), host.to_string()))
            .is_some()
    }

    /// Drop every entry for `user` regardless of host.
    pub fn evict_user(&self, user: &str) {
        self.entries.retain(|(u, _), _| u != user);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
