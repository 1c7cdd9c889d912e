//! Keyed single-flight cache of client handles.
//!
//! # Design
//!
//! - Each key maps to a [`Shared`] construction future. The first caller inserts it,
//!   every concurrent caller awaits the same future, so a key sees exactly one
//!   construction and all callers observe the same handle or the same error.
//! - A failed construction is removed from the map (only if it is still the entry
//!   that failed), returning the key to `Uncreated` so a later call may retry.
//! - The map lock is never held across an `.await` on a construction.
//! - Removal takes entries out under the lock and settles them outside it. Entries
//!   still under construction are awaited, so their handles can be shut down too.

use crate::error::RegistryResult;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;
use tracing::debug;

type Slot<V> = Shared<BoxFuture<'static, RegistryResult<V>>>;

/// Lifecycle of a single cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Uncreated,
    Constructing,
    Live,
}

pub struct ClientCache<K, V> {
    name: &'static str,
    entries: RwLock<HashMap<K, Slot<V>>>,
}

impl<K, V> ClientCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, constructing it with `init` on a miss.
    ///
    /// `init` is only called by the caller that creates the entry. A settled failure
    /// left in the map counts as a miss.
    pub async fn get_or_try_init<F>(&self, key: &K, init: F) -> RegistryResult<V>
    where
        F: FnOnce() -> BoxFuture<'static, RegistryResult<V>>,
    {
        let slot = {
            let entries = self.entries.read().await;
            entries.get(key).filter(|slot| !is_failed(slot)).cloned()
        };

        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut entries = self.entries.write().await;
                // Double-check after acquiring write lock
                match entries.get(key) {
                    Some(slot) if !is_failed(slot) => slot.clone(),
                    _ => {
                        debug!(cache = self.name, key = %key, "Constructing client");
                        let slot = init().shared();
                        entries.insert(key.clone(), slot.clone());
                        slot
                    }
                }
            }
        };

        let result = slot.clone().await;

        if result.is_err() {
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(|current| current.ptr_eq(&slot)) {
                entries.remove(key);
                debug!(cache = self.name, key = %key, "Construction failed, entry cleared");
            }
        }

        result
    }

    /// Cached value for `key` if its construction already succeeded.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .and_then(|slot| slot.peek().cloned())
            .and_then(Result::ok)
    }

    pub async fn state(&self, key: &K) -> EntryState {
        let entries = self.entries.read().await;
        match entries.get(key).map(|slot| slot.peek()) {
            None | Some(Some(Err(_))) => EntryState::Uncreated,
            Some(None) => EntryState::Constructing,
            Some(Some(Ok(_))) => EntryState::Live,
        }
    }

    /// Remove every entry whose key matches `predicate` and return the live values.
    ///
    /// Entries under construction are awaited; failed constructions are dropped.
    pub async fn remove_where<P>(&self, predicate: P) -> Vec<(K, V)>
    where
        P: Fn(&K) -> bool,
    {
        let removed: Vec<(K, Slot<V>)> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<K> = entries.keys().filter(|k| predicate(k)).cloned().collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|slot| (k, slot)))
                .collect()
        }; // Write lock released here

        Self::settle(removed).await
    }

    /// Remove every entry.
    pub async fn drain(&self) -> Vec<(K, V)> {
        let removed: Vec<(K, Slot<V>)> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        Self::settle(removed).await
    }

    async fn settle(removed: Vec<(K, Slot<V>)>) -> Vec<(K, V)> {
        let mut values = Vec::with_capacity(removed.len());
        for (key, slot) in removed {
            if let Ok(value) = slot.await {
                values.push((key, value));
            }
        }
        values
    }

    /// Keys with an entry under construction or live.
    pub async fn keys(&self) -> Vec<K> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, slot)| !is_failed(slot))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live (successfully constructed) entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|slot| matches!(slot.peek(), Some(Ok(_))))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A construction that settled with an error; only left behind when its waiter was
/// dropped before clearing it.
fn is_failed<V: Clone>(slot: &Slot<V>) -> bool {
    matches!(slot.peek(), Some(Err(_)))
}

impl<K, V> std::fmt::Debug for ClientCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
