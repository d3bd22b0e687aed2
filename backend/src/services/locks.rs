//! Keyed async locks serializing ledger read-modify-write cycles
//!
//! Lock order: order locks are always taken before product locks.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Lock table keyed by record id.
///
/// Two read-modify-write cycles on the same record never interleave;
/// different records proceed in parallel.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Per-product locks, held around every stock write
pub type ProductLocks = KeyedLocks<String>;

/// Per-order locks, held from reading an order until its stock effects are applied
pub type OrderLocks = KeyedLocks<Uuid>;

/// Guards held for a set of keys; released on drop
pub struct HeldLocks {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot<Q>(&self, key: &Q) -> Arc<Mutex<()>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock<Q>(&self, key: &Q) -> OwnedMutexGuard<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.slot(key).lock_owned().await
    }

    /// Lock several keys at once.
    ///
    /// Keys are deduplicated and acquired in sorted order so two callers
    /// locking overlapping sets cannot deadlock.
    pub async fn lock_many<I, S>(&self, keys: I) -> HeldLocks
    where
        I: IntoIterator<Item = S>,
        S: Into<K>,
    {
        let mut keys: Vec<K> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.slot(key).lock_owned().await);
        }
        HeldLocks { _guards: guards }
    }

    /// Drop the slot of a deleted record if nobody holds it
    pub fn forget<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.locks
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
