//! Shared atomic state store: the single source of live truth while a question runs.
//!
//! Every primitive here is atomic at the store level (conditional set, set add with
//! result, batched increments), so correctness holds across several server instances
//! sharing one store without any in-process lock.

pub mod keys;
pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use std::{collections::HashMap, time::Duration};

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

pub use memory::MemoryAtomicStore;

/// Counter bumped by [`AtomicStore::record_vote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Counter {
    /// Plain integer key.
    Key(String),
    /// Integer field inside a hash.
    Field { key: String, field: String },
}

/// Result of [`AtomicStore::record_vote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Voter added and every counter incremented.
    Recorded,
    /// The voter was already in the set; nothing changed.
    Duplicate,
    /// The gate key is gone, voting on this question is over; nothing changed.
    Closed,
}

/// Key/value primitives the polling core relies on.
pub trait AtomicStore: Send + Sync {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>>;
    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Write only if the key is absent; `true` when this call created it.
    fn set_if_absent(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn delete(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<u64>>;
    /// Delete the key only while it still holds `expected`.
    fn delete_if_equals(
        &self,
        key: String,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Overwrite the key only while it still holds `expected`.
    fn replace_if_equals(
        &self,
        key: String,
        expected: String,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn expire(&self, key: String, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>>;
    fn exists(&self, key: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Add a member; `true` when it was not present before.
    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove a member; `true` when it was present.
    fn set_remove(&self, key: String, member: String)
    -> BoxFuture<'static, StorageResult<bool>>;
    fn set_contains(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    fn set_len(&self, key: String) -> BoxFuture<'static, StorageResult<u64>>;
    fn hash_set_all(
        &self,
        key: String,
        fields: Vec<(String, String)>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn hash_get_all(&self, key: String)
    -> BoxFuture<'static, StorageResult<HashMap<String, String>>>;
    /// While `gate` exists, add `voter` to `voters` and increment every counter by one,
    /// all as a single operation. Counters are validated before anything is written.
    fn record_vote(
        &self,
        gate: String,
        voters: String,
        voter: String,
        counters: Vec<Counter>,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>>;
    fn ping(&self) -> BoxFuture<'static, StorageResult<()>>;
}
