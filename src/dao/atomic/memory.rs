//! In-process [`AtomicStore`] for single-instance deployments and tests.
//!
//! All entries live behind one async mutex, so every trait call is atomic just like a
//! single command against a real key/value server. Expiry is evaluated lazily on
//! access against the tokio clock.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{sync::Mutex, time::Instant};

use crate::dao::{
    atomic::{AtomicStore, Counter, VoteOutcome},
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[derive(Debug, Default)]
struct Shelf {
    entries: HashMap<String, Entry>,
}

impl Shelf {
    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| deadline <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn text(&mut self, key: &str) -> StorageResult<Option<&mut String>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str) -> StorageResult<Option<&mut HashSet<String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash(&mut self, key: &str) -> StorageResult<Option<&mut HashMap<String, String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn counter_value(&mut self, counter: &Counter) -> StorageResult<i64> {
        let (raw, label) = match counter {
            Counter::Key(key) => (self.text(key)?.map(|text| text.clone()), key.clone()),
            Counter::Field { key, field } => (
                self.hash(key)?.and_then(|hash| hash.get(field).cloned()),
                format!("{key}#{field}"),
            ),
        };
        match raw {
            None => Ok(0),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StorageError::corrupt(label, "value is not an integer")),
        }
    }

    fn write_counter(&mut self, counter: &Counter, value: i64) {
        match counter {
            Counter::Key(key) => {
                let expires_at = self.entries.get(key).and_then(|entry| entry.expires_at);
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Text(value.to_string()),
                        expires_at,
                    },
                );
            }
            Counter::Field { key, field } => {
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
                if let Value::Hash(hash) = &mut entry.value {
                    hash.insert(field.clone(), value.to_string());
                }
            }
        }
    }
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::corrupt(key, "operation against a key holding the wrong kind of value")
}

/// [`AtomicStore`] backed by a process-local map.
#[derive(Clone, Default)]
pub struct MemoryAtomicStore {
    shelf: Arc<Mutex<Shelf>>,
}

impl MemoryAtomicStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn run<T, F>(&self, op: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Shelf) -> StorageResult<T> + Send + 'static,
    {
        let shelf = self.shelf.clone();
        Box::pin(async move {
            let mut guard = shelf.lock().await;
            op(&mut *guard)
        })
    }
}

impl AtomicStore for MemoryAtomicStore {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>> {
        self.run(move |shelf| Ok(shelf.text(&key)?.map(|text| text.clone())))
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |shelf| {
            shelf.entries.insert(key, Entry::new(Value::Text(value), ttl));
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| {
            if shelf.entry(&key).is_some() {
                return Ok(false);
            }
            shelf.entries.insert(key, Entry::new(Value::Text(value), ttl));
            Ok(true)
        })
    }

    fn delete(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<u64>> {
        self.run(move |shelf| {
            let mut removed = 0;
            for key in keys {
                shelf.purge_expired(&key);
                if shelf.entries.remove(&key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn delete_if_equals(
        &self,
        key: String,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| {
            let matches = shelf.text(&key)?.is_some_and(|text| *text == expected);
            if matches {
                shelf.entries.remove(&key);
            }
            Ok(matches)
        })
    }

    fn replace_if_equals(
        &self,
        key: String,
        expected: String,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| {
            let Some(text) = shelf.text(&key)? else {
                return Ok(false);
            };
            if *text != expected {
                return Ok(false);
            }
            *text = value;
            Ok(true)
        })
    }

    fn expire(&self, key: String, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| match shelf.entry(&key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn exists(&self, key: String) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| Ok(shelf.entry(&key).is_some()))
    }

    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| {
            if let Some(set) = shelf.set(&key)? {
                return Ok(set.insert(member));
            }
            shelf.entries.insert(
                key,
                Entry::new(Value::Set(HashSet::from([member])), None),
            );
            Ok(true)
        })
    }

    fn set_remove(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| {
            let Some(set) = shelf.set(&key)? else {
                return Ok(false);
            };
            let removed = set.remove(&member);
            if set.is_empty() {
                shelf.entries.remove(&key);
            }
            Ok(removed)
        })
    }

    fn set_contains(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(move |shelf| Ok(shelf.set(&key)?.is_some_and(|set| set.contains(&member))))
    }

    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        self.run(move |shelf| {
            Ok(shelf
                .set(&key)?
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn set_len(&self, key: String) -> BoxFuture<'static, StorageResult<u64>> {
        self.run(move |shelf| Ok(shelf.set(&key)?.map_or(0, |set| set.len() as u64)))
    }

    fn hash_set_all(
        &self,
        key: String,
        fields: Vec<(String, String)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |shelf| {
            if let Some(hash) = shelf.hash(&key)? {
                hash.extend(fields);
                return Ok(());
            }
            shelf.entries.insert(
                key,
                Entry::new(Value::Hash(fields.into_iter().collect()), None),
            );
            Ok(())
        })
    }

    fn hash_get_all(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<HashMap<String, String>>> {
        self.run(move |shelf| Ok(shelf.hash(&key)?.map(|hash| hash.clone()).unwrap_or_default()))
    }

    fn record_vote(
        &self,
        gate: String,
        voters: String,
        voter: String,
        counters: Vec<Counter>,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>> {
        self.run(move |shelf| {
            if shelf.entry(&gate).is_none() {
                return Ok(VoteOutcome::Closed);
            }
            if shelf.set(&voters)?.is_some_and(|set| set.contains(&voter)) {
                return Ok(VoteOutcome::Duplicate);
            }
            let next = counters
                .iter()
                .map(|counter| shelf.counter_value(counter).map(|value| value + 1))
                .collect::<StorageResult<Vec<_>>>()?;

            if shelf.set(&voters)?.is_none() {
                shelf.entries.insert(
                    voters,
                    Entry::new(Value::Set(HashSet::from([voter])), None),
                );
            } else if let Some(set) = shelf.set(&voters)? {
                set.insert(voter);
            }
            for (counter, value) in counters.iter().zip(next) {
                shelf.write_counter(counter, value);
            }
            Ok(VoteOutcome::Recorded)
        })
    }

    fn ping(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_only_writes_once() {
        let store = MemoryAtomicStore::new();
        assert!(store.set_if_absent("lock".into(), "a".into(), None).await.unwrap());
        assert!(!store.set_if_absent("lock".into(), "b".into(), None).await.unwrap());
        assert_eq!(store.get("lock".into()).await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_disappear() {
        let store = MemoryAtomicStore::new();
        store
            .set_if_absent("lock".into(), "a".into(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(!store.exists("lock".into()).await.unwrap());
        assert!(store.set_if_absent("lock".into(), "b".into(), None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_spares_other_holders() {
        let store = MemoryAtomicStore::new();
        store.set("lock".into(), "mine".into(), None).await.unwrap();

        assert!(!store.delete_if_equals("lock".into(), "theirs".into()).await.unwrap());
        assert!(store.delete_if_equals("lock".into(), "mine".into()).await.unwrap());
        assert!(!store.exists("lock".into()).await.unwrap());
    }

    #[tokio::test]
    async fn set_add_reports_new_members() {
        let store = MemoryAtomicStore::new();
        assert!(store.set_add("voters".into(), "u1".into()).await.unwrap());
        assert!(!store.set_add("voters".into(), "u1".into()).await.unwrap());
        assert_eq!(store.set_len("voters".into()).await.unwrap(), 1);

        assert!(store.set_remove("voters".into(), "u1".into()).await.unwrap());
        assert!(!store.set_remove("voters".into(), "u1".into()).await.unwrap());
        assert!(!store.exists("voters".into()).await.unwrap());
    }

    fn vote_counters() -> Vec<Counter> {
        vec![
            Counter::Field {
                key: "counts".into(),
                field: "A".into(),
            },
            Counter::Key("total".into()),
        ]
    }

    #[tokio::test]
    async fn record_vote_is_all_or_nothing() {
        let store = MemoryAtomicStore::new();
        store.set("gate".into(), "open".into(), None).await.unwrap();
        store
            .hash_set_all("counts".into(), vec![("A".into(), "0".into())])
            .await
            .unwrap();
        store.set("total".into(), "oops".into(), None).await.unwrap();

        let outcome = store
            .record_vote("gate".into(), "voters".into(), "u1".into(), vote_counters())
            .await;
        assert!(outcome.is_err());

        let counts = store.hash_get_all("counts".into()).await.unwrap();
        assert_eq!(counts.get("A").map(String::as_str), Some("0"));
        assert!(!store.exists("voters".into()).await.unwrap());
    }

    #[tokio::test]
    async fn record_vote_counts_each_voter_once() {
        let store = MemoryAtomicStore::new();
        store.set("gate".into(), "open".into(), None).await.unwrap();

        let vote = |voter: &str| {
            store.record_vote("gate".into(), "voters".into(), voter.into(), vote_counters())
        };
        assert_eq!(vote("u1").await.unwrap(), VoteOutcome::Recorded);
        assert_eq!(vote("u1").await.unwrap(), VoteOutcome::Duplicate);
        assert_eq!(vote("u2").await.unwrap(), VoteOutcome::Recorded);
        assert_eq!(store.get("total".into()).await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn record_vote_without_gate_writes_nothing() {
        let store = MemoryAtomicStore::new();
        let outcome = store
            .record_vote("gate".into(), "voters".into(), "u1".into(), vote_counters())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Closed);
        assert!(!store.exists("voters".into()).await.unwrap());
        assert!(!store.exists("total".into()).await.unwrap());
        assert!(!store.exists("counts".into()).await.unwrap());
    }

    #[tokio::test]
    async fn replace_if_equals_needs_the_expected_value() {
        let store = MemoryAtomicStore::new();
        assert!(!store
            .replace_if_equals("live".into(), "v1".into(), "v2".into())
            .await
            .unwrap());
        assert!(!store.exists("live".into()).await.unwrap());

        store.set("live".into(), "v1".into(), None).await.unwrap();
        assert!(!store
            .replace_if_equals("live".into(), "other".into(), "v2".into())
            .await
            .unwrap());
        assert!(store
            .replace_if_equals("live".into(), "v1".into(), "v2".into())
            .await
            .unwrap());
        assert_eq!(store.get("live".into()).await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn wrong_type_access_is_reported() {
        let store = MemoryAtomicStore::new();
        store.set("plain".into(), "x".into(), None).await.unwrap();
        assert!(store.set_add("plain".into(), "m".into()).await.is_err());
    }
}
