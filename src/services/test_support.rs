//! Fixtures shared by the service tests.

use std::{collections::HashMap, io, sync::Arc, time::Duration};

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use tokio::{sync::mpsc, time::sleep};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        atomic::{AtomicStore, Counter, MemoryAtomicStore, VoteOutcome},
        models::{ConferenceStatus, OptionEntity, QuestionEntity, QuestionStatus},
        poll_store::{MemoryPollStore, PollStore},
        storage::{StorageError, StorageResult},
    },
    dto::ws::ServerMessage,
    services::authority::{self, ConferenceMeta},
    state::{AppState, Clock, ConnId, Connection, Room, SharedState},
};

pub const HOST: &str = "host";

pub struct Fixture {
    pub state: SharedState,
    pub atomic: MemoryAtomicStore,
    pub polls: MemoryPollStore,
}

/// State with in-memory stores and an active conference `c1` hosted by [`HOST`].
pub async fn fixture() -> Fixture {
    let atomic = MemoryAtomicStore::new();
    build(Arc::new(atomic.clone()), atomic).await
}

/// Like [`fixture`], with writes routed through a [`FaultyAtomicStore`].
pub async fn faulty_fixture() -> (Fixture, FaultyAtomicStore) {
    let atomic = MemoryAtomicStore::new();
    let faulty = FaultyAtomicStore::new(atomic.clone());
    (build(Arc::new(faulty.clone()), atomic).await, faulty)
}

async fn build(store: Arc<dyn AtomicStore>, atomic: MemoryAtomicStore) -> Fixture {
    let polls = MemoryPollStore::new();
    let state = AppState::with_clock(AppConfig::default(), store, None, Clock::anchored());
    state.set_poll_store(Arc::new(polls.clone())).await;

    authority::store_conference(
        &state,
        "c1",
        &ConferenceMeta {
            host_participant_id: HOST.into(),
            status: ConferenceStatus::Active,
        },
    )
    .await
    .unwrap();
    polls.save_question(question("q1")).await.unwrap();
    polls.save_question(question("q2")).await.unwrap();

    Fixture {
        state,
        atomic,
        polls,
    }
}

/// Three options, `B` correct.
pub fn question(id: &str) -> QuestionEntity {
    QuestionEntity {
        id: id.into(),
        conference_id: "c1".into(),
        text: format!("Question {id}"),
        options: ["A", "B", "C"]
            .into_iter()
            .map(|key| OptionEntity {
                key: key.into(),
                text: format!("Option {key}"),
            })
            .collect(),
        correct_option: "B".into(),
        status: QuestionStatus::Pending,
        result: None,
    }
}

/// Register a connection subscribed to `room` and return its inbox.
pub fn listen(
    state: &SharedState,
    participant_id: Option<&str>,
    room: Room,
) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    state.rooms().register(
        id,
        Connection {
            participant_id: participant_id.map(str::to_owned),
            tx,
        },
    );
    state.rooms().subscribe(&room, id);
    (id, rx)
}

/// Drain every message already queued for a connection.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// Messages of one kind in arrival order.
pub fn of_kind<'a>(messages: &'a [ServerMessage], kind: &str) -> Vec<&'a ServerMessage> {
    messages
        .iter()
        .filter(|message| message.kind() == kind)
        .collect()
}

/// Memory store whose writes to chosen keys can be slowed down or made to fail.
#[derive(Clone)]
pub struct FaultyAtomicStore {
    inner: MemoryAtomicStore,
    delays: Arc<DashMap<String, Duration>>,
    failures: Arc<DashSet<String>>,
}

impl FaultyAtomicStore {
    pub fn new(inner: MemoryAtomicStore) -> Self {
        Self {
            inner,
            delays: Arc::new(DashMap::new()),
            failures: Arc::new(DashSet::new()),
        }
    }

    /// Hold every later write to `key` for `delay` before applying it.
    pub fn delay(&self, key: impl Into<String>, delay: Duration) {
        self.delays.insert(key.into(), delay);
    }

    /// Make every later write to `key` fail without touching the store.
    pub fn fail(&self, key: impl Into<String>) {
        self.failures.insert(key.into());
    }

    pub fn heal(&self, key: &str) {
        self.delays.remove(key);
        self.failures.remove(key);
    }

    fn write<T: Send + 'static>(
        &self,
        key: &str,
        op: BoxFuture<'static, StorageResult<T>>,
    ) -> BoxFuture<'static, StorageResult<T>> {
        let delay = self.delays.get(key).map(|entry| *entry.value());
        let failing = self.failures.contains(key);
        let key = key.to_owned();
        Box::pin(async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if failing {
                return Err(StorageError::unavailable(
                    format!("injected failure on `{key}`"),
                    io::Error::other("injected"),
                ));
            }
            op.await
        })
    }
}

impl AtomicStore for FaultyAtomicStore {
    fn get(&self, key: String) -> BoxFuture<'static, StorageResult<Option<String>>> {
        self.inner.get(key)
    }

    fn set(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let guard = key.clone();
        self.write(&guard, self.inner.set(key, value, ttl))
    }

    fn set_if_absent(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let guard = key.clone();
        self.write(&guard, self.inner.set_if_absent(key, value, ttl))
    }

    fn delete(&self, keys: Vec<String>) -> BoxFuture<'static, StorageResult<u64>> {
        self.inner.delete(keys)
    }

    fn delete_if_equals(
        &self,
        key: String,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.delete_if_equals(key, expected)
    }

    fn replace_if_equals(
        &self,
        key: String,
        expected: String,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let guard = key.clone();
        self.write(&guard, self.inner.replace_if_equals(key, expected, value))
    }

    fn expire(&self, key: String, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.expire(key, ttl)
    }

    fn exists(&self, key: String) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.exists(key)
    }

    fn set_add(&self, key: String, member: String) -> BoxFuture<'static, StorageResult<bool>> {
        let guard = key.clone();
        self.write(&guard, self.inner.set_add(key, member))
    }

    fn set_remove(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.set_remove(key, member)
    }

    fn set_contains(
        &self,
        key: String,
        member: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.set_contains(key, member)
    }

    fn set_members(&self, key: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        self.inner.set_members(key)
    }

    fn set_len(&self, key: String) -> BoxFuture<'static, StorageResult<u64>> {
        self.inner.set_len(key)
    }

    fn hash_set_all(
        &self,
        key: String,
        fields: Vec<(String, String)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let guard = key.clone();
        self.write(&guard, self.inner.hash_set_all(key, fields))
    }

    fn hash_get_all(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<HashMap<String, String>>> {
        self.inner.hash_get_all(key)
    }

    /// Faults are keyed on the voters set.
    fn record_vote(
        &self,
        gate: String,
        voters: String,
        voter: String,
        counters: Vec<Counter>,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>> {
        let guard = voters.clone();
        self.write(&guard, self.inner.record_vote(gate, voters, voter, counters))
    }

    fn ping(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.ping()
    }
}
