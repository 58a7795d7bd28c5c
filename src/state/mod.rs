mod clock;
pub mod question_phase;
pub mod rooms;
pub mod tally;
pub mod timers;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{atomic::AtomicStore, poll_store::PollStore},
    error::ServiceError,
};

pub use self::clock::Clock;
pub use self::rooms::{ConnId, Connection, Room, Rooms};
use self::{tally::TallyThrottle, timers::QuestionTimers};

pub type SharedState = Arc<AppState>;

/// Central application state: store handles, local connections and local timers.
///
/// Everything that must agree across instances lives in the atomic store; the fields
/// here are either handles to it or bookkeeping for work this process performs.
pub struct AppState {
    config: Arc<AppConfig>,
    atomic: Arc<dyn AtomicStore>,
    poll_store: RwLock<Option<Arc<dyn PollStore>>>,
    degraded: watch::Sender<bool>,
    rooms: Rooms,
    timers: QuestionTimers,
    tallies: TallyThrottle,
    clock: Clock,
    admin_token: Option<String>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a durable store is installed.
    pub fn new(
        config: AppConfig,
        atomic: Arc<dyn AtomicStore>,
        admin_token: Option<String>,
    ) -> SharedState {
        Self::with_clock(config, atomic, admin_token, Clock::system())
    }

    /// Same as [`AppState::new`] with an explicit deadline clock.
    pub fn with_clock(
        config: AppConfig,
        atomic: Arc<dyn AtomicStore>,
        admin_token: Option<String>,
        clock: Clock,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config: Arc::new(config),
            atomic,
            poll_store: RwLock::new(None),
            degraded: degraded_tx,
            rooms: Rooms::new(),
            timers: QuestionTimers::new(),
            tallies: TallyThrottle::new(),
            clock,
            admin_token,
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Shared atomic store holding live question state.
    pub fn atomic(&self) -> &Arc<dyn AtomicStore> {
        &self.atomic
    }

    /// Obtain a handle to the current durable store, if one is installed.
    pub async fn poll_store(&self) -> Option<Arc<dyn PollStore>> {
        let guard = self.poll_store.read().await;
        guard.as_ref().cloned()
    }

    /// Durable store handle, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_poll_store(&self) -> Result<Arc<dyn PollStore>, ServiceError> {
        self.poll_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new durable store implementation and leave degraded mode.
    pub async fn set_poll_store(&self, store: Arc<dyn PollStore>) {
        {
            let mut guard = self.poll_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Room hub of every connection served by this instance.
    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    /// Local close countdowns keyed by conference.
    pub fn timers(&self) -> &QuestionTimers {
        &self.timers
    }

    pub fn tallies(&self) -> &TallyThrottle {
        &self.tallies
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Token operators must present on admin routes; `None` disables them.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }
}
