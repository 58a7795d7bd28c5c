use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{poll_store::PollStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a durable store installed, switching to degraded mode while it is unreachable.
///
/// Live questions keep running on the atomic store while degraded; only pushes and
/// closes, which need the durable record, fail until the store comes back.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn PollStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_poll_store(store.clone()).await;
                info!("durable store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch(&state, store.as_ref()).await;
                warn!("durable store lost; reconnecting from scratch");
            }
            Err(err) => {
                warn!(error = %err, "durable store connection attempt failed");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the store health until reconnecting it in place gives up.
async fn watch(state: &SharedState, store: &dyn PollStore) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded().await {
                info!("durable store healthy again; leaving degraded mode");
                state.update_degraded(false).await;
            }
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        if !reconnect(state, store).await {
            warn!("exhausted durable store reconnect attempts; staying in degraded mode");
            return;
        }
        state.update_degraded(false).await;
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn PollStore) -> bool {
    let mut backoff = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "durable store reconnected after failed health check");
                return true;
            }
            Err(err) if attempt == 0 => {
                warn!(attempt, error = %err, "durable store reconnect failed; entering degraded mode");
                state.update_degraded(true).await;
            }
            Err(err) => warn!(attempt, error = %err, "durable store reconnect failed"),
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_DELAY);
    }
    false
}
