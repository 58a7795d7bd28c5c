use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe both stores and summarise their reachability.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let atomic_reachable = match state.atomic().ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "atomic store ping failed");
            false
        }
    };

    let durable_reachable = match state.poll_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => !state.is_degraded().await,
            Err(err) => {
                warn!(error = %err, "durable store health check failed");
                false
            }
        },
        None => {
            warn!("durable store unavailable (degraded mode)");
            false
        }
    };

    HealthResponse::new(atomic_reachable, durable_reachable)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{atomic::MemoryAtomicStore, poll_store::MemoryPollStore},
        state::AppState,
    };

    #[tokio::test]
    async fn degraded_until_durable_store_installed() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryAtomicStore::new()),
            None,
        );
        assert_eq!(health_status(&state).await.status, "degraded");

        state.set_poll_store(Arc::new(MemoryPollStore::new())).await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
