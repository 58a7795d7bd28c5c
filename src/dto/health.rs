use serde::Serialize;
use utoipa::ToSchema;

/// Reachability of one backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    Ok,
    Unreachable,
}

impl StoreHealth {
    fn of(reachable: bool) -> Self {
        if reachable {
            StoreHealth::Ok
        } else {
            StoreHealth::Unreachable
        }
    }
}

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    /// Shared store holding live questions, votes and presence.
    pub atomic_store: StoreHealth,
    /// System of record for question definitions and final results.
    pub durable_store: StoreHealth,
}

impl HealthResponse {
    /// Summarise store reachability; any unreachable store degrades the service.
    pub fn new(atomic_reachable: bool, durable_reachable: bool) -> Self {
        let status = if atomic_reachable && durable_reachable {
            "ok"
        } else {
            "degraded"
        };
        Self {
            status: status.to_owned(),
            atomic_store: StoreHealth::of(atomic_reachable),
            durable_store: StoreHealth::of(durable_reachable),
        }
    }
}
