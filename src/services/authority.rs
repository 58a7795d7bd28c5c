//! Role derivation from the cached conference host identity.
//!
//! Roles are never taken from the client: every privileged operation calls
//! [`require_host`] right before acting.

use tracing::warn;

use crate::{
    dao::{
        atomic::keys,
        models::ConferenceStatus,
        storage::{StorageError, StorageResult},
    },
    dto::ws::Role,
    error::ServiceError,
    state::SharedState,
};

const FIELD_HOST: &str = "host";
const FIELD_STATUS: &str = "status";

/// Cached identity and lifecycle of a conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceMeta {
    pub host_participant_id: String,
    pub status: ConferenceStatus,
}

impl ConferenceMeta {
    pub fn role_of(&self, participant_id: &str) -> Role {
        if self.host_participant_id == participant_id {
            Role::Host
        } else {
            Role::Audience
        }
    }
}

/// Single read of the conference meta hash; `None` when the conference is unknown.
pub async fn load_conference(
    state: &SharedState,
    conference_id: &str,
) -> StorageResult<Option<ConferenceMeta>> {
    let key = keys::conference_meta(conference_id);
    let fields = state.atomic().hash_get_all(key.clone()).await?;
    if fields.is_empty() {
        return Ok(None);
    }

    let host = fields
        .get(FIELD_HOST)
        .ok_or_else(|| StorageError::corrupt(key.as_str(), "missing host field"))?;
    let status = fields
        .get(FIELD_STATUS)
        .and_then(|status| ConferenceStatus::parse(status))
        .ok_or_else(|| StorageError::corrupt(key.as_str(), "missing or unknown status"))?;

    Ok(Some(ConferenceMeta {
        host_participant_id: host.clone(),
        status,
    }))
}

/// Write the cached host and status of a conference.
pub async fn store_conference(
    state: &SharedState,
    conference_id: &str,
    meta: &ConferenceMeta,
) -> StorageResult<()> {
    state
        .atomic()
        .hash_set_all(
            keys::conference_meta(conference_id),
            vec![
                (FIELD_HOST.to_owned(), meta.host_participant_id.clone()),
                (FIELD_STATUS.to_owned(), meta.status.as_str().to_owned()),
            ],
        )
        .await
}

/// Derive the caller's role, failing closed when the cache cannot be read.
pub async fn require_host(
    state: &SharedState,
    conference_id: &str,
    participant_id: &str,
) -> Result<ConferenceMeta, ServiceError> {
    let meta = match load_conference(state, conference_id).await {
        Ok(Some(meta)) => meta,
        Ok(None) => return Err(ServiceError::ConferenceNotActive(conference_id.to_owned())),
        Err(err) => {
            warn!(
                conference_id = %conference_id,
                error = %err,
                "host identity read failed; denying privileged action"
            );
            return Err(ServiceError::Unauthorized(
                "host identity could not be verified".into(),
            ));
        }
    };

    if meta.role_of(participant_id) != Role::Host {
        return Err(ServiceError::Unauthorized(
            "only the conference host may do this".into(),
        ));
    }
    if meta.status != ConferenceStatus::Active {
        return Err(ServiceError::ConferenceNotActive(conference_id.to_owned()));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::atomic::{AtomicStore, MemoryAtomicStore},
        state::AppState,
    };

    fn state_with(store: MemoryAtomicStore) -> SharedState {
        AppState::new(AppConfig::default(), Arc::new(store), None)
    }

    async fn seed(state: &SharedState, status: ConferenceStatus) {
        store_conference(
            state,
            "c1",
            &ConferenceMeta {
                host_participant_id: "host".into(),
                status,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn host_is_recognised() {
        let state = state_with(MemoryAtomicStore::new());
        seed(&state, ConferenceStatus::Active).await;

        assert!(require_host(&state, "c1", "host").await.is_ok());
        let err = require_host(&state, "c1", "u1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn ended_conference_is_not_active() {
        let state = state_with(MemoryAtomicStore::new());
        seed(&state, ConferenceStatus::Ended).await;

        let err = require_host(&state, "c1", "host").await.unwrap_err();
        assert!(matches!(err, ServiceError::ConferenceNotActive(_)));
    }

    #[tokio::test]
    async fn unreadable_cache_fails_closed() {
        let store = MemoryAtomicStore::new();
        store
            .set(keys::conference_meta("c1"), "not a hash".into(), None)
            .await
            .unwrap();
        let state = state_with(store);

        let err = require_host(&state, "c1", "host").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_conference_is_not_active() {
        let state = state_with(MemoryAtomicStore::new());
        let err = require_host(&state, "missing", "host").await.unwrap_err();
        assert!(matches!(err, ServiceError::ConferenceNotActive(_)));
    }
}
