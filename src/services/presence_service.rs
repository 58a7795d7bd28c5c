//! Conference membership bookkeeping and audience counts.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::{
    dao::{
        atomic::keys::{self, VoteKeys},
        models::ConferenceStatus,
    },
    dto::ws::{LiveQuestionPayload, Role, ServerMessage},
    error::ServiceError,
    services::{authority, poll_events, question_service},
    state::{ConnId, Room, SharedState},
};

/// Per-connection view of a participant.
#[derive(Debug, Clone)]
pub struct ParticipantSession {
    pub conn_id: ConnId,
    pub participant_id: String,
    /// Conferences left explicitly on this connection, skipped on disconnect.
    left: HashSet<String>,
}

impl ParticipantSession {
    pub fn new(conn_id: ConnId, participant_id: impl Into<String>) -> Self {
        Self {
            conn_id,
            participant_id: participant_id.into(),
            left: HashSet::new(),
        }
    }

    pub fn has_left(&self, conference_id: &str) -> bool {
        self.left.contains(conference_id)
    }
}

/// Join a conference and return the `joined` reply, replaying any live question.
pub async fn join(
    state: &SharedState,
    session: &mut ParticipantSession,
    conference_id: &str,
) -> Result<ServerMessage, ServiceError> {
    let meta = authority::load_conference(state, conference_id)
        .await?
        .ok_or_else(|| ServiceError::ConferenceNotActive(conference_id.to_owned()))?;
    if meta.status == ConferenceStatus::Ended {
        return Err(ServiceError::ConferenceEnded(conference_id.to_owned()));
    }
    let role = meta.role_of(&session.participant_id);

    let atomic = state.atomic();
    let added = atomic
        .set_add(
            keys::members(conference_id),
            session.participant_id.clone(),
        )
        .await?;
    atomic
        .set_add(
            keys::participant_conferences(&session.participant_id),
            conference_id.to_owned(),
        )
        .await?;

    let rooms = state.rooms();
    rooms.subscribe(&Room::Conference(conference_id.to_owned()), session.conn_id);
    if role == Role::Host {
        rooms.subscribe(&Room::Host(conference_id.to_owned()), session.conn_id);
    }
    session.left.remove(conference_id);

    let audience_count = refresh_count(state, conference_id).await?;
    if added {
        poll_events::broadcast_audience_count(state, conference_id, audience_count);
    }

    let (live_question, has_answered) =
        match question_service::load_live(state, conference_id).await? {
            Some((live, _)) => {
                let voters = VoteKeys::new(conference_id, &live.question_id).voters;
                let answered = atomic
                    .set_contains(voters, session.participant_id.clone())
                    .await?;
                (Some(LiveQuestionPayload::from(&live)), answered)
            }
            None => (None, false),
        };

    info!(
        conference_id = %conference_id,
        participant_id = %session.participant_id,
        ?role,
        audience_count,
        "participant joined conference"
    );

    Ok(ServerMessage::Joined {
        conference_id: conference_id.to_owned(),
        status: meta.status,
        role,
        live_question,
        audience_count,
        has_answered,
    })
}

/// Leave a conference explicitly.
pub async fn leave(
    state: &SharedState,
    session: &mut ParticipantSession,
    conference_id: &str,
) -> Result<ServerMessage, ServiceError> {
    let rooms = state.rooms();
    let conference_room = Room::Conference(conference_id.to_owned());
    rooms.unsubscribe(&conference_room, session.conn_id);
    rooms.unsubscribe(&Room::Host(conference_id.to_owned()), session.conn_id);
    session.left.insert(conference_id.to_owned());

    if !rooms.has_other_connection(&conference_room, &session.participant_id, session.conn_id) {
        remove_membership(state, &session.participant_id, conference_id).await?;
        state
            .atomic()
            .set_remove(
                keys::participant_conferences(&session.participant_id),
                conference_id.to_owned(),
            )
            .await?;
    }

    info!(
        conference_id = %conference_id,
        participant_id = %session.participant_id,
        "participant left conference"
    );
    Ok(ServerMessage::Left {
        conference_id: conference_id.to_owned(),
    })
}

/// Drop every membership of a connection that went away without leaving.
///
/// Conferences still held by another connection of the same participant on this
/// instance keep their membership, as do conferences this connection left explicitly.
pub async fn disconnect(
    state: &SharedState,
    session: &ParticipantSession,
) -> Result<(), ServiceError> {
    let reverse_key = keys::participant_conferences(&session.participant_id);
    let conferences = state.atomic().set_members(reverse_key.clone()).await?;
    let mut kept = Vec::new();

    for conference_id in conferences {
        let room = Room::Conference(conference_id.clone());
        if state
            .rooms()
            .has_other_connection(&room, &session.participant_id, session.conn_id)
        {
            kept.push(conference_id);
            continue;
        }
        // Still listed after an explicit leave: another tab held the membership, and
        // that tab's disconnect releases it.
        if session.has_left(&conference_id) {
            kept.push(conference_id);
            continue;
        }
        if let Err(err) = remove_membership(state, &session.participant_id, &conference_id).await
        {
            warn!(
                conference_id = %conference_id,
                participant_id = %session.participant_id,
                error = %err,
                "failed to drop presence on disconnect"
            );
        }
    }

    if kept.is_empty() {
        state.atomic().delete(vec![reverse_key]).await?;
    } else {
        let atomic = state.atomic();
        for conference_id in atomic.set_members(reverse_key.clone()).await? {
            if !kept.contains(&conference_id) {
                atomic.set_remove(reverse_key.clone(), conference_id).await?;
            }
        }
    }
    debug!(participant_id = %session.participant_id, "participant presence cleared");
    Ok(())
}

/// Audience size for dashboards, served from a short-lived cache.
pub async fn cached_audience_count(
    state: &SharedState,
    conference_id: &str,
) -> Result<u64, ServiceError> {
    let cached = state
        .atomic()
        .get(keys::audience_count_cache(conference_id))
        .await?;
    if let Some(count) = cached.and_then(|value| value.parse::<u64>().ok()) {
        return Ok(count);
    }
    refresh_count(state, conference_id).await
}

async fn remove_membership(
    state: &SharedState,
    participant_id: &str,
    conference_id: &str,
) -> Result<(), ServiceError> {
    let removed = state
        .atomic()
        .set_remove(keys::members(conference_id), participant_id.to_owned())
        .await?;
    if removed {
        let count = refresh_count(state, conference_id).await?;
        poll_events::broadcast_audience_count(state, conference_id, count);
    }
    Ok(())
}

/// Read the live member count and refresh the dashboard cache.
async fn refresh_count(state: &SharedState, conference_id: &str) -> Result<u64, ServiceError> {
    let atomic = state.atomic();
    let count = atomic.set_len(keys::members(conference_id)).await?;
    atomic
        .set(
            keys::audience_count_cache(conference_id),
            count.to_string(),
            Some(state.config().presence_cache_ttl),
        )
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::atomic::AtomicStore,
        services::test_support::{HOST, drain, fixture, listen, of_kind},
    };

    #[tokio::test]
    async fn last_tab_closing_drops_membership() {
        let fx = fixture().await;
        let (_, mut display) = listen(&fx.state, None, Room::Conference("c1".into()));
        let (first_id, _first_rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let (second_id, _second_rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let mut first = ParticipantSession::new(first_id, "u1");
        let mut second = ParticipantSession::new(second_id, "u1");

        join(&fx.state, &mut first, "c1").await.unwrap();
        join(&fx.state, &mut second, "c1").await.unwrap();
        assert_eq!(of_kind(&drain(&mut display), "audience_count").len(), 1);

        fx.state.rooms().unregister(first_id);
        disconnect(&fx.state, &first).await.unwrap();
        assert_eq!(cached_audience_count(&fx.state, "c1").await.unwrap(), 1);
        assert!(drain(&mut display).is_empty());

        fx.state.rooms().unregister(second_id);
        disconnect(&fx.state, &second).await.unwrap();
        assert_eq!(fx.atomic.set_len(keys::members("c1")).await.unwrap(), 0);
        assert_eq!(of_kind(&drain(&mut display), "audience_count").len(), 1);
    }

    #[tokio::test]
    async fn leave_then_disconnect_broadcasts_once() {
        let fx = fixture().await;
        let (_, mut display) = listen(&fx.state, None, Room::Conference("c1".into()));
        let (conn_id, _rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let mut session = ParticipantSession::new(conn_id, "u1");
        join(&fx.state, &mut session, "c1").await.unwrap();
        drain(&mut display);

        leave(&fx.state, &mut session, "c1").await.unwrap();
        fx.state.rooms().unregister(conn_id);
        disconnect(&fx.state, &session).await.unwrap();

        assert_eq!(of_kind(&drain(&mut display), "audience_count").len(), 1);
        assert_eq!(fx.atomic.set_len(keys::members("c1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tab_that_left_hands_membership_to_the_other_tab() {
        let fx = fixture().await;
        let (_, mut display) = listen(&fx.state, None, Room::Conference("c1".into()));
        let (left_id, _left_rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let (stay_id, _stay_rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let mut left = ParticipantSession::new(left_id, "u1");
        let mut stay = ParticipantSession::new(stay_id, "u1");
        join(&fx.state, &mut left, "c1").await.unwrap();
        join(&fx.state, &mut stay, "c1").await.unwrap();
        drain(&mut display);

        leave(&fx.state, &mut left, "c1").await.unwrap();
        assert!(drain(&mut display).is_empty());

        // Both sockets drop before either disconnect runs.
        fx.state.rooms().unregister(stay_id);
        fx.state.rooms().unregister(left_id);
        disconnect(&fx.state, &left).await.unwrap();
        assert!(drain(&mut display).is_empty());
        assert_eq!(fx.atomic.set_len(keys::members("c1")).await.unwrap(), 1);

        disconnect(&fx.state, &stay).await.unwrap();
        assert_eq!(of_kind(&drain(&mut display), "audience_count").len(), 1);
        assert_eq!(fx.atomic.set_len(keys::members("c1")).await.unwrap(), 0);
        assert!(!fx
            .atomic
            .exists(keys::participant_conferences("u1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn host_is_recognised_on_join() {
        let fx = fixture().await;
        let (conn_id, _rx) = listen(&fx.state, Some(HOST), Room::Host("other".into()));
        let mut session = ParticipantSession::new(conn_id, HOST);

        match join(&fx.state, &mut session, "c1").await.unwrap() {
            ServerMessage::Joined { role, .. } => assert_eq!(role, Role::Host),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(fx.state.rooms().subscriber_count(&Room::Host("c1".into())), 1);
    }

    #[tokio::test]
    async fn audience_count_is_served_from_cache() {
        let fx = fixture().await;
        let (conn_id, _rx) = listen(&fx.state, Some("u1"), Room::Host("other".into()));
        let mut session = ParticipantSession::new(conn_id, "u1");
        join(&fx.state, &mut session, "c1").await.unwrap();

        fx.atomic
            .set_add(keys::members("c1"), "u2".into())
            .await
            .unwrap();
        assert_eq!(cached_audience_count(&fx.state, "c1").await.unwrap(), 1);
    }
}
