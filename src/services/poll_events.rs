//! Broadcast helpers turning poll state into room messages.

use std::time::SystemTime;

use tracing::debug;

use crate::{
    dao::models::{CloseReason, LiveQuestionEntity},
    dto::{
        format_system_time,
        ws::{LiveQuestionPayload, ResultsPayload, ServerMessage},
    },
    state::{Room, SharedState, question_phase::Tally},
};

/// Announce a live question to the conference room.
pub fn broadcast_live(state: &SharedState, live: &LiveQuestionEntity) {
    let message = ServerMessage::Live(LiveQuestionPayload::from(live));
    send_conference_event(state, &live.conference_id, &message);
}

/// Announce the close of a question, then reveal its results.
pub fn broadcast_closed_and_results(
    state: &SharedState,
    live: &LiveQuestionEntity,
    tally: &Tally,
    reason: CloseReason,
    closed_at: SystemTime,
) {
    let closed = ServerMessage::Closed {
        conference_id: live.conference_id.clone(),
        question_id: live.question_id.clone(),
        closed_at: format_system_time(closed_at),
        reason,
    };
    send_conference_event(state, &live.conference_id, &closed);

    let results = ServerMessage::Results(ResultsPayload::new(live, tally, closed_at));
    send_conference_event(state, &live.conference_id, &results);
}

/// Publish running counts to the audience and, with the correct count, to the host room.
pub fn broadcast_tally(state: &SharedState, live: &LiveQuestionEntity, tally: &Tally) {
    send_conference_event(state, &live.conference_id, &ServerMessage::tally(live, tally));
    send_host_event(
        state,
        &live.conference_id,
        &ServerMessage::host_tally(live, tally),
    );
}

pub fn broadcast_audience_count(state: &SharedState, conference_id: &str, count: u64) {
    let message = ServerMessage::AudienceCount {
        conference_id: conference_id.to_owned(),
        count,
    };
    send_conference_event(state, conference_id, &message);
}

pub fn broadcast_conference_ended(state: &SharedState, conference_id: &str) {
    let message = ServerMessage::ConferenceEnded {
        conference_id: conference_id.to_owned(),
    };
    send_conference_event(state, conference_id, &message);
}

fn send_conference_event(state: &SharedState, conference_id: &str, message: &ServerMessage) {
    let delivered = state
        .rooms()
        .broadcast(&Room::Conference(conference_id.to_owned()), message);
    debug!(
        conference_id = %conference_id,
        event = message.kind(),
        delivered,
        "conference event broadcast"
    );
}

fn send_host_event(state: &SharedState, conference_id: &str, message: &ServerMessage) {
    state
        .rooms()
        .broadcast(&Room::Host(conference_id.to_owned()), message);
}
