//! Vote recording: exactly one counted vote per participant and question.

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::{
    dao::atomic::{Counter, VoteOutcome, keys::VoteKeys},
    dto::ws::Role,
    error::ServiceError,
    services::{authority, poll_events, question_service},
    state::{
        SharedState,
        question_phase::{VoteRejection, check_vote},
        tally::TallyDecision,
    },
};

/// Record a vote and return whether it picked the correct option.
///
/// The duplicate check, the voter mark and the counter increments happen in one store
/// operation guarded by the question's vote gate, so a vote either lands before a close
/// freezes the counters or is refused as not live.
pub async fn submit(
    state: &SharedState,
    participant_id: &str,
    conference_id: &str,
    question_id: &str,
    option_key: &str,
) -> Result<bool, ServiceError> {
    if let Some(meta) = authority::load_conference(state, conference_id).await? {
        if meta.role_of(participant_id) == Role::Host {
            return Err(ServiceError::Unauthorized(
                "the host cannot vote in their own conference".into(),
            ));
        }
    }

    let live = question_service::load_live(state, conference_id)
        .await?
        .map(|(live, _)| live);
    let now = state.clock().now();
    let is_correct = check_vote(live.as_ref(), question_id, option_key, now).map_err(
        |rejection| match rejection {
            VoteRejection::NotLive => ServiceError::QuestionNotLive(question_id.to_owned()),
            VoteRejection::Expired => ServiceError::QuestionExpired(question_id.to_owned()),
            VoteRejection::InvalidOption => ServiceError::InvalidOption(option_key.to_owned()),
        },
    )?;

    let vote_keys = VoteKeys::new(conference_id, question_id);
    let mut counters = vec![
        Counter::Field {
            key: vote_keys.option_counts.clone(),
            field: option_key.to_owned(),
        },
        Counter::Key(vote_keys.total.clone()),
    ];
    if is_correct {
        counters.push(Counter::Key(vote_keys.correct.clone()));
    }

    let outcome = state
        .atomic()
        .record_vote(
            vote_keys.gate,
            vote_keys.voters,
            participant_id.to_owned(),
            counters,
        )
        .await;
    match outcome {
        Ok(VoteOutcome::Recorded) => {}
        Ok(VoteOutcome::Duplicate) => return Err(ServiceError::AlreadyAnswered),
        Ok(VoteOutcome::Closed) => {
            debug!(
                conference_id = %conference_id,
                question_id = %question_id,
                participant_id = %participant_id,
                "vote arrived after the close started"
            );
            return Err(ServiceError::QuestionNotLive(question_id.to_owned()));
        }
        Err(err) => {
            error!(
                conference_id = %conference_id,
                question_id = %question_id,
                participant_id = %participant_id,
                error = %err,
                "vote could not be recorded"
            );
            return Err(ServiceError::Internal(
                "vote could not be recorded, please retry".into(),
            ));
        }
    }

    debug!(
        conference_id = %conference_id,
        question_id = %question_id,
        participant_id = %participant_id,
        is_correct,
        "vote recorded"
    );
    schedule_tally(state, conference_id, question_id);
    Ok(is_correct)
}

/// Publish the running tally, at most once per configured interval per question.
fn schedule_tally(state: &SharedState, conference_id: &str, question_id: &str) {
    let key = question_service::tally_key(conference_id, question_id);
    let interval = state.config().tally_interval;
    let decision = state.tallies().on_vote(&key, interval);

    let delay = match decision {
        TallyDecision::Coalesced => return,
        TallyDecision::Now => None,
        TallyDecision::Trailing(delay) => Some(delay),
    };

    let state = state.clone();
    let conference_id = conference_id.to_owned();
    let question_id = question_id.to_owned();
    tokio::spawn(async move {
        if let Some(delay) = delay {
            sleep(delay).await;
            state.tallies().trailing_sent(&key);
        }
        publish_tally(&state, &conference_id, &question_id).await;
    });
}

async fn publish_tally(state: &SharedState, conference_id: &str, question_id: &str) {
    let live = match question_service::load_live(state, conference_id).await {
        Ok(Some((live, _))) if live.question_id == question_id => live,
        Ok(_) => return,
        Err(err) => {
            warn!(conference_id = %conference_id, error = %err, "tally skipped");
            return;
        }
    };
    match question_service::read_tally(state, &live).await {
        Ok(tally) => poll_events::broadcast_tally(state, &live, &tally),
        Err(err) => warn!(conference_id = %conference_id, error = %err, "tally skipped"),
    }
}
