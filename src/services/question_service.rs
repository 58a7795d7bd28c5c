//! Question lifecycle: push under the conference lock, timer-driven and manual close.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        atomic::keys::{self, VoteKeys},
        models::{
            CloseReason, FinalResultEntity, LiveQuestionEntity, QuestionEntity, QuestionStatus,
        },
        storage::{StorageError, StorageResult},
    },
    dto::{format_system_time, ws::ServerMessage},
    error::ServiceError,
    services::{authority, poll_events},
    state::{
        SharedState,
        question_phase::{
            ClosePlan, CloseTrigger, PushPlan, RawCounters, Tally, plan_close, plan_push,
            validate_definition,
        },
    },
};

const LOCK_RETRY: Duration = Duration::from_millis(25);

/// Read the live question of a conference along with its raw stored form.
pub async fn load_live(
    state: &SharedState,
    conference_id: &str,
) -> StorageResult<Option<(LiveQuestionEntity, String)>> {
    let key = keys::live_question(conference_id);
    let Some(raw) = state.atomic().get(key.clone()).await? else {
        return Ok(None);
    };
    let live = serde_json::from_str::<LiveQuestionEntity>(&raw)
        .map_err(|err| StorageError::corrupt(key, err.to_string()))?;
    Ok(Some((live, raw)))
}

/// Read the vote counters of a question.
pub async fn read_counters(state: &SharedState, vote_keys: &VoteKeys) -> StorageResult<RawCounters> {
    let atomic = state.atomic();
    Ok(RawCounters {
        option_counts: atomic.hash_get_all(vote_keys.option_counts.clone()).await?,
        total: atomic.get(vote_keys.total.clone()).await?,
        correct: atomic.get(vote_keys.correct.clone()).await?,
    })
}

/// Read the counters of `live` and fold them into a [`Tally`].
pub async fn read_tally(state: &SharedState, live: &LiveQuestionEntity) -> Result<Tally, ServiceError> {
    let vote_keys = VoteKeys::new(&live.conference_id, &live.question_id);
    let raw = read_counters(state, &vote_keys).await?;
    Tally::from_counters(live, &raw)
        .map_err(|err| StorageError::corrupt(err.name.clone(), err.to_string()).into())
}

/// Open `question_id` in `conference_id`, or announce it again when it is already live.
pub async fn push_live(
    state: &SharedState,
    participant_id: &str,
    conference_id: &str,
    question_id: &str,
    duration_secs: Option<u64>,
) -> Result<ServerMessage, ServiceError> {
    authority::require_host(state, conference_id, participant_id).await?;
    let duration = resolve_duration(state, duration_secs)?;

    let token = lock_conference(state, conference_id, Duration::ZERO).await?;

    let push_lock_ttl = state.config().push_lock_ttl;
    let outcome = match timeout(
        push_lock_ttl,
        push_locked(state, conference_id, question_id, duration),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(
                conference_id = %conference_id,
                question_id = %question_id,
                "push exceeded the lock lifetime"
            );
            Err(ServiceError::Timeout)
        }
    };

    unlock_conference(state, conference_id, token).await;
    outcome
}

/// Take the conference lock shared by pushes and closes, retrying for up to `patience`.
async fn lock_conference(
    state: &SharedState,
    conference_id: &str,
    patience: Duration,
) -> Result<String, ServiceError> {
    let ttl = state.config().push_lock_ttl;
    let key = keys::push_lock(conference_id);
    let token = Uuid::new_v4().to_string();
    let deadline = Instant::now() + patience;
    loop {
        let acquired = state
            .atomic()
            .set_if_absent(key.clone(), token.clone(), Some(ttl))
            .await?;
        if acquired {
            return Ok(token);
        }
        if Instant::now() >= deadline {
            return Err(ServiceError::OperationInProgress);
        }
        sleep(LOCK_RETRY).await;
    }
}

async fn unlock_conference(state: &SharedState, conference_id: &str, token: String) {
    if let Err(err) = state
        .atomic()
        .delete_if_equals(keys::push_lock(conference_id), token)
        .await
    {
        warn!(conference_id = %conference_id, error = %err, "failed to release conference lock");
    }
}

fn resolve_duration(state: &SharedState, requested: Option<u64>) -> Result<Duration, ServiceError> {
    let config = state.config();
    match requested {
        None => Ok(config.default_duration),
        Some(secs) if secs >= 1 && secs <= config.max_duration.as_secs() => {
            Ok(Duration::from_secs(secs))
        }
        Some(secs) => Err(ServiceError::InvalidInput(format!(
            "duration must be between 1 and {} seconds (got {secs})",
            config.max_duration.as_secs()
        ))),
    }
}

async fn push_locked(
    state: &SharedState,
    conference_id: &str,
    question_id: &str,
    duration: Duration,
) -> Result<ServerMessage, ServiceError> {
    let store = state.require_poll_store().await?;
    let question = store
        .find_question(question_id.to_owned())
        .await?
        .filter(|question| question.conference_id == conference_id)
        .ok_or_else(|| ServiceError::QuestionNotFound(question_id.to_owned()))?;
    if question.status == QuestionStatus::Closed {
        return Err(ServiceError::QuestionAlreadyClosed(question_id.to_owned()));
    }
    validate_definition(&question).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let current = load_live(state, conference_id).await?;
    let now = state.clock().now();
    let atomic = state.atomic();
    let live_key = keys::live_question(conference_id);
    let timer_ttl = duration + state.config().timer_grace;

    match plan_push(current.as_ref().map(|(live, _)| live), question_id) {
        PushPlan::Conflict { existing } => Err(ServiceError::QuestionAlreadyLive { existing }),
        PushPlan::Rebroadcast => {
            let Some((mut live, raw)) = current else {
                return Err(ServiceError::Internal("live question vanished".into()));
            };
            live.expires_at = now + duration;
            live.duration_secs = duration.as_secs();
            if !atomic.replace_if_equals(live_key, raw, encode(&live)?).await? {
                return Err(ServiceError::QuestionNotLive(question_id.to_owned()));
            }
            atomic
                .set(
                    keys::question_timer(conference_id),
                    question_id.to_owned(),
                    Some(timer_ttl),
                )
                .await?;
            arm_timer(state, &live);
            poll_events::broadcast_live(state, &live);
            info!(
                conference_id = %conference_id,
                question_id = %question_id,
                "live question announced again with a fresh deadline"
            );
            Ok(pushed(&live, true))
        }
        PushPlan::Open => {
            let live = LiveQuestionEntity {
                question_id: question.id.clone(),
                conference_id: conference_id.to_owned(),
                text: question.text.clone(),
                options: question.options.clone(),
                correct_option: question.correct_option.clone(),
                started_at: now,
                expires_at: now + duration,
                duration_secs: duration.as_secs(),
            };
            let encoded = encode(&live)?;

            // The live record goes in last: the sweeper prunes index entries without one,
            // while a live record the index does not list would never be recovered.
            if let Err(err) = prepare_open(state, &question, timer_ttl).await {
                discard_open(state, conference_id, question_id).await;
                return Err(err);
            }
            if !atomic.set_if_absent(live_key, encoded, None).await? {
                discard_open(state, conference_id, question_id).await;
                let existing = load_live(state, conference_id)
                    .await?
                    .map(|(live, _)| live.question_id)
                    .unwrap_or_default();
                return Err(ServiceError::QuestionAlreadyLive { existing });
            }
            // A sweep running between the first index write and the live record may have
            // pruned the entry.
            if let Err(err) = atomic
                .set_add(keys::live_index(), conference_id.to_owned())
                .await
            {
                warn!(conference_id = %conference_id, error = %err, "failed to refresh live index");
            }

            poll_events::broadcast_live(state, &live);
            arm_timer(state, &live);
            info!(
                conference_id = %conference_id,
                question_id = %question_id,
                duration_secs = live.duration_secs,
                "question is live"
            );
            Ok(pushed(&live, false))
        }
    }
}

/// Index the conference, seed the vote record and the deadline marker of a new question.
async fn prepare_open(
    state: &SharedState,
    question: &QuestionEntity,
    timer_ttl: Duration,
) -> Result<(), ServiceError> {
    let atomic = state.atomic();
    let conference_id = &question.conference_id;
    atomic
        .set_add(keys::live_index(), conference_id.clone())
        .await?;

    let vote_keys = VoteKeys::new(conference_id, &question.id);
    atomic
        .hash_set_all(
            vote_keys.option_counts.clone(),
            question
                .options
                .iter()
                .map(|option| (option.key.clone(), "0".to_owned()))
                .collect(),
        )
        .await?;
    atomic.set(vote_keys.total, "0".into(), None).await?;
    atomic.set(vote_keys.correct, "0".into(), None).await?;
    atomic.set(vote_keys.gate, "open".into(), None).await?;
    atomic
        .set(
            keys::question_timer(conference_id),
            question.id.clone(),
            Some(timer_ttl),
        )
        .await?;
    Ok(())
}

/// Undo [`prepare_open`] for a question that did not become live.
async fn discard_open(state: &SharedState, conference_id: &str, question_id: &str) {
    let atomic = state.atomic();
    if let Err(err) = atomic
        .delete(VoteKeys::new(conference_id, question_id).all())
        .await
    {
        warn!(conference_id = %conference_id, error = %err, "failed to discard vote record");
    }
    if let Err(err) = atomic
        .delete_if_equals(keys::question_timer(conference_id), question_id.to_owned())
        .await
    {
        warn!(conference_id = %conference_id, error = %err, "failed to discard deadline marker");
    }
}

fn encode(live: &LiveQuestionEntity) -> Result<String, ServiceError> {
    serde_json::to_string(live)
        .map_err(|err| ServiceError::Internal(format!("failed to encode live question: {err}")))
}

fn pushed(live: &LiveQuestionEntity, rebroadcast: bool) -> ServerMessage {
    ServerMessage::Pushed {
        conference_id: live.conference_id.clone(),
        question_id: live.question_id.clone(),
        started_at: format_system_time(live.started_at),
        expires_at: format_system_time(live.expires_at),
        rebroadcast,
    }
}

/// Host command closing the live question immediately.
pub async fn close_by_host(
    state: &SharedState,
    participant_id: &str,
    conference_id: &str,
    question_id: &str,
) -> Result<Option<Tally>, ServiceError> {
    authority::require_host(state, conference_id, participant_id).await?;
    close_question(
        state,
        conference_id,
        CloseTrigger::Manual {
            question_id: question_id.to_owned(),
        },
        CloseReason::Manual,
    )
    .await
}

/// Close the live question of `conference_id` at most once across every caller.
///
/// Returns the final tally when this call performed the close, `None` when there was
/// nothing to close or another path won. The close holds the conference lock, so it
/// never interleaves with a push. When the durable write fails the ephemeral keys are
/// left in place so a later attempt can recompute the result.
pub async fn close_question(
    state: &SharedState,
    conference_id: &str,
    trigger: CloseTrigger,
    reason: CloseReason,
) -> Result<Option<Tally>, ServiceError> {
    let patience = state.config().push_lock_ttl;
    let token = lock_conference(state, conference_id, patience).await?;
    let outcome = close_locked(state, conference_id, trigger, reason).await;
    unlock_conference(state, conference_id, token).await;
    outcome
}

async fn close_locked(
    state: &SharedState,
    conference_id: &str,
    trigger: CloseTrigger,
    reason: CloseReason,
) -> Result<Option<Tally>, ServiceError> {
    let Some((live, raw)) = load_live(state, conference_id).await? else {
        debug!(conference_id = %conference_id, ?trigger, "no live question to close");
        return Ok(None);
    };
    let live = match plan_close(Some(live), &trigger, state.clock().now()) {
        ClosePlan::Skip => {
            debug!(conference_id = %conference_id, ?trigger, "stale close ignored");
            return Ok(None);
        }
        ClosePlan::NotLive => {
            let question_id = match trigger {
                CloseTrigger::Manual { question_id }
                | CloseTrigger::Timer { question_id }
                | CloseTrigger::Recovery { question_id } => question_id,
                CloseTrigger::Sweep => String::new(),
            };
            return Err(ServiceError::QuestionNotLive(question_id));
        }
        ClosePlan::Close(live) => live,
    };

    // Shut the vote gate first: every vote accepted from here on is already counted.
    let gate = VoteKeys::new(conference_id, &live.question_id).gate;
    let atomic = state.atomic();
    atomic.delete(vec![gate.clone()]).await?;
    let prepared = async {
        let tally = read_tally(state, &live).await?;
        let store = state.require_poll_store().await?;
        Ok::<_, ServiceError>((tally, store))
    }
    .await;
    let (tally, store) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            if let Err(reopen) = atomic.set(gate, "open".into(), None).await {
                warn!(conference_id = %conference_id, error = %reopen, "failed to reopen voting");
            }
            return Err(err);
        }
    };

    let closed_at = state.clock().now();
    let result = FinalResultEntity {
        question_id: live.question_id.clone(),
        conference_id: live.conference_id.clone(),
        option_counts: tally.option_counts.clone(),
        total_votes: tally.total_votes,
        correct_option: live.correct_option.clone(),
        correct_count: tally.correct_count,
        closed_at,
        reason,
    };

    // A failed write may still have landed, so voting stays shut until a retry decides.
    let written = store.close_question_once(result).await?;
    if !written {
        info!(
            conference_id = %conference_id,
            question_id = %live.question_id,
            "question already closed elsewhere; clearing leftovers"
        );
        release_live(state, &live, raw).await;
        return Ok(None);
    }

    if let Err(err) = atomic
        .delete_if_equals(keys::live_question(conference_id), raw.clone())
        .await
    {
        warn!(conference_id = %conference_id, error = %err, "failed to delete live question");
    }
    poll_events::broadcast_closed_and_results(state, &live, &tally, reason, closed_at);
    info!(
        conference_id = %conference_id,
        question_id = %live.question_id,
        reason = reason.as_str(),
        total_votes = tally.total_votes,
        "question closed"
    );
    release_live(state, &live, raw).await;
    Ok(Some(tally))
}

/// Remove every ephemeral trace of a closed question; safe to repeat.
async fn release_live(state: &SharedState, live: &LiveQuestionEntity, raw: String) {
    let atomic = state.atomic();
    let conference_id = &live.conference_id;
    let mut doomed = VoteKeys::new(conference_id, &live.question_id).all();

    // The timer key only names the question; drop it unless a new question took over.
    if atomic
        .get(keys::question_timer(conference_id))
        .await
        .ok()
        .flatten()
        .is_some_and(|owner| owner == live.question_id)
    {
        doomed.push(keys::question_timer(conference_id));
    }

    if let Err(err) = atomic
        .delete_if_equals(keys::live_question(conference_id), raw)
        .await
    {
        warn!(conference_id = %conference_id, error = %err, "failed to delete live question");
    }
    if let Err(err) = atomic.delete(doomed).await {
        warn!(conference_id = %conference_id, error = %err, "failed to delete vote record");
    }
    let still_live = atomic
        .exists(keys::live_question(conference_id))
        .await
        .unwrap_or(true);
    if !still_live {
        if let Err(err) = atomic
            .set_remove(keys::live_index(), conference_id.clone())
            .await
        {
            warn!(conference_id = %conference_id, error = %err, "failed to update live index");
        }
    }

    state
        .tallies()
        .clear(&tally_key(conference_id, &live.question_id));
    state.timers().cancel(conference_id, &live.question_id);
}

pub(crate) fn tally_key(conference_id: &str, question_id: &str) -> String {
    format!("{conference_id}:{question_id}")
}

/// Start (or restart) the local countdown closing `live` at its deadline.
pub fn arm_timer(state: &SharedState, live: &LiveQuestionEntity) {
    let token = Uuid::new_v4();
    let task_state = state.clone();
    let conference_id = live.conference_id.clone();
    let question_id = live.question_id.clone();
    let handle = tokio::spawn(run_countdown(
        task_state,
        conference_id.clone(),
        question_id.clone(),
        token,
    ));
    state
        .timers()
        .arm(&conference_id, &question_id, token, handle.abort_handle());
}

async fn run_countdown(state: SharedState, conference_id: String, question_id: String, token: Uuid) {
    loop {
        let live = match load_live(&state, &conference_id).await {
            Ok(Some((live, _))) if live.question_id == question_id => live,
            Ok(_) => {
                state.timers().release(&conference_id, token);
                return;
            }
            Err(err) => {
                // The recovery sweep re-arms the countdown once the store answers again.
                warn!(conference_id = %conference_id, error = %err, "countdown could not read live question");
                state.timers().release(&conference_id, token);
                return;
            }
        };

        let remaining = state.clock().until(live.expires_at);
        if remaining.is_zero() {
            break;
        }
        sleep(remaining).await;
    }

    state.timers().release(&conference_id, token);
    let trigger = CloseTrigger::Timer {
        question_id: question_id.clone(),
    };
    if let Err(err) = close_question(&state, &conference_id, trigger, CloseReason::Timeout).await {
        warn!(
            conference_id = %conference_id,
            question_id = %question_id,
            error = %err,
            "timed close failed; recovery sweep will retry"
        );
    }
}
