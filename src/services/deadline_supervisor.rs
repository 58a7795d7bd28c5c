//! Recovery sweep for live questions whose local countdown was lost.
//!
//! Every instance periodically walks the live index. Questions past their deadline
//! plus grace, or whose timer key already expired, are closed here; the close path is
//! idempotent so concurrent sweeps from several instances are harmless.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{atomic::keys, models::CloseReason},
    error::ServiceError,
    services::question_service,
    state::{SharedState, question_phase::CloseTrigger},
};

/// What the sweep did for one conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    /// Index entry without a live question; removed.
    Pruned,
    /// Overdue question closed (or found closed by another path).
    Closed { question_id: String },
    /// Countdown was missing on this instance and has been armed.
    Rearmed { question_id: String },
    /// Nothing to do.
    Healthy,
}

/// Sweep forever with a jittered interval so instances do not sweep in lockstep.
pub async fn run(state: SharedState) {
    let interval = state.config().sweep_interval;
    loop {
        sleep(interval + jitter(interval)).await;
        if let Err(err) = sweep_once(&state).await {
            warn!(error = %err, "deadline sweep failed");
        }
    }
}

fn jitter(interval: Duration) -> Duration {
    let max = (interval.as_millis() / 4) as u64;
    Duration::from_millis(rand::rng().random_range(0..=max))
}

/// Inspect every indexed conference once.
pub async fn sweep_once(state: &SharedState) -> Result<Vec<(String, SweepAction)>, ServiceError> {
    let conferences = state.atomic().set_members(keys::live_index()).await?;
    let mut actions = Vec::with_capacity(conferences.len());

    for conference_id in conferences {
        match sweep_conference(state, &conference_id).await {
            Ok(action) => {
                if action != SweepAction::Healthy {
                    debug!(conference_id = %conference_id, ?action, "sweep acted");
                }
                actions.push((conference_id, action));
            }
            Err(err) => {
                warn!(conference_id = %conference_id, error = %err, "sweep skipped conference");
            }
        }
    }
    Ok(actions)
}

async fn sweep_conference(
    state: &SharedState,
    conference_id: &str,
) -> Result<SweepAction, ServiceError> {
    let atomic = state.atomic();
    let Some((live, _)) = question_service::load_live(state, conference_id).await? else {
        atomic
            .set_remove(keys::live_index(), conference_id.to_owned())
            .await?;
        return Ok(SweepAction::Pruned);
    };

    let timer_alive = atomic.exists(keys::question_timer(conference_id)).await?;
    let overdue = state.clock().now() > live.expires_at + state.config().timer_grace;
    if !timer_alive || overdue {
        info!(
            conference_id = %conference_id,
            question_id = %live.question_id,
            timer_alive,
            "closing question left open past its deadline"
        );
        let trigger = CloseTrigger::Recovery {
            question_id: live.question_id.clone(),
        };
        question_service::close_question(state, conference_id, trigger, CloseReason::Timeout)
            .await?;
        return Ok(SweepAction::Closed {
            question_id: live.question_id,
        });
    }

    if !state.timers().is_armed(conference_id, &live.question_id) {
        question_service::arm_timer(state, &live);
        return Ok(SweepAction::Rearmed {
            question_id: live.question_id,
        });
    }
    Ok(SweepAction::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{atomic::AtomicStore, poll_store::PollStore},
        services::test_support::{HOST, fixture},
    };

    #[tokio::test(start_paused = true)]
    async fn lost_countdown_is_rearmed() {
        let fx = fixture().await;
        question_service::push_live(&fx.state, HOST, "c1", "q1", Some(30))
            .await
            .unwrap();
        fx.state.timers().cancel("c1", "q1");

        let actions = sweep_once(&fx.state).await.unwrap();
        assert_eq!(
            actions,
            vec![(
                "c1".to_owned(),
                SweepAction::Rearmed {
                    question_id: "q1".into()
                }
            )]
        );
        assert!(fx.state.timers().is_armed("c1", "q1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_timer_key_triggers_close() {
        let fx = fixture().await;
        question_service::push_live(&fx.state, HOST, "c1", "q1", Some(30))
            .await
            .unwrap();
        fx.state.timers().cancel("c1", "q1");
        fx.atomic
            .delete(vec![keys::question_timer("c1")])
            .await
            .unwrap();

        let actions = sweep_once(&fx.state).await.unwrap();
        assert!(matches!(actions[0].1, SweepAction::Closed { .. }));
        let result = fx.polls.find_result("q1".into()).await.unwrap().unwrap();
        assert_eq!(result.reason, CloseReason::Timeout);

        let actions = sweep_once(&fx.state).await.unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_index_entries_are_pruned() {
        let fx = fixture().await;
        fx.atomic
            .set_add(keys::live_index(), "gone".into())
            .await
            .unwrap();

        let actions = sweep_once(&fx.state).await.unwrap();
        assert_eq!(actions, vec![("gone".to_owned(), SweepAction::Pruned)]);
        assert!(fx.atomic.set_members(keys::live_index()).await.unwrap().is_empty());
    }
}
