//! Per-question countdown tasks owned by this instance.

use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

struct TimerEntry {
    question_id: String,
    token: Uuid,
    handle: AbortHandle,
}

/// Local close timers, at most one per conference.
///
/// The deadline itself lives in the shared store; these entries only track which
/// countdown task this instance runs so it can be cancelled or replaced.
#[derive(Default)]
pub struct QuestionTimers {
    entries: DashMap<String, TimerEntry>,
}

impl QuestionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned countdown, aborting any countdown it replaces.
    pub fn arm(&self, conference_id: &str, question_id: &str, token: Uuid, handle: AbortHandle) {
        let previous = self.entries.insert(
            conference_id.to_owned(),
            TimerEntry {
                question_id: question_id.to_owned(),
                token,
                handle,
            },
        );
        if let Some(previous) = previous.filter(|previous| previous.token != token) {
            previous.handle.abort();
        }
    }

    /// Abort the countdown of `question_id`; other questions' timers are left alone.
    pub fn cancel(&self, conference_id: &str, question_id: &str) -> bool {
        match self
            .entries
            .remove_if(conference_id, |_, entry| entry.question_id == question_id)
        {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the entry owned by a countdown that is about to fire.
    pub fn release(&self, conference_id: &str, token: Uuid) {
        self.entries
            .remove_if(conference_id, |_, entry| entry.token == token);
    }

    pub fn is_armed(&self, conference_id: &str, question_id: &str) -> bool {
        self.entries
            .get(conference_id)
            .is_some_and(|entry| entry.question_id == question_id && !entry.handle.is_finished())
    }
}
