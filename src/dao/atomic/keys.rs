//! Key layout inside the atomic store.

const PREFIX: &str = "poll";

/// Hash holding the cached `host` and `status` of a conference.
pub fn conference_meta(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:meta")
}

/// JSON record of the live question of a conference.
pub fn live_question(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:live")
}

/// Lock serialising concurrent pushes on one conference.
pub fn push_lock(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:push_lock")
}

/// Deadline marker that expires shortly after the voting window.
pub fn question_timer(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:timer")
}

pub fn members(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:members")
}

pub fn audience_count_cache(conference_id: &str) -> String {
    format!("{PREFIX}:conf:{conference_id}:audience_count")
}

/// Reverse index of conferences a participant has joined.
pub fn participant_conferences(participant_id: &str) -> String {
    format!("{PREFIX}:participant:{participant_id}:conferences")
}

/// Conferences that currently have a live question, scanned by the recovery sweeper.
pub fn live_index() -> String {
    format!("{PREFIX}:live_conferences")
}

/// Keys making up the vote record of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteKeys {
    /// Present while the question accepts votes; removed when a close starts.
    pub gate: String,
    pub voters: String,
    pub option_counts: String,
    pub total: String,
    pub correct: String,
}

impl VoteKeys {
    pub fn new(conference_id: &str, question_id: &str) -> Self {
        let base = format!("{PREFIX}:conf:{conference_id}:q:{question_id}");
        Self {
            gate: format!("{base}:open"),
            voters: format!("{base}:voters"),
            option_counts: format!("{base}:counts"),
            total: format!("{base}:total"),
            correct: format!("{base}:correct"),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![
            self.gate.clone(),
            self.voters.clone(),
            self.option_counts.clone(),
            self.total.clone(),
            self.correct.clone(),
        ]
    }
}
