use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;

/// One selectable answer of a question, in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionEntity {
    /// Short key voters submit (e.g. `A`).
    pub key: String,
    /// Text shown to participants.
    pub text: String,
}

/// Lifecycle status of a conference as cached in the atomic store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConferenceStatus {
    Active,
    Ended,
}

impl ConferenceStatus {
    /// Spelling stored in the conference meta hash.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferenceStatus::Active => "ACTIVE",
            ConferenceStatus::Ended => "ENDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(ConferenceStatus::Active),
            "ENDED" => Some(ConferenceStatus::Ended),
            _ => None,
        }
    }
}

/// Durable lifecycle marker of a question definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Never closed; may be pushed live.
    #[default]
    Pending,
    /// Closed once and carries its final result.
    Closed,
}

/// Question definition owned by the content system and read once per activation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEntity {
    pub id: String,
    pub conference_id: String,
    pub text: String,
    pub options: Vec<OptionEntity>,
    pub correct_option: String,
    #[serde(default)]
    pub status: QuestionStatus,
    #[serde(default)]
    pub result: Option<FinalResultEntity>,
}

/// Why a question stopped accepting votes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    Timeout,
}

impl CloseReason {
    /// Wire and storage spelling of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::Timeout => "timeout",
        }
    }
}

/// Final tally of a question, written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalResultEntity {
    pub question_id: String,
    pub conference_id: String,
    /// Votes per option key, in option order.
    pub option_counts: IndexMap<String, u64>,
    pub total_votes: u64,
    pub correct_option: String,
    pub correct_count: u64,
    pub closed_at: SystemTime,
    pub reason: CloseReason,
}

/// Ephemeral record of the question currently open for votes in a conference.
///
/// Stored as JSON in the atomic store; `correct_option` never leaves the server while
/// the question is live.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveQuestionEntity {
    pub question_id: String,
    pub conference_id: String,
    pub text: String,
    pub options: Vec<OptionEntity>,
    pub correct_option: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub started_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub expires_at: SystemTime,
    pub duration_secs: u64,
}

impl LiveQuestionEntity {
    /// Whether `key` names one of the declared options.
    pub fn has_option(&self, key: &str) -> bool {
        self.options.iter().any(|option| option.key == key)
    }

    /// Option keys in display order.
    pub fn option_keys(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|option| option.key.as_str())
    }
}
