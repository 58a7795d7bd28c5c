//! Pure decision rules of the question lifecycle (IDLE -> LIVE -> CLOSED).
//!
//! The services read the shared store, ask these functions what to do, then apply the
//! outcome with atomic primitives. Nothing here performs I/O.

use std::{collections::HashMap, time::SystemTime};

use indexmap::IndexMap;
use thiserror::Error;

use crate::dao::models::{LiveQuestionEntity, QuestionEntity};

/// Outcome of a push request against the current live question of a conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPlan {
    /// Conference is idle; open the question.
    Open,
    /// The same question is already live; extend its window and announce it again.
    Rebroadcast,
    /// Another question holds the conference.
    Conflict {
        /// Identifier of the question currently live.
        existing: String,
    },
}

/// Decide how a push of `question_id` interacts with the current live question.
pub fn plan_push(live: Option<&LiveQuestionEntity>, question_id: &str) -> PushPlan {
    match live {
        None => PushPlan::Open,
        Some(live) if live.question_id == question_id => PushPlan::Rebroadcast,
        Some(live) => PushPlan::Conflict {
            existing: live.question_id.clone(),
        },
    }
}

/// Who asked for a question to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseTrigger {
    /// Host command naming the question it believes is live.
    Manual { question_id: String },
    /// Local countdown armed for a specific question; only fires once its deadline passed.
    Timer { question_id: String },
    /// Recovery sweep that found this question past its deadline or without timer key.
    Recovery { question_id: String },
    /// Conference shutdown; closes whatever is live.
    Sweep,
}

/// What a close attempt should do with the live record it read.
#[derive(Debug, Clone, PartialEq)]
pub enum ClosePlan {
    /// Nothing to close for this trigger; emit nothing.
    Skip,
    /// Host targeted a question that is not live.
    NotLive,
    /// Compute the final tally of this live question.
    Close(LiveQuestionEntity),
}

/// Decide whether `trigger` closes the current live question at `now`.
///
/// A countdown that woke up for a deadline since moved by a re-push is skipped.
pub fn plan_close(
    live: Option<LiveQuestionEntity>,
    trigger: &CloseTrigger,
    now: SystemTime,
) -> ClosePlan {
    let Some(live) = live else {
        return ClosePlan::Skip;
    };

    match trigger {
        CloseTrigger::Manual { question_id } if *question_id != live.question_id => {
            ClosePlan::NotLive
        }
        CloseTrigger::Timer { question_id } | CloseTrigger::Recovery { question_id }
            if *question_id != live.question_id =>
        {
            ClosePlan::Skip
        }
        CloseTrigger::Timer { .. } if now < live.expires_at => ClosePlan::Skip,
        _ => ClosePlan::Close(live),
    }
}

/// Why a vote is refused before touching the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VoteRejection {
    #[error("question is not live")]
    NotLive,
    #[error("voting window has elapsed")]
    Expired,
    #[error("option is not declared by the question")]
    InvalidOption,
}

/// Check a vote against the live record, returning whether the chosen option is correct.
///
/// Votes are refused as soon as `now` passes `expires_at`, even while the live record
/// still exists.
pub fn check_vote(
    live: Option<&LiveQuestionEntity>,
    question_id: &str,
    option_key: &str,
    now: SystemTime,
) -> Result<bool, VoteRejection> {
    let live = live
        .filter(|live| live.question_id == question_id)
        .ok_or(VoteRejection::NotLive)?;
    if now > live.expires_at {
        return Err(VoteRejection::Expired);
    }
    if !live.has_option(option_key) {
        return Err(VoteRejection::InvalidOption);
    }
    Ok(live.correct_option == option_key)
}

/// Reason a stored question definition cannot be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("a question needs at least two options")]
    TooFewOptions,
    #[error("option key `{0}` is declared twice")]
    DuplicateOption(String),
    #[error("correct option `{0}` is not among the options")]
    UnknownCorrectOption(String),
}

pub fn validate_definition(question: &QuestionEntity) -> Result<(), DefinitionError> {
    if question.options.len() < 2 {
        return Err(DefinitionError::TooFewOptions);
    }
    let mut seen = std::collections::HashSet::new();
    for option in &question.options {
        if !seen.insert(option.key.as_str()) {
            return Err(DefinitionError::DuplicateOption(option.key.clone()));
        }
    }
    if !seen.contains(question.correct_option.as_str()) {
        return Err(DefinitionError::UnknownCorrectOption(
            question.correct_option.clone(),
        ));
    }
    Ok(())
}

/// Aggregated counters of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    /// Votes per option key, in option order.
    pub option_counts: IndexMap<String, u64>,
    pub total_votes: u64,
    pub correct_count: u64,
}

/// Raw counter values read back from the shared store.
#[derive(Debug, Clone, Default)]
pub struct RawCounters {
    pub option_counts: HashMap<String, String>,
    pub total: Option<String>,
    pub correct: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("counter `{name}` holds a non-numeric value `{value}`")]
pub struct CounterParseError {
    pub name: String,
    pub value: String,
}

impl Tally {
    /// Build a tally in the option order of `live`; missing counters read as zero.
    pub fn from_counters(
        live: &LiveQuestionEntity,
        raw: &RawCounters,
    ) -> Result<Self, CounterParseError> {
        let option_counts = live
            .option_keys()
            .map(|key| {
                parse_counter(key, raw.option_counts.get(key)).map(|count| (key.to_owned(), count))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;

        Ok(Self {
            option_counts,
            total_votes: parse_counter("total", raw.total.as_ref())?,
            correct_count: parse_counter("correct", raw.correct.as_ref())?,
        })
    }

    /// Share of each option in percent, rounded to one decimal; all zero without votes.
    pub fn percentages(&self) -> IndexMap<String, f64> {
        self.option_counts
            .iter()
            .map(|(key, count)| {
                let share = if self.total_votes == 0 {
                    0.0
                } else {
                    (*count as f64 * 1000.0 / self.total_votes as f64).round() / 10.0
                };
                (key.clone(), share)
            })
            .collect()
    }
}

fn parse_counter(name: &str, value: Option<&String>) -> Result<u64, CounterParseError> {
    match value {
        None => Ok(0),
        Some(value) => value.parse::<u64>().map_err(|_| CounterParseError {
            name: name.to_owned(),
            value: value.clone(),
        }),
    }
}
