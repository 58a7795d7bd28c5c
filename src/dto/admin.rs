//! DTO definitions used by the admin REST API and documentation layer.

use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{CloseReason, ConferenceStatus, FinalResultEntity, OptionEntity},
    dto::{
        format_system_time,
        validation::{validate_identifier, validate_option_key},
    },
};

/// Host and status of a conference, pushed by the conference-management system.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ConferenceSyncRequest {
    #[validate(custom(function = "validate_identifier"))]
    pub host_participant_id: String,
    pub status: ConferenceStatus,
}

/// Selectable answer of a registered question.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct OptionInput {
    #[validate(custom(function = "validate_option_key"))]
    pub key: String,
    #[validate(length(min = 1, max = 500))]
    pub text: String,
}

impl From<OptionInput> for OptionEntity {
    fn from(value: OptionInput) -> Self {
        Self {
            key: value.key,
            text: value.text,
        }
    }
}

/// Question definition registered ahead of a conference.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_question_input"))]
pub struct QuestionInput {
    #[validate(custom(function = "validate_identifier"))]
    pub conference_id: String,
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    #[validate(length(min = 2, max = 26), nested)]
    pub options: Vec<OptionInput>,
    pub correct_option: String,
}

fn validate_question_input(input: &QuestionInput) -> Result<(), ValidationError> {
    let mut keys = std::collections::HashSet::new();
    if !input.options.iter().all(|option| keys.insert(option.key.as_str())) {
        let mut err = ValidationError::new("duplicate_option_key");
        err.message = Some("Option keys must be unique".into());
        return Err(err);
    }
    if !keys.contains(input.correct_option.as_str()) {
        let mut err = ValidationError::new("unknown_correct_option");
        err.message = Some("Correct option must be one of the option keys".into());
        return Err(err);
    }
    Ok(())
}

/// Generic action acknowledgement used by admin endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}

/// Durable final result of a question.
#[derive(Debug, Serialize, ToSchema)]
pub struct FinalResultResponse {
    pub question_id: String,
    pub conference_id: String,
    #[schema(value_type = Object)]
    pub option_counts: IndexMap<String, u64>,
    pub total_votes: u64,
    pub correct_option: String,
    pub correct_count: u64,
    pub closed_at: String,
    pub reason: CloseReason,
}

impl From<FinalResultEntity> for FinalResultResponse {
    fn from(value: FinalResultEntity) -> Self {
        Self {
            question_id: value.question_id,
            conference_id: value.conference_id,
            option_counts: value.option_counts,
            total_votes: value.total_votes,
            correct_option: value.correct_option,
            correct_count: value.correct_count,
            closed_at: format_system_time(value.closed_at),
            reason: value.reason,
        }
    }
}

/// Outcome of ending a conference.
#[derive(Debug, Serialize, ToSchema)]
pub struct EndConferenceResponse {
    pub conference_id: String,
    /// Question that was live and got closed, if any.
    pub closed_question_id: Option<String>,
    pub ended_at: String,
}

impl EndConferenceResponse {
    pub fn new(conference_id: String, closed_question_id: Option<String>, at: SystemTime) -> Self {
        Self {
            conference_id,
            closed_question_id,
            ended_at: format_system_time(at),
        }
    }
}
