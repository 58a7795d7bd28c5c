use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{CloseReason, ConferenceStatus, LiveQuestionEntity},
    dto::{
        format_system_time,
        validation::{validate_identifier, validate_option_key},
    },
    error::ErrorCode,
    state::question_phase::Tally,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from participant WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame of every connection; the id comes from the upstream auth layer.
    Identify { participant_id: String },
    Join { conference_id: String },
    Leave { conference_id: String },
    /// Host only: open a question or announce it again.
    PushLive {
        conference_id: String,
        question_id: String,
        /// Voting window in seconds.
        #[serde(default)]
        duration: Option<u64>,
    },
    /// Host only: close the live question now.
    Close {
        conference_id: String,
        question_id: String,
    },
    /// Audience only: vote for an option.
    Submit {
        conference_id: String,
        question_id: String,
        option_key: String,
    },
    #[serde(other)]
    Unknown,
}

/// Failure to turn a text frame into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ClientMessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ClientMessageError> {
        let message = serde_json::from_str::<Self>(text)?;
        message.validate()?;
        Ok(message)
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut check = |field: &'static str, value: &str| {
            if let Err(e) = validate_identifier(value) {
                errors.add(field, e);
            }
        };

        match self {
            ClientMessage::Identify { participant_id } => check("participant_id", participant_id),
            ClientMessage::Join { conference_id } | ClientMessage::Leave { conference_id } => {
                check("conference_id", conference_id)
            }
            ClientMessage::PushLive {
                conference_id,
                question_id,
                ..
            }
            | ClientMessage::Close {
                conference_id,
                question_id,
            }
            | ClientMessage::Submit {
                conference_id,
                question_id,
                ..
            } => {
                check("conference_id", conference_id);
                check("question_id", question_id);
            }
            ClientMessage::Unknown => {}
        }

        if let ClientMessage::Submit { option_key, .. } = self {
            if let Err(e) = validate_option_key(option_key) {
                errors.add("option_key", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Role of a participant within one conference, derived server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Audience,
}

/// Option as shown to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptionPayload {
    pub key: String,
    pub text: String,
}

/// Live question as broadcast to the audience; never carries the correct option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LiveQuestionPayload {
    pub conference_id: String,
    pub question_id: String,
    pub question_text: String,
    pub options: Vec<OptionPayload>,
    /// RFC 3339 timestamp.
    pub started_at: String,
    /// RFC 3339 timestamp after which votes are refused.
    pub expires_at: String,
    pub duration_seconds: u64,
}

impl From<&LiveQuestionEntity> for LiveQuestionPayload {
    fn from(live: &LiveQuestionEntity) -> Self {
        Self {
            conference_id: live.conference_id.clone(),
            question_id: live.question_id.clone(),
            question_text: live.text.clone(),
            options: live
                .options
                .iter()
                .map(|option| OptionPayload {
                    key: option.key.clone(),
                    text: option.text.clone(),
                })
                .collect(),
            started_at: format_system_time(live.started_at),
            expires_at: format_system_time(live.expires_at),
            duration_seconds: live.duration_secs,
        }
    }
}

/// Final figures of a closed question, revealing the correct option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultsPayload {
    pub conference_id: String,
    pub question_id: String,
    #[schema(value_type = Object)]
    pub option_counts: IndexMap<String, u64>,
    /// Share of each option in percent, one decimal.
    #[schema(value_type = Object)]
    pub percentages: IndexMap<String, f64>,
    pub total_votes: u64,
    pub correct_option: String,
    pub correct_count: u64,
    pub closed_at: String,
}

impl ResultsPayload {
    pub fn new(
        live: &LiveQuestionEntity,
        tally: &Tally,
        closed_at: std::time::SystemTime,
    ) -> Self {
        Self {
            conference_id: live.conference_id.clone(),
            question_id: live.question_id.clone(),
            option_counts: tally.option_counts.clone(),
            percentages: tally.percentages(),
            total_votes: tally.total_votes,
            correct_option: live.correct_option.clone(),
            correct_count: tally.correct_count,
            closed_at: format_system_time(closed_at),
        }
    }
}

/// Running counts of the live question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TallyPayload {
    pub conference_id: String,
    pub question_id: String,
    pub total_votes: u64,
    #[schema(value_type = Object)]
    pub option_counts: IndexMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// Messages pushed to participant connections and display streams.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Identified {
        participant_id: String,
    },
    Joined {
        conference_id: String,
        status: ConferenceStatus,
        role: Role,
        live_question: Option<LiveQuestionPayload>,
        audience_count: u64,
        /// Whether this participant already voted on the live question.
        has_answered: bool,
    },
    Left {
        conference_id: String,
    },
    Pushed {
        conference_id: String,
        question_id: String,
        started_at: String,
        expires_at: String,
        /// `true` when the question was already live and only announced again.
        rebroadcast: bool,
    },
    Live(LiveQuestionPayload),
    Closed {
        conference_id: String,
        question_id: String,
        closed_at: String,
        reason: CloseReason,
    },
    Results(ResultsPayload),
    Tally(TallyPayload),
    /// Host room only: tally including how many voters picked the correct option.
    HostTally {
        conference_id: String,
        question_id: String,
        total_votes: u64,
        #[schema(value_type = Object)]
        option_counts: IndexMap<String, u64>,
        correct_count: u64,
    },
    AudienceCount {
        conference_id: String,
        count: u64,
    },
    Accepted {
        question_id: String,
        is_correct: bool,
    },
    Rejected {
        question_id: String,
        code: ErrorCode,
        reason: String,
        message: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    ConferenceEnded {
        conference_id: String,
    },
}

impl ServerMessage {
    /// Value of the `type` tag, reused as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Identified { .. } => "identified",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Left { .. } => "left",
            ServerMessage::Pushed { .. } => "pushed",
            ServerMessage::Live(_) => "live",
            ServerMessage::Closed { .. } => "closed",
            ServerMessage::Results(_) => "results",
            ServerMessage::Tally(_) => "tally",
            ServerMessage::HostTally { .. } => "host_tally",
            ServerMessage::AudienceCount { .. } => "audience_count",
            ServerMessage::Accepted { .. } => "accepted",
            ServerMessage::Rejected { .. } => "rejected",
            ServerMessage::Error { .. } => "error",
            ServerMessage::ConferenceEnded { .. } => "conference_ended",
        }
    }

    pub fn tally(live: &LiveQuestionEntity, tally: &Tally) -> Self {
        ServerMessage::Tally(TallyPayload {
            conference_id: live.conference_id.clone(),
            question_id: live.question_id.clone(),
            total_votes: tally.total_votes,
            option_counts: tally.option_counts.clone(),
        })
    }

    pub fn host_tally(live: &LiveQuestionEntity, tally: &Tally) -> Self {
        ServerMessage::HostTally {
            conference_id: live.conference_id.clone(),
            question_id: live.question_id.clone(),
            total_votes: tally.total_votes,
            option_counts: tally.option_counts.clone(),
            correct_count: tally.correct_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::dao::models::OptionEntity;

    #[test]
    fn parses_submit_frames() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"submit","conference_id":"c1","question_id":"q1","option_key":"A"}"#,
        )
        .unwrap();
        assert!(matches!(message, ClientMessage::Submit { option_key, .. } if option_key == "A"));
    }

    #[test]
    fn push_duration_is_optional() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"push_live","conference_id":"c1","question_id":"q1"}"#,
        )
        .unwrap();
        assert!(matches!(message, ClientMessage::PushLive { duration: None, .. }));
    }

    #[test]
    fn rejects_invalid_identifiers() {
        let err = ClientMessage::from_json_str(r#"{"type":"join","conference_id":"a b"}"#)
            .unwrap_err();
        assert!(matches!(err, ClientMessageError::Invalid(_)));
    }

    #[test]
    fn unknown_types_parse_as_unknown() {
        let message = ClientMessage::from_json_str(r#"{"type":"dance"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
    }

    #[test]
    fn live_payload_hides_correct_option() {
        let live = LiveQuestionEntity {
            question_id: "q1".into(),
            conference_id: "c1".into(),
            text: "Pick".into(),
            options: vec![OptionEntity {
                key: "SECRET_B".into(),
                text: "b".into(),
            }],
            correct_option: "SECRET_B".into(),
            started_at: UNIX_EPOCH,
            expires_at: UNIX_EPOCH + Duration::from_secs(10),
            duration_secs: 10,
        };
        let json = serde_json::to_value(ServerMessage::Live((&live).into())).unwrap();
        assert_eq!(json["type"], "live");
        assert_eq!(json["expires_at"], "1970-01-01T00:00:10Z");
        assert!(json.get("correct_option").is_none());
    }

    #[test]
    fn rejection_serializes_code_and_reason() {
        let json = serde_json::to_value(ServerMessage::Rejected {
            question_id: "q1".into(),
            code: ErrorCode::AlreadyAnswered,
            reason: "duplicate".into(),
            message: "already answered".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["code"], "ALREADY_ANSWERED");
        assert_eq!(json["reason"], "duplicate");
    }
}
