use indexmap::IndexMap;
use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{
    CloseReason, FinalResultEntity, OptionEntity, QuestionEntity, QuestionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuestionDocument {
    #[serde(rename = "_id")]
    id: String,
    conference_id: String,
    text: String,
    options: Vec<OptionEntity>,
    correct_option: String,
    #[serde(default)]
    status: QuestionStatus,
    #[serde(default)]
    result: Option<MongoResultDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoOptionCount {
    key: String,
    votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoResultDocument {
    question_id: String,
    conference_id: String,
    option_counts: Vec<MongoOptionCount>,
    total_votes: i64,
    correct_option: String,
    correct_count: i64,
    closed_at: DateTime,
    reason: CloseReason,
}

impl From<MongoQuestionDocument> for QuestionEntity {
    fn from(value: MongoQuestionDocument) -> Self {
        Self {
            id: value.id,
            conference_id: value.conference_id,
            text: value.text,
            options: value.options,
            correct_option: value.correct_option,
            status: value.status,
            result: value.result.map(Into::into),
        }
    }
}

impl From<MongoResultDocument> for FinalResultEntity {
    fn from(value: MongoResultDocument) -> Self {
        Self {
            question_id: value.question_id,
            conference_id: value.conference_id,
            option_counts: value
                .option_counts
                .into_iter()
                .map(|count| (count.key, count.votes.max(0) as u64))
                .collect::<IndexMap<_, _>>(),
            total_votes: value.total_votes.max(0) as u64,
            correct_option: value.correct_option,
            correct_count: value.correct_count.max(0) as u64,
            closed_at: value.closed_at.to_system_time(),
            reason: value.reason,
        }
    }
}

pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}

/// `$set`/`$setOnInsert` update that upserts definition fields without touching the status.
pub fn question_upsert(question: &QuestionEntity) -> Document {
    let options = question
        .options
        .iter()
        .map(|option| doc! {"key": option.key.as_str(), "text": option.text.as_str()})
        .collect::<Vec<_>>();

    doc! {
        "$set": {
            "conference_id": question.conference_id.as_str(),
            "text": question.text.as_str(),
            "options": options,
            "correct_option": question.correct_option.as_str(),
        },
        "$setOnInsert": { "status": "pending" },
    }
}

/// Filter matching the question only while it is still open.
pub fn open_question_filter(id: &str) -> Document {
    doc! {"_id": id, "status": {"$ne": "closed"}}
}

/// Update flipping the question to closed with its embedded result.
pub fn close_update(result: &FinalResultEntity) -> Document {
    let option_counts = result
        .option_counts
        .iter()
        .map(|(key, votes)| doc! {"key": key.as_str(), "votes": *votes as i64})
        .collect::<Vec<_>>();

    doc! {
        "$set": {
            "status": "closed",
            "result": {
                "question_id": result.question_id.as_str(),
                "conference_id": result.conference_id.as_str(),
                "option_counts": option_counts,
                "total_votes": result.total_votes as i64,
                "correct_option": result.correct_option.as_str(),
                "correct_count": result.correct_count as i64,
                "closed_at": DateTime::from_system_time(result.closed_at),
                "reason": result.reason.as_str(),
            },
        },
    }
}
