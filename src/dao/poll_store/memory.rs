//! Process-local durable store used for single-node runs and tests.

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::dao::{
    models::{FinalResultEntity, QuestionEntity, QuestionStatus},
    poll_store::PollStore,
    storage::StorageResult,
};

/// [`PollStore`] keeping everything in memory.
#[derive(Clone, Default)]
pub struct MemoryPollStore {
    questions: Arc<DashMap<String, QuestionEntity>>,
    ended_conferences: Arc<DashMap<String, SystemTime>>,
}

impl MemoryPollStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the conference received the ENDED transition.
    pub fn is_conference_ended(&self, conference_id: &str) -> bool {
        self.ended_conferences.contains_key(conference_id)
    }
}

impl PollStore for MemoryPollStore {
    fn find_question(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let found = self.questions.get(&id).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn save_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.questions
            .entry(question.id.clone())
            .and_modify(|existing| {
                existing.conference_id = question.conference_id.clone();
                existing.text = question.text.clone();
                existing.options = question.options.clone();
                existing.correct_option = question.correct_option.clone();
            })
            .or_insert_with(|| QuestionEntity {
                status: QuestionStatus::Pending,
                result: None,
                ..question
            });
        Box::pin(async { Ok(()) })
    }

    fn close_question_once(
        &self,
        result: FinalResultEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        // The entry guard holds the shard lock, making check-and-set atomic.
        let closed = match self.questions.get_mut(&result.question_id) {
            Some(mut question) if question.status != QuestionStatus::Closed => {
                question.status = QuestionStatus::Closed;
                question.result = Some(result);
                true
            }
            _ => false,
        };
        Box::pin(async move { Ok(closed) })
    }

    fn find_result(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultEntity>>> {
        let found = self
            .questions
            .get(&question_id)
            .and_then(|entry| entry.result.clone());
        Box::pin(async move { Ok(found) })
    }

    fn mark_conference_ended(
        &self,
        conference_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.ended_conferences
            .entry(conference_id)
            .or_insert_with(SystemTime::now);
        Box::pin(async { Ok(()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::dao::models::{CloseReason, OptionEntity};

    fn question(id: &str) -> QuestionEntity {
        QuestionEntity {
            id: id.into(),
            conference_id: "conf-1".into(),
            text: "Pick one".into(),
            options: vec![
                OptionEntity {
                    key: "A".into(),
                    text: "Alpha".into(),
                },
                OptionEntity {
                    key: "B".into(),
                    text: "Beta".into(),
                },
            ],
            correct_option: "B".into(),
            status: QuestionStatus::Pending,
            result: None,
        }
    }

    fn result(id: &str, total: u64) -> FinalResultEntity {
        FinalResultEntity {
            question_id: id.into(),
            conference_id: "conf-1".into(),
            option_counts: IndexMap::from([("A".to_string(), total), ("B".to_string(), 0)]),
            total_votes: total,
            correct_option: "B".into(),
            correct_count: 0,
            closed_at: SystemTime::now(),
            reason: CloseReason::Manual,
        }
    }

    #[tokio::test]
    async fn close_is_written_once() {
        let store = MemoryPollStore::new();
        store.save_question(question("q1")).await.unwrap();

        assert!(store.close_question_once(result("q1", 3)).await.unwrap());
        assert!(!store.close_question_once(result("q1", 7)).await.unwrap());

        let stored = store.find_result("q1".into()).await.unwrap().unwrap();
        assert_eq!(stored.total_votes, 3);
    }

    #[tokio::test]
    async fn closing_unknown_question_is_rejected() {
        let store = MemoryPollStore::new();
        assert!(!store.close_question_once(result("ghost", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn saving_again_keeps_closed_status() {
        let store = MemoryPollStore::new();
        store.save_question(question("q1")).await.unwrap();
        store.close_question_once(result("q1", 1)).await.unwrap();

        let mut edited = question("q1");
        edited.text = "Edited".into();
        store.save_question(edited).await.unwrap();

        let stored = store.find_question("q1".into()).await.unwrap().unwrap();
        assert_eq!(stored.status, QuestionStatus::Closed);
        assert_eq!(stored.text, "Edited");
        assert!(stored.result.is_some());
    }
}
