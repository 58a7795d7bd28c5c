pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::dao::models::{FinalResultEntity, QuestionEntity};
use crate::dao::storage::StorageResult;

pub use memory::MemoryPollStore;

/// Abstraction over the durable system of record for question definitions and final results.
pub trait PollStore: Send + Sync {
    fn find_question(&self, id: String)
    -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
    /// Upsert the definition fields of a question; never reopens a closed question.
    fn save_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Mark the question closed and attach `result`, only if it is not closed yet.
    ///
    /// Returns `true` when this call performed the transition and `false` when another
    /// writer already closed the question.
    fn close_question_once(
        &self,
        result: FinalResultEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_result(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultEntity>>>;
    fn mark_conference_ended(&self, conference_id: String)
    -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
