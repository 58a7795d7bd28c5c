use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoQuestionDocument, close_update, doc_id, open_question_filter, question_upsert},
};
use crate::dao::{
    models::{FinalResultEntity, QuestionEntity},
    poll_store::PollStore,
    storage::StorageResult,
};

const QUESTION_COLLECTION_NAME: &str = "questions";
const CONFERENCE_COLLECTION_NAME: &str = "conferences";

#[derive(Clone)]
pub struct MongoPollStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoPollStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.database().await.collection::<Document>(QUESTION_COLLECTION_NAME);
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"conference_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("question_conference_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: QUESTION_COLLECTION_NAME,
                index: "conference_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn questions(&self) -> Collection<MongoQuestionDocument> {
        self.database()
            .await
            .collection::<MongoQuestionDocument>(QUESTION_COLLECTION_NAME)
    }

    async fn find_question(&self, id: String) -> MongoResult<Option<QuestionEntity>> {
        let document = self
            .questions()
            .await
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadQuestion {
                id: id.clone(),
                source,
            })?;

        Ok(document.map(Into::into))
    }

    async fn save_question(&self, question: QuestionEntity) -> MongoResult<()> {
        self.questions()
            .await
            .update_one(doc_id(&question.id), question_upsert(&question))
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveQuestion {
                id: question.id.clone(),
                source,
            })?;

        Ok(())
    }

    async fn close_question_once(&self, result: FinalResultEntity) -> MongoResult<bool> {
        let outcome = self
            .questions()
            .await
            .update_one(
                open_question_filter(&result.question_id),
                close_update(&result),
            )
            .await
            .map_err(|source| MongoDaoError::CloseQuestion {
                id: result.question_id.clone(),
                source,
            })?;

        Ok(outcome.modified_count == 1)
    }

    async fn mark_conference_ended(&self, conference_id: String) -> MongoResult<()> {
        self.database()
            .await
            .collection::<Document>(CONFERENCE_COLLECTION_NAME)
            .update_one(
                doc_id(&conference_id),
                doc! {"$set": {"status": "ended", "ended_at": DateTime::now()}},
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::EndConference {
                id: conference_id.clone(),
                source,
            })?;

        Ok(())
    }
}

impl PollStore for MongoPollStore {
    fn find_question(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_question(id).await.map_err(Into::into) })
    }

    fn save_question(&self, question: QuestionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_question(question).await.map_err(Into::into) })
    }

    fn close_question_once(
        &self,
        result: FinalResultEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.close_question_once(result).await.map_err(Into::into) })
    }

    fn find_result(
        &self,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_question(question_id)
                .await
                .map(|question| question.and_then(|question| question.result))
                .map_err(Into::into)
        })
    }

    fn mark_conference_ended(
        &self,
        conference_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .mark_conference_ended(conference_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
