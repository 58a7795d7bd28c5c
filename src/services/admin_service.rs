//! Operator actions behind the admin REST routes: keeping the conference cache in sync
//! with the conference-management system, ending conferences and registering questions.

use tracing::{info, warn};

use crate::{
    dao::models::{CloseReason, ConferenceStatus, QuestionEntity, QuestionStatus},
    dto::admin::{
        ActionResponse, ConferenceSyncRequest, EndConferenceResponse, FinalResultResponse,
        QuestionInput,
    },
    error::ServiceError,
    services::{
        authority::{self, ConferenceMeta},
        poll_events, question_service,
    },
    state::{SharedState, question_phase::CloseTrigger},
};

/// Write the cached host and status of a conference.
///
/// Syncing a conference to `ENDED` runs the full end transition.
pub async fn sync_conference(
    state: &SharedState,
    conference_id: &str,
    request: ConferenceSyncRequest,
) -> Result<ActionResponse, ServiceError> {
    let meta = ConferenceMeta {
        host_participant_id: request.host_participant_id,
        status: request.status,
    };
    authority::store_conference(state, conference_id, &meta).await?;
    if meta.status == ConferenceStatus::Ended {
        end_conference(state, conference_id).await?;
        return Ok(ActionResponse {
            message: format!("conference `{conference_id}` ended"),
        });
    }
    info!(
        conference_id = %conference_id,
        host = %meta.host_participant_id,
        "conference cache synced"
    );
    Ok(ActionResponse {
        message: format!("conference `{conference_id}` synced"),
    })
}

/// Move a conference to ENDED, closing its live question first.
pub async fn end_conference(
    state: &SharedState,
    conference_id: &str,
) -> Result<EndConferenceResponse, ServiceError> {
    let mut meta = authority::load_conference(state, conference_id)
        .await?
        .ok_or_else(|| ServiceError::ConferenceNotActive(conference_id.to_owned()))?;

    let closed_question_id = question_service::load_live(state, conference_id)
        .await?
        .map(|(live, _)| live.question_id);
    if closed_question_id.is_some() {
        question_service::close_question(
            state,
            conference_id,
            CloseTrigger::Sweep,
            CloseReason::Manual,
        )
        .await?;
    }

    meta.status = ConferenceStatus::Ended;
    authority::store_conference(state, conference_id, &meta).await?;
    let store = state.require_poll_store().await?;
    if let Err(err) = store.mark_conference_ended(conference_id.to_owned()).await {
        // The cache already refuses new activity; the durable signal is informational.
        warn!(conference_id = %conference_id, error = %err, "failed to record conference end");
    }

    poll_events::broadcast_conference_ended(state, conference_id);
    info!(
        conference_id = %conference_id,
        closed_question_id = ?closed_question_id,
        "conference ended"
    );
    Ok(EndConferenceResponse::new(
        conference_id.to_owned(),
        closed_question_id,
        state.clock().now(),
    ))
}

/// Register or replace a question definition in the durable store.
pub async fn register_question(
    state: &SharedState,
    question_id: &str,
    input: QuestionInput,
) -> Result<ActionResponse, ServiceError> {
    let store = state.require_poll_store().await?;
    if let Some(existing) = store.find_question(question_id.to_owned()).await? {
        if existing.status == QuestionStatus::Closed {
            return Err(ServiceError::QuestionAlreadyClosed(question_id.to_owned()));
        }
    }

    let question = QuestionEntity {
        id: question_id.to_owned(),
        conference_id: input.conference_id,
        text: input.text,
        options: input.options.into_iter().map(Into::into).collect(),
        correct_option: input.correct_option,
        status: QuestionStatus::Pending,
        result: None,
    };
    store.save_question(question).await?;
    info!(question_id = %question_id, "question registered");
    Ok(ActionResponse {
        message: format!("question `{question_id}` registered"),
    })
}

/// Durable result of a closed question.
pub async fn get_result(
    state: &SharedState,
    question_id: &str,
) -> Result<FinalResultResponse, ServiceError> {
    let store = state.require_poll_store().await?;
    store
        .find_result(question_id.to_owned())
        .await?
        .map(FinalResultResponse::from)
        .ok_or_else(|| ServiceError::QuestionNotFound(question_id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::poll_store::PollStore,
        dto::admin::OptionInput,
        services::test_support::{HOST, drain, fixture, listen},
        state::Room,
    };

    #[tokio::test(start_paused = true)]
    async fn ending_closes_live_question_and_blocks_pushes() {
        let fx = fixture().await;
        let (_, mut room) = listen(&fx.state, Some("u1"), Room::Conference("c1".into()));
        question_service::push_live(&fx.state, HOST, "c1", "q1", Some(30))
            .await
            .unwrap();

        let response = end_conference(&fx.state, "c1").await.unwrap();
        assert_eq!(response.closed_question_id.as_deref(), Some("q1"));
        assert!(fx.polls.is_conference_ended("c1"));

        let messages = drain(&mut room);
        let kinds: Vec<_> = messages.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["live", "closed", "results", "conference_ended"]);

        let result = get_result(&fx.state, "q1").await.unwrap();
        assert_eq!(result.reason, CloseReason::Manual);

        let err = question_service::push_live(&fx.state, HOST, "c1", "q2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConferenceNotActive(_)));
    }

    #[tokio::test]
    async fn sync_switches_host() {
        let fx = fixture().await;
        sync_conference(
            &fx.state,
            "c1",
            ConferenceSyncRequest {
                host_participant_id: "new-host".into(),
                status: ConferenceStatus::Active,
            },
        )
        .await
        .unwrap();

        assert!(authority::require_host(&fx.state, "c1", "new-host").await.is_ok());
        assert!(authority::require_host(&fx.state, "c1", HOST).await.is_err());
    }

    #[tokio::test]
    async fn registered_question_can_be_read_back() {
        let fx = fixture().await;
        let input = QuestionInput {
            conference_id: "c1".into(),
            text: "Best colour?".into(),
            options: ["R", "G"]
                .into_iter()
                .map(|key| OptionInput {
                    key: key.into(),
                    text: key.to_lowercase(),
                })
                .collect(),
            correct_option: "G".into(),
        };
        register_question(&fx.state, "q9", input).await.unwrap();

        let stored = fx.polls.find_question("q9".into()).await.unwrap().unwrap();
        assert_eq!(stored.options.len(), 2);
        assert_eq!(stored.status, QuestionStatus::Pending);
    }

    #[tokio::test]
    async fn missing_result_is_not_found() {
        let fx = fixture().await;
        let err = get_result(&fx.state, "q1").await.unwrap_err();
        assert!(matches!(err, ServiceError::QuestionNotFound(_)));
    }
}
