use std::{sync::Arc, time::Duration};

use live_poll_back::{
    config::AppConfig,
    dao::{
        atomic::MemoryAtomicStore,
        models::{ConferenceStatus, OptionEntity, QuestionEntity, QuestionStatus},
        poll_store::{MemoryPollStore, PollStore},
    },
    dto::{admin::ConferenceSyncRequest, ws::ClientMessage, ws::ServerMessage},
    error::ErrorCode,
    services::{
        admin_service, presence_service::ParticipantSession, websocket_service::dispatch,
    },
    state::{AppState, Clock, Connection, SharedState},
};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Client {
    session: ParticipantSession,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Client {
    fn connect(state: &SharedState, participant_id: &str) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        state.rooms().register(
            conn_id,
            Connection {
                participant_id: Some(participant_id.to_owned()),
                tx,
            },
        );
        Self {
            session: ParticipantSession::new(conn_id, participant_id),
            inbox,
        }
    }

    async fn send(&mut self, state: &SharedState, message: ClientMessage) -> ServerMessage {
        dispatch(state, &mut self.session, message)
            .await
            .expect("command should produce a reply")
    }

    async fn join(&mut self, state: &SharedState) -> ServerMessage {
        self.send(
            state,
            ClientMessage::Join {
                conference_id: "conf".into(),
            },
        )
        .await
    }

    async fn vote(&mut self, state: &SharedState, option_key: &str) -> ServerMessage {
        self.send(
            state,
            ClientMessage::Submit {
                conference_id: "conf".into(),
                question_id: "Q1".into(),
                option_key: option_key.into(),
            },
        )
        .await
    }

    fn received(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }
}

async fn setup() -> (SharedState, MemoryPollStore) {
    let polls = MemoryPollStore::new();
    let state = AppState::with_clock(
        AppConfig::default(),
        Arc::new(MemoryAtomicStore::new()),
        Some("secret".into()),
        Clock::anchored(),
    );
    state.set_poll_store(Arc::new(polls.clone())).await;

    admin_service::sync_conference(
        &state,
        "conf",
        ConferenceSyncRequest {
            host_participant_id: "host".into(),
            status: ConferenceStatus::Active,
        },
    )
    .await
    .unwrap();
    polls
        .save_question(QuestionEntity {
            id: "Q1".into(),
            conference_id: "conf".into(),
            text: "Which one?".into(),
            options: vec![
                OptionEntity {
                    key: "A".into(),
                    text: "First".into(),
                },
                OptionEntity {
                    key: "B".into(),
                    text: "Second".into(),
                },
            ],
            correct_option: "B".into(),
            status: QuestionStatus::Pending,
            result: None,
        })
        .await
        .unwrap();
    (state, polls)
}

#[tokio::test(start_paused = true)]
async fn question_round_trip_with_timeout_close() {
    let (state, polls) = setup().await;
    let mut host = Client::connect(&state, "host");
    let mut u1 = Client::connect(&state, "u1");
    let mut u2 = Client::connect(&state, "u2");

    assert!(matches!(host.join(&state).await, ServerMessage::Joined { .. }));
    u1.join(&state).await;
    u2.join(&state).await;

    let pushed = host
        .send(
            &state,
            ClientMessage::PushLive {
                conference_id: "conf".into(),
                question_id: "Q1".into(),
                duration: Some(10),
            },
        )
        .await;
    assert!(matches!(pushed, ServerMessage::Pushed { rebroadcast: false, .. }));

    assert!(matches!(
        u1.vote(&state, "A").await,
        ServerMessage::Accepted { is_correct: false, .. }
    ));
    assert!(matches!(
        u2.vote(&state, "B").await,
        ServerMessage::Accepted { is_correct: true, .. }
    ));
    match u1.vote(&state, "B").await {
        ServerMessage::Rejected { code, reason, .. } => {
            assert_eq!(code, ErrorCode::AlreadyAnswered);
            assert_eq!(reason, "duplicate");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(11)).await;

    for client in [&mut host, &mut u1, &mut u2] {
        let messages = client.received();
        let kinds: Vec<_> = messages
            .iter()
            .map(ServerMessage::kind)
            .filter(|kind| matches!(*kind, "live" | "closed" | "results"))
            .collect();
        assert_eq!(kinds, vec!["live", "closed", "results"]);

        let Some(ServerMessage::Results(results)) = messages
            .iter()
            .find(|message| message.kind() == "results")
        else {
            panic!("results missing");
        };
        assert_eq!(results.option_counts["A"], 1);
        assert_eq!(results.option_counts["B"], 1);
        assert_eq!(results.total_votes, 2);
        assert_eq!(results.correct_option, "B");
        assert_eq!(results.correct_count, 1);
    }

    let stored = polls.find_result("Q1".into()).await.unwrap().unwrap();
    assert_eq!(stored.total_votes, 2);
    assert_eq!(stored.correct_count, 1);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_gets_live_question_replayed() {
    let (state, _) = setup().await;
    let mut host = Client::connect(&state, "host");
    host.join(&state).await;
    host.send(
        &state,
        ClientMessage::PushLive {
            conference_id: "conf".into(),
            question_id: "Q1".into(),
            duration: Some(30),
        },
    )
    .await;

    let mut early = Client::connect(&state, "early");
    early.join(&state).await;
    early.vote(&state, "A").await;

    let mut again = Client::connect(&state, "early");
    match again.join(&state).await {
        ServerMessage::Joined {
            live_question: Some(live),
            has_answered,
            ..
        } => {
            assert_eq!(live.question_id, "Q1");
            assert!(has_answered);
        }
        other => panic!("expected a replay, got {other:?}"),
    }

    let mut late = Client::connect(&state, "late");
    match late.join(&state).await {
        ServerMessage::Joined {
            live_question: Some(_),
            has_answered,
            ..
        } => assert!(!has_answered),
        other => panic!("expected a replay, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn audience_count_tracks_distinct_participants() {
    let (state, _) = setup().await;
    let mut clients = Vec::new();
    for n in 0..5 {
        let mut client = Client::connect(&state, &format!("p{n}"));
        client.join(&state).await;
        clients.push(client);
    }
    // Second tab of p0 does not count twice.
    let mut tab = Client::connect(&state, "p0");
    match tab.join(&state).await {
        ServerMessage::Joined { audience_count, .. } => assert_eq!(audience_count, 5),
        other => panic!("unexpected reply {other:?}"),
    }

    for client in clients.iter_mut().take(2) {
        client
            .send(
                &state,
                ClientMessage::Leave {
                    conference_id: "conf".into(),
                },
            )
            .await;
    }

    let mut observer = Client::connect(&state, "observer");
    match observer.join(&state).await {
        // p0 still has its second tab open; p1 left. Observer adds one.
        ServerMessage::Joined { audience_count, .. } => assert_eq!(audience_count, 5),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn ended_conference_refuses_joins() {
    let (state, _) = setup().await;
    admin_service::end_conference(&state, "conf").await.unwrap();

    let mut client = Client::connect(&state, "u1");
    match client.join(&state).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ConferenceEnded),
        other => panic!("unexpected reply {other:?}"),
    }
}
