//! WebSocket session loop: identification, command dispatch and outbound fan-out.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    error::{ErrorCode, ServiceError},
    services::{
        presence_service::{self, ParticipantSession},
        question_service, vote_service,
    },
    state::{Connection, SharedState},
};

/// Handle the full lifecycle of one participant WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();

    // Replies and room broadcasts share one queue so a participant sees them in order.
    let writer_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                Some(event) = events_rx.recv() => match serde_json::to_string(&event) {
                    Ok(payload) => Message::Text(payload.into()),
                    Err(err) => {
                        warn!(error = %err, event = event.kind(), "failed to serialize server message");
                        continue;
                    }
                },
                Some(frame) = control_rx.recv() => frame,
                else => break,
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let ident_timeout = state.config().ident_timeout;
    let initial_message = match tokio::time::timeout(ident_timeout, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = control_tx.send(Message::Close(None));
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
    };

    let participant_id = match ClientMessage::from_json_str(&initial_message) {
        Ok(ClientMessage::Identify { participant_id }) => participant_id,
        Ok(_) => {
            warn!("first message was not identify");
            let _ = events_tx.send(error_message(
                ErrorCode::InvalidInput,
                "the first message must be `identify`",
            ));
            let _ = control_tx.send(Message::Close(None));
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse or validate identify message");
            let _ = events_tx.send(error_message(ErrorCode::InvalidInput, &err.to_string()));
            let _ = control_tx.send(Message::Close(None));
            finalize(writer_task, events_tx, control_tx).await;
            return;
        }
    };

    let conn_id = Uuid::new_v4();
    state.rooms().register(
        conn_id,
        Connection {
            participant_id: Some(participant_id.clone()),
            tx: events_tx.clone(),
        },
    );
    let mut session = ParticipantSession::new(conn_id, participant_id.clone());
    info!(participant_id = %participant_id, conn_id = %conn_id, "participant connected");

    if events_tx
        .send(ServerMessage::Identified {
            participant_id: participant_id.clone(),
        })
        .is_ok()
    {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    debug!(participant_id = %participant_id, payload = %text, "received participant message");
                    let reply = match ClientMessage::from_json_str(&text) {
                        Ok(message) => dispatch(&state, &mut session, message).await,
                        Err(err) => {
                            warn!(participant_id = %participant_id, error = %err, "failed to parse or validate participant message");
                            Some(error_message(ErrorCode::InvalidInput, &err.to_string()))
                        }
                    };
                    if let Some(reply) = reply {
                        if events_tx.send(reply).is_err() {
                            info!(participant_id = %participant_id, "writer closed, terminating");
                            break;
                        }
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = control_tx.send(Message::Pong(payload));
                }
                Ok(Message::Close(frame)) => {
                    info!(participant_id = %participant_id, "participant closed the connection");
                    let _ = control_tx.send(Message::Close(frame));
                    break;
                }
                Ok(Message::Binary(_)) => {}
                Ok(Message::Pong(_)) => {}
                Err(err) => {
                    warn!(participant_id = %participant_id, error = %err, "websocket error");
                    break;
                }
            }
        }
    }

    state.rooms().unregister(conn_id);
    if let Err(err) = presence_service::disconnect(&state, &session).await {
        warn!(participant_id = %participant_id, error = %err, "failed to clear presence");
    }
    info!(participant_id = %participant_id, conn_id = %conn_id, "participant disconnected");

    finalize(writer_task, events_tx, control_tx).await;
}

/// Run one client command and return the reply for the originating connection.
///
/// Room broadcasts triggered by the command are delivered through the rooms hub; only
/// the direct reply or error is returned here.
pub async fn dispatch(
    state: &SharedState,
    session: &mut ParticipantSession,
    message: ClientMessage,
) -> Option<ServerMessage> {
    let participant_id = session.participant_id.clone();
    let outcome = match message {
        ClientMessage::Identify { .. } => Err(ServiceError::InvalidInput(
            "connection is already identified".into(),
        )),
        ClientMessage::Join { conference_id } => {
            presence_service::join(state, session, &conference_id)
                .await
                .map(Some)
        }
        ClientMessage::Leave { conference_id } => {
            presence_service::leave(state, session, &conference_id)
                .await
                .map(Some)
        }
        ClientMessage::PushLive {
            conference_id,
            question_id,
            duration,
        } => question_service::push_live(
            state,
            &participant_id,
            &conference_id,
            &question_id,
            duration,
        )
        .await
        .map(Some),
        ClientMessage::Close {
            conference_id,
            question_id,
        } => question_service::close_by_host(state, &participant_id, &conference_id, &question_id)
            .await
            .map(|_| None),
        ClientMessage::Submit {
            conference_id,
            question_id,
            option_key,
        } => {
            let vote = vote_service::submit(
                state,
                &participant_id,
                &conference_id,
                &question_id,
                &option_key,
            )
            .await;
            return Some(match vote {
                Ok(is_correct) => ServerMessage::Accepted {
                    question_id,
                    is_correct,
                },
                Err(err) => {
                    log_failure(&participant_id, &err);
                    let code = err.code();
                    ServerMessage::Rejected {
                        question_id,
                        code,
                        reason: code.reason().to_owned(),
                        message: client_message(&err),
                    }
                }
            });
        }
        ClientMessage::Unknown => Err(ServiceError::InvalidInput(
            "unsupported message type".into(),
        )),
    };

    match outcome {
        Ok(reply) => reply,
        Err(err) => {
            log_failure(&participant_id, &err);
            Some(error_message(err.code(), &client_message(&err)))
        }
    }
}

fn error_message(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error {
        code,
        message: message.to_owned(),
    }
}

/// Infrastructure details stay in the logs.
fn client_message(err: &ServiceError) -> String {
    match err.code() {
        ErrorCode::InternalError => "internal error, please retry".to_owned(),
        _ => err.to_string(),
    }
}

fn log_failure(participant_id: &str, err: &ServiceError) {
    if err.code() == ErrorCode::InternalError {
        error!(participant_id = %participant_id, error = ?err, "command failed");
    } else {
        debug!(participant_id = %participant_id, error = %err, "command refused");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(
    writer_task: JoinHandle<()>,
    events_tx: mpsc::UnboundedSender<ServerMessage>,
    control_tx: mpsc::UnboundedSender<Message>,
) {
    drop(events_tx);
    drop(control_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{HOST, fixture};

    fn session(participant_id: &str) -> ParticipantSession {
        ParticipantSession::new(Uuid::new_v4(), participant_id)
    }

    #[tokio::test(start_paused = true)]
    async fn votes_reply_with_accepted_or_rejected() {
        let fx = fixture().await;
        let mut host = session(HOST);
        let pushed = dispatch(
            &fx.state,
            &mut host,
            ClientMessage::PushLive {
                conference_id: "c1".into(),
                question_id: "q1".into(),
                duration: Some(10),
            },
        )
        .await;
        assert!(matches!(pushed, Some(ServerMessage::Pushed { .. })));

        let mut voter = session("u1");
        let submit = || ClientMessage::Submit {
            conference_id: "c1".into(),
            question_id: "q1".into(),
            option_key: "B".into(),
        };
        let accepted = dispatch(&fx.state, &mut voter, submit()).await;
        assert!(matches!(
            accepted,
            Some(ServerMessage::Accepted {
                is_correct: true,
                ..
            })
        ));

        let rejected = dispatch(&fx.state, &mut voter, submit()).await;
        assert!(matches!(
            rejected,
            Some(ServerMessage::Rejected { code: ErrorCode::AlreadyAnswered, ref reason, .. })
                if reason == "duplicate"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn privileged_commands_from_audience_get_errors() {
        let fx = fixture().await;
        let mut audience = session("u1");
        let reply = dispatch(
            &fx.state,
            &mut audience,
            ClientMessage::Close {
                conference_id: "c1".into(),
                question_id: "q1".into(),
            },
        )
        .await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                code: ErrorCode::Unauthorized,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_commands_are_reported() {
        let fx = fixture().await;
        let reply = dispatch(&fx.state, &mut session("u1"), ClientMessage::Unknown).await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                code: ErrorCode::InvalidInput,
                ..
            })
        ));
    }
}
