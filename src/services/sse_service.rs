use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ConferenceStatus,
    dto::{
        sse::{Handshake, ServerEvent},
        ws::ServerMessage,
    },
    error::ServiceError,
    services::authority,
    state::{ConnId, Connection, Room, SharedState},
};

/// Read-only subscription of a display screen to a conference room.
pub struct DisplaySubscription {
    conn_id: ConnId,
    conference_id: String,
    receiver: mpsc::UnboundedReceiver<ServerMessage>,
    handshake: ServerEvent,
}

/// Register an anonymous display connection on the conference room.
pub async fn subscribe_display(
    state: &SharedState,
    conference_id: &str,
) -> Result<DisplaySubscription, ServiceError> {
    let meta = authority::load_conference(state, conference_id)
        .await?
        .ok_or_else(|| ServiceError::ConferenceNotActive(conference_id.to_owned()))?;
    if meta.status == ConferenceStatus::Ended {
        return Err(ServiceError::ConferenceEnded(conference_id.to_owned()));
    }

    let handshake = ServerEvent::json(
        Some("handshake".to_owned()),
        &Handshake {
            conference_id: conference_id.to_owned(),
            message: "display stream connected".to_owned(),
            degraded: state.is_degraded().await,
        },
    )
    .map_err(|err| ServiceError::Internal(format!("failed to encode handshake: {err}")))?;

    let (tx, receiver) = mpsc::unbounded_channel();
    let conn_id = Uuid::new_v4();
    state.rooms().register(
        conn_id,
        Connection {
            participant_id: None,
            tx,
        },
    );
    let room = Room::Conference(conference_id.to_owned());
    state.rooms().subscribe(&room, conn_id);
    debug!(
        conference_id = %conference_id,
        subscribers = state.rooms().subscriber_count(&room),
        "display subscribed"
    );

    Ok(DisplaySubscription {
        conn_id,
        conference_id: conference_id.to_owned(),
        receiver,
        handshake,
    })
}

/// Unregisters the display connection once axum drops the response stream.
struct StreamGuard {
    state: SharedState,
    conn_id: ConnId,
    conference_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.rooms().unregister(self.conn_id);
        info!(conference_id = %self.conference_id, "display SSE stream disconnected");
    }
}

/// Turn a display subscription into an SSE response: handshake first, then room events.
pub fn to_sse_stream(
    state: SharedState,
    subscription: DisplaySubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let DisplaySubscription {
        conn_id,
        conference_id,
        mut receiver,
        handshake,
    } = subscription;

    let guard = StreamGuard {
        state,
        conn_id,
        conference_id,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(to_event(handshake));

        while let Some(message) = receiver.recv().await {
            match ServerEvent::try_from(&message) {
                Ok(event) => yield Ok(to_event(event)),
                Err(err) => warn!(error = %err, event = message.kind(), "failed to encode SSE event"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}
