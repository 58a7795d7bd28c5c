use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::ws::ServerMessage;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

impl TryFrom<&ServerMessage> for ServerEvent {
    type Error = serde_json::Error;

    fn try_from(message: &ServerMessage) -> Result<Self, Self::Error> {
        Self::json(Some(message.kind().to_owned()), message)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to a display stream when it connects.
pub struct Handshake {
    /// Conference whose room the stream mirrors.
    pub conference_id: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without its durable store.
    pub degraded: bool,
}
