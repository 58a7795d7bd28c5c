//! Local registry of connections and the rooms they listen to.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dto::ws::ServerMessage;

/// Identifier of one transport connection (socket or display stream).
pub type ConnId = Uuid;

/// Broadcast room a connection can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every participant and display joined to a conference.
    Conference(String),
    /// Host connections of a conference only.
    Host(String),
}

impl Room {
    fn key(&self) -> String {
        match self {
            Room::Conference(id) => format!("conf:{id}"),
            Room::Host(id) => format!("host:{id}"),
        }
    }
}

#[derive(Clone)]
/// Handle used to push messages to a registered connection.
pub struct Connection {
    /// Participant behind the connection; `None` for anonymous display streams.
    pub participant_id: Option<String>,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Room-addressable fan-out hub for every connection served by this instance.
#[derive(Default)]
pub struct Rooms {
    connections: DashMap<ConnId, Connection>,
    members: DashMap<String, HashSet<ConnId>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection so it can be addressed directly and subscribed to rooms.
    pub fn register(&self, id: ConnId, connection: Connection) {
        self.connections.insert(id, connection);
    }

    /// Drop a connection and every room subscription it holds.
    pub fn unregister(&self, id: ConnId) {
        self.connections.remove(&id);
        self.members.retain(|_, conns| {
            conns.remove(&id);
            !conns.is_empty()
        });
    }

    pub fn subscribe(&self, room: &Room, id: ConnId) {
        self.members.entry(room.key()).or_default().insert(id);
    }

    pub fn unsubscribe(&self, room: &Room, id: ConnId) {
        let key = room.key();
        let emptied = match self.members.get_mut(&key) {
            Some(mut conns) => {
                conns.remove(&id);
                conns.is_empty()
            }
            None => false,
        };
        if emptied {
            self.members.remove_if(&key, |_, conns| conns.is_empty());
        }
    }

    /// Whether another local connection of `participant_id` is still subscribed to `room`.
    pub fn has_other_connection(&self, room: &Room, participant_id: &str, except: ConnId) -> bool {
        let Some(conns) = self.members.get(&room.key()) else {
            return false;
        };
        conns.iter().filter(|id| **id != except).any(|id| {
            self.connections
                .get(id)
                .is_some_and(|conn| conn.participant_id.as_deref() == Some(participant_id))
        })
    }

    /// Deliver a message to every subscriber of `room`, returning how many received it.
    pub fn broadcast(&self, room: &Room, message: &ServerMessage) -> usize {
        let targets: Vec<mpsc::UnboundedSender<ServerMessage>> = {
            let Some(conns) = self.members.get(&room.key()) else {
                return 0;
            };
            conns
                .iter()
                .filter_map(|id| self.connections.get(id).map(|conn| conn.tx.clone()))
                .collect()
        };

        targets
            .into_iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self, room: &Room) -> usize {
        self.members.get(&room.key()).map_or(0, |conns| conns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(rooms: &Rooms, participant: Option<&str>) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.register(
            id,
            Connection {
                participant_id: participant.map(str::to_owned),
                tx,
            },
        );
        (id, rx)
    }

    fn count(value: u64) -> ServerMessage {
        ServerMessage::AudienceCount {
            conference_id: "c1".into(),
            count: value,
        }
    }

    #[test]
    fn broadcast_reaches_only_room_members() {
        let rooms = Rooms::new();
        let room = Room::Conference("c1".into());
        let (inside, mut inside_rx) = connect(&rooms, Some("u1"));
        let (_outside, mut outside_rx) = connect(&rooms, Some("u2"));
        rooms.subscribe(&room, inside);

        assert_eq!(rooms.broadcast(&room, &count(1)), 1);
        assert!(inside_rx.try_recv().is_ok());
        assert!(outside_rx.try_recv().is_err());
    }

    #[test]
    fn unregister_clears_subscriptions() {
        let rooms = Rooms::new();
        let room = Room::Host("c1".into());
        let (id, _rx) = connect(&rooms, Some("host"));
        rooms.subscribe(&room, id);
        rooms.unregister(id);

        assert_eq!(rooms.subscriber_count(&room), 0);
        assert_eq!(rooms.broadcast(&room, &count(0)), 0);
    }

    #[test]
    fn detects_other_tabs_of_the_same_participant() {
        let rooms = Rooms::new();
        let room = Room::Conference("c1".into());
        let (first, _rx1) = connect(&rooms, Some("u1"));
        let (second, _rx2) = connect(&rooms, Some("u1"));
        rooms.subscribe(&room, first);
        rooms.subscribe(&room, second);

        assert!(rooms.has_other_connection(&room, "u1", first));
        rooms.unsubscribe(&room, second);
        assert!(!rooms.has_other_connection(&room, "u1", first));
    }
}
