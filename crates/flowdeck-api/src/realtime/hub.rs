//! In-process fan-out of server events to connected sockets.
//!
//! Each socket owns an unbounded queue; the hub keeps room membership and a
//! per-user connection count so presence changes only on the first connect
//! and the last disconnect of a user.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};
use uuid::Uuid;

use super::events::ServerEvent;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(i64),
    Channel(i64),
    Org(i64),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Channel(id) => write!(f, "channel:{id}"),
            Room::Org(id) => write!(f, "org:{id}"),
        }
    }
}

struct Connection {
    user_id: i64,
    organisation_id: i64,
    sender: UnboundedSender<ServerEvent>,
    rooms: HashSet<Room>,
}

/// Result of registering a socket.
pub struct Registration {
    pub id: ConnectionId,
    pub events: UnboundedReceiver<ServerEvent>,
    /// True when this is the user's only open connection.
    pub first_for_user: bool,
}

/// Result of dropping a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: i64,
    pub organisation_id: i64,
    pub last_for_user: bool,
}

#[derive(Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    per_user: DashMap<i64, usize>,
    presence: Mutex<()>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a socket and joins it to its user room, its org room and `channel_ids`.
    pub fn register(&self, user_id: i64, organisation_id: i64, channel_ids: &[i64]) -> Registration {
        let id = Uuid::new_v4();
        let (sender, events) = unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                user_id,
                organisation_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        self.join(id, Room::User(user_id));
        self.join(id, Room::Org(organisation_id));
        for &channel_id in channel_ids {
            self.join(id, Room::Channel(channel_id));
        }

        let mut count = self.per_user.entry(user_id).or_insert(0);
        *count += 1;
        let first_for_user = *count == 1;
        drop(count);

        debug!(connection = %id, user_id, first_for_user, "Socket registered");
        Registration {
            id,
            events,
            first_for_user,
        }
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let (_, connection) = self.connections.remove(&id)?;
        for room in &connection.rooms {
            self.remove_from_room(*room, id);
        }

        let last_for_user = match self.per_user.get_mut(&connection.user_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if last_for_user {
            self.per_user.remove_if(&connection.user_id, |_, count| *count == 0);
        }

        debug!(connection = %id, user_id = connection.user_id, last_for_user, "Socket unregistered");
        Some(Departure {
            user_id: connection.user_id,
            organisation_id: connection.organisation_id,
            last_for_user,
        })
    }

    pub fn join(&self, id: ConnectionId, room: Room) -> bool {
        let Some(mut connection) = self.connections.get_mut(&id) else {
            return false;
        };
        connection.rooms.insert(room);
        drop(connection);
        self.rooms.entry(room).or_default().insert(id)
    }

    pub fn leave(&self, id: ConnectionId, room: Room) -> bool {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.rooms.remove(&room);
        }
        self.remove_from_room(room, id)
    }

    /// Joins every open socket of `user_id` to `room`, e.g. after being added to a channel.
    pub fn join_user(&self, user_id: i64, room: Room) {
        for id in self.connections_of(user_id) {
            self.join(id, room);
        }
    }

    pub fn leave_user(&self, user_id: i64, room: Room) {
        for id in self.connections_of(user_id) {
            self.leave(id, room);
        }
    }

    fn connections_of(&self, user_id: i64) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| *c.key())
            .collect()
    }

    fn remove_from_room(&self, room: Room, id: ConnectionId) -> bool {
        let removed = self
            .rooms
            .get_mut(&room)
            .map(|mut members| members.remove(&id))
            .unwrap_or(false);
        self.rooms.remove_if(&room, |_, members| members.is_empty());
        removed
    }

    /// Sends to every socket in `room`. Returns how many sockets received it.
    pub fn emit(&self, room: Room, event: &ServerEvent) -> usize {
        self.emit_filtered(room, event, None)
    }

    /// Like [`Hub::emit`] but skips one socket, typically the originator.
    pub fn emit_except(&self, room: Room, event: &ServerEvent, except: ConnectionId) -> usize {
        self.emit_filtered(room, event, Some(except))
    }

    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        self.connections
            .get(&id)
            .map(|c| c.sender.send(event).is_ok())
            .unwrap_or(false)
    }

    fn emit_filtered(&self, room: Room, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = match self.rooms.get(&room) {
            Some(members) => members
                .iter()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect(),
            None => return 0,
        };
        let delivered = targets
            .into_iter()
            .filter(|id| self.send_to(*id, event.clone()))
            .count();
        trace!(room = %room, delivered, "Event emitted");
        delivered
    }

    /// Runs `apply` if `user_id` still has (`online`) or still lacks (`!online`) an open
    /// socket. Transitions are serialised, so a close racing a reconnect never records a
    /// connected user as offline. Returns whether `apply` ran.
    pub fn settle_presence(&self, user_id: i64, online: bool, apply: impl FnOnce()) -> bool {
        let _guard = self.presence.lock();
        if self.is_online(user_id) != online {
            debug!(user_id, online, "Stale presence transition skipped");
            return false;
        }
        apply();
        true
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.per_user.get(&user_id).map(|c| *c > 0).unwrap_or(false)
    }

    /// Distinct users with an open socket in the organisation.
    pub fn online_user_ids(&self, organisation_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .connections
            .iter()
            .filter(|c| c.organisation_id == organisation_id)
            .map(|c| c.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
