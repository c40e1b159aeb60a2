pub mod events;
pub mod hub;
pub mod socket;

pub use events::{ClientEvent, MessagePayload, OnlineUser, ServerEvent};
pub use hub::{ConnectionId, Departure, Hub, Registration, Room};
pub use socket::ws_handler;
