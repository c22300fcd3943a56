//! Live fan-out of chat messages between connected participants.
//!
//! The relay never persists anything. It groups websocket connections into
//! rooms keyed by conversation id and rebroadcasts each `sendMessage` to every
//! other member of the room.

pub mod protocol;
pub mod rooms;
pub mod server;

pub use protocol::{ClientFrame, OutgoingMessage, ServerFrame};
pub use rooms::{ConnectionId, RoomRegistry};
pub use server::{RelayServer, RelayState, SOCKET_PATH};
