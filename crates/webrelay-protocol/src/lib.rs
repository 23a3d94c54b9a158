//! Control-channel protocol shared by the relay server and its clients.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, Envelope, Inbound, ProtocolError, ServerMessage};
pub use types::{IceCandidate, SdpType, SessionDescription};
