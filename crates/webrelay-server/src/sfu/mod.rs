//! SFU (Selective Forwarding Unit) core
//!
//! Every session publishes its inbound media once; the SFU fans each
//! published track out to all other sessions without transcoding. The
//! synchronization engine keeps each session's forwarded set equal to the
//! published set minus the session's own tracks.

mod keyframe;
mod peer;
mod registry;
mod sync;
mod track_router;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use keyframe::KeyframeScheduler;
pub use peer::{
    close_on_error, create_datagram_channel, PeerFactory, PeerSession, INBOUND_LABEL,
    OUTBOUND_LABEL,
};
pub use registry::{
    RegistryState, Session, SessionId, SessionRegistry, SessionSnapshot, SessionState,
};
pub use sync::{SyncEngine, SyncFault, SyncOutcome, SyncSettings};
pub use track_router::{forward_rtp, PublishedTrack};
pub use transport::{ControlChannel, ControlError, MediaTransport, TransportError};
