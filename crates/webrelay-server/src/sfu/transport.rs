//! Narrow contracts the synchronization core uses to drive a session's
//! media transport and control channel.

use super::PublishedTrack;
use async_trait::async_trait;
use thiserror::Error;
use webrelay_protocol::{IceCandidate, ServerMessage, SessionDescription};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("No sender forwards track {0}")]
    TrackNotFound(String),

    #[error("Unexpected session description: {0}")]
    UnexpectedDescription(String),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control channel closed")]
    Closed,

    #[error("Failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One session's media transport
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// True once the transport reached its terminal closed state
    fn is_closed(&self) -> bool;

    /// Ids of the tracks currently forwarded to this session
    async fn forwarded_tracks(&self) -> Vec<String>;

    /// Ids of the tracks this session is sending to us
    async fn received_tracks(&self) -> Vec<String>;

    async fn add_track(&self, track: &PublishedTrack) -> Result<(), TransportError>;

    async fn remove_track(&self, track_id: &str) -> Result<(), TransportError>;

    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Ask every inbound media source for a fresh keyframe. Best effort.
    async fn request_keyframes(&self);

    async fn close(&self);
}

/// Outbound half of a session's control channel
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send(&self, message: ServerMessage) -> Result<(), ControlError>;
}
