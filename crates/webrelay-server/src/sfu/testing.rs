//! In-memory transport and control channel for exercising the core.

use super::registry::Session;
use super::transport::{ControlChannel, ControlError, MediaTransport, TransportError};
use super::PublishedTrack;
use crate::net::VirtualAddr;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;
use webrelay_protocol::{IceCandidate, ServerMessage, SessionDescription};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Transport whose offers list the forwarded track ids, sorted and comma separated
#[derive(Default)]
pub struct FakeTransport {
    closed: AtomicBool,
    fail_adds: AtomicBool,
    forwarded: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
    offers: AtomicUsize,
    add_calls: AtomicUsize,
    answers: AtomicUsize,
    candidates: AtomicUsize,
    keyframe_requests: AtomicUsize,
}

impl FakeTransport {
    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn set_received(&self, ids: &[&str]) {
        *self.received.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn forwarded(&self) -> Vec<String> {
        let mut ids = self.forwarded.lock().unwrap().clone();
        ids.sort();
        ids
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn candidates(&self) -> usize {
        self.candidates.load(Ordering::SeqCst)
    }

    pub fn keyframe_requests(&self) -> usize {
        self.keyframe_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn forwarded_tracks(&self) -> Vec<String> {
        self.forwarded.lock().unwrap().clone()
    }

    async fn received_tracks(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    async fn add_track(&self, track: &PublishedTrack) -> Result<(), TransportError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(TransportError::TrackNotFound(track.id().to_string()));
        }
        self.forwarded.lock().unwrap().push(track.id().to_string());
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), TransportError> {
        let mut forwarded = self.forwarded.lock().unwrap();
        let before = forwarded.len();
        forwarded.retain(|id| id != track_id);
        if forwarded.len() == before {
            return Err(TransportError::TrackNotFound(track_id.to_string()));
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(self.forwarded().join(",")))
    }

    async fn apply_answer(&self, _answer: SessionDescription) -> Result<(), TransportError> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        self.candidates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_keyframes(&self) {
        self.keyframe_requests.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.set_closed();
    }
}

/// Control channel that records what it was asked to deliver
#[derive(Default)]
pub struct FakeControl {
    sent: Mutex<Vec<ServerMessage>>,
    closed: AtomicBool,
    park_next: AtomicBool,
    parked: Notify,
    released: Notify,
}

impl FakeControl {
    /// The next `send` blocks until `release` is called
    pub fn park_next_send(&self) {
        self.park_next.store(true, Ordering::SeqCst);
    }

    /// Resolves once a `send` is blocked
    pub async fn wait_parked(&self) {
        self.parked.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// SDP bodies of every offer delivered so far
    pub fn offers(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Offer(desc) => Some(desc.sdp.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ControlChannel for FakeControl {
    async fn send(&self, message: ServerMessage) -> Result<(), ControlError> {
        if self.park_next.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.released.notified().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ControlError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub fn session(index: u8) -> (Session, Arc<FakeTransport>, Arc<FakeControl>) {
    let transport = Arc::new(FakeTransport::default());
    let control = Arc::new(FakeControl::default());
    let session = Session::new(
        Uuid::new_v4(),
        VirtualAddr::new(index),
        transport.clone(),
        control.clone(),
    );
    (session, transport, control)
}

pub fn track(id: &str, origin: Uuid) -> Arc<PublishedTrack> {
    let codec = RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        ..Default::default()
    };
    Arc::new(PublishedTrack::new(id, format!("stream-{}", origin), origin, codec))
}
