//! Published tracks and the RTP fan-out loop behind them
//!
//! A publisher's remote track is copied packet by packet into one
//! `TrackLocalStaticRTP`; every subscriber's peer connection adds that same
//! local track, so the forwarding loop does not care who is subscribed.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

/// A media stream contributed by one session and forwarded to all others
pub struct PublishedTrack {
    id: String,
    origin: Uuid,
    codec: RTCRtpCodecCapability,
    local: Arc<TrackLocalStaticRTP>,
}

impl PublishedTrack {
    pub fn new(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        origin: Uuid,
        codec: RTCRtpCodecCapability,
    ) -> Self {
        let id = id.into();
        let local = Arc::new(TrackLocalStaticRTP::new(
            codec.clone(),
            id.clone(),
            stream_id.into(),
        ));

        Self {
            id,
            origin,
            codec,
            local,
        }
    }

    /// Mirror a publisher's remote track
    pub fn from_remote(remote: &TrackRemote, origin: Uuid) -> Self {
        Self::new(
            remote.id().to_string(),
            remote.stream_id().to_string(),
            origin,
            remote.codec().capability,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session that publishes this track
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.codec
    }

    /// Local track subscribers attach to their peer connections
    pub fn local(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.local)
    }
}

impl std::fmt::Debug for PublishedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedTrack")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("mime_type", &self.codec.mime_type)
            .finish()
    }
}

/// How long to tolerate the receiver not being attached yet
const RECEIVER_READY_RETRIES: u32 = 50;

/// Copy RTP from `source` into the published track until the source ends.
///
/// Header extensions are stripped: their ids were negotiated with the
/// publisher and mean nothing to subscribers. Returns the number of
/// packets forwarded.
pub async fn forward_rtp(source: Arc<TrackRemote>, track: &PublishedTrack) -> u64 {
    tracing::info!(
        "Starting RTP forwarding for track {} from session {}",
        track.id,
        track.origin
    );

    let mut forwarded = 0u64;
    let mut not_ready = 0u32;

    loop {
        let mut packet = match source.read_rtp().await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                // The receiver may not be attached right after on_track fires
                if forwarded == 0
                    && not_ready < RECEIVER_READY_RETRIES
                    && e.to_string().contains("RTPReceiver must not be nil")
                {
                    not_ready += 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }

                tracing::info!(
                    "Source track {} ended after {} packets: {}",
                    track.id,
                    forwarded,
                    e
                );
                break;
            }
        };

        packet.header.extension = false;
        packet.header.extensions.clear();

        if let Err(e) = track.local.write_rtp(&packet).await {
            tracing::warn!("Failed to forward RTP for track {}: {}", track.id, e);
            break;
        }

        forwarded += 1;
        if forwarded % 1000 == 1 {
            tracing::debug!(
                "Forwarded {} packets for track {} (seq: {})",
                forwarded,
                track.id,
                packet.header.sequence_number
            );
        }
    }

    forwarded
}
