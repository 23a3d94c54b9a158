//! WebRTC peer connections backing each session
//!
//! One `API` is shared by every connection. Each session gets a recv-only
//! audio transceiver for its published media and two unreliable, unordered
//! data channels that carry virtual-network datagrams.

use super::transport::{MediaTransport, TransportError};
use super::PublishedTrack;
use crate::state::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use webrelay_protocol::{IceCandidate, SdpType, SessionDescription};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data::data_channel::DataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::udp_mux::{UDPMuxDefault, UDPMuxParams};
use webrtc::ice::udp_network::UDPNetwork;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

/// Label of the channel carrying client-to-engine datagrams
pub const INBOUND_LABEL: &str = "inbound";
/// Label of the channel carrying engine-to-client datagrams
pub const OUTBOUND_LABEL: &str = "outbound";

/// Builds peer connections with the process-wide WebRTC settings
pub struct PeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl PeerFactory {
    pub async fn new(config: &Config) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.detach_data_channels();

        if let Some(ip) = &config.public_ip {
            tracing::info!("Advertising {} as NAT 1:1 host address", ip);
            setting_engine.set_nat_1to1_ips(vec![ip.clone()], RTCIceCandidateType::Host);
        }

        if let Some(port) = config.udp_port {
            let socket = tokio::net::UdpSocket::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("Failed to bind ICE UDP port {}", port))?;
            tracing::info!("Multiplexing ICE traffic on UDP port {}", port);
            let mux = UDPMuxDefault::new(UDPMuxParams::new(socket));
            setting_engine.set_udp_network(UDPNetwork::Muxed(mux));
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }

    /// New peer connection with its recv-only audio transceiver
    pub async fn create_peer(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        pc.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        Ok(pc)
    }
}

/// Create an unordered, zero-retransmit data channel. `on_open` receives
/// the detached channel once it is usable.
pub async fn create_datagram_channel<F>(
    pc: &RTCPeerConnection,
    label: &str,
    on_open: F,
) -> Result<Arc<RTCDataChannel>, TransportError>
where
    F: FnOnce(Arc<DataChannel>) + Send + Sync + 'static,
{
    let options = RTCDataChannelInit {
        ordered: Some(false),
        max_retransmits: Some(0),
        ..Default::default()
    };

    let dc = pc.create_data_channel(label, Some(options)).await?;

    let channel = Arc::clone(&dc);
    let mut on_open = Some(on_open);
    dc.on_open(Box::new(move || {
        let channel = Arc::clone(&channel);
        let callback = on_open.take();
        Box::pin(async move {
            let label = channel.label().to_string();
            match channel.detach().await {
                Ok(raw) => {
                    tracing::debug!("Data channel {} open", label);
                    if let Some(callback) = callback {
                        callback(raw);
                    }
                }
                Err(e) => tracing::warn!("Failed to detach data channel {}: {}", label, e),
            }
        })
    }));

    Ok(dc)
}

/// Pass `result` through, closing `pc` first when it is an error
pub async fn close_on_error<T>(
    pc: &RTCPeerConnection,
    result: Result<T, TransportError>,
) -> Result<T, TransportError> {
    if let Err(e) = &result {
        tracing::warn!("Closing peer connection after setup failure: {}", e);
        if let Err(e) = pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
    result
}

/// `MediaTransport` over a webrtc-rs peer connection
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
}

impl PeerSession {
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc }
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl MediaTransport for PeerSession {
    fn is_closed(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
    }

    async fn forwarded_tracks(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_string());
            }
        }
        ids
    }

    async fn received_tracks(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let id = track.id().to_string();
                if !id.is_empty() {
                    ids.push(id);
                }
            }
        }
        ids
    }

    async fn add_track(&self, track: &PublishedTrack) -> Result<(), TransportError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.local();
        let sender = self.pc.add_track(local).await?;

        // Keep interceptors fed; the packets themselves are not needed
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), TransportError> {
        for sender in self.pc.get_senders().await {
            let matches = match sender.track().await {
                Some(track) => track.id() == track_id,
                None => false,
            };
            if matches {
                self.pc.remove_track(&sender).await?;
                return Ok(());
            }
        }
        Err(TransportError::TrackNotFound(track_id.to_string()))
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::UnexpectedDescription("no local description".into()))?;

        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        if answer.sdp_type != SdpType::Answer {
            return Err(TransportError::UnexpectedDescription(format!(
                "expected answer, got {:?}",
                answer.sdp_type
            )));
        }

        let description = RTCSessionDescription::answer(answer.sdp)?;
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn request_keyframes(&self) {
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let media_ssrc = track.ssrc();
                if media_ssrc == 0 {
                    continue;
                }

                if let Err(e) = self
                    .pc
                    .write_rtcp(&[Box::new(PictureLossIndication {
                        sender_ssrc: 0,
                        media_ssrc,
                    })])
                    .await
                {
                    tracing::debug!("Failed to request keyframe for SSRC {}: {}", media_ssrc, e);
                }
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}
