use super::control::WsControl;
use crate::error::Result;
use crate::net::{AddressLease, DatagramReader, DatagramWriter, Reservation};
use crate::sfu::{
    close_on_error, create_datagram_channel, forward_rtp, ControlChannel, MediaTransport,
    PeerSession, PublishedTrack, Session, SessionId, TransportError, INBOUND_LABEL,
    OUTBOUND_LABEL,
};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;
use webrelay_protocol::{ClientMessage, IceCandidate, Inbound, ServerMessage};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_remote::TrackRemote;

/// Reserve a network address, then upgrade. A full address table rejects
/// the request before any session state is created.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response> {
    let lease = state.network.reserve()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, lease)))
}

async fn handle_socket(socket: WebSocket, state: AppState, lease: AddressLease) {
    let session_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let control = Arc::new(WsControl::new(tx));

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let addr = lease.addr();
    let closed = Arc::new(Notify::new());
    let pc = match establish_peer(
        &state,
        session_id,
        lease.reservation(),
        control.clone(),
        closed.clone(),
    )
    .await
    {
        Ok(pc) => pc,
        Err(e) => {
            tracing::error!("Failed to set up peer connection for {}: {}", addr, e);
            send_task.abort();
            return;
        }
    };

    // The session owns the lease from here on; whoever removes it from the
    // registry releases the address
    let transport = Arc::new(PeerSession::new(pc));
    let session =
        Session::new(session_id, addr, transport.clone(), control.clone()).with_lease(lease);
    state.registry.add(session).await;

    tracing::info!("Session {} joined as {}", session_id, addr);
    state.sync.synchronize().await;

    // Handle incoming messages until the client leaves or the peer connection closes
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = closed.notified() => {
                tracing::info!("Peer connection for session {} closed", session_id);
                break;
            }
        };
        let Some(msg) = msg else {
            break;
        };

        match msg {
            Ok(Message::Text(text)) => match ClientMessage::decode(text.as_str()) {
                Ok(Inbound::Message(message)) => {
                    if let Err(e) =
                        handle_client_message(&state, session_id, transport.as_ref(), message)
                            .await
                    {
                        tracing::warn!("Session {} rejected: {}", session_id, e);
                        break;
                    }
                }
                Ok(Inbound::Unknown(envelope)) => {
                    tracing::warn!(
                        "Ignoring unknown event {:?} from session {}",
                        envelope.event,
                        session_id
                    );
                }
                Err(e) => {
                    tracing::warn!("Invalid message from session {}: {}", session_id, e);
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error for session {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect. A sync pass may already have pruned the session.
    transport.close().await;
    let removed = state.registry.remove(session_id).await;
    // Releases the address after the registry lock
    drop(removed);

    // Abort the send task
    send_task.abort();

    state.sync.synchronize().await;
    tracing::info!("Session {} disconnected", session_id);
}

async fn handle_client_message(
    state: &AppState,
    session_id: SessionId,
    transport: &dyn MediaTransport,
    message: ClientMessage,
) -> std::result::Result<(), TransportError> {
    match message {
        ClientMessage::Answer(answer) => {
            transport.apply_answer(answer).await?;
            state.sync.acknowledge(session_id).await;
        }
        ClientMessage::Candidate(candidate) => {
            transport.add_ice_candidate(candidate).await?;
        }
    }
    Ok(())
}

/// Create the session's peer connection and wire it up; a peer whose
/// wiring fails is closed before the error is returned
async fn establish_peer(
    state: &AppState,
    session_id: SessionId,
    reservation: Reservation,
    control: Arc<WsControl>,
    closed: Arc<Notify>,
) -> std::result::Result<Arc<RTCPeerConnection>, TransportError> {
    let pc = state.peers.create_peer().await?;
    let wired = wire_peer(state, &pc, session_id, reservation, control, closed).await;
    close_on_error(&pc, wired).await?;
    Ok(pc)
}

/// Connect the peer's callbacks to the registry, the sync engine and the
/// virtual network
async fn wire_peer(
    state: &AppState,
    pc: &Arc<RTCPeerConnection>,
    session_id: SessionId,
    reservation: Reservation,
    control: Arc<WsControl>,
    closed: Arc<Notify>,
) -> std::result::Result<(), TransportError> {
    let network = state.network.clone();
    create_datagram_channel(&pc, INBOUND_LABEL, move |channel| {
        let reader: Arc<dyn DatagramReader> = channel;
        network.attach_inbound(reservation, reader);
    })
    .await?;

    let network = state.network.clone();
    create_datagram_channel(&pc, OUTBOUND_LABEL, move |channel| {
        let writer: Arc<dyn DatagramWriter> = channel;
        if let Err(e) = network.bind(&reservation, writer) {
            tracing::warn!("Could not bind {}: {}", reservation.addr(), e);
        }
    })
    .await?;

    pc.on_ice_candidate(Box::new(move |candidate| {
        let control = control.clone();

        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };

            let candidate_json = match candidate.to_json() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to serialize ICE candidate: {}", e);
                    return;
                }
            };

            let message = ServerMessage::Candidate(IceCandidate {
                candidate: candidate_json.candidate,
                sdp_mid: candidate_json.sdp_mid,
                sdp_mline_index: candidate_json.sdp_mline_index,
                username_fragment: candidate_json.username_fragment,
            });
            if let Err(e) = control.send(message).await {
                tracing::debug!("Dropping ICE candidate for session {}: {}", session_id, e);
            }
        })
    }));

    let weak_pc = Arc::downgrade(pc);
    let sync = state.sync.clone();
    pc.on_peer_connection_state_change(Box::new(move |connection_state| {
        tracing::info!("Session {} connection state: {}", session_id, connection_state);

        match connection_state {
            RTCPeerConnectionState::Failed => {
                if let Some(pc) = weak_pc.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = pc.close().await {
                            tracing::warn!("Failed to close peer connection: {}", e);
                        }
                    });
                }
            }
            RTCPeerConnectionState::Closed => {
                closed.notify_one();
                let sync = sync.clone();
                tokio::spawn(async move {
                    sync.synchronize().await;
                });
            }
            _ => {}
        }

        Box::pin(async {})
    }));

    let track_state = state.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let state = track_state.clone();
        Box::pin(async move {
            tokio::spawn(publish_track(state, session_id, track));
        })
    }));

    Ok(())
}

/// Publish a remote track for the life of its RTP stream
async fn publish_track(state: AppState, session_id: SessionId, remote: Arc<TrackRemote>) {
    let published = Arc::new(PublishedTrack::from_remote(&remote, session_id));

    tracing::info!(
        "Received track {} ({}) from session {}",
        published.id(),
        published.codec().mime_type,
        session_id
    );

    state.registry.publish(published.clone()).await;
    state.sync.synchronize().await;

    forward_rtp(remote, &published).await;

    if state.registry.retract(&published).await {
        state.sync.synchronize().await;
    }
}
