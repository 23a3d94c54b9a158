use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{IceCandidate, SessionDescription};

/// Raw control-channel envelope: `{ "event": <string>, "data": <opaque> }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from client to server over the control channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Answer to the most recent server offer
    Answer(SessionDescription),

    /// Trickled ICE candidate
    Candidate(IceCandidate),
}

/// Messages sent from server to client over the control channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Fresh offer after the forwarded track set was reconciled
    Offer(SessionDescription),

    /// Trickled ICE candidate gathered by the server
    Candidate(IceCandidate),
}

/// Result of decoding one inbound control frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ClientMessage),
    /// Well-formed envelope with an event the server does not handle
    Unknown(Envelope),
}

impl ClientMessage {
    /// Decode a text frame.
    ///
    /// Unknown events are not an error; a malformed envelope or a malformed
    /// payload for a known event is.
    pub fn decode(raw: &str) -> Result<Inbound, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw).map_err(ProtocolError::Envelope)?;

        match envelope.event.as_str() {
            "answer" => serde_json::from_value(envelope.data)
                .map(|desc| Inbound::Message(ClientMessage::Answer(desc)))
                .map_err(|source| ProtocolError::Payload {
                    event: "answer",
                    source,
                }),
            "candidate" => serde_json::from_value(envelope.data)
                .map(|candidate| Inbound::Message(ClientMessage::Candidate(candidate)))
                .map_err(|source| ProtocolError::Payload {
                    event: "candidate",
                    source,
                }),
            _ => Ok(Inbound::Unknown(envelope)),
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpType;

    #[test]
    fn test_offer_wire_shape() {
        let json = ServerMessage::Offer(SessionDescription::offer("v=0")).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["type"], "offer");
        assert_eq!(value["data"]["sdp"], "v=0");
    }

    #[test]
    fn test_decode_answer() {
        let raw = r#"{"event":"answer","data":{"type":"answer","sdp":"v=0\r\n"}}"#;
        match ClientMessage::decode(raw).unwrap() {
            Inbound::Message(ClientMessage::Answer(desc)) => {
                assert_eq!(desc.sdp_type, SdpType::Answer);
                assert_eq!(desc.sdp, "v=0\r\n");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_candidate_uses_browser_field_names() {
        let raw = r#"{"event":"candidate","data":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match ClientMessage::decode(raw).unwrap() {
            Inbound::Message(ClientMessage::Candidate(c)) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert!(c.username_fragment.is_none());
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let raw = r#"{"event":"chat","data":"hello"}"#;
        match ClientMessage::decode(raw).unwrap() {
            Inbound::Unknown(envelope) => assert_eq!(envelope.event, "chat"),
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_keeps_its_payload() {
        let raw = r#"{"event":"chat","data":{"text":"hi"}}"#;
        assert_eq!(
            ClientMessage::decode(raw).unwrap(),
            Inbound::Unknown(Envelope {
                event: "chat".to_string(),
                data: serde_json::json!({ "text": "hi" }),
            })
        );
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            ClientMessage::decode("not json"),
            Err(ProtocolError::Envelope(_))
        ));
        assert!(matches!(
            ClientMessage::decode(r#"{"event":"answer","data":{"sdp":42}}"#),
            Err(ProtocolError::Payload { event: "answer", .. })
        ));
    }

    #[test]
    fn test_client_message_encodes_as_envelope() {
        let json = serde_json::to_string(&ClientMessage::Answer(SessionDescription::answer("v=0"))).unwrap();
        assert!(matches!(
            ClientMessage::decode(&json).unwrap(),
            Inbound::Message(ClientMessage::Answer(_))
        ));
    }
}
