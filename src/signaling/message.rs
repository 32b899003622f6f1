//! Signaling wire format
//!
//! JSON messages exchanged with the relay. Field names follow the wire
//! contract (`conversationId`, `callType`, `sdpMid`, ...), so the renames here
//! are load-bearing.

use serde::{Deserialize, Serialize};

/// Media composition of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn has_video(self) -> bool {
        matches!(self, CallType::Video)
    }
}

/// SDP message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description proposal (offer or answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path proposed by a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages exchanged over the signaling channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Authenticate {
        token: String,
    },
    /// Inbound only; the relay's response to `authenticate`.
    AuthenticateAck {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        conversation_id: String,
        call_type: CallType,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        answer: SessionDescription,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidateInit,
        conversation_id: String,
    },
}

impl SignalingMessage {
    /// Wire tag, for logging
    pub fn tag(&self) -> &'static str {
        match self {
            SignalingMessage::Authenticate { .. } => "authenticate",
            SignalingMessage::AuthenticateAck { .. } => "authenticate-ack",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// Conversation this message is scoped to, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Offer {
                conversation_id, ..
            }
            | SignalingMessage::Answer {
                conversation_id, ..
            }
            | SignalingMessage::IceCandidate {
                conversation_id, ..
            } => Some(conversation_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalingMessage::Offer {
            offer: SessionDescription::offer("v=0..."),
            conversation_id: "conv-42".to_string(),
            call_type: CallType::Video,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["conversationId"], "conv-42");
        assert_eq!(json["callType"], "video");
        assert_eq!(json["offer"]["type"], "offer");
    }

    #[test]
    fn test_ice_candidate_parse() {
        let text = r#"{
            "type": "ice-candidate",
            "candidate": {
                "candidate": "candidate:1 1 UDP 2122252543 192.0.2.1 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            },
            "conversationId": "conv-42"
        }"#;
        let msg: SignalingMessage = serde_json::from_str(text).unwrap();
        match msg {
            SignalingMessage::IceCandidate {
                candidate,
                conversation_id,
            } => {
                assert_eq!(conversation_id, "conv-42");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_authenticate_roundtrip() {
        let msg = SignalingMessage::Authenticate {
            token: "bearer-xyz".to_string(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""type":"authenticate""#));
        let back: SignalingMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = serde_json::from_str::<SignalingMessage>(r#"{"type":"hangup"}"#);
        assert!(err.is_err());
    }
}
