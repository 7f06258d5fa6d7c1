//! Signaling message types
//!
//! The two endpoints live in the same process, so "signaling" is a direct
//! call. These types still describe every relayed message the way a wire
//! protocol would (offer, answer, interleaved candidates, each tagged with the
//! sending role) so the sequence can be recorded, inspected and replayed over a
//! real transport.

use crate::endpoint::EndpointRole;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Proposal sent by the offering endpoint
    Offer,
    /// Reply sent by the answering endpoint
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Immutable session description (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// Opaque SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Convert into the webrtc-rs representation (parses the SDP)
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| {
            Error::NegotiationError(format!("Failed to parse {}: {}", self.sdp_type, e))
        })
    }
}

/// ICE candidate; `candidate: None` marks the end of gathering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line, or `None` for the end-of-candidates sentinel
    pub candidate: Option<String>,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate from its candidate line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: Some(candidate.into()),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    /// The "gathering complete" sentinel
    pub fn end_of_candidates() -> Self {
        Self {
            candidate: None,
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    /// Whether this is the end-of-candidates sentinel
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_none()
    }

    /// Convert into the webrtc-rs init struct
    pub fn to_rtc(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone().unwrap_or_default(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: Some(init.candidate).filter(|c| !c.is_empty()),
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.candidate {
            Some(c) => write!(f, "{}", c),
            None => write!(f, "(null)"),
        }
    }
}

/// One relayed signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Offer relayed from the offerer to the answerer
    Offer {
        /// Sending endpoint
        from: EndpointRole,
        /// The offer
        description: SessionDescription,
    },

    /// Answer relayed from the answerer to the offerer
    Answer {
        /// Sending endpoint
        from: EndpointRole,
        /// The answer
        description: SessionDescription,
    },

    /// Trickled candidate relayed to the other endpoint
    Candidate {
        /// Sending endpoint
        from: EndpointRole,
        /// The candidate (possibly the end-of-candidates sentinel)
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    /// Wrap a description sent by `from`
    pub fn description(from: EndpointRole, description: SessionDescription) -> Self {
        match description.sdp_type {
            SdpType::Offer => SignalingMessage::Offer { from, description },
            SdpType::Answer => SignalingMessage::Answer { from, description },
        }
    }

    /// Wrap a candidate sent by `from`
    pub fn candidate(from: EndpointRole, candidate: IceCandidate) -> Self {
        SignalingMessage::Candidate { from, candidate }
    }

    /// Sending endpoint
    pub fn sender(&self) -> EndpointRole {
        match self {
            SignalingMessage::Offer { from, .. }
            | SignalingMessage::Answer { from, .. }
            | SignalingMessage::Candidate { from, .. } => *from,
        }
    }

    /// Receiving endpoint
    pub fn recipient(&self) -> EndpointRole {
        self.sender().opposite()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Ordered record of every message relayed within a session
#[derive(Debug, Clone, Default)]
pub struct SignalingLog {
    messages: Arc<Mutex<Vec<SignalingMessage>>>,
}

impl SignalingLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a relayed message
    pub fn record(&self, message: SignalingMessage) {
        self.messages.lock().push(message);
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Vec<SignalingMessage> {
        self.messages.lock().clone()
    }

    /// Candidates relayed from `from`, in relay order
    pub fn candidates_from(&self, from: EndpointRole) -> Vec<IceCandidate> {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                SignalingMessage::Candidate { from: f, candidate } if *f == from => {
                    Some(candidate.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of recorded messages
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing has been relayed yet
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}
