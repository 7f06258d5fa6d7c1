//! Endpoint negotiation state machine
//!
//! ```text
//! Offerer:  Idle --create_offer--> OfferCreated --set_local--> LocalDescriptionSet
//!                --set_remote(answer)--> RemoteDescriptionSet
//! Answerer: Idle --set_remote(offer)--> RemoteOfferSet --create_answer--> AnswerCreated
//!                --set_local--> (LocalDescriptionSet) --> RemoteDescriptionSet
//! Both:     RemoteDescriptionSet --ICE connected/completed--> Connected
//!           any --close--> Closed
//! ```
//!
//! ICE connection states are reported by the transport, not driven here.

use crate::signaling::SdpType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the offer/answer exchange an endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Creates the offer, applies the answer
    Offerer,
    /// Applies the offer, creates the answer
    Answerer,
}

impl EndpointRole {
    /// The peer's role
    pub fn opposite(&self) -> Self {
        match self {
            EndpointRole::Offerer => EndpointRole::Answerer,
            EndpointRole::Answerer => EndpointRole::Offerer,
        }
    }

    /// Type of the description this role creates and applies locally
    pub fn local_sdp_type(&self) -> SdpType {
        match self {
            EndpointRole::Offerer => SdpType::Offer,
            EndpointRole::Answerer => SdpType::Answer,
        }
    }

    /// Type of the description this role accepts from its peer
    pub fn remote_sdp_type(&self) -> SdpType {
        self.opposite().local_sdp_type()
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Offerer => write!(f, "offerer"),
            EndpointRole::Answerer => write!(f, "answerer"),
        }
    }
}

/// Negotiation progress of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPhase {
    /// Nothing negotiated yet
    Idle,
    /// Offer created, not yet applied locally
    OfferCreated,
    /// Peer's offer applied (answerer)
    RemoteOfferSet,
    /// Answer created, not yet applied locally
    AnswerCreated,
    /// Own description applied, waiting for the peer's
    LocalDescriptionSet,
    /// Both descriptions applied; ready for connectivity checks
    RemoteDescriptionSet,
    /// ICE reported connectivity after both descriptions were applied
    Connected,
    /// Terminal
    Closed,
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inputs that move the negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// `create_offer` succeeded
    CreateOffer,
    /// `create_answer` succeeded
    CreateAnswer,
    /// `set_local_description` succeeded
    SetLocalDescription,
    /// `set_remote_description` succeeded
    SetRemoteDescription,
    /// Transport reported ICE `connected` or `completed`
    IceConnected,
    /// `close` was called
    Close,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseEvent::CreateOffer => "create_offer",
            PhaseEvent::CreateAnswer => "create_answer",
            PhaseEvent::SetLocalDescription => "set_local_description",
            PhaseEvent::SetRemoteDescription => "set_remote_description",
            PhaseEvent::IceConnected => "ice_connected",
            PhaseEvent::Close => "close",
        };
        f.write_str(name)
    }
}

impl NegotiationPhase {
    /// Next phase for `event`, or `StateError` if the transition is not allowed
    pub fn next(self, role: EndpointRole, event: PhaseEvent) -> Result<Self> {
        use EndpointRole::*;
        use NegotiationPhase::*;
        use PhaseEvent::*;

        let next = match (role, self, event) {
            (_, _, Close) => Some(Closed),

            (Offerer, Idle, CreateOffer) => Some(OfferCreated),
            (Offerer, OfferCreated, SetLocalDescription) => Some(LocalDescriptionSet),
            (Offerer, LocalDescriptionSet, SetRemoteDescription) => Some(RemoteDescriptionSet),

            (Answerer, Idle, SetRemoteDescription) => Some(RemoteOfferSet),
            (Answerer, RemoteOfferSet, CreateAnswer) => Some(AnswerCreated),
            // The offer is already applied, so a local answer completes the pair
            (Answerer, AnswerCreated, SetLocalDescription) => Some(RemoteDescriptionSet),

            (_, RemoteDescriptionSet, IceConnected) | (_, Connected, IceConnected) => {
                Some(Connected)
            }

            _ => None,
        };

        next.ok_or_else(|| {
            Error::StateError(format!(
                "{} cannot {} while {}",
                role, event, self
            ))
        })
    }

    /// Whether negotiation has moved past `Idle`
    pub fn has_started(&self) -> bool {
        !matches!(self, NegotiationPhase::Idle)
    }
}

/// ICE connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// No checks started
    #[default]
    New,
    /// Connectivity checks running
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished with a usable pair
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// No usable pair; terminal for media, endpoint stays open
    Failed,
    /// Transport shut down
    Closed,
}

impl IceConnectionState {
    /// `connected` or `completed`
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointState {
    /// Negotiation phase
    pub phase: NegotiationPhase,

    /// Last reported ICE connection state
    pub ice_connection_state: IceConnectionState,

    /// Own description applied
    pub local_description_set: bool,

    /// Peer's description applied
    pub remote_description_set: bool,
}

impl EndpointState {
    pub(crate) fn new() -> Self {
        Self {
            phase: NegotiationPhase::Idle,
            ice_connection_state: IceConnectionState::New,
            local_description_set: false,
            remote_description_set: false,
        }
    }

    /// Both descriptions applied and not closed
    pub fn is_ready_for_connectivity(&self) -> bool {
        self.local_description_set
            && self.remote_description_set
            && self.phase != NegotiationPhase::Closed
    }

    /// Whether the endpoint has been closed
    pub fn is_closed(&self) -> bool {
        self.phase == NegotiationPhase::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offerer_path() {
        let role = EndpointRole::Offerer;
        let phase = NegotiationPhase::Idle
            .next(role, PhaseEvent::CreateOffer)
            .and_then(|p| p.next(role, PhaseEvent::SetLocalDescription))
            .unwrap();
        assert_eq!(phase, NegotiationPhase::LocalDescriptionSet);

        let phase = phase.next(role, PhaseEvent::SetRemoteDescription).unwrap();
        assert_eq!(phase, NegotiationPhase::RemoteDescriptionSet);

        let phase = phase.next(role, PhaseEvent::IceConnected).unwrap();
        assert_eq!(phase, NegotiationPhase::Connected);
    }

    #[test]
    fn test_answerer_path() {
        let role = EndpointRole::Answerer;
        let phase = NegotiationPhase::Idle
            .next(role, PhaseEvent::SetRemoteDescription)
            .unwrap();
        assert_eq!(phase, NegotiationPhase::RemoteOfferSet);

        let phase = phase
            .next(role, PhaseEvent::CreateAnswer)
            .and_then(|p| p.next(role, PhaseEvent::SetLocalDescription))
            .unwrap();
        assert_eq!(phase, NegotiationPhase::RemoteDescriptionSet);
    }

    #[test]
    fn test_role_restrictions() {
        assert!(NegotiationPhase::Idle
            .next(EndpointRole::Answerer, PhaseEvent::CreateOffer)
            .is_err());
        assert!(NegotiationPhase::Idle
            .next(EndpointRole::Offerer, PhaseEvent::CreateAnswer)
            .is_err());
        // Answer before the offer was applied
        assert!(NegotiationPhase::Idle
            .next(EndpointRole::Answerer, PhaseEvent::CreateAnswer)
            .is_err());
        // Offerer cannot take a remote description before its own
        assert!(NegotiationPhase::OfferCreated
            .next(EndpointRole::Offerer, PhaseEvent::SetRemoteDescription)
            .is_err());
    }

    #[test]
    fn test_ice_connected_requires_both_descriptions() {
        let err = NegotiationPhase::LocalDescriptionSet
            .next(EndpointRole::Offerer, PhaseEvent::IceConnected)
            .unwrap_err();
        assert!(matches!(err, Error::StateError(_)));
    }

    #[test]
    fn test_close_from_anywhere() {
        for phase in [
            NegotiationPhase::Idle,
            NegotiationPhase::OfferCreated,
            NegotiationPhase::RemoteDescriptionSet,
            NegotiationPhase::Connected,
            NegotiationPhase::Closed,
        ] {
            assert_eq!(
                phase.next(EndpointRole::Offerer, PhaseEvent::Close).unwrap(),
                NegotiationPhase::Closed
            );
        }
    }

    #[test]
    fn test_role_sdp_types() {
        assert_eq!(EndpointRole::Offerer.local_sdp_type(), SdpType::Offer);
        assert_eq!(EndpointRole::Offerer.remote_sdp_type(), SdpType::Answer);
        assert_eq!(EndpointRole::Answerer.local_sdp_type(), SdpType::Answer);
        assert_eq!(EndpointRole::Answerer.opposite(), EndpointRole::Offerer);
    }

    #[test]
    fn test_ready_for_connectivity() {
        let mut state = EndpointState::new();
        assert!(!state.is_ready_for_connectivity());
        state.local_description_set = true;
        state.remote_description_set = true;
        assert!(state.is_ready_for_connectivity());
        state.phase = NegotiationPhase::Closed;
        assert!(!state.is_ready_for_connectivity());
    }
}
