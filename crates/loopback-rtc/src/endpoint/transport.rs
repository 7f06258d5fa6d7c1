//! Peer transport capability
//!
//! The transport is the media/ICE engine under an endpoint: it writes and
//! applies SDP, ingests remote candidates, and reports local candidates, ICE
//! connection changes and inbound tracks through [`TransportEvents`].

use super::state::{EndpointRole, IceConnectionState};
use crate::config::OfferOptions;
use crate::media::MediaTrack;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An inbound track announced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackEvent {
    /// Sender's stream identifier
    pub stream_id: String,

    /// The track
    pub track: MediaTrack,
}

/// Receiving side of the transport's event channels
///
/// Each channel preserves the transport's emission order; nothing orders
/// one channel relative to another.
#[derive(Debug)]
pub struct TransportEvents {
    /// Locally gathered candidates, ending with the `null` sentinel
    pub candidates: mpsc::UnboundedReceiver<IceCandidate>,

    /// Inbound tracks
    pub tracks: mpsc::UnboundedReceiver<RemoteTrackEvent>,

    /// ICE connection state changes
    pub ice_states: mpsc::UnboundedReceiver<IceConnectionState>,
}

impl TransportEvents {
    /// Create a connected sink/receiver pair
    pub fn channel() -> (TransportEventSink, TransportEvents) {
        let (candidates_tx, candidates) = mpsc::unbounded_channel();
        let (tracks_tx, tracks) = mpsc::unbounded_channel();
        let (ice_tx, ice_states) = mpsc::unbounded_channel();

        (
            TransportEventSink {
                candidates: candidates_tx,
                tracks: tracks_tx,
                ice_states: ice_tx,
            },
            TransportEvents {
                candidates,
                tracks,
                ice_states,
            },
        )
    }
}

/// Sending side of the transport's event channels
///
/// Sends never fail; events emitted after the endpoint stopped listening are
/// dropped.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    candidates: mpsc::UnboundedSender<IceCandidate>,
    tracks: mpsc::UnboundedSender<RemoteTrackEvent>,
    ice_states: mpsc::UnboundedSender<IceConnectionState>,
}

impl TransportEventSink {
    /// Emit a locally gathered candidate (or the end-of-candidates sentinel)
    pub fn candidate(&self, candidate: IceCandidate) {
        let _ = self.candidates.send(candidate);
    }

    /// Announce an inbound track
    pub fn track(&self, event: RemoteTrackEvent) {
        let _ = self.tracks.send(event);
    }

    /// Report an ICE connection state change
    pub fn ice_state(&self, state: IceConnectionState) {
        let _ = self.ice_states.send(state);
    }
}

/// Media/ICE engine under one endpoint
///
/// Every method may suspend. Implementations do not enforce negotiation
/// order; `NegotiationEndpoint` does.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach an outbound track belonging to `stream_id`
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<()>;

    /// Produce offer SDP
    async fn create_offer(&self, options: &OfferOptions) -> Result<String>;

    /// Produce answer SDP for the applied remote offer
    async fn create_answer(&self) -> Result<String>;

    /// Apply own description
    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    /// Apply the peer's description
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Ingest one remote candidate (never the `null` sentinel)
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Release sockets and media resources
    async fn close(&self) -> Result<()>;
}

/// Creates one transport per endpoint
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create the transport for `role` together with its event receivers
    async fn create(
        &self,
        role: EndpointRole,
    ) -> Result<(Box<dyn PeerTransport>, TransportEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channels_preserve_order() {
        let (sink, mut events) = TransportEvents::channel();

        sink.candidate(IceCandidate::new("c1"));
        sink.ice_state(IceConnectionState::Checking);
        sink.candidate(IceCandidate::new("c2"));
        sink.candidate(IceCandidate::end_of_candidates());

        assert_eq!(events.candidates.recv().await, Some(IceCandidate::new("c1")));
        assert_eq!(events.candidates.recv().await, Some(IceCandidate::new("c2")));
        assert!(events
            .candidates
            .recv()
            .await
            .unwrap()
            .is_end_of_candidates());
        assert_eq!(
            events.ice_states.recv().await,
            Some(IceConnectionState::Checking)
        );
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, events) = TransportEvents::channel();
        drop(events);
        sink.candidate(IceCandidate::new("late"));
        sink.ice_state(IceConnectionState::Closed);
    }
}
