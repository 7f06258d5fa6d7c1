//! Negotiation endpoints and the transports under them

pub mod connection;
pub mod rtc;
pub mod simulated;
pub mod state;
pub mod transport;

pub use connection::{
    CandidateDisposition, CandidateStream, NegotiationEndpoint, RemoteStreamArrivals,
};
pub use rtc::{RtcPeerTransport, RtcTransportFactory};
pub use simulated::{SimulatedScript, SimulatedTransport, SimulatedTransportFactory, TransportOp};
pub use state::{EndpointRole, EndpointState, IceConnectionState, NegotiationPhase, PhaseEvent};
pub use transport::{
    PeerTransport, RemoteTrackEvent, TransportEventSink, TransportEvents, TransportFactory,
};
