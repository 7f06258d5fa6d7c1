//! Loopback WebRTC negotiation
//!
//! This crate runs a complete offer/answer/trickle-ICE negotiation between two
//! peer endpoints living in the same process, with signaling as direct calls.
//!
//! # Features
//!
//! - **Negotiation endpoints**: offer/answer state machine per endpoint, with
//!   early remote candidates buffered until the remote description is applied
//! - **Orchestrated exchange**: fixed description order, concurrent candidate
//!   relay in both directions
//! - **Call lifecycle**: start / call / hangup, safe to hang up mid-negotiation
//! - **Transports**: real `webrtc` peer connections or an in-process simulation
//!   with fault injection
//! - **Signaling record**: every relayed message as serializable JSON
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SessionController (NoSession → MediaAcquired → InCall)  │
//! │  ├─ MediaSource  → MediaBundle (local preview)           │
//! │  └─ Session                                              │
//! │     ├─ NegotiationEndpoint (offerer)  ─┐                 │
//! │     │   └─ PeerTransport               │ offer / answer  │
//! │     ├─ NegotiationEndpoint (answerer) ─┘ candidates      │
//! │     │   └─ PeerTransport                                 │
//! │     └─ NegotiationOrchestrator                           │
//! │        ├─ description exchange (sequential)              │
//! │        ├─ candidate relays (one task per direction)      │
//! │        └─ remote streams → MediaConsumer                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use loopback_rtc::{LoopbackConfig, TransportBackend};
//!
//! let config = LoopbackConfig::from_toml_str(
//!     r#"
//!     backend = "simulated"
//!
//!     [offer_options]
//!     offer_to_receive_audio = true
//!     offer_to_receive_video = true
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.backend, TransportBackend::Simulated);
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use loopback_rtc::{
//!     LoggingConsumer, LoopbackConfig, SessionController, SimulatedTransportFactory,
//!     SyntheticMediaSource,
//! };
//!
//! # async fn example() -> loopback_rtc::Result<()> {
//! let controller = SessionController::new(
//!     LoopbackConfig::default(),
//!     Arc::new(SyntheticMediaSource::new()),
//!     Arc::new(SimulatedTransportFactory::new()),
//!     Arc::new(LoggingConsumer),
//! );
//!
//! controller.start().await?;
//! controller.call().await?;
//! controller.hangup().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use config::{IceServerConfig, LoopbackConfig, OfferOptions, TransportBackend};
pub use endpoint::{
    CandidateDisposition, EndpointRole, EndpointState, IceConnectionState, NegotiationEndpoint,
    NegotiationPhase, PeerTransport, RtcTransportFactory, SimulatedScript,
    SimulatedTransportFactory, TransportFactory,
};
pub use error::{Error, Result};
pub use media::{
    LoggingConsumer, MediaBundle, MediaConstraints, MediaConsumer, MediaKind, MediaSource,
    MediaTrack, RemoteStream, SyntheticMediaSource,
};
pub use session::{
    ControllerState, NegotiationOrchestrator, NegotiationOutcome, NegotiationStep, Session,
    SessionController,
};
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalingLog, SignalingMessage};

/// Build the transport factory selected by `config.backend`
pub fn transport_factory(config: &LoopbackConfig) -> std::sync::Arc<dyn TransportFactory> {
    match config.backend {
        TransportBackend::Simulated => std::sync::Arc::new(SimulatedTransportFactory::new()),
        TransportBackend::WebRtc => std::sync::Arc::new(RtcTransportFactory::new(config.clone())),
    }
}

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
