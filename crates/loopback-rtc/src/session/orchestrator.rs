//! Offer/answer sequencing between the two endpoints of a session
//!
//! The description exchange runs in a fixed order:
//!
//! 1. attach local media to the offerer
//! 2. offerer creates the offer, applies it, relays it to the answerer
//! 3. answerer creates the answer, applies it, relays it to the offerer
//!
//! Candidate relay (both directions) and remote-stream forwarding run as
//! listener tasks started before step 1 and are never gated on it.

use super::Session;
use crate::config::OfferOptions;
use crate::endpoint::{EndpointRole, NegotiationEndpoint, NegotiationPhase};
use crate::media::{MediaBundle, MediaConsumer};
use crate::signaling::SignalingMessage;
use crate::{Error, Result};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// One step of the description exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Create both transports
    CreateTransports,
    /// Attach the local bundle to the offerer
    AttachLocalMedia,
    /// Offerer `create_offer`
    CreateOffer,
    /// Offerer `set_local_description(offer)`
    ApplyOfferLocally,
    /// Answerer `set_remote_description(offer)`
    RelayOffer,
    /// Answerer `create_answer`
    CreateAnswer,
    /// Answerer `set_local_description(answer)`
    ApplyAnswerLocally,
    /// Offerer `set_remote_description(answer)`
    RelayAnswer,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStep::CreateTransports => "create transports",
            NegotiationStep::AttachLocalMedia => "attach local media",
            NegotiationStep::CreateOffer => "create offer",
            NegotiationStep::ApplyOfferLocally => "offerer setLocalDescription",
            NegotiationStep::RelayOffer => "answerer setRemoteDescription",
            NegotiationStep::CreateAnswer => "create answer",
            NegotiationStep::ApplyAnswerLocally => "answerer setLocalDescription",
            NegotiationStep::RelayAnswer => "offerer setRemoteDescription",
        };
        f.write_str(name)
    }
}

/// How a description exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Both descriptions applied on both endpoints
    Completed,
    /// An endpoint closed while `at` was in flight
    Cancelled {
        /// Step that was interrupted
        at: NegotiationStep,
    },
}

impl NegotiationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, NegotiationOutcome::Completed)
    }
}

/// Drives one session's negotiation
pub struct NegotiationOrchestrator {
    consumer: Arc<dyn MediaConsumer>,
    offer_options: OfferOptions,
}

impl NegotiationOrchestrator {
    pub fn new(consumer: Arc<dyn MediaConsumer>, offer_options: OfferOptions) -> Self {
        Self {
            consumer,
            offer_options,
        }
    }

    /// Start the listener tasks and run the description exchange
    ///
    /// A step that fails stops the exchange; nothing after it is relayed.
    /// Steps interrupted by `Session::close` yield
    /// `NegotiationOutcome::Cancelled` instead of an error.
    #[instrument(skip(self, session, bundle), fields(session_id = %session.id()))]
    pub async fn negotiate(
        &self,
        session: &Session,
        bundle: MediaBundle,
    ) -> Result<NegotiationOutcome> {
        self.start_listeners(session)?;

        match self.exchange_descriptions(session, bundle).await {
            Ok(()) => {
                info!("Description exchange complete for session {}", session.id());
                Ok(NegotiationOutcome::Completed)
            }
            Err((step, e)) if e.is_cancellation() => {
                debug!("Negotiation cancelled during {}: {}", step, e);
                Ok(NegotiationOutcome::Cancelled { at: step })
            }
            Err((step, e)) if e.is_protocol_misuse() => {
                error!("{} failed, endpoints out of sequence: {}", step, e);
                Err(e)
            }
            Err((step, e)) => {
                error!("{} failed: {}", step, e);
                Err(e)
            }
        }
    }

    /// Candidate relays, remote-stream forwarding, ICE observers and the
    /// setup-time watcher
    pub fn start_listeners(&self, session: &Session) -> Result<()> {
        for role in [EndpointRole::Offerer, EndpointRole::Answerer] {
            let from = Arc::clone(session.endpoint(role));
            let to = Arc::clone(session.endpoint(role.opposite()));
            let candidates = from.observe_local_candidates()?;
            let log = session.signaling().clone();

            session.spawn(relay_candidates(role, candidates, to, log));
            session.spawn(observe_ice(Arc::clone(&from)));
        }

        let arrivals = session.answerer().observe_remote_track_arrival()?;
        let consumer = Arc::clone(&self.consumer);
        session.spawn_draining(async move {
            let mut arrivals = arrivals;
            while let Some(stream) = arrivals.next().await {
                info!(
                    "Answerer received remote stream {} ({} tracks)",
                    stream.id(),
                    stream.tracks().len()
                );
                consumer.remote_stream(stream);
            }
        });

        let mut offerer = session.offerer().subscribe_state();
        let mut answerer = session.answerer().subscribe_state();
        let started_at = session.started_at();
        let slot = session.setup_time_slot();
        session.spawn(async move {
            let connected = |s: &crate::endpoint::EndpointState| {
                s.phase == NegotiationPhase::Connected
            };
            if offerer.wait_for(connected).await.is_err() {
                return;
            }
            if answerer.wait_for(connected).await.is_err() {
                return;
            }
            let elapsed = started_at.elapsed();
            *slot.lock() = Some(elapsed);
            info!("Setup time: {:.3}ms", elapsed.as_secs_f64() * 1000.0);
        });

        Ok(())
    }

    async fn exchange_descriptions(
        &self,
        session: &Session,
        bundle: MediaBundle,
    ) -> std::result::Result<(), (NegotiationStep, Error)> {
        let offerer = session.offerer();
        let answerer = session.answerer();
        let log = session.signaling();

        let at = |step: NegotiationStep| move |e: Error| (step, e);

        offerer
            .attach_local_media(bundle)
            .await
            .map_err(at(NegotiationStep::AttachLocalMedia))?;

        info!("Offerer createOffer start");
        let offer = offerer
            .create_offer(&self.offer_options)
            .await
            .map_err(at(NegotiationStep::CreateOffer))?;
        debug!("Offer from offerer:\n{}", offer.sdp);

        offerer
            .set_local_description(offer.clone())
            .await
            .map_err(at(NegotiationStep::ApplyOfferLocally))?;

        log.record(SignalingMessage::description(
            EndpointRole::Offerer,
            offer.clone(),
        ));
        answerer
            .set_remote_description(offer)
            .await
            .map_err(at(NegotiationStep::RelayOffer))?;

        info!("Answerer createAnswer start");
        let answer = answerer
            .create_answer()
            .await
            .map_err(at(NegotiationStep::CreateAnswer))?;
        debug!("Answer from answerer:\n{}", answer.sdp);

        answerer
            .set_local_description(answer.clone())
            .await
            .map_err(at(NegotiationStep::ApplyAnswerLocally))?;

        log.record(SignalingMessage::description(
            EndpointRole::Answerer,
            answer.clone(),
        ));
        offerer
            .set_remote_description(answer)
            .await
            .map_err(at(NegotiationStep::RelayAnswer))?;

        Ok(())
    }
}

/// Drain `from`'s local candidates into `to`
///
/// Candidates are applied one at a time, so per-source order is preserved.
async fn relay_candidates(
    from: EndpointRole,
    mut candidates: crate::endpoint::CandidateStream,
    to: Arc<NegotiationEndpoint>,
    log: crate::signaling::SignalingLog,
) {
    while let Some(candidate) = candidates.next().await {
        debug!("{} ICE candidate: {}", from, candidate);
        log.record(SignalingMessage::candidate(from, candidate.clone()));

        match to.add_remote_candidate(candidate).await {
            Ok(_) => {}
            Err(e) if e.is_cancellation() => break,
            Err(e) => warn!("{} failed to add ICE candidate from {}: {}", to.role(), from, e),
        }
    }
}

/// Log ICE connection state changes of one endpoint
async fn observe_ice(endpoint: Arc<NegotiationEndpoint>) {
    let role = endpoint.role();
    let mut state = endpoint.subscribe_state();
    let mut last = state.borrow().ice_connection_state;
    drop(endpoint);

    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().ice_connection_state;
        if current != last {
            info!("{} ICE state: {}", role, current);
            last = current;
        }
    }
}
