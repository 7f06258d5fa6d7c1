//! Negotiation endpoint
//!
//! Wraps one [`PeerTransport`] behind the offer/answer state machine in
//! [`super::state`]. Every transport call may suspend; an endpoint closed while
//! a call is in flight turns the result into `Error::EndpointClosed` so the
//! caller can drop it quietly.

use super::state::{
    EndpointRole, EndpointState, IceConnectionState, NegotiationPhase, PhaseEvent,
};
use super::transport::{PeerTransport, RemoteTrackEvent, TransportEvents};
use crate::config::OfferOptions;
use crate::media::{MediaBundle, MediaKind, RemoteStream};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument, warn};

/// Locally gathered candidates, ending with the `null` sentinel
pub type CandidateStream = BoxStream<'static, IceCandidate>;

/// Inbound streams, one item per distinct stream
pub type RemoteStreamArrivals = BoxStream<'static, RemoteStream>;

/// What `add_remote_candidate` did with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Handed to the transport
    Applied,
    /// Held until the remote description is applied
    Buffered,
    /// End-of-candidates sentinel recorded
    EndOfCandidates,
}

#[derive(Default)]
struct EndpointInner {
    /// Attached local media, owned by the endpoint once attached
    local_media: Option<MediaBundle>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    local_in_flight: bool,
    remote_in_flight: bool,
    /// Candidates received before the remote description, in arrival order
    pending_candidates: Vec<IceCandidate>,
    /// Ids of tracks already handed to the transport
    attached_tracks: HashSet<String>,
    /// Candidates handed to the transport (plus the sentinel), in order
    applied_candidates: Vec<IceCandidate>,
    remote_end_of_candidates: bool,
}

/// One side of a two-party negotiation
pub struct NegotiationEndpoint {
    role: EndpointRole,
    endpoint_id: String,
    transport: Box<dyn PeerTransport>,
    state: Arc<watch::Sender<EndpointState>>,
    inner: Mutex<EndpointInner>,
    /// Serializes remote-candidate application with the pending flush
    candidate_lane: tokio::sync::Mutex<()>,
    remote_streams: Arc<Mutex<HashMap<String, RemoteStream>>>,
    local_candidates: Mutex<Option<mpsc::UnboundedReceiver<IceCandidate>>>,
    arrivals: Mutex<Option<mpsc::UnboundedReceiver<RemoteStream>>>,
    ice_listener: Mutex<Option<JoinHandle<()>>>,
    track_listener: Mutex<Option<JoinHandle<()>>>,
}

impl NegotiationEndpoint {
    /// Create an endpoint over `transport`
    ///
    /// Spawns the ICE-state and remote-track listeners, so this must be
    /// called from within a Tokio runtime.
    pub fn new(
        role: EndpointRole,
        transport: Box<dyn PeerTransport>,
        events: TransportEvents,
    ) -> Self {
        let endpoint_id = uuid::Uuid::new_v4().to_string();
        let (state_tx, _) = watch::channel(EndpointState::new());
        let state = Arc::new(state_tx);
        let remote_streams = Arc::new(Mutex::new(HashMap::new()));
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();

        let TransportEvents {
            candidates,
            tracks,
            ice_states,
        } = events;

        let ice_listener = tokio::spawn(watch_ice_states(role, Arc::clone(&state), ice_states));
        let track_listener = tokio::spawn(watch_remote_tracks(
            role,
            state.subscribe(),
            Arc::clone(&remote_streams),
            tracks,
            arrivals_tx,
        ));

        info!(
            "Created {} endpoint: endpoint_id={}",
            role, endpoint_id
        );

        Self {
            role,
            endpoint_id,
            transport,
            state,
            inner: Mutex::new(EndpointInner::default()),
            candidate_lane: tokio::sync::Mutex::new(()),
            remote_streams,
            local_candidates: Mutex::new(Some(candidates)),
            arrivals: Mutex::new(Some(arrivals_rx)),
            ice_listener: Mutex::new(Some(ice_listener)),
            track_listener: Mutex::new(Some(track_listener)),
        }
    }

    /// Role fixed at creation
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    /// Unique identifier for this endpoint instance
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Current state snapshot
    pub fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    /// Current negotiation phase
    pub fn phase(&self) -> NegotiationPhase {
        self.state.borrow().phase
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<EndpointState> {
        self.state.subscribe()
    }

    /// Applied local description, if any
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().local_description.clone()
    }

    /// Applied remote description, if any
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().remote_description.clone()
    }

    /// Remote candidates handed to the transport, in application order
    ///
    /// Includes the end-of-candidates sentinel once it has been processed.
    pub fn applied_remote_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().applied_candidates.clone()
    }

    /// Number of remote candidates waiting for the remote description
    pub fn pending_remote_candidates(&self) -> usize {
        self.inner.lock().pending_candidates.len()
    }

    /// Whether the peer signalled the end of its candidates
    pub fn remote_candidates_complete(&self) -> bool {
        self.inner.lock().remote_end_of_candidates
    }

    /// Inbound streams seen so far
    pub fn remote_streams(&self) -> Vec<RemoteStream> {
        self.remote_streams.lock().values().cloned().collect()
    }

    /// Whether local media has been attached
    pub fn has_local_media(&self) -> bool {
        self.inner.lock().local_media.is_some()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.borrow().is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::EndpointClosed(self.role))
        } else {
            Ok(())
        }
    }

    /// Check that `event` is allowed now without applying it
    fn check_transition(&self, event: PhaseEvent) -> Result<NegotiationPhase> {
        self.ensure_open()?;
        self.phase().next(self.role, event)
    }

    /// Apply `event` and publish the new state
    fn advance(&self, event: PhaseEvent, update: impl FnOnce(&mut EndpointState)) -> Result<()> {
        let mut result = Ok(());
        let role = self.role;

        self.state.send_if_modified(|state| match state.phase.next(role, event) {
            Ok(next) => {
                debug!("{} phase transition: {} -> {}", role, state.phase, next);
                state.phase = next;
                update(state);
                if state.ice_connection_state.is_connected() {
                    if let Ok(connected) = state.phase.next(role, PhaseEvent::IceConnected) {
                        state.phase = connected;
                    }
                }
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });

        result
    }

    /// Attach every track of `bundle` to the outbound stream
    ///
    /// The bundle moves into the endpoint. Must precede `create_offer`. If a
    /// track fails, the tracks before it stay attached and a retry skips them.
    #[instrument(skip(self, bundle), fields(role = %self.role, stream_id = %bundle.id()))]
    pub async fn attach_local_media(&self, bundle: MediaBundle) -> Result<()> {
        self.ensure_open()?;

        if self.phase().has_started() {
            return Err(Error::StateError(format!(
                "{} cannot attach local media after negotiation started ({})",
                self.role,
                self.phase()
            )));
        }
        if self.has_local_media() {
            return Err(Error::StateError(format!(
                "{} already has local media attached",
                self.role
            )));
        }

        for track in bundle.tracks() {
            if self.inner.lock().attached_tracks.contains(&track.id) {
                debug!("{} track {} already attached", track.kind, track.id);
                continue;
            }

            let added = self.transport.add_track(bundle.id(), track).await;
            self.ensure_open()?;
            added?;
            self.inner.lock().attached_tracks.insert(track.id.clone());
            debug!("Attached {} track {} ({})", track.kind, track.id, track.label);
        }

        info!(
            "Added local stream to {}: {} audio, {} video",
            self.role,
            bundle.audio_tracks().len(),
            bundle.video_tracks().len()
        );

        self.inner.lock().local_media = Some(bundle);
        Ok(())
    }

    /// Create an offer (offerer, `Idle` only)
    ///
    /// # Errors
    ///
    /// `NegotiationError` when there is nothing to negotiate (no attached
    /// tracks and no receive options) or the transport cannot produce an
    /// offer.
    #[instrument(skip(self), fields(role = %self.role))]
    pub async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        self.check_transition(PhaseEvent::CreateOffer)?;

        let (has_audio, has_video) = {
            let inner = self.inner.lock();
            match &inner.local_media {
                Some(bundle) => (
                    !bundle.audio_tracks().is_empty(),
                    !bundle.video_tracks().is_empty(),
                ),
                None => (false, false),
            }
        };

        if !has_audio && !has_video && !options.receives_anything() {
            return Err(Error::NegotiationError(
                "no local tracks and no receive options; nothing to offer".to_string(),
            ));
        }

        debug!(
            "{} createOffer start: audio={}, video={}, receive_audio={}, receive_video={}",
            self.role,
            has_audio,
            has_video,
            options.offer_to_receive_audio,
            options.offer_to_receive_video
        );

        let created = self.transport.create_offer(options).await;
        self.ensure_open()?;
        let sdp = created.map_err(|e| negotiation_error("Failed to create offer", e))?;

        self.advance(PhaseEvent::CreateOffer, |_| {})?;
        Ok(SessionDescription::offer(sdp))
    }

    /// Create an answer (answerer, after the remote offer was applied)
    #[instrument(skip(self), fields(role = %self.role))]
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        self.check_transition(PhaseEvent::CreateAnswer)?;

        let created = self.transport.create_answer().await;
        self.ensure_open()?;
        let sdp = created.map_err(|e| negotiation_error("Failed to create answer", e))?;

        self.advance(PhaseEvent::CreateAnswer, |_| {})?;
        Ok(SessionDescription::answer(sdp))
    }

    /// Apply own description; allowed exactly once
    #[instrument(skip(self, description), fields(role = %self.role, sdp_type = %description.sdp_type))]
    pub async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;

        {
            let mut inner = self.inner.lock();
            if inner.local_description.is_some() || inner.local_in_flight {
                return Err(Error::StateError(format!(
                    "{} local description already set",
                    self.role
                )));
            }
            let expected = self.role.local_sdp_type();
            if description.sdp_type != expected {
                return Err(Error::DescriptionMismatchError {
                    expected,
                    actual: description.sdp_type,
                });
            }
            self.phase().next(self.role, PhaseEvent::SetLocalDescription)?;
            inner.local_in_flight = true;
        }

        let applied = self.transport.set_local_description(&description).await;
        self.inner.lock().local_in_flight = false;
        self.ensure_open()?;
        applied.map_err(|e| negotiation_error("Failed to set local description", e))?;

        self.advance(PhaseEvent::SetLocalDescription, |state| {
            state.local_description_set = true;
        })?;
        self.inner.lock().local_description = Some(description);

        info!("{} setLocalDescription complete", self.role);
        Ok(())
    }

    /// Apply the peer's description; allowed exactly once
    ///
    /// Candidates buffered before this call are applied afterwards in arrival
    /// order. A failure leaves the local description intact.
    #[instrument(skip(self, description), fields(role = %self.role, sdp_type = %description.sdp_type))]
    pub async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;

        {
            let mut inner = self.inner.lock();
            if inner.remote_description.is_some() || inner.remote_in_flight {
                return Err(Error::StateError(format!(
                    "{} remote description already set",
                    self.role
                )));
            }
            let expected = self.role.remote_sdp_type();
            if description.sdp_type != expected {
                return Err(Error::DescriptionMismatchError {
                    expected,
                    actual: description.sdp_type,
                });
            }
            self.phase()
                .next(self.role, PhaseEvent::SetRemoteDescription)?;
            inner.remote_in_flight = true;
        }

        let applied = self.transport.set_remote_description(&description).await;
        self.inner.lock().remote_in_flight = false;
        self.ensure_open()?;
        applied.map_err(|e| negotiation_error("Failed to set remote description", e))?;

        let _lane = self.candidate_lane.lock().await;
        self.ensure_open()?;

        self.advance(PhaseEvent::SetRemoteDescription, |state| {
            state.remote_description_set = true;
        })?;

        let pending = {
            let mut inner = self.inner.lock();
            inner.remote_description = Some(description);
            std::mem::take(&mut inner.pending_candidates)
        };

        info!("{} setRemoteDescription complete", self.role);

        if !pending.is_empty() {
            debug!(
                "{} applying {} buffered remote candidates",
                self.role,
                pending.len()
            );
        }

        for candidate in pending {
            match self.apply_candidate(candidate).await {
                Ok(_) => {}
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => warn!("{} failed to apply buffered candidate: {}", self.role, e),
            }
        }

        Ok(())
    }

    /// Ingest one remote candidate
    ///
    /// Before the remote description is applied the candidate is buffered.
    /// The `null` sentinel is recorded and never reaches the transport.
    ///
    /// # Errors
    ///
    /// `IceCandidateError` when the transport rejects the candidate; the
    /// session can continue.
    pub async fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        self.ensure_open()?;
        let _lane = self.candidate_lane.lock().await;
        self.ensure_open()?;

        {
            let mut inner = self.inner.lock();
            if inner.remote_description.is_none() {
                debug!(
                    "{} remote description not set yet, buffering candidate {}",
                    self.role, candidate
                );
                inner.pending_candidates.push(candidate);
                return Ok(CandidateDisposition::Buffered);
            }
        }

        self.apply_candidate(candidate).await
    }

    /// Caller must hold `candidate_lane`
    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<CandidateDisposition> {
        if candidate.is_end_of_candidates() {
            let mut inner = self.inner.lock();
            inner.remote_end_of_candidates = true;
            inner.applied_candidates.push(candidate);
            debug!("{} received end of remote candidates", self.role);
            return Ok(CandidateDisposition::EndOfCandidates);
        }

        let added = self.transport.add_ice_candidate(&candidate).await;
        self.ensure_open()?;
        added.map_err(|e| match e {
            Error::IceCandidateError(_) => e,
            other => Error::IceCandidateError(format!("{}: {}", candidate, other)),
        })?;

        self.inner.lock().applied_candidates.push(candidate);
        Ok(CandidateDisposition::Applied)
    }

    /// Take the stream of locally gathered candidates
    ///
    /// The stream can be taken once and ends when the endpoint closes.
    pub fn observe_local_candidates(&self) -> Result<CandidateStream> {
        let receiver = self.local_candidates.lock().take().ok_or_else(|| {
            Error::StateError(format!(
                "{} local candidate stream already observed",
                self.role
            ))
        })?;

        Ok(UnboundedReceiverStream::new(receiver)
            .take_until(self.closed())
            .boxed())
    }

    /// Take the stream of inbound streams
    ///
    /// Emits once per distinct stream; later tracks of a known stream only
    /// update its handle. The stream can be taken once. It ends after close,
    /// once every track the transport reported before close is announced.
    pub fn observe_remote_track_arrival(&self) -> Result<RemoteStreamArrivals> {
        let receiver = self.arrivals.lock().take().ok_or_else(|| {
            Error::StateError(format!(
                "{} remote track stream already observed",
                self.role
            ))
        })?;

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    /// Resolves once the endpoint is closed
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        wait_closed(self.state.subscribe())
    }

    /// Release the transport; idempotent and safe from any phase
    pub async fn close(&self) -> Result<()> {
        let mut first = false;
        let role = self.role;
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            match state.phase.next(role, PhaseEvent::Close) {
                Ok(closed) => state.phase = closed,
                Err(_) => return false,
            }
            first = true;
            state.ice_connection_state = IceConnectionState::Closed;
            true
        });

        if !first {
            debug!("{} endpoint already closed", self.role);
            return Ok(());
        }

        info!("Closing {} endpoint {}", self.role, self.endpoint_id);

        {
            let mut inner = self.inner.lock();
            inner.pending_candidates.clear();
            inner.local_media = None;
        }

        if let Some(listener) = self.ice_listener.lock().take() {
            listener.abort();
        }

        // Announces tracks already reported, then exits
        let track_listener = self.track_listener.lock().take();
        if let Some(listener) = track_listener {
            if let Err(e) = listener.await {
                if !e.is_cancelled() {
                    warn!("{} remote track listener failed: {}", self.role, e);
                }
            }
        }

        self.transport.close().await
    }
}

impl Drop for NegotiationEndpoint {
    fn drop(&mut self) {
        let listeners = [self.ice_listener.get_mut(), self.track_listener.get_mut()];
        for listener in listeners.into_iter().filter_map(Option::take) {
            listener.abort();
        }
    }
}

impl std::fmt::Debug for NegotiationEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationEndpoint")
            .field("role", &self.role)
            .field("endpoint_id", &self.endpoint_id)
            .field("state", &self.state())
            .finish()
    }
}

fn negotiation_error(context: &str, e: Error) -> Error {
    match e {
        Error::NegotiationError(_) | Error::EndpointClosed(_) => e,
        other => Error::NegotiationError(format!("{}: {}", context, other)),
    }
}

async fn watch_ice_states(
    role: EndpointRole,
    state: Arc<watch::Sender<EndpointState>>,
    mut ice_states: mpsc::UnboundedReceiver<IceConnectionState>,
) {
    while let Some(ice) = ice_states.recv().await {
        state.send_if_modified(|s| {
            if s.is_closed() || s.ice_connection_state == ice {
                return false;
            }
            debug!("{} ICE state: {} -> {}", role, s.ice_connection_state, ice);
            s.ice_connection_state = ice;
            if ice.is_connected() {
                if let Ok(connected) = s.phase.next(role, PhaseEvent::IceConnected) {
                    s.phase = connected;
                }
            }
            true
        });

        if ice == IceConnectionState::Failed {
            warn!("{} ICE connectivity failed; endpoint left open", role);
        }
    }
}

async fn wait_closed(mut state: watch::Receiver<EndpointState>) {
    let _ = state.wait_for(|s| s.is_closed()).await;
}

async fn watch_remote_tracks(
    role: EndpointRole,
    state: watch::Receiver<EndpointState>,
    streams: Arc<Mutex<HashMap<String, RemoteStream>>>,
    mut tracks: mpsc::UnboundedReceiver<RemoteTrackEvent>,
    arrivals: mpsc::UnboundedSender<RemoteStream>,
) {
    let closed = wait_closed(state);
    tokio::pin!(closed);

    loop {
        tokio::select! {
            biased;
            event = tracks.recv() => match event {
                Some(event) => announce_track(role, &streams, &arrivals, event),
                None => return,
            },
            _ = &mut closed => break,
        }
    }

    // Tracks reported before close are still announced
    while let Ok(event) = tracks.try_recv() {
        announce_track(role, &streams, &arrivals, event);
    }
}

fn announce_track(
    role: EndpointRole,
    streams: &Mutex<HashMap<String, RemoteStream>>,
    arrivals: &mpsc::UnboundedSender<RemoteStream>,
    RemoteTrackEvent { stream_id, track }: RemoteTrackEvent,
) {
    let kind: MediaKind = track.kind;
    let new_stream = {
        let mut streams = streams.lock();
        match streams.get(&stream_id) {
            Some(existing) => {
                existing.add_track(track);
                None
            }
            None => {
                let stream = RemoteStream::new(stream_id.clone());
                stream.add_track(track);
                streams.insert(stream_id.clone(), stream.clone());
                Some(stream)
            }
        }
    };

    match new_stream {
        Some(stream) => {
            info!("{} received remote stream {}", role, stream_id);
            let _ = arrivals.send(stream);
        }
        None => debug!(
            "{} received {} track for known stream {}",
            role, kind, stream_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::simulated::{SimulatedScript, SimulatedTransport, TransportOp};
    use crate::media::MediaTrack;
    use futures::StreamExt;

    fn endpoint(role: EndpointRole, script: SimulatedScript) -> NegotiationEndpoint {
        let (transport, events) = SimulatedTransport::new(role, script);
        NegotiationEndpoint::new(role, Box::new(transport), events)
    }

    fn av_bundle() -> MediaBundle {
        MediaBundle::with_id("local-stream")
            .with_track(MediaTrack::with_id("mic", MediaKind::Audio, "Microphone"))
            .with_track(MediaTrack::with_id("cam", MediaKind::Video, "Camera"))
    }

    #[tokio::test]
    async fn test_offerer_happy_path() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        ep.attach_local_media(av_bundle()).await.unwrap();

        let offer = ep.create_offer(&OfferOptions::default()).await.unwrap();
        assert!(offer.sdp.starts_with("v=0"));
        assert_eq!(ep.phase(), NegotiationPhase::OfferCreated);

        ep.set_local_description(offer).await.unwrap();
        assert_eq!(ep.phase(), NegotiationPhase::LocalDescriptionSet);
        assert!(ep.state().local_description_set);
    }

    #[tokio::test]
    async fn test_set_local_description_twice_fails() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let offer = ep.create_offer(&OfferOptions::default()).await.unwrap();
        ep.set_local_description(offer.clone()).await.unwrap();

        let err = ep.set_local_description(offer).await.unwrap_err();
        assert!(matches!(err, Error::StateError(_)));
    }

    #[tokio::test]
    async fn test_set_local_description_type_mismatch() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        ep.create_offer(&OfferOptions::default()).await.unwrap();

        let err = ep
            .set_local_description(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DescriptionMismatchError {
                expected: crate::signaling::SdpType::Offer,
                ..
            }
        ));
        assert!(!ep.state().local_description_set);
    }

    #[tokio::test]
    async fn test_answerer_cannot_create_offer() {
        let ep = endpoint(EndpointRole::Answerer, SimulatedScript::default());
        let err = ep.create_offer(&OfferOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::StateError(_)));
    }

    #[tokio::test]
    async fn test_create_answer_requires_remote_offer() {
        let ep = endpoint(EndpointRole::Answerer, SimulatedScript::default());
        let err = ep.create_answer().await.unwrap_err();
        assert!(matches!(err, Error::StateError(_)));
        assert_eq!(ep.phase(), NegotiationPhase::Idle);
    }

    #[tokio::test]
    async fn test_offer_with_nothing_to_negotiate() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let err = ep
            .create_offer(&OfferOptions::send_only())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationError(_)));
        assert_eq!(ep.phase(), NegotiationPhase::Idle);
    }

    #[tokio::test]
    async fn test_receive_only_offer() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let offer = ep.create_offer(&OfferOptions::default()).await.unwrap();
        assert!(offer.sdp.contains("a=recvonly"));
    }

    #[tokio::test]
    async fn test_attach_after_negotiation_started() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        ep.create_offer(&OfferOptions::default()).await.unwrap();

        let err = ep.attach_local_media(av_bundle()).await.unwrap_err();
        assert!(matches!(err, Error::StateError(_)));
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let offerer = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let answerer = endpoint(EndpointRole::Answerer, SimulatedScript::default());

        let disposition = answerer
            .add_remote_candidate(IceCandidate::new("c1"))
            .await
            .unwrap();
        assert_eq!(disposition, CandidateDisposition::Buffered);
        answerer
            .add_remote_candidate(IceCandidate::new("c2"))
            .await
            .unwrap();
        answerer
            .add_remote_candidate(IceCandidate::end_of_candidates())
            .await
            .unwrap();
        assert_eq!(answerer.pending_remote_candidates(), 3);
        assert!(answerer.applied_remote_candidates().is_empty());

        offerer.attach_local_media(av_bundle()).await.unwrap();
        let offer = offerer.create_offer(&OfferOptions::default()).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();

        assert_eq!(answerer.pending_remote_candidates(), 0);
        assert_eq!(
            answerer.applied_remote_candidates(),
            vec![
                IceCandidate::new("c1"),
                IceCandidate::new("c2"),
                IceCandidate::end_of_candidates()
            ]
        );
        assert!(answerer.remote_candidates_complete());
    }

    #[tokio::test]
    async fn test_rejected_candidate_is_not_fatal() {
        let script = SimulatedScript {
            reject_candidates: vec!["bad".to_string()],
            ..Default::default()
        };
        let answerer = endpoint(EndpointRole::Answerer, script);
        answerer
            .set_remote_description(SessionDescription::offer(
                "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            ))
            .await
            .unwrap();

        let err = answerer
            .add_remote_candidate(IceCandidate::new("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IceCandidateError(_)));

        let ok = answerer
            .add_remote_candidate(IceCandidate::new("good"))
            .await
            .unwrap();
        assert_eq!(ok, CandidateDisposition::Applied);
        assert_eq!(
            answerer.applied_remote_candidates(),
            vec![IceCandidate::new("good")]
        );
    }

    #[tokio::test]
    async fn test_local_candidate_stream_not_restartable() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let _stream = ep.observe_local_candidates().unwrap();
        assert!(matches!(
            ep.observe_local_candidates(),
            Err(Error::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_local_candidates_emitted_after_local_description() {
        let script = SimulatedScript::with_candidates(["c1", "c2"]);
        let ep = endpoint(EndpointRole::Offerer, script);
        let mut stream = ep.observe_local_candidates().unwrap();

        let offer = ep.create_offer(&OfferOptions::default()).await.unwrap();
        ep.set_local_description(offer).await.unwrap();

        assert_eq!(stream.next().await, Some(IceCandidate::new("c1")));
        assert_eq!(stream.next().await, Some(IceCandidate::new("c2")));
        assert_eq!(stream.next().await, Some(IceCandidate::end_of_candidates()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let ep = endpoint(EndpointRole::Answerer, SimulatedScript::default());
        ep.close().await.unwrap();
        ep.close().await.unwrap();

        assert!(ep.is_closed());
        assert_eq!(ep.state().ice_connection_state, IceConnectionState::Closed);
        assert!(matches!(
            ep.create_answer().await,
            Err(Error::EndpointClosed(EndpointRole::Answerer))
        ));
    }

    #[tokio::test]
    async fn test_candidate_stream_ends_on_close() {
        let ep = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let mut stream = ep.observe_local_candidates().unwrap();
        ep.close().await.unwrap();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_reported_tracks_announced_despite_immediate_close() {
        let offerer = endpoint(EndpointRole::Offerer, SimulatedScript::default());
        let answerer = endpoint(EndpointRole::Answerer, SimulatedScript::default());
        let mut arrivals = answerer.observe_remote_track_arrival().unwrap();

        offerer.attach_local_media(av_bundle()).await.unwrap();
        let offer = offerer.create_offer(&OfferOptions::default()).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();
        answerer.close().await.unwrap();

        let stream = arrivals.next().await.unwrap();
        assert_eq!(stream.id(), "local-stream");
        assert_eq!(stream.tracks().len(), 2);
        assert!(arrivals.next().await.is_none());
        assert_eq!(answerer.remote_streams().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_retry_skips_tracks_already_attached() {
        let script = SimulatedScript::default().failing_nth(TransportOp::AddTrack, 2);
        let ep = endpoint(EndpointRole::Offerer, script);

        let err = ep.attach_local_media(av_bundle()).await.unwrap_err();
        assert!(matches!(err, Error::NegotiationError(_)));
        assert!(!ep.has_local_media());

        ep.attach_local_media(av_bundle()).await.unwrap();
        assert!(ep.has_local_media());

        let offer = ep.create_offer(&OfferOptions::send_only()).await.unwrap();
        assert_eq!(offer.sdp.matches("m=audio").count(), 1);
        assert_eq!(offer.sdp.matches("m=video").count(), 1);
    }
}
