//! Call lifecycle: start, call, hang up
//!
//! ```text
//! NoSession --start--> MediaAcquired --call--> InCall --hangup--> Ended
//!                                                      Ended --start--> MediaAcquired
//! ```
//!
//! All methods take `&self`, so `hangup` can run while `call` is suspended
//! inside the negotiation.

use super::orchestrator::{NegotiationOrchestrator, NegotiationOutcome, NegotiationStep};
use super::Session;
use crate::config::LoopbackConfig;
use crate::endpoint::{EndpointRole, NegotiationEndpoint, TransportFactory};
use crate::media::{MediaBundle, MediaConsumer, MediaSource};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No media, no call
    NoSession,
    /// Local media acquired; ready to call
    MediaAcquired,
    /// A session exists
    InCall,
    /// Hung up; `start` may begin again
    Ended,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct ControllerInner {
    state: ControllerState,
    bundle: Option<MediaBundle>,
    session: Option<Arc<Session>>,
    /// Bumped by every `call` and `hangup`; a `call` that sees a different
    /// value after suspending has been hung up
    generation: u64,
}

/// Owns the local media and at most one session
pub struct SessionController {
    config: LoopbackConfig,
    media_source: Arc<dyn MediaSource>,
    transports: Arc<dyn TransportFactory>,
    consumer: Arc<dyn MediaConsumer>,
    inner: Mutex<ControllerInner>,
}

impl SessionController {
    pub fn new(
        config: LoopbackConfig,
        media_source: Arc<dyn MediaSource>,
        transports: Arc<dyn TransportFactory>,
        consumer: Arc<dyn MediaConsumer>,
    ) -> Self {
        Self {
            config,
            media_source,
            transports,
            consumer,
            inner: Mutex::new(ControllerInner {
                state: ControllerState::NoSession,
                bundle: None,
                session: None,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    /// Current (or last ended) session
    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.lock().session.clone()
    }

    /// Whether acquired media is waiting for `call`
    pub fn has_local_media(&self) -> bool {
        self.inner.lock().bundle.is_some()
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Acquire local media and hand it to the consumer for preview
    ///
    /// # Errors
    ///
    /// `MediaAccessError` if capture is denied (state unchanged);
    /// `SessionActive` if media is already held or a call is running.
    pub async fn start(&self) -> Result<()> {
        self.ensure_can_start()?;

        info!("Requesting local stream");
        let bundle = match self.media_source.acquire(self.config.constraints).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("getUserMedia() error: {}", e);
                self.consumer.session_error(&e);
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                ControllerState::MediaAcquired | ControllerState::InCall
            ) {
                return Err(Error::SessionActive);
            }
            self.consumer.local_preview(&bundle);
            inner.bundle = Some(bundle);
            inner.session = None;
            inner.state = ControllerState::MediaAcquired;
        }

        info!("Received local stream");
        Ok(())
    }

    fn ensure_can_start(&self) -> Result<()> {
        match self.inner.lock().state {
            ControllerState::MediaAcquired | ControllerState::InCall => Err(Error::SessionActive),
            ControllerState::NoSession | ControllerState::Ended => Ok(()),
        }
    }

    /// Create both endpoints and negotiate between them
    ///
    /// Negotiation failures are returned and reported to the consumer; the
    /// endpoints stay up until `hangup`.
    pub async fn call(&self) -> Result<NegotiationOutcome> {
        let (bundle, generation) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ControllerState::InCall => return Err(Error::SessionActive),
                ControllerState::NoSession | ControllerState::Ended => {
                    return Err(Error::StateError(
                        "call requires acquired local media".to_string(),
                    ))
                }
                ControllerState::MediaAcquired => {}
            }
            let bundle = inner.bundle.take().ok_or_else(|| {
                Error::StateError("local media missing while MediaAcquired".to_string())
            })?;
            inner.state = ControllerState::InCall;
            inner.generation += 1;
            (bundle, inner.generation)
        };

        info!("Starting call");
        if let Some(track) = bundle.video_tracks().first() {
            info!("Using video device: {}", track.label);
        }
        if let Some(track) = bundle.audio_tracks().first() {
            info!("Using audio device: {}", track.label);
        }

        let (offerer, answerer) = match self.create_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.generation == generation && inner.state == ControllerState::InCall {
                    inner.bundle = Some(bundle);
                    inner.state = ControllerState::MediaAcquired;
                }
                drop(inner);
                error!("Failed to create peer connections: {}", e);
                self.consumer.session_error(&e);
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(offerer, answerer));
        let stale = {
            let mut inner = self.inner.lock();
            if inner.generation == generation {
                inner.session = Some(Arc::clone(&session));
                false
            } else {
                true
            }
        };

        if stale {
            debug!("Call hung up while creating peer connections");
            session.close().await;
            return Ok(NegotiationOutcome::Cancelled {
                at: NegotiationStep::CreateTransports,
            });
        }

        let orchestrator =
            NegotiationOrchestrator::new(Arc::clone(&self.consumer), self.config.offer_options);

        match orchestrator.negotiate(&session, bundle).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_fatal_to_session() {
                    warn!(
                        "Session {} cannot complete negotiation; hang up to release it",
                        session.id()
                    );
                }
                self.consumer.session_error(&e);
                Err(e)
            }
        }
    }

    async fn create_endpoints(&self) -> Result<(NegotiationEndpoint, NegotiationEndpoint)> {
        let (transport, events) = self.transports.create(EndpointRole::Offerer).await?;
        let offerer = NegotiationEndpoint::new(EndpointRole::Offerer, transport, events);
        info!("Created local peer connection object");

        let answerer = match self.transports.create(EndpointRole::Answerer).await {
            Ok((transport, events)) => {
                NegotiationEndpoint::new(EndpointRole::Answerer, transport, events)
            }
            Err(e) => {
                if let Err(close_err) = offerer.close().await {
                    warn!("Failed to close offerer: {}", close_err);
                }
                return Err(e);
            }
        };
        info!("Created remote peer connection object");

        Ok((offerer, answerer))
    }

    /// Close both endpoints and end the call
    ///
    /// Safe from any state: a no-op before `start` and after a previous
    /// `hangup`. Held local media is released.
    pub async fn hangup(&self) {
        let session = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                ControllerState::NoSession | ControllerState::Ended
            ) {
                debug!("hangup with no active call ({})", inner.state);
                return;
            }
            inner.state = ControllerState::Ended;
            inner.bundle = None;
            inner.generation += 1;
            inner.session.clone()
        };

        info!("Ending call");
        if let Some(session) = session {
            session.close().await;
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("backend", &self.config.backend)
            .finish()
    }
}
