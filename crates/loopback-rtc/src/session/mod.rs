//! Call sessions
//!
//! A [`Session`] owns the two endpoints of one loopback call. The
//! [`NegotiationOrchestrator`] drives offer/answer over it and the
//! [`SessionController`] owns the call lifecycle around it.

pub mod controller;
pub mod orchestrator;

pub use controller::{ControllerState, SessionController};
pub use orchestrator::{NegotiationOrchestrator, NegotiationOutcome, NegotiationStep};

use crate::endpoint::{EndpointRole, NegotiationEndpoint, NegotiationPhase};
use crate::signaling::SignalingLog;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Both endpoints of one call plus the listener tasks relaying between them
pub struct Session {
    id: String,
    offerer: Arc<NegotiationEndpoint>,
    answerer: Arc<NegotiationEndpoint>,
    signaling: SignalingLog,
    started_at: Instant,
    setup_time: Arc<Mutex<Option<Duration>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Tasks that finish on their own once both endpoints are closed
    draining: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session from an offerer and an answerer
    pub fn new(offerer: NegotiationEndpoint, answerer: NegotiationEndpoint) -> Self {
        debug_assert_eq!(offerer.role(), EndpointRole::Offerer);
        debug_assert_eq!(answerer.role(), EndpointRole::Answerer);

        let id = uuid::Uuid::new_v4().to_string();
        info!("Created session {}", id);

        Self {
            id,
            offerer: Arc::new(offerer),
            answerer: Arc::new(answerer),
            signaling: SignalingLog::new(),
            started_at: Instant::now(),
            setup_time: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
            draining: Mutex::new(Vec::new()),
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The endpoint playing `role`
    pub fn endpoint(&self, role: EndpointRole) -> &Arc<NegotiationEndpoint> {
        match role {
            EndpointRole::Offerer => &self.offerer,
            EndpointRole::Answerer => &self.answerer,
        }
    }

    pub fn offerer(&self) -> &Arc<NegotiationEndpoint> {
        &self.offerer
    }

    pub fn answerer(&self) -> &Arc<NegotiationEndpoint> {
        &self.answerer
    }

    /// Every message relayed between the endpoints, in relay order
    pub fn signaling(&self) -> &SignalingLog {
        &self.signaling
    }

    /// When the call started
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time from call start until both endpoints reported `Connected`
    pub fn setup_time(&self) -> Option<Duration> {
        *self.setup_time.lock()
    }

    pub(crate) fn setup_time_slot(&self) -> Arc<Mutex<Option<Duration>>> {
        Arc::clone(&self.setup_time)
    }

    /// Both endpoints have applied both descriptions
    pub fn is_ready_for_connectivity(&self) -> bool {
        self.offerer.state().is_ready_for_connectivity()
            && self.answerer.state().is_ready_for_connectivity()
    }

    /// Both endpoints reached `Connected`
    pub fn is_connected(&self) -> bool {
        self.offerer.phase() == NegotiationPhase::Connected
            && self.answerer.phase() == NegotiationPhase::Connected
    }

    /// Run `task` until the session closes
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }

    /// Run `task`, letting it finish when the session closes
    ///
    /// `task` must complete once both endpoints are closed.
    pub(crate) fn spawn_draining<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.draining.lock().push(tokio::spawn(task));
    }

    /// Close both endpoints and stop the listener tasks
    ///
    /// Endpoint close failures are logged; both endpoints are always closed.
    /// Remote streams reported before close are delivered before this returns.
    pub async fn close(&self) {
        for endpoint in [&self.offerer, &self.answerer] {
            if let Err(e) = endpoint.close().await {
                warn!(
                    "Failed to close {} endpoint in session {}: {}",
                    endpoint.role(),
                    self.id,
                    e
                );
            }
        }

        let draining: Vec<_> = self.draining.lock().drain(..).collect();
        for task in draining {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Session {} task failed: {}", self.id, e);
                }
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        info!("Closed session {}", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .drain(..)
            .chain(self.draining.get_mut().drain(..))
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("offerer", &self.offerer)
            .field("answerer", &self.answerer)
            .field("setup_time", &self.setup_time())
            .finish()
    }
}
