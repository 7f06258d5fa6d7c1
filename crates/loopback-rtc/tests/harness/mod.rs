//! Loopback negotiation test harness
//!
//! Provides:
//! - A recording media consumer
//! - Endpoint and controller builders over scripted simulated transports
//! - Polling helper for asynchronously reported state

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use loopback_rtc::endpoint::{SimulatedScript, SimulatedTransport};
use loopback_rtc::{
    EndpointRole, Error, LoopbackConfig, MediaBundle, MediaConsumer, MediaKind, MediaSource,
    MediaTrack, NegotiationEndpoint, RemoteStream, Session, SessionController,
    SimulatedTransportFactory, SyntheticMediaSource, TransportFactory,
};
use parking_lot::Mutex;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Loopback error: {0}")]
    Loopback(#[from] Error),
}

/// Initialize logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loopback_rtc=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 5ms until it holds or `timeout` elapses
pub async fn wait_for<F>(what: &str, timeout: Duration, mut condition: F) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `future` with a timeout, failing the test on expiry
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}

/// Media consumer that records everything it is handed
#[derive(Default)]
pub struct RecordingConsumer {
    previews: Mutex<Vec<String>>,
    streams: Mutex<Vec<RemoteStream>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stream ids of previewed bundles
    pub fn previews(&self) -> Vec<String> {
        self.previews.lock().clone()
    }

    pub fn streams(&self) -> Vec<RemoteStream> {
        self.streams.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl MediaConsumer for RecordingConsumer {
    fn local_preview(&self, bundle: &MediaBundle) {
        self.previews.lock().push(bundle.id().to_string());
    }

    fn remote_stream(&self, stream: RemoteStream) {
        self.streams.lock().push(stream);
    }

    fn session_error(&self, error: &Error) {
        self.errors.lock().push(error.to_string());
    }
}

/// One microphone and one camera in stream `local-stream`
pub fn av_bundle() -> MediaBundle {
    MediaBundle::with_id("local-stream")
        .with_track(MediaTrack::with_id(
            "mic-track",
            MediaKind::Audio,
            "Test Microphone",
        ))
        .with_track(MediaTrack::with_id(
            "cam-track",
            MediaKind::Video,
            "Test Camera",
        ))
}

/// Endpoint over a simulated transport
pub fn endpoint(role: EndpointRole, script: SimulatedScript) -> NegotiationEndpoint {
    let (transport, events) = SimulatedTransport::new(role, script);
    NegotiationEndpoint::new(role, Box::new(transport), events)
}

/// Session over simulated transports
pub fn session(offerer: SimulatedScript, answerer: SimulatedScript) -> Session {
    Session::new(
        endpoint(EndpointRole::Offerer, offerer),
        endpoint(EndpointRole::Answerer, answerer),
    )
}

/// Controller with a recording consumer
pub fn controller_with(
    source: impl MediaSource + 'static,
    transports: impl TransportFactory + 'static,
) -> (SessionController, Arc<RecordingConsumer>) {
    let consumer = RecordingConsumer::new();
    let controller = SessionController::new(
        LoopbackConfig::default(),
        Arc::new(source),
        Arc::new(transports),
        consumer.clone(),
    );
    (controller, consumer)
}

/// Controller with synthetic media and default simulated transports
pub fn controller() -> (SessionController, Arc<RecordingConsumer>) {
    controller_with(SyntheticMediaSource::new(), SimulatedTransportFactory::new())
}
