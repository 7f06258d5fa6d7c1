//! In-process transport
//!
//! Writes a minimal SDP that carries one `m=` section per attached track or
//! requested receive direction, announces remote tracks from the peer's
//! `a=msid` lines and reports ICE `checking` then `connected` once both
//! descriptions are applied. No packets are sent.
//!
//! A [`SimulatedScript`] configures gathered candidates, latency and faults.

use super::state::{EndpointRole, IceConnectionState};
use super::transport::{
    PeerTransport, RemoteTrackEvent, TransportEventSink, TransportEvents, TransportFactory,
};
use crate::config::OfferOptions;
use crate::media::{MediaKind, MediaTrack};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Transport operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportOp::AddTrack => "add_track",
            TransportOp::CreateOffer => "create_offer",
            TransportOp::CreateAnswer => "create_answer",
            TransportOp::SetLocalDescription => "set_local_description",
            TransportOp::SetRemoteDescription => "set_remote_description",
        };
        f.write_str(name)
    }
}

/// Behaviour of one simulated transport
#[derive(Debug, Clone)]
pub struct SimulatedScript {
    /// Candidate lines emitted after the local description is applied
    pub local_candidates: Vec<String>,

    /// Candidate lines `add_ice_candidate` rejects
    pub reject_candidates: Vec<String>,

    /// Operation that fails with `NegotiationError`
    pub fail_at: Option<TransportOp>,

    /// Fail only this invocation of `fail_at` (1-based); every one when `None`
    pub fail_on_call: Option<usize>,

    /// Refuse offers without outbound tracks
    pub reject_receive_only: bool,

    /// ICE state reported once both descriptions are applied
    pub ice_outcome: IceConnectionState,

    /// Delay before each operation completes
    pub latency: Option<Duration>,
}

impl Default for SimulatedScript {
    fn default() -> Self {
        Self {
            local_candidates: Vec::new(),
            reject_candidates: Vec::new(),
            fail_at: None,
            fail_on_call: None,
            reject_receive_only: false,
            ice_outcome: IceConnectionState::Connected,
            latency: None,
        }
    }
}

impl SimulatedScript {
    /// Script that gathers the given candidate lines
    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local_candidates: candidates.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Fail `op`
    pub fn failing_at(mut self, op: TransportOp) -> Self {
        self.fail_at = Some(op);
        self
    }

    /// Fail only the `n`th invocation of `op`
    pub fn failing_nth(mut self, op: TransportOp, n: usize) -> Self {
        self.fail_at = Some(op);
        self.fail_on_call = Some(n);
        self
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report `state` instead of `connected` once both descriptions are set
    pub fn with_ice_outcome(mut self, state: IceConnectionState) -> Self {
        self.ice_outcome = state;
        self
    }
}

/// One `m=` section of a simulated SDP
#[derive(Debug, Clone, PartialEq, Eq)]
struct SdpSection {
    kind: MediaKind,
    direction: &'static str,
    msid: Option<(String, MediaTrack)>,
}

#[derive(Default)]
struct SimulatedInner {
    tracks: Vec<(String, MediaTrack)>,
    remote_sections: Option<Vec<SdpSection>>,
    local_set: bool,
    remote_set: bool,
    ice_started: bool,
    applied_candidates: Vec<IceCandidate>,
    closed: bool,
    calls: HashMap<TransportOp, usize>,
}

/// In-process [`PeerTransport`]
pub struct SimulatedTransport {
    role: EndpointRole,
    script: SimulatedScript,
    session_id: u64,
    sink: TransportEventSink,
    inner: Mutex<SimulatedInner>,
}

impl SimulatedTransport {
    /// Create a transport and its event receivers
    pub fn new(role: EndpointRole, script: SimulatedScript) -> (Self, TransportEvents) {
        let (sink, events) = TransportEvents::channel();
        let session_id = (uuid::Uuid::new_v4().as_u128() as u64) >> 1;

        (
            Self {
                role,
                script,
                session_id,
                sink,
                inner: Mutex::new(SimulatedInner::default()),
            },
            events,
        )
    }

    /// Remote candidates accepted so far
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().applied_candidates.clone()
    }

    async fn step(&self, op: Option<TransportOp>) -> Result<()> {
        if let Some(latency) = self.script.latency {
            tokio::time::sleep(latency).await;
        }

        if self.inner.lock().closed {
            return Err(Error::StateError(format!(
                "{} transport is closed",
                self.role
            )));
        }

        let Some(op) = op else {
            return Ok(());
        };
        let call = {
            let mut inner = self.inner.lock();
            let calls = inner.calls.entry(op).or_default();
            *calls += 1;
            *calls
        };

        let fails = self.script.fail_at == Some(op)
            && self.script.fail_on_call.map_or(true, |n| n == call);
        if fails {
            return Err(Error::NegotiationError(format!(
                "simulated {} failure on {}",
                op, self.role
            )));
        }
        Ok(())
    }

    fn render(&self, sdp_type: SdpType, sections: &[SdpSection]) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=x-sdp-type:{}\r\n",
            self.session_id, sdp_type
        );

        for (mid, section) in sections.iter().enumerate() {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\na={}\r\n",
                section.kind, mid, section.direction
            ));
            if let Some((stream_id, track)) = &section.msid {
                sdp.push_str(&format!("a=msid:{} {}\r\n", stream_id, track.id));
                if !track.label.is_empty() {
                    sdp.push_str(&format!("a=x-label:{}\r\n", track.label));
                }
            }
        }

        sdp
    }

    /// Emit ICE progress once both descriptions are applied
    fn maybe_start_ice(&self) {
        let start = {
            let mut inner = self.inner.lock();
            if inner.local_set && inner.remote_set && !inner.ice_started {
                inner.ice_started = true;
                true
            } else {
                false
            }
        };

        if start {
            debug!(
                "{} simulated ICE: checking -> {}",
                self.role, self.script.ice_outcome
            );
            self.sink.ice_state(IceConnectionState::Checking);
            self.sink.ice_state(self.script.ice_outcome);
        }
    }
}

/// Parse the `m=` sections of an SDP blob
fn parse_sections(sdp: &str) -> Result<Vec<SdpSection>> {
    if !sdp.starts_with("v=0") {
        return Err(Error::NegotiationError(
            "malformed SDP: missing version line".to_string(),
        ));
    }

    let mut sections: Vec<SdpSection> = Vec::new();
    for line in sdp.lines() {
        let line = line.trim_end();

        if let Some(media) = line.strip_prefix("m=") {
            let kind_str = media.split_whitespace().next().unwrap_or_default();
            let kind = MediaKind::from_sdp(kind_str).ok_or_else(|| {
                Error::NegotiationError(format!("unsupported media type '{}'", kind_str))
            })?;
            sections.push(SdpSection {
                kind,
                direction: "sendrecv",
                msid: None,
            });
            continue;
        }

        let Some(section) = sections.last_mut() else {
            continue;
        };

        match line {
            "a=sendrecv" => section.direction = "sendrecv",
            "a=sendonly" => section.direction = "sendonly",
            "a=recvonly" => section.direction = "recvonly",
            "a=inactive" => section.direction = "inactive",
            _ => {
                if let Some(msid) = line.strip_prefix("a=msid:") {
                    let mut parts = msid.split_whitespace();
                    if let (Some(stream_id), Some(track_id)) = (parts.next(), parts.next()) {
                        section.msid = Some((
                            stream_id.to_string(),
                            MediaTrack::with_id(track_id, section.kind, ""),
                        ));
                    }
                } else if let Some(label) = line.strip_prefix("a=x-label:") {
                    if let Some((_, track)) = section.msid.as_mut() {
                        track.label = label.to_string();
                    }
                }
            }
        }
    }

    Ok(sections)
}

#[async_trait]
impl PeerTransport for SimulatedTransport {
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<()> {
        self.step(Some(TransportOp::AddTrack)).await?;
        self.inner
            .lock()
            .tracks
            .push((stream_id.to_string(), track.clone()));
        Ok(())
    }

    async fn create_offer(&self, options: &OfferOptions) -> Result<String> {
        self.step(Some(TransportOp::CreateOffer)).await?;

        let tracks = self.inner.lock().tracks.clone();
        if tracks.is_empty() && self.script.reject_receive_only {
            return Err(Error::NegotiationError(
                "receive-only offers are not supported".to_string(),
            ));
        }

        let mut sections: Vec<SdpSection> = tracks
            .into_iter()
            .map(|(stream_id, track)| SdpSection {
                kind: track.kind,
                direction: "sendrecv",
                msid: Some((stream_id, track)),
            })
            .collect();

        for (wanted, kind) in [
            (options.offer_to_receive_audio, MediaKind::Audio),
            (options.offer_to_receive_video, MediaKind::Video),
        ] {
            if wanted && !sections.iter().any(|s| s.kind == kind) {
                sections.push(SdpSection {
                    kind,
                    direction: "recvonly",
                    msid: None,
                });
            }
        }

        Ok(self.render(SdpType::Offer, &sections))
    }

    async fn create_answer(&self) -> Result<String> {
        self.step(Some(TransportOp::CreateAnswer)).await?;

        let (remote, tracks) = {
            let inner = self.inner.lock();
            (inner.remote_sections.clone(), inner.tracks.clone())
        };
        let remote = remote.ok_or_else(|| {
            Error::NegotiationError("no remote offer to answer".to_string())
        })?;

        let mut unused = tracks;
        let sections: Vec<SdpSection> = remote
            .iter()
            .map(|offered| {
                let can_send = offered.direction == "sendrecv" || offered.direction == "recvonly";
                let offered_send = offered.direction == "sendrecv" || offered.direction == "sendonly";
                let own = if can_send {
                    unused
                        .iter()
                        .position(|(_, t)| t.kind == offered.kind)
                        .map(|i| unused.remove(i))
                } else {
                    None
                };
                let direction = match (own.is_some(), offered_send) {
                    (true, true) => "sendrecv",
                    (true, false) => "sendonly",
                    (false, true) => "recvonly",
                    (false, false) => "inactive",
                };
                SdpSection {
                    kind: offered.kind,
                    direction,
                    msid: own,
                }
            })
            .collect();

        Ok(self.render(SdpType::Answer, &sections))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.step(Some(TransportOp::SetLocalDescription)).await?;
        parse_sections(&description.sdp)?;
        self.inner.lock().local_set = true;

        for line in &self.script.local_candidates {
            self.sink.candidate(IceCandidate::new(line.clone()));
        }
        self.sink.candidate(IceCandidate::end_of_candidates());

        self.maybe_start_ice();
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.step(Some(TransportOp::SetRemoteDescription)).await?;
        let sections = parse_sections(&description.sdp)?;

        {
            let mut inner = self.inner.lock();
            inner.remote_sections = Some(sections.clone());
            inner.remote_set = true;
        }

        let mut by_stream: HashMap<&str, usize> = HashMap::new();
        for section in &sections {
            if let Some((stream_id, track)) = &section.msid {
                *by_stream.entry(stream_id.as_str()).or_default() += 1;
                self.sink.track(RemoteTrackEvent {
                    stream_id: stream_id.clone(),
                    track: track.clone(),
                });
            }
        }
        debug!(
            "{} simulated remote description: {} sections, {} streams",
            self.role,
            sections.len(),
            by_stream.len()
        );

        self.maybe_start_ice();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.step(None).await?;

        let line = candidate.candidate.as_deref().unwrap_or_default();
        if self.script.reject_candidates.iter().any(|r| r == line) {
            return Err(Error::IceCandidateError(format!(
                "rejected candidate '{}'",
                line
            )));
        }

        let mut inner = self.inner.lock();
        if !inner.remote_set {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        inner.applied_candidates.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let first = {
            let mut inner = self.inner.lock();
            !std::mem::replace(&mut inner.closed, true)
        };
        if first {
            self.sink.ice_state(IceConnectionState::Closed);
        }
        Ok(())
    }
}

/// Creates [`SimulatedTransport`]s with a script per role
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransportFactory {
    offerer: SimulatedScript,
    answerer: SimulatedScript,
}

impl SimulatedTransportFactory {
    /// Both roles use the default script
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `script` for the offerer's transport
    pub fn with_offerer(mut self, script: SimulatedScript) -> Self {
        self.offerer = script;
        self
    }

    /// Use `script` for the answerer's transport
    pub fn with_answerer(mut self, script: SimulatedScript) -> Self {
        self.answerer = script;
        self
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransportFactory {
    async fn create(
        &self,
        role: EndpointRole,
    ) -> Result<(Box<dyn PeerTransport>, TransportEvents)> {
        let script = match role {
            EndpointRole::Offerer => self.offerer.clone(),
            EndpointRole::Answerer => self.answerer.clone(),
        };
        let (transport, events) = SimulatedTransport::new(role, script);
        Ok((Box::new(transport), events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> MediaTrack {
        MediaTrack::with_id("cam", MediaKind::Video, "Front Camera")
    }

    #[tokio::test]
    async fn test_offer_lists_tracks_and_receive_sections() {
        let (transport, _events) =
            SimulatedTransport::new(EndpointRole::Offerer, SimulatedScript::default());
        transport.add_track("s1", &camera()).await.unwrap();

        let sdp = transport
            .create_offer(&OfferOptions::default())
            .await
            .unwrap();
        let sections = parse_sections(&sdp).unwrap();

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].kind, MediaKind::Video);
        assert_eq!(
            sections[0].msid,
            Some(("s1".to_string(), camera()))
        );
        assert_eq!(sections[1].kind, MediaKind::Audio);
        assert_eq!(sections[1].direction, "recvonly");
    }

    #[tokio::test]
    async fn test_answer_without_tracks_is_receive_only() {
        let (offerer, _o) =
            SimulatedTransport::new(EndpointRole::Offerer, SimulatedScript::default());
        offerer.add_track("s1", &camera()).await.unwrap();
        let offer = offerer.create_offer(&OfferOptions::send_only()).await.unwrap();

        let (answerer, mut events) =
            SimulatedTransport::new(EndpointRole::Answerer, SimulatedScript::default());
        answerer
            .set_remote_description(&SessionDescription::offer(offer))
            .await
            .unwrap();
        let answer = answerer.create_answer().await.unwrap();

        let sections = parse_sections(&answer).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].direction, "recvonly");
        assert!(sections[0].msid.is_none());

        let event = events.tracks.recv().await.unwrap();
        assert_eq!(event.stream_id, "s1");
        assert_eq!(event.track.label, "Front Camera");
    }

    #[tokio::test]
    async fn test_ice_reported_after_both_descriptions() {
        let (transport, mut events) =
            SimulatedTransport::new(EndpointRole::Answerer, SimulatedScript::default());
        transport
            .set_remote_description(&SessionDescription::offer("v=0\r\n"))
            .await
            .unwrap();
        assert!(events.ice_states.try_recv().is_err());

        transport
            .set_local_description(&SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap();
        assert_eq!(
            events.ice_states.recv().await,
            Some(IceConnectionState::Checking)
        );
        assert_eq!(
            events.ice_states.recv().await,
            Some(IceConnectionState::Connected)
        );
    }

    #[tokio::test]
    async fn test_malformed_sdp_rejected() {
        let (transport, _events) =
            SimulatedTransport::new(EndpointRole::Answerer, SimulatedScript::default());
        let err = transport
            .set_remote_description(&SessionDescription::offer("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationError(_)));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let script = SimulatedScript::default().failing_at(TransportOp::CreateOffer);
        let (transport, _events) = SimulatedTransport::new(EndpointRole::Offerer, script);
        assert!(transport
            .create_offer(&OfferOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description() {
        let (transport, _events) =
            SimulatedTransport::new(EndpointRole::Answerer, SimulatedScript::default());
        let err = transport
            .add_ice_candidate(&IceCandidate::new("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IceCandidateError(_)));
    }

    #[tokio::test]
    async fn test_close_reports_closed_once() {
        let (transport, mut events) =
            SimulatedTransport::new(EndpointRole::Offerer, SimulatedScript::default());
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        drop(transport);

        assert_eq!(
            events.ice_states.recv().await,
            Some(IceConnectionState::Closed)
        );
        assert_eq!(events.ice_states.recv().await, None);
    }
}
