//! WebRTC transport backed by webrtc-rs

use super::state::{EndpointRole, IceConnectionState};
use super::transport::{
    PeerTransport, RemoteTrackEvent, TransportEventSink, TransportEvents, TransportFactory,
};
use crate::config::{LoopbackConfig, OfferOptions};
use crate::media::{MediaKind, MediaTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn ice_state_from_rtc(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

/// [`PeerTransport`] over a real `RTCPeerConnection`
///
/// Local tracks are `TrackLocalStaticSample`s (Opus for audio, VP8 for
/// video) that carry no samples; negotiation and ICE are real.
pub struct RtcPeerTransport {
    role: EndpointRole,
    peer_connection: Arc<RTCPeerConnection>,

    /// Kinds with an outbound track
    sending: Mutex<Vec<MediaKind>>,

    /// RTP senders (retained to prevent track cleanup)
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl RtcPeerTransport {
    /// Create a peer connection for `role` using `config`'s ICE servers
    #[instrument(skip(config))]
    pub async fn new(
        role: EndpointRole,
        config: &LoopbackConfig,
    ) -> Result<(Self, TransportEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?,
        );

        let (sink, events) = TransportEvents::channel();
        Self::install_handlers(role, &peer_connection, sink);

        info!("Created {} peer connection", role);

        Ok((
            Self {
                role,
                peer_connection,
                sending: Mutex::new(Vec::new()),
                senders: Mutex::new(Vec::new()),
            },
            events,
        ))
    }

    fn install_handlers(
        role: EndpointRole,
        peer_connection: &RTCPeerConnection,
        sink: TransportEventSink,
    ) {
        let candidates = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidates.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => sink.candidate(IceCandidate::from(init)),
                        Err(e) => warn!("{} dropped unserializable candidate: {}", role, e),
                    },
                    None => sink.candidate(IceCandidate::end_of_candidates()),
                }
            })
        }));

        let ice_states = sink.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let sink = ice_states.clone();
                Box::pin(async move {
                    if let Some(state) = ice_state_from_rtc(state) {
                        sink.ice_state(state);
                    }
                })
            },
        ));

        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    debug!("{} remote {} track {}", role, kind, track.id());
                    sink.track(RemoteTrackEvent {
                        stream_id: track.stream_id(),
                        track: MediaTrack::with_id(track.id(), kind, ""),
                    });
                })
            },
        ));
    }

    /// Add receive-only transceivers for requested kinds without a track
    async fn add_receive_transceivers(&self, options: &OfferOptions) -> Result<()> {
        let sending = self.sending.lock().clone();

        for (wanted, kind) in [
            (options.offer_to_receive_audio, MediaKind::Audio),
            (options.offer_to_receive_video, MediaKind::Video),
        ] {
            if !wanted || sending.contains(&kind) {
                continue;
            }
            self.peer_connection
                .add_transceiver_from_kind(
                    codec_type(kind),
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::NegotiationError(format!(
                        "Failed to add receive-only {} transceiver: {}",
                        kind, e
                    ))
                })?;
            debug!("{} added receive-only {} transceiver", self.role, kind);
        }

        Ok(())
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn add_track(&self, stream_id: &str, track: &MediaTrack) -> Result<()> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind),
            track.id.clone(),
            stream_id.to_string(),
        ));

        let sender = self
            .peer_connection
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::WebRtcError(format!("Failed to add {} track: {}", track.kind, e))
            })?;

        self.senders.lock().push(sender);
        self.sending.lock().push(track.kind);
        Ok(())
    }

    async fn create_offer(&self, options: &OfferOptions) -> Result<String> {
        self.add_receive_transceivers(options).await?;

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create offer: {}", e)))?;

        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;

        Ok(answer.sdp)
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(description.to_rtc()?)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set local description: {}", e))
            })
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(description.to_rtc()?)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.to_rtc())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing {} peer connection", self.role);
        self.senders.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

/// Creates [`RtcPeerTransport`]s from a shared configuration
#[derive(Debug, Clone, Default)]
pub struct RtcTransportFactory {
    config: LoopbackConfig,
}

impl RtcTransportFactory {
    /// Factory using `config`'s ICE servers
    pub fn new(config: LoopbackConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        role: EndpointRole,
    ) -> Result<(Box<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = RtcPeerTransport::new(role, &self.config).await?;
        Ok((Box::new(transport), events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            ice_state_from_rtc(RTCIceConnectionState::Completed),
            Some(IceConnectionState::Completed)
        );
        assert_eq!(
            ice_state_from_rtc(RTCIceConnectionState::Failed),
            Some(IceConnectionState::Failed)
        );
        assert_eq!(ice_state_from_rtc(RTCIceConnectionState::Unspecified), None);
    }

    #[test]
    fn test_codecs() {
        assert_eq!(codec_for(MediaKind::Audio).mime_type, "audio/opus");
        assert_eq!(codec_for(MediaKind::Video).clock_rate, 90000);
        assert_eq!(codec_type(MediaKind::Video), RTPCodecType::Video);
    }

    #[tokio::test]
    async fn test_receive_only_offer_has_both_sections() {
        let (transport, _events) =
            RtcPeerTransport::new(EndpointRole::Offerer, &LoopbackConfig::default())
                .await
                .unwrap();

        let sdp = transport
            .create_offer(&OfferOptions::default())
            .await
            .unwrap();
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("m=video"));
        assert!(sdp.contains("a=recvonly"));
        transport.close().await.unwrap();
    }
}
