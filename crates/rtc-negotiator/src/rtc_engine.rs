use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::to_engine_error;
use crate::{
    ConnectionState, EngineEvents, GatheringState, NegotiationError, SdpKind, SessionDescription,
    SessionEngine,
};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

fn build_api(setting: SettingEngine) -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_engine_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_engine_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// [`SessionEngine`] backed by a webrtc-rs peer connection.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    remote_tracks: Mutex<Option<mpsc::UnboundedReceiver<Arc<TrackRemote>>>>,
}

impl WebRtcEngine {
    pub async fn new(config: &WebRtcConfig) -> Result<Self, NegotiationError> {
        let api = build_api(SettingEngine::default())?;
        let mut rtc_config = RTCConfiguration::default();
        if !config.ice_servers.is_empty() {
            rtc_config.ice_servers = vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(to_engine_error)?,
        );

        let (track_tx, track_rx) = mpsc::unbounded_channel();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                debug!(target = "rtc_negotiator::webrtc", "remote track arrived");
                let _ = tx.send(track);
            })
        }));

        Ok(Self {
            pc,
            remote_tracks: Mutex::new(Some(track_rx)),
        })
    }

    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc)
    }

    /// Adds a PCMU send track. The returned task drains RTCP for the sender and
    /// should be owned by the connection.
    pub async fn add_audio_track(
        &self,
    ) -> Result<(Arc<TrackLocalStaticSample>, JoinHandle<()>), NegotiationError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8_000,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "earshot".to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(to_engine_error)?;

        let rtcp = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            trace!(target = "rtc_negotiator::webrtc", "rtcp reader finished");
        });
        Ok((track, rtcp))
    }

    /// Asks the remote side to send audio without sending any ourselves.
    pub async fn add_recv_audio_transceiver(&self) -> Result<(), NegotiationError> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(to_engine_error)?;
        Ok(())
    }

    /// Inbound tracks in arrival order. Available once.
    pub fn take_remote_tracks(&self) -> Option<mpsc::UnboundedReceiver<Arc<TrackRemote>>> {
        self.remote_tracks.lock().take()
    }
}

#[async_trait]
impl SessionEngine for WebRtcEngine {
    fn attach(&self, events: EngineEvents) {
        let gathering_events = events.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                let events = gathering_events.clone();
                Box::pin(async move {
                    trace!(target = "rtc_negotiator::webrtc", ?state, "ice gathering state changed");
                    match state {
                        RTCIceGathererState::Gathering => {
                            events.gathering_changed(GatheringState::Gathering)
                        }
                        RTCIceGathererState::Complete => {
                            events.gathering_changed(GatheringState::Complete)
                        }
                        _ => {}
                    }
                })
            }));

        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    debug!(target = "rtc_negotiator::webrtc", ?state, "peer connection state changed");
                    let mapped = match state {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        RTCPeerConnectionState::Unspecified => return,
                    };
                    events.connection_changed(mapped);
                })
            }));
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(to_engine_error)?;
        description_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(to_engine_error)?;
        description_from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let rtc = description_to_rtc(desc)?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(to_engine_error)
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let rtc = description_to_rtc(desc)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let local = self.pc.local_description().await?;
        description_from_rtc(&local).ok()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(to_engine_error)
    }
}

fn description_to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.body.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.body.clone()),
    };
    parsed.map_err(|err| NegotiationError::InvalidDescription(err.to_string()))
}

fn description_from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(NegotiationError::Engine(format!(
                "unsupported sdp type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        body: desc.sdp.clone(),
    })
}
