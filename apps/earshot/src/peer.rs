//! Wires one peer connection together: engine, negotiator, outbound audio,
//! chat channel and optional recording. The `run_*` functions are the four
//! CLI flows.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use audio_bridge::{AudioError, FrameSource, LiveCapture, SweepGenerator};
use relay_client::{
    CancellationToken, ExchangeError, PeerRole, RelayClient, RelayConfig, RelayError,
    RelaySession, SessionId, answer_over_relay, offer_over_relay,
};
use reqwest::StatusCode;
use rtc_negotiator::media::{WavRecorder, spawn_audio_pump, spawn_recorder};
use rtc_negotiator::{
    GatherOutcome, MediaError, NegotiationError, Negotiator, Role, WebRtcEngine, chat,
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{PeerConfig, SourceKind};
use crate::server::OfferRequest;

/// How long `hold` waits for the transport to report a connection before
/// logging that it has not come up.
const CONNECT_REPORT_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("answer endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("answer endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("cancelled")]
    Cancelled,
}

/// A webrtc-rs connection with its media attached.
pub struct PeerConnection {
    engine: Arc<WebRtcEngine>,
    negotiator: Negotiator,
}

impl PeerConnection {
    pub async fn build(role: Role, config: &PeerConfig) -> Result<Self, PeerError> {
        let engine = Arc::new(WebRtcEngine::new(&config.webrtc).await?);
        let negotiator = Negotiator::new(role, engine.clone());
        let peer = Self { engine, negotiator };
        if let Err(err) = peer.attach_media(config).await {
            peer.negotiator.close().await;
            return Err(err);
        }
        Ok(peer)
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    async fn attach_media(&self, config: &PeerConfig) -> Result<(), PeerError> {
        let pc = self.engine.peer_connection();
        match self.negotiator.role() {
            Role::Offerer => {
                let channel = chat::open_chat(&pc).await?;
                self.negotiator.own_cleanup(move || drop(channel));
            }
            Role::Answerer => chat::answer_chat(&pc),
        }

        match open_source(config)? {
            Some(source) => {
                let (track, rtcp) = self.engine.add_audio_track().await?;
                self.negotiator.own_task(rtcp);
                self.negotiator.own_task(spawn_audio_pump(source, track)?);
            }
            None if self.negotiator.role() == Role::Offerer => {
                self.engine.add_recv_audio_transceiver().await?;
            }
            None => {}
        }

        if let Some(path) = &config.record {
            self.record_first_track(path.clone());
        }
        Ok(())
    }

    /// Records the first inbound track. The recorder outlives the watcher so
    /// the file is finalized when the track ends.
    fn record_first_track(&self, path: PathBuf) {
        let Some(mut tracks) = self.engine.take_remote_tracks() else {
            return;
        };
        let watcher = tokio::spawn(async move {
            let Some(track) = tracks.recv().await else {
                return;
            };
            let recorder = match WavRecorder::create(&path) {
                Ok(recorder) => recorder,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot record received audio");
                    return;
                }
            };
            info!(path = %path.display(), "recording received audio");
            let _ = spawn_recorder(track, recorder).await;
        });
        self.negotiator.own_task(watcher);
    }
}

/// Opens the configured outbound source. A missing microphone is not fatal:
/// the call goes ahead without outbound audio.
pub fn open_source(config: &PeerConfig) -> Result<Option<Box<dyn FrameSource>>, PeerError> {
    match config.source {
        SourceKind::None => Ok(None),
        SourceKind::Tone => Ok(Some(Box::new(SweepGenerator::new(config.sweep.clone())?))),
        SourceKind::Mic => match LiveCapture::open(config.capture.clone()) {
            Ok(capture) => Ok(Some(Box::new(capture))),
            Err(AudioError::HardwareUnavailable(reason)) => {
                warn!(%reason, "microphone unavailable; continuing without outbound audio");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        },
    }
}

/// Posts `{"offer": sdp}` and returns the plain-text answer.
pub async fn post_offer(
    http: &reqwest::Client,
    url: &str,
    sdp: &str,
) -> Result<String, PeerError> {
    let response = http
        .post(url)
        .json(&OfferRequest {
            offer: sdp.to_string(),
        })
        .send()
        .await
        .map_err(|err| PeerError::Unreachable(err.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| PeerError::Unreachable(err.to_string()))?;
    if status != StatusCode::OK {
        return Err(PeerError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Keeps the connection up until it closes, `limit` elapses or `cancel`
/// fires, then closes it.
pub async fn hold(negotiator: &Negotiator, limit: Option<Duration>, cancel: &CancellationToken) {
    let expiry = async {
        match limit {
            Some(limit) => sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);
    let connected = negotiator.wait_connected(CONNECT_REPORT_LIMIT);
    tokio::pin!(connected);
    let mut reported = false;

    loop {
        tokio::select! {
            result = &mut connected, if !reported => {
                reported = true;
                match result {
                    Ok(()) => info!("peer connected"),
                    Err(err) => warn!(error = %err, "peer connection not established"),
                }
            }
            _ = negotiator.closed() => {
                info!("connection ended");
                break;
            }
            _ = cancel.cancelled() => {
                info!("hanging up");
                break;
            }
            _ = &mut expiry => {
                info!(held_secs = limit.map(|l| l.as_secs()), "hold elapsed; hanging up");
                break;
            }
        }
    }
    negotiator.close().await;
}

async fn close_on_error<T>(negotiator: &Negotiator, result: Result<T, PeerError>) -> Result<T, PeerError> {
    if result.is_err() {
        negotiator.close().await;
    }
    result
}

/// Offerer against a `POST /offer` answer endpoint.
pub async fn run_call(
    server: &str,
    config: &PeerConfig,
    cancel: &CancellationToken,
) -> Result<(), PeerError> {
    let peer = PeerConnection::build(Role::Offerer, config).await?;
    let negotiator = peer.negotiator();
    let http = reqwest::Client::new();

    let exchange: Result<(), PeerError> = async {
        negotiator.produce_offer().await?;
        if negotiator.wait_for_gathering(config.ice_timeout).await == GatherOutcome::Interrupted {
            return Err(negotiator.terminal_error().into());
        }
        let offer = negotiator
            .local_description()
            .await
            .ok_or(NegotiationError::NoLocalOffer)?;
        info!(%server, "sending offer");
        let answer = tokio::select! {
            _ = cancel.cancelled() => return Err(PeerError::Cancelled),
            answer = post_offer(&http, server, &offer.body) => answer?,
        };
        negotiator.accept_answer(&answer).await?;
        info!("answer applied");
        Ok(())
    }
    .await;
    close_on_error(negotiator, exchange).await?;
    hold(negotiator, config.hold, cancel).await;
    Ok(())
}

/// Creates a relay session, prints its id and answers the joiner.
pub async fn run_host(
    relay_url: &str,
    relay: RelayConfig,
    config: &PeerConfig,
    cancel: &CancellationToken,
) -> Result<(), PeerError> {
    let client = RelayClient::new(relay_url, relay)?;
    let session = RelaySession::create(client, PeerRole::Peer1).await?;
    println!("session id: {}", session.id());
    println!("join with: earshot join {}", session.id());

    let peer = PeerConnection::build(Role::Answerer, config).await?;
    let negotiator = peer.negotiator();
    let answered = answer_over_relay(negotiator, &session, config.ice_timeout, cancel)
        .await
        .map_err(PeerError::from);
    close_on_error(negotiator, answered).await?;
    hold(negotiator, config.hold, cancel).await;
    Ok(())
}

/// Joins `session_id` as the offerer.
pub async fn run_join(
    session_id: &str,
    relay_url: &str,
    relay: RelayConfig,
    config: &PeerConfig,
    cancel: &CancellationToken,
) -> Result<(), PeerError> {
    let client = RelayClient::new(relay_url, relay)?;
    let session = RelaySession::new(client, SessionId::new(session_id), PeerRole::Peer2);

    let peer = PeerConnection::build(Role::Offerer, config).await?;
    let negotiator = peer.negotiator();
    let offered = offer_over_relay(negotiator, &session, config.ice_timeout, cancel)
        .await
        .map_err(PeerError::from);
    close_on_error(negotiator, offered).await?;
    hold(negotiator, config.hold, cancel).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_negotiator::{GatheringScript, ScriptedEngine};

    #[test]
    fn silent_peers_open_no_source() {
        let config = PeerConfig {
            source: SourceKind::None,
            ..PeerConfig::default()
        };
        assert!(open_source(&config).unwrap().is_none());
    }

    #[cfg(not(feature = "live-capture"))]
    #[test]
    fn missing_microphone_falls_back_to_no_track() {
        let config = PeerConfig::default();
        assert!(open_source(&config).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tone_source_produces_paced_frames() {
        let config = PeerConfig {
            source: SourceKind::Tone,
            ..PeerConfig::default()
        };
        let mut source = open_source(&config).unwrap().unwrap();
        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.samples, config.sweep.block_size);
        assert_eq!(frame.pts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_closes_after_the_limit() {
        let engine = ScriptedEngine::new(GatheringScript::Immediate);
        let negotiator = Negotiator::new(Role::Answerer, engine.clone());
        hold(&negotiator, Some(Duration::from_secs(5)), &CancellationToken::new()).await;
        assert!(negotiator.is_closed());
        assert_eq!(engine.close_calls(), 1);
    }

    #[tokio::test]
    async fn hold_returns_when_cancelled() {
        let negotiator = Negotiator::new(
            Role::Offerer,
            ScriptedEngine::new(GatheringScript::Immediate),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        hold(&negotiator, None, &cancel).await;
        assert!(negotiator.is_closed());
    }
}
