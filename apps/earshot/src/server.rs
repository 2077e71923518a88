//! `POST /offer` answer endpoint.
//!
//! Each accepted offer gets its own answerer connection. Connections stay in a
//! registry after the response is sent and leave it once they close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use rtc_negotiator::{NegotiationError, Negotiator, Role, SdpKind, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PeerConfig;
use crate::peer::{PeerConnection, PeerError};

#[derive(Debug, Serialize, Deserialize)]
pub struct OfferRequest {
    pub offer: String,
}

/// Builds a fresh answerer for each accepted offer.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    async fn answerer(&self) -> Result<Negotiator, PeerError>;
}

/// Production factory: webrtc-rs connections with the configured media.
pub struct PeerFactory {
    config: PeerConfig,
}

impl PeerFactory {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for PeerFactory {
    async fn answerer(&self) -> Result<Negotiator, PeerError> {
        let peer = PeerConnection::build(Role::Answerer, &self.config).await?;
        Ok(peer.negotiator().clone())
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, Negotiator>>>,
}

impl SessionRegistry {
    /// Tracks `negotiator` until it closes.
    pub fn register(&self, negotiator: Negotiator) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.lock().insert(id, negotiator.clone());
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            negotiator.closed().await;
            sessions.lock().remove(&id);
            debug!(%id, "answered session released");
        });
        id
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn close_all(&self) {
        let live: Vec<Negotiator> = self.sessions.lock().drain().map(|(_, n)| n).collect();
        for negotiator in live {
            negotiator.close().await;
        }
    }
}

#[derive(Clone)]
pub struct AnswerService {
    factory: Arc<dyn SessionFactory>,
    registry: SessionRegistry,
    ice_timeout: Duration,
    hold: Option<Duration>,
}

impl AnswerService {
    pub fn new(factory: Arc<dyn SessionFactory>, ice_timeout: Duration) -> Self {
        Self {
            factory,
            registry: SessionRegistry::default(),
            ice_timeout,
            hold: None,
        }
    }

    /// Closes each answered connection after `hold`.
    pub fn with_hold(mut self, hold: Option<Duration>) -> Self {
        self.hold = hold;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Answers one offer. A connection that fails before the answer is ready
    /// is closed here.
    pub async fn answer(&self, offer: &str) -> Result<SessionDescription, PeerError> {
        SessionDescription::parse(SdpKind::Offer, offer)?;
        let negotiator = self.factory.answerer().await?;

        let answered: Result<SessionDescription, NegotiationError> = async {
            negotiator.accept_offer(offer).await?;
            negotiator.produce_answer(self.ice_timeout).await
        }
        .await;

        match answered {
            Ok(answer) => {
                let id = self.registry.register(negotiator.clone());
                if let Some(hold) = self.hold {
                    tokio::spawn(async move {
                        tokio::time::sleep(hold).await;
                        negotiator.close().await;
                    });
                }
                info!(%id, sdp_len = answer.body.len(), "offer answered");
                Ok(answer)
            }
            Err(err) => {
                negotiator.close().await;
                Err(err.into())
            }
        }
    }
}

fn answer_error(err: PeerError) -> Response {
    match err {
        PeerError::Negotiation(NegotiationError::InvalidDescription(_)) => {
            warn!(error = %err, "rejected offer");
            (StatusCode::BAD_REQUEST, format!("Invalid offer: {err}")).into_response()
        }
        other => {
            error!(error = %other, "failed to answer offer");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to answer offer: {other}"),
            )
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn offer(State(service): State<AnswerService>, body: Bytes) -> Response {
    let request: OfferRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "offer body is not valid json");
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON data: {err}")).into_response();
        }
    };
    match service.answer(&request.offer).await {
        Ok(answer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            answer.body,
        )
            .into_response(),
        Err(err) => answer_error(err),
    }
}

pub fn router(service: AnswerService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/offer", post(offer))
        .with_state(service)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves until `shutdown` fires, then closes every live connection.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: AnswerService,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let registry = service.registry().clone();
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    registry.close_all().await;
    Ok(())
}
