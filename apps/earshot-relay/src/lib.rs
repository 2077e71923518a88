//! Development rendezvous relay: one SDP blob and one heartbeat per role per
//! session, held in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSlots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer1_sdp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer1_beat: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer2_sdp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer2_beat: Option<u64>,
    pub created_ms: u64,
}

/// Fields a PUT may carry. Absent fields leave the stored value untouched.
#[derive(Debug, Default, Deserialize)]
pub struct SlotUpdate {
    pub peer1_sdp: Option<String>,
    pub peer1_beat: Option<u64>,
    pub peer2_sdp: Option<String>,
    pub peer2_beat: Option<u64>,
}

impl SessionSlots {
    /// First role whose stored description `update` would replace with a
    /// different one.
    fn conflicting_role(&self, update: &SlotUpdate) -> Option<&'static str> {
        let replaces = |stored: &Option<String>, incoming: &Option<String>| {
            matches!((stored, incoming), (Some(stored), Some(incoming)) if stored != incoming)
        };
        if replaces(&self.peer1_sdp, &update.peer1_sdp) {
            Some("peer1")
        } else if replaces(&self.peer2_sdp, &update.peer2_sdp) {
            Some("peer2")
        } else {
            None
        }
    }

    fn merge(&mut self, update: SlotUpdate) {
        if update.peer1_sdp.is_some() {
            self.peer1_sdp = update.peer1_sdp;
        }
        if update.peer1_beat.is_some() {
            self.peer1_beat = update.peer1_beat;
        }
        if update.peer2_sdp.is_some() {
            self.peer2_sdp = update.peer2_sdp;
        }
        if update.peer2_beat.is_some() {
            self.peer2_beat = update.peer2_beat;
        }
    }
}

#[derive(Debug)]
pub enum UpdateError {
    UnknownSession,
    /// Sealed relays keep the first description each role publishes.
    DescriptionSealed(&'static str),
}

#[derive(Clone, Default)]
pub struct RelayState {
    sessions: Arc<RwLock<HashMap<String, SessionSlots>>>,
    sealed: bool,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.insert(&id, SessionSlots::default());
        id
    }

    /// Refuses to replace a role's description with a different one once set.
    /// Heartbeats and identical republishes are still accepted.
    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Registers a session under a caller-chosen id.
    pub fn with_session(self, id: &str) -> Self {
        self.insert(id, SessionSlots::default());
        self
    }

    pub fn insert(&self, id: &str, mut slots: SessionSlots) {
        if slots.created_ms == 0 {
            slots.created_ms = now_ms();
        }
        self.sessions.write().insert(id.to_string(), slots);
    }

    pub fn get(&self, id: &str) -> Option<SessionSlots> {
        self.sessions.read().get(id).cloned()
    }

    pub fn update(&self, id: &str, update: SlotUpdate) -> Result<SessionSlots, UpdateError> {
        let mut sessions = self.sessions.write();
        let slots = sessions.get_mut(id).ok_or(UpdateError::UnknownSession)?;
        if self.sealed {
            if let Some(role) = slots.conflicting_role(&update) {
                return Err(UpdateError::DescriptionSealed(role));
            }
        }
        slots.merge(update);
        Ok(slots.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn unknown_session(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown session {id}") })),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn create_session(State(state): State<RelayState>) -> Json<serde_json::Value> {
    let id = state.create_session();
    info!(session_id = %id, "session created");
    Json(json!({ "session_id": id }))
}

async fn get_session(State(state): State<RelayState>, Path(id): Path<String>) -> Response {
    match state.get(&id) {
        Some(slots) => Json(json!({ "session": slots })).into_response(),
        None => unknown_session(&id),
    }
}

async fn put_session(
    State(state): State<RelayState>,
    Path(id): Path<String>,
    Json(update): Json<SlotUpdate>,
) -> Response {
    debug!(
        session_id = %id,
        peer1_sdp = update.peer1_sdp.is_some(),
        peer2_sdp = update.peer2_sdp.is_some(),
        "session update"
    );
    match state.update(&id, update) {
        Ok(slots) => Json(json!({ "session": slots })).into_response(),
        Err(UpdateError::UnknownSession) => unknown_session(&id),
        Err(UpdateError::DescriptionSealed(role)) => {
            warn!(session_id = %id, role, "refused to replace a published description");
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": format!("{role} already published a different description") })),
            )
                .into_response()
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(create_session))
        .route("/api/rtc/:id", get(get_session).put(put_session))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves the relay on an already bound listener until the task is dropped.
pub async fn serve(listener: tokio::net::TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
