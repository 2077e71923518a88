//! In-memory engine with scripted gathering and connection behaviour.
//!
//! Used by tests across the workspace to exercise negotiation without
//! touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::{
    ConnectionState, EngineEvents, GatheringState, NegotiationError, SdpKind, SessionDescription,
    SessionEngine,
};

const HOST_CANDIDATE: &str = "a=candidate:1 1 UDP 2130706431 127.0.0.1 9 typ host\r\n";

#[derive(Debug, Clone, Copy)]
pub enum GatheringScript {
    /// Gathering completes as soon as the local description is set.
    Immediate,
    After(Duration),
    Never,
}

#[derive(Default)]
struct ScriptState {
    events: Option<EngineEvents>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
}

pub struct ScriptedEngine {
    gathering: GatheringScript,
    state: Mutex<ScriptState>,
    close_calls: AtomicUsize,
    session_version: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(gathering: GatheringScript) -> Arc<Self> {
        Arc::new(Self {
            gathering,
            state: Mutex::new(ScriptState::default()),
            close_calls: AtomicUsize::new(0),
            session_version: AtomicUsize::new(1),
        })
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Reports `Connecting` then `Connected`.
    pub fn connect(&self) {
        if let Some(events) = self.events() {
            events.connection_changed(ConnectionState::Connecting);
            events.connection_changed(ConnectionState::Connected);
        }
    }

    pub fn fail_connection(&self) {
        if let Some(events) = self.events() {
            events.connection_changed(ConnectionState::Failed);
        }
    }

    fn events(&self) -> Option<EngineEvents> {
        self.state.lock().events.clone()
    }

    fn description(&self, kind: SdpKind) -> SessionDescription {
        let version = self.session_version.fetch_add(1, Ordering::SeqCst);
        SessionDescription {
            kind,
            body: format!(
                "v=0\r\no=- {version} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\na={kind}\r\n"
            ),
        }
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    fn attach(&self, events: EngineEvents) {
        self.state.lock().events = Some(events);
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(self.description(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.state.lock().remote.is_none() {
            return Err(NegotiationError::Engine(
                "answer requested without remote offer".into(),
            ));
        }
        Ok(self.description(SdpKind::Answer))
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let events = {
            let mut state = self.state.lock();
            state.local = Some(desc.clone());
            state.events.clone()
        };
        let Some(events) = events else {
            return Ok(());
        };
        events.gathering_changed(GatheringState::Gathering);
        match self.gathering {
            GatheringScript::Immediate => events.gathering_changed(GatheringState::Complete),
            GatheringScript::After(delay) => {
                tokio::spawn(async move {
                    sleep(delay).await;
                    events.gathering_changed(GatheringState::Complete);
                });
            }
            GatheringScript::Never => {}
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        if !desc.body.trim_start().starts_with("v=") {
            return Err(NegotiationError::InvalidDescription(
                "remote description is not SDP".into(),
            ));
        }
        self.state.lock().remote = Some(desc.clone());
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        let mut local = state.local.clone()?;
        let complete = state
            .events
            .as_ref()
            .is_some_and(|events| events.gathering() == GatheringState::Complete);
        if complete {
            local.body.push_str(HOST_CANDIDATE);
        }
        Some(local)
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
