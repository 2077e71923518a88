use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{ConnectionState, GatheringState, NegotiationError, SessionDescription};

/// Description-level primitives of a transport engine.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Called once by the negotiator before any other method. The engine
    /// forwards its gathering and connection notifications to `events`.
    fn attach(&self, events: EngineEvents);

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: &SessionDescription)
    -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Current local description, including any candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Handle the engine uses to report state changes. Calls only update shared
/// state and wake waiters.
#[derive(Clone)]
pub struct EngineEvents {
    gathering: Arc<watch::Sender<GatheringState>>,
    connection: Arc<watch::Sender<ConnectionState>>,
}

impl EngineEvents {
    pub(crate) fn new() -> (
        Self,
        watch::Receiver<GatheringState>,
        watch::Receiver<ConnectionState>,
    ) {
        let (gathering, gathering_rx) = watch::channel(GatheringState::New);
        let (connection, connection_rx) = watch::channel(ConnectionState::New);
        (
            Self {
                gathering: Arc::new(gathering),
                connection: Arc::new(connection),
            },
            gathering_rx,
            connection_rx,
        )
    }

    /// Gathering only moves forward; stale or repeated reports are dropped.
    pub fn gathering_changed(&self, state: GatheringState) {
        self.gathering.send_if_modified(|current| {
            if state > *current {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    /// `Closed` is final and `Failed` may only be followed by `Closed`.
    pub fn connection_changed(&self, state: ConnectionState) {
        self.connection.send_if_modified(|current| {
            let allowed = match *current {
                ConnectionState::Closed => false,
                ConnectionState::Failed => state == ConnectionState::Closed,
                other => other != state,
            };
            if allowed {
                *current = state;
            }
            allowed
        });
    }

    pub fn gathering(&self) -> GatheringState {
        *self.gathering.borrow()
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }
}
