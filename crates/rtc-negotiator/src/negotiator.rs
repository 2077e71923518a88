use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    ConnectionState, EngineEvents, GatherOutcome, GatheringState, NegotiationError, Phase,
    SdpKind, SessionDescription, SessionEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Progress {
    phase: Option<Phase>,
    local_claimed: bool,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
}

#[derive(Default)]
struct Owned {
    tasks: Vec<JoinHandle<()>>,
    cleanups: Vec<Cleanup>,
}

struct Inner {
    role: Role,
    engine: Arc<dyn SessionEngine>,
    events: EngineEvents,
    gathering_rx: watch::Receiver<GatheringState>,
    connection_rx: watch::Receiver<ConnectionState>,
    progress: Mutex<Progress>,
    owned: Mutex<Owned>,
    closed: AtomicBool,
}

/// Drives one peer connection through offer/answer.
///
/// Cheap to clone; all clones share the same connection. Must be created
/// inside a tokio runtime because a watchdog task tears the connection down
/// when the engine reports `Failed`.
#[derive(Clone)]
pub struct Negotiator {
    inner: Arc<Inner>,
}

impl Negotiator {
    pub fn new(role: Role, engine: Arc<dyn SessionEngine>) -> Self {
        let (events, gathering_rx, connection_rx) = EngineEvents::new();
        engine.attach(events.clone());
        let inner = Arc::new(Inner {
            role,
            engine,
            events,
            gathering_rx,
            connection_rx,
            progress: Mutex::new(Progress::default()),
            owned: Mutex::new(Owned::default()),
            closed: AtomicBool::new(false),
        });
        spawn_failure_watchdog(Arc::downgrade(&inner), inner.connection_rx.clone());
        Self { inner }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn phase(&self) -> Phase {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Phase::Closed;
        }
        match *self.inner.connection_rx.borrow() {
            ConnectionState::Connecting => return Phase::Connecting,
            ConnectionState::Connected => return Phase::Connected,
            ConnectionState::Failed => return Phase::Failed,
            ConnectionState::Closed => return Phase::Closed,
            ConnectionState::New | ConnectionState::Disconnected => {}
        }
        self.inner.progress.lock().phase.unwrap_or(Phase::New)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection_rx.borrow()
    }

    pub fn gathering_state(&self) -> GatheringState {
        *self.inner.gathering_rx.borrow()
    }

    /// Answerer: validates and applies the remote offer.
    pub async fn accept_offer(&self, offer_text: &str) -> Result<(), NegotiationError> {
        self.expect_role(Role::Answerer)?;
        let offer = SessionDescription::parse(SdpKind::Offer, offer_text)?;
        self.apply_remote(offer).await
    }

    /// Answerer: creates and sets the answer, then waits for ICE gathering up
    /// to `ice_timeout`. A timeout is not an error; the description returned
    /// then carries whatever candidates were found.
    pub async fn produce_answer(
        &self,
        ice_timeout: Duration,
    ) -> Result<SessionDescription, NegotiationError> {
        self.expect_role(Role::Answerer)?;
        self.ensure_open()?;
        {
            let progress = self.inner.progress.lock();
            if progress.remote.is_none() {
                return Err(NegotiationError::NoRemoteOffer);
            }
        }
        let answer = self.set_local(SdpKind::Answer).await?;
        if self.wait_for_gathering(ice_timeout).await == GatherOutcome::Interrupted {
            return Err(self.terminal_error());
        }

        let local = self
            .inner
            .engine
            .local_description()
            .await
            .unwrap_or(answer);
        self.inner.progress.lock().local = Some(local.clone());
        Ok(local)
    }

    /// Offerer: creates and sets the offer without waiting for gathering.
    pub async fn produce_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.expect_role(Role::Offerer)?;
        self.ensure_open()?;
        self.set_local(SdpKind::Offer).await
    }

    /// Offerer: validates and applies the remote answer.
    pub async fn accept_answer(&self, answer_text: &str) -> Result<(), NegotiationError> {
        self.expect_role(Role::Offerer)?;
        if self.inner.progress.lock().local.is_none() {
            return Err(NegotiationError::NoLocalOffer);
        }
        let answer = SessionDescription::parse(SdpKind::Answer, answer_text)?;
        self.apply_remote(answer).await
    }

    /// Waits until ICE gathering completes or `limit` elapses. Returns early
    /// with [`GatherOutcome::Interrupted`] if the connection fails or closes.
    pub async fn wait_for_gathering(&self, limit: Duration) -> GatherOutcome {
        self.set_phase(Phase::Gathering);
        let mut gathering_rx = self.inner.gathering_rx.clone();
        let mut connection_rx = self.inner.connection_rx.clone();
        let gathered = gathering_rx.wait_for(|state| *state == GatheringState::Complete);
        let ended = connection_rx.wait_for(|state| state.is_terminal());

        let outcome = tokio::select! {
            gathered = timeout(limit, gathered) => match gathered {
                Ok(Ok(_)) => GatherOutcome::Complete,
                Ok(Err(_)) | Err(_) => GatherOutcome::TimedOut,
            },
            _ = ended => GatherOutcome::Interrupted,
        };
        match outcome {
            GatherOutcome::Complete => {
                debug!(target = "rtc_negotiator", role = ?self.inner.role, "ice gathering complete");
                self.set_phase(Phase::GatherComplete);
            }
            GatherOutcome::TimedOut => {
                warn!(
                    target = "rtc_negotiator",
                    role = ?self.inner.role,
                    timeout_ms = limit.as_millis() as u64,
                    "ice gathering incomplete; continuing with candidates gathered so far"
                );
                self.set_phase(Phase::GatherTimeout);
            }
            GatherOutcome::Interrupted => {
                warn!(
                    target = "rtc_negotiator",
                    role = ?self.inner.role,
                    state = ?self.connection_state(),
                    "connection ended during ice gathering"
                );
            }
        }
        outcome
    }

    /// Error for a connection that reached a terminal state mid-negotiation.
    pub fn terminal_error(&self) -> NegotiationError {
        match self.connection_state() {
            ConnectionState::Failed => NegotiationError::ConnectionFailed,
            _ => NegotiationError::Closed,
        }
    }

    /// Waits for the connection to come up, fail or close.
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), NegotiationError> {
        let mut rx = self.inner.connection_rx.clone();
        let state = timeout(
            limit,
            rx.wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Connected | ConnectionState::Failed | ConnectionState::Closed
                )
            }),
        )
        .await
        .map(|result| result.map(|state| *state));

        match state {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(ConnectionState::Failed)) => Err(NegotiationError::ConnectionFailed),
            Ok(_) => Err(NegotiationError::Closed),
            Err(_) => Err(NegotiationError::ConnectTimeout(limit)),
        }
    }

    /// Local description as the engine currently reports it.
    pub async fn local_description(&self) -> Option<SessionDescription> {
        match self.inner.engine.local_description().await {
            Some(desc) => Some(desc),
            None => self.inner.progress.lock().local.clone(),
        }
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.progress.lock().remote.clone()
    }

    /// Ties a task's lifetime to the connection. Aborted on close; aborted
    /// immediately if the connection is already closed.
    pub fn own_task(&self, task: JoinHandle<()>) {
        let mut owned = self.inner.owned.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            task.abort();
        } else {
            owned.tasks.push(task);
        }
    }

    /// Registers a release action run exactly once on close.
    pub fn own_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut owned = self.inner.owned.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(owned);
            cleanup();
        } else {
            owned.cleanups.push(Box::new(cleanup));
        }
    }

    /// Releases everything the connection owns. Idempotent; engine errors are
    /// logged, never returned.
    pub async fn close(&self) {
        let owned = {
            let mut owned = self.inner.owned.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *owned)
        };
        for cleanup in owned.cleanups {
            cleanup();
        }
        for task in owned.tasks {
            task.abort();
        }
        if let Err(err) = self.inner.engine.close().await {
            warn!(target = "rtc_negotiator", error = %err, "engine close failed");
        }
        self.inner.events.connection_changed(ConnectionState::Closed);
        info!(target = "rtc_negotiator", role = ?self.inner.role, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.connection_rx.clone();
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .map(|_| ());
    }

    fn expect_role(&self, expected: Role) -> Result<(), NegotiationError> {
        if self.inner.role == expected {
            Ok(())
        } else {
            Err(NegotiationError::WrongRole {
                expected,
                actual: self.inner.role,
            })
        }
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.progress.lock().phase = Some(phase);
    }

    async fn set_local(&self, kind: SdpKind) -> Result<SessionDescription, NegotiationError> {
        {
            let mut progress = self.inner.progress.lock();
            if progress.local_claimed {
                return Err(NegotiationError::LocalAlreadySet);
            }
            progress.local_claimed = true;
        }

        let result: Result<SessionDescription, NegotiationError> = async {
            let desc = match kind {
                SdpKind::Offer => self.inner.engine.create_offer().await?,
                SdpKind::Answer => self.inner.engine.create_answer().await?,
            };
            self.inner.engine.set_local_description(&desc).await?;
            Ok(desc)
        }
        .await;

        let mut progress = self.inner.progress.lock();
        match result {
            Ok(desc) => {
                progress.local = Some(desc.clone());
                progress.phase = Some(Phase::LocalSet);
                debug!(target = "rtc_negotiator", role = ?self.inner.role, kind = %kind, "local description set");
                Ok(desc)
            }
            Err(err) => {
                progress.local_claimed = false;
                Err(err)
            }
        }
    }

    async fn apply_remote(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        {
            let mut progress = self.inner.progress.lock();
            if progress.remote.is_some() {
                return Err(NegotiationError::RemoteAlreadySet);
            }
            progress.remote = Some(desc.clone());
        }

        if let Err(err) = self.inner.engine.set_remote_description(&desc).await {
            self.inner.progress.lock().remote = None;
            return Err(err);
        }
        self.set_phase(Phase::RemoteSet);
        debug!(target = "rtc_negotiator", role = ?self.inner.role, kind = %desc.kind, "remote description applied");
        Ok(())
    }
}

fn spawn_failure_watchdog(inner: Weak<Inner>, mut rx: watch::Receiver<ConnectionState>) {
    tokio::spawn(async move {
        let terminal = rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        if let Ok(ConnectionState::Failed) = terminal {
            if let Some(inner) = inner.upgrade() {
                warn!(target = "rtc_negotiator", role = ?inner.role, "connection failed; releasing resources");
                Negotiator { inner }.close().await;
            }
        }
    });
}
