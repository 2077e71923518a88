/// ICE gathering progress. Ordered so that later states compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    Complete,
    TimedOut,
    /// The connection failed or closed before gathering finished.
    Interrupted,
}

/// Externally visible lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    LocalSet,
    Gathering,
    GatherComplete,
    GatherTimeout,
    RemoteSet,
    Connecting,
    Connected,
    Failed,
    Closed,
}
