use std::fmt;

use serde::Deserialize;

/// Opaque, relay-assigned session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role slot on the relay. `Peer1` answers (host), `Peer2` offers (joiner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Peer1,
    Peer2,
}

impl PeerRole {
    pub fn counterpart(self) -> Self {
        match self {
            PeerRole::Peer1 => PeerRole::Peer2,
            PeerRole::Peer2 => PeerRole::Peer1,
        }
    }

    pub fn sdp_field(self) -> &'static str {
        match self {
            PeerRole::Peer1 => "peer1_sdp",
            PeerRole::Peer2 => "peer2_sdp",
        }
    }

    pub fn beat_field(self) -> &'static str {
        match self {
            PeerRole::Peer1 => "peer1_beat",
            PeerRole::Peer2 => "peer2_beat",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Peer1 => f.write_str("peer1"),
            PeerRole::Peer2 => f.write_str("peer2"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedSession {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionEnvelope {
    pub session: SessionRecord,
}

/// Snapshot of a relay session. Fields the relay omits, nulls or leaves
/// empty all read as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    peer1_sdp: Option<String>,
    #[serde(default)]
    peer2_sdp: Option<String>,
    #[serde(default)]
    peer1_beat: Option<serde_json::Value>,
    #[serde(default)]
    peer2_beat: Option<serde_json::Value>,
}

impl SessionRecord {
    pub fn sdp(&self, role: PeerRole) -> Option<&str> {
        let field = match role {
            PeerRole::Peer1 => &self.peer1_sdp,
            PeerRole::Peer2 => &self.peer2_sdp,
        };
        field.as_deref().filter(|sdp| !sdp.trim().is_empty())
    }

    /// Last heartbeat in milliseconds since the epoch.
    pub fn beat(&self, role: PeerRole) -> Option<u64> {
        let field = match role {
            PeerRole::Peer1 => &self.peer1_beat,
            PeerRole::Peer2 => &self.peer2_beat,
        };
        field
            .as_ref()
            .and_then(|value| value.as_u64().or_else(|| value.as_f64().map(|f| f as u64)))
    }
}
