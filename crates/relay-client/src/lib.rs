//! Short-poll HTTP rendezvous for exchanging one session description per
//! peer role.
//!
//! The relay holds `peer1_*` and `peer2_*` fields per session and overwrites
//! them on every write. [`RelayClient`] speaks the wire protocol;
//! [`RelaySession`] binds a client to one session and role and refuses to
//! publish twice.

pub mod client;
pub mod error;
pub mod exchange;
pub mod protocol;
pub mod session;

pub use client::{DEFAULT_RELAY_URL, RelayClient, RelayConfig};
pub use error::{ExchangeError, RelayError};
pub use exchange::{answer_over_relay, offer_over_relay};
pub use protocol::{PeerRole, SessionId, SessionRecord};
pub use session::RelaySession;
pub use tokio_util::sync::CancellationToken;
