//! Peer-to-peer audio calls: an HTTP answer endpoint, a direct offer client
//! and relay-based host/join flows, all built on `rtc-negotiator`.

pub mod config;
pub mod peer;
pub mod server;
pub mod telemetry;

pub use config::{Cli, Command, PeerConfig, ServeConfig, SourceKind};
pub use peer::{PeerConnection, PeerError};
pub use server::{AnswerService, OfferRequest, PeerFactory, SessionFactory, SessionRegistry};
