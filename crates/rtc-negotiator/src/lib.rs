//! Offer/answer orchestration for a single peer connection.
//!
//! [`Negotiator`] drives one connection through description exchange and ICE
//! gathering on top of a [`SessionEngine`]. The engine is the only thing that
//! talks to the network; the negotiator only sequences calls and waits on the
//! state the engine reports through [`EngineEvents`].

pub mod chat;
pub mod description;
pub mod engine;
pub mod error;
pub mod media;
pub mod negotiator;
pub mod rtc_engine;
pub mod scripted;
pub mod state;

pub use description::{SdpKind, SessionDescription};
pub use engine::{EngineEvents, SessionEngine};
pub use error::{MediaError, NegotiationError};
pub use negotiator::{Negotiator, Role};
pub use rtc_engine::{WebRtcConfig, WebRtcEngine};
pub use scripted::{GatheringScript, ScriptedEngine};
pub use state::{ConnectionState, GatherOutcome, GatheringState, Phase};
