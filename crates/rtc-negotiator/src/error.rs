use thiserror::Error;

use crate::negotiator::Role;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("operation requires the {expected:?} role but this side is the {actual:?}")]
    WrongRole { expected: Role, actual: Role },
    #[error("remote description already applied")]
    RemoteAlreadySet,
    #[error("local description already set")]
    LocalAlreadySet,
    #[error("no remote offer has been accepted")]
    NoRemoteOffer,
    #[error("no local offer has been produced")]
    NoLocalOffer,
    #[error("connection closed")]
    Closed,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("connection not established within {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("transport engine error: {0}")]
    Engine(String),
}

pub(crate) fn to_engine_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Engine(err.to_string())
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Audio(#[from] audio_bridge::AudioError),
    #[error("wav writer error: {0}")]
    Wav(#[from] hound::Error),
    #[error("track error: {0}")]
    Track(String),
}
