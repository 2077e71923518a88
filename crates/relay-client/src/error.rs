use rtc_negotiator::NegotiationError;
use thiserror::Error;

use crate::PeerRole;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),
    #[error("relay returned status {0}")]
    Status(u16),
    #[error("malformed relay response: {0}")]
    Malformed(String),
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("{0} already published its description for this session")]
    AlreadyPublished(PeerRole),
    #[error("relay polling cancelled")]
    Cancelled,
    #[error("counterpart did not publish after {attempts} polls")]
    PollExhausted { attempts: u32 },
}

impl RelayError {
    /// Whether a retry could plausibly succeed. Client errors other than
    /// timeouts and rate limits are final.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Unavailable(_) | RelayError::Malformed(_) => true,
            RelayError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }
}

pub(crate) fn http_error(err: reqwest::Error) -> RelayError {
    RelayError::Unavailable(err.to_string())
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("session is bound to {bound} but this exchange needs {needed}")]
    RoleMismatch { bound: PeerRole, needed: PeerRole },
}
