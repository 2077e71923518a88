use std::time::Duration;

use rtc_negotiator::{GatherOutcome, NegotiationError, Negotiator, SessionDescription};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{ExchangeError, PeerRole, RelaySession};

fn expect_role(session: &RelaySession, needed: PeerRole) -> Result<(), ExchangeError> {
    if session.role() == needed {
        Ok(())
    } else {
        Err(ExchangeError::RoleMismatch {
            bound: session.role(),
            needed,
        })
    }
}

/// Host side: waits for the joiner's offer, answers it and publishes the
/// answer. Returns the published answer.
pub async fn answer_over_relay(
    negotiator: &Negotiator,
    session: &RelaySession,
    ice_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<SessionDescription, ExchangeError> {
    expect_role(session, PeerRole::Peer1)?;
    info!(target = "relay_client", session_id = %session.id(), "waiting for offer");
    let offer = session.await_counterpart(cancel).await?;

    negotiator.accept_offer(&offer).await?;
    let answer = negotiator.produce_answer(ice_timeout).await?;
    session.publish_once_retrying(&answer.body, cancel).await?;
    info!(target = "relay_client", session_id = %session.id(), "answer published");
    Ok(answer)
}

/// Joiner side: publishes an offer once gathering settles, then applies the
/// host's answer. Returns the published offer.
pub async fn offer_over_relay(
    negotiator: &Negotiator,
    session: &RelaySession,
    ice_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<SessionDescription, ExchangeError> {
    expect_role(session, PeerRole::Peer2)?;
    negotiator.produce_offer().await?;
    if negotiator.wait_for_gathering(ice_timeout).await == GatherOutcome::Interrupted {
        return Err(negotiator.terminal_error().into());
    }
    let offer = negotiator
        .local_description()
        .await
        .ok_or(NegotiationError::NoLocalOffer)?;

    session.publish_once_retrying(&offer.body, cancel).await?;
    info!(target = "relay_client", session_id = %session.id(), "offer published; waiting for answer");
    let answer = session.await_counterpart(cancel).await?;
    negotiator.accept_answer(&answer).await?;
    Ok(offer)
}
