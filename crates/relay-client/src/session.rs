use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::now_ms;
use crate::{PeerRole, RelayClient, RelayError, SessionId};

/// One role's view of one relay session.
///
/// The relay keeps only the latest write per role, so a second publish could
/// replace the first before the counterpart reads it. `publish_once` refuses
/// that.
#[derive(Debug)]
pub struct RelaySession {
    client: RelayClient,
    id: SessionId,
    role: PeerRole,
    published: AtomicBool,
}

impl RelaySession {
    pub fn new(client: RelayClient, id: SessionId, role: PeerRole) -> Self {
        Self {
            client,
            id,
            role,
            published: AtomicBool::new(false),
        }
    }

    /// Creates a new relay session and binds it to `role`.
    pub async fn create(client: RelayClient, role: PeerRole) -> Result<Self, RelayError> {
        let id = client.create_session().await?;
        Ok(Self::new(client, id, role))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    pub fn has_published(&self) -> bool {
        self.published.load(Ordering::SeqCst)
    }

    /// Publishes this role's description. A failed or abandoned request
    /// releases the guard so the caller may retry.
    pub async fn publish_once(&self, sdp: &str) -> Result<(), RelayError> {
        if self.published.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyPublished(self.role));
        }
        let mut claim = PublishClaim {
            published: &self.published,
            held: false,
        };
        self.client.publish(&self.id, self.role, sdp, now_ms()).await?;
        claim.held = true;
        Ok(())
    }

    /// Like [`publish_once`](Self::publish_once) but keeps retrying transient
    /// failures after the configured backoff.
    pub async fn publish_once_retrying(
        &self,
        sdp: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                attempt = self.publish_once(sdp) => attempt,
            };
            match attempt {
                Err(err) if err.is_transient() => {
                    let backoff = self.client.config().error_backoff;
                    warn!(target = "relay_client", session_id = %self.id, role = %self.role, error = %err, "publish failed; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Waits for the other role's description.
    pub async fn await_counterpart(&self, cancel: &CancellationToken) -> Result<String, RelayError> {
        self.client
            .poll_for_counterpart(&self.id, self.role.counterpart(), cancel)
            .await
    }
}

/// Releases the publish guard unless the request completed.
struct PublishClaim<'a> {
    published: &'a AtomicBool,
    held: bool,
}

impl Drop for PublishClaim<'_> {
    fn drop(&mut self) {
        if !self.held {
            self.published.store(false, Ordering::SeqCst);
        }
    }
}
