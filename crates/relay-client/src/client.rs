use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::http_error;
use crate::protocol::{CreatedSession, SessionEnvelope};
use crate::{PeerRole, RelayError, SessionId, SessionRecord};

pub const DEFAULT_RELAY_URL: &str = "https://rtc-signalling-server-kkhp.vercel.app";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    /// Pause after a failed request before trying again.
    pub error_backoff: Duration,
    /// `None` polls until the counterpart appears or the caller cancels.
    pub max_polls: Option<u32>,
    pub poll_deadline: Option<Duration>,
    /// Refresh the local role's heartbeat on every empty poll.
    pub heartbeat_while_polling: bool,
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10_000),
            error_backoff: Duration::from_millis(5_000),
            max_polls: None,
            poll_deadline: None,
            heartbeat_while_polling: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    base: Url,
    config: RelayConfig,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl RelayClient {
    pub fn new(base: &str, config: RelayConfig) -> Result<Self, RelayError> {
        let base = Url::parse(base).map_err(|err| RelayError::InvalidUrl(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RelayError::InvalidUrl(format!("{base} cannot be a base url")));
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(http_error)?;
        Ok(Self { http, base, config })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RelayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Asks the relay for a fresh session id.
    pub async fn create_session(&self) -> Result<SessionId, RelayError> {
        let url = self.endpoint(&["api", "session"])?;
        let response = self.http.get(url).send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        let created: CreatedSession = response
            .json()
            .await
            .map_err(|err| RelayError::Malformed(err.to_string()))?;
        if created.session_id.trim().is_empty() {
            return Err(RelayError::Malformed("empty session id".into()));
        }
        info!(target = "relay_client", session_id = %created.session_id, "relay session created");
        Ok(SessionId::new(created.session_id))
    }

    /// Overwrites `role`'s description and heartbeat. Never touches the other
    /// role's fields.
    pub async fn publish(
        &self,
        session: &SessionId,
        role: PeerRole,
        sdp: &str,
        heartbeat_ms: u64,
    ) -> Result<(), RelayError> {
        let mut body = Map::new();
        body.insert(role.sdp_field().into(), Value::String(sdp.to_string()));
        body.insert(role.beat_field().into(), Value::from(heartbeat_ms));
        self.put_fields(session, body).await?;
        debug!(target = "relay_client", session_id = %session, %role, sdp_len = sdp.len(), "description published");
        Ok(())
    }

    /// Refreshes only `role`'s heartbeat.
    pub async fn publish_heartbeat(
        &self,
        session: &SessionId,
        role: PeerRole,
    ) -> Result<(), RelayError> {
        let mut body = Map::new();
        body.insert(role.beat_field().into(), Value::from(now_ms()));
        self.put_fields(session, body).await
    }

    async fn put_fields(&self, session: &SessionId, body: Map<String, Value>) -> Result<(), RelayError> {
        let url = self.endpoint(&["api", "rtc", session.as_str()])?;
        let response = self
            .http
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RelayError::Status(response.status().as_u16()))
        }
    }

    pub async fn fetch_session(&self, session: &SessionId) -> Result<SessionRecord, RelayError> {
        let url = self.endpoint(&["api", "rtc", session.as_str()])?;
        let response = self.http.get(url).send().await.map_err(http_error)?;
        match response.status() {
            StatusCode::OK => {
                let envelope: SessionEnvelope = response
                    .json()
                    .await
                    .map_err(|err| RelayError::Malformed(err.to_string()))?;
                Ok(envelope.session)
            }
            status => Err(RelayError::Status(status.as_u16())),
        }
    }

    /// Polls until `expected` has published a description and returns it.
    ///
    /// Request failures are logged and retried after `error_backoff`. The
    /// loop only ends early on cancellation or when a configured poll bound
    /// runs out.
    pub async fn poll_for_counterpart(
        &self,
        session: &SessionId,
        expected: PeerRole,
        cancel: &CancellationToken,
    ) -> Result<String, RelayError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            if self.bounds_spent(attempts, started) {
                warn!(target = "relay_client", session_id = %session, role = %expected, attempts, "giving up on counterpart");
                return Err(RelayError::PollExhausted { attempts });
            }
            attempts += 1;

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                fetched = self.fetch_session(session) => fetched,
            };
            let pause = match fetched {
                Ok(record) => {
                    if let Some(sdp) = record.sdp(expected) {
                        info!(target = "relay_client", session_id = %session, role = %expected, attempts, "counterpart description received");
                        return Ok(sdp.to_string());
                    }
                    trace!(target = "relay_client", session_id = %session, role = %expected, attempts, "counterpart not published yet");
                    if self.config.heartbeat_while_polling {
                        let beat = tokio::select! {
                            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                            beat = self.publish_heartbeat(session, expected.counterpart()) => beat,
                        };
                        if let Err(err) = beat {
                            debug!(target = "relay_client", session_id = %session, error = %err, "heartbeat failed");
                        }
                    }
                    self.config.poll_interval
                }
                Err(err) => {
                    warn!(
                        target = "relay_client",
                        session_id = %session,
                        attempts,
                        error = %err,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        "relay poll failed; retrying"
                    );
                    self.config.error_backoff
                }
            };

            if self.bounds_spent(attempts, started) {
                warn!(target = "relay_client", session_id = %session, role = %expected, attempts, "giving up on counterpart");
                return Err(RelayError::PollExhausted { attempts });
            }
            let pause = match self.config.poll_deadline {
                Some(deadline) => pause.min(deadline.saturating_sub(started.elapsed())),
                None => pause,
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                _ = sleep(pause) => {}
            }
        }
    }

    fn bounds_spent(&self, attempts: u32, started: Instant) -> bool {
        self.config.max_polls.is_some_and(|max| attempts >= max)
            || self
                .config
                .poll_deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path_and_escape_ids() {
        let client = RelayClient::new("http://relay.test/prefix/", RelayConfig::default()).unwrap();
        let url = client.endpoint(&["api", "rtc", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://relay.test/prefix/api/rtc/a%20b%2Fc");
    }

    #[test]
    fn non_base_urls_are_rejected() {
        assert!(matches!(
            RelayClient::new("mailto:relay@example.com", RelayConfig::default()),
            Err(RelayError::InvalidUrl(_))
        ));
    }
}
