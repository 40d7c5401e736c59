// transport/client.rs - HTTP-MTP Client
//
//! Outbound HTTP-MTP delivery with bounded exponential backoff.
//!
//! Transient failures (connection errors, timeouts, 5xx responses) are
//! retried up to a configured attempt ceiling; a 4xx response is a peer
//! rejection and fails immediately. When retries run out the last
//! underlying error is surfaced inside
//! [`TransportError::RetriesExhausted`].

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::codec::dumps;
use crate::message::{AclMessage, AgentIdentifier, Envelope};

use super::multipart::build_multipart;
use super::TransportError;

/// Outbound delivery seam; the conversation layer sends through this
/// trait so tests can substitute a fake transport.
#[async_trait]
pub trait AclSender: Send + Sync {
    /// Deliver `msg` to agent `to` at `url`, enveloped as coming
    /// from `sender`
    async fn send_acl(
        &self,
        to: &AgentIdentifier,
        sender: &AgentIdentifier,
        msg: &AclMessage,
        url: &str,
    ) -> Result<(), TransportError>;
}

/// Retry and timeout policy for the client
#[derive(Debug, Clone)]
pub struct MtpClientConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    /// Randomize each delay by +/-10% to avoid synchronized retries
    pub jitter: bool,
    pub request_timeout: Duration,
}

impl Default for MtpClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            jitter: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery counters, readable at any time
#[derive(Debug, Default)]
pub struct ClientStats {
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub retries: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// HTTP-MTP client
pub struct HttpMtpClient {
    client: reqwest::Client,
    config: MtpClientConfig,
    stats: ClientStats,
}

impl HttpMtpClient {
    pub fn new() -> Self {
        Self::with_config(MtpClientConfig::default())
    }

    pub fn with_config(config: MtpClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            stats: ClientStats::default(),
        }
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    async fn post_once(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(200);
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn backoff_delay(&self, retry: u32) -> Duration {
        let base = self.config.initial_backoff.as_secs_f64()
            * self.config.backoff_multiplier.powi(retry as i32);
        let capped = base.min(self.config.max_backoff.as_secs_f64());
        let scaled = if self.config.jitter {
            capped * rand::rng().random_range(0.9..1.1)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }
}

impl Default for HttpMtpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AclSender for HttpMtpClient {
    async fn send_acl(
        &self,
        to: &AgentIdentifier,
        sender: &AgentIdentifier,
        msg: &AclMessage,
        url: &str,
    ) -> Result<(), TransportError> {
        let acl_text = dumps(msg);
        let envelope = Envelope::new(sender.clone(), vec![to.clone()])
            .with_payload_length(acl_text.len() as u64);
        let (body, content_type) = build_multipart(&envelope, &acl_text);
        let body_len = body.len() as u64;

        let mut attempt = 1u32;
        loop {
            match self.post_once(url, body.clone(), &content_type).await {
                Ok(()) => {
                    self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_sent.fetch_add(body_len, Ordering::Relaxed);
                    debug!(url, performative = %msg.performative, "message delivered");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery failed, retrying"
                    );
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(TransportError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn fast_config() -> MtpClientConfig {
        MtpClientConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(5),
            jitter: false,
            request_timeout: Duration::from_secs(2),
        }
    }

    /// Serve /acc, failing with 500 for the first `failures` hits
    async fn spawn_flaky(failures: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/acc",
            post(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < failures {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    fn sample() -> (AgentIdentifier, AgentIdentifier, AclMessage) {
        let to = AgentIdentifier::new("receiver@there").with_address("http://there/acc");
        let from = AgentIdentifier::new("sender@here").with_address("http://here/acc");
        let msg = AclMessage::new(crate::message::Performative::Inform).with_content("ping");
        (to, from, msg)
    }

    #[tokio::test]
    async fn test_two_failures_then_success_is_three_attempts() {
        let (addr, hits) = spawn_flaky(2).await;
        let client = HttpMtpClient::with_config(fast_config());
        let (to, from, msg) = sample();

        client
            .send_acl(&to, &from, &msg, &format!("http://{addr}/acc"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(client.stats().messages_sent.load(Ordering::Relaxed), 1);
        assert_eq!(client.stats().retries.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_exhausts_attempts() {
        let (addr, hits) = spawn_flaky(usize::MAX).await;
        let client = HttpMtpClient::with_config(fast_config());
        let (to, from, msg) = sample();

        let err = client
            .send_acl(&to, &from, &msg, &format!("http://{addr}/acc"))
            .await
            .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        match err {
            TransportError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, TransportError::Rejected { status: 500, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_rejection_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/acc",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::NOT_FOUND }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = HttpMtpClient::with_config(fast_config());
        let (to, from, msg) = sample();
        let err = client
            .send_acl(&to, &from, &msg, &format!("http://{addr}/acc"))
            .await
            .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let client = HttpMtpClient::with_config(MtpClientConfig {
            jitter: false,
            ..fast_config()
        });
        assert_eq!(client.backoff_delay(0), Duration::from_millis(1));
        assert_eq!(client.backoff_delay(1), Duration::from_millis(2));
        assert_eq!(client.backoff_delay(10), Duration::from_millis(5));
    }
}
