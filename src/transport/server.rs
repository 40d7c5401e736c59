// transport/server.rs - Inbound HTTP-MTP Endpoint
//
//! Accepts HTTP-MTP deliveries on the ACC endpoint.
//!
//! A delivery is acknowledged with 200 exactly when its body decodes to a
//! structurally valid `(Envelope, AclMessage)` pair; a body that cannot be
//! decoded is refused with 400 and the reason. What the application then
//! does with an accepted message never changes the acknowledgment:
//! callbacks run on their own task and their errors are only logged.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::multipart::{extract_boundary, extract_envelope_acl};
use super::{TransportError, ACC_ENDPOINT, DEFAULT_ACC_PORT, DEFAULT_MAX_REQUEST_SIZE};
use crate::codec;
use crate::message::{AclMessage, Envelope};

/// Callback invoked for each accepted message
pub type OnMessage =
    Arc<dyn Fn(Envelope, AclMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Bind address and limits for the inbound endpoint
#[derive(Debug, Clone)]
pub struct MtpServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests larger than this are refused before decoding
    pub max_request_size: usize,
}

impl Default for MtpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_ACC_PORT,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl MtpServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }
}

/// Inbound traffic counters
#[derive(Debug, Default)]
pub struct ServerStats {
    pub messages_received: AtomicU64,
    pub decode_failures: AtomicU64,
    pub bytes_received: AtomicU64,
}

enum Delivery {
    Callback(OnMessage),
    Inbox(mpsc::UnboundedSender<(Envelope, AclMessage)>),
}

struct AccState {
    delivery: Delivery,
    stats: Arc<ServerStats>,
}

impl AccState {
    fn deliver(&self, envelope: Envelope, message: AclMessage) {
        match &self.delivery {
            Delivery::Callback(callback) => {
                let callback = Arc::clone(callback);
                tokio::spawn(async move {
                    if let Err(error) = callback(envelope, message).await {
                        warn!(%error, "inbound message handler failed");
                    }
                });
            }
            Delivery::Inbox(tx) => {
                if tx.send((envelope, message)).is_err() {
                    warn!("inbox receiver dropped, inbound message discarded");
                }
            }
        }
    }
}

/// HTTP-MTP server, started with [`MtpServer::start`]
pub struct MtpServer {
    config: MtpServerConfig,
    delivery: Delivery,
    stats: Arc<ServerStats>,
}

impl MtpServer {
    /// Invoke `callback` for every accepted message
    pub fn with_callback<F, Fut>(config: MtpServerConfig, callback: F) -> Self
    where
        F: Fn(Envelope, AclMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: OnMessage = Arc::new(move |envelope, message| {
            callback(envelope, message).boxed()
        });
        Self {
            config,
            delivery: Delivery::Callback(callback),
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// Queue every accepted message on the returned channel
    pub fn with_inbox(
        config: MtpServerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<(Envelope, AclMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Self {
            config,
            delivery: Delivery::Inbox(tx),
            stats: Arc::new(ServerStats::default()),
        };
        (server, rx)
    }

    /// Bind and serve until the handle shuts the server down
    pub async fn start(self) -> Result<MtpServerHandle, TransportError> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;

        let stats = Arc::clone(&self.stats);
        let state = Arc::new(AccState {
            delivery: self.delivery,
            stats: Arc::clone(&self.stats),
        });
        let app = Router::new()
            .route(ACC_ENDPOINT, post(accept_post))
            .layer(DefaultBodyLimit::max(self.config.max_request_size))
            .with_state(state);

        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                error!(%error, "http-mtp server terminated");
            }
        });

        info!(%local_addr, "http-mtp server listening");
        Ok(MtpServerHandle {
            local_addr,
            stats,
            task,
        })
    }
}

/// Running server, kept alive until shut down or dropped
pub struct MtpServerHandle {
    local_addr: SocketAddr,
    stats: Arc<ServerStats>,
    task: JoinHandle<()>,
}

impl MtpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn shutdown(self) {
        self.task.abort();
        info!(local_addr = %self.local_addr, "http-mtp server stopped");
    }
}

async fn accept_post(
    State(acc): State<Arc<AccState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    acc.stats
        .bytes_received
        .fetch_add(body.len() as u64, Ordering::Relaxed);

    match decode_inbound(content_type, &body) {
        Ok((envelope, message)) => {
            acc.stats.messages_received.fetch_add(1, Ordering::Relaxed);
            debug!(
                from = %envelope.from,
                performative = %message.performative,
                bytes = body.len(),
                "inbound message accepted"
            );
            acc.deliver(envelope, message);
            (StatusCode::OK, "ok".to_string())
        }
        Err(err) => {
            acc.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            let preview: String = String::from_utf8_lossy(&body[..body.len().min(200)])
                .replace(['\r', '\n'], " ");
            warn!(error = %err, body_preview = %preview, "refusing undecodable delivery");
            (StatusCode::BAD_REQUEST, format!("undeliverable: {err}"))
        }
    }
}

fn decode_inbound(content_type: &str, body: &[u8]) -> Result<(Envelope, AclMessage), TransportError> {
    let boundary = extract_boundary(content_type).ok_or_else(|| {
        TransportError::Multipart(format!(
            "no multipart boundary in content-type '{content_type}'"
        ))
    })?;
    let (envelope_xml, acl_text) = extract_envelope_acl(body, &boundary)?;
    let envelope = Envelope::from_xml(&envelope_xml)?;
    let message = codec::parse(&acl_text)?;
    Ok((envelope, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentIdentifier, Performative};
    use crate::transport::multipart::build_multipart;

    fn sample_pair() -> (Envelope, AclMessage) {
        let from = AgentIdentifier::new("ping@remote").with_address("http://remote:7777/acc");
        let to = AgentIdentifier::new("pong@local").with_address("http://local:7777/acc");
        let message = AclMessage::new(Performative::Inform)
            .with_sender(from.clone())
            .with_receiver(to.clone())
            .with_content("(weather :sky clear)");
        let envelope = Envelope::new(from, vec![to]);
        (envelope, message)
    }

    async fn start_inbox_server() -> (
        MtpServerHandle,
        mpsc::UnboundedReceiver<(Envelope, AclMessage)>,
        String,
    ) {
        let config = MtpServerConfig::default().with_host("127.0.0.1").with_port(0);
        let (server, inbox) = MtpServer::with_inbox(config);
        let handle = server.start().await.unwrap();
        let url = format!("http://{}{ACC_ENDPOINT}", handle.local_addr());
        (handle, inbox, url)
    }

    #[tokio::test]
    async fn test_valid_delivery_is_acked_and_queued() {
        let (handle, mut inbox, url) = start_inbox_server().await;
        let (envelope, message) = sample_pair();
        let (body, content_type) = build_multipart(&envelope, &crate::codec::dumps(&message));

        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let (received_env, received_msg) = inbox.recv().await.unwrap();
        assert_eq!(received_env.from.name, "ping@remote");
        assert_eq!(received_msg.performative, Performative::Inform);
        assert_eq!(received_msg.content.as_deref(), Some("(weather :sky clear)"));
        assert_eq!(handle.stats().messages_received.load(Ordering::Relaxed), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_undecodable_body_is_refused() {
        let (handle, _inbox, url) = start_inbox_server().await;

        // no boundary parameter at all
        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", "text/plain")
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        // boundary present but only one part
        let body = "--PART\r\nContent-Type: application/xml\r\n\r\n<?xml?><envelope/>\r\n--PART--";
        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", "multipart/mixed ; boundary=\"PART\"")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let text = response.text().await.unwrap();
        assert!(text.starts_with("undeliverable:"), "got: {text}");

        assert_eq!(handle.stats().decode_failures.load(Ordering::Relaxed), 2);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_handler_error_does_not_change_ack() {
        let config = MtpServerConfig::default().with_host("127.0.0.1").with_port(0);
        let server = MtpServer::with_callback(config, |_envelope, _message| async {
            anyhow::bail!("application is unhappy")
        });
        let handle = server.start().await.unwrap();
        let url = format!("http://{}{ACC_ENDPOINT}", handle.local_addr());

        let (envelope, message) = sample_pair();
        let (body, content_type) = build_multipart(&envelope, &crate::codec::dumps(&message));
        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_loopback_surfaces_same_pair() {
        let (handle, mut inbox, url) = start_inbox_server().await;
        let (_, message) = sample_pair();
        let to = message.receivers[0].clone();
        let from = message.sender.clone().unwrap();

        let client = crate::transport::HttpMtpClient::new();
        crate::transport::AclSender::send_acl(&client, &to, &from, &message, &url)
            .await
            .unwrap();

        let (envelope, received) = inbox.recv().await.unwrap();
        assert_eq!(envelope.from, from);
        assert_eq!(envelope.to, vec![to]);
        assert_eq!(received, message);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_sloppy_peer_framing_is_accepted() {
        let (handle, mut inbox, url) = start_inbox_server().await;
        let (envelope, message) = sample_pair();

        // LF line endings, lowercase header, parts in reverse order
        let body = format!(
            "--PART\ncontent-type: text/plain\n\n{}\n--PART\ncontent-type: application/xml\n\n{}\n--PART--\n",
            crate::codec::dumps(&message),
            envelope.to_xml(),
        );
        let response = reqwest::Client::new()
            .post(&url)
            .header("content-type", "multipart/mixed; boundary=PART")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let (received_env, received_msg) = inbox.recv().await.unwrap();
        assert_eq!(received_env.to[0].name, "pong@local");
        assert_eq!(received_msg.performative, Performative::Inform);
        handle.shutdown();
    }
}
