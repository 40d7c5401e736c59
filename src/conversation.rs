// conversation.rs - Request Conversation Manager
//
//! Correlates fipa-request exchanges with the replies that come back for
//! them, possibly much later and over a separate inbound connection.
//!
//! Each outbound request is tracked under a fresh conversation-id. The
//! record moves `PENDING -> AGREED` on an AGREE and leaves the table on
//! exactly one terminal event: an INFORM (success), a REFUSE or FAILURE
//! (failure), a timeout, or an explicit cancel. Whichever path resolves
//! first wins; the others become no-ops because the record is already
//! gone. The caller holds a [`PendingReply`] future for the outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::message::{AclMessage, AgentIdentifier, Performative};
use crate::transport::{acc_url, AclSender, TransportError};

/// Content language sent when a request does not override it
pub const DEFAULT_REQUEST_LANGUAGE: &str = "fipa-sl0";

/// Interaction protocol sent when a request does not override it
pub const DEFAULT_REQUEST_PROTOCOL: &str = "fipa-request";

/// How a tracked conversation ended, when not with an INFORM
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationError {
    #[error("conversation timed out")]
    TimedOut,

    #[error("conversation cancelled")]
    Cancelled,

    #[error("request refused: {}", reply_preview(.0))]
    Refused(AclMessage),

    #[error("request failed: {}", reply_preview(.0))]
    Failed(AclMessage),
}

fn reply_preview(reply: &AclMessage) -> String {
    match reply.content.as_deref() {
        Some(content) => {
            let mut end = content.len().min(120);
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            if end < content.len() {
                format!("{}...", &content[..end])
            } else {
                content.to_string()
            }
        }
        None => format!("({} with no content)", reply.performative),
    }
}

/// An outbound fipa-request being assembled
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub sender: AgentIdentifier,
    pub receiver: AgentIdentifier,
    pub content: String,
    pub language: String,
    pub ontology: Option<String>,
    pub protocol: String,
    /// Destination override; defaults to the receiver's first address
    pub url: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(
        sender: AgentIdentifier,
        receiver: AgentIdentifier,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            receiver,
            content: content.into(),
            language: DEFAULT_REQUEST_LANGUAGE.to_string(),
            ontology: None,
            protocol: DEFAULT_REQUEST_PROTOCOL.to_string(),
            url: None,
            timeout: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvState {
    Pending,
    Agreed,
}

struct ConversationRecord {
    state: ConvState,
    slot: oneshot::Sender<Result<AclMessage, ConversationError>>,
    timer: Option<JoinHandle<()>>,
    started: Instant,
}

type ConversationTable = DashMap<String, ConversationRecord>;

/// Remove the record and hand the outcome to whoever awaits it. The
/// removal is the only point of resolution, so concurrent terminal
/// events race on it and exactly one side finds the record.
fn resolve_entry(
    table: &ConversationTable,
    conversation_id: &str,
    outcome: Result<AclMessage, ConversationError>,
) -> bool {
    let Some((_, record)) = table.remove(conversation_id) else {
        return false;
    };
    if let Some(timer) = record.timer {
        timer.abort();
    }
    let _ = record.slot.send(outcome);
    true
}

/// Tracks outstanding requests and resolves them from inbound replies
pub struct ConversationManager {
    sender: Arc<dyn AclSender>,
    table: Arc<ConversationTable>,
}

impl ConversationManager {
    pub fn new(sender: Arc<dyn AclSender>) -> Self {
        Self {
            sender,
            table: Arc::new(DashMap::new()),
        }
    }

    /// Send a REQUEST and return a future for its terminal reply.
    ///
    /// The conversation record is registered before the message leaves,
    /// so a reply racing the send acknowledgment still correlates. If
    /// the send itself fails the record is withdrawn and the error
    /// returned directly.
    pub async fn send_request(&self, spec: RequestSpec) -> Result<PendingReply, TransportError> {
        let url = match &spec.url {
            Some(url) => url.clone(),
            None => acc_url(&spec.receiver)?,
        };

        let conversation_id = self.allocate_conversation_id(&spec.sender.name);
        let reply_with = format!("{conversation_id}.req");

        let mut request = AclMessage::new(Performative::Request)
            .with_sender(spec.sender.clone())
            .with_receiver(spec.receiver.clone())
            .with_content(spec.content)
            .with_language(spec.language)
            .with_protocol(spec.protocol)
            .with_conversation_id(conversation_id.clone())
            .with_reply_with(reply_with);
        if let Some(ontology) = spec.ontology {
            request = request.with_ontology(ontology);
        }

        let (tx, rx) = oneshot::channel();
        self.table.insert(
            conversation_id.clone(),
            ConversationRecord {
                state: ConvState::Pending,
                slot: tx,
                timer: None,
                started: Instant::now(),
            },
        );
        if let Some(timeout) = spec.timeout {
            self.arm_timer(&conversation_id, timeout);
        }

        debug!(
            conversation_id = %conversation_id,
            receiver = %spec.receiver,
            url = %url,
            "sending request"
        );
        if let Err(err) = self
            .sender
            .send_acl(&spec.receiver, &spec.sender, &request, &url)
            .await
        {
            if let Some((_, record)) = self.table.remove(&conversation_id) {
                if let Some(timer) = record.timer {
                    timer.abort();
                }
            }
            return Err(err);
        }

        Ok(PendingReply {
            conversation_id,
            rx,
        })
    }

    /// Feed an inbound message through the state machine. Messages
    /// without a conversation-id, or with an id this manager is not
    /// tracking, are left alone.
    pub fn on_message(&self, message: &AclMessage) {
        let Some(conversation_id) = message.conversation_id.as_deref() else {
            return;
        };
        if !self.table.contains_key(conversation_id) {
            return;
        }

        match &message.performative {
            Performative::Agree => {
                if let Some(mut record) = self.table.get_mut(conversation_id) {
                    if record.state == ConvState::Pending {
                        record.state = ConvState::Agreed;
                        debug!(conversation_id, "request agreed, awaiting terminal reply");
                    }
                }
            }
            Performative::Refuse => {
                if resolve_entry(
                    &self.table,
                    conversation_id,
                    Err(ConversationError::Refused(message.clone())),
                ) {
                    debug!(conversation_id, "request refused");
                }
            }
            Performative::Failure => {
                if resolve_entry(
                    &self.table,
                    conversation_id,
                    Err(ConversationError::Failed(message.clone())),
                ) {
                    debug!(conversation_id, "request failed");
                }
            }
            Performative::Inform => {
                if resolve_entry(&self.table, conversation_id, Ok(message.clone())) {
                    debug!(conversation_id, "request resolved");
                }
            }
            other => {
                debug!(
                    conversation_id,
                    performative = %other,
                    "ignoring reply outside the request protocol"
                );
            }
        }
    }

    /// Drop a conversation. Its `PendingReply` resolves to
    /// [`ConversationError::Cancelled`] and any later reply for the id
    /// is ignored. Returns whether the id was still tracked.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let cancelled = resolve_entry(
            &self.table,
            conversation_id,
            Err(ConversationError::Cancelled),
        );
        if cancelled {
            debug!(conversation_id, "conversation cancelled");
        }
        cancelled
    }

    pub fn is_tracked(&self, conversation_id: &str) -> bool {
        self.table.contains_key(conversation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    fn allocate_conversation_id(&self, sender_name: &str) -> String {
        loop {
            let nonce: [u8; 8] = rand::rng().random();
            let candidate = format!("{sender_name}-{}", hex::encode(nonce));
            if !self.table.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn arm_timer(&self, conversation_id: &str, timeout: Duration) {
        let table = Arc::clone(&self.table);
        let id = conversation_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let elapsed = table.get(&id).map(|record| record.started.elapsed());
            if resolve_entry(&table, &id, Err(ConversationError::TimedOut)) {
                debug!(conversation_id = %id, ?elapsed, "request timed out");
            }
        });
        match self.table.get_mut(conversation_id) {
            Some(mut record) => record.timer = Some(handle),
            // resolved before the timer was even attached
            None => handle.abort(),
        }
    }
}

/// Future for the terminal reply of one request
#[derive(Debug)]
pub struct PendingReply {
    conversation_id: String,
    rx: oneshot::Receiver<Result<AclMessage, ConversationError>>,
}

impl PendingReply {
    /// Id to pass to [`ConversationManager::cancel`]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Future for PendingReply {
    type Output = Result<AclMessage, ConversationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // manager dropped without resolving
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConversationError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
