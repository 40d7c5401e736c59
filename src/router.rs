// router.rs - Inbound Classification and Dispatch
//
//! Turns raw inbound `(Envelope, AclMessage)` pairs into something an
//! application can act on.
//!
//! [`classify_message`] names what arrived: a DF reply (decoded where
//! possible), a reply to a conversation this process is waiting on, or an
//! external message, SL0-parsed when it claims to be SL0. The
//! [`InboundDispatcher`] runs registered callbacks against inbound
//! messages before any of that: the first template that matches consumes
//! the message, in registration order.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::codec::{parse_sexpr, SExpr};
use crate::conversation::ConversationManager;
use crate::df::{decode_df_reply, Description, DfReply};
use crate::message::{AclMessage, AgentIdentifier, Envelope, Performative};

/// What an inbound message turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    /// DF acknowledged an action
    DfDone,
    /// DF answered a search
    DfResult { descriptions: Vec<Description> },
    /// DF reported a failure, content verbatim
    DfFailure { content: String },
    /// DF did not understand our request
    DfNotUnderstood { content: String },
    /// From the DF but not decodable as a reply
    DfRaw { content: String },
    /// Reply to a request this process is waiting on
    ConversationReply { conversation_id: String },
    /// External message with parseable SL0 content
    ExternalSl0 {
        performative: Performative,
        expr: SExpr,
    },
    /// Everything else
    ExternalRaw {
        performative: Performative,
        content: String,
    },
}

impl Kind {
    pub fn label(&self) -> &'static str {
        match self {
            Kind::DfDone => "df-done",
            Kind::DfResult { .. } => "df-result",
            Kind::DfFailure { .. } => "df-failure",
            Kind::DfNotUnderstood { .. } => "df-not-understood",
            Kind::DfRaw { .. } => "df-raw",
            Kind::ConversationReply { .. } => "conversation-reply",
            Kind::ExternalSl0 { .. } => "ext-sl0",
            Kind::ExternalRaw { .. } => "ext-raw",
        }
    }
}

/// One classified inbound message, as delivered on the endpoint's event
/// channel
#[derive(Debug, Clone)]
pub struct MsgEvent {
    pub envelope: Envelope,
    pub message: AclMessage,
    /// Transport-level sender, from the envelope
    pub sender: AgentIdentifier,
    pub kind: Kind,
}

/// Name an inbound message.
///
/// The DF branch wins when the envelope sender is the known DF AID and
/// the performative belongs to a DF reply. A conversation-id tracked by
/// `conversations` names a conversation reply. Everything else is
/// external, SL0-parsed when the language slot says `fipa-sl0` and the
/// content actually parses.
pub fn classify_message(
    envelope: &Envelope,
    message: &AclMessage,
    df_aid: Option<&AgentIdentifier>,
    conversations: Option<&ConversationManager>,
) -> Kind {
    if let Some(df) = df_aid {
        if envelope.from.name == df.name {
            match &message.performative {
                Performative::NotUnderstood => {
                    return Kind::DfNotUnderstood {
                        content: content_text(message),
                    };
                }
                Performative::Inform => {
                    return match decode_df_reply(&content_text(message)) {
                        Ok(DfReply::Done) => Kind::DfDone,
                        Ok(DfReply::Result(descriptions)) => Kind::DfResult { descriptions },
                        Err(_) => Kind::DfRaw {
                            content: content_text(message),
                        },
                    };
                }
                Performative::Failure => {
                    return Kind::DfFailure {
                        content: content_text(message),
                    };
                }
                _ => {}
            }
        }
    }

    if let (Some(id), Some(manager)) = (message.conversation_id.as_deref(), conversations) {
        if manager.is_tracked(id) {
            return Kind::ConversationReply {
                conversation_id: id.to_string(),
            };
        }
    }

    let claims_sl0 = message
        .language
        .as_deref()
        .is_some_and(|language| language.eq_ignore_ascii_case("fipa-sl0"));
    if claims_sl0 {
        if let Some(content) = message.content.as_deref() {
            if let Ok(expr) = parse_sexpr(content) {
                return Kind::ExternalSl0 {
                    performative: message.performative.clone(),
                    expr,
                };
            }
        }
    }

    Kind::ExternalRaw {
        performative: message.performative.clone(),
        content: content_text(message),
    }
}

fn content_text(message: &AclMessage) -> String {
    message.content.clone().unwrap_or_default()
}

/// Slot-by-slot match against inbound messages; unset slots match
/// anything
#[derive(Clone, Default)]
pub struct MessageTemplate {
    performative: Option<Performative>,
    sender: Option<String>,
    ontology: Option<String>,
    protocol: Option<String>,
    conversation_id: Option<String>,
    predicate: Option<Arc<dyn Fn(&AclMessage) -> bool + Send + Sync>>,
}

impl MessageTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_performative(mut self, performative: Performative) -> Self {
        self.performative = Some(performative);
        self
    }

    /// Match on the ACL sender's name
    pub fn with_sender(mut self, name: impl Into<String>) -> Self {
        self.sender = Some(name.into());
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Arbitrary extra condition, checked after the slot filters
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&AclMessage) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, message: &AclMessage) -> bool {
        if let Some(performative) = &self.performative {
            if &message.performative != performative {
                return false;
            }
        }
        if let Some(name) = &self.sender {
            let sent_by = message.sender.as_ref().map(|aid| aid.name.as_str());
            if sent_by != Some(name.as_str()) {
                return false;
            }
        }
        if !slot_matches(&self.ontology, &message.ontology) {
            return false;
        }
        if !slot_matches(&self.protocol, &message.protocol) {
            return false;
        }
        if let Some(id) = &self.conversation_id {
            if message.conversation_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(message) {
                return false;
            }
        }
        true
    }
}

fn slot_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual
            .as_deref()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(wanted)),
    }
}

impl fmt::Debug for MessageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTemplate")
            .field("performative", &self.performative)
            .field("sender", &self.sender)
            .field("ontology", &self.ontology)
            .field("protocol", &self.protocol)
            .field("conversation_id", &self.conversation_id)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Handle for removing a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Callback invoked with the envelope sender and the consumed message
pub type Callback =
    Arc<dyn Fn(AgentIdentifier, AclMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Rule {
    id: HandlerId,
    template: MessageTemplate,
    callback: Callback,
}

/// Template-matched callbacks over inbound messages.
///
/// Dispatch tries rules in registration order and consumes the message
/// at the first match; the callback runs on its own task so a slow
/// handler never stalls the inbound pump.
#[derive(Default)]
pub struct InboundDispatcher {
    rules: RwLock<Vec<Rule>>,
    next_id: AtomicU64,
}

impl InboundDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F, Fut>(&self, template: MessageTemplate, callback: F) -> HandlerId
    where
        F: Fn(AgentIdentifier, AclMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(move |sender, message| callback(sender, message).boxed());
        self.rules.write().push(Rule {
            id,
            template,
            callback,
        });
        debug!(handler = ?id, "inbound handler registered");
        id
    }

    /// Returns whether the id was still registered
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|rule| rule.id != id);
        before != rules.len()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Offer a message to the rules; returns whether one consumed it
    pub fn dispatch(&self, sender: &AgentIdentifier, message: &AclMessage) -> bool {
        let matched = {
            let rules = self.rules.read();
            rules
                .iter()
                .find(|rule| rule.template.matches(message))
                .map(|rule| (rule.id, Arc::clone(&rule.callback)))
        };
        let Some((id, callback)) = matched else {
            return false;
        };

        debug!(handler = ?id, performative = %message.performative, "dispatching inbound message");
        let sender = sender.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(error) = callback(sender, message).await {
                warn!(handler = ?id, %error, "inbound handler failed");
            }
        });
        true
    }
}
