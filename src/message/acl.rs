// message/acl.rs - ACL Message
//
//! The FIPA ACL message: a performative plus the standard message slots.
//!
//! [`AclMessage`] is a plain data carrier. The text form lives in
//! [`crate::codec::acl_text`]; transport framing lives in
//! [`crate::transport`]. `content` is an opaque string here: its grammar
//! is declared by the `language` slot and interpreting it is up to the
//! consumer (the SL0 helpers in [`crate::sl0`] being one such consumer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::aid::AgentIdentifier;

/// FIPA communicative acts, plus a catch-all for non-standard ones.
///
/// Parsing is case-insensitive and treats `_` as `-`; the canonical
/// (uppercase, hyphenated) spelling is what [`Performative::as_str`]
/// returns and what the serializer emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performative {
    AcceptProposal,
    Agree,
    Cancel,
    Cfp,
    Confirm,
    Disconfirm,
    Failure,
    Inform,
    InformIf,
    InformRef,
    NotUnderstood,
    Propagate,
    Propose,
    Proxy,
    QueryIf,
    QueryRef,
    Refuse,
    RejectProposal,
    Request,
    RequestWhen,
    RequestWhenever,
    Subscribe,
    /// Anything outside the FIPA standard set, stored normalized
    Custom(String),
}

impl Performative {
    /// Parse a performative name, normalizing case and `_`/`-`
    pub fn from_text(text: &str) -> Self {
        let normalized = text.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "ACCEPT-PROPOSAL" => Performative::AcceptProposal,
            "AGREE" => Performative::Agree,
            "CANCEL" => Performative::Cancel,
            "CFP" => Performative::Cfp,
            "CONFIRM" => Performative::Confirm,
            "DISCONFIRM" => Performative::Disconfirm,
            "FAILURE" => Performative::Failure,
            "INFORM" => Performative::Inform,
            "INFORM-IF" => Performative::InformIf,
            "INFORM-REF" => Performative::InformRef,
            "NOT-UNDERSTOOD" => Performative::NotUnderstood,
            "PROPAGATE" => Performative::Propagate,
            "PROPOSE" => Performative::Propose,
            "PROXY" => Performative::Proxy,
            "QUERY-IF" => Performative::QueryIf,
            "QUERY-REF" => Performative::QueryRef,
            "REFUSE" => Performative::Refuse,
            "REJECT-PROPOSAL" => Performative::RejectProposal,
            "REQUEST" => Performative::Request,
            "REQUEST-WHEN" => Performative::RequestWhen,
            "REQUEST-WHENEVER" => Performative::RequestWhenever,
            "SUBSCRIBE" => Performative::Subscribe,
            _ => Performative::Custom(normalized),
        }
    }

    /// Canonical uppercase spelling
    pub fn as_str(&self) -> &str {
        match self {
            Performative::AcceptProposal => "ACCEPT-PROPOSAL",
            Performative::Agree => "AGREE",
            Performative::Cancel => "CANCEL",
            Performative::Cfp => "CFP",
            Performative::Confirm => "CONFIRM",
            Performative::Disconfirm => "DISCONFIRM",
            Performative::Failure => "FAILURE",
            Performative::Inform => "INFORM",
            Performative::InformIf => "INFORM-IF",
            Performative::InformRef => "INFORM-REF",
            Performative::NotUnderstood => "NOT-UNDERSTOOD",
            Performative::Propagate => "PROPAGATE",
            Performative::Propose => "PROPOSE",
            Performative::Proxy => "PROXY",
            Performative::QueryIf => "QUERY-IF",
            Performative::QueryRef => "QUERY-REF",
            Performative::Refuse => "REFUSE",
            Performative::RejectProposal => "REJECT-PROPOSAL",
            Performative::Request => "REQUEST",
            Performative::RequestWhen => "REQUEST-WHEN",
            Performative::RequestWhenever => "REQUEST-WHENEVER",
            Performative::Subscribe => "SUBSCRIBE",
            Performative::Custom(name) => name,
        }
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A FIPA ACL message with the standard slot set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclMessage {
    pub performative: Performative,

    /// Originating agent
    pub sender: Option<AgentIdentifier>,

    /// Destination agents; may be empty only before the message is sent
    pub receivers: Vec<AgentIdentifier>,

    /// Agents that replies should be directed to instead of the sender
    pub reply_to: Vec<AgentIdentifier>,

    /// Opaque payload, interpreted per `language`
    pub content: Option<String>,

    pub language: Option<String>,
    pub encoding: Option<String>,
    pub ontology: Option<String>,
    pub protocol: Option<String>,

    /// Correlation token linking a request to its replies
    pub conversation_id: Option<String>,
    pub reply_with: Option<String>,
    pub in_reply_to: Option<String>,

    /// Deadline by which a reply is expected
    pub reply_by: Option<DateTime<Utc>>,

    /// Non-standard `:slot value` pairs, keyed without the leading colon
    pub user_params: BTreeMap<String, String>,
}

impl AclMessage {
    /// Create a message carrying only a performative
    pub fn new(performative: Performative) -> Self {
        Self {
            performative,
            sender: None,
            receivers: Vec::new(),
            reply_to: Vec::new(),
            content: None,
            language: None,
            encoding: None,
            ontology: None,
            protocol: None,
            conversation_id: None,
            reply_with: None,
            in_reply_to: None,
            reply_by: None,
            user_params: BTreeMap::new(),
        }
    }

    /// Set the sender
    pub fn with_sender(mut self, sender: AgentIdentifier) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Append a receiver
    pub fn with_receiver(mut self, receiver: AgentIdentifier) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Append a reply-to AID
    pub fn with_reply_to(mut self, aid: AgentIdentifier) -> Self {
        self.reply_to.push(aid);
        self
    }

    /// Set the content payload
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the content language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the content encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set the ontology
    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    /// Set the interaction protocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the conversation id
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Set the reply-with token
    pub fn with_reply_with(mut self, token: impl Into<String>) -> Self {
        self.reply_with = Some(token.into());
        self
    }

    /// Set the in-reply-to token
    pub fn with_in_reply_to(mut self, token: impl Into<String>) -> Self {
        self.in_reply_to = Some(token.into());
        self
    }

    /// Set the reply-by deadline
    pub fn with_reply_by(mut self, deadline: DateTime<Utc>) -> Self {
        self.reply_by = Some(deadline);
        self
    }

    /// Set a user-defined parameter (key stored without the leading colon)
    pub fn with_user_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_params.insert(key.into(), value.into());
        self
    }

    /// Key-based string lookup over the standard slots and user parameters.
    ///
    /// AID-valued slots resolve to the agent name(s), comma-joined for sets;
    /// `reply-by` resolves to its ISO-8601 rendering. Returns `None` for
    /// unset slots and unknown keys.
    pub fn slot_text(&self, name: &str) -> Option<String> {
        match name {
            "performative" => Some(self.performative.as_str().to_string()),
            "sender" => self.sender.as_ref().map(|a| a.name.clone()),
            "receiver" => join_names(&self.receivers),
            "reply-to" => join_names(&self.reply_to),
            "content" => self.content.clone(),
            "language" => self.language.clone(),
            "encoding" => self.encoding.clone(),
            "ontology" => self.ontology.clone(),
            "protocol" => self.protocol.clone(),
            "conversation-id" => self.conversation_id.clone(),
            "reply-with" => self.reply_with.clone(),
            "in-reply-to" => self.in_reply_to.clone(),
            "reply-by" => self.reply_by.map(|d| d.to_rfc3339()),
            _ => self.user_params.get(name).cloned(),
        }
    }

    /// Build a reply skeleton for this message.
    ///
    /// The sender (or the reply-to set, when present) becomes the receiver,
    /// `reply-with` comes back as `in-reply-to`, and the conversation id,
    /// language, encoding, ontology and protocol carry over.
    pub fn create_reply(&self, performative: Performative) -> AclMessage {
        let mut reply = AclMessage::new(performative);
        reply.receivers = if self.reply_to.is_empty() {
            self.sender.iter().cloned().collect()
        } else {
            self.reply_to.clone()
        };
        reply.language = self.language.clone();
        reply.encoding = self.encoding.clone();
        reply.ontology = self.ontology.clone();
        reply.protocol = self.protocol.clone();
        reply.conversation_id = self.conversation_id.clone();
        reply.in_reply_to = self.reply_with.clone();
        reply
    }
}

fn join_names(aids: &[AgentIdentifier]) -> Option<String> {
    if aids.is_empty() {
        None
    } else {
        Some(
            aids.iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}
