// df.rs - Directory Facilitator Client
//
//! Client side of the FIPA directory facilitator (DF): register, deregister,
//! modify and search, carried as fipa-request conversations in the
//! FIPA-Agent-Management ontology.
//!
//! Each verb builds its SL0 content with [`crate::sl0`], runs one request
//! through the [`ConversationManager`], and decodes the terminal INFORM.
//! A REFUSE or FAILURE reply surfaces as [`DfError::Failure`] carrying the
//! peer's content, so callers see one failure shape regardless of which
//! performative delivered it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::sexpr::{collection_items, unwrap_singletons};
use crate::codec::{parse_sexpr, ParseError, SExpr};
use crate::conversation::{ConversationError, ConversationManager, RequestSpec};
use crate::message::AgentIdentifier;
use crate::sl0::{
    deregister_content, df_agent_description_from_sexpr, modify_content, register_content,
    search_content, service_description_from_sexpr, DfAgentDescription, SearchConstraints,
    ServiceDescription,
};
use crate::transport::TransportError;

/// Ontology slot on every DF request
pub const AGENT_MANAGEMENT_ONTOLOGY: &str = "FIPA-Agent-Management";

/// One entry of a decoded DF result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Description {
    Agent(DfAgentDescription),
    Service(ServiceDescription),
}

/// Decoded terminal DF reply content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DfReply {
    /// `(done ...)`: the action completed with no result set
    Done,
    /// `(result <action> <value>)`: the decoded result set
    Result(Vec<Description>),
}

#[derive(Debug, Error)]
pub enum DfError {
    #[error("directory facilitator reported failure: {0}")]
    Failure(String),

    #[error("df reply has unexpected shape: {0}")]
    Shape(String),

    #[error("no directory facilitator configured")]
    NotConfigured,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Decode the content of a terminal DF reply.
///
/// `(done ...)` acknowledges an action, `(result ... <value>)` carries a
/// result set, `(failure ...)` becomes [`DfError::Failure`] with the
/// content verbatim. Anything else is a shape error.
pub fn decode_df_reply(content: &str) -> Result<DfReply, DfError> {
    let root = parse_sexpr(content)?;
    let reply = unwrap_singletons(&root);

    let head = match reply {
        SExpr::Symbol(word) => word.as_str(),
        _ => reply
            .head()
            .ok_or_else(|| DfError::Shape(format!("reply is not a headed list: {reply}")))?,
    };

    match head.to_ascii_lowercase().as_str() {
        "done" => Ok(DfReply::Done),
        "result" => {
            let value = reply
                .as_list()
                .and_then(|items| items.last())
                .unwrap_or(reply);
            Ok(DfReply::Result(descriptions_from_value(value)))
        }
        "failure" => Err(DfError::Failure(content.to_string())),
        other => Err(DfError::Shape(format!("unknown reply head '{other}'"))),
    }
}

/// A result value is normally `(set <description> ...)` but a bare single
/// description is accepted too
fn descriptions_from_value(value: &SExpr) -> Vec<Description> {
    if let Some(description) = description_from_sexpr(value) {
        return vec![description];
    }
    collection_items(value)
        .into_iter()
        .filter_map(description_from_sexpr)
        .collect()
}

fn description_from_sexpr(node: &SExpr) -> Option<Description> {
    if let Some(agent) = df_agent_description_from_sexpr(node) {
        return Some(Description::Agent(agent));
    }
    service_description_from_sexpr(node).map(Description::Service)
}

/// DF verbs bound to one manager, caller identity and DF identity
#[derive(Clone)]
pub struct DfClient {
    conversations: Arc<ConversationManager>,
    my_aid: AgentIdentifier,
    df_aid: AgentIdentifier,
    df_url: Option<String>,
    timeout: Option<Duration>,
}

impl DfClient {
    pub fn new(
        conversations: Arc<ConversationManager>,
        my_aid: AgentIdentifier,
        df_aid: AgentIdentifier,
    ) -> Self {
        Self {
            conversations,
            my_aid,
            df_aid,
            df_url: None,
            timeout: None,
        }
    }

    /// Deliver to this URL instead of the DF AID's first address
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.df_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn df_aid(&self) -> &AgentIdentifier {
        &self.df_aid
    }

    pub async fn register(&self, description: &DfAgentDescription) -> Result<(), DfError> {
        self.exchange(register_content(&self.df_aid, description))
            .await?;
        debug!(df = %self.df_aid, "registered with directory facilitator");
        Ok(())
    }

    /// Withdraw this agent's registration; the DF matches on name alone
    pub async fn deregister(&self) -> Result<(), DfError> {
        let description = DfAgentDescription::new().with_name(self.my_aid.clone());
        self.exchange(deregister_content(&self.df_aid, &description))
            .await?;
        debug!(df = %self.df_aid, "deregistered from directory facilitator");
        Ok(())
    }

    pub async fn modify(&self, description: &DfAgentDescription) -> Result<(), DfError> {
        self.exchange(modify_content(&self.df_aid, description))
            .await?;
        Ok(())
    }

    pub async fn search(
        &self,
        template: &DfAgentDescription,
        constraints: &SearchConstraints,
    ) -> Result<Vec<Description>, DfError> {
        match self
            .exchange(search_content(&self.df_aid, template, constraints))
            .await?
        {
            DfReply::Result(descriptions) => Ok(descriptions),
            DfReply::Done => Ok(Vec::new()),
        }
    }

    /// One fipa-request round trip with the DF
    async fn exchange(&self, content: String) -> Result<DfReply, DfError> {
        let mut spec = RequestSpec::new(self.my_aid.clone(), self.df_aid.clone(), content)
            .with_ontology(AGENT_MANAGEMENT_ONTOLOGY);
        if let Some(url) = &self.df_url {
            spec = spec.with_url(url.clone());
        }
        if let Some(timeout) = self.timeout {
            spec = spec.with_timeout(timeout);
        }

        let pending = self.conversations.send_request(spec).await?;
        match pending.await {
            Ok(inform) => decode_df_reply(inform.content.as_deref().unwrap_or_default()),
            Err(ConversationError::Refused(reply)) | Err(ConversationError::Failed(reply)) => {
                Err(DfError::Failure(reply.content.unwrap_or_default()))
            }
            Err(other) => Err(other.into()),
        }
    }
}
