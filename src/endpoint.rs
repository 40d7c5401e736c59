// endpoint.rs - Agent Communication Endpoint
//
//! One object wiring the whole stack together for a single local agent
//! identity: an HTTP-MTP server for inbound traffic, a retrying client
//! for outbound, a conversation manager for request/reply correlation,
//! a dispatcher for application callbacks and an event stream for
//! everything else.
//!
//! Inbound flow, in order: the dispatcher gets first refusal and a
//! consumed message goes no further; the rest are classified, offered to
//! the conversation manager, and emitted as [`MsgEvent`]s.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::conversation::{ConversationManager, PendingReply, RequestSpec};
use crate::df::{Description, DfClient, DfError};
use crate::message::{AclMessage, AgentIdentifier, Envelope};
use crate::router::{classify_message, HandlerId, InboundDispatcher, MessageTemplate, MsgEvent};
use crate::sl0::{DfAgentDescription, SearchConstraints};
use crate::transport::{
    acc_url, AclSender, ClientStats, HttpMtpClient, MtpClientConfig, MtpServer, MtpServerConfig,
    MtpServerHandle, ServerStats, TransportError, DEFAULT_ACC_PORT, DEFAULT_MAX_REQUEST_SIZE,
};

/// Endpoint construction parameters
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub bind_host: String,
    /// Listen port; defaults to the port in the local AID's first
    /// address, then to the conventional ACC port
    pub port: Option<u16>,
    /// Directory facilitator this endpoint talks to, if any
    pub df_aid: Option<AgentIdentifier>,
    pub client: MtpClientConfig,
    pub max_request_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: None,
            df_aid: None,
            client: MtpClientConfig::default(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl EndpointConfig {
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_df_aid(mut self, df_aid: AgentIdentifier) -> Self {
        self.df_aid = Some(df_aid);
        self
    }

    pub fn with_client_config(mut self, client: MtpClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }
}

fn resolve_port(config: &EndpointConfig, my_aid: &AgentIdentifier) -> u16 {
    config
        .port
        .or_else(|| {
            my_aid
                .first_address()
                .and_then(crate::transport::port_in_url)
        })
        .unwrap_or(DEFAULT_ACC_PORT)
}

/// A running communication endpoint for one agent identity
pub struct CommEndpoint {
    my_aid: AgentIdentifier,
    df_aid: Option<AgentIdentifier>,
    client: Arc<HttpMtpClient>,
    conversations: Arc<ConversationManager>,
    dispatcher: Arc<InboundDispatcher>,
    events: Option<mpsc::UnboundedReceiver<MsgEvent>>,
    server: MtpServerHandle,
    pump: JoinHandle<()>,
}

impl CommEndpoint {
    /// Bind the inbound server and start the processing pump
    pub async fn start(
        my_aid: AgentIdentifier,
        config: EndpointConfig,
    ) -> Result<Self, TransportError> {
        let port = resolve_port(&config, &my_aid);

        let client = Arc::new(HttpMtpClient::with_config(config.client.clone()));
        let conversations = Arc::new(ConversationManager::new(
            Arc::clone(&client) as Arc<dyn AclSender>
        ));
        let dispatcher = Arc::new(InboundDispatcher::new());

        let server_config = MtpServerConfig::default()
            .with_host(config.bind_host.clone())
            .with_port(port)
            .with_max_request_size(config.max_request_size);
        let (server, inbox) = MtpServer::with_inbox(server_config);
        let server = server.start().await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_inbox(
            inbox,
            Arc::clone(&dispatcher),
            Arc::clone(&conversations),
            config.df_aid.clone(),
            event_tx,
        ));

        info!(
            agent = %my_aid,
            local_addr = %server.local_addr(),
            df = config.df_aid.as_ref().map(|aid| aid.name.as_str()),
            "communication endpoint started"
        );
        Ok(Self {
            my_aid,
            df_aid: config.df_aid,
            client,
            conversations,
            dispatcher,
            events: Some(event_rx),
            server,
            pump,
        })
    }

    pub fn my_aid(&self) -> &AgentIdentifier {
        &self.my_aid
    }

    pub fn df_aid(&self) -> Option<&AgentIdentifier> {
        self.df_aid.as_ref()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// One-way delivery to the agent's first address. The sender and
    /// receiver slots are filled in when the message leaves them unset.
    pub async fn send(
        &self,
        to: &AgentIdentifier,
        mut message: AclMessage,
    ) -> Result<(), TransportError> {
        if message.sender.is_none() {
            message.sender = Some(self.my_aid.clone());
        }
        if message.receivers.is_empty() {
            message.receivers.push(to.clone());
        }
        let url = acc_url(to)?;
        self.client.send_acl(to, &self.my_aid, &message, &url).await
    }

    /// Fire a fipa-request with default slots and await its terminal
    /// reply through the returned future
    pub async fn request(
        &self,
        receiver: AgentIdentifier,
        content: impl Into<String>,
    ) -> Result<PendingReply, TransportError> {
        self.conversations
            .send_request(RequestSpec::new(self.my_aid.clone(), receiver, content))
            .await
    }

    /// The conversation manager, for requests needing non-default slots
    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn register_handler<F, Fut>(&self, template: MessageTemplate, callback: F) -> HandlerId
    where
        F: Fn(AgentIdentifier, AclMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.add(template, callback)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.dispatcher.remove(id)
    }

    /// Receiver of classified inbound events not consumed by a handler.
    /// Can be taken once; events queue up until then.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<MsgEvent>> {
        self.events.take()
    }

    /// DF verbs bound to this endpoint's identity
    pub fn df_client(&self) -> Result<DfClient, DfError> {
        let df_aid = self.df_aid.clone().ok_or(DfError::NotConfigured)?;
        Ok(DfClient::new(
            Arc::clone(&self.conversations),
            self.my_aid.clone(),
            df_aid,
        ))
    }

    pub async fn df_register(&self, description: &DfAgentDescription) -> Result<(), DfError> {
        self.df_client()?.register(description).await
    }

    pub async fn df_deregister(&self) -> Result<(), DfError> {
        self.df_client()?.deregister().await
    }

    pub async fn df_modify(&self, description: &DfAgentDescription) -> Result<(), DfError> {
        self.df_client()?.modify(description).await
    }

    pub async fn df_search(
        &self,
        template: &DfAgentDescription,
        constraints: &SearchConstraints,
    ) -> Result<Vec<Description>, DfError> {
        self.df_client()?.search(template, constraints).await
    }

    pub fn client_stats(&self) -> &ClientStats {
        self.client.stats()
    }

    pub fn server_stats(&self) -> &ServerStats {
        self.server.stats()
    }

    /// Stop the pump and the inbound server. Conversations still pending
    /// resolve only through their timeout or an explicit cancel.
    pub async fn shutdown(self) {
        self.pump.abort();
        self.server.shutdown();
        info!(agent = %self.my_aid, "communication endpoint stopped");
    }
}

async fn pump_inbox(
    mut inbox: mpsc::UnboundedReceiver<(Envelope, AclMessage)>,
    dispatcher: Arc<InboundDispatcher>,
    conversations: Arc<ConversationManager>,
    df_aid: Option<AgentIdentifier>,
    events: mpsc::UnboundedSender<MsgEvent>,
) {
    while let Some((envelope, message)) = inbox.recv().await {
        if dispatcher.dispatch(&envelope.from, &message) {
            continue;
        }

        let kind = classify_message(&envelope, &message, df_aid.as_ref(), Some(&conversations));
        conversations.on_message(&message);

        let sender = envelope.from.clone();
        debug!(kind = kind.label(), sender = %sender, "inbound event");
        if events
            .send(MsgEvent {
                envelope,
                message,
                sender,
                kind,
            })
            .is_err()
        {
            debug!("event receiver dropped, inbound event discarded");
        }
    }
}
