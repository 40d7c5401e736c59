// lib.rs - FIPA ACL Messaging over HTTP-MTP
//
// An agent-communication stack speaking the FIPA ACL string representation
// over the JADE-compatible HTTP message transport protocol.

#![doc = include_str!("../README.md")]

pub mod codec;
pub mod conversation;
pub mod df;
pub mod endpoint;
pub mod message;
pub mod router;
pub mod sl0;
pub mod transport;

// Re-export commonly used types
pub use codec::{dumps, parse, parse_sexpr, ParseError, SExpr};

pub use conversation::{ConversationError, ConversationManager, PendingReply, RequestSpec};

pub use df::{decode_df_reply, Description, DfClient, DfError, DfReply};

pub use endpoint::{CommEndpoint, EndpointConfig};

pub use message::{
    AclMessage, AgentIdentifier, Envelope, EnvelopeError, Performative, ReceivedStamp,
};

pub use router::{
    classify_message, HandlerId, InboundDispatcher, Kind, MessageTemplate, MsgEvent,
};

pub use sl0::{
    deregister_content, modify_content, register_content, search_content, DfAgentDescription,
    SearchConstraints, ServiceDescription,
};

pub use transport::{
    acc_url, AclSender, HttpMtpClient, MtpClientConfig, MtpServer, MtpServerConfig,
    MtpServerHandle, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::{dumps, parse};
    pub use crate::conversation::{
        ConversationError, ConversationManager, PendingReply, RequestSpec,
    };
    pub use crate::df::{Description, DfClient, DfError, DfReply};
    pub use crate::endpoint::{CommEndpoint, EndpointConfig};
    pub use crate::message::{AclMessage, AgentIdentifier, Envelope, Performative};
    pub use crate::router::{Kind, MessageTemplate, MsgEvent};
    pub use crate::sl0::{DfAgentDescription, SearchConstraints, ServiceDescription};
    pub use crate::transport::{
        HttpMtpClient, MtpClientConfig, MtpServer, MtpServerConfig, TransportError,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
