// transport/mod.rs - HTTP-MTP Transport
//
//! HTTP message transport protocol (HTTP-MTP), JADE compatible.
//!
//! A message travels as an HTTP POST to the receiving platform's agent
//! communication channel (ACC): a `multipart/mixed` body whose first part
//! is the [`Envelope`](crate::message::Envelope) as XML and whose second
//! part is the ACL text. [`multipart`] builds and tolerantly decodes that
//! framing, [`client`] posts it with retry/backoff, [`server`] accepts it
//! and hands decoded `(Envelope, AclMessage)` pairs to the application.

pub mod client;
pub mod multipart;
pub mod server;

pub use client::{AclSender, ClientStats, HttpMtpClient, MtpClientConfig};
pub use multipart::{build_multipart, extract_boundary, extract_envelope_acl};
pub use server::{MtpServer, MtpServerConfig, MtpServerHandle, OnMessage, ServerStats};

use thiserror::Error;

use crate::codec::ParseError;
use crate::message::{AgentIdentifier, EnvelopeError};

/// Conventional ACC endpoint path
pub const ACC_ENDPOINT: &str = "/acc";

/// Conventional HTTP-MTP port
pub const DEFAULT_ACC_PORT: u16 = 7777;

/// Default ceiling on inbound request bodies
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 5 * 1024 * 1024;

/// Errors crossing the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer rejected delivery with http {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },

    #[error("multipart body invalid: {0}")]
    Multipart(String),

    #[error("envelope part invalid: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("acl part invalid: {0}")]
    Acl(#[from] ParseError),

    #[error("agent '{0}' has no transport address")]
    NoAddress(String),

    #[error("address not routable over http-mtp: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether retrying the same delivery can plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(err) => err.is_timeout() || err.is_connect(),
            TransportError::Rejected { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Delivery URL for an agent: its first transport address, normalized
/// to point at an ACC endpoint
pub fn acc_url(aid: &AgentIdentifier) -> Result<String, TransportError> {
    let address = aid
        .first_address()
        .ok_or_else(|| TransportError::NoAddress(aid.name.clone()))?;
    normalize_acc_url(address)
}

/// Normalize an address into an ACC URL.
///
/// Accepts plain `http(s)://host:port[/acc]` forms, appending `/acc` when
/// the path is missing, and the `agent@http://...` form some registries
/// hand out. Anything else (other schemes, bare names) is not routable
/// over this transport.
pub fn normalize_acc_url(address: &str) -> Result<String, TransportError> {
    if address.starts_with("http://") || address.starts_with("https://") {
        if address.contains("/acc") {
            return Ok(address.to_string());
        }
        return Ok(format!("{}{ACC_ENDPOINT}", address.trim_end_matches('/')));
    }

    if let Some(at) = address.find('@') {
        let candidate = &address[at + 1..];
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return normalize_acc_url(candidate);
        }
    }

    Err(TransportError::InvalidAddress(address.to_string()))
}

/// Explicit port of an `http(s)://host:port/...` URL, if present
pub(crate) fn port_in_url(url: &str) -> Option<u16> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?']).next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_acc_url() {
        assert_eq!(
            normalize_acc_url("http://platform.example.com:7778").unwrap(),
            "http://platform.example.com:7778/acc"
        );
        assert_eq!(
            normalize_acc_url("http://platform.example.com/acc").unwrap(),
            "http://platform.example.com/acc"
        );
        assert_eq!(
            normalize_acc_url("https://platform.example.com:8443/").unwrap(),
            "https://platform.example.com:8443/acc"
        );
        assert_eq!(
            normalize_acc_url("agent1@http://platform.example.com").unwrap(),
            "http://platform.example.com/acc"
        );
        assert!(matches!(
            normalize_acc_url("iiop://platform.example.com"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_acc_url_requires_an_address() {
        let aid = AgentIdentifier::new("nowhere@p");
        assert!(matches!(
            acc_url(&aid),
            Err(TransportError::NoAddress(name)) if name == "nowhere@p"
        ));

        let aid = AgentIdentifier::new("df@p").with_address("http://h:7778");
        assert_eq!(acc_url(&aid).unwrap(), "http://h:7778/acc");
    }

    #[test]
    fn test_port_in_url() {
        assert_eq!(port_in_url("http://host:7777/acc"), Some(7777));
        assert_eq!(port_in_url("https://host:8443"), Some(8443));
        assert_eq!(port_in_url("http://host/acc"), None);
        assert_eq!(port_in_url("host:7777"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Rejected {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!TransportError::Rejected {
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!TransportError::Multipart("x".into()).is_transient());
        assert!(!TransportError::NoAddress("a".into()).is_transient());
    }
}
