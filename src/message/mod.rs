// message/mod.rs - Protocol Entities
//
//! In-memory protocol entities: agent identifiers, ACL messages and
//! transport envelopes.
//!
//! These types are plain data; the text codec lives in [`crate::codec`]
//! and the wire framing in [`crate::transport`].

pub mod acl;
pub mod aid;
pub mod envelope;

pub use acl::{AclMessage, Performative};
pub use aid::AgentIdentifier;
pub use envelope::{Envelope, EnvelopeError, ReceivedStamp, ACL_STRING_REPRESENTATION};
