// message/aid.rs - Agent Identifier
//
//! FIPA agent identifier.
//!
//! An [`AgentIdentifier`] couples a platform-qualified agent name with the
//! transport addresses where that agent's platform accepts messages.
//! Identity follows the FIPA rule: two AIDs denote the same agent when
//! their names match, regardless of addresses or resolvers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// FIPA agent identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentifier {
    /// Platform-qualified agent name, e.g. `df@platform:1099/JADE`
    pub name: String,

    /// Transport addresses in preference order
    pub addresses: Vec<String>,

    /// Resolver agents able to locate this agent
    pub resolvers: Vec<AgentIdentifier>,
}

impl AgentIdentifier {
    /// Create an AID with no addresses
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            resolvers: Vec::new(),
        }
    }

    /// Append a transport address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Append a resolver AID
    pub fn with_resolver(mut self, resolver: AgentIdentifier) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// First transport address, if any
    pub fn first_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }
}

impl PartialEq for AgentIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AgentIdentifier {}

impl Hash for AgentIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
