//! Identifiers for runs, actions and managed resources.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a convergence run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Generate a new RunId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique name of an action within a run, e.g. `set 192.168.10.0 dns server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Create an action id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ActionId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A managed resource: the DHCP server itself, a scope, or a failover
/// relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ResourceId {
    /// The server role on this node
    Server,
    /// A scope keyed by subnet id
    Scope(String),
    /// A failover relationship keyed by its name
    Failover(String),
}

impl ResourceId {
    /// Scope resource.
    pub fn scope(subnet: impl Into<String>) -> Self {
        Self::Scope(subnet.into())
    }

    /// Failover resource.
    pub fn failover(name: impl Into<String>) -> Self {
        Self::Failover(name.into())
    }

    /// Key used when probing the host.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Scope(subnet) => write!(f, "scope[{}]", subnet),
            Self::Failover(name) => write!(f, "failover[{}]", name),
        }
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::str::FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "server" {
            return Ok(Self::Server);
        }

        let inner = |prefix: &str| {
            s.strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(']'))
                .map(str::to_string)
        };

        if let Some(subnet) = inner("scope[") {
            Ok(Self::Scope(subnet))
        } else if let Some(name) = inner("failover[") {
            Ok(Self::Failover(name))
        } else {
            Err(format!("unrecognised resource id: {}", s))
        }
    }
}
