//! The desired-configuration document.
//!
//! Parsed once per run from YAML or JSON and never mutated afterwards.
//! Every field is optional at this level; required fields, ranges and
//! defaults are enforced when the catalog is built so that all input
//! problems surface as [`ValidationError`]s.

use converge_core::ValidationError;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Keys not covered by a section's schema.
pub type ExtraFields = IndexMap<String, serde_yaml::Value>;

/// Desired state of one DHCP server node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesiredConfig {
    /// Facts about the node being configured
    #[serde(default)]
    pub node: NodeFacts,

    /// Server-wide settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Scopes keyed by subnet id, in document order
    #[serde(default)]
    pub scopes: IndexMap<String, ScopeConfig>,

    /// Failover relationships keyed by name, in document order
    #[serde(default)]
    pub failovers: IndexMap<String, FailoverConfig>,

    /// Unrecognised top-level keys
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl DesiredConfig {
    /// Load a document from disk. `.json` files are read as JSON, anything
    /// else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::Document(format!("{}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(content).map_err(|e| ValidationError::Document(e.to_string()))
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(content).map_err(|e| ValidationError::Document(e.to_string()))
    }
}

/// Facts about the node, as a configuration management agent reports them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeFacts {
    /// Fully qualified host name
    pub fqdn: Option<String>,

    /// DNS domain of the node
    pub domain: Option<String>,

    /// Operating system family
    pub os_family: String,

    /// Unrecognised keys
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for NodeFacts {
    fn default() -> Self {
        Self {
            fqdn: None,
            domain: None,
            os_family: "windows".to_string(),
            extra: ExtraFields::new(),
        }
    }
}

impl NodeFacts {
    /// Short host name: the first label of the FQDN.
    pub fn hostname(&self) -> Option<&str> {
        self.fqdn.as_deref().and_then(|fqdn| fqdn.split('.').next())
    }
}

/// Server-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Account used to authorise the server in the directory
    pub domain_user: Option<String>,

    /// Password of `domain_user`
    pub domain_pass: Option<Secret>,

    /// Ping attempts before an address is leased (0..=5)
    #[serde(deserialize_with = "lenient_int")]
    pub conflict_detection_attempts: Option<i64>,

    /// Whether to manage membership of the DHCP Administrators group
    pub populate_security_group: Option<bool>,

    /// Accounts to add to DHCP Administrators; defaults to `domain_user`
    pub administrators: Option<Vec<String>>,

    /// Unrecognised keys
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// First leasable address
    pub start_range: Option<String>,
    /// Last leasable address
    pub end_range: Option<String>,
    /// Subnet mask
    pub subnet_mask: Option<String>,
    /// Display name
    pub scope_name: Option<String>,
    /// Free text description
    pub description: Option<String>,
    /// DNS domain option (15)
    pub dns_domain: Option<String>,
    /// DNS server option (6)
    pub dns_server: Option<OneOrMany>,
    /// Router option (3)
    pub router: Option<OneOrMany>,
    /// Whether policies are evaluated
    pub activate_policies: Option<bool>,
    /// Offer delay in milliseconds
    #[serde(deserialize_with = "lenient_int")]
    pub delay: Option<i64>,
    /// Lease duration as a time span
    #[serde(deserialize_with = "lenient_text")]
    pub lease_duration: Option<String>,
    /// BOOTP client limit
    #[serde(deserialize_with = "lenient_int")]
    pub max_bootp_clients: Option<i64>,
    /// `active` or `inactive`
    pub state: Option<String>,
    /// `dhcp`, `bootp` or `both`
    #[serde(rename = "type")]
    pub scope_type: Option<String>,

    /// Unrecognised keys
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One failover relationship.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Partner server FQDN
    pub partner_server: Option<String>,
    /// Scope id or list of scope ids
    pub scope_id: Option<OneOrMany>,
    /// `loadbalance` or `hotstandby`
    pub mode: Option<String>,
    /// Share of clients served locally in load-balance mode
    #[serde(deserialize_with = "lenient_int")]
    pub loadbalance_percent: Option<i64>,
    /// Maximum client lead time
    #[serde(deserialize_with = "lenient_text")]
    pub max_client_lead_time: Option<String>,
    /// Address reserve for the standby server
    #[serde(deserialize_with = "lenient_int")]
    pub reserve_percent: Option<i64>,
    /// `active` or `standby`
    pub server_role: Option<String>,
    /// Interval before switching to partner-down; `0` disables the switch
    #[serde(deserialize_with = "lenient_text")]
    pub state_switch_interval: Option<String>,
    /// Message authentication secret
    pub shared_secret: Option<Secret>,

    /// Unrecognised keys
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// A single value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// Single value
    One(String),
    /// List of values
    Many(Vec<String>),
}

impl OneOrMany {
    /// The values as a list.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }

    /// Whether the document supplied a list.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::Many(_))
    }
}

/// A credential. Never shown by `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret text, for building scripts only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

/// Accept `0` as well as `"0"`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Int(n) => n.to_string(),
        Scalar::Text(s) => s,
    }))
}

/// Accept `5` as well as `"5"`.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Int(n)) => Ok(Some(n)),
        Some(Scalar::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{}'", s))),
    }
}
