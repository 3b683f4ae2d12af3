//! Expansion of a desired-configuration document into resource actions.

use crate::config::DesiredConfig;
use crate::failover::FailoverSettings;
use crate::scope::ScopeSettings;
use crate::server::ServerSettings;
use crate::validate;
use async_trait::async_trait;
use converge_core::{
    ActionError, Capability, ExecContext, ExecResource, ResourceAction, ResourceId, State, Value,
    ValidationError, ValueKind,
};
use converge_tools::{Command, Effect, Probe};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the action set for a document.
pub struct ResourceCatalog;

impl ResourceCatalog {
    /// Validate the document and expand it. Any input problem fails the
    /// whole build; nothing is partially expanded.
    pub fn build(config: &DesiredConfig) -> Result<Catalog, ValidationError> {
        validate::no_extra_fields("document", &config.extra)?;
        validate::no_extra_fields("node", &config.node.extra)?;

        let family = config.node.os_family.trim();
        if !family.eq_ignore_ascii_case("windows") {
            return Err(ValidationError::UnsupportedPlatform(family.to_string()));
        }

        let mut warnings = Vec::new();

        let server = ServerSettings::from_config(&config.server, &config.node)?;
        let scopes = config
            .scopes
            .iter()
            .map(|(subnet, scope)| ScopeSettings::from_config(subnet, scope, &config.node))
            .collect::<Result<Vec<_>, _>>()?;

        let mut pairs: HashMap<(String, String), &str> = HashMap::new();
        let mut failovers = Vec::with_capacity(config.failovers.len());
        for (name, entry) in &config.failovers {
            let failover = FailoverSettings::from_config(name, entry, &server.fqdn, &mut warnings)?;
            if let Some(first) = pairs.insert(failover.pair_key(&server.fqdn), name) {
                return Err(ValidationError::Duplicate {
                    what: "failover relationship".to_string(),
                    name: format!("'{}' and '{}' pair the same servers", first, name),
                });
            }
            failovers.push(failover);
        }

        let mut actions = server.actions();
        for scope in &scopes {
            actions.extend(scope.actions());
        }
        for failover in &failovers {
            let declared: Vec<&ScopeSettings> = scopes
                .iter()
                .filter(|scope| failover.scope_ids.contains(&scope.subnet))
                .collect();
            actions.extend(failover.actions(&declared));
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        debug!(
            "Catalog: {} actions from {} scopes and {} failover relationships",
            actions.len(),
            scopes.len(),
            failovers.len()
        );

        Ok(Catalog { actions, warnings })
    }
}

/// Result of expanding a document.
#[derive(Debug)]
pub struct Catalog {
    /// Actions in declaration order
    pub actions: Vec<ResourceAction>,
    /// Input that was accepted but ignored
    pub warnings: Vec<CatalogWarning>,
}

/// Input that was accepted but has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    /// Resource the field belongs to
    pub resource: ResourceId,
    /// Field name
    pub field: String,
    /// Explanation
    pub message: String,
}

impl std::fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: '{}' {}", self.resource, self.field, self.message)
    }
}

/// An attribute action: observe with `probe`, correct with `command`.
pub(crate) fn setting(
    id: String,
    resource: &ResourceId,
    attribute: &str,
    desired: Value,
    kind: ValueKind,
    probe: String,
    command: String,
) -> ResourceAction {
    ResourceAction::new(
        id.clone(),
        resource.clone(),
        attribute,
        State::Present(desired.clone()),
        kind,
        Arc::new(setting_resource(id, resource, attribute, &desired, kind, probe, command)),
    )
}

fn setting_resource(
    label: String,
    resource: &ResourceId,
    attribute: &str,
    desired: &Value,
    kind: ValueKind,
    probe: String,
    command: String,
) -> ExecResource {
    ExecResource::new(
        Probe::attribute(resource.key(), attribute, probe),
        kind,
        Command::new(label, command).with_effect(set(resource, attribute, desired)),
    )
}

/// A creation action: satisfied iff `exists` holds.
pub(crate) fn creation(
    id: String,
    resource: &ResourceId,
    exists: String,
    command: String,
    initial: Vec<Effect>,
) -> ResourceAction {
    let key = resource.key();
    let command = Command::new(id.clone(), command)
        .with_effect(Effect::Create { resource: key.clone() })
        .with_effects(initial);
    let capability = ExecResource::new(Probe::exists(key, exists), ValueKind::Boolean, command);
    ResourceAction::create(id, resource.clone(), Arc::new(capability))
}

/// Postcondition: `attribute` reads back as `value`.
pub(crate) fn set(resource: &ResourceId, attribute: &str, value: &Value) -> Effect {
    Effect::Set {
        resource: resource.key(),
        attribute: attribute.to_string(),
        value: value.render(),
    }
}

/// An attribute that can be observed but not changed in place.
pub(crate) fn immutable(
    id: String,
    resource: &ResourceId,
    attribute: &str,
    desired: Value,
    probe: String,
    reason: String,
) -> ResourceAction {
    let observe = setting_resource(
        id.clone(),
        resource,
        attribute,
        &desired,
        ValueKind::Scalar,
        probe,
        String::new(),
    );
    ResourceAction::new(
        id,
        resource.clone(),
        attribute,
        State::Present(desired),
        ValueKind::Scalar,
        Arc::new(Immutable { observe, reason }),
    )
}

struct Immutable {
    observe: ExecResource,
    reason: String,
}

#[async_trait]
impl Capability for Immutable {
    async fn observe(&self, ctx: &ExecContext) -> Result<State, ActionError> {
        self.observe.observe(ctx).await
    }

    async fn apply(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        Err(ActionError::Refused(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{ActionRole, Applicability};

    const MINIMAL: &str = r#"
node:
  fqdn: DHCPSERVER.CONTOSO.LOCAL
  domain: CONTOSO.LOCAL
  os_family: Windows
server:
  domain_user: CONTOSO\dhcp_admin
  domain_pass: q1w2e3
scopes:
  192.168.10.0:
    start_range: 192.168.10.10
    end_range: 192.168.10.99
    subnet_mask: 255.255.255.0
    scope_name: LAN
failovers:
  DHCPSERVER <-> REMOTESERVER:
    partner_server: REMOTESERVER.CONTOSO.LOCAL
    scope_id: 192.168.10.0
"#;

    fn build(document: &str) -> Result<Catalog, ValidationError> {
        ResourceCatalog::build(&DesiredConfig::from_yaml_str(document).unwrap())
    }

    fn ids(catalog: &Catalog) -> Vec<&str> {
        catalog.actions.iter().map(|a| a.id.as_str()).collect()
    }

    fn find<'a>(catalog: &'a Catalog, id: &str) -> &'a ResourceAction {
        catalog
            .actions
            .iter()
            .find(|a| a.id.as_str() == id)
            .unwrap_or_else(|| panic!("no action '{id}'"))
    }

    #[test]
    fn test_minimal_document_expands_every_resource() {
        let catalog = build(MINIMAL).unwrap();
        let ids = ids(&catalog);

        for id in [
            "install DHCP feature",
            "add DHCP security groups",
            "add CONTOSO\\dhcp_admin to \"DHCP Administrators\"",
            "authorise server",
            "set conflict detection attempts",
            "dhcpserver service",
            "add 192.168.10.0",
            "set 192.168.10.0 start range",
            "set 192.168.10.0 dns domain",
            "add DHCPSERVER <-> REMOTESERVER",
            "set DHCPSERVER <-> REMOTESERVER autostatetransition",
        ] {
            assert!(ids.contains(&id), "missing {id}");
        }
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_unsupported_platform() {
        let err = build(&MINIMAL.replace("os_family: Windows", "os_family: Solaris")).unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedPlatform("Solaris".to_string()));
        assert!(err.to_string().contains("not supported on"));
    }

    #[test]
    fn test_failover_requires_declared_scope_creation() {
        let catalog = build(MINIMAL).unwrap();
        let create = find(&catalog, "add DHCPSERVER <-> REMOTESERVER");

        assert_eq!(create.role, ActionRole::Create);
        assert!(create.requires.contains(&"add 192.168.10.0".into()));
    }

    #[test]
    fn test_duplicate_failover_pair() {
        let document = format!(
            "{}  SECOND:\n    partner_server: remoteserver.contoso.local\n    scope_id: 192.168.10.0\n",
            MINIMAL
        );
        let err = build(&document).unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { .. }));
    }

    #[test]
    fn test_unknown_top_level_key() {
        let err = build(&format!("{}extras: 1\n", MINIMAL)).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownField { ref resource, .. } if resource == "document"));
    }

    #[test]
    fn test_mode_gated_actions_carry_plan_time_applicability() {
        let catalog = build(MINIMAL).unwrap();

        let reserve = find(&catalog, "set DHCPSERVER <-> REMOTESERVER reserve_percent");
        assert!(matches!(reserve.applicability, Applicability::Desired(false)));

        let balance = find(&catalog, "set DHCPSERVER <-> REMOTESERVER loadbalance_percent");
        assert!(matches!(balance.applicability, Applicability::Desired(true)));
    }
}
