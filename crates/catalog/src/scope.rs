//! Scopes: one creation action per subnet plus one action per settable field.

use crate::catalog::{creation, immutable, set, setting};
use crate::config::{NodeFacts, OneOrMany, ScopeConfig};
use crate::powershell::{arg, bool_literal, exists_probe, list_arg, lowercase_probe, quote, value_probe};
use crate::server;
use crate::validate;
use converge_core::{ResourceAction, ResourceId, ValidationError, Value, ValueKind};
use std::net::Ipv4Addr;

const STATES: &[&str] = &["active", "inactive"];
const TYPES: &[&str] = &["dhcp", "bootp", "both"];

/// Validated scope settings with defaults applied.
#[derive(Debug, Clone)]
pub struct ScopeSettings {
    /// Subnet id
    pub subnet: String,
    /// First leasable address
    pub start_range: Ipv4Addr,
    /// Last leasable address
    pub end_range: Ipv4Addr,
    /// Subnet mask
    pub subnet_mask: Ipv4Addr,
    /// Display name
    pub name: String,
    /// Description, when supplied
    pub description: Option<String>,
    /// DNS domain option
    pub dns_domain: Option<String>,
    /// DNS server option
    pub dns_server: Option<OneOrMany>,
    /// Router option
    pub router: Option<OneOrMany>,
    /// Policy evaluation
    pub activate_policies: bool,
    /// Offer delay in milliseconds
    pub delay: i64,
    /// Lease duration time span
    pub lease_duration: String,
    /// BOOTP client limit
    pub max_bootp_clients: i64,
    /// `active` or `inactive`
    pub state: String,
    /// `dhcp`, `bootp` or `both`
    pub scope_type: String,
}

impl ScopeSettings {
    /// Validate a scope entry.
    pub fn from_config(
        subnet: &str,
        config: &ScopeConfig,
        node: &NodeFacts,
    ) -> Result<Self, ValidationError> {
        let resource = ResourceId::scope(subnet).to_string();
        let resource = resource.as_str();

        validate::no_extra_fields(resource, &config.extra)?;
        validate::ipv4(resource, "subnet", subnet)?;

        let address = |field: &str, value: Option<&String>| {
            validate::required(resource, field, value).and_then(|v| validate::ipv4(resource, field, v))
        };
        let start_range = address("start_range", config.start_range.as_ref())?;
        let end_range = address("end_range", config.end_range.as_ref())?;
        let subnet_mask = address("subnet_mask", config.subnet_mask.as_ref())?;
        let name = validate::required(resource, "scope_name", config.scope_name.as_ref())?.to_string();

        if start_range > end_range {
            return Err(validate::invalid(
                resource,
                "end_range",
                &end_range.to_string(),
                &format!("precedes start_range {}", start_range),
            ));
        }

        let addresses = |field: &str, value: &Option<OneOrMany>| -> Result<(), ValidationError> {
            for address in value.iter().flat_map(OneOrMany::to_vec) {
                validate::ipv4(resource, field, &address)?;
            }
            Ok(())
        };
        addresses("dns_server", &config.dns_server)?;
        addresses("router", &config.router)?;

        let lease_duration = match &config.lease_duration {
            Some(text) => validate::duration(resource, "lease_duration", text)?.0,
            None => "8.00:00:00".to_string(),
        };

        let delay = validate::ranged(resource, "delay", config.delay.unwrap_or(0), 0, 65535)?;
        let max_bootp_clients = validate::ranged(
            resource,
            "max_bootp_clients",
            config.max_bootp_clients.unwrap_or(i64::from(u32::MAX)),
            0,
            i64::from(u32::MAX),
        )?;

        let state = match &config.state {
            Some(state) => validate::one_of(resource, "state", state, STATES)?,
            None => "active".to_string(),
        };
        let scope_type = match &config.scope_type {
            Some(kind) => validate::one_of(resource, "type", kind, TYPES)?,
            None => "dhcp".to_string(),
        };

        Ok(Self {
            subnet: subnet.to_string(),
            start_range,
            end_range,
            subnet_mask,
            name,
            description: config.description.clone(),
            dns_domain: config.dns_domain.clone().or_else(|| node.domain.clone()),
            dns_server: config.dns_server.clone(),
            router: config.router.clone(),
            activate_policies: config.activate_policies.unwrap_or(true),
            delay,
            lease_duration,
            max_bootp_clients,
            state,
            scope_type,
        })
    }

    /// Id of the creation action.
    pub fn create_id(&self) -> String {
        format!("add {}", self.subnet)
    }

    fn id(&self, field: &str) -> String {
        format!("set {} {}", self.subnet, field)
    }

    fn set_command(&self, parameter: &str, value: &str) -> String {
        format!("Set-DhcpServerv4Scope {} -{} {}", self.subnet, parameter, value)
    }

    fn scope_probe(&self, property: &str) -> String {
        value_probe(&format!("(Get-DhcpServerv4Scope {}).{}", self.subnet, property))
    }

    fn option_probe(&self, option: u8) -> String {
        value_probe(&format!(
            "(Get-DhcpServerv4OptionValue -ScopeId {} -OptionId {}).Value",
            self.subnet, option
        ))
    }

    /// Attribute name and rendered value of everything creation sets.
    fn initial_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("start_range", Value::from(self.start_range.to_string())),
            ("end_range", Value::from(self.end_range.to_string())),
            ("subnet_mask", Value::from(self.subnet_mask.to_string())),
            ("name", Value::from(self.name.as_str())),
            ("description", Value::from(self.description.clone().unwrap_or_default())),
            ("activate_policies", Value::Bool(self.activate_policies)),
            ("delay", Value::Integer(self.delay)),
            ("lease_duration", Value::from(self.lease_duration.as_str())),
            ("max_bootp_clients", Value::Integer(self.max_bootp_clients)),
            ("state", Value::from(self.state.as_str())),
            ("type", Value::from(self.scope_type.as_str())),
        ]
    }

    /// Expand into actions; every attribute action requires the creation
    /// action.
    pub fn actions(&self) -> Vec<ResourceAction> {
        let resource = ResourceId::scope(&self.subnet);
        let create_id = self.create_id();

        let options = format!(
            "-EndRange {} -StartRange {} -SubnetMask {} -Name {} -Description {} \
             -ActivatePolicies {} -Delay {} -LeaseDuration {} -MaxBootpClients {} -State {} -Type {}",
            self.end_range,
            self.start_range,
            self.subnet_mask,
            arg(&self.name),
            quote(self.description.as_deref().unwrap_or_default()),
            bool_literal(self.activate_policies),
            self.delay,
            self.lease_duration,
            self.max_bootp_clients,
            self.state,
            self.scope_type,
        );

        let initial = self
            .initial_values()
            .iter()
            .map(|(attribute, value)| set(&resource, attribute, value))
            .collect();

        let mut actions = vec![creation(
            create_id.clone(),
            &resource,
            exists_probe(&format!("Get-DhcpServerv4Scope {}", self.subnet)),
            format!("Add-DhcpServerv4Scope {}", options),
            initial,
        )
        .requires(server::INSTALL)];

        let mut attributes = vec![
            setting(
                self.id("start range"),
                &resource,
                "start_range",
                Value::from(self.start_range.to_string()),
                ValueKind::Scalar,
                self.scope_probe("StartRange.IPAddressToString"),
                self.set_command("StartRange", &self.start_range.to_string()),
            ),
            setting(
                self.id("end range"),
                &resource,
                "end_range",
                Value::from(self.end_range.to_string()),
                ValueKind::Scalar,
                self.scope_probe("EndRange.IPAddressToString"),
                self.set_command("EndRange", &self.end_range.to_string()),
            ),
            setting(
                self.id("name"),
                &resource,
                "name",
                Value::from(self.name.as_str()),
                ValueKind::Scalar,
                self.scope_probe("Name"),
                self.set_command("Name", &arg(&self.name)),
            ),
            immutable(
                self.id("subnet mask"),
                &resource,
                "subnet_mask",
                Value::from(self.subnet_mask.to_string()),
                self.scope_probe("SubnetMask.IPAddressToString"),
                format!(
                    "the subnet mask of scope {} cannot be changed in place; recreate the scope",
                    self.subnet
                ),
            ),
        ];

        if let Some(description) = &self.description {
            attributes.push(setting(
                self.id("description"),
                &resource,
                "description",
                Value::from(description.as_str()),
                ValueKind::Scalar,
                self.scope_probe("Description"),
                self.set_command("Description", &quote(description)),
            ));
        }

        if let Some(domain) = &self.dns_domain {
            attributes.push(setting(
                self.id("dns domain"),
                &resource,
                "dns_domain",
                Value::from(domain.as_str()),
                ValueKind::Scalar,
                self.option_probe(15),
                format!("Set-DhcpServerv4OptionValue {} -DnsDomain {}", self.subnet, arg(domain)),
            ));
        }

        for (field, parameter, option, value) in [
            ("dns server", "DnsServer", 6, &self.dns_server),
            ("router", "Router", 3, &self.router),
        ] {
            let Some(value) = value else {
                continue;
            };
            let addresses = value.to_vec();
            attributes.push(setting(
                self.id(field),
                &resource,
                &field.replace(' ', "_"),
                Value::List(addresses.clone()),
                ValueKind::UnorderedSet,
                self.option_probe(option),
                format!(
                    "Set-DhcpServerv4OptionValue {} -{} {}",
                    self.subnet,
                    parameter,
                    list_arg(&addresses, value.is_list())
                ),
            ));
        }

        attributes.extend([
            setting(
                self.id("activate_policies"),
                &resource,
                "activate_policies",
                Value::Bool(self.activate_policies),
                ValueKind::Boolean,
                self.scope_probe("ActivatePolicies"),
                self.set_command("ActivatePolicies", bool_literal(self.activate_policies)),
            ),
            setting(
                self.id("delay"),
                &resource,
                "delay",
                Value::Integer(self.delay),
                ValueKind::Scalar,
                self.scope_probe("Delay"),
                self.set_command("Delay", &self.delay.to_string()),
            ),
            setting(
                self.id("lease_duration"),
                &resource,
                "lease_duration",
                Value::from(self.lease_duration.as_str()),
                ValueKind::Duration,
                self.scope_probe("LeaseDuration"),
                self.set_command("LeaseDuration", &self.lease_duration),
            ),
            setting(
                self.id("max_bootp_clients"),
                &resource,
                "max_bootp_clients",
                Value::Integer(self.max_bootp_clients),
                ValueKind::Scalar,
                self.scope_probe("MaxBootpClients"),
                self.set_command("MaxBootpClients", &self.max_bootp_clients.to_string()),
            ),
            setting(
                self.id("state"),
                &resource,
                "state",
                Value::from(self.state.as_str()),
                ValueKind::Scalar,
                lowercase_probe(&format!("(Get-DhcpServerv4Scope {}).State", self.subnet)),
                self.set_command("State", &self.state),
            ),
            setting(
                self.id("type"),
                &resource,
                "type",
                Value::from(self.scope_type.as_str()),
                ValueKind::Scalar,
                lowercase_probe(&format!("(Get-DhcpServerv4Scope {}).Type", self.subnet)),
                self.set_command("Type", &self.scope_type),
            ),
        ]);

        actions.extend(attributes.into_iter().map(|a| a.requires(create_id.as_str())));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{ActionId, ActionRole, State};

    fn node() -> NodeFacts {
        NodeFacts {
            fqdn: Some("DHCPSERVER.CONTOSO.LOCAL".to_string()),
            domain: Some("CONTOSO.LOCAL".to_string()),
            ..NodeFacts::default()
        }
    }

    fn lan() -> ScopeConfig {
        ScopeConfig {
            start_range: Some("192.168.10.10".to_string()),
            end_range: Some("192.168.10.99".to_string()),
            subnet_mask: Some("255.255.255.0".to_string()),
            scope_name: Some("LAN".to_string()),
            ..ScopeConfig::default()
        }
    }

    fn parse(config: ScopeConfig) -> Result<ScopeSettings, ValidationError> {
        ScopeSettings::from_config("192.168.10.0", &config, &node())
    }

    fn action<'a>(actions: &'a [ResourceAction], id: &str) -> &'a ResourceAction {
        actions
            .iter()
            .find(|a| a.id.as_str() == id)
            .unwrap_or_else(|| panic!("no action '{id}'"))
    }

    #[test]
    fn test_defaults() {
        let scope = parse(lan()).unwrap();

        assert!(scope.activate_policies);
        assert_eq!(scope.delay, 0);
        assert_eq!(scope.lease_duration, "8.00:00:00");
        assert_eq!(scope.max_bootp_clients, 4294967295);
        assert_eq!(scope.state, "active");
        assert_eq!(scope.scope_type, "dhcp");
        assert_eq!(scope.dns_domain.as_deref(), Some("CONTOSO.LOCAL"));
    }

    #[test]
    fn test_every_attribute_requires_creation() {
        let actions = parse(lan()).unwrap().actions();
        let create = ActionId::new("add 192.168.10.0");

        assert_eq!(actions[0].id, create);
        assert_eq!(actions[0].role, ActionRole::Create);
        for action in &actions[1..] {
            assert!(action.requires.contains(&create), "{}", action.id);
        }
    }

    #[test]
    fn test_optional_attributes_only_when_supplied() {
        let ids: Vec<String> = parse(lan()).unwrap().actions().iter().map(|a| a.id.to_string()).collect();
        assert!(!ids.contains(&"set 192.168.10.0 description".to_string()));
        assert!(!ids.contains(&"set 192.168.10.0 dns server".to_string()));
        assert!(!ids.contains(&"set 192.168.10.0 router".to_string()));

        let config = ScopeConfig {
            description: Some("Local Area Network".to_string()),
            dns_server: Some(OneOrMany::Many(vec![
                "192.168.10.100".to_string(),
                "192.168.10.200".to_string(),
            ])),
            router: Some(OneOrMany::One("192.168.10.1".to_string())),
            ..lan()
        };
        let actions = parse(config).unwrap().actions();

        let dns = action(&actions, "set 192.168.10.0 dns server");
        assert_eq!(dns.kind, ValueKind::UnorderedSet);
        assert_eq!(
            dns.desired,
            State::present(vec!["192.168.10.100".to_string(), "192.168.10.200".to_string()])
        );
        assert!(dns.satisfied_by(&State::present(vec![
            "192.168.10.200".to_string(),
            "192.168.10.100".to_string(),
        ])));

        let router = action(&actions, "set 192.168.10.0 router");
        assert!(router.satisfied_by(&State::present("192.168.10.1")));
        action(&actions, "set 192.168.10.0 description");
    }

    #[test]
    fn test_lease_duration_compares_as_time_span() {
        let actions = parse(lan()).unwrap().actions();
        let lease = action(&actions, "set 192.168.10.0 lease_duration");

        assert!(lease.satisfied_by(&State::present("8.00:00:00")));
        assert!(lease.satisfied_by(&State::present("8")));
        assert!(!lease.satisfied_by(&State::present("1.00:00:00")));
    }

    #[test]
    fn test_missing_required_field() {
        let config = ScopeConfig {
            scope_name: None,
            ..lan()
        };
        assert!(matches!(
            parse(config),
            Err(ValidationError::MissingField { ref field, .. }) if field == "scope_name"
        ));
    }

    #[test]
    fn test_invalid_addresses() {
        let config = ScopeConfig {
            start_range: Some("192.168.10.300".to_string()),
            ..lan()
        };
        assert!(matches!(parse(config), Err(ValidationError::InvalidValue { .. })));

        let config = ScopeConfig {
            start_range: Some("192.168.10.100".to_string()),
            end_range: Some("192.168.10.10".to_string()),
            ..lan()
        };
        assert!(matches!(parse(config), Err(ValidationError::InvalidValue { .. })));

        assert!(ScopeSettings::from_config("lan", &lan(), &node()).is_err());
    }

    #[test]
    fn test_ranges_and_enumerations() {
        let config = ScopeConfig {
            delay: Some(70000),
            ..lan()
        };
        assert!(matches!(parse(config), Err(ValidationError::OutOfRange { .. })));

        let config = ScopeConfig {
            max_bootp_clients: Some(4294967296),
            ..lan()
        };
        assert!(matches!(parse(config), Err(ValidationError::OutOfRange { .. })));

        let config = ScopeConfig {
            state: Some("paused".to_string()),
            ..lan()
        };
        assert!(matches!(parse(config), Err(ValidationError::InvalidValue { .. })));

        for kind in ["bootp", "dhcp", "both"] {
            let config = ScopeConfig {
                scope_type: Some(kind.to_string()),
                ..lan()
            };
            assert_eq!(parse(config).unwrap().scope_type, kind);
        }
    }

    #[test]
    fn test_no_dns_domain_without_node_domain() {
        let node = NodeFacts {
            fqdn: Some("DHCPSERVER".to_string()),
            ..NodeFacts::default()
        };
        let scope = ScopeSettings::from_config("192.168.10.0", &lan(), &node).unwrap();
        assert!(scope.dns_domain.is_none());
        assert!(!scope
            .actions()
            .iter()
            .any(|a| a.id.as_str() == "set 192.168.10.0 dns domain"));
    }
}
