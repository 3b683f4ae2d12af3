//! Failover relationships between this server and a partner.

use crate::catalog::{creation, set, setting, CatalogWarning};
use crate::config::{FailoverConfig, Secret};
use crate::powershell::{
    array, arg, bool_literal, exists_probe, list_arg, lowercase_probe, quote, value_probe,
};
use crate::scope::ScopeSettings;
use crate::server;
use crate::validate;
use converge_core::{Applicability, ResourceAction, ResourceId, ValidationError, Value, ValueKind};

/// Mode-specific settings. Only the fields of the selected mode exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverMode {
    /// Both servers serve clients
    LoadBalance {
        /// Share served by this server
        percent: i64,
    },
    /// One server serves, the other waits
    HotStandby {
        /// Addresses reserved for the standby
        reserve_percent: i64,
        /// `active` or `standby`
        server_role: String,
    },
}

impl FailoverMode {
    /// Name as the host prints it, lower case.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadBalance { .. } => "loadbalance",
            Self::HotStandby { .. } => "hotstandby",
        }
    }

    fn is_load_balance(&self) -> bool {
        matches!(self, Self::LoadBalance { .. })
    }
}

/// Validated relationship settings.
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// Relationship name
    pub name: String,
    /// Partner FQDN
    pub partner_server: String,
    /// Scope ids, as supplied
    pub scope_ids: Vec<String>,
    /// Whether `scope_id` was supplied as a list
    scope_list: bool,
    /// Mode and its settings
    pub mode: FailoverMode,
    /// Maximum client lead time
    pub max_client_lead_time: String,
    /// State switch interval
    pub state_switch_interval: String,
    /// Derived from the interval: a zero interval disables the automatic
    /// transition
    pub auto_state_transition: bool,
    /// Message authentication secret
    pub shared_secret: Option<Secret>,
}

impl FailoverSettings {
    /// Validate a relationship. Fields belonging to the other mode are
    /// ignored and reported through `warnings`.
    pub fn from_config(
        name: &str,
        config: &FailoverConfig,
        node_fqdn: &str,
        warnings: &mut Vec<CatalogWarning>,
    ) -> Result<Self, ValidationError> {
        let id = ResourceId::failover(name);
        let resource = id.to_string();
        let resource = resource.as_str();

        validate::no_extra_fields(resource, &config.extra)?;

        let partner_server =
            validate::required(resource, "partner_server", config.partner_server.as_ref())?
                .to_string();
        if partner_server.eq_ignore_ascii_case(node_fqdn) {
            return Err(validate::invalid(
                resource,
                "partner_server",
                &partner_server,
                "a server cannot be its own failover partner",
            ));
        }

        let scope = config.scope_id.as_ref().ok_or_else(|| ValidationError::MissingField {
            resource: resource.to_string(),
            field: "scope_id".to_string(),
        })?;
        let scope_ids = scope.to_vec();
        if scope_ids.is_empty() {
            return Err(ValidationError::MissingField {
                resource: resource.to_string(),
                field: "scope_id".to_string(),
            });
        }
        for scope_id in &scope_ids {
            validate::ipv4(resource, "scope_id", scope_id)?;
        }

        let mode_name = match &config.mode {
            Some(mode) => validate::one_of(resource, "mode", mode, &["loadbalance", "hotstandby"])?,
            None => "loadbalance".to_string(),
        };

        let mut ignore = |field: &str, supplied: bool| {
            if supplied {
                warnings.push(CatalogWarning {
                    resource: id.clone(),
                    field: field.to_string(),
                    message: format!("is ignored in {} mode", mode_name),
                });
            }
        };

        let percent = |field: &str, value: Option<i64>, default: i64| {
            validate::ranged(resource, field, value.unwrap_or(default), 0, 100)
        };

        let mode = if mode_name == "loadbalance" {
            ignore("reserve_percent", config.reserve_percent.is_some());
            ignore("server_role", config.server_role.is_some());
            FailoverMode::LoadBalance {
                percent: percent("loadbalance_percent", config.loadbalance_percent, 50)?,
            }
        } else {
            ignore("loadbalance_percent", config.loadbalance_percent.is_some());
            FailoverMode::HotStandby {
                reserve_percent: percent("reserve_percent", config.reserve_percent, 5)?,
                server_role: match &config.server_role {
                    Some(role) => validate::one_of(resource, "server_role", role, &["active", "standby"])?,
                    None => "active".to_string(),
                },
            }
        };

        let time_span = |field: &str, value: &Option<String>| match value {
            Some(text) => validate::duration(resource, field, text),
            None => validate::duration(resource, field, "1:00:00"),
        };
        let (max_client_lead_time, _) = time_span("max_client_lead_time", &config.max_client_lead_time)?;
        let (state_switch_interval, interval) =
            time_span("state_switch_interval", &config.state_switch_interval)?;

        Ok(Self {
            name: name.to_string(),
            partner_server,
            scope_ids,
            scope_list: scope.is_list(),
            mode,
            max_client_lead_time,
            state_switch_interval,
            auto_state_transition: !interval.is_zero(),
            shared_secret: config.shared_secret.clone(),
        })
    }

    /// Servers in the relationship, unordered.
    pub fn pair_key(&self, node_fqdn: &str) -> (String, String) {
        let a = node_fqdn.to_ascii_lowercase();
        let b = self.partner_server.to_ascii_lowercase();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Id of the creation action.
    pub fn create_id(&self) -> String {
        format!("add {}", self.name)
    }

    fn id(&self, field: &str) -> String {
        format!("set {} {}", self.name, field)
    }

    fn set_command(&self, parameter: &str, value: &str) -> String {
        format!("Set-DhcpServerv4Failover {} -{} {}", quote(&self.name), parameter, value)
    }

    fn property(&self, property: &str) -> String {
        format!("(Get-DhcpServerv4Failover {}).{}", quote(&self.name), property)
    }

    fn mode_values(&self) -> (i64, i64, &str) {
        match &self.mode {
            FailoverMode::LoadBalance { percent } => (*percent, 5, "active"),
            FailoverMode::HotStandby {
                reserve_percent,
                server_role,
            } => (50, *reserve_percent, server_role.as_str()),
        }
    }

    /// Expand into actions. `declared` are the scopes of this document the
    /// relationship covers; their creation runs first.
    pub fn actions(&self, declared: &[&ScopeSettings]) -> Vec<ResourceAction> {
        let resource = ResourceId::failover(&self.name);
        let create_id = self.create_id();
        let load_balance = self.mode.is_load_balance();
        let (percent, reserve_percent, server_role) = self.mode_values();

        let mode_options = match &self.mode {
            FailoverMode::LoadBalance { percent } => format!("-LoadBalancePercent {}", percent),
            FailoverMode::HotStandby {
                reserve_percent,
                server_role,
            } => format!("-ReservePercent {} -ServerRole {}", reserve_percent, server_role),
        };
        let secret = self.shared_secret.as_ref().map(Secret::expose).unwrap_or_default();
        let command = format!(
            "Add-DhcpServerv4Failover -Name {} -ScopeId {} -PartnerServer {} \
             -AutoStateTransition {} -MaxClientLeadTime {} -SharedSecret {} -StateSwitchInterval {} {} -Force",
            quote(&self.name),
            list_arg(&self.scope_ids, self.scope_list),
            arg(&self.partner_server),
            bool_literal(self.auto_state_transition),
            self.max_client_lead_time,
            quote(secret),
            self.state_switch_interval,
            mode_options,
        );

        let mut initial = vec![
            ("mode", Value::from(self.mode.name())),
            ("scope_id", Value::List(self.scope_ids.clone())),
            ("max_client_lead_time", Value::from(self.max_client_lead_time.as_str())),
            ("state_switch_interval", Value::from(self.state_switch_interval.as_str())),
            ("auto_state_transition", Value::Bool(self.auto_state_transition)),
        ];
        if load_balance {
            initial.push(("loadbalance_percent", Value::Integer(percent)));
        } else {
            initial.push(("reserve_percent", Value::Integer(reserve_percent)));
            initial.push(("server_role", Value::from(server_role)));
        }

        let mut create = creation(
            create_id.clone(),
            &resource,
            exists_probe(&format!(
                "Get-DhcpServerv4Failover {} -ErrorAction SilentlyContinue",
                quote(&self.name)
            )),
            command,
            initial.iter().map(|(attr, value)| set(&resource, attr, value)).collect(),
        )
        .requires(server::INSTALL);
        for scope in declared {
            create = create.requires(scope.create_id());
        }

        let mode_id = self.id("mode");
        let attributes = vec![
            setting(
                mode_id.clone(),
                &resource,
                "mode",
                Value::from(self.mode.name()),
                ValueKind::Scalar,
                lowercase_probe(&self.property("Mode")),
                self.set_command("Mode", self.mode.name()),
            ),
            setting(
                self.id("subnets"),
                &resource,
                "scope_id",
                Value::List(self.scope_ids.clone()),
                ValueKind::UnorderedSet,
                value_probe(&self.property("ScopeId")),
                self.subnets_script(),
            ),
            setting(
                self.id("loadbalance_percent"),
                &resource,
                "loadbalance_percent",
                Value::Integer(percent),
                ValueKind::Scalar,
                value_probe(&self.property("LoadBalancePercent")),
                self.set_command("LoadBalancePercent", &percent.to_string()),
            )
            .requires(mode_id.as_str())
            .with_applicability(Applicability::Desired(load_balance)),
            setting(
                self.id("max_client_lead_time"),
                &resource,
                "max_client_lead_time",
                Value::from(self.max_client_lead_time.as_str()),
                ValueKind::Duration,
                value_probe(&self.property("MaxClientLeadTime")),
                self.set_command("MaxClientLeadTime", &self.max_client_lead_time),
            ),
            setting(
                self.id("reserve_percent"),
                &resource,
                "reserve_percent",
                Value::Integer(reserve_percent),
                ValueKind::Scalar,
                value_probe(&self.property("ReservePercent")),
                self.set_command("ReservePercent", &reserve_percent.to_string()),
            )
            .requires(mode_id.as_str())
            .with_applicability(Applicability::Desired(!load_balance)),
            setting(
                self.id("server_role"),
                &resource,
                "server_role",
                Value::from(server_role),
                ValueKind::Scalar,
                lowercase_probe(&self.property("ServerRole")),
                self.set_command("ServerRole", server_role),
            )
            .requires(mode_id.as_str())
            .with_applicability(Applicability::Desired(!load_balance)),
            setting(
                self.id("state_switch_interval"),
                &resource,
                "state_switch_interval",
                Value::from(self.state_switch_interval.as_str()),
                ValueKind::Duration,
                value_probe(&self.property("StateSwitchInterval")),
                self.set_command("StateSwitchInterval", &self.state_switch_interval),
            ),
            setting(
                self.id("autostatetransition"),
                &resource,
                "auto_state_transition",
                Value::Bool(self.auto_state_transition),
                ValueKind::Boolean,
                value_probe(&self.property("AutoStateTransition")),
                self.set_command("AutoStateTransition", bool_literal(self.auto_state_transition)),
            ),
        ];

        let mut actions = vec![create];
        actions.extend(attributes.into_iter().map(|a| a.requires(create_id.as_str())));
        actions
    }

    /// Add missing scope ids and remove extra ones in one pass.
    fn subnets_script(&self) -> String {
        let name = quote(&self.name);
        format!(
            "$desired = {}; \
             $current = @({} | ForEach-Object {{ \"$_\" }}); \
             $missing = @($desired | Where-Object {{ $current -notcontains $_ }}); \
             $extra = @($current | Where-Object {{ $desired -notcontains $_ }}); \
             if ($missing.Count -gt 0) {{ Add-DhcpServerv4FailoverScope -Name {} -ScopeId $missing }}; \
             if ($extra.Count -gt 0) {{ Remove-DhcpServerv4FailoverScope -Name {} -ScopeId $extra -Force }}",
            array(&self.scope_ids),
            self.property("ScopeId"),
            name,
            name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OneOrMany;
    use converge_core::{ActionId, State};

    const NODE: &str = "DHCPSERVER.CONTOSO.LOCAL";
    const NAME: &str = "DHCPSERVER <-> REMOTESERVER";

    fn config() -> FailoverConfig {
        FailoverConfig {
            partner_server: Some("REMOTESERVER.CONTOSO.LOCAL".to_string()),
            scope_id: Some(OneOrMany::One("192.168.10.0".to_string())),
            ..FailoverConfig::default()
        }
    }

    fn parse(config: FailoverConfig) -> (FailoverSettings, Vec<CatalogWarning>) {
        let mut warnings = Vec::new();
        let failover = FailoverSettings::from_config(NAME, &config, NODE, &mut warnings).unwrap();
        (failover, warnings)
    }

    fn planned(failover: &FailoverSettings) -> Vec<String> {
        failover.actions(&[])
            .into_iter()
            .filter(|a| a.applicability.at_plan_time())
            .map(|a| a.id.to_string())
            .collect()
    }

    fn action(failover: &FailoverSettings, field: &str) -> ResourceAction {
        let id = format!("set {} {}", NAME, field);
        failover.actions(&[])
            .into_iter()
            .find(|a| a.id.as_str() == id)
            .unwrap_or_else(|| panic!("no action '{id}'"))
    }

    #[test]
    fn test_defaults() {
        let (failover, warnings) = parse(config());

        assert_eq!(failover.mode, FailoverMode::LoadBalance { percent: 50 });
        assert_eq!(failover.max_client_lead_time, "1:00:00");
        assert_eq!(failover.state_switch_interval, "1:00:00");
        assert!(failover.auto_state_transition);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_load_balance_mode_excludes_standby_settings() {
        let (failover, _) = parse(config());
        let ids = planned(&failover);

        assert!(ids.contains(&format!("set {} loadbalance_percent", NAME)));
        assert!(!ids.contains(&format!("set {} reserve_percent", NAME)));
        assert!(!ids.contains(&format!("set {} server_role", NAME)));
    }

    #[test]
    fn test_hot_standby_mode_excludes_load_balance_percent() {
        let (failover, _) = parse(FailoverConfig {
            mode: Some("hotstandby".to_string()),
            server_role: Some("standby".to_string()),
            ..config()
        });
        let ids = planned(&failover);

        assert!(!ids.contains(&format!("set {} loadbalance_percent", NAME)));
        assert!(ids.contains(&format!("set {} reserve_percent", NAME)));
        assert_eq!(
            action(&failover, "server_role").desired,
            State::present("standby")
        );
    }

    #[test]
    fn test_mismatched_mode_fields_are_warnings() {
        let (failover, warnings) = parse(FailoverConfig {
            reserve_percent: Some(150),
            server_role: Some("standby".to_string()),
            ..config()
        });

        assert_eq!(failover.mode, FailoverMode::LoadBalance { percent: 50 });
        let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec!["reserve_percent", "server_role"]);
    }

    #[test]
    fn test_zero_interval_disables_auto_state_transition() {
        let (failover, _) = parse(FailoverConfig {
            state_switch_interval: Some("0".to_string()),
            ..config()
        });
        assert_eq!(
            action(&failover, "autostatetransition").desired,
            State::present(false)
        );
        assert_eq!(
            action(&failover, "state_switch_interval").desired,
            State::present("0")
        );

        let (failover, _) = parse(FailoverConfig {
            state_switch_interval: Some("1:00:00".to_string()),
            ..config()
        });
        assert_eq!(
            action(&failover, "autostatetransition").desired,
            State::present(true)
        );
    }

    #[test]
    fn test_subnets_accept_one_or_many() {
        let (one, _) = parse(config());
        let (many, _) = parse(FailoverConfig {
            scope_id: Some(OneOrMany::Many(vec![
                "192.168.10.0".to_string(),
                "192.168.20.0".to_string(),
            ])),
            ..config()
        });

        let subnets = action(&one, "subnets");
        assert!(subnets.satisfied_by(&State::present(vec!["192.168.10.0".to_string()])));
        assert!(subnets.satisfied_by(&State::present("192.168.10.0")));

        let subnets = action(&many, "subnets");
        assert_eq!(subnets.kind, ValueKind::UnorderedSet);
        assert!(subnets.satisfied_by(&State::present(vec![
            "192.168.20.0".to_string(),
            "192.168.10.0".to_string(),
        ])));
        assert!(!subnets.satisfied_by(&State::present(vec!["192.168.10.0".to_string()])));
    }

    #[test]
    fn test_validation() {
        let mut warnings = Vec::new();
        let check = |config: FailoverConfig, warnings: &mut Vec<CatalogWarning>| {
            FailoverSettings::from_config(NAME, &config, NODE, warnings)
        };

        assert!(matches!(
            check(FailoverConfig { partner_server: None, ..config() }, &mut warnings),
            Err(ValidationError::MissingField { .. })
        ));
        assert!(matches!(
            check(FailoverConfig { scope_id: None, ..config() }, &mut warnings),
            Err(ValidationError::MissingField { .. })
        ));
        assert!(matches!(
            check(FailoverConfig { loadbalance_percent: Some(101), ..config() }, &mut warnings),
            Err(ValidationError::OutOfRange { max: 100, .. })
        ));
        assert!(matches!(
            check(FailoverConfig { mode: Some("roundrobin".to_string()), ..config() }, &mut warnings),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            check(
                FailoverConfig { partner_server: Some(NODE.to_lowercase()), ..config() },
                &mut warnings
            ),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            check(
                FailoverConfig { max_client_lead_time: Some("later".to_string()), ..config() },
                &mut warnings
            ),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_pair_key_is_unordered() {
        let (failover, _) = parse(config());
        assert_eq!(failover.pair_key(NODE), failover.pair_key(&NODE.to_lowercase()));
        let (a, b) = failover.pair_key(NODE);
        assert!(a <= b);
    }

    #[test]
    fn test_mode_settings_follow_mode_switch() {
        let (failover, _) = parse(config());
        let mode_id = ActionId::new(format!("set {} mode", NAME));
        assert!(action(&failover, "loadbalance_percent").requires.contains(&mode_id));
    }
}
