//! Server role: feature install, security groups, directory authorisation,
//! server settings and the DHCP service.

use crate::catalog::{creation, set, setting};
use crate::config::{NodeFacts, Secret, ServerConfig};
use crate::powershell::{exists_probe, flag_probe, quote, value_probe, with_credential};
use crate::validate;
use converge_core::{ExecResource, ResourceAction, ResourceId, ValidationError, Value, ValueKind};
use converge_tools::{Command, Probe};
use std::sync::Arc;

/// Installs the role; every other server action requires it.
pub const INSTALL: &str = "install DHCP feature";
/// Creates the local DHCP security groups.
pub const SECURITY_GROUPS: &str = "add DHCP security groups";
/// Registers the server in the directory.
pub const AUTHORISE: &str = "authorise server";
/// Server-wide conflict detection setting.
pub const CONFLICT_DETECTION: &str = "set conflict detection attempts";
/// Keeps the service running; refreshed when configuration changes.
pub const SERVICE: &str = "dhcpserver service";

const ADMIN_GROUP: &str = "DHCP Administrators";
const INSTALLED: &str = "(Get-WindowsFeature DHCP).Installed";

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Node FQDN, as registered in the directory
    pub fqdn: String,
    /// Account used for authorisation
    pub domain_user: String,
    /// Its password
    pub domain_pass: Secret,
    /// Ping attempts before leasing
    pub conflict_detection_attempts: i64,
    /// Accounts added to DHCP Administrators; empty when membership is not
    /// managed
    pub administrators: Vec<String>,
}

impl ServerSettings {
    /// Validate and apply defaults.
    pub fn from_config(config: &ServerConfig, node: &NodeFacts) -> Result<Self, ValidationError> {
        const RESOURCE: &str = "server";

        validate::no_extra_fields(RESOURCE, &config.extra)?;

        let fqdn = validate::required("node", "fqdn", node.fqdn.as_ref())?.to_string();
        let domain_user = validate::required(RESOURCE, "domain_user", config.domain_user.as_ref())?
            .to_string();
        let domain_pass = config.domain_pass.clone().ok_or_else(|| ValidationError::MissingField {
            resource: RESOURCE.to_string(),
            field: "domain_pass".to_string(),
        })?;

        let conflict_detection_attempts = validate::ranged(
            RESOURCE,
            "conflict_detection_attempts",
            config.conflict_detection_attempts.unwrap_or(0),
            0,
            5,
        )?;

        let administrators = if config.populate_security_group.unwrap_or(true) {
            let admins = config
                .administrators
                .clone()
                .unwrap_or_else(|| vec![domain_user.clone()]);
            let mut seen = std::collections::HashSet::new();
            for admin in &admins {
                if !seen.insert(admin.to_ascii_lowercase()) {
                    return Err(ValidationError::Duplicate {
                        what: "administrator".to_string(),
                        name: admin.clone(),
                    });
                }
            }
            admins
        } else {
            Vec::new()
        };

        Ok(Self {
            fqdn,
            domain_user,
            domain_pass,
            conflict_detection_attempts,
            administrators,
        })
    }

    /// Id of the membership action for an account.
    pub fn membership_id(account: &str) -> String {
        format!("add {} to \"{}\"", account, ADMIN_GROUP)
    }

    /// Expand into actions. Configuration actions notify the service.
    pub fn actions(&self) -> Vec<ResourceAction> {
        let server = ResourceId::Server;
        let mut actions = Vec::new();

        actions.push(creation(
            INSTALL.to_string(),
            &server,
            exists_probe(INSTALLED),
            "Install-WindowsFeature DHCP -IncludeManagementTools".to_string(),
            Vec::new(),
        ));

        actions.push(
            setting(
                SECURITY_GROUPS.to_string(),
                &server,
                "security_groups",
                Value::Bool(true),
                ValueKind::Boolean,
                flag_probe(
                    INSTALLED,
                    &format!("$(net localgroup) -contains '*{}'", ADMIN_GROUP),
                ),
                "Add-DhcpServerSecurityGroup".to_string(),
            )
            .requires(INSTALL)
            .notify(SERVICE),
        );

        for account in &self.administrators {
            actions.push(
                setting(
                    Self::membership_id(account),
                    &server,
                    &format!("member {}", account),
                    Value::Bool(true),
                    ValueKind::Boolean,
                    flag_probe(
                        INSTALLED,
                        &format!(
                            "$(net localgroup {}) -contains {}",
                            quote(ADMIN_GROUP),
                            quote(account)
                        ),
                    ),
                    format!("net localgroup {} /ADD {}", quote(ADMIN_GROUP), quote(account)),
                )
                .requires(SECURITY_GROUPS)
                .before(AUTHORISE)
                .notify(SERVICE),
            );
        }

        let authorise = with_credential(
            &self.domain_user,
            self.domain_pass.expose(),
            "Add-DhcpServerInDC",
        );
        actions.push(
            setting(
                AUTHORISE.to_string(),
                &server,
                "authorised",
                Value::Bool(true),
                ValueKind::Boolean,
                flag_probe(
                    INSTALLED,
                    &format!("(Get-DhcpServerInDC).DnsName -contains {}", quote(&self.fqdn)),
                ),
                authorise,
            )
            .requires(INSTALL)
            .notify(SERVICE),
        );

        actions.push(
            setting(
                CONFLICT_DETECTION.to_string(),
                &server,
                "conflict_detection_attempts",
                Value::Integer(self.conflict_detection_attempts),
                ValueKind::Scalar,
                value_probe("(Get-DhcpServerSetting).ConflictDetectionAttempts"),
                format!(
                    "Set-DhcpServerSetting -ConflictDetectionAttempts {}",
                    self.conflict_detection_attempts
                ),
            )
            .requires(INSTALL)
            .notify(SERVICE),
        );

        actions.push(service(&server));
        actions
    }
}

fn service(server: &ResourceId) -> ResourceAction {
    let running = Value::Bool(true);
    let capability = ExecResource::new(
        Probe::attribute(
            server.key(),
            "running",
            flag_probe(
                "Get-Service dhcpserver -ErrorAction SilentlyContinue",
                "(Get-Service dhcpserver).Status -eq 'Running'",
            ),
        ),
        ValueKind::Boolean,
        Command::new(SERVICE, "Start-Service dhcpserver").with_effect(set(server, "running", &running)),
    )
    .with_refresh(
        Command::new(format!("{} restart", SERVICE), "Restart-Service dhcpserver")
            .with_effect(set(server, "running", &running)),
    );

    ResourceAction::service(SERVICE, server.clone(), Arc::new(capability)).requires(INSTALL)
}
