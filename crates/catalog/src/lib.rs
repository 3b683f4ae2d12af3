//! DHCP server resource catalog
//!
//! Reads a desired-configuration document, validates it and expands it
//! into the resource actions the convergence engine executes: the server
//! role, its IPv4 scopes and failover relationships with partner servers.

#![warn(missing_docs)]

pub mod config;
pub mod validate;
pub mod powershell;

mod catalog;
mod server;
mod scope;
mod failover;

pub use catalog::{Catalog, CatalogWarning, ResourceCatalog};
pub use config::{
    DesiredConfig, FailoverConfig, NodeFacts, OneOrMany, ScopeConfig, Secret, ServerConfig,
};
pub use failover::{FailoverMode, FailoverSettings};
pub use scope::ScopeSettings;
pub use server::{ServerSettings, AUTHORISE, CONFLICT_DETECTION, INSTALL, SECURITY_GROUPS, SERVICE};
