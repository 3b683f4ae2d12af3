//! In-memory host.
//!
//! Keeps resources as attribute maps, answers probes from them and applies
//! the declared [`Effect`]s of every command it runs. Used by `--simulate`
//! and by tests, which can also inject command failures.

use super::r#trait::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

type Resources = BTreeMap<String, BTreeMap<String, String>>;

/// A simulated host implementing both [`Executor`] and [`StateQuery`].
#[derive(Default)]
pub struct MemoryHost {
    resources: Mutex<Resources>,
    failing: HashSet<String>,
    failing_probes: HashSet<String>,
    executed: Mutex<Vec<String>>,
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing resource.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.get_mut().entry(resource.into()).or_default();
        self
    }

    /// Seed an attribute value (creating the resource if needed).
    pub fn with_attribute(
        mut self,
        resource: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.resources
            .get_mut()
            .entry(resource.into())
            .or_default()
            .insert(attribute.into(), value.into());
        self
    }

    /// Make every command with this label exit with a failure.
    pub fn fail_on(mut self, label: impl Into<String>) -> Self {
        self.failing.insert(label.into());
        self
    }

    /// Make every probe of this resource fail.
    pub fn fail_probe_on(mut self, resource: impl Into<String>) -> Self {
        self.failing_probes.insert(resource.into());
        self
    }

    /// Labels of all commands run so far, in order (probes excluded).
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    /// Whether a resource exists.
    pub async fn exists(&self, resource: &str) -> bool {
        self.resources.lock().await.contains_key(resource)
    }

    /// Current value of an attribute.
    pub async fn attribute(&self, resource: &str, attribute: &str) -> Option<String> {
        self.resources
            .lock()
            .await
            .get(resource)
            .and_then(|attrs| attrs.get(attribute).cloned())
    }

    /// Overwrite an attribute, simulating drift made outside the engine.
    pub async fn set_attribute(&self, resource: &str, attribute: &str, value: impl Into<String>) {
        self.resources
            .lock()
            .await
            .entry(resource.to_string())
            .or_default()
            .insert(attribute.to_string(), value.into());
    }

    fn apply_effect(resources: &mut Resources, effect: &Effect) {
        match effect {
            Effect::Create { resource } => {
                resources.entry(resource.clone()).or_default();
            }
            Effect::Set { resource, attribute, value } => {
                resources
                    .entry(resource.clone())
                    .or_default()
                    .insert(attribute.clone(), value.clone());
            }
            Effect::Remove { resource } => {
                resources.remove(resource);
            }
        }
    }
}

#[async_trait]
impl Executor for MemoryHost {
    async fn run(&self, command: &Command) -> Result<CommandOutput> {
        self.executed.lock().await.push(command.label.clone());

        if self.failing.contains(&command.label) {
            debug!("Injected failure for '{}'", command.label);
            return Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("injected failure: {}", command.label),
                duration: Duration::ZERO,
            });
        }

        let mut resources = self.resources.lock().await;
        for effect in &command.effects {
            Self::apply_effect(&mut resources, effect);
        }

        Ok(CommandOutput::default())
    }
}

#[async_trait]
impl StateQuery for MemoryHost {
    async fn query(&self, probe: &Probe) -> Result<Option<String>> {
        if self.failing_probes.contains(&probe.resource) {
            return Err(ExecError::Probe {
                label: probe.label(),
                exit_code: 1,
                stderr: "injected probe failure".to_string(),
            });
        }

        let resources = self.resources.lock().await;
        let Some(attrs) = resources.get(&probe.resource) else {
            return Ok(None);
        };

        Ok(match &probe.attribute {
            Some(attribute) => attrs.get(attribute).cloned(),
            None => Some(String::new()),
        })
    }
}
