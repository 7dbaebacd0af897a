//! systemd units through `systemctl`.

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Module, Outcome, run_checked};
use crate::error::{ProvisionError, Result};
use crate::host::{Host, HostCommand};
use crate::types::ServiceState;

const MODULE: &str = "service";

/// Parameters of a `service` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceArgs {
    /// Unit name, e.g. `ssh` or `chrony`
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServiceState>,
    /// Start at boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ServiceArgs {
    pub fn restarted(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Some(ServiceState::Restarted),
            enabled: None,
        }
    }

    pub fn running_at_boot(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Some(ServiceState::Started),
            enabled: Some(true),
        }
    }

    fn systemctl(&self, verb: &str) -> HostCommand {
        HostCommand::new("systemctl").arg(verb).arg(&self.name)
    }

    fn query(&self, host: &mut dyn Host, verb: &str) -> Result<String> {
        // is-active/is-enabled exit non-zero for "inactive"/"disabled"
        Ok(host.run(&self.systemctl(verb))?.stdout.trim().to_string())
    }
}

impl Module for ServiceArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProvisionError::validation("service name must not be empty"));
        }
        if self.state.is_none() && self.enabled.is_none() {
            return Err(ProvisionError::validation(format!(
                "service '{}' needs a state or enabled",
                self.name
            )));
        }
        Ok(())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let mut changes = Vec::new();

        if let Some(enabled) = self.enabled {
            let is_enabled = self.query(host, "is-enabled")? == "enabled";
            if is_enabled != enabled {
                let verb = if enabled { "enable" } else { "disable" };
                if !ctx.check_mode {
                    run_checked(host, MODULE, &self.systemctl(verb))?;
                }
                changes.push(format!("{}d {}", verb, self.name));
            }
        }

        if let Some(state) = self.state {
            let active = self.query(host, "is-active")? == "active";
            let verb = match state {
                ServiceState::Started if !active => Some("start"),
                ServiceState::Stopped if active => Some("stop"),
                ServiceState::Restarted => Some("restart"),
                _ => None,
            };
            if let Some(verb) = verb {
                if !ctx.check_mode {
                    run_checked(host, MODULE, &self.systemctl(verb))?;
                }
                changes.push(format!("{} {}", state, self.name));
            }
        }

        Ok(Outcome::from_changes(changes))
    }
}
