//! Host firewall through `ufw`.
//!
//! One step may set a default policy, add a rule and switch the firewall on
//! or off; the three are applied in that order so enabling happens after
//! the rules it depends on are in place.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Module, Outcome, run_checked};
use crate::error::{ProvisionError, Result};
use crate::host::{Host, HostCommand};
use crate::types::{Protocol, UfwDirection, UfwPolicy, UfwRule, UfwState};

const MODULE: &str = "ufw";

/// Where ufw persists its default policies
pub const UFW_DEFAULTS: &str = "/etc/default/ufw";

/// Parameters of a `ufw` step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UfwArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<UfwState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<UfwPolicy>,
    #[serde(default)]
    pub direction: UfwDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<UfwRule>,
    /// Port number, range (`6000:6007`) or service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub proto: Protocol,
}

impl UfwArgs {
    pub fn default_policy(policy: UfwPolicy, direction: UfwDirection) -> Self {
        Self {
            policy: Some(policy),
            direction,
            ..Self::default()
        }
    }

    pub fn rule(rule: UfwRule, port: &str, proto: Protocol) -> Self {
        Self {
            rule: Some(rule),
            port: Some(port.to_string()),
            proto,
            ..Self::default()
        }
    }

    pub fn state(state: UfwState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// `22/tcp`, or just `22` for any protocol
    fn rule_target(&self, port: &str) -> String {
        match self.proto {
            Protocol::Any => port.to_string(),
            proto => format!("{}/{}", port, proto),
        }
    }

    fn ensure_policy(
        &self,
        host: &mut dyn Host,
        ctx: &ApplyContext,
        policy: UfwPolicy,
    ) -> Result<Option<String>> {
        let defaults = host.read_file(Path::new(UFW_DEFAULTS))?.unwrap_or_default();
        let key = self.direction.defaults_key();
        if configured_policy(&defaults, key) == Some(policy.iptables_target()) {
            return Ok(None);
        }
        if !ctx.check_mode {
            let cmd = HostCommand::new("ufw")
                .arg("default")
                .arg(policy.to_string())
                .arg(self.direction.to_string());
            run_checked(host, MODULE, &cmd)?;
        }
        Ok(Some(format!("default {} {}", policy, self.direction)))
    }

    fn ensure_rule(
        &self,
        host: &mut dyn Host,
        ctx: &ApplyContext,
        rule: UfwRule,
        port: &str,
    ) -> Result<Option<String>> {
        let target = self.rule_target(port);
        let added = run_checked(host, MODULE, &HostCommand::new("ufw").args(["show", "added"]))?;
        if has_rule(&added.stdout, rule, &target) {
            return Ok(None);
        }
        if !ctx.check_mode {
            let cmd = HostCommand::new("ufw").arg(rule.to_string()).arg(&target);
            run_checked(host, MODULE, &cmd)?;
        }
        Ok(Some(format!("{} {}", rule, target)))
    }

    fn ensure_state(
        &self,
        host: &mut dyn Host,
        ctx: &ApplyContext,
        state: UfwState,
    ) -> Result<Option<String>> {
        let status = run_checked(host, MODULE, &HostCommand::new("ufw").args(["status", "verbose"]))?;
        let active = is_active(&status.stdout);
        let want_active = state == UfwState::Enabled;
        if active == want_active {
            return Ok(None);
        }
        if !ctx.check_mode {
            let cmd = if want_active {
                HostCommand::new("ufw").args(["--force", "enable"])
            } else {
                HostCommand::new("ufw").arg("disable")
            };
            run_checked(host, MODULE, &cmd)?;
        }
        Ok(Some(format!("firewall {}", state)))
    }
}

/// Value of `KEY="VALUE"` in `/etc/default/ufw`
pub fn configured_policy<'a>(defaults: &'a str, key: &str) -> Option<&'a str> {
    defaults.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"'))
    })
}

/// Whether `ufw show added` output lists `ufw RULE TARGET`
pub fn has_rule(show_added: &str, rule: UfwRule, target: &str) -> bool {
    let wanted = format!("ufw {} {}", rule, target);
    show_added.lines().any(|line| line.trim() == wanted)
}

/// Whether `ufw status` output reports an active firewall
pub fn is_active(status: &str) -> bool {
    status
        .lines()
        .any(|line| line.trim() == "Status: active")
}

impl Module for UfwArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        if self.state.is_none() && self.policy.is_none() && self.rule.is_none() {
            return Err(ProvisionError::validation(
                "ufw step needs a state, policy or rule",
            ));
        }
        match (&self.rule, &self.port) {
            (Some(_), None) => Err(ProvisionError::validation("ufw rule needs a port")),
            (None, Some(_)) => Err(ProvisionError::validation("ufw port given without a rule")),
            (_, Some(port)) if port.trim().is_empty() || port.contains(char::is_whitespace) => {
                Err(ProvisionError::validation(format!("invalid ufw port '{}'", port)))
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let mut changes = Vec::new();
        if let Some(policy) = self.policy {
            changes.extend(self.ensure_policy(host, ctx, policy)?);
        }
        if let (Some(rule), Some(port)) = (self.rule, self.port.as_deref()) {
            changes.extend(self.ensure_rule(host, ctx, rule, port)?);
        }
        if let Some(state) = self.state {
            changes.extend(self.ensure_state(host, ctx, state)?);
        }
        Ok(Outcome::from_changes(changes))
    }
}
