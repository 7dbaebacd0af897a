use serde::{Deserialize, Serialize};

use super::{ApplyContext, Module, Outcome, run_checked};
use crate::error::{ProvisionError, Result};
use crate::host::{Host, HostCommand};

const MODULE: &str = "timezone";

/// System timezone via `timedatectl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimezoneArgs {
    /// IANA zone name, e.g. `Europe/Berlin`
    pub name: String,
}

impl Module for TimezoneArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ProvisionError::validation(format!(
                "invalid timezone '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let query = HostCommand::new("timedatectl").args(["show", "-p", "Timezone", "--value"]);
        let current = run_checked(host, MODULE, &query)?.stdout.trim().to_string();
        if current == self.name {
            return Ok(Outcome::unchanged());
        }
        if !ctx.check_mode {
            let set = HostCommand::new("timedatectl")
                .arg("set-timezone")
                .arg(&self.name);
            run_checked(host, MODULE, &set)?;
        }
        Ok(Outcome::changed(format!("{} -> {}", current, self.name)))
    }
}
