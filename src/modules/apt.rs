//! Debian package management through `dpkg-query` and `apt-get`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApplyContext, Module, Outcome, run_checked};
use crate::error::Result;
use crate::host::{Host, HostCommand};
use crate::types::UpgradeMode;

const MODULE: &str = "apt";

/// Touched after every successful `apt-get update` this tool runs.
pub const UPDATE_STAMP: &str = "/var/lib/hostprep/apt-update-stamp";

/// Prints the age in seconds of the newest update marker: our own stamp,
/// apt's periodic stamp or the lists directory.
pub const CACHE_AGE_SCRIPT: &str = r#"newest=0
for stamp in /var/lib/hostprep/apt-update-stamp /var/lib/apt/periodic/update-success-stamp /var/lib/apt/lists; do
  [ -e "$stamp" ] || continue
  t=$(stat -c %Y "$stamp")
  [ "$t" -gt "$newest" ] && newest=$t
done
echo $(( $(date +%s) - newest ))"#;

/// Parameters of an `apt` step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptArgs {
    /// Packages that must be installed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// Run `apt-get update` first
    #[serde(default)]
    pub update_cache: bool,
    /// Skip the update when the cache is younger than this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_valid_time: Option<u64>,
    /// Upgrade installed packages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeMode>,
}

impl AptArgs {
    fn apt_get(&self) -> HostCommand {
        HostCommand::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
    }

    fn cache_is_fresh(&self, host: &mut dyn Host) -> Result<bool> {
        let Some(valid_for) = self.cache_valid_time else {
            return Ok(false);
        };
        let out = host.run(&HostCommand::new("sh").args(["-c", CACHE_AGE_SCRIPT]))?;
        if !out.success {
            return Ok(false);
        }
        match out.stdout.trim().parse::<u64>() {
            Ok(age) => {
                debug!(age, valid_for, "apt cache age");
                Ok(age < valid_for)
            }
            Err(_) => Ok(false),
        }
    }

    fn touch_update_stamp(host: &mut dyn Host) -> Result<()> {
        let stamp = Path::new(UPDATE_STAMP);
        if let Some(dir) = stamp.parent() {
            host.create_dir(dir)?;
        }
        host.write_file(stamp, "")
    }

    fn is_installed(host: &mut dyn Host, package: &str) -> Result<bool> {
        let out = host.run(
            &HostCommand::new("dpkg-query")
                .args(["-W", "-f=${Status}"])
                .arg(package),
        )?;
        Ok(out.success && out.stdout.trim().ends_with("install ok installed"))
    }

    /// Number of packages `apt-get -s` says the upgrade would touch
    fn pending_upgrades(&self, host: &mut dyn Host, mode: UpgradeMode) -> Result<usize> {
        let cmd = self.apt_get().arg("-s").arg(mode.apt_subcommand());
        let out = run_checked(host, MODULE, &cmd)?;
        Ok(count_simulated_installs(&out.stdout))
    }
}

/// Count `Inst ` lines in `apt-get -s` output
pub fn count_simulated_installs(simulation: &str) -> usize {
    simulation
        .lines()
        .filter(|line| line.starts_with("Inst "))
        .count()
}

impl Module for AptArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let mut changes = Vec::new();

        if self.update_cache && !self.cache_is_fresh(host)? {
            if !ctx.check_mode {
                run_checked(host, MODULE, &self.apt_get().arg("update"))?;
                Self::touch_update_stamp(host)?;
            }
            changes.push("cache updated".to_string());
        }

        let mut missing = Vec::new();
        for package in &self.packages {
            if !Self::is_installed(host, package)? {
                missing.push(package.clone());
            }
        }
        if !missing.is_empty() {
            if !ctx.check_mode {
                let cmd = self
                    .apt_get()
                    .args(["install", "-y"])
                    .args(missing.iter().cloned());
                run_checked(host, MODULE, &cmd)?;
            }
            changes.push(format!("installed {}", missing.join(", ")));
        }

        if let Some(mode) = self.upgrade {
            let pending = self.pending_upgrades(host, mode)?;
            if pending > 0 {
                if !ctx.check_mode {
                    let cmd = self.apt_get().args([
                        "-y",
                        "-o",
                        "Dpkg::Options::=--force-confdef",
                        "-o",
                        "Dpkg::Options::=--force-confold",
                        mode.apt_subcommand(),
                    ]);
                    run_checked(host, MODULE, &cmd)?;
                }
                changes.push(format!("upgraded {} packages", pending));
            }
        }

        Ok(Outcome::from_changes(changes))
    }
}
