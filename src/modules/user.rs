//! Local user accounts through the shadow utilities.
//!
//! The password is only ever handed to `chpasswd` on stdin, never on a
//! command line, and only when the account is created. An existing account
//! keeps whatever password it has, which keeps the step idempotent without
//! having to compare hashes.

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Module, Outcome, run_checked};
use crate::error::{ProvisionError, Result};
use crate::host::{Host, HostCommand};

const MODULE: &str = "user";

/// Parameters of a `user` step.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserArgs {
    pub name: String,
    /// Plaintext, hashed by the host's `chpasswd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Supplementary groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Add to `groups` without dropping other memberships
    #[serde(default = "default_true")]
    pub append: bool,
    #[serde(default = "default_true")]
    pub create_home: bool,
}

fn default_true() -> bool {
    true
}

// Hand-written so the password never reaches a log line
impl std::fmt::Debug for UserArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserArgs")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| crate::vars::REDACTED))
            .field("shell", &self.shell)
            .field("groups", &self.groups)
            .field("append", &self.append)
            .field("create_home", &self.create_home)
            .finish()
    }
}

/// An entry of the passwd database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

impl PasswdEntry {
    /// Parse one `name:x:uid:gid:gecos:home:shell` line
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim_end_matches('\n').split(':').collect();
        let [name, _, uid, gid, _, home, shell] = fields.as_slice() else {
            return None;
        };
        Some(Self {
            name: name.to_string(),
            uid: uid.parse().ok()?,
            gid: gid.parse().ok()?,
            home: home.to_string(),
            shell: shell.to_string(),
        })
    }
}

/// Look up `name` with `getent passwd`; `None` when the account does not exist
pub fn lookup(host: &mut dyn Host, name: &str) -> Result<Option<PasswdEntry>> {
    let out = host.run(&HostCommand::new("getent").arg("passwd").arg(name))?;
    if !out.success {
        return Ok(None);
    }
    let entry = out
        .stdout
        .lines()
        .next()
        .and_then(PasswdEntry::parse)
        .ok_or_else(|| {
            ProvisionError::module(MODULE, format!("unexpected getent output for '{}'", name))
        })?;
    Ok(Some(entry))
}

/// Name of the user's primary group
pub fn primary_group(host: &mut dyn Host, name: &str) -> Result<String> {
    let out = run_checked(host, MODULE, &HostCommand::new("id").arg("-gn").arg(name))?;
    Ok(out.stdout.trim().to_string())
}

impl UserArgs {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            password: None,
            shell: None,
            groups: Vec::new(),
            append: true,
            create_home: true,
        }
    }

    fn create(&self, host: &mut dyn Host) -> Result<()> {
        let mut cmd = HostCommand::new("useradd");
        if self.create_home {
            cmd = cmd.arg("-m");
        }
        if let Some(shell) = &self.shell {
            cmd = cmd.arg("-s").arg(shell);
        }
        if !self.groups.is_empty() {
            cmd = cmd.arg("-G").arg(self.groups.join(","));
        }
        run_checked(host, MODULE, &cmd.arg(&self.name))?;

        if let Some(password) = &self.password {
            let chpasswd =
                HostCommand::new("chpasswd").stdin(format!("{}:{}\n", self.name, password));
            run_checked(host, MODULE, &chpasswd)?;
        }
        Ok(())
    }

    /// Groups that have to be added (append) or the full new list (replace)
    fn group_change(&self, host: &mut dyn Host) -> Result<Option<Vec<String>>> {
        if self.groups.is_empty() && self.append {
            return Ok(None);
        }
        let out = run_checked(host, MODULE, &HostCommand::new("id").arg("-nG").arg(&self.name))?;
        let primary = primary_group(host, &self.name)?;
        let current: Vec<&str> = out
            .stdout
            .split_whitespace()
            .filter(|g| *g != primary)
            .collect();

        if self.append {
            let missing: Vec<String> = self
                .groups
                .iter()
                .filter(|g| !current.contains(&g.as_str()))
                .cloned()
                .collect();
            return Ok((!missing.is_empty()).then_some(missing));
        }

        let mut wanted: Vec<&str> = self.groups.iter().map(String::as_str).collect();
        let mut have = current.clone();
        wanted.sort_unstable();
        wanted.dedup();
        have.sort_unstable();
        have.dedup();
        Ok((wanted != have).then(|| self.groups.clone()))
    }
}

impl Module for UserArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        let valid = !self.name.is_empty()
            && !self.name.starts_with('-')
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c));
        if !valid {
            return Err(ProvisionError::validation(format!(
                "invalid user name '{}'",
                self.name
            )));
        }
        if self.password.as_deref().is_some_and(|p| p.contains('\n')) {
            return Err(ProvisionError::validation("password must be a single line"));
        }
        Ok(())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let Some(entry) = lookup(host, &self.name)? else {
            if !ctx.check_mode {
                self.create(host)?;
            }
            return Ok(Outcome::changed(format!("created user {}", self.name)));
        };

        let mut changes = Vec::new();

        if let Some(shell) = &self.shell {
            if entry.shell != *shell {
                if !ctx.check_mode {
                    let cmd = HostCommand::new("usermod")
                        .arg("-s")
                        .arg(shell)
                        .arg(&self.name);
                    run_checked(host, MODULE, &cmd)?;
                }
                changes.push(format!("shell {}", shell));
            }
        }

        if let Some(groups) = self.group_change(host)? {
            if !ctx.check_mode {
                let flag = if self.append { "-aG" } else { "-G" };
                let cmd = HostCommand::new("usermod")
                    .arg(flag)
                    .arg(groups.join(","))
                    .arg(&self.name);
                run_checked(host, MODULE, &cmd)?;
            }
            changes.push(format!("groups {}", groups.join(",")));
        }

        Ok(Outcome::from_changes(changes))
    }
}
