//! SSH public keys in a user's `~/.ssh/authorized_keys`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::user::{lookup, primary_group};
use super::{ApplyContext, Attributes, Module, Outcome};
use crate::error::{ProvisionError, Result};
use crate::host::Host;

const MODULE: &str = "authorized_key";

const SSH_DIR_MODE: u32 = 0o700;
const KEYS_FILE_MODE: u32 = 0o600;

/// Parameters of an `authorized_key` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizedKeyArgs {
    pub user: String,
    /// A single public key line, e.g. `ssh-ed25519 AAAA... alice@laptop`
    pub key: String,
}

/// Key type and base64 blob; comments and options do not matter for identity
fn key_identity(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split_whitespace();
    let kind = fields.next()?;
    let blob = fields.next()?;
    Some((kind, blob))
}

/// Whether `contents` already authorizes `key`
pub fn contains_key(contents: &str, key: &str) -> bool {
    let Some(wanted) = key_identity(key) else {
        return false;
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .any(|l| key_identity(l) == Some(wanted))
}

impl Module for AuthorizedKeyArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        let key = self.key.trim();
        if key.contains('\n') || key_identity(key).is_none() {
            return Err(ProvisionError::validation(format!(
                "authorized key for {} is not a single public key line",
                self.user
            )));
        }
        Ok(())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let Some(entry) = lookup(host, &self.user)? else {
            // An earlier step in the same playbook usually creates the user
            if ctx.check_mode {
                return Ok(Outcome::changed(format!(
                    "would add key (user {} does not exist yet)",
                    self.user
                )));
            }
            return Err(ProvisionError::module(
                MODULE,
                format!("user '{}' does not exist", self.user),
            ));
        };
        let group = primary_group(host, &self.user)?;
        let ssh_dir = PathBuf::from(&entry.home).join(".ssh");
        let keys_file = ssh_dir.join("authorized_keys");
        let mut changes = Vec::new();

        let dir_attrs = Attributes {
            mode: Some(SSH_DIR_MODE),
            owner: Some(self.user.clone()),
            group: Some(group.clone()),
        };
        if host.stat(&ssh_dir)?.is_none() {
            if ctx.check_mode {
                return Ok(Outcome::changed(format!("would create {}", keys_file.display())));
            }
            host.create_dir(&ssh_dir)?;
            dir_attrs.apply_all(host, &ssh_dir)?;
            changes.push(format!("created {}", ssh_dir.display()));
        } else {
            changes.extend(dir_attrs.ensure(host, &ssh_dir, ctx)?);
        }

        let current = host.read_file(&keys_file)?.unwrap_or_default();
        if !contains_key(&current, &self.key) {
            if !ctx.check_mode {
                let mut updated = current;
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(self.key.trim());
                updated.push('\n');
                host.write_file(&keys_file, &updated)?;
            }
            changes.push(format!("key added for {}", self.user));
        }

        let file_attrs = Attributes {
            mode: Some(KEYS_FILE_MODE),
            ..dir_attrs
        };
        changes.extend(file_attrs.ensure(host, &keys_file, ctx)?);

        Ok(Outcome::from_changes(changes))
    }
}
