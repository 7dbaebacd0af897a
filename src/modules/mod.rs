//! Capability modules
//!
//! Each module is a parameter struct implementing [`Module`]: it inspects
//! the host, compares against the declared target, and mutates only when the
//! two differ. The returned [`Outcome`] says whether anything changed, which
//! is what drives handler notification.
//!
//! # Contract
//!
//! - Applying a module to a host already in the target state reports
//!   unchanged and issues no mutating command.
//! - In check mode a module reports what it *would* change and mutates
//!   nothing.
//! - Failures are returned, never retried.

pub mod apt;
pub mod authorized_key;
pub mod blockinfile;
pub mod copy;
pub mod file;
pub mod lineinfile;
pub mod service;
pub mod timezone;
pub mod ufw;
pub mod user;

pub use apt::AptArgs;
pub use authorized_key::AuthorizedKeyArgs;
pub use blockinfile::BlockInFileArgs;
pub use copy::CopyArgs;
pub use file::FileArgs;
pub use lineinfile::LineInFileArgs;
pub use service::ServiceArgs;
pub use timezone::TimezoneArgs;
pub use ufw::UfwArgs;
pub use user::UserArgs;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::host::{CommandOutput, FileStat, Host, HostCommand};

/// Per-run settings every module sees
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext {
    /// Report would-be changes without mutating the host
    pub check_mode: bool,
}

/// Result of applying one module
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed(message: impl Into<String>) -> Self {
        Self {
            changed: true,
            message: Some(message.into()),
        }
    }

    /// Changed when any of `changes` is non-empty; messages are joined
    pub fn from_changes(changes: Vec<String>) -> Self {
        if changes.is_empty() {
            Self::unchanged()
        } else {
            Self::changed(changes.join("; "))
        }
    }
}

/// An idempotent capability.
pub trait Module {
    /// Module type as spelled in playbooks (e.g. `"apt"`)
    fn module_name(&self) -> &'static str;

    /// Parameter checks that need no host access. Runs on rendered
    /// parameters before the first step is applied.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Converge the host towards this module's target state
    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome>;
}

/// A module invocation as it appears in a playbook step or handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum Action {
    Apt(AptArgs),
    Service(ServiceArgs),
    Timezone(TimezoneArgs),
    User(UserArgs),
    File(FileArgs),
    Copy(CopyArgs),
    Lineinfile(LineInFileArgs),
    Blockinfile(BlockInFileArgs),
    AuthorizedKey(AuthorizedKeyArgs),
    Ufw(UfwArgs),
}

impl Action {
    pub fn as_module(&self) -> &dyn Module {
        match self {
            Self::Apt(args) => args,
            Self::Service(args) => args,
            Self::Timezone(args) => args,
            Self::User(args) => args,
            Self::File(args) => args,
            Self::Copy(args) => args,
            Self::Lineinfile(args) => args,
            Self::Blockinfile(args) => args,
            Self::AuthorizedKey(args) => args,
            Self::Ufw(args) => args,
        }
    }

    pub fn module_name(&self) -> &'static str {
        self.as_module().module_name()
    }

    pub fn validate(&self) -> Result<()> {
        self.as_module().validate()
    }

    pub fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        self.as_module().apply(host, ctx)
    }
}

/// Run a command and fail the module on non-zero exit
pub(crate) fn run_checked(
    host: &mut dyn Host,
    module: &'static str,
    cmd: &HostCommand,
) -> Result<CommandOutput> {
    let out = host.run(cmd)?;
    if out.success {
        return Ok(out);
    }
    let detail = if out.stderr.trim().is_empty() {
        out.stdout.trim().to_string()
    } else {
        out.stderr.trim().to_string()
    };
    Err(ProvisionError::module(
        module,
        format!(
            "`{}` exited with code {}: {}",
            cmd,
            out.exit_code.unwrap_or(-1),
            detail
        ),
    ))
}

/// Parse an octal permission string such as `"0644"` or `"440"`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    let value = u32::from_str_radix(digits, 8)
        .map_err(|_| ProvisionError::validation(format!("invalid file mode '{}'", mode)))?;
    if value > 0o7777 {
        return Err(ProvisionError::validation(format!(
            "file mode '{}' out of range",
            mode
        )));
    }
    Ok(value)
}

/// Desired ownership and permissions of a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Attributes {
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl Attributes {
    pub fn new(mode: Option<&str>, owner: Option<&str>, group: Option<&str>) -> Result<Self> {
        Ok(Self {
            mode: mode.map(parse_mode).transpose()?,
            owner: owner.map(str::to_string),
            group: group.map(str::to_string),
        })
    }

    fn is_empty(&self) -> bool {
        self.mode.is_none() && self.owner.is_none() && self.group.is_none()
    }

    /// Descriptions of what differs between `current` and the target
    pub fn differences(&self, current: Option<&FileStat>) -> Vec<String> {
        let mut diffs = Vec::new();
        if let Some(mode) = self.mode {
            if current.map(|s| s.mode) != Some(mode) {
                diffs.push(format!("mode {:04o}", mode));
            }
        }
        let owner_differs = self
            .owner
            .as_deref()
            .is_some_and(|o| current.map(|s| s.owner.as_str()) != Some(o));
        let group_differs = self
            .group
            .as_deref()
            .is_some_and(|g| current.map(|s| s.group.as_str()) != Some(g));
        if owner_differs || group_differs {
            diffs.push(format!(
                "owner {}:{}",
                self.owner.as_deref().unwrap_or("-"),
                self.group.as_deref().unwrap_or("-")
            ));
        }
        diffs
    }

    /// Apply unconditionally (used on freshly written temp files)
    pub fn apply_all(&self, host: &mut dyn Host, path: &Path) -> Result<()> {
        if self.owner.is_some() || self.group.is_some() {
            host.set_owner(path, self.owner.as_deref(), self.group.as_deref())?;
        }
        if let Some(mode) = self.mode {
            host.set_mode(path, mode)?;
        }
        Ok(())
    }

    /// Bring an existing path in line, returning what was changed
    pub fn ensure(&self, host: &mut dyn Host, path: &Path, ctx: &ApplyContext) -> Result<Vec<String>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let current = host.stat(path)?;
        let diffs = self.differences(current.as_ref());
        if diffs.is_empty() || ctx.check_mode {
            return Ok(diffs);
        }
        // chown may clear setuid bits, so ownership goes first
        let ownership_differs = diffs.iter().any(|d| d.starts_with("owner"));
        if ownership_differs {
            host.set_owner(path, self.owner.as_deref(), self.group.as_deref())?;
        }
        if let Some(mode) = self.mode {
            if current.as_ref().map(|s| s.mode) != Some(mode) || ownership_differs {
                host.set_mode(path, mode)?;
            }
        }
        Ok(diffs)
    }
}
