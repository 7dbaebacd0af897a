//! Whole-file content with an optional validation command.
//!
//! New content is written to a temporary file next to the destination,
//! given its final owner and mode, validated, and only then renamed over
//! the destination. A failed validation removes the temporary file, so the
//! destination is never left holding content its consumer would reject.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApplyContext, Attributes, Module, Outcome};
use crate::error::{ProvisionError, Result};
use crate::host::{Host, HostCommand, shell_quote};

const MODULE: &str = "copy";

/// Parameters of a `copy` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyArgs {
    pub dest: String,
    /// Literal file content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Path of a file on the machine running hostprep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Shell command run against the new content; `%s` is the file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
}

impl CopyArgs {
    pub fn content(dest: &str, content: &str) -> Self {
        Self {
            dest: dest.to_string(),
            content: Some(content.to_string()),
            src: None,
            mode: None,
            owner: None,
            group: None,
            validate: None,
        }
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    pub fn validated_by(mut self, command: &str) -> Self {
        self.validate = Some(command.to_string());
        self
    }

    fn attributes(&self) -> Result<Attributes> {
        Attributes::new(
            self.mode.as_deref(),
            self.owner.as_deref(),
            self.group.as_deref(),
        )
    }

    fn desired_content(&self) -> Result<String> {
        match (&self.content, &self.src) {
            (Some(content), None) => Ok(content.clone()),
            (None, Some(src)) => match std::fs::read_to_string(src) {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ProvisionError::file_not_found(src.clone()))
                }
                Err(e) => Err(e.into()),
            },
            _ => Err(ProvisionError::validation(format!(
                "copy to {} needs exactly one of content or src",
                self.dest
            ))),
        }
    }

    fn validate_command(&self, candidate: &Path) -> Option<HostCommand> {
        let template = self.validate.as_deref()?;
        let line = template.replace("%s", &shell_quote(&candidate.display().to_string()));
        Some(HostCommand::new("sh").arg("-c").arg(line))
    }

    /// Write, validate and install new content
    fn install(&self, host: &mut dyn Host, content: &str, attrs: &Attributes) -> Result<()> {
        let dest = Path::new(&self.dest);
        let tmp = temp_path(dest);
        host.write_file(&tmp, content)?;

        let installed = self.promote(host, &tmp, attrs);
        if installed.is_err() {
            if let Err(e) = host.remove_file(&tmp) {
                warn!("could not remove {}: {}", tmp.display(), e);
            }
        }
        installed
    }

    fn promote(&self, host: &mut dyn Host, tmp: &Path, attrs: &Attributes) -> Result<()> {
        attrs.apply_all(host, tmp)?;
        if let Some(cmd) = self.validate_command(tmp) {
            debug!(command = %cmd, "validating {}", self.dest);
            let out = host.run(&cmd)?;
            if !out.success {
                let detail = if out.stderr.trim().is_empty() {
                    out.stdout.trim()
                } else {
                    out.stderr.trim()
                };
                return Err(ProvisionError::module(
                    MODULE,
                    format!("validation of {} failed: {}", self.dest, detail),
                ));
            }
        }
        host.rename(tmp, Path::new(&self.dest))
    }
}

/// `.NAME.hostprep.tmp` in the destination's directory, so the final
/// rename never crosses filesystems
fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.hostprep.tmp", name))
}

impl Module for CopyArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        if !self.dest.starts_with('/') || self.dest.ends_with('/') {
            return Err(ProvisionError::validation(format!(
                "copy destination '{}' must be an absolute file path",
                self.dest
            )));
        }
        if self.content.is_some() == self.src.is_some() {
            return Err(ProvisionError::validation(format!(
                "copy to {} needs exactly one of content or src",
                self.dest
            )));
        }
        if self.validate.as_deref().is_some_and(|v| !v.contains("%s")) {
            return Err(ProvisionError::validation(format!(
                "validate command for {} must contain %s",
                self.dest
            )));
        }
        self.attributes().map(|_| ())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let dest = Path::new(&self.dest);
        let content = self.desired_content()?;
        let mut attrs = self.attributes()?;

        let current = host.read_file(dest)?;
        if current.as_deref() == Some(content.as_str()) {
            return Ok(Outcome::from_changes(attrs.ensure(host, dest, ctx)?));
        }

        let verb = if current.is_some() { "updated" } else { "created" };
        if ctx.check_mode {
            return Ok(Outcome::changed(format!("would be {}", verb)));
        }

        // Replacing a file keeps its permissions unless told otherwise
        if attrs.mode.is_none() && current.is_some() {
            attrs.mode = host.stat(dest)?.map(|s| s.mode);
        }
        self.install(host, &content, &attrs)?;
        Ok(Outcome::changed(format!("{} {}", verb, self.dest)))
    }
}
