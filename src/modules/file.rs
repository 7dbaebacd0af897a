use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Attributes, Module, Outcome};
use crate::error::{ProvisionError, Result};
use crate::host::{FileKind, Host};
use crate::types::FileState;

const MODULE: &str = "file";

/// Ensure a directory or (empty) file exists with the given attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileArgs {
    pub path: String,
    #[serde(default)]
    pub state: FileState,
    /// Octal string such as `"0700"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl FileArgs {
    fn attributes(&self) -> Result<Attributes> {
        Attributes::new(
            self.mode.as_deref(),
            self.owner.as_deref(),
            self.group.as_deref(),
        )
    }
}

impl Module for FileArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(ProvisionError::validation(format!(
                "file path '{}' must be absolute",
                self.path
            )));
        }
        self.attributes().map(|_| ())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let path = Path::new(&self.path);
        let attrs = self.attributes()?;
        let mut changes = Vec::new();

        match host.stat(path)? {
            None => {
                if ctx.check_mode {
                    return Ok(Outcome::changed(format!("would create {}", self.path)));
                }
                match self.state {
                    FileState::Directory => host.create_dir(path)?,
                    FileState::File => host.write_file(path, "")?,
                }
                changes.push(format!("created {} {}", self.state, self.path));
            }
            Some(stat) => {
                let expected = match self.state {
                    FileState::Directory => FileKind::Directory,
                    FileState::File => FileKind::File,
                };
                if stat.kind != expected {
                    return Err(ProvisionError::module(
                        MODULE,
                        format!("{} exists but is not a {}", self.path, self.state),
                    ));
                }
            }
        }

        changes.extend(attrs.ensure(host, path, ctx)?);
        Ok(Outcome::from_changes(changes))
    }
}
