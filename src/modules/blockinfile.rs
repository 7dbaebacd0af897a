use std::path::Path;

use serde::{Deserialize, Serialize};

use super::lineinfile::join_lines;
use super::{ApplyContext, Module, Outcome};
use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::types::Presence;

const MODULE: &str = "blockinfile";

/// Marker template; `{mark}` becomes `BEGIN` or `END`
pub const DEFAULT_MARKER: &str = "# {mark} HOSTPREP MANAGED BLOCK";

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

/// A block of lines kept between two marker lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockInFileArgs {
    pub path: String,
    #[serde(default)]
    pub block: String,
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default)]
    pub state: Presence,
    #[serde(default)]
    pub create: bool,
}

/// Insert, replace or remove the marked block; `None` when nothing changes
pub fn apply_block(content: &str, block: &str, marker: &str, state: Presence) -> Option<String> {
    let begin = marker.replace("{mark}", "BEGIN");
    let end = marker.replace("{mark}", "END");
    let mut lines: Vec<&str> = content.lines().collect();

    // A BEGIN without its END owns everything up to the end of the file
    let start = lines.iter().position(|l| *l == begin);
    let range = start.map(|s| match lines[s..].iter().position(|l| *l == end) {
        Some(offset) => s..s + offset + 1,
        None => s..lines.len(),
    });

    let mut replacement: Vec<&str> = Vec::new();
    if state == Presence::Present {
        replacement.push(&begin);
        replacement.extend(block.lines());
        replacement.push(&end);
    }

    match range {
        Some(range) => {
            if lines[range.clone()] == replacement[..] {
                return None;
            }
            lines.splice(range, replacement);
        }
        None if state == Presence::Absent => return None,
        None => lines.extend(replacement),
    }

    Some(join_lines(&lines))
}

impl Module for BlockInFileArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        if !self.marker.contains("{mark}") {
            return Err(ProvisionError::validation(format!(
                "blockinfile marker '{}' must contain {{mark}}",
                self.marker
            )));
        }
        Ok(())
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let path = Path::new(&self.path);
        let content = match host.read_file(path)? {
            Some(content) => content,
            None if self.state == Presence::Absent => return Ok(Outcome::unchanged()),
            None if self.create => String::new(),
            None => {
                return Err(ProvisionError::module(
                    MODULE,
                    format!("{} does not exist", self.path),
                ));
            }
        };

        match apply_block(&content, &self.block, &self.marker, self.state) {
            None => Ok(Outcome::unchanged()),
            Some(updated) => {
                if !ctx.check_mode {
                    host.write_file(path, &updated)?;
                }
                Ok(Outcome::changed(format!("{}: block {}", self.path, self.state)))
            }
        }
    }
}
