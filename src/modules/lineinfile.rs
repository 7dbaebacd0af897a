//! Single-line edits of text files.
//!
//! With `state: present`, the last line matching `regexp` is replaced by
//! `line`. When nothing matches and `line` is not already in the file, it is
//! appended. With `state: absent`, every line matching `regexp` (or equal to
//! `line` when no regexp is given) is removed.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ApplyContext, Module, Outcome};
use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::types::Presence;

const MODULE: &str = "lineinfile";

/// Parameters of a `lineinfile` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineInFileArgs {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default)]
    pub state: Presence,
    /// Create the file when it does not exist
    #[serde(default)]
    pub create: bool,
}

impl LineInFileArgs {
    pub fn replace(path: &str, regexp: &str, line: &str) -> Self {
        Self {
            path: path.to_string(),
            regexp: Some(regexp.to_string()),
            line: Some(line.to_string()),
            state: Presence::Present,
            create: false,
        }
    }

    fn compiled(&self) -> Result<Option<Regex>> {
        self.regexp
            .as_deref()
            .map(|re| {
                Regex::new(re).map_err(|e| {
                    ProvisionError::validation(format!("invalid regexp '{}': {}", re, e))
                })
            })
            .transpose()
    }
}

/// Apply a line edit to `content`; `None` when the content is already right
pub fn edit_lines(
    content: &str,
    regexp: Option<&Regex>,
    line: Option<&str>,
    state: Presence,
) -> Option<String> {
    let mut lines: Vec<&str> = content.lines().collect();

    match state {
        Presence::Present => {
            let line = line?;
            let matched = regexp.and_then(|re| lines.iter().rposition(|l| re.is_match(l)));
            // A line the regexp cannot match stays in place once written
            let settled = regexp.is_some_and(|re| !re.is_match(line)) && lines.contains(&line);
            match matched {
                Some(index) if lines[index] == line => return None,
                Some(_) if settled => return None,
                Some(index) => lines[index] = line,
                None if lines.contains(&line) => return None,
                None => lines.push(line),
            }
        }
        Presence::Absent => {
            let before = lines.len();
            lines.retain(|l| match (regexp, line) {
                (Some(re), _) => !re.is_match(l),
                (None, Some(line)) => *l != line,
                (None, None) => true,
            });
            if lines.len() == before {
                return None;
            }
        }
    }

    Some(join_lines(&lines))
}

/// Join lines back into file content with a trailing newline
pub(crate) fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

impl Module for LineInFileArgs {
    fn module_name(&self) -> &'static str {
        MODULE
    }

    fn validate(&self) -> Result<()> {
        self.compiled()?;
        match self.state {
            Presence::Present if self.line.is_none() => Err(ProvisionError::validation(format!(
                "lineinfile on {} needs a line",
                self.path
            ))),
            Presence::Absent if self.line.is_none() && self.regexp.is_none() => {
                Err(ProvisionError::validation(format!(
                    "lineinfile on {} needs a line or regexp",
                    self.path
                )))
            }
            _ if self.line.as_deref().is_some_and(|l| l.contains('\n')) => Err(
                ProvisionError::validation("lineinfile line must not contain a newline"),
            ),
            _ => Ok(()),
        }
    }

    fn apply(&self, host: &mut dyn Host, ctx: &ApplyContext) -> Result<Outcome> {
        let path = Path::new(&self.path);
        let regexp = self.compiled()?;

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

        let Some(updated) = edit_lines(&content, regexp.as_ref(), self.line.as_deref(), self.state)
        else {
            return Ok(Outcome::unchanged());
        };

        if !ctx.check_mode {
            host.write_file(path, &updated)?;
        }
        let message = match (self.state, self.line.as_deref()) {
            (Presence::Present, Some(line)) => format!("{}: {}", self.path, line),
            _ => format!("{}: lines removed", self.path),
        };
        Ok(Outcome::changed(message))
    }
}
