//! Playbooks: variables, ordered steps and handlers
//!
//! A playbook is plain data. It is either the built-in hardening playbook
//! (see [`builtin`]) or loaded from a JSON file with the same shape:
//!
//! ```json
//! {
//!   "name": "web",
//!   "variables": [{ "name": "timezone", "source": { "from": "env", "key": "TIMEZONE" } }],
//!   "steps": [
//!     { "name": "Set timezone", "action": { "module": "timezone", "name": "{{ timezone }}" } }
//!   ],
//!   "handlers": []
//! }
//! ```

pub mod builtin;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::modules::Action;
use crate::template;
use crate::vars::{Variable, VariableSource};

/// One ordered unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: Action,
    /// Handlers to queue when this step reports a change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
}

impl Step {
    pub fn new(name: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            action,
            notify: Vec::new(),
        }
    }

    pub fn notify(mut self, handler: &str) -> Self {
        self.notify.push(handler.to_string());
        self
    }
}

/// A deferred action, run at most once after all steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub name: String,
    pub action: Action,
}

impl Handler {
    pub fn new(name: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

impl Playbook {
    /// Load a playbook from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProvisionError::file_not_found(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| {
            ProvisionError::playbook(format!("{}: {}", path.display(), e))
        })
    }

    /// Save the playbook as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Structural checks that need neither variables nor the host
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ProvisionError::validation(format!(
                "playbook '{}' has no steps",
                self.name
            )));
        }

        let mut declared = HashSet::new();
        for var in &self.variables {
            if var.name.trim().is_empty() {
                return Err(ProvisionError::validation("variable name must not be empty"));
            }
            // A file source may only build its path from earlier variables
            if let VariableSource::File { path } = &var.source {
                if let Some(unknown) = template::references(path)
                    .into_iter()
                    .find(|r| !declared.contains(r.as_str()))
                {
                    return Err(ProvisionError::validation(format!(
                        "variable '{}' reads a path using '{}', which is not declared before it",
                        var.name, unknown
                    )));
                }
            }
            if !declared.insert(var.name.as_str()) {
                return Err(ProvisionError::validation(format!(
                    "variable '{}' declared twice",
                    var.name
                )));
            }
        }

        let mut handler_names = HashSet::new();
        for handler in &self.handlers {
            if handler.name.trim().is_empty() {
                return Err(ProvisionError::validation("handler name must not be empty"));
            }
            if !handler_names.insert(handler.name.as_str()) {
                return Err(ProvisionError::validation(format!(
                    "handler '{}' declared twice",
                    handler.name
                )));
            }
            check_references(&handler.name, &handler.action, &declared)?;
        }

        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(ProvisionError::validation("step name must not be empty"));
            }
            if let Some(unknown) = step
                .notify
                .iter()
                .find(|n| !handler_names.contains(n.as_str()))
            {
                return Err(ProvisionError::validation(format!(
                    "step '{}' notifies unknown handler '{}'",
                    step.name, unknown
                )));
            }
            check_references(&step.name, &step.action, &declared)?;
        }

        Ok(())
    }
}

fn check_references(owner: &str, action: &Action, declared: &HashSet<&str>) -> Result<()> {
    let value = serde_json::to_value(action)?;
    match template::value_references(&value)
        .into_iter()
        .find(|r| !declared.contains(r.as_str()))
    {
        Some(unknown) => Err(ProvisionError::validation(format!(
            "'{}' uses undeclared variable '{}'",
            owner, unknown
        ))),
        None => Ok(()),
    }
}
