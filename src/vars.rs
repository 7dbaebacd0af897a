//! Run variables and their sources
//!
//! Variables are declared by the playbook and resolved exactly once, at the
//! start of a run, before any step touches the host. Resolution happens in
//! declaration order so a file source can build its path from a variable
//! declared earlier (the SSH public key path comes from `SSH_PUB_KEY_FILE`).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::template;

/// Placeholder shown instead of secret values
pub const REDACTED: &str = "********";

/// Where a variable's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum VariableSource {
    /// An environment variable of the hostprep process
    Env { key: String },
    /// The trimmed contents of a file on the machine running hostprep.
    /// The path may reference earlier variables.
    File { path: String },
}

/// A named input to the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub source: VariableSource,
    /// Used when the source yields nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// An empty value for a required variable aborts the run
    #[serde(default = "default_true")]
    pub required: bool,
    /// Secret values are never logged or shown
    #[serde(default)]
    pub secret: bool,
}

fn default_true() -> bool {
    true
}

impl Variable {
    /// Required, non-secret variable read from the environment
    pub fn env(name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            source: VariableSource::Env {
                key: key.to_string(),
            },
            default: None,
            required: true,
            secret: false,
        }
    }

    /// Required variable read from a file
    pub fn file(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            source: VariableSource::File {
                path: path.to_string(),
            },
            default: None,
            required: true,
            secret: false,
        }
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// Lookup of environment input
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Resolved values for one run
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
    secrets: BTreeSet<String>,
}

impl Variables {
    /// Resolve every declaration, in order. Fails on the first variable
    /// that is required but empty, or whose file does not exist.
    pub fn resolve(declarations: &[Variable], env: &dyn EnvSource) -> Result<Self> {
        let mut vars = Self::default();
        for decl in declarations {
            let raw = match &decl.source {
                VariableSource::Env { key } => env.get(key).filter(|v| !v.trim().is_empty()),
                VariableSource::File { path } => {
                    let path = template::render(path, &vars).map_err(|e| {
                        ProvisionError::variable(&decl.name, format!("file path: {}", e))
                    })?;
                    if path.trim().is_empty() {
                        None
                    } else {
                        Some(read_source_file(Path::new(&path))?).filter(|v| !v.is_empty())
                    }
                }
            };

            let value = match raw.or_else(|| decl.default.clone()) {
                Some(value) => value,
                None if decl.required => {
                    return Err(ProvisionError::variable(
                        &decl.name,
                        missing_message(&decl.source),
                    ));
                }
                None => String::new(),
            };

            let shown = if decl.secret { REDACTED } else { value.as_str() };
            debug!(variable = %decl.name, value = shown, "resolved variable");
            vars.values.insert(decl.name.clone(), value);
            if decl.secret {
                vars.secrets.insert(decl.name.clone());
            }
        }
        Ok(vars)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secrets.contains(name)
    }

    /// A copy with every secret value replaced by [`REDACTED`]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for name in &self.secrets {
            copy.values.insert(name.clone(), REDACTED.to_string());
        }
        copy
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn missing_message(source: &VariableSource) -> String {
    match source {
        VariableSource::Env { key } => format!("environment variable {} is unset or empty", key),
        VariableSource::File { path } => format!("file {} is empty", path),
    }
}

fn read_source_file(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ProvisionError::file_not_found(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
