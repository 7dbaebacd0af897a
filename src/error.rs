//! Error handling module for hostprep
//!
//! Provides the error type shared by variable resolution, playbook loading,
//! host transports and the capability modules. The binary wraps these in
//! `anyhow` at the CLI boundary.

use thiserror::Error;

/// Main error type for provisioning runs
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors on the machine running hostprep
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A variable had no usable value
    #[error("Variable '{name}' could not be resolved: {message}")]
    Variable { name: String, message: String },

    /// A referenced file does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Template rendering errors (undefined variables, malformed placeholders)
    #[error("Template error: {0}")]
    Template(String),

    /// Playbook structure errors (dangling notify, duplicate handlers)
    #[error("Playbook error: {0}")]
    Playbook(String),

    /// Invalid module parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// The host transport could not execute a command
    #[error("Host error: {0}")]
    Host(String),

    /// A capability module failed to converge the host
    #[error("{module}: {message}")]
    Module {
        module: &'static str,
        message: String,
    },

    /// A step failed; carries the step identity for reporting
    #[error("Step '{step}' failed: {error}")]
    StepFailed {
        step: String,
        error: Box<ProvisionError>,
    },

    /// A handler failed after all steps succeeded
    #[error("Handler '{handler}' failed: {error}")]
    HandlerFailed {
        handler: String,
        error: Box<ProvisionError>,
    },
}

/// Result type alias for hostprep operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

// Convenient error constructors
impl ProvisionError {
    /// Create a variable resolution error
    pub fn variable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Variable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a file-not-found error
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a playbook error
    pub fn playbook(msg: impl Into<String>) -> Self {
        Self::Playbook(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a host transport error
    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// Create a module failure
    pub fn module(module: &'static str, message: impl Into<String>) -> Self {
        Self::Module {
            module,
            message: message.into(),
        }
    }

    /// Wrap an error with the name of the step that produced it
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            error: Box::new(self),
        }
    }

    /// Wrap an error with the name of the handler that produced it
    pub fn in_handler(self, handler: impl Into<String>) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            error: Box::new(self),
        }
    }

    /// Name of the failing step, if this error came out of a step
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::variable("new_user", "NEW_USER is empty");
        assert_eq!(
            err.to_string(),
            "Variable 'new_user' could not be resolved: NEW_USER is empty"
        );

        let err = ProvisionError::module("apt", "Unable to locate package nosuch");
        assert_eq!(err.to_string(), "apt: Unable to locate package nosuch");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_step_failure_carries_step_name() {
        let err = ProvisionError::module("copy", "validation failed").in_step("Install sudoers");
        assert_eq!(err.failed_step(), Some("Install sudoers"));
        assert_eq!(
            err.to_string(),
            "Step 'Install sudoers' failed: copy: validation failed"
        );
    }

    #[test]
    fn test_handler_failure_is_not_a_step_failure() {
        let err = ProvisionError::host("ssh exited").in_handler("restart ssh");
        assert!(err.failed_step().is_none());
        assert!(err.to_string().starts_with("Handler 'restart ssh' failed"));
    }
}
