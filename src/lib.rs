//! hostprep library
//!
//! An idempotent provisioning runner: a playbook of ordered steps, each
//! backed by a capability module that inspects the host and only changes
//! what differs, plus handlers that run once after all steps when a step
//! they watch reported a change.

pub mod cli;
pub mod error;
pub mod host;
pub mod modules;
pub mod playbook;
pub mod process_guard;
pub mod runner;
pub mod sanity;
pub mod template;
pub mod types;
pub mod vars;

// Re-export main types for convenience
pub use error::{ProvisionError, Result};
pub use host::{CommandOutput, FileKind, FileStat, Host, HostCommand, LocalHost, SshHost};
pub use modules::{Action, ApplyContext, Module, Outcome};
pub use playbook::{Handler, Playbook, Step};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use runner::{HandlerQueue, HandlerReport, Plan, RunReport, Runner, StepReport};
pub use vars::{EnvSource, ProcessEnv, Variable, VariableSource, Variables};
