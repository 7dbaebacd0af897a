//! A single remote machine reached through the system `ssh` client.
//!
//! Every operation, file handling included, travels as one shell command
//! line over a non-interactive `ssh` session. Authentication is left to the
//! user's SSH agent and config; `BatchMode=yes` keeps a missing key from
//! turning into a password prompt that would hang the run.

use std::process::Command;

use super::{CommandOutput, Host, HostCommand, shell_quote};
use crate::error::Result;
use crate::host::local::execute_guarded;

/// `ssh`-backed transport to one destination (`user@host` or an ssh_config alias).
#[derive(Debug, Clone)]
pub struct SshHost {
    destination: String,
    options: Vec<String>,
    sudo: bool,
}

impl SshHost {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            options: Vec::new(),
            sudo: false,
        }
    }

    /// Extra `-o key=value` options for the ssh client
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Prefix remote commands with `sudo -n` when logging in as a non-root user
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// The remote command line for `cmd`, as handed to the remote shell
    pub fn remote_command_line(&self, cmd: &HostCommand) -> String {
        if self.sudo {
            format!("sudo -n {}", cmd.to_shell())
        } else {
            cmd.to_shell()
        }
    }

    /// Full local argv of the `ssh` invocation (without the program name)
    pub fn ssh_args(&self, cmd: &HostCommand) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(self.destination.clone());
        args.push("--".to_string());
        args.push(self.remote_command_line(cmd));
        args
    }
}

impl Host for SshHost {
    fn describe(&self) -> String {
        format!("ssh://{}", self.destination)
    }

    fn run(&mut self, cmd: &HostCommand) -> Result<CommandOutput> {
        let mut command = Command::new("ssh");
        command.args(self.ssh_args(cmd));
        let label = format!("ssh {} {}", shell_quote(&self.destination), cmd);
        execute_guarded(command, cmd.stdin.as_deref(), &label)
    }
}
