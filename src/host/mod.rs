//! Host transports
//!
//! A [`Host`] is the single seam between capability modules and the machine
//! being provisioned. Modules only ever inspect or mutate the target through
//! this trait, which keeps them independent of whether the target is the
//! local machine or a server reached over SSH, and lets tests substitute an
//! in-memory host.
//!
//! Only [`Host::run`] is required. File operations have default
//! implementations expressed as shell commands, so a transport that can run
//! commands (such as [`SshHost`]) gets file handling for free. [`LocalHost`]
//! overrides them with direct filesystem calls.

mod local;
mod ssh;

pub use local::LocalHost;
pub use ssh::SshHost;

use std::fmt;
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Exit code the read/stat helper scripts use for "path does not exist"
const MISSING_EXIT_CODE: i32 = 44;

const READ_SCRIPT: &str = r#"if [ -e "$1" ]; then exec cat -- "$1"; else exit 44; fi"#;
const STAT_SCRIPT: &str =
    r#"if [ -e "$1" ]; then exec stat -c '%a|%U|%G|%F' -- "$1"; else exit 44; fi"#;
const WRITE_SCRIPT: &str = r#"cat > "$1""#;

/// A command to execute on the target host.
///
/// `stdin` is never logged, which makes it the channel for secrets such as
/// passwords handed to `chpasswd`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Render as a single POSIX shell command line (used by remote transports)
    pub fn to_shell(&self) -> String {
        let mut parts = Vec::with_capacity(self.env.len() + self.args.len() + 2);
        if !self.env.is_empty() {
            parts.push("env".to_string());
            for (key, value) in &self.env {
                parts.push(shell_quote(&format!("{}={}", key, value)));
            }
        }
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Output from a host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// Turn a non-zero exit into a host error mentioning `context`
    pub fn ensure_success(self, context: &str) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(ProvisionError::host(format!(
            "{} failed (exit code {}): {}",
            context,
            self.exit_code.unwrap_or(-1),
            detail
        )))
    }
}

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Other,
}

/// Attributes of an existing path on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits, e.g. `0o644`
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

impl FileStat {
    /// Parse the `%a|%U|%G|%F` format produced by `stat -c`
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim().splitn(4, '|').collect();
        let [mode, owner, group, kind] = fields.as_slice() else {
            return Err(ProvisionError::host(format!("unexpected stat output: {}", line)));
        };
        let mode = u32::from_str_radix(mode, 8)
            .map_err(|_| ProvisionError::host(format!("unexpected stat mode: {}", mode)))?;
        let kind = match *kind {
            "directory" => FileKind::Directory,
            "regular file" | "regular empty file" => FileKind::File,
            _ => FileKind::Other,
        };
        Ok(Self {
            kind,
            mode,
            owner: owner.to_string(),
            group: group.to_string(),
        })
    }
}

/// The machine being provisioned.
pub trait Host {
    /// Human-readable identity for logs and reports
    fn describe(&self) -> String;

    /// Execute a command to completion. A non-zero exit is not an error;
    /// callers inspect [`CommandOutput::success`].
    fn run(&mut self, cmd: &HostCommand) -> Result<CommandOutput>;

    /// Contents of a file, or `None` if it does not exist
    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        let out = self.run(&path_script(READ_SCRIPT, path))?;
        if out.exit_code == Some(MISSING_EXIT_CODE) {
            return Ok(None);
        }
        let out = out.ensure_success(&format!("read {}", path.display()))?;
        Ok(Some(out.stdout))
    }

    /// Attributes of a path, or `None` if it does not exist
    fn stat(&mut self, path: &Path) -> Result<Option<FileStat>> {
        let out = self.run(&path_script(STAT_SCRIPT, path))?;
        if out.exit_code == Some(MISSING_EXIT_CODE) {
            return Ok(None);
        }
        let out = out.ensure_success(&format!("stat {}", path.display()))?;
        FileStat::parse(&out.stdout).map(Some)
    }

    /// Create or truncate a file. Existing permissions are preserved.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.run(&path_script(WRITE_SCRIPT, path).stdin(contents))?
            .ensure_success(&format!("write {}", path.display()))?;
        Ok(())
    }

    /// Create a directory and any missing parents
    fn create_dir(&mut self, path: &Path) -> Result<()> {
        let cmd = HostCommand::new("mkdir").args(["-p", "--"]).arg(path_arg(path));
        self.run(&cmd)?
            .ensure_success(&format!("mkdir {}", path.display()))?;
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        let cmd = HostCommand::new("chmod")
            .arg(format!("{:o}", mode))
            .arg("--")
            .arg(path_arg(path));
        self.run(&cmd)?
            .ensure_success(&format!("chmod {}", path.display()))?;
        Ok(())
    }

    /// Change owner and/or group; `None` leaves that part untouched
    fn set_owner(&mut self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        let spec = match (owner, group) {
            (Some(o), Some(g)) => format!("{}:{}", o, g),
            (Some(o), None) => o.to_string(),
            (None, Some(g)) => format!(":{}", g),
            (None, None) => return Ok(()),
        };
        let cmd = HostCommand::new("chown").arg(spec).arg("--").arg(path_arg(path));
        self.run(&cmd)?
            .ensure_success(&format!("chown {}", path.display()))?;
        Ok(())
    }

    /// Atomically replace `to` with `from`
    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        let cmd = HostCommand::new("mv")
            .args(["-f", "--"])
            .arg(path_arg(from))
            .arg(path_arg(to));
        self.run(&cmd)?
            .ensure_success(&format!("mv {}", from.display()))?;
        Ok(())
    }

    /// Remove a file; missing files are not an error
    fn remove_file(&mut self, path: &Path) -> Result<()> {
        let cmd = HostCommand::new("rm").args(["-f", "--"]).arg(path_arg(path));
        self.run(&cmd)?
            .ensure_success(&format!("rm {}", path.display()))?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// `sh -c SCRIPT sh PATH`, so the path reaches the script as `$1` unexpanded
fn path_script(script: &str, path: &Path) -> HostCommand {
    HostCommand::new("sh")
        .args(["-c", script, "sh"])
        .arg(path_arg(path))
}

/// Quote a word for a POSIX shell. Safe words are returned unchanged.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'\''"#))
    }
}
