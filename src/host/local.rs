//! The machine hostprep itself runs on.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::{Gid, Group, Uid, User};
use tracing::debug;

use super::{CommandOutput, FileKind, FileStat, Host, HostCommand};
use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};

/// Executes commands with `std::process` and touches files directly.
#[derive(Debug, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for LocalHost {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn run(&mut self, cmd: &HostCommand) -> Result<CommandOutput> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        execute_guarded(command, cmd.stdin.as_deref(), &cmd.to_string())
    }

    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stat(&mut self, path: &Path) -> Result<Option<FileStat>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else if meta.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };
        let owner = User::from_uid(Uid::from_raw(meta.uid()))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| meta.uid().to_string());
        let group = Group::from_gid(Gid::from_raw(meta.gid()))
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| meta.gid().to_string());
        Ok(Some(FileStat {
            kind,
            mode: meta.permissions().mode() & 0o7777,
            owner,
            group,
        }))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents)?;
        Ok(())
    }

    fn create_dir(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn set_owner(&mut self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        let uid = owner
            .map(|name| {
                User::from_name(name)
                    .ok()
                    .flatten()
                    .map(|u| u.uid)
                    .ok_or_else(|| ProvisionError::host(format!("unknown user '{}'", name)))
            })
            .transpose()?;
        let gid = group
            .map(|name| {
                Group::from_name(name)
                    .ok()
                    .flatten()
                    .map(|g| g.gid)
                    .ok_or_else(|| ProvisionError::host(format!("unknown group '{}'", name)))
            })
            .transpose()?;
        nix::unistd::chown(path, uid, gid)
            .map_err(|e| ProvisionError::host(format!("chown {}: {}", path.display(), e)))
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Spawn `command` in its own process group, tracked for cleanup, and wait
/// for it. `label` is what gets logged; stdin contents never are.
pub(crate) fn execute_guarded(
    mut command: Command,
    stdin: Option<&str>,
    label: &str,
) -> Result<CommandOutput> {
    debug!(command = label, "running host command");

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    let mut child = command
        .spawn()
        .map_err(|e| ProvisionError::host(format!("failed to spawn '{}': {}", label, e)))?;
    let pid = child.id();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.track(pid);
    }

    // Feed stdin from a separate thread so a chatty child cannot deadlock us
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(std::thread::spawn(move || pipe.write_all(input.as_bytes())))
        }
        _ => None,
    };

    let output = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.release(pid);
    }

    let output =
        output.map_err(|e| ProvisionError::host(format!("failed waiting for '{}': {}", label, e)))?;

    if let Some(handle) = writer {
        match handle.join() {
            Ok(Err(e)) if e.kind() != ErrorKind::BrokenPipe => {
                return Err(ProvisionError::host(format!(
                    "failed writing stdin of '{}': {}",
                    label, e
                )));
            }
            _ => {}
        }
    }

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };
    debug!(
        command = label,
        exit_code = ?result.exit_code,
        "host command finished"
    );
    Ok(result)
}
