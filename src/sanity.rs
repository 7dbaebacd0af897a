//! Pre-flight checks for the machine running hostprep
//!
//! Runs before any variable is resolved or any step applied:
//! - A local run needs root (EUID 0) and the Debian system tools
//! - An SSH run needs only the local `ssh` client; privileges on the
//!   remote side are the remote account's business
//! - Check mode skips the root requirement, since it mutates nothing
//!
//! If any check fails, the program exits with a clear error message.

use std::process::Command;

use tracing::{debug, info, warn};

use crate::process_guard::CommandProcessGroup;

/// Where the run is going to be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Local,
    Ssh,
}

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub target: Target,
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub needs_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && (self.is_root || !self.needs_root)
    }
}

/// Tools the capability modules call on a local target
const LOCAL_BINARIES: &[&str] = &[
    "sh",
    "apt-get",
    "dpkg-query",
    "systemctl",
    "timedatectl",
    "getent",
    "useradd",
    "usermod",
    "chpasswd",
];

/// Installed by the built-in playbook itself, so only worth a debug line
const OPTIONAL_BINARIES: &[&str] = &["ufw", "visudo", "sshd"];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("sh")
        .args(["-c", r#"command -v "$1" >/dev/null"#, "sh", name])
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn required_binaries(target: Target) -> &'static [&'static str] {
    match target {
        Target::Local => LOCAL_BINARIES,
        Target::Ssh => &["ssh"],
    }
}

/// Perform all sanity checks for `target` and return the result
pub fn verify_environment(target: Target, check_mode: bool) -> SanityCheckResult {
    let missing = required_binaries(target)
        .iter()
        .filter(|binary| !binary_exists(binary))
        .map(|binary| binary.to_string())
        .collect();

    if target == Target::Local {
        for binary in OPTIONAL_BINARIES {
            if !binary_exists(binary) {
                debug!("{} not found yet (installed by the playbook)", binary);
            }
        }
    }

    SanityCheckResult {
        target,
        missing_binaries: missing,
        is_root: is_running_as_root(),
        needs_root: target == Target::Local && !check_mode,
    }
}

/// Print an error box to stderr and exit with status 1
pub fn print_error_and_exit(result: &SanityCheckResult) -> ! {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║                hostprep - Pre-flight Check Failed                ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    if result.needs_root && !result.is_root {
        eprintln!("❌ ERROR: Root privileges required");
        eprintln!("   Provisioning the local machine installs packages and edits system files.");
        eprintln!();
        eprintln!("   Solution: Run with sudo, or use `hostprep check` for a dry run:");
        eprintln!("     sudo hostprep run");
        eprintln!();
    }

    if !result.missing_binaries.is_empty() {
        eprintln!("❌ ERROR: Missing required binaries");
        eprintln!();
        for binary in &result.missing_binaries {
            eprintln!("   • {} (install: apt-get install {})", binary, package_for_binary(binary));
        }
        eprintln!();
        if result.target == Target::Local {
            eprintln!("   hostprep targets Debian and Ubuntu systems with systemd.");
            eprintln!();
        }
    }

    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║  Fix the above issues and try again.                             ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();

    std::process::exit(1);
}

/// Map binary names to their Debian package names
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "sh" => "dash",
        "apt-get" => "apt",
        "dpkg-query" => "dpkg",
        "systemctl" | "timedatectl" => "systemd",
        "getent" => "libc-bin",
        "useradd" | "usermod" | "chpasswd" => "passwd",
        "ssh" => "openssh-client",
        _ => "unknown",
    }
}

/// Set HOSTPREP_SKIP_ROOT_CHECK=1 to skip the root requirement
pub fn should_skip_root_check() -> bool {
    std::env::var("HOSTPREP_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Verify the environment and exit if checks fail
pub fn run_preflight_checks(target: Target, check_mode: bool) {
    debug!(?target, check_mode, "running pre-flight checks");

    let mut result = verify_environment(target, check_mode);
    if result.needs_root && !result.is_root && should_skip_root_check() {
        warn!("Root check skipped (HOSTPREP_SKIP_ROOT_CHECK=1)");
        result.needs_root = false;
    }

    if !result.is_ok() {
        print_error_and_exit(&result);
    }

    info!("Pre-flight checks passed: root={}", result.is_root);
}
