// In-memory stand-in for a Debian server.
//
// Simulates the slice of dpkg/apt, systemd, timedatectl, the shadow
// utilities, ufw, visudo and sshd that the capability modules drive, and
// counts every mutating operation so tests can assert that converged state
// produces none.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use hostprep::modules::apt::CACHE_AGE_SCRIPT;
use hostprep::{CommandOutput, FileKind, FileStat, Host, HostCommand, ProvisionError, Result};

pub const ADMIN_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHostprepTestKey admin@laptop";

pub const STOCK_SSHD_CONFIG: &str = "Include /etc/ssh/sshd_config.d/*.conf\n\
#PermitRootLogin prohibit-password\n\
#PubkeyAuthentication yes\n\
PasswordAuthentication yes\n\
KbdInteractiveAuthentication no\n\
UsePAM yes\n\
X11Forwarding yes\n\
Subsystem sftp /usr/lib/openssh/sftp-server\n";

const STOCK_UFW_DEFAULTS: &str = "IPV6=yes\n\
DEFAULT_INPUT_POLICY=\"ACCEPT\"\n\
DEFAULT_OUTPUT_POLICY=\"ACCEPT\"\n\
DEFAULT_FORWARD_POLICY=\"DROP\"\n\
MANAGE_BUILTINS=no\n";

#[derive(Debug, Clone)]
pub struct FakeEntry {
    pub content: Option<String>,
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

impl FakeEntry {
    fn dir(mode: u32, owner: &str) -> Self {
        Self {
            content: None,
            mode,
            owner: owner.to_string(),
            group: owner.to_string(),
        }
    }

    fn file(content: &str, mode: u32) -> Self {
        Self {
            content: Some(content.to_string()),
            mode,
            owner: "root".to_string(),
            group: "root".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeUser {
    pub uid: u32,
    pub home: String,
    pub shell: String,
    pub groups: Vec<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FakeService {
    pub active: bool,
    pub enabled: bool,
}

#[derive(Debug)]
pub struct FakeHost {
    pub entries: BTreeMap<PathBuf, FakeEntry>,
    pub packages: BTreeSet<String>,
    pub pending_upgrades: usize,
    pub cache_age: u64,
    pub services: BTreeMap<String, FakeService>,
    pub timezone: String,
    pub users: BTreeMap<String, FakeUser>,
    pub ufw_active: bool,
    pub ufw_rules: Vec<String>,
    /// Make `visudo -c` reject everything
    pub visudo_rejects: bool,
    /// Services whose restart fails
    pub broken_services: BTreeSet<String>,
    pub mutations: usize,
    pub restarts: Vec<String>,
    pub commands: Vec<String>,
}

fn ok(stdout: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput::ok(stdout))
}

fn fail(code: i32, stderr: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput::failed(code, stderr))
}

impl FakeHost {
    /// A freshly installed server: an `admin` login user, stock sshd config,
    /// stale package cache and pending upgrades
    pub fn fresh() -> Self {
        let mut host = Self {
            entries: BTreeMap::new(),
            packages: ["openssh-server", "sudo", "systemd"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            pending_upgrades: 3,
            cache_age: 86_400,
            services: BTreeMap::new(),
            timezone: "Etc/UTC".to_string(),
            users: BTreeMap::new(),
            ufw_active: false,
            ufw_rules: Vec::new(),
            visudo_rejects: false,
            broken_services: BTreeSet::new(),
            mutations: 0,
            restarts: Vec::new(),
            commands: Vec::new(),
        };
        for dir in [
            "/",
            "/etc",
            "/etc/ssh",
            "/etc/ssh/sshd_config.d",
            "/etc/sudoers.d",
            "/etc/fail2ban",
            "/etc/apt",
            "/etc/apt/apt.conf.d",
            "/etc/default",
            "/home",
        ] {
            host.entries.insert(PathBuf::from(dir), FakeEntry::dir(0o755, "root"));
        }
        host.entries
            .insert(PathBuf::from("/root"), FakeEntry::dir(0o700, "root"));
        host.entries
            .insert(PathBuf::from("/home/admin"), FakeEntry::dir(0o755, "admin"));
        host.entries.insert(
            PathBuf::from("/etc/ssh/sshd_config"),
            FakeEntry::file(STOCK_SSHD_CONFIG, 0o644),
        );
        host.entries.insert(
            PathBuf::from("/etc/default/ufw"),
            FakeEntry::file(STOCK_UFW_DEFAULTS, 0o644),
        );
        host.users.insert(
            "root".to_string(),
            FakeUser {
                uid: 0,
                home: "/root".to_string(),
                shell: "/bin/bash".to_string(),
                groups: Vec::new(),
                password: None,
            },
        );
        host.users.insert(
            "admin".to_string(),
            FakeUser {
                uid: 1000,
                home: "/home/admin".to_string(),
                shell: "/bin/bash".to_string(),
                groups: vec!["sudo".to_string()],
                password: None,
            },
        );
        host.services.insert(
            "ssh".to_string(),
            FakeService {
                active: true,
                enabled: true,
            },
        );
        host
    }

    pub fn file(&self, path: &str) -> Option<&FakeEntry> {
        self.entries
            .get(Path::new(path))
            .filter(|e| e.content.is_some())
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.file(path).and_then(|e| e.content.as_deref())
    }

    pub fn set_content(&mut self, path: &str, content: &str) {
        if let Some(entry) = self.entries.get_mut(Path::new(path)) {
            entry.content = Some(content.to_string());
        }
    }

    pub fn service(&self, name: &str) -> FakeService {
        self.services.get(name).copied().unwrap_or_default()
    }

    /// Forget mutations, restarts and commands seen so far
    pub fn reset_counters(&mut self) {
        self.mutations = 0;
        self.restarts.clear();
        self.commands.clear();
    }

    fn mutate(&mut self) {
        self.mutations += 1;
    }

    fn entry_mut(&mut self, path: &Path) -> Result<&mut FakeEntry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| ProvisionError::host(format!("{}: no such file", path.display())))
    }

    fn require_parent(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if self.entries.get(parent).is_some_and(|e| e.content.is_none()) => Ok(()),
            _ => Err(ProvisionError::host(format!(
                "{}: parent directory missing",
                path.display()
            ))),
        }
    }

    fn primary_group(name: &str) -> String {
        name.to_string()
    }

    fn group_line(&self, user: &str) -> Option<String> {
        let entry = self.users.get(user)?;
        let mut groups = vec![Self::primary_group(user)];
        groups.extend(entry.groups.iter().cloned());
        Some(groups.join(" "))
    }

    fn apt(&mut self, args: &[&str]) -> Result<CommandOutput> {
        match args {
            ["update"] => {
                self.mutate();
                self.cache_age = 0;
                ok("Reading package lists... Done\n")
            }
            ["install", "-y", packages @ ..] => {
                if let Some(unknown) = packages.iter().find(|p| p.starts_with("nosuch")) {
                    return fail(100, format!("E: Unable to locate package {}\n", unknown));
                }
                self.mutate();
                for package in packages {
                    self.packages.insert(package.to_string());
                    if matches!(*package, "chrony" | "fail2ban" | "unattended-upgrades") {
                        self.services.entry(package.to_string()).or_default();
                    }
                }
                ok("")
            }
            ["-s", "upgrade" | "dist-upgrade"] => {
                let lines: String = (0..self.pending_upgrades)
                    .map(|i| format!("Inst pkg{} [1.0] (1.1 Debian:12/stable [amd64])\n", i))
                    .collect();
                ok(lines)
            }
            [.., "upgrade" | "dist-upgrade"] => {
                self.mutate();
                self.pending_upgrades = 0;
                ok("")
            }
            _ => fail(100, format!("E: unsupported apt-get call {:?}", args)),
        }
    }

    fn systemctl(&mut self, verb: &str, name: &str) -> Result<CommandOutput> {
        let mut service = self.service(name);
        let out = match verb {
            "is-active" => {
                return if service.active {
                    ok("active\n")
                } else {
                    fail(3, "").map(|o| CommandOutput {
                        stdout: "inactive\n".to_string(),
                        ..o
                    })
                };
            }
            "is-enabled" => {
                return if service.enabled {
                    ok("enabled\n")
                } else {
                    fail(1, "").map(|o| CommandOutput {
                        stdout: "disabled\n".to_string(),
                        ..o
                    })
                };
            }
            "start" => {
                service.active = true;
                ok("")
            }
            "stop" => {
                service.active = false;
                ok("")
            }
            "restart" => {
                if self.broken_services.contains(name) {
                    return fail(1, format!("Job for {}.service failed.\n", name));
                }
                self.restarts.push(name.to_string());
                service.active = true;
                ok("")
            }
            "enable" => {
                service.enabled = true;
                ok("")
            }
            "disable" => {
                service.enabled = false;
                ok("")
            }
            _ => return fail(1, format!("Unknown command verb {}", verb)),
        };
        self.mutate();
        self.services.insert(name.to_string(), service);
        out
    }

    fn useradd(&mut self, args: &[&str]) -> Result<CommandOutput> {
        let Some((name, flags)) = args.split_last() else {
            return fail(2, "Usage: useradd");
        };
        if self.users.contains_key(*name) {
            return fail(9, format!("useradd: user '{}' already exists\n", name));
        }
        let mut user = FakeUser {
            uid: 1000 + self.users.len() as u32,
            home: format!("/home/{}", name),
            shell: "/bin/sh".to_string(),
            groups: Vec::new(),
            password: None,
        };
        let mut create_home = false;
        let mut iter = flags.iter();
        while let Some(flag) = iter.next() {
            match *flag {
                "-m" => create_home = true,
                "-s" => user.shell = iter.next().unwrap_or(&"").to_string(),
                "-G" => {
                    user.groups = iter
                        .next()
                        .unwrap_or(&"")
                        .split(',')
                        .map(str::to_string)
                        .collect()
                }
                other => return fail(2, format!("useradd: unsupported flag {}", other)),
            }
        }
        if create_home {
            self.entries
                .insert(PathBuf::from(&user.home), FakeEntry::dir(0o750, name));
        }
        self.users.insert(name.to_string(), user);
        self.mutate();
        ok("")
    }

    fn usermod(&mut self, args: &[&str]) -> Result<CommandOutput> {
        let [flag, value, name] = args else {
            return fail(2, "Usage: usermod");
        };
        let Some(user) = self.users.get_mut(*name) else {
            return fail(6, format!("usermod: user '{}' does not exist\n", name));
        };
        match *flag {
            "-s" => user.shell = value.to_string(),
            "-aG" => {
                for group in value.split(',') {
                    if !user.groups.iter().any(|g| g == group) {
                        user.groups.push(group.to_string());
                    }
                }
            }
            "-G" => user.groups = value.split(',').map(str::to_string).collect(),
            other => return fail(2, format!("usermod: unsupported flag {}", other)),
        }
        self.mutate();
        ok("")
    }

    fn chpasswd(&mut self, stdin: Option<&str>) -> Result<CommandOutput> {
        let Some((name, password)) = stdin.and_then(|s| s.trim_end().split_once(':')) else {
            return fail(1, "chpasswd: line 1: missing new password\n");
        };
        let Some(user) = self.users.get_mut(name) else {
            return fail(1, format!("chpasswd: user '{}' does not exist\n", name));
        };
        user.password = Some(password.to_string());
        self.mutate();
        ok("")
    }

    fn ufw(&mut self, args: &[&str]) -> Result<CommandOutput> {
        match args {
            ["show", "added"] => {
                let mut out = "Added user rules (see 'ufw status' for running firewall):\n".to_string();
                if self.ufw_rules.is_empty() {
                    out.push_str("(None)\n");
                }
                for rule in &self.ufw_rules {
                    out.push_str(rule);
                    out.push('\n');
                }
                ok(out)
            }
            ["status", "verbose"] => {
                if self.ufw_active {
                    ok("Status: active\nLogging: on (low)\n")
                } else {
                    ok("Status: inactive\n")
                }
            }
            ["--force", "enable"] => {
                self.ufw_active = true;
                self.mutate();
                ok("Firewall is active and enabled on system startup\n")
            }
            ["disable"] => {
                self.ufw_active = false;
                self.mutate();
                ok("Firewall stopped and disabled on system startup\n")
            }
            ["default", policy, direction] => {
                let key = match *direction {
                    "incoming" => "DEFAULT_INPUT_POLICY",
                    "outgoing" => "DEFAULT_OUTPUT_POLICY",
                    "routed" => "DEFAULT_FORWARD_POLICY",
                    _ => return fail(1, "ERROR: Invalid direction\n"),
                };
                let target = match *policy {
                    "allow" => "ACCEPT",
                    "deny" => "DROP",
                    "reject" => "REJECT",
                    _ => return fail(1, "ERROR: Invalid policy\n"),
                };
                let defaults = self.content("/etc/default/ufw").unwrap_or_default();
                let updated: String = defaults
                    .lines()
                    .map(|line| {
                        if line.starts_with(&format!("{}=", key)) {
                            format!("{}=\"{}\"\n", key, target)
                        } else {
                            format!("{}\n", line)
                        }
                    })
                    .collect();
                self.set_content("/etc/default/ufw", &updated);
                self.mutate();
                ok("")
            }
            [verb @ ("allow" | "deny" | "limit" | "reject"), target] => {
                self.ufw_rules.push(format!("ufw {} {}", verb, target));
                self.mutate();
                ok("Rules updated\n")
            }
            _ => fail(1, format!("ERROR: unsupported ufw call {:?}", args)),
        }
    }

    fn validate_sudoers(&self, path: &str) -> Result<CommandOutput> {
        let Some(content) = self.content(path) else {
            return fail(1, format!("visudo: unable to open {}\n", path));
        };
        let valid = !self.visudo_rejects
            && content
                .lines()
                .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
                .all(|l| {
                    let fields: Vec<&str> = l.split_whitespace().collect();
                    matches!(fields.as_slice(), [_, spec, "ALL"] if spec.starts_with("ALL=("))
                });
        if valid {
            ok(format!("{}: parsed OK\n", path))
        } else {
            fail(1, format!("{}:1:1: syntax error\n", path))
        }
    }

    fn validate_sshd(&self, path: &str) -> Result<CommandOutput> {
        let Some(content) = self.content(path) else {
            return fail(255, format!("{}: No such file or directory\n", path));
        };
        let bad = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .find(|l| l.split_whitespace().count() < 2);
        match bad {
            None => ok(""),
            Some(line) => fail(255, format!("{}: bad configuration option: {}\n", path, line)),
        }
    }

    fn shell(&mut self, script: &str) -> Result<CommandOutput> {
        if script == CACHE_AGE_SCRIPT {
            return ok(format!("{}\n", self.cache_age));
        }
        if let Some(path) = script.strip_prefix("visudo -cf ") {
            return self.validate_sudoers(path.trim_matches('\''));
        }
        if let Some(path) = script.strip_prefix("sshd -t -f ") {
            return self.validate_sshd(path.trim_matches('\''));
        }
        fail(127, format!("sh: unsupported script: {}\n", script))
    }
}

impl Host for FakeHost {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    fn run(&mut self, cmd: &HostCommand) -> Result<CommandOutput> {
        self.commands.push(cmd.to_string());
        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        match (cmd.program.as_str(), args.as_slice()) {
            ("sh", ["-c", script]) => self.shell(script),
            ("dpkg-query", ["-W", "-f=${Status}", package]) => {
                if self.packages.contains(*package) {
                    ok("install ok installed")
                } else {
                    fail(1, format!("dpkg-query: no packages found matching {}\n", package))
                }
            }
            ("apt-get", args) => self.apt(args),
            ("systemctl", [verb, name]) => self.systemctl(verb, name),
            ("timedatectl", ["show", "-p", "Timezone", "--value"]) => {
                ok(format!("{}\n", self.timezone))
            }
            ("timedatectl", ["set-timezone", zone]) => {
                self.timezone = zone.to_string();
                self.mutate();
                ok("")
            }
            ("getent", ["passwd", name]) => match self.users.get(*name) {
                Some(user) => ok(format!(
                    "{}:x:{}:{}::{}:{}\n",
                    name, user.uid, user.uid, user.home, user.shell
                )),
                None => fail(2, ""),
            },
            ("id", ["-nG", name]) => match self.group_line(name) {
                Some(line) => ok(format!("{}\n", line)),
                None => fail(1, format!("id: '{}': no such user\n", name)),
            },
            ("id", ["-gn", name]) => match self.users.contains_key(*name) {
                true => ok(format!("{}\n", Self::primary_group(name))),
                false => fail(1, format!("id: '{}': no such user\n", name)),
            },
            ("useradd", args) => self.useradd(args),
            ("usermod", args) => self.usermod(args),
            ("chpasswd", []) => self.chpasswd(cmd.stdin.as_deref()),
            ("ufw", args) => self.ufw(args),
            (program, _) => fail(127, format!("{}: command not found\n", program)),
        }
    }

    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        match self.entries.get(path) {
            None => Ok(None),
            Some(FakeEntry { content: Some(c), .. }) => Ok(Some(c.clone())),
            Some(_) => Err(ProvisionError::host(format!("{}: is a directory", path.display()))),
        }
    }

    fn stat(&mut self, path: &Path) -> Result<Option<FileStat>> {
        Ok(self.entries.get(path).map(|e| FileStat {
            kind: if e.content.is_some() {
                FileKind::File
            } else {
                FileKind::Directory
            },
            mode: e.mode,
            owner: e.owner.clone(),
            group: e.group.clone(),
        }))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.require_parent(path)?;
        self.mutate();
        match self.entries.get_mut(path) {
            Some(entry) if entry.content.is_some() => entry.content = Some(contents.to_string()),
            Some(_) => {
                return Err(ProvisionError::host(format!("{}: is a directory", path.display())));
            }
            None => {
                self.entries
                    .insert(path.to_path_buf(), FakeEntry::file(contents, 0o644));
            }
        }
        Ok(())
    }

    fn create_dir(&mut self, path: &Path) -> Result<()> {
        self.mutate();
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            self.entries
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| FakeEntry::dir(0o755, "root"));
        }
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        self.mutate();
        self.entry_mut(path)?.mode = mode;
        Ok(())
    }

    fn set_owner(&mut self, path: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        if let Some(owner) = owner {
            if !self.users.contains_key(owner) {
                return Err(ProvisionError::host(format!("chown: invalid user: '{}'", owner)));
            }
        }
        self.mutate();
        let entry = self.entry_mut(path)?;
        if let Some(owner) = owner {
            entry.owner = owner.to_string();
        }
        if let Some(group) = group {
            entry.group = group.to_string();
        }
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        self.mutate();
        let entry = self
            .entries
            .remove(from)
            .ok_or_else(|| ProvisionError::host(format!("mv: {}: no such file", from.display())))?;
        self.entries.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        if self.entries.remove(path).is_some() {
            self.mutate();
        }
        Ok(())
    }
}

/// Environment for the built-in playbook, with the admin key in a temp file
pub struct TestEnv {
    pub vars: HashMap<String, String>,
    _key_dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn valid() -> Self {
        let key_dir = tempfile::tempdir().expect("temp dir");
        let key_path = key_dir.path().join("id_ed25519.pub");
        std::fs::write(&key_path, format!("{}\n", ADMIN_KEY)).expect("write key");

        let vars = [
            ("TIMEZONE", "Europe/Berlin".to_string()),
            ("SSH_PUB_KEY_FILE", key_path.display().to_string()),
            ("NEW_USER", "alice".to_string()),
            ("NEW_USER_PASSWORD", "correct horse battery staple".to_string()),
            ("ADMIN_USER", "admin".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            vars,
            _key_dir: key_dir,
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}
