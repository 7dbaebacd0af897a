//! The built-in server hardening playbook.
//!
//! Brings a fresh Debian/Ubuntu server to a baseline: patched packages,
//! a timezone, NTP, a key-only sudo user, a hardened SSH daemon, a default
//! deny firewall, fail2ban and unattended upgrades.

use super::{Handler, Playbook, Step};
use crate::modules::{
    Action, AptArgs, AuthorizedKeyArgs, CopyArgs, LineInFileArgs, ServiceArgs, TimezoneArgs,
    UfwArgs, UserArgs,
};
use crate::types::{Protocol, UfwDirection, UfwPolicy, UfwRule, UfwState, UpgradeMode};
use crate::vars::Variable;

/// `sshd_config.d` drop-in
pub const SSHD_HARDENING: &str = include_str!("../../files/sshd_hardening.conf");
/// fail2ban jail overrides
pub const FAIL2BAN_JAIL: &str = include_str!("../../files/jail.local");
/// apt periodic schedule enabling unattended upgrades
pub const AUTO_UPGRADES: &str = include_str!("../../files/20auto-upgrades");

pub const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
pub const SSHD_DROP_IN: &str = "/etc/ssh/sshd_config.d/10-hardening.conf";

pub const RESTART_SSH: &str = "restart ssh";
pub const RESTART_FAIL2BAN: &str = "restart fail2ban";

const BASE_PACKAGES: &[&str] = &[
    "chrony",
    "vim",
    "curl",
    "htop",
    "git",
    "mtr",
    "fail2ban",
    "ufw",
    "unattended-upgrades",
];

/// `sshd_config` directives enforced in the main file as well as the drop-in,
/// since a directive set earlier in the main file wins over the drop-in
const SSHD_DIRECTIVES: &[(&str, &str)] = &[
    ("PasswordAuthentication", "no"),
    ("KbdInteractiveAuthentication", "no"),
    ("ChallengeResponseAuthentication", "no"),
    ("PubkeyAuthentication", "yes"),
    ("PermitRootLogin", "prohibit-password"),
];

pub fn variables() -> Vec<Variable> {
    vec![
        Variable::env("timezone", "TIMEZONE"),
        Variable::env("ssh_pub_key_file", "SSH_PUB_KEY_FILE"),
        Variable::file("ssh_pub_key", "{{ ssh_pub_key_file }}"),
        Variable::env("new_user", "NEW_USER"),
        Variable::env("new_user_password", "NEW_USER_PASSWORD").secret(),
        Variable::env("admin_user", "ADMIN_USER"),
    ]
}

fn ssh_directive(directive: &str, value: &str) -> Step {
    Step::new(
        &format!("Set {} {}", directive, value),
        Action::Lineinfile(LineInFileArgs::replace(
            SSHD_CONFIG,
            &format!(r"^#?\s*{}\s", directive),
            &format!("{} {}", directive, value),
        )),
    )
    .notify(RESTART_SSH)
}

fn authorized_key(user: &str) -> Action {
    Action::AuthorizedKey(AuthorizedKeyArgs {
        user: user.to_string(),
        key: "{{ ssh_pub_key }}".to_string(),
    })
}

fn root_file(dest: &str, content: &str, mode: &str) -> CopyArgs {
    CopyArgs::content(dest, content)
        .mode(mode)
        .owned_by("root", "root")
}

pub fn hardening() -> Playbook {
    let mut steps = vec![
        Step::new(
            "Update apt cache and upgrade packages",
            Action::Apt(AptArgs {
                update_cache: true,
                cache_valid_time: Some(3600),
                upgrade: Some(UpgradeMode::Dist),
                ..AptArgs::default()
            }),
        ),
        Step::new(
            "Install base packages",
            Action::Apt(AptArgs {
                packages: BASE_PACKAGES.iter().map(|p| p.to_string()).collect(),
                ..AptArgs::default()
            }),
        ),
        Step::new(
            "Set timezone",
            Action::Timezone(TimezoneArgs {
                name: "{{ timezone }}".to_string(),
            }),
        ),
        Step::new(
            "Enable chrony",
            Action::Service(ServiceArgs::running_at_boot("chrony")),
        ),
        Step::new("Authorize SSH key for admin user", authorized_key("{{ admin_user }}")),
        Step::new(
            "Create sudo user",
            Action::User(UserArgs {
                password: Some("{{ new_user_password }}".to_string()),
                shell: Some("/bin/bash".to_string()),
                groups: vec!["sudo".to_string()],
                ..UserArgs::new("{{ new_user }}")
            }),
        ),
        Step::new(
            "Install sudoers drop-in",
            Action::Copy(
                root_file(
                    "/etc/sudoers.d/{{ new_user }}",
                    "{{ new_user }} ALL=(ALL:ALL) ALL\n",
                    "0440",
                )
                .validated_by("visudo -cf %s"),
            ),
        ),
        Step::new("Authorize SSH key for sudo user", authorized_key("{{ new_user }}")),
        Step::new(
            "Install SSH hardening drop-in",
            Action::Copy(root_file(SSHD_DROP_IN, SSHD_HARDENING, "0644").validated_by("sshd -t -f %s")),
        )
        .notify(RESTART_SSH),
    ];

    steps.extend(
        SSHD_DIRECTIVES
            .iter()
            .map(|(directive, value)| ssh_directive(directive, value)),
    );

    steps.extend([
        Step::new(
            "Deny incoming traffic by default",
            Action::Ufw(UfwArgs::default_policy(UfwPolicy::Deny, UfwDirection::Incoming)),
        ),
        Step::new(
            "Allow outgoing traffic by default",
            Action::Ufw(UfwArgs::default_policy(UfwPolicy::Allow, UfwDirection::Outgoing)),
        ),
        Step::new(
            "Allow SSH",
            Action::Ufw(UfwArgs::rule(UfwRule::Allow, "22", Protocol::Tcp)),
        ),
        Step::new("Enable firewall", Action::Ufw(UfwArgs::state(UfwState::Enabled))),
        Step::new(
            "Install fail2ban jail",
            Action::Copy(root_file("/etc/fail2ban/jail.local", FAIL2BAN_JAIL, "0644")),
        )
        .notify(RESTART_FAIL2BAN),
        Step::new(
            "Enable fail2ban",
            Action::Service(ServiceArgs::running_at_boot("fail2ban")),
        ),
        Step::new(
            "Schedule unattended upgrades",
            Action::Copy(root_file("/etc/apt/apt.conf.d/20auto-upgrades", AUTO_UPGRADES, "0644")),
        ),
        Step::new(
            "Enable unattended-upgrades",
            Action::Service(ServiceArgs::running_at_boot("unattended-upgrades")),
        ),
    ]);

    Playbook {
        name: "hardening".to_string(),
        description: "Baseline hardening for a fresh Debian or Ubuntu server".to_string(),
        variables: variables(),
        steps,
        handlers: vec![
            Handler::new(RESTART_SSH, Action::Service(ServiceArgs::restarted("ssh"))),
            Handler::new(
                RESTART_FAIL2BAN,
                Action::Service(ServiceArgs::restarted("fail2ban")),
            ),
        ],
    }
}
