//! Type-safe parameter enums for the capability modules
//!
//! The string forms double as the JSON playbook spelling and as the words
//! passed to the underlying system tools where the two coincide.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// apt upgrade flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpgradeMode {
    /// `apt-get upgrade`: never removes or adds packages
    #[default]
    Safe,
    /// `apt-get dist-upgrade`
    Full,
    /// `apt-get dist-upgrade`
    Dist,
}

impl UpgradeMode {
    /// apt-get subcommand implementing this mode
    pub fn apt_subcommand(self) -> &'static str {
        match self {
            Self::Safe => "upgrade",
            Self::Full | Self::Dist => "dist-upgrade",
        }
    }
}

/// Desired runtime state of a systemd unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Started,
    Stopped,
    /// Always restarts, so always reports a change
    Restarted,
}

/// What a `file` step ensures exists at its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileState {
    #[default]
    Directory,
    File,
}

/// Presence of a line or block in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// Whether the ufw firewall is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UfwState {
    Enabled,
    Disabled,
}

/// ufw default policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UfwPolicy {
    Allow,
    Deny,
    Reject,
}

impl UfwPolicy {
    /// Value ufw writes to `/etc/default/ufw` for this policy
    pub fn iptables_target(self) -> &'static str {
        match self {
            Self::Allow => "ACCEPT",
            Self::Deny => "DROP",
            Self::Reject => "REJECT",
        }
    }
}

/// Traffic direction a ufw default policy applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UfwDirection {
    #[default]
    Incoming,
    Outgoing,
    Routed,
}

impl UfwDirection {
    /// Key holding this direction's policy in `/etc/default/ufw`
    pub fn defaults_key(self) -> &'static str {
        match self {
            Self::Incoming => "DEFAULT_INPUT_POLICY",
            Self::Outgoing => "DEFAULT_OUTPUT_POLICY",
            Self::Routed => "DEFAULT_FORWARD_POLICY",
        }
    }
}

/// ufw rule verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UfwRule {
    Allow,
    Deny,
    Limit,
    Reject,
}

/// Transport protocol of a firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Any,
    Tcp,
    Udp,
}
