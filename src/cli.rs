use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// hostprep - idempotent server hardening
#[derive(Parser, Debug)]
#[command(name = "hostprep")]
#[command(about = "Apply an idempotent hardening playbook to a Debian/Ubuntu host")]
#[command(version)]
pub struct Cli {
    /// Log each step's result
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every host command (RUST_LOG overrides both flags)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the playbook
    Run(TargetArgs),
    /// Dry run: report what would change without touching anything
    Check(TargetArgs),
    /// Print the rendered plan as JSON (secrets redacted)
    Show {
        /// Playbook file to use instead of the built-in hardening playbook
        #[arg(short, long)]
        playbook: Option<PathBuf>,
    },
    /// Load and validate a playbook file
    Validate {
        /// Path to the playbook JSON file
        playbook: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Playbook file to use instead of the built-in hardening playbook
    #[arg(short, long)]
    pub playbook: Option<PathBuf>,

    /// Provision a remote host over ssh (`user@host` or an ssh_config alias)
    #[arg(long, value_name = "DEST")]
    pub ssh: Option<String>,

    /// Extra ssh client option, e.g. `Port=2222` (repeatable)
    #[arg(long = "ssh-option", value_name = "KEY=VALUE", requires = "ssh")]
    pub ssh_options: Vec<String>,

    /// Run remote commands through `sudo -n`
    #[arg(long, requires = "ssh")]
    pub sudo: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
