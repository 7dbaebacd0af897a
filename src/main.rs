//! hostprep - main entry point

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hostprep::cli::{Cli, Commands, TargetArgs};
use hostprep::playbook::{Playbook, builtin};
use hostprep::runner::{Plan, RunReport, Runner};
use hostprep::sanity::{self, Target};
use hostprep::{Host, LocalHost, ProcessEnv, ProcessGuard, SshHost, Variables, process_guard};

/// Log to stderr so `--json` output on stdout stays parseable
fn init_logging(cli: &Cli) {
    let fallback = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    // Terminates tracked children (apt-get, ssh, ...) on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let result = match cli.command {
        Commands::Run(target) => provision(&target, false),
        Commands::Check(target) => provision(&target, true),
        Commands::Show { playbook } => show(playbook.as_deref()),
        Commands::Validate { playbook } => validate(&playbook),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn load_playbook(path: Option<&Path>) -> Result<Playbook> {
    match path {
        Some(path) => {
            info!("Loading playbook from {}", path.display());
            Playbook::load_from_file(path)
                .with_context(|| format!("Failed to load playbook {}", path.display()))
        }
        None => Ok(builtin::hardening()),
    }
}

fn provision(args: &TargetArgs, check_mode: bool) -> Result<()> {
    let playbook = load_playbook(args.playbook.as_deref())?;

    let target = if args.ssh.is_some() {
        Target::Ssh
    } else {
        Target::Local
    };
    sanity::run_preflight_checks(target, check_mode);

    let mut host: Box<dyn Host> = match &args.ssh {
        Some(destination) => Box::new(
            SshHost::new(destination.clone())
                .with_options(args.ssh_options.clone())
                .with_sudo(args.sudo),
        ),
        None => Box::new(LocalHost::new()),
    };

    // Children still running when we bail out get cleaned up on drop
    let _guard = ProcessGuard::new();
    let report = Runner::new()
        .check_mode(check_mode)
        .run(&playbook, &ProcessEnv, host.as_mut())
        .with_context(|| format!("Playbook '{}' aborted on {}", playbook.name, host.describe()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let changed_word = if report.check_mode { "would change" } else { "changed" };
    for step in &report.steps {
        match (&step.message, step.changed) {
            (Some(message), true) => println!("~ {:<13} {}: {}", changed_word, step.name, message),
            (None, true) => println!("~ {:<13} {}", changed_word, step.name),
            _ => println!("✓ {:<13} {}", "ok", step.name),
        }
    }
    for handler in &report.handlers {
        let verb = if handler.executed { "handler ran" } else { "handler due" };
        println!("↻ {:<13} {}", verb, handler.name);
    }
    println!();
    println!(
        "{}: {} ok, {} {}, {} handler(s)",
        report.host,
        report.ok_count(),
        report.changed_count(),
        changed_word,
        report.handlers.len()
    );
}

fn show(path: Option<&Path>) -> Result<()> {
    let playbook = load_playbook(path)?;
    playbook.validate().context("Playbook validation failed")?;
    let vars = Variables::resolve(&playbook.variables, &ProcessEnv)
        .context("Failed to resolve variables")?;
    let plan = Plan::render(&playbook, &vars.redacted()).context("Failed to render playbook")?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    info!("Validating playbook file: {}", path.display());
    let playbook = load_playbook(Some(path))?;
    playbook.validate().context("Playbook validation failed")?;
    info!("Playbook validation successful");
    println!(
        "✓ Playbook '{}' is valid: {} steps, {} handlers, {} variables",
        playbook.name,
        playbook.steps.len(),
        playbook.handlers.len(),
        playbook.variables.len()
    );
    Ok(())
}
