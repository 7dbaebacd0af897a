//! The provisioning runner
//!
//! A run has two phases. [`Runner::prepare`] validates the playbook,
//! resolves every variable and renders every step; nothing touches the host
//! and any failure aborts the run there. [`Runner::execute`] then applies
//! the rendered steps in order, stops at the first failure, and afterwards
//! runs each notified handler once, in the order it was first notified.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::modules::{Action, ApplyContext, Outcome};
use crate::playbook::Playbook;
use crate::template;
use crate::vars::{EnvSource, Variables};

/// A step with its parameters rendered
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedHandler {
    pub name: String,
    pub action: Action,
}

/// A fully rendered playbook, ready to execute
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub playbook: String,
    pub steps: Vec<PlannedStep>,
    pub handlers: Vec<PlannedHandler>,
}

impl Plan {
    /// Render `playbook` with `vars` and check every rendered action
    pub fn render(playbook: &Playbook, vars: &Variables) -> Result<Self> {
        let steps = playbook
            .steps
            .iter()
            .map(|step| {
                let action = render_action(&step.action, vars).map_err(|e| e.in_step(&step.name))?;
                Ok(PlannedStep {
                    name: step.name.clone(),
                    action,
                    notify: step.notify.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let handlers = playbook
            .handlers
            .iter()
            .map(|handler| {
                let action =
                    render_action(&handler.action, vars).map_err(|e| e.in_handler(&handler.name))?;
                Ok(PlannedHandler {
                    name: handler.name.clone(),
                    action,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            playbook: playbook.name.clone(),
            steps,
            handlers,
        })
    }

    fn handler(&self, name: &str) -> Option<&PlannedHandler> {
        self.handlers.iter().find(|h| h.name == name)
    }
}

fn render_action(action: &Action, vars: &Variables) -> Result<Action> {
    let raw = serde_json::to_value(action)?;
    let rendered = template::render_value(&raw, vars)?;
    let action: Action = serde_json::from_value(rendered)
        .map_err(|e| ProvisionError::template(format!("rendered parameters: {}", e)))?;
    action.validate()?;
    Ok(action)
}

/// Handlers waiting to run: each name once, in first-notified order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandlerQueue {
    pending: Vec<String>,
}

impl HandlerQueue {
    pub fn notify(&mut self, handler: &str) {
        if !self.pending.iter().any(|h| h == handler) {
            self.pending.push(handler.to_string());
        }
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub module: &'static str,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HandlerReport {
    pub name: String,
    /// False in check mode, where handlers are only listed
    pub executed: bool,
    pub changed: bool,
}

/// What a run did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub playbook: String,
    pub host: String,
    pub check_mode: bool,
    pub steps: Vec<StepReport>,
    pub handlers: Vec<HandlerReport>,
}

impl RunReport {
    pub fn changed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.changed).count()
    }

    pub fn ok_count(&self) -> usize {
        self.steps.len() - self.changed_count()
    }

    /// Names of handlers that ran (or would run, in check mode)
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }
}

/// Applies playbooks to a host
#[derive(Debug, Clone, Copy, Default)]
pub struct Runner {
    check_mode: bool,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report what would change without mutating the host
    pub fn check_mode(mut self, enabled: bool) -> Self {
        self.check_mode = enabled;
        self
    }

    /// Validate, resolve variables and render. Never touches the host.
    pub fn prepare(&self, playbook: &Playbook, env: &dyn EnvSource) -> Result<Plan> {
        playbook.validate()?;
        let vars = Variables::resolve(&playbook.variables, env)?;
        debug!(count = vars.len(), "variables resolved");
        Plan::render(playbook, &vars)
    }

    /// Prepare and execute in one go
    pub fn run(
        &self,
        playbook: &Playbook,
        env: &dyn EnvSource,
        host: &mut dyn Host,
    ) -> Result<RunReport> {
        let plan = self.prepare(playbook, env)?;
        self.execute(&plan, host)
    }

    pub fn execute(&self, plan: &Plan, host: &mut dyn Host) -> Result<RunReport> {
        let ctx = ApplyContext {
            check_mode: self.check_mode,
        };
        let mut report = RunReport {
            playbook: plan.playbook.clone(),
            host: host.describe(),
            check_mode: self.check_mode,
            steps: Vec::with_capacity(plan.steps.len()),
            handlers: Vec::new(),
        };
        let mut queue = HandlerQueue::default();

        info!(
            playbook = %plan.playbook,
            host = %report.host,
            check_mode = self.check_mode,
            "starting run"
        );

        for step in &plan.steps {
            info!(step = %step.name, module = step.action.module_name(), "running step");
            let outcome = step
                .action
                .apply(host, &ctx)
                .map_err(|e| e.in_step(&step.name))?;
            log_outcome(&step.name, &outcome);

            if outcome.changed {
                for handler in &step.notify {
                    queue.notify(handler);
                }
            }
            report.steps.push(StepReport {
                name: step.name.clone(),
                module: step.action.module_name(),
                changed: outcome.changed,
                message: outcome.message,
            });
        }

        for name in queue.pending() {
            let handler = plan.handler(name).ok_or_else(|| {
                ProvisionError::playbook(format!("handler '{}' is not declared", name))
            })?;
            if self.check_mode {
                info!(handler = %name, "handler would run");
                report.handlers.push(HandlerReport {
                    name: name.clone(),
                    executed: false,
                    changed: true,
                });
                continue;
            }
            info!(handler = %name, "running handler");
            let outcome = handler
                .action
                .apply(host, &ctx)
                .map_err(|e| e.in_handler(name))?;
            report.handlers.push(HandlerReport {
                name: name.clone(),
                executed: true,
                changed: outcome.changed,
            });
        }

        info!(
            changed = report.changed_count(),
            ok = report.ok_count(),
            handlers = report.handlers.len(),
            "run finished"
        );
        Ok(report)
    }
}

fn log_outcome(step: &str, outcome: &Outcome) {
    match (&outcome.message, outcome.changed) {
        (Some(message), true) => info!(step, "changed: {}", message),
        (None, true) => info!(step, "changed"),
        _ => debug!(step, "ok"),
    }
}
