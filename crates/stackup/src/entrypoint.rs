// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Entrypoint chains: ordered setup actions followed by one terminal command.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::environment::FinalEnv;
use crate::Error;

#[cfg(test)]
#[path = "./entrypoint_test.rs"]
mod entrypoint_test;

/// The privileged user every chain starts as.
pub const ROOT_USER: &str = "root";

/// Source name used for steps declared by the plan's own entrypoint.
pub const ENTRYPOINT_SOURCE: &str = "entrypoint";

/// Final entrypoint of a plan.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EntrypointSpec {
    /// User the terminal command runs as.
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<SetupAction>,

    /// Terminal executable followed by its arguments.
    #[serde(default)]
    pub command: Vec<String>,
}

fn default_user() -> String {
    ROOT_USER.to_string()
}

impl Default for EntrypointSpec {
    fn default() -> Self {
        Self {
            user: default_user(),
            setup: Vec::new(),
            command: Vec::new(),
        }
    }
}

/// A single setup action run before the terminal command.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SetupAction {
    User(SwitchUser),
    Chmod(Chmod),
    Chown(Chown),
    Remove(Remove),
    Run(Run),
}

/// Privilege change. Switching back to root from a restricted user
/// requires an `escalation` reason.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SwitchUser {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chmod {
    pub chmod: String,
    pub mode: FileMode,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chown {
    pub chown: String,
    /// `user` or `user:group`.
    pub owner: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

/// Temporary file cleanup.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Remove {
    pub remove: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

/// Opaque command run by the container runtime.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Run {
    pub run: Vec<String>,
}

/// Unix permission bits, written in octal (`755` or `"0755"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Digits(u64),
            Text(String),
        }

        let digits = match Repr::deserialize(deserializer)? {
            Repr::Digits(n) => n.to_string(),
            Repr::Text(s) => s,
        };
        u32::from_str_radix(digits.trim(), 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .map(FileMode)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid file mode '{digits}'")))
    }
}

impl SetupAction {
    /// Users that must exist for this action to run.
    pub fn users(&self) -> Vec<&str> {
        match self {
            Self::User(u) => vec![u.user.as_str()],
            Self::Chown(c) => {
                let user = c.owner.split(':').next().unwrap_or_default();
                if user.is_empty() {
                    Vec::new()
                } else {
                    vec![user]
                }
            }
            _ => Vec::new(),
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        let flag = |recursive: bool| if recursive { " -R" } else { "" };
        match self {
            Self::User(u) => format!("user {}", u.user),
            Self::Chmod(c) => format!("chmod{} {} {}", flag(c.recursive), c.mode, c.chmod),
            Self::Chown(c) => format!("chown{} {} {}", flag(c.recursive), c.owner, c.chown),
            Self::Remove(r) => format!("rm{} {}", flag(r.recursive), r.remove),
            Self::Run(r) => format!("run {}", r.run.join(" ")),
        }
    }
}

/// Setup actions contributed by one collaborator (usually a stage).
#[derive(Debug, Clone, Copy)]
pub struct SetupContribution<'a> {
    pub source: &'a str,
    pub actions: &'a [SetupAction],
}

/// One step of the linear execution plan.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlannedStep {
    /// Stage or entrypoint that declared the action.
    pub source: String,
    /// User the step runs as.
    pub user: String,
    pub action: SetupAction,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TerminalCommand {
    pub user: String,
    pub argv: Vec<String>,
}

/// Ordered setup steps and the single terminal command, with the
/// environment snapshot they run under.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub env: FinalEnv,
    pub steps: Vec<PlannedStep>,
    pub terminal: TerminalCommand,
}

/// Collaborator that performs the steps of an [`ExecutionPlan`].
pub trait ActionExecutor {
    /// Run a single setup step. An error aborts the plan.
    fn run_step(&mut self, step: &PlannedStep, env: &FinalEnv) -> Result<(), String>;

    /// Hand control to the terminal command.
    fn launch(&mut self, command: &TerminalCommand, env: &FinalEnv);
}

impl ExecutionPlan {
    /// Run every setup step in order, then launch the terminal command.
    ///
    /// The first failing step aborts the plan before the terminal
    /// command is launched.
    pub fn execute<E: ActionExecutor + ?Sized>(
        &self,
        executor: &mut E,
    ) -> crate::Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            tracing::debug!(
                index,
                source = %step.source,
                action = %step.action.describe(),
                "running setup step"
            );
            executor
                .run_step(step, &self.env)
                .map_err(|message| Error::SetupActionFailed {
                    index,
                    action: step.action.describe(),
                    message,
                })?;
        }
        tracing::info!(
            user = %self.terminal.user,
            command = ?self.terminal.argv,
            "launching terminal command"
        );
        executor.launch(&self.terminal, &self.env);
        Ok(())
    }
}

/// Build the execution plan from contributed setup actions and the entrypoint.
///
/// Contributions are applied in the order given, followed by the
/// entrypoint's own actions. The chain starts as root; once it has
/// dropped to another user, switching back to root is rejected unless
/// the switch carries an escalation reason.
pub fn build_execution_plan(
    env: &FinalEnv,
    contributions: &[SetupContribution<'_>],
    entrypoint: &EntrypointSpec,
) -> crate::Result<ExecutionPlan> {
    if entrypoint.command.is_empty() {
        return Err(Error::MissingTerminalCommand);
    }

    let own = SetupContribution {
        source: ENTRYPOINT_SOURCE,
        actions: &entrypoint.setup,
    };
    let mut current = ROOT_USER.to_string();
    let mut steps = Vec::new();

    for contribution in contributions.iter().chain(std::iter::once(&own)) {
        for action in contribution.actions {
            if let SetupAction::User(switch) = action {
                check_switch(&current, switch, contribution.source)?;
                current = switch.user.clone();
            }
            steps.push(PlannedStep {
                source: contribution.source.to_string(),
                user: current.clone(),
                action: action.clone(),
            });
        }
    }

    if current != entrypoint.user {
        let switch = SwitchUser {
            user: entrypoint.user.clone(),
            escalation: None,
        };
        check_switch(&current, &switch, ENTRYPOINT_SOURCE)?;
        steps.push(PlannedStep {
            source: ENTRYPOINT_SOURCE.to_string(),
            user: entrypoint.user.clone(),
            action: SetupAction::User(switch),
        });
    }

    Ok(ExecutionPlan {
        env: env.clone(),
        steps,
        terminal: TerminalCommand {
            user: entrypoint.user.clone(),
            argv: entrypoint.command.clone(),
        },
    })
}

fn check_switch(current: &str, switch: &SwitchUser, source: &str) -> crate::Result<()> {
    if current == ROOT_USER || switch.user != ROOT_USER {
        return Ok(());
    }
    match &switch.escalation {
        Some(reason) => {
            tracing::warn!(
                from = current,
                source,
                reason = %reason,
                "privilege escalation to root"
            );
            Ok(())
        }
        None => Err(Error::PrivilegeEscalation {
            from: current.to_string(),
            to: switch.user.clone(),
            source_name: source.to_string(),
        }),
    }
}
