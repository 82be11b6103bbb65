// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Whole-plan validation.
//!
//! Validation is a single pure pass over a plan and its stage
//! resolutions. It never stops at the first problem: every violation is
//! collected so that a plan can be fixed in one edit.

use std::collections::BTreeSet;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entrypoint::{ENTRYPOINT_SOURCE, ROOT_USER};
use crate::environment::referenced_variables;
use crate::merge::merge_trees;
use crate::resolve::StageResolution;
use crate::spec::CompositionPlan;

#[cfg(test)]
#[path = "./validate_test.rs"]
mod validate_test;

/// A single problem found while validating a plan.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Stage {stage} could not be resolved: {reason}")]
    #[diagnostic(code(stackup::validate::unresolved_stage))]
    UnresolvedStage { stage: String, reason: String },

    #[error("Stage {stage} is listed more than once")]
    #[diagnostic(
        code(stackup::validate::duplicate_stage),
        help("Each component version may appear only once per plan")
    )]
    DuplicateStage { stage: String },

    #[error("Stage {stage} has no path {path} to copy")]
    #[diagnostic(code(stackup::validate::missing_source))]
    MissingSource { stage: String, path: String },

    #[error("Stage {stage} writes {path} which is already provided by {prior_owner}")]
    #[diagnostic(
        code(stackup::validate::path_conflict),
        help("Make the destinations disjoint or set 'overwrite: true' on the later copy")
    )]
    PathConflict {
        stage: String,
        path: String,
        prior_owner: String,
    },

    #[error("Stage {stage} references ${variable} before it is defined")]
    #[diagnostic(
        code(stackup::validate::dangling_reference),
        help("Set the variable in an earlier stage or list it under base_environment")
    )]
    DanglingReference { stage: String, variable: String },

    #[error("User {user} required by {context} does not exist in the image")]
    #[diagnostic(
        code(stackup::validate::missing_user),
        help("Users must be provided by one of the composed stages")
    )]
    MissingUser { user: String, context: String },

    #[error("Entrypoint has no terminal command")]
    #[diagnostic(code(stackup::validate::missing_terminal_command))]
    MissingTerminalCommand,
}

/// Check a plan against its stage resolutions, returning every violation.
///
/// `resolutions` must be in plan order, one per declared stage.
pub fn collect_violations(
    plan: &CompositionPlan,
    resolutions: &[StageResolution],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen = BTreeSet::new();
    for spec in &plan.stages {
        let key = spec
            .reference()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| spec.stage.trim().to_string());
        if !seen.insert(key.clone()) {
            errors.push(ValidationError::DuplicateStage { stage: key });
        }
    }

    let mut users: BTreeSet<&str> = BTreeSet::from([ROOT_USER]);
    let mut defined: BTreeSet<String> =
        plan.base_environment.keys().cloned().collect();
    let mut dangling = BTreeSet::new();

    for (spec, resolution) in plan.stages.iter().zip(resolutions) {
        let (label, environment) = match resolution {
            Ok(stage) => {
                for copy in &stage.copy {
                    if !stage.tree.contains(&copy.source) {
                        errors.push(ValidationError::MissingSource {
                            stage: stage.label.clone(),
                            path: crate::tree::normalize_path(&copy.source),
                        });
                    }
                }
                users.extend(stage.users.iter().map(String::as_str));
                (stage.label.as_str(), stage.environment.as_slice())
            }
            Err(err) => {
                errors.push(ValidationError::UnresolvedStage {
                    stage: spec.stage.clone(),
                    reason: err.to_string(),
                });
                // the plan's own contributions still define variables
                (spec.stage.as_str(), spec.environment.as_slice())
            }
        };

        for op in environment {
            let Some(name) = op.variable() else {
                continue;
            };
            let mut referenced = referenced_variables(op.value().unwrap_or_default());
            if op.is_path_op() {
                referenced.insert(0, name.to_string());
            }
            for variable in referenced {
                if !defined.contains(&variable) && dangling.insert((label, variable.clone())) {
                    errors.push(ValidationError::DanglingReference {
                        stage: label.to_string(),
                        variable,
                    });
                }
            }
            defined.insert(name.to_string());
        }
    }

    let inputs: Vec<_> = resolutions
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|stage| stage.merge_input())
        .collect();
    if let Err(crate::Error::MergeConflicts { conflicts }) = merge_trees(&inputs) {
        // missing sources were reported per directive above
        errors.extend(conflicts.into_iter().filter_map(|err| match err {
            crate::Error::PathConflict {
                stage,
                path,
                prior_owner,
            } => Some(ValidationError::PathConflict {
                stage,
                path,
                prior_owner,
            }),
            _ => None,
        }));
    }

    let mut required: Vec<(&str, &str)> = Vec::new();
    for (spec, resolution) in plan.stages.iter().zip(resolutions) {
        let label = match resolution {
            Ok(stage) => stage.label.as_str(),
            Err(_) => spec.stage.as_str(),
        };
        for action in &spec.setup {
            required.extend(action.users().into_iter().map(|user| (user, label)));
        }
    }
    required.push((plan.entrypoint.user.as_str(), ENTRYPOINT_SOURCE));
    for action in &plan.entrypoint.setup {
        required.extend(
            action
                .users()
                .into_iter()
                .map(|user| (user, ENTRYPOINT_SOURCE)),
        );
    }
    let mut reported = BTreeSet::new();
    for (user, context) in required {
        if !users.contains(user) && reported.insert((user, context)) {
            errors.push(ValidationError::MissingUser {
                user: user.to_string(),
                context: context.to_string(),
            });
        }
    }

    if plan.entrypoint.command.is_empty() {
        errors.push(ValidationError::MissingTerminalCommand);
    }

    errors
}

/// Validate a plan, failing with every violation at once.
pub fn validate(plan: &CompositionPlan, resolutions: &[StageResolution]) -> crate::Result<()> {
    let errors = collect_violations(plan, resolutions);
    if errors.is_empty() {
        tracing::debug!(stages = plan.stages.len(), "plan is valid");
        return Ok(());
    }
    tracing::debug!(violations = errors.len(), "plan validation failed");
    Err(crate::Error::ValidationFailed { errors })
}
