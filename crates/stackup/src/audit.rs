// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Audit reports describing how a plan composes.
//!
//! An audit never fails: every phase that can run does, and problems
//! that would abort a composition are recorded instead.

use serde::{Deserialize, Serialize};

use crate::environment::{compose_environment, SupersededVariable};
use crate::merge::{merge_trees, PathOverride};
use crate::resolve::{resolve_all, ArtifactStore, ComponentStage};
use crate::spec::CompositionPlan;
use crate::validate::{collect_violations, ValidationError};
use crate::Error;

#[cfg(test)]
#[path = "./audit_test.rs"]
mod audit_test;

/// A path two stages wrote without an overwrite directive.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConflictRecord {
    pub path: String,
    pub stage: String,
    pub prior_owner: String,
}

/// Everything a reviewer needs to see about how a plan composes.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuditReport {
    /// Replacements allowed by `overwrite`, in application order.
    #[serde(default)]
    pub overridden_paths: Vec<PathOverride>,
    /// Scalar assignments ignored because of a protected variable.
    #[serde(default)]
    pub superseded_variables: Vec<SupersededVariable>,
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>,
    /// Plan violations not already listed as conflicts or errors.
    #[serde(default)]
    pub validation_errors: Vec<ValidationError>,
    /// Other failures that would abort composition, missing copy
    /// sources included.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AuditReport {
    /// True if the plan composes without conflicts or errors.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.validation_errors.is_empty() && self.errors.is_empty()
    }

    fn record_error(&mut self, err: Error) {
        match err {
            Error::MergeConflicts { conflicts } => {
                for conflict in conflicts {
                    self.record_error(conflict);
                }
            }
            Error::PathConflict {
                stage,
                path,
                prior_owner,
            } => self.conflicts.push(ConflictRecord {
                path,
                stage,
                prior_owner,
            }),
            other => self.errors.push(other.to_string()),
        }
    }
}

/// Resolve and inspect a plan, reporting everything found.
pub async fn audit_plan(plan: &CompositionPlan, store: &dyn ArtifactStore) -> AuditReport {
    let resolutions = resolve_all(store, plan).await;
    // the merge pass below reports conflicts and missing sources itself
    let validation_errors = collect_violations(plan, &resolutions)
        .into_iter()
        .filter(|err| {
            !matches!(
                err,
                ValidationError::PathConflict { .. } | ValidationError::MissingSource { .. }
            )
        })
        .collect();
    let mut report = AuditReport {
        validation_errors,
        ..Default::default()
    };

    let stages: Vec<&ComponentStage> =
        resolutions.iter().filter_map(|r| r.as_ref().ok()).collect();

    let inputs: Vec<_> = stages.iter().map(|s| s.merge_input()).collect();
    match merge_trees(&inputs) {
        Ok(outcome) => report.overridden_paths = outcome.overrides,
        Err(err) => report.record_error(err),
    }

    let layers: Vec<_> = stages.iter().map(|s| s.env_layer()).collect();
    match compose_environment(&layers, &plan.base_environment) {
        Ok(composition) => report.superseded_variables = composition.superseded,
        Err(err) => report.record_error(err),
    }

    tracing::info!(
        overrides = report.overridden_paths.len(),
        superseded = report.superseded_variables.len(),
        conflicts = report.conflicts.len(),
        violations = report.validation_errors.len(),
        "audit complete"
    );
    report
}
