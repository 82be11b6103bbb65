// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! The composition pipeline: resolve, validate, merge, compose.

use serde::{Deserialize, Serialize};

use crate::audit::AuditReport;
use crate::entrypoint::{build_execution_plan, ExecutionPlan, SetupContribution};
use crate::environment::{compose_environment, FinalEnv};
use crate::merge::{merge_trees, ComposedTree};
use crate::resolve::{resolve_all, ArtifactStore, ComponentStage};
use crate::spec::CompositionPlan;
use crate::validate::validate;

#[cfg(test)]
#[path = "./compose_test.rs"]
mod compose_test;

/// A stage as it was pinned into a composed image.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StageDigest {
    pub stage: String,
    pub digest: String,
}

/// A fully composed image, ready to hand to a container runtime.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComposedImage {
    pub plan_digest: String,
    pub stages: Vec<StageDigest>,
    pub tree: ComposedTree,
    pub env: FinalEnv,
    pub execution: ExecutionPlan,
    #[serde(default)]
    pub audit: AuditReport,
}

impl ComposedImage {
    pub fn tree_digest(&self) -> String {
        self.tree.digest()
    }

    pub fn env_digest(&self) -> String {
        self.env.digest()
    }
}

/// Compose a plan against a store.
///
/// Nothing is merged unless every stage resolves and the whole plan
/// validates.
pub async fn compose_plan(
    plan: &CompositionPlan,
    store: &dyn ArtifactStore,
) -> crate::Result<ComposedImage> {
    let resolutions = resolve_all(store, plan).await;
    validate(plan, &resolutions)?;
    let stages = resolutions.into_iter().collect::<crate::Result<Vec<_>>>()?;
    compose_stages(plan, &stages)
}

/// Compose already resolved stages, in the order given.
pub fn compose_stages(
    plan: &CompositionPlan,
    stages: &[ComponentStage],
) -> crate::Result<ComposedImage> {
    let plan_digest = plan.digest()?;

    let inputs: Vec<_> = stages.iter().map(ComponentStage::merge_input).collect();
    let merged = merge_trees(&inputs)?;

    let layers: Vec<_> = stages.iter().map(ComponentStage::env_layer).collect();
    let composition = compose_environment(&layers, &plan.base_environment)?;
    tracing::info!(variables = composition.env.len(), "composed environment");

    let contributions: Vec<_> = stages
        .iter()
        .map(|s| SetupContribution {
            source: &s.label,
            actions: &s.setup,
        })
        .collect();
    let execution = build_execution_plan(&composition.env, &contributions, &plan.entrypoint)?;
    tracing::info!(
        steps = execution.steps.len(),
        user = %execution.terminal.user,
        "built entrypoint chain"
    );

    Ok(ComposedImage {
        plan_digest,
        stages: stages
            .iter()
            .map(|s| StageDigest {
                stage: s.label.clone(),
                digest: s.digest.clone(),
            })
            .collect(),
        tree: merged.tree,
        env: composition.env,
        execution,
        audit: AuditReport {
            overridden_paths: merged.overrides,
            superseded_variables: composition.superseded,
            ..Default::default()
        },
    })
}
