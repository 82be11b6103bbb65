// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Lock files pinning a composed image to exact digests.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compose::{ComposedImage, StageDigest};
use crate::Error;

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

/// Lock file API version.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum LockApiVersion {
    #[serde(rename = "stackup/v0/lock")]
    V0,
}

/// Lock file capturing every digest that identifies a composed image.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockFile {
    pub api: LockApiVersion,
    pub generated: GenerationMetadata,
    pub plan_digest: String,
    pub stages: Vec<StageDigest>,
    pub tree_digest: String,
    pub env_digest: String,
}

/// Metadata about when and where the lock was generated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GenerationMetadata {
    pub timestamp: DateTime<Utc>,
    pub stackup_version: String,
    pub hostname: String,
}

impl LockFile {
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|error| Error::ReadFailed {
            path: path.to_path_buf(),
            error,
        })?;
        serde_yaml::from_str(&yaml).map_err(|e| Error::invalid_yaml(e, yaml.clone()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| Error::Lock(format!("Failed to serialize lock file: {e}")))?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// Generate a lock file from a composed image.
pub fn generate_lock(image: &ComposedImage) -> LockFile {
    LockFile {
        api: LockApiVersion::V0,
        generated: GenerationMetadata {
            timestamp: Utc::now(),
            stackup_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        },
        plan_digest: image.plan_digest.clone(),
        stages: image.stages.clone(),
        tree_digest: image.tree_digest(),
        env_digest: image.env_digest(),
    }
}

/// Compare a lock file against a freshly composed image.
///
/// Returns every difference; an empty list means the lock is current.
pub fn verify_lock(lock: &LockFile, image: &ComposedImage) -> Vec<LockChange> {
    let mut changes = Vec::new();

    if lock.plan_digest != image.plan_digest {
        changes.push(LockChange::changed(
            LockChangeKind::PlanChanged,
            "plan",
            &lock.plan_digest,
            &image.plan_digest,
        ));
    }

    let current: BTreeMap<&str, &str> = image
        .stages
        .iter()
        .map(|s| (s.stage.as_str(), s.digest.as_str()))
        .collect();
    let locked: BTreeMap<&str, &str> = lock
        .stages
        .iter()
        .map(|s| (s.stage.as_str(), s.digest.as_str()))
        .collect();

    for stage in &lock.stages {
        match current.get(stage.stage.as_str()) {
            None => changes.push(LockChange {
                kind: LockChangeKind::StageRemoved,
                reference: stage.stage.clone(),
                expected: Some(stage.digest.clone()),
                actual: None,
            }),
            Some(actual) if *actual != stage.digest => changes.push(LockChange::changed(
                LockChangeKind::StageDigestChanged,
                &stage.stage,
                &stage.digest,
                actual,
            )),
            Some(_) => {}
        }
    }
    for stage in &image.stages {
        if !locked.contains_key(stage.stage.as_str()) {
            changes.push(LockChange {
                kind: LockChangeKind::StageAdded,
                reference: stage.stage.clone(),
                expected: None,
                actual: Some(stage.digest.clone()),
            });
        }
    }

    let tree_digest = image.tree_digest();
    if lock.tree_digest != tree_digest {
        changes.push(LockChange::changed(
            LockChangeKind::TreeChanged,
            "tree",
            &lock.tree_digest,
            &tree_digest,
        ));
    }
    let env_digest = image.env_digest();
    if lock.env_digest != env_digest {
        changes.push(LockChange::changed(
            LockChangeKind::EnvironmentChanged,
            "environment",
            &lock.env_digest,
            &env_digest,
        ));
    }

    changes
}

/// A single detected change between lock and current image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockChange {
    pub kind: LockChangeKind,
    pub reference: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl LockChange {
    fn changed(kind: LockChangeKind, reference: &str, expected: &str, actual: &str) -> Self {
        Self {
            kind,
            reference: reference.to_string(),
            expected: Some(expected.to_string()),
            actual: Some(actual.to_string()),
        }
    }
}

/// Types of lock mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockChangeKind {
    PlanChanged,
    StageDigestChanged,
    StageAdded,
    StageRemoved,
    TreeChanged,
    EnvironmentChanged,
}
