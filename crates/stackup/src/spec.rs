// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Plan file parsing and data types for stackup.yaml files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entrypoint::{EntrypointSpec, SetupAction};
use crate::environment::EnvOp;

#[cfg(test)]
#[path = "./spec_test.rs"]
mod spec_test;

/// API version for plan files.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum ApiVersion {
    #[serde(rename = "stackup/v0")]
    V0,
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V0
    }
}

/// Helper for two-stage deserialization to determine API version first.
#[derive(Deserialize)]
struct ApiVersionMapping {
    #[serde(default)]
    api: ApiVersion,
}

/// Symbolic reference to one built component, written `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageRef {
    pub name: String,
    pub version: String,
}

impl StageRef {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl FromStr for StageRef {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidReference {
            reference: s.to_string(),
        };
        let (name, version) = s.trim().split_once('@').ok_or_else(invalid)?;
        if name.is_empty() || version.is_empty() || version.contains('@') {
            return Err(invalid());
        }
        Ok(Self::new(name, version))
    }
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A single file-tree copy from a stage into the composed tree.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CopyDirective {
    /// Path within the stage's tree.
    pub source: String,
    /// Path within the composed tree.
    pub dest: String,
    /// Allow replacing entries placed by earlier stages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overwrite: bool,
}

/// One stage entry of a plan.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage reference as `name@version`.
    pub stage: String,

    /// Prepends from this stage resolve after those of normal stages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_priority: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy: Vec<CopyDirective>,

    /// Environment operations applied after the stage manifest's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvOp>,

    /// Setup actions this stage contributes to the entrypoint chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<SetupAction>,
}

impl StageSpec {
    pub fn reference(&self) -> crate::Result<StageRef> {
        self.stage.parse()
    }
}

/// Main composition plan from a stackup.yaml file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CompositionPlan {
    /// API version identifier.
    pub api: ApiVersion,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Variables passed through from the base runtime environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base_environment: BTreeMap<String, String>,

    /// Stages in composition order (later stages layer on top).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageSpec>,

    pub entrypoint: EntrypointSpec,

    /// Path to the file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl CompositionPlan {
    /// Parse plan from YAML string.
    pub fn from_yaml<S: Into<String>>(yaml: S) -> crate::Result<Self> {
        let yaml = yaml.into();

        // Stage 1: Parse to get API version
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml)
            .map_err(|e| crate::Error::invalid_yaml(e, yaml.clone()))?;

        let with_version: ApiVersionMapping = serde_yaml::from_value(value.clone())
            .map_err(|e| crate::Error::invalid_yaml(e, yaml.clone()))?;

        // Stage 2: Deserialize based on version
        match with_version.api {
            ApiVersion::V0 => {
                serde_yaml::from_value(value).map_err(|e| crate::Error::invalid_yaml(e, yaml))
            }
        }
    }

    /// Load plan from file path.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| crate::Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut plan = Self::from_yaml(yaml)?;
        plan.source_path = Some(path.to_path_buf());
        Ok(plan)
    }

    /// Canonical YAML form, independent of the source file's formatting.
    pub fn to_canonical_yaml(&self) -> crate::Result<String> {
        serde_yaml::to_string(self).map_err(|e| crate::Error::invalid_yaml(e, String::new()))
    }

    /// Content hash of the canonical plan; the image's reproducibility key.
    pub fn digest(&self) -> crate::Result<String> {
        Ok(crate::tree::hash_bytes(self.to_canonical_yaml()?.as_bytes()))
    }
}

impl Default for CompositionPlan {
    fn default() -> Self {
        Self {
            api: ApiVersion::default(),
            description: None,
            base_environment: BTreeMap::new(),
            stages: Vec::new(),
            entrypoint: EntrypointSpec::default(),
            source_path: None,
        }
    }
}
