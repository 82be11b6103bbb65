// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Stage reference resolution against an immutable artifact store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entrypoint::SetupAction;
use crate::environment::{EnvLayer, EnvOp};
use crate::merge::MergeInput;
use crate::spec::{CompositionPlan, CopyDirective, StageRef, StageSpec};
use crate::tree::TreeIndex;
use crate::{Error, MANIFEST_FILENAME, TREE_DIRNAME};

#[cfg(test)]
#[path = "./resolve_test.rs"]
mod resolve_test;

/// Manifest stored alongside every built stage tree.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StageManifest {
    pub name: String,
    pub version: String,
    /// Digest of the stage tree at build time.
    pub digest: String,
    /// Users the stage tree provides (from its passwd database).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// Environment contributions declared by the stage build.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvOp>,
}

/// A stored build output: the tree handle and its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub tree: Arc<TreeIndex>,
    pub manifest: StageManifest,
}

/// Read-only, content-addressed store of built stages.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch one built stage, or `None` if it was never built.
    async fn get(&self, name: &str, version: &str) -> crate::Result<Option<Arc<Artifact>>>;

    /// All built versions of a component, sorted. Empty if unknown.
    async fn versions(&self, name: &str) -> crate::Result<Vec<String>>;
}

/// A resolved, immutable stage ready for merging and composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStage {
    pub reference: StageRef,
    /// `name@version`, used as the owner label in reports.
    pub label: String,
    pub digest: String,
    pub tree: Arc<TreeIndex>,
    pub copy: Vec<CopyDirective>,
    /// Manifest contributions followed by plan contributions.
    pub environment: Vec<EnvOp>,
    pub setup: Vec<SetupAction>,
    pub users: Vec<String>,
    pub low_priority: bool,
}

impl ComponentStage {
    pub fn env_layer(&self) -> EnvLayer<'_> {
        EnvLayer {
            stage: &self.label,
            low_priority: self.low_priority,
            ops: &self.environment,
        }
    }

    pub fn merge_input(&self) -> MergeInput<'_> {
        MergeInput {
            stage: &self.label,
            tree: &self.tree,
            copies: &self.copy,
        }
    }
}

/// Outcome of resolving one stage of a plan.
pub type StageResolution = crate::Result<ComponentStage>;

/// Resolve a component name and version to its stored artifact.
///
/// The tree digest is recomputed and compared with the manifest so that
/// a damaged store is never silently composed.
pub async fn resolve(
    store: &dyn ArtifactStore,
    name: &str,
    version: &str,
) -> crate::Result<Arc<Artifact>> {
    let Some(artifact) = store.get(name, version).await? else {
        let available = store.versions(name).await?;
        if available.is_empty() {
            return Err(Error::UnknownComponent {
                name: name.to_string(),
            });
        }
        return Err(Error::UnknownVersion {
            name: name.to_string(),
            version: version.to_string(),
            available,
        });
    };

    let actual = artifact.tree.digest();
    if actual != artifact.manifest.digest {
        return Err(Error::CorruptArtifact {
            name: name.to_string(),
            version: version.to_string(),
            expected: artifact.manifest.digest.clone(),
            actual,
        });
    }
    tracing::debug!(stage = %format!("{name}@{version}"), digest = %actual, "resolved stage");
    Ok(artifact)
}

/// Resolve one plan stage into a [`ComponentStage`].
pub async fn resolve_stage(store: &dyn ArtifactStore, spec: &StageSpec) -> StageResolution {
    let reference = spec.reference()?;
    let artifact = resolve(store, &reference.name, &reference.version).await?;

    let mut environment = artifact.manifest.environment.clone();
    environment.extend(spec.environment.iter().cloned());

    Ok(ComponentStage {
        label: reference.to_string(),
        reference,
        digest: artifact.manifest.digest.clone(),
        tree: artifact.tree.clone(),
        copy: spec.copy.clone(),
        environment,
        setup: spec.setup.clone(),
        users: artifact.manifest.users.clone(),
        low_priority: spec.low_priority,
    })
}

/// Resolve every stage of a plan concurrently.
///
/// Results are returned in declared plan order regardless of which
/// lookup finishes first.
pub async fn resolve_all(
    store: &dyn ArtifactStore,
    plan: &CompositionPlan,
) -> Vec<StageResolution> {
    tracing::info!(stages = plan.stages.len(), "resolving stages");
    let lookups = plan.stages.iter().map(|spec| resolve_stage(store, spec));
    futures::future::join_all(lookups).await
}

/// In-process artifact store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    artifacts: BTreeMap<(String, String), Arc<Artifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tree, recording its current digest in a fresh manifest.
    pub fn add(
        &mut self,
        name: &str,
        version: &str,
        tree: TreeIndex,
        users: Vec<String>,
        environment: Vec<EnvOp>,
    ) -> Arc<Artifact> {
        let manifest = StageManifest {
            name: name.to_string(),
            version: version.to_string(),
            digest: tree.digest(),
            users,
            environment,
        };
        self.insert(tree, manifest)
    }

    /// Store a tree under an explicit manifest, as-is.
    pub fn insert(&mut self, tree: TreeIndex, manifest: StageManifest) -> Arc<Artifact> {
        let key = (manifest.name.clone(), manifest.version.clone());
        let artifact = Arc::new(Artifact {
            tree: Arc::new(tree),
            manifest,
        });
        self.artifacts.insert(key, artifact.clone());
        artifact
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, name: &str, version: &str) -> crate::Result<Option<Arc<Artifact>>> {
        Ok(self
            .artifacts
            .get(&(name.to_string(), version.to_string()))
            .cloned())
    }

    async fn versions(&self, name: &str) -> crate::Result<Vec<String>> {
        Ok(self
            .artifacts
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

/// Artifact store backed by a directory laid out as
/// `<root>/<name>/<version>/{manifest.yaml,tree/}`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`; `~/` is expanded to the home directory.
    pub fn open<P: AsRef<Path>>(root: P) -> crate::Result<Self> {
        let root = root.as_ref();
        let expanded = match root.strip_prefix("~") {
            Ok(rel) => dirs::home_dir()
                .ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "Cannot resolve ~ without HOME",
                    ))
                })?
                .join(rel),
            Err(_) => root.to_path_buf(),
        };
        let root = dunce::canonicalize(&expanded).map_err(|error| Error::ReadFailed {
            path: expanded.clone(),
            error,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    /// Write the manifest for a tree already placed under
    /// `<root>/<name>/<version>/tree`, recording its current digest.
    pub fn seal(
        &self,
        name: &str,
        version: &str,
        users: Vec<String>,
        environment: Vec<EnvOp>,
    ) -> crate::Result<StageManifest> {
        let dir = self.artifact_dir(name, version);
        let tree = TreeIndex::scan(dir.join(TREE_DIRNAME))?;
        let manifest = StageManifest {
            name: name.to_string(),
            version: version.to_string(),
            digest: tree.digest(),
            users,
            environment,
        };
        let yaml = serde_yaml::to_string(&manifest)
            .map_err(|e| Error::invalid_yaml(e, String::new()))?;
        std::fs::write(dir.join(MANIFEST_FILENAME), yaml)?;
        Ok(manifest)
    }
}

#[async_trait]
impl ArtifactStore for DirStore {
    async fn get(&self, name: &str, version: &str) -> crate::Result<Option<Arc<Artifact>>> {
        let dir = self.artifact_dir(name, version);
        let manifest_path = dir.join(MANIFEST_FILENAME);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let yaml = std::fs::read_to_string(&manifest_path).map_err(|error| Error::ReadFailed {
            path: manifest_path.clone(),
            error,
        })?;
        let manifest: StageManifest =
            serde_yaml::from_str(&yaml).map_err(|e| Error::invalid_yaml(e, yaml.clone()))?;

        let tree_dir = dir.join(TREE_DIRNAME);
        let tree = tokio::task::spawn_blocking(move || TreeIndex::scan(tree_dir))
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;

        Ok(Some(Arc::new(Artifact {
            tree: Arc::new(tree),
            manifest,
        })))
    }

    async fn versions(&self, name: &str) -> crate::Result<Vec<String>> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_FILENAME).is_file() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort();
        Ok(versions)
    }
}
