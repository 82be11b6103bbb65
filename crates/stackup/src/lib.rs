// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! stackup - Layered Component Image Composer
//!
//! This crate provides the core library for composing independently built
//! software components ("stages") into one runtime image: a single merged
//! file tree, a single runtime environment, and an ordered entrypoint chain.
//!
//! # Overview
//!
//! A composition plan (`stackup.yaml`) lists stages in order. Each stage is
//! resolved against an immutable artifact store, its copy directives are
//! merged into one tree with explicit conflict rules, and its environment
//! contributions are composed into one deterministic set of variables.
//! Stage setup actions and the plan's entrypoint form a linear chain that
//! ends in a single terminal command.
//!
//! # Example
//!
//! ```yaml
//! # stackup.yaml
//! api: stackup/v0
//! base_environment:
//!   PATH: /usr/bin:/bin
//!
//! stages:
//!   - stage: fsl@5.0.10
//!     copy:
//!       - source: /usr/share/fsl
//!         dest: /usr/share/fsl
//!     environment:
//!       - set: FSLDIR
//!         value: /usr/share/fsl/5.0
//!         protected: true
//!       - prepend: PATH
//!         value: ${FSLDIR}/bin
//!
//! entrypoint:
//!   user: c-pac_user
//!   command: [/code/run.py]
//! ```

pub mod audit;
pub mod compose;
pub mod entrypoint;
pub mod environment;
pub mod error;
pub mod lock;
pub mod merge;
pub mod resolve;
pub mod spec;
pub mod tree;
pub mod validate;

pub use audit::{audit_plan, AuditReport, ConflictRecord};
pub use compose::{compose_plan, compose_stages, ComposedImage, StageDigest};
pub use entrypoint::{
    build_execution_plan, ActionExecutor, EntrypointSpec, ExecutionPlan, PlannedStep, SetupAction,
    TerminalCommand,
};
pub use environment::{compose_environment, EnvOp, FinalEnv};
pub use error::{Error, Result};
pub use lock::{generate_lock, verify_lock, LockChange, LockChangeKind, LockFile};
pub use merge::{merge_trees, ComposedTree, PathOverride};
pub use resolve::{resolve, resolve_all, ArtifactStore, ComponentStage, DirStore, MemoryStore};
pub use spec::{ApiVersion, CompositionPlan, CopyDirective, StageRef, StageSpec};
pub use tree::TreeIndex;
pub use validate::{validate, ValidationError};

/// Well-known filename for composition plans.
pub const STACKUP_FILENAME: &str = "stackup.yaml";

/// Well-known filename for lock files.
pub const STACKUP_LOCK_FILENAME: &str = "stackup.lock.yaml";

/// Manifest filename inside each stored stage.
pub const MANIFEST_FILENAME: &str = "manifest.yaml";

/// Directory holding the tree of each stored stage.
pub const TREE_DIRNAME: &str = "tree";
