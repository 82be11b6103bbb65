// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for stackup operations.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience Result type with stackup Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during stackup operations.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Invalid YAML in a plan, manifest or lock file
    #[error("Invalid stackup document: {error}")]
    #[diagnostic(
        code(stackup::invalid_yaml),
        help("Check YAML syntax and ensure 'api: stackup/v0' is present")
    )]
    InvalidYaml {
        #[source]
        error: serde_yaml::Error,
        yaml_content: String,
    },

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(stackup::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Stage reference is not of the form `name@version`
    #[error("Invalid stage reference '{reference}'")]
    #[diagnostic(
        code(stackup::invalid_reference),
        help("Stage references are written as name@version, e.g. fsl@5.0.10")
    )]
    InvalidReference { reference: String },

    /// No component with this name exists in the artifact store
    #[error("Unknown component '{name}'")]
    #[diagnostic(
        code(stackup::unknown_component),
        help("Check that the component has been built into the artifact store")
    )]
    UnknownComponent { name: String },

    /// The component exists but this version was never built
    #[error("Unknown version '{version}' of component '{name}'")]
    #[diagnostic(code(stackup::unknown_version), help("{}", versions_message(available)))]
    UnknownVersion {
        name: String,
        version: String,
        available: Vec<String>,
    },

    /// Stored tree does not match the digest recorded in its manifest
    #[error("Corrupt artifact {name}@{version}: expected {expected}, found {actual}")]
    #[diagnostic(
        code(stackup::corrupt_artifact),
        help("The stored tree no longer matches its manifest; rebuild the component")
    )]
    CorruptArtifact {
        name: String,
        version: String,
        expected: String,
        actual: String,
    },

    /// A path was written by two stages without an overwrite flag
    #[error("Path conflict at {path}: stage {stage} collides with {prior_owner}")]
    #[diagnostic(
        code(stackup::path_conflict),
        help("Make the destinations disjoint or set 'overwrite: true' on the later copy")
    )]
    PathConflict {
        stage: String,
        path: String,
        prior_owner: String,
    },

    /// A copy directive names a path that its stage tree does not contain
    #[error("Stage {stage} has no path {path} to copy")]
    #[diagnostic(code(stackup::missing_source))]
    MissingSource { stage: String, path: String },

    /// Path conflicts or missing sources were found while merging stage trees
    #[error("{} error(s) found while merging stage trees", .conflicts.len())]
    #[diagnostic(code(stackup::merge_conflicts))]
    MergeConflicts {
        #[related]
        conflicts: Vec<Error>,
    },

    /// A protected variable was reassigned by another protected set
    #[error("Protected variable {name} set by {owner} cannot be overridden by {stage}")]
    #[diagnostic(
        code(stackup::protected_override),
        help("Remove 'protected' from one of the two assignments")
    )]
    ProtectedOverride {
        name: String,
        owner: String,
        stage: String,
    },

    /// A `$NAME` reference could not be expanded during composition
    #[error("Stage {stage} references undefined variable ${name}")]
    #[diagnostic(code(stackup::unresolved_reference))]
    UnresolvedReference { stage: String, name: String },

    /// A setup action switched back to root without a declared reason
    #[error("Privilege escalation from {from} to {to} in {source_name} is not allowed")]
    #[diagnostic(
        code(stackup::privilege_escalation),
        help("Add an 'escalation' reason to the user switch if this is intended")
    )]
    PrivilegeEscalation {
        from: String,
        to: String,
        source_name: String,
    },

    /// The entrypoint has no terminal command to run
    #[error("Entrypoint has no terminal command")]
    #[diagnostic(code(stackup::missing_terminal_command))]
    MissingTerminalCommand,

    /// A setup step failed while executing the plan
    #[error("Setup step {index} ({action}) failed: {message}")]
    #[diagnostic(code(stackup::setup_failed))]
    SetupActionFailed {
        index: usize,
        action: String,
        message: String,
    },

    /// Plan validation found one or more violations
    #[error("Plan validation failed with {} error(s)", .errors.len())]
    #[diagnostic(code(stackup::validation_failed))]
    ValidationFailed {
        #[related]
        errors: Vec<crate::validate::ValidationError>,
    },

    /// Lock file serialization or parsing failed
    #[error("Lock file error: {0}")]
    #[diagnostic(code(stackup::lock))]
    Lock(String),

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(stackup::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidYaml`] retaining the offending document.
    pub(crate) fn invalid_yaml(error: serde_yaml::Error, yaml: impl Into<String>) -> Self {
        Self::InvalidYaml {
            error,
            yaml_content: yaml.into(),
        }
    }
}

fn versions_message(available: &[String]) -> String {
    if available.is_empty() {
        "No versions of this component have been built".to_string()
    } else {
        format!("Available versions: {}", available.join(", "))
    }
}
