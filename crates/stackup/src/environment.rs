// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable contributions and their composition.
//!
//! Each stage contributes an ordered list of [`EnvOp`]s. Composition
//! applies them in stage order on top of the base runtime environment
//! and produces one immutable [`FinalEnv`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;

#[cfg(test)]
#[path = "./environment_test.rs"]
mod environment_test;

/// Separator used for path-list variables unless an op overrides it.
pub const DEFAULT_SEPARATOR: &str = ":";

/// A single environment contribution from a stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EnvOp {
    Set(SetEnv),
    Prepend(PrependEnv),
    Append(AppendEnv),
    Comment(CommentEnv),
}

/// Scalar assignment, optionally protected from downstream overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SetEnv {
    pub set: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrependEnv {
    pub prepend: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppendEnv {
    pub append: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommentEnv {
    pub comment: String,
}

impl EnvOp {
    /// Name of the variable this op changes, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Set(s) => Some(&s.set),
            Self::Prepend(p) => Some(&p.prepend),
            Self::Append(a) => Some(&a.append),
            Self::Comment(_) => None,
        }
    }

    /// The value carried by this op, before expansion.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Set(s) => Some(&s.value),
            Self::Prepend(p) => Some(&p.value),
            Self::Append(a) => Some(&a.value),
            Self::Comment(_) => None,
        }
    }

    /// Whether this op modifies an existing path-list variable.
    pub fn is_path_op(&self) -> bool {
        matches!(self, Self::Prepend(_) | Self::Append(_))
    }
}

/// The environment contributions of one stage, in stage order.
#[derive(Debug, Clone, Copy)]
pub struct EnvLayer<'a> {
    /// Display name of the contributing stage (`name@version`).
    pub stage: &'a str,
    /// Prepends from low priority stages resolve after all others.
    pub low_priority: bool,
    pub ops: &'a [EnvOp],
}

/// Immutable snapshot of the fully composed environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FinalEnv {
    vars: BTreeMap<String, String>,
}

impl FinalEnv {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Content digest over the sorted `name=value` pairs.
    pub fn digest(&self) -> String {
        let mut buf = Vec::new();
        for (name, value) in &self.vars {
            buf.extend_from_slice(name.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        crate::tree::hash_bytes(&buf)
    }

    /// Render a POSIX shell script exporting every variable.
    pub fn to_startup_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n# Generated by stackup, do not edit\n");
        for (name, value) in &self.vars {
            script.push_str(&format!("export {name}=\"{}\"\n", escape_value(value)));
        }
        script
    }
}

impl From<BTreeMap<String, String>> for FinalEnv {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

/// A contribution that lost to an earlier protected assignment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SupersededVariable {
    pub name: String,
    /// Stage whose assignment was ignored.
    pub stage: String,
    pub value: String,
    /// Stage holding the protected assignment that was kept.
    pub kept_owner: String,
}

/// Result of composing all stage environments.
#[derive(Debug, Clone, Default)]
pub struct EnvComposition {
    pub env: FinalEnv,
    pub superseded: Vec<SupersededVariable>,
}

#[derive(Debug, Clone)]
struct SetOwner {
    stage: String,
    protected: bool,
}

#[derive(Debug, Clone)]
struct VarState {
    /// Prepends from normal stages, most recent first.
    front: Vec<String>,
    /// Prepends from low priority stages, most recent first.
    low_front: Vec<String>,
    value: Option<String>,
    back: Vec<String>,
    separator: String,
    owner: Option<SetOwner>,
}

impl VarState {
    fn new(value: Option<String>) -> Self {
        Self {
            front: Vec::new(),
            low_front: Vec::new(),
            value,
            back: Vec::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
            owner: None,
        }
    }

    fn is_list(&self) -> bool {
        !(self.front.is_empty() && self.low_front.is_empty() && self.back.is_empty())
    }

    fn render(&self) -> String {
        if !self.is_list() {
            return self.value.clone().unwrap_or_default();
        }
        let existing = self
            .value
            .as_deref()
            .unwrap_or_default()
            .split(self.separator.as_str())
            .filter(|s| !s.is_empty());
        let mut seen = std::collections::HashSet::new();
        let segments: Vec<&str> = self
            .front
            .iter()
            .chain(self.low_front.iter())
            .map(String::as_str)
            .chain(existing)
            .chain(self.back.iter().map(String::as_str))
            .filter(|s| seen.insert(*s))
            .collect();
        segments.join(&self.separator)
    }
}

/// Compose the final environment from ordered stage contributions.
///
/// Scalar `set`s overwrite earlier values unless the earlier assignment
/// was protected; path ops build an ordered, deduplicated list per
/// variable where the most recently applied prepend resolves first.
/// Once a variable is protected, only its owning stage may extend it.
pub fn compose_environment(
    layers: &[EnvLayer<'_>],
    base: &BTreeMap<String, String>,
) -> crate::Result<EnvComposition> {
    let mut state: BTreeMap<String, VarState> = base
        .iter()
        .map(|(k, v)| (k.clone(), VarState::new(Some(v.clone()))))
        .collect();
    let mut superseded = Vec::new();

    for layer in layers {
        tracing::debug!(stage = layer.stage, ops = layer.ops.len(), "applying environment");
        for op in layer.ops {
            let Some(name) = op.variable() else {
                continue;
            };
            let value = expand_value(layer.stage, op.value().unwrap_or_default(), &state)?;
            let var = state
                .entry(name.to_string())
                .or_insert_with(|| VarState::new(None));

            if let Some(owner) = var.owner.as_ref().filter(|o| o.protected) {
                let ignored = match op {
                    EnvOp::Set(set) if set.protected => {
                        return Err(Error::ProtectedOverride {
                            name: name.to_string(),
                            owner: owner.stage.clone(),
                            stage: layer.stage.to_string(),
                        });
                    }
                    EnvOp::Set(_) => true,
                    // the owning stage may still extend its own protected list
                    _ => op.is_path_op() && owner.stage != layer.stage,
                };
                if ignored {
                    tracing::warn!(
                        variable = name,
                        stage = layer.stage,
                        kept = %owner.stage,
                        "ignoring change to protected variable"
                    );
                    superseded.push(SupersededVariable {
                        name: name.to_string(),
                        stage: layer.stage.to_string(),
                        value,
                        kept_owner: owner.stage.clone(),
                    });
                    continue;
                }
            }

            match op {
                EnvOp::Set(set) => {
                    var.front.clear();
                    var.low_front.clear();
                    var.back.clear();
                    var.value = Some(value);
                    var.owner = Some(SetOwner {
                        stage: layer.stage.to_string(),
                        protected: set.protected,
                    });
                }
                EnvOp::Prepend(prepend) => {
                    if let Some(sep) = &prepend.separator {
                        var.separator = sep.clone();
                    }
                    let segments = split_segments(&value, &var.separator);
                    let target = if layer.low_priority {
                        &mut var.low_front
                    } else {
                        &mut var.front
                    };
                    for segment in segments.into_iter().rev() {
                        target.insert(0, segment);
                    }
                }
                EnvOp::Append(append) => {
                    if let Some(sep) = &append.separator {
                        var.separator = sep.clone();
                    }
                    let segments = split_segments(&value, &var.separator);
                    var.back.extend(segments);
                }
                EnvOp::Comment(_) => {}
            }
        }
    }

    let vars = state
        .into_iter()
        .map(|(name, var)| {
            let value = var.render();
            (name, value)
        })
        .collect::<BTreeMap<_, _>>();
    Ok(EnvComposition {
        env: FinalEnv::from(vars),
        superseded,
    })
}

/// Split a contributed value into non-empty list segments.
fn split_segments(value: &str, separator: &str) -> Vec<String> {
    value
        .split(separator)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Expand `$NAME` and `${NAME}` against the variables composed so far.
fn expand_value(
    stage: &str,
    value: &str,
    state: &BTreeMap<String, VarState>,
) -> crate::Result<String> {
    shellexpand::env_with_context(value, |name: &str| match state.get(name) {
        Some(var) => Ok(Some(var.render())),
        None => Err(name.to_string()),
    })
    .map(|expanded| expanded.into_owned())
    .map_err(|err| Error::UnresolvedReference {
        stage: stage.to_string(),
        name: err.var_name,
    })
}

/// Names of every variable referenced as `$NAME` or `${NAME}` in `value`.
///
/// Names are gathered from the lookups of the same parser that
/// [`compose_environment`] expands with, so both agree on what counts
/// as a reference. The expanded text is not needed and is dropped.
pub fn referenced_variables(value: &str) -> Vec<String> {
    let mut names = Vec::new();
    let lookup = |name: &str| {
        names.push(name.to_string());
        Some("")
    };
    drop(shellexpand::env_with_context_no_errors(value, lookup));
    names
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
