// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! File-tree merge engine.
//!
//! Copy directives are applied in stage order into a working index keyed
//! by normalized destination path. Directories from different stages are
//! merged as a union; any other collision between stages must be allowed
//! explicitly with `overwrite`, otherwise it is reported as a conflict.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::spec::CopyDirective;
use crate::tree::{join_path, normalize_path, parent_paths, EntryKind, TreeIndex};
use crate::Error;

#[cfg(test)]
#[path = "./merge_test.rs"]
mod merge_test;

/// The copy directives of one stage together with its tree.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub stage: &'a str,
    pub tree: &'a TreeIndex,
    pub copies: &'a [CopyDirective],
}

/// An entry of the composed tree and the stage that placed it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComposedEntry {
    pub kind: EntryKind,
    pub owner: String,
    /// Path within the owner's tree; empty for implicitly created parents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// The single merged filesystem produced from all copy directives.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ComposedTree {
    entries: BTreeMap<String, ComposedEntry>,
}

impl ComposedTree {
    pub fn get(&self, path: &str) -> Option<&ComposedEntry> {
        self.entries.get(&normalize_path(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ComposedEntry)> {
        self.entries.iter()
    }

    /// Content-only view of the composed tree.
    pub fn to_index(&self) -> TreeIndex {
        let mut index = TreeIndex::new();
        for (path, entry) in &self.entries {
            index.insert_entry(path, entry.kind.clone());
        }
        index
    }

    /// Digest of the composed contents (ownership is not part of it).
    pub fn digest(&self) -> String {
        self.to_index().digest()
    }
}

/// A replacement that was allowed by an `overwrite` directive.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathOverride {
    pub path: String,
    pub stage: String,
    pub prior_owner: String,
    pub prior_kind: String,
    pub kind: String,
}

/// Result of a successful merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub tree: ComposedTree,
    /// Audit log of every allowed override, in application order.
    pub overrides: Vec<PathOverride>,
}

struct Merger<'a> {
    entries: BTreeMap<String, ComposedEntry>,
    overrides: Vec<PathOverride>,
    /// Conflicts and missing sources, in the order they were found.
    errors: Vec<Error>,
    reported: BTreeSet<(&'a str, String)>,
}

/// Merge the copy directives of all stages into one composed tree.
///
/// Every conflict and missing source is collected before failing so
/// that a plan can be fixed in one pass; no entry is ever chosen for a
/// conflicting path and a directive with a missing source is skipped.
pub fn merge_trees(inputs: &[MergeInput<'_>]) -> crate::Result<MergeOutcome> {
    let mut merger = Merger {
        entries: BTreeMap::new(),
        overrides: Vec::new(),
        errors: Vec::new(),
        reported: BTreeSet::new(),
    };

    for input in inputs {
        for directive in input.copies {
            let source = normalize_path(&directive.source);
            let dest = normalize_path(&directive.dest);
            tracing::debug!(
                stage = input.stage,
                %source,
                %dest,
                "applying copy directive"
            );

            let Some(top) = input.tree.get(&source) else {
                tracing::debug!(stage = input.stage, %source, "copy source is missing");
                merger.errors.push(Error::MissingSource {
                    stage: input.stage.to_string(),
                    path: source,
                });
                continue;
            };

            merger.place(input.stage, &dest, top, &source, directive.overwrite);
            if top.is_dir() {
                for (rel, entry) in input.tree.subtree(&source) {
                    merger.place(
                        input.stage,
                        &join_path(&dest, &rel),
                        entry,
                        &join_path(&source, &rel),
                        directive.overwrite,
                    );
                }
            }
        }
    }

    if !merger.errors.is_empty() {
        return Err(Error::MergeConflicts {
            conflicts: merger.errors,
        });
    }
    tracing::info!(
        entries = merger.entries.len(),
        overrides = merger.overrides.len(),
        "merged stage trees"
    );
    Ok(MergeOutcome {
        tree: ComposedTree {
            entries: merger.entries,
        },
        overrides: merger.overrides,
    })
}

impl<'a> Merger<'a> {
    fn place(
        &mut self,
        stage: &'a str,
        path: &str,
        kind: &EntryKind,
        source: &str,
        overwrite: bool,
    ) {
        if path == "/" {
            if !kind.is_dir() {
                self.conflict(stage, path, "<root>");
            }
            return;
        }

        for parent in parent_paths(path) {
            let blocking = match self.entries.get(&parent) {
                None => {
                    self.entries.insert(
                        parent,
                        ComposedEntry {
                            kind: EntryKind::Dir,
                            owner: stage.to_string(),
                            source: String::new(),
                        },
                    );
                    continue;
                }
                Some(entry) if entry.kind.is_dir() => continue,
                Some(entry) => entry.clone(),
            };
            let placed = self.replace(
                stage,
                &parent,
                &blocking,
                EntryKind::Dir,
                String::new(),
                overwrite,
            );
            if !placed {
                return;
            }
        }

        let new = ComposedEntry {
            kind: kind.clone(),
            owner: stage.to_string(),
            source: source.to_string(),
        };
        match self.entries.get(path) {
            None => {
                self.entries.insert(path.to_string(), new);
            }
            Some(prior) if prior.kind.is_dir() && kind.is_dir() => {}
            Some(prior) => {
                let prior = prior.clone();
                self.replace(stage, path, &prior, new.kind, new.source, overwrite);
            }
        }
    }

    /// Replace an existing entry if allowed; returns whether it was.
    fn replace(
        &mut self,
        stage: &'a str,
        path: &str,
        prior: &ComposedEntry,
        kind: EntryKind,
        source: String,
        overwrite: bool,
    ) -> bool {
        if prior.owner != stage {
            if !overwrite {
                self.conflict(stage, path, &prior.owner);
                return false;
            }
            self.overrides.push(PathOverride {
                path: path.to_string(),
                stage: stage.to_string(),
                prior_owner: prior.owner.clone(),
                prior_kind: prior.kind.label().to_string(),
                kind: kind.label().to_string(),
            });
        }
        if prior.kind.is_dir() && !kind.is_dir() {
            self.remove_subtree(path);
        }
        self.entries.insert(
            path.to_string(),
            ComposedEntry {
                kind,
                owner: stage.to_string(),
                source,
            },
        );
        true
    }

    fn remove_subtree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| p.clone())
            .collect();
        for path in doomed {
            self.entries.remove(&path);
        }
    }

    fn conflict(&mut self, stage: &'a str, path: &str, prior_owner: &str) {
        if !self.reported.insert((stage, path.to_string())) {
            return;
        }
        tracing::debug!(stage, path, prior_owner, "path conflict");
        self.errors.push(Error::PathConflict {
            stage: stage.to_string(),
            path: path.to_string(),
            prior_owner: prior_owner.to_string(),
        });
    }
}
