// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed file tree indexes.
//!
//! A [`TreeIndex`] describes the contents of one stage's build output
//! without holding file data: every entry is keyed by its normalized
//! absolute path and regular files carry the sha256 of their contents.
//! The digest of the index is the identity of the tree.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
#[path = "./tree_test.rs"]
mod tree_test;

/// Prefix used for every digest string produced by stackup.
pub const DIGEST_PREFIX: &str = "sha256:";

/// The type and content identity of a single tree entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File { digest: String, size: u64, mode: u32 },
    Symlink { target: String },
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir)
    }

    /// Short label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dir => "directory",
            Self::File { .. } => "file",
            Self::Symlink { .. } => "symlink",
        }
    }
}

/// Index of all entries in a stage tree, keyed by normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TreeIndex {
    entries: BTreeMap<String, EntryKind>,
}

impl TreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory and any missing parents.
    pub fn insert_dir(&mut self, path: &str) {
        let path = normalize_path(path);
        self.insert_parents(&path);
        if path != "/" {
            self.entries.insert(path, EntryKind::Dir);
        }
    }

    /// Add a regular file, hashing its contents.
    pub fn insert_file(&mut self, path: &str, contents: &[u8], mode: u32) {
        let path = normalize_path(path);
        self.insert_parents(&path);
        self.entries.insert(
            path,
            EntryKind::File {
                digest: hash_bytes(contents),
                size: contents.len() as u64,
                mode,
            },
        );
    }

    /// Add a symbolic link; the target is recorded verbatim and never followed.
    pub fn insert_symlink(&mut self, path: &str, target: &str) {
        let path = normalize_path(path);
        self.insert_parents(&path);
        self.entries.insert(
            path,
            EntryKind::Symlink {
                target: target.to_string(),
            },
        );
    }

    /// Add a pre-computed entry, e.g. one copied out of another index.
    pub(crate) fn insert_entry(&mut self, path: &str, kind: EntryKind) {
        let path = normalize_path(path);
        self.insert_parents(&path);
        if path != "/" {
            self.entries.insert(path, kind);
        }
    }

    fn insert_parents(&mut self, path: &str) {
        for parent in parent_paths(path) {
            self.entries.entry(parent).or_insert(EntryKind::Dir);
        }
    }

    /// Look up an entry. The root always exists as a directory.
    pub fn get(&self, path: &str) -> Option<&EntryKind> {
        static ROOT: EntryKind = EntryKind::Dir;
        let path = normalize_path(path);
        if path == "/" {
            return Some(&ROOT);
        }
        self.entries.get(&path)
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

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryKind)> {
        self.entries.iter()
    }

    /// Entries strictly below `path`, as (path relative to `path`, entry).
    pub fn subtree<'a>(&'a self, path: &str) -> Vec<(String, &'a EntryKind)> {
        let path = normalize_path(path);
        if path == "/" {
            return self
                .entries
                .iter()
                .map(|(p, e)| (p.trim_start_matches('/').to_string(), e))
                .collect();
        }
        let prefix = format!("{path}/");
        self.entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, e)| (p[prefix.len()..].to_string(), e))
            .collect()
    }

    /// Content digest of the whole index.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            match entry {
                EntryKind::Dir => hasher.update(b"dir"),
                EntryKind::File { digest, size, mode } => {
                    hasher.update(format!("file {digest} {size} {mode:o}").as_bytes())
                }
                EntryKind::Symlink { target } => {
                    hasher.update(format!("symlink {target}").as_bytes())
                }
            }
            hasher.update([b'\n']);
        }
        format!("{DIGEST_PREFIX}{:x}", hasher.finalize())
    }

    /// Build an index by walking a directory on disk.
    ///
    /// Symlinks are recorded, not followed.
    pub fn scan<P: AsRef<Path>>(root: P) -> crate::Result<Self> {
        let root = root.as_ref();
        let mut index = Self::new();
        scan_dir(root, root, &mut index)?;
        Ok(index)
    }
}

fn scan_dir(root: &Path, dir: &Path, index: &mut TreeIndex) -> crate::Result<()> {
    let read_dir = std::fs::read_dir(dir).map_err(|error| crate::Error::ReadFailed {
        path: dir.to_path_buf(),
        error,
    })?;
    let mut children = read_dir.collect::<std::io::Result<Vec<_>>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let metadata = std::fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(&path)?;
            index.insert_symlink(&rel, &target.to_string_lossy());
        } else if file_type.is_dir() {
            index.insert_dir(&rel);
            scan_dir(root, &path, index)?;
        } else {
            let contents = std::fs::read(&path).map_err(|error| crate::Error::ReadFailed {
                path: path.clone(),
                error,
            })?;
            index.insert_file(&rel, &contents, file_mode(&metadata));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Hash a byte slice into a prefixed digest string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{:x}", Sha256::digest(bytes))
}

/// Normalize a tree path to an absolute form without `.`, `..`,
/// repeated or trailing separators. `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// All strict ancestors of a normalized path, excluding the root,
/// outermost first.
pub fn parent_paths(path: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        parents.push(current.clone());
    }
    parents
}

/// Join a relative path onto a normalized base path.
pub fn join_path(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        normalize_path(base)
    } else {
        normalize_path(&format!("{base}/{rel}"))
    }
}
