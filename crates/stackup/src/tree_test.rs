// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;

#[rstest]
#[case("/usr/share/fsl", "/usr/share/fsl")]
#[case("usr/share/fsl/", "/usr/share/fsl")]
#[case("/usr//share/./fsl", "/usr/share/fsl")]
#[case("/usr/share/../lib", "/usr/lib")]
#[case("/../../etc", "/etc")]
#[case("", "/")]
#[case("/", "/")]
fn test_normalize_path(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalize_path(input), expected);
}

#[rstest]
fn test_parent_paths() {
    assert_eq!(
        parent_paths("/opt/msm/Ubuntu/msm"),
        vec!["/opt", "/opt/msm", "/opt/msm/Ubuntu"]
    );
    assert!(parent_paths("/opt").is_empty());
    assert!(parent_paths("/").is_empty());
}

#[rstest]
fn test_insert_creates_parents() {
    let mut tree = TreeIndex::new();
    tree.insert_file("/opt/msm/Ubuntu/msm", b"binary", 0o755);

    assert_eq!(tree.get("/opt"), Some(&EntryKind::Dir));
    assert_eq!(tree.get("/opt/msm/Ubuntu"), Some(&EntryKind::Dir));
    assert!(matches!(
        tree.get("/opt/msm/Ubuntu/msm"),
        Some(EntryKind::File { size: 6, mode: 0o755, .. })
    ));
    assert!(tree.contains("/"));
    assert!(!tree.contains("/usr"));
}

#[rstest]
fn test_subtree_excludes_siblings_with_shared_prefix() {
    let mut tree = TreeIndex::new();
    tree.insert_file("/usr/share/fsl/bin/bet", b"bet", 0o755);
    tree.insert_file("/usr/share/fsl-extra/readme", b"x", 0o644);

    let sub: Vec<String> = tree
        .subtree("/usr/share/fsl")
        .into_iter()
        .map(|(rel, _)| rel)
        .collect();
    assert_eq!(sub, vec!["bin", "bin/bet"]);
}

#[rstest]
fn test_subtree_of_root_is_everything() {
    let mut tree = TreeIndex::new();
    tree.insert_symlink("/usr/bin/python", "python3");
    assert_eq!(tree.subtree("/").len(), tree.len());
}

#[rstest]
fn test_digest_is_content_sensitive() {
    let mut a = TreeIndex::new();
    a.insert_file("/bin/tool", b"v1", 0o755);
    let mut b = TreeIndex::new();
    b.insert_file("/bin/tool", b"v1", 0o755);
    assert_eq!(a.digest(), b.digest());
    assert!(a.digest().starts_with(DIGEST_PREFIX));

    b.insert_file("/bin/tool", b"v2", 0o755);
    assert_ne!(a.digest(), b.digest());
}

#[rstest]
fn test_digest_ignores_insertion_order() {
    let mut a = TreeIndex::new();
    a.insert_file("/a", b"a", 0o644);
    a.insert_file("/b", b"b", 0o644);
    let mut b = TreeIndex::new();
    b.insert_file("/b", b"b", 0o644);
    b.insert_file("/a", b"a", 0o644);
    assert_eq!(a.digest(), b.digest());
}

#[rstest]
fn test_scan_directory() {
    let tmp = TempDir::new().unwrap();
    let bin = tmp.path().join("usr/share/fsl/5.0/bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("bet"), "#!/bin/sh\n").unwrap();
    std::fs::create_dir_all(tmp.path().join("etc")).unwrap();

    let tree = TreeIndex::scan(tmp.path()).unwrap();

    assert_eq!(tree.get("/etc"), Some(&EntryKind::Dir));
    assert!(matches!(
        tree.get("/usr/share/fsl/5.0/bin/bet"),
        Some(EntryKind::File { size: 10, .. })
    ));
    assert_eq!(tree.digest(), TreeIndex::scan(tmp.path()).unwrap().digest());
}

#[cfg(unix)]
#[rstest]
fn test_scan_records_symlinks_without_following() {
    let tmp = TempDir::new().unwrap();
    std::os::unix::fs::symlink("/does/not/exist", tmp.path().join("dangling")).unwrap();

    let tree = TreeIndex::scan(tmp.path()).unwrap();
    assert_eq!(
        tree.get("/dangling"),
        Some(&EntryKind::Symlink {
            target: "/does/not/exist".to_string()
        })
    );
}
