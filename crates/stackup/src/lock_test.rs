// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::compose::compose_plan;
use crate::resolve::MemoryStore;
use crate::spec::CompositionPlan;
use crate::tree::TreeIndex;

const PLAN: &str = r#"
api: stackup/v0
base_environment:
  PATH: /usr/bin:/bin
stages:
  - stage: fsl@5.0.10
    copy:
      - source: /usr/share/fsl
        dest: /usr/share/fsl
    environment:
      - prepend: PATH
        value: /usr/share/fsl/5.0/bin
  - stage: msm@2.0
    copy:
      - source: /opt/msm
        dest: /opt/msm
entrypoint:
  command: [/code/run.py]
"#;

fn fsl_tree(contents: &[u8]) -> TreeIndex {
    let mut tree = TreeIndex::new();
    tree.insert_file("/usr/share/fsl/5.0/bin/bet", contents, 0o755);
    tree
}

#[fixture]
fn store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.add("fsl", "5.0.10", fsl_tree(b"bet"), Vec::new(), Vec::new());
    let mut msm = TreeIndex::new();
    msm.insert_file("/opt/msm/Ubuntu/msm", b"msm", 0o755);
    store.add("msm", "2.0", msm, Vec::new(), Vec::new());
    store
}

async fn compose(store: &MemoryStore, yaml: &str) -> ComposedImage {
    let plan = CompositionPlan::from_yaml(yaml).unwrap();
    compose_plan(&plan, store).await.unwrap()
}

fn kinds(changes: &[LockChange]) -> Vec<LockChangeKind> {
    changes.iter().map(|c| c.kind).collect()
}

#[rstest]
#[tokio::test]
async fn test_fresh_lock_has_no_changes(store: MemoryStore) {
    let image = compose(&store, PLAN).await;
    let lock = generate_lock(&image);

    assert_eq!(lock.api, LockApiVersion::V0);
    assert_eq!(lock.stages.len(), 2);
    assert_eq!(lock.tree_digest, image.tree_digest());
    assert!(verify_lock(&lock, &image).is_empty());
}

#[rstest]
#[tokio::test]
async fn test_rebuilt_stage_is_detected(mut store: MemoryStore) {
    let lock = generate_lock(&compose(&store, PLAN).await);

    store.add("fsl", "5.0.10", fsl_tree(b"bet v2"), Vec::new(), Vec::new());
    let image = compose(&store, PLAN).await;
    let changes = verify_lock(&lock, &image);

    assert_eq!(
        kinds(&changes),
        vec![LockChangeKind::StageDigestChanged, LockChangeKind::TreeChanged]
    );
    assert_eq!(changes[0].reference, "fsl@5.0.10");
}

#[rstest]
#[tokio::test]
async fn test_plan_edits_are_detected(mut store: MemoryStore) {
    let lock = generate_lock(&compose(&store, PLAN).await);

    store.add("msm", "2.1", TreeIndex::new(), Vec::new(), Vec::new());
    let edited = PLAN
        .replace("msm@2.0", "msm@2.1")
        .replace(
            "      - source: /opt/msm\n        dest: /opt/msm\n",
            "      - source: /\n        dest: /\n",
        )
        .replace("/usr/share/fsl/5.0/bin\n", "/usr/share/fsl/5.0/bin:/opt/bin\n");
    let image = compose(&store, &edited).await;
    let changes = verify_lock(&lock, &image);

    assert_eq!(
        kinds(&changes),
        vec![
            LockChangeKind::PlanChanged,
            LockChangeKind::StageRemoved,
            LockChangeKind::StageAdded,
            LockChangeKind::TreeChanged,
            LockChangeKind::EnvironmentChanged,
        ]
    );
    assert_eq!(changes[1].reference, "msm@2.0");
    assert_eq!(changes[2].reference, "msm@2.1");
}

#[rstest]
#[tokio::test]
async fn test_lock_file_save_and_load(store: MemoryStore) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(crate::STACKUP_LOCK_FILENAME);
    let lock = generate_lock(&compose(&store, PLAN).await);

    lock.save(&path).unwrap();
    let loaded = LockFile::load(&path).unwrap();

    assert_eq!(loaded, lock);
    let yaml = std::fs::read_to_string(&path).unwrap();
    assert!(yaml.starts_with("api: stackup/v0/lock"));
}

#[rstest]
fn test_load_missing_lock_file() {
    let tmp = TempDir::new().unwrap();
    let result = LockFile::load(tmp.path().join("missing.lock.yaml"));
    assert!(matches!(result, Err(Error::ReadFailed { .. })));
}
