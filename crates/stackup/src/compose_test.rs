// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::{fixture, rstest};

use super::*;
use crate::entrypoint::{SetupAction, ROOT_USER};
use crate::resolve::MemoryStore;
use crate::tree::TreeIndex;
use crate::validate::ValidationError;
use crate::Error;

const FSL_MSM_PLAN: &str = r#"
api: stackup/v0
description: C-PAC runtime image
base_environment:
  PATH: /usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin
stages:
  - stage: fsl@5.0.10
    copy:
      - source: /usr/share/fsl
        dest: /usr/share/fsl
    environment:
      - set: FSLDIR
        value: /usr/share/fsl/5.0
        protected: true
      - prepend: PATH
        value: ${FSLDIR}/bin
  - stage: msm@2.0
    copy:
      - source: /opt/msm/Ubuntu/msm
        dest: /opt/msm/Ubuntu/msm
    environment:
      - prepend: PATH
        value: /opt/msm/Ubuntu
    setup:
      - chmod: /opt/msm/Ubuntu/msm
        mode: 755
entrypoint:
  user: c-pac_user
  setup:
    - remove: /tmp/build
    - user: c-pac_user
  command: [/code/run.py]
"#;

#[fixture]
fn store() -> MemoryStore {
    let mut store = MemoryStore::new();

    let mut fsl = TreeIndex::new();
    fsl.insert_file("/usr/share/fsl/5.0/bin/bet", b"bet", 0o755);
    fsl.insert_file("/usr/share/fsl/5.0/bin/flirt", b"flirt", 0o755);
    fsl.insert_file("/etc/passwd", b"c-pac_user:x:1000:1000\n", 0o644);
    store.add("fsl", "5.0.10", fsl, vec!["c-pac_user".to_string()], Vec::new());

    let mut msm = TreeIndex::new();
    msm.insert_file("/opt/msm/Ubuntu/msm", b"msm", 0o644);
    msm.insert_file("/opt/msm/Ubuntu/README", b"readme", 0o644);
    store.add("msm", "2.0", msm, Vec::new(), Vec::new());
    store
}

fn fsl_msm_plan() -> CompositionPlan {
    CompositionPlan::from_yaml(FSL_MSM_PLAN).unwrap()
}

#[rstest]
#[tokio::test]
async fn test_fsl_msm_end_to_end(store: MemoryStore) {
    let image = compose_plan(&fsl_msm_plan(), &store).await.unwrap();

    let path = image.env.get("PATH").unwrap();
    assert!(
        path.starts_with("/opt/msm/Ubuntu:/usr/share/fsl/5.0/bin:"),
        "unexpected PATH: {path}"
    );
    assert!(path.ends_with(":/sbin:/bin"));
    assert_eq!(image.env.get("FSLDIR"), Some("/usr/share/fsl/5.0"));

    assert_eq!(image.tree.get("/usr/share/fsl/5.0/bin/bet").unwrap().owner, "fsl@5.0.10");
    assert_eq!(image.tree.get("/opt/msm/Ubuntu/msm").unwrap().owner, "msm@2.0");
    assert!(!image.tree.contains("/opt/msm/Ubuntu/README"));
    assert!(!image.tree.contains("/etc/passwd"));
    assert!(image.audit.overridden_paths.is_empty());

    let stages: Vec<&str> = image.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["fsl@5.0.10", "msm@2.0"]);

    let steps: Vec<(&str, &str)> = image
        .execution
        .steps
        .iter()
        .map(|s| (s.source.as_str(), s.user.as_str()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("msm@2.0", ROOT_USER),
            ("entrypoint", ROOT_USER),
            ("entrypoint", "c-pac_user"),
        ]
    );
    assert!(matches!(image.execution.steps[0].action, SetupAction::Chmod(_)));
    assert_eq!(image.execution.terminal.argv, vec!["/code/run.py"]);
    assert_eq!(image.execution.env, image.env);
}

#[rstest]
#[tokio::test]
async fn test_composition_is_deterministic(store: MemoryStore) {
    let plan = fsl_msm_plan();
    let first = compose_plan(&plan, &store).await.unwrap();
    let second = compose_plan(&plan, &store).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.tree_digest(), second.tree_digest());
    assert_eq!(first.env_digest(), second.env_digest());
    assert_eq!(first.plan_digest, plan.digest().unwrap());
}

#[rstest]
#[tokio::test]
async fn test_invalid_plan_is_not_composed(store: MemoryStore) {
    let mut plan = fsl_msm_plan();
    plan.stages[1].stage = "msm@3.0".to_string();
    plan.entrypoint.command.clear();

    match compose_plan(&plan, &store).await {
        Err(Error::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
        other => panic!("Expected ValidationFailed, got: {:?}", other),
    }
}

#[rstest]
#[tokio::test]
async fn test_overlapping_copies_fail_with_conflicts(store: MemoryStore) {
    let mut plan = fsl_msm_plan();
    plan.stages[1].copy[0].dest = "/usr/share/fsl/5.0/bin/bet".to_string();

    match compose_plan(&plan, &store).await {
        Err(Error::ValidationFailed { errors }) => assert_eq!(
            errors,
            vec![ValidationError::PathConflict {
                stage: "msm@2.0".to_string(),
                path: "/usr/share/fsl/5.0/bin/bet".to_string(),
                prior_owner: "fsl@5.0.10".to_string(),
            }]
        ),
        other => panic!("Expected ValidationFailed, got: {:?}", other),
    }
}

#[rstest]
#[tokio::test]
async fn test_overwrite_is_audited(store: MemoryStore) {
    let mut plan = fsl_msm_plan();
    plan.stages[1].copy[0].dest = "/usr/share/fsl/5.0/bin/bet".to_string();
    plan.stages[1].copy[0].overwrite = true;

    let image = compose_plan(&plan, &store).await.unwrap();
    assert_eq!(image.audit.overridden_paths.len(), 1);
    assert_eq!(image.audit.overridden_paths[0].prior_owner, "fsl@5.0.10");
}

#[rstest]
#[tokio::test]
async fn test_protected_reassignment_fails(store: MemoryStore) {
    let plan = FSL_MSM_PLAN.replace(
        "      - prepend: PATH\n        value: /opt/msm/Ubuntu\n",
        "      - set: FSLDIR\n        value: /opt/fsl\n        protected: true\n",
    );
    let plan = CompositionPlan::from_yaml(plan).unwrap();

    let result = compose_plan(&plan, &store).await;
    assert!(matches!(result, Err(Error::ProtectedOverride { .. })));
}

#[rstest]
#[tokio::test]
async fn test_composed_image_serializes(store: MemoryStore) {
    let image = compose_plan(&fsl_msm_plan(), &store).await.unwrap();

    let yaml = serde_yaml::to_string(&image).unwrap();
    let parsed: ComposedImage = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, image);
}
