// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn cmd(path: PathBuf, stages: &[&str], template: &str) -> CmdInit {
    CmdInit {
        path,
        stages: stages.iter().map(|s| s.to_string()).collect(),
        user: "c-pac_user".to_string(),
        template: template.to_string(),
        force: false,
    }
}

#[rstest]
#[case("minimal")]
#[case("standard")]
#[tokio::test]
async fn test_templates_parse(#[case] template: &str) {
    let tmp = TempDir::new().unwrap();
    let mut init = cmd(tmp.path().to_path_buf(), &["fsl@5.0.10", "msm@2.0"], template);

    assert_eq!(init.run().await.unwrap(), 0);

    let plan = stackup::CompositionPlan::load(tmp.path().join(stackup::STACKUP_FILENAME)).unwrap();
    let stages: Vec<&str> = plan.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["fsl@5.0.10", "msm@2.0"]);
    assert_eq!(plan.entrypoint.user, "c-pac_user");
    assert_eq!(plan.entrypoint.command, vec!["/bin/sh"]);
}

#[rstest]
#[tokio::test]
async fn test_existing_plan_is_kept() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(stackup::STACKUP_FILENAME);
    std::fs::write(&path, "keep me").unwrap();

    let mut init = cmd(tmp.path().to_path_buf(), &[], "standard");
    assert!(init.run().await.is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
}

#[rstest]
#[tokio::test]
async fn test_invalid_stage_reference_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut init = cmd(tmp.path().to_path_buf(), &["fsl"], "minimal");
    assert!(init.run().await.is_err());
    assert!(!tmp.path().join(stackup::STACKUP_FILENAME).exists());
}
