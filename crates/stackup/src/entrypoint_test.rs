// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use rstest::rstest;

use super::*;

fn switch(user: &str) -> SetupAction {
    SetupAction::User(SwitchUser {
        user: user.to_string(),
        escalation: None,
    })
}

fn remove(path: &str) -> SetupAction {
    SetupAction::Remove(Remove {
        remove: path.to_string(),
        recursive: true,
    })
}

fn entrypoint(user: &str, setup: Vec<SetupAction>, command: &[&str]) -> EntrypointSpec {
    EntrypointSpec {
        user: user.to_string(),
        setup,
        command: command.iter().map(|s| s.to_string()).collect(),
    }
}

fn env() -> FinalEnv {
    FinalEnv::from(BTreeMap::from([("PATH".to_string(), "/bin".to_string())]))
}

/// Records every call and fails on a chosen step.
#[derive(Default)]
struct RecordingExecutor {
    fail_at: Option<usize>,
    ran: Vec<String>,
    launched: Option<Vec<String>>,
}

impl ActionExecutor for RecordingExecutor {
    fn run_step(&mut self, step: &PlannedStep, _env: &FinalEnv) -> Result<(), String> {
        if self.fail_at == Some(self.ran.len()) {
            return Err("permission denied".to_string());
        }
        self.ran.push(step.action.describe());
        Ok(())
    }

    fn launch(&mut self, command: &TerminalCommand, _env: &FinalEnv) {
        self.launched = Some(command.argv.clone());
    }
}

#[rstest]
fn test_contributions_precede_entrypoint_actions() {
    let msm_setup = [SetupAction::Chmod(Chmod {
        chmod: "/opt/msm/Ubuntu/msm".to_string(),
        mode: FileMode(0o755),
        recursive: false,
    })];
    let contributions = [SetupContribution {
        source: "msm@2.0",
        actions: &msm_setup,
    }];
    let spec = entrypoint(
        "c-pac_user",
        vec![remove("/tmp/build"), switch("c-pac_user")],
        &["/code/run.py", "--help"],
    );

    let plan = build_execution_plan(&env(), &contributions, &spec).unwrap();

    let described: Vec<String> = plan.steps.iter().map(|s| s.action.describe()).collect();
    assert_eq!(
        described,
        vec![
            "chmod 0755 /opt/msm/Ubuntu/msm",
            "rm -R /tmp/build",
            "user c-pac_user"
        ]
    );
    assert_eq!(plan.steps[0].source, "msm@2.0");
    assert_eq!(plan.steps[0].user, ROOT_USER);
    assert_eq!(plan.steps[2].source, ENTRYPOINT_SOURCE);
    assert_eq!(plan.terminal.user, "c-pac_user");
    assert_eq!(plan.terminal.argv, vec!["/code/run.py", "--help"]);
    assert_eq!(plan.env, env());
}

#[rstest]
fn test_implicit_drop_to_entrypoint_user() {
    let spec = entrypoint("c-pac_user", vec![remove("/tmp/build")], &["/code/run.py"]);
    let plan = build_execution_plan(&env(), &[], &spec).unwrap();

    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[1].action, switch("c-pac_user"));
    assert_eq!(plan.steps[1].user, "c-pac_user");
}

#[rstest]
fn test_missing_terminal_command() {
    let spec = entrypoint(ROOT_USER, Vec::new(), &[]);
    let result = build_execution_plan(&env(), &[], &spec);
    assert!(matches!(result, Err(Error::MissingTerminalCommand)));
}

#[rstest]
fn test_escalation_without_reason_is_rejected() {
    let spec = entrypoint(
        ROOT_USER,
        vec![switch("c-pac_user"), switch(ROOT_USER)],
        &["/bin/sh"],
    );
    match build_execution_plan(&env(), &[], &spec) {
        Err(Error::PrivilegeEscalation { from, to, .. }) => {
            assert_eq!(from, "c-pac_user");
            assert_eq!(to, ROOT_USER);
        }
        other => panic!("Expected PrivilegeEscalation, got: {:?}", other),
    }
}

#[rstest]
fn test_terminal_user_cannot_escalate_implicitly() {
    let spec = entrypoint(ROOT_USER, vec![switch("c-pac_user")], &["/bin/sh"]);
    let result = build_execution_plan(&env(), &[], &spec);
    assert!(matches!(result, Err(Error::PrivilegeEscalation { .. })));
}

#[rstest]
fn test_escalation_with_reason_is_allowed() {
    let spec = entrypoint(
        "c-pac_user",
        vec![
            switch("c-pac_user"),
            SetupAction::User(SwitchUser {
                user: ROOT_USER.to_string(),
                escalation: Some("fix ownership of mounted outputs".to_string()),
            }),
            SetupAction::Chown(Chown {
                chown: "/outputs".to_string(),
                owner: "c-pac_user:c-pac_user".to_string(),
                recursive: true,
            }),
        ],
        &["/code/run.py"],
    );

    let plan = build_execution_plan(&env(), &[], &spec).unwrap();
    assert_eq!(plan.steps[2].user, ROOT_USER);
    // dropped back to the terminal user after the escalated step
    assert_eq!(plan.steps.last().map(|s| s.user.as_str()), Some("c-pac_user"));
}

#[rstest]
fn test_execute_runs_steps_then_launches() {
    let spec = entrypoint("c-pac_user", vec![remove("/tmp/build")], &["/code/run.py"]);
    let plan = build_execution_plan(&env(), &[], &spec).unwrap();

    let mut executor = RecordingExecutor::default();
    plan.execute(&mut executor).unwrap();

    assert_eq!(executor.ran, vec!["rm -R /tmp/build", "user c-pac_user"]);
    assert_eq!(executor.launched, Some(vec!["/code/run.py".to_string()]));
}

#[rstest]
fn test_failed_step_aborts_before_terminal_command() {
    let spec = entrypoint("c-pac_user", vec![remove("/tmp/build")], &["/code/run.py"]);
    let plan = build_execution_plan(&env(), &[], &spec).unwrap();

    let mut executor = RecordingExecutor {
        fail_at: Some(1),
        ..Default::default()
    };
    let result = plan.execute(&mut executor);

    match result {
        Err(Error::SetupActionFailed { index, action, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(action, "user c-pac_user");
        }
        other => panic!("Expected SetupActionFailed, got: {:?}", other),
    }
    assert!(executor.launched.is_none());
}

#[rstest]
#[case("755", 0o755)]
#[case("\"0640\"", 0o640)]
#[case("4755", 0o4755)]
fn test_parse_file_mode(#[case] yaml: &str, #[case] expected: u32) {
    let mode: FileMode = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(mode, FileMode(expected));
}

#[rstest]
#[case("789")]
#[case("\"rwx\"")]
#[case("17777")]
fn test_parse_invalid_file_mode(#[case] yaml: &str) {
    assert!(serde_yaml::from_str::<FileMode>(yaml).is_err());
}

#[rstest]
fn test_parse_setup_actions() {
    let yaml = r#"
- user: c-pac_user
- user: root
  escalation: repair permissions
- chmod: /code
  mode: 775
  recursive: true
- chown: /outputs
  owner: c-pac_user:users
- remove: /tmp/*
- run: [ldconfig]
"#;
    let actions: Vec<SetupAction> = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(actions.len(), 6);
    assert_eq!(actions[0], switch("c-pac_user"));
    assert!(matches!(&actions[1], SetupAction::User(u) if u.escalation.is_some()));
    assert!(matches!(&actions[2], SetupAction::Chmod(c) if c.mode == FileMode(0o775)));
    assert_eq!(actions[3].users(), vec!["c-pac_user"]);
    assert!(matches!(&actions[4], SetupAction::Remove(_)));
    assert_eq!(actions[5].describe(), "run ldconfig");
}
