// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stackup init` command.

use std::path::PathBuf;

use clap::Args;
use miette::Result;

#[cfg(test)]
#[path = "./cmd_init_test.rs"]
mod cmd_init_test;

/// Create a new stackup.yaml file
#[derive(Debug, Args)]
pub struct CmdInit {
    /// Directory to create file in
    #[clap(default_value = ".")]
    path: PathBuf,

    /// Add an initial stage reference (name@version)
    #[clap(long = "stage")]
    stages: Vec<String>,

    /// User the terminal command runs as
    #[clap(long, default_value = stackup::entrypoint::ROOT_USER)]
    user: String,

    /// Template to use: minimal, standard
    #[clap(long, default_value = "standard")]
    template: String,

    /// Overwrite an existing plan
    #[clap(long)]
    force: bool,
}

impl CmdInit {
    pub async fn run(&mut self) -> Result<i32> {
        let plan_path = self.path.join(stackup::STACKUP_FILENAME);

        if plan_path.exists() && !self.force {
            return Err(miette::miette!(
                "{} already exists at {:?}",
                stackup::STACKUP_FILENAME,
                plan_path
            ));
        }

        for stage in &self.stages {
            stage.parse::<stackup::StageRef>()?;
        }

        let content = match self.template.as_str() {
            "minimal" => self.generate_minimal_template(),
            _ => self.generate_standard_template(),
        };

        std::fs::write(&plan_path, content)
            .map_err(|e| miette::miette!("Failed to write {:?}: {}", plan_path, e))?;

        println!("Created {} at {:?}", stackup::STACKUP_FILENAME, plan_path);
        println!();
        println!("Next steps:");
        println!("  1. Add copy directives and environment to each stage");
        println!("  2. Run 'stackup check' to validate the plan");
        println!("  3. Run 'stackup lock' to pin the resolved stages");

        Ok(0)
    }

    fn stages_section(&self) -> String {
        if self.stages.is_empty() {
            return "stages: []\n".to_string();
        }
        let mut section = "stages:\n".to_string();
        for stage in &self.stages {
            section.push_str(&format!("  - stage: {}\n", stage.trim()));
        }
        section
    }

    fn generate_minimal_template(&self) -> String {
        format!(
            "api: stackup/v0\n\
            \n\
            {}\
            \n\
            entrypoint:\n  user: {}\n  command: [/bin/sh]\n",
            self.stages_section(),
            self.user
        )
    }

    fn generate_standard_template(&self) -> String {
        format!(
            "# stackup composition plan\n\
            \n\
            api: stackup/v0\n\
            \n\
            # Optional: Human-readable description\n\
            # description: \"My runtime image\"\n\
            \n\
            # Variables passed through from the base runtime\n\
            base_environment:\n  PATH: /usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
            \n\
            # Stages in composition order (later stages layer on top)\n\
            {}\
            #   - stage: fsl@5.0.10\n\
            #     low_priority: false\n\
            #     copy:\n\
            #       - source: /usr/share/fsl\n\
            #         dest: /usr/share/fsl\n\
            #         overwrite: false\n\
            #     environment:\n\
            #       - set: FSLDIR\n\
            #         value: /usr/share/fsl/5.0\n\
            #         protected: true\n\
            #       - prepend: PATH\n\
            #         value: ${{FSLDIR}}/bin\n\
            #     setup:\n\
            #       - chmod: /usr/share/fsl/5.0/bin\n\
            #         mode: 755\n\
            #         recursive: true\n\
            \n\
            entrypoint:\n  user: {}\n\
            \x20 # setup:\n\
            \x20 #   - remove: /tmp/build\n\
            \x20 command: [/bin/sh]\n",
            self.stages_section(),
            self.user
        )
    }
}
