// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Resolve and validate a composition plan.

use clap::Args;
use colored::Colorize;
use miette::Result;

/// Resolve and validate a plan, reporting every violation
#[derive(Debug, Args)]
pub struct CmdCheck {
    #[clap(flatten)]
    plan: crate::PlanFlags,

    #[clap(flatten)]
    store: crate::StoreFlags,

    /// Only validate; do not attempt the merge and environment phases
    #[clap(long)]
    validate_only: bool,
}

impl CmdCheck {
    pub async fn run(&mut self) -> Result<i32> {
        let plan = self.plan.load()?;
        let store = self.store.open()?;

        let resolutions = stackup::resolve_all(&store, &plan).await;
        let violations = stackup::validate::collect_violations(&plan, &resolutions);

        if !violations.is_empty() {
            eprintln!(
                "{} {} violation(s) in {:?}:",
                "✗".red(),
                violations.len(),
                self.plan.file
            );
            for violation in &violations {
                eprintln!("  - {violation}");
            }
            return Ok(1);
        }

        if !self.validate_only {
            let stages = resolutions
                .into_iter()
                .collect::<stackup::Result<Vec<_>>>()?;
            let image = stackup::compose_stages(&plan, &stages)?;
            tracing::info!(
                entries = image.tree.len(),
                variables = image.env.len(),
                "plan composes"
            );
        }

        println!(
            "{} {:?} is valid ({} stage(s))",
            "✓".green(),
            self.plan.file,
            plan.stages.len()
        );
        Ok(0)
    }
}
