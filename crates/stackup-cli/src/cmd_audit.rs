// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stackup audit` command.

use clap::Args;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

/// Report overrides, superseded variables and conflicts
#[derive(Debug, Args)]
pub struct CmdAudit {
    #[clap(flatten)]
    plan: crate::PlanFlags,

    #[clap(flatten)]
    store: crate::StoreFlags,

    /// Output format: table, yaml, json
    #[clap(long, default_value = "table")]
    format: String,
}

impl CmdAudit {
    pub async fn run(&mut self) -> Result<i32> {
        let plan = self.plan.load()?;
        let store = self.store.open()?;
        let report = stackup::audit_plan(&plan, &store).await;

        match self.format.as_str() {
            "yaml" => print!("{}", serde_yaml::to_string(&report).into_diagnostic()?),
            "json" => println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?),
            _ => self.show_table(&report),
        }

        Ok(if report.is_clean() { 0 } else { 1 })
    }

    fn show_table(&self, report: &stackup::AuditReport) {
        println!("{}", "Overridden Paths:".bold());
        if report.overridden_paths.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for o in &report.overridden_paths {
            println!(
                "  {} {} {} replaced {} {}",
                o.path.cyan(),
                o.stage.green(),
                o.kind,
                o.prior_kind,
                format!("from {}", o.prior_owner).dimmed()
            );
        }

        println!();
        println!("{}", "Superseded Variables:".bold());
        if report.superseded_variables.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for s in &report.superseded_variables {
            println!(
                "  {} = {} from {} {}",
                s.name.cyan(),
                s.value,
                s.stage.green(),
                format!("(protected by {})", s.kept_owner).dimmed()
            );
        }

        if !report.conflicts.is_empty() {
            println!();
            println!("{}", "Conflicts:".bold().red());
            for c in &report.conflicts {
                println!("  {} {} collides with {}", c.path.cyan(), c.stage, c.prior_owner);
            }
        }

        if !report.validation_errors.is_empty() || !report.errors.is_empty() {
            println!();
            println!("{}", "Errors:".bold().red());
            for error in &report.validation_errors {
                println!("  - {error}");
            }
            for error in &report.errors {
                println!("  - {error}");
            }
        }
    }
}
