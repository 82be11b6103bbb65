// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stackup show` command.

use clap::Args;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

/// Display the composed tree, environment and entrypoint chain
#[derive(Debug, Args)]
pub struct CmdShow {
    #[clap(flatten)]
    plan: crate::PlanFlags,

    #[clap(flatten)]
    store: crate::StoreFlags,

    /// Show the resolved stages
    #[clap(long)]
    stages: bool,

    /// Show the composed file tree
    #[clap(long)]
    tree: bool,

    /// Show the final environment
    #[clap(long)]
    env: bool,

    /// Show the entrypoint chain
    #[clap(long)]
    steps: bool,

    /// Show all information
    #[clap(long)]
    all: bool,

    /// Output format: table, yaml, json
    #[clap(long, default_value = "table")]
    format: String,
}

impl CmdShow {
    pub async fn run(&mut self) -> Result<i32> {
        let plan = self.plan.load()?;
        let store = self.store.open()?;
        let image = stackup::compose_plan(&plan, &store).await?;

        match self.format.as_str() {
            "yaml" => print!("{}", serde_yaml::to_string(&image).into_diagnostic()?),
            "json" => println!("{}", serde_json::to_string_pretty(&image).into_diagnostic()?),
            _ => {
                // Without a selection, show everything except the full tree
                let none = !(self.stages || self.tree || self.env || self.steps);
                if self.stages || self.all || none {
                    Self::show_stages(&image);
                    println!();
                }
                if self.tree || self.all {
                    Self::show_tree(&image);
                    println!();
                }
                if self.env || self.all || none {
                    Self::show_env(&image);
                    println!();
                }
                if self.steps || self.all || none {
                    Self::show_steps(&image);
                }
            }
        }

        Ok(0)
    }

    fn show_stages(image: &stackup::ComposedImage) {
        println!("{}", "Resolved Stages:".bold());
        println!();
        if image.stages.is_empty() {
            println!("  {}", "(no stages)".dimmed());
        }
        for (i, stage) in image.stages.iter().enumerate() {
            println!("  {}. {} {}", i + 1, stage.stage.green(), stage.digest.dimmed());
        }
        println!();
        println!("Plan digest: {}", image.plan_digest);
    }

    fn show_tree(image: &stackup::ComposedImage) {
        println!("{}", "Composed Tree:".bold());
        println!();
        for (path, entry) in image.tree.iter() {
            let path = match &entry.kind {
                stackup::tree::EntryKind::Dir => format!("{path}/").blue().to_string(),
                stackup::tree::EntryKind::File { mode, .. } => format!("{path} ({mode:04o})"),
                stackup::tree::EntryKind::Symlink { target } => {
                    format!("{} -> {}", path.cyan(), target)
                }
            };
            println!("  {}  {}", path, entry.owner.dimmed());
        }
        println!();
        println!("Total: {} entries, digest {}", image.tree.len(), image.tree_digest());
    }

    fn show_env(image: &stackup::ComposedImage) {
        println!("{}", "Environment Variables:".bold());
        println!();
        for (name, value) in image.env.iter() {
            println!("  {} = {}", name.cyan(), value.green());
        }
        for superseded in &image.audit.superseded_variables {
            println!(
                "  {} {} = {} from {} (kept {})",
                "ignored".yellow(),
                superseded.name,
                superseded.value,
                superseded.stage,
                superseded.kept_owner
            );
        }
    }

    fn show_steps(image: &stackup::ComposedImage) {
        println!("{}", "Entrypoint Chain:".bold());
        println!();
        for (i, step) in image.execution.steps.iter().enumerate() {
            println!(
                "  {}. [{}] {} {}",
                i + 1,
                step.user.yellow(),
                step.action.describe(),
                format!("({})", step.source).dimmed()
            );
        }
        println!(
            "  {} [{}] {}",
            "exec".bold(),
            image.execution.terminal.user.yellow(),
            image.execution.terminal.argv.join(" ").green()
        );
    }
}
