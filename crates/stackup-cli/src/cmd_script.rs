// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Render the startup script of a composed environment.

use std::path::PathBuf;

use clap::Args;
use miette::{IntoDiagnostic, Result};

/// Print the startup script for the composed environment
#[derive(Debug, Args)]
pub struct CmdScript {
    #[clap(flatten)]
    plan: crate::PlanFlags,

    #[clap(flatten)]
    store: crate::StoreFlags,

    /// Write the script to a file instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,
}

impl CmdScript {
    pub async fn run(&mut self) -> Result<i32> {
        let plan = self.plan.load()?;
        let store = self.store.open()?;
        let image = stackup::compose_plan(&plan, &store).await?;
        let script = image.env.to_startup_script();

        match &self.output {
            Some(path) => {
                std::fs::write(path, script).into_diagnostic()?;
                tracing::info!(path = %path.display(), "wrote startup script");
            }
            None => print!("{script}"),
        }
        Ok(0)
    }
}
