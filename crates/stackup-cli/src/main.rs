// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! stackup - Layered Component Image Composer CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

mod cmd_audit;
mod cmd_check;
mod cmd_init;
mod cmd_lock;
mod cmd_script;
mod cmd_show;

use cmd_audit::CmdAudit;
use cmd_check::CmdCheck;
use cmd_init::CmdInit;
use cmd_lock::CmdLock;
use cmd_script::CmdScript;
use cmd_show::CmdShow;

#[derive(Parser)]
#[clap(
    name = "stackup",
    about = "Layered Component Image Composer",
    version,
    long_about = "Compose independently built component stages into one image tree, \
                  runtime environment and entrypoint chain"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

/// Location of the composition plan.
#[derive(Parser, Clone, Debug)]
pub struct PlanFlags {
    /// Path to the composition plan
    #[clap(short, long, env = "STACKUP_FILE", default_value = stackup::STACKUP_FILENAME)]
    pub file: PathBuf,
}

impl PlanFlags {
    pub fn load(&self) -> Result<stackup::CompositionPlan> {
        Ok(stackup::CompositionPlan::load(&self.file)?)
    }

    /// The lock file that sits next to the plan.
    pub fn lock_path(&self) -> PathBuf {
        self.file.with_file_name(stackup::STACKUP_LOCK_FILENAME)
    }
}

/// Location of the artifact store.
#[derive(Parser, Clone, Debug)]
pub struct StoreFlags {
    /// Root directory of the artifact store
    #[clap(long, env = "STACKUP_STORE", default_value = "~/.stackup/store")]
    pub store: PathBuf,
}

impl StoreFlags {
    pub fn open(&self) -> Result<stackup::DirStore> {
        let store = stackup::DirStore::open(&self.store)?;
        tracing::debug!(root = %store.root().display(), "opened artifact store");
        Ok(store)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new stackup.yaml file
    Init(CmdInit),

    /// Resolve and validate a plan, reporting every violation
    Check(CmdCheck),

    /// Display the composed tree, environment and entrypoint chain
    Show(CmdShow),

    /// Report overrides, superseded variables and conflicts
    Audit(CmdAudit),

    /// Generate, update or verify the lock file
    Lock(CmdLock),

    /// Print the startup script for the composed environment
    Script(CmdScript),
}

impl Opt {
    async fn run(self) -> Result<i32> {
        // Setup logging
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        // Dispatch to command
        match self.cmd {
            Command::Init(mut cmd) => cmd.run().await,
            Command::Check(mut cmd) => cmd.run().await,
            Command::Show(mut cmd) => cmd.run().await,
            Command::Audit(mut cmd) => cmd.run().await,
            Command::Lock(mut cmd) => cmd.run().await,
            Command::Script(mut cmd) => cmd.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let code = opt.run().await?;
    std::process::exit(code);
}
