// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Generate, update or verify stackup lock files.

use clap::Args;
use miette::Result;

/// Generate, update or verify the lock file
#[derive(Debug, Args)]
pub struct CmdLock {
    #[clap(flatten)]
    plan: crate::PlanFlags,

    #[clap(flatten)]
    store: crate::StoreFlags,

    /// Update existing lock file
    #[clap(long)]
    update: bool,

    /// Force regeneration even if up-to-date
    #[clap(long)]
    force: bool,

    /// Verify lock is current (exit 1 if not)
    #[clap(long)]
    check: bool,
}

impl CmdLock {
    pub async fn run(&mut self) -> Result<i32> {
        let plan = self.plan.load()?;
        let store = self.store.open()?;
        let image = stackup::compose_plan(&plan, &store).await?;

        let lock_path = self.plan.lock_path();

        if self.check {
            if !lock_path.exists() {
                eprintln!("No lock file found at {:?}", lock_path);
                return Ok(2);
            }

            let lock = stackup::LockFile::load(&lock_path)?;
            let changes = stackup::verify_lock(&lock, &image);

            if !changes.is_empty() {
                eprintln!("Lock file is out of date:");
                for change in &changes {
                    eprintln!("  - {:?}: {}", change.kind, change.reference);
                    if let (Some(exp), Some(act)) = (&change.expected, &change.actual) {
                        eprintln!("    Expected: {}", exp);
                        eprintln!("    Actual:   {}", act);
                    }
                }
                return Ok(1);
            }

            println!("Lock file is up to date");
            return Ok(0);
        }

        if lock_path.exists() && !self.update && !self.force {
            return Err(miette::miette!(
                "Lock file already exists at {:?}. Use --update or --force",
                lock_path
            ));
        }

        if self.update && !self.force && lock_path.exists() {
            let existing = stackup::LockFile::load(&lock_path)?;
            if stackup::verify_lock(&existing, &image).is_empty() {
                println!("Lock file is already up to date: {:?}", lock_path);
                return Ok(0);
            }
        }

        let lock = stackup::generate_lock(&image);
        lock.save(&lock_path)?;
        println!("Generated lock file: {:?}", lock_path);

        Ok(0)
    }
}
