//! One-shot name provisioning.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use vmcycle_cycler::poller::poll_workers;
use vmcycle_cycler::provision::provision_names;

use crate::output::{print_info, print_success, print_warning};

use super::CommandContext;

/// Settle after stopping workers, before renaming.
pub(super) const RENAME_SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Name prefix every secondary worker should carry.
    #[arg(long, default_value = "ROM_")]
    prefix: String,
}

impl ProvisionArgs {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let snapshot = poll_workers(&ctx.control, &ctx.config.poller).await;
        if snapshot.secondary_indices().is_empty() {
            print_warning("No secondary workers found.");
            return Ok(());
        }

        let report =
            provision_names(&ctx.controller(), &snapshot, &self.prefix, RENAME_SETTLE).await;

        for (index, name) in &report.renamed {
            print_info(&format!("Worker {index} renamed to {name}"));
        }
        if report.failed.is_empty() {
            print_success(&format!(
                "{} renamed, {} unchanged",
                report.renamed.len(),
                report.kept.len()
            ));
        } else {
            print_warning(&format!(
                "{} renamed, {} failed: {:?}",
                report.renamed.len(),
                report.failed.len(),
                report.failed
            ));
        }
        Ok(())
    }
}
