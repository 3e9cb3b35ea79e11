//! One-shot worker status listing.

use anyhow::Result;
use tabled::Tabled;
use vmcycle_cycler::poller::poll_workers;
use vmcycle_events::WorkerState;

use crate::output::{print_info, print_output, OutputFormat};

use super::CommandContext;

#[derive(Debug, Tabled)]
struct WorkerRow {
    #[tabled(rename = "Index")]
    index: u32,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Role")]
    role: &'static str,

    #[tabled(rename = "Status")]
    status: &'static str,

    #[tabled(rename = "Error")]
    error: String,
}

impl From<&WorkerState> for WorkerRow {
    fn from(w: &WorkerState) -> Self {
        Self {
            index: w.index,
            name: w.display_name.clone(),
            role: if w.is_primary { "primary" } else { "secondary" },
            status: w.status_label(),
            error: w.error_message.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn run(ctx: CommandContext) -> Result<()> {
    let snapshot = poll_workers(&ctx.control, &ctx.config.poller).await;
    let rows: Vec<WorkerRow> = snapshot.workers.iter().map(WorkerRow::from).collect();

    print_output(&rows, &snapshot, ctx.format);
    if matches!(ctx.format, OutputFormat::Table) && !snapshot.is_empty() {
        print_info(&format!(
            "{} of {} workers running ({} secondaries)",
            snapshot.running_count(),
            snapshot.len(),
            snapshot.secondary_indices().len()
        ));
    }
    Ok(())
}
