//! Backend driving the worker manager's command-line tool.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use vmcycle_events::WorkerState;

use super::{parse_status, WorkerAction, WorkerControl};
use crate::error::ControlError;

/// Worker manager CLI.
///
/// - `info -v <i>` prints a status object
/// - `control -v <i> launch|shutdown`
/// - `rename -v <i> <name>`
#[derive(Debug, Clone)]
pub struct ManagerCli {
    program: PathBuf,
}

impl ManagerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl WorkerControl for ManagerCli {
    fn name(&self) -> &'static str {
        "manager"
    }

    async fn query(&self, index: u32) -> Result<WorkerState, ControlError> {
        let index_arg = index.to_string();
        let stdout = run(&self.program, ["info", "-v", index_arg.as_str()]).await?;
        parse_status(&stdout, index)
    }

    async fn control(&self, index: u32, action: WorkerAction) -> Result<(), ControlError> {
        let verb = match action {
            WorkerAction::Start => "launch",
            WorkerAction::Stop => "shutdown",
        };
        let index_arg = index.to_string();
        run(&self.program, ["control", "-v", index_arg.as_str(), verb]).await?;
        Ok(())
    }

    async fn rename(&self, index: u32, name: &str) -> Result<(), ControlError> {
        let index_arg = index.to_string();
        run(&self.program, ["rename", "-v", index_arg.as_str(), name]).await?;
        Ok(())
    }
}

/// Run `program` to completion and return its stdout.
///
/// The child is killed if the returned future is dropped, so an enclosing
/// timeout does not leave processes behind.
pub(super) async fn run<I, S>(program: &Path, args: I) -> Result<Vec<u8>, ControlError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program.display(), "Running control command");

    let output = command.output().await.map_err(|source| ControlError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(ControlError::CommandFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
