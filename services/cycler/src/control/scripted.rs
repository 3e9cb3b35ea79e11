//! Backend delegating to an external automation driver.
//!
//! The driver is any program that understands four subcommands:
//!
//! ```text
//! <driver> query <i>           prints the same status object as the manager
//! <driver> start <i>
//! <driver> stop <i>
//! <driver> rename <i> <name>
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use vmcycle_events::WorkerState;

use super::manager::run;
use super::{parse_status, WorkerAction, WorkerControl};
use crate::error::ControlError;

/// Automation driver program.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    program: PathBuf,
}

impl ScriptedDriver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl WorkerControl for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn query(&self, index: u32) -> Result<WorkerState, ControlError> {
        let index_arg = index.to_string();
        let stdout = run(&self.program, ["query", index_arg.as_str()]).await?;
        parse_status(&stdout, index)
    }

    async fn control(&self, index: u32, action: WorkerAction) -> Result<(), ControlError> {
        let index_arg = index.to_string();
        let verb = action.to_string();
        run(&self.program, [verb.as_str(), index_arg.as_str()]).await?;
        Ok(())
    }

    async fn rename(&self, index: u32, name: &str) -> Result<(), ControlError> {
        let index_arg = index.to_string();
        run(&self.program, ["rename", index_arg.as_str(), name]).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_driver(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("driver.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_query_parses_driver_output() {
        let dir = tempfile::tempdir().unwrap();
        let driver = write_driver(
            &dir,
            r#"echo "{\"error_code\":0,\"index\":$2,\"name\":\"bot-$2\",\"is_process_started\":true}""#,
        );

        let state = ScriptedDriver::new(driver).query(4).await.unwrap();
        assert_eq!(state.index, 4);
        assert_eq!(state.display_name, "bot-4");
        assert!(state.process_running);
        assert!(!state.app_ready);
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let driver = write_driver(&dir, "echo 'window not found' >&2\nexit 3");

        let err = ScriptedDriver::new(driver)
            .control(2, WorkerAction::Stop)
            .await
            .unwrap_err();
        match err {
            ControlError::CommandFailed { stderr, .. } => assert_eq!(stderr, "window not found"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
