//! vmcycle cycler
//!
//! Keeps a pool of emulator instances healthy on a modest host by running
//! only a few at a time: every interval it stops the running batch, starts
//! the next `batch_size` instances in rotation order and checks they came up.
//!
//! ## Architecture
//!
//! ```text
//!   SchedulerHandle ──commands──▶ CyclingScheduler ──events──▶ EventReceiver
//!   (start/stop/...)              │  (decision loop)           (observer)
//!                                 │
//!                    StatePoller ─┤─ Controller
//!                                 │
//!                          dyn WorkerControl
//!                  (ManagerCli | ScriptedDriver | MockControl)
//! ```
//!
//! - **Scheduler**: owns the cycling state; the only task that starts or
//!   stops workers
//! - **Poller**: fans out one status query per slot and joins the results
//! - **Controller**: applies start/stop one worker at a time with timeouts
//! - **Mailbox**: bounded command and event channels; events carry an epoch
//!   so observers never see progress from before a reset

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod observer;
pub mod poller;
pub mod provision;
pub mod scheduler;
pub mod settings;

pub use config::{BackendKind, Config};
pub use control::{WorkerAction, WorkerControl};
pub use error::{ControlError, SchedulerError};
pub use mailbox::{EventReceiver, SchedulerHandle};
pub use observer::{run_console_observer, ObservedState, ObservedView};
pub use scheduler::{spawn_scheduler, SchedulerConfig};
