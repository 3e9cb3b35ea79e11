//! # vmcycle-events
//!
//! Leaf data shared by the cycling scheduler and its observers.
//!
//! ## Design Principles
//!
//! - Snapshots are immutable values, replaced wholesale on every poll
//! - Observers never touch scheduler state; they see copies carried in events
//! - Every event is wrapped in an envelope tagged with a reset epoch
//!
//! ## Message Kinds
//!
//! Commands flow from observers into the scheduler:
//! - `Start`, `Stop`, `SetInterval`, `ResetCursor`
//!
//! Events flow from the scheduler out to observers:
//! - `Progress`, `CycleCompleted`, `Reset`

mod envelope;
mod types;

pub use envelope::*;
pub use types::*;
