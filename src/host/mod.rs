//! Local single-node host
//!
//! Runs the coordinator in-process for development, tests and replaying
//! command logs. It does not replicate anything.

pub mod handle;
pub mod local;

pub use handle::CoordinatorHandle;
pub use local::{ConditionWatcher, LocalHost};
