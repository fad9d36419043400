//! Interface the hosting framework provides to the state machine
//!
//! The host delivers commands one at a time in the same order on every
//! replica. Besides that it offers named monotonic conditions that external
//! waiters block on, and a recurring alarm. Diagnostics go through `tracing`.

use std::time::Duration;

/// Bumped on every new configuration version
pub const CONDITION_CONFIG: &str = "config";
/// Configuration versions acknowledged by every server
pub const CONDITION_ACK: &str = "ack";
/// Configuration versions stable on every server
pub const CONDITION_STABLE: &str = "stable";
/// Latest checkpoint established
pub const CONDITION_CHECKPOINT: &str = "checkp";
/// Latest checkpoint stable on every server
pub const CONDITION_CHECKPOINT_STABLE: &str = "checkps";
/// Checkpoints at or below this value may be garbage collected
pub const CONDITION_CHECKPOINT_GC: &str = "checkpgc";

/// Every condition the coordinator broadcasts on
pub const CONDITIONS: [&str; 6] = [
    CONDITION_CONFIG,
    CONDITION_ACK,
    CONDITION_STABLE,
    CONDITION_CHECKPOINT,
    CONDITION_CHECKPOINT_STABLE,
    CONDITION_CHECKPOINT_GC,
];

/// Command the alarm delivers
pub const ALARM_COMMAND: &str = "alarm";

pub trait StateMachineContext {
    /// Increment the named condition, wake its waiters, and return the new
    /// value.
    fn condition_broadcast(&mut self, condition: &str) -> u64;

    /// Deliver `command` once after `interval`.
    fn schedule_alarm(&mut self, command: &str, interval: Duration);
}
