//! Coordinator state machine
//!
//! The coordinator is responsible for:
//! - Server membership and the placement permutation
//! - Spaces, their regions, and replica placement (replica sets)
//! - Converging regions toward their desired replicas through transfers
//! - Publishing versioned configurations and tracking acknowledgements
//! - Checkpoints and their garbage collection

/// Log a broken internal invariant without aborting the command.
macro_rules! invariant_broken {
    ($($arg:tt)*) => {
        tracing::error!(target: "shardcoord::invariant", $($arg)*)
    };
}

pub mod barrier;
pub mod command;
pub mod configuration;
pub mod context;
pub mod convergence;
pub mod intent;
pub mod membership;
pub mod placement;
pub mod server;
pub mod snapshot;
pub mod space;
pub mod topology;
pub mod transfer;

pub use command::{Command, Response};
pub use configuration::Configuration;
pub use context::StateMachineContext;
pub use convergence::ConvergeStep;
pub use server::Coordinator;
pub use snapshot::{load_snapshot, save_snapshot};
pub use space::{Space, SpaceBuilder, SpaceDefinition};
