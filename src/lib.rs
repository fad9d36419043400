//! # shardcoord
//!
//! The membership and placement engine of a sharded, replicated key-value
//! store's coordinator:
//! - Server registry with lifecycle states, a placement permutation and spares
//! - Spaces partitioned into regions, each replicated on an ordered chain
//! - Deterministic replica-set generation from the permutation
//! - Convergence toward desired replicas one transfer at a time
//! - Versioned configurations with acknowledgement and stability barriers
//! - Checkpoints gating replica reordering, with garbage collection
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │   Hosting framework (replicated log)       │
//! │   - delivers commands in one total order   │
//! │   - conditions, alarm, snapshots           │
//! └───────────┬────────────────────────────────┘
//!             │ Coordinator::apply(ctx, Command)
//! ┌───────────▼────────────────────────────────┐
//! │  Coordinator state machine                 │
//! │   membership → replica sets → intents      │
//! │   → transfers → configuration version N    │
//! └───────────┬────────────────────────────────┘
//!             │ config blob (bincode)
//!   ┌─────────┴──────────┬──────────────┐
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼──────────┐
//! │ Server 1   │   │ Server 2   │   │ Server 3     │
//! │ ack/stable │   │ ack/stable │   │ ack/stable   │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Replay a command log
//! ```bash
//! shardcoord replay --commands ./commands.jsonl --snapshot-out ./coord.snap
//! ```
//!
//! ### Inspect a snapshot
//! ```bash
//! shardcoord inspect --snapshot ./coord.snap
//! ```

pub mod common;
pub mod coordinator;
pub mod host;

// Re-export commonly used types
pub use common::{CoordinatorConfig, Error, Result, ReturnCode};
pub use coordinator::{Command, Coordinator, Response, StateMachineContext};
pub use host::{CoordinatorHandle, LocalHost};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
