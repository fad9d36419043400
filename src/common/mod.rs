//! Common utilities and types shared across shardcoord

pub mod config;
pub mod error;
pub mod ids;
pub mod utils;

pub use config::CoordinatorConfig;
pub use error::{Error, Result, ReturnCode};
pub use ids::{IdAllocator, RegionId, ServerId, SpaceId, SubspaceId, TransferId, VirtualServerId};
pub use utils::{crc32, remove_all, ServerState};
