//! Strongly typed identifiers
//!
//! Every id except `ServerId` is allocated from the coordinator's single
//! monotonically increasing counter, so ids are unique across entity kinds.
//! Server ids are chosen by the servers themselves at registration.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

define_id!(
    /// Identity of a physical storage server
    ServerId,
    "server"
);
define_id!(
    /// Identity of one assignment of a server to a region
    VirtualServerId,
    "virtual_server"
);
define_id!(SpaceId, "space_id");
define_id!(SubspaceId, "subspace_id");
define_id!(RegionId, "region_id");
define_id!(TransferId, "transfer_id");

/// The single counter every coordinator-assigned id is drawn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id, of whichever kind the caller needs
    pub fn allocate<T: From<u64>>(&mut self) -> T {
        let id = self.next;
        self.next += 1;
        T::from(id)
    }

    /// The id the next allocation will return
    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
