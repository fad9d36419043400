//! Published cluster configuration
//!
//! Each version is encoded once, when it is issued, and the bytes are
//! handed verbatim to every server that asks. The encoding is bincode over
//! a fixed field order:
//!
//! ```text
//! cluster | version | servers (by id) | spaces (by name) | transfers (by id)
//! ```

use crate::common::{RegionId, Result, ServerId};
use crate::coordinator::membership::Server;
use crate::coordinator::space::{Region, Space};
use crate::coordinator::transfer::Transfer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Borrowed view serialized by the coordinator; field order must match
/// [`Configuration`].
#[derive(Serialize)]
struct ConfigurationRef<'a> {
    cluster: u64,
    version: u64,
    servers: &'a [Server],
    spaces: Vec<&'a Space>,
    transfers: &'a [Transfer],
}

pub(crate) fn encode<'a>(
    cluster: u64,
    version: u64,
    servers: &'a [Server],
    spaces: impl Iterator<Item = &'a Space>,
    transfers: &'a [Transfer],
) -> Result<Bytes> {
    let view = ConfigurationRef {
        cluster,
        version,
        servers,
        spaces: spaces.collect(),
        transfers,
    };
    Ok(Bytes::from(bincode::serialize(&view)?))
}

/// A decoded configuration, as a storage server sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub cluster: u64,
    pub version: u64,
    pub servers: Vec<Server>,
    pub spaces: Vec<Space>,
    pub transfers: Vec<Transfer>,
}

impl Configuration {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn space(&self, name: &str) -> Option<&Space> {
        self.spaces.iter().find(|s| s.name == name)
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.spaces
            .iter()
            .flat_map(|s| s.regions())
            .find(|r| r.id == id)
    }

    pub fn server(&self, id: ServerId) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }
}
