//! Transfer ledger
//!
//! In-flight single-replica migrations. A transfer copies a region from its
//! most recent replica (`src`) to a new assignment (`dst`); at most one
//! transfer exists per region. Ids are allocated monotonically, so the
//! ledger's order is creation order.

use crate::common::{IdAllocator, RegionId, ServerId, TransferId, VirtualServerId};
use crate::coordinator::space::Region;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub region: RegionId,
    pub src: ServerId,
    pub vsrc: VirtualServerId,
    pub dst: ServerId,
    pub vdst: VirtualServerId,
}

impl std::fmt::Display for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id={} rid={} src={} vsrc={} dst={} vdst={}",
            self.id.get(),
            self.region.get(),
            self.src.get(),
            self.vsrc.get(),
            self.dst.get(),
            self.vdst.get()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLedger {
    transfers: Vec<Transfer>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transfer of `region` to `dst`, sourced from the region's last
    /// replica. Returns `None` if the region has no replica to copy from.
    pub fn start(
        &mut self,
        region: &Region,
        dst: ServerId,
        ids: &mut IdAllocator,
    ) -> Option<Transfer> {
        let src = region.replicas.last()?;
        let id: TransferId = ids.allocate();
        let vdst: VirtualServerId = ids.allocate();
        let xfer = Transfer {
            id,
            region: region.id,
            src: src.server,
            vsrc: src.virtual_server,
            dst,
            vdst,
        };
        self.transfers.push(xfer);
        Some(xfer)
    }

    pub fn get(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.iter().find(|x| x.id == id)
    }

    /// The transfer in flight for a region, if any
    pub fn for_region(&self, region: RegionId) -> Option<&Transfer> {
        self.transfers.iter().find(|x| x.region == region)
    }

    pub fn remove(&mut self, id: TransferId) -> Option<Transfer> {
        let idx = self.transfers.iter().position(|x| x.id == id)?;
        Some(self.transfers.remove(idx))
    }

    /// Drop every transfer whose region matches `pred`
    pub fn remove_regions<F: Fn(RegionId) -> bool>(&mut self, pred: F) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|x| !pred(x.region));
        before - self.transfers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter()
    }

    pub fn as_slice(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
