//! Topology store
//!
//! Owns every space, its subspaces and regions, and the queue of spaces
//! whose first layout waits for a non-empty permutation.

use crate::common::{Error, IdAllocator, RegionId, Result, ServerId, SpaceId};
use crate::coordinator::space::{Region, Space};
use crate::coordinator::transfer::TransferLedger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    spaces: BTreeMap<String, Space>,
    deferred_init: Vec<SpaceId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a space, assigning fresh ids to the space, its
    /// subspaces and its regions. Any replicas in the definition are dropped.
    pub fn add(&mut self, mut space: Space, ids: &mut IdAllocator) -> Result<SpaceId> {
        if let Err(e) = space.validate() {
            return Err(Error::Malformed(format!(
                "space \"{}\" does not validate: {}",
                space.name, e
            )));
        }

        if self.spaces.contains_key(&space.name) {
            return Err(Error::Duplicate(format!(
                "there is already a space named \"{}\"",
                space.name
            )));
        }

        space.id = ids.allocate();

        for ss in space.subspaces.iter_mut() {
            ss.id = ids.allocate();

            for region in ss.regions.iter_mut() {
                region.id = ids.allocate();
                region.replicas.clear();
            }
        }

        let id = space.id;
        self.spaces.insert(space.name.clone(), space);
        Ok(id)
    }

    /// Remove a space by name, also dropping it from the deferred queue.
    pub fn remove(&mut self, name: &str) -> Result<Space> {
        let space = self
            .spaces
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("there is no space named \"{}\"", name)))?;
        self.deferred_init.retain(|id| *id != space.id);
        Ok(space)
    }

    pub fn get(&self, name: &str) -> Option<&Space> {
        self.spaces.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Space> {
        self.spaces.get_mut(name)
    }

    /// Spaces in name order
    pub fn spaces(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// Space names ordered by `(fault_tolerance, predecessor_width)`, ties
    /// broken by name.
    pub fn names_by_policy(&self) -> Vec<String> {
        let mut spaces: Vec<&Space> = self.spaces.values().collect();
        spaces.sort_by_key(|s| (s.fault_tolerance, s.predecessor_width));
        spaces.into_iter().map(|s| s.name.clone()).collect()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.spaces
            .values()
            .flat_map(|s| s.regions())
            .find(|r| r.id == id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.spaces.values_mut().find_map(|s| s.region_mut(id))
    }

    pub fn defer(&mut self, id: SpaceId) {
        if !self.deferred_init.contains(&id) {
            self.deferred_init.push(id);
        }
    }

    /// Take a space off the deferred queue; true if it was queued.
    pub fn take_deferred(&mut self, id: SpaceId) -> bool {
        let before = self.deferred_init.len();
        self.deferred_init.retain(|d| *d != id);
        before != self.deferred_init.len()
    }

    pub fn deferred(&self) -> &[SpaceId] {
        &self.deferred_init
    }

    /// Every server referenced by a replica or an in-flight transfer,
    /// sorted and deduplicated.
    pub fn servers_in_configuration(&self, transfers: &TransferLedger) -> Vec<ServerId> {
        let mut sids: Vec<ServerId> = self
            .spaces
            .values()
            .flat_map(|s| s.regions())
            .flat_map(|r| r.replicas.iter().map(|rep| rep.server))
            .chain(transfers.iter().flat_map(|x| [x.src, x.dst]))
            .collect();
        sids.sort();
        sids.dedup();
        sids
    }
}
