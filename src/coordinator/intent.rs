//! Region intents
//!
//! The desired replica order for regions that have not yet converged.
//! Kept sorted by region id so every replica walks them in the same order.

use crate::common::{RegionId, ServerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionIntent {
    pub region: RegionId,
    /// Desired servers, in order
    pub replicas: Vec<ServerId>,
    /// Checkpoint that was current when the region first held exactly the
    /// desired set of servers; zero until then. Reordering waits until this
    /// checkpoint is stable.
    pub checkpoint: u64,
}

impl RegionIntent {
    pub fn wants(&self, server: ServerId) -> bool {
        self.replicas.contains(&server)
    }
}

impl std::fmt::Display for RegionIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let replicas: Vec<String> = self.replicas.iter().map(|s| s.get().to_string()).collect();
        write!(
            f,
            "region={}, checkpoint={} replicas=[{}]",
            self.region.get(),
            self.checkpoint,
            replicas.join(", ")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intents {
    intents: Vec<RegionIntent>,
}

impl Intents {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, region: RegionId) -> std::result::Result<usize, usize> {
        self.intents.binary_search_by_key(&region, |i| i.region)
    }

    pub fn get(&self, region: RegionId) -> Option<&RegionIntent> {
        self.position(region).ok().map(|idx| &self.intents[idx])
    }

    pub fn get_mut(&mut self, region: RegionId) -> Option<&mut RegionIntent> {
        match self.position(region) {
            Ok(idx) => Some(&mut self.intents[idx]),
            Err(_) => None,
        }
    }

    /// Record the desired servers for a region, replacing any prior intent.
    /// A changed target forgets the old checkpoint stamp.
    pub fn set(&mut self, region: RegionId, replicas: &[ServerId]) -> &mut RegionIntent {
        match self.position(region) {
            Ok(idx) => {
                let intent = &mut self.intents[idx];
                if intent.replicas != replicas {
                    intent.replicas = replicas.to_vec();
                    intent.checkpoint = 0;
                }
                intent
            }
            Err(idx) => {
                self.intents.insert(
                    idx,
                    RegionIntent {
                        region,
                        replicas: replicas.to_vec(),
                        checkpoint: 0,
                    },
                );
                &mut self.intents[idx]
            }
        }
    }

    pub fn remove(&mut self, region: RegionId) -> Option<RegionIntent> {
        self.position(region)
            .ok()
            .map(|idx| self.intents.remove(idx))
    }

    /// Drop every intent whose region matches `pred`
    pub fn remove_regions<F: Fn(RegionId) -> bool>(&mut self, pred: F) -> usize {
        let before = self.intents.len();
        self.intents.retain(|i| !pred(i.region));
        before - self.intents.len()
    }

    /// Regions not yet stamped or stamped at or below `stable_through`
    pub fn stamped_through(&self, stable_through: u64) -> Vec<RegionId> {
        self.intents
            .iter()
            .filter(|i| i.checkpoint <= stable_through)
            .map(|i| i.region)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionIntent> {
        self.intents.iter()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}
