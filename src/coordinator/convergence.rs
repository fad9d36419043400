//! Intent and convergence engine
//!
//! Rebalancing computes the desired replica set of every region from the
//! permutation and records it as an intent. Convergence then moves each
//! region toward its intent one replica at a time:
//!
//! 1. A transfer in flight to a server the intent still wants is left alone;
//!    one to an unwanted server is cancelled.
//! 2. Replicas the intent doesn't want are removed, one per step.
//! 3. A wanted server missing from the region is added by a transfer from
//!    the region's last replica.
//! 4. Once the region holds exactly the wanted servers, the intent is
//!    stamped with the current checkpoint and parked until that checkpoint
//!    is stable. Before the first checkpoint there is nothing to stamp, so
//!    the intent waits for one.
//! 5. The first misplaced replica is then rolled to the back by removing it
//!    and transferring it back in. With nothing misplaced the intent is
//!    satisfied and deleted.

use crate::common::{RegionId, ServerId, TransferId};
use crate::coordinator::placement::ReplicaSets;
use crate::coordinator::server::Coordinator;
use crate::coordinator::space::Replica;

/// Outcome of one convergence step for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeStep {
    /// The region has no intent
    Idle,
    /// A transfer toward the intent is already in flight
    InFlight(TransferId),
    /// Dropped a replica the intent doesn't want
    Removed(ServerId),
    /// Started a transfer adding a missing server
    Adding(TransferId),
    /// Holding the right servers; waiting for the stamped checkpoint (zero
    /// before the first one) to become stable
    Parked(u64),
    /// Started a transfer rolling a misplaced replica to the back
    Rolling(TransferId),
    /// Region matches its intent, which was deleted
    Satisfied,
    /// Region and intent cannot be reconciled
    Stuck,
}

impl ConvergeStep {
    /// Whether the step altered the region, its transfers or its intent
    pub fn is_progress(self) -> bool {
        matches!(
            self,
            Self::Removed(_) | Self::Adding(_) | Self::Rolling(_) | Self::Satisfied
        )
    }
}

impl Coordinator {
    /// Recompute desired replica sets after a permutation change and record
    /// intents for regions that differ. Spaces waiting for their first
    /// layout get it here instead.
    pub(super) fn rebalance_replica_sets(&mut self) {
        let mut cached: Option<((u64, u64), ReplicaSets)> = None;

        for name in self.topology.names_by_policy() {
            let Some(space) = self.topology.get(&name) else {
                continue;
            };
            let (id, policy) = (space.id, (space.replication(), space.predecessor_width));

            if self.topology.take_deferred(id) {
                self.initial_space_layout(&name);
                continue;
            }

            if cached.as_ref().map(|(p, _)| *p) != Some(policy) {
                let sets = ReplicaSets::compute(policy.0, policy.1, self.membership.permutation());
                cached = Some((policy, sets));
            }

            if let Some((_, sets)) = &cached {
                self.setup_intents(&name, sets);
            }
        }
    }

    /// Assign replicas to a freshly added space directly, or queue it until
    /// the permutation is non-empty.
    pub(super) fn initial_space_layout(&mut self, name: &str) {
        let Some(space) = self.topology.get(name) else {
            return;
        };

        if self.membership.permutation().is_empty() {
            tracing::info!("deferring layout of space \"{}\" until servers are available", name);
            self.topology.defer(space.id);
            return;
        }

        let sets = ReplicaSets::compute(
            space.replication(),
            space.predecessor_width,
            self.membership.permutation(),
        );

        if sets.is_empty() {
            return;
        }

        let Self { topology, ids, .. } = self;
        let Some(space) = topology.get_mut(name) else {
            return;
        };

        for ss in space.subspaces.iter_mut() {
            let n = ss.regions.len();
            for (idx, region) in ss.regions.iter_mut().enumerate() {
                let Some(set) = sets.for_region(idx, n) else {
                    continue;
                };
                region.replicas = set
                    .iter()
                    .map(|&sid| Replica::new(sid, ids.allocate()))
                    .collect();
            }
        }

        tracing::info!("laid out space \"{}\" over {} replica sets", name, sets.len());
    }

    fn setup_intents(&mut self, name: &str, sets: &ReplicaSets) {
        if sets.is_empty() {
            return;
        }

        let mut pending = Vec::new();
        {
            let Self {
                topology, intents, ..
            } = &mut *self;
            let Some(space) = topology.get(name) else {
                return;
            };

            for ss in &space.subspaces {
                let n = ss.regions.len();
                for (idx, region) in ss.regions.iter().enumerate() {
                    let Some(set) = sets.for_region(idx, n) else {
                        continue;
                    };

                    let matches = region.replicas.len() == set.len()
                        && region.replicas.iter().zip(set).all(|(r, s)| r.server == *s);

                    if matches && intents.get(region.id).is_none() {
                        continue;
                    }

                    intents.set(region.id, set);
                    pending.push(region.id);
                }
            }
        }

        for rid in pending {
            self.drive_intent(rid);
        }
    }

    /// Step a region until it stops shedding replicas. Each step changes
    /// the region by at most one replica; only removals can be repeated
    /// within one command since additions wait on a transfer.
    ///
    /// Returns whether the region or its transfers changed. Stamping a
    /// parked intent does not count.
    pub(super) fn drive_intent(&mut self, rid: RegionId) -> bool {
        let in_flight = self.transfers.len();
        let mut changed = false;
        loop {
            match self.converge_intent(rid) {
                ConvergeStep::Removed(_) => changed = true,
                step => {
                    // A cancelled transfer can precede any final step
                    return changed
                        || step.is_progress()
                        || self.transfers.len() != in_flight;
                }
            }
        }
    }

    /// Take one convergence step for `rid`.
    pub fn converge_intent(&mut self, rid: RegionId) -> ConvergeStep {
        let Self {
            topology,
            intents,
            transfers,
            ids,
            checkpoint,
            checkpoint_stable_through,
            ..
        } = self;

        let Some(intent) = intents.get_mut(rid) else {
            return ConvergeStep::Idle;
        };

        let Some(region) = topology.region_mut(rid) else {
            invariant_broken!("intent {} refers to a nonexistent region", intent);
            return ConvergeStep::Stuck;
        };

        if let Some(xfer) = transfers.for_region(rid).copied() {
            if intent.wants(xfer.dst) {
                return ConvergeStep::InFlight(xfer.id);
            }
            transfers.remove(xfer.id);
            tracing::info!("cancelling {} because its destination is no longer wanted", xfer);
        }

        if region.replicas.len() > intent.replicas.len() {
            let Some(idx) = region
                .replicas
                .iter()
                .position(|r| !intent.wants(r.server))
            else {
                invariant_broken!(
                    "{} holds {} wanted replicas but {} wants {}",
                    rid,
                    region.replicas.len(),
                    intent,
                    intent.replicas.len()
                );
                return ConvergeStep::Stuck;
            };

            let removed = region.replicas.remove(idx);
            tracing::info!(
                "removing {} from {} to make progress toward desired state",
                removed.server,
                rid
            );
            return ConvergeStep::Removed(removed.server);
        }

        if let Some(&missing) = intent.replicas.iter().find(|s| !region.has_server(**s)) {
            let Some(xfer) = transfers.start(region, missing, ids) else {
                invariant_broken!(
                    "cannot add {} to {} because it has no replica to copy from",
                    missing,
                    rid
                );
                return ConvergeStep::Stuck;
            };
            tracing::info!("adding {} to {} using transfer {}", missing, rid, xfer);
            return ConvergeStep::Adding(xfer.id);
        }

        if intent.checkpoint == 0 {
            intent.checkpoint = *checkpoint;
        }
        if intent.checkpoint == 0 || intent.checkpoint > *checkpoint_stable_through {
            return ConvergeStep::Parked(intent.checkpoint);
        }

        for (idx, &want) in intent.replicas.iter().enumerate() {
            if region.replicas[idx].server == want {
                continue;
            }

            let rolled = region.replicas.remove(idx);
            let Some(xfer) = transfers.start(region, rolled.server, ids) else {
                region.replicas.insert(idx, rolled);
                invariant_broken!("cannot roll {} to the back of {}", rolled.server, rid);
                return ConvergeStep::Stuck;
            };
            tracing::info!(
                "rolling {} to the back of {} using transfer {}",
                rolled.server,
                rid,
                xfer
            );
            return ConvergeStep::Rolling(xfer.id);
        }

        intents.remove(rid);
        tracing::info!("{} converged to its desired state", rid);
        ConvergeStep::Satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ServerState;
    use crate::coordinator::space::{DataType, Space};
    use crate::host::LocalHost;
    use std::net::SocketAddr;

    fn online(coord: &mut Coordinator, host: &mut LocalHost, id: u64) {
        let addr = SocketAddr::from(([127, 0, 0, 1], 3000 + id as u16));
        coord.server_register(host, ServerId(id), addr).unwrap();
        coord.server_online(host, ServerId(id), None).unwrap();
    }

    fn one_region(f: u64) -> Space {
        Space::builder("kv")
            .attribute("k", DataType::String)
            .fault_tolerance(f)
            .partitions(1)
            .build()
            .unwrap()
    }

    fn region_servers(coord: &Coordinator) -> Vec<u64> {
        let space = coord.topology().get("kv").unwrap();
        let region = space.regions().next().unwrap();
        region.replicas.iter().map(|r| r.server.get()).collect()
    }

    fn region_id(coord: &Coordinator) -> RegionId {
        coord.topology().get("kv").unwrap().regions().next().unwrap().id
    }

    fn stabilize_checkpoint(coord: &mut Coordinator, host: &mut LocalHost) {
        coord.checkpoint(host).unwrap();
        let (v, n) = (coord.version(), coord.current_checkpoint());
        let roster = coord.topology().servers_in_configuration(coord.transfers());
        for sid in roster {
            coord.checkpoint_stable(host, sid, v, n).unwrap();
        }
    }

    #[test]
    fn test_no_intent_is_idle() {
        let mut coord = Coordinator::default();
        assert_eq!(coord.converge_intent(RegionId(1)), ConvergeStep::Idle);
    }

    #[test]
    fn test_adds_missing_server_by_transfer() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(1)).unwrap();
        assert_eq!(region_servers(&coord), vec![1]);

        online(&mut coord, &mut host, 2);
        assert_eq!(coord.transfers().len(), 1);
        let xfer = *coord.transfers().iter().next().unwrap();
        assert_eq!((xfer.src, xfer.dst), (ServerId(1), ServerId(2)));

        // Stepping again waits on the same transfer
        let rid = region_id(&coord);
        assert_eq!(coord.converge_intent(rid), ConvergeStep::InFlight(xfer.id));
        assert_eq!(coord.transfers().len(), 1);

        let v = coord.version();
        coord.transfer_go_live(&mut host, v, xfer.id).unwrap();
        assert_eq!(region_servers(&coord), vec![1, 2]);

        let v = coord.version();
        coord.transfer_complete(&mut host, v, xfer.id).unwrap();
        assert!(coord.transfers().is_empty());
        assert_eq!(region_servers(&coord), vec![1, 2]);

        // The intent lingers until a checkpoint is stable
        assert!(coord.intents().get(rid).is_some());
        stabilize_checkpoint(&mut coord, &mut host);
        assert!(coord.intents().is_empty());
    }

    #[test]
    fn test_removes_departed_server() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        for id in 1..=3 {
            online(&mut coord, &mut host, id);
        }
        coord.space_add(&mut host, one_region(1)).unwrap();
        let before = region_servers(&coord);
        assert_eq!(before.len(), 2);

        let gone = before[0];
        coord.server_offline(&mut host, ServerId(gone)).unwrap();
        assert_eq!(
            coord.membership().get(ServerId(gone)).unwrap().state,
            ServerState::NotAvailable
        );

        // The departed replica stays until its replacement is live
        assert_eq!(region_servers(&coord), before);
        let xfer = *coord.transfers().iter().next().unwrap();
        assert_eq!(xfer.src.get(), before[1]);
        assert!(!before.contains(&xfer.dst.get()));

        let v = coord.version();
        coord.transfer_go_live(&mut host, v, xfer.id).unwrap();
        assert_eq!(region_servers(&coord).len(), 3);

        let v = coord.version();
        coord.transfer_complete(&mut host, v, xfer.id).unwrap();
        let after = region_servers(&coord);
        assert_eq!(after, vec![before[1], xfer.dst.get()]);
    }

    #[test]
    fn test_unwanted_transfer_is_cancelled() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(1)).unwrap();
        online(&mut coord, &mut host, 2);
        let xfer = *coord.transfers().iter().next().unwrap();

        // The destination leaves before the transfer goes live
        coord.server_offline(&mut host, ServerId(2)).unwrap();
        assert!(coord.transfers().get(xfer.id).is_none());
        assert_eq!(region_servers(&coord), vec![1]);

        let rid = region_id(&coord);
        let intent = coord.intents().get(rid).unwrap();
        assert_eq!(intent.replicas, vec![ServerId(1)]);
    }

    #[test]
    fn test_rolls_misplaced_replica_after_checkpoint() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(1)).unwrap();
        online(&mut coord, &mut host, 2);
        let rid = region_id(&coord);

        // Force an intent whose order differs from the region
        let xfer = *coord.transfers().iter().next().unwrap();
        let v = coord.version();
        coord.transfer_go_live(&mut host, v, xfer.id).unwrap();
        let v = coord.version();
        coord.transfer_complete(&mut host, v, xfer.id).unwrap();
        coord.intents.set(rid, &[ServerId(2), ServerId(1)]);

        // Nothing to stamp before the first checkpoint
        assert_eq!(coord.converge_intent(rid), ConvergeStep::Parked(0));

        coord.checkpoint(&mut host).unwrap();
        assert_eq!(coord.checkpoint_stable_through(), 0);
        assert_eq!(coord.converge_intent(rid), ConvergeStep::Parked(1));
        assert_eq!(coord.converge_intent(rid), ConvergeStep::Parked(1));

        coord.checkpoint_stable_through = 1;
        let step = coord.converge_intent(rid);
        let ConvergeStep::Rolling(xid) = step else {
            panic!("expected a roll, got {:?}", step);
        };
        assert_eq!(region_servers(&coord), vec![2]);
        let roll = *coord.transfers().get(xid).unwrap();
        assert_eq!((roll.src, roll.dst), (ServerId(2), ServerId(1)));
    }

    #[test]
    fn test_empty_permutation_changes_nothing() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(0)).unwrap();

        let v = coord.version();
        coord.server_offline(&mut host, ServerId(1)).unwrap();
        assert_eq!(coord.version(), v + 1);
        assert_eq!(region_servers(&coord), vec![1]);
        assert!(coord.transfers().is_empty());
        assert!(coord.intents().is_empty());
    }

    #[test]
    fn test_deferred_space_laid_out_on_first_server() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        coord.space_add(&mut host, one_region(0)).unwrap();
        assert_eq!(coord.topology().deferred().len(), 1);
        assert!(region_servers(&coord).is_empty());

        online(&mut coord, &mut host, 4);
        assert!(coord.topology().deferred().is_empty());
        assert_eq!(region_servers(&coord), vec![4]);
        assert!(coord.intents().is_empty());
    }

    #[test]
    fn test_each_step_changes_at_most_one_replica() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        for id in 1..=3 {
            online(&mut coord, &mut host, id);
        }
        coord.space_add(&mut host, one_region(2)).unwrap();
        assert_eq!(region_servers(&coord), vec![1, 2, 3]);

        let rid = region_id(&coord);
        coord.intents.set(rid, &[ServerId(3)]);

        let mut steps = Vec::new();
        let mut before = region_servers(&coord);
        loop {
            let step = coord.converge_intent(rid);
            let after = region_servers(&coord);
            assert!(before.len().abs_diff(after.len()) <= 1, "{:?}", step);
            before = after;
            steps.push(step);
            if !matches!(step, ConvergeStep::Removed(_)) {
                break;
            }
        }

        assert_eq!(
            steps,
            vec![
                ConvergeStep::Removed(ServerId(1)),
                ConvergeStep::Removed(ServerId(2)),
                ConvergeStep::Parked(0),
            ]
        );

        coord.intents.set(rid, &[ServerId(3), ServerId(1)]);
        let ConvergeStep::Adding(xid) = coord.converge_intent(rid) else {
            panic!("expected a transfer");
        };
        assert_eq!(region_servers(&coord), vec![3]);
        assert_eq!(coord.converge_intent(rid), ConvergeStep::InFlight(xid));
        assert_eq!(coord.transfers().len(), 1);
    }

    #[test]
    fn test_stable_checkpoint_without_progress_keeps_version() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(1)).unwrap();
        online(&mut coord, &mut host, 2);
        let xfer = *coord.transfers().iter().next().unwrap();

        // The unstamped intent is revisited but only waits on its transfer
        let v = coord.version();
        stabilize_checkpoint(&mut coord, &mut host);
        assert_eq!(coord.checkpoint_stable_through(), 1);
        assert_eq!(coord.version(), v);
        assert_eq!(host.condition(crate::coordinator::context::CONDITION_CONFIG), v);
        assert_eq!(coord.transfers().len(), 1);
        assert!(coord.transfers().get(xfer.id).is_some());
    }

    #[test]
    fn test_stamping_alone_issues_no_configuration() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        online(&mut coord, &mut host, 1);
        coord.space_add(&mut host, one_region(1)).unwrap();
        online(&mut coord, &mut host, 2);
        let rid = region_id(&coord);

        let xfer = *coord.transfers().iter().next().unwrap();
        let v = coord.version();
        coord.transfer_go_live(&mut host, v, xfer.id).unwrap();
        let v = coord.version();
        coord.transfer_complete(&mut host, v, xfer.id).unwrap();
        assert_eq!(coord.intents().get(rid).unwrap().checkpoint, 0);

        // Checkpoint 1 stabilizes while checkpoint 2 is outstanding
        coord.checkpoint(&mut host).unwrap();
        coord.checkpoint(&mut host).unwrap();
        let v = coord.version();
        let roster = coord.topology().servers_in_configuration(coord.transfers());
        for sid in roster {
            coord.checkpoint_stable(&mut host, sid, v, 1).unwrap();
        }
        assert_eq!(coord.checkpoint_stable_through(), 1);

        assert_eq!(coord.intents().get(rid).unwrap().checkpoint, 2);
        assert_eq!(coord.version(), v);
        assert_eq!(region_servers(&coord), vec![1, 2]);
    }

    #[test]
    fn test_drive_reports_removals() {
        let mut host = LocalHost::new();
        let mut coord = Coordinator::default();
        coord.initialize(&mut host, 1).unwrap();
        for id in 1..=3 {
            online(&mut coord, &mut host, id);
        }
        coord.space_add(&mut host, one_region(2)).unwrap();
        let rid = region_id(&coord);

        // Shedding ends parked, yet the region changed
        coord.intents.set(rid, &[ServerId(3)]);
        assert!(coord.drive_intent(rid));
        assert_eq!(region_servers(&coord), vec![3]);
        assert_eq!(coord.converge_intent(rid), ConvergeStep::Parked(0));
        assert!(!coord.drive_intent(rid));
    }
}
