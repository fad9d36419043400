//! Coordinator state machine
//!
//! Every command is a method taking the host context. Handlers run to
//! completion one at a time and must be deterministic: the same commands in
//! the same order produce the same state on every replica.

use crate::common::{
    CoordinatorConfig, Error, IdAllocator, Result, ServerId, ServerState, TransferId,
};
use crate::coordinator::barrier::VersionBarrier;
use crate::coordinator::configuration;
use crate::coordinator::context::{
    StateMachineContext, ALARM_COMMAND, CONDITION_ACK, CONDITION_CHECKPOINT,
    CONDITION_CHECKPOINT_GC, CONDITION_CHECKPOINT_STABLE, CONDITION_CONFIG, CONDITION_STABLE,
};
use crate::coordinator::intent::Intents;
use crate::coordinator::membership::Membership;
use crate::coordinator::space::{Replica, Space};
use crate::coordinator::topology::Topology;
use crate::coordinator::transfer::TransferLedger;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::net::SocketAddr;

/// Checkpoints retained behind the stable watermark before they may be
/// garbage collected
pub const OUTSTANDING_CHECKPOINTS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinator {
    pub(super) config: CoordinatorConfig,
    pub(super) cluster: u64,
    pub(super) ids: IdAllocator,
    pub(super) version: u64,
    pub(super) membership: Membership,
    pub(super) topology: Topology,
    pub(super) intents: Intents,
    pub(super) transfers: TransferLedger,
    pub(super) config_ack_through: u64,
    pub(super) config_ack_barrier: VersionBarrier,
    pub(super) config_stable_through: u64,
    pub(super) config_stable_barrier: VersionBarrier,
    pub(super) checkpoint: u64,
    pub(super) checkpoint_stable_through: u64,
    pub(super) checkpoint_gc_through: u64,
    pub(super) checkpoint_stable_barrier: VersionBarrier,
    /// Encoded form of `version`; rebuilt on restore
    #[serde(skip)]
    pub(super) latest_config: Bytes,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let membership = Membership::new(config.desired_spares);
        Self {
            config,
            cluster: 0,
            ids: IdAllocator::new(),
            version: 0,
            membership,
            topology: Topology::new(),
            intents: Intents::new(),
            transfers: TransferLedger::new(),
            config_ack_through: 0,
            config_ack_barrier: VersionBarrier::new(),
            config_stable_through: 0,
            config_stable_barrier: VersionBarrier::new(),
            checkpoint: 0,
            checkpoint_stable_through: 0,
            checkpoint_gc_through: 0,
            checkpoint_stable_barrier: VersionBarrier::new(),
            latest_config: Bytes::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Cluster id; zero until initialized
    pub fn cluster(&self) -> u64 {
        self.cluster
    }

    /// Latest configuration version issued
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn intents(&self) -> &Intents {
        &self.intents
    }

    pub fn transfers(&self) -> &TransferLedger {
        &self.transfers
    }

    pub fn config_ack_through(&self) -> u64 {
        self.config_ack_through
    }

    pub fn config_stable_through(&self) -> u64 {
        self.config_stable_through
    }

    pub fn current_checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn checkpoint_stable_through(&self) -> u64 {
        self.checkpoint_stable_through
    }

    pub fn checkpoint_gc_through(&self) -> u64 {
        self.checkpoint_gc_through
    }

    /// Encoded configuration for the latest version
    pub fn latest_config(&self) -> &Bytes {
        &self.latest_config
    }

    // === Cluster lifecycle ===

    pub fn initialize(&mut self, ctx: &mut dyn StateMachineContext, token: u64) -> Result<()> {
        if self.cluster != 0 {
            tracing::warn!(
                "cannot initialize cluster with id {} because it is already initialized to {}",
                token,
                self.cluster
            );
            return Ok(());
        }

        if token == 0 {
            return Err(Error::Malformed("cluster id must be non-zero".into()));
        }

        tracing::info!("initializing cluster with id {}", token);
        self.cluster = token;
        ctx.schedule_alarm(ALARM_COMMAND, self.config.alarm_interval());
        self.generate_next_configuration(ctx);
        Ok(())
    }

    // === Membership ===

    pub fn server_register(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        bind_to: SocketAddr,
    ) -> Result<()> {
        self.membership
            .register(sid, bind_to)
            .inspect_err(|e| tracing::warn!("cannot register {}: {}", sid, e))?;
        self.generate_next_configuration(ctx);
        Ok(())
    }

    pub fn server_online(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        bind_to: Option<SocketAddr>,
    ) -> Result<()> {
        let change = self
            .membership
            .bring_online(sid, bind_to)
            .inspect_err(|e| tracing::warn!("cannot bring {} online: {}", sid, e))?;

        if change.became_available {
            self.rebalance_replica_sets();
        }

        if change.any() {
            self.generate_next_configuration(ctx);
        }

        Ok(())
    }

    pub fn server_offline(&mut self, ctx: &mut dyn StateMachineContext, sid: ServerId) -> Result<()> {
        self.take_down(ctx, sid, ServerState::NotAvailable)
    }

    pub fn server_shutdown(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
    ) -> Result<()> {
        self.take_down(ctx, sid, ServerState::Shutdown)
    }

    pub fn server_kill(&mut self, ctx: &mut dyn StateMachineContext, sid: ServerId) -> Result<()> {
        self.take_down(ctx, sid, ServerState::Killed)
    }

    fn take_down(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        target: ServerState,
    ) -> Result<()> {
        let changed = self
            .membership
            .take_down(sid, target)
            .inspect_err(|e| tracing::warn!("cannot take {} down: {}", sid, e))?;

        if changed {
            self.rebalance_replica_sets();
            self.generate_next_configuration(ctx);
        }

        Ok(())
    }

    pub fn server_forget(&mut self, ctx: &mut dyn StateMachineContext, sid: ServerId) -> Result<()> {
        self.membership
            .forget(sid)
            .inspect_err(|e| tracing::warn!("cannot forget {}: {}", sid, e))?;
        self.rebalance_replica_sets();
        self.generate_next_configuration(ctx);
        Ok(())
    }

    /// A report that `sid` looked dead while running `version`. Acted on
    /// only when `version` is the current one; always succeeds.
    pub fn server_suspect(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        version: u64,
    ) -> Result<()> {
        if version != self.version {
            tracing::debug!(
                "ignoring suspicion of {} from version {} (current is {})",
                sid,
                version,
                self.version
            );
            return Ok(());
        }

        if let Err(e) = self.server_offline(ctx, sid) {
            tracing::debug!("suspicion of {} had no effect: {}", sid, e);
        }

        Ok(())
    }

    // === Spaces ===

    pub fn space_add(&mut self, ctx: &mut dyn StateMachineContext, space: Space) -> Result<()> {
        let name = space.name.clone();
        let id = self
            .topology
            .add(space, &mut self.ids)
            .inspect_err(|e| tracing::warn!("cannot add space \"{}\": {}", name, e))?;

        tracing::info!("added space \"{}\" with {}", name, id);
        self.initial_space_layout(&name);
        self.generate_next_configuration(ctx);
        Ok(())
    }

    pub fn space_rm(&mut self, ctx: &mut dyn StateMachineContext, name: &str) -> Result<()> {
        let space = self
            .topology
            .remove(name)
            .inspect_err(|e| tracing::warn!("cannot remove space: {}", e))?;

        let regions: BTreeSet<_> = space.region_ids().collect();
        let intents = self.intents.remove_regions(|r| regions.contains(&r));
        let transfers = self.transfers.remove_regions(|r| regions.contains(&r));

        tracing::info!(
            "removed space \"{}\" ({} intents, {} transfers dropped)",
            name,
            intents,
            transfers
        );
        self.generate_next_configuration(ctx);
        Ok(())
    }

    // === Transfers ===

    pub fn transfer_go_live(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        version: u64,
        xid: TransferId,
    ) -> Result<()> {
        let Some(xfer) = self.transfers.get(xid).copied() else {
            if version < self.version {
                tracing::debug!("dropping go-live of {} from old version {}", xid, version);
            } else {
                tracing::warn!("cannot make {} live because it doesn't exist", xid);
            }
            return Ok(());
        };

        let Some(region) = self.topology.region_mut(xfer.region) else {
            invariant_broken!("{} refers to nonexistent {}", xid, xfer.region);
            return Ok(());
        };

        if region.ends_with_pair(xfer.src, xfer.dst) {
            return Ok(());
        }

        if region.replicas.last().map(|r| r.server) != Some(xfer.src) {
            invariant_broken!(
                "{} ({}) is in a bad state; the region does not end with its source",
                xid,
                xfer
            );
            return Ok(());
        }

        region.replicas.push(Replica::new(xfer.dst, xfer.vdst));
        tracing::info!("{} is live", xfer);
        self.generate_next_configuration(ctx);
        Ok(())
    }

    pub fn transfer_complete(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        version: u64,
        xid: TransferId,
    ) -> Result<()> {
        let Some(xfer) = self.transfers.get(xid).copied() else {
            if version < self.version {
                tracing::debug!("dropping completion of {} from old version {}", xid, version);
            } else {
                tracing::warn!("cannot complete {} because it doesn't exist", xid);
            }
            return Ok(());
        };

        let Some(region) = self.topology.region(xfer.region) else {
            invariant_broken!("{} refers to nonexistent {}", xid, xfer.region);
            return Ok(());
        };

        if !region.ends_with_pair(xfer.src, xfer.dst) {
            tracing::warn!("cannot complete {} because it is not yet live", xfer);
            return Ok(());
        }

        self.transfers.remove(xid);
        tracing::info!("{} is complete", xfer);
        self.drive_intent(xfer.region);
        self.generate_next_configuration(ctx);
        Ok(())
    }

    // === Configuration publisher ===

    /// Encoded latest configuration
    pub fn config_get(&self) -> Result<Bytes> {
        if self.version == 0 {
            return Err(Error::NoCanDo("the cluster is not initialized".into()));
        }
        Ok(self.latest_config.clone())
    }

    pub fn config_ack(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        version: u64,
    ) -> Result<()> {
        self.config_ack_barrier.pass(version, sid);
        self.check_ack_condition(ctx);
        Ok(())
    }

    pub fn config_stable(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        version: u64,
    ) -> Result<()> {
        self.config_stable_barrier.pass(version, sid);
        self.check_stable_condition(ctx);
        Ok(())
    }

    pub(super) fn generate_next_configuration(&mut self, ctx: &mut dyn StateMachineContext) {
        let announced = ctx.condition_broadcast(CONDITION_CONFIG);
        self.version += 1;
        tracing::info!("issuing new configuration version {}", self.version);

        if announced != self.version {
            invariant_broken!(
                "\"{}\" condition is at {} but the configuration is at version {}",
                CONDITION_CONFIG,
                announced,
                self.version
            );
        }

        let roster = self.topology.servers_in_configuration(&self.transfers);
        self.config_ack_barrier.new_version(self.version, &roster);
        self.config_stable_barrier.new_version(self.version, &roster);
        self.check_ack_condition(ctx);
        self.check_stable_condition(ctx);

        match self.encode_configuration() {
            Ok(bytes) => self.latest_config = bytes,
            Err(e) => invariant_broken!("cannot encode version {}: {}", self.version, e),
        }
    }

    pub(super) fn encode_configuration(&self) -> Result<Bytes> {
        configuration::encode(
            self.cluster,
            self.version,
            self.membership.servers(),
            self.topology.spaces(),
            self.transfers.as_slice(),
        )
    }

    fn check_ack_condition(&mut self, ctx: &mut dyn StateMachineContext) {
        let target = self.config_ack_barrier.min_version();
        if self.config_ack_through < target {
            tracing::info!("servers acknowledged every version through {}", target);
        }
        advance_condition(ctx, CONDITION_ACK, &mut self.config_ack_through, target);
    }

    fn check_stable_condition(&mut self, ctx: &mut dyn StateMachineContext) {
        let target = self.config_stable_barrier.min_version();
        if self.config_stable_through < target {
            tracing::info!("every version through {} is stable", target);
        }
        advance_condition(ctx, CONDITION_STABLE, &mut self.config_stable_through, target);
    }

    // === Checkpoints ===

    pub fn checkpoint(&mut self, ctx: &mut dyn StateMachineContext) -> Result<()> {
        let announced = ctx.condition_broadcast(CONDITION_CHECKPOINT);
        self.checkpoint += 1;
        tracing::info!("establishing checkpoint {}", self.checkpoint);

        if announced != self.checkpoint {
            invariant_broken!(
                "\"{}\" condition is at {} but the checkpoint is {}",
                CONDITION_CHECKPOINT,
                announced,
                self.checkpoint
            );
        }

        let roster = self.topology.servers_in_configuration(&self.transfers);
        self.checkpoint_stable_barrier
            .new_version(self.checkpoint, &roster);
        self.check_checkpoint_stable_condition(ctx);
        Ok(())
    }

    pub fn checkpoint_stable(
        &mut self,
        ctx: &mut dyn StateMachineContext,
        sid: ServerId,
        config: u64,
        number: u64,
    ) -> Result<()> {
        if config < self.version {
            return Err(Error::NoCanDo(format!(
                "{} reported checkpoint {} from stale version {}",
                sid, number, config
            )));
        }

        self.checkpoint_stable_barrier.pass(number, sid);
        self.check_checkpoint_stable_condition(ctx);
        Ok(())
    }

    /// Periodic tick: re-arm and take a checkpoint
    pub fn alarm(&mut self, ctx: &mut dyn StateMachineContext) -> Result<()> {
        ctx.schedule_alarm(ALARM_COMMAND, self.config.alarm_interval());
        self.checkpoint(ctx)
    }

    fn check_checkpoint_stable_condition(&mut self, ctx: &mut dyn StateMachineContext) {
        let target = self.checkpoint_stable_barrier.min_version();
        let stabilized = self.checkpoint_stable_through < target;

        if stabilized {
            tracing::info!("checkpoint {} is stable", target);
        }

        advance_condition(
            ctx,
            CONDITION_CHECKPOINT_STABLE,
            &mut self.checkpoint_stable_through,
            target,
        );

        let gc_target = target.saturating_sub(OUTSTANDING_CHECKPOINTS);
        if self.checkpoint_gc_through < gc_target {
            tracing::info!("checkpoints through {} may be garbage collected", gc_target);
        }
        advance_condition(
            ctx,
            CONDITION_CHECKPOINT_GC,
            &mut self.checkpoint_gc_through,
            gc_target,
        );

        if !stabilized {
            return;
        }

        let mut changed = false;
        for rid in self.intents.stamped_through(self.checkpoint_stable_through) {
            changed |= self.drive_intent(rid);
        }

        if changed {
            self.generate_next_configuration(ctx);
        }
    }

    // === Diagnostics ===

    /// Human-readable summary of intents and transfers. Also logged.
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cluster {} at version {}", self.cluster, self.version);
        let _ = writeln!(
            out,
            "permutation: {:?}",
            self.membership
                .permutation()
                .iter()
                .map(|s| s.get())
                .collect::<Vec<_>>()
        );
        let _ = writeln!(
            out,
            "spares: {:?}",
            self.membership
                .spares()
                .iter()
                .map(|s| s.get())
                .collect::<Vec<_>>()
        );
        let _ = writeln!(
            out,
            "checkpoint {} stable through {} gc through {}",
            self.checkpoint, self.checkpoint_stable_through, self.checkpoint_gc_through
        );
        let _ = writeln!(out, "intents:");
        for intent in self.intents.iter() {
            let _ = writeln!(out, "  {}", intent);
        }
        let _ = writeln!(out, "transfers:");
        for xfer in self.transfers.iter() {
            let _ = writeln!(out, "  {}", xfer);
        }

        for line in out.lines() {
            tracing::info!("{}", line);
        }

        out
    }

    // === Snapshots ===

    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Rebuild from `snapshot` output. The cached configuration is
    /// re-encoded without issuing a new version.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let mut coord: Coordinator = bincode::deserialize(bytes)?;
        if coord.version > 0 {
            coord.latest_config = coord.encode_configuration()?;
        }
        Ok(coord)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

/// Broadcast `condition` until `through` reaches `target`.
fn advance_condition(
    ctx: &mut dyn StateMachineContext,
    condition: &str,
    through: &mut u64,
    target: u64,
) {
    while *through < target {
        let next = ctx.condition_broadcast(condition);
        if next <= *through {
            invariant_broken!(
                "\"{}\" condition went from {} to {}; jumping to {}",
                condition,
                *through,
                next,
                target
            );
            *through = target;
            break;
        }
        *through = next.min(target);
    }
}
