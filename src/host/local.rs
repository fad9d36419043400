//! In-process host context
//!
//! One `watch` channel per condition: the state machine bumps the sender,
//! async waiters hold receivers and wake when the value moves.

use crate::common::{Error, Result};
use crate::coordinator::context::{
    StateMachineContext, CONDITIONS, CONDITION_ACK, CONDITION_CHECKPOINT,
    CONDITION_CHECKPOINT_GC, CONDITION_CHECKPOINT_STABLE, CONDITION_CONFIG, CONDITION_STABLE,
};
use crate::coordinator::Coordinator;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;

pub struct LocalHost {
    conditions: BTreeMap<String, watch::Sender<u64>>,
    /// Most recently requested alarm, not yet picked up by the driver
    alarm: Option<(String, Duration)>,
}

impl LocalHost {
    pub fn new() -> Self {
        let conditions = CONDITIONS
            .iter()
            .map(|name| (name.to_string(), watch::channel(0).0))
            .collect();

        Self {
            conditions,
            alarm: None,
        }
    }

    /// A host whose conditions continue from a restored coordinator.
    pub fn resume(coord: &Coordinator) -> Self {
        let host = Self::new();
        let values = [
            (CONDITION_CONFIG, coord.version()),
            (CONDITION_ACK, coord.config_ack_through()),
            (CONDITION_STABLE, coord.config_stable_through()),
            (CONDITION_CHECKPOINT, coord.current_checkpoint()),
            (CONDITION_CHECKPOINT_STABLE, coord.checkpoint_stable_through()),
            (CONDITION_CHECKPOINT_GC, coord.checkpoint_gc_through()),
        ];

        for (name, value) in values {
            if let Some(tx) = host.conditions.get(name) {
                tx.send_replace(value);
            }
        }

        host
    }

    /// Current value of a condition; zero if it was never broadcast.
    pub fn condition(&self, name: &str) -> u64 {
        self.conditions
            .get(name)
            .map(|tx| *tx.borrow())
            .unwrap_or(0)
    }

    pub fn watcher(&self) -> ConditionWatcher {
        ConditionWatcher {
            receivers: self
                .conditions
                .iter()
                .map(|(name, tx)| (name.clone(), tx.subscribe()))
                .collect(),
        }
    }

    /// Take the pending alarm request, if any.
    pub fn take_alarm(&mut self) -> Option<(String, Duration)> {
        self.alarm.take()
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachineContext for LocalHost {
    fn condition_broadcast(&mut self, condition: &str) -> u64 {
        let tx = self
            .conditions
            .entry(condition.to_string())
            .or_insert_with(|| watch::channel(0).0);
        let next = *tx.borrow() + 1;
        tx.send_replace(next);
        next
    }

    fn schedule_alarm(&mut self, command: &str, interval: Duration) {
        self.alarm = Some((command.to_string(), interval));
    }
}

/// Async view of a host's conditions
#[derive(Debug, Clone)]
pub struct ConditionWatcher {
    receivers: BTreeMap<String, watch::Receiver<u64>>,
}

impl ConditionWatcher {
    pub fn current(&self, name: &str) -> Option<u64> {
        self.receivers.get(name).map(|rx| *rx.borrow())
    }

    /// Wait until `name` reaches at least `value`; returns the value seen.
    pub async fn wait_for(&mut self, name: &str, value: u64) -> Result<u64> {
        let rx = self
            .receivers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("no condition named \"{}\"", name)))?;

        let seen = rx
            .wait_for(|v| *v >= value)
            .await
            .map_err(|_| Error::Internal(format!("host stopped before \"{}\" reached {}", name, value)))?;
        Ok(*seen)
    }
}
