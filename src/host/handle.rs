//! Single-task coordinator driver
//!
//! Owns a `Coordinator` and a `LocalHost` inside one tokio task, so commands
//! are applied strictly one at a time. Callers talk to it over a channel.

use crate::common::{Error, Result};
use crate::coordinator::context::ALARM_COMMAND;
use crate::coordinator::{save_snapshot, Command, Coordinator, Response};
use crate::host::local::{ConditionWatcher, LocalHost};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

const REQUEST_QUEUE: usize = 256;

enum Request {
    Apply(Command, oneshot::Sender<Response>),
    Snapshot(oneshot::Sender<Result<Vec<u8>>>),
}

pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
    watcher: ConditionWatcher,
    join_handle: JoinHandle<Result<Coordinator>>,
}

impl CoordinatorHandle {
    /// Start driving `coord` on the current runtime.
    pub fn spawn(coord: Coordinator) -> Self {
        let host = LocalHost::resume(&coord);
        let watcher = host.watcher();
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let join_handle = tokio::spawn(run(coord, host, rx));

        Self {
            tx,
            watcher,
            join_handle,
        }
    }

    pub async fn apply(&self, command: Command) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Apply(command, reply_tx))
            .await
            .map_err(|_| Error::Internal("coordinator task stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Internal("coordinator task dropped the reply".into()))
    }

    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot(reply_tx))
            .await
            .map_err(|_| Error::Internal("coordinator task stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Internal("coordinator task dropped the reply".into()))?
    }

    /// Conditions of the driven coordinator
    pub fn watcher(&self) -> ConditionWatcher {
        self.watcher.clone()
    }

    /// Wait until condition `name` reaches `value`.
    pub async fn wait_for(&self, name: &str, value: u64) -> Result<u64> {
        self.watcher.clone().wait_for(name, value).await
    }

    /// Stop the task after pending commands drain. Saves a snapshot first
    /// when the coordinator is configured with a snapshot path.
    pub async fn shutdown(self) -> Result<Coordinator> {
        drop(self.tx);
        self.join_handle
            .await
            .map_err(|e| Error::Internal(format!("coordinator task panicked: {}", e)))?
    }
}

async fn run(
    mut coord: Coordinator,
    mut host: LocalHost,
    mut rx: mpsc::Receiver<Request>,
) -> Result<Coordinator> {
    // A resumed cluster keeps its checkpoint cadence
    let mut alarm_at =
        (coord.cluster() != 0).then(|| Instant::now() + coord.config().alarm_interval());

    loop {
        if let Some((command, interval)) = host.take_alarm() {
            if command == ALARM_COMMAND {
                alarm_at = Some(Instant::now() + interval);
            } else {
                tracing::warn!("ignoring alarm for unknown command \"{}\"", command);
            }
        }

        let deadline = alarm_at.unwrap_or_else(Instant::now);

        tokio::select! {
            request = rx.recv() => match request {
                Some(Request::Apply(command, reply)) => {
                    let response = coord.apply(&mut host, command);
                    let _ = reply.send(response);
                }
                Some(Request::Snapshot(reply)) => {
                    let _ = reply.send(coord.snapshot());
                }
                None => break,
            },
            _ = sleep_until(deadline), if alarm_at.is_some() => {
                alarm_at = None;
                let response = coord.apply(&mut host, Command::Alarm);
                if !response.is_success() {
                    tracing::warn!("alarm failed: {}", response.code);
                }
            }
        }
    }

    if let Some(path) = coord.config().snapshot_path.clone() {
        save_snapshot(&coord, &path)?;
    }

    tracing::info!("coordinator task stopped at version {}", coord.version());
    Ok(coord)
}
