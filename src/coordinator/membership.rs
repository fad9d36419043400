//! Membership registry
//!
//! Stores:
//! - Server registry (id → address, lifecycle state), always sorted by id
//! - The permutation: available servers in join order, the placement input
//! - The spare pool: available servers held out of the permutation

use crate::common::{remove_all, Error, Result, ServerId, ServerState};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A storage server known to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub bind_to: SocketAddr,
    pub state: ServerState,
}

/// What `bring_online` changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnlineChange {
    pub address_changed: bool,
    pub became_available: bool,
}

impl OnlineChange {
    pub fn any(&self) -> bool {
        self.address_changed || self.became_available
    }
}

/// Membership registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Membership {
    servers: Vec<Server>,
    permutation: Vec<ServerId>,
    spares: Vec<ServerId>,
    desired_spares: usize,
}

impl Membership {
    pub fn new(desired_spares: usize) -> Self {
        Self {
            desired_spares,
            ..Default::default()
        }
    }

    /// All servers, sorted by id
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn permutation(&self) -> &[ServerId] {
        &self.permutation
    }

    pub fn spares(&self) -> &[ServerId] {
        &self.spares
    }

    pub fn desired_spares(&self) -> usize {
        self.desired_spares
    }

    pub fn get(&self, id: ServerId) -> Option<&Server> {
        self.position(id).ok().map(|idx| &self.servers[idx])
    }

    fn position(&self, id: ServerId) -> std::result::Result<usize, usize> {
        self.servers.binary_search_by_key(&id, |s| s.id)
    }

    fn get_mut(&mut self, id: ServerId) -> Result<&mut Server> {
        match self.position(id) {
            Ok(idx) => Ok(&mut self.servers[idx]),
            Err(_) => Err(Error::NotFound(format!("{} doesn't exist", id))),
        }
    }

    /// Register a new server in the ASSIGNED state
    pub fn register(&mut self, id: ServerId, bind_to: SocketAddr) -> Result<()> {
        match self.position(id) {
            Ok(idx) => {
                let existing = &self.servers[idx];
                Err(Error::Duplicate(format!(
                    "the id belongs to {} at {}",
                    existing.id, existing.bind_to
                )))
            }
            Err(idx) => {
                self.servers.insert(
                    idx,
                    Server {
                        id,
                        bind_to,
                        state: ServerState::Assigned,
                    },
                );
                tracing::info!("registered {}", id);
                Ok(())
            }
        }
    }

    /// Mark a server AVAILABLE, optionally moving it to a new address.
    ///
    /// A server newly becoming available joins the spare pool while it is
    /// under quota and the end of the permutation otherwise.
    pub fn bring_online(
        &mut self,
        id: ServerId,
        bind_to: Option<SocketAddr>,
    ) -> Result<OnlineChange> {
        let state = self.get_mut(id)?.state;

        if !state.can_come_online() {
            return Err(Error::NoCanDo(format!(
                "cannot bring {} online because the server is {}",
                id, state
            )));
        }

        let mut change = OnlineChange::default();

        if let Some(addr) = bind_to {
            let current = self.get_mut(id)?.bind_to;

            if current != addr {
                if let Some(other) = self.servers.iter().find(|s| s.id != id && s.bind_to == addr)
                {
                    return Err(Error::Duplicate(format!(
                        "cannot change {} to {} because that address is in use by {}",
                        id, addr, other.id
                    )));
                }

                tracing::info!("changing {}'s address from {} to {}", id, current, addr);
                self.get_mut(id)?.bind_to = addr;
                change.address_changed = true;
            }
        }

        if state != ServerState::Available {
            tracing::info!(
                "changing {} from {} to {}",
                id,
                state,
                ServerState::Available
            );
            self.get_mut(id)?.state = ServerState::Available;

            if self.spares.len() < self.desired_spares {
                self.spares.push(id);
            } else {
                self.permutation.push(id);
            }

            change.became_available = true;
        }

        Ok(change)
    }

    /// Move a server into one of the down states (NOT_AVAILABLE, SHUTDOWN,
    /// KILLED). Returns true when the state actually changed.
    pub fn take_down(&mut self, id: ServerId, target: ServerState) -> Result<bool> {
        let server = self.get_mut(id)?;
        let state = server.state;

        if target != ServerState::Killed && !state.can_go_down() {
            return Err(Error::NoCanDo(format!(
                "cannot move {} to {} because the server is {}",
                id, target, state
            )));
        }

        if state == target {
            return Ok(false);
        }

        tracing::info!("changing {} from {} to {}", id, state, target);
        server.state = target;
        self.withdraw(id);
        Ok(true)
    }

    /// Remove a server from the registry entirely
    pub fn forget(&mut self, id: ServerId) -> Result<Server> {
        let idx = self
            .position(id)
            .map_err(|_| Error::NotFound(format!("{} doesn't exist", id)))?;
        let server = self.servers.remove(idx);
        self.withdraw(id);
        tracing::info!("forgot {}", id);
        Ok(server)
    }

    /// Drop a server from placement, promoting the oldest spare if the
    /// permutation lost a member.
    fn withdraw(&mut self, id: ServerId) {
        remove_all(&id, &mut self.spares);

        if remove_all(&id, &mut self.permutation) && !self.spares.is_empty() {
            let promoted = self.spares.remove(0);
            tracing::info!("promoting spare {} into the permutation", promoted);
            self.permutation.push(promoted);
        }
    }
}
