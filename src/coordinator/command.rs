//! Coordinator commands
//!
//! Every operation the hosting framework can deliver, as one serializable
//! enum. Commands are applied one at a time and in the same order on every
//! replica, so `apply` is the only entry point a host needs.

use crate::common::{Error, Result, ReturnCode, ServerId, TransferId};
use crate::coordinator::context::StateMachineContext;
use crate::coordinator::server::Coordinator;
use crate::coordinator::space::SpaceDefinition;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    // ==================== Cluster ====================
    Initialize {
        token: u64,
    },

    // ==================== Membership ====================
    ServerRegister {
        id: ServerId,
        address: SocketAddr,
    },
    ServerOnline {
        id: ServerId,
        #[serde(default)]
        address: Option<SocketAddr>,
    },
    ServerOffline {
        id: ServerId,
    },
    ServerShutdown {
        id: ServerId,
    },
    ServerKill {
        id: ServerId,
    },
    ServerForget {
        id: ServerId,
    },
    /// `version` is the configuration the reporter was running
    ServerSuspect {
        id: ServerId,
        version: u64,
    },

    // ==================== Spaces ====================
    SpaceAdd {
        space: SpaceDefinition,
    },
    SpaceRm {
        name: String,
    },

    // ==================== Transfers ====================
    TransferGoLive {
        version: u64,
        transfer: TransferId,
    },
    TransferComplete {
        version: u64,
        transfer: TransferId,
    },

    // ==================== Configuration ====================
    ConfigGet,
    ConfigAck {
        id: ServerId,
        version: u64,
    },
    ConfigStable {
        id: ServerId,
        version: u64,
    },

    // ==================== Checkpoints ====================
    Checkpoint,
    CheckpointStable {
        id: ServerId,
        config: u64,
        number: u64,
    },
    Alarm,

    // ==================== Diagnostics ====================
    DebugDump,
}

impl Command {
    /// Operation name as it appears in logs and command files
    pub fn name(&self) -> &'static str {
        match self {
            Command::Initialize { .. } => "initialize",
            Command::ServerRegister { .. } => "server_register",
            Command::ServerOnline { .. } => "server_online",
            Command::ServerOffline { .. } => "server_offline",
            Command::ServerShutdown { .. } => "server_shutdown",
            Command::ServerKill { .. } => "server_kill",
            Command::ServerForget { .. } => "server_forget",
            Command::ServerSuspect { .. } => "server_suspect",
            Command::SpaceAdd { .. } => "space_add",
            Command::SpaceRm { .. } => "space_rm",
            Command::TransferGoLive { .. } => "transfer_go_live",
            Command::TransferComplete { .. } => "transfer_complete",
            Command::ConfigGet => "config_get",
            Command::ConfigAck { .. } => "config_ack",
            Command::ConfigStable { .. } => "config_stable",
            Command::Checkpoint => "checkpoint",
            Command::CheckpointStable { .. } => "checkpoint_stable",
            Command::Alarm => "alarm",
            Command::DebugDump => "debug_dump",
        }
    }

    /// Parse one command from its JSON form
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: ReturnCode,
    /// Configuration blob for `config_get`, dump text for `debug_dump`
    #[serde(default)]
    pub payload: Option<Bytes>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            code: ReturnCode::Success,
            payload: None,
        }
    }

    pub fn with_payload(payload: Bytes) -> Self {
        Self {
            code: ReturnCode::Success,
            payload: Some(payload),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl From<Result<()>> for Response {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Response::success(),
            Err(e) => Response {
                code: e.return_code(),
                payload: None,
            },
        }
    }
}

impl Coordinator {
    /// Dispatch one command and report its outcome.
    pub fn apply(&mut self, ctx: &mut dyn StateMachineContext, command: Command) -> Response {
        tracing::debug!("applying {}", command.name());

        match command {
            Command::Initialize { token } => self.initialize(ctx, token).into(),
            Command::ServerRegister { id, address } => {
                self.server_register(ctx, id, address).into()
            }
            Command::ServerOnline { id, address } => self.server_online(ctx, id, address).into(),
            Command::ServerOffline { id } => self.server_offline(ctx, id).into(),
            Command::ServerShutdown { id } => self.server_shutdown(ctx, id).into(),
            Command::ServerKill { id } => self.server_kill(ctx, id).into(),
            Command::ServerForget { id } => self.server_forget(ctx, id).into(),
            Command::ServerSuspect { id, version } => self.server_suspect(ctx, id, version).into(),
            Command::SpaceAdd { space } => {
                let name = space.name.clone();
                match space.build() {
                    Ok(space) => self.space_add(ctx, space).into(),
                    Err(e) => {
                        tracing::warn!("cannot add space \"{}\": {}", name, e);
                        Response::from(Err(e))
                    }
                }
            }
            Command::SpaceRm { name } => self.space_rm(ctx, &name).into(),
            Command::TransferGoLive { version, transfer } => {
                self.transfer_go_live(ctx, version, transfer).into()
            }
            Command::TransferComplete { version, transfer } => {
                self.transfer_complete(ctx, version, transfer).into()
            }
            Command::ConfigGet => match self.config_get() {
                Ok(blob) => Response::with_payload(blob),
                Err(e) => Response::from(Err(e)),
            },
            Command::ConfigAck { id, version } => self.config_ack(ctx, id, version).into(),
            Command::ConfigStable { id, version } => self.config_stable(ctx, id, version).into(),
            Command::Checkpoint => self.checkpoint(ctx).into(),
            Command::CheckpointStable { id, config, number } => {
                self.checkpoint_stable(ctx, id, config, number).into()
            }
            Command::Alarm => self.alarm(ctx).into(),
            Command::DebugDump => Response::with_payload(Bytes::from(self.debug_dump())),
        }
    }
}
