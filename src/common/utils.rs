//! Utility functions for shardcoord

use serde::{Deserialize, Serialize};

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// Registered, never brought online
    Assigned,
    Available,
    NotAvailable,
    Shutdown,
    /// Terminal until the server is forgotten
    Killed,
}

impl ServerState {
    /// States from which `server_online` is legal.
    pub fn can_come_online(&self) -> bool {
        !matches!(self, ServerState::Killed)
    }

    /// States from which `server_offline` and `server_shutdown` are legal.
    pub fn can_go_down(&self) -> bool {
        !matches!(self, ServerState::Killed)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Assigned => write!(f, "ASSIGNED"),
            ServerState::Available => write!(f, "AVAILABLE"),
            ServerState::NotAvailable => write!(f, "NOT_AVAILABLE"),
            ServerState::Shutdown => write!(f, "SHUTDOWN"),
            ServerState::Killed => write!(f, "KILLED"),
        }
    }
}

/// Remove every occurrence of `item`, preserving the order of the rest.
///
/// Returns true if anything was removed.
pub fn remove_all<T: PartialEq>(item: &T, v: &mut Vec<T>) -> bool {
    let before = v.len();
    v.retain(|x| x != item);
    v.len() != before
}

/// Calculate CRC32 checksum
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Validate an identifier-like name (space and attribute names).
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::Malformed("name cannot be empty".into()));
    }

    if name.len() > 255 {
        return Err(crate::Error::Malformed(format!(
            "name \"{}...\" too long (max 255 bytes)",
            name.chars().take(16).collect::<String>()
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(crate::Error::Malformed(format!(
            "name \"{}\" is not a valid identifier",
            name
        )));
    }

    Ok(())
}
