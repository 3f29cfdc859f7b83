use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub type ConnectionId = u64;

/// One monitored line.
///
/// Read-only to the monitoring core: connections are created and edited by
/// configuration management and only ever read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    #[serde(default)]
    pub line_number: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Provider identifier used to pick the portal collector.
    pub provider: String,
    /// Local address all measurement traffic for this line originates from.
    pub egress_address: IpAddr,
    pub credentials: StoredCredentials,
}

/// Portal login as persisted. Both halves are vault ciphertexts once the
/// credentials have been sealed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}
