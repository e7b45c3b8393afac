//! Peer identity: string node id plus the address a peer listens on.

use serde::{Deserialize, Serialize};

/// Node identifier carried in every protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Random id (uuid v4) for nodes that don't pin one in config.
    pub fn generate() -> Self {
        PeerId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer's identity and listen address. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
}

impl PeerIdentity {
    pub fn new(id: PeerId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// `host:port` form suitable for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
