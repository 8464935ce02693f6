use serde::{Deserialize, Serialize};

pub type HostId = u32;

/// A registered machine on the LAN. Immutable per probe/command cycle;
/// mutations go through the registry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    /// IP address or hostname.
    pub address: String,
    /// Port probed for reachability and used for the shutdown agent.
    pub port: u16,
    /// MAC for Wake-on-LAN; may be unknown until resolved via ARP.
    pub mac: Option<String>,
}

/// Reachability as exposed to consumers. `Unknown` means the host has
/// never been probed, which is distinct from a probe answering offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Online,
    Offline,
    Unknown,
}

impl From<Option<bool>> for Reachability {
    fn from(probed: Option<bool>) -> Self {
        match probed {
            Some(true) => Reachability::Online,
            Some(false) => Reachability::Offline,
            None => Reachability::Unknown,
        }
    }
}
