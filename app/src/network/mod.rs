mod adapter;
#[cfg(test)]
pub mod fake;
mod mac;

use std::net::Ipv4Addr;

pub use adapter::{NetworkCommands, SystemNetwork};
pub use mac::MacAddress;

use crate::core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    pub success: bool,
    pub latency: Option<Duration>,
}

impl PingReply {
    pub fn no_reply() -> Self {
        Self {
            success: false,
            latency: None,
        }
    }
}

/// State of a kernel neighbor-cache (ARP) entry as reported by `ip neigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, derive_more::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NeighborState {
    #[display("REACHABLE")]
    Reachable,
    #[display("DELAY")]
    Delay,
    #[display("PROBE")]
    Probe,
    #[display("STALE")]
    Stale,
    #[display("PERMANENT")]
    Permanent,
    #[display("NOARP")]
    #[serde(rename = "NOARP")]
    NoArp,
    #[display("INCOMPLETE")]
    Incomplete,
    #[display("FAILED")]
    Failed,
    #[display("NONE")]
    None,
}

impl NeighborState {
    /// Only entries the kernel confirmed recently count as evidence that the device is alive.
    /// STALE entries can survive a real outage for minutes.
    pub fn is_fresh(&self) -> bool {
        matches!(self, NeighborState::Reachable | NeighborState::Delay)
    }

    pub fn from_ip_neigh(value: &str) -> Option<Self> {
        let state = match value.to_ascii_uppercase().as_str() {
            "REACHABLE" => NeighborState::Reachable,
            "DELAY" => NeighborState::Delay,
            "PROBE" => NeighborState::Probe,
            "STALE" => NeighborState::Stale,
            "PERMANENT" => NeighborState::Permanent,
            "NOARP" => NeighborState::NoArp,
            "INCOMPLETE" => NeighborState::Incomplete,
            "FAILED" => NeighborState::Failed,
            "NONE" => NeighborState::None,
            _ => return None,
        };

        Some(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborEntry {
    pub mac: Option<MacAddress>,
    pub state: NeighborState,
}

impl NeighborEntry {
    pub fn confirms(&self, expected: &MacAddress) -> bool {
        self.mac.as_ref() == Some(expected) && self.state.is_fresh()
    }
}

/// Network primitives the authenticity validator is built on.
pub trait NetworkProbe {
    async fn ping(&self, ip: Ipv4Addr, timeout: Duration, count: u32) -> anyhow::Result<PingReply>;

    async fn lookup_neighbor(&self, ip: Ipv4Addr) -> anyhow::Result<Option<NeighborEntry>>;

    /// Sends a targeted probe so the kernel re-resolves the neighbor entry.
    /// Returns the MAC of a direct reply if the probe reports one.
    async fn refresh_neighbor(&self, ip: Ipv4Addr, timeout: Duration) -> anyhow::Result<Option<MacAddress>>;
}
