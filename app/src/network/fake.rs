use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::core::time::Duration;
use crate::network::{MacAddress, NeighborEntry, NeighborState, NetworkProbe, PingReply};

#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    pub ping: Option<PingReply>,
    pub ping_delay: Option<Duration>,
    //consumed front to back, the last one sticks
    pub neighbor: VecDeque<Option<NeighborEntry>>,
    pub refresh_reply: Option<MacAddress>,
}

impl FakeDevice {
    pub fn answering(mac: &str) -> Self {
        Self {
            ping: Some(PingReply {
                success: true,
                latency: Some(Duration::micros(800)),
            }),
            neighbor: VecDeque::from([Some(entry(mac, NeighborState::Reachable))]),
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            ping: Some(PingReply::no_reply()),
            ..Default::default()
        }
    }

    pub fn with_neighbor(mut self, entries: Vec<Option<NeighborEntry>>) -> Self {
        self.neighbor = entries.into();
        self
    }
}

pub fn entry(mac: &str, state: NeighborState) -> NeighborEntry {
    NeighborEntry {
        mac: Some(mac.parse().expect("valid MAC in test")),
        state,
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub ping: usize,
    pub lookup: usize,
    pub refresh: usize,
}

#[derive(Debug, Default)]
pub struct FakeNetwork {
    devices: Mutex<HashMap<Ipv4Addr, FakeDevice>>,
    calls: Mutex<HashMap<Ipv4Addr, Calls>>,
}

impl FakeNetwork {
    pub fn with(self, ip: Ipv4Addr, device: FakeDevice) -> Self {
        self.devices.lock().unwrap().insert(ip, device);
        self
    }

    pub fn set(&self, ip: Ipv4Addr, device: FakeDevice) {
        self.devices.lock().unwrap().insert(ip, device);
    }

    pub fn calls(&self, ip: Ipv4Addr) -> (usize, usize, usize) {
        let calls = self.calls.lock().unwrap();
        calls
            .get(&ip)
            .map(|c| (c.ping, c.lookup, c.refresh))
            .unwrap_or_default()
    }

    fn device(&self, ip: Ipv4Addr) -> FakeDevice {
        self.devices.lock().unwrap().get(&ip).cloned().unwrap_or_default()
    }
}

impl NetworkProbe for FakeNetwork {
    async fn ping(&self, ip: Ipv4Addr, _timeout: Duration, _count: u32) -> anyhow::Result<PingReply> {
        self.calls.lock().unwrap().entry(ip).or_default().ping += 1;
        let device = self.device(ip);

        if let Some(delay) = device.ping_delay {
            tokio::time::sleep(delay.into()).await;
        }

        device.ping.ok_or_else(|| anyhow::anyhow!("ping not available"))
    }

    async fn lookup_neighbor(&self, ip: Ipv4Addr) -> anyhow::Result<Option<NeighborEntry>> {
        self.calls.lock().unwrap().entry(ip).or_default().lookup += 1;

        let mut devices = self.devices.lock().unwrap();
        let Some(device) = devices.get_mut(&ip) else {
            return Ok(None);
        };

        let next = if device.neighbor.len() > 1 {
            device.neighbor.pop_front().flatten()
        } else {
            device.neighbor.front().cloned().flatten()
        };

        Ok(next)
    }

    async fn refresh_neighbor(&self, ip: Ipv4Addr, _timeout: Duration) -> anyhow::Result<Option<MacAddress>> {
        self.calls.lock().unwrap().entry(ip).or_default().refresh += 1;
        Ok(self.device(ip).refresh_reply)
    }
}
