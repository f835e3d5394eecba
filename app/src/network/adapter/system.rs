use std::net::Ipv4Addr;
use std::process::{Output, Stdio};

use anyhow::Context as _;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::time::Duration;
use crate::network::{MacAddress, NeighborEntry, NeighborState, NetworkProbe, PingReply};

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkCommands {
    #[serde(default = "default_ping")]
    pub ping: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    //no arping available: refresh falls back to a single ping, which also makes the kernel re-resolve
    #[serde(default = "default_arping")]
    pub arping: Option<String>,
}

fn default_ping() -> String {
    "ping".to_string()
}

fn default_ip() -> String {
    "ip".to_string()
}

fn default_arping() -> Option<String> {
    Some("arping".to_string())
}

impl Default for NetworkCommands {
    fn default() -> Self {
        Self {
            ping: default_ping(),
            ip: default_ip(),
            arping: default_arping(),
        }
    }
}

/// Probes the network with the tools of the host system (iputils `ping`/`arping`, iproute2 `ip`).
/// Spawned processes are killed when the calling future is dropped, so callers can bound every
/// step with `tokio::time::timeout`.
#[derive(Debug, Clone, Default)]
pub struct SystemNetwork {
    commands: NetworkCommands,
}

impl SystemNetwork {
    pub fn new(commands: NetworkCommands) -> Self {
        Self { commands }
    }
}

impl NetworkProbe for SystemNetwork {
    async fn ping(&self, ip: Ipv4Addr, timeout: Duration, count: u32) -> anyhow::Result<PingReply> {
        let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;

        let output = run(
            &self.commands.ping,
            &[
                "-n".to_string(),
                "-q".to_string(),
                "-c".to_string(),
                count.max(1).to_string(),
                "-W".to_string(),
                wait_secs.to_string(),
                ip.to_string(),
            ],
        )
        .await
        .with_context(|| format!("Error pinging {}", ip))?;

        if !output.status.success() {
            return Ok(PingReply::no_reply());
        }

        Ok(PingReply {
            success: true,
            latency: parse_ping_latency(&String::from_utf8_lossy(&output.stdout)),
        })
    }

    async fn lookup_neighbor(&self, ip: Ipv4Addr) -> anyhow::Result<Option<NeighborEntry>> {
        let output = run(
            &self.commands.ip,
            &["-4".to_string(), "neigh".to_string(), "show".to_string(), ip.to_string()],
        )
        .await
        .with_context(|| format!("Error reading neighbor cache for {}", ip))?;

        if !output.status.success() {
            anyhow::bail!(
                "Neighbor lookup for {} failed: {}",
                ip,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(parse_neighbor_entry(&String::from_utf8_lossy(&output.stdout), ip))
    }

    async fn refresh_neighbor(&self, ip: Ipv4Addr, timeout: Duration) -> anyhow::Result<Option<MacAddress>> {
        let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;

        if let Some(arping) = &self.commands.arping {
            let args = [
                "-c".to_string(),
                "1".to_string(),
                "-w".to_string(),
                wait_secs.to_string(),
                ip.to_string(),
            ];

            match run(arping, &args).await {
                Ok(output) => return Ok(parse_arping_reply(&String::from_utf8_lossy(&output.stdout))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("{} not available, refreshing neighbor {} via ping", arping, ip);
                }
                Err(e) => return Err(e).with_context(|| format!("Error sending ARP probe to {}", ip)),
            }
        }

        self.ping(ip, timeout, 1).await?;
        Ok(None)
    }
}

async fn run(program: &str, args: &[String]) -> std::io::Result<Output> {
    tracing::trace!("Executing {} {}", program, args.join(" "));

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
}

//iputils summary: "rtt min/avg/max/mdev = 0.321/0.456/0.612/0.040 ms", single reply: "time=0.456 ms"
fn parse_ping_latency(stdout: &str) -> Option<Duration> {
    let from_summary = stdout
        .lines()
        .find(|line| line.contains("min/avg/max"))
        .and_then(|line| line.split('=').nth(1))
        .and_then(|values| values.trim().split('/').nth(1))
        .and_then(|avg| avg.trim().parse::<f64>().ok());

    let from_reply = || {
        stdout
            .split_whitespace()
            .find_map(|token| token.strip_prefix("time="))
            .and_then(|value| value.trim_end_matches("ms").parse::<f64>().ok())
    };

    from_summary
        .or_else(from_reply)
        .map(|millis| Duration::micros((millis * 1000.0).round() as i64))
}

//"192.168.1.10 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE", "192.168.1.11 dev eth0 FAILED"
fn parse_neighbor_entry(stdout: &str, ip: Ipv4Addr) -> Option<NeighborEntry> {
    let ip = ip.to_string();

    stdout.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&ip.as_str()) {
            return None;
        }

        let mac = tokens
            .iter()
            .position(|t| *t == "lladdr")
            .and_then(|i| tokens.get(i + 1))
            .and_then(|mac| mac.parse::<MacAddress>().ok());

        let state = tokens
            .iter()
            .rev()
            .find_map(|t| NeighborState::from_ip_neigh(t))
            .unwrap_or(NeighborState::None);

        Some(NeighborEntry { mac, state })
    })
}

//iputils: "Unicast reply from 192.168.1.10 [AA:BB:CC:DD:EE:FF]  0.911ms"
//habets:  "60 bytes from aa:bb:cc:dd:ee:ff (192.168.1.10): index=0 time=1.2 msec"
fn parse_arping_reply(stdout: &str) -> Option<MacAddress> {
    stdout.lines().find_map(|line| {
        if line.to_ascii_lowercase().contains("reply from") {
            let start = line.find('[')?;
            let end = line[start..].find(']')? + start;
            return line[start + 1..end].parse().ok();
        }

        let mut tokens = line.split_whitespace();
        tokens.position(|t| t == "from")?;
        tokens.next()?.parse().ok()
    })
}
