use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::time::{DateTime, Duration};
use crate::network::{MacAddress, NeighborState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub label: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    pub room: String,
    #[serde(default)]
    pub backup_connected: bool,
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum SwitchConfigError {
    #[display("No switches configured")]
    NoSwitches,
    #[display("Switch label must not be empty (ip {ip})")]
    EmptyLabel { ip: Ipv4Addr },
    #[display("Switch {label} has no room assigned")]
    EmptyRoom { label: String },
    #[display("Duplicate switch label {label}")]
    DuplicateLabel { label: String },
    #[display("Threshold {name} must be within (0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[display("Setting {name} must be positive")]
    NotPositive { name: &'static str },
}

/// Validates the switch definitions a monitoring cycle works on.
pub fn validate_switches(switches: &[Switch]) -> Result<(), SwitchConfigError> {
    if switches.is_empty() {
        return Err(SwitchConfigError::NoSwitches);
    }

    let mut labels = HashSet::new();

    for switch in switches {
        if switch.label.trim().is_empty() {
            return Err(SwitchConfigError::EmptyLabel { ip: switch.ip });
        }

        if switch.room.trim().is_empty() {
            return Err(SwitchConfigError::EmptyRoom {
                label: switch.label.clone(),
            });
        }

        if !labels.insert(switch.label.as_str()) {
            return Err(SwitchConfigError::DuplicateLabel {
                label: switch.label.clone(),
            });
        }
    }

    Ok(())
}

/// Which validation stage produced the authenticity verdict of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionMethod {
    #[display("FAILED")]
    Failed,
    #[display("PING_ONLY")]
    PingOnly,
    #[display("PING_MAC")]
    PingMac,
    #[display("ARP_FRESH")]
    ArpFresh,
    #[display("ARP_REFRESH")]
    ArpRefresh,
    #[display("ARPING")]
    Arping,
}

impl DetectionMethod {
    pub fn is_authentic(&self) -> bool {
        !matches!(self, DetectionMethod::Failed | DetectionMethod::PingOnly)
    }

    /// Stable code used in persisted records.
    pub fn code(&self) -> &'static str {
        match self {
            DetectionMethod::Failed => "FAILED",
            DetectionMethod::PingOnly => "PING_ONLY",
            DetectionMethod::PingMac => "PING_MAC",
            DetectionMethod::ArpFresh => "ARP_FRESH",
            DetectionMethod::ArpRefresh => "ARP_REFRESH",
            DetectionMethod::Arping => "ARPING",
        }
    }

    pub fn numeric_code(&self) -> i16 {
        match self {
            DetectionMethod::Failed => 0,
            DetectionMethod::PingOnly => 1,
            DetectionMethod::PingMac => 2,
            DetectionMethod::ArpFresh => 3,
            DetectionMethod::ArpRefresh => 4,
            DetectionMethod::Arping => 5,
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            DetectionMethod::Failed => "no stage could confirm the device",
            DetectionMethod::PingOnly => "answers ping, but the MAC address could not be verified",
            DetectionMethod::PingMac => "answers ping and the MAC address matches",
            DetectionMethod::ArpFresh => "no ping reply, but a recently confirmed neighbor entry matches",
            DetectionMethod::ArpRefresh => "neighbor entry matched after forcing a refresh",
            DetectionMethod::Arping => "the expected MAC answered a direct ARP probe",
        }
    }
}

impl FromStr for DetectionMethod {
    type Err = anyhow::Error;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        [
            DetectionMethod::Failed,
            DetectionMethod::PingOnly,
            DetectionMethod::PingMac,
            DetectionMethod::ArpFresh,
            DetectionMethod::ArpRefresh,
            DetectionMethod::Arping,
        ]
        .into_iter()
        .find(|m| m.code() == code)
        .ok_or_else(|| anyhow::anyhow!("Unknown detection method {}", code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    #[display("ping")]
    Ping,
    #[display("neighbor cache")]
    NeighborCache,
    #[display("neighbor refresh")]
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum StageVerdict {
    #[display("replied{}", latency.map(|l| format!(" in {:.1}ms", l.as_millis_f64())).unwrap_or_default())]
    Replied { latency: Option<Duration> },
    #[display("no reply")]
    NoReply,
    #[display("timed out after {}", timeout.to_human_readable())]
    TimedOut { timeout: Duration },
    #[display("probe error: {message}")]
    ProbeError { message: String },
    #[display("no neighbor entry")]
    NoEntry,
    #[display("MAC {mac} matches")]
    MacMatch { mac: MacAddress },
    #[display("expected MAC, found {}", found.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "none".to_string()))]
    MacMismatch { found: Option<MacAddress> },
    #[display("matching entry is not fresh ({state})")]
    NotFresh { state: NeighborState },
    #[display("fresh entry {mac} ({state})")]
    Fresh { mac: MacAddress, state: NeighborState },
    #[display("direct reply from {mac}")]
    DirectReply { mac: MacAddress },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTrace {
    pub stage: ValidationStage,
    pub verdict: StageVerdict,
}

impl std::fmt::Display for StageTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.verdict)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchCheckResult {
    pub switch: Switch,
    pub timestamp: DateTime,
    pub reachable: bool,
    pub mac_validated: bool,
    pub authentic: bool,
    pub detection_method: DetectionMethod,
    pub response_time: Option<Duration>,
    pub actual_mac: Option<MacAddress>,
    pub trail: Vec<StageTrace>,
}

impl SwitchCheckResult {
    /// Human readable reason for the verdict, including every stage that ran.
    pub fn explain(&self) -> String {
        let stages = self
            .trail
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("; ");

        format!(
            "{} [{}]: {} ({})",
            self.switch.label,
            self.detection_method,
            self.detection_method.explanation(),
            stages
        )
    }
}
