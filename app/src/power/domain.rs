use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::time::{DateTime, Duration};
use crate::network::MacAddress;
use crate::switch::{DetectionMethod, SwitchConfigError};

/// Overall power state of the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    #[display("ONLINE")]
    Online,
    #[display("BACKUP")]
    Backup,
    #[display("CRITICAL")]
    Critical,
    #[display("OFFLINE")]
    Offline,
}

impl SystemStatus {
    /// Priority order: main power, then backup, then a dead backup circuit.
    pub fn classify(main_power_on: bool, backup_power_on: bool, backup_switches_total: usize) -> Self {
        if main_power_on {
            SystemStatus::Online
        } else if backup_power_on {
            SystemStatus::Backup
        } else if backup_switches_total > 0 {
            SystemStatus::Critical
        } else {
            SystemStatus::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        *self == SystemStatus::Online
    }

    pub fn code(&self) -> &'static str {
        match self {
            SystemStatus::Online => "ONLINE",
            SystemStatus::Backup => "BACKUP",
            SystemStatus::Critical => "CRITICAL",
            SystemStatus::Offline => "OFFLINE",
        }
    }

    pub fn numeric_code(&self) -> i16 {
        match self {
            SystemStatus::Online => 0,
            SystemStatus::Backup => 1,
            SystemStatus::Critical => 2,
            SystemStatus::Offline => 3,
        }
    }
}

impl FromStr for SystemStatus {
    type Err = anyhow::Error;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "ONLINE" => Ok(SystemStatus::Online),
            "BACKUP" => Ok(SystemStatus::Backup),
            "CRITICAL" => Ok(SystemStatus::Critical),
            "OFFLINE" => Ok(SystemStatus::Offline),
            _ => anyhow::bail!("Unknown system status {}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::From, derive_more::Display, sqlx::Type)]
#[sqlx(transparent)]
pub struct OutageId(i64);

impl OutageId {
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerRules {
    pub main_threshold: f64,
    pub room_threshold: f64,
    //no backup switches at all counts as a powered backup circuit
    pub vacant_backup_powered: bool,
}

impl Default for PowerRules {
    fn default() -> Self {
        Self {
            main_threshold: 0.5,
            room_threshold: 0.5,
            vacant_backup_powered: true,
        }
    }
}

impl PowerRules {
    pub fn validate(&self) -> Result<(), SwitchConfigError> {
        for (name, value) in [
            ("main_threshold", self.main_threshold),
            ("room_threshold", self.room_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SwitchConfigError::InvalidThreshold { name, value });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSnapshot {
    pub timestamp: DateTime,
    pub main_switches_online: usize,
    pub main_switches_total: usize,
    pub backup_switches_online: usize,
    pub backup_switches_total: usize,
    pub main_power_on: bool,
    pub backup_power_on: bool,
    pub system_status: SystemStatus,
    pub outage_id: Option<OutageId>,
    pub is_outage_start: bool,
    pub is_outage_end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub timestamp: DateTime,
    pub room: String,
    pub switches_online: usize,
    pub switches_total: usize,
    pub room_power_on: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outage {
    pub id: OutageId,
    pub status: SystemStatus,
    pub started: DateTime,
    pub ended: Option<DateTime>,
}

impl Outage {
    pub fn is_ongoing(&self) -> bool {
        self.ended.is_none()
    }

    pub fn duration(&self) -> Duration {
        match &self.ended {
            Some(ended) => ended.elapsed_since(self.started),
            None => self.started.elapsed(),
        }
    }
}

/// Latest persisted check of one switch, as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchReport {
    pub label: String,
    pub room: String,
    pub timestamp: DateTime,
    pub reachable: bool,
    pub authentic: bool,
    pub detection_method: DetectionMethod,
    pub response_time: Option<Duration>,
    pub actual_mac: Option<MacAddress>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Uptime {
    pub since: DateTime,
    pub duration: Duration,
}
