mod adapter;
mod aggregate;
mod domain;
mod error;
mod outage;
mod service;
mod store;
mod uptime;

use std::sync::Arc;

pub use adapter::http::new_routes as new_http_routes;
pub use domain::*;
pub use error::CycleError;
use infrastructure::{EventBus, EventListener, MqttSender};
pub use outage::OutageDecision;
use serde::Deserialize;
pub use service::{CycleReport, PowerStatus};
use sqlx::PgPool;

use crate::{
    core::time::{DateTime, Duration},
    network::{NetworkCommands, SystemNetwork},
    power::{
        adapter::{db::PgPowerRepository, mqtt::PowerStatePublisher},
        service::PowerMonitorService,
    },
    switch::{ProbeSettings, Switch, SwitchChecker, SwitchConfigError},
    t,
};

#[derive(Debug, Clone)]
pub enum PowerEvent {
    CycleCompleted {
        snapshot: PowerSnapshot,
        rooms: Vec<RoomSnapshot>,
    },
    OutageStarted {
        id: OutageId,
        status: SystemStatus,
        started: DateTime,
    },
    OutageEnded {
        id: Option<OutageId>,
        ended: DateTime,
    },
    PersistenceFailed {
        operation: &'static str,
        message: String,
        //computed but unsaved status, if probing got that far
        status: Option<SystemStatus>,
        timestamp: DateTime,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_interval")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout")]
    pub ping_timeout: Duration,
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    #[serde(default = "default_probe_timeout")]
    pub neighbor_timeout: Duration,
    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,
    #[serde(default = "default_threshold")]
    pub main_threshold: f64,
    #[serde(default = "default_threshold")]
    pub room_threshold: f64,
    #[serde(default = "default_vacant_backup_powered")]
    pub vacant_backup_powered: bool,
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,
}

fn default_interval() -> Duration {
    t!(1 minutes)
}

fn default_probe_timeout() -> Duration {
    t!(2 seconds)
}

fn default_ping_count() -> u32 {
    1
}

fn default_max_parallel_checks() -> usize {
    8
}

fn default_threshold() -> f64 {
    0.5
}

fn default_vacant_backup_powered() -> bool {
    true
}

fn default_mqtt_topic() -> String {
    "power".to_string()
}

impl MonitorSettings {
    pub fn probe(&self) -> ProbeSettings {
        ProbeSettings {
            ping_timeout: self.ping_timeout,
            ping_count: self.ping_count,
            neighbor_timeout: self.neighbor_timeout,
        }
    }

    pub fn rules(&self) -> PowerRules {
        PowerRules {
            main_threshold: self.main_threshold,
            room_threshold: self.room_threshold,
            vacant_backup_powered: self.vacant_backup_powered,
        }
    }

    pub fn validate(&self) -> Result<(), SwitchConfigError> {
        let positive = [
            ("interval", self.interval > Duration::zero()),
            ("ping_timeout", self.ping_timeout > Duration::zero()),
            ("neighbor_timeout", self.neighbor_timeout > Duration::zero()),
            ("ping_count", self.ping_count > 0),
            ("max_parallel_checks", self.max_parallel_checks > 0),
        ];

        if let Some((name, _)) = positive.into_iter().find(|(_, ok)| !ok) {
            return Err(SwitchConfigError::NotPositive { name });
        }

        self.rules().validate()
    }
}

type Service = PowerMonitorService<SystemNetwork, PgPowerRepository>;

pub struct PowerMonitorRunner {
    service: Arc<Service>,
    event_bus: EventBus<PowerEvent>,
    interval: Duration,
}

#[derive(Clone)]
pub struct PowerClient {
    service: Arc<Service>,
}

impl PowerClient {
    pub async fn current_status(&self) -> anyhow::Result<Option<PowerStatus>> {
        self.service.current_status().await
    }

    pub async fn house_uptime(&self) -> anyhow::Result<Option<Uptime>> {
        self.service.house_uptime().await
    }

    pub async fn room_uptime(&self, room: &str) -> anyhow::Result<Option<Uptime>> {
        self.service.room_uptime(room).await
    }

    pub async fn switches(&self) -> anyhow::Result<Vec<SwitchReport>> {
        self.service.switches().await
    }

    pub async fn outages(&self, limit: i64) -> anyhow::Result<Vec<Outage>> {
        self.service.outages(limit).await
    }
}

impl PowerMonitorRunner {
    pub async fn new(
        pool: PgPool,
        commands: NetworkCommands,
        settings: &MonitorSettings,
        switches: Vec<Switch>,
    ) -> anyhow::Result<Self> {
        let repo = PgPowerRepository::new(pool);
        repo.migrate().await?;

        let checker = SwitchChecker::new(SystemNetwork::new(commands), settings.probe(), settings.max_parallel_checks);
        let event_bus = EventBus::new(64);
        let service = Arc::new(PowerMonitorService::new(
            checker,
            repo,
            switches,
            settings.rules(),
            event_bus.emitter(),
        ));

        Ok(Self {
            service,
            event_bus,
            interval: settings.interval,
        })
    }

    pub fn client(&self) -> PowerClient {
        PowerClient {
            service: self.service.clone(),
        }
    }

    pub fn subscribe(&self) -> EventListener<PowerEvent> {
        self.event_bus.subscribe()
    }

    pub fn new_mqtt_publisher(&self, sender: MqttSender) -> PowerStatePublisher {
        PowerStatePublisher::new(sender, self.subscribe())
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval.into());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Monitoring power every {}", self.interval);

        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    async fn run_once(&self) {
        match self.service.run_cycle().await {
            Ok(report) => {
                tracing::info!("Power status {}", report.summary());

                for result in report.results.iter().filter(|r| !r.authentic) {
                    tracing::debug!("{}", result.explain());
                }

                if matches!(report.outage, OutageDecision::Start | OutageDecision::End(_)) {
                    self.log_uptime().await;
                }
            }
            Err(CycleError::Busy) => {
                tracing::info!("Skipping monitoring cycle, another monitor holds the cycle lock");
            }
            Err(CycleError::Persistence {
                operation,
                message,
                report,
            }) => {
                tracing::error!(
                    "Monitoring cycle could not be saved ({}: {}), computed status was {}",
                    operation,
                    message,
                    report.map(|r| r.summary()).unwrap_or_else(|| "unknown".to_string())
                );
            }
            Err(e) => {
                tracing::error!("Monitoring cycle failed: {}", e);
            }
        }
    }

    async fn log_uptime(&self) {
        match self.service.house_uptime().await {
            Ok(Some(uptime)) => tracing::info!(
                "Power status unchanged for {} (since {})",
                uptime.duration.to_human_readable(),
                uptime.since
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!("Error calculating uptime: {:?}", e),
        }
    }
}
