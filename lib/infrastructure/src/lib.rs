mod bus;
mod db;
mod http;
mod monitoring;
mod mqtt;

pub use bus::{EventBus, EventEmitter, EventListener};
pub use monitoring::MonitoringConfig;

pub use db::DatabaseConfig;
pub use http::HttpServerConfig;
pub use mqtt::{Mqtt, MqttConfig, MqttSender};

pub mod meter {
    pub use super::monitoring::meter::{increment, set};
}
