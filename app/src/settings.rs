use config::{Config, ConfigError, Environment, File};
use infrastructure::{DatabaseConfig, HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::network::NetworkCommands;
use crate::power::MonitorSettings;
use crate::switch::{Switch, SwitchConfigError, validate_switches};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub mqtt: Option<MqttConfig>,
    pub http_server: HttpServerConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub network: NetworkCommands,
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub switches: Vec<Switch>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::default().separator("_").list_separator(","));

        let s = builder.build()?;
        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), SwitchConfigError> {
        self.monitor.validate()?;
        validate_switches(&self.switches)
    }
}
