use anyhow::Context as _;
use settings::Settings;

use crate::power::PowerMonitorRunner;

mod core;
mod network;
mod power;
mod settings;
mod switch;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() -> anyhow::Result<()> {
    let settings = Settings::new().context("Error reading configuration")?;

    settings
        .monitoring
        .init()
        .map_err(|e| anyhow::anyhow!("Error initializing monitoring: {}", e))?;

    settings.validate().context("Invalid monitor configuration")?;
    tracing::info!(
        "Monitoring {} switches ({} on backup circuit)",
        settings.switches.len(),
        settings.switches.iter().filter(|s| s.backup_connected).count()
    );

    let db_pool = settings.database.new_pool().await?;

    let power_runner = PowerMonitorRunner::new(
        db_pool,
        settings.network.clone(),
        &settings.monitor,
        settings.switches.clone(),
    )
    .await?;

    let (mqtt_exec, mqtt_publisher_exec) = match &settings.mqtt {
        Some(mqtt) => {
            let client = mqtt.new_client();
            let publisher = power_runner.new_mqtt_publisher(client.sender(settings.monitor.mqtt_topic.as_str()));
            (Some(client.run()), Some(publisher.run()))
        }
        None => {
            tracing::info!("No MQTT broker configured, power events are not published");
            (None, None)
        }
    };

    let http_server_exec = {
        let client = power_runner.client();

        async move {
            settings
                .http_server
                .run_server(move || vec![power::new_http_routes(client.clone())])
                .await
        }
    };

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = power_runner.run() => Ok(()),
        result = http_server_exec => result,
        _ = run_optional(mqtt_exec) => Ok(()),
        _ = run_optional(mqtt_publisher_exec) => Ok(()),
    )
}

async fn run_optional<F: Future<Output = ()>>(task: Option<F>) {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
