use std::sync::Arc;

use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions, mqttbytes::v5::ConnectProperties};

use super::MqttSender;

//Publish-only client. The event loop must be polled via `run` for messages to leave the process.
pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
}

impl Mqtt {
    pub fn connect(host: &str, port: u16, client_id: &str) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(::std::time::Duration::from_secs(5));
        mqttoptions.set_clean_start(false);

        let mut connect_props = ConnectProperties::new();
        connect_props.session_expiry_interval = 60.into();
        connect_props.max_packet_size = Some(1024 * 1024);
        mqttoptions.set_connect_properties(connect_props);

        let (client, event_loop) = AsyncClient::new(mqttoptions, 32);

        Mqtt {
            client: Arc::new(client),
            event_loop,
        }
    }

    pub fn sender(&self, base_topic: impl Into<String>) -> MqttSender {
        MqttSender::new(self.client.clone(), base_topic)
    }

    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(event) => {
                    tracing::trace!("MQTT event: {:?}", event);
                }
                Err(e) => {
                    tracing::error!("MQTT error: {}", e);
                    //connection errors are returned immediately, avoid spinning until the broker is back
                    tokio::time::sleep(::std::time::Duration::from_secs(2)).await;
                }
            }
        }
    }
}
