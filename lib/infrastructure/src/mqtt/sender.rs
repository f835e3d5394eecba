use std::sync::Arc;

use rumqttc::v5::{AsyncClient, mqttbytes::QoS};

#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
    base_topic: String,
}

impl MqttSender {
    pub(super) fn new(client: Arc<AsyncClient>, base_topic: impl Into<String>) -> Self {
        Self {
            client,
            base_topic: base_topic.into(),
        }
    }

    pub fn topic(&self, sub_topic: &str) -> String {
        format!("{}/{}", self.base_topic.trim_end_matches('/'), sub_topic)
    }

    pub async fn send_retained(&self, sub_topic: &str, payload: impl Into<String>) -> anyhow::Result<()> {
        self.send(self.topic(sub_topic), payload.into(), true).await
    }

    pub async fn send_transient(&self, sub_topic: &str, payload: impl Into<String>) -> anyhow::Result<()> {
        self.send(self.topic(sub_topic), payload.into(), false).await
    }

    #[tracing::instrument(skip_all, fields(topic = %topic, otel.name = format!("MQTT publish {}", topic)))]
    async fn send(&self, topic: String, payload: String, retain: bool) -> anyhow::Result<()> {
        tracing::debug!("Publishing MQTT message to {topic} (retain={retain}): {:?}", payload);

        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| {
                tracing::error!("Error publishing MQTT message to {}: {}", topic, e);
                e.into()
            })
    }
}
