use infrastructure::{EventListener, MqttSender};
use serde_json::json;

use crate::power::PowerEvent;

/// Mirrors power events to MQTT. The latest status is retained; outage transitions and
/// persistence errors are sent as plain messages.
pub struct PowerStatePublisher {
    sender: MqttSender,
    events: EventListener<PowerEvent>,
}

impl PowerStatePublisher {
    pub fn new(sender: MqttSender, events: EventListener<PowerEvent>) -> Self {
        Self { sender, events }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let (sub_topic, retained, payload) = message_for(&event);

            let payload = payload.to_string();
            let sent = if retained {
                self.sender.send_retained(sub_topic, payload).await
            } else {
                self.sender.send_transient(sub_topic, payload).await
            };

            if let Err(e) = sent {
                tracing::error!("Error publishing power event to {}: {:?}", self.sender.topic(sub_topic), e);
            }
        }

        tracing::warn!("Power event stream closed, stopping MQTT publisher");
    }
}

fn message_for(event: &PowerEvent) -> (&'static str, bool, serde_json::Value) {
    match event {
        PowerEvent::CycleCompleted { snapshot, rooms } => {
            let rooms: serde_json::Map<String, serde_json::Value> = rooms
                .iter()
                .map(|room| {
                    (
                        room.room.clone(),
                        json!({
                            "power_on": room.room_power_on,
                            "switches_online": room.switches_online,
                            "switches_total": room.switches_total,
                        }),
                    )
                })
                .collect();

            (
                "status",
                true,
                json!({
                    "status": snapshot.system_status,
                    "timestamp": snapshot.timestamp,
                    "main_power_on": snapshot.main_power_on,
                    "backup_power_on": snapshot.backup_power_on,
                    "main_switches": {
                        "online": snapshot.main_switches_online,
                        "total": snapshot.main_switches_total,
                    },
                    "backup_switches": {
                        "online": snapshot.backup_switches_online,
                        "total": snapshot.backup_switches_total,
                    },
                    "outage_id": snapshot.outage_id,
                    "rooms": rooms,
                }),
            )
        }
        PowerEvent::OutageStarted { id, status, started } => (
            "outage",
            false,
            json!({
                "event": "started",
                "outage_id": id,
                "status": status,
                "timestamp": started,
            }),
        ),
        PowerEvent::OutageEnded { id, ended } => (
            "outage",
            false,
            json!({
                "event": "ended",
                "outage_id": id,
                "timestamp": ended,
            }),
        ),
        PowerEvent::PersistenceFailed {
            operation,
            message,
            status,
            timestamp,
        } => (
            "error",
            false,
            json!({
                "operation": operation,
                "message": message,
                "status": status,
                "timestamp": timestamp,
            }),
        ),
    }
}
