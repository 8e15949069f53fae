//! MQTT display egress
//!
//! Publishes every display snapshot as JSON to `mqtt.status_topic`
//! (default `radar/status`), retained at QoS 0 so a late subscriber
//! immediately gets the current display.

use crate::domain::types::DisplaySnapshot;
use crate::infra::config::Config;
use crate::io::display_sink::{DisplayError, DisplaySink};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttDisplay {
    client: AsyncClient,
    topic: String,
}

impl MqttDisplay {
    /// Create the client and spawn its event loop.
    ///
    /// Connection happens in the background; publishes made before the broker
    /// is reachable are queued by the client.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("radar-{}-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_display_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_display_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic: config.mqtt_status_topic().to_string() }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DisplaySink for MqttDisplay {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn show(&self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        let json = serde_json::to_vec(snapshot)?;
        self.client.publish(&self.topic, QoS::AtMostOnce, true, json).await?;
        debug!(topic = %self.topic, status = %snapshot.status.as_str(), "mqtt_display_published");
        Ok(())
    }
}
