use crate::{
    sources::winet::Device,
    status::StatusTable,
    targets::{
        metric_publisher::MetricPublisher,
        mqtt::{
            mqtt_config::MqttConfig,
            mqtt_wrapper::{MqttWrapper, QoS},
        },
    },
};

use log::{debug, warn};
use std::sync::mpsc::channel;

/// Publishes every changed reading as a plain value to
/// `<base_topic>/<model>_<serial>/<slug>`.
pub struct SimpleMqtt<MQTT: MqttWrapper> {
    client: MQTT,
    config: MqttConfig,
}

impl<MQTT: MqttWrapper> SimpleMqtt<MQTT> {
    pub fn new(config: &MqttConfig) -> Self {
        let (tx, _rx) = channel();
        let client = MQTT::new(config, tx);
        Self {
            client,
            config: config.clone(),
        }
    }
}

impl<MQTT: MqttWrapper> MetricPublisher for SimpleMqtt<MQTT> {
    fn publish(&mut self, devices: &[Device], status: &StatusTable) {
        for device in devices {
            let Some(readings) = status.device(device.dev_id) else {
                continue;
            };
            let device_slug = device.slug(self.config.serial_alias(&device.dev_sn));
            let base_topic = format!("{}/{}", self.config.base_topic, device_slug);

            readings.iter().filter(|r| r.dirty).for_each(|reading| {
                let topic = format!("{base_topic}/{}", reading.slug);
                let payload = reading.value.to_string();
                debug!("Publishing to {} value: {}", topic, payload);
                if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, true, payload) {
                    warn!("mqtt error: {e:?}")
                }
            });
        }
    }
}
