//! Home Assistant MQTT discovery.
//!
//! Every device is announced once at `<prefix>/sensor/<device>/config`. Each
//! reading becomes a sensor. Its discovery config is published once, its
//! state whenever the reading is dirty. A Home Assistant restart (`online` on
//! `<prefix>/status`) forgets what was announced so that discovery is
//! published again.

use crate::{
    sources::winet::Device,
    status::{Reading, StatusTable, Value},
    targets::{
        metric_publisher::MetricPublisher,
        mqtt::{
            mqtt_config::MqttConfig,
            mqtt_wrapper::{MqttWrapper, PublishEvent, QoS},
        },
    },
};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver};

const MANUFACTURER: &str = "Sungrow";
const TEXT_SENSORS: &[&str] = &["battery_operation_status", "running_status"];

#[derive(Debug, Serialize)]
struct DeviceInfo<'a> {
    name: String,
    identifiers: Vec<String>,
    model: &'a str,
    manufacturer: &'static str,
}

#[derive(Debug, Serialize)]
struct DeviceConfig<'a> {
    #[serde(rename = "~")]
    base: String,
    name: String,
    unique_id: String,
    state_topic: &'static str,
    device: DeviceInfo<'a>,
}

#[derive(Debug, Serialize)]
struct SensorConfig<'a> {
    name: &'a str,
    state_topic: String,
    unique_id: String,
    value_template: &'static str,
    device: DeviceInfo<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
}

/// Home Assistant's spelling of a Winet unit.
fn ha_unit(unit: &str) -> &str {
    match unit {
        "kWp" => "kW",
        "℃" => "°C",
        "kvar" => "var",
        "kVA" => "VA",
        other => other,
    }
}

/// Converts a value to the unit returned by [`ha_unit`].
fn ha_value(unit: &str, value: &Value) -> Value {
    match (unit, value) {
        ("kvar" | "kVA", Value::Number(n)) => Value::Number(n * 1000.),
        _ => value.clone(),
    }
}

fn device_class(unit: &str) -> Option<&'static str> {
    match unit {
        "W" | "kW" => Some("power"),
        "V" => Some("voltage"),
        "A" => Some("current"),
        "kWh" => Some("energy"),
        "℃" => Some("temperature"),
        "kvar" | "var" => Some("reactive_power"),
        "Hz" => Some("frequency"),
        "%" => Some("battery"),
        _ => None,
    }
}

fn is_text_sensor(slug: &str) -> bool {
    TEXT_SENSORS.contains(&slug)
}

fn device_info(device: &Device) -> DeviceInfo<'_> {
    DeviceInfo {
        name: format!("{} {}", device.dev_model, device.dev_sn),
        identifiers: vec![format!("{}_{}", device.dev_model, device.dev_sn)],
        model: &device.dev_model,
        manufacturer: MANUFACTURER,
    }
}

pub struct HomeAssistant<MQTT: MqttWrapper> {
    client: MQTT,
    config: MqttConfig,
    incoming: Receiver<PublishEvent>,
    registered_devices: HashSet<u32>,
    configured_sensors: HashSet<String>,
}

impl<MQTT: MqttWrapper> HomeAssistant<MQTT> {
    pub fn new(config: &MqttConfig) -> Self {
        let (tx, rx) = channel();
        let mut client = MQTT::new(config, tx);
        let status_topic = format!("{}/status", config.discovery_prefix);
        if let Err(e) = client.subscribe(&status_topic, QoS::AtMostOnce) {
            warn!("could not subscribe to {status_topic}: {e:?}");
        }
        Self {
            client,
            config: config.clone(),
            incoming: rx,
            registered_devices: HashSet::new(),
            configured_sensors: HashSet::new(),
        }
    }

    fn sensor_topic(&self, device_slug: &str, slug: &str) -> String {
        format!(
            "{}/sensor/{}/{}",
            self.config.discovery_prefix, device_slug, slug
        )
    }

    fn check_restart(&mut self) {
        let status_topic = format!("{}/status", self.config.discovery_prefix);
        let restarted = self
            .incoming
            .try_iter()
            .filter(|event| event.topic == status_topic && event.payload.as_ref() == b"online")
            .count()
            > 0;
        if restarted {
            info!("Home Assistant restarted, republishing discovery");
            self.registered_devices.clear();
            self.configured_sensors.clear();
        }
    }

    fn register_device(&mut self, device: &Device, device_slug: &str) -> bool {
        let base = format!("{}/sensor/{}", self.config.discovery_prefix, device_slug);
        let config = DeviceConfig {
            name: format!("{} {}", device.dev_model, device.dev_sn),
            unique_id: device_slug.to_lowercase(),
            state_topic: "~/state",
            device: device_info(device),
            base,
        };

        let payload = match serde_json::to_string(&config) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("could not serialize device config: {e}");
                return false;
            }
        };
        match self.client.publish(
            format!("{}/config", config.base),
            QoS::AtLeastOnce,
            true,
            payload,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!("mqtt error: {e:?}");
                false
            }
        }
    }

    fn publish_config(&mut self, device: &Device, device_slug: &str, reading: &Reading) {
        let topic = self.sensor_topic(device_slug, &reading.slug);
        let text = is_text_sensor(&reading.slug);
        let numeric = reading.value.as_number().is_some();

        let state_class = if text {
            None
        } else if reading.unit == "kWh" {
            Some("total_increasing")
        } else {
            Some("measurement")
        };
        let device_class = if reading.slug == "total_power_factor" {
            Some("power_factor")
        } else {
            device_class(&reading.unit)
        };

        let config = SensorConfig {
            name: reading.name.trim(),
            state_topic: format!("{topic}/state"),
            unique_id: format!("{device_slug}_{}", reading.slug).to_lowercase(),
            value_template: if numeric {
                "{{ value_json.value | float }}"
            } else {
                "{{ value_json.value }}"
            },
            device: device_info(device),
            encoding: text.then_some("utf-8"),
            unit_of_measurement: (!text).then(|| ha_unit(&reading.unit)),
            state_class,
            device_class,
        };

        match serde_json::to_string(&config) {
            Ok(payload) => {
                debug!("Configuring sensor {topic}");
                if let Err(e) =
                    self.client
                        .publish(format!("{topic}/config"), QoS::AtLeastOnce, true, payload)
                {
                    warn!("mqtt error: {e:?}")
                }
            }
            Err(e) => warn!("could not serialize sensor config: {e}"),
        }
    }

    fn publish_state(&mut self, device_slug: &str, reading: &Reading) {
        let topic = format!("{}/state", self.sensor_topic(device_slug, &reading.slug));
        let payload = if is_text_sensor(&reading.slug) {
            json!({ "value": reading.value.to_string() })
        } else {
            json!({
                "value": ha_value(&reading.unit, &reading.value),
                "unit_of_measurement": ha_unit(&reading.unit),
            })
        };
        debug!("Publishing to {} value: {}", topic, payload);
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_string())
        {
            warn!("mqtt error: {e:?}")
        }
    }
}

impl<MQTT: MqttWrapper> MetricPublisher for HomeAssistant<MQTT> {
    fn publish(&mut self, devices: &[Device], status: &StatusTable) {
        self.check_restart();

        let mut configured = 0;
        let mut updated = 0;
        for device in devices {
            let Some(readings) = status.device(device.dev_id) else {
                continue;
            };
            let device_slug = device.slug(self.config.serial_alias(&device.dev_sn));

            if !self.registered_devices.contains(&device.dev_id)
                && self.register_device(device, &device_slug)
            {
                info!("Registered device: {device_slug}");
                self.registered_devices.insert(device.dev_id);
            }

            for reading in readings.iter() {
                let sensor = format!("{device_slug}_{}", reading.slug);
                if !self.configured_sensors.contains(&sensor) {
                    self.publish_config(device, &device_slug, reading);
                    self.configured_sensors.insert(sensor);
                    configured += 1;
                }
                if reading.dirty {
                    self.publish_state(&device_slug, reading);
                    updated += 1;
                }
            }
        }

        if configured > 0 {
            info!("Configured {configured} sensors");
        }
        if updated > 0 {
            info!("Updated {updated} sensors");
        }
    }
}
