use std::{sync::mpsc::Sender, thread, time::Duration};

use log::{debug, warn};
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, Event, Incoming, MqttOptions, Transport,
};
use winet2mqtt::targets::mqtt::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self, PublishEvent},
};

pub struct RumqttcWrapper {
    client: Client,
}

struct RumqttcQosWrapper(rumqttc::QoS);

impl From<RumqttcQosWrapper> for mqtt_wrapper::QoS {
    fn from(value: RumqttcQosWrapper) -> Self {
        match value.0 {
            rumqttc::QoS::AtMostOnce => mqtt_wrapper::QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => mqtt_wrapper::QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => mqtt_wrapper::QoS::ExactlyOnce,
        }
    }
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn tls_transport() -> Transport {
    // Use rustls-native-certs to load root certificates from the operating system.
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in native.errors {
        warn!("could not load platform cert: {e}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            debug!("skipping platform cert: {e}");
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Transport::tls_with_config(client_config.into())
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn subscribe(&mut self, topic: &str, qos: mqtt_wrapper::QoS) -> anyhow::Result<()> {
        Ok(self.client.try_subscribe(topic, match_qos(qos))?)
    }

    fn publish<S, V>(
        &mut self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // Never block the poll loop. With the broker gone the request queue
        // fills up and further messages are dropped until it drains.
        Ok(self
            .client
            .try_publish(topic, match_qos(qos), retain, payload)?)
    }

    fn new(config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self {
        let use_tls = config.tls.is_some_and(|tls| tls);

        let mut mqttoptions = MqttOptions::new(
            &config.client_id,
            &config.host,
            config.port.unwrap_or(if use_tls { 8883 } else { 1883 }),
        );
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if use_tls {
            mqttoptions.set_transport(tls_transport());
        }

        //parse the mqtt authentication options
        if let Some((username, password)) = match (&config.username, &config.password) {
            (None, None) => None,
            (None, Some(_)) => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        } {
            mqttoptions.set_credentials(username, password);
        }
        let status_topic = format!("{}/status", config.base_topic);

        mqttoptions.set_last_will(rumqttc::LastWill::new(
            &status_topic,
            "offline",
            rumqttc::QoS::ExactlyOnce,
            true,
        ));

        let (client, mut connection) = Client::new(mqttoptions, 512);

        // Birth message
        let _ = client.try_publish(&status_topic, rumqttc::QoS::ExactlyOnce, true, "online");

        thread::spawn(move || {
            // keep polling the event loop to make sure outgoing messages get sent
            // the call to .iter() blocks and suspends the thread effectively by
            // calling .recv() under the hood. This implies that the loop terminates
            // once the client unsubs
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(packet))) => {
                        let pub_event = PublishEvent {
                            topic: packet.topic,
                            qos: RumqttcQosWrapper(packet.qos).into(),
                            retain: packet.retain,
                            payload: packet.payload,
                        };
                        if pub_tx.send(pub_event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt connection error: {e}");
                        // rumqttc reconnects on the next iteration
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });
        Self { client }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;
    use winet2mqtt::targets::mqtt::mqtt_wrapper::{MqttWrapper, QoS};

    #[test]
    fn test_publish_without_broker_does_not_block() {
        let config = MqttConfig {
            host: "127.0.0.1".into(),
            port: Some(1),
            client_id: "winet-mqtt-test".into(),
            ..Default::default()
        };
        let (done_tx, done_rx) = channel();

        thread::spawn(move || {
            let (tx, _rx) = channel();
            let mut mqtt = RumqttcWrapper::new(&config, tx);
            let failed = (0..600)
                .filter(|i| {
                    mqtt.publish("winet/test", QoS::AtMostOnce, false, i.to_string())
                        .is_err()
                })
                .count();
            let _ = done_tx.send(failed);
        });

        let failed = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("publishing blocked");
        assert!(failed > 0);
    }
}
