use super::mqtt_config::MqttConfig;
use bytes::Bytes;
use std::sync::mpsc::Sender;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

pub trait MqttWrapper {
    // This trait provides an interface that the decouples library code from an
    // implementation of the MQTT client. On library calling code, one needs to
    // wrap the MQTT implementation, i.e. the client, in a new type that in
    // turn implements this trait. Messages arriving on subscribed topics are
    // forwarded through `pub_tx`.

    fn subscribe(&mut self, topic: &str, qos: QoS) -> anyhow::Result<()>;

    fn publish<S, V>(&mut self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;

    fn new(config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records everything published instead of talking to a broker.
    pub struct FakeMqtt {
        pub subscriptions: Vec<String>,
        pub published: Vec<PublishEvent>,
        pub pub_tx: Sender<PublishEvent>,
    }

    impl FakeMqtt {
        pub fn topics(&self) -> Vec<&str> {
            self.published.iter().map(|p| p.topic.as_str()).collect()
        }

        pub fn payload(&self, topic: &str) -> Option<String> {
            self.published
                .iter()
                .rev()
                .find(|p| p.topic == topic)
                .map(|p| String::from_utf8_lossy(&p.payload).into_owned())
        }

        /// Delivers a message as if the broker had forwarded it.
        pub fn incoming(&self, topic: &str, payload: &str) {
            self.pub_tx
                .send(PublishEvent {
                    topic: topic.into(),
                    qos: QoS::AtMostOnce,
                    retain: false,
                    payload: Bytes::copy_from_slice(payload.as_bytes()),
                })
                .unwrap();
        }
    }

    impl MqttWrapper for FakeMqtt {
        fn subscribe(&mut self, topic: &str, _qos: QoS) -> anyhow::Result<()> {
            self.subscriptions.push(topic.into());
            Ok(())
        }

        fn publish<S, V>(
            &mut self,
            topic: S,
            qos: QoS,
            retain: bool,
            payload: V,
        ) -> anyhow::Result<()>
        where
            S: Clone + Into<String>,
            V: Clone + Into<Vec<u8>>,
        {
            self.published.push(PublishEvent {
                topic: topic.into(),
                qos,
                retain,
                payload: Bytes::from(payload.into()),
            });
            Ok(())
        }

        fn new(_config: &MqttConfig, pub_tx: Sender<PublishEvent>) -> Self {
            Self {
                subscriptions: Vec::new(),
                published: Vec::new(),
                pub_tx,
            }
        }
    }
}
