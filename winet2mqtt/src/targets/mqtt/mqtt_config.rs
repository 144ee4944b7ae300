use std::collections::HashMap;

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Deserializer};

fn default_topic() -> String {
    "winet".into()
}

fn default_discovery_prefix() -> String {
    "homeassistant".into()
}

fn default_client_id() -> String {
    format!(
        "winet-mqtt-{}",
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(char::from)
            .collect::<String>()
    )
}

#[derive(Debug, Deserialize, Clone, Default)]
struct SerialAliases(Vec<SerialAlias>);

#[derive(Debug, Deserialize, Clone, Default)]
struct SerialAlias {
    serial: String,
    alias: String,
}

fn deserialize_alias<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut res = HashMap::new();
    for alias in SerialAliases::deserialize(deserializer)?.0 {
        res.insert(alias.serial, alias.alias);
    }
    Ok(res)
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    #[serde(default = "default_topic")]
    pub base_topic: String,
    /// Topic prefix Home Assistant watches for discovery messages
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Maps serials to an alias
    #[serde(deserialize_with = "deserialize_alias", default)]
    pub serial_aliases: HashMap<String, String>,
}

impl MqttConfig {
    pub fn serial_alias(&self, serial: &str) -> Option<&str> {
        self.serial_aliases.get(serial).map(String::as_str)
    }
}
