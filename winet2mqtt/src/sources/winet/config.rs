use serde_derive::Deserialize;
use std::time::Duration;

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "pw8888";
const PLAIN_PORT: u16 = 8082;
const TLS_PORT: u16 = 443;
const WS_PATH: &str = "/ws/home/overview";

fn default_lang() -> String {
    "en_us".into()
}

fn default_frequency() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct WinetConfig {
    pub host: String,
    /// Overrides the default port of the selected transport
    pub port: Option<u16>,
    /// Force TLS on or off. Detected while fetching properties when unset.
    pub ssl: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Poll frequency in seconds
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    /// Terminate instead of reconnecting when the login is rejected
    #[serde(default)]
    pub exit_on_auth_failure: bool,
}

impl Default for WinetConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            ssl: None,
            username: None,
            password: None,
            lang: default_lang(),
            frequency: default_frequency(),
            exit_on_auth_failure: false,
        }
    }
}

impl WinetConfig {
    pub fn username(&self) -> &str {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USERNAME)
    }

    pub fn password(&self) -> &str {
        self.password
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PASSWORD)
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency.max(1))
    }

    pub fn endpoint(&self, ssl: bool) -> String {
        if ssl {
            format!(
                "wss://{}:{}{WS_PATH}",
                self.host,
                self.port.unwrap_or(TLS_PORT)
            )
        } else {
            format!(
                "ws://{}:{}{WS_PATH}",
                self.host,
                self.port.unwrap_or(PLAIN_PORT)
            )
        }
    }
}
