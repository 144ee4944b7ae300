use super::config::WinetConfig;
use anyhow::Context;
use log::{info, warn};
use std::collections::HashMap;
use std::time::Duration;

/// Translation of Winet `I18N_*` keys into display text.
pub trait TextLookup {
    fn lookup(&self, key: &str) -> Option<&str>;
}

/// Contents of a Winet `<lang>.properties` file.
#[derive(Debug, Clone, Default)]
pub struct Properties(HashMap<String, String>);

impl Properties {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim_end_matches('\r')))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TextLookup for Properties {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Downloads the translation table. Unless `ssl` is configured, plaintext is
/// tried first and HTTPS is used as a fallback. Returns the table and whether
/// TLS was needed to get it.
pub async fn fetch_properties(config: &WinetConfig) -> anyhow::Result<(Properties, bool)> {
    let client = reqwest::Client::builder()
        // Winet ships a self-signed certificate
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()?;

    let properties = match config.ssl {
        Some(ssl) => (fetch(&client, config, ssl).await?, ssl),
        None => match fetch(&client, config, false).await {
            Ok(properties) => (properties, false),
            Err(e) => {
                warn!("Newer Winet versions require SSL to be enabled, retrying: {e:#}");
                (fetch(&client, config, true).await?, true)
            }
        },
    };
    info!("Fetched {} i18n properties", properties.0.len());
    Ok(properties)
}

async fn fetch(
    client: &reqwest::Client,
    config: &WinetConfig,
    ssl: bool,
) -> anyhow::Result<Properties> {
    let url = format!(
        "{}://{}/i18n/{}.properties",
        if ssl { "https" } else { "http" },
        config.host,
        config.lang
    );
    let text = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("could not fetch {url}"))?
        .text()
        .await?;
    Ok(Properties::parse(&text))
}
