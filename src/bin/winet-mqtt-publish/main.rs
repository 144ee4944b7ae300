mod logging;
mod rumqttc_wrapper;

use anyhow::Context;
use clap::Parser;
use rumqttc_wrapper::RumqttcWrapper;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use winet2mqtt::diagnostics::LogReporter;
use winet2mqtt::sources::winet::{fetch_properties, Properties, WinetClient, WinetConfig};
use winet2mqtt::targets::metric_publisher::MetricPublisher;
use winet2mqtt::targets::mqtt::home_assistant::HomeAssistant;
use winet2mqtt::targets::mqtt::mqtt_config::MqttConfig;
use winet2mqtt::targets::mqtt::simple_mqtt::SimpleMqtt;

use log::{error, info, warn};

#[derive(Debug, Deserialize)]
struct Config {
    winet: WinetConfig,
    home_assistant: Option<MqttConfig>,
    simple_mqtt: Option<MqttConfig>,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    logging::init_logger();
    let args = Cli::parse();
    info!("Running revision: {}", env!("GIT_HASH"));

    let contents = fs::read_to_string(&args.config)
        .with_context(|| format!("could not read config file {}", args.config.display()))?;
    let config: Config = toml::from_str(&contents).context("config file is not valid toml")?;

    info!("winet host: {}", config.winet.host);

    let mut output_channels: Vec<Box<dyn MetricPublisher>> = Vec::new();
    if let Some(config) = &config.home_assistant {
        info!("Publishing to Home Assistant");
        output_channels.push(Box::new(HomeAssistant::<RumqttcWrapper>::new(config)));
    }

    if let Some(config) = &config.simple_mqtt {
        info!("Publishing to simple MQTT broker");
        output_channels.push(Box::new(SimpleMqtt::<RumqttcWrapper>::new(config)));
    }

    if output_channels.is_empty() {
        warn!("No output configured, readings will only be polled");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let (properties, ssl) = match fetch_properties(&config.winet).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Could not fetch i18n properties, using raw names: {e:#}");
                (Properties::default(), config.winet.ssl.unwrap_or(false))
            }
        };

        let mut client = WinetClient::new(
            config.winet,
            properties,
            ssl,
            Box::new(LogReporter),
            output_channels,
        );
        client.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
