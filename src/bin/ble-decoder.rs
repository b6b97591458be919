//! BLE gateway decoder service.
//!
//! Subscribes to the raw gateway topics, decodes each advertisement for
//! known devices, and republishes per-metric values on the structured
//! decoder topic tree. Designed to run under a process manager, hence
//! the strict exit codes.

use clap::Parser;
use iot_ops::overrides::{OverrideStore, StoreError};
use iot_ops::{gateway, pipeline, registry};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Site name used in subscription and output topics.
    #[arg(long, env = "SHOWSITE_NAME", default_value = "demo_showsite")]
    site: String,

    /// MQTT broker host.
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port.
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    /// Device registry API endpoint.
    #[arg(long, env = "DEVICE_API_URL", default_value = registry::DEFAULT_API_URL)]
    api_url: String,

    /// Path to the device override file.
    #[arg(long, env = "DEVICE_OVERRIDES_FILE", default_value = "device-overrides.json")]
    overrides: PathBuf,
}

#[derive(Error, Debug)]
enum DecoderError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("mqtt request failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

async fn run(options: Options) -> Result<(), DecoderError> {
    let store = OverrideStore::new(options.overrides.clone());
    let overrides = store.load()?;
    let (devices, remote_ok) = registry::load_merged(&options.api_url, &overrides);
    info!(
        devices = devices.len(),
        remote_ok,
        site = %options.site,
        "registry loaded"
    );

    let client_id = format!("iot-ops-decoder-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &options.mqtt_host, options.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);

    for pattern in gateway::subscription_patterns(&options.site) {
        client.subscribe(pattern, QoS::AtLeastOnce).await?;
    }

    loop {
        let event = tokio::select! {
            event = eventloop.poll() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = client.disconnect().await;
                return Ok(());
            }
        };
        let publish = match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => publish,
            Ok(_) => continue,
            Err(e) => {
                // the event loop reconnects on the next poll
                error!(error = %e, "broker connection lost, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let Some(message) =
            pipeline::process_message(&options.site, &devices, &publish.topic, &publish.payload)
        else {
            continue;
        };
        info!(
            device = %message.device_name,
            room = %message.room,
            mac = %message.mac,
            temp_f = message.reading.temp_f,
            humidity = message.reading.humidity,
            "decoded"
        );
        for (topic, payload) in &message.publishes {
            if let Err(e) = client
                .publish(topic.as_str(), QoS::AtLeastOnce, false, payload.clone().into_bytes())
                .await
            {
                warn!(topic, error = %e, "publish failed");
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Clean exit codes for process managers monitoring exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let options = Options::parse();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
