//! Device registry administration CLI.
//!
//! Wraps the interactive admin operations: listing the merged registry,
//! editing overrides, cleaning up historical data after renames, and
//! clearing retained decoder topics.

use clap::{Parser, Subcommand};
use iot_ops::admin::{self, AdminError};
use iot_ops::influx::{DockerInflux, InfluxConfig, InfluxError, interactive_delete};
use iot_ops::mqtt::{self, MqttError};
use iot_ops::overrides::{OverrideStore, StoreError};
use iot_ops::pipeline::DECODER_NODE;
use iot_ops::registry;
use std::io::{self, Write};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Site name used in decoder topics.
    #[arg(long, env = "SHOWSITE_NAME", default_value = "demo_showsite")]
    site: String,

    /// Device registry API endpoint.
    #[arg(long, env = "DEVICE_API_URL", default_value = registry::DEFAULT_API_URL)]
    api_url: String,

    /// Path to the device override file.
    #[arg(long, env = "DEVICE_OVERRIDES_FILE", default_value = "device-overrides.json")]
    overrides: PathBuf,

    /// MQTT broker host (for clear-retained).
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port (for clear-retained).
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all devices with override markers.
    List,
    /// Rename a device (writes an override).
    Rename,
    /// Change a device's room (writes an override).
    SetRoom,
    /// Remove a device's override, reverting to API values.
    ClearOverride,
    /// Print suspect auto-generated names as JSON lines.
    CheckBad,
    /// Print the merged registry as a JSON array.
    Merge,
    /// Delete historical data for an old device name.
    DeleteDeviceData,
    /// Clear retained MQTT messages matching a topic filter.
    ClearRetained {
        /// MQTT topic filter, e.g. 'site/dpx_ops_decoder/+/+/old_name/#'.
        pattern: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Influx(#[from] InfluxError),
    #[error(transparent)]
    Mqtt(#[from] MqttError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn run(options: Options) -> Result<(), CliError> {
    let store = OverrideStore::new(options.overrides.clone());
    let overrides = store.load()?;
    let (devices, _) = registry::load_merged(&options.api_url, &overrides);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match options.command {
        Command::List => admin::list(&devices, &mut out)?,
        Command::Rename => {
            if let Some(device) = admin::select_device(&devices, &mut input, &mut out)? {
                let device = device.clone();
                admin::rename(&device, &devices, &store, &mut input, &mut out)?;
            }
        }
        Command::SetRoom => {
            if let Some(device) = admin::select_device(&devices, &mut input, &mut out)? {
                let device = device.clone();
                admin::set_room(&device, &store, &mut input, &mut out)?;
            }
        }
        Command::ClearOverride => {
            if let Some(device) = admin::select_device(&devices, &mut input, &mut out)? {
                let device = device.clone();
                admin::clear_override(&device, &store, &mut input, &mut out)?;
            }
        }
        Command::CheckBad => {
            let count = admin::check_bad(&devices, &mut out)?;
            writeln!(
                io::stderr(),
                "{count} of {} device(s) have suspect names",
                devices.len()
            )?;
        }
        Command::Merge => admin::merge_json(&devices, &mut out)?,
        Command::DeleteDeviceData => {
            let Some(device) = admin::select_device(&devices, &mut input, &mut out)? else {
                return Ok(());
            };
            let device = device.clone();
            let backend = DockerInflux::new(InfluxConfig::from_env());
            if let Some(old_name) = interactive_delete(&backend, &device, &mut input, &mut out)? {
                // retained decoder topics would resurrect the deleted series
                let filter = format!(
                    "{site}/{DECODER_NODE}/+/+/{old_name}/#",
                    site = options.site
                );
                writeln!(out, "\nClearing retained messages for '{old_name}'...")?;
                mqtt::clear_retained(&options.mqtt_host, options.mqtt_port, &filter, &mut out)?;
            }
        }
        Command::ClearRetained { pattern } => {
            mqtt::clear_retained(&options.mqtt_host, options.mqtt_port, &pattern, &mut out)?;
        }
    }
    Ok(())
}

fn main() {
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();

    let options = Options::parse();

    match run(options) {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
