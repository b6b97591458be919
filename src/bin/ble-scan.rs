//! Ad-hoc BLE scanner for sensor bring-up and debugging.
//!
//! Modes:
//! - default: timed scan with an end-of-run summary table
//! - `--quick`: short scan, then interactive device selection for a deep scan
//! - `--live`: continuously redrawn device table sorted by RSSI
//! - `--deep MAC`: per-packet monitor with change detection
//! - `--analyze MAC`: four-probe thermometer probe display

use chrono::Local;
use clap::Parser;
use colored::Colorize;
use iot_ops::mac;
use iot_ops::model::{self, H5194Packet};
use iot_ops::scan::{self, ScanError};
use iot_ops::tracker::{Advertisement, DeviceTracker};
use std::fs::File;
use std::io::{self, Write};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

const DEFAULT_SCAN_SECS: u64 = 60;
const QUICK_SCAN_SECS: u64 = 20;
const DEEP_SCAN_SECS: u64 = 120;

const CLEAR_SCREEN: &str = "\x1b[H\x1b[J";

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Quick 20s scan with interactive device selection afterwards.
    #[arg(short, long)]
    quick: bool,

    /// Live-updating device list sorted by RSSI.
    #[arg(short, long)]
    live: bool,

    /// Deep monitor a specific device (per-packet change detection).
    #[arg(short, long, value_name = "MAC")]
    deep: Option<String>,

    /// Analyze four-probe thermometer packets from a specific device.
    #[arg(short, long, value_name = "MAC")]
    analyze: Option<String>,

    /// Decode known temperature formats in scan output.
    #[arg(long)]
    decode: bool,

    /// Tee output to a log file.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Console output, optionally teed to a log file.
struct Output {
    log: Option<File>,
}

impl Output {
    fn open(path: Option<&PathBuf>) -> io::Result<Self> {
        let log = match path {
            Some(path) => {
                println!("Logging to: {}", path.display());
                Some(File::create(path)?)
            }
            None => None,
        };
        Ok(Self { log })
    }

    fn line(&mut self, msg: &str) {
        println!("{msg}");
        if let Some(file) = &mut self.log {
            let _ = writeln!(file, "{msg}");
        }
    }
}

fn matches_target(target: &str, mac: &str) -> bool {
    mac::normalize(mac).contains(&mac::normalize(target))
}

/// Per-detection line for the timed scan modes.
fn print_detection(out: &mut Output, adv: &Advertisement, device_name: &str, count: u64, avg: f64) {
    let marker = if device_name.contains("H5194") {
        "[four-probe]"
    } else if device_name.contains("Govee") || device_name.contains("GVH") {
        "[govee]"
    } else {
        ""
    };
    out.line(&format!("\n{device_name} {marker}"));
    out.line(&format!("   MAC: {}", adv.mac));
    if let Some(rssi) = adv.rssi {
        out.line(&format!("   RSSI: {rssi} dBm (avg: {avg:.1}) | Seen: {count}x"));
    }
    for (&mfr_id, data) in &adv.manufacturer_data {
        out.line(&format!(
            "   Mfr ID: {mfr_id} (0x{mfr_id:04x}) -> {}",
            model::describe_manufacturer_data(mfr_id, data)
        ));
    }
}

/// Timed scan folding advertisements into the tracker until the deadline
/// or Ctrl-C, printing one update per detection.
async fn collect(
    rx: &mut mpsc::Receiver<Advertisement>,
    tracker: &mut DeviceTracker,
    duration: Duration,
    out: &mut Output,
) {
    let deadline = Instant::now() + duration;
    loop {
        let adv = tokio::select! {
            adv = rx.recv() => match adv {
                Some(adv) => adv,
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                out.line("\nScan interrupted");
                break;
            }
        };
        let device = tracker.record(&adv, Local::now());
        let name = device.name.clone();
        let count = device.count;
        let avg = device.avg_rssi().unwrap_or(0.0);
        print_detection(out, &adv, &name, count, avg);
    }
}

async fn summary_scan(seconds: u64, decode: bool, out: &mut Output) -> Result<DeviceTracker, CliError> {
    out.line(&format!("Starting BLE scan for {seconds} seconds..."));
    out.line(&format!("Started at {}", Local::now().format("%H:%M:%S")));
    if decode {
        out.line("Temperature decoding: enabled");
    }
    out.line(&"=".repeat(70));

    let mut rx = scan::start_scan().await?;
    let mut tracker = DeviceTracker::new();
    collect(&mut rx, &mut tracker, Duration::from_secs(seconds), out).await;

    out.line(&format!(
        "\nSCAN SUMMARY - Found {} unique devices",
        tracker.len()
    ));
    out.line(&tracker.summary_table(decode));
    Ok(tracker)
}

/// Continuously redrawn table, strongest signal first.
async fn live_monitor(decode: bool, out: &mut Output) -> Result<(), CliError> {
    let mut rx = scan::start_scan().await?;
    let mut tracker = DeviceTracker::new();
    let mut redraw = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            adv = rx.recv() => match adv {
                Some(adv) => {
                    tracker.record(&adv, Local::now());
                }
                None => break,
            },
            _ = redraw.tick() => {
                print!("{CLEAR_SCREEN}");
                println!(
                    "{} - {} devices - {} (Ctrl+C to stop)\n",
                    "Live device monitor".bold(),
                    tracker.len(),
                    Local::now().format("%H:%M:%S")
                );
                println!("{}", tracker.summary_table(decode));
                io::stdout().flush()?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    out.line(&format!("\nTracked {} devices", tracker.len()));
    Ok(())
}

/// Per-packet monitor for one device with change detection on the
/// manufacturer data.
async fn deep_scan(target: &str, decode: bool, out: &mut Output) -> Result<(), CliError> {
    out.line(&"=".repeat(70));
    out.line("Deep scan running - watching for data changes");
    out.line("Insert/remove probes or change temps to see updates");
    out.line(&"=".repeat(70));

    let mut rx = scan::start_scan().await?;
    let mut previous: std::collections::BTreeMap<u16, String> = std::collections::BTreeMap::new();
    let mut packet_count: u64 = 0;
    let mut change_count: u64 = 0;
    let deadline = Instant::now() + Duration::from_secs(DEEP_SCAN_SECS);

    loop {
        let adv = tokio::select! {
            adv = rx.recv() => match adv {
                Some(adv) => adv,
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                out.line("\n\nDeep scan stopped");
                break;
            }
        };
        if !matches_target(target, &adv.mac) {
            continue;
        }
        packet_count += 1;
        if adv.manufacturer_data.is_empty() {
            out.line(&format!("[{packet_count}] No manufacturer data"));
            continue;
        }

        for (&mfr_id, data) in &adv.manufacturer_data {
            let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
            let changed = previous.get(&mfr_id) != Some(&hex);
            let marker = if changed {
                previous.insert(mfr_id, hex.clone());
                change_count += 1;
                if change_count > 1 { "CHANGED!" } else { "FIRST   " }
            } else {
                "same    "
            };

            let timestamp = Local::now().format("%H:%M:%S%.3f");
            let rssi = adv.rssi.map(|r| r.to_string()).unwrap_or_else(|| "?".into());
            out.line(&format!(
                "\n{marker} [{timestamp}] Packet #{packet_count} | RSSI: {rssi} dBm"
            ));
            out.line(&format!("   Mfr ID: {mfr_id} (0x{mfr_id:04x})"));
            out.line(&format!("   Hex: {hex}"));
            if decode && mfr_id == model::H5194_MANUFACTURER_ID
                && let Some(packet) = H5194Packet::decode(data)
            {
                out.line(&format!("   {packet}"));
            }
            out.line(&format!("   Changes: {change_count}"));
        }
    }

    out.line(&format!(
        "\nReceived {packet_count} packets, {change_count} changes detected"
    ));
    Ok(())
}

/// Probe display for the four-probe thermometer. Probe positions rotate
/// through the advertisement stream keyed by the status byte.
async fn packet_analyzer(target: &str) -> Result<(), CliError> {
    println!("Starting BLE scanner...");
    println!("   Target device: {target}");
    println!("   Waiting for four-probe packets (mfr ID {})...\n", model::H5194_MANUFACTURER_ID);

    let mut rx = scan::start_scan().await?;
    let mut probes: [Option<String>; 4] = [const { None }; 4];
    let mut packet_count: u64 = 0;

    loop {
        let adv = tokio::select! {
            adv = rx.recv() => match adv {
                Some(adv) => adv,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nAnalyzer stopped after {packet_count} packets");
                break;
            }
        };
        if !matches_target(target, &adv.mac) {
            continue;
        }
        let Some(data) = adv.manufacturer_data.get(&model::H5194_MANUFACTURER_ID) else {
            continue;
        };
        let Some(packet) = H5194Packet::decode(data) else {
            continue;
        };
        if packet_count == 0 {
            println!("Found device: {}\n", adv.mac);
        }
        packet_count += 1;

        for (slot, temp) in packet.probe_slots() {
            if let Some(temp) = temp {
                probes[slot - 1] = Some(format!("{temp:.0} F"));
            }
        }

        print!("{CLEAR_SCREEN}");
        println!("{}", "=".repeat(40));
        println!("Four-probe thermometer | Packets: {packet_count}");
        println!("{}\n", "=".repeat(40));
        for (i, probe) in probes.iter().enumerate() {
            println!("  P{}: {}", i + 1, probe.as_deref().unwrap_or("---"));
        }
        println!("\n  Status: 0x{:02x}", packet.status);
        println!("\nPress Ctrl+C to stop");
        io::stdout().flush()?;
    }
    Ok(())
}

/// After a quick scan, let the user pick a device and drop into a deep
/// scan of it.
fn pick_for_deep_scan(tracker: &DeviceTracker) -> io::Result<Option<String>> {
    let devices = tracker.sorted_by_rssi();
    if devices.is_empty() {
        return Ok(None);
    }

    println!("\n{}", "=".repeat(70));
    println!("DEVICE SELECTION - Choose device for deep scan");
    println!("{}", "=".repeat(70));
    for (i, (mac, device)) in devices.iter().enumerate() {
        let marker = if device.is_four_probe() {
            " [four-probe]".yellow()
        } else if device.is_govee() {
            " [govee]".green()
        } else {
            "".normal()
        };
        println!(
            "{:3}. {mac}  {}  {:.1} dBm  {}x{marker}",
            i + 1,
            device.name,
            device.avg_rssi().unwrap_or(0.0),
            device.count,
        );
    }
    println!("\nTIP: strongest signal (highest RSSI) = closest device");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout().lock();
    Ok(
        iot_ops::prompt::select_index(&mut input, &mut out, "\nSelect device number: ", devices.len())?
            .map(|i| devices[i].0.to_string()),
    )
}

async fn run(options: Options) -> Result<(), CliError> {
    let mut out = Output::open(options.log.as_ref())?;

    if let Some(target) = &options.deep {
        out.line(&format!("Deep monitoring: {target}"));
        return deep_scan(target, options.decode, &mut out).await;
    }
    if let Some(target) = &options.analyze {
        return packet_analyzer(target).await;
    }
    if options.live {
        return live_monitor(options.decode, &mut out).await;
    }

    let seconds = if options.quick { QUICK_SCAN_SECS } else { DEFAULT_SCAN_SECS };
    let tracker = summary_scan(seconds, options.decode, &mut out).await?;

    if options.quick && !tracker.is_empty()
        && let Some(target) = pick_for_deep_scan(&tracker)?
    {
        out.line(&format!("\nStarting deep scan of {target}"));
        return deep_scan(&target, options.decode, &mut out).await;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
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
