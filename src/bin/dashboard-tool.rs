//! Grafana dashboard backup, restore, and provisioning CLI.

use chrono::Local;
use clap::{Parser, Subcommand};
use iot_ops::grafana::{self, GrafanaClient, GrafanaConfig, GrafanaError};
use std::io;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn default_backup_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backups/grafana/dashboards")
}

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Grafana base URL.
    #[arg(long, env = "GRAFANA_URL", default_value = "http://localhost:3000")]
    grafana_url: String,

    /// Grafana admin username.
    #[arg(long, env = "GRAFANA_ADMIN_USER", default_value = "admin")]
    user: String,

    /// Grafana admin password.
    #[arg(long, env = "GRAFANA_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Base directory for dashboard backups.
    #[arg(long, env = "DASHBOARD_BACKUP_DIR", default_value_os_t = default_backup_dir())]
    backup_dir: PathBuf,

    /// Grafana provisioning dashboards directory.
    #[arg(
        long,
        env = "DASHBOARD_PROVISION_DIR",
        default_value = "grafana/provisioning/dashboards"
    )]
    provision_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up all dashboards into a new session directory.
    Backup,
    /// Restore a backup as a new editable dashboard.
    Restore {
        /// Backup file; omit for an interactive picker.
        path: Option<PathBuf>,
    },
    /// Convert a backup or export into a provisioning file.
    Provision {
        /// Input file; omit for an interactive picker over backups.
        path: Option<PathBuf>,
    },
    /// Remove a dashboard from the provisioning directory.
    Deprovision {
        /// Provisioned file; omit for an interactive picker.
        path: Option<PathBuf>,
    },
}

fn run(options: Options) -> Result<(), GrafanaError> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let client = || {
        GrafanaClient::new(GrafanaConfig {
            url: options.grafana_url.clone(),
            user: options.user.clone(),
            password: options.password.clone(),
        })
    };

    match options.command {
        Command::Backup => {
            grafana::backup(&client()?, &options.backup_dir, Local::now(), &mut out)?;
        }
        Command::Restore { path } => {
            let path = match path {
                Some(path) => path,
                None => match grafana::pick_backup(&options.backup_dir, &mut input, &mut out)? {
                    Some(path) => path,
                    None => return Ok(()),
                },
            };
            grafana::restore(&client()?, &path, Local::now(), &mut out)?;
        }
        Command::Provision { path } => {
            let path = match path {
                Some(path) => path,
                None => match grafana::pick_backup(&options.backup_dir, &mut input, &mut out)? {
                    Some(path) => path,
                    None => return Ok(()),
                },
            };
            grafana::provision(&path, &options.provision_dir, &mut input, &mut out)?;
        }
        Command::Deprovision { path } => {
            grafana::deprovision(
                &options.provision_dir,
                path.as_deref(),
                &mut input,
                &mut out,
            )?;
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
