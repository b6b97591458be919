//! Grafana dashboard backup, restore, and provisioning.
//!
//! Dashboards are handled as untyped JSON. Grafana's schema churns
//! between releases and the tools only touch a handful of top-level
//! fields (`uid`, `title`, `id`, `version`), so a typed model would buy
//! nothing.
//!
//! Backups land in per-session directories named by timestamp under one
//! base directory; the restore and provision pickers walk those sessions
//! newest first.

use crate::prompt;
use chrono::{DateTime, Local};
use rand::Rng;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const API_TIMEOUT: Duration = Duration::from_secs(10);
const V2BETA1_API_VERSION: &str = "dashboard.grafana.app/v2beta1";
const PROVISION_PREFIX: &str = "[P] ";

static UNSAFE_CHARS: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^\w\s-]").expect("static regex"));
static SEPARATOR_RUNS: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[-\s]+").expect("static regex"));

#[derive(Error, Debug)]
pub enum GrafanaError {
    #[error("grafana request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
    #[error("invalid dashboard JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("duplicate dashboard title '{title}' in {}", .files.join(", "))]
    DuplicateTitle { title: String, files: Vec<String> },
    #[error(transparent)]
    Prompt(#[from] io::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> GrafanaError + '_ {
    move |source| GrafanaError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Connection settings for the Grafana HTTP API.
#[derive(Debug, Clone)]
pub struct GrafanaConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// One row from the dashboard search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSummary {
    pub uid: Option<String>,
    #[serde(default = "untitled")]
    pub title: String,
}

fn untitled() -> String {
    "Untitled".to_string()
}

/// Result of posting a dashboard.
#[derive(Debug, Clone, Deserialize)]
pub struct PostResult {
    pub uid: String,
    #[serde(default)]
    pub url: String,
}

/// Thin blocking client over the three dashboard endpoints the tools
/// need.
pub struct GrafanaClient {
    http: Client,
    config: GrafanaConfig,
}

impl GrafanaClient {
    pub fn new(config: GrafanaConfig) -> Result<Self, GrafanaError> {
        let http = Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    fn get(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.config.url))
            .basic_auth(&self.config.user, Some(&self.config.password))
    }

    pub fn search_dashboards(&self) -> Result<Vec<DashboardSummary>, GrafanaError> {
        Ok(self
            .get("/api/search?type=dash-db")
            .send()?
            .error_for_status()?
            .json()?)
    }

    /// Fetch the dashboard model for a UID, without the `meta` envelope.
    pub fn get_dashboard(&self, uid: &str) -> Result<Value, GrafanaError> {
        let mut envelope: Value = self
            .get(&format!("/api/dashboards/uid/{uid}"))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(envelope
            .get_mut("dashboard")
            .map(Value::take)
            .unwrap_or(envelope))
    }

    pub fn post_dashboard(&self, dashboard: &Value) -> Result<PostResult, GrafanaError> {
        Ok(self
            .http
            .post(format!("{}/api/dashboards/db", self.config.url))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&json!({
                "dashboard": dashboard,
                "overwrite": false,
                "message": "Restored from backup",
            }))
            .send()?
            .error_for_status()?
            .json()?)
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }
}

/// Title sanitized for use in a filename: lowercase, word chars only,
/// runs of spaces and dashes collapsed, capped at 50 chars.
pub fn sanitize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let cleaned = UNSAFE_CHARS.replace_all(&lower, "");
    let mut safe = SEPARATOR_RUNS
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string();
    safe.truncate(50);
    safe
}

pub fn backup_filename(title: &str, uid: &str, timestamp: &str) -> String {
    format!("dashboard-{}-{uid}-{timestamp}.json", sanitize_title(title))
}

/// UID for a restored copy: first four chars of the original plus a
/// month-day-hour-minute suffix, so repeated restores don't collide with
/// the live dashboard or each other.
pub fn restore_uid(original_uid: &str, now: DateTime<Local>) -> String {
    // UIDs are user-settable, so count chars rather than bytes
    let mut prefix: String = original_uid.chars().take(4).collect();
    if prefix.is_empty() {
        prefix.push_str("rest");
    }
    format!("{prefix}-{}", now.format("%m%d%H%M"))
}

/// Random 8-char UID in Grafana's own style.
pub fn random_uid() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Unwrap a `dashboard.grafana.app/v2beta1` export down to the legacy
/// dashboard JSON. Anything else passes through untouched.
pub fn unwrap_v2beta1(data: Value) -> Value {
    if data.get("apiVersion").and_then(Value::as_str) != Some(V2BETA1_API_VERSION) {
        return data;
    }
    match data.get("spec") {
        Some(spec) => spec.clone(),
        None => {
            warn!("v2beta1 export without a spec field");
            data
        }
    }
}

/// Strip instance-specific metadata and pin the version to 1 so Grafana
/// manages it from first load.
pub fn clean_metadata(data: &mut Value) {
    if let Some(obj) = data.as_object_mut() {
        for field in ["id", "version", "iteration"] {
            obj.remove(field);
        }
        obj.insert("version".to_string(), json!(1));
    }
}

/// Provisioned titles carry a `[P] ` prefix so they are recognizable in
/// the Grafana UI next to their editable twins.
pub fn provision_title(original: &str, custom: Option<&str>) -> String {
    let base = custom.unwrap_or(original);
    if base.to_lowercase().starts_with("[p]") {
        base.to_string()
    } else {
        format!("{PROVISION_PREFIX}{base}")
    }
}

fn read_dashboard_file(path: &Path) -> Result<Value, GrafanaError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let mut data: Value = serde_json::from_str(&text).map_err(|source| GrafanaError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    // tolerate backups saved with the API envelope still around them
    if let Some(inner) = data.get_mut("dashboard") {
        return Ok(inner.take());
    }
    Ok(data)
}

/// Back up every dashboard into a new session directory under `base`.
/// Returns the number written; individual fetch failures are reported
/// and skipped.
pub fn backup(
    client: &GrafanaClient,
    base: &Path,
    now: DateTime<Local>,
    out: &mut impl Write,
) -> Result<usize, GrafanaError> {
    let session = base.join(now.format("%Y%m%d-%H%M%S").to_string());
    fs::create_dir_all(&session).map_err(io_err(&session))?;

    writeln!(out, "Grafana Dashboard Backup")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "Grafana URL: {}", client.base_url())?;
    writeln!(out, "Backup directory: {}\n", session.display())?;

    let dashboards = client.search_dashboards()?;
    if dashboards.is_empty() {
        writeln!(out, "No dashboards found.")?;
        return Ok(0);
    }
    writeln!(out, "Found {} dashboard(s)\n", dashboards.len())?;

    let timestamp = now.format("%Y%m%d-%H%M%S").to_string();
    let mut written = 0;
    for dash in &dashboards {
        let Some(uid) = dash.uid.as_deref() else {
            writeln!(out, "  Skipping '{}' (no UID)", dash.title)?;
            continue;
        };
        writeln!(out, "  Backing up: {} (uid: {uid})", dash.title)?;
        let data = match client.get_dashboard(uid) {
            Ok(data) => data,
            Err(e) => {
                writeln!(out, "    failed to fetch: {e}")?;
                continue;
            }
        };
        let path = session.join(backup_filename(&dash.title, uid, &timestamp));
        let text = serde_json::to_string_pretty(&data).map_err(|source| GrafanaError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(io_err(&path))?;
        written += 1;
    }

    writeln!(out, "\nBacked up {written} of {} dashboard(s)", dashboards.len())?;
    Ok(written)
}

/// Walk session directories newest first and let the user pick one
/// backup file. `None` when nothing exists or the user quits.
pub fn pick_backup(
    base: &Path,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<Option<PathBuf>, GrafanaError> {
    if !base.exists() {
        writeln!(out, "Backup directory not found: {}", base.display())?;
        writeln!(out, "Run a backup first.")?;
        return Ok(None);
    }

    let mut sessions: Vec<PathBuf> = fs::read_dir(base)
        .map_err(io_err(base))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    sessions.sort();
    sessions.reverse();

    let mut choices = Vec::new();
    writeln!(out, "Available dashboard backups (grouped by backup session):")?;
    writeln!(out, "{}", "=".repeat(70))?;
    for session in &sessions {
        let mut files: Vec<PathBuf> = fs::read_dir(session)
            .map_err(io_err(session))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("dashboard-") && n.ends_with(".json"))
            })
            .collect();
        if files.is_empty() {
            continue;
        }
        files.sort();
        writeln!(
            out,
            "\nBackup session: {}",
            session.file_name().and_then(|n| n.to_str()).unwrap_or("?")
        )?;
        writeln!(out, "{}", "-".repeat(70))?;
        for file in files {
            choices.push(file.clone());
            writeln!(
                out,
                "  {:2}. {}",
                choices.len(),
                file.file_name().and_then(|n| n.to_str()).unwrap_or("?")
            )?;
        }
    }

    if choices.is_empty() {
        writeln!(out, "\nNo dashboard files found in backup folders.")?;
        return Ok(None);
    }
    writeln!(out)?;
    Ok(
        prompt::select_index(input, out, "Select backup number: ", choices.len())?
            .map(|i| choices[i].clone()),
    )
}

/// Restore a backup as a new editable dashboard with a fresh UID.
pub fn restore(
    client: &GrafanaClient,
    path: &Path,
    now: DateTime<Local>,
    out: &mut impl Write,
) -> Result<PostResult, GrafanaError> {
    let mut data = read_dashboard_file(path)?;

    let title = data
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Untitled")
        .to_string();
    let original_uid = data
        .get("uid")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    writeln!(out, "\nGrafana Dashboard Restore")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "Input: {}", path.display())?;
    writeln!(out, "Dashboard: {title}")?;
    writeln!(out, "Original UID: {original_uid}\n")?;

    let new_uid = restore_uid(&original_uid, now);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("uid".to_string(), json!(new_uid));
        obj.remove("id");
        obj.remove("version");
    }

    writeln!(out, "Restoring with new UID: {new_uid}")?;
    let result = client.post_dashboard(&data)?;
    writeln!(out, "\nDashboard restored.")?;
    writeln!(out, "  Title: {title}")?;
    writeln!(out, "  UID: {}", result.uid)?;
    writeln!(out, "  URL: {}{}", client.base_url(), result.url)?;
    Ok(result)
}

/// Files in the provisioning dir whose dashboard title matches
/// `proposed` case-insensitively. Grafana refuses duplicate titles.
pub fn duplicate_titles(provision_dir: &Path, proposed: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(provision_dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| {
            let data: Value = serde_json::from_str(&fs::read_to_string(&p).ok()?).ok()?;
            let title = data.get("title")?.as_str()?;
            (title.to_lowercase() == proposed.to_lowercase())
                .then(|| p.file_name()?.to_str().map(str::to_string))
                .flatten()
        })
        .collect()
}

/// Convert a backup or export into a provisioning file.
///
/// Unwraps v2beta1 exports, strips instance metadata, prompts for title,
/// UID, and filename, refuses duplicate titles, then writes into the
/// provisioning directory for Grafana to auto-load.
pub fn provision(
    path: &Path,
    provision_dir: &Path,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<PathBuf, GrafanaError> {
    let mut data = unwrap_v2beta1(read_dashboard_file(path)?);
    clean_metadata(&mut data);

    let original_title = data
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("untitled")
        .to_string();
    let original_uid = data
        .get("uid")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if original_uid.is_empty() {
        writeln!(out, "Warning: dashboard has no UID")?;
    }

    writeln!(out, "\nCustomization Options:")?;
    writeln!(out, "{}", "-".repeat(50))?;
    writeln!(out, "Current title: {original_title}")?;
    let custom_title = prompt::prompt(
        input,
        out,
        "Enter new title (without [P] prefix) or press Enter to keep current: ",
    )?
    .filter(|t| !t.is_empty());

    writeln!(out, "\nCurrent UID: {original_uid}")?;
    let custom_uid = prompt::prompt(
        input,
        out,
        "Enter custom UID (e.g. 'sensor-v2') or press Enter for random: ",
    )?
    .filter(|u| !u.is_empty());

    let title = provision_title(&original_title, custom_title.as_deref());
    let default_filename = format!("dashboard-{}", sanitize_title(&title));
    writeln!(out, "\nDefault filename: {default_filename}.json")?;
    let filename = prompt::prompt(
        input,
        out,
        "Enter custom filename (without .json) or press Enter for default: ",
    )?
    .filter(|f| !f.is_empty())
    .unwrap_or(default_filename);

    let uid = custom_uid.unwrap_or_else(random_uid);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("title".to_string(), json!(title));
        obj.insert("uid".to_string(), json!(uid));
    }

    fs::create_dir_all(provision_dir).map_err(io_err(provision_dir))?;
    let duplicates = duplicate_titles(provision_dir, &title);
    if !duplicates.is_empty() {
        return Err(GrafanaError::DuplicateTitle {
            title,
            files: duplicates,
        });
    }

    let output_path = provision_dir.join(format!("{filename}.json"));
    let text = serde_json::to_string_pretty(&data).map_err(|source| GrafanaError::Json {
        path: output_path.clone(),
        source,
    })?;
    fs::write(&output_path, text).map_err(io_err(&output_path))?;

    writeln!(out, "\nProvisioned: {}", output_path.display())?;
    writeln!(out, "  Title: {title}")?;
    writeln!(out, "  UID: {uid}")?;
    writeln!(out, "Grafana will auto-load it on its next provisioning pass.")?;
    Ok(output_path)
}

/// Pick a provisioned dashboard, confirm, and remove its file. Grafana
/// drops the dashboard on its next provisioning pass.
pub fn deprovision(
    provision_dir: &Path,
    path: Option<&Path>,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<bool, GrafanaError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let mut files: Vec<PathBuf> = fs::read_dir(provision_dir)
                .map_err(io_err(provision_dir))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            if files.is_empty() {
                writeln!(out, "No provisioned dashboards found.")?;
                writeln!(out, "Location: {}", provision_dir.display())?;
                return Ok(false);
            }

            writeln!(out, "Provisioned Dashboards:")?;
            writeln!(out, "{}", "=".repeat(70))?;
            for (i, file) in files.iter().enumerate() {
                let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("?");
                match read_dashboard_file(file) {
                    Ok(data) => {
                        writeln!(
                            out,
                            "  {:2}. {}",
                            i + 1,
                            data.get("title").and_then(Value::as_str).unwrap_or("Unknown")
                        )?;
                        writeln!(out, "      File: {name}")?;
                        writeln!(
                            out,
                            "      UID: {}",
                            data.get("uid").and_then(Value::as_str).unwrap_or("no-uid")
                        )?;
                    }
                    Err(_) => writeln!(out, "  {:2}. {name}", i + 1)?,
                }
                writeln!(out)?;
            }
            match prompt::select_index(input, out, "Select dashboard number: ", files.len())? {
                Some(i) => files[i].clone(),
                None => return Ok(false),
            }
        }
    };

    writeln!(
        out,
        "Dashboard to deprovision: {}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
    )?;
    writeln!(out, "Location: {}\n", path.display())?;
    if !prompt::confirm(input, out, "Are you sure you want to remove this dashboard? (yes/no): ")? {
        writeln!(out, "Cancelled.")?;
        return Ok(false);
    }

    fs::remove_file(&path).map_err(io_err(&path))?;
    writeln!(out, "\nDashboard removed from provisioning directory.")?;
    writeln!(out, "Grafana will drop it within its update interval (~10s).")?;
    Ok(true)
}
