//! Historical data cleanup in InfluxDB.
//!
//! After a rename the old `device_name` tag value lingers in the bucket
//! and shows up as a ghost series in dashboards. The flow here queries
//! the name history for a MAC, lets the operator pick an old name, and
//! deletes those rows. InfluxDB runs in a container without the CLI
//! exposed on the host, so both query and delete go through
//! `docker exec`.

use crate::prompt;
use crate::registry::DeviceRecord;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

const EPOCH_START: &str = "1970-01-01T00:00:00Z";
const DELETE_STOP: &str = "2030-01-01T00:00:00Z";

/// Connection settings, overridable from the environment.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            token: var("INFLUX_TOKEN", "my-super-secret-token"),
            org: var("INFLUX_ORG", "home"),
            bucket: var("INFLUX_BUCKET", "sensors"),
        }
    }
}

#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("failed to run influx CLI: {0}")]
    Io(#[from] io::Error),
    #[error("influx command failed: {stderr}")]
    Command { stderr: String },
    #[error("failed to parse query output: {0}")]
    Csv(#[from] csv::Error),
}

/// One `(device_name, room, source)` series found for a MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHistoryEntry {
    pub device_name: String,
    pub room: String,
    pub source: String,
    pub count: usize,
    pub first_seen: String,
    pub last_seen: String,
}

/// Query and delete operations against the sensor bucket. Split out as a
/// trait so the interactive flow can be driven in tests without a
/// running container.
pub trait InfluxBackend {
    fn name_history(&self, mac_suffix: &str) -> Result<Vec<NameHistoryEntry>, InfluxError>;
    fn delete(&self, predicate: &str) -> Result<(), InfluxError>;
}

/// Backend that shells out to the `influx` CLI inside the `influxdb`
/// container.
pub struct DockerInflux {
    config: InfluxConfig,
}

impl DockerInflux {
    pub fn new(config: InfluxConfig) -> Self {
        Self { config }
    }

    fn run(&self, args: &[&str]) -> Result<String, InfluxError> {
        debug!(?args, "docker exec influxdb influx");
        let output = Command::new("docker")
            .args(["exec", "influxdb", "influx"])
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(InfluxError::Command {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl InfluxBackend for DockerInflux {
    fn name_history(&self, mac_suffix: &str) -> Result<Vec<NameHistoryEntry>, InfluxError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: {EPOCH_START})
  |> filter(fn: (r) => r["_measurement"] == "mqtt_consumer")
  |> filter(fn: (r) => r["z_device_id"] =~ /{mac_suffix}$/)
  |> filter(fn: (r) => exists r.device_name)
  |> keep(columns: ["_time", "device_name", "room", "source", "z_device_id"])
"#,
            bucket = self.config.bucket,
        );
        let stdout = self.run(&[
            "query",
            "--org",
            &self.config.org,
            "--token",
            &self.config.token,
            "--raw",
            &flux,
        ])?;
        parse_history_csv(&stdout)
    }

    fn delete(&self, predicate: &str) -> Result<(), InfluxError> {
        self.run(&[
            "delete",
            "--org",
            &self.config.org,
            "--token",
            &self.config.token,
            "--bucket",
            &self.config.bucket,
            "--start",
            EPOCH_START,
            "--stop",
            DELETE_STOP,
            "--predicate",
            predicate,
        ])?;
        Ok(())
    }
}

/// Parse raw annotated-CSV query output into history entries, grouped by
/// `(device_name, room, source)` with per-group row counts and time
/// bounds. Annotation and empty lines are skipped.
pub fn parse_history_csv(raw: &str) -> Result<Vec<NameHistoryEntry>, InfluxError> {
    let data: String = raw
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(time_col), Some(name_col)) = (column("_time"), column("device_name")) else {
        return Ok(Vec::new());
    };
    let room_col = column("room");
    let source_col = column("source");

    let mut groups: BTreeMap<(String, String, String), Vec<String>> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: Option<usize>| {
            i.and_then(|i| record.get(i))
                .unwrap_or("")
                .trim()
                .to_string()
        };
        let device_name = field(Some(name_col));
        let source = field(source_col);
        if device_name.is_empty() || source.is_empty() {
            continue;
        }
        groups
            .entry((device_name, field(room_col), source))
            .or_default()
            .push(field(Some(time_col)));
    }

    Ok(groups
        .into_iter()
        .map(|((device_name, room, source), mut timestamps)| {
            timestamps.sort();
            NameHistoryEntry {
                device_name,
                room,
                source,
                count: timestamps.len(),
                first_seen: timestamps.first().cloned().unwrap_or_else(|| "unknown".into()),
                last_seen: timestamps.last().cloned().unwrap_or_else(|| "unknown".into()),
            }
        })
        .collect())
}

/// Delete predicate scoped to the device MAC, so two devices that shared
/// a name never lose each other's data.
pub fn delete_predicate(old_name: &str, room: Option<&str>, mac_suffix: &str) -> String {
    match room {
        Some(room) => format!(
            r#"device_name="{old_name}" AND room="{room}" AND z_device_id=~/{mac_suffix}$/"#
        ),
        None => format!(r#"device_name="{old_name}" AND z_device_id=~/{mac_suffix}$/"#),
    }
}

fn print_history_table(
    title: &str,
    entries: &[&NameHistoryEntry],
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(out, "{title}")?;
    writeln!(
        out,
        "  {:<25} {:<20} {:<17} {:<10} {:<25} {:<25}",
        "device_name", "room", "source", "count", "first_seen", "last_seen"
    )?;
    writeln!(out, "  {}", "-".repeat(125))?;
    for h in entries {
        writeln!(
            out,
            "  {:<25} {:<20} {:<17} {:<10} {:<25} {:<25}",
            h.device_name, h.room, h.source, h.count, h.first_seen, h.last_seen
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Interactive ghost-data deletion for one device.
///
/// Shows the name history split into current and old entries, prompts
/// for the old name (with an optional room filter when the name spans
/// rooms), dry-runs the predicates, confirms, deletes, and re-queries to
/// verify. Returns the chosen name so the caller can clear matching
/// retained MQTT topics; delete and verification failures are reported
/// but do not block that cleanup.
pub fn interactive_delete(
    backend: &impl InfluxBackend,
    device: &DeviceRecord,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<Option<String>, InfluxError> {
    let mac_suffix = device.mac.as_str();

    writeln!(out, "\nQuerying historical data for device:")?;
    writeln!(out, "  MAC: {mac_suffix}")?;
    writeln!(out, "  Current name: {}", device.name)?;
    writeln!(out, "  Current room: {}\n", device.room)?;

    let history = backend.name_history(mac_suffix)?;
    if history.is_empty() {
        writeln!(out, "No historical data found for this device.")?;
        return Ok(None);
    }

    let current: Vec<&NameHistoryEntry> =
        history.iter().filter(|h| h.device_name == device.name).collect();
    let old: Vec<&NameHistoryEntry> =
        history.iter().filter(|h| h.device_name != device.name).collect();

    if old.is_empty() {
        let rows: usize = current.iter().map(|h| h.count).sum();
        writeln!(
            out,
            "No old data to delete. All {rows} rows use current name '{}'.",
            device.name
        )?;
        return Ok(None);
    }

    writeln!(out, "Found historical data for MAC {mac_suffix}:\n")?;
    if !current.is_empty() {
        print_history_table("CURRENT NAME (keep this):", &current, out)?;
    }
    print_history_table("OLD NAME(S) (delete these to fix dashboard duplicates):", &old, out)?;

    let mut old_names: Vec<&str> = old.iter().map(|h| h.device_name.as_str()).collect();
    old_names.sort_unstable();
    old_names.dedup();
    let suggested = (old_names.len() == 1).then(|| old_names[0].to_string());
    if let Some(name) = &suggested {
        writeln!(out, "Suggestion: delete '{name}' to remove ghost data\n")?;
    }

    let old_name = loop {
        let message = match &suggested {
            Some(name) => format!("Enter device_name to delete [default: {name}] (or 'cancel'): "),
            None => "Enter device_name to delete (or 'cancel'): ".to_string(),
        };
        let entered = match prompt::prompt(input, out, &message)? {
            Some(line) => line,
            None => return Ok(None),
        };
        let candidate = if entered.is_empty() {
            match &suggested {
                Some(name) => name.clone(),
                None => continue,
            }
        } else {
            entered
        };
        if matches!(candidate.to_lowercase().as_str(), "cancel" | "c") {
            writeln!(out, "Cancelled")?;
            return Ok(None);
        }
        if candidate == device.name {
            writeln!(
                out,
                "Cannot delete CURRENT device_name '{}'. Choose an OLD name from the list above.",
                device.name
            )?;
            continue;
        }
        if !history.iter().any(|h| h.device_name == candidate) {
            writeln!(out, "device_name '{candidate}' not found in history. Try again.")?;
            continue;
        }
        break candidate;
    };

    // Room filter targets stuck data when the old name spans rooms
    let mut rooms: Vec<&str> = history
        .iter()
        .filter(|h| h.device_name == old_name)
        .map(|h| h.room.as_str())
        .collect();
    rooms.sort_unstable();
    rooms.dedup();
    let old_room = if rooms.len() > 1 {
        writeln!(
            out,
            "\nThis device_name appears in multiple rooms: {}",
            rooms.join(", ")
        )?;
        prompt::prompt(input, out, "Filter by room? [leave blank for all rooms]: ")?
            .filter(|r| !r.is_empty())
            .map(|r| crate::registry::normalize_label(&r))
    } else {
        None
    };

    let targets: Vec<&NameHistoryEntry> = history
        .iter()
        .filter(|h| {
            h.device_name == old_name && old_room.as_deref().is_none_or(|room| h.room == room)
        })
        .collect();
    let total: usize = targets.iter().map(|h| h.count).sum();

    writeln!(out, "\n{}", "=".repeat(80))?;
    writeln!(out, "DRY RUN - Will delete:")?;
    writeln!(out, "{}\n", "=".repeat(80))?;
    let predicate = delete_predicate(&old_name, old_room.as_deref(), mac_suffix);
    for h in &targets {
        writeln!(out, "Source: {}", h.source)?;
        writeln!(out, "Predicate: {predicate}")?;
        writeln!(out, "Estimated rows: {}\n", h.count)?;
    }
    writeln!(
        out,
        "Total estimated rows: {total} across {} source(s)",
        targets.len()
    )?;
    writeln!(out, "{}\n", "=".repeat(80))?;

    if !prompt::confirm(input, out, "Proceed with deletion? [y/N]: ")? {
        writeln!(out, "Cancelled")?;
        return Ok(None);
    }

    // From here on each step reports its own failure; the caller still
    // gets the chosen name so the retained-message cleanup runs.
    writeln!(out, "\nDeleting data...")?;
    match backend.delete(&predicate) {
        Ok(()) => writeln!(
            out,
            "Deleted data for device_name='{old_name}' ({total} rows across {} source(s))",
            targets.len()
        )?,
        Err(e) => {
            writeln!(out, "WARNING: delete failed: {e}")?;
            return Ok(Some(old_name));
        }
    }

    writeln!(out, "\nVerifying deletion...")?;
    match backend.name_history(mac_suffix) {
        Ok(history) => {
            let remaining: usize = history
                .iter()
                .filter(|h| {
                    h.device_name == old_name
                        && old_room.as_deref().is_none_or(|room| h.room == room)
                })
                .map(|h| h.count)
                .sum();
            if remaining > 0 {
                writeln!(out, "WARNING: {remaining} rows still present after deletion.")?;
                writeln!(out, "The collector may be replaying retained messages, or the")?;
                writeln!(out, "device is still broadcasting under the old name.")?;
            } else {
                writeln!(out, "Verification passed, no data remains for the deleted name.")?;
            }
        }
        Err(e) => writeln!(out, "WARNING: verification query failed: {e}")?,
    }

    Ok(Some(old_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacSuffix;
    use std::cell::RefCell;
    use std::io::Cursor;

    const RAW_CSV: &str = "\
#group,false,false,true,true,true\n\
#datatype,string,long,dateTime:RFC3339,string,string\n\
#default,_result,,,,\n\
,result,table,_time,device_name,room,source,z_device_id\n\
,,0,2026-01-02T00:00:00Z,old_fridge,kitchen,dpx_ops_1,AABBCCDDEEFF\n\
,,0,2026-01-01T00:00:00Z,old_fridge,kitchen,dpx_ops_1,AABBCCDDEEFF\n\
,,1,2026-02-01T00:00:00Z,fridge_sensor,kitchen,dpx_ops_1,AABBCCDDEEFF\n";

    #[test]
    fn test_parse_history_csv_groups_and_sorts() {
        let entries = parse_history_csv(RAW_CSV).unwrap();
        assert_eq!(entries.len(), 2);

        let old = entries.iter().find(|e| e.device_name == "old_fridge").unwrap();
        assert_eq!(old.count, 2);
        assert_eq!(old.first_seen, "2026-01-01T00:00:00Z");
        assert_eq!(old.last_seen, "2026-01-02T00:00:00Z");
        assert_eq!(old.room, "kitchen");
        assert_eq!(old.source, "dpx_ops_1");
    }

    #[test]
    fn test_parse_history_csv_empty_and_comments_only() {
        assert!(parse_history_csv("").unwrap().is_empty());
        assert!(parse_history_csv("#group,false\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_delete_predicate() {
        assert_eq!(
            delete_predicate("old_fridge", None, "AABBCCDDEEFF"),
            r#"device_name="old_fridge" AND z_device_id=~/AABBCCDDEEFF$/"#
        );
        assert_eq!(
            delete_predicate("old_fridge", Some("kitchen"), "AABBCCDDEEFF"),
            r#"device_name="old_fridge" AND room="kitchen" AND z_device_id=~/AABBCCDDEEFF$/"#
        );
    }

    struct FakeBackend {
        history: RefCell<Vec<NameHistoryEntry>>,
        deletes: RefCell<Vec<String>>,
    }

    impl InfluxBackend for FakeBackend {
        fn name_history(&self, _mac: &str) -> Result<Vec<NameHistoryEntry>, InfluxError> {
            Ok(self.history.borrow().clone())
        }

        fn delete(&self, predicate: &str) -> Result<(), InfluxError> {
            self.deletes.borrow_mut().push(predicate.to_string());
            // deletion takes effect for the verification pass
            self.history
                .borrow_mut()
                .retain(|h| !predicate.contains(&format!(r#"device_name="{}""#, h.device_name)));
            Ok(())
        }
    }

    fn entry(name: &str, room: &str, count: usize) -> NameHistoryEntry {
        NameHistoryEntry {
            device_name: name.to_string(),
            room: room.to_string(),
            source: "dpx_ops_1".to_string(),
            count,
            first_seen: "2026-01-01T00:00:00Z".to_string(),
            last_seen: "2026-01-02T00:00:00Z".to_string(),
        }
    }

    fn device() -> DeviceRecord {
        DeviceRecord {
            mac: MacSuffix::parse("AABBCCDDEEFF").unwrap(),
            name: "fridge_sensor".to_string(),
            room: "kitchen".to_string(),
            sku: "H5075".to_string(),
            has_override: true,
        }
    }

    #[test]
    fn test_interactive_delete_accepts_suggested_default() {
        let backend = FakeBackend {
            history: RefCell::new(vec![
                entry("fridge_sensor", "kitchen", 10),
                entry("old_fridge", "kitchen", 5),
            ]),
            deletes: RefCell::new(Vec::new()),
        };
        // empty line takes the suggestion, then confirm
        let mut input = Cursor::new(b"\ny\n" as &[u8]);
        let mut out = Vec::new();
        let deleted = interactive_delete(&backend, &device(), &mut input, &mut out).unwrap();
        assert_eq!(deleted.as_deref(), Some("old_fridge"));

        let deletes = backend.deletes.borrow();
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].contains(r#"device_name="old_fridge""#));
        assert!(deletes[0].contains("AABBCCDDEEFF"));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Verification passed"));
    }

    #[test]
    fn test_interactive_delete_refuses_current_name() {
        let backend = FakeBackend {
            history: RefCell::new(vec![
                entry("fridge_sensor", "kitchen", 10),
                entry("old_fridge", "kitchen", 5),
            ]),
            deletes: RefCell::new(Vec::new()),
        };
        // current name rejected, then explicit old name, then decline
        let mut input = Cursor::new(b"fridge_sensor\nold_fridge\nn\n" as &[u8]);
        let mut out = Vec::new();
        let deleted = interactive_delete(&backend, &device(), &mut input, &mut out).unwrap();
        assert_eq!(deleted, None);
        assert!(backend.deletes.borrow().is_empty());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Cannot delete CURRENT device_name"));
    }

    struct BrokenDeleteBackend {
        history: Vec<NameHistoryEntry>,
    }

    impl InfluxBackend for BrokenDeleteBackend {
        fn name_history(&self, _mac: &str) -> Result<Vec<NameHistoryEntry>, InfluxError> {
            Ok(self.history.clone())
        }

        fn delete(&self, _predicate: &str) -> Result<(), InfluxError> {
            Err(InfluxError::Command {
                stderr: "container not running".to_string(),
            })
        }
    }

    #[test]
    fn test_interactive_delete_failure_still_returns_name() {
        let backend = BrokenDeleteBackend {
            history: vec![
                entry("fridge_sensor", "kitchen", 10),
                entry("old_fridge", "kitchen", 5),
            ],
        };
        let mut input = Cursor::new(b"\ny\n" as &[u8]);
        let mut out = Vec::new();
        // the retained cleanup must still run, so the name comes back
        let deleted = interactive_delete(&backend, &device(), &mut input, &mut out).unwrap();
        assert_eq!(deleted.as_deref(), Some("old_fridge"));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("WARNING: delete failed"));
        assert!(text.contains("container not running"));
    }

    #[test]
    fn test_interactive_delete_no_old_data() {
        let backend = FakeBackend {
            history: RefCell::new(vec![entry("fridge_sensor", "kitchen", 10)]),
            deletes: RefCell::new(Vec::new()),
        };
        let mut input = Cursor::new(b"" as &[u8]);
        let mut out = Vec::new();
        let deleted = interactive_delete(&backend, &device(), &mut input, &mut out).unwrap();
        assert_eq!(deleted, None);
        assert!(String::from_utf8(out).unwrap().contains("No old data to delete"));
    }
}
