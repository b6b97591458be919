//! Device registry: remote API list merged with local overrides.
//!
//! The remote device API is authoritative for what exists; the local
//! override file is authoritative for what things are called. Any field
//! present in an override replaces the remote value, and override-only
//! entries (devices the API has forgotten) are included verbatim. If the
//! remote fetch fails the registry degrades to override-only entries
//! rather than aborting.

use crate::mac::MacSuffix;
use crate::overrides::OverrideMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default device API endpoint.
pub const DEFAULT_API_URL: &str = "http://localhost:8056/api/devices";

/// Fixed timeout for registry fetches. Fail fast, never retry.
pub const API_TIMEOUT: Duration = Duration::from_secs(5);

/// A device as reported by the remote API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDevice {
    /// Colon-delimited MAC address.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

/// A merged device record. Constructed fresh on every merge; only the
/// override subset is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub mac: MacSuffix,
    pub name: String,
    pub room: String,
    pub sku: String,
    pub has_override: bool,
}

/// Errors from fetching the remote device list.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("device API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Normalize a display name or room to the topic-safe form used
/// throughout the pipeline: lowercase, spaces replaced by underscores.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace(' ', "_")
}

/// Fetch the device list from the remote API with a fixed short timeout.
pub fn fetch_remote(url: &str) -> Result<Vec<RemoteDevice>, RegistryError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(API_TIMEOUT)
        .build()?;
    let devices: Vec<RemoteDevice> = client.get(url).send()?.error_for_status()?.json()?;
    Ok(devices)
}

/// Merge the remote list with local overrides into device records.
///
/// Remote entries with unparseable ids are skipped with a warning.
/// Passing `None` for `remote` yields override-only records (degraded
/// mode). Merging is idempotent.
pub fn merge(remote: Option<&[RemoteDevice]>, overrides: &OverrideMap) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    let mut seen = BTreeSet::new();

    if let Some(remote) = remote {
        for device in remote {
            let mac = match MacSuffix::parse(&device.id) {
                Ok(mac) => mac,
                Err(e) => {
                    warn!(id = %device.id, error = %e, "skipping remote device with bad id");
                    continue;
                }
            };
            seen.insert(mac.clone());

            let mut record = DeviceRecord {
                mac: mac.clone(),
                name: normalize_label(&device.name),
                room: normalize_label(device.room.as_deref().unwrap_or("unassigned")),
                sku: device.sku.clone().unwrap_or_else(|| "unknown".to_string()),
                has_override: false,
            };

            if let Some(entry) = overrides.get(&mac) {
                if let Some(name) = &entry.name {
                    record.name = name.clone();
                }
                if let Some(room) = &entry.room {
                    record.room = room.clone();
                }
                if let Some(sku) = &entry.sku {
                    record.sku = sku.clone();
                }
                record.has_override = true;
            }

            records.push(record);
        }
    }

    // Override-only devices need at least a name to be addressable
    for (mac, entry) in overrides {
        if seen.contains(mac) {
            continue;
        }
        if let Some(name) = &entry.name {
            records.push(DeviceRecord {
                mac: mac.clone(),
                name: name.clone(),
                room: entry.room.clone().unwrap_or_else(|| "unassigned".to_string()),
                sku: entry.sku.clone().unwrap_or_else(|| "unknown".to_string()),
                has_override: true,
            });
        }
    }

    records
}

/// Fetch + merge in one step. Returns the records and whether the
/// remote API was reachable.
pub fn load_merged(api_url: &str, overrides: &OverrideMap) -> (Vec<DeviceRecord>, bool) {
    match fetch_remote(api_url) {
        Ok(remote) if !remote.is_empty() => (merge(Some(&remote), overrides), true),
        Ok(_) => {
            warn!("device API returned no devices, using overrides only");
            (merge(None, overrides), false)
        }
        Err(e) => {
            warn!(error = %e, "device API fetch failed, using overrides only");
            (merge(None, overrides), false)
        }
    }
}

/// Look up a record by an incoming device identifier (topic segment or
/// payload id). Exact fixed-length suffix matching.
pub fn find_by_mac<'a>(records: &'a [DeviceRecord], incoming: &str) -> Option<&'a DeviceRecord> {
    records.iter().find(|r| r.mac.matches(incoming))
}
