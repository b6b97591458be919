//! In-memory state for the scan tools.
//!
//! One `DeviceTracker` owns everything the scan modes display. It is
//! created per scan run, passed into the event loop explicitly, and
//! dropped when the run ends; nothing survives the process.

use crate::model;
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, VecDeque};
use tabled::Tabled;
use tabled::settings::Style;

/// RSSI readings kept per device for the rolling average.
const RSSI_WINDOW: usize = 10;

/// One observed BLE advertisement, already lifted out of the Bluetooth
/// stack's own types.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub mac: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// Accumulated state for one address.
#[derive(Debug, Clone)]
pub struct TrackedDevice {
    pub name: String,
    pub count: u64,
    pub last_seen: DateTime<Local>,
    rssi_window: VecDeque<i16>,
    /// Manufacturer IDs from the first detection only; later packets
    /// usually repeat the same set.
    pub manufacturer_ids: Vec<u16>,
    pub manufacturer_sample: BTreeMap<u16, Vec<u8>>,
}

impl TrackedDevice {
    fn new(now: DateTime<Local>) -> Self {
        Self {
            name: "Unknown".to_string(),
            count: 0,
            last_seen: now,
            rssi_window: VecDeque::with_capacity(RSSI_WINDOW),
            manufacturer_ids: Vec::new(),
            manufacturer_sample: BTreeMap::new(),
        }
    }

    pub fn avg_rssi(&self) -> Option<f64> {
        if self.rssi_window.is_empty() {
            return None;
        }
        Some(self.rssi_window.iter().map(|&r| f64::from(r)).sum::<f64>()
            / self.rssi_window.len() as f64)
    }

    pub fn latest_rssi(&self) -> Option<i16> {
        self.rssi_window.back().copied()
    }

    /// True for the four-probe grill thermometer.
    pub fn is_four_probe(&self) -> bool {
        self.manufacturer_ids.contains(&model::H5194_MANUFACTURER_ID)
    }

    pub fn is_govee(&self) -> bool {
        self.name.contains("Govee") || self.name.contains("GVH")
    }

    /// Decode the sampled manufacturer data for display, if a known
    /// format is present.
    pub fn decoded_sample(&self) -> Option<String> {
        for (&mfr_id, data) in &self.manufacturer_sample {
            if mfr_id == model::GOVEE_TH_MANUFACTURER_ID {
                return Some(model::describe_manufacturer_data(mfr_id, data));
            }
            if mfr_id == model::H5194_MANUFACTURER_ID {
                return model::H5194Packet::decode(data).map(|p| p.to_string());
            }
        }
        None
    }
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Device Name")]
    name: String,
    #[tabled(rename = "RSSI")]
    rssi: String,
    #[tabled(rename = "Count")]
    count: String,
    #[tabled(rename = "Data")]
    data: String,
}

/// All devices seen during one scan run, keyed by address.
#[derive(Debug, Default)]
pub struct DeviceTracker {
    devices: BTreeMap<String, TrackedDevice>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one advertisement into the tracker and return the updated
    /// state for display.
    pub fn record(&mut self, adv: &Advertisement, now: DateTime<Local>) -> &TrackedDevice {
        let device = self
            .devices
            .entry(adv.mac.clone())
            .or_insert_with(|| TrackedDevice::new(now));

        device.count += 1;
        device.last_seen = now;
        if let Some(rssi) = adv.rssi {
            if device.rssi_window.len() == RSSI_WINDOW {
                device.rssi_window.pop_front();
            }
            device.rssi_window.push_back(rssi);
        }

        if let Some(name) = &adv.name {
            device.name = name.clone();
        } else if device.name == "Unknown" {
            // fall back to the manufacturer registry for nameless devices
            if let Some(identified) = adv
                .manufacturer_data
                .keys()
                .find_map(|&id| model::identify_manufacturer(id))
            {
                device.name = identified.to_string();
            }
        }

        if device.count == 1 {
            device.manufacturer_ids = adv.manufacturer_data.keys().copied().collect();
            device.manufacturer_sample = adv.manufacturer_data.clone();
        }

        device
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, mac: &str) -> Option<&TrackedDevice> {
        self.devices.get(mac)
    }

    /// Devices sorted by average signal strength, strongest first.
    pub fn sorted_by_rssi(&self) -> Vec<(&str, &TrackedDevice)> {
        let mut devices: Vec<(&str, &TrackedDevice)> = self
            .devices
            .iter()
            .map(|(mac, device)| (mac.as_str(), device))
            .collect();
        devices.sort_by(|a, b| {
            let ra = a.1.avg_rssi().unwrap_or(f64::MIN);
            let rb = b.1.avg_rssi().unwrap_or(f64::MIN);
            rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
        });
        devices
    }

    /// Render the end-of-scan summary table. With `decode` set, known
    /// manufacturer payloads are shown decoded instead of as raw IDs.
    pub fn summary_table(&self, decode: bool) -> String {
        let rows: Vec<SummaryRow> = self
            .sorted_by_rssi()
            .into_iter()
            .map(|(mac, device)| {
                let data = if decode {
                    device.decoded_sample().unwrap_or_else(|| "-".to_string())
                } else if device.manufacturer_ids.is_empty() {
                    "-".to_string()
                } else {
                    device
                        .manufacturer_ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                SummaryRow {
                    mac: mac.to_string(),
                    name: device.name.clone(),
                    rssi: device
                        .avg_rssi()
                        .map(|r| format!("{r:.1}"))
                        .unwrap_or_else(|| "-".to_string()),
                    count: format!("{}x", device.count),
                    data,
                }
            })
            .collect();

        let mut table = tabled::Table::new(rows);
        table.with(Style::sharp());
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(mac: &str, rssi: i16) -> Advertisement {
        Advertisement {
            mac: mac.to_string(),
            name: None,
            rssi: Some(rssi),
            manufacturer_data: BTreeMap::new(),
        }
    }

    #[test]
    fn test_rssi_window_caps_at_ten() {
        let mut tracker = DeviceTracker::new();
        let now = Local::now();
        for i in 0..15 {
            tracker.record(&adv("AA:BB:CC:DD:EE:FF", -40 - i), now);
        }
        let device = tracker.get("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(device.count, 15);
        assert_eq!(device.rssi_window.len(), 10);
        // window holds the last 10 readings: -45..=-54
        assert_eq!(device.latest_rssi(), Some(-54));
        let avg = device.avg_rssi().unwrap();
        assert!((avg - (-49.5)).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_by_rssi_strongest_first() {
        let mut tracker = DeviceTracker::new();
        let now = Local::now();
        tracker.record(&adv("11:11:11:11:11:11", -80), now);
        tracker.record(&adv("22:22:22:22:22:22", -40), now);
        tracker.record(&adv("33:33:33:33:33:33", -60), now);

        let order: Vec<&str> = tracker.sorted_by_rssi().iter().map(|(m, _)| *m).collect();
        assert_eq!(
            order,
            vec!["22:22:22:22:22:22", "33:33:33:33:33:33", "11:11:11:11:11:11"]
        );
    }

    #[test]
    fn test_name_updates_and_manufacturer_fallback() {
        let mut tracker = DeviceTracker::new();
        let now = Local::now();

        let mut anonymous = adv("AA:BB:CC:DD:EE:FF", -50);
        anonymous
            .manufacturer_data
            .insert(model::APPLE_MANUFACTURER_ID, vec![0x02, 0x15]);
        tracker.record(&anonymous, now);
        assert_eq!(tracker.get("AA:BB:CC:DD:EE:FF").unwrap().name, "Apple");

        let mut named = adv("AA:BB:CC:DD:EE:FF", -50);
        named.name = Some("GVH5194_5D6AD5".to_string());
        tracker.record(&named, now);
        let device = tracker.get("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(device.name, "GVH5194_5D6AD5");
        assert!(device.is_govee());
    }

    #[test]
    fn test_manufacturer_sample_taken_on_first_detection_only() {
        let mut tracker = DeviceTracker::new();
        let now = Local::now();

        let mut first = adv("AA:BB:CC:DD:EE:FF", -50);
        first
            .manufacturer_data
            .insert(model::H5194_MANUFACTURER_ID, vec![0x01, 0x02]);
        tracker.record(&first, now);

        let mut second = adv("AA:BB:CC:DD:EE:FF", -50);
        second
            .manufacturer_data
            .insert(model::H5194_MANUFACTURER_ID, vec![0xff, 0xff]);
        tracker.record(&second, now);

        let device = tracker.get("AA:BB:CC:DD:EE:FF").unwrap();
        assert!(device.is_four_probe());
        assert_eq!(
            device.manufacturer_sample[&model::H5194_MANUFACTURER_ID],
            vec![0x01, 0x02]
        );
    }

    #[test]
    fn test_summary_table_contains_devices() {
        let mut tracker = DeviceTracker::new();
        let now = Local::now();
        let mut a = adv("AA:BB:CC:DD:EE:FF", -50);
        a.name = Some("GVH5075_1234".to_string());
        tracker.record(&a, now);

        let table = tracker.summary_table(false);
        assert!(table.contains("AA:BB:CC:DD:EE:FF"));
        assert!(table.contains("GVH5075_1234"));
        assert!(table.contains("-50.0"));
        assert!(table.contains("1x"));
    }
}
