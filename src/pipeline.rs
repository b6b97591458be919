//! The decode pipeline: registry lookup, decode dispatch, topic routing.
//!
//! `process_message` is a pure synchronous function invoked once per
//! inbound MQTT message by the subscription loop in `ble-decoder`. The
//! device map is passed in explicitly; there is no shared state between
//! invocations. A `None` result means "skip this message" (unknown
//! device, no decoder, undecodable payload) and is not an error.

use crate::gateway::{self, GatewayPayload};
use crate::model::{Model, Reading};
use crate::registry::{self, DeviceRecord};
use tracing::debug;

/// Decoder service node name in output topics.
pub const DECODER_NODE: &str = "dpx_ops_decoder";

/// Output metric names, in publish order.
pub const METRIC_TEMPERATURE: &str = "temperature";
pub const METRIC_HUMIDITY: &str = "humidity";
pub const METRIC_BATTERY: &str = "battery";
pub const METRIC_RSSI: &str = "rssi";

/// One processed message: the publishes to issue plus display context.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub source_node: String,
    pub room: String,
    pub device_name: String,
    pub mac: String,
    pub reading: Reading,
    pub rssi: Option<i32>,
    /// `(topic, payload)` pairs, one non-retained publish each.
    pub publishes: Vec<(String, String)>,
}

/// Build the base output topic for a device reading.
/// Format: `{site}/{node}/{source}/{room}/{device}/{mac}`.
pub fn base_topic(site: &str, source_node: &str, record: &DeviceRecord, mac: &str) -> String {
    format!(
        "{site}/{DECODER_NODE}/{source_node}/{room}/{device}/{mac}",
        room = record.room,
        device = record.name,
    )
}

fn metric_publishes(base: &str, reading: &Reading, rssi: Option<i32>) -> Vec<(String, String)> {
    let mut out = vec![
        (
            format!("{base}/{METRIC_TEMPERATURE}"),
            format!("{:.2}", reading.temp_f),
        ),
        (
            format!("{base}/{METRIC_HUMIDITY}"),
            format!("{:.1}", reading.humidity),
        ),
    ];
    if let Some(battery) = reading.battery {
        out.push((format!("{base}/{METRIC_BATTERY}"), battery.to_string()));
    }
    if let Some(rssi) = rssi {
        out.push((format!("{base}/{METRIC_RSSI}"), rssi.to_string()));
    }
    out
}

/// Process one inbound gateway message into its output publishes.
///
/// Pre-decoded fields are preferred; raw manufacturer data is decoded
/// per the device's model otherwise. Unknown devices and undecodable
/// payloads are skipped.
pub fn process_message(
    site: &str,
    devices: &[DeviceRecord],
    topic: &str,
    payload: &[u8],
) -> Option<DecodedMessage> {
    let payload: GatewayPayload = match serde_json::from_slice(payload) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(topic, error = %e, "malformed gateway payload");
            return None;
        }
    };

    let mac = gateway::extract_mac(topic, &payload)?;
    let record = registry::find_by_mac(devices, &mac)?;

    let reading = if let (Some(tempf), Some(hum)) = (payload.tempf, payload.hum) {
        // Gateway firmware already decoded the advertisement
        Reading {
            temp_f: tempf,
            humidity: hum,
            battery: payload.batt.or(Some(100)),
        }
    } else {
        let hex = payload.manufacturerdata.as_deref()?;
        let raw = gateway::parse_hex(hex)?;
        let model = Model::from_sku(&record.sku)?;
        model.decode(&raw)?
    };

    let source_node = gateway::source_node(topic).to_string();
    let base = base_topic(site, &source_node, record, &mac);
    let publishes = metric_publishes(&base, &reading, payload.rssi);

    Some(DecodedMessage {
        source_node,
        room: record.room.clone(),
        device_name: record.name.clone(),
        mac,
        reading,
        rssi: payload.rssi,
        publishes,
    })
}
