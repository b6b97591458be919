//! Per-model BLE manufacturer-data decoders.
//!
//! Each decoder is a pure, total function over a byte slice: a short
//! payload or a mismatched manufacturer header yields `None` ("not this
//! model's packet"), never an error. Dispatch is an exhaustive enum over
//! the known hardware models so a new model can't silently fall through.

use std::fmt;

/// Govee temperature/humidity sensors (H5051/H507x family) advertise
/// under this company identifier (0xEC88).
pub const GOVEE_TH_MANUFACTURER_ID: u16 = 60552;

/// The H5194 four-probe thermometer uses a separate company identifier.
pub const H5194_MANUFACTURER_ID: u16 = 27229;

/// Apple company identifier; iBeacon traffic shows up on the same
/// channels and must be rejected by the Govee decoders.
pub const APPLE_MANUFACTURER_ID: u16 = 76;

/// A normalized sensor reading extracted from one advertisement.
/// Ephemeral: produced per message and immediately published.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temp_f: f64,
    pub humidity: f64,
    /// 0-100, absent when the packet carries no battery byte.
    pub battery: Option<u8>,
}

/// Known hardware models with a manufacturer-data decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    H5051,
    H5072,
    H5074,
    H5075,
    /// Four-probe thermometer; its packets carry probe temperatures,
    /// not a temp/humidity pair, and are handled by [`H5194Packet`].
    H5194,
}

impl Model {
    /// Map a device SKU string to its decoder, if one exists.
    pub fn from_sku(sku: &str) -> Option<Model> {
        match sku {
            "H5051" => Some(Model::H5051),
            "H5072" => Some(Model::H5072),
            "H5074" => Some(Model::H5074),
            "H5075" => Some(Model::H5075),
            "H5194" => Some(Model::H5194),
            _ => None,
        }
    }

    /// Decode raw manufacturer data into a temperature/humidity reading.
    pub fn decode(&self, raw: &[u8]) -> Option<Reading> {
        match self {
            Model::H5051 => decode_h5051(raw),
            Model::H5072 | Model::H5074 | Model::H5075 => decode_h507x(raw),
            Model::H5194 => None,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::H5051 => write!(f, "H5051"),
            Model::H5072 => write!(f, "H5072"),
            Model::H5074 => write!(f, "H5074"),
            Model::H5075 => write!(f, "H5075"),
            Model::H5194 => write!(f, "H5194"),
        }
    }
}

fn c_to_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// H5051: little-endian hundredths-of-degree at bytes 3-4, humidity in
/// tenths at byte 5, battery percent at byte 7.
fn decode_h5051(b: &[u8]) -> Option<Reading> {
    if b.len() < 8 {
        return None;
    }
    let temp_raw = u16::from(b[3]) | (u16::from(b[4]) << 8);
    Some(Reading {
        temp_f: c_to_f(f64::from(temp_raw) / 100.0),
        humidity: f64::from(b[5]) / 10.0,
        battery: Some(b[7]),
    })
}

/// H5072/H5074/H5075: validated `88 EC` manufacturer header, then
/// little-endian hundredths for both temperature and humidity.
///
/// TODO: recalibrate the H5075 humidity scaling against a reference
/// hygrometer; the hundredths divisor is an empirical fit, not from a
/// datasheet.
fn decode_h507x(b: &[u8]) -> Option<Reading> {
    if b.len() < 8 {
        return None;
    }
    // Apple iBeacon packets arrive on the same channels
    if b[0] == 0x4c {
        return None;
    }
    if !(b[0] == 0x88 && b[1] == 0xec) {
        return None;
    }
    let temp_raw = u16::from(b[3]) | (u16::from(b[4]) << 8);
    let hum_raw = u16::from(b[5]) | (u16::from(b[6]) << 8);
    Some(Reading {
        temp_f: c_to_f(f64::from(temp_raw) / 100.0),
        humidity: f64::from(hum_raw) / 100.0,
        battery: Some(b[7]),
    })
}

/// Byte-6 values that mean "no probe in this position".
const H5194_POS2_SENTINELS: [u8; 4] = [0xff, 0xfc, 0x08, 0x00];

/// One decoded H5194 advertisement: a status byte and up to two
/// temperature positions. Which probe each position maps to depends on
/// the status byte (see [`H5194Packet::probe_slots`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct H5194Packet {
    pub status: u8,
    /// Big-endian hundredths-of-degree Celsius at bytes 8-9, as °F.
    pub pos1_f: Option<f64>,
    /// Direct-offset Fahrenheit at byte 6.
    pub pos2_f: Option<f64>,
}

impl H5194Packet {
    /// Decode an H5194 manufacturer-data payload.
    pub fn decode(b: &[u8]) -> Option<H5194Packet> {
        if b.len() < 10 {
            return None;
        }
        let status = b[7];

        let raw = (u16::from(b[8]) << 8) | u16::from(b[9]);
        let pos1_f = (raw != 0xffff && raw > 0).then(|| c_to_f(f64::from(raw) / 100.0));

        let pos2_f = (!H5194_POS2_SENTINELS.contains(&b[6])).then(|| f64::from(b[6]) - 24.0);

        Some(H5194Packet {
            status,
            pos1_f,
            pos2_f,
        })
    }

    /// Map the two temperature positions to probe numbers (1-4) based on
    /// the status byte. Derived empirically by comparing packets to the
    /// physical probe setup.
    pub fn probe_slots(&self) -> [(usize, Option<f64>); 2] {
        match self.status {
            0x04 => [(1, self.pos1_f), (2, self.pos2_f)],
            0x84 => [(3, self.pos1_f), (2, self.pos2_f)],
            0x0c => [(2, self.pos1_f), (4, self.pos2_f)],
            0x8c => [(4, self.pos1_f), (0, None)],
            _ => [(0, None), (0, None)],
        }
    }
}

impl fmt::Display for H5194Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_pos = |t: Option<f64>| match t {
            Some(t) => format!("{t:.0}\u{b0}F"),
            None => "---".to_string(),
        };
        write!(
            f,
            "Status:0x{:02x} Pos1:{} Pos2:{}",
            self.status,
            fmt_pos(self.pos1_f),
            fmt_pos(self.pos2_f)
        )
    }
}

/// Identify a manufacturer by Bluetooth SIG company identifier.
pub fn identify_manufacturer(mfr_id: u16) -> Option<&'static str> {
    match mfr_id {
        6 => Some("Microsoft"),
        76 => Some("Apple"),
        89 => Some("Qualcomm"),
        117 => Some("Samsung"),
        171 => Some("Fitbit"),
        224 => Some("Google"),
        741 => Some("Sonos"),
        1452 => Some("Roku"),
        2456 => Some("Amazon"),
        H5194_MANUFACTURER_ID => Some("Govee (H5194)"),
        GOVEE_TH_MANUFACTURER_ID => Some("Govee (H5051/H5075)"),
        _ => None,
    }
}

/// Human-readable one-line summary of manufacturer data, for the scan
/// tools. Company-ID-keyed payloads from the OS have the two header
/// bytes already consumed, so the Govee fields sit at earlier offsets
/// than in the raw gateway hex (big-endian here).
pub fn describe_manufacturer_data(mfr_id: u16, data: &[u8]) -> String {
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();

    match mfr_id {
        GOVEE_TH_MANUFACTURER_ID if data.len() >= 7 => {
            let temp_raw = i16::from_be_bytes([data[2], data[3]]);
            let hum_raw = u16::from_be_bytes([data[4], data[5]]);
            let temp_c = f64::from(temp_raw) / 100.0;
            let humidity = f64::from(hum_raw) / 100.0;
            let battery = if data[6] <= 100 {
                format!("{}%", data[6])
            } else {
                "??".to_string()
            };
            format!(
                "{:.1}\u{b0}F / {temp_c:.1}\u{b0}C | {humidity:.1}% | batt {battery}",
                c_to_f(temp_c)
            )
        }
        H5194_MANUFACTURER_ID => match H5194Packet::decode(data) {
            Some(packet) => format!("H5194 {packet}"),
            None => format!("H5194 (short packet): {hex}"),
        },
        APPLE_MANUFACTURER_ID if !data.is_empty() => match data[0] {
            0x09 => "Apple: AirDrop".to_string(),
            0x10 => "Apple: Proximity pairing".to_string(),
            0x12 => "Apple: AirTag/FindMy".to_string(),
            _ => format!("Apple: {hex}"),
        },
        _ => format!("Raw: {hex}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_from_sku() {
        assert_eq!(Model::from_sku("H5075"), Some(Model::H5075));
        assert_eq!(Model::from_sku("H5051"), Some(Model::H5051));
        assert_eq!(Model::from_sku("H9999"), None);
        assert_eq!(Model::from_sku(""), None);
    }

    #[test]
    fn test_h507x_documented_vector() {
        // 88 EC header, temp raw 0x0064=100 (1.00C), hum raw 0x0032=50,
        // battery 0x5A=90
        let raw = [0x88, 0xec, 0x00, 0x64, 0x00, 0x32, 0x00, 0x5a];
        let reading = Model::H5075.decode(&raw).unwrap();
        assert_close(reading.temp_f, 33.8);
        assert_close(reading.humidity, 0.5);
        assert_eq!(reading.battery, Some(90));
    }

    #[test]
    fn test_h507x_room_temperature_vector() {
        // temp raw 0x091c=2332 -> 23.32C -> 73.976F, hum raw 0x12c2=4802
        let raw = [0x88, 0xec, 0x00, 0x1c, 0x09, 0xc2, 0x12, 0x64];
        let reading = Model::H5074.decode(&raw).unwrap();
        assert_close(reading.temp_f, 73.976);
        assert_close(reading.humidity, 48.02);
        assert_eq!(reading.battery, Some(100));
    }

    #[test]
    fn test_h507x_rejects_ibeacon() {
        let raw = [0x4c, 0x00, 0x02, 0x15, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(Model::H5075.decode(&raw), None);
    }

    #[test]
    fn test_h507x_rejects_wrong_header() {
        let raw = [0x01, 0x02, 0x00, 0x64, 0x00, 0x32, 0x00, 0x5a];
        assert_eq!(Model::H5072.decode(&raw), None);
    }

    #[test]
    fn test_h507x_rejects_short_input() {
        assert_eq!(Model::H5075.decode(&[0x88, 0xec, 0x00]), None);
        assert_eq!(Model::H5075.decode(&[]), None);
    }

    #[test]
    fn test_h5051_decode() {
        // temp raw 0x0898=2200 -> 22.00C -> 71.6F, humidity 55.0, batt 87
        let raw = [0x00, 0x00, 0x00, 0x98, 0x08, 0xf7, 0x00, 0x57];
        let reading = Model::H5051.decode(&raw).unwrap();
        assert_close(reading.temp_f, 71.6);
        assert_close(reading.humidity, 24.7);
        assert_eq!(reading.battery, Some(0x57));
    }

    #[test]
    fn test_h5051_rejects_short_input() {
        assert_eq!(Model::H5051.decode(&[0x00; 7]), None);
    }

    #[test]
    fn test_h5194_model_has_no_th_reading() {
        let raw = [0x00; 20];
        assert_eq!(Model::H5194.decode(&raw), None);
    }

    #[test]
    fn test_h5194_packet_both_positions() {
        // pos1: 0x0d48=3400 -> 34.00C -> 93.2F, pos2: 0x60=96 -> 72F
        let mut raw = [0u8; 12];
        raw[6] = 0x60;
        raw[7] = 0x04;
        raw[8] = 0x0d;
        raw[9] = 0x48;

        let packet = H5194Packet::decode(&raw).unwrap();
        assert_eq!(packet.status, 0x04);
        assert_close(packet.pos1_f.unwrap(), 93.2);
        assert_close(packet.pos2_f.unwrap(), 72.0);
    }

    #[test]
    fn test_h5194_packet_sentinels_mean_no_probe() {
        let mut raw = [0u8; 12];
        raw[6] = 0xff; // unplugged
        raw[8] = 0xff;
        raw[9] = 0xff; // 0xffff raw

        let packet = H5194Packet::decode(&raw).unwrap();
        assert_eq!(packet.pos1_f, None);
        assert_eq!(packet.pos2_f, None);
    }

    #[test]
    fn test_h5194_packet_too_short() {
        assert_eq!(H5194Packet::decode(&[0u8; 9]), None);
    }

    #[test]
    fn test_h5194_probe_slots() {
        let packet = H5194Packet {
            status: 0x84,
            pos1_f: Some(93.2),
            pos2_f: Some(72.0),
        };
        assert_eq!(packet.probe_slots(), [(3, Some(93.2)), (2, Some(72.0))]);

        let unknown = H5194Packet {
            status: 0x42,
            pos1_f: Some(93.2),
            pos2_f: None,
        };
        assert_eq!(unknown.probe_slots(), [(0, None), (0, None)]);
    }

    #[test]
    fn test_identify_manufacturer() {
        assert_eq!(identify_manufacturer(76), Some("Apple"));
        assert_eq!(identify_manufacturer(27229), Some("Govee (H5194)"));
        assert_eq!(identify_manufacturer(0xbeef), None);
    }

    #[test]
    fn test_describe_govee_th_data() {
        // OS-keyed payload: BE temp 0x0922=2338 -> 23.38C, hum 0x12c2
        let data = [0x00, 0x00, 0x09, 0x22, 0x12, 0xc2, 0x5f];
        let desc = describe_manufacturer_data(GOVEE_TH_MANUFACTURER_ID, &data);
        assert!(desc.contains("23.4\u{b0}C"), "{desc}");
        assert!(desc.contains("48.0%"), "{desc}");
        assert!(desc.contains("95%"), "{desc}");
    }

    #[test]
    fn test_describe_unknown_is_raw_hex() {
        let desc = describe_manufacturer_data(0x1234, &[0xde, 0xad]);
        assert_eq!(desc, "Raw: dead");
    }
}
