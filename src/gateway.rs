//! Incoming gateway message model.
//!
//! Two gateway generations publish BLE traffic: ESP32 nodes under
//! `{site}/{node}/BTtoMQTT/{MAC}` and a Theengs gateway under
//! `home/TheengsGateway/BTtoMQTT/{MAC}`. Payloads are JSON carrying
//! either pre-decoded fields (the gateway firmware already ran the
//! decoder) or a raw hex `manufacturerdata` field. When the gateway runs
//! with its external-decoder flag the topic ends in `undecoded` and the
//! MAC moves into the payload's `id` field.

use serde::Deserialize;

/// Topic segment marking external-decoder mode.
pub const UNDECODED_SEGMENT: &str = "undecoded";

/// The Theengs gateway announces itself in the topic path.
pub const THEENGS_GATEWAY: &str = "TheengsGateway";

/// Subscription patterns covering both gateway naming conventions.
pub fn subscription_patterns(site: &str) -> [String; 2] {
    [
        format!("{site}/+/BTtoMQTT/#"),
        format!("home/{THEENGS_GATEWAY}/BTtoMQTT/#"),
    ]
}

/// JSON payload published by a BLE gateway. All fields optional; which
/// ones are present depends on gateway firmware and decode mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayPayload {
    /// Pre-decoded temperature in Fahrenheit.
    pub tempf: Option<f64>,
    /// Pre-decoded relative humidity percent.
    pub hum: Option<f64>,
    /// Pre-decoded battery percent.
    pub batt: Option<u8>,
    /// Raw manufacturer data as a hex string (undecoded mode).
    pub manufacturerdata: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i32>,
    /// Device MAC, present when the topic ends in `undecoded`.
    pub id: Option<String>,
}

/// Extract the device identifier for a message: the topic's last segment
/// normally, or the payload `id` field in external-decoder mode. Returns
/// the normalized (colon-stripped, uppercased) form.
pub fn extract_mac(topic: &str, payload: &GatewayPayload) -> Option<String> {
    let last = topic.rsplit('/').next()?;
    let raw = if last == UNDECODED_SEGMENT {
        payload.id.as_deref()?
    } else {
        last
    };
    if raw.is_empty() {
        return None;
    }
    Some(crate::mac::normalize(raw))
}

/// Extract the gateway node name from an incoming topic.
pub fn source_node(topic: &str) -> &str {
    if topic.contains(THEENGS_GATEWAY) {
        return THEENGS_GATEWAY;
    }
    let mut parts = topic.split('/');
    parts.next();
    parts.next().unwrap_or("unknown")
}

/// Decode a hex string into bytes. Returns `None` for odd lengths or
/// non-hex characters; malformed gateway data is skipped, not fatal.
pub fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    // non-ASCII input would make the 2-byte slices below split a char
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_patterns() {
        let patterns = subscription_patterns("demo_showsite");
        assert_eq!(patterns[0], "demo_showsite/+/BTtoMQTT/#");
        assert_eq!(patterns[1], "home/TheengsGateway/BTtoMQTT/#");
    }

    #[test]
    fn test_extract_mac_from_topic() {
        let payload = GatewayPayload::default();
        let mac = extract_mac("demo_showsite/dpx_ops_1/BTtoMQTT/a4:c1:38:aa:bb:cc", &payload);
        assert_eq!(mac.as_deref(), Some("A4C138AABBCC"));
    }

    #[test]
    fn test_extract_mac_undecoded_mode() {
        let payload = GatewayPayload {
            id: Some("a4:c1:38:aa:bb:cc".to_string()),
            ..Default::default()
        };
        let mac = extract_mac("demo_showsite/dpx_ops_1/BTtoMQTT/undecoded", &payload);
        assert_eq!(mac.as_deref(), Some("A4C138AABBCC"));
    }

    #[test]
    fn test_extract_mac_undecoded_without_id() {
        let payload = GatewayPayload::default();
        assert_eq!(
            extract_mac("demo_showsite/dpx_ops_1/BTtoMQTT/undecoded", &payload),
            None
        );
    }

    #[test]
    fn test_source_node() {
        assert_eq!(
            source_node("demo_showsite/dpx_ops_1/BTtoMQTT/AABBCCDDEEFF"),
            "dpx_ops_1"
        );
        assert_eq!(
            source_node("home/TheengsGateway/BTtoMQTT/AABBCCDDEEFF"),
            "TheengsGateway"
        );
        assert_eq!(source_node("standalone"), "unknown");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("88ec00"), Some(vec![0x88, 0xec, 0x00]));
        assert_eq!(parse_hex("88e"), None);
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex(""), Some(vec![]));
    }

    #[test]
    fn test_parse_hex_rejects_multibyte_input() {
        // "a€" is 4 bytes, so the length check alone would let it through
        assert_eq!(parse_hex("a€"), None);
        assert_eq!(parse_hex("€€"), None);
    }

    #[test]
    fn test_payload_deserialization_predecode() {
        let payload: GatewayPayload =
            serde_json::from_str(r#"{"tempf": 71.6, "hum": 48.0, "batt": 95, "rssi": -62}"#)
                .unwrap();
        assert_eq!(payload.tempf, Some(71.6));
        assert_eq!(payload.hum, Some(48.0));
        assert_eq!(payload.batt, Some(95));
        assert_eq!(payload.rssi, Some(-62));
        assert!(payload.manufacturerdata.is_none());
    }

    #[test]
    fn test_payload_deserialization_raw() {
        let payload: GatewayPayload =
            serde_json::from_str(r#"{"manufacturerdata": "88ec000919c21264", "rssi": -70}"#)
                .unwrap();
        assert_eq!(payload.manufacturerdata.as_deref(), Some("88ec000919c21264"));
    }
}
