//! Device name validation and bad-name detection.
//!
//! Names flow into MQTT topics and InfluxDB tags, so the character set
//! is restricted to `[a-z0-9_]`. Auto-generated names (the upstream API
//! derives them from the model and MAC) are rejected on rename so
//! operators don't re-enter garbage.

use crate::registry::DeviceRecord;
use regex::Regex;
use std::sync::LazyLock;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 50;

static VALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("static regex"));

/// Model-plus-hex-suffix names, e.g. `h5075_5a9`.
static MODEL_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^h\d{4}_[a-f0-9]{3,}$").expect("static regex"));

/// Generic-prefix-plus-hex names, e.g. `sensor_abc123`.
static GENERIC_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sensor|device)_[a-f0-9]+$").expect("static regex"));

/// Three or more consecutive hex characters anywhere in the name.
static HEX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-f0-9]{3,}").expect("static regex"));

/// Why a proposed device name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name too short (minimum {MIN_NAME_LEN} characters)")]
    TooShort,
    #[error("name too long (maximum {MAX_NAME_LEN} characters)")]
    TooLong,
    #[error("name must be lowercase letters, numbers, and underscores only")]
    InvalidChars,
    #[error("name cannot start or end with underscore")]
    EdgeUnderscore,
    #[error("name appears auto-generated (avoid patterns like 'h5075_abc')")]
    AutoGenerated,
    #[error("name '{name}' already in use by {mac}")]
    Duplicate { name: String, mac: String },
}

/// Validate a proposed device name. `exclude_mac` is the suffix of the
/// device being renamed, so it may keep its own name.
pub fn validate_name(
    name: &str,
    all_devices: &[DeviceRecord],
    exclude_mac: Option<&str>,
) -> Result<(), NameError> {
    if name.len() < MIN_NAME_LEN {
        return Err(NameError::TooShort);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !VALID_CHARS.is_match(name) {
        return Err(NameError::InvalidChars);
    }
    if name.starts_with('_') || name.ends_with('_') {
        return Err(NameError::EdgeUnderscore);
    }
    if MODEL_HEX.is_match(name) || GENERIC_HEX.is_match(name) {
        return Err(NameError::AutoGenerated);
    }
    for device in all_devices {
        if Some(device.mac.as_str()) != exclude_mac && device.name == name {
            return Err(NameError::Duplicate {
                name: name.to_string(),
                mac: device.mac.to_string(),
            });
        }
    }
    Ok(())
}

/// Devices whose names look auto-generated and should probably be
/// renamed. Broader than [`validate_name`]: it also flags short names
/// containing digits and any 3+ hex-character run.
pub fn detect_bad_names<'a>(devices: &'a [DeviceRecord]) -> Vec<&'a DeviceRecord> {
    devices
        .iter()
        .filter(|d| {
            let name = d.name.as_str();
            MODEL_HEX.is_match(name)
                || GENERIC_HEX.is_match(name)
                || (name.len() < 8 && name.chars().any(|c| c.is_ascii_digit()))
                || HEX_RUN.is_match(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacSuffix;

    fn record(mac: &str, name: &str) -> DeviceRecord {
        DeviceRecord {
            mac: MacSuffix::parse(mac).unwrap(),
            name: name.to_string(),
            room: "unassigned".to_string(),
            sku: "H5075".to_string(),
            has_override: false,
        }
    }

    #[test]
    fn test_valid_names() {
        assert!(validate_name("fridge_sensor", &[], None).is_ok());
        assert!(validate_name("shop", &[], None).is_ok());
        assert!(validate_name("room_12_north", &[], None).is_ok());
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(validate_name("ab", &[], None), Err(NameError::TooShort));
        assert!(validate_name("abc", &[], None).is_ok());
        let long = "x".repeat(51);
        assert_eq!(validate_name(&long, &[], None), Err(NameError::TooLong));
        let max = "x".repeat(50);
        assert!(validate_name(&max, &[], None).is_ok());
    }

    #[test]
    fn test_character_class() {
        assert_eq!(
            validate_name("Fridge", &[], None),
            Err(NameError::InvalidChars)
        );
        assert_eq!(
            validate_name("fridge sensor", &[], None),
            Err(NameError::InvalidChars)
        );
        assert_eq!(
            validate_name("fridge-sensor", &[], None),
            Err(NameError::InvalidChars)
        );
    }

    #[test]
    fn test_edge_underscores() {
        assert_eq!(
            validate_name("_fridge", &[], None),
            Err(NameError::EdgeUnderscore)
        );
        assert_eq!(
            validate_name("fridge_", &[], None),
            Err(NameError::EdgeUnderscore)
        );
    }

    #[test]
    fn test_auto_generated_patterns() {
        assert_eq!(
            validate_name("h5075_5a9", &[], None),
            Err(NameError::AutoGenerated)
        );
        assert_eq!(
            validate_name("sensor_abc123", &[], None),
            Err(NameError::AutoGenerated)
        );
        assert_eq!(
            validate_name("device_ff01", &[], None),
            Err(NameError::AutoGenerated)
        );
    }

    #[test]
    fn test_duplicate_name() {
        let devices = vec![record("A4C138AABBCC", "fridge_sensor")];
        assert!(matches!(
            validate_name("fridge_sensor", &devices, None),
            Err(NameError::Duplicate { .. })
        ));
        // the device itself may keep its name
        assert!(validate_name("fridge_sensor", &devices, Some("A4C138AABBCC")).is_ok());
        // a different device may not take it
        assert!(matches!(
            validate_name("fridge_sensor", &devices, Some("A4C138DDEEFF")),
            Err(NameError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_detect_bad_names() {
        let devices = vec![
            record("A4C138000001", "h5075_5a9"),
            record("A4C138000002", "sensor_abc123"),
            record("A4C138000003", "tag_1"),       // short with digit
            record("A4C138000004", "office_dead"), // hex run "dead"
            record("A4C138000005", "sunroom_thermo"),
        ];
        let bad: Vec<&str> = detect_bad_names(&devices)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(
            bad,
            vec!["h5075_5a9", "sensor_abc123", "tag_1", "office_dead"]
        );
    }
}
