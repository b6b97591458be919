//! MAC address identity types.
//!
//! Upstream sources disagree on formatting: the device API uses
//! colon-delimited addresses, gateways publish bare uppercase hex, and
//! macOS scanners report UUIDs instead of MACs. The only stable join key
//! across all of them is the last 12 hex characters of the normalized
//! address, represented here as [`MacSuffix`].

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing MAC address strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MacError {
    #[error("invalid MAC address: expected 12 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = MacError;

    /// Accepts both colon-delimited (`AA:BB:CC:DD:EE:FF`) and bare hex
    /// (`AABBCCDDEEFF`) forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = normalize(s);
        if hex.len() != 12 {
            return Err(MacError::InvalidLength(hex.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let part = &hex[i * 2..i * 2 + 2];
            *byte =
                u8::from_str_radix(part, 16).map_err(|_| MacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// Strip colons and uppercase a device identifier.
pub fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// The last 12 hex characters of a normalized device identifier.
///
/// This is the join key between the remote device API, the override file,
/// and gateway topics. Matching is exact fixed-length equality: an
/// identifier that normalizes to fewer than 12 hex characters never
/// matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacSuffix(String);

impl MacSuffix {
    /// Parse a device identifier into its 12-character suffix key.
    pub fn parse(id: &str) -> Result<Self, MacError> {
        let hex = normalize(id);
        if hex.len() < 12 {
            return Err(MacError::InvalidLength(hex.len()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacError::InvalidHex(hex));
        }
        Ok(MacSuffix(hex[hex.len() - 12..].to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an incoming identifier resolves to this suffix.
    pub fn matches(&self, incoming: &str) -> bool {
        match MacSuffix::parse(incoming) {
            Ok(suffix) => suffix == *self,
            Err(_) => false,
        }
    }
}

impl fmt::Display for MacSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MacAddress> for MacSuffix {
    fn from(addr: MacAddress) -> Self {
        MacSuffix(normalize(&addr.to_string()))
    }
}

impl TryFrom<String> for MacSuffix {
    type Error = MacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MacSuffix::parse(&value)
    }
}

impl From<MacSuffix> for String {
    fn from(suffix: MacSuffix) -> Self {
        suffix.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(format!("{}", addr), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_from_str_colon_delimited() {
        let addr: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_from_str_bare_hex() {
        let addr: MacAddress = "A4C138AABBCC".parse().unwrap();
        assert_eq!(addr.0, [0xA4, 0xC1, 0x38, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_from_str_invalid() {
        assert!(matches!(
            "AA:BB:CC".parse::<MacAddress>(),
            Err(MacError::InvalidLength(6))
        ));
        assert!(matches!(
            "AA:BB:CC:DD:EE:GG".parse::<MacAddress>(),
            Err(MacError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a4:c1:38:aa:bb:cc"), "A4C138AABBCC");
        assert_eq!(normalize("AABB"), "AABB");
    }

    #[test]
    fn test_suffix_parse_takes_last_12() {
        // macOS-style long identifiers keep only the trailing 12 chars
        let suffix = MacSuffix::parse("0000A4C138AABBCC").unwrap();
        assert_eq!(suffix.as_str(), "A4C138AABBCC");
    }

    #[test]
    fn test_suffix_parse_too_short() {
        assert!(matches!(
            MacSuffix::parse("AABBCC"),
            Err(MacError::InvalidLength(6))
        ));
    }

    #[test]
    fn test_suffix_matches_exact() {
        let suffix = MacSuffix::parse("A4:C1:38:AA:BB:CC").unwrap();
        assert!(suffix.matches("a4c138aabbcc"));
        assert!(suffix.matches("A4:C1:38:AA:BB:CC"));
        assert!(!suffix.matches("FFC138AABBCC"));
    }

    #[test]
    fn test_suffix_short_incoming_never_matches() {
        let suffix = MacSuffix::parse("A4C138AABBCC").unwrap();
        // a bare 6-char fragment is ambiguous, reject it outright
        assert!(!suffix.matches("AABBCC"));
    }

    #[test]
    fn test_suffix_from_mac_address() {
        let addr = MacAddress([0xA4, 0xC1, 0x38, 0xAA, 0xBB, 0xCC]);
        let suffix: MacSuffix = addr.into();
        assert_eq!(suffix.as_str(), "A4C138AABBCC");
    }

    #[test]
    fn test_suffix_serde_round_trip() {
        let suffix = MacSuffix::parse("A4C138AABBCC").unwrap();
        let json = serde_json::to_string(&suffix).unwrap();
        assert_eq!(json, "\"A4C138AABBCC\"");
        let back: MacSuffix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, suffix);
    }
}
