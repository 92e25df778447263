//! Target device identification.
//!
//! The target is named by its 48-bit BLE address, given on the command line
//! with or without separators.

use std::fmt;
use std::str::FromStr;

use super::error::{DfuError, DfuResult};

/// Number of hex digits in a BLE address.
const ADDRESS_HEX_DIGITS: usize = 12;

/// A 48-bit BLE device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Parse an address such as `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff`
    /// or `aabbccddeeff`.
    pub fn parse(input: &str) -> DfuResult<Self> {
        let invalid = || DfuError::InvalidAddress {
            input: input.to_string(),
        };

        let digits: String = input
            .chars()
            .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        if digits.len() != ADDRESS_HEX_DIGITS || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }

        Ok(Self(bytes))
    }

    /// Raw address bytes, most significant first.
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl FromStr for DeviceAddress {
    type Err = DfuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// A peer seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: DeviceAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl PeerInfo {
    /// Get a display label for this peer.
    pub fn display_label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", self.address, name),
            None => self.address.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_colons() {
        let address = DeviceAddress::parse("C3:4A:1F:00:B2:7E").unwrap();
        assert_eq!(address.bytes(), [0xC3, 0x4A, 0x1F, 0x00, 0xB2, 0x7E]);
        assert_eq!(address.to_string(), "c3:4a:1f:00:b2:7e");
    }

    #[test]
    fn test_parse_without_separators() {
        let a = DeviceAddress::parse("c34a1f00b27e").unwrap();
        let b: DeviceAddress = "C3-4A-1F-00-B2-7E".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        for input in ["", "c34a1f00b2", "c34a1f00b27e00", "c3:4a:1f:00:b2"] {
            assert!(
                matches!(DeviceAddress::parse(input), Err(DfuError::InvalidAddress { .. })),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(DeviceAddress::parse("zz:4a:1f:00:b2:7e").is_err());
        assert!(DeviceAddress::parse("c3.4a.1f.00.b2.7e").is_err());
    }

    #[test]
    fn test_display_label() {
        let peer = PeerInfo {
            address: DeviceAddress::from([0xC3, 0x4A, 0x1F, 0x00, 0xB2, 0x7E]),
            name: Some("DfuTarg".to_string()),
        };
        assert_eq!(peer.display_label(), "c3:4a:1f:00:b2:7e DfuTarg");
    }
}
