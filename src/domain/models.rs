use crate::error::AddressParseError;
use std::fmt;
use std::str::FromStr;

/// Bluetooth device address (6 octets, most significant first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Build from the 48-bit integer form Windows uses for `BluetoothAddress`
    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        Self([bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    pub fn to_u64(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, &octet| (acc << 8) | octet as u64)
    }
}

impl FromStr for MacAddress {
    type Err = AddressParseError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff`, space separated pairs
    /// or twelve bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();

        if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&cleaned[i * 2..i * 2 + 2], 16)
                .map_err(|_| AddressParseError(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// A paired and connected accessory reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub address: MacAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    Low,
    Standard,
}

impl LatencyMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Low => "Low latency",
            Self::Standard => "Standard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Same as `Idle`, but a device address is already cached
    Disconnected,
}

/// Decoded value of a single battery byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Unknown,
    Discharging(u8),
    Charging(u8),
}

impl BatteryLevel {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0..=100 => Self::Discharging(raw),
            128..=228 => Self::Charging(raw - 128),
            _ => Self::Unknown,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Discharging(p) | Self::Charging(p) => Some(*p),
        }
    }

    pub fn is_charging(&self) -> bool {
        matches!(self, Self::Charging(_))
    }
}

impl fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "--"),
            Self::Discharging(p) => write!(f, "{}%", p),
            Self::Charging(p) => write!(f, "{}% (charging)", p),
        }
    }
}

/// Raw battery bytes as carried by a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub left: u8,
    pub right: u8,
    pub case: u8,
}

impl BatteryStatus {
    pub fn left_level(&self) -> BatteryLevel {
        BatteryLevel::from_raw(self.left)
    }

    pub fn right_level(&self) -> BatteryLevel {
        BatteryLevel::from_raw(self.right)
    }

    pub fn case_level(&self) -> BatteryLevel {
        BatteryLevel::from_raw(self.case)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Error,
}

/// Events emitted by the controller towards the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Status(StatusMessage),
    Battery(BatteryStatus),
    /// A mode acknowledgment arrived; the UI should ask for fresh battery data
    BatteryPollRequested,
}

/// Result of an inbound command, mirrored to the caller as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_formats() {
        let expected = MacAddress::new([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
        for input in [
            "A1:B2:C3:D4:E5:F6",
            "a1-b2-c3-d4-e5-f6",
            "a1 b2 c3 d4 e5 f6",
            "a1b2c3d4e5f6",
        ] {
            assert_eq!(input.parse::<MacAddress>().unwrap(), expected, "{}", input);
        }
        assert_eq!(expected.to_string(), "A1:B2:C3:D4:E5:F6");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("A1:B2:C3".parse::<MacAddress>().is_err());
        assert!("zz:b2:c3:d4:e5:f6".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
        assert!("+Ab2c3d4e5f6".parse::<MacAddress>().is_err());
        assert!("+A:b2:c3:d4:e5:f6".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_u64_conversion() {
        let mac = MacAddress::from_u64(0x0011_2233_4455);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
        assert_eq!(mac.to_u64(), 0x0011_2233_4455);
    }

    #[test]
    fn test_battery_level_decoding() {
        assert_eq!(BatteryLevel::from_raw(0xFF), BatteryLevel::Unknown);
        assert_eq!(BatteryLevel::from_raw(50), BatteryLevel::Discharging(50));
        assert_eq!(BatteryLevel::from_raw(178), BatteryLevel::Charging(50));
        assert_eq!(BatteryLevel::from_raw(100), BatteryLevel::Discharging(100));
        assert_eq!(BatteryLevel::from_raw(228), BatteryLevel::Charging(100));
        assert_eq!(BatteryLevel::from_raw(101), BatteryLevel::Unknown);
        assert_eq!(BatteryLevel::from_raw(229), BatteryLevel::Unknown);
        assert!(BatteryLevel::from_raw(128).is_charging());
        assert_eq!(BatteryLevel::from_raw(128).percent(), Some(0));
    }

    #[test]
    fn test_mode_display_names() {
        assert_eq!(LatencyMode::Low.display_name(), "Low latency");
        assert_eq!(LatencyMode::Standard.display_name(), "Standard");
    }
}
