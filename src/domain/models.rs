use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::AddressParseError;

/// Bluetooth device address in `AA:BB:CC:DD:EE:FF` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Build an address from the 48-bit integer form used by WinRT
    pub fn from_u64(raw: u64) -> Self {
        let octets = raw.to_be_bytes();
        Self(
            octets[2..]
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }

    pub fn as_u64(&self) -> u64 {
        self.0
            .split(':')
            .filter_map(|octet| u8::from_str_radix(octet, 16).ok())
            .fold(0u64, |acc, b| (acc << 8) | b as u64)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let octets: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
        if octets.len() != 6 {
            return Err(AddressParseError(trimmed.to_string()));
        }

        let mut normalized = Vec::with_capacity(6);
        for octet in octets {
            if octet.len() != 2 || u8::from_str_radix(octet, 16).is_err() {
                return Err(AddressParseError(trimmed.to_string()));
            }
            normalized.push(octet.to_ascii_uppercase());
        }

        Ok(Self(normalized.join(":")))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral reported by a scan
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i16,
    /// Raw advertisement payload (AD structures)
    pub advertisement: Vec<u8>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "No name...",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn descriptor(&self, uuid: Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Completion status reported by the Bluetooth stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(u16),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattStatus::Success => f.write_str("success"),
            GattStatus::Failure(code) => write!(f, "error {}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    ServicesDiscovered,
    NotificationsEnabled,
    Disconnecting,
    Disconnected,
}

/// Session operations guarded by [`ConnectionState::permits`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic,
    WriteCharacteristic,
    SetNotifications,
}

impl ConnectionState {
    /// Transition table: which operations may start from this state.
    pub fn permits(self, operation: Operation) -> bool {
        use ConnectionState::*;

        match operation {
            Operation::Connect => matches!(self, Idle | Disconnected),
            Operation::Disconnect => matches!(
                self,
                Connecting | Connected | ServicesDiscovered | NotificationsEnabled
            ),
            Operation::DiscoverServices
            | Operation::ReadCharacteristic
            | Operation::WriteCharacteristic => {
                matches!(self, Connected | ServicesDiscovered | NotificationsEnabled)
            }
            Operation::SetNotifications => matches!(self, ServicesDiscovered | NotificationsEnabled),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::DiscoverServices => "discoverServices",
            Operation::ReadCharacteristic => "readCharacteristic",
            Operation::WriteCharacteristic => "writeCharacteristic",
            Operation::SetNotifications => "setIndicationsState",
        };
        f.write_str(name)
    }
}

/// Events produced by the GATT session
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    Connected {
        address: DeviceAddress,
    },
    Disconnected {
        address: DeviceAddress,
    },
    ServicesDiscovered {
        services: Vec<GattService>,
        status: GattStatus,
    },
    CharacteristicRead {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWritten {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorWritten {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
    NotificationReceived {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A command was refused before reaching the platform
    Rejected {
        operation: Operation,
        reason: String,
    },
    /// Diagnostic text
    Message(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    CandidateDevice(DiscoveredDevice),
    Stopped,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Scan(ScanEvent),
    Gatt(GattEvent),
    LogMessage(StatusMessage),
}

/// Requests from the UI thread to the Bluetooth worker
#[derive(Debug, Clone)]
pub enum BluetoothCommand {
    StartScan {
        timeout: std::time::Duration,
    },
    StopScan,
    Connect(String),
    Disconnect,
    DiscoverServices,
    ReadCharacteristic {
        service: Uuid,
        characteristic: Uuid,
    },
    WriteCharacteristic {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    SetIndications {
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    },
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
