//! Nordic UART Service Protocol
//!
//! UUIDs and payload conventions for talking to a NUS peripheral.
//!
//! ```text
//! Service  6E400001-B5A3-F393-E0A9-E50E24DCCA9E
//!   RX     6E400002-...  app writes, peripheral consumes
//!   TX     6E400003-...  peripheral notifies, app reads
//!     CCCD 00002902-0000-1000-8000-00805F9B34FB
//! ```
//!
//! Payloads are plain ASCII bytes with no framing; chunking is left to the
//! Bluetooth stack.

use uuid::Uuid;

/// Nordic UART Service UUID
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// RX characteristic - where the app writes
pub const UART_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// TX characteristic - notified by the peripheral
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD values, little-endian
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Transfer unit requested before enabling notifications.
/// The default of 23 (20 bytes of payload) is too small for console lines.
pub const PREFERRED_MTU: u16 = 512;

/// ATT default MTU
pub const DEFAULT_MTU: u16 = 23;

/// Service and characteristic triple used by the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartProfile {
    pub service: Uuid,
    pub rx: Uuid,
    pub tx: Uuid,
}

impl Default for UartProfile {
    fn default() -> Self {
        Self {
            service: UART_SERVICE_UUID,
            rx: UART_RX_CHAR_UUID,
            tx: UART_TX_CHAR_UUID,
        }
    }
}

pub fn cccd_value(enabled: bool) -> [u8; 2] {
    if enabled {
        ENABLE_NOTIFICATION_VALUE
    } else {
        DISABLE_NOTIFICATION_VALUE
    }
}

/// Whether a CCCD value turns notifications or indications on
pub fn cccd_enables(value: &[u8]) -> bool {
    value.first().map_or(false, |b| b & 0x03 != 0)
}

/// Encode console input for the RX characteristic.
/// Returns `None` when the text contains non-ASCII characters.
pub fn encode_ascii(text: &str) -> Option<Vec<u8>> {
    if text.is_ascii() {
        Some(text.as_bytes().to_vec())
    } else {
        None
    }
}

/// Decode a TX payload; bytes outside ASCII become U+FFFD.
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                b as char
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}

/// Format a UUID the way it is shown to the user
pub fn display_uuid(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}
