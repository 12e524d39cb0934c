//! Bluetooth Platform Seam
//!
//! The operating system stack as seen by the scanner and the GATT session.
//! Every call returns immediately; the outcome of a request is delivered
//! later as a [`PlatformEvent`] on the channel handed to the backend when
//! it was created. A synchronous `Err` means the request was never issued.

use crate::domain::errors::PlatformError;
use crate::domain::models::{DeviceAddress, DiscoveredDevice, GattService, GattStatus};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type PlatformEventSender = mpsc::UnboundedSender<PlatformEvent>;
pub type PlatformEventReceiver = mpsc::UnboundedReceiver<PlatformEvent>;

/// Backend-issued identifier of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Callbacks from the Bluetooth stack
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    AdvertisementReceived(DiscoveredDevice),
    ConnectionStateChanged {
        handle: ConnectionHandle,
        connected: bool,
        status: GattStatus,
    },
    ServicesDiscovered {
        handle: ConnectionHandle,
        services: Vec<GattService>,
        status: GattStatus,
    },
    CharacteristicRead {
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWritten {
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    /// Notification or indication pushed by the peripheral
    CharacteristicChanged {
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorWritten {
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    MtuChanged {
        handle: ConnectionHandle,
        mtu: u16,
        status: GattStatus,
    },
}

impl PlatformEvent {
    /// Connection the event belongs to; `None` for scan results
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match self {
            PlatformEvent::AdvertisementReceived(_) => None,
            PlatformEvent::ConnectionStateChanged { handle, .. }
            | PlatformEvent::ServicesDiscovered { handle, .. }
            | PlatformEvent::CharacteristicRead { handle, .. }
            | PlatformEvent::CharacteristicWritten { handle, .. }
            | PlatformEvent::CharacteristicChanged { handle, .. }
            | PlatformEvent::DescriptorWritten { handle, .. }
            | PlatformEvent::MtuChanged { handle, .. } => Some(*handle),
        }
    }
}

/// Append one length-prefixed advertisement structure.
///
/// Returns false and leaves `buf` untouched when `data` is too long for
/// the one-byte length field.
pub fn push_ad_structure(buf: &mut Vec<u8>, ad_type: u8, data: &[u8]) -> bool {
    let Ok(len) = u8::try_from(data.len() + 1) else {
        return false;
    };
    buf.push(len);
    buf.push(ad_type);
    buf.extend_from_slice(data);
    true
}

/// Advertisement discovery
pub trait ScanPlatform: Send {
    fn adapter_enabled(&self) -> bool;

    /// Whether the scan capability has been granted
    fn scan_permitted(&self) -> bool;

    /// Ask the user or the OS for the scan capability
    fn request_scan_permission(&mut self);

    fn start_scan(&mut self) -> Result<(), PlatformError>;

    fn stop_scan(&mut self);
}

/// GATT client access
pub trait GattPlatform: Send {
    fn adapter_available(&self) -> bool;

    /// Start connecting; the result arrives as `ConnectionStateChanged`.
    fn connect(&mut self, address: &DeviceAddress) -> Result<ConnectionHandle, PlatformError>;

    /// Request teardown; `ConnectionStateChanged { connected: false }` follows.
    fn disconnect(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError>;

    /// Release the platform resources behind a handle.
    fn close(&mut self, handle: ConnectionHandle);

    fn discover_services(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError>;

    fn read_characteristic(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError>;

    fn write_characteristic(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Local delivery flag for value changes; no completion event.
    fn set_characteristic_notification(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), PlatformError>;

    fn request_mtu(&mut self, handle: ConnectionHandle, mtu: u16) -> Result<(), PlatformError>;

    fn write_descriptor(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;
}
