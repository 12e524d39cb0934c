use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

/// Failure reported synchronously by a platform backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("unknown connection handle")]
    UnknownHandle,
    #[error("{0}")]
    Rejected(String),
}

/// Local precondition failures of GATT session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("no Bluetooth adapter")]
    NoAdapter,
    #[error(transparent)]
    InvalidAddress(#[from] AddressParseError),
    #[error("a connection is already active")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("operation not allowed while {0:?}")]
    InvalidState(ConnectionState),
    #[error("service {0} not found")]
    UnknownService(Uuid),
    #[error("characteristic {0} not found")]
    UnknownCharacteristic(Uuid),
    #[error("descriptor {0} not found")]
    MissingDescriptor(Uuid),
    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),
    #[error("Bluetooth service stopped")]
    ServiceStopped,
}
