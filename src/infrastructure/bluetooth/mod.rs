//! Bluetooth Module
//!
//! BLE central role for talking to Nordic UART peripherals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              BluetoothHandle (UI thread)                 │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ BluetoothCommand
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            BluetoothService (worker thread)              │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────┐          ┌─────────────────┐
//! │    Scanner    │          │   GattSession   │
//! │ - timed scan  │          │ - state machine │
//! │               │          │ - request queue │
//! └───────┬───────┘          └────────┬────────┘
//!         │ ScanPlatform              │ GattPlatform
//!         └─────────────┬─────────────┘
//!                       ▼
//!          simulated radio  |  WinRT (Windows)
//! ```
//!
//! Results flow back as [`PlatformEvent`](platform::PlatformEvent)s into the
//! worker and leave it as [`AppEvent`](crate::domain::models::AppEvent)s.
//!
//! ## Modules
//!
//! - [`platform`] - Backend traits and platform events
//! - [`scanner`] - Timed BLE device discovery
//! - [`session`] - GATT connection state machine
//! - [`service`] - Worker thread and UI handle
//! - [`simulated`] - In-process virtual peripherals

pub mod platform;
pub mod scanner;
pub mod service;
pub mod session;
pub mod simulated;
#[cfg(windows)]
pub mod winrt;

pub use service::BluetoothHandle;

use crate::domain::settings::BackendKind;
use platform::{GattPlatform, PlatformEventSender, ScanPlatform};
use std::sync::Arc;

/// Build the scan and GATT halves of a backend sharing one event channel.
///
/// Must be called from inside a tokio runtime; the WinRT backend spawns its
/// completions onto it.
pub fn create_backend(
    kind: BackendKind,
    events: PlatformEventSender,
) -> (Box<dyn ScanPlatform>, Box<dyn GattPlatform>) {
    match kind {
        BackendKind::Simulated => simulated_backend(events),
        #[cfg(windows)]
        BackendKind::Native => winrt::create(events),
        #[cfg(not(windows))]
        BackendKind::Native => {
            tracing::warn!("Native Bluetooth is only available on Windows, using the simulated radio");
            simulated_backend(events)
        }
    }
}

fn simulated_backend(events: PlatformEventSender) -> (Box<dyn ScanPlatform>, Box<dyn GattPlatform>) {
    tracing::info!("Using the simulated Bluetooth radio");
    let catalog = Arc::new(simulated::default_catalog());
    (
        Box::new(simulated::SimulatedScanner::new(catalog.clone(), events.clone())),
        Box::new(simulated::SimulatedGatt::new(catalog, events)),
    )
}
