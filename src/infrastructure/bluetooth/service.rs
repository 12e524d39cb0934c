//! Bluetooth Service Module
//!
//! The worker that owns the scanner and the GATT session. It runs on its own
//! thread with a current-thread tokio runtime and multiplexes UI commands,
//! platform callbacks and the scan deadline.

use crate::domain::commands::GattCommands;
use crate::domain::errors::GattError;
use crate::domain::models::{AppEvent, BluetoothCommand, MessageSeverity, StatusMessage};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::platform::{
    GattPlatform, PlatformEvent, PlatformEventReceiver, ScanPlatform,
};
use crate::infrastructure::bluetooth::create_backend;
use crate::infrastructure::bluetooth::scanner::Scanner;
use crate::infrastructure::bluetooth::session::GattSession;
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Scanner and GATT session driven from one event loop
pub struct BluetoothService {
    scanner: Scanner,
    session: GattSession,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BluetoothService {
    pub fn new(
        scan: Box<dyn ScanPlatform>,
        gatt: Box<dyn GattPlatform>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        preferred_mtu: u16,
    ) -> Self {
        Self {
            scanner: Scanner::new(scan),
            session: GattSession::new(gatt, event_sender.clone(), preferred_mtu),
            event_sender,
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    /// Apply one UI command. Failures are already reported by the session.
    pub fn handle_command(&mut self, command: BluetoothCommand) {
        debug!("Bluetooth command: {:?}", command);
        let result = match command {
            BluetoothCommand::StartScan { timeout } => {
                if !self.scanner.is_scanning() {
                    self.send_log("Scanning for devices...", MessageSeverity::Info);
                }
                self.scanner
                    .start_scanning(Box::new(self.event_sender.clone()), timeout);
                Ok(())
            }
            BluetoothCommand::StopScan => {
                self.scanner.stop_scanning();
                Ok(())
            }
            BluetoothCommand::Connect(address) => {
                self.scanner.stop_scanning();
                self.session.connect(&address)
            }
            BluetoothCommand::Disconnect => self.session.disconnect(),
            BluetoothCommand::DiscoverServices => self.session.discover_services(),
            BluetoothCommand::ReadCharacteristic {
                service,
                characteristic,
            } => self.session.read_characteristic(service, characteristic),
            BluetoothCommand::WriteCharacteristic {
                service,
                characteristic,
                value,
            } => self
                .session
                .write_characteristic(service, characteristic, &value),
            BluetoothCommand::SetIndications {
                service,
                characteristic,
                enabled,
            } => self
                .session
                .set_indications_state(service, characteristic, enabled),
        };

        if let Err(e) = result {
            debug!("Command rejected: {}", e);
        }
    }

    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdvertisementReceived(device) => {
                self.scanner.handle_advertisement(device)
            }
            other => self.session.handle_platform_event(other),
        }
    }

    /// Run until the command channel closes.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BluetoothCommand>,
        mut platform_events: PlatformEventReceiver,
    ) {
        info!("Bluetooth worker started");
        loop {
            let deadline = self.scanner.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = platform_events.recv() => self.handle_platform_event(event),
                _ = scan_deadline(deadline) => {
                    self.scanner.poll_timeout(Instant::now());
                }
            }
        }
        info!("Bluetooth worker stopped");
    }
}

async fn scan_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// UI-side handle to the Bluetooth worker
#[derive(Clone)]
pub struct BluetoothHandle {
    commands: mpsc::UnboundedSender<BluetoothCommand>,
}

impl BluetoothHandle {
    pub fn new(commands: mpsc::UnboundedSender<BluetoothCommand>) -> Self {
        Self { commands }
    }

    /// Start the worker thread for the configured backend.
    pub fn spawn(settings: &Settings, event_sender: mpsc::UnboundedSender<AppEvent>) -> Result<Self> {
        let backend = settings.backend;
        let preferred_mtu = settings.preferred_mtu;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("bluetooth".to_string())
            .spawn(move || {
                rt.block_on(async move {
                    let (platform_tx, platform_rx) = mpsc::unbounded_channel();
                    let (scan, gatt) = create_backend(backend, platform_tx);
                    let service = BluetoothService::new(scan, gatt, event_sender, preferred_mtu);
                    service.run(command_rx, platform_rx).await;
                });
            })?;

        Ok(Self::new(command_tx))
    }

    fn send(&self, command: BluetoothCommand) -> Result<(), GattError> {
        self.commands.send(command).map_err(|_| {
            error!("Bluetooth worker is gone");
            GattError::ServiceStopped
        })
    }

    pub fn start_scan(&self, timeout: Duration) -> Result<(), GattError> {
        self.send(BluetoothCommand::StartScan { timeout })
    }

    pub fn stop_scan(&self) -> Result<(), GattError> {
        self.send(BluetoothCommand::StopScan)
    }
}

impl GattCommands for BluetoothHandle {
    fn connect(&mut self, address: &str) -> Result<(), GattError> {
        self.send(BluetoothCommand::Connect(address.to_string()))
    }

    fn disconnect(&mut self) -> Result<(), GattError> {
        self.send(BluetoothCommand::Disconnect)
    }

    fn discover_services(&mut self) -> Result<(), GattError> {
        self.send(BluetoothCommand::DiscoverServices)
    }

    fn read_characteristic(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), GattError> {
        self.send(BluetoothCommand::ReadCharacteristic {
            service,
            characteristic,
        })
    }

    fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), GattError> {
        self.send(BluetoothCommand::WriteCharacteristic {
            service,
            characteristic,
            value: value.to_vec(),
        })
    }

    fn set_indications_state(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), GattError> {
        self.send(BluetoothCommand::SetIndications {
            service,
            characteristic,
            enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::console::{ConsoleController, Navigation};
    use crate::domain::models::{GattEvent, Operation, ScanEvent};
    use crate::domain::protocol::{self, UartProfile};
    use crate::infrastructure::bluetooth::simulated::{
        default_catalog, SimulatedGatt, SimulatedScanner,
    };
    use std::collections::HashSet;
    use std::sync::Arc;

    const ECHO: &str = "C0:FF:EE:00:00:01";

    fn start_worker() -> (BluetoothHandle, mpsc::UnboundedReceiver<AppEvent>) {
        start_worker_with(|scan, gatt| (scan, gatt))
    }

    fn start_worker_with(
        configure: impl FnOnce(SimulatedScanner, SimulatedGatt) -> (SimulatedScanner, SimulatedGatt),
    ) -> (BluetoothHandle, mpsc::UnboundedReceiver<AppEvent>) {
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let catalog = Arc::new(default_catalog());

        let (scan, gatt) = configure(
            SimulatedScanner::new(catalog.clone(), platform_tx.clone()),
            SimulatedGatt::new(catalog, platform_tx),
        );
        let service =
            BluetoothService::new(Box::new(scan), Box::new(gatt), app_tx, protocol::PREFERRED_MTU);
        tokio::spawn(service.run(command_rx, platform_rx));
        (BluetoothHandle::new(command_tx), app_rx)
    }

    /// Events up to and including the first rejection of `operation`
    async fn events_until_rejected(
        rx: &mut mpsc::UnboundedReceiver<AppEvent>,
        operation: Operation,
    ) -> Vec<AppEvent> {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = matches!(
                &event,
                AppEvent::Gatt(GattEvent::Rejected { operation: op, .. }) if *op == operation
            );
            events.push(event);
            if done {
                return events;
            }
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> AppEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for worker")
            .expect("worker closed the event channel")
    }

    #[tokio::test]
    async fn test_timed_scan_reports_each_device_once() {
        let (handle, mut rx) = start_worker();
        handle.start_scan(Duration::from_millis(50)).unwrap();

        let started_at = Instant::now();
        let mut candidates = Vec::new();
        loop {
            match next_event(&mut rx).await {
                AppEvent::Scan(ScanEvent::CandidateDevice(device)) => candidates.push(device),
                AppEvent::Scan(ScanEvent::Stopped) => break,
                _ => {}
            }
        }

        assert!(started_at.elapsed() >= Duration::from_millis(40));
        assert_eq!(candidates.len(), default_catalog().len());
        let addresses: HashSet<_> = candidates.iter().map(|d| d.address.clone()).collect();
        assert_eq!(addresses.len(), candidates.len());
    }

    #[tokio::test]
    async fn test_console_echo_session_end_to_end() {
        let (mut handle, mut rx) = start_worker();
        let mut console =
            ConsoleController::new(ECHO.parse().unwrap(), None, UartProfile::default());

        console.connect_pressed(&mut handle);
        while !console.notifications_enabled() {
            if let AppEvent::Gatt(event) = next_event(&mut rx).await {
                console.handle_event(&event, &mut handle);
            }
        }

        console.input = "hello".to_string();
        assert!(console.send(&mut handle));
        while console.received().is_empty() {
            if let AppEvent::Gatt(event) = next_event(&mut rx).await {
                console.handle_event(&event, &mut handle);
            }
        }
        assert_eq!(console.received(), "hello");

        assert_eq!(console.back_pressed(&mut handle), Navigation::Stay);
        loop {
            if let AppEvent::Gatt(event) = next_event(&mut rx).await {
                let disconnected = matches!(event, GattEvent::Disconnected { .. });
                let navigation = console.handle_event(&event, &mut handle);
                if disconnected {
                    assert_eq!(navigation, Navigation::Finished);
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_device_reports_disconnected_only() {
        let (mut handle, mut rx) = start_worker();
        handle.connect("11:22:33:44:55:66").unwrap();

        loop {
            match next_event(&mut rx).await {
                AppEvent::Gatt(GattEvent::Connected { .. }) => panic!("unexpected connect"),
                AppEvent::Gatt(GattEvent::Disconnected { .. }) => break,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_console_leaves_when_adapter_refuses_connect() {
        let (mut handle, mut rx) =
            start_worker_with(|scan, gatt| (scan, gatt.with_adapter_enabled(false)));
        let mut console =
            ConsoleController::new(ECHO.parse().unwrap(), None, UartProfile::default());

        console.connect_pressed(&mut handle);
        for event in events_until_rejected(&mut rx, Operation::Connect).await {
            if let AppEvent::Gatt(event) = event {
                console.handle_event(&event, &mut handle);
            }
        }
        assert!(!console.is_connecting());

        // Nothing to tear down, so back navigation needs no disconnect round trip
        assert_eq!(console.back_pressed(&mut handle), Navigation::Finished);
    }

    #[tokio::test]
    async fn test_back_while_connect_is_rejected_still_finishes() {
        let (mut handle, mut rx) =
            start_worker_with(|scan, gatt| (scan, gatt.with_adapter_enabled(false)));
        let mut console =
            ConsoleController::new(ECHO.parse().unwrap(), None, UartProfile::default());

        console.connect_pressed(&mut handle);
        assert_eq!(console.back_pressed(&mut handle), Navigation::Stay);

        let mut navigation = Navigation::Stay;
        for event in events_until_rejected(&mut rx, Operation::Disconnect).await {
            if let AppEvent::Gatt(event) = event {
                if console.handle_event(&event, &mut handle) == Navigation::Finished {
                    navigation = Navigation::Finished;
                }
            }
        }
        assert_eq!(navigation, Navigation::Finished);
    }

    #[tokio::test]
    async fn test_scan_without_permission_is_abandoned_then_retried() {
        let (mut handle, mut rx) =
            start_worker_with(|scan, gatt| (scan.with_permission(false), gatt));

        handle.start_scan(Duration::from_millis(20)).unwrap();
        handle.disconnect().unwrap();
        let events = events_until_rejected(&mut rx, Operation::Disconnect).await;
        assert!(!events.iter().any(|e| matches!(e, AppEvent::Scan(_))));

        // The simulated user granted the request, so the next scan runs
        handle.start_scan(Duration::from_millis(20)).unwrap();
        loop {
            if let AppEvent::Scan(ScanEvent::Started) = next_event(&mut rx).await {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_scan_with_adapter_off_emits_nothing() {
        let (mut handle, mut rx) =
            start_worker_with(|scan, gatt| (scan.with_adapter_enabled(false), gatt));

        handle.start_scan(Duration::from_millis(20)).unwrap();
        handle.disconnect().unwrap();
        let events = events_until_rejected(&mut rx, Operation::Disconnect).await;
        assert!(!events.iter().any(|e| matches!(e, AppEvent::Scan(_))));
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_worker() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut handle = BluetoothHandle::new(tx);

        assert_eq!(handle.disconnect(), Err(GattError::ServiceStopped));
        assert_eq!(
            handle.start_scan(Duration::from_secs(1)),
            Err(GattError::ServiceStopped)
        );
    }
}
