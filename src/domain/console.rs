//! Console controller
//!
//! UI-side reaction to GATT events for one peripheral: kicks off discovery
//! and notification setup, turns TX traffic into text and tracks the
//! connect button and back navigation.

use crate::domain::commands::GattCommands;
use crate::domain::models::{
    DeviceAddress, GattEvent, MessageSeverity, Operation, StatusMessage,
};
use crate::domain::protocol::{self, UartProfile};
use std::collections::VecDeque;

const TRANSCRIPT_LIMIT: usize = 200;

/// What the screen hosting the console should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub direction: Direction,
    pub text: String,
}

pub struct ConsoleController {
    profile: UartProfile,
    address: DeviceAddress,
    name: Option<String>,
    connected: bool,
    connecting: bool,
    notifications: bool,
    back_requested: bool,
    received: String,
    transcript: VecDeque<TranscriptLine>,
    status: StatusMessage,
    pub input: String,
}

impl ConsoleController {
    pub fn new(address: DeviceAddress, name: Option<String>, profile: UartProfile) -> Self {
        Self {
            profile,
            address,
            name,
            connected: false,
            connecting: false,
            notifications: false,
            back_requested: false,
            received: String::new(),
            transcript: VecDeque::new(),
            status: StatusMessage::new("READY", MessageSeverity::Info),
            input: String::new(),
        }
    }

    /// Header line, e.g. `Device : UART Echo [C0:FF:EE:00:00:01]`
    pub fn title(&self) -> String {
        format!(
            "Device : {} [{}]",
            self.name.as_deref().unwrap_or("No name..."),
            self.address
        )
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications
    }

    pub fn received(&self) -> &str {
        &self.received
    }

    pub fn transcript(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.transcript.iter()
    }

    pub fn status(&self) -> &StatusMessage {
        &self.status
    }

    fn show(&mut self, message: impl Into<String>, severity: MessageSeverity) {
        let message = message.into();
        tracing::debug!("{}", message);
        self.status = StatusMessage::new(message, severity);
    }

    fn push_line(&mut self, direction: Direction, text: String) {
        if self.transcript.len() == TRANSCRIPT_LIMIT {
            self.transcript.pop_front();
        }
        self.transcript.push_back(TranscriptLine { direction, text });
    }

    fn is_tx(&self, service: &uuid::Uuid, characteristic: &uuid::Uuid) -> bool {
        *service == self.profile.service && *characteristic == self.profile.tx
    }

    fn show_received(&mut self, value: &[u8]) {
        if value.is_empty() {
            return;
        }
        let text = protocol::decode_ascii(value);
        self.received = text.clone();
        self.push_line(Direction::Received, text);
    }

    pub fn handle_event(
        &mut self,
        event: &GattEvent,
        commands: &mut impl GattCommands,
    ) -> Navigation {
        match event {
            GattEvent::Connected { address } if *address == self.address => {
                self.connected = true;
                self.connecting = false;
                self.show("Connected to Device!", MessageSeverity::Success);
                if let Err(e) = commands.discover_services() {
                    tracing::warn!("Service discovery not started: {}", e);
                }
            }
            GattEvent::Connected { address } => {
                tracing::warn!("Connected event for another device: {}", address);
            }
            GattEvent::Disconnected { .. } => {
                self.connected = false;
                self.connecting = false;
                self.notifications = false;
                self.show("Not Connected!", MessageSeverity::Warning);
                if self.back_requested {
                    return Navigation::Finished;
                }
            }
            GattEvent::ServicesDiscovered { services, status } => {
                if !status.is_success() {
                    return Navigation::Stay;
                }
                for service in services {
                    tracing::debug!("UUID={}", protocol::display_uuid(&service.uuid));
                }
                if services.iter().any(|s| s.uuid == self.profile.service) {
                    self.show("Device has expected services", MessageSeverity::Info);
                    if commands
                        .set_indications_state(self.profile.service, self.profile.tx, true)
                        .is_err()
                    {
                        self.show("Failed to set notification", MessageSeverity::Error);
                    }
                } else {
                    self.show(
                        "Device does not have expected GATT services",
                        MessageSeverity::Error,
                    );
                }
            }
            GattEvent::CharacteristicRead {
                service,
                characteristic,
                value,
                status,
            } => {
                if status.is_success() && self.is_tx(service, characteristic) {
                    self.show_received(value);
                }
            }
            GattEvent::NotificationReceived {
                service,
                characteristic,
                value,
            } => {
                if self.is_tx(service, characteristic) {
                    self.show_received(value);
                }
            }
            GattEvent::CharacteristicWritten {
                service,
                characteristic,
                value,
                status,
            } => {
                if status.is_success()
                    && *service == self.profile.service
                    && *characteristic == self.profile.rx
                    && !value.is_empty()
                {
                    let text = protocol::decode_ascii(value);
                    self.show(format!("Value: {} sent", text), MessageSeverity::Success);
                    self.push_line(Direction::Sent, text);
                }
            }
            GattEvent::DescriptorWritten {
                characteristic,
                value,
                status,
                ..
            } if *characteristic == self.profile.tx => {
                if status.is_success() {
                    self.notifications = protocol::cccd_enables(value);
                    if self.notifications {
                        self.show("Notifications enabled", MessageSeverity::Success);
                    } else {
                        self.show("Notifications disabled", MessageSeverity::Info);
                    }
                } else {
                    self.notifications = false;
                    self.show("Failed to set notification", MessageSeverity::Error);
                }
            }
            GattEvent::MtuChanged { mtu, status } if status.is_success() => {
                tracing::info!("Transfer unit is now {} bytes", mtu);
            }
            GattEvent::Rejected { operation, reason } => {
                self.show(format!("{}: {}", operation, reason), MessageSeverity::Warning);
                if matches!(operation, Operation::Connect | Operation::Disconnect) {
                    // Nothing is in progress; a pending back navigation can complete
                    self.connecting = false;
                    if *operation == Operation::Disconnect {
                        self.connected = false;
                        self.notifications = false;
                    }
                    if self.back_requested {
                        return Navigation::Finished;
                    }
                }
            }
            GattEvent::Message(text) => self.show(text.clone(), MessageSeverity::Warning),
            _ => {}
        }
        Navigation::Stay
    }

    /// Connect/disconnect toggle
    pub fn connect_pressed(&mut self, commands: &mut impl GattCommands) {
        if self.connected {
            self.show("onDisconnect", MessageSeverity::Info);
            if let Err(e) = commands.disconnect() {
                tracing::warn!("Disconnect not sent: {}", e);
            }
        } else {
            self.show("onConnect", MessageSeverity::Info);
            if commands.connect(self.address.as_str()).is_ok() {
                self.connecting = true;
            }
        }
    }

    /// Send the input line to RX. Returns true when a write was issued.
    pub fn send(&mut self, commands: &mut impl GattCommands) -> bool {
        if !self.connected {
            self.show("Connect to the device first", MessageSeverity::Warning);
            return false;
        }
        if self.input.is_empty() {
            self.show("Enter text to send", MessageSeverity::Warning);
            return false;
        }
        let Some(bytes) = protocol::encode_ascii(&self.input) else {
            self.show("Only ASCII text can be sent", MessageSeverity::Warning);
            return false;
        };

        match commands.write_characteristic(self.profile.service, self.profile.rx, &bytes) {
            Ok(()) => {
                self.input.clear();
                true
            }
            Err(e) => {
                self.show(format!("Send failed: {}", e), MessageSeverity::Error);
                false
            }
        }
    }

    /// Leave the console: disconnect first if needed.
    pub fn back_pressed(&mut self, commands: &mut impl GattCommands) -> Navigation {
        self.back_requested = true;
        if self.connected || self.connecting {
            if commands.disconnect().is_ok() {
                return Navigation::Stay;
            }
        }
        Navigation::Finished
    }
}
