//! GATT Session Module
//!
//! Owns at most one connection and turns platform callbacks into
//! [`GattEvent`]s. Requests are serialized: one is in flight at a time and
//! the rest wait in FIFO order, so every completion maps to exactly one
//! request.

use crate::domain::commands::GattCommands;
use crate::domain::errors::{GattError, PlatformError};
use crate::domain::models::{
    AppEvent, ConnectionState, DeviceAddress, GattCharacteristic, GattEvent, GattService,
    GattStatus, Operation,
};
use crate::domain::protocol::{self, CCCD_UUID, DEFAULT_MTU};
use crate::infrastructure::bluetooth::platform::{ConnectionHandle, GattPlatform, PlatformEvent};
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Request {
    DiscoverServices,
    Read {
        service: Uuid,
        characteristic: Uuid,
    },
    Write {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    RequestMtu(u16),
    WriteDescriptor {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
}

impl Request {
    fn completed_by(&self, event: &PlatformEvent) -> bool {
        match (self, event) {
            (Request::DiscoverServices, PlatformEvent::ServicesDiscovered { .. }) => true,
            (
                Request::Read {
                    service,
                    characteristic,
                },
                PlatformEvent::CharacteristicRead {
                    service: s,
                    characteristic: c,
                    ..
                },
            )
            | (
                Request::Write {
                    service,
                    characteristic,
                    ..
                },
                PlatformEvent::CharacteristicWritten {
                    service: s,
                    characteristic: c,
                    ..
                },
            )
            | (
                Request::WriteDescriptor {
                    service,
                    characteristic,
                    ..
                },
                PlatformEvent::DescriptorWritten {
                    service: s,
                    characteristic: c,
                    ..
                },
            ) => service == s && characteristic == c,
            (Request::RequestMtu(_), PlatformEvent::MtuChanged { .. }) => true,
            _ => false,
        }
    }
}

/// State of one connection, dropped once the platform reports it closed
struct Connection {
    handle: ConnectionHandle,
    address: DeviceAddress,
    state: ConnectionState,
    services: Vec<GattService>,
    notifying: HashSet<(Uuid, Uuid)>,
    mtu: u16,
    mtu_requested: bool,
    in_flight: Option<Request>,
    queue: VecDeque<Request>,
}

impl Connection {
    fn new(handle: ConnectionHandle, address: DeviceAddress) -> Self {
        Self {
            handle,
            address,
            state: ConnectionState::Connecting,
            services: Vec::new(),
            notifying: HashSet::new(),
            mtu: DEFAULT_MTU,
            mtu_requested: false,
            in_flight: None,
            queue: VecDeque::new(),
        }
    }

    /// Drop back to `ServicesDiscovered` once nothing is notifying.
    fn settle_notifications(&mut self) {
        if self.notifying.is_empty() && self.state == ConnectionState::NotificationsEnabled {
            self.state = ConnectionState::ServicesDiscovered;
        }
    }
}

/// GATT client session over a platform backend
pub struct GattSession<P: GattPlatform + ?Sized = dyn GattPlatform> {
    platform: Box<P>,
    events: mpsc::UnboundedSender<AppEvent>,
    connection: Option<Connection>,
    preferred_mtu: u16,
    has_connected: bool,
}

impl<P: GattPlatform + ?Sized> GattSession<P> {
    pub fn new(
        platform: Box<P>,
        events: mpsc::UnboundedSender<AppEvent>,
        preferred_mtu: u16,
    ) -> Self {
        Self {
            platform,
            events,
            connection: None,
            preferred_mtu,
            has_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &self.connection {
            Some(conn) => conn.state,
            None if self.has_connected => ConnectionState::Disconnected,
            None => ConnectionState::Idle,
        }
    }

    pub fn address(&self) -> Option<&DeviceAddress> {
        self.connection.as_ref().map(|conn| &conn.address)
    }

    pub fn services(&self) -> &[GattService] {
        self.connection
            .as_ref()
            .map(|conn| conn.services.as_slice())
            .unwrap_or(&[])
    }

    pub fn mtu(&self) -> u16 {
        self.connection.as_ref().map_or(DEFAULT_MTU, |conn| conn.mtu)
    }

    pub fn is_notifying(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |conn| conn.notifying.contains(&(service, characteristic)))
    }

    #[cfg(test)]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn emit(&self, event: GattEvent) {
        let _ = self.events.send(AppEvent::Gatt(event));
    }

    fn diagnostic(&self, text: impl Into<String>) {
        self.emit(GattEvent::Message(text.into()));
    }

    fn report(&self, operation: Operation, result: Result<(), GattError>) -> Result<(), GattError> {
        if let Err(e) = &result {
            warn!("{}: {}", operation, e);
            self.emit(GattEvent::Rejected {
                operation,
                reason: e.to_string(),
            });
        }
        result
    }

    fn check(&self, operation: Operation) -> Result<(), GattError> {
        if !self.platform.adapter_available() {
            return Err(GattError::NoAdapter);
        }
        match &self.connection {
            None => Err(GattError::NotConnected),
            Some(conn) if conn.state.permits(operation) => Ok(()),
            Some(conn) => Err(GattError::InvalidState(conn.state)),
        }
    }

    fn lookup(&self, service: Uuid, characteristic: Uuid) -> Result<&GattCharacteristic, GattError> {
        let conn = self.connection.as_ref().ok_or(GattError::NotConnected)?;
        conn.services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(GattError::UnknownService(service))?
            .characteristic(characteristic)
            .ok_or(GattError::UnknownCharacteristic(characteristic))
    }

    fn issue(
        platform: &mut P,
        handle: ConnectionHandle,
        request: &Request,
    ) -> Result<(), PlatformError> {
        match request {
            Request::DiscoverServices => platform.discover_services(handle),
            Request::Read {
                service,
                characteristic,
            } => platform.read_characteristic(handle, *service, *characteristic),
            Request::Write {
                service,
                characteristic,
                value,
            } => platform.write_characteristic(handle, *service, *characteristic, value),
            Request::RequestMtu(mtu) => platform.request_mtu(handle, *mtu),
            Request::WriteDescriptor {
                service,
                characteristic,
                descriptor,
                value,
            } => platform.write_descriptor(handle, *service, *characteristic, *descriptor, value),
        }
    }

    /// Issue now if the link is idle, otherwise queue behind the in-flight request.
    fn submit(&mut self, request: Request) -> Result<(), GattError> {
        let conn = self.connection.as_mut().ok_or(GattError::NotConnected)?;
        if conn.in_flight.is_some() {
            debug!("Queueing {:?} behind {:?}", request, conn.in_flight);
            conn.queue.push_back(request);
            return Ok(());
        }

        Self::issue(self.platform.as_mut(), conn.handle, &request)?;
        conn.in_flight = Some(request);
        Ok(())
    }

    /// Issue queued requests until one is accepted by the platform.
    fn advance(&mut self) {
        loop {
            let failed = {
                let Some(conn) = self.connection.as_mut() else {
                    return;
                };
                if conn.in_flight.is_some() {
                    return;
                }
                let Some(request) = conn.queue.pop_front() else {
                    return;
                };
                match Self::issue(self.platform.as_mut(), conn.handle, &request) {
                    Ok(()) => {
                        conn.in_flight = Some(request);
                        return;
                    }
                    Err(e) => (request, e),
                }
            };

            let (request, e) = failed;
            warn!("Queued request {:?} failed: {}", request, e);
            self.diagnostic(format!("request failed: {}", e));
            if let Request::WriteDescriptor {
                service,
                characteristic,
                value,
                ..
            } = request
            {
                if protocol::cccd_enables(&value) {
                    self.rollback_notification(service, characteristic);
                }
            }
        }
    }

    /// Clear the in-flight slot if `event` completes it.
    fn complete(&mut self, event: &PlatformEvent) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        let expected = conn
            .in_flight
            .as_ref()
            .map_or(false, |request| request.completed_by(event));
        if expected {
            conn.in_flight = None;
        } else {
            warn!("Unexpected completion {:?} (in flight: {:?})", event, conn.in_flight);
        }
    }

    fn rollback_notification(&mut self, service: Uuid, characteristic: Uuid) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.notifying.remove(&(service, characteristic)) {
            if let Err(e) = self.platform.set_characteristic_notification(
                conn.handle,
                service,
                characteristic,
                false,
            ) {
                warn!("Could not clear notification flag for {}: {}", characteristic, e);
            }
            conn.settle_notifications();
        }
    }

    fn try_connect(&mut self, address: &str) -> Result<(), GattError> {
        if !self.platform.adapter_available() {
            return Err(GattError::NoAdapter);
        }
        let address: DeviceAddress = address.parse()?;
        if !self.state().permits(Operation::Connect) {
            return Err(GattError::AlreadyConnected);
        }

        let handle = self.platform.connect(&address)?;
        info!("Connecting to {} ({:?})", address, handle);
        self.connection = Some(Connection::new(handle, address));
        Ok(())
    }

    fn try_disconnect(&mut self) -> Result<(), GattError> {
        self.check(Operation::Disconnect)?;
        let conn = self.connection.as_mut().ok_or(GattError::NotConnected)?;

        conn.state = ConnectionState::Disconnecting;
        conn.queue.clear();
        let handle = conn.handle;
        if let Err(e) = self.platform.disconnect(handle) {
            warn!("Platform refused disconnect ({}), tearing down locally", e);
            self.on_disconnected(GattStatus::Success);
        }
        Ok(())
    }

    fn try_discover(&mut self) -> Result<(), GattError> {
        self.check(Operation::DiscoverServices)?;
        self.submit(Request::DiscoverServices)
    }

    fn try_read(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), GattError> {
        self.check(Operation::ReadCharacteristic)?;
        self.lookup(service, characteristic)?;
        self.submit(Request::Read {
            service,
            characteristic,
        })
    }

    fn try_write(&mut self, service: Uuid, characteristic: Uuid, value: &[u8]) -> Result<(), GattError> {
        self.check(Operation::WriteCharacteristic)?;
        self.lookup(service, characteristic)?;
        self.submit(Request::Write {
            service,
            characteristic,
            value: value.to_vec(),
        })
    }

    fn try_set_indications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), GattError> {
        self.check(Operation::SetNotifications)?;
        let descriptor = self
            .lookup(service, characteristic)?
            .descriptor(CCCD_UUID)
            .map(|d| d.uuid)
            .ok_or(GattError::MissingDescriptor(CCCD_UUID))?;

        let preferred_mtu = self.preferred_mtu;
        let conn = self.connection.as_mut().ok_or(GattError::NotConnected)?;
        self.platform
            .set_characteristic_notification(conn.handle, service, characteristic, enabled)?;
        if enabled {
            conn.notifying.insert((service, characteristic));
        } else {
            conn.notifying.remove(&(service, characteristic));
        }

        let negotiate = enabled && !conn.mtu_requested && conn.mtu < preferred_mtu;
        if negotiate {
            conn.mtu_requested = true;
            debug!("Requesting MTU {}", preferred_mtu);
            if let Err(e) = self.submit(Request::RequestMtu(preferred_mtu)) {
                warn!("MTU request not issued: {}", e);
            }
        }

        let result = self.submit(Request::WriteDescriptor {
            service,
            characteristic,
            descriptor,
            value: protocol::cccd_value(enabled).to_vec(),
        });
        if result.is_err() && enabled {
            self.rollback_notification(service, characteristic);
        }
        result
    }

    /// Feed a platform callback into the session.
    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        let Some(handle) = event.handle() else {
            return;
        };
        if self.connection.as_ref().map(|conn| conn.handle) != Some(handle) {
            debug!("Ignoring event for stale {:?}: {:?}", handle, event);
            return;
        }

        match &event {
            PlatformEvent::ConnectionStateChanged {
                connected: true, ..
            } => self.on_connected(),
            PlatformEvent::ConnectionStateChanged {
                connected: false,
                status,
                ..
            } => self.on_disconnected(*status),
            PlatformEvent::CharacteristicChanged {
                service,
                characteristic,
                value,
                ..
            } => {
                if self.is_notifying(*service, *characteristic) {
                    self.emit(GattEvent::NotificationReceived {
                        service: *service,
                        characteristic: *characteristic,
                        value: value.clone(),
                    });
                } else {
                    debug!("Dropping value change on {} without notifications", characteristic);
                }
            }
            _ => {
                self.complete(&event);
                self.on_completion(event);
                self.advance();
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.state != ConnectionState::Connecting {
            debug!("Connected while {:?}, ignoring", conn.state);
            return;
        }

        conn.state = ConnectionState::Connected;
        let address = conn.address.clone();
        info!("Connected to {}", address);
        self.emit(GattEvent::Connected { address });
    }

    fn on_disconnected(&mut self, status: GattStatus) {
        let Some(conn) = self.connection.take() else {
            return;
        };

        info!("Disconnected from {} ({})", conn.address, status);
        self.platform.close(conn.handle);
        self.has_connected = true;

        if !status.is_success() {
            self.diagnostic(format!("connection to {} failed: {}", conn.address, status));
        }
        self.emit(GattEvent::Disconnected {
            address: conn.address,
        });
    }

    fn on_completion(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ServicesDiscovered {
                services, status, ..
            } => {
                if status.is_success() {
                    if let Some(conn) = self.connection.as_mut() {
                        info!("Discovered {} services", services.len());
                        conn.services = services.clone();
                        if conn.state == ConnectionState::Connected {
                            conn.state = ConnectionState::ServicesDiscovered;
                        }
                    }
                } else {
                    self.diagnostic(format!("service discovery failed: {}", status));
                }
                self.emit(GattEvent::ServicesDiscovered { services, status });
            }
            PlatformEvent::CharacteristicRead {
                service,
                characteristic,
                value,
                status,
                ..
            } => {
                if !status.is_success() {
                    self.diagnostic(format!("characteristic read err: {}", status));
                }
                self.emit(GattEvent::CharacteristicRead {
                    service,
                    characteristic,
                    value,
                    status,
                });
            }
            PlatformEvent::CharacteristicWritten {
                service,
                characteristic,
                value,
                status,
                ..
            } => {
                if !status.is_success() {
                    self.diagnostic(format!("characteristic write err: {}", status));
                }
                self.emit(GattEvent::CharacteristicWritten {
                    service,
                    characteristic,
                    value,
                    status,
                });
            }
            PlatformEvent::DescriptorWritten {
                service,
                characteristic,
                descriptor,
                value,
                status,
                ..
            } => {
                let enabling = protocol::cccd_enables(&value);
                if status.is_success() {
                    if let Some(conn) = self.connection.as_mut() {
                        if enabling && conn.state == ConnectionState::ServicesDiscovered {
                            conn.state = ConnectionState::NotificationsEnabled;
                        } else if !enabling {
                            conn.settle_notifications();
                        }
                    }
                } else {
                    self.diagnostic(format!("descriptor write err: {}", status));
                    if enabling {
                        self.rollback_notification(service, characteristic);
                    } else if let Some(conn) = self.connection.as_mut() {
                        // The local flag is already off
                        conn.settle_notifications();
                    }
                }
                self.emit(GattEvent::DescriptorWritten {
                    service,
                    characteristic,
                    descriptor,
                    value,
                    status,
                });
            }
            PlatformEvent::MtuChanged { mtu, status, .. } => {
                if status.is_success() {
                    if let Some(conn) = self.connection.as_mut() {
                        info!("MTU negotiated: {}", mtu);
                        conn.mtu = mtu;
                    }
                } else {
                    self.diagnostic(format!("MTU request err: {}", status));
                }
                self.emit(GattEvent::MtuChanged { mtu, status });
            }
            other => debug!("Unhandled platform event {:?}", other),
        }
    }
}

impl<P: GattPlatform + ?Sized> GattCommands for GattSession<P> {
    fn connect(&mut self, address: &str) -> Result<(), GattError> {
        let result = self.try_connect(address);
        self.report(Operation::Connect, result)
    }

    fn disconnect(&mut self) -> Result<(), GattError> {
        let result = self.try_disconnect();
        self.report(Operation::Disconnect, result)
    }

    fn discover_services(&mut self) -> Result<(), GattError> {
        let result = self.try_discover();
        self.report(Operation::DiscoverServices, result)
    }

    fn read_characteristic(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), GattError> {
        let result = self.try_read(service, characteristic);
        self.report(Operation::ReadCharacteristic, result)
    }

    fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), GattError> {
        let result = self.try_write(service, characteristic, value);
        self.report(Operation::WriteCharacteristic, result)
    }

    fn set_indications_state(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), GattError> {
        let result = self.try_set_indications(service, characteristic, enabled);
        self.report(Operation::SetNotifications, result)
    }
}

impl<P: GattPlatform + ?Sized> Drop for GattSession<P> {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = self.platform.disconnect(conn.handle);
            self.platform.close(conn.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CharacteristicProperties, GattDescriptor};
    use crate::domain::protocol::{
        UART_RX_CHAR_UUID as RX, UART_SERVICE_UUID as UART, UART_TX_CHAR_UUID as TX,
    };

    const HANDLE: ConnectionHandle = ConnectionHandle(7);
    const ADDRESS: &str = "C0:FF:EE:00:00:01";

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Connect(DeviceAddress),
        Disconnect,
        Close,
        Discover,
        Read(Uuid),
        Write(Uuid, Vec<u8>),
        Notify(Uuid, bool),
        Mtu(u16),
        Descriptor(Uuid, Vec<u8>),
    }

    struct FakeGatt {
        adapter: bool,
        refuse_writes: bool,
        calls: Vec<Call>,
    }

    impl FakeGatt {
        fn new() -> Self {
            Self {
                adapter: true,
                refuse_writes: false,
                calls: Vec::new(),
            }
        }
    }

    impl GattPlatform for FakeGatt {
        fn adapter_available(&self) -> bool {
            self.adapter
        }
        fn connect(&mut self, address: &DeviceAddress) -> Result<ConnectionHandle, PlatformError> {
            self.calls.push(Call::Connect(address.clone()));
            Ok(HANDLE)
        }
        fn disconnect(&mut self, _: ConnectionHandle) -> Result<(), PlatformError> {
            self.calls.push(Call::Disconnect);
            Ok(())
        }
        fn close(&mut self, _: ConnectionHandle) {
            self.calls.push(Call::Close);
        }
        fn discover_services(&mut self, _: ConnectionHandle) -> Result<(), PlatformError> {
            self.calls.push(Call::Discover);
            Ok(())
        }
        fn read_characteristic(
            &mut self,
            _: ConnectionHandle,
            _: Uuid,
            characteristic: Uuid,
        ) -> Result<(), PlatformError> {
            self.calls.push(Call::Read(characteristic));
            Ok(())
        }
        fn write_characteristic(
            &mut self,
            _: ConnectionHandle,
            _: Uuid,
            characteristic: Uuid,
            value: &[u8],
        ) -> Result<(), PlatformError> {
            if self.refuse_writes {
                return Err(PlatformError::Rejected("busy".to_string()));
            }
            self.calls.push(Call::Write(characteristic, value.to_vec()));
            Ok(())
        }
        fn set_characteristic_notification(
            &mut self,
            _: ConnectionHandle,
            _: Uuid,
            characteristic: Uuid,
            enabled: bool,
        ) -> Result<(), PlatformError> {
            self.calls.push(Call::Notify(characteristic, enabled));
            Ok(())
        }
        fn request_mtu(&mut self, _: ConnectionHandle, mtu: u16) -> Result<(), PlatformError> {
            self.calls.push(Call::Mtu(mtu));
            Ok(())
        }
        fn write_descriptor(
            &mut self,
            _: ConnectionHandle,
            _: Uuid,
            _: Uuid,
            descriptor: Uuid,
            value: &[u8],
        ) -> Result<(), PlatformError> {
            self.calls.push(Call::Descriptor(descriptor, value.to_vec()));
            Ok(())
        }
    }

    fn uart_services(with_cccd: bool) -> Vec<GattService> {
        let descriptors = if with_cccd {
            vec![GattDescriptor { uuid: CCCD_UUID }]
        } else {
            Vec::new()
        };
        vec![GattService {
            uuid: UART,
            characteristics: vec![
                GattCharacteristic {
                    uuid: RX,
                    properties: CharacteristicProperties {
                        write: true,
                        ..Default::default()
                    },
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: TX,
                    properties: CharacteristicProperties {
                        notify: true,
                        read: true,
                        ..Default::default()
                    },
                    descriptors,
                },
            ],
        }]
    }

    type Session = GattSession<FakeGatt>;

    fn session() -> (Session, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (GattSession::new(Box::new(FakeGatt::new()), tx, 512), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<GattEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::Gatt(event) = event {
                events.push(event);
            }
        }
        events
    }

    fn connected_session(with_cccd: bool) -> (Session, mpsc::UnboundedReceiver<AppEvent>) {
        let (mut session, mut rx) = session();
        session.connect(ADDRESS).unwrap();
        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: HANDLE,
            connected: true,
            status: GattStatus::Success,
        });
        session.discover_services().unwrap();
        session.handle_platform_event(PlatformEvent::ServicesDiscovered {
            handle: HANDLE,
            services: uart_services(with_cccd),
            status: GattStatus::Success,
        });
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        drain(&mut rx);
        (session, rx)
    }

    fn calls_after_connect(session: &Session) -> Vec<Call> {
        session
            .platform()
            .calls
            .iter()
            .filter(|c| !matches!(c, Call::Connect(_) | Call::Discover))
            .cloned()
            .collect()
    }

    #[test]
    fn test_operations_before_connected_fail_locally() {
        let (mut session, mut rx) = session();

        assert_eq!(session.discover_services(), Err(GattError::NotConnected));
        assert_eq!(session.read_characteristic(UART, TX), Err(GattError::NotConnected));
        assert_eq!(
            session.write_characteristic(UART, RX, b"x"),
            Err(GattError::NotConnected)
        );
        assert_eq!(
            session.set_indications_state(UART, TX, true),
            Err(GattError::NotConnected)
        );
        assert_eq!(session.disconnect(), Err(GattError::NotConnected));

        session.connect(ADDRESS).unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(
            session.discover_services(),
            Err(GattError::InvalidState(ConnectionState::Connecting))
        );
        assert_eq!(
            session.write_characteristic(UART, RX, b"x"),
            Err(GattError::InvalidState(ConnectionState::Connecting))
        );

        let calls = &session.platform().calls;
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::Connect(_)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 7);
        assert!(events
            .iter()
            .all(|e| matches!(e, GattEvent::Rejected { .. })));
        assert_eq!(
            events[0],
            GattEvent::Rejected {
                operation: Operation::DiscoverServices,
                reason: GattError::NotConnected.to_string(),
            }
        );
    }

    #[test]
    fn test_connect_preconditions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut no_adapter = FakeGatt::new();
        no_adapter.adapter = false;
        let mut session = GattSession::new(Box::new(no_adapter), tx, 512);
        assert_eq!(session.connect(ADDRESS), Err(GattError::NoAdapter));

        let (mut session, _rx) = self::session();
        assert!(matches!(
            session.connect("not-an-address"),
            Err(GattError::InvalidAddress(_))
        ));
        session.connect(ADDRESS).unwrap();
        assert_eq!(
            session.connect("C0:FF:EE:00:00:02"),
            Err(GattError::AlreadyConnected)
        );
        assert_eq!(session.address().map(|a| a.as_str()), Some(ADDRESS));
        assert_eq!(session.platform().calls.len(), 1);
    }

    #[test]
    fn test_connect_and_discover_flow() {
        let (mut session, mut rx) = session();
        session.connect(ADDRESS).unwrap();
        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: HANDLE,
            connected: true,
            status: GattStatus::Success,
        });
        assert_eq!(session.state(), ConnectionState::Connected);

        session.discover_services().unwrap();
        session.handle_platform_event(PlatformEvent::ServicesDiscovered {
            handle: HANDLE,
            services: uart_services(true),
            status: GattStatus::Success,
        });

        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        assert_eq!(session.services().len(), 1);

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            GattEvent::Connected {
                address: ADDRESS.parse().unwrap()
            }
        );
        assert!(matches!(
            &events[1],
            GattEvent::ServicesDiscovered { services, status: GattStatus::Success } if services.len() == 1
        ));
    }

    #[test]
    fn test_write_hello_produces_one_call_and_one_event() {
        let (mut session, mut rx) = connected_session(true);

        session.write_characteristic(UART, RX, b"hello").unwrap();
        assert_eq!(
            calls_after_connect(&session),
            vec![Call::Write(RX, vec![0x68, 0x65, 0x6C, 0x6C, 0x6F])]
        );

        session.handle_platform_event(PlatformEvent::CharacteristicWritten {
            handle: HANDLE,
            service: UART,
            characteristic: RX,
            value: b"hello".to_vec(),
            status: GattStatus::Success,
        });

        assert_eq!(
            drain(&mut rx),
            vec![GattEvent::CharacteristicWritten {
                service: UART,
                characteristic: RX,
                value: vec![0x68, 0x65, 0x6C, 0x6C, 0x6F],
                status: GattStatus::Success,
            }]
        );
    }

    #[test]
    fn test_read_reports_value_and_failure_status() {
        let (mut session, mut rx) = connected_session(true);

        session.read_characteristic(UART, TX).unwrap();
        session.handle_platform_event(PlatformEvent::CharacteristicRead {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            value: Vec::new(),
            status: GattStatus::Failure(2),
        });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], GattEvent::Message(text) if text.contains("read err")));
        assert!(matches!(
            &events[1],
            GattEvent::CharacteristicRead { characteristic, status: GattStatus::Failure(2), .. } if *characteristic == TX
        ));
        assert_eq!(calls_after_connect(&session), vec![Call::Read(TX)]);
    }

    #[test]
    fn test_unknown_characteristic_fails_without_platform_call() {
        let (mut session, mut rx) = connected_session(true);
        let other = Uuid::from_u128(0x1234);

        assert_eq!(
            session.read_characteristic(other, TX),
            Err(GattError::UnknownService(other))
        );
        assert_eq!(
            session.write_characteristic(UART, other, b"x"),
            Err(GattError::UnknownCharacteristic(other))
        );
        assert!(calls_after_connect(&session).is_empty());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_requests_are_serialized() {
        let (mut session, mut rx) = connected_session(true);

        session.write_characteristic(UART, RX, b"one").unwrap();
        session.write_characteristic(UART, RX, b"two").unwrap();
        assert_eq!(
            calls_after_connect(&session),
            vec![Call::Write(RX, b"one".to_vec())]
        );

        session.handle_platform_event(PlatformEvent::CharacteristicWritten {
            handle: HANDLE,
            service: UART,
            characteristic: RX,
            value: b"one".to_vec(),
            status: GattStatus::Success,
        });
        assert_eq!(
            calls_after_connect(&session),
            vec![Call::Write(RX, b"one".to_vec()), Call::Write(RX, b"two".to_vec())]
        );

        session.handle_platform_event(PlatformEvent::CharacteristicWritten {
            handle: HANDLE,
            service: UART,
            characteristic: RX,
            value: b"two".to_vec(),
            status: GattStatus::Success,
        });
        let values: Vec<Vec<u8>> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                GattEvent::CharacteristicWritten { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_enable_negotiates_mtu_then_writes_cccd() {
        let (mut session, mut rx) = connected_session(true);

        session.set_indications_state(UART, TX, true).unwrap();
        assert!(session.is_notifying(UART, TX));
        assert_eq!(
            calls_after_connect(&session),
            vec![Call::Notify(TX, true), Call::Mtu(512)]
        );

        session.handle_platform_event(PlatformEvent::MtuChanged {
            handle: HANDLE,
            mtu: 247,
            status: GattStatus::Success,
        });
        assert_eq!(session.mtu(), 247);
        assert_eq!(
            calls_after_connect(&session).last(),
            Some(&Call::Descriptor(CCCD_UUID, vec![0x01, 0x00]))
        );
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);

        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x01, 0x00],
            status: GattStatus::Success,
        });
        assert_eq!(session.state(), ConnectionState::NotificationsEnabled);

        let events = drain(&mut rx);
        assert!(matches!(events[0], GattEvent::MtuChanged { mtu: 247, .. }));
        assert!(matches!(events[1], GattEvent::DescriptorWritten { .. }));
    }

    #[test]
    fn test_enable_then_disable_leaves_cccd_disabled() {
        let (mut session, _rx) = connected_session(true);

        session.set_indications_state(UART, TX, true).unwrap();
        session.set_indications_state(UART, TX, false).unwrap();
        assert!(!session.is_notifying(UART, TX));

        session.handle_platform_event(PlatformEvent::MtuChanged {
            handle: HANDLE,
            mtu: 512,
            status: GattStatus::Success,
        });
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x01, 0x00],
            status: GattStatus::Success,
        });
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x00, 0x00],
            status: GattStatus::Success,
        });

        let descriptor_writes: Vec<Vec<u8>> = calls_after_connect(&session)
            .into_iter()
            .filter_map(|c| match c {
                Call::Descriptor(_, value) => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(descriptor_writes, vec![vec![0x01, 0x00], vec![0x00, 0x00]]);
        assert!(!session.is_notifying(UART, TX));
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
    }

    #[test]
    fn test_failed_enable_rolls_back_local_flag() {
        let (mut session, mut rx) = connected_session(true);

        session.set_indications_state(UART, TX, true).unwrap();
        session.handle_platform_event(PlatformEvent::MtuChanged {
            handle: HANDLE,
            mtu: 185,
            status: GattStatus::Success,
        });
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x01, 0x00],
            status: GattStatus::Failure(3),
        });

        assert!(!session.is_notifying(UART, TX));
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        assert_eq!(
            calls_after_connect(&session).last(),
            Some(&Call::Notify(TX, false))
        );
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, GattEvent::Message(text) if text.contains("descriptor write err"))));
    }

    #[test]
    fn test_failed_disable_does_not_leave_notifications_enabled() {
        let (mut session, mut rx) = connected_session(true);

        session.set_indications_state(UART, TX, true).unwrap();
        session.handle_platform_event(PlatformEvent::MtuChanged {
            handle: HANDLE,
            mtu: 512,
            status: GattStatus::Success,
        });
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x01, 0x00],
            status: GattStatus::Success,
        });
        assert_eq!(session.state(), ConnectionState::NotificationsEnabled);

        session.set_indications_state(UART, TX, false).unwrap();
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x00, 0x00],
            status: GattStatus::Failure(3),
        });

        assert!(!session.is_notifying(UART, TX));
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, GattEvent::Message(text) if text.contains("descriptor write err"))));
    }

    #[test]
    fn test_mtu_negotiated_once_per_connection() {
        let (mut session, _rx) = connected_session(true);

        session.set_indications_state(UART, TX, true).unwrap();
        session.handle_platform_event(PlatformEvent::MtuChanged {
            handle: HANDLE,
            mtu: 247,
            status: GattStatus::Success,
        });
        session.handle_platform_event(PlatformEvent::DescriptorWritten {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            descriptor: CCCD_UUID,
            value: vec![0x01, 0x00],
            status: GattStatus::Success,
        });
        session.set_indications_state(UART, TX, true).unwrap();

        let mtu_requests = calls_after_connect(&session)
            .iter()
            .filter(|c| matches!(c, Call::Mtu(_)))
            .count();
        assert_eq!(mtu_requests, 1);
    }

    #[test]
    fn test_missing_cccd_fails_locally() {
        let (mut session, _rx) = connected_session(false);

        assert_eq!(
            session.set_indications_state(UART, TX, true),
            Err(GattError::MissingDescriptor(CCCD_UUID))
        );
        assert!(calls_after_connect(&session).is_empty());
        assert!(!session.is_notifying(UART, TX));
    }

    #[test]
    fn test_notifications_require_enabled_flag() {
        let (mut session, mut rx) = connected_session(true);
        let changed = PlatformEvent::CharacteristicChanged {
            handle: HANDLE,
            service: UART,
            characteristic: TX,
            value: b"ping".to_vec(),
        };

        session.handle_platform_event(changed.clone());
        assert!(drain(&mut rx).is_empty());

        session.set_indications_state(UART, TX, true).unwrap();
        session.handle_platform_event(changed);
        assert_eq!(
            drain(&mut rx),
            vec![GattEvent::NotificationReceived {
                service: UART,
                characteristic: TX,
                value: b"ping".to_vec(),
            }]
        );
    }

    #[test]
    fn test_disconnect_closes_handle_and_allows_reconnect() {
        let (mut session, mut rx) = connected_session(true);
        session.write_characteristic(UART, RX, b"a").unwrap();
        session.write_characteristic(UART, RX, b"b").unwrap();

        session.disconnect().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnecting);
        assert_eq!(
            session.write_characteristic(UART, RX, b"c"),
            Err(GattError::InvalidState(ConnectionState::Disconnecting))
        );

        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: HANDLE,
            connected: false,
            status: GattStatus::Success,
        });

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.services().is_empty());
        let calls = calls_after_connect(&session);
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::Disconnect, Call::Close]
        );
        assert!(!calls.contains(&Call::Write(RX, b"b".to_vec())));
        assert!(drain(&mut rx).contains(&GattEvent::Disconnected {
            address: ADDRESS.parse().unwrap()
        }));

        session.connect(ADDRESS).unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_disconnect_before_discovery_still_reports_disconnected() {
        let (mut session, mut rx) = session();
        session.connect(ADDRESS).unwrap();
        session.disconnect().unwrap();
        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: HANDLE,
            connected: false,
            status: GattStatus::Success,
        });

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![GattEvent::Disconnected {
                address: ADDRESS.parse().unwrap()
            }]
        );
    }

    #[test]
    fn test_unreachable_device_never_reports_connected() {
        let (mut session, mut rx) = session();
        session.connect(ADDRESS).unwrap();
        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: HANDLE,
            connected: false,
            status: GattStatus::Failure(133),
        });

        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, GattEvent::Connected { .. })));
        assert!(matches!(events.last(), Some(GattEvent::Disconnected { .. })));
        assert_eq!(session.platform().calls.last(), Some(&Call::Close));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_handle_events_are_ignored() {
        let (mut session, mut rx) = connected_session(true);
        session.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            handle: ConnectionHandle(99),
            connected: false,
            status: GattStatus::Success,
        });

        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_refused_write_is_reported_locally() {
        let (mut session, mut rx) = connected_session(true);
        session.platform.refuse_writes = true;

        assert!(matches!(
            session.write_characteristic(UART, RX, b"x"),
            Err(GattError::Platform(_))
        ));
        assert_eq!(drain(&mut rx).len(), 1);

        session.platform.refuse_writes = false;
        session.write_characteristic(UART, RX, b"y").unwrap();
        assert_eq!(
            calls_after_connect(&session),
            vec![Call::Write(RX, b"y".to_vec())]
        );
    }
}
