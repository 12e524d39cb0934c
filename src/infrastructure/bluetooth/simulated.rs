//! Simulated Bluetooth Radio
//!
//! An in-process backend with a fixed catalog of virtual peripherals. Every
//! call pushes its completion into the platform channel before returning,
//! so completions keep the order of the requests that caused them.

use crate::domain::errors::PlatformError;
use crate::domain::models::{
    CharacteristicProperties, DeviceAddress, DiscoveredDevice, GattCharacteristic, GattDescriptor,
    GattService, GattStatus,
};
use crate::domain::protocol::{
    self, CCCD_UUID, UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID,
};
use crate::infrastructure::bluetooth::platform::{
    push_ad_structure, ConnectionHandle, GattPlatform, PlatformEvent, PlatformEventSender,
    ScanPlatform,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Status reported when the peripheral cannot be reached (Android's GATT_ERROR)
pub const STATUS_UNREACHABLE: u16 = 133;
const STATUS_READ_NOT_PERMITTED: u16 = 0x02;
const STATUS_WRITE_NOT_PERMITTED: u16 = 0x03;
const STATUS_ATTRIBUTE_NOT_FOUND: u16 = 0x0A;

const HEART_RATE_SERVICE: u16 = 0x180D;
const HEART_RATE_MEASUREMENT: u16 = 0x2A37;

/// Expand a 16-bit SIG-assigned number onto the Bluetooth base UUID
pub fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

/// A peripheral the simulated radio can see
#[derive(Debug, Clone)]
pub struct VirtualPeripheral {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub services: Vec<GattService>,
    /// Characteristic that echoes every write made in the same service
    pub echo_to: Option<Uuid>,
    pub max_mtu: u16,
}

impl VirtualPeripheral {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<&GattCharacteristic> {
        self.services
            .iter()
            .find(|s| s.uuid == service)
            .and_then(|s| s.characteristic(characteristic))
    }

    fn advertisement(&self) -> Vec<u8> {
        let mut data = vec![0x02, 0x01, 0x06];
        if let Some(name) = &self.name {
            if !push_ad_structure(&mut data, 0x09, name.as_bytes()) {
                debug!("Name of {} too long to advertise", self.address);
            }
        }
        data
    }
}

fn characteristic(uuid: Uuid, properties: CharacteristicProperties) -> GattCharacteristic {
    let descriptors = if properties.notify || properties.indicate {
        vec![GattDescriptor { uuid: CCCD_UUID }]
    } else {
        Vec::new()
    };
    GattCharacteristic {
        uuid,
        properties,
        descriptors,
    }
}

fn uart_service(tx_notifies: bool) -> GattService {
    GattService {
        uuid: UART_SERVICE_UUID,
        characteristics: vec![
            characteristic(
                UART_RX_CHAR_UUID,
                CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..Default::default()
                },
            ),
            characteristic(
                UART_TX_CHAR_UUID,
                CharacteristicProperties {
                    read: true,
                    notify: tx_notifies,
                    ..Default::default()
                },
            ),
        ],
    }
}

/// Peripherals seen by a fresh simulated radio
pub fn default_catalog() -> Vec<VirtualPeripheral> {
    vec![
        VirtualPeripheral {
            address: DeviceAddress::from_u64(0xC0FF_EE00_0001),
            name: Some("UART Echo".to_string()),
            rssi: -48,
            services: vec![uart_service(true)],
            echo_to: Some(UART_TX_CHAR_UUID),
            max_mtu: 247,
        },
        VirtualPeripheral {
            address: DeviceAddress::from_u64(0xC0FF_EE00_0002),
            name: Some("UART Sink".to_string()),
            rssi: -71,
            services: vec![uart_service(false)],
            echo_to: None,
            max_mtu: 185,
        },
        VirtualPeripheral {
            address: DeviceAddress::from_u64(0xC0FF_EE00_0003),
            name: Some("Heart Rate Strap".to_string()),
            rssi: -63,
            services: vec![GattService {
                uuid: sig_uuid(HEART_RATE_SERVICE),
                characteristics: vec![characteristic(
                    sig_uuid(HEART_RATE_MEASUREMENT),
                    CharacteristicProperties {
                        notify: true,
                        ..Default::default()
                    },
                )],
            }],
            echo_to: None,
            max_mtu: 23,
        },
        VirtualPeripheral {
            address: DeviceAddress::from_u64(0xC0FF_EE00_0004),
            name: None,
            rssi: -90,
            services: Vec::new(),
            echo_to: None,
            max_mtu: 23,
        },
    ]
}

pub type Catalog = Arc<Vec<VirtualPeripheral>>;

/// Advertisement side of the simulated radio
pub struct SimulatedScanner {
    catalog: Catalog,
    events: PlatformEventSender,
    permitted: bool,
    powered: bool,
    scanning: bool,
}

impl SimulatedScanner {
    pub fn new(catalog: Catalog, events: PlatformEventSender) -> Self {
        Self {
            catalog,
            events,
            permitted: true,
            powered: true,
            scanning: false,
        }
    }

    pub fn with_permission(mut self, permitted: bool) -> Self {
        self.permitted = permitted;
        self
    }

    pub fn with_adapter_enabled(mut self, powered: bool) -> Self {
        self.powered = powered;
        self
    }
}

impl ScanPlatform for SimulatedScanner {
    fn adapter_enabled(&self) -> bool {
        self.powered
    }

    fn scan_permitted(&self) -> bool {
        self.permitted
    }

    fn request_scan_permission(&mut self) {
        info!("Simulated user granted the scan permission");
        self.permitted = true;
    }

    fn start_scan(&mut self) -> Result<(), PlatformError> {
        if !self.powered {
            return Err(PlatformError::AdapterUnavailable);
        }
        self.scanning = true;
        for peripheral in self.catalog.iter() {
            let _ = self
                .events
                .send(PlatformEvent::AdvertisementReceived(DiscoveredDevice {
                    address: peripheral.address.clone(),
                    name: peripheral.name.clone(),
                    rssi: peripheral.rssi,
                    advertisement: peripheral.advertisement(),
                }));
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.scanning = false;
    }
}

struct Link {
    peripheral: Option<usize>,
    connected: bool,
    values: HashMap<(Uuid, Uuid), Vec<u8>>,
    subscribed: HashMap<(Uuid, Uuid), bool>,
}

/// GATT side of the simulated radio
pub struct SimulatedGatt {
    catalog: Catalog,
    events: PlatformEventSender,
    powered: bool,
    next_handle: u64,
    links: HashMap<ConnectionHandle, Link>,
}

impl SimulatedGatt {
    pub fn new(catalog: Catalog, events: PlatformEventSender) -> Self {
        Self {
            catalog,
            events,
            powered: true,
            next_handle: 1,
            links: HashMap::new(),
        }
    }

    pub fn with_adapter_enabled(mut self, powered: bool) -> Self {
        self.powered = powered;
        self
    }

    /// Number of handles not yet closed
    pub fn open_links(&self) -> usize {
        self.links.len()
    }

    fn send(&self, event: PlatformEvent) {
        let _ = self.events.send(event);
    }

    fn live_link(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<(&mut Link, &VirtualPeripheral), PlatformError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(PlatformError::UnknownHandle)?;
        match link.peripheral.and_then(|index| self.catalog.get(index)) {
            Some(peripheral) if link.connected => Ok((link, peripheral)),
            _ => Err(PlatformError::Rejected("link is not connected".to_string())),
        }
    }
}

impl GattPlatform for SimulatedGatt {
    fn adapter_available(&self) -> bool {
        self.powered
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<ConnectionHandle, PlatformError> {
        if !self.powered {
            return Err(PlatformError::AdapterUnavailable);
        }

        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;

        let peripheral = self.catalog.iter().position(|p| &p.address == address);
        let connected = peripheral.is_some();
        self.links.insert(
            handle,
            Link {
                peripheral,
                connected,
                values: HashMap::new(),
                subscribed: HashMap::new(),
            },
        );

        let status = if connected {
            GattStatus::Success
        } else {
            debug!("No virtual peripheral at {}", address);
            GattStatus::Failure(STATUS_UNREACHABLE)
        };
        self.send(PlatformEvent::ConnectionStateChanged {
            handle,
            connected,
            status,
        });
        Ok(handle)
    }

    fn disconnect(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(PlatformError::UnknownHandle)?;
        if link.connected {
            link.connected = false;
            self.send(PlatformEvent::ConnectionStateChanged {
                handle,
                connected: false,
                status: GattStatus::Success,
            });
        }
        Ok(())
    }

    fn close(&mut self, handle: ConnectionHandle) {
        self.links.remove(&handle);
    }

    fn discover_services(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError> {
        let (_, peripheral) = self.live_link(handle)?;
        let services = peripheral.services.clone();
        self.send(PlatformEvent::ServicesDiscovered {
            handle,
            services,
            status: GattStatus::Success,
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError> {
        let (link, peripheral) = self.live_link(handle)?;
        let (value, status) = match peripheral.characteristic(service, characteristic) {
            None => (Vec::new(), GattStatus::Failure(STATUS_ATTRIBUTE_NOT_FOUND)),
            Some(c) if !c.properties.read => {
                (Vec::new(), GattStatus::Failure(STATUS_READ_NOT_PERMITTED))
            }
            Some(_) => (
                link.values
                    .get(&(service, characteristic))
                    .cloned()
                    .unwrap_or_default(),
                GattStatus::Success,
            ),
        };
        self.send(PlatformEvent::CharacteristicRead {
            handle,
            service,
            characteristic,
            value,
            status,
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        let (link, peripheral) = self.live_link(handle)?;
        let status = match peripheral.characteristic(service, characteristic) {
            None => GattStatus::Failure(STATUS_ATTRIBUTE_NOT_FOUND),
            Some(c) if !(c.properties.write || c.properties.write_without_response) => {
                GattStatus::Failure(STATUS_WRITE_NOT_PERMITTED)
            }
            Some(_) => GattStatus::Success,
        };

        let mut echo = None;
        if status.is_success() {
            link.values.insert((service, characteristic), value.to_vec());
            if let Some(target) = peripheral.echo_to.filter(|t| *t != characteristic) {
                link.values.insert((service, target), value.to_vec());
                if link.subscribed.get(&(service, target)).copied().unwrap_or(false) {
                    echo = Some(target);
                }
            }
        }

        self.send(PlatformEvent::CharacteristicWritten {
            handle,
            service,
            characteristic,
            value: value.to_vec(),
            status,
        });
        if let Some(target) = echo {
            self.send(PlatformEvent::CharacteristicChanged {
                handle,
                service,
                characteristic: target,
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    fn set_characteristic_notification(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        _enabled: bool,
    ) -> Result<(), PlatformError> {
        let (_, peripheral) = self.live_link(handle)?;
        match peripheral.characteristic(service, characteristic) {
            Some(_) => Ok(()),
            None => Err(PlatformError::Rejected(format!(
                "no characteristic {}",
                protocol::display_uuid(&characteristic)
            ))),
        }
    }

    fn request_mtu(&mut self, handle: ConnectionHandle, mtu: u16) -> Result<(), PlatformError> {
        let (_, peripheral) = self.live_link(handle)?;
        let mtu = mtu.min(peripheral.max_mtu);
        self.send(PlatformEvent::MtuChanged {
            handle,
            mtu,
            status: GattStatus::Success,
        });
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        let (link, peripheral) = self.live_link(handle)?;
        let found = peripheral
            .characteristic(service, characteristic)
            .and_then(|c| c.descriptor(descriptor))
            .is_some();

        let status = if found {
            if descriptor == CCCD_UUID {
                link.subscribed
                    .insert((service, characteristic), protocol::cccd_enables(value));
            }
            GattStatus::Success
        } else {
            GattStatus::Failure(STATUS_ATTRIBUTE_NOT_FOUND)
        };

        self.send(PlatformEvent::DescriptorWritten {
            handle,
            service,
            characteristic,
            descriptor,
            value: value.to_vec(),
            status,
        });
        Ok(())
    }
}
