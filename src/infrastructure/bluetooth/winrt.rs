//! WinRT Bluetooth Backend
//!
//! Windows implementation of the platform traits. Asynchronous WinRT
//! operations run as tokio tasks and post their completions to the platform
//! channel; callbacks (advertisements, value changes, link loss) post from
//! WinRT threads.

use crate::domain::errors::PlatformError;
use crate::domain::models::{
    CharacteristicProperties, DeviceAddress, DiscoveredDevice, GattCharacteristic,
    GattDescriptor, GattService, GattStatus,
};
use crate::domain::protocol::{self, CCCD_UUID, DEFAULT_MTU};
use crate::infrastructure::bluetooth::platform::{
    push_ad_structure, ConnectionHandle, GattPlatform, PlatformEvent, PlatformEventSender,
    ScanPlatform,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{Ref, GUID};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattSession as WinGattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Generic failure status for errors without a GATT code
const GATT_FAILURE: u16 = 0x0101;

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn platform_error(e: windows::core::Error) -> PlatformError {
    PlatformError::Rejected(e.message().to_string())
}

fn communication_status(status: GattCommunicationStatus) -> GattStatus {
    if status == GattCommunicationStatus::Success {
        GattStatus::Success
    } else {
        GattStatus::Failure(status.0 as u16)
    }
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn write_buffer(bytes: &[u8]) -> windows::core::Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(bytes)?;
    writer.DetachBuffer()
}

fn characteristic_properties(flags: GattCharacteristicProperties) -> CharacteristicProperties {
    let has = |flag: GattCharacteristicProperties| flags.0 & flag.0 != 0;
    CharacteristicProperties {
        read: has(GattCharacteristicProperties::Read),
        write: has(GattCharacteristicProperties::Write),
        write_without_response: has(GattCharacteristicProperties::WriteWithoutResponse),
        notify: has(GattCharacteristicProperties::Notify),
        indicate: has(GattCharacteristicProperties::Indicate),
    }
}

async fn radio_is_on() -> windows::core::Result<bool> {
    let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
    if !adapter.IsLowEnergySupported()? {
        return Ok(false);
    }
    let radio = adapter.GetRadioAsync()?.await?;
    Ok(radio.State()? == RadioState::On)
}

/// Build the WinRT backend. Requires a running tokio runtime.
pub fn create(events: PlatformEventSender) -> (Box<dyn ScanPlatform>, Box<dyn GattPlatform>) {
    let adapter = Arc::new(AtomicBool::new(true));

    let powered = adapter.clone();
    tokio::spawn(async move {
        match radio_is_on().await {
            Ok(on) => {
                info!("Bluetooth LE radio on: {}", on);
                powered.store(on, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                powered.store(false, Ordering::Relaxed);
            }
        }
    });

    (
        Box::new(WinrtScanner {
            watcher: None,
            events: events.clone(),
            adapter: adapter.clone(),
        }),
        Box::new(WinrtGatt {
            links: Arc::new(Mutex::new(HashMap::new())),
            events,
            adapter,
            next_handle: 1,
        }),
    )
}

/// Advertisement watcher
pub struct WinrtScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    events: PlatformEventSender,
    adapter: Arc<AtomicBool>,
}

impl WinrtScanner {
    fn start_watcher(&mut self) -> windows::core::Result<()> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: Ref<BluetoothLEAdvertisementWatcher>,
                  args: Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let name = adv.LocalName()?.to_string();

                    let mut advertisement = Vec::new();
                    let sections = adv.DataSections()?;
                    for i in 0..sections.Size()? {
                        let section = sections.GetAt(i)?;
                        let data = read_buffer(&section.Data()?)?;
                        if !push_ad_structure(&mut advertisement, section.DataType()?, &data) {
                            debug!("Skipping oversized advertisement section");
                        }
                    }

                    let device = DiscoveredDevice {
                        address: DeviceAddress::from_u64(args.BluetoothAddress()?),
                        name: if name.is_empty() { None } else { Some(name) },
                        rssi: args.RawSignalStrengthInDBm()?,
                        advertisement,
                    };
                    let _ = sender.send(PlatformEvent::AdvertisementReceived(device));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);
        Ok(())
    }
}

impl ScanPlatform for WinrtScanner {
    fn adapter_enabled(&self) -> bool {
        self.adapter.load(Ordering::Relaxed)
    }

    fn scan_permitted(&self) -> bool {
        true
    }

    fn request_scan_permission(&mut self) {
        info!("Desktop apps need no scan permission on Windows");
    }

    fn start_scan(&mut self) -> Result<(), PlatformError> {
        self.stop_scan();
        self.start_watcher().map_err(platform_error)
    }

    fn stop_scan(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE watcher...");
            let _ = watcher.Stop();
        }
    }
}

#[derive(Default)]
struct Link {
    device: Option<BluetoothLEDevice>,
    session: Option<WinGattSession>,
    status_token: Option<i64>,
    characteristics: HashMap<(Uuid, Uuid), WinCharacteristic>,
    subscriptions: HashMap<(Uuid, Uuid), i64>,
}

impl Link {
    fn release(&mut self) {
        for (key, token) in self.subscriptions.drain() {
            if let Some(c) = self.characteristics.get(&key) {
                let _ = c.RemoveValueChanged(token);
            }
        }
        self.characteristics.clear();
        if let Some(session) = self.session.take() {
            let _ = session.Close();
        }
        if let Some(device) = self.device.take() {
            if let Some(token) = self.status_token.take() {
                let _ = device.RemoveConnectionStatusChanged(token);
            }
            let _ = device.Close();
        }
    }
}

type Links = Arc<Mutex<HashMap<ConnectionHandle, Link>>>;

fn lock(links: &Links) -> MutexGuard<'_, HashMap<ConnectionHandle, Link>> {
    links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// GATT client over `BluetoothLEDevice`
pub struct WinrtGatt {
    links: Links,
    events: PlatformEventSender,
    adapter: Arc<AtomicBool>,
    next_handle: u64,
}

impl WinrtGatt {
    fn characteristic(
        &self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<WinCharacteristic, PlatformError> {
        lock(&self.links)
            .get(&handle)
            .ok_or(PlatformError::UnknownHandle)?
            .characteristics
            .get(&(service, characteristic))
            .cloned()
            .ok_or_else(|| {
                PlatformError::Rejected(format!(
                    "characteristic {} not discovered",
                    protocol::display_uuid(&characteristic)
                ))
            })
    }
}

async fn open_device(
    handle: ConnectionHandle,
    raw: u64,
    links: &Links,
    events: &PlatformEventSender,
) -> windows::core::Result<GattStatus> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)?.await?;
    let session = WinGattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
    session.SetMaintainConnection(true)?;

    let sender = events.clone();
    let status_handler = TypedEventHandler::new(move |dev: Ref<BluetoothLEDevice>, _| {
        if let Some(dev) = dev.as_ref() {
            if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                let _ = sender.send(PlatformEvent::ConnectionStateChanged {
                    handle,
                    connected: false,
                    status: GattStatus::Success,
                });
            }
        }
        Ok(())
    });
    let token = device.ConnectionStatusChanged(&status_handler)?;

    // The link only comes up on the first GATT access
    let first_access = device
        .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    let status = communication_status(first_access.Status()?);

    let mut guard = lock(links);
    match guard.get_mut(&handle) {
        Some(link) => {
            link.device = Some(device);
            link.session = Some(session);
            link.status_token = Some(token);
        }
        None => {
            debug!("{:?} closed while connecting", handle);
            let _ = device.RemoveConnectionStatusChanged(token);
            let _ = session.Close();
            let _ = device.Close();
        }
    }
    Ok(status)
}

type Discovery = (
    GattStatus,
    Vec<GattService>,
    HashMap<(Uuid, Uuid), WinCharacteristic>,
);

async fn enumerate(device: BluetoothLEDevice) -> windows::core::Result<Discovery> {
    let result = device
        .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    let status = communication_status(result.Status()?);
    if !status.is_success() {
        return Ok((status, Vec::new(), HashMap::new()));
    }

    let mut services = Vec::new();
    let mut handles = HashMap::new();
    let list = result.Services()?;
    for i in 0..list.Size()? {
        let service = list.GetAt(i)?;
        let service_uuid = to_uuid(service.Uuid()?);
        let mut characteristics = Vec::new();

        let chars = service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if chars.Status()? == GattCommunicationStatus::Success {
            let chars = chars.Characteristics()?;
            for j in 0..chars.Size()? {
                let c = chars.GetAt(j)?;
                let uuid = to_uuid(c.Uuid()?);
                let properties = characteristic_properties(c.CharacteristicProperties()?);

                // WinRT manages the CCCD itself and may not list it
                let mut descriptors = Vec::new();
                if properties.notify || properties.indicate {
                    descriptors.push(GattDescriptor { uuid: CCCD_UUID });
                }
                let listed = c.GetDescriptorsAsync()?.await?;
                if listed.Status()? == GattCommunicationStatus::Success {
                    let listed = listed.Descriptors()?;
                    for k in 0..listed.Size()? {
                        let uuid = to_uuid(listed.GetAt(k)?.Uuid()?);
                        if !descriptors.iter().any(|d| d.uuid == uuid) {
                            descriptors.push(GattDescriptor { uuid });
                        }
                    }
                }

                handles.insert((service_uuid, uuid), c);
                characteristics.push(GattCharacteristic {
                    uuid,
                    properties,
                    descriptors,
                });
            }
        } else {
            warn!("Characteristics of {} unavailable", service_uuid);
        }

        services.push(GattService {
            uuid: service_uuid,
            characteristics,
        });
    }
    Ok((status, services, handles))
}

async fn read_value(c: WinCharacteristic) -> windows::core::Result<(GattStatus, Vec<u8>)> {
    let result = c
        .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    let status = communication_status(result.Status()?);
    let value = if status.is_success() {
        read_buffer(&result.Value()?)?
    } else {
        Vec::new()
    };
    Ok((status, value))
}

async fn write_value(c: WinCharacteristic, value: Vec<u8>) -> windows::core::Result<GattStatus> {
    let option = if c.CharacteristicProperties()?.0 & GattCharacteristicProperties::Write.0 != 0 {
        GattWriteOption::WriteWithResponse
    } else {
        GattWriteOption::WriteWithoutResponse
    };
    let buffer = write_buffer(&value)?;
    let status = c.WriteValueWithOptionAsync(&buffer, option)?.await?;
    Ok(communication_status(status))
}

async fn write_cccd(
    c: WinCharacteristic,
    config: GattClientCharacteristicConfigurationDescriptorValue,
) -> windows::core::Result<GattStatus> {
    let status = c
        .WriteClientCharacteristicConfigurationDescriptorAsync(config)?
        .await?;
    Ok(communication_status(status))
}

fn failed(operation: &str, e: windows::core::Error) -> GattStatus {
    warn!("{} failed: {}", operation, e);
    GattStatus::Failure(GATT_FAILURE)
}

impl GattPlatform for WinrtGatt {
    fn adapter_available(&self) -> bool {
        self.adapter.load(Ordering::Relaxed)
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<ConnectionHandle, PlatformError> {
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        lock(&self.links).insert(handle, Link::default());

        info!("Connecting to Bluetooth device: {}", address);
        let raw = address.as_u64();
        let links = self.links.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = match open_device(handle, raw, &links, &events).await {
                Ok(status) => status,
                Err(e) => failed("Connect", e),
            };
            let _ = events.send(PlatformEvent::ConnectionStateChanged {
                handle,
                connected: status.is_success(),
                status,
            });
        });
        Ok(handle)
    }

    fn disconnect(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError> {
        lock(&self.links)
            .get_mut(&handle)
            .ok_or(PlatformError::UnknownHandle)?
            .release();

        // WinRT drops the link once every reference is closed
        let _ = self.events.send(PlatformEvent::ConnectionStateChanged {
            handle,
            connected: false,
            status: GattStatus::Success,
        });
        Ok(())
    }

    fn close(&mut self, handle: ConnectionHandle) {
        if let Some(mut link) = lock(&self.links).remove(&handle) {
            link.release();
        }
    }

    fn discover_services(&mut self, handle: ConnectionHandle) -> Result<(), PlatformError> {
        let device = lock(&self.links)
            .get(&handle)
            .and_then(|link| link.device.clone())
            .ok_or(PlatformError::UnknownHandle)?;

        let links = self.links.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let (status, services) = match enumerate(device).await {
                Ok((status, services, handles)) => {
                    if let Some(link) = lock(&links).get_mut(&handle) {
                        link.characteristics = handles;
                    }
                    (status, services)
                }
                Err(e) => (failed("Service discovery", e), Vec::new()),
            };
            let _ = events.send(PlatformEvent::ServicesDiscovered {
                handle,
                services,
                status,
            });
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError> {
        let c = self.characteristic(handle, service, characteristic)?;
        let events = self.events.clone();
        tokio::spawn(async move {
            let (status, value) = read_value(c)
                .await
                .unwrap_or_else(|e| (failed("Read", e), Vec::new()));
            let _ = events.send(PlatformEvent::CharacteristicRead {
                handle,
                service,
                characteristic,
                value,
                status,
            });
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
        let c = self.characteristic(handle, service, characteristic)?;
        let value = value.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = write_value(c, value.clone())
                .await
                .unwrap_or_else(|e| failed("Write", e));
            let _ = events.send(PlatformEvent::CharacteristicWritten {
                handle,
                service,
                characteristic,
                value,
                status,
            });
        });
        Ok(())
    }

    fn set_characteristic_notification(
        &mut self,
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        let c = self.characteristic(handle, service, characteristic)?;
        let mut links = lock(&self.links);
        let link = links.get_mut(&handle).ok_or(PlatformError::UnknownHandle)?;
        let key = (service, characteristic);

        if !enabled {
            if let Some(token) = link.subscriptions.remove(&key) {
                let _ = c.RemoveValueChanged(token);
            }
            return Ok(());
        }
        if link.subscriptions.contains_key(&key) {
            return Ok(());
        }

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: Ref<WinCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = read_buffer(&args.CharacteristicValue()?)?;
                    let _ = sender.send(PlatformEvent::CharacteristicChanged {
                        handle,
                        service,
                        characteristic,
                        value,
                    });
                }
                Ok(())
            },
        );
        let token = c.ValueChanged(&handler).map_err(platform_error)?;
        link.subscriptions.insert(key, token);
        Ok(())
    }

    fn request_mtu(&mut self, handle: ConnectionHandle, mtu: u16) -> Result<(), PlatformError> {
        let session = lock(&self.links)
            .get(&handle)
            .and_then(|link| link.session.clone())
            .ok_or(PlatformError::UnknownHandle)?;

        // Windows negotiates on its own; report what it settled on
        let (mtu, status) = match session.MaxPduSize() {
            Ok(pdu) => (pdu.min(mtu), GattStatus::Success),
            Err(e) => (DEFAULT_MTU, failed("MTU query", e)),
        };
        let _ = self.events.send(PlatformEvent::MtuChanged {
            handle,
            mtu,
            status,
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
        if descriptor != CCCD_UUID {
            return Err(PlatformError::Rejected(format!(
                "descriptor {} is not writable here",
                protocol::display_uuid(&descriptor)
            )));
        }
        let c = self.characteristic(handle, service, characteristic)?;
        let config = match value.first().copied().unwrap_or(0) & 0x03 {
            0 => GattClientCharacteristicConfigurationDescriptorValue::None,
            0x02 => GattClientCharacteristicConfigurationDescriptorValue::Indicate,
            _ => GattClientCharacteristicConfigurationDescriptorValue::Notify,
        };

        let value = value.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = write_cccd(c, config)
                .await
                .unwrap_or_else(|e| failed("CCCD write", e));
            let _ = events.send(PlatformEvent::DescriptorWritten {
                handle,
                service,
                characteristic,
                descriptor,
                value,
                status,
            });
        });
        Ok(())
    }
}
