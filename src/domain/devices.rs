use crate::domain::models::{DeviceAddress, DiscoveredDevice};

/// Scan results as shown in the device list, one entry per address
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<DiscoveredDevice>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate, or refresh the signal strength of a known one.
    /// Returns true when the device was not listed yet.
    pub fn upsert(&mut self, device: DiscoveredDevice) -> bool {
        if let Some(existing) = self
            .devices
            .iter_mut()
            .find(|d| d.address == device.address)
        {
            existing.rssi = device.rssi;
            if device.name.is_some() {
                existing.name = device.name;
            }
            return false;
        }

        self.devices.push(device);
        true
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| &d.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}
