use std::collections::HashSet;

use crate::PeripheralHandle;

/// Devices found by a scan, in the order they were first seen.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: Vec<PeripheralHandle>,
    ids: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device unless one with the same id is already listed.
    ///
    /// Returns `true` when the device was added. Later advertisements of a
    /// known id are dropped as-is, even if they carry a different name.
    pub fn insert(&mut self, device: PeripheralHandle) -> bool {
        if !self.ids.insert(device.id().to_string()) {
            return false;
        }

        self.devices.push(device);
        true
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralHandle> {
        self.devices.iter().find(|device| device.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeripheralHandle> {
        self.devices.iter()
    }

    pub fn to_vec(&self) -> Vec<PeripheralHandle> {
        self.devices.clone()
    }
}
