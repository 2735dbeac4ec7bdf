//! Static device directory: machine unique id → human-readable name.

use std::collections::BTreeMap;

use crate::error::{Result, TelemetryError};

/// Known devices, keyed by colon-delimited machine unique id.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: BTreeMap<String, String>,
}

impl DeviceDirectory {
    pub fn new(devices: BTreeMap<String, String>) -> Self {
        // Ids are rendered in lowercase hex on the wire
        let devices = devices
            .into_iter()
            .map(|(id, name)| (id.to_lowercase(), name))
            .collect();
        Self { devices }
    }

    /// Name registered for `machine_unique_id`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDevice` for ids that are not registered. No default
    /// name is ever substituted.
    pub fn name_for(&self, machine_unique_id: &str) -> Result<&str> {
        self.devices
            .get(&machine_unique_id.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| TelemetryError::UnknownDevice(machine_unique_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
