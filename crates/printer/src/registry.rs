//! Device registry
//!
//! Stateless lookups over the host's device list. Nothing is cached; every
//! call enumerates again.

use crate::error::{Error, Result};
use crate::host::{DeviceStrings, HostDevice, UsbHost};
use crate::permission::PermissionNegotiator;
use protocol::{DeviceDescriptor, DeviceDetail};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct DeviceRegistry {
    host: Arc<dyn UsbHost>,
}

impl DeviceRegistry {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self { host }
    }

    /// Descriptors of every attached device, in host order
    ///
    /// An unavailable host yields an empty list.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.snapshot().into_iter().map(|d| d.descriptor).collect()
    }

    /// Look up a device by identifier
    pub fn find(&self, identifier: &str) -> Result<HostDevice> {
        self.snapshot()
            .into_iter()
            .find(|d| d.identifier() == identifier)
            .ok_or_else(|| Error::NotFound(format!("device {}", identifier)))
    }

    /// Devices with the given VID/PID, in host order
    pub fn find_by_ids(&self, vendor_id: u16, product_id: u16) -> Vec<HostDevice> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.descriptor.matches_ids(vendor_id, product_id))
            .collect()
    }

    /// String details of a device
    ///
    /// When permission is missing and `request_permission` is set, the
    /// negotiator is asked first. The serial number is only included once
    /// access is held. On hosts that cannot read strings without access
    /// (libusb), manufacturer and product are `None` as well; the call
    /// still succeeds.
    pub async fn describe_device(
        &self,
        identifier: &str,
        request_permission: bool,
        negotiator: &PermissionNegotiator,
    ) -> Result<DeviceDetail> {
        self.find(identifier)?;

        let mut permitted = negotiator.has_permission(identifier);
        if !permitted && request_permission {
            permitted = negotiator.request_permission(identifier).await?;
        }

        let strings = self.host.strings(identifier).unwrap_or_else(|e| {
            warn!("Failed to read strings of {}: {}", identifier, e);
            DeviceStrings::default()
        });

        Ok(DeviceDetail {
            manufacturer: strings.manufacturer,
            product: strings.product,
            serial_number: strings.serial_number.filter(|_| permitted),
        })
    }

    fn snapshot(&self) -> Vec<HostDevice> {
        match self.host.devices() {
            Ok(devices) => {
                debug!("Host reports {} devices", devices.len());
                devices
            }
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}
