//! Host USB stack abstraction
//!
//! The printer bridge never talks to the operating system directly. It
//! consumes the narrow capability set below: enumerate devices, read their
//! strings, negotiate access, open a connection, move bulk data, and
//! subscribe to attach/detach/permission notifications.
//!
//! [`libusb::LibusbHost`] implements it on top of rusb; the in-memory
//! [`crate::test_utils::MockHost`] implements it for tests.

pub mod libusb;

use common::HostEventSender;
use protocol::{ConfigurationInfo, DeviceDescriptor, EndpointInfo, EndpointRef, InterfaceInfo};
use std::time::Duration;

pub use libusb::LibusbHost;

/// A device as handed out by the host: its descriptor plus the static
/// configuration tree
///
/// Created fresh on every enumeration and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    pub descriptor: DeviceDescriptor,
    pub configurations: Vec<ConfigurationInfo>,
}

impl HostDevice {
    pub fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }

    /// Configuration at position `index`
    pub fn configuration(&self, index: u8) -> Option<&ConfigurationInfo> {
        self.configurations.get(index as usize)
    }

    /// First interface of the first configuration
    pub fn primary_interface(&self) -> Option<&InterfaceInfo> {
        self.configurations.first()?.interfaces.first()
    }

    /// Find an interface by number and alternate setting in any configuration
    pub fn find_interface(&self, id: u8, alternate_setting: u8) -> Option<&InterfaceInfo> {
        self.configurations
            .iter()
            .find_map(|c| c.find_interface(id, alternate_setting))
    }

    /// Find an endpoint by number and direction in any interface
    pub fn find_endpoint(&self, endpoint: EndpointRef) -> Option<EndpointInfo> {
        self.configurations
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .flat_map(|i| i.endpoints.iter())
            .find(|e| e.matches(endpoint))
            .copied()
    }
}

/// String descriptors of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStrings {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// An open connection to a device
///
/// Dropping the connection closes it.
pub trait HostConnection: Send {
    /// Claim an interface; with `force`, detach a kernel driver holding it
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), rusb::Error>;

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn set_alternate_setting(
        &mut self,
        interface: u8,
        alternate_setting: u8,
    ) -> Result<(), rusb::Error>;

    /// Activate the configuration with the given bConfigurationValue
    fn set_configuration(&mut self, value: u8) -> Result<(), rusb::Error>;

    /// One bulk OUT transfer; returns the number of bytes written
    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    /// One bulk IN transfer; returns the number of bytes read into `buf`
    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;
}

/// The host USB stack
pub trait UsbHost: Send + Sync {
    /// Enumerate attached devices
    fn devices(&self) -> Result<Vec<HostDevice>, rusb::Error>;

    /// Read the string descriptors of a device
    ///
    /// Backends that must open the device to read descriptors fail with
    /// `Access` when permission is missing.
    fn strings(&self, identifier: &str) -> Result<DeviceStrings, rusb::Error>;

    /// Whether this process may open the device
    fn has_permission(&self, identifier: &str) -> bool;

    /// Start a permission prompt
    ///
    /// The outcome is delivered later as a `HostEvent::PermissionResult` to
    /// the current subscriber.
    fn request_permission(&self, identifier: &str) -> Result<(), rusb::Error>;

    /// Open a connection to the device
    fn open(&self, identifier: &str) -> Result<Box<dyn HostConnection>, rusb::Error>;

    /// Register for host notifications
    ///
    /// At most one subscription may be live at a time; a second call fails
    /// with `rusb::Error::Busy` until the first [`Subscription`] is dropped.
    fn subscribe(&self, events: HostEventSender) -> Result<Subscription, rusb::Error>;
}

/// Live registration for host notifications
///
/// Unregisters when dropped.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_descriptor, create_printer_configuration};
    use protocol::Direction;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn printer() -> HostDevice {
        HostDevice {
            descriptor: create_mock_descriptor(4, 0x0fe6, 0x811e),
            configurations: vec![create_printer_configuration(64)],
        }
    }

    #[test]
    fn test_find_endpoint_by_number_and_direction() {
        let device = printer();
        let ep = device
            .find_endpoint(EndpointRef::new(2, Direction::In))
            .unwrap();
        assert_eq!(ep.address(), 0x82);
        assert!(
            device
                .find_endpoint(EndpointRef::new(2, Direction::Out))
                .is_none()
        );
    }

    #[test]
    fn test_primary_interface() {
        let device = printer();
        assert_eq!(device.primary_interface().unwrap().id, 0);
        assert!(device.configuration(1).is_none());
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let subscription = Subscription::new(move || flag.store(true, Ordering::SeqCst));

        assert!(!released.load(Ordering::SeqCst));
        drop(subscription);
        assert!(released.load(Ordering::SeqCst));
    }
}
