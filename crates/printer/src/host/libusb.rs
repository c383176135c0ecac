//! libusb host backend
//!
//! Implements [`UsbHost`] on top of rusb. Devices are identified by their
//! device node path (`/dev/bus/usb/BBB/DDD`). Desktop libusb has no
//! interactive permission prompt, so a permission request is answered at
//! once by probing whether the device node can be opened.

use super::{DeviceStrings, HostConnection, HostDevice, Subscription, UsbHost};
use crate::sync::lock;
use common::{HostEvent, HostEventSender};
use protocol::{
    ConfigurationInfo, DeviceDescriptor, Direction, EndpointInfo, EndpointKind, InterfaceInfo,
};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the hot-plug thread blocks in libusb before checking for shutdown
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Host identifier of a device: its usbfs node path
pub fn device_identifier<T: UsbContext>(device: &Device<T>) -> String {
    format!(
        "/dev/bus/usb/{:03}/{:03}",
        device.bus_number(),
        device.address()
    )
}

/// USB host backed by a libusb context
pub struct LibusbHost {
    context: Context,
    /// Current notification subscriber, if any
    subscriber: Arc<Mutex<Option<HostEventSender>>>,
}

impl LibusbHost {
    pub fn new() -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        info!("libusb host initialized (hotplug: {})", rusb::has_hotplug());

        Ok(Self {
            context,
            subscriber: Arc::new(Mutex::new(None)),
        })
    }

    fn find_device(&self, identifier: &str) -> Result<Device<Context>, rusb::Error> {
        self.context
            .devices()?
            .iter()
            .find(|d| device_identifier(d) == identifier)
            .ok_or(rusb::Error::NotFound)
    }
}

impl UsbHost for LibusbHost {
    fn devices(&self) -> Result<Vec<HostDevice>, rusb::Error> {
        let mut devices = Vec::new();

        for device in self.context.devices()?.iter() {
            match snapshot(&device) {
                Ok(Some(host_device)) => devices.push(host_device),
                Ok(None) => {}
                Err(e) => warn!(
                    "Failed to read descriptors of {}: {}",
                    device_identifier(&device),
                    e
                ),
            }
        }

        debug!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    /// String descriptors need an open handle, so every string is
    /// unavailable without access to the device node
    fn strings(&self, identifier: &str) -> Result<DeviceStrings, rusb::Error> {
        let device = self.find_device(identifier)?;
        let descriptor = device.device_descriptor()?;
        let handle = device.open()?;

        let read = |index: Option<u8>| index.and_then(|i| handle.read_string_descriptor_ascii(i).ok());

        Ok(DeviceStrings {
            manufacturer: read(descriptor.manufacturer_string_index()),
            product: read(descriptor.product_string_index()),
            serial_number: read(descriptor.serial_number_string_index()),
        })
    }

    fn has_permission(&self, identifier: &str) -> bool {
        let device = match self.find_device(identifier) {
            Ok(device) => device,
            Err(_) => return false,
        };

        match device.open() {
            Ok(_) => true,
            Err(rusb::Error::Access) => false,
            Err(e) => {
                debug!("Could not probe access to {}: {}", identifier, e);
                false
            }
        }
    }

    fn request_permission(&self, identifier: &str) -> Result<(), rusb::Error> {
        let events = lock(&self.subscriber)
            .clone()
            .ok_or(rusb::Error::NotSupported)?;

        let granted = self.has_permission(identifier);
        debug!(
            "Permission probe for {}: {}",
            identifier,
            if granted { "granted" } else { "denied" }
        );

        events
            .send(HostEvent::PermissionResult {
                identifier: identifier.to_string(),
                granted,
            })
            .map_err(|_| rusb::Error::Other)
    }

    fn open(&self, identifier: &str) -> Result<Box<dyn HostConnection>, rusb::Error> {
        let device = self.find_device(identifier)?;
        let handle = device.open()?;
        debug!("Opened device {}", identifier);

        Ok(Box::new(LibusbConnection {
            identifier: identifier.to_string(),
            handle,
            detached_drivers: Vec::new(),
        }))
    }

    fn subscribe(&self, events: HostEventSender) -> Result<Subscription, rusb::Error> {
        let mut slot = lock(&self.subscriber);
        if slot.is_some() {
            warn!("Host notifications already subscribed");
            return Err(rusb::Error::Busy);
        }

        let registration: Option<Registration<Context>> = if rusb::has_hotplug() {
            let registration = HotplugBuilder::new()
                .enumerate(false)
                .register::<Context, _>(
                    &self.context,
                    Box::new(HotplugForwarder::new(events.clone())),
                )?;
            debug!("Hot-plug callbacks registered");
            Some(registration)
        } else {
            warn!("libusb built without hot-plug support, detach events unavailable");
            None
        };

        *slot = Some(events);
        drop(slot);

        let running = Arc::new(AtomicBool::new(true));
        let context = self.context.clone();
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("libusb-events".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                }
            })
            .map_err(|_| rusb::Error::Other)?;

        let subscriber = self.subscriber.clone();
        Ok(Subscription::new(move || {
            drop(registration);
            running.store(false, Ordering::Release);
            if thread.join().is_err() {
                warn!("libusb event thread panicked");
            }
            lock(&subscriber).take();
            debug!("Hot-plug callbacks unregistered");
        }))
    }
}

/// Build a [`HostDevice`] snapshot, skipping root hubs
fn snapshot<T: UsbContext>(device: &Device<T>) -> Result<Option<HostDevice>, rusb::Error> {
    let desc = device.device_descriptor()?;

    // Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
    if desc.vendor_id() == 0x1d6b && desc.class_code() == 9 {
        return Ok(None);
    }

    let mut configurations = Vec::with_capacity(desc.num_configurations() as usize);
    for index in 0..desc.num_configurations() {
        configurations.push(read_configuration(device, index)?);
    }

    Ok(Some(HostDevice {
        descriptor: DeviceDescriptor {
            identifier: device_identifier(device),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            configuration_count: desc.num_configurations(),
        },
        configurations,
    }))
}

fn read_configuration<T: UsbContext>(
    device: &Device<T>,
    index: u8,
) -> Result<ConfigurationInfo, rusb::Error> {
    let config = device.config_descriptor(index)?;

    let interfaces = config
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .map(|alt| InterfaceInfo {
            id: alt.interface_number(),
            alternate_setting: alt.setting_number(),
            endpoints: alt
                .endpoint_descriptors()
                .map(|ep| EndpointInfo {
                    endpoint_number: ep.number(),
                    direction: map_direction(ep.direction()),
                    kind: map_transfer_type(ep.transfer_type()),
                    max_packet_size: ep.max_packet_size(),
                })
                .collect(),
        })
        .collect();

    Ok(ConfigurationInfo {
        id: config.number(),
        index,
        interfaces,
    })
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> EndpointKind {
    match transfer_type {
        rusb::TransferType::Control => EndpointKind::Control,
        rusb::TransferType::Isochronous => EndpointKind::Isochronous,
        rusb::TransferType::Bulk => EndpointKind::Bulk,
        rusb::TransferType::Interrupt => EndpointKind::Interrupt,
    }
}

/// Open libusb device handle
struct LibusbConnection {
    identifier: String,
    handle: DeviceHandle<Context>,
    /// Interfaces whose kernel driver we detached, to hand back on close
    detached_drivers: Vec<u8>,
}

impl HostConnection for LibusbConnection {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), rusb::Error> {
        if force {
            match self.handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!(
                        "Detaching kernel driver from interface {} on {}",
                        interface, self.identifier
                    );
                    match self.handle.detach_kernel_driver(interface) {
                        Ok(()) => self.detached_drivers.push(interface),
                        Err(e) => warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        ),
                    }
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", interface);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        self.handle.claim_interface(interface)?;
        debug!("Claimed interface {} on {}", interface, self.identifier);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        self.handle.release_interface(interface)?;
        debug!("Released interface {} on {}", interface, self.identifier);
        Ok(())
    }

    fn set_alternate_setting(
        &mut self,
        interface: u8,
        alternate_setting: u8,
    ) -> Result<(), rusb::Error> {
        self.handle.set_alternate_setting(interface, alternate_setting)
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), rusb::Error> {
        self.handle.set_active_configuration(value)
    }

    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }
}

impl Drop for LibusbConnection {
    fn drop(&mut self) {
        for interface in self.detached_drivers.drain(..) {
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
        debug!("Closed device {}", self.identifier);
    }
}

/// Forwards libusb hot-plug callbacks onto the host event bridge
struct HotplugForwarder {
    events: HostEventSender,
}

impl HotplugForwarder {
    fn new(events: HostEventSender) -> Self {
        Self { events }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        let descriptor = match device.device_descriptor() {
            Ok(desc) => DeviceDescriptor {
                identifier: device_identifier(&device),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                configuration_count: desc.num_configurations(),
            },
            Err(e) => {
                warn!("Hot-plug: unreadable descriptor on arrival: {}", e);
                return;
            }
        };

        debug!("Hot-plug: device arrived {}", descriptor.identifier);
        if let Err(e) = self.events.send(HostEvent::Attached { device: descriptor }) {
            warn!("Failed to forward attach event: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        let identifier = device_identifier(&device);
        debug!("Hot-plug: device left {}", identifier);
        if let Err(e) = self.events.send(HostEvent::Detached { identifier }) {
            warn!("Failed to forward detach event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(
            map_transfer_type(rusb::TransferType::Bulk),
            EndpointKind::Bulk
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            EndpointKind::Interrupt
        );
    }

    #[test]
    fn test_map_direction() {
        assert_eq!(map_direction(rusb::Direction::In), Direction::In);
        assert_eq!(map_direction(rusb::Direction::Out), Direction::Out);
    }

    #[test]
    fn test_host_creation() {
        // Context creation may fail in sandboxes without usbfs
        match LibusbHost::new() {
            Ok(host) => {
                if let Ok(devices) = host.devices() {
                    assert!(devices.iter().all(|d| d.identifier().starts_with("/dev/bus/usb/")));
                }
            }
            Err(e) => {
                eprintln!("libusb context unavailable (expected in sandbox): {}", e);
            }
        }
    }

    #[test]
    fn test_single_hotplug_subscription() {
        let Ok(host) = LibusbHost::new() else {
            return;
        };
        let (events, _rx) = common::create_event_bridge();

        match host.subscribe(events.clone()) {
            Ok(subscription) => {
                assert!(matches!(host.subscribe(events.clone()), Err(rusb::Error::Busy)));
                drop(subscription);

                let again = host.subscribe(events);
                assert!(again.is_ok());
            }
            Err(e) => eprintln!("hot-plug registration unavailable: {}", e),
        }
    }
}
