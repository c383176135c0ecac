//! In-memory host for tests
//!
//! [`MockHost`] implements [`UsbHost`] without hardware. Tests plug and
//! unplug devices, answer permission prompts, script transfer failures, and
//! inspect every call the bridge made against the host.
//!
//! # Example
//!
//! ```
//! use printer::test_utils::MockHost;
//! use printer::host::UsbHost;
//!
//! let host = MockHost::new();
//! let printer = host.add_printer(4, 0x0fe6, 0x811e, true);
//! assert!(host.has_permission(&printer.identifier));
//! ```

use crate::host::{DeviceStrings, HostConnection, HostDevice, Subscription, UsbHost};
use crate::sync::lock;
use common::test_utils::{create_mock_descriptor, create_printer_configuration};
use common::{HostEvent, HostEventSender};
use protocol::{ConfigurationInfo, DeviceDescriptor};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call made against the mock host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    RequestPermission(String),
    Open(String),
    Close(String),
    Claim { interface: u8, force: bool },
    Release(u8),
    SetAlternateSetting { interface: u8, alternate_setting: u8 },
    SetConfiguration(u8),
    Write { endpoint: u8, len: usize },
    Read { endpoint: u8, len: usize },
}

struct MockDevice {
    device: HostDevice,
    strings: DeviceStrings,
    permitted: bool,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    subscriber: Option<HostEventSender>,
    calls: Vec<HostCall>,
    written: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    writes_attempted: usize,
    fail_writes: Vec<usize>,
    write_delay: Option<Duration>,
    fail_enumeration: bool,
    fail_open: bool,
    fail_claim: bool,
    strings_need_permission: bool,
    permission_reply: Option<bool>,
    open_connections: usize,
}

/// Scriptable in-memory [`UsbHost`]
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with one permitted printer at address 4
    pub fn with_printer(vendor_id: u16, product_id: u16) -> (Self, DeviceDescriptor) {
        let host = Self::new();
        let printer = host.add_printer(4, vendor_id, product_id, true);
        (host, printer)
    }

    /// Plug in a printer with a 64-byte bulk OUT endpoint on interface 0
    pub fn add_printer(
        &self,
        address: u8,
        vendor_id: u16,
        product_id: u16,
        permitted: bool,
    ) -> DeviceDescriptor {
        self.add_device(
            create_mock_descriptor(address, vendor_id, product_id),
            vec![create_printer_configuration(64)],
            permitted,
        )
    }

    /// Plug in a device with an arbitrary configuration tree
    pub fn add_device(
        &self,
        descriptor: DeviceDescriptor,
        configurations: Vec<ConfigurationInfo>,
        permitted: bool,
    ) -> DeviceDescriptor {
        let strings = DeviceStrings {
            manufacturer: Some("Mock Manufacturer".to_string()),
            product: Some(format!("Mock Printer {:04x}", descriptor.product_id)),
            serial_number: Some(format!("SN-{}", descriptor.identifier.replace('/', ""))),
        };
        let device = HostDevice {
            descriptor: descriptor.clone(),
            configurations,
        };

        lock(&self.state).devices.push(MockDevice {
            device,
            strings,
            permitted,
        });
        descriptor
    }

    /// Remove a device and notify the subscriber, like a cable pull
    pub fn unplug(&self, identifier: &str) {
        let subscriber = {
            let mut state = lock(&self.state);
            state.devices.retain(|d| d.device.identifier() != identifier);
            state.subscriber.clone()
        };

        if let Some(events) = subscriber {
            let _ = events.send(HostEvent::Detached {
                identifier: identifier.to_string(),
            });
        }
    }

    /// Emit a detach notification without removing the device
    pub fn emit_detached(&self, identifier: &str) {
        self.emit(HostEvent::Detached {
            identifier: identifier.to_string(),
        });
    }

    /// Emit an attach notification for a listed device
    pub fn emit_attached(&self, descriptor: DeviceDescriptor) {
        self.emit(HostEvent::Attached { device: descriptor });
    }

    /// Answer an outstanding permission prompt
    pub fn answer_permission(&self, identifier: &str, granted: bool) {
        if granted {
            self.set_permitted(identifier, true);
        }
        self.emit(HostEvent::PermissionResult {
            identifier: identifier.to_string(),
            granted,
        });
    }

    /// Answer every future prompt immediately (`None` leaves prompts open)
    pub fn set_permission_reply(&self, reply: Option<bool>) {
        lock(&self.state).permission_reply = reply;
    }

    pub fn set_permitted(&self, identifier: &str, permitted: bool) {
        let mut state = lock(&self.state);
        if let Some(device) = state
            .devices
            .iter_mut()
            .find(|d| d.device.identifier() == identifier)
        {
            device.permitted = permitted;
        }
    }

    /// Fail the n-th write (0-based, counted across the host lifetime)
    pub fn fail_write(&self, index: usize) {
        lock(&self.state).fail_writes.push(index);
    }

    /// Sleep before each write, to hold the session lock longer
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = Some(delay);
    }

    pub fn fail_enumeration(&self, fail: bool) {
        lock(&self.state).fail_enumeration = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn fail_claim(&self, fail: bool) {
        lock(&self.state).fail_claim = fail;
    }

    /// Refuse string reads of devices without permission, like libusb
    pub fn restrict_strings(&self, restrict: bool) {
        lock(&self.state).strings_need_permission = restrict;
    }

    /// Queue data for the next bulk read
    pub fn push_read(&self, data: Vec<u8>) {
        lock(&self.state).reads.push_back(data);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Payloads of successful writes, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    pub fn writes_attempted(&self) -> usize {
        lock(&self.state).writes_attempted
    }

    /// Number of connections opened and not yet dropped
    pub fn open_connections(&self) -> usize {
        lock(&self.state).open_connections
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.state).subscriber.is_some()
    }

    fn emit(&self, event: HostEvent) {
        let subscriber = lock(&self.state).subscriber.clone();
        if let Some(events) = subscriber {
            let _ = events.send(event);
        }
    }

    fn record(&self, call: HostCall) {
        lock(&self.state).calls.push(call);
    }
}

impl UsbHost for MockHost {
    fn devices(&self) -> Result<Vec<HostDevice>, rusb::Error> {
        let state = lock(&self.state);
        if state.fail_enumeration {
            return Err(rusb::Error::Io);
        }
        Ok(state.devices.iter().map(|d| d.device.clone()).collect())
    }

    fn strings(&self, identifier: &str) -> Result<DeviceStrings, rusb::Error> {
        let state = lock(&self.state);
        let device = state
            .devices
            .iter()
            .find(|d| d.device.identifier() == identifier)
            .ok_or(rusb::Error::NotFound)?;

        if state.strings_need_permission && !device.permitted {
            return Err(rusb::Error::Access);
        }
        Ok(device.strings.clone())
    }

    fn has_permission(&self, identifier: &str) -> bool {
        lock(&self.state)
            .devices
            .iter()
            .any(|d| d.device.identifier() == identifier && d.permitted)
    }

    fn request_permission(&self, identifier: &str) -> Result<(), rusb::Error> {
        self.record(HostCall::RequestPermission(identifier.to_string()));

        let reply = lock(&self.state).permission_reply;
        if let Some(granted) = reply {
            self.answer_permission(identifier, granted);
        }
        Ok(())
    }

    fn open(&self, identifier: &str) -> Result<Box<dyn HostConnection>, rusb::Error> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Open(identifier.to_string()));

        if state.fail_open {
            return Err(rusb::Error::Io);
        }
        let device = state
            .devices
            .iter()
            .find(|d| d.device.identifier() == identifier)
            .ok_or(rusb::Error::NoDevice)?;
        if !device.permitted {
            return Err(rusb::Error::Access);
        }

        state.open_connections += 1;
        Ok(Box::new(MockConnection {
            identifier: identifier.to_string(),
            state: self.state.clone(),
        }))
    }

    fn subscribe(&self, events: HostEventSender) -> Result<Subscription, rusb::Error> {
        let mut state = lock(&self.state);
        if state.subscriber.is_some() {
            return Err(rusb::Error::Busy);
        }
        state.subscriber = Some(events);

        let shared = self.state.clone();
        Ok(Subscription::new(move || {
            lock(&shared).subscriber = None;
        }))
    }
}

struct MockConnection {
    identifier: String,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn device_present(state: &MockState, identifier: &str) -> bool {
        state.devices.iter().any(|d| d.device.identifier() == identifier)
    }
}

impl HostConnection for MockConnection {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), rusb::Error> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Claim { interface, force });
        if state.fail_claim {
            return Err(rusb::Error::Busy);
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        lock(&self.state).calls.push(HostCall::Release(interface));
        Ok(())
    }

    fn set_alternate_setting(
        &mut self,
        interface: u8,
        alternate_setting: u8,
    ) -> Result<(), rusb::Error> {
        lock(&self.state).calls.push(HostCall::SetAlternateSetting {
            interface,
            alternate_setting,
        });
        Ok(())
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), rusb::Error> {
        lock(&self.state).calls.push(HostCall::SetConfiguration(value));
        Ok(())
    }

    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let delay = lock(&self.state).write_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = lock(&self.state);
        let index = state.writes_attempted;
        state.writes_attempted += 1;
        state.calls.push(HostCall::Write {
            endpoint,
            len: data.len(),
        });

        if !Self::device_present(&state, &self.identifier) {
            return Err(rusb::Error::NoDevice);
        }
        if state.fail_writes.contains(&index) {
            return Err(rusb::Error::Io);
        }

        state.written.push(data.to_vec());
        Ok(data.len())
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Read {
            endpoint,
            len: buf.len(),
        });

        let data = state.reads.pop_front().ok_or(rusb::Error::Timeout)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_connections = state.open_connections.saturating_sub(1);
        state.calls.push(HostCall::Close(self.identifier.clone()));
    }
}
