//! Device session
//!
//! Holds the one bound device and, when open, the link to it: the host
//! connection, the claimed interface and the selected bulk OUT endpoint.
//! The link lives in a single `Option`, so the three exist together or not
//! at all.
//!
//! Every mutation and every bulk transfer goes through the same lock, so
//! concurrent callers queue instead of interleaving on the wire. A second,
//! short-held lock mirrors which device is bound and whether the link is
//! up, so callers can check availability while a transfer holds the first.

use crate::error::{Error, Result};
use crate::host::{HostConnection, HostDevice, UsbHost};
use crate::sync;
use common::{Notice, NoticeSender};
use protocol::{ConfigurationInfo, DeviceDescriptor, EndpointInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// An open connection with its claimed interface and output endpoint
pub(crate) struct Link {
    pub(crate) connection: Box<dyn HostConnection>,
    pub(crate) interface: u8,
    pub(crate) endpoint: EndpointInfo,
}

/// State guarded by the session lock
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) device: Option<HostDevice>,
    pub(crate) link: Option<Link>,
}

impl SessionState {
    /// Bound device and open link, or the precondition that is missing
    pub(crate) fn connected(&mut self) -> Result<(&HostDevice, &mut Link)> {
        match (&self.device, &mut self.link) {
            (Some(device), Some(link)) => Ok((device, link)),
            (None, _) => Err(Error::NotInitialized("USB device")),
            (Some(_), None) => Err(Error::NotInitialized("USB connection")),
        }
    }
}

/// Copy of the session's shape, never held across host I/O
#[derive(Default)]
struct Status {
    device: Option<DeviceDescriptor>,
    open: bool,
}

/// The single device session of a printer service
pub struct Session {
    host: Arc<dyn UsbHost>,
    state: Mutex<SessionState>,
    status: Mutex<Status>,
    /// Raised while a detach waits for the transfer lock
    detaching: AtomicBool,
    notices: NoticeSender,
}

impl Session {
    pub fn new(host: Arc<dyn UsbHost>, notices: NoticeSender) -> Self {
        Self {
            host,
            state: Mutex::new(SessionState::default()),
            status: Mutex::new(Status::default()),
            detaching: AtomicBool::new(false),
            notices,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        sync::lock(&self.state)
    }

    /// Bind `device` and open a link to it
    ///
    /// A link already open for the same VID/PID is reused. Any other link is
    /// torn down first. On failure the device stays bound so that
    /// [`Session::ensure_open`] can retry.
    pub fn open(&self, device: HostDevice) -> Result<EndpointInfo> {
        let mut state = self.lock();

        if let (Some(bound), Some(link)) = (&state.device, &state.link) {
            if bound.descriptor.same_model(&device.descriptor) {
                debug!("Session already open for {}", bound.identifier());
                return Ok(link.endpoint);
            }
        }

        teardown(&mut state);
        state.device = Some(device);
        self.publish(&state);

        let result = self.connect(&mut state);
        self.publish(&state);
        result
    }

    /// Endpoint of the open link, opening the bound device if needed
    pub fn ensure_open(&self) -> Result<EndpointInfo> {
        let state = self.lock_open()?;
        state
            .link
            .as_ref()
            .map(|l| l.endpoint)
            .ok_or(Error::NotInitialized("USB connection"))
    }

    /// Take the session lock with the link open, opening the bound device
    /// if needed
    pub(crate) fn lock_open(&self) -> Result<MutexGuard<'_, SessionState>> {
        let mut state = self.lock();

        if state.link.is_some() {
            return Ok(state);
        }

        if state.device.is_none() {
            drop(state);
            self.notices.notify(Notice::DeviceNotInitialized);
            return Err(Error::NotInitialized("USB device"));
        }

        let result = self.connect(&mut state);
        self.publish(&state);
        result.map(|_| state)
    }

    /// Fail unless a device is bound, without waiting for a running transfer
    pub(crate) fn require_bound(&self) -> Result<()> {
        if self.bound_device().is_some() {
            return Ok(());
        }

        self.notices.notify(Notice::DeviceNotInitialized);
        Err(Error::NotInitialized("USB device"))
    }

    /// Release the interface, close the connection and unbind the device
    ///
    /// Safe to call when already closed.
    pub fn close(&self) {
        let mut state = self.lock();
        teardown(&mut state);
        self.publish(&state);
    }

    /// Tear the session down if `identifier` is the bound device
    ///
    /// A print job holding the lock stops before its next chunk. Returns
    /// whether the session was affected.
    pub fn on_detach(&self, identifier: &str) -> bool {
        let bound = sync::lock(&self.status)
            .device
            .as_ref()
            .is_some_and(|d| d.identifier == identifier);
        if !bound {
            debug!("Ignoring detach of unbound device {}", identifier);
            return false;
        }

        self.detaching.store(true, Ordering::SeqCst);
        let mut state = self.lock();
        self.detaching.store(false, Ordering::SeqCst);

        if !state
            .device
            .as_ref()
            .is_some_and(|d| d.identifier() == identifier)
        {
            debug!("Device {} unbound before detach was handled", identifier);
            return false;
        }

        teardown(&mut state);
        self.publish(&state);
        drop(state);

        info!("Bound device {} detached", identifier);
        self.notices.notify(Notice::DeviceDetached {
            identifier: identifier.to_string(),
        });
        true
    }

    /// Configuration `index` of the bound device
    pub fn configuration(&self, index: u8) -> Result<ConfigurationInfo> {
        let state = self.lock();
        let device = state
            .device
            .as_ref()
            .ok_or(Error::NotInitialized("USB device"))?;

        device
            .configuration(index)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("configuration {}", index)))
    }

    /// Activate configuration `index` of the bound device
    pub fn set_configuration(&self, index: u8) -> Result<bool> {
        let mut state = self.lock();
        let (device, link) = state.connected()?;

        let value = device
            .configuration(index)
            .map(|c| c.id)
            .ok_or_else(|| Error::NotFound(format!("configuration {}", index)))?;

        Ok(report(
            "set configuration",
            link.connection.set_configuration(value),
        ))
    }

    /// Force-claim an interface and select its alternate setting
    pub fn claim_interface(&self, id: u8, alternate_setting: u8) -> Result<bool> {
        let mut state = self.lock();
        let (device, link) = state.connected()?;
        find_interface(device, id, alternate_setting)?;

        if !report("claim interface", link.connection.claim_interface(id, true)) {
            return Ok(false);
        }

        if alternate_setting != 0 {
            return Ok(report(
                "set alternate setting",
                link.connection
                    .set_alternate_setting(id, alternate_setting),
            ));
        }

        Ok(true)
    }

    pub fn release_interface(&self, id: u8, alternate_setting: u8) -> Result<bool> {
        let mut state = self.lock();
        let (device, link) = state.connected()?;
        find_interface(device, id, alternate_setting)?;

        Ok(report(
            "release interface",
            link.connection.release_interface(id),
        ))
    }

    /// Descriptor of the bound device, if any
    pub fn bound_device(&self) -> Option<DeviceDescriptor> {
        sync::lock(&self.status).device.clone()
    }

    pub fn is_open(&self) -> bool {
        sync::lock(&self.status).open
    }

    /// Whether a detach of the bound device is waiting for the lock
    pub(crate) fn is_detaching(&self) -> bool {
        self.detaching.load(Ordering::SeqCst)
    }

    /// Mirror `state` into the status copy; called with the session lock held
    fn publish(&self, state: &SessionState) {
        let mut status = sync::lock(&self.status);
        status.device = state.device.as_ref().map(|d| d.descriptor.clone());
        status.open = state.link.is_some();
    }

    /// Output endpoint of the open link
    pub fn endpoint(&self) -> Option<EndpointInfo> {
        self.lock().link.as_ref().map(|l| l.endpoint)
    }

    /// Open a link to the bound device
    fn connect(&self, state: &mut SessionState) -> Result<EndpointInfo> {
        let device = state
            .device
            .as_ref()
            .ok_or(Error::NotInitialized("USB device"))?;

        let interface = device.primary_interface().ok_or(Error::NoBulkOutEndpoint)?;
        let endpoint = interface
            .endpoints
            .iter()
            .find(|e| e.is_bulk_out())
            .copied()
            .ok_or(Error::NoBulkOutEndpoint)?;
        let interface = interface.id;

        let mut connection = self.host.open(device.identifier()).map_err(|e| {
            warn!("Failed to open {}: {}", device.identifier(), e);
            Error::Open(e)
        })?;

        if let Err(source) = connection.claim_interface(interface, true) {
            warn!(
                "Failed to claim interface {} on {}: {}",
                interface,
                device.identifier(),
                source
            );
            drop(connection);
            return Err(Error::Claim { interface, source });
        }

        info!(
            "Opened {} (interface {}, endpoint {:#04x}, max packet {})",
            device.identifier(),
            interface,
            endpoint.address(),
            endpoint.max_packet_size
        );

        state.link = Some(Link {
            connection,
            interface,
            endpoint,
        });
        Ok(endpoint)
    }
}

fn teardown(state: &mut SessionState) {
    if let Some(mut link) = state.link.take() {
        if let Err(e) = link.connection.release_interface(link.interface) {
            warn!("Failed to release interface {}: {}", link.interface, e);
        }
    }

    if let Some(device) = state.device.take() {
        info!("Closed session for {}", device.identifier());
    }
}

fn find_interface(device: &HostDevice, id: u8, alternate_setting: u8) -> Result<()> {
    device
        .find_interface(id, alternate_setting)
        .map(|_| ())
        .ok_or_else(|| Error::NotFound(format!("interface {}/{}", id, alternate_setting)))
}

/// Log a failed host primitive and collapse it to a success flag
fn report(operation: &str, result: std::result::Result<(), rusb::Error>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to {}: {}", operation, e);
            false
        }
    }
}
