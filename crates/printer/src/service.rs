//! Printer service
//!
//! The explicit state of the bridge: one registry, one permission slot, one
//! session, one event subscription. Built by [`PrinterService::attach`] and
//! torn down by [`PrinterService::shutdown`].
//!
//! Session operations take the transfer lock, which a print job holds for
//! its whole run, so the async methods below run them on the blocking pool.

use crate::config::PrinterConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventRouter};
use crate::host::UsbHost;
use crate::permission::PermissionNegotiator;
use crate::registry::DeviceRegistry;
use crate::session::Session;
use crate::transfer::{PrintJob, TransferEngine};
use common::{NoticeReceiver, create_notice_channel};
use protocol::{ConfigurationInfo, DeviceDescriptor, DeviceDetail, EndpointRef};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub struct PrinterService {
    registry: DeviceRegistry,
    negotiator: Arc<PermissionNegotiator>,
    session: Arc<Session>,
    transfers: TransferEngine,
    dispatcher: EventDispatcher,
    runtime: Handle,
}

impl PrinterService {
    /// Build the service on top of `host` and subscribe to its events
    ///
    /// Must be called from within a tokio runtime. Returns the stream of
    /// user-visible notices alongside the service.
    pub fn attach(host: Arc<dyn UsbHost>, config: &PrinterConfig) -> Result<(Self, NoticeReceiver)> {
        let runtime = Handle::try_current().map_err(|e| Error::Task(e.to_string()))?;
        let (notices, notice_rx) = create_notice_channel();

        let registry = DeviceRegistry::new(host.clone());
        let negotiator = Arc::new(PermissionNegotiator::new(
            host.clone(),
            config.permission_timeout(),
        ));
        let session = Arc::new(Session::new(host.clone(), notices.clone()));
        let transfers = TransferEngine::new(session.clone(), config.print_timeout(), runtime.clone());

        let router = EventRouter::new(
            registry.clone(),
            negotiator.clone(),
            session.clone(),
            notices,
        );
        let dispatcher = EventDispatcher::start(host, router)?;

        info!("Printer service attached");
        Ok((
            Self {
                registry,
                negotiator,
                session,
                transfers,
                dispatcher,
                runtime,
            },
            notice_rx,
        ))
    }

    /// Close the session, drop any pending permission request and
    /// unsubscribe from the host
    pub fn shutdown(mut self) {
        self.negotiator.cancel_pending();
        self.session.close();
        self.dispatcher.shutdown();
        info!("Printer service detached");
    }

    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.registry.list_devices()
    }

    pub async fn describe_device(
        &self,
        identifier: &str,
        request_permission: bool,
    ) -> Result<DeviceDetail> {
        self.registry
            .describe_device(identifier, request_permission, &self.negotiator)
            .await
    }

    pub fn has_permission(&self, identifier: &str) -> Result<bool> {
        self.registry.find(identifier)?;
        Ok(self.negotiator.has_permission(identifier))
    }

    pub async fn request_permission(&self, identifier: &str) -> Result<bool> {
        self.registry.find(identifier)?;
        self.negotiator.request_permission(identifier).await
    }

    /// Open a session with the first permitted device matching VID/PID
    ///
    /// Returns true at once if the bound device already matches.
    pub async fn connect_device(&self, vendor_id: u16, product_id: u16) -> Result<bool> {
        if self
            .session
            .bound_device()
            .is_some_and(|d| d.matches_ids(vendor_id, product_id))
        {
            return Ok(true);
        }

        let scan = connect_scan(
            self.registry.clone(),
            self.negotiator.clone(),
            self.session.clone(),
            vendor_id,
            product_id,
        );

        self.runtime
            .spawn(scan)
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Open a session with a specific device
    ///
    /// Host open, claim and endpoint selection failures come back as false.
    pub async fn open_device(&self, identifier: &str) -> Result<bool> {
        let device = self.registry.find(identifier)?;

        match on_session(&self.session, move |session| session.open(device)).await {
            Ok(_) => Ok(true),
            Err(e @ (Error::Open(_) | Error::Claim { .. } | Error::NoBulkOutEndpoint)) => {
                warn!("Failed to open {}: {}", identifier, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn close_device(&self) -> Result<()> {
        on_session(&self.session, |session| {
            session.close();
            Ok(())
        })
        .await
    }

    pub async fn configuration(&self, index: u8) -> Result<ConfigurationInfo> {
        on_session(&self.session, move |session| session.configuration(index)).await
    }

    pub async fn set_configuration(&self, index: u8) -> Result<bool> {
        on_session(&self.session, move |session| session.set_configuration(index)).await
    }

    pub async fn claim_interface(&self, id: u8, alternate_setting: u8) -> Result<bool> {
        on_session(&self.session, move |session| {
            session.claim_interface(id, alternate_setting)
        })
        .await
    }

    pub async fn release_interface(&self, id: u8, alternate_setting: u8) -> Result<bool> {
        on_session(&self.session, move |session| {
            session.release_interface(id, alternate_setting)
        })
        .await
    }

    pub async fn bulk_transfer_in(
        &self,
        endpoint: EndpointRef,
        max_length: usize,
        timeout_ms: u32,
    ) -> Result<Vec<u8>> {
        let transfers = self.transfers.clone();
        self.runtime
            .spawn_blocking(move || transfers.bulk_transfer_in(endpoint, max_length, timeout_ms))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    pub async fn bulk_transfer_out(
        &self,
        endpoint: EndpointRef,
        data: Vec<u8>,
        timeout_ms: u32,
    ) -> Result<usize> {
        let transfers = self.transfers.clone();
        self.runtime
            .spawn_blocking(move || transfers.bulk_transfer_out(endpoint, &data, timeout_ms))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Start a fire-and-forget print; `None` when no device is bound
    ///
    /// Returns without waiting for a transfer already in progress.
    pub fn print_bytes(&self, data: Vec<u8>) -> Option<PrintJob> {
        self.transfers.print_bytes(data)
    }

    /// Descriptor of the device the session is bound to
    pub fn bound_device(&self) -> Option<DeviceDescriptor> {
        self.session.bound_device()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn permission_pending(&self) -> bool {
        self.negotiator.is_pending()
    }
}

/// Run a session operation on the blocking pool
async fn on_session<T, F>(session: &Arc<Session>, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Session) -> Result<T> + Send + 'static,
{
    let session = session.clone();
    tokio::task::spawn_blocking(move || operation(&session))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

/// Walk the devices matching VID/PID and open a session with the first one
/// the user grants access to
async fn connect_scan(
    registry: DeviceRegistry,
    negotiator: Arc<PermissionNegotiator>,
    session: Arc<Session>,
    vendor_id: u16,
    product_id: u16,
) -> Result<bool> {
    let close = |session: &Session| -> Result<()> {
        session.close();
        Ok(())
    };
    on_session(&session, close).await?;

    for device in registry.find_by_ids(vendor_id, product_id) {
        let identifier = device.identifier().to_string();
        debug!(
            "Requesting {} ({:04x}:{:04x})",
            identifier, vendor_id, product_id
        );
        on_session(&session, close).await?;

        match negotiator.request_permission(&identifier).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Connection to {} refused", identifier);
                continue;
            }
            Err(Error::PermissionPending) => {
                info!("Another permission request is pending, giving up");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        match on_session(&session, move |session| session.open(device)).await {
            Ok(_) => {
                info!("Connected to {}", identifier);
                return Ok(true);
            }
            Err(e) => warn!("Failed to open {}: {}", identifier, e),
        }
    }

    info!("No device {:04x}:{:04x} connected", vendor_id, product_id);
    Ok(false)
}
