//! Host event dispatcher
//!
//! Owns the single host subscription and a dedicated `usb-events` thread
//! that routes host notifications:
//!
//! - permission grants open the session, then resolve the pending request
//! - permission denials resolve the pending request and raise a notice
//! - detaches tear the session down if it is bound to the removed device

use crate::error::{Error, Result};
use crate::host::{Subscription, UsbHost};
use crate::permission::PermissionNegotiator;
use crate::registry::DeviceRegistry;
use crate::session::Session;
use common::channel::HostEventCloser;
use common::{HostEvent, HostEventReceiver, Notice, NoticeSender, create_event_bridge};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running dispatcher; stops on [`EventDispatcher::shutdown`] or drop
pub struct EventDispatcher {
    subscription: Option<Subscription>,
    closer: HostEventCloser,
    thread: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Subscribe to the host and start routing events
    pub fn start(
        host: Arc<dyn UsbHost>,
        router: EventRouter,
    ) -> Result<Self> {
        let (events_tx, events_rx) = create_event_bridge();

        let subscription = host
            .subscribe(events_tx)
            .map_err(|e| Error::Subscription(e.to_string()))?;
        let closer = events_rx.closer();

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || router.run(events_rx))
            .map_err(|e| Error::Subscription(e.to_string()))?;

        info!("Event dispatcher started");
        Ok(Self {
            subscription: Some(subscription),
            closer,
            thread: Some(thread),
        })
    }

    /// Unsubscribe and stop the dispatcher thread
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        drop(self.subscription.take());
        self.closer.close();

        if thread.join().is_err() {
            error!("Event dispatcher thread panicked");
        }
        info!("Event dispatcher stopped");
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routes host events to the negotiator and the session
pub struct EventRouter {
    registry: DeviceRegistry,
    negotiator: Arc<PermissionNegotiator>,
    session: Arc<Session>,
    notices: NoticeSender,
}

impl EventRouter {
    pub fn new(
        registry: DeviceRegistry,
        negotiator: Arc<PermissionNegotiator>,
        session: Arc<Session>,
        notices: NoticeSender,
    ) -> Self {
        Self {
            registry,
            negotiator,
            session,
            notices,
        }
    }

    fn run(self, events: HostEventReceiver) {
        debug!("Event dispatcher thread running");

        while let Ok(event) = events.recv() {
            // A panicking handler must not take the subscription down with it
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.handle(event)));

            if let Err(e) = result {
                error!("Panic in host event handler: {:?}", e);
            }
        }

        debug!("Event channel closed");
    }

    /// Route one host event
    pub fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::PermissionResult {
                identifier,
                granted: true,
            } => self.on_granted(&identifier),

            HostEvent::PermissionResult {
                identifier,
                granted: false,
            } => {
                info!("Permission denied for {}", identifier);
                self.negotiator.resolve(&identifier, false);
                self.notices.notify(Notice::PermissionDenied { identifier });
            }

            HostEvent::Detached { identifier } => {
                self.session.on_detach(&identifier);
            }

            HostEvent::Attached { device } => {
                debug!(
                    "Device attached: {} ({:04x}:{:04x})",
                    device.identifier, device.vendor_id, device.product_id
                );
            }
        }
    }

    fn on_granted(&self, identifier: &str) {
        info!("Permission granted for {}", identifier);

        match self.registry.find(identifier) {
            Ok(device) => {
                let descriptor = device.descriptor.clone();
                match self.session.open(device) {
                    Ok(_) => self.notices.notify(Notice::DeviceConnected { device: descriptor }),
                    Err(e) => warn!("Failed to open {} after grant: {}", identifier, e),
                }
            }
            Err(e) => warn!("Granted device unavailable: {}", e),
        }

        self.negotiator.resolve(identifier, true);
    }
}
