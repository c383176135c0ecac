//! Access permission negotiation
//!
//! The host can run a single permission prompt at a time, so the negotiator
//! keeps one pending slot. A request takes the slot, starts the prompt and
//! waits on a oneshot that the event dispatcher resolves when the host
//! reports the outcome.

use crate::error::{Error, Result};
use crate::host::UsbHost;
use crate::sync::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct Pending {
    identifier: String,
    ticket: u64,
    reply: oneshot::Sender<bool>,
}

/// Single-slot permission negotiator
pub struct PermissionNegotiator {
    host: Arc<dyn UsbHost>,
    slot: Mutex<Option<Pending>>,
    next_ticket: AtomicU64,
    timeout: Option<Duration>,
}

impl PermissionNegotiator {
    /// Create a negotiator; with a `timeout`, unanswered prompts count as
    /// denied once it elapses
    pub fn new(host: Arc<dyn UsbHost>, timeout: Option<Duration>) -> Self {
        Self {
            host,
            slot: Mutex::new(None),
            next_ticket: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn has_permission(&self, identifier: &str) -> bool {
        self.host.has_permission(identifier)
    }

    /// Obtain access to a device, prompting the host if needed
    ///
    /// Resolves to whether access was granted. Fails with
    /// [`Error::PermissionPending`] while another request is outstanding.
    pub async fn request_permission(&self, identifier: &str) -> Result<bool> {
        if self.host.has_permission(identifier) {
            return Ok(true);
        }

        let (reply, outcome) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut slot = lock(&self.slot);
            if let Some(pending) = slot.as_ref() {
                debug!(
                    "Permission request for {} while {} is pending",
                    identifier, pending.identifier
                );
                return Err(Error::PermissionPending);
            }
            *slot = Some(Pending {
                identifier: identifier.to_string(),
                ticket,
                reply,
            });
        }
        let _guard = SlotGuard {
            slot: &self.slot,
            ticket,
        };

        info!("Requesting permission for {}", identifier);
        self.host.request_permission(identifier)?;

        let granted = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, outcome).await {
                Ok(result) => result.unwrap_or(false),
                Err(_) => {
                    warn!(
                        "Permission request for {} timed out after {:?}",
                        identifier, timeout
                    );
                    false
                }
            },
            None => outcome.await.unwrap_or(false),
        };

        info!(
            "Permission for {} {}",
            identifier,
            if granted { "granted" } else { "denied" }
        );
        Ok(granted)
    }

    /// Deliver a prompt outcome to the waiting request
    ///
    /// Returns whether a waiter was resolved.
    pub fn resolve(&self, identifier: &str, granted: bool) -> bool {
        let Some(pending) = lock(&self.slot).take() else {
            debug!(
                "Permission result for {} with no pending request",
                identifier
            );
            return false;
        };

        if pending.identifier != identifier {
            warn!(
                "Permission result for {} resolves pending request for {}",
                identifier, pending.identifier
            );
        }

        pending.reply.send(granted).is_ok()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Drop the pending request, resolving its waiter as denied
    pub fn cancel_pending(&self) -> bool {
        lock(&self.slot).take().is_some()
    }
}

/// Frees the slot when a request ends, unless a newer request owns it
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<Pending>>,
    ticket: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot.as_ref().is_some_and(|p| p.ticket == self.ticket) {
            *slot = None;
        }
    }
}
