//! Async channel bridge between host callbacks, the event dispatcher and the
//! calling application

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use protocol::DeviceDescriptor;
use tracing::debug;

/// Notification delivered by the host USB stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Device plugged in
    Attached {
        /// Snapshot of the new device
        device: DeviceDescriptor,
    },

    /// Device unplugged
    Detached {
        /// Identifier of the removed device
        identifier: String,
    },

    /// Outcome of a permission prompt
    PermissionResult {
        /// Identifier of the device the prompt was for
        identifier: String,
        /// Whether the user granted access
        granted: bool,
    },
}

/// User-visible notification about connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A session was opened after a permission grant
    DeviceConnected { device: DeviceDescriptor },

    /// The session's device was unplugged and the session torn down
    DeviceDetached { identifier: String },

    /// The user refused access to a device
    PermissionDenied { identifier: String },

    /// A print was requested with no device bound
    DeviceNotInitialized,
}

impl Notice {
    /// Short message suitable for a toast or status line
    pub fn message(&self) -> String {
        match self {
            Notice::DeviceConnected { .. } => "Device connected".to_string(),
            Notice::DeviceDetached { .. } => "USB device has been turned off".to_string(),
            Notice::PermissionDenied { identifier } => {
                format!("User refused to give USB device permission: {}", identifier)
            }
            Notice::DeviceNotInitialized => "USB device is not connected".to_string(),
        }
    }
}

/// Sending half of the host event bridge, held by host callbacks
#[derive(Clone)]
pub struct HostEventSender {
    tx: Sender<HostEvent>,
}

impl HostEventSender {
    /// Send an event to the dispatcher (blocking)
    pub fn send(&self, event: HostEvent) -> crate::Result<()> {
        self.tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Whether the dispatcher side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the host event bridge, held by the event dispatcher
pub struct HostEventReceiver {
    rx: Receiver<HostEvent>,
}

impl HostEventReceiver {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> crate::Result<HostEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    /// Close the channel, waking a blocked `recv`
    pub fn close(&self) -> bool {
        self.rx.close()
    }

    /// Handle that can close the channel from another thread
    pub fn closer(&self) -> HostEventCloser {
        HostEventCloser {
            rx: self.rx.clone(),
        }
    }
}

/// Closes a [`HostEventReceiver`] from outside the dispatcher thread
pub struct HostEventCloser {
    rx: Receiver<HostEvent>,
}

impl HostEventCloser {
    pub fn close(&self) -> bool {
        self.rx.close()
    }
}

/// Create the channel bridge between host callbacks and the dispatcher
pub fn create_event_bridge() -> (HostEventSender, HostEventReceiver) {
    let (tx, rx) = bounded(256);
    (HostEventSender { tx }, HostEventReceiver { rx })
}

/// Sending half of the notice stream
#[derive(Clone)]
pub struct NoticeSender {
    tx: Sender<Notice>,
}

impl NoticeSender {
    /// Emit a notice without ever blocking the caller
    ///
    /// Notices are best effort: when nobody listens or the buffer is full the
    /// notice is dropped.
    pub fn notify(&self, notice: Notice) {
        match self.tx.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                debug!("Notice channel full, dropping {:?}", notice);
            }
            Err(TrySendError::Closed(notice)) => {
                debug!("No notice listener, dropping {:?}", notice);
            }
        }
    }
}

/// Receiving half of the notice stream, held by the calling application
pub struct NoticeReceiver {
    rx: Receiver<Notice>,
}

impl NoticeReceiver {
    /// Wait for the next notice
    pub async fn recv(&self) -> crate::Result<Notice> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a notice without waiting
    pub fn try_recv(&self) -> Option<Notice> {
        match self.rx.try_recv() {
            Ok(notice) => Some(notice),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Drain every notice currently buffered
    pub fn drain(&self) -> Vec<Notice> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Create the notice stream
pub fn create_notice_channel() -> (NoticeSender, NoticeReceiver) {
    let (tx, rx) = bounded(64);
    (NoticeSender { tx }, NoticeReceiver { rx })
}
