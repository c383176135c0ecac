//! Common utilities for smart-usb
//!
//! This crate provides functionality shared between the printer bridge and
//! its callers: error handling, logging setup, and the async channel bridge
//! that carries host notifications to the event dispatcher and user-visible
//! notices back to the application.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    HostEvent, HostEventReceiver, HostEventSender, Notice, NoticeReceiver, NoticeSender,
    create_event_bridge, create_notice_channel,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
