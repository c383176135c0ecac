//! USB printer bridge
//!
//! Mediates access to a USB receipt/label printer: enumerate devices,
//! negotiate access permission, open a session on the printer's bulk OUT
//! endpoint and move bytes across it, while staying consistent when the
//! device is unplugged mid-session.
//!
//! [`PrinterService`] ties the pieces together on top of a [`host::UsbHost`];
//! [`dispatch::dispatch`] exposes it through typed [`MethodCall`]s.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod host;
pub mod permission;
pub mod registry;
pub mod service;
pub mod session;
pub mod test_utils;
pub mod transfer;

mod sync;

pub use config::PrinterConfig;
pub use dispatch::dispatch;
pub use error::{Error, Result};
pub use protocol::{MethodCall, MethodError, MethodResult};
pub use service::PrinterService;
pub use transfer::{PrintJob, PrintReport};
