//! Protocol library for smart-usb
//!
//! This crate defines the types exchanged between the calling application and
//! the printer bridge: device listings, descriptor trees, method calls and
//! their results, and the error kinds reported across the method boundary.
//!
//! # Example
//!
//! ```
//! use protocol::{MethodCall, MAX_BULK_TRANSFER_SIZE};
//!
//! let call = MethodCall::GetConfiguration { index: 0 };
//! assert_eq!(call.name(), "getConfiguration");
//! assert_eq!(MAX_BULK_TRANSFER_SIZE, 16384);
//! ```

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ErrorKind, MethodError};
pub use messages::{MethodCall, MethodResult};
pub use types::{
    ConfigurationInfo, DeviceDescriptor, DeviceDetail, Direction, ENDPOINT_DIR_IN,
    ENDPOINT_NUMBER_MASK, EndpointInfo, EndpointKind, EndpointRef, InterfaceInfo,
    MAX_BULK_TRANSFER_SIZE,
};
