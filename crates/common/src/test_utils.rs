//! Test utilities for smart-usb
//!
//! Provides descriptor builders and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let device = create_mock_descriptor(4, 0x0fe6, 0x811e);
//! assert_eq!(device.identifier, "/dev/bus/usb/001/004");
//! ```

use protocol::{
    ConfigurationInfo, DeviceDescriptor, Direction, EndpointInfo, EndpointKind, InterfaceInfo,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceDescriptor for testing
///
/// # Arguments
/// * `address` - Device address on bus 1, used to build the identifier
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
pub fn create_mock_descriptor(address: u8, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        identifier: format!("/dev/bus/usb/001/{:03}", address),
        vendor_id,
        product_id,
        configuration_count: 1,
    }
}

/// Create a bulk endpoint descriptor
pub fn create_bulk_endpoint(
    endpoint_number: u8,
    direction: Direction,
    max_packet_size: u16,
) -> EndpointInfo {
    EndpointInfo {
        endpoint_number,
        direction,
        kind: EndpointKind::Bulk,
        max_packet_size,
    }
}

/// Create the configuration of a typical receipt printer
///
/// Interface 0 carries an interrupt IN endpoint first, then bulk OUT 1 and
/// bulk IN 2, all with the given packet size.
pub fn create_printer_configuration(max_packet_size: u16) -> ConfigurationInfo {
    ConfigurationInfo {
        id: 1,
        index: 0,
        interfaces: vec![InterfaceInfo {
            id: 0,
            alternate_setting: 0,
            endpoints: vec![
                EndpointInfo {
                    endpoint_number: 3,
                    direction: Direction::In,
                    kind: EndpointKind::Interrupt,
                    max_packet_size: 8,
                },
                create_bulk_endpoint(1, Direction::Out, max_packet_size),
                create_bulk_endpoint(2, Direction::In, max_packet_size),
            ],
        }],
    }
}

/// Create a configuration whose interface 0 has no bulk OUT endpoint
pub fn create_input_only_configuration() -> ConfigurationInfo {
    ConfigurationInfo {
        id: 1,
        index: 0,
        interfaces: vec![InterfaceInfo {
            id: 0,
            alternate_setting: 0,
            endpoints: vec![create_bulk_endpoint(2, Direction::In, 64)],
        }],
    }
}

/// Create deterministic bulk data of the given size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
