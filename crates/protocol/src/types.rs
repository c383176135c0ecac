//! USB device and descriptor type definitions
//!
//! This module defines the device-facing types exchanged with the calling
//! application: device listings, string details, and the static
//! configuration -> interface -> endpoint tree.

use serde::{Deserialize, Serialize};

/// Largest buffer the host accepts in a single bulk transfer call
///
/// Older host stacks silently truncate anything larger, so callers must
/// split (OUT) or reject (IN) instead of relying on the host.
pub const MAX_BULK_TRANSFER_SIZE: usize = 16384;

/// Endpoint address bit marking the IN (device to host) direction
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Mask for the endpoint number inside an endpoint address
pub const ENDPOINT_NUMBER_MASK: u8 = 0x0f;

/// Snapshot of an attached device as reported by the host
///
/// Never cached: a fresh snapshot is produced on every listing call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Host-assigned unique key (device node path on Linux)
    pub identifier: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Number of configurations
    pub configuration_count: u8,
}

impl DeviceDescriptor {
    /// Whether two descriptors describe the same device model (VID/PID)
    pub fn same_model(&self, other: &DeviceDescriptor) -> bool {
        self.matches_ids(other.vendor_id, other.product_id)
    }

    /// Whether this descriptor carries the given VID/PID pair
    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// String details of a device
///
/// `serial_number` is only populated when access permission is held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetail {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// Endpoint direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & ENDPOINT_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Address bits for this direction
    pub fn bits(self) -> u8 {
        match self {
            Direction::In => ENDPOINT_DIR_IN,
            Direction::Out => 0,
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Reference to an endpoint by number and direction
///
/// This is what callers pass to the raw transfer operations; it is resolved
/// against the bound device's descriptor tree before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRef {
    pub endpoint_number: u8,
    pub direction: Direction,
}

impl EndpointRef {
    pub fn new(endpoint_number: u8, direction: Direction) -> Self {
        Self {
            endpoint_number,
            direction,
        }
    }
}

/// Endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    /// Endpoint number (0..=15)
    pub endpoint_number: u8,
    pub direction: Direction,
    pub kind: EndpointKind,
    /// Device-reported maximum packet size
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// Endpoint address including the direction bit
    pub fn address(&self) -> u8 {
        (self.endpoint_number & ENDPOINT_NUMBER_MASK) | self.direction.bits()
    }

    /// Whether this endpoint is the one `endpoint` refers to
    pub fn matches(&self, endpoint: EndpointRef) -> bool {
        self.endpoint_number == endpoint.endpoint_number && self.direction == endpoint.direction
    }

    /// Whether this is a host-to-device bulk endpoint
    pub fn is_bulk_out(&self) -> bool {
        self.kind == EndpointKind::Bulk && self.direction == Direction::Out
    }
}

/// Interface descriptor (one alternate setting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub id: u8,
    pub alternate_setting: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationInfo {
    /// bConfigurationValue
    pub id: u8,
    /// Position of this configuration in the device's list
    pub index: u8,
    pub interfaces: Vec<InterfaceInfo>,
}

impl ConfigurationInfo {
    /// Find an interface by number and alternate setting
    pub fn find_interface(&self, id: u8, alternate_setting: u8) -> Option<&InterfaceInfo> {
        self.interfaces
            .iter()
            .find(|i| i.id == id && i.alternate_setting == alternate_setting)
    }
}
