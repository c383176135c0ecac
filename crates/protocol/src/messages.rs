//! Method call definitions
//!
//! Every operation the calling application can invoke, and every shape a
//! successful result can take. Calls are adjacently tagged so they read as
//! `{"method": "...", "args": {...}}` on the wire.

use crate::types::{ConfigurationInfo, DeviceDescriptor, DeviceDetail, EndpointRef};
use serde::{Deserialize, Serialize};

/// Operation requested by the calling application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "camelCase")]
pub enum MethodCall {
    /// List attached devices
    GetDeviceList,

    /// Read string details, optionally asking for permission first
    #[serde(rename_all = "camelCase")]
    GetDeviceDescription {
        identifier: String,
        #[serde(default)]
        request_permission: bool,
    },

    /// Whether access permission is currently held
    HasPermission { identifier: String },

    /// Ask the host for access permission
    RequestPermission { identifier: String },

    /// Scan for a VID/PID pair and open a session with the first match
    #[serde(rename_all = "camelCase")]
    ConnectDevice { vendor_id: u16, product_id: u16 },

    /// Open a session for a specific device
    OpenDevice { identifier: String },

    /// Tear down the current session
    CloseDevice,

    /// Describe one configuration of the bound device
    GetConfiguration { index: u8 },

    /// Activate one configuration of the bound device
    SetConfiguration { index: u8 },

    /// Claim an interface on the open connection
    #[serde(rename_all = "camelCase")]
    ClaimInterface { id: u8, alternate_setting: u8 },

    /// Release an interface on the open connection
    #[serde(rename_all = "camelCase")]
    ReleaseInterface { id: u8, alternate_setting: u8 },

    /// Single bulk read of at most `max_length` bytes
    #[serde(rename_all = "camelCase")]
    BulkTransferIn {
        endpoint: EndpointRef,
        max_length: usize,
        /// Timeout in milliseconds
        timeout: u32,
    },

    /// Chunked bulk write
    BulkTransferOut {
        endpoint: EndpointRef,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Timeout in milliseconds, applied per chunk
        timeout: u32,
    },

    /// Fire-and-forget print over the session's bulk OUT endpoint
    PrintBytes {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl MethodCall {
    /// Wire name of the method
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::GetDeviceList => "getDeviceList",
            MethodCall::GetDeviceDescription { .. } => "getDeviceDescription",
            MethodCall::HasPermission { .. } => "hasPermission",
            MethodCall::RequestPermission { .. } => "requestPermission",
            MethodCall::ConnectDevice { .. } => "connectDevice",
            MethodCall::OpenDevice { .. } => "openDevice",
            MethodCall::CloseDevice => "closeDevice",
            MethodCall::GetConfiguration { .. } => "getConfiguration",
            MethodCall::SetConfiguration { .. } => "setConfiguration",
            MethodCall::ClaimInterface { .. } => "claimInterface",
            MethodCall::ReleaseInterface { .. } => "releaseInterface",
            MethodCall::BulkTransferIn { .. } => "bulkTransferIn",
            MethodCall::BulkTransferOut { .. } => "bulkTransferOut",
            MethodCall::PrintBytes { .. } => "printBytes",
        }
    }
}

/// Successful result of a method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum MethodResult {
    Unit,
    Bool(bool),
    Count(usize),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Devices(Vec<DeviceDescriptor>),
    Detail(DeviceDetail),
    Configuration(ConfigurationInfo),
}
