//! Method call dispatch
//!
//! Maps each [`MethodCall`] onto the service and folds the outcome into a
//! [`MethodResult`] or a [`MethodError`].

use crate::service::PrinterService;
use protocol::{MethodCall, MethodError, MethodResult};
use tracing::debug;

/// Execute one method call against the service
pub async fn dispatch(
    service: &PrinterService,
    call: MethodCall,
) -> Result<MethodResult, MethodError> {
    debug!("Dispatching {}", call.name());

    let result = match call {
        MethodCall::GetDeviceList => MethodResult::Devices(service.list_devices()),

        MethodCall::GetDeviceDescription {
            identifier,
            request_permission,
        } => MethodResult::Detail(
            service
                .describe_device(&identifier, request_permission)
                .await?,
        ),

        MethodCall::HasPermission { identifier } => {
            MethodResult::Bool(service.has_permission(&identifier)?)
        }

        MethodCall::RequestPermission { identifier } => {
            MethodResult::Bool(service.request_permission(&identifier).await?)
        }

        MethodCall::ConnectDevice {
            vendor_id,
            product_id,
        } => MethodResult::Bool(service.connect_device(vendor_id, product_id).await?),

        MethodCall::OpenDevice { identifier } => {
            MethodResult::Bool(service.open_device(&identifier).await?)
        }

        MethodCall::CloseDevice => {
            service.close_device().await?;
            MethodResult::Unit
        }

        MethodCall::GetConfiguration { index } => {
            MethodResult::Configuration(service.configuration(index).await?)
        }

        MethodCall::SetConfiguration { index } => {
            MethodResult::Bool(service.set_configuration(index).await?)
        }

        MethodCall::ClaimInterface {
            id,
            alternate_setting,
        } => MethodResult::Bool(service.claim_interface(id, alternate_setting).await?),

        MethodCall::ReleaseInterface {
            id,
            alternate_setting,
        } => MethodResult::Bool(service.release_interface(id, alternate_setting).await?),

        MethodCall::BulkTransferIn {
            endpoint,
            max_length,
            timeout,
        } => MethodResult::Bytes(
            service
                .bulk_transfer_in(endpoint, max_length, timeout)
                .await?,
        ),

        MethodCall::BulkTransferOut {
            endpoint,
            data,
            timeout,
        } => MethodResult::Count(service.bulk_transfer_out(endpoint, data, timeout).await?),

        MethodCall::PrintBytes { data } => MethodResult::Bool(service.print_bytes(data).is_some()),
    };

    Ok(result)
}
