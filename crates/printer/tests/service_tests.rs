//! End-to-end tests of the printer service and method dispatch

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_bulk_data, with_timeout};
use common::{Notice, NoticeReceiver};
use printer::test_utils::{HostCall, MockHost};
use printer::{Error, MethodCall, MethodResult, PrinterConfig, PrinterService, dispatch};
use protocol::{Direction, EndpointRef, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn attach(host: &MockHost) -> (PrinterService, NoticeReceiver) {
    PrinterService::attach(Arc::new(host.clone()), &PrinterConfig::default()).unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn next_notice(notices: &NoticeReceiver) -> Notice {
    with_timeout(DEFAULT_TEST_TIMEOUT, notices.recv())
        .await
        .expect("no notice")
        .unwrap()
}

#[tokio::test]
async fn test_single_subscription_per_host() {
    let host = MockHost::new();
    let (service, _notices) = attach(&host);
    assert!(host.is_subscribed());

    let second = PrinterService::attach(Arc::new(host.clone()), &PrinterConfig::default());
    assert!(matches!(second, Err(Error::Subscription(_))));

    service.shutdown();
    assert!(!host.is_subscribed());

    let (again, _notices) = attach(&host);
    again.shutdown();
}

#[tokio::test]
async fn test_grant_opens_session_before_resolving() {
    let host = MockHost::new();
    let printer = host.add_printer(4, 0x0fe6, 0x811e, false);
    let (service, notices) = attach(&host);

    let (granted, ()) = tokio::join!(service.request_permission(&printer.identifier), async {
        wait_until(|| service.permission_pending()).await;
        host.answer_permission(&printer.identifier, true);
    });

    assert!(granted.unwrap());
    assert!(service.is_open());
    assert_eq!(
        next_notice(&notices).await,
        Notice::DeviceConnected {
            device: printer.clone()
        }
    );
    service.shutdown();
}

#[tokio::test]
async fn test_connect_with_held_permission() {
    let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, _notices) = attach(&host);

    assert!(service.connect_device(0x0fe6, 0x811e).await.unwrap());
    assert_eq!(service.bound_device(), Some(printer));
    assert!(service.is_open());

    host.clear_calls();
    assert!(service.connect_device(0x0fe6, 0x811e).await.unwrap());
    assert!(host.calls().is_empty());
    service.shutdown();
}

#[tokio::test]
async fn test_connect_prompts_for_permission() {
    let host = MockHost::new();
    let printer = host.add_printer(4, 0x0fe6, 0x811e, false);
    host.set_permission_reply(Some(true));
    let (service, _notices) = attach(&host);

    assert!(service.connect_device(0x0fe6, 0x811e).await.unwrap());
    assert_eq!(service.bound_device(), Some(printer.clone()));
    assert!(
        host.calls()
            .contains(&HostCall::RequestPermission(printer.identifier))
    );
    service.shutdown();
}

#[tokio::test]
async fn test_connect_denied() {
    let host = MockHost::new();
    let printer = host.add_printer(4, 0x0fe6, 0x811e, false);
    host.set_permission_reply(Some(false));
    let (service, notices) = attach(&host);

    assert!(!service.connect_device(0x0fe6, 0x811e).await.unwrap());
    assert!(!service.is_open());
    assert_eq!(
        next_notice(&notices).await,
        Notice::PermissionDenied {
            identifier: printer.identifier
        }
    );
    service.shutdown();
}

#[tokio::test]
async fn test_connect_without_match() {
    let (host, _printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, _notices) = attach(&host);

    assert!(!service.connect_device(0x04b8, 0x0202).await.unwrap());
    assert!(service.bound_device().is_none());
    service.shutdown();
}

#[tokio::test]
async fn test_connect_replaces_other_session() {
    let host = MockHost::new();
    let a = host.add_printer(4, 0x0fe6, 0x811e, true);
    let b = host.add_printer(5, 0x04b8, 0x0202, true);
    let (service, _notices) = attach(&host);

    assert!(service.open_device(&a.identifier).await.unwrap());
    assert!(service.connect_device(0x04b8, 0x0202).await.unwrap());

    assert_eq!(service.bound_device(), Some(b));
    assert_eq!(host.open_connections(), 1);
    service.shutdown();
}

#[tokio::test]
async fn test_unplug_tears_session_down() {
    let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, notices) = attach(&host);
    assert!(service.open_device(&printer.identifier).await.unwrap());

    host.unplug(&printer.identifier);

    assert_eq!(
        next_notice(&notices).await,
        Notice::DeviceDetached {
            identifier: printer.identifier
        }
    );
    assert!(!service.is_open());
    assert_eq!(host.open_connections(), 0);

    let err = dispatch(
        &service,
        MethodCall::BulkTransferOut {
            endpoint: EndpointRef::new(1, Direction::Out),
            data: vec![1, 2, 3],
            timeout: 100,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::IllegalState);
    service.shutdown();
}

#[tokio::test]
async fn test_unplug_of_other_device_keeps_session() {
    let host = MockHost::new();
    let a = host.add_printer(4, 0x0fe6, 0x811e, true);
    let b = host.add_printer(5, 0x04b8, 0x0202, true);
    let (service, _notices) = attach(&host);
    assert!(service.open_device(&a.identifier).await.unwrap());

    host.unplug(&b.identifier);
    // Attach events are only logged
    host.emit_attached(b);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(service.is_open());
    service.shutdown();
}

#[tokio::test]
async fn test_print_through_service() {
    let (host, _printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, _notices) = attach(&host);
    assert!(service.connect_device(0x0fe6, 0x811e).await.unwrap());

    let data = create_mock_bulk_data(150);
    let report = service.print_bytes(data.clone()).unwrap().wait().await.unwrap();

    assert_eq!(report.bytes_written, 150);
    assert_eq!(report.chunks, 3);
    assert_eq!(host.written().concat(), data);
    service.shutdown();
}

#[tokio::test]
async fn test_print_returns_while_earlier_job_runs() {
    let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, _notices) = attach(&host);
    assert!(service.open_device(&printer.identifier).await.unwrap());
    host.set_write_delay(Duration::from_millis(50));

    let first = dispatch(&service, MethodCall::PrintBytes { data: vec![0; 64 * 20] })
        .await
        .unwrap();
    assert_eq!(first, MethodResult::Bool(true));
    wait_until(|| host.writes_attempted() >= 1).await;

    let second = dispatch(&service, MethodCall::PrintBytes { data: vec![1; 64] })
        .await
        .unwrap();
    assert_eq!(second, MethodResult::Bool(true));
    assert!(host.writes_attempted() < 20);

    wait_until(|| host.writes_attempted() == 21).await;
    service.shutdown();
}

#[tokio::test]
async fn test_session_calls_do_not_block_runtime_during_print() {
    let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (service, _notices) = attach(&host);
    assert!(service.open_device(&printer.identifier).await.unwrap());
    host.set_write_delay(Duration::from_millis(50));

    let job = service.print_bytes(vec![0; 64 * 20]).unwrap();
    wait_until(|| host.writes_attempted() >= 1).await;

    let started = Instant::now();
    let (configured, ticked) = tokio::join!(
        dispatch(&service, MethodCall::SetConfiguration { index: 0 }),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        }
    );

    assert!(ticked < Duration::from_millis(500), "runtime stalled {:?}", ticked);
    assert_eq!(configured.unwrap(), MethodResult::Bool(true));
    assert_eq!(host.writes_attempted(), 20);
    assert_eq!(job.wait().await.unwrap().bytes_written, 64 * 20);
    service.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let (host, printer) = MockHost::with_printer(1, 2);
    let (service, _notices) = attach(&host);
    assert!(service.open_device(&printer.identifier).await.unwrap());

    service.shutdown();

    assert_eq!(host.open_connections(), 0);
    assert!(!host.is_subscribed());
}

mod dispatch_surface {
    use super::*;

    #[tokio::test]
    async fn test_device_list_and_lookup_errors() {
        let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
        let (service, _notices) = attach(&host);

        let result = dispatch(&service, MethodCall::GetDeviceList).await.unwrap();
        assert_eq!(result, MethodResult::Devices(vec![printer.clone()]));

        let result = dispatch(
            &service,
            MethodCall::HasPermission {
                identifier: printer.identifier.clone(),
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Bool(true));

        let err = dispatch(
            &service,
            MethodCall::HasPermission {
                identifier: "/dev/bus/usb/009/009".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = dispatch(
            &service,
            MethodCall::OpenDevice {
                identifier: "/dev/bus/usb/009/009".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_print_without_device() {
        let (host, _printer) = MockHost::with_printer(1, 2);
        let (service, notices) = attach(&host);

        let result = dispatch(&service, MethodCall::PrintBytes { data: vec![1, 2, 3] })
            .await
            .unwrap();

        assert_eq!(result, MethodResult::Bool(false));
        assert_eq!(notices.try_recv(), Some(Notice::DeviceNotInitialized));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_open_device_failures_are_false() {
        let (host, printer) = MockHost::with_printer(1, 2);
        let (service, _notices) = attach(&host);
        host.fail_claim(true);

        let result = dispatch(
            &service,
            MethodCall::OpenDevice {
                identifier: printer.identifier.clone(),
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Bool(false));

        host.fail_claim(false);
        let result = dispatch(
            &service,
            MethodCall::OpenDevice {
                identifier: printer.identifier,
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Bool(true));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_raw_transfers() {
        let (host, printer) = MockHost::with_printer(1, 2);
        let (service, _notices) = attach(&host);
        service.open_device(&printer.identifier).await.unwrap();
        host.push_read(vec![0x12]);

        let result = dispatch(
            &service,
            MethodCall::BulkTransferIn {
                endpoint: EndpointRef::new(2, Direction::In),
                max_length: 64,
                timeout: 100,
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Bytes(vec![0x12]));

        let err = dispatch(
            &service,
            MethodCall::BulkTransferIn {
                endpoint: EndpointRef::new(2, Direction::In),
                max_length: 16385,
                timeout: 100,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let result = dispatch(
            &service,
            MethodCall::BulkTransferOut {
                endpoint: EndpointRef::new(1, Direction::Out),
                data: vec![0; 100],
                timeout: 100,
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Count(100));

        host.fail_write(1);
        let err = dispatch(
            &service,
            MethodCall::BulkTransferOut {
                endpoint: EndpointRef::new(1, Direction::Out),
                data: vec![0; 10],
                timeout: 100,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_configuration_calls() {
        let (host, printer) = MockHost::with_printer(1, 2);
        let (service, _notices) = attach(&host);

        let err = dispatch(&service, MethodCall::GetConfiguration { index: 0 })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalState);

        service.open_device(&printer.identifier).await.unwrap();

        let result = dispatch(&service, MethodCall::GetConfiguration { index: 0 })
            .await
            .unwrap();
        assert!(matches!(result, MethodResult::Configuration(c) if c.id == 1));

        let result = dispatch(&service, MethodCall::SetConfiguration { index: 0 })
            .await
            .unwrap();
        assert_eq!(result, MethodResult::Bool(true));

        let result = dispatch(
            &service,
            MethodCall::ClaimInterface {
                id: 0,
                alternate_setting: 0,
            },
        )
        .await
        .unwrap();
        assert_eq!(result, MethodResult::Bool(true));

        let result = dispatch(&service, MethodCall::CloseDevice).await.unwrap();
        assert_eq!(result, MethodResult::Unit);
        assert!(!service.is_open());
        service.shutdown();
    }

    #[tokio::test]
    async fn test_describe_with_permission_request() {
        let host = MockHost::new();
        let printer = host.add_printer(4, 1, 2, false);
        host.set_permission_reply(Some(true));
        let (service, _notices) = attach(&host);

        let result = dispatch(
            &service,
            MethodCall::GetDeviceDescription {
                identifier: printer.identifier,
                request_permission: true,
            },
        )
        .await
        .unwrap();

        let MethodResult::Detail(detail) = result else {
            panic!("unexpected result {:?}", result);
        };
        assert!(detail.serial_number.is_some());
        assert_eq!(detail.manufacturer.as_deref(), Some("Mock Manufacturer"));
        service.shutdown();
    }
}
