//! Session lifecycle tests against the mock host

use common::test_utils::{create_input_only_configuration, create_mock_descriptor};
use common::{Notice, NoticeReceiver, create_notice_channel};
use printer::Error;
use printer::host::{HostDevice, UsbHost};
use printer::session::Session;
use printer::test_utils::{HostCall, MockHost};
use std::sync::Arc;

fn session(host: &MockHost) -> (Session, NoticeReceiver) {
    let (notices, rx) = create_notice_channel();
    (Session::new(Arc::new(host.clone()), notices), rx)
}

fn device(host: &MockHost, identifier: &str) -> HostDevice {
    host.devices()
        .unwrap()
        .into_iter()
        .find(|d| d.identifier() == identifier)
        .unwrap()
}

#[test]
fn test_reopen_same_model_is_noop() {
    let host = MockHost::new();
    let a = host.add_printer(4, 0x0fe6, 0x811e, true);
    let (session, _notices) = session(&host);

    session.open(device(&host, &a.identifier)).unwrap();
    host.clear_calls();

    session.open(device(&host, &a.identifier)).unwrap();

    assert!(host.calls().is_empty());
    assert_eq!(host.open_connections(), 1);
}

#[test]
fn test_open_other_device_closes_previous() {
    let host = MockHost::new();
    let a = host.add_printer(4, 0x0fe6, 0x811e, true);
    let b = host.add_printer(5, 0x04b8, 0x0202, true);
    let (session, _notices) = session(&host);

    session.open(device(&host, &a.identifier)).unwrap();
    host.clear_calls();

    session.open(device(&host, &b.identifier)).unwrap();

    assert_eq!(
        host.calls(),
        vec![
            HostCall::Release(0),
            HostCall::Close(a.identifier.clone()),
            HostCall::Open(b.identifier.clone()),
            HostCall::Claim {
                interface: 0,
                force: true
            },
        ]
    );
    assert_eq!(session.bound_device(), Some(b));
    assert_eq!(host.open_connections(), 1);
}

#[test]
fn test_detach_of_bound_device_closes_session() {
    let (host, printer) = MockHost::with_printer(0x0fe6, 0x811e);
    let (session, notices) = session(&host);
    session.open(device(&host, &printer.identifier)).unwrap();

    assert!(session.on_detach(&printer.identifier));

    assert!(!session.is_open());
    assert!(session.bound_device().is_none());
    assert_eq!(host.open_connections(), 0);
    assert_eq!(
        notices.try_recv(),
        Some(Notice::DeviceDetached {
            identifier: printer.identifier
        })
    );
}

#[test]
fn test_detach_of_other_device_is_noop() {
    let host = MockHost::new();
    let a = host.add_printer(4, 0x0fe6, 0x811e, true);
    let b = host.add_printer(5, 0x04b8, 0x0202, true);
    let (session, notices) = session(&host);
    session.open(device(&host, &a.identifier)).unwrap();

    assert!(!session.on_detach(&b.identifier));

    assert!(session.is_open());
    assert!(notices.try_recv().is_none());
}

#[test]
fn test_claim_failure_closes_connection() {
    let (host, printer) = MockHost::with_printer(1, 2);
    let (session, _notices) = session(&host);
    host.fail_claim(true);

    let result = session.open(device(&host, &printer.identifier));

    assert!(matches!(result, Err(Error::Claim { interface: 0, .. })));
    assert_eq!(host.open_connections(), 0);
    assert!(host.calls().contains(&HostCall::Close(printer.identifier.clone())));
    assert!(!session.is_open());
    assert_eq!(session.bound_device(), Some(printer));

    host.fail_claim(false);
    assert!(session.ensure_open().is_ok());
    assert!(session.is_open());
}

#[test]
fn test_open_failure_keeps_device_bound() {
    let (host, printer) = MockHost::with_printer(1, 2);
    let (session, _notices) = session(&host);
    host.fail_open(true);

    assert!(matches!(
        session.open(device(&host, &printer.identifier)),
        Err(Error::Open(_))
    ));
    assert_eq!(session.bound_device(), Some(printer));
    assert!(session.endpoint().is_none());
}

#[test]
fn test_missing_bulk_out_endpoint() {
    let host = MockHost::new();
    let descriptor = host.add_device(
        create_mock_descriptor(7, 1, 2),
        vec![create_input_only_configuration()],
        true,
    );
    let (session, _notices) = session(&host);

    assert!(matches!(
        session.open(device(&host, &descriptor.identifier)),
        Err(Error::NoBulkOutEndpoint)
    ));
    assert_eq!(host.open_connections(), 0);
}

#[test]
fn test_ensure_open_without_device() {
    let host = MockHost::new();
    let (session, notices) = session(&host);

    assert!(matches!(
        session.ensure_open(),
        Err(Error::NotInitialized("USB device"))
    ));
    assert_eq!(notices.try_recv(), Some(Notice::DeviceNotInitialized));
}

#[test]
fn test_raw_primitives_on_open_session() {
    let (host, printer) = MockHost::with_printer(1, 2);
    let (session, _notices) = session(&host);
    session.open(device(&host, &printer.identifier)).unwrap();
    host.clear_calls();

    assert!(session.set_configuration(0).unwrap());
    assert!(session.release_interface(0, 0).unwrap());
    assert!(session.claim_interface(0, 0).unwrap());
    assert_eq!(
        host.calls(),
        vec![
            HostCall::SetConfiguration(1),
            HostCall::Release(0),
            HostCall::Claim {
                interface: 0,
                force: true
            },
        ]
    );

    assert_eq!(session.configuration(0).unwrap().id, 1);
    assert!(matches!(session.configuration(1), Err(Error::NotFound(_))));
    assert!(matches!(session.set_configuration(3), Err(Error::NotFound(_))));
}

#[test]
fn test_primitives_after_close() {
    let (host, printer) = MockHost::with_printer(1, 2);
    let (session, _notices) = session(&host);
    session.open(device(&host, &printer.identifier)).unwrap();
    session.close();

    let err = session.claim_interface(0, 0).unwrap_err();
    assert_eq!(err.kind(), protocol::ErrorKind::IllegalState);
}
