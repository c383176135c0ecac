//! Chunked bulk transfers
//!
//! Two write paths share the session's output endpoint:
//!
//! - [`TransferEngine::bulk_transfer_out`] writes host-sized chunks and stops
//!   at the first failure, reporting the bytes that made it out.
//! - [`TransferEngine::print_bytes`] writes packet-sized chunks on a blocking
//!   worker, keeps going past failed chunks and only records them. It stops
//!   early when the printer goes away.
//!
//! Both hold the session lock for the whole transfer. Starting a print job
//! does not wait for that lock.

use crate::error::{Error, Result};
use crate::host::HostConnection;
use crate::session::Session;
use protocol::{EndpointRef, MAX_BULK_TRANSFER_SIZE};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default per-chunk timeout of print jobs (100 seconds)
pub const DEFAULT_PRINT_TIMEOUT: Duration = Duration::from_millis(100_000);

/// Lengths of the chunks `len` bytes split into at `chunk` bytes each
///
/// Yields `ceil(len / chunk)` values; every one equals `chunk` except
/// possibly the last.
pub fn chunk_sizes(len: usize, chunk: usize) -> impl Iterator<Item = usize> {
    let chunk = chunk.max(1);
    (0..len.div_ceil(chunk)).map(move |i| chunk.min(len - i * chunk))
}

/// Write `data` in chunks, stopping at the first failed chunk
///
/// Returns the bytes written before the failure. A failure of the very
/// first chunk is an error.
pub fn write_chunked(
    connection: &mut dyn HostConnection,
    address: u8,
    data: &[u8],
    chunk: usize,
    timeout: Duration,
) -> Result<usize> {
    let mut written = 0;
    let mut offset = 0;

    for (index, size) in chunk_sizes(data.len(), chunk).enumerate() {
        let piece = &data[offset..offset + size];
        offset += size;

        match connection.write_bulk(address, piece, timeout) {
            Ok(n) => written += n,
            Err(source) if index == 0 => {
                return Err(Error::Transfer {
                    operation: "bulkTransferOut",
                    source,
                });
            }
            Err(e) => {
                warn!(
                    "Bulk OUT chunk {} failed after {} bytes: {}",
                    index, written, e
                );
                break;
            }
        }
    }

    Ok(written)
}

/// libusb-style return code of a single transfer
///
/// Bytes transferred on success, the negative `LIBUSB_ERROR_*` value on
/// failure.
pub fn return_code(result: &std::result::Result<usize, rusb::Error>) -> i32 {
    match result {
        Ok(n) => i32::try_from(*n).unwrap_or(i32::MAX),
        Err(e) => match e {
            rusb::Error::Io => -1,
            rusb::Error::InvalidParam => -2,
            rusb::Error::Access => -3,
            rusb::Error::NoDevice => -4,
            rusb::Error::NotFound => -5,
            rusb::Error::Busy => -6,
            rusb::Error::Timeout => -7,
            rusb::Error::Overflow => -8,
            rusb::Error::Pipe => -9,
            rusb::Error::Interrupted => -10,
            rusb::Error::NoMem => -11,
            rusb::Error::NotSupported => -12,
            _ => -99,
        },
    }
}

/// Outcome of a print job, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintReport {
    /// Chunks handed to the host
    pub chunks: usize,
    pub bytes_written: usize,
    pub failed_chunks: usize,
    /// Return code of the last chunk
    pub last_return_code: Option<i32>,
    /// Stopped early through [`PrintJob::cancel`]
    pub cancelled: bool,
    /// No link could be opened when the job started
    pub session_lost: bool,
    /// The printer was unplugged while the job ran
    pub device_lost: bool,
}

impl PrintReport {
    fn record(&mut self, result: &std::result::Result<usize, rusb::Error>) {
        self.chunks += 1;
        self.last_return_code = Some(return_code(result));

        match result {
            Ok(n) => self.bytes_written += n,
            Err(e) => {
                self.failed_chunks += 1;
                warn!("Print chunk {} failed: {}", self.chunks - 1, e);
            }
        }
    }
}

/// Handle to a running print job
///
/// Dropping the handle leaves the job running.
pub struct PrintJob {
    handle: JoinHandle<PrintReport>,
    cancel: Arc<AtomicBool>,
}

impl PrintJob {
    /// Stop before the next chunk
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job to finish
    pub async fn wait(self) -> Result<PrintReport> {
        self.handle
            .await
            .map_err(|e| Error::Task(e.to_string()))
    }
}

/// Bulk transfer paths over the session's link
#[derive(Clone)]
pub struct TransferEngine {
    session: Arc<Session>,
    print_timeout: Duration,
    runtime: Handle,
}

impl TransferEngine {
    pub fn new(session: Arc<Session>, print_timeout: Duration, runtime: Handle) -> Self {
        Self {
            session,
            print_timeout,
            runtime,
        }
    }

    /// Single bulk read of at most `max_length` bytes
    pub fn bulk_transfer_in(
        &self,
        endpoint: EndpointRef,
        max_length: usize,
        timeout_ms: u32,
    ) -> Result<Vec<u8>> {
        let mut state = self.session.lock();
        let (device, link) = state.connected()?;

        if max_length > MAX_BULK_TRANSFER_SIZE {
            return Err(Error::TransferTooLarge {
                requested: max_length,
                limit: MAX_BULK_TRANSFER_SIZE,
            });
        }

        let endpoint = device
            .find_endpoint(endpoint)
            .ok_or_else(|| Error::NotFound(format!("endpoint {:?}", endpoint)))?;

        let mut buf = vec![0u8; max_length];
        let read = link
            .connection
            .read_bulk(
                endpoint.address(),
                &mut buf,
                Duration::from_millis(timeout_ms.into()),
            )
            .map_err(|source| Error::Transfer {
                operation: "bulkTransferIn",
                source,
            })?;

        debug!(
            "Bulk IN {:#04x}: {} of {} bytes",
            endpoint.address(),
            read,
            max_length
        );
        buf.truncate(read);
        Ok(buf)
    }

    /// Chunked bulk write; returns the bytes actually written
    pub fn bulk_transfer_out(
        &self,
        endpoint: EndpointRef,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let mut state = self.session.lock();
        let (device, link) = state.connected()?;

        let endpoint = device
            .find_endpoint(endpoint)
            .ok_or_else(|| Error::NotFound(format!("endpoint {:?}", endpoint)))?;

        if data.is_empty() {
            return Ok(0);
        }

        let written = write_chunked(
            link.connection.as_mut(),
            endpoint.address(),
            data,
            MAX_BULK_TRANSFER_SIZE,
            Duration::from_millis(timeout_ms.into()),
        )?;

        debug!(
            "Bulk OUT {:#04x}: {} of {} bytes",
            endpoint.address(),
            written,
            data.len()
        );
        Ok(written)
    }

    /// Start a print job over the session's output endpoint
    ///
    /// Returns `None` when no device is bound. The link is opened by the job
    /// itself, after any transfer already running; a failed open shows up as
    /// [`PrintReport::session_lost`].
    pub fn print_bytes(&self, data: Vec<u8>) -> Option<PrintJob> {
        if let Err(e) = self.session.require_bound() {
            warn!("Cannot print: {}", e);
            return None;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let session = self.session.clone();
        let timeout = self.print_timeout;
        let flag = cancel.clone();

        let handle = self
            .runtime
            .spawn_blocking(move || run_print(&session, &data, timeout, &flag));

        Some(PrintJob { handle, cancel })
    }
}

fn run_print(session: &Session, data: &[u8], timeout: Duration, cancel: &AtomicBool) -> PrintReport {
    let mut report = PrintReport::default();
    let mut state = match session.lock_open() {
        Ok(state) => state,
        Err(e) => {
            warn!("Cannot start print job: {}", e);
            report.session_lost = true;
            return report;
        }
    };

    let Some(link) = state.link.as_mut() else {
        report.session_lost = true;
        return report;
    };

    let chunk = match link.endpoint.max_packet_size {
        0 => MAX_BULK_TRANSFER_SIZE,
        size => usize::from(size),
    };
    let address = link.endpoint.address();

    let mut offset = 0;

    // The last chunk goes out at its real length, without zero padding
    for size in chunk_sizes(data.len(), chunk) {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }
        if session.is_detaching() {
            warn!("Printer detached, abandoning print job");
            report.device_lost = true;
            break;
        }

        let result = link
            .connection
            .write_bulk(address, &data[offset..offset + size], timeout);
        offset += size;
        report.record(&result);

        if matches!(result, Err(rusb::Error::NoDevice)) {
            warn!("Printer gone, abandoning print job");
            report.device_lost = true;
            break;
        }
    }

    info!(
        "Print job finished: {} chunks, {} bytes, {} failed",
        report.chunks, report.bytes_written, report.failed_chunks
    );
    report
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use crate::host::UsbHost;
    use crate::test_utils::MockHost;
    use proptest::prelude::*;

    /// Data length, chunk size, and a chunk index within the data
    fn failing_chunk_strategy() -> impl Strategy<Value = (usize, usize, usize)> {
        (1usize..2_000, 1usize..128).prop_flat_map(|(len, chunk)| {
            (Just(len), Just(chunk), 0..len.div_ceil(chunk))
        })
    }

    proptest! {
        /// Property: chunk count is ceil(L / C) and chunks cover the data exactly
        #[test]
        fn prop_chunks_cover_data(
            data in proptest::collection::vec(any::<u8>(), 0..4_000),
            chunk in 1usize..1_024,
        ) {
            let sizes: Vec<usize> = chunk_sizes(data.len(), chunk).collect();
            prop_assert_eq!(sizes.len(), data.len().div_ceil(chunk));
            prop_assert!(sizes.iter().all(|s| *s > 0 && *s <= chunk));
            prop_assert!(sizes.iter().rev().skip(1).all(|s| *s == chunk));

            let mut offset = 0;
            let mut rebuilt = Vec::with_capacity(data.len());
            for size in sizes {
                rebuilt.extend_from_slice(&data[offset..offset + size]);
                offset += size;
            }
            prop_assert_eq!(rebuilt, data);
        }

        /// Property: a chunked write stops at the failing chunk k and reports
        /// exactly the bytes of chunks 0..k
        #[test]
        fn prop_write_stops_at_failing_chunk((len, chunk, k) in failing_chunk_strategy()) {
            let (host, printer) = MockHost::with_printer(1, 2);
            let mut connection = host.open(&printer.identifier).unwrap();
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            host.fail_write(k);

            let result = write_chunked(
                connection.as_mut(),
                0x01,
                &data,
                chunk,
                Duration::from_millis(10),
            );

            prop_assert_eq!(host.writes_attempted(), k + 1);
            if k == 0 {
                let is_transfer_error = matches!(
                    result,
                    Err(Error::Transfer { operation: "bulkTransferOut", .. })
                );
                prop_assert!(is_transfer_error);
            } else {
                let written = result.unwrap();
                prop_assert_eq!(written, k * chunk);
                prop_assert_eq!(host.written().concat(), data[..written].to_vec());
            }
        }
    }
}
