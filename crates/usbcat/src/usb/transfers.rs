//! USB transfer execution
//!
//! Synchronous bulk and interrupt transfers on top of rusb. Results are
//! reported as [`Completion`]s so the session sees the same shape from every
//! backend.

use common::{Completion, EndpointAddress, TransferError};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Transfer type of a claimed endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Bulk,
    Interrupt,
}

impl TryFrom<rusb::TransferType> for TransferKind {
    type Error = rusb::TransferType;

    fn try_from(value: rusb::TransferType) -> Result<Self, Self::Error> {
        match value {
            rusb::TransferType::Bulk => Ok(TransferKind::Bulk),
            rusb::TransferType::Interrupt => Ok(TransferKind::Interrupt),
            other => Err(other),
        }
    }
}

/// Read one chunk from an IN endpoint
pub fn read(
    handle: &mut DeviceHandle<Context>,
    endpoint: EndpointAddress,
    kind: TransferKind,
    buf: &mut [u8],
    timeout: Duration,
) -> Completion {
    let result = match kind {
        TransferKind::Bulk => handle.read_bulk(endpoint.0, buf, timeout),
        TransferKind::Interrupt => handle.read_interrupt(endpoint.0, buf, timeout),
    };

    complete(handle, endpoint, result)
}

/// Write `data` to an OUT endpoint in a single transfer
pub fn write(
    handle: &mut DeviceHandle<Context>,
    endpoint: EndpointAddress,
    kind: TransferKind,
    data: &[u8],
    timeout: Duration,
) -> Completion {
    let result = match kind {
        TransferKind::Bulk => handle.write_bulk(endpoint.0, data, timeout),
        TransferKind::Interrupt => handle.write_interrupt(endpoint.0, data, timeout),
    };

    complete(handle, endpoint, result)
}

/// Turn a rusb result into a completion, clearing the halt after a stall
fn complete(
    handle: &mut DeviceHandle<Context>,
    endpoint: EndpointAddress,
    result: rusb::Result<usize>,
) -> Completion {
    if let Err(rusb::Error::Pipe) = result {
        debug!("Endpoint {} stalled, clearing halt", endpoint);
        if let Err(e) = handle.clear_halt(endpoint.0) {
            warn!("Failed to clear halt on endpoint {}: {}", endpoint, e);
        }
    }

    completion(result)
}

/// Completion for a synchronous rusb result
///
/// rusb drops libusb's transferred count whenever the call fails, so a failed
/// transfer always completes with zero bytes. Data that arrived before a
/// timeout is lost, and a write that stopped part way reports 0 bytes sent.
/// The session still flags both correctly, since 0 never equals a non-empty
/// request and a zero-length read ends the loop either way.
fn completion(result: rusb::Result<usize>) -> Completion {
    match result {
        Ok(len) => Completion::ok(len),
        Err(e) => Completion::error(0, map_rusb_error(e)),
    }
}

/// Map rusb::Error to the backend-neutral TransferError
pub fn map_rusb_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Pipe => TransferError::Stall,
        rusb::Error::NoDevice => TransferError::Disconnected,
        rusb::Error::Overflow => TransferError::Overflow,
        _ => TransferError::Other(err.to_string()),
    }
}
