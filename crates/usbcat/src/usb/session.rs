//! Transfer session
//!
//! One request/response exchange over a write/read endpoint pair:
//!
//! ```text
//! Closed -> Opened -> Configured -> Claimed -> [Draining] -> Writing -> Reading -> Released
//! ```
//!
//! [`TransferSession::open`] covers everything up to `Claimed` and either
//! returns a session holding both endpoints or fails having released whatever
//! it acquired. From `Claimed` on, both endpoints and the device are released
//! exactly once, on every path, when the session is closed or dropped.
//!
//! Read loops stop on the first attempt that yields zero bytes. A timeout is
//! one such attempt; it is never reported as an error.

use crate::exit::ResultFlags;
use crate::io::{PAYLOAD_CAPACITY, ResponseSink};
use common::{EndpointAddress, UsbDevice, UsbHandle};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transfer contexts reserved on open: one per direction
pub const TRANSFER_CONTEXTS: usize = 2;

/// Configuration selected after open, by descriptor index
pub const CONFIG_INDEX: u8 = 0;

/// Size of each read request
pub const READ_CHUNK_SIZE: usize = 512;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Behavior switches and timeouts, fixed for the life of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Flush pending device data before writing
    pub drain: bool,
    /// Report chunk sizes
    pub verbose: bool,
    pub drain_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            drain: false,
            verbose: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open device: {0}")]
    Open(#[source] common::Error),

    #[error("Failed to select configuration index {index}: {source}")]
    Configure {
        index: u8,
        #[source]
        source: common::Error,
    },

    #[error("Failed to claim endpoint {endpoint}: {source}")]
    Claim {
        endpoint: EndpointAddress,
        #[source]
        source: common::Error,
    },

    #[error("Failed to write output: {0}")]
    Sink(#[from] io::Error),
}

/// An opened device with both endpoints claimed
pub struct TransferSession<H: UsbHandle> {
    handle: H,
    write_endpoint: EndpointAddress,
    read_endpoint: EndpointAddress,
    options: SessionOptions,
    released: bool,
}

impl<H: UsbHandle> TransferSession<H> {
    /// Open, configure and claim
    ///
    /// On failure nothing stays claimed and an opened device is closed again.
    pub fn open<D>(
        device: &D,
        write_endpoint: EndpointAddress,
        read_endpoint: EndpointAddress,
        options: SessionOptions,
    ) -> Result<Self, SessionError>
    where
        D: UsbDevice<Handle = H>,
    {
        let mut handle = device
            .open(TRANSFER_CONTEXTS)
            .map_err(SessionError::Open)?;

        if let Err(source) = handle.set_config_index(CONFIG_INDEX) {
            handle.close();
            return Err(SessionError::Configure {
                index: CONFIG_INDEX,
                source,
            });
        }

        if let Err(source) = handle.claim_endpoint(write_endpoint) {
            handle.close();
            return Err(SessionError::Claim {
                endpoint: write_endpoint,
                source,
            });
        }

        if let Err(source) = handle.claim_endpoint(read_endpoint) {
            handle.release_endpoint(write_endpoint);
            handle.close();
            return Err(SessionError::Claim {
                endpoint: read_endpoint,
                source,
            });
        }

        debug!(
            "Session ready: write endpoint {}, read endpoint {}",
            write_endpoint, read_endpoint
        );

        Ok(Self {
            handle,
            write_endpoint,
            read_endpoint,
            options,
            released: false,
        })
    }

    /// Drain (if enabled), write `payload` once, then read the response
    ///
    /// Transfer failures never abort the exchange; they surface only in the
    /// returned flags. `payload` longer than [`PAYLOAD_CAPACITY`] is cut.
    pub fn run<S: ResponseSink>(
        &mut self,
        payload: &[u8],
        sink: &mut S,
    ) -> Result<ResultFlags, SessionError> {
        let payload = &payload[..payload.len().min(PAYLOAD_CAPACITY)];
        let mut flags = ResultFlags::empty();

        if self.options.drain {
            self.drain(sink)?;
        }

        if !payload.is_empty() && !self.write(payload) {
            flags |= ResultFlags::WRITE_INCOMPLETE;
        }

        if self.read_response(sink)? == 0 {
            sink.newline()?;
            flags |= ResultFlags::NO_DATA;
        }

        Ok(flags)
    }

    /// Forward whatever the device had queued, one line per chunk
    ///
    /// Stops at the first zero-length read or the first non-timeout error.
    fn drain<S: ResponseSink>(&mut self, sink: &mut S) -> Result<usize, SessionError> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            let done = self
                .handle
                .read(self.read_endpoint, &mut buf, self.options.drain_timeout);
            let len = done.actual_len.min(buf.len());

            if len > 0 {
                if self.options.verbose {
                    info!("drain received {} bytes", len);
                }
                sink.chunk(&buf[..len])?;
                sink.newline()?;
                total += len;
            }

            if let Some(e) = done.hard_error() {
                warn!("Drain read on endpoint {} failed: {}", self.read_endpoint, e);
                break;
            }
            if len == 0 {
                break;
            }
        }

        debug!("Drained {} bytes", total);
        Ok(total)
    }

    /// Single write attempt; false when fewer bytes than requested went out
    fn write(&mut self, payload: &[u8]) -> bool {
        let done = self
            .handle
            .write(self.write_endpoint, payload, self.options.write_timeout);

        if let Err(e) = &done.status {
            warn!("Write to endpoint {} failed: {}", self.write_endpoint, e);
        }

        if done.actual_len != payload.len() {
            warn!("sent {} bytes of {}", done.actual_len, payload.len());
            return false;
        }

        debug!("sent {} bytes", done.actual_len);
        true
    }

    /// Forward response chunks until a read yields nothing; returns the total
    fn read_response<S: ResponseSink>(&mut self, sink: &mut S) -> Result<usize, SessionError> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            let done = self
                .handle
                .read(self.read_endpoint, &mut buf, self.options.read_timeout);
            let len = done.actual_len.min(buf.len());

            if let Some(e) = done.hard_error() {
                warn!("Read from endpoint {} failed: {}", self.read_endpoint, e);
            }
            if len == 0 {
                break;
            }

            if self.options.verbose {
                info!("received {} bytes", len);
            }
            sink.chunk(&buf[..len])?;
            total += len;
        }

        Ok(total)
    }

    /// Release both endpoints, then the device
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.handle.release_endpoint(self.write_endpoint);
        self.handle.release_endpoint(self.read_endpoint);
        self.handle.close();
        debug!("Session released");
    }
}

impl<H: UsbHandle> Drop for TransferSession<H> {
    fn drop(&mut self) {
        self.release();
    }
}
