//! USB type abstractions
//!
//! The transfer session never talks to libusb directly. It drives a backend
//! through the three traits below, which keeps it testable against
//! [`crate::test_utils::MockBackend`] and leaves room for other host stacks.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Vendor/product pair used to pick a device out of the enumerated list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}:0x{:04x}", self.vendor_id, self.product_id)
    }
}

/// USB endpoint address
///
/// Bit 7 encodes direction: set for IN (device-to-host), clear for OUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    pub const DIRECTION_IN: u8 = 0x80;

    /// True for device-to-host endpoints
    pub fn is_in(self) -> bool {
        self.0 & Self::DIRECTION_IN != 0
    }

    /// Endpoint number without the direction bit
    pub fn number(self) -> u8 {
        self.0 & 0x0f
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Per-transfer failure reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    Stall,

    #[error("device disconnected")]
    Disconnected,

    #[error("buffer overflow")]
    Overflow,

    #[error("{0}")]
    Other(String),
}

impl TransferError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Timeout)
    }
}

/// Outcome of a single bulk or interrupt transfer
///
/// `actual_len` is meaningful even when `status` is an error: a write can move
/// part of its buffer before failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub actual_len: usize,
    pub status: Result<(), TransferError>,
}

impl Completion {
    pub fn ok(actual_len: usize) -> Self {
        Self {
            actual_len,
            status: Ok(()),
        }
    }

    pub fn error(actual_len: usize, error: TransferError) -> Self {
        Self {
            actual_len,
            status: Err(error),
        }
    }

    pub fn timeout() -> Self {
        Self::error(0, TransferError::Timeout)
    }

    /// The error, unless it was a timeout
    pub fn hard_error(&self) -> Option<&TransferError> {
        match &self.status {
            Err(e) if !e.is_timeout() => Some(e),
            _ => None,
        }
    }
}

/// Source of enumerated USB devices
pub trait UsbBackend {
    type Device: UsbDevice;

    /// All devices currently attached, in backend order
    fn devices(&self) -> crate::Result<Vec<Self::Device>>;
}

/// An enumerated, not yet opened, device
pub trait UsbDevice {
    type Handle: UsbHandle;

    fn identity(&self) -> crate::Result<DeviceIdentity>;

    /// Human-readable location for diagnostics
    fn description(&self) -> String;

    /// Open the device, reserving `transfers` transfer contexts
    fn open(&self, transfers: usize) -> crate::Result<Self::Handle>;
}

/// An opened device
pub trait UsbHandle {
    /// Select a configuration by descriptor index (not by `bConfigurationValue`)
    fn set_config_index(&mut self, index: u8) -> crate::Result<()>;

    /// Bind an endpoint for transfers with automatic stall-clearing enabled
    fn claim_endpoint(&mut self, endpoint: EndpointAddress) -> crate::Result<()>;

    fn release_endpoint(&mut self, endpoint: EndpointAddress);

    fn write(&mut self, endpoint: EndpointAddress, data: &[u8], timeout: Duration) -> Completion;

    fn read(&mut self, endpoint: EndpointAddress, buf: &mut [u8], timeout: Duration) -> Completion;

    /// Release the device; transfers fail afterwards
    fn close(&mut self);
}
