//! Common utilities for usbcat
//!
//! This crate provides the pieces shared between the transfer session and the
//! backends it drives: the USB backend traits and value types, error handling,
//! logging setup, and a scripted mock backend for tests.

pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    Completion, DeviceIdentity, EndpointAddress, TransferError, UsbBackend, UsbDevice, UsbHandle,
};
