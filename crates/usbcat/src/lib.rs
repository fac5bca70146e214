//! usbcat
//!
//! Sends a short request to a USB device over a bulk or interrupt OUT
//! endpoint and streams the reply from an IN endpoint to stdout. Built for
//! talking AT commands to LTE modems that expose CDC data endpoints.
//!
//! [`run`] is the whole program minus argument parsing and logging setup; it
//! is generic over the USB backend so it can be driven by
//! [`common::test_utils::MockBackend`].

pub mod cli;
pub mod config;
pub mod exit;
pub mod io;
pub mod usb;

pub use config::{Config, EnvFlags, Settings, StartupError, UsageError};
pub use exit::{Exit, ResultFlags};

use crate::io::ResponseSink;
use crate::usb::{SessionError, TransferSession, find_device};
use common::{UsbBackend, UsbDevice};
use std::io::Read;
use tracing::{error, info};

/// Locate the device, read the request from `input`, run one exchange
pub fn run<B, R, S>(backend: &B, config: &Config, input: R, sink: &mut S) -> Exit
where
    B: UsbBackend,
    R: Read,
    S: ResponseSink,
{
    let device = match find_device(backend, config.identity) {
        Ok(Some(device)) => device,
        Ok(None) => return Exit::DeviceNotFound,
        Err(e) => {
            error!("Failed to enumerate USB devices: {}", e);
            return Exit::Software;
        }
    };

    if config.session.verbose {
        info!(
            "Found device {} (VID:PID = {})",
            device.description(),
            config.identity
        );
    }

    let payload = match io::read_payload(input) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to read data to send: {}", e);
            return Exit::Software;
        }
    };

    let mut session = match TransferSession::open(
        &device,
        config.write_endpoint,
        config.read_endpoint,
        config.session,
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return Exit::Software;
        }
    };

    let result = session.run(&payload, sink);
    session.close();

    match result {
        Ok(flags) => Exit::Completed(flags),
        Err(e @ SessionError::Sink(_)) => {
            error!("{}", e);
            Exit::IoError
        }
        Err(e) => {
            error!("{}", e);
            Exit::Software
        }
    }
}
