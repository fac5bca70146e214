//! Test utilities for usbcat
//!
//! Provides a scripted in-memory USB backend that records every call made
//! against it, so session behavior can be asserted without hardware.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{CallLog, MockBackend, MockDevice, MockRead};
//! use common::{DeviceIdentity, UsbBackend, UsbDevice};
//!
//! let log = CallLog::default();
//! let device = MockDevice::new(DeviceIdentity::new(0x1234, 0x5678), &log)
//!     .with_reads([MockRead::data(b"OK\r\n")]);
//! let backend = MockBackend::new(vec![device]);
//!
//! let devices = backend.devices().unwrap();
//! assert_eq!(devices[0].identity().unwrap().vendor_id, 0x1234);
//! ```

use crate::usb_types::{
    Completion, DeviceIdentity, EndpointAddress, TransferError, UsbBackend, UsbDevice, UsbHandle,
};
use crate::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// A backend call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Enumerate,
    Open {
        identity: DeviceIdentity,
        transfers: usize,
    },
    SetConfigIndex(u8),
    Claim(EndpointAddress),
    Release(EndpointAddress),
    Write {
        endpoint: EndpointAddress,
        data: Vec<u8>,
        timeout: Duration,
    },
    Read {
        endpoint: EndpointAddress,
        timeout: Duration,
    },
    Close,
}

/// Shared, ordered record of mock backend calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<MockCall>>>);

impl CallLog {
    fn push(&self, call: MockCall) {
        self.0.borrow_mut().push(call);
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.0.borrow().clone()
    }

    pub fn opened(&self) -> bool {
        self.0
            .borrow()
            .iter()
            .any(|c| matches!(c, MockCall::Open { .. }))
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|c| match c {
                MockCall::Write { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Timeouts of every read, in order
    pub fn read_timeouts(&self) -> Vec<Duration> {
        self.0
            .borrow()
            .iter()
            .filter_map(|c| match c {
                MockCall::Read { timeout, .. } => Some(*timeout),
                _ => None,
            })
            .collect()
    }
}

/// One scripted read result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRead {
    pub data: Vec<u8>,
    pub status: std::result::Result<(), TransferError>,
}

impl MockRead {
    pub fn data(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            status: Ok(()),
        }
    }

    /// Successful zero-length read
    pub fn empty() -> Self {
        Self::data(&[])
    }

    pub fn timeout() -> Self {
        Self::error(TransferError::Timeout)
    }

    pub fn error(error: TransferError) -> Self {
        Self {
            data: Vec::new(),
            status: Err(error),
        }
    }
}

/// A scripted device
///
/// Reads are served from the script in order; once it runs out every read
/// times out with zero bytes. Writes transfer the full buffer unless
/// [`MockDevice::with_write`] says otherwise.
#[derive(Debug, Clone)]
pub struct MockDevice {
    identity: DeviceIdentity,
    unreadable: bool,
    fail_open: bool,
    fail_config: bool,
    fail_claim: Option<EndpointAddress>,
    write: Option<Completion>,
    reads: Rc<RefCell<VecDeque<MockRead>>>,
    log: CallLog,
}

impl MockDevice {
    pub fn new(identity: DeviceIdentity, log: &CallLog) -> Self {
        Self {
            identity,
            unreadable: false,
            fail_open: false,
            fail_config: false,
            fail_claim: None,
            write: None,
            reads: Rc::default(),
            log: log.clone(),
        }
    }

    pub fn with_reads(self, reads: impl IntoIterator<Item = MockRead>) -> Self {
        self.reads.borrow_mut().extend(reads);
        self
    }

    pub fn with_write(mut self, completion: Completion) -> Self {
        self.write = Some(completion);
        self
    }

    /// Device descriptor cannot be read
    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_config(mut self) -> Self {
        self.fail_config = true;
        self
    }

    pub fn failing_claim(mut self, endpoint: EndpointAddress) -> Self {
        self.fail_claim = Some(endpoint);
        self
    }

    /// Scripted reads not consumed yet
    pub fn pending_reads(&self) -> usize {
        self.reads.borrow().len()
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn identity(&self) -> Result<DeviceIdentity> {
        if self.unreadable {
            return Err(Error::Usb("descriptor unavailable".to_string()));
        }
        Ok(self.identity)
    }

    fn description(&self) -> String {
        format!("mock {}", self.identity)
    }

    fn open(&self, transfers: usize) -> Result<MockHandle> {
        self.log.push(MockCall::Open {
            identity: self.identity,
            transfers,
        });
        if self.fail_open {
            return Err(Error::Usb("access denied".to_string()));
        }
        Ok(MockHandle {
            device: self.clone(),
        })
    }
}

/// Handle returned by [`MockDevice::open`]
#[derive(Debug)]
pub struct MockHandle {
    device: MockDevice,
}

impl UsbHandle for MockHandle {
    fn set_config_index(&mut self, index: u8) -> Result<()> {
        self.device.log.push(MockCall::SetConfigIndex(index));
        if self.device.fail_config {
            return Err(Error::Usb("invalid configuration".to_string()));
        }
        Ok(())
    }

    fn claim_endpoint(&mut self, endpoint: EndpointAddress) -> Result<()> {
        self.device.log.push(MockCall::Claim(endpoint));
        if self.device.fail_claim == Some(endpoint) {
            return Err(Error::Usb(format!("endpoint {} busy", endpoint)));
        }
        Ok(())
    }

    fn release_endpoint(&mut self, endpoint: EndpointAddress) {
        self.device.log.push(MockCall::Release(endpoint));
    }

    fn write(&mut self, endpoint: EndpointAddress, data: &[u8], timeout: Duration) -> Completion {
        self.device.log.push(MockCall::Write {
            endpoint,
            data: data.to_vec(),
            timeout,
        });
        self.device
            .write
            .clone()
            .unwrap_or_else(|| Completion::ok(data.len()))
    }

    fn read(&mut self, endpoint: EndpointAddress, buf: &mut [u8], timeout: Duration) -> Completion {
        self.device.log.push(MockCall::Read { endpoint, timeout });

        let Some(read) = self.device.reads.borrow_mut().pop_front() else {
            return Completion::timeout();
        };

        let len = read.data.len().min(buf.len());
        buf[..len].copy_from_slice(&read.data[..len]);
        Completion {
            actual_len: len,
            status: read.status,
        }
    }

    fn close(&mut self) {
        self.device.log.push(MockCall::Close);
    }
}

/// Backend serving a fixed list of mock devices
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
    fail_enumeration: bool,
    log: Option<CallLog>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let log = devices.first().map(|d| d.log.clone());
        Self {
            devices,
            fail_enumeration: false,
            log,
        }
    }

    /// Backend whose device list cannot be read
    pub fn failing() -> Self {
        Self {
            devices: Vec::new(),
            fail_enumeration: true,
            log: None,
        }
    }
}

impl UsbBackend for MockBackend {
    type Device = MockDevice;

    fn devices(&self) -> Result<Vec<MockDevice>> {
        if let Some(log) = &self.log {
            log.push(MockCall::Enumerate);
        }
        if self.fail_enumeration {
            return Err(Error::Usb("enumeration failed".to_string()));
        }
        Ok(self.devices.clone())
    }
}
