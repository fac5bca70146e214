//! Integration tests for the request/response exchange
//!
//! Drives `usbcat::run` against the scripted mock backend:
//! - Device lookup and not-found handling
//! - Open/configure/claim failures and cleanup
//! - Drain, write and read phases
//! - Exit status composition

use common::test_utils::{CallLog, MockBackend, MockCall, MockDevice, MockRead};
use common::{Completion, DeviceIdentity, EndpointAddress, TransferError};
use std::io;
use std::time::Duration;
use usbcat::io::RawSink;
use usbcat::usb::SessionOptions;
use usbcat::{Config, Exit, ResultFlags};

const MODEM: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x19d2,
    product_id: 0x1476,
};
const OUT: EndpointAddress = EndpointAddress(0x03);
const IN: EndpointAddress = EndpointAddress(0x84);

fn config(session: SessionOptions) -> Config {
    Config {
        identity: MODEM,
        write_endpoint: OUT,
        read_endpoint: IN,
        hexdump: false,
        session,
    }
}

fn draining() -> SessionOptions {
    SessionOptions {
        drain: true,
        ..SessionOptions::default()
    }
}

/// Run one exchange, returning exit status and stdout bytes
fn exchange(backend: &MockBackend, config: &Config, input: &[u8]) -> (Exit, Vec<u8>) {
    let mut sink = RawSink::new(Vec::new());
    let exit = usbcat::run(backend, config, input, &mut sink);
    (exit, sink.into_inner())
}

mod lookup {
    use super::*;

    #[test]
    fn test_device_absent() {
        let log = CallLog::default();
        let other = MockDevice::new(DeviceIdentity::new(0x046d, 0xc52b), &log);
        let backend = MockBackend::new(vec![other]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::DeviceNotFound);
        assert_eq!(exit.code(), 66);
        assert!(output.is_empty());
        assert!(!log.opened());
    }

    #[test]
    fn test_empty_bus() {
        let backend = MockBackend::new(Vec::new());
        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");
        assert_eq!(exit, Exit::DeviceNotFound);
        assert!(output.is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let first_log = CallLog::default();
        let second_log = CallLog::default();
        let backend = MockBackend::new(vec![
            MockDevice::new(MODEM, &first_log).with_reads([MockRead::data(b"first")]),
            MockDevice::new(MODEM, &second_log).with_reads([MockRead::data(b"second")]),
        ]);

        let (_, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(output, b"first");
        assert!(first_log.opened());
        assert!(!second_log.opened());
    }

    #[test]
    fn test_unreadable_descriptor_skipped() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![
            MockDevice::new(MODEM, &log).unreadable(),
            MockDevice::new(MODEM, &log).with_reads([MockRead::data(b"OK\r\n")]),
        ]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");
        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(output, b"OK\r\n");
    }

    #[test]
    fn test_enumeration_failure() {
        let backend = MockBackend::failing();
        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");
        assert_eq!(exit, Exit::Software);
        assert!(output.is_empty());
    }
}

mod initialization {
    use super::*;

    #[test]
    fn test_open_failure() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log).failing_open()]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::Software);
        assert_eq!(exit.code(), 70);
        assert!(output.is_empty());
        assert!(!log.calls().contains(&MockCall::Close));
    }

    #[test]
    fn test_configure_failure_closes_device() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log).failing_config()]);

        let (exit, _) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::Software);
        let calls = log.calls();
        assert!(!calls.iter().any(|c| matches!(c, MockCall::Claim(_))));
        assert_eq!(calls.last(), Some(&MockCall::Close));
    }

    #[test]
    fn test_write_claim_failure() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log).failing_claim(OUT)]);

        let (exit, _) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::Software);
        let calls = log.calls();
        assert!(!calls.contains(&MockCall::Claim(IN)));
        assert!(!calls.iter().any(|c| matches!(c, MockCall::Read { .. })));
        assert_eq!(calls.last(), Some(&MockCall::Close));
    }

    #[test]
    fn test_read_claim_failure_releases_write_endpoint() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log).failing_claim(IN)]);

        let (exit, output) = exchange(&backend, &config(draining()), b"AT\r");

        assert_eq!(exit, Exit::Software);
        assert!(output.is_empty());
        let calls = log.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[MockCall::Claim(IN), MockCall::Release(OUT), MockCall::Close]
        );
        assert!(log.writes().is_empty());
    }
}

mod exchange_flow {
    use super::*;

    #[test]
    fn test_ati_full_success() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_reads([MockRead::data(b"ME3630\r\nOK\r\n"), MockRead::empty()]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"ATI\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(exit.code(), 0);
        assert_eq!(output, b"ME3630\r\nOK\r\n");
        assert_eq!(log.writes(), vec![b"ATI\r".to_vec()]);
    }

    #[test]
    fn test_full_lifecycle_order() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([MockRead::data(b"OK\r\n")]);
        let backend = MockBackend::new(vec![device]);

        exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        let read = MockCall::Read {
            endpoint: IN,
            timeout: Duration::from_millis(5000),
        };
        assert_eq!(
            log.calls(),
            vec![
                MockCall::Enumerate,
                MockCall::Open {
                    identity: MODEM,
                    transfers: 2
                },
                MockCall::SetConfigIndex(0),
                MockCall::Claim(OUT),
                MockCall::Claim(IN),
                MockCall::Write {
                    endpoint: OUT,
                    data: b"AT\r".to_vec(),
                    timeout: Duration::from_millis(5000),
                },
                read.clone(),
                read,
                MockCall::Release(OUT),
                MockCall::Release(IN),
                MockCall::Close,
            ]
        );
    }

    #[test]
    fn test_no_reply() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log)]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::NO_DATA));
        assert_eq!(exit.code(), 1);
        assert_eq!(output, b"\n");
        assert_eq!(log.read_timeouts().len(), 1);
    }

    #[test]
    fn test_empty_input_skips_write() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([MockRead::data(b"RING\r\n")]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"");

        assert!(log.writes().is_empty());
        assert_eq!(log.read_timeouts().len(), 2);
        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(output, b"RING\r\n");
    }

    #[test]
    fn test_short_write() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_write(Completion::ok(2))
            .with_reads([MockRead::data(b"OK\r\n")]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"ATI\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::WRITE_INCOMPLETE));
        assert_eq!(exit.code(), 2);
        assert_eq!(output, b"OK\r\n");
    }

    #[test]
    fn test_short_write_and_no_reply() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_write(Completion::error(0, TransferError::Timeout));
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit.code(), 3);
        assert_eq!(output, b"\n");
    }

    #[test]
    fn test_multi_chunk_reply() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([
            MockRead::data(b"+ZECMCALL: IPV4, 12.192.19.88\r\n"),
            MockRead::data(b"OK\r\n"),
            MockRead::empty(),
            MockRead::data(b"late"),
        ]);
        let backend = MockBackend::new(vec![device.clone()]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT+ZECMCALL?\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(output, b"+ZECMCALL: IPV4, 12.192.19.88\r\nOK\r\n");
        assert_eq!(device.pending_reads(), 1);
    }

    #[test]
    fn test_hard_read_error_without_data_ends_loop() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_reads([MockRead::error(TransferError::Disconnected)]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::NO_DATA));
        assert_eq!(output, b"\n");
        assert_eq!(log.calls().last(), Some(&MockCall::Close));
    }

    #[test]
    fn test_read_timeout_from_config() {
        let log = CallLog::default();
        let backend = MockBackend::new(vec![MockDevice::new(MODEM, &log)]);
        let options = SessionOptions {
            read_timeout: Duration::from_millis(100),
            ..SessionOptions::default()
        };

        exchange(&backend, &config(options), b"AT\r");

        assert_eq!(log.read_timeouts(), vec![Duration::from_millis(100)]);
    }
}

mod drain {
    use super::*;

    #[test]
    fn test_drained_chunks_precede_response() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([
            MockRead::data(b"+CSQ: 20,99"),
            MockRead::data(b"RING"),
            MockRead::empty(),
            MockRead::data(b"OK\r\n"),
        ]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(draining()), b"AT\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(output, b"+CSQ: 20,99\nRING\nOK\r\n");
    }

    #[test]
    fn test_drain_uses_short_timeout_before_write() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_reads([MockRead::data(b"stale"), MockRead::timeout()]);
        let backend = MockBackend::new(vec![device]);

        exchange(&backend, &config(draining()), b"AT\r");

        let calls = log.calls();
        let write_at = calls
            .iter()
            .position(|c| matches!(c, MockCall::Write { .. }))
            .unwrap();
        let drain_reads: Vec<_> = calls[..write_at]
            .iter()
            .filter_map(|c| match c {
                MockCall::Read { timeout, .. } => Some(*timeout),
                _ => None,
            })
            .collect();
        assert_eq!(
            drain_reads,
            vec![Duration::from_millis(50), Duration::from_millis(50)]
        );
        assert!(calls[write_at..].iter().all(|c| !matches!(
            c,
            MockCall::Read { timeout, .. } if *timeout == Duration::from_millis(50)
        )));
    }

    #[test]
    fn test_nothing_pending() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log)
            .with_reads([MockRead::timeout(), MockRead::data(b"OK\r\n")]);
        let backend = MockBackend::new(vec![device]);

        let (exit, output) = exchange(&backend, &config(draining()), b"AT\r");

        assert_eq!(exit, Exit::Completed(ResultFlags::empty()));
        assert_eq!(output, b"OK\r\n");
    }

    #[test]
    fn test_drain_disabled_reads_nothing_early() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([MockRead::data(b"stale")]);
        let backend = MockBackend::new(vec![device]);

        exchange(&backend, &config(SessionOptions::default()), b"AT\r");

        let calls = log.calls();
        let first_read = calls
            .iter()
            .position(|c| matches!(c, MockCall::Read { .. }))
            .unwrap();
        let write_at = calls
            .iter()
            .position(|c| matches!(c, MockCall::Write { .. }))
            .unwrap();
        assert!(write_at < first_read);
    }
}

mod output {
    use super::*;

    struct BrokenPipe;

    impl usbcat::io::ResponseSink for BrokenPipe {
        fn chunk(&mut self, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn newline(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_sink_failure_still_releases() {
        let log = CallLog::default();
        let device = MockDevice::new(MODEM, &log).with_reads([MockRead::data(b"OK\r\n")]);
        let backend = MockBackend::new(vec![device]);

        let exit = usbcat::run(
            &backend,
            &config(SessionOptions::default()),
            &b"AT\r"[..],
            &mut BrokenPipe,
        );

        assert_eq!(exit, Exit::IoError);
        let calls = log.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[MockCall::Release(OUT), MockCall::Release(IN), MockCall::Close]
        );
    }
}
