//! Byte source and sinks
//!
//! The request comes from stdin once, before the device is opened. Replies
//! go out chunk by chunk as the device produces them.

use std::fmt::Write as _;
use std::io::{self, Read, Write};

/// Largest request accepted from the byte source
pub const PAYLOAD_CAPACITY: usize = 512;

/// Read the outbound payload
///
/// Stops at end of input or after [`PAYLOAD_CAPACITY`] bytes, whichever comes
/// first. Anything past the cap is left unread.
pub fn read_payload<R: Read>(source: R) -> io::Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(PAYLOAD_CAPACITY);
    source
        .take(PAYLOAD_CAPACITY as u64)
        .read_to_end(&mut payload)?;
    Ok(payload)
}

/// Destination for data read from the device
pub trait ResponseSink {
    /// Forward one received chunk
    fn chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Emit a line terminator
    fn newline(&mut self) -> io::Result<()>;
}

impl<S: ResponseSink + ?Sized> ResponseSink for Box<S> {
    fn chunk(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).chunk(data)
    }

    fn newline(&mut self) -> io::Result<()> {
        (**self).newline()
    }
}

/// Passes bytes through untouched, flushing after every chunk
#[derive(Debug)]
pub struct RawSink<W> {
    inner: W,
}

impl<W: Write> RawSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ResponseSink for RawSink<W> {
    fn chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        self.inner.flush()
    }

    fn newline(&mut self) -> io::Result<()> {
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }
}

/// Renders every chunk as an `hd(1)`-style dump
#[derive(Debug)]
pub struct HexdumpSink<W> {
    inner: W,
}

impl<W: Write> HexdumpSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> ResponseSink for HexdumpSink<W> {
    fn chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(hexdump(data).as_bytes())?;
        self.inner.flush()
    }

    fn newline(&mut self) -> io::Result<()> {
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }
}

/// Format `buf` as lines of 16 bytes: offset, hex bytes, printable ASCII
///
/// ```
/// assert_eq!(usbcat::io::hexdump(b"OK\r\n"), "00: 4f 4b 0d 0a   OK..\n");
/// ```
pub fn hexdump(buf: &[u8]) -> String {
    let mut out = String::new();

    for (line, row) in buf.chunks(16).enumerate() {
        let _ = write!(out, "{:02x}: ", line * 16);
        for byte in row {
            let _ = write!(out, "{:02x} ", byte);
        }
        out.push_str("  ");
        out.extend(row.iter().map(|&c| {
            if (b' '..=b'~').contains(&c) {
                c as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    out
}
