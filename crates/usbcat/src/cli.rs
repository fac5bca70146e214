//! Command line interface

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "usbcat")]
#[command(
    author,
    version,
    about = "Send stdin to a USB OUT endpoint and print what the IN endpoint answers"
)]
#[command(long_about = "
Writes up to 512 bytes from stdin to OUT_EP in a single bulk/interrupt
transfer, then copies everything IN_EP returns to stdout until a read comes
back empty. Mostly useful for AT commands on LTE modems in CDC mode.

Numbers may be decimal, hex (0x84) or octal (0204).

ENVIRONMENT:
    WITH_DEBUG      Print progress to stderr
    WITH_DRAIN      Read and print pending IN_EP data before writing
    WITH_HEXDUMP    Print received data as a hex dump
    RUST_LOG        Override the diagnostic log filter

EXIT STATUS:
    0   ok
    1   no data received from IN_EP
    2   write to OUT_EP incomplete
    3   both 1 and 2
    64  usage error
    66  device not found
    70  initialization error
    74  output error
    78  configuration file error

EXAMPLES:
    # Identify a ZTE ME3630, draining stale data first
    printf 'ATI\\r' | WITH_DEBUG=1 WITH_DRAIN=1 usbcat 0x19d2 0x1476 0x3 0x84 100

    # Slow command, long read timeout
    printf 'AT+ZECMCALL=1\\r' | usbcat 0x19d2 0x1476 0x3 0x84 5000
")]
pub struct Args {
    /// USB vendor ID
    #[arg(value_name = "VID", value_parser = parse_u16)]
    pub vendor_id: u16,

    /// USB product ID
    #[arg(value_name = "PID", value_parser = parse_u16)]
    pub product_id: u16,

    /// Endpoint address to send data to
    #[arg(value_name = "OUT_EP", value_parser = parse_u8)]
    pub out_endpoint: u8,

    /// Endpoint address to receive data from (bit 7 set, e.g. 0x84)
    #[arg(value_name = "IN_EP", value_parser = parse_u8)]
    pub in_endpoint: u8,

    /// How long each IN_EP read waits, in milliseconds [default: 5000]
    #[arg(value_name = "IN_TIMEOUT", value_parser = parse_u64)]
    pub in_timeout_ms: Option<u64>,

    /// Path to settings file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parse an unsigned integer literal the way C `strtoul(s, NULL, 0)` does
///
/// `0x`/`0X` selects hex, a leading `0` octal, anything else decimal. Unlike
/// `strtoul`, trailing garbage and empty input are rejected.
pub fn parse_int(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    // from_str_radix takes its own sign; only one leading `+` is allowed
    if body.is_empty() || body.starts_with(['+', '-']) {
        return Err(format!("'{}' is not a number", s));
    }

    u64::from_str_radix(body, radix).map_err(|e| format!("'{}' is not a valid number: {}", s, e))
}

fn parse_bounded(s: &str, max: u64) -> Result<u64, String> {
    let value = parse_int(s)?;
    if value > max {
        return Err(format!("{} is out of range (max {:#x})", s, max));
    }
    Ok(value)
}

pub fn parse_u16(s: &str) -> Result<u16, String> {
    parse_bounded(s, u16::MAX as u64).map(|v| v as u16)
}

pub fn parse_u8(s: &str) -> Result<u8, String> {
    parse_bounded(s, u8::MAX as u64).map(|v| v as u8)
}

pub fn parse_u64(s: &str) -> Result<u64, String> {
    parse_int(s)
}
