//! Process exit statuses
//!
//! A completed exchange exits with its [`ResultFlags`] bits (0..=3). Fatal
//! conditions use the BSD `sysexits.h` values so scripts can tell them apart.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::process::ExitCode;

/// Outcome bits of a completed exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResultFlags(u8);

impl ResultFlags {
    /// The read loop returned no bytes at all
    pub const NO_DATA: Self = Self(0b01);
    /// The write transferred fewer bytes than requested
    pub const WRITE_INCOMPLETE: Self = Self(0b10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ResultFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResultFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Every way a usbcat invocation can end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The exchange ran; flags describe what went short
    Completed(ResultFlags),
    /// Malformed or missing arguments
    Usage,
    /// No device matched the requested identity
    DeviceNotFound,
    /// Backend, open, configure or claim failure
    Software,
    /// Standard output could not be written
    IoError,
    /// Settings file unreadable or invalid
    Config,
}

impl Exit {
    pub const EX_USAGE: u8 = 64;
    pub const EX_NOINPUT: u8 = 66;
    pub const EX_SOFTWARE: u8 = 70;
    pub const EX_IOERR: u8 = 74;
    pub const EX_CONFIG: u8 = 78;

    pub fn code(self) -> u8 {
        match self {
            Exit::Completed(flags) => flags.bits(),
            Exit::Usage => Self::EX_USAGE,
            Exit::DeviceNotFound => Self::EX_NOINPUT,
            Exit::Software => Self::EX_SOFTWARE,
            Exit::IoError => Self::EX_IOERR,
            Exit::Config => Self::EX_CONFIG,
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit.code())
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Completed(flags) if flags.is_empty() => write!(f, "ok"),
            Exit::Completed(flags) => {
                let mut parts = Vec::new();
                if flags.contains(ResultFlags::NO_DATA) {
                    parts.push("no data received");
                }
                if flags.contains(ResultFlags::WRITE_INCOMPLETE) {
                    parts.push("write incomplete");
                }
                write!(f, "{}", parts.join(", "))
            }
            Exit::Usage => write!(f, "usage error"),
            Exit::DeviceNotFound => write!(f, "device not found"),
            Exit::Software => write!(f, "initialization error"),
            Exit::IoError => write!(f, "output error"),
            Exit::Config => write!(f, "configuration error"),
        }
    }
}
