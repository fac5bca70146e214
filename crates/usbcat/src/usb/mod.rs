//! USB subsystem
//!
//! - Device lookup by vendor/product identity
//! - The transfer session (claim, drain, write, read, release)
//! - The rusb backend and its transfer helpers

pub mod backend;
pub mod locator;
pub mod session;
pub mod transfers;

pub use backend::RusbBackend;
pub use locator::find_device;
pub use session::{SessionError, SessionOptions, TransferSession};
