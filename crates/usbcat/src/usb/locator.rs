//! Device lookup by vendor/product identity

use common::{DeviceIdentity, UsbBackend, UsbDevice};
use tracing::debug;

/// Return the first enumerated device whose identity equals `identity`
///
/// Devices are visited in backend order. Devices whose descriptor cannot be
/// read are skipped. `Ok(None)` means enumeration worked but nothing matched.
pub fn find_device<B: UsbBackend>(
    backend: &B,
    identity: DeviceIdentity,
) -> common::Result<Option<B::Device>> {
    let found = backend
        .devices()?
        .into_iter()
        .find(|device| match device.identity() {
            Ok(candidate) => candidate == identity,
            Err(e) => {
                debug!("Skipping device {}: {}", device.description(), e);
                false
            }
        });

    if found.is_none() {
        debug!("No device matching {}", identity);
    }

    Ok(found)
}
