//! rusb backend
//!
//! Wraps libusb devices behind the [`UsbBackend`] traits. libusb claims
//! interfaces rather than endpoints, so claiming an endpoint claims the
//! interface that carries it in the selected configuration. Interfaces shared
//! by both endpoints are claimed once and released with the last endpoint.

use crate::usb::transfers::{self, TransferKind};
use common::{
    Completion, DeviceIdentity, EndpointAddress, Error, Result, TransferError, UsbBackend,
    UsbDevice, UsbHandle,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

fn usb_error(context: &str, err: rusb::Error) -> Error {
    Error::Usb(format!("{}: {}", context, err))
}

/// Enumerates devices through a libusb context
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(|e| usb_error("libusb init", e))?;
        Ok(Self { context })
    }
}

impl UsbBackend for RusbBackend {
    type Device = RusbDevice;

    fn devices(&self) -> Result<Vec<RusbDevice>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| usb_error("device list", e))?;

        debug!("Enumerated {} devices", devices.len());
        Ok(devices.iter().map(|device| RusbDevice { device }).collect())
    }
}

/// An enumerated libusb device
pub struct RusbDevice {
    device: Device<Context>,
}

impl UsbDevice for RusbDevice {
    type Handle = RusbHandle;

    fn identity(&self) -> Result<DeviceIdentity> {
        let descriptor = self
            .device
            .device_descriptor()
            .map_err(|e| usb_error("device descriptor", e))?;

        Ok(DeviceIdentity::new(
            descriptor.vendor_id(),
            descriptor.product_id(),
        ))
    }

    fn description(&self) -> String {
        format!(
            "bus {:03} addr {:03}",
            self.device.bus_number(),
            self.device.address()
        )
    }

    /// libusb allocates transfers per call, so `transfers` is informational
    fn open(&self, transfers: usize) -> Result<RusbHandle> {
        let handle = self.device.open().map_err(|e| usb_error("open", e))?;

        debug!(
            "Opened device {} for {} transfers",
            self.description(),
            transfers
        );

        Ok(RusbHandle {
            device: self.device.clone(),
            handle: Some(handle),
            config_index: 0,
            endpoints: HashMap::new(),
            interfaces: HashMap::new(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ClaimedEndpoint {
    interface: u8,
    kind: TransferKind,
}

#[derive(Debug, Clone, Copy)]
struct ClaimedInterface {
    users: usize,
    kernel_driver_detached: bool,
}

/// An opened libusb device
pub struct RusbHandle {
    device: Device<Context>,
    handle: Option<DeviceHandle<Context>>,
    config_index: u8,
    endpoints: HashMap<EndpointAddress, ClaimedEndpoint>,
    interfaces: HashMap<u8, ClaimedInterface>,
}

impl RusbHandle {
    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<Context>> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::Usb("device is closed".to_string()))
    }

    /// Find the interface, alternate setting and transfer type of `endpoint`
    fn locate_endpoint(&self, endpoint: EndpointAddress) -> Result<(u8, u8, TransferKind)> {
        let config = self
            .device
            .config_descriptor(self.config_index)
            .map_err(|e| usb_error("config descriptor", e))?;

        for interface in config.interfaces() {
            for setting in interface.descriptors() {
                let Some(descriptor) = setting
                    .endpoint_descriptors()
                    .find(|ep| ep.address() == endpoint.0)
                else {
                    continue;
                };

                let kind = TransferKind::try_from(descriptor.transfer_type()).map_err(|t| {
                    Error::Usb(format!(
                        "endpoint {} is {:?}, not bulk or interrupt",
                        endpoint, t
                    ))
                })?;

                return Ok((setting.interface_number(), setting.setting_number(), kind));
            }
        }

        Err(Error::Usb(format!(
            "endpoint {} not found in configuration {}",
            endpoint, self.config_index
        )))
    }

    /// Claim `interface`, detaching a kernel driver first if one is bound
    fn claim_interface(&mut self, interface: u8, setting: u8) -> Result<()> {
        if let Some(claimed) = self.interfaces.get_mut(&interface) {
            claimed.users += 1;
            return Ok(());
        }

        let handle = self.handle_mut()?;

        let kernel_driver_detached = match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        );
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(interface) {
            if kernel_driver_detached {
                let _ = handle.attach_kernel_driver(interface);
            }
            return Err(usb_error(&format!("claim interface {}", interface), e));
        }

        if setting != 0 {
            if let Err(e) = handle.set_alternate_setting(interface, setting) {
                let _ = handle.release_interface(interface);
                if kernel_driver_detached {
                    let _ = handle.attach_kernel_driver(interface);
                }
                return Err(usb_error(
                    &format!("alternate setting {} on interface {}", setting, interface),
                    e,
                ));
            }
        }

        debug!("Claimed interface {}", interface);
        self.interfaces.insert(
            interface,
            ClaimedInterface {
                users: 1,
                kernel_driver_detached,
            },
        );
        Ok(())
    }

    /// Drop one user of `interface`, releasing it with the last one
    fn release_interface(&mut self, interface: u8) {
        let Some(claimed) = self.interfaces.get_mut(&interface) else {
            return;
        };
        claimed.users -= 1;
        if claimed.users > 0 {
            return;
        }
        let kernel_driver_detached = claimed.kernel_driver_detached;
        self.interfaces.remove(&interface);

        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        if let Err(e) = handle.release_interface(interface) {
            warn!("Failed to release interface {}: {}", interface, e);
        }

        // Hand the interface back to the kernel (e.g. cdc_acm)
        if kernel_driver_detached {
            if let Err(e) = handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            } else {
                debug!("Reattached kernel driver to interface {}", interface);
            }
        }
    }

    fn claimed(&self, endpoint: EndpointAddress) -> Option<TransferKind> {
        self.endpoints.get(&endpoint).map(|ep| ep.kind)
    }
}

impl UsbHandle for RusbHandle {
    fn set_config_index(&mut self, index: u8) -> Result<()> {
        let config = self
            .device
            .config_descriptor(index)
            .map_err(|e| usb_error("config descriptor", e))?;
        let value = config.number();

        let handle = self.handle_mut()?;

        // Re-selecting the active configuration resets the device and fails
        // while kernel drivers hold interfaces.
        if handle.active_configuration().ok() != Some(value) {
            handle
                .set_active_configuration(value)
                .map_err(|e| usb_error("set configuration", e))?;
        }

        debug!("Selected configuration index {} (value {})", index, value);
        self.config_index = index;
        Ok(())
    }

    fn claim_endpoint(&mut self, endpoint: EndpointAddress) -> Result<()> {
        let (interface, setting, kind) = self.locate_endpoint(endpoint)?;
        self.claim_interface(interface, setting)?;

        // Stall-clearing: start from a clean endpoint; later stalls are
        // cleared as they are reported.
        if let Err(e) = self.handle_mut()?.clear_halt(endpoint.0) {
            debug!("clear_halt on endpoint {}: {}", endpoint, e);
        }

        self.endpoints
            .insert(endpoint, ClaimedEndpoint { interface, kind });
        debug!(
            "Claimed {:?} endpoint {} on interface {}",
            kind, endpoint, interface
        );
        Ok(())
    }

    fn release_endpoint(&mut self, endpoint: EndpointAddress) {
        if let Some(claimed) = self.endpoints.remove(&endpoint) {
            self.release_interface(claimed.interface);
            debug!("Released endpoint {}", endpoint);
        }
    }

    fn write(&mut self, endpoint: EndpointAddress, data: &[u8], timeout: Duration) -> Completion {
        let Some(kind) = self.claimed(endpoint) else {
            return Completion::error(0, TransferError::Other("endpoint not claimed".into()));
        };
        match self.handle.as_mut() {
            Some(handle) => transfers::write(handle, endpoint, kind, data, timeout),
            None => Completion::error(0, TransferError::Disconnected),
        }
    }

    fn read(&mut self, endpoint: EndpointAddress, buf: &mut [u8], timeout: Duration) -> Completion {
        let Some(kind) = self.claimed(endpoint) else {
            return Completion::error(0, TransferError::Other("endpoint not claimed".into()));
        };
        match self.handle.as_mut() {
            Some(handle) => transfers::read(handle, endpoint, kind, buf, timeout),
            None => Completion::error(0, TransferError::Disconnected),
        }
    }

    fn close(&mut self) {
        let leftover: Vec<EndpointAddress> = self.endpoints.keys().copied().collect();
        for endpoint in leftover {
            self.release_endpoint(endpoint);
        }

        if self.handle.take().is_some() {
            debug!("Closed device");
        }
    }
}

impl Drop for RusbHandle {
    fn drop(&mut self) {
        self.close();
    }
}
