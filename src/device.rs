//! Device handles opened through the FLI library.

use log::{debug, info, warn};

use crate::traits::{DeviceDescriptor, DeviceHandle, Domain, FliError, Result, Sdk};

/// A device identified by name and domain, owning its handle while open.
///
/// The handle is closed exactly once per successful [`Device::open`], either
/// by [`Device::close`] or on drop.
#[derive(Debug)]
pub struct Device<'a, S: Sdk> {
    sdk: &'a S,
    descriptor: DeviceDescriptor,
    domain: Domain,
    handle: Option<DeviceHandle>,
}

impl<'a, S: Sdk> Device<'a, S> {
    /// A closed device. No native call is made.
    pub const fn new(sdk: &'a S, descriptor: DeviceDescriptor, domain: Domain) -> Self {
        Self {
            sdk,
            descriptor,
            domain,
            handle: None,
        }
    }

    /// Create and open a device.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpen` if the library refuses the device.
    pub fn connect(sdk: &'a S, descriptor: DeviceDescriptor, domain: Domain) -> Result<Self> {
        let mut device = Self::new(sdk, descriptor, domain);
        device.open()?;
        Ok(device)
    }

    /// Lists the devices the library reports for `domain`, in order.
    ///
    /// # Errors
    ///
    /// Returns `HardwareCall` if the library cannot build the list.
    pub fn enumerate(sdk: &S, domain: Domain) -> Result<Vec<DeviceDescriptor>> {
        let descriptors: Vec<DeviceDescriptor> = sdk
            .list(domain)?
            .iter()
            .map(|entry| DeviceDescriptor::parse(entry))
            .collect();
        info!("found {} device(s) in domain {domain}", descriptors.len());
        Ok(descriptors)
    }

    /// Opens every device the library reports for `domain`.
    ///
    /// Stops at the first device that fails to open; the devices opened
    /// before it are closed again.
    ///
    /// # Errors
    ///
    /// Returns the first `DeviceOpen` error, or `HardwareCall` if listing
    /// fails.
    pub fn find_devices(sdk: &'a S, domain: Domain) -> Result<Vec<Self>> {
        Self::enumerate(sdk, domain)?
            .into_iter()
            .map(|descriptor| Self::connect(sdk, descriptor, domain))
            .collect()
    }

    /// Acquires a handle.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOpen` without a native call if a handle is held, or
    /// `DeviceOpen` if the library refuses.
    pub fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(FliError::AlreadyOpen(self.descriptor.name.clone()));
        }
        let handle = self.sdk.open(&self.descriptor.name, self.domain)?;
        info!("opened {} as handle {}", self.descriptor, handle.0);
        self.handle = Some(handle);
        Ok(())
    }

    /// Releases the handle. Closing a closed device does nothing.
    ///
    /// The handle is forgotten even when the native close fails.
    ///
    /// # Errors
    ///
    /// Returns `HardwareCall` if the library reports a failure.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.sdk.close(handle)?;
        info!("closed {}", self.descriptor.name);
        Ok(())
    }

    /// Whether a handle is held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// The open handle.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the device is closed.
    pub fn handle(&self) -> Result<DeviceHandle> {
        self.handle
            .ok_or_else(|| FliError::NotOpen(self.descriptor.name.clone()))
    }

    /// Name and model as reported by enumeration.
    #[must_use]
    pub const fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Device name used to open it.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Domain the device was opened in.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// The backend this device talks to.
    #[must_use]
    pub const fn sdk(&self) -> &'a S {
        self.sdk
    }

    /// Serial number string.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn serial_number(&self) -> Result<String> {
        let serial = self.sdk.serial_string(self.handle()?)?;
        debug!("{} serial number {serial}", self.descriptor.name);
        Ok(serial)
    }

    /// Model string as reported by the device itself.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn model(&self) -> Result<String> {
        self.sdk.model(self.handle()?)
    }
}

impl<S: Sdk> Drop for Device<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing {} on drop failed: {err}", self.descriptor.name);
        }
    }
}
