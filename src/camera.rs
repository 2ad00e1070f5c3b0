//! CCD camera control and acquisition.
//!
//! A [`Camera`] wraps an open [`Device`] and tracks the binning and bit
//! depth the readout buffer is sized from, plus where it is in the
//! expose/read cycle:
//!
//! ```text
//! Idle --start_exposure--> Exposing --time left is zero--> Reading --fetch_image--> Idle
//! ```

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::CaptureConfig;
use crate::device::Device;
use crate::frame::{Frame, ImageSize};
use crate::traits::{
    AcquisitionState, Area, BitDepth, CallOutcome, CompatibilityWarning, DeviceDescriptor,
    DeviceHandle, Domain, FliError, FrameType, Result, Sdk, TemperatureChannel,
};
use crate::validation::{
    exposure_millis, remaining_time, validate_binning, validate_flushes, validate_temperature,
};

/// Upper bound on the readout modes [`Camera::camera_modes`] walks.
pub const MAX_CAMERA_MODES: i64 = 32;

/// Static description of a camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    /// Serial number string.
    pub serial_number: String,
    /// Hardware revision.
    pub hardware_revision: i64,
    /// Firmware revision.
    pub firmware_revision: i64,
    /// Pixel pitch `(x, y)` in metres.
    pub pixel_size: (f64, f64),
    /// Full sensor area including overscan.
    pub array_area: Area,
    /// Area that receives light.
    pub visible_area: Area,
}

/// A USB CCD camera.
#[derive(Debug)]
pub struct Camera<'a, S: Sdk> {
    device: Device<'a, S>,
    hbin: i64,
    vbin: i64,
    bit_depth: BitDepth,
    state: AcquisitionState,
}

impl<'a, S: Sdk> Camera<'a, S> {
    /// Domain cameras are enumerated and opened in.
    pub const DOMAIN: Domain = Domain(Domain::USB.0 | Domain::CAMERA.0);

    /// Wrap a device. Binning starts at 1x1 and the bit depth at 16 bits;
    /// neither is sent to the hardware.
    pub const fn new(device: Device<'a, S>) -> Self {
        Self {
            device,
            hbin: 1,
            vbin: 1,
            bit_depth: BitDepth::Sixteen,
            state: AcquisitionState::Idle,
        }
    }

    /// Open the camera named by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpen` if the library refuses the device.
    pub fn connect(sdk: &'a S, descriptor: DeviceDescriptor) -> Result<Self> {
        Device::connect(sdk, descriptor, Self::DOMAIN).map(Self::new)
    }

    /// Opens every USB camera the library reports.
    ///
    /// # Errors
    ///
    /// Returns the first `DeviceOpen` error; cameras opened before it are
    /// closed again.
    pub fn find_cameras(sdk: &'a S) -> Result<Vec<Self>> {
        let cameras: Vec<Self> = Device::find_devices(sdk, Self::DOMAIN)?
            .into_iter()
            .map(Self::new)
            .collect();
        info!("opened {} camera(s)", cameras.len());
        Ok(cameras)
    }

    /// The underlying device.
    #[must_use]
    pub const fn device(&self) -> &Device<'a, S> {
        &self.device
    }

    /// Mutable access to the underlying device.
    ///
    /// Prefer [`Camera::close`] and [`Camera::open`], which also reset the
    /// acquisition state.
    pub fn device_mut(&mut self) -> &mut Device<'a, S> {
        &mut self.device
    }

    /// Closes the device, abandoning any exposure in flight.
    ///
    /// # Errors
    ///
    /// Returns `HardwareCall` if the library reports a failure.
    pub fn close(&mut self) -> Result<()> {
        self.abort_exposure();
        self.device.close()
    }

    /// Reopens a closed camera in the idle state.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOpen` or `DeviceOpen`.
    pub fn open(&mut self) -> Result<()> {
        self.device.open()?;
        self.abort_exposure();
        Ok(())
    }

    /// Current `(hbin, vbin)`.
    #[must_use]
    pub const fn binning(&self) -> (i64, i64) {
        (self.hbin, self.vbin)
    }

    /// Bit depth images are read at.
    #[must_use]
    pub const fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Position in the acquisition cycle.
    #[must_use]
    pub const fn state(&self) -> AcquisitionState {
        self.state
    }

    fn sdk(&self) -> &'a S {
        self.device.sdk()
    }

    fn handle(&self) -> Result<DeviceHandle> {
        self.device.handle()
    }

    /// Serial number, revisions, pixel size and sensor areas.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or the first failing `HardwareCall`.
    pub fn info(&self) -> Result<CameraInfo> {
        let dev = self.handle()?;
        let sdk = self.sdk();
        Ok(CameraInfo {
            serial_number: self.device.serial_number()?,
            hardware_revision: sdk.hardware_revision(dev)?,
            firmware_revision: sdk.firmware_revision(dev)?,
            pixel_size: sdk.pixel_size(dev)?,
            array_area: sdk.array_area(dev)?,
            visible_area: sdk.visible_area(dev)?,
        })
    }

    /// Visible area, read from the device on every call.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn visible_area(&self) -> Result<Area> {
        self.sdk().visible_area(self.handle()?)
    }

    /// Geometry of the next image at the current binning and bit depth.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen`, `HardwareCall`, or `InvalidArea` if the device
    /// reports a negative extent.
    pub fn image_size(&self) -> Result<ImageSize> {
        let visible = self.visible_area()?;
        ImageSize::from_area(visible, self.hbin, self.vbin, self.bit_depth)
    }

    /// Bins the full visible area.
    ///
    /// The image area is set to the binned extent of the visible area
    /// before the factors themselves.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without a native call if either factor is
    /// below one, `InvalidArea` if the visible area's extent overflows,
    /// otherwise `NotOpen` or `HardwareCall`.
    pub fn set_image_binning(&mut self, hbin: i64, vbin: i64) -> Result<()> {
        let (hbin, vbin) = validate_binning(hbin, vbin)?;
        let dev = self.handle()?;
        let sdk = self.sdk();
        let visible = sdk.visible_area(dev)?;
        let area = visible
            .binned(hbin, vbin)
            .ok_or(FliError::InvalidArea(visible))?;
        sdk.set_image_area(dev, area)?;
        sdk.set_hbin(dev, hbin)?;
        sdk.set_vbin(dev, vbin)?;
        self.hbin = hbin;
        self.vbin = vbin;
        debug!("binning set to {hbin}x{vbin}, image area {area}");
        Ok(())
    }

    /// Reads out a sub-region of the sensor at the current binning.
    ///
    /// Corners are in unbinned pixels; the lower-right corner sent to the
    /// device is the binned extent from the upper-left one.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without a native call if the lower-right
    /// corner lies above or left of the upper-left one or the extent does
    /// not fit in an `i64`.
    pub fn set_image_area(&self, ul_x: i64, ul_y: i64, lr_x: i64, lr_y: i64) -> Result<()> {
        if lr_x < ul_x || lr_y < ul_y {
            return Err(FliError::Configuration(format!(
                "image area corners ({ul_x}, {ul_y}) and ({lr_x}, {lr_y}) are inverted"
            )));
        }
        let area = Area::new(ul_x, ul_y, lr_x, lr_y)
            .binned(self.hbin, self.vbin)
            .ok_or_else(|| {
                FliError::Configuration(format!(
                    "image area corners ({ul_x}, {ul_y}) and ({lr_x}, {lr_y}) overflow"
                ))
            })?;
        self.sdk().set_image_area(self.handle()?, area)
    }

    /// Sets the exposure time and frame type, in that order.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without a native call if the exposure does
    /// not fit in milliseconds, otherwise `NotOpen` or `HardwareCall`.
    pub fn set_exposure(&self, exposure: Duration, frame_type: FrameType) -> Result<()> {
        let millis = exposure_millis(exposure)?;
        let dev = self.handle()?;
        self.sdk().set_exposure_time(dev, millis)?;
        self.sdk().set_frame_type(dev, frame_type)?;
        debug!("exposure set to {millis} ms, {frame_type} frame");
        Ok(())
    }

    /// Sets the readout bit depth.
    ///
    /// Some USB models refuse to change depth. A refusal is returned as
    /// [`CallOutcome::Degraded`] rather than an error, and the requested
    /// depth is recorded either way, so buffers are sized from it.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen`; native failures are not errors here.
    pub fn set_bit_depth(&mut self, depth: BitDepth) -> Result<CallOutcome> {
        let dev = self.handle()?;
        let outcome = match self.sdk().set_bit_depth(dev, depth) {
            Ok(()) => CallOutcome::Applied,
            Err(FliError::HardwareCall { call, code }) => {
                let warning = CompatibilityWarning {
                    call,
                    code,
                    message: "the library does not allow changing bit depth for this camera"
                        .to_owned(),
                };
                warn!("{}: {warning}", self.device.name());
                CallOutcome::Degraded(warning)
            }
            Err(err) => return Err(err),
        };
        self.bit_depth = depth;
        Ok(outcome)
    }

    /// Sets how many times the CCD is flushed before an exposure.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without a native call unless
    /// `0 <= flushes <= 16`, otherwise `NotOpen` or `HardwareCall`.
    pub fn set_flushes(&self, flushes: i64) -> Result<()> {
        let flushes = validate_flushes(flushes)?;
        self.sdk().set_flushes(self.handle()?, flushes)
    }

    /// Sets the cooler setpoint in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for non-finite values, otherwise `NotOpen`
    /// or `HardwareCall`.
    pub fn set_temperature(&self, celsius: f64) -> Result<()> {
        let celsius = validate_temperature(celsius)?;
        self.sdk().set_temperature(self.handle()?, celsius)
    }

    /// Camera temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn temperature(&self) -> Result<f64> {
        self.sdk().temperature(self.handle()?)
    }

    /// Temperature of one sensor in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn read_temperature(&self, channel: TemperatureChannel) -> Result<f64> {
        self.sdk().read_temperature(self.handle()?, channel)
    }

    /// CCD temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn ccd_temperature(&self) -> Result<f64> {
        self.read_temperature(TemperatureChannel::Ccd)
    }

    /// Temperature of the cooler's hot side in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn base_temperature(&self) -> Result<f64> {
        self.read_temperature(TemperatureChannel::Base)
    }

    /// Cooler power in watts.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn cooler_power(&self) -> Result<f64> {
        self.sdk().cooler_power(self.handle()?)
    }

    /// Index of the current readout mode.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn camera_mode(&self) -> Result<i64> {
        self.sdk().camera_mode(self.handle()?)
    }

    /// Selects a readout mode by index.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn set_camera_mode(&self, mode: i64) -> Result<()> {
        self.sdk().set_camera_mode(self.handle()?, mode)?;
        debug!("{} readout mode set to {mode}", self.device.name());
        Ok(())
    }

    /// Name of a readout mode.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen`, or `HardwareCall` if the index is unknown.
    pub fn camera_mode_string(&self, mode: i64) -> Result<String> {
        self.sdk().camera_mode_string(self.handle()?, mode)
    }

    /// Names of every readout mode, in index order.
    ///
    /// Walks indices from zero until the library rejects one.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen`.
    pub fn camera_modes(&self) -> Result<Vec<String>> {
        let mut modes = Vec::new();
        for mode in 0..MAX_CAMERA_MODES {
            match self.camera_mode_string(mode) {
                Ok(name) => modes.push(name),
                Err(FliError::HardwareCall { .. }) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(modes)
    }

    /// Applies a whole capture configuration.
    ///
    /// Order: binning, exposure and frame type, flushes, bit depth, then
    /// the temperature setpoint if one is given. The configuration is
    /// validated before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid settings, otherwise the first
    /// failing call's error.
    pub fn configure(&mut self, config: &CaptureConfig) -> Result<CallOutcome> {
        config.validate()?;
        self.set_image_binning(config.hbin, config.vbin)?;
        self.set_exposure(config.exposure(), config.frame_type)?;
        self.set_flushes(config.flushes)?;
        let outcome = self.set_bit_depth(config.bit_depth)?;
        if let Some(celsius) = config.temperature {
            self.set_temperature(celsius)?;
        }
        info!(
            "{} configured: {}x{} bin, {} ms {} exposure, {} flushes, {}",
            self.device.name(),
            config.hbin,
            config.vbin,
            config.exposure_ms,
            config.frame_type,
            config.flushes,
            self.bit_depth
        );
        Ok(outcome)
    }

    /// Starts an exposure and returns immediately.
    ///
    /// An image that was exposed but never fetched is discarded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while an exposure is in flight, otherwise
    /// `NotOpen` or `HardwareCall`.
    pub fn start_exposure(&mut self) -> Result<()> {
        if self.state == AcquisitionState::Exposing {
            return Err(FliError::InvalidState {
                operation: "start an exposure",
                state: self.state,
            });
        }
        if self.state == AcquisitionState::Reading {
            warn!(
                "{}: discarding the unread image of the previous exposure",
                self.device.name()
            );
        }
        self.sdk().expose_frame(self.handle()?)?;
        self.transition(AcquisitionState::Exposing);
        Ok(())
    }

    /// Time left on the current exposure.
    ///
    /// Once it reaches zero the image is ready for [`Camera::fetch_image`].
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` or `HardwareCall`.
    pub fn exposure_time_left(&mut self) -> Result<Duration> {
        let left = remaining_time(self.sdk().exposure_status(self.handle()?)?);
        if left.is_zero() && self.state == AcquisitionState::Exposing {
            self.transition(AcquisitionState::Reading);
        }
        Ok(left)
    }

    /// Forgets any exposure in flight or image awaiting readout.
    ///
    /// Only local state changes; the device is not told.
    pub fn abort_exposure(&mut self) {
        if self.state != AcquisitionState::Idle {
            warn!(
                "{}: abandoning exposure while {}",
                self.device.name(),
                self.state
            );
            self.transition(AcquisitionState::Idle);
        }
    }

    /// Reads out the exposed image row by row.
    ///
    /// The camera returns to idle whether or not the readout succeeds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` without a native call unless the exposure has
    /// completed, otherwise the first failing call's error.
    pub fn fetch_image(&mut self) -> Result<Frame> {
        if self.state != AcquisitionState::Reading {
            return Err(FliError::InvalidState {
                operation: "fetch an image",
                state: self.state,
            });
        }
        let result = self.read_frame();
        self.transition(AcquisitionState::Idle);
        result
    }

    fn read_frame(&self) -> Result<Frame> {
        let size = self.image_size()?;
        let dev = self.handle()?;
        let sdk = self.sdk();
        let mut frame = Frame::zeros(size, self.bit_depth);
        frame.fill_rows(|row| sdk.grab_row(dev, row))?;
        debug!(
            "{} read {}x{} image ({} bytes)",
            self.device.name(),
            size.row_width,
            size.rows,
            size.bytes
        );
        Ok(frame)
    }

    /// Exposes, waits for completion and reads out the image.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn capture(&mut self) -> Result<Frame> {
        self.capture_with(std::thread::sleep)
    }

    /// [`Camera::capture`] with a caller-supplied sleep.
    ///
    /// `sleep` is called with each non-zero remaining time the device
    /// reports.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn capture_with<F>(&mut self, mut sleep: F) -> Result<Frame>
    where
        F: FnMut(Duration),
    {
        self.start_exposure()?;
        loop {
            let left = match self.exposure_time_left() {
                Ok(left) => left,
                Err(err) => {
                    self.abort_exposure();
                    return Err(err);
                }
            };
            if left.is_zero() {
                break;
            }
            sleep(left);
        }
        self.fetch_image()
    }

    fn transition(&mut self, next: AcquisitionState) {
        debug!("{}: {} -> {next}", self.device.name(), self.state);
        self.state = next;
    }
}
