//! Core types and the native SDK abstraction for FLI devices.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use thiserror::Error;

/// Opaque handle the vendor library hands out for an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub i64);

impl DeviceHandle {
    /// Value the library writes when `FLIOpen` fails.
    pub const INVALID: Self = Self(-1);
}

/// Interface and device-class selector for open and enumeration calls.
///
/// A domain is one interface flag ORed with one device-class flag, e.g.
/// `Domain::USB | Domain::CAMERA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Domain(pub i64);

impl Domain {
    /// No interface, no device class.
    pub const NONE: Self = Self(0x00);
    /// Parallel port interface.
    pub const PARALLEL_PORT: Self = Self(0x01);
    /// USB interface.
    pub const USB: Self = Self(0x02);
    /// Serial interface.
    pub const SERIAL: Self = Self(0x03);
    /// Network interface.
    pub const INET: Self = Self(0x04);
    /// Serial interface at 19200 baud.
    pub const SERIAL_19200: Self = Self(0x05);
    /// Serial interface at 1200 baud.
    pub const SERIAL_1200: Self = Self(0x06);

    /// CCD camera device class.
    pub const CAMERA: Self = Self(0x100);
    /// Filter wheel device class.
    pub const FILTERWHEEL: Self = Self(0x200);
    /// Focuser device class.
    pub const FOCUSER: Self = Self(0x300);
    /// High-speed filter wheel device class.
    pub const HS_FILTERWHEEL: Self = Self(0x400);
    /// Raw device access.
    pub const RAW: Self = Self(0xf00);
    /// Enumerate by physical connection rather than by device.
    pub const ENUMERATE_BY_CONNECTION: Self = Self(0x8000);

    const INTERFACE_MASK: i64 = 0x000f;
    const DEVICE_MASK: i64 = 0x0f00;

    /// Raw value passed to the library.
    #[must_use]
    pub const fn bits(self) -> i64 {
        self.0
    }

    /// The interface part of the domain.
    #[must_use]
    pub const fn interface(self) -> Self {
        Self(self.0 & Self::INTERFACE_MASK)
    }

    /// The device-class part of the domain.
    #[must_use]
    pub const fn device_class(self) -> Self {
        Self(self.0 & Self::DEVICE_MASK)
    }
}

impl BitOr for Domain {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// One entry of a device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device file name used to open the device.
    pub name: String,
    /// Model string reported by the library.
    pub model: String,
}

impl DeviceDescriptor {
    /// Parse a `name;model` enumeration entry.
    ///
    /// An entry without a `;` is taken as a bare name with an empty model.
    #[must_use]
    pub fn parse(entry: &str) -> Self {
        let (name, model) = entry.split_once(';').unwrap_or((entry, ""));
        Self {
            name: name.to_owned(),
            model: model.to_owned(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.model)
        }
    }
}

/// Sensor rectangle in unbinned pixels: `(left, top, right, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Area {
    /// Left edge (inclusive).
    pub left: i64,
    /// Top edge (inclusive).
    pub top: i64,
    /// Right edge (exclusive).
    pub right: i64,
    /// Bottom edge (exclusive).
    pub bottom: i64,
}

impl Area {
    /// Create an area from its corners.
    #[must_use]
    pub const fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Horizontal extent, `None` if it overflows.
    #[must_use]
    pub const fn width(&self) -> Option<i64> {
        self.right.checked_sub(self.left)
    }

    /// Vertical extent, `None` if it overflows.
    #[must_use]
    pub const fn height(&self) -> Option<i64> {
        self.bottom.checked_sub(self.top)
    }

    /// The area anchored at the same upper-left corner whose extent is this
    /// one's floor-divided by the binning factors.
    ///
    /// `None` if the factors are below one or any step overflows.
    #[must_use]
    pub fn binned(&self, hbin: i64, vbin: i64) -> Option<Self> {
        if hbin < 1 || vbin < 1 {
            return None;
        }
        let right = self.left.checked_add(self.width()? / hbin)?;
        let bottom = self.top.checked_add(self.height()? / vbin)?;
        Some(Self::new(self.left, self.top, right, bottom))
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Shutter and illumination behaviour during an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Open shutter exposure.
    #[default]
    Normal,
    /// Exposure with the shutter closed.
    Dark,
    /// Flood the CCD with internal light, shutter closed.
    RbiFlush,
}

impl FrameType {
    const FLOOD: i64 = 2;

    /// Value passed to `FLISetFrameType`.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Dark => 1,
            Self::RbiFlush => Self::FLOOD | 1,
        }
    }
}

impl FromStr for FrameType {
    type Err = FliError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Self::Normal),
            "dark" => Ok(Self::Dark),
            "rbi_flush" => Ok(Self::RbiFlush),
            other => Err(FliError::Configuration(format!(
                "frame type must be one of 'normal', 'dark' or 'rbi_flush', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Dark => "dark",
            Self::RbiFlush => "rbi_flush",
        })
    }
}

/// Gray-scale depth of read out pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    /// One byte per pixel.
    #[serde(rename = "8bit")]
    Eight,
    /// Two bytes per pixel.
    #[default]
    #[serde(rename = "16bit")]
    Sixteen,
}

impl BitDepth {
    /// Value passed to `FLISetBitDepth`.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        match self {
            Self::Eight => 0,
            Self::Sixteen => 1,
        }
    }

    /// Size of one pixel in the readout buffer.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }
}

impl FromStr for BitDepth {
    type Err = FliError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "8bit" => Ok(Self::Eight),
            "16bit" => Ok(Self::Sixteen),
            other => Err(FliError::Configuration(format!(
                "bit depth must be either '8bit' or '16bit', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eight => "8bit",
            Self::Sixteen => "16bit",
        })
    }
}

/// Temperature sensor selector for `FLIReadTemperature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureChannel {
    /// The CCD itself.
    Ccd,
    /// The hot side of the cooler.
    Base,
}

impl TemperatureChannel {
    /// Value passed to the library.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        match self {
            Self::Ccd => 0,
            Self::Base => 1,
        }
    }
}

/// Where a camera is in the expose/read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    /// No exposure in flight.
    #[default]
    Idle,
    /// Exposure started, time remaining not yet reported as zero.
    Exposing,
    /// Exposure complete, image waiting to be fetched.
    Reading,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Exposing => "exposing",
            Self::Reading => "reading",
        })
    }
}

/// A native call that failed because of a known model limitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityWarning {
    /// Native function that reported the failure.
    pub call: &'static str,
    /// Negative errno returned by the call.
    pub code: i32,
    /// Human readable explanation.
    pub message: String,
}

impl fmt::Display for CompatibilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} returned {})", self.message, self.call, self.code)
    }
}

/// Result of a setter whose native call may be refused by some models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The hardware accepted the setting.
    Applied,
    /// The hardware refused; the value was still recorded locally.
    Degraded(CompatibilityWarning),
}

impl CallOutcome {
    /// Whether the hardware accepted the setting.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// The warning, if the call degraded.
    #[must_use]
    pub const fn warning(&self) -> Option<&CompatibilityWarning> {
        match self {
            Self::Applied => None,
            Self::Degraded(warning) => Some(warning),
        }
    }
}

/// Error type for FLI operations.
#[derive(Debug, Clone, Error)]
pub enum FliError {
    /// Invalid user-supplied parameter; no native call was made.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The library refused to open a device.
    #[error("failed to open device {name}: {}", describe_code(.code))]
    DeviceOpen {
        /// Device name passed to `FLIOpen`.
        name: String,
        /// Negative errno returned by the library.
        code: i32,
    },
    /// A native call reported failure.
    #[error("{call} failed: {}", describe_code(.code))]
    HardwareCall {
        /// Native function name.
        call: &'static str,
        /// Negative errno returned by the library.
        code: i32,
    },
    /// The hardware reported an area with negative extent.
    #[error("hardware reported an invalid area {0}")]
    InvalidArea(Area),
    /// The shared library could not be loaded.
    #[error("failed to load FLI library: {0}")]
    LibraryLoad(String),
    /// The shared library lacks a required symbol.
    #[error("FLI library is missing symbol {symbol}: {reason}")]
    MissingSymbol {
        /// Symbol name.
        symbol: &'static str,
        /// Loader message.
        reason: String,
    },
    /// No known library name for this platform.
    #[error("platform not supported by the FLI library")]
    UnsupportedPlatform,
    /// `open` was called on a device that is already open.
    #[error("device {0} is already open")]
    AlreadyOpen(String),
    /// An operation needed an open device.
    #[error("device {0} is not open")]
    NotOpen(String),
    /// Acquisition call made in the wrong state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State the camera was in.
        state: AcquisitionState,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe_code(code: &i32) -> String {
    format!(
        "{} (code {code})",
        std::io::Error::from_raw_os_error(code.saturating_abs())
    )
}

/// Result type for FLI operations.
pub type Result<T> = std::result::Result<T, FliError>;

/// Destination for one row of pixels.
///
/// The variant fixes the element width the library writes, so a row can
/// never be grabbed at a depth other than the buffer's.
#[derive(Debug)]
pub enum RowBuffer<'a> {
    /// 8-bit pixels.
    Eight(&'a mut [u8]),
    /// 16-bit pixels.
    Sixteen(&'a mut [u16]),
}

impl RowBuffer<'_> {
    /// Number of pixels in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Eight(row) => row.len(),
            Self::Sixteen(row) => row.len(),
        }
    }

    /// Whether the row holds no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Abstraction over the vendor SDK entry points.
///
/// Every method maps onto one native call. Implementations report native
/// failures as [`FliError::HardwareCall`] (or [`FliError::DeviceOpen`] for
/// `open`) and do no validation of their own.
pub trait Sdk {
    /// `FLIOpen`: acquire a handle for `name` within `domain`.
    fn open(&self, name: &str, domain: Domain) -> Result<DeviceHandle>;

    /// `FLIClose`: release a handle.
    fn close(&self, dev: DeviceHandle) -> Result<()>;

    /// `FLIList` / `FLIFreeList`: raw `name;model` entries for `domain`.
    fn list(&self, domain: Domain) -> Result<Vec<String>>;

    /// `FLIGetLibVersion`.
    fn lib_version(&self) -> Result<String>;

    /// `FLIGetSerialString`.
    fn serial_string(&self, dev: DeviceHandle) -> Result<String>;

    /// `FLIGetModel`.
    fn model(&self, dev: DeviceHandle) -> Result<String>;

    /// `FLIGetHWRevision`.
    fn hardware_revision(&self, dev: DeviceHandle) -> Result<i64>;

    /// `FLIGetFWRevision`.
    fn firmware_revision(&self, dev: DeviceHandle) -> Result<i64>;

    /// `FLIGetPixelSize`: pixel pitch in metres, `(x, y)`.
    fn pixel_size(&self, dev: DeviceHandle) -> Result<(f64, f64)>;

    /// `FLIGetArrayArea`: full sensor area.
    fn array_area(&self, dev: DeviceHandle) -> Result<Area>;

    /// `FLIGetVisibleArea`: area currently exposed for readout.
    fn visible_area(&self, dev: DeviceHandle) -> Result<Area>;

    /// `FLISetImageArea`.
    fn set_image_area(&self, dev: DeviceHandle, area: Area) -> Result<()>;

    /// `FLISetHBin`.
    fn set_hbin(&self, dev: DeviceHandle, hbin: i64) -> Result<()>;

    /// `FLISetVBin`.
    fn set_vbin(&self, dev: DeviceHandle, vbin: i64) -> Result<()>;

    /// `FLISetExposureTime`, in milliseconds.
    fn set_exposure_time(&self, dev: DeviceHandle, millis: i64) -> Result<()>;

    /// `FLISetFrameType`.
    fn set_frame_type(&self, dev: DeviceHandle, frame_type: FrameType) -> Result<()>;

    /// `FLISetBitDepth`.
    fn set_bit_depth(&self, dev: DeviceHandle, depth: BitDepth) -> Result<()>;

    /// `FLISetNFlushes`.
    fn set_flushes(&self, dev: DeviceHandle, flushes: i64) -> Result<()>;

    /// `FLISetTemperature`, degrees Celsius.
    fn set_temperature(&self, dev: DeviceHandle, celsius: f64) -> Result<()>;

    /// `FLIGetTemperature`, degrees Celsius.
    fn temperature(&self, dev: DeviceHandle) -> Result<f64>;

    /// `FLIReadTemperature`, degrees Celsius.
    fn read_temperature(&self, dev: DeviceHandle, channel: TemperatureChannel) -> Result<f64>;

    /// `FLIGetCoolerPower`.
    fn cooler_power(&self, dev: DeviceHandle) -> Result<f64>;

    /// `FLIGetCameraMode`.
    fn camera_mode(&self, dev: DeviceHandle) -> Result<i64>;

    /// `FLISetCameraMode`.
    fn set_camera_mode(&self, dev: DeviceHandle, mode: i64) -> Result<()>;

    /// `FLIGetCameraModeString`.
    fn camera_mode_string(&self, dev: DeviceHandle, mode: i64) -> Result<String>;

    /// `FLIExposeFrame`: begin an exposure and return immediately.
    fn expose_frame(&self, dev: DeviceHandle) -> Result<()>;

    /// `FLIGetExposureStatus`: milliseconds left on the current exposure.
    fn exposure_status(&self, dev: DeviceHandle) -> Result<i64>;

    /// `FLIGrabRow`: read the next row of the image into `row`.
    fn grab_row(&self, dev: DeviceHandle, row: RowBuffer<'_>) -> Result<()>;
}
