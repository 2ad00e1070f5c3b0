//! fli-camera: control of Finger Lakes Instrumentation USB CCD cameras
//!
//! This library loads the vendor `libfli` shared library at runtime and wraps
//! it behind the [`Sdk`] trait, so cameras can be driven against real
//! hardware or, in tests, against a mock backend.

pub mod camera;
pub mod config;
pub mod device;
pub mod frame;
pub mod library;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::{Camera, CameraInfo};
pub use config::CaptureConfig;
pub use device::Device;
pub use frame::{Frame, FrameStats, ImageSize};
pub use library::{DebugLevel, FliLibrary, LoadOptions};
pub use traits::{
    AcquisitionState, Area, BitDepth, CallOutcome, CompatibilityWarning, DeviceDescriptor,
    DeviceHandle, Domain, FliError, FrameType, Result, Sdk, TemperatureChannel,
};

/// A camera driven through the process-wide vendor library.
pub type FliCamera = Camera<'static, FliLibrary>;
