//! Runtime-loaded `libfli` backend.
//!
//! The vendor library is opened once per process and kept for the lifetime of
//! the program. All entry points are resolved eagerly at load time so a
//! missing symbol surfaces as a load error rather than on first use.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_double, c_long, c_void, CStr, CString, OsString};
use std::path::PathBuf;
use std::ptr;
use std::sync::OnceLock;

use libloading::{Library, Symbol};
use log::{debug, info, warn};

use crate::traits::{
    Area, BitDepth, DeviceHandle, Domain, FliError, FrameType, Result, RowBuffer, Sdk,
    TemperatureChannel,
};

/// Size of the buffers handed to string-returning calls.
const STRING_BUFFER_SIZE: usize = 64;
/// `FLIGetLibVersion` buffer size.
const LIB_VERSION_SIZE: usize = 1024;

type OpenFn = unsafe extern "system" fn(*mut c_long, *mut c_char, c_long) -> c_long;
type CloseFn = unsafe extern "system" fn(c_long) -> c_long;
type ListFn = unsafe extern "system" fn(c_long, *mut *mut *mut c_char) -> c_long;
type FreeListFn = unsafe extern "system" fn(*mut *mut c_char) -> c_long;
type LibVersionFn = unsafe extern "system" fn(*mut c_char, usize) -> c_long;
type DebugLevelFn = unsafe extern "system" fn(*mut c_char, c_long) -> c_long;
type DevStringFn = unsafe extern "system" fn(c_long, *mut c_char, usize) -> c_long;
type DevLongOutFn = unsafe extern "system" fn(c_long, *mut c_long) -> c_long;
type DevLongInFn = unsafe extern "system" fn(c_long, c_long) -> c_long;
type DevDoubleOutFn = unsafe extern "system" fn(c_long, *mut c_double) -> c_long;
type DevDoubleInFn = unsafe extern "system" fn(c_long, c_double) -> c_long;
type PixelSizeFn = unsafe extern "system" fn(c_long, *mut c_double, *mut c_double) -> c_long;
type AreaOutFn =
    unsafe extern "system" fn(c_long, *mut c_long, *mut c_long, *mut c_long, *mut c_long) -> c_long;
type AreaInFn = unsafe extern "system" fn(c_long, c_long, c_long, c_long, c_long) -> c_long;
type ReadTemperatureFn = unsafe extern "system" fn(c_long, c_long, *mut c_double) -> c_long;
type ModeStringFn = unsafe extern "system" fn(c_long, c_long, *mut c_char, usize) -> c_long;
type DevFn = unsafe extern "system" fn(c_long) -> c_long;
type GrabRowFn = unsafe extern "system" fn(c_long, *mut c_void, usize) -> c_long;

/// Vendor library debug verbosity, for `FLISetDebugLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    /// No library diagnostics.
    None,
    /// Informational messages.
    Info,
    /// Warnings.
    Warn,
    /// Failures.
    Fail,
    /// Raw I/O tracing.
    Io,
    /// Info, warnings and failures.
    All,
}

impl DebugLevel {
    const fn as_raw(self) -> c_long {
        match self {
            Self::None => 0x00,
            Self::Info => 0x01,
            Self::Warn => 0x02,
            Self::Fail => 0x04,
            Self::Io => 0x08,
            Self::All => 0x01 | 0x02 | 0x04,
        }
    }
}

/// How to locate and prepare the vendor library.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit path to the shared object; the platform name is used when
    /// unset, resolved through the system loader search path.
    pub path: Option<PathBuf>,
    /// Turn on the library's own diagnostics after loading.
    pub debug: bool,
}

impl LoadOptions {
    /// Load from an explicit path.
    #[must_use]
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Enable vendor library diagnostics.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Shared object name for the current platform.
pub fn default_library_name() -> Result<&'static str> {
    if cfg!(target_os = "linux") {
        Ok("libfli.so")
    } else if cfg!(target_os = "macos") {
        Ok("libfli.dylib")
    } else if cfg!(windows) {
        Ok("libfli.dll")
    } else {
        Err(FliError::UnsupportedPlatform)
    }
}

/// Resolved entry points. Only valid while the owning [`Library`] is loaded.
struct Api {
    open: OpenFn,
    close: CloseFn,
    list: ListFn,
    free_list: FreeListFn,
    lib_version: LibVersionFn,
    set_debug_level: DebugLevelFn,
    serial_string: DevStringFn,
    model: DevStringFn,
    hw_revision: DevLongOutFn,
    fw_revision: DevLongOutFn,
    pixel_size: PixelSizeFn,
    array_area: AreaOutFn,
    visible_area: AreaOutFn,
    set_image_area: AreaInFn,
    set_hbin: DevLongInFn,
    set_vbin: DevLongInFn,
    set_exposure_time: DevLongInFn,
    set_frame_type: DevLongInFn,
    set_bit_depth: DevLongInFn,
    set_flushes: DevLongInFn,
    set_temperature: DevDoubleInFn,
    temperature: DevDoubleOutFn,
    read_temperature: ReadTemperatureFn,
    cooler_power: DevDoubleOutFn,
    camera_mode: DevLongOutFn,
    set_camera_mode: DevLongInFn,
    camera_mode_string: ModeStringFn,
    expose_frame: DevFn,
    exposure_status: DevLongOutFn,
    grab_row: GrabRowFn,
}

macro_rules! symbol {
    ($lib:expr, $name:literal, $ty:ty) => {{
        // SAFETY: `$ty` is the prototype libfli.h declares for `$name`.
        let sym: Symbol<'_, $ty> = unsafe { $lib.get(concat!($name, "\0").as_bytes()) }
            .map_err(|err| FliError::MissingSymbol {
                symbol: $name,
                reason: err.to_string(),
            })?;
        *sym
    }};
}

impl Api {
    fn resolve(lib: &Library) -> Result<Self> {
        Ok(Self {
            open: symbol!(lib, "FLIOpen", OpenFn),
            close: symbol!(lib, "FLIClose", CloseFn),
            list: symbol!(lib, "FLIList", ListFn),
            free_list: symbol!(lib, "FLIFreeList", FreeListFn),
            lib_version: symbol!(lib, "FLIGetLibVersion", LibVersionFn),
            set_debug_level: symbol!(lib, "FLISetDebugLevel", DebugLevelFn),
            serial_string: symbol!(lib, "FLIGetSerialString", DevStringFn),
            model: symbol!(lib, "FLIGetModel", DevStringFn),
            hw_revision: symbol!(lib, "FLIGetHWRevision", DevLongOutFn),
            fw_revision: symbol!(lib, "FLIGetFWRevision", DevLongOutFn),
            pixel_size: symbol!(lib, "FLIGetPixelSize", PixelSizeFn),
            array_area: symbol!(lib, "FLIGetArrayArea", AreaOutFn),
            visible_area: symbol!(lib, "FLIGetVisibleArea", AreaOutFn),
            set_image_area: symbol!(lib, "FLISetImageArea", AreaInFn),
            set_hbin: symbol!(lib, "FLISetHBin", DevLongInFn),
            set_vbin: symbol!(lib, "FLISetVBin", DevLongInFn),
            set_exposure_time: symbol!(lib, "FLISetExposureTime", DevLongInFn),
            set_frame_type: symbol!(lib, "FLISetFrameType", DevLongInFn),
            set_bit_depth: symbol!(lib, "FLISetBitDepth", DevLongInFn),
            set_flushes: symbol!(lib, "FLISetNFlushes", DevLongInFn),
            set_temperature: symbol!(lib, "FLISetTemperature", DevDoubleInFn),
            temperature: symbol!(lib, "FLIGetTemperature", DevDoubleOutFn),
            read_temperature: symbol!(lib, "FLIReadTemperature", ReadTemperatureFn),
            cooler_power: symbol!(lib, "FLIGetCoolerPower", DevDoubleOutFn),
            camera_mode: symbol!(lib, "FLIGetCameraMode", DevLongOutFn),
            set_camera_mode: symbol!(lib, "FLISetCameraMode", DevLongInFn),
            camera_mode_string: symbol!(lib, "FLIGetCameraModeString", ModeStringFn),
            expose_frame: symbol!(lib, "FLIExposeFrame", DevFn),
            exposure_status: symbol!(lib, "FLIGetExposureStatus", DevLongOutFn),
            grab_row: symbol!(lib, "FLIGrabRow", GrabRowFn),
        })
    }
}

static LIBRARY: OnceLock<Result<FliLibrary>> = OnceLock::new();

/// The loaded vendor library.
///
/// Use [`FliLibrary::global`] (or [`FliLibrary::init`] to pass options) for
/// the process-wide instance; [`FliLibrary::load`] opens an independent one.
pub struct FliLibrary {
    api: Api,
    _lib: Library,
}

impl FliLibrary {
    /// Load the library and resolve every entry point.
    pub fn load(options: &LoadOptions) -> Result<Self> {
        let path: OsString = match &options.path {
            Some(path) => path.clone().into_os_string(),
            None => default_library_name()?.into(),
        };

        // SAFETY: libfli has no load-time initialisers with preconditions.
        let lib = unsafe { Library::new(&path) }.map_err(|err| {
            FliError::LibraryLoad(format!("{}: {err}", path.to_string_lossy()))
        })?;
        let api = Api::resolve(&lib)?;
        let library = Self { api, _lib: lib };

        info!("Loaded FLI library from {}", path.to_string_lossy());
        if options.debug {
            library.set_debug_level(DebugLevel::All)?;
        }
        Ok(library)
    }

    /// Initialize the process-wide library with `options`.
    ///
    /// Only the first call loads; later calls return the same instance (or
    /// the same load error) and ignore their options.
    pub fn init(options: &LoadOptions) -> Result<&'static Self> {
        let mut loaded_now = false;
        let loaded = LIBRARY.get_or_init(|| {
            loaded_now = true;
            Self::load(options)
        });
        if !loaded_now {
            debug!("FLI library already initialized, ignoring load options");
        }
        loaded.as_ref().map_err(Clone::clone)
    }

    /// The process-wide library, loaded with default options on first use.
    pub fn global() -> Result<&'static Self> {
        Self::init(&LoadOptions::default())
    }

    /// Library version string.
    pub fn version(&self) -> Result<String> {
        self.lib_version()
    }

    /// Set the vendor library's diagnostic level.
    pub fn set_debug_level(&self, level: DebugLevel) -> Result<()> {
        debug!("FLISetDebugLevel({level:?})");
        // SAFETY: a null host selects the local library.
        check("FLISetDebugLevel", unsafe {
            (self.api.set_debug_level)(ptr::null_mut(), level.as_raw())
        })
    }

    fn long_out(call: &'static str, f: DevLongOutFn, dev: DeviceHandle) -> Result<i64> {
        let mut value: c_long = 0;
        // SAFETY: `value` outlives the call.
        check(call, unsafe { f(raw(dev)?, &mut value) })?;
        Ok(i64::from(value))
    }

    fn long_in(call: &'static str, f: DevLongInFn, dev: DeviceHandle, value: i64) -> Result<()> {
        debug!("{call}({}, {value})", dev.0);
        // SAFETY: by-value arguments only.
        check(call, unsafe { f(raw(dev)?, to_long(value)?) })
    }

    fn double_out(call: &'static str, f: DevDoubleOutFn, dev: DeviceHandle) -> Result<f64> {
        let mut value: c_double = 0.0;
        // SAFETY: `value` outlives the call.
        check(call, unsafe { f(raw(dev)?, &mut value) })?;
        Ok(value)
    }

    fn area_out(call: &'static str, f: AreaOutFn, dev: DeviceHandle) -> Result<Area> {
        let (mut left, mut top, mut right, mut bottom): (c_long, c_long, c_long, c_long) =
            (0, 0, 0, 0);
        // SAFETY: all four out-pointers outlive the call.
        check(call, unsafe {
            f(raw(dev)?, &mut left, &mut top, &mut right, &mut bottom)
        })?;
        Ok(Area::new(
            i64::from(left),
            i64::from(top),
            i64::from(right),
            i64::from(bottom),
        ))
    }

    fn dev_string(call: &'static str, f: DevStringFn, dev: DeviceHandle) -> Result<String> {
        let dev = raw(dev)?;
        read_string(call, STRING_BUFFER_SIZE, |buf, len| {
            // SAFETY: `buf` points at `len` writable bytes.
            unsafe { f(dev, buf, len) }
        })
    }
}

impl Sdk for FliLibrary {
    fn open(&self, name: &str, domain: Domain) -> Result<DeviceHandle> {
        let c_name = CString::new(name).map_err(|err| {
            FliError::Configuration(format!("device name {name:?} contains a NUL byte: {err}"))
        })?;
        let mut dev: c_long = -1;
        // SAFETY: `dev` and `c_name` outlive the call; the library does not
        // keep the name pointer.
        let status = unsafe {
            (self.api.open)(&mut dev, c_name.as_ptr().cast_mut(), to_long(domain.bits())?)
        };
        if status != 0 {
            return Err(FliError::DeviceOpen {
                name: name.to_owned(),
                code: status_code(status),
            });
        }
        debug!("FLIOpen({name}, {domain}) -> {dev}");
        Ok(DeviceHandle(i64::from(dev)))
    }

    fn close(&self, dev: DeviceHandle) -> Result<()> {
        debug!("FLIClose({})", dev.0);
        // SAFETY: by-value argument only.
        check("FLIClose", unsafe { (self.api.close)(raw(dev)?) })
    }

    fn list(&self, domain: Domain) -> Result<Vec<String>> {
        let mut names: *mut *mut c_char = ptr::null_mut();
        // SAFETY: `names` outlives the call; ownership of the returned list
        // passes to `NameList`, which frees it.
        check("FLIList", unsafe {
            (self.api.list)(to_long(domain.bits())?, &mut names)
        })?;
        let list = NameList {
            names,
            free: self.api.free_list,
        };
        Ok(list.entries())
    }

    fn lib_version(&self) -> Result<String> {
        let f = self.api.lib_version;
        read_string("FLIGetLibVersion", LIB_VERSION_SIZE, |buf, len| {
            // SAFETY: `buf` points at `len` writable bytes.
            unsafe { f(buf, len) }
        })
    }

    fn serial_string(&self, dev: DeviceHandle) -> Result<String> {
        Self::dev_string("FLIGetSerialString", self.api.serial_string, dev)
    }

    fn model(&self, dev: DeviceHandle) -> Result<String> {
        Self::dev_string("FLIGetModel", self.api.model, dev)
    }

    fn hardware_revision(&self, dev: DeviceHandle) -> Result<i64> {
        Self::long_out("FLIGetHWRevision", self.api.hw_revision, dev)
    }

    fn firmware_revision(&self, dev: DeviceHandle) -> Result<i64> {
        Self::long_out("FLIGetFWRevision", self.api.fw_revision, dev)
    }

    fn pixel_size(&self, dev: DeviceHandle) -> Result<(f64, f64)> {
        let (mut x, mut y): (c_double, c_double) = (0.0, 0.0);
        // SAFETY: both out-pointers outlive the call.
        check("FLIGetPixelSize", unsafe {
            (self.api.pixel_size)(raw(dev)?, &mut x, &mut y)
        })?;
        Ok((x, y))
    }

    fn array_area(&self, dev: DeviceHandle) -> Result<Area> {
        Self::area_out("FLIGetArrayArea", self.api.array_area, dev)
    }

    fn visible_area(&self, dev: DeviceHandle) -> Result<Area> {
        Self::area_out("FLIGetVisibleArea", self.api.visible_area, dev)
    }

    fn set_image_area(&self, dev: DeviceHandle, area: Area) -> Result<()> {
        debug!("FLISetImageArea({}, {area})", dev.0);
        // SAFETY: by-value arguments only.
        check("FLISetImageArea", unsafe {
            (self.api.set_image_area)(
                raw(dev)?,
                to_long(area.left)?,
                to_long(area.top)?,
                to_long(area.right)?,
                to_long(area.bottom)?,
            )
        })
    }

    fn set_hbin(&self, dev: DeviceHandle, hbin: i64) -> Result<()> {
        Self::long_in("FLISetHBin", self.api.set_hbin, dev, hbin)
    }

    fn set_vbin(&self, dev: DeviceHandle, vbin: i64) -> Result<()> {
        Self::long_in("FLISetVBin", self.api.set_vbin, dev, vbin)
    }

    fn set_exposure_time(&self, dev: DeviceHandle, millis: i64) -> Result<()> {
        Self::long_in("FLISetExposureTime", self.api.set_exposure_time, dev, millis)
    }

    fn set_frame_type(&self, dev: DeviceHandle, frame_type: FrameType) -> Result<()> {
        Self::long_in(
            "FLISetFrameType",
            self.api.set_frame_type,
            dev,
            frame_type.as_raw(),
        )
    }

    fn set_bit_depth(&self, dev: DeviceHandle, depth: BitDepth) -> Result<()> {
        Self::long_in("FLISetBitDepth", self.api.set_bit_depth, dev, depth.as_raw())
    }

    fn set_flushes(&self, dev: DeviceHandle, flushes: i64) -> Result<()> {
        Self::long_in("FLISetNFlushes", self.api.set_flushes, dev, flushes)
    }

    fn set_temperature(&self, dev: DeviceHandle, celsius: f64) -> Result<()> {
        debug!("FLISetTemperature({}, {celsius})", dev.0);
        // SAFETY: by-value arguments only.
        check("FLISetTemperature", unsafe {
            (self.api.set_temperature)(raw(dev)?, celsius)
        })
    }

    fn temperature(&self, dev: DeviceHandle) -> Result<f64> {
        Self::double_out("FLIGetTemperature", self.api.temperature, dev)
    }

    fn read_temperature(&self, dev: DeviceHandle, channel: TemperatureChannel) -> Result<f64> {
        let mut value: c_double = 0.0;
        // SAFETY: `value` outlives the call.
        check("FLIReadTemperature", unsafe {
            (self.api.read_temperature)(raw(dev)?, to_long(channel.as_raw())?, &mut value)
        })?;
        Ok(value)
    }

    fn cooler_power(&self, dev: DeviceHandle) -> Result<f64> {
        Self::double_out("FLIGetCoolerPower", self.api.cooler_power, dev)
    }

    fn camera_mode(&self, dev: DeviceHandle) -> Result<i64> {
        Self::long_out("FLIGetCameraMode", self.api.camera_mode, dev)
    }

    fn set_camera_mode(&self, dev: DeviceHandle, mode: i64) -> Result<()> {
        Self::long_in("FLISetCameraMode", self.api.set_camera_mode, dev, mode)
    }

    fn camera_mode_string(&self, dev: DeviceHandle, mode: i64) -> Result<String> {
        let f = self.api.camera_mode_string;
        let (dev, mode) = (raw(dev)?, to_long(mode)?);
        read_string("FLIGetCameraModeString", STRING_BUFFER_SIZE, |buf, len| {
            // SAFETY: `buf` points at `len` writable bytes.
            unsafe { f(dev, mode, buf, len) }
        })
    }

    fn expose_frame(&self, dev: DeviceHandle) -> Result<()> {
        debug!("FLIExposeFrame({})", dev.0);
        // SAFETY: by-value argument only.
        check("FLIExposeFrame", unsafe { (self.api.expose_frame)(raw(dev)?) })
    }

    fn exposure_status(&self, dev: DeviceHandle) -> Result<i64> {
        Self::long_out("FLIGetExposureStatus", self.api.exposure_status, dev)
    }

    fn grab_row(&self, dev: DeviceHandle, row: RowBuffer<'_>) -> Result<()> {
        let dev = raw(dev)?;
        let width = row.len();
        match row {
            RowBuffer::Sixteen(pixels) => {
                // SAFETY: `pixels` holds `width` 16-bit pixels, the widest the
                // library writes.
                check("FLIGrabRow", unsafe {
                    (self.api.grab_row)(dev, pixels.as_mut_ptr().cast(), width)
                })
            }
            RowBuffer::Eight(pixels) => {
                // Some models ignore 8-bit requests and keep writing 16-bit
                // pixels, so the native write always targets a 16-bit row.
                let mut scratch = vec![0_u16; width];
                // SAFETY: `scratch` holds `width` 16-bit pixels.
                check("FLIGrabRow", unsafe {
                    (self.api.grab_row)(dev, scratch.as_mut_ptr().cast(), width)
                })?;
                copy_scratch_row(&scratch, pixels);
                Ok(())
            }
        }
    }
}

/// Copies the bytes the library wrote into a 16-bit scratch row, in memory
/// order, into an 8-bit row.
///
/// A camera that honours 8-bit readout fills the first `pixels.len()` bytes;
/// one that ignores it fills the whole scratch row, of which only the first
/// `pixels.len()` bytes are kept.
fn copy_scratch_row(scratch: &[u16], pixels: &mut [u8]) {
    let bytes = scratch.iter().flat_map(|px| px.to_ne_bytes());
    for (dst, src) in pixels.iter_mut().zip(bytes) {
        *dst = src;
    }
}

/// A list returned by `FLIList`, freed with `FLIFreeList` on drop.
struct NameList {
    names: *mut *mut c_char,
    free: FreeListFn,
}

impl NameList {
    fn entries(&self) -> Vec<String> {
        let mut entries = Vec::new();
        if self.names.is_null() {
            return entries;
        }
        for index in 0.. {
            // SAFETY: the list is null-terminated, and we stop at the
            // terminator.
            let entry = unsafe { *self.names.add(index) };
            if entry.is_null() {
                break;
            }
            // SAFETY: each entry is a NUL-terminated string owned by the list.
            let text = unsafe { CStr::from_ptr(entry) };
            entries.push(text.to_string_lossy().into_owned());
        }
        entries
    }
}

impl Drop for NameList {
    fn drop(&mut self) {
        if self.names.is_null() {
            return;
        }
        // SAFETY: `names` came from `FLIList` and is freed exactly once.
        let status = unsafe { (self.free)(self.names) };
        if status != 0 {
            warn!("FLIFreeList failed with code {status}");
        }
    }
}

fn status_code(status: c_long) -> i32 {
    i32::try_from(status).unwrap_or(i32::MIN)
}

fn check(call: &'static str, status: c_long) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        debug!("{call} returned {status}");
        Err(FliError::HardwareCall {
            call,
            code: status_code(status),
        })
    }
}

fn to_long(value: i64) -> Result<c_long> {
    c_long::try_from(value).map_err(|_| {
        FliError::Configuration(format!("{value} does not fit the library's integer type"))
    })
}

fn raw(dev: DeviceHandle) -> Result<c_long> {
    to_long(dev.0)
}

fn read_string<F>(call: &'static str, size: usize, fill: F) -> Result<String>
where
    F: FnOnce(*mut c_char, usize) -> c_long,
{
    let mut buf = vec![0_u8; size];
    check(call, fill(buf.as_mut_ptr().cast(), buf.len()))?;
    let text = CStr::from_bytes_until_nul(&buf).map_or_else(
        |_| String::from_utf8_lossy(&buf).into_owned(),
        |text| text.to_string_lossy().into_owned(),
    );
    Ok(text)
}
