//! Mock SDK implementation for testing without hardware.

use crate::traits::{
    Area, BitDepth, DeviceHandle, Domain, FliError, FrameType, Result, RowBuffer, Sdk,
    TemperatureChannel,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

/// Error code the mock returns for scripted failures (`-EINVAL`).
pub const MOCK_FAILURE_CODE: i32 = -22;

/// Settings the mock has received, as the hardware would hold them.
#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    /// Last image area set.
    pub image_area: Option<Area>,
    /// Last horizontal binning set.
    pub hbin: Option<i64>,
    /// Last vertical binning set.
    pub vbin: Option<i64>,
    /// Last exposure time set, in milliseconds.
    pub exposure_ms: Option<i64>,
    /// Last frame type set.
    pub frame_type: Option<FrameType>,
    /// Last bit depth accepted.
    pub bit_depth: Option<BitDepth>,
    /// Last flush count set.
    pub flushes: Option<i64>,
    /// Last temperature setpoint.
    pub temperature: Option<f64>,
    /// Current readout mode.
    pub camera_mode: i64,
}

#[derive(Debug, Default)]
struct MockState {
    entries: Vec<String>,
    failing_opens: HashSet<String>,
    failing_calls: HashSet<&'static str>,
    next_handle: i64,
    open_handles: HashSet<i64>,
    close_counts: HashMap<i64, u32>,
    calls: Vec<&'static str>,
    visible_area: Area,
    exposure_script: VecDeque<i64>,
    rows_grabbed: usize,
    mode_names: Vec<String>,
    settings: MockSettings,
}

/// Mock SDK that records every native call it receives.
#[derive(Debug)]
pub struct MockSdk {
    state: RefCell<MockState>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// Create a mock with no devices and a 100x100 visible area.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockState {
                next_handle: 1,
                visible_area: Area::new(0, 0, 100, 100),
                mode_names: vec!["2.0 MHz".to_owned(), "500 kHz".to_owned()],
                ..MockState::default()
            }),
        }
    }

    /// Set the raw `name;model` entries the mock enumerates.
    #[must_use]
    pub fn with_entries(self, entries: &[&str]) -> Self {
        self.state.borrow_mut().entries = entries.iter().map(|e| (*e).to_owned()).collect();
        self
    }

    /// Set the visible area the mock reports.
    #[must_use]
    pub fn with_visible_area(self, area: Area) -> Self {
        self.state.borrow_mut().visible_area = area;
        self
    }

    /// Script the successive values `FLIGetExposureStatus` returns.
    /// Once exhausted the mock reports zero.
    #[must_use]
    pub fn with_exposure_script(self, remaining_ms: &[i64]) -> Self {
        self.state.borrow_mut().exposure_script = remaining_ms.iter().copied().collect();
        self
    }

    /// Make the named native call fail.
    #[must_use]
    pub fn failing(self, call: &'static str) -> Self {
        self.state.borrow_mut().failing_calls.insert(call);
        self
    }

    /// Make `FLIOpen` fail for the given device name.
    #[must_use]
    pub fn failing_open(self, name: &str) -> Self {
        self.state.borrow_mut().failing_opens.insert(name.to_owned());
        self
    }

    /// Every native call received, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    /// How many times a native call was received.
    pub fn call_count(&self, call: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// How many times `FLIClose` was called for a handle.
    pub fn close_count(&self, handle: DeviceHandle) -> u32 {
        self.state
            .borrow()
            .close_counts
            .get(&handle.0)
            .copied()
            .unwrap_or(0)
    }

    /// Handles opened and not yet closed.
    pub fn open_handle_count(&self) -> usize {
        self.state.borrow().open_handles.len()
    }

    /// Rows handed out by `FLIGrabRow` so far.
    pub fn rows_grabbed(&self) -> usize {
        self.state.borrow().rows_grabbed
    }

    /// Snapshot of the settings received.
    pub fn settings(&self) -> MockSettings {
        self.state.borrow().settings.clone()
    }

    /// Record `call` and fail it if scripted to.
    fn enter(&self, call: &'static str) -> Result<std::cell::RefMut<'_, MockState>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.failing_calls.contains(call) {
            return Err(FliError::HardwareCall {
                call,
                code: MOCK_FAILURE_CODE,
            });
        }
        Ok(state)
    }

    fn enter_open(
        &self,
        call: &'static str,
        dev: DeviceHandle,
    ) -> Result<std::cell::RefMut<'_, MockState>> {
        let state = self.enter(call)?;
        if !state.open_handles.contains(&dev.0) {
            return Err(FliError::HardwareCall {
                call,
                code: -19, // ENODEV
            });
        }
        Ok(state)
    }
}

impl Sdk for MockSdk {
    fn open(&self, name: &str, _domain: Domain) -> Result<DeviceHandle> {
        let mut state = self.state.borrow_mut();
        state.calls.push("FLIOpen");
        if state.failing_opens.contains(name) || state.failing_calls.contains("FLIOpen") {
            return Err(FliError::DeviceOpen {
                name: name.to_owned(),
                code: -19,
            });
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open_handles.insert(handle);
        Ok(DeviceHandle(handle))
    }

    fn close(&self, dev: DeviceHandle) -> Result<()> {
        let mut state = self.enter("FLIClose")?;
        *state.close_counts.entry(dev.0).or_insert(0) += 1;
        state.open_handles.remove(&dev.0);
        Ok(())
    }

    fn list(&self, _domain: Domain) -> Result<Vec<String>> {
        let state = self.enter("FLIList")?;
        Ok(state.entries.clone())
    }

    fn lib_version(&self) -> Result<String> {
        self.enter("FLIGetLibVersion")?;
        Ok("Software Development Library for Linux 1.104".to_owned())
    }

    fn serial_string(&self, dev: DeviceHandle) -> Result<String> {
        self.enter_open("FLIGetSerialString", dev)?;
        Ok(format!("ML{:04}", dev.0))
    }

    fn model(&self, dev: DeviceHandle) -> Result<String> {
        self.enter_open("FLIGetModel", dev)?;
        Ok("MicroLine ML8300".to_owned())
    }

    fn hardware_revision(&self, dev: DeviceHandle) -> Result<i64> {
        self.enter_open("FLIGetHWRevision", dev)?;
        Ok(256)
    }

    fn firmware_revision(&self, dev: DeviceHandle) -> Result<i64> {
        self.enter_open("FLIGetFWRevision", dev)?;
        Ok(290)
    }

    fn pixel_size(&self, dev: DeviceHandle) -> Result<(f64, f64)> {
        self.enter_open("FLIGetPixelSize", dev)?;
        Ok((5.4e-6, 5.4e-6))
    }

    fn array_area(&self, dev: DeviceHandle) -> Result<Area> {
        let state = self.enter_open("FLIGetArrayArea", dev)?;
        let visible = state.visible_area;
        Ok(Area::new(0, 0, visible.right + 8, visible.bottom + 4))
    }

    fn visible_area(&self, dev: DeviceHandle) -> Result<Area> {
        let state = self.enter_open("FLIGetVisibleArea", dev)?;
        Ok(state.visible_area)
    }

    fn set_image_area(&self, dev: DeviceHandle, area: Area) -> Result<()> {
        let mut state = self.enter_open("FLISetImageArea", dev)?;
        state.settings.image_area = Some(area);
        Ok(())
    }

    fn set_hbin(&self, dev: DeviceHandle, hbin: i64) -> Result<()> {
        let mut state = self.enter_open("FLISetHBin", dev)?;
        state.settings.hbin = Some(hbin);
        Ok(())
    }

    fn set_vbin(&self, dev: DeviceHandle, vbin: i64) -> Result<()> {
        let mut state = self.enter_open("FLISetVBin", dev)?;
        state.settings.vbin = Some(vbin);
        Ok(())
    }

    fn set_exposure_time(&self, dev: DeviceHandle, millis: i64) -> Result<()> {
        let mut state = self.enter_open("FLISetExposureTime", dev)?;
        state.settings.exposure_ms = Some(millis);
        Ok(())
    }

    fn set_frame_type(&self, dev: DeviceHandle, frame_type: FrameType) -> Result<()> {
        let mut state = self.enter_open("FLISetFrameType", dev)?;
        state.settings.frame_type = Some(frame_type);
        Ok(())
    }

    fn set_bit_depth(&self, dev: DeviceHandle, depth: BitDepth) -> Result<()> {
        let mut state = self.enter_open("FLISetBitDepth", dev)?;
        state.settings.bit_depth = Some(depth);
        Ok(())
    }

    fn set_flushes(&self, dev: DeviceHandle, flushes: i64) -> Result<()> {
        let mut state = self.enter_open("FLISetNFlushes", dev)?;
        state.settings.flushes = Some(flushes);
        Ok(())
    }

    fn set_temperature(&self, dev: DeviceHandle, celsius: f64) -> Result<()> {
        let mut state = self.enter_open("FLISetTemperature", dev)?;
        state.settings.temperature = Some(celsius);
        Ok(())
    }

    fn temperature(&self, dev: DeviceHandle) -> Result<f64> {
        let state = self.enter_open("FLIGetTemperature", dev)?;
        Ok(state.settings.temperature.unwrap_or(20.0))
    }

    fn read_temperature(&self, dev: DeviceHandle, channel: TemperatureChannel) -> Result<f64> {
        let state = self.enter_open("FLIReadTemperature", dev)?;
        let ccd = state.settings.temperature.unwrap_or(20.0);
        Ok(match channel {
            TemperatureChannel::Ccd => ccd,
            TemperatureChannel::Base => ccd + 25.0,
        })
    }

    fn cooler_power(&self, dev: DeviceHandle) -> Result<f64> {
        self.enter_open("FLIGetCoolerPower", dev)?;
        Ok(42.5)
    }

    fn camera_mode(&self, dev: DeviceHandle) -> Result<i64> {
        let state = self.enter_open("FLIGetCameraMode", dev)?;
        Ok(state.settings.camera_mode)
    }

    fn set_camera_mode(&self, dev: DeviceHandle, mode: i64) -> Result<()> {
        let mut state = self.enter_open("FLISetCameraMode", dev)?;
        state.settings.camera_mode = mode;
        Ok(())
    }

    fn camera_mode_string(&self, dev: DeviceHandle, mode: i64) -> Result<String> {
        let state = self.enter_open("FLIGetCameraModeString", dev)?;
        usize::try_from(mode)
            .ok()
            .and_then(|index| state.mode_names.get(index).cloned())
            .ok_or(FliError::HardwareCall {
                call: "FLIGetCameraModeString",
                code: MOCK_FAILURE_CODE,
            })
    }

    fn expose_frame(&self, dev: DeviceHandle) -> Result<()> {
        let mut state = self.enter_open("FLIExposeFrame", dev)?;
        state.rows_grabbed = 0;
        Ok(())
    }

    fn exposure_status(&self, dev: DeviceHandle) -> Result<i64> {
        let mut state = self.enter_open("FLIGetExposureStatus", dev)?;
        Ok(state.exposure_script.pop_front().unwrap_or(0))
    }

    fn grab_row(&self, dev: DeviceHandle, row: RowBuffer<'_>) -> Result<()> {
        let mut state = self.enter_open("FLIGrabRow", dev)?;
        let row_index = state.rows_grabbed;
        state.rows_grabbed += 1;
        // Pixel value encodes its position: row * 1000 + column.
        match row {
            RowBuffer::Eight(pixels) => {
                for (col, px) in pixels.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        *px = (row_index * 1000 + col) as u8;
                    }
                }
            }
            RowBuffer::Sixteen(pixels) => {
                for (col, px) in pixels.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        *px = (row_index * 1000 + col) as u16;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_open_close_tracking() {
        let sdk = MockSdk::new();
        let handle = sdk
            .open("/dev/fliusb0", Domain::USB | Domain::CAMERA)
            .expect("open should succeed");
        assert_eq!(sdk.open_handle_count(), 1);

        sdk.close(handle).expect("close should succeed");
        assert_eq!(sdk.open_handle_count(), 0);
        assert_eq!(sdk.close_count(handle), 1);
        assert_eq!(sdk.calls(), vec!["FLIOpen", "FLIClose"]);
    }

    #[test]
    fn test_mock_call_count() {
        let sdk = MockSdk::new();
        let handle = sdk.open("dev", Domain::USB).expect("open should succeed");
        sdk.set_hbin(handle, 2).expect("hbin should succeed");
        sdk.set_vbin(handle, 2).expect("vbin should succeed");
        sdk.set_hbin(handle, 4).expect("hbin should succeed");
        assert_eq!(sdk.call_count("FLISetHBin"), 2);
        assert_eq!(sdk.call_count("FLISetVBin"), 1);
        assert_eq!(sdk.call_count("FLIClose"), 0);
    }

    #[test]
    fn test_mock_scripted_failure() {
        let sdk = MockSdk::new().failing("FLISetBitDepth");
        let handle = sdk.open("dev", Domain::USB).expect("open should succeed");
        let err = sdk
            .set_bit_depth(handle, BitDepth::Eight)
            .expect_err("scripted call should fail");
        assert!(matches!(
            err,
            FliError::HardwareCall {
                call: "FLISetBitDepth",
                code: MOCK_FAILURE_CODE
            }
        ));
        assert!(sdk.settings().bit_depth.is_none());
    }

    #[test]
    fn test_mock_rejects_unknown_handle() {
        let sdk = MockSdk::new();
        let err = sdk
            .visible_area(DeviceHandle(99))
            .expect_err("unknown handle should fail");
        assert!(matches!(err, FliError::HardwareCall { code: -19, .. }));
    }

    #[test]
    fn test_mock_exposure_script() {
        let sdk = MockSdk::new().with_exposure_script(&[200, 50]);
        let handle = sdk.open("dev", Domain::USB).expect("open should succeed");
        let status: Vec<i64> = (0..3)
            .map(|_| sdk.exposure_status(handle).expect("status should succeed"))
            .collect();
        assert_eq!(status, vec![200, 50, 0]);
    }

    #[test]
    fn test_mock_row_pattern() {
        let sdk = MockSdk::new();
        let handle = sdk.open("dev", Domain::USB).expect("open should succeed");
        let mut first = vec![0_u16; 4];
        let mut second = vec![0_u16; 4];
        sdk.grab_row(handle, RowBuffer::Sixteen(&mut first))
            .expect("grab should succeed");
        sdk.grab_row(handle, RowBuffer::Sixteen(&mut second))
            .expect("grab should succeed");
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(second, vec![1000, 1001, 1002, 1003]);
        assert_eq!(sdk.rows_grabbed(), 2);
    }
}
