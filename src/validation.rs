//! Argument checks performed before any native call.
//!
//! The vendor library accepts some out-of-range values silently or reports
//! them inconsistently across models, so the wrapper rejects them itself.
//! Every function here is pure; a failure is always
//! [`FliError::Configuration`].

use std::time::Duration;

use crate::traits::{FliError, Result};

/// Largest flush count the camera accepts before an exposure.
pub const MAX_FLUSHES: i64 = 16;

/// Validates a pre-exposure flush count.
///
/// # Errors
///
/// Returns `Configuration` unless `0 <= flushes <= 16`.
pub fn validate_flushes(flushes: i64) -> Result<i64> {
    if (0..=MAX_FLUSHES).contains(&flushes) {
        Ok(flushes)
    } else {
        Err(FliError::Configuration(format!(
            "flush count must satisfy 0 <= n <= {MAX_FLUSHES}, got {flushes}"
        )))
    }
}

/// Validates horizontal and vertical binning factors.
///
/// # Errors
///
/// Returns `Configuration` if either factor is below one.
pub fn validate_binning(hbin: i64, vbin: i64) -> Result<(i64, i64)> {
    if hbin < 1 || vbin < 1 {
        return Err(FliError::Configuration(format!(
            "binning factors must be at least 1, got {hbin}x{vbin}"
        )));
    }
    Ok((hbin, vbin))
}

/// Converts an exposure time to the whole milliseconds the library takes.
///
/// Sub-millisecond remainders are truncated.
///
/// # Errors
///
/// Returns `Configuration` if the duration does not fit in an `i64` of
/// milliseconds.
pub fn exposure_millis(exposure: Duration) -> Result<i64> {
    i64::try_from(exposure.as_millis()).map_err(|_| {
        FliError::Configuration(format!("exposure time {exposure:?} is too long"))
    })
}

/// Validates a temperature setpoint in degrees Celsius.
///
/// # Errors
///
/// Returns `Configuration` for NaN or infinite values.
pub fn validate_temperature(celsius: f64) -> Result<f64> {
    if celsius.is_finite() {
        Ok(celsius)
    } else {
        Err(FliError::Configuration(format!(
            "temperature setpoint must be finite, got {celsius}"
        )))
    }
}

/// Converts a remaining-time report from the library into a `Duration`.
///
/// Negative reports are treated as complete.
#[must_use]
pub fn remaining_time(millis: i64) -> Duration {
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
