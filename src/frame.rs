//! Image buffers filled row by row from the camera.

use ndarray::Array2;
use serde::Serialize;

use crate::traits::{Area, BitDepth, FliError, Result, RowBuffer};
use crate::validation::validate_binning;

/// Geometry of the image a camera will read out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    /// Pixels per row after horizontal binning.
    pub row_width: usize,
    /// Rows after vertical binning.
    pub rows: usize,
    /// Total buffer size in bytes at the current bit depth.
    pub bytes: usize,
}

impl ImageSize {
    /// Binned geometry of `area`.
    ///
    /// Rows and columns are floor-divided by the binning factors. Factors
    /// below one are rejected; an area with negative extent is reported as
    /// [`FliError::InvalidArea`].
    pub fn from_area(area: Area, hbin: i64, vbin: i64, depth: BitDepth) -> Result<Self> {
        validate_binning(hbin, vbin)?;
        let invalid = || FliError::InvalidArea(area);
        let width = area.width().ok_or_else(invalid)?;
        let height = area.height().ok_or_else(invalid)?;
        let row_width = usize::try_from(width / hbin).map_err(|_| invalid())?;
        let rows = usize::try_from(height / vbin).map_err(|_| invalid())?;
        let bytes = row_width
            .checked_mul(rows)
            .and_then(|pixels| pixels.checked_mul(depth.bytes_per_pixel()))
            .ok_or(FliError::InvalidArea(area))?;
        Ok(Self {
            row_width,
            rows,
            bytes,
        })
    }

    /// Number of pixels.
    #[must_use]
    pub const fn pixels(&self) -> usize {
        self.row_width * self.rows
    }
}

/// A read out image, shaped `(rows, row_width)`.
///
/// The element type follows the bit depth the image was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 8-bit pixels.
    Mono8(Array2<u8>),
    /// 16-bit pixels.
    Mono16(Array2<u16>),
}

impl Frame {
    /// A zeroed frame of the given geometry.
    #[must_use]
    pub fn zeros(size: ImageSize, depth: BitDepth) -> Self {
        let shape = (size.rows, size.row_width);
        match depth {
            BitDepth::Eight => Self::Mono8(Array2::zeros(shape)),
            BitDepth::Sixteen => Self::Mono16(Array2::zeros(shape)),
        }
    }

    /// Bit depth of the pixels.
    #[must_use]
    pub const fn bit_depth(&self) -> BitDepth {
        match self {
            Self::Mono8(_) => BitDepth::Eight,
            Self::Mono16(_) => BitDepth::Sixteen,
        }
    }

    /// `(rows, row_width)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Mono8(pixels) => pixels.dim(),
            Self::Mono16(pixels) => pixels.dim(),
        }
    }

    /// Pixels per row.
    #[must_use]
    pub fn width(&self) -> usize {
        self.dim().1
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.dim().0
    }

    /// Size of the pixel data in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        let (rows, width) = self.dim();
        rows * width * self.bit_depth().bytes_per_pixel()
    }

    /// Pixel value at `(row, col)`, widened to 16 bits.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<u16> {
        match self {
            Self::Mono8(pixels) => pixels.get((row, col)).map(|px| u16::from(*px)),
            Self::Mono16(pixels) => pixels.get((row, col)).copied(),
        }
    }

    /// The 16-bit pixels, if this is a 16-bit frame.
    #[must_use]
    pub const fn as_mono16(&self) -> Option<&Array2<u16>> {
        match self {
            Self::Mono16(pixels) => Some(pixels),
            Self::Mono8(_) => None,
        }
    }

    /// The 8-bit pixels, if this is an 8-bit frame.
    #[must_use]
    pub const fn as_mono8(&self) -> Option<&Array2<u8>> {
        match self {
            Self::Mono8(pixels) => Some(pixels),
            Self::Mono16(_) => None,
        }
    }

    /// Minimum, maximum and mean pixel value.
    #[must_use]
    pub fn stats(&self) -> Option<FrameStats> {
        match self {
            Self::Mono8(pixels) => FrameStats::collect(pixels.iter().map(|px| u16::from(*px))),
            Self::Mono16(pixels) => FrameStats::collect(pixels.iter().copied()),
        }
    }

    /// Fill every row in order, handing each to `grab`.
    ///
    /// Row `r` is the slice starting at element `r * row_width`. Frames with
    /// no pixels never call `grab`.
    pub(crate) fn fill_rows<F>(&mut self, mut grab: F) -> Result<()>
    where
        F: FnMut(RowBuffer<'_>) -> Result<()>,
    {
        if self.width() == 0 || self.height() == 0 {
            return Ok(());
        }
        match self {
            Self::Mono8(pixels) => {
                for mut row in pixels.rows_mut() {
                    grab(RowBuffer::Eight(contiguous(row.as_slice_mut())?))?;
                }
            }
            Self::Mono16(pixels) => {
                for mut row in pixels.rows_mut() {
                    grab(RowBuffer::Sixteen(contiguous(row.as_slice_mut())?))?;
                }
            }
        }
        Ok(())
    }
}

fn contiguous<T>(row: Option<&mut [T]>) -> Result<&mut [T]> {
    // Frames are built in standard layout, so rows are always contiguous.
    row.ok_or_else(|| FliError::Configuration("frame row is not contiguous".to_owned()))
}

/// Summary statistics of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    /// Smallest pixel value.
    pub min: u16,
    /// Largest pixel value.
    pub max: u16,
    /// Mean pixel value.
    pub mean: f64,
}

impl FrameStats {
    fn collect<I>(pixels: I) -> Option<Self>
    where
        I: Iterator<Item = u16>,
    {
        let mut count: u64 = 0;
        let mut sum: u64 = 0;
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        for px in pixels {
            count += 1;
            sum += u64::from(px);
            min = min.min(px);
            max = max.max(px);
        }
        if count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f64 / count as f64;
        Some(Self { min, max, mean })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_size_binned() {
        let size = ImageSize::from_area(Area::new(0, 0, 100, 100), 2, 2, BitDepth::Sixteen)
            .expect("size should compute");
        assert_eq!(size.row_width, 50);
        assert_eq!(size.rows, 50);
        assert_eq!(size.bytes, 5000);
    }

    #[test]
    fn test_image_size_floor_division() {
        for hbin in 1..=7 {
            for vbin in 1..=7 {
                let area = Area::new(3, 5, 104, 86);
                let size = ImageSize::from_area(area, hbin, vbin, BitDepth::Eight)
                    .expect("size should compute");
                let expected_w = usize::try_from(101 / hbin).expect("fits");
                let expected_h = usize::try_from(81 / vbin).expect("fits");
                assert_eq!(size.row_width, expected_w);
                assert_eq!(size.rows, expected_h);
                assert_eq!(size.bytes, expected_w * expected_h);
            }
        }
    }

    #[test]
    fn test_image_size_rejects_zero_binning() {
        let result = ImageSize::from_area(Area::new(0, 0, 10, 10), 0, 1, BitDepth::Sixteen);
        assert!(matches!(result, Err(FliError::Configuration(_))));
    }

    #[test]
    fn test_image_size_rejects_inverted_area() {
        let area = Area::new(10, 0, 0, 10);
        let result = ImageSize::from_area(area, 1, 1, BitDepth::Sixteen);
        assert!(matches!(result, Err(FliError::InvalidArea(a)) if a == area));
    }

    #[test]
    fn test_image_size_rejects_overflowing_area() {
        let area = Area::new(i64::MIN, 0, i64::MAX, 10);
        let result = ImageSize::from_area(area, 1, 1, BitDepth::Sixteen);
        assert!(matches!(result, Err(FliError::InvalidArea(a)) if a == area));
    }

    #[test]
    fn test_frame_zeros_shape() {
        let size = ImageSize {
            row_width: 4,
            rows: 3,
            bytes: 24,
        };
        let frame = Frame::zeros(size, BitDepth::Sixteen);
        assert_eq!(frame.dim(), (3, 4));
        assert_eq!(frame.byte_len(), size.bytes);
        assert_eq!(frame.bit_depth(), BitDepth::Sixteen);
        assert!(frame.as_mono16().is_some());
        assert!(frame.as_mono8().is_none());
    }

    #[test]
    fn test_fill_rows_in_order() {
        let size = ImageSize {
            row_width: 3,
            rows: 2,
            bytes: 6,
        };
        let mut frame = Frame::zeros(size, BitDepth::Eight);
        let mut next = 0_u8;
        frame
            .fill_rows(|row| {
                let RowBuffer::Eight(pixels) = row else {
                    return Err(FliError::Configuration("wrong depth".to_owned()));
                };
                for px in pixels {
                    *px = next;
                    next += 1;
                }
                Ok(())
            })
            .expect("fill should succeed");
        assert_eq!(frame.get(0, 0), Some(0));
        assert_eq!(frame.get(0, 2), Some(2));
        assert_eq!(frame.get(1, 0), Some(3));
        assert_eq!(frame.get(1, 2), Some(5));
        assert_eq!(frame.get(2, 0), None);
    }

    #[test]
    fn test_fill_rows_skips_empty_frame() {
        let size = ImageSize {
            row_width: 0,
            rows: 5,
            bytes: 0,
        };
        let mut frame = Frame::zeros(size, BitDepth::Sixteen);
        let mut calls = 0;
        frame
            .fill_rows(|_| {
                calls += 1;
                Ok(())
            })
            .expect("fill should succeed");
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_frame_stats() {
        let frame = Frame::Mono16(
            Array2::from_shape_vec((2, 2), vec![1, 2, 3, 10]).expect("shape should match"),
        );
        let stats = frame.stats().expect("stats for non-empty frame");
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 10);
        assert!((stats.mean - 4.0).abs() < f64::EPSILON);

        let empty = Frame::zeros(
            ImageSize {
                row_width: 0,
                rows: 0,
                bytes: 0,
            },
            BitDepth::Eight,
        );
        assert!(empty.stats().is_none());
    }
}
