//! Raw frame access and pixel-format handling.
//!
//! The tracker never converts a frame up front; it reads luminance on
//! demand, collapsing colour formats with integer BT.601 weights. Callers
//! own the buffer and keep it alive for the duration of one call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Real;

/// Supported layouts of the raw frame buffer handed to the tracker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit grayscale.
    #[default]
    Luma,
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Abgr,
    /// Packed 5-6-5, little-endian.
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Luma => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Abgr => 4,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("frame buffer holds {got} bytes, expected {expected} for {width}x{height} {format:?}")]
    BufferSize {
        width: usize,
        height: usize,
        format: PixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("frame dimensions {0}x{1} must be nonzero")]
    EmptyFrame(usize, usize),
}

// Y = (76 R + 150 G + 29 B) >> 8, integer BT.601 approximation.
#[inline]
fn luma_rgb(r: u8, g: u8, b: u8) -> u8 {
    ((76 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Borrowed view of one tightly packed camera frame.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    format: PixelFormat,
}

impl<'a> ImageView<'a> {
    /// Wrap a packed pixel buffer; the length must match the declared
    /// dimensions and format exactly.
    pub fn new(
        data: &'a [u8],
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptyFrame(width, height));
        }
        let expected = width * height * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                format,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn from_luma(data: &'a [u8], width: usize, height: usize) -> Result<Self, ImageError> {
        Self::new(data, width, height, PixelFormat::Luma)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Luminance at integer pixel coordinates; `x`/`y` must be in bounds.
    #[inline]
    pub fn luma(&self, x: usize, y: usize) -> u8 {
        debug_assert!(x < self.width && y < self.height);
        let bpp = self.format.bytes_per_pixel();
        let at = (y * self.width + x) * bpp;
        let px = &self.data[at..at + bpp];
        match self.format {
            PixelFormat::Luma => px[0],
            PixelFormat::Rgb | PixelFormat::Rgba => luma_rgb(px[0], px[1], px[2]),
            PixelFormat::Bgr | PixelFormat::Bgra => luma_rgb(px[2], px[1], px[0]),
            PixelFormat::Abgr => luma_rgb(px[3], px[2], px[1]),
            PixelFormat::Rgb565 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                let r = ((((v >> 11) & 0x1f) * 255) / 31) as u8;
                let g = ((((v >> 5) & 0x3f) * 255) / 63) as u8;
                let b = (((v & 0x1f) * 255) / 31) as u8;
                luma_rgb(r, g, b)
            }
        }
    }

    /// Bilinear luminance sample; integer coordinates are pixel centres.
    ///
    /// Returns `None` outside `[0, w-1] x [0, h-1]`.
    pub fn sample_bilinear(&self, x: Real, y: Real) -> Option<Real> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        if x > (self.width - 1) as Real || y > (self.height - 1) as Real {
            return None;
        }
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as Real;
        let fy = y - y0 as Real;
        let p00 = self.luma(x0, y0) as Real;
        let p10 = self.luma(x1, y0) as Real;
        let p01 = self.luma(x0, y1) as Real;
        let p11 = self.luma(x1, y1) as Real;
        let top = p00 + (p10 - p00) * fx;
        let bot = p01 + (p11 - p01) * fx;
        Some(top + (bot - top) * fy)
    }
}
