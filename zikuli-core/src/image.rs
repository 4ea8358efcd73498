//! Owned pixel buffers and format conversion.
//!
//! [`Image`] is always backed by a `Vec<u8>` it owns outright -- nothing
//! aliases the display adapter's reply buffer or another `Image`'s
//! lifetime. Capture produces [`PixelFormat::Bgra`] by convention (the
//! native X11 `Z_PIXMAP` layout); conversion to other formats is used only
//! at the PNG/OCR boundary.

use serde::Serialize;

use crate::error::ZikuliError;
use crate::geometry::Rectangle;

/// Supported pixel layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Bgr,
    Rgb,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => 4,
            PixelFormat::Bgr | PixelFormat::Rgb => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    fn channel_count(self) -> usize {
        self.bytes_per_pixel()
    }
}

/// An owned, contiguous pixel buffer.
///
/// Invariants (checked by [`Image::new`]):
/// - `stride >= width * format.bytes_per_pixel()`
/// - `data.len() >= stride * height`
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl Image {
    /// Build an image with stride equal to the tightly-packed row size.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self, ZikuliError> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::with_stride(data, width, height, stride, format)
    }

    /// Build an image with an explicit stride (rows may carry padding, as
    /// GPU-mapped capture surfaces often do).
    pub fn with_stride(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self, ZikuliError> {
        let min_stride = width as usize * format.bytes_per_pixel();
        if stride < min_stride {
            return Err(ZikuliError::InvalidArgument {
                argument: "stride".into(),
                detail: format!("stride {stride} smaller than width*bpp {min_stride}"),
            });
        }
        let needed = stride.saturating_mul(height as usize);
        if data.len() < needed {
            return Err(ZikuliError::IncompleteData {
                expected: needed,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width, self.height)
    }

    fn in_bounds(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Byte offset of pixel `(x, y)`'s first channel.
    fn pixel_offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize * self.format.bytes_per_pixel()
    }

    /// Raw channel bytes for pixel `(x, y)`. Panics if out of bounds --
    /// callers that accept untrusted coordinates should check
    /// [`Image::bounds`] first.
    pub fn get_pixel(&self, x: u32, y: u32) -> &[u8] {
        assert!(self.in_bounds(x, y), "pixel ({x},{y}) out of bounds for {}x{}", self.width, self.height);
        let off = self.pixel_offset(x, y);
        &self.data[off..off + self.format.bytes_per_pixel()]
    }

    pub fn try_get_pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if self.in_bounds(x, y) {
            Some(self.get_pixel(x, y))
        } else {
            None
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, channels: &[u8]) {
        assert!(self.in_bounds(x, y));
        let bpp = self.format.bytes_per_pixel();
        assert_eq!(channels.len(), bpp);
        let off = self.pixel_offset(x, y);
        self.data[off..off + bpp].copy_from_slice(channels);
    }

    /// Copy the portion of `self` covered by `rect` into a freshly
    /// allocated `Image`. Never aliases `self`'s buffer.
    ///
    /// `sub(I, r).get_pixel(x, y) == I.get_pixel(r.x+x, r.y+y)` for every
    /// `(x, y)` inside `r ∩ I.bounds()`.
    pub fn sub_image(&self, rect: Rectangle) -> Result<Image, ZikuliError> {
        let clipped = rect.intersection(&self.bounds());
        if clipped.is_empty() {
            return Err(ZikuliError::InvalidArgument {
                argument: "rect".into(),
                detail: format!("{rect:?} does not intersect image bounds {:?}", self.bounds()),
            });
        }

        let bpp = self.format.bytes_per_pixel();
        let row_bytes = clipped.w as usize * bpp;
        let mut out = Vec::with_capacity(row_bytes * clipped.h as usize);

        for row in 0..clipped.h {
            let src_y = (clipped.y as u32) + row;
            let src_off = self.pixel_offset(clipped.x as u32, src_y);
            out.extend_from_slice(&self.data[src_off..src_off + row_bytes]);
        }

        Image::new(out, clipped.w, clipped.h, self.format)
    }

    /// Convert to another format, reusing the backing buffer in place
    /// when the source and destination have the same byte width (a
    /// channel permutation such as BGRA<->RGBA).
    pub fn convert(&self, target: PixelFormat) -> Image {
        if target == self.format {
            return self.clone();
        }

        let bpp_in = self.format.bytes_per_pixel();
        let bpp_out = target.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * bpp_out);

        for y in 0..self.height {
            for x in 0..self.width {
                let px = self.get_pixel(x, y);
                let converted = convert_pixel(px, self.format, target);
                out.extend_from_slice(&converted);
            }
        }

        Image::new(out, self.width, self.height, target)
            .expect("converted buffer sized exactly to width*height*bpp")
    }
}

/// Extract `(r, g, b, a)` from a single pixel's raw channel bytes,
/// regardless of source layout.
fn to_rgba_components(px: &[u8], fmt: PixelFormat) -> (u8, u8, u8, u8) {
    match fmt {
        PixelFormat::Bgra => (px[2], px[1], px[0], px[3]),
        PixelFormat::Rgba => (px[0], px[1], px[2], px[3]),
        PixelFormat::Bgr => (px[2], px[1], px[0], 255),
        PixelFormat::Rgb => (px[0], px[1], px[2], 255),
        PixelFormat::Gray8 => (px[0], px[0], px[0], 255),
    }
}

fn convert_pixel(px: &[u8], from: PixelFormat, to: PixelFormat) -> Vec<u8> {
    let (r, g, b, a) = to_rgba_components(px, from);
    match to {
        PixelFormat::Bgra => vec![b, g, r, a],
        PixelFormat::Rgba => vec![r, g, b, a],
        PixelFormat::Bgr => vec![b, g, r],
        PixelFormat::Rgb => vec![r, g, b],
        PixelFormat::Gray8 => {
            // ITU-R BT.601 luma weights, matching SikuliX's grayscale path.
            let y = (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round();
            vec![y.clamp(0.0, 255.0) as u8]
        }
    }
}

/// Per-channel mean and standard deviation over all pixels, used by the
/// plain-color/black special cases in [`crate::matcher`].
pub fn channel_stats(img: &Image) -> (Vec<f64>, Vec<f64>) {
    let channels = img.format.channel_count();
    let n = (img.width() as u64 * img.height() as u64).max(1) as f64;

    let mut sums = vec![0.0f64; channels];
    for y in 0..img.height() {
        for x in 0..img.width() {
            let px = img.get_pixel(x, y);
            for c in 0..channels {
                sums[c] += px[c] as f64;
            }
        }
    }
    let means: Vec<f64> = sums.iter().map(|s| s / n).collect();

    let mut var_sums = vec![0.0f64; channels];
    for y in 0..img.height() {
        for x in 0..img.width() {
            let px = img.get_pixel(x, y);
            for c in 0..channels {
                let d = px[c] as f64 - means[c];
                var_sums[c] += d * d;
            }
        }
    }
    let stddevs: Vec<f64> = var_sums.iter().map(|v| (v / n).sqrt()).collect();

    (means, stddevs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Image {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..(w * h) {
            data.extend_from_slice(&rgba);
        }
        Image::new(data, w, h, PixelFormat::Rgba).unwrap()
    }

    #[test]
    fn new_rejects_undersized_buffer() {
        let err = Image::new(vec![0; 4], 10, 10, PixelFormat::Rgba).unwrap_err();
        assert!(matches!(err, ZikuliError::IncompleteData { .. }));
    }

    #[test]
    fn sub_image_matches_source_pixels() {
        let img = solid(20, 20, [10, 20, 30, 255]);
        let mut full = img.clone();
        full.set_pixel(5, 5, &[1, 2, 3, 255]);

        let sub = full.sub_image(Rectangle::new(3, 3, 10, 10)).unwrap();
        for y in 0..10u32 {
            for x in 0..10u32 {
                assert_eq!(sub.get_pixel(x, y), full.get_pixel(3 + x, 3 + y));
            }
        }
    }

    #[test]
    fn bgra_rgba_roundtrip_is_identity() {
        let img = solid(4, 4, [10, 20, 30, 40]);
        let bgra = img.convert(PixelFormat::Bgra);
        let back = bgra.convert(PixelFormat::Rgba);
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn stride_padding_is_respected() {
        let w = 3u32;
        let h = 2u32;
        let stride = 16usize; // generous padding
        let mut data = vec![0u8; stride * h as usize];
        // Row 1, pixel 0 at offset stride + 0
        data[stride] = 9;
        let img = Image::with_stride(data, w, h, stride, PixelFormat::Gray8).unwrap();
        assert_eq!(img.get_pixel(0, 1)[0], 9);
    }
}
