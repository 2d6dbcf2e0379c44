//! Pixel storage and plane conversions.
//!
//! [`RgbImage`] is the interleaved RGB(A) buffer the engine reads and
//! writes. [`YuvImage`] holds the planar storage used by gain map images
//! and by the YUV entry points, along with the conversions between the two.

use serde::{Deserialize, Serialize};

use crate::color::{ColorPrimaries, TransferCharacteristics};
use crate::error::{try_vec, GainMapError, Result};

/// Content light level information, in nits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLightLevelInformation {
    /// Maximum content light level (brightest pixel).
    pub max_cll: u16,
    /// Maximum picture average light level.
    pub max_pall: u16,
}

/// Interleaved RGB pixel layouts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RgbFormat {
    #[default]
    Rgb,
    Rgba,
}

impl RgbFormat {
    pub fn channel_count(self) -> usize {
        match self {
            RgbFormat::Rgb => 3,
            RgbFormat::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        self == RgbFormat::Rgba
    }
}

/// Sample storage for an [`RgbImage`].
#[derive(Debug, Clone, PartialEq)]
pub enum RgbBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

/// An interleaved RGB(A) image.
///
/// Integer storage holds samples at the given bit depth; `depth == 32`
/// selects float storage with nominal range `[0, 1]`.
#[derive(Debug, Clone)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub format: RgbFormat,
    /// Samples per row. Defaults to `width * channel_count`.
    pub row_samples: usize,
    pub pixels: RgbBuffer,
}

impl RgbImage {
    /// Allocates a zero-filled image.
    ///
    /// Supported depths: 8 (u8 storage), 10/12/16 (u16 storage), 32 (f32
    /// storage).
    pub fn new(width: u32, height: u32, depth: u8, format: RgbFormat) -> Result<Self> {
        let row_samples = width as usize * format.channel_count();
        let len = row_samples * height as usize;
        let pixels = match depth {
            8 => RgbBuffer::U8(try_vec(len)?),
            10 | 12 | 16 => RgbBuffer::U16(try_vec(len)?),
            32 => RgbBuffer::F32(try_vec(len)?),
            _ => {
                return Err(GainMapError::unsupported(format!(
                    "unsupported RGB depth {depth}"
                )))
            }
        };
        Ok(Self {
            width,
            height,
            depth,
            format,
            row_samples,
            pixels,
        })
    }

    pub fn is_float(&self) -> bool {
        matches!(self.pixels, RgbBuffer::F32(_))
    }

    /// Largest integer sample value; `1.0` for float storage.
    fn max_value(&self) -> f32 {
        if self.is_float() {
            1.0
        } else {
            ((1u32 << self.depth) - 1) as f32
        }
    }

    fn sample_index(&self, x: u32, y: u32) -> usize {
        y as usize * self.row_samples + x as usize * self.format.channel_count()
    }

    /// Reads a pixel as normalized RGBA. Alpha is `1.0` for layouts
    /// without an alpha channel.
    pub fn get_pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let idx = self.sample_index(x, y);
        let channels = self.format.channel_count();
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        match &self.pixels {
            RgbBuffer::U8(buf) => {
                let max = self.max_value();
                for c in 0..channels {
                    rgba[c] = f32::from(buf[idx + c]) / max;
                }
            }
            RgbBuffer::U16(buf) => {
                let max = self.max_value();
                for c in 0..channels {
                    rgba[c] = f32::from(buf[idx + c]) / max;
                }
            }
            RgbBuffer::F32(buf) => {
                rgba[..channels].copy_from_slice(&buf[idx..idx + channels]);
            }
        }
        rgba
    }

    /// Writes a normalized RGBA pixel. Integer storage quantizes with
    /// rounding; values outside `[0, 1]` are clamped before quantization.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let idx = self.sample_index(x, y);
        let channels = self.format.channel_count();
        let max = self.max_value();
        match &mut self.pixels {
            RgbBuffer::U8(buf) => {
                for c in 0..channels {
                    buf[idx + c] = (rgba[c].clamp(0.0, 1.0) * max).round() as u8;
                }
            }
            RgbBuffer::U16(buf) => {
                for c in 0..channels {
                    buf[idx + c] = (rgba[c].clamp(0.0, 1.0) * max).round() as u16;
                }
            }
            RgbBuffer::F32(buf) => {
                buf[idx..idx + channels].copy_from_slice(&rgba[..channels]);
            }
        }
    }

    /// Whether `other` shares this image's exact memory layout, making a
    /// verbatim buffer copy valid.
    pub fn matches_layout(&self, other: &RgbImage) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.depth == other.depth
            && self.format == other.format
            && self.row_samples == other.row_samples
            && std::mem::discriminant(&self.pixels) == std::mem::discriminant(&other.pixels)
    }
}

/// YUV plane configurations supported for gain map images.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YuvFormat {
    #[default]
    Yuv444,
    Yuv420,
    /// Single-channel (luma only) storage.
    Yuv400,
}

impl YuvFormat {
    pub fn plane_count(self) -> usize {
        match self {
            YuvFormat::Yuv400 => 1,
            _ => 3,
        }
    }
}

/// Sample range of YUV data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YuvRange {
    Limited,
    #[default]
    Full,
}

/// Matrix coefficients relating YUV samples to RGB.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixCoefficients {
    /// Direct GBR mapping, no matrix.
    Identity,
    #[default]
    Bt601,
    Bt709,
    Bt2020Ncl,
    Unspecified,
}

impl MatrixCoefficients {
    fn kr_kb(self) -> Result<(f32, f32)> {
        match self {
            MatrixCoefficients::Bt601 => Ok((0.299, 0.114)),
            MatrixCoefficients::Bt709 => Ok((0.2126, 0.0722)),
            MatrixCoefficients::Bt2020Ncl => Ok((0.2627, 0.0593)),
            MatrixCoefficients::Identity | MatrixCoefficients::Unspecified => {
                Err(GainMapError::unsupported(format!(
                    "no YUV coefficients for {self:?}"
                )))
            }
        }
    }
}

/// A planar YUV image with the color descriptors the engine's YUV entry
/// points need.
#[derive(Debug, Default, Clone)]
pub struct YuvImage {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub format: YuvFormat,
    pub yuv_range: YuvRange,
    pub matrix_coefficients: MatrixCoefficients,
    /// One plane per [`YuvFormat::plane_count`], stored at the plane's own
    /// dimensions.
    pub planes: Vec<Vec<u16>>,

    pub color_primaries: ColorPrimaries,
    pub transfer_characteristics: TransferCharacteristics,
    pub icc: Vec<u8>,
    pub clli: ContentLightLevelInformation,
}

impl YuvImage {
    /// Allocates zero-filled planes. Supported depths: 8, 10, 12.
    pub fn new(width: u32, height: u32, depth: u8, format: YuvFormat) -> Result<Self> {
        if !matches!(depth, 8 | 10 | 12) {
            return Err(GainMapError::unsupported(format!(
                "unsupported YUV depth {depth}"
            )));
        }
        let mut image = Self {
            width,
            height,
            depth,
            format,
            ..Self::default()
        };
        for plane in 0..format.plane_count() {
            let (w, h) = image.plane_dims(plane);
            image.planes.push(try_vec(w as usize * h as usize)?);
        }
        Ok(image)
    }

    pub fn max_value(&self) -> f32 {
        ((1u32 << self.depth) - 1) as f32
    }

    fn plane_dims(&self, plane: usize) -> (u32, u32) {
        if plane > 0 && self.format == YuvFormat::Yuv420 {
            (self.width.div_ceil(2), self.height.div_ceil(2))
        } else {
            (self.width, self.height)
        }
    }

    fn luma_to_unit(&self, code: u16) -> f32 {
        match self.yuv_range {
            YuvRange::Full => f32::from(code) / self.max_value(),
            YuvRange::Limited => {
                let shift = 1 << (self.depth - 8);
                (f32::from(code) - (16 * shift) as f32) / ((219 * shift) as f32)
            }
        }
    }

    fn chroma_to_unit(&self, code: u16) -> f32 {
        match self.yuv_range {
            YuvRange::Full => f32::from(code) / self.max_value() - 0.5,
            YuvRange::Limited => {
                let shift = 1 << (self.depth - 8);
                (f32::from(code) - (128 * shift) as f32) / ((224 * shift) as f32)
            }
        }
    }

    fn luma_from_unit(&self, v: f32) -> u16 {
        let code = match self.yuv_range {
            YuvRange::Full => v * self.max_value(),
            YuvRange::Limited => {
                let shift = 1 << (self.depth - 8);
                (16 * shift) as f32 + v * (219 * shift) as f32
            }
        };
        code.round().clamp(0.0, self.max_value()) as u16
    }

    fn chroma_from_unit(&self, v: f32) -> u16 {
        let code = match self.yuv_range {
            YuvRange::Full => (v + 0.5) * self.max_value(),
            YuvRange::Limited => {
                let shift = 1 << (self.depth - 8);
                (128 * shift) as f32 + v * (224 * shift) as f32
            }
        };
        code.round().clamp(0.0, self.max_value()) as u16
    }

    fn chroma_index(&self, x: u32, y: u32) -> usize {
        let (cw, _) = self.plane_dims(1);
        if self.format == YuvFormat::Yuv420 {
            (y / 2) as usize * cw as usize + (x / 2) as usize
        } else {
            y as usize * cw as usize + x as usize
        }
    }

    /// Converts to a float RGB image.
    ///
    /// `Yuv400` replicates luma into all three channels. `Identity`
    /// coefficients read the planes directly as G, B, R.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        let mut rgb = RgbImage::new(self.width, self.height, 32, RgbFormat::Rgb)?;
        let row = self.width as usize;

        if self.format == YuvFormat::Yuv400 {
            for y in 0..self.height {
                for x in 0..self.width {
                    let idx = y as usize * row + x as usize;
                    let v = self.luma_to_unit(self.planes[0][idx]).clamp(0.0, 1.0);
                    rgb.set_pixel(x, y, [v, v, v, 1.0]);
                }
            }
            return Ok(rgb);
        }

        if self.matrix_coefficients == MatrixCoefficients::Identity {
            for y in 0..self.height {
                for x in 0..self.width {
                    let idx = y as usize * row + x as usize;
                    let ci = self.chroma_index(x, y);
                    let g = self.luma_to_unit(self.planes[0][idx]);
                    let b = self.luma_to_unit(self.planes[1][ci]);
                    let r = self.luma_to_unit(self.planes[2][ci]);
                    rgb.set_pixel(x, y, [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0), 1.0]);
                }
            }
            return Ok(rgb);
        }

        let (kr, kb) = self.matrix_coefficients.kr_kb()?;
        let kg = 1.0 - kr - kb;
        for y in 0..self.height {
            for x in 0..self.width {
                let idx = y as usize * row + x as usize;
                let ci = self.chroma_index(x, y);
                let luma = self.luma_to_unit(self.planes[0][idx]);
                let cb = self.chroma_to_unit(self.planes[1][ci]);
                let cr = self.chroma_to_unit(self.planes[2][ci]);
                let r = luma + 2.0 * (1.0 - kr) * cr;
                let b = luma + 2.0 * (1.0 - kb) * cb;
                let g = (luma - kr * r - kb * b) / kg;
                rgb.set_pixel(x, y, [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0), 1.0]);
            }
        }
        Ok(rgb)
    }

    /// Fills the planes from an RGB image of the same dimensions.
    ///
    /// `Yuv420` chroma is box-averaged over each 2x2 block.
    pub fn set_from_rgb(&mut self, rgb: &RgbImage) -> Result<()> {
        if rgb.width != self.width || rgb.height != self.height {
            return Err(GainMapError::invalid(format!(
                "RGB {}x{} does not match YUV {}x{}",
                rgb.width, rgb.height, self.width, self.height
            )));
        }
        let row = self.width as usize;

        if self.format == YuvFormat::Yuv400 {
            for y in 0..self.height {
                for x in 0..self.width {
                    let px = rgb.get_pixel(x, y);
                    let code = self.luma_from_unit(px[0]);
                    self.planes[0][y as usize * row + x as usize] = code;
                }
            }
            return Ok(());
        }

        if self.matrix_coefficients == MatrixCoefficients::Identity {
            for y in 0..self.height {
                for x in 0..self.width {
                    let px = rgb.get_pixel(x, y);
                    let codes = [
                        self.luma_from_unit(px[1]),
                        self.luma_from_unit(px[2]),
                        self.luma_from_unit(px[0]),
                    ];
                    let ci = self.chroma_index(x, y);
                    self.planes[0][y as usize * row + x as usize] = codes[0];
                    self.planes[1][ci] = codes[1];
                    self.planes[2][ci] = codes[2];
                }
            }
            return Ok(());
        }

        let (kr, kb) = self.matrix_coefficients.kr_kb()?;
        let (cw, ch) = self.plane_dims(1);
        let mut cb_acc: Vec<f32> = try_vec(cw as usize * ch as usize)?;
        let mut cr_acc: Vec<f32> = try_vec(cw as usize * ch as usize)?;
        let mut counts: Vec<u16> = try_vec(cw as usize * ch as usize)?;

        for y in 0..self.height {
            for x in 0..self.width {
                let px = rgb.get_pixel(x, y);
                let luma = kr * px[0] + (1.0 - kr - kb) * px[1] + kb * px[2];
                let code = self.luma_from_unit(luma);
                self.planes[0][y as usize * row + x as usize] = code;
                let ci = self.chroma_index(x, y);
                cb_acc[ci] += (px[2] - luma) / (2.0 * (1.0 - kb));
                cr_acc[ci] += (px[0] - luma) / (2.0 * (1.0 - kr));
                counts[ci] += 1;
            }
        }
        for i in 0..cb_acc.len() {
            let n = f32::from(counts[i].max(1));
            let cb = self.chroma_from_unit(cb_acc[i] / n);
            let cr = self.chroma_from_unit(cr_acc[i] / n);
            self.planes[1][i] = cb;
            self.planes[2][i] = cr;
        }
        Ok(())
    }

    /// Returns a bilinearly rescaled copy at the given dimensions.
    pub fn rescaled(&self, width: u32, height: u32) -> Result<YuvImage> {
        if width == 0 || height == 0 {
            return Err(GainMapError::invalid("rescale target has a zero dimension"));
        }
        let mut out = YuvImage::new(width, height, self.depth, self.format)?;
        out.yuv_range = self.yuv_range;
        out.matrix_coefficients = self.matrix_coefficients;
        out.color_primaries = self.color_primaries;
        out.transfer_characteristics = self.transfer_characteristics;
        out.icc = self.icc.clone();
        out.clli = self.clli;
        for plane in 0..self.format.plane_count() {
            let (src_w, src_h) = self.plane_dims(plane);
            let (dst_w, dst_h) = out.plane_dims(plane);
            let scale_x = src_w as f32 / dst_w as f32;
            let scale_y = src_h as f32 / dst_h as f32;
            for y in 0..dst_h {
                for x in 0..dst_w {
                    let v = sample_plane_bilinear(
                        &self.planes[plane],
                        src_w,
                        src_h,
                        (x as f32 + 0.5) * scale_x - 0.5,
                        (y as f32 + 0.5) * scale_y - 0.5,
                    );
                    out.planes[plane][y as usize * dst_w as usize + x as usize] =
                        v.round().clamp(0.0, self.max_value()) as u16;
                }
            }
        }
        Ok(out)
    }
}

/// Samples a plane with bilinear interpolation.
fn sample_plane_bilinear(plane: &[u16], width: u32, height: u32, x: f32, y: f32) -> f32 {
    let x = x.max(0.0);
    let y = y.max(0.0);
    let x0 = (x.floor() as u32).min(width - 1);
    let y0 = (y.floor() as u32).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let v00 = f32::from(plane[(y0 * width + x0) as usize]);
    let v10 = f32::from(plane[(y0 * width + x1) as usize]);
    let v01 = f32::from(plane[(y1 * width + x0) as usize]);
    let v11 = f32::from(plane[(y1 * width + x1) as usize]);

    let v0 = v00 * (1.0 - fx) + v10 * fx;
    let v1 = v01 * (1.0 - fx) + v11 * fx;

    v0 * (1.0 - fy) + v1 * fy
}
