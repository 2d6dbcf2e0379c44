//! Gain map synthesis from a base/alternate image pair.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::color::{apply_matrix, conversion_matrix, ColorPrimaries, Mat3, TransferCharacteristics};
use crate::error::{try_vec, GainMapError, Result};
use crate::fraction::{SignedFraction, UnsignedFraction};
use crate::gainmap::metadata::{GainMap, GainMapMetadata};
use crate::gainmap::range::find_min_max_without_outliers;
use crate::image::{RgbFormat, RgbImage, YuvFormat, YuvImage};

/// Guard against `log2(0)` when a ratio collapses to zero or below.
const LOG_EPSILON: f32 = 1e-10;
/// Threshold below which a negative channel minimum triggers offset
/// inflation.
const NEGATIVE_EPSILON: f32 = 1e-10;
/// Upper bound on an inflated offset, keeping the partial-application
/// artifact acceptable.
const MAX_INFLATED_OFFSET: f32 = 0.1;

/// Tuning inputs for gain map computation.
///
/// The headrooms are recorded in the produced metadata and define which
/// display headrooms blend between the two renditions. `-1.0` means
/// unset; computation fails with `InvalidArgument` until both are given
/// non-negative finite values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputeOptions {
    pub base_hdr_headroom: f64,
    pub alternate_hdr_headroom: f64,
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self {
            base_hdr_headroom: -1.0,
            alternate_hdr_headroom: -1.0,
        }
    }
}

impl ComputeOptions {
    pub fn new(base_hdr_headroom: f64, alternate_hdr_headroom: f64) -> Self {
        Self {
            base_hdr_headroom,
            alternate_hdr_headroom,
        }
    }
}

/// Picks the RGB primary set the ratio math runs in: whichever of the two
/// introduces the least negative excursion when the other is converted
/// into it, i.e. the superset color volume.
pub fn choose_math_color_space(
    base: ColorPrimaries,
    alternate: ColorPrimaries,
) -> Result<ColorPrimaries> {
    if base == alternate {
        return Ok(base);
    }
    let base_to_alt = conversion_matrix(base, alternate).ok_or_else(|| {
        GainMapError::unsupported(format!("no conversion from {base:?} to {alternate:?}"))
    })?;
    let alt_to_base = conversion_matrix(alternate, base).ok_or_else(|| {
        GainMapError::unsupported(format!("no conversion from {alternate:?} to {base:?}"))
    })?;
    let min_in_base = unit_color_minimum(&alt_to_base);
    let min_in_alt = unit_color_minimum(&base_to_alt);
    if min_in_alt > min_in_base {
        Ok(alternate)
    } else {
        Ok(base)
    }
}

/// Smallest channel value produced by converting the source space's pure
/// unit colors through `matrix`.
fn unit_color_minimum(matrix: &Mat3) -> f32 {
    let mut min = f32::INFINITY;
    for unit in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
        for channel in apply_matrix(unit, matrix) {
            min = min.min(channel);
        }
    }
    min
}

/// Synthesizes `map` from a base/alternate RGB pair.
///
/// `map.image` must be preconfigured with the target dimensions, depth,
/// and YUV format; the computed gain map is materialized at the input
/// resolution and rescaled to the requested size at the end.
pub fn compute_rgb(
    base: &RgbImage,
    base_primaries: ColorPrimaries,
    base_transfer: TransferCharacteristics,
    alternate: &RgbImage,
    alternate_primaries: ColorPrimaries,
    alternate_transfer: TransferCharacteristics,
    map: &mut GainMap,
    options: &ComputeOptions,
) -> Result<()> {
    if base.width != alternate.width || base.height != alternate.height {
        return Err(GainMapError::invalid(format!(
            "base {}x{} and alternate {}x{} differ",
            base.width, base.height, alternate.width, alternate.height
        )));
    }
    if base.width == 0 || base.height == 0 {
        return Err(GainMapError::invalid("input images are empty"));
    }
    if map.image.width == 0 || map.image.height == 0 || map.image.depth == 0 {
        return Err(GainMapError::invalid(
            "gain map image must be preconfigured with dimensions and depth",
        ));
    }
    let requested = map.image.clone();

    let width = base.width;
    let height = base.height;
    let pixel_count = width as usize * height as usize;

    let math_primaries = choose_math_color_space(base_primaries, alternate_primaries)?;
    let use_base_color_space = math_primaries == base_primaries;
    map.metadata = GainMapMetadata {
        use_base_color_space,
        ..GainMapMetadata::default()
    };

    let base_to_linear = base_transfer.to_linear()?;
    let alternate_to_linear = alternate_transfer.to_linear()?;

    // Working copies of the offsets; inflation below may raise them.
    let mut base_offset = [map.metadata.base_offset[0].as_f32(); 3];
    let mut alternate_offset = [map.metadata.alternate_offset[0].as_f32(); 3];

    // When the primaries differ, one side is rotated into the math space.
    // Its negative excursions would make the ratio's numerator or
    // denominator go negative, so the converted side's offset absorbs the
    // channel minimum, up to a cap.
    let rotate = if base_primaries == alternate_primaries {
        None
    } else if use_base_color_space {
        conversion_matrix(alternate_primaries, base_primaries)
    } else {
        conversion_matrix(base_primaries, alternate_primaries)
    };
    if let Some(matrix) = &rotate {
        let (converted, converted_to_linear): (&RgbImage, fn(f32) -> f32) = if use_base_color_space
        {
            (alternate, alternate_to_linear)
        } else {
            (base, base_to_linear)
        };
        let mut channel_min = [f32::INFINITY; 3];
        for y in 0..height {
            for x in 0..width {
                let px = converted.get_pixel(x, y);
                let linear = apply_matrix(
                    [
                        converted_to_linear(px[0]),
                        converted_to_linear(px[1]),
                        converted_to_linear(px[2]),
                    ],
                    matrix,
                );
                for c in 0..3 {
                    channel_min[c] = channel_min[c].min(linear[c]);
                }
            }
        }
        let inflated = if use_base_color_space {
            &mut alternate_offset
        } else {
            &mut base_offset
        };
        for c in 0..3 {
            if channel_min[c] < -NEGATIVE_EPSILON {
                inflated[c] = (inflated[c] - channel_min[c]).min(MAX_INFLATED_OFFSET);
                debug!(
                    "channel {c} reaches {} after conversion, offset inflated to {}",
                    channel_min[c], inflated[c]
                );
            }
        }
    }

    let num_channels = if requested.format == YuvFormat::Yuv400 {
        1
    } else {
        3
    };
    let mut gain_planes: Vec<Vec<f32>> = Vec::with_capacity(num_channels);
    for _ in 0..num_channels {
        gain_planes.push(try_vec(pixel_count)?);
    }
    let luma = if num_channels == 1 {
        Some(math_primaries.luma_coefficients().ok_or_else(|| {
            GainMapError::unsupported(format!("no luma coefficients for {math_primaries:?}"))
        })?)
    } else {
        None
    };

    let mut base_max = 0.0f32;
    let mut alternate_max = 0.0f32;
    for y in 0..height {
        for x in 0..width {
            let base_px = base.get_pixel(x, y);
            let alternate_px = alternate.get_pixel(x, y);
            let mut base_linear = [
                base_to_linear(base_px[0]),
                base_to_linear(base_px[1]),
                base_to_linear(base_px[2]),
            ];
            let mut alternate_linear = [
                alternate_to_linear(alternate_px[0]),
                alternate_to_linear(alternate_px[1]),
                alternate_to_linear(alternate_px[2]),
            ];
            if let Some(matrix) = &rotate {
                if use_base_color_space {
                    alternate_linear = apply_matrix(alternate_linear, matrix);
                } else {
                    base_linear = apply_matrix(base_linear, matrix);
                }
            }
            for c in 0..3 {
                base_max = base_max.max(base_linear[c]);
                alternate_max = alternate_max.max(alternate_linear[c]);
            }

            let idx = y as usize * width as usize + x as usize;
            if let Some(luma) = &luma {
                let base_value = luma[0] * base_linear[0]
                    + luma[1] * base_linear[1]
                    + luma[2] * base_linear[2];
                let alternate_value = luma[0] * alternate_linear[0]
                    + luma[1] * alternate_linear[1]
                    + luma[2] * alternate_linear[2];
                let ratio =
                    (alternate_value + alternate_offset[0]) / (base_value + base_offset[0]);
                gain_planes[0][idx] = ratio.max(LOG_EPSILON).log2();
            } else {
                for c in 0..3 {
                    let ratio =
                        (alternate_linear[c] + alternate_offset[c]) / (base_linear[c] + base_offset[c]);
                    gain_planes[c][idx] = ratio.max(LOG_EPSILON).log2();
                }
            }
        }
    }
    debug!("linear maxima: base {base_max}, alternate {alternate_max}");

    map.metadata.base_hdr_headroom = UnsignedFraction::from_f64(options.base_hdr_headroom)?;
    map.metadata.alternate_hdr_headroom =
        UnsignedFraction::from_f64(options.alternate_hdr_headroom)?;

    // The stored values must always encode log2(HDR/SDR). If the
    // alternate rendition is the darker one, the ratios computed above
    // point the other way.
    let base_headroom = map.metadata.base_hdr_headroom;
    let alternate_headroom = map.metadata.alternate_hdr_headroom;
    if u64::from(alternate_headroom.n) * u64::from(base_headroom.d)
        < u64::from(base_headroom.n) * u64::from(alternate_headroom.d)
    {
        for plane in &mut gain_planes {
            for v in plane.iter_mut() {
                *v = -*v;
            }
        }
    }

    let mut log_min = [0.0f32; 3];
    let mut log_max = [0.0f32; 3];
    for c in 0..num_channels {
        let (range_min, range_max) = find_min_max_without_outliers(&gain_planes[c])?;
        log_min[c] = range_min;
        log_max[c] = range_max;
    }
    for c in 0..3 {
        let source = if num_channels == 1 { 0 } else { c };
        map.metadata.gain_map_min[c] = SignedFraction::from_f64(f64::from(log_min[source]))?;
        map.metadata.gain_map_max[c] = SignedFraction::from_f64(f64::from(log_max[source]))?;
        map.metadata.base_offset[c] = SignedFraction::from_f64(f64::from(base_offset[source]))?;
        map.metadata.alternate_offset[c] =
            SignedFraction::from_f64(f64::from(alternate_offset[source]))?;
    }

    for c in 0..num_channels {
        let range = (log_max[c] - log_min[c]).max(0.0);
        let gamma = map.metadata.gain_map_gamma[c].as_f32();
        if range <= 0.0 {
            gain_planes[c].fill(0.0);
        } else {
            for v in gain_planes[c].iter_mut() {
                *v = ((*v - log_min[c]) / range).clamp(0.0, 1.0).powf(gamma);
            }
        }
    }

    let mut gain_rgb = RgbImage::new(width, height, 32, RgbFormat::Rgb)?;
    for y in 0..height {
        for x in 0..width {
            let idx = y as usize * width as usize + x as usize;
            let rgb = if num_channels == 1 {
                let v = gain_planes[0][idx];
                [v, v, v]
            } else {
                [gain_planes[0][idx], gain_planes[1][idx], gain_planes[2][idx]]
            };
            gain_rgb.set_pixel(x, y, [rgb[0], rgb[1], rgb[2], 1.0]);
        }
    }

    let mut full = YuvImage::new(width, height, requested.depth, requested.format)?;
    full.yuv_range = requested.yuv_range;
    full.matrix_coefficients = requested.matrix_coefficients;
    full.color_primaries = requested.color_primaries;
    full.transfer_characteristics = requested.transfer_characteristics;
    full.set_from_rgb(&gain_rgb)?;

    map.image = if requested.width != width || requested.height != height {
        full.rescaled(requested.width, requested.height)?
    } else {
        full
    };
    Ok(())
}

/// YUV entry point: converts both inputs to RGB, computes the gain map,
/// then records the alternate rendition's descriptors on the map.
///
/// Inputs carrying an ICC profile are refused.
pub fn compute_image(
    base: &YuvImage,
    alternate: &YuvImage,
    map: &mut GainMap,
    options: &ComputeOptions,
) -> Result<()> {
    if !base.icc.is_empty() || !alternate.icc.is_empty() {
        return Err(GainMapError::unsupported(
            "ICC profiles are not supported on gain map inputs",
        ));
    }
    let base_rgb = base.to_rgb()?;
    let alternate_rgb = alternate.to_rgb()?;
    compute_rgb(
        &base_rgb,
        base.color_primaries,
        base.transfer_characteristics,
        &alternate_rgb,
        alternate.color_primaries,
        alternate.transfer_characteristics,
        map,
        options,
    )?;

    map.alt_icc = alternate.icc.clone();
    map.alt_color_primaries = alternate.color_primaries;
    map.alt_transfer_characteristics = alternate.transfer_characteristics;
    map.alt_matrix_coefficients = alternate.matrix_coefficients;
    map.alt_yuv_range = alternate.yuv_range;
    map.alt_plane_depth = alternate.depth;
    map.alt_plane_count = alternate.format.plane_count() as u8;
    map.alt_clli = alternate.clli;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    fn gray_image(width: u32, height: u32, value: f32) -> RgbImage {
        let mut image = RgbImage::new(width, height, 32, RgbFormat::Rgb).unwrap();
        for y in 0..height {
            for x in 0..width {
                image.set_pixel(x, y, [value, value, value, 1.0]);
            }
        }
        image
    }

    fn preconfigured_map(width: u32, height: u32, format: YuvFormat) -> GainMap {
        GainMap {
            image: YuvImage::new(width, height, 8, format).unwrap(),
            ..GainMap::default()
        }
    }

    #[test]
    fn test_choose_math_color_space_same() {
        let chosen =
            choose_math_color_space(ColorPrimaries::DisplayP3, ColorPrimaries::DisplayP3).unwrap();
        assert_eq!(chosen, ColorPrimaries::DisplayP3);
    }

    #[test]
    fn test_choose_math_color_space_picks_superset() {
        // Display P3 contains sRGB, so P3 wins from either argument slot.
        assert_eq!(
            choose_math_color_space(ColorPrimaries::Srgb, ColorPrimaries::DisplayP3).unwrap(),
            ColorPrimaries::DisplayP3
        );
        assert_eq!(
            choose_math_color_space(ColorPrimaries::DisplayP3, ColorPrimaries::Srgb).unwrap(),
            ColorPrimaries::DisplayP3
        );
        assert_eq!(
            choose_math_color_space(ColorPrimaries::Srgb, ColorPrimaries::Bt2020).unwrap(),
            ColorPrimaries::Bt2020
        );
    }

    #[test]
    fn test_choose_math_color_space_unknown_pair() {
        assert!(
            choose_math_color_space(ColorPrimaries::Unspecified, ColorPrimaries::Srgb).is_err()
        );
    }

    #[test]
    fn test_compute_stores_log_ratio() {
        // base 0.5, alternate 1.0, both linear:
        // log2((1 + 1/64) / (0.5 + 1/64)) = 0.9779 per channel.
        let base = gray_image(4, 4, 0.5);
        let alternate = gray_image(4, 4, 1.0);
        let mut map = preconfigured_map(4, 4, YuvFormat::Yuv444);

        compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(0.0, 1.0),
        )
        .unwrap();

        assert!(map.metadata.use_base_color_space);
        assert_eq!(map.metadata.base_hdr_headroom.as_f64(), 0.0);
        assert_eq!(map.metadata.alternate_hdr_headroom.as_f64(), 1.0);
        for c in 0..3 {
            assert!(
                approx_eq(map.metadata.gain_map_max[c].as_f64(), 0.9779, 1e-3),
                "channel {c}: {}",
                map.metadata.gain_map_max[c].as_f64()
            );
        }
        assert!(map.metadata.validate().is_ok());
    }

    #[test]
    fn test_compute_unset_headrooms_rejected() {
        let base = gray_image(2, 2, 0.5);
        let alternate = gray_image(2, 2, 1.0);
        let mut map = preconfigured_map(2, 2, YuvFormat::Yuv444);
        let result = compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::default(),
        );
        assert!(matches!(result, Err(GainMapError::InvalidArgument(_))));
    }

    #[test]
    fn test_compute_dimension_mismatch_rejected() {
        let base = gray_image(2, 2, 0.5);
        let alternate = gray_image(4, 4, 1.0);
        let mut map = preconfigured_map(2, 2, YuvFormat::Yuv444);
        assert!(compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(0.0, 1.0),
        )
        .is_err());
    }

    #[test]
    fn test_compute_unconfigured_map_rejected() {
        let base = gray_image(2, 2, 0.5);
        let alternate = gray_image(2, 2, 1.0);
        let mut map = GainMap::default();
        assert!(compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(0.0, 1.0),
        )
        .is_err());
    }

    #[test]
    fn test_compute_darker_alternate_flips_sign() {
        // The alternate is the SDR side here; the stored values must still
        // encode log2(HDR/SDR), so they come out positive.
        let base = gray_image(4, 4, 1.0);
        let alternate = gray_image(4, 4, 0.5);
        let mut map = preconfigured_map(4, 4, YuvFormat::Yuv444);

        compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(1.0, 0.0),
        )
        .unwrap();

        for c in 0..3 {
            assert!(
                approx_eq(map.metadata.gain_map_max[c].as_f64(), 0.9779, 1e-3),
                "channel {c}: {}",
                map.metadata.gain_map_max[c].as_f64()
            );
        }
    }

    #[test]
    fn test_compute_single_channel_replicates_slots() {
        let base = gray_image(4, 4, 0.5);
        let alternate = gray_image(4, 4, 1.0);
        let mut map = preconfigured_map(4, 4, YuvFormat::Yuv400);

        compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(0.0, 1.0),
        )
        .unwrap();

        assert_eq!(map.image.format, YuvFormat::Yuv400);
        assert_eq!(map.image.planes.len(), 1);
        for c in 1..3 {
            assert_eq!(map.metadata.gain_map_min[c], map.metadata.gain_map_min[0]);
            assert_eq!(map.metadata.gain_map_max[c], map.metadata.gain_map_max[0]);
            assert_eq!(map.metadata.base_offset[c], map.metadata.base_offset[0]);
            assert_eq!(
                map.metadata.alternate_offset[c],
                map.metadata.alternate_offset[0]
            );
        }
    }

    #[test]
    fn test_compute_rescales_to_requested_size() {
        let base = gray_image(8, 8, 0.5);
        let alternate = gray_image(8, 8, 1.0);
        let mut map = preconfigured_map(4, 2, YuvFormat::Yuv444);

        compute_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &alternate,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut map,
            &ComputeOptions::new(0.0, 1.0),
        )
        .unwrap();

        assert_eq!(map.image.width, 4);
        assert_eq!(map.image.height, 2);
    }

    #[test]
    fn test_compute_image_copies_alternate_descriptors() {
        use crate::image::{MatrixCoefficients, YuvRange};

        let mut base = YuvImage::new(4, 4, 8, YuvFormat::Yuv444).unwrap();
        base.color_primaries = ColorPrimaries::Srgb;
        base.transfer_characteristics = TransferCharacteristics::Srgb;
        base.planes[0].fill(128);
        base.planes[1].fill(128);
        base.planes[2].fill(128);

        let mut alternate = base.clone();
        alternate.depth = 8;
        alternate.yuv_range = YuvRange::Limited;
        alternate.matrix_coefficients = MatrixCoefficients::Bt709;
        alternate.transfer_characteristics = TransferCharacteristics::Srgb;
        alternate.clli.max_cll = 1000;
        alternate.planes[0].fill(180);

        let mut map = preconfigured_map(4, 4, YuvFormat::Yuv444);
        compute_image(&base, &alternate, &mut map, &ComputeOptions::new(0.0, 2.0)).unwrap();

        assert_eq!(map.alt_color_primaries, ColorPrimaries::Srgb);
        assert_eq!(map.alt_transfer_characteristics, TransferCharacteristics::Srgb);
        assert_eq!(map.alt_matrix_coefficients, MatrixCoefficients::Bt709);
        assert_eq!(map.alt_yuv_range, YuvRange::Limited);
        assert_eq!(map.alt_plane_depth, 8);
        assert_eq!(map.alt_plane_count, 3);
        assert_eq!(map.alt_clli.max_cll, 1000);
        assert!(map.alt_icc.is_empty());
    }

    #[test]
    fn test_compute_image_refuses_icc() {
        let mut base = YuvImage::new(2, 2, 8, YuvFormat::Yuv444).unwrap();
        base.icc = vec![0; 8];
        let alternate = YuvImage::new(2, 2, 8, YuvFormat::Yuv444).unwrap();
        let mut map = preconfigured_map(2, 2, YuvFormat::Yuv444);
        let result = compute_image(&base, &alternate, &mut map, &ComputeOptions::new(0.0, 1.0));
        assert!(matches!(result, Err(GainMapError::NotImplemented(_))));
    }
}
