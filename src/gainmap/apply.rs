//! Gain map application: reconstructing a rendition at a display's HDR
//! headroom from a base image and a gain map.

use log::debug;

use crate::color::{apply_matrix, conversion_matrix, ColorPrimaries, Mat3, SDR_WHITE_NITS, TransferCharacteristics};
use crate::error::{GainMapError, Result};
use crate::gainmap::metadata::{GainMap, GainMapMetadata};
use crate::image::{ContentLightLevelInformation, RgbImage, YuvImage};

/// Maps a display HDR headroom to a signed blend weight in `[-1, 1]`.
///
/// `0` leaves the base untouched, `1` fully applies the gain map, and
/// negative weights tone-map downward when the alternate rendition has
/// the smaller headroom. Equal headrooms leave the ratio undefined, so
/// the gain map is not applied at all.
pub fn gain_map_weight(hdr_headroom: f32, metadata: &GainMapMetadata) -> f32 {
    let base = metadata.base_hdr_headroom;
    let alternate = metadata.alternate_hdr_headroom;
    if u64::from(base.n) * u64::from(alternate.d) == u64::from(alternate.n) * u64::from(base.d) {
        return 0.0;
    }
    let b = base.as_f32();
    let a = alternate.as_f32();
    let w = ((hdr_headroom - b) / (a - b)).clamp(0.0, 1.0);
    if a < b {
        -w
    } else {
        w
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn rotation(from: ColorPrimaries, to: ColorPrimaries) -> Result<Option<Mat3>> {
    if from == to {
        return Ok(None);
    }
    conversion_matrix(from, to)
        .map(Some)
        .ok_or_else(|| GainMapError::unsupported(format!("no conversion from {from:?} to {to:?}")))
}

/// Applies `map` to `base` at the given display headroom, writing the
/// reconstructed rendition into `out`.
///
/// `out` must be preallocated with the base's dimensions; its depth,
/// layout, and the requested output primaries and transfer are honored
/// when storing. Alpha passes through unchanged. When `clli` is provided
/// and the gain map is applied, it receives content light level statistics
/// of the reconstructed image relative to SDR white (203 nits).
pub fn apply_rgb(
    base: &RgbImage,
    base_primaries: ColorPrimaries,
    base_transfer: TransferCharacteristics,
    map: &GainMap,
    hdr_headroom: f32,
    out_primaries: ColorPrimaries,
    out_transfer: TransferCharacteristics,
    out: &mut RgbImage,
    clli: Option<&mut ContentLightLevelInformation>,
) -> Result<()> {
    if !(hdr_headroom >= 0.0) {
        return Err(GainMapError::invalid(format!(
            "HDR headroom must be non-negative, got {hdr_headroom}"
        )));
    }
    if base.width == 0 || base.height == 0 {
        return Err(GainMapError::invalid("base image is empty"));
    }
    if out.width != base.width || out.height != base.height {
        return Err(GainMapError::invalid(format!(
            "output {}x{} does not match base {}x{}",
            out.width, out.height, base.width, base.height
        )));
    }
    map.metadata.validate()?;

    let metadata = &map.metadata;
    let math_primaries =
        if metadata.use_base_color_space || map.alt_color_primaries == ColorPrimaries::Unspecified {
            base_primaries
        } else {
            map.alt_color_primaries
        };
    let weight = gain_map_weight(hdr_headroom, metadata);

    if weight == 0.0 {
        if out_transfer == base_transfer
            && out_primaries == base_primaries
            && out.matches_layout(base)
        {
            debug!("weight is 0 and layouts match, copying base verbatim");
            out.pixels = base.pixels.clone();
            return Ok(());
        }
        // Same rendition, but the output wants another representation.
        let to_linear = base_transfer.to_linear()?;
        let from_linear = out_transfer.from_linear()?;
        let rotate = rotation(base_primaries, out_primaries)?;
        for y in 0..base.height {
            for x in 0..base.width {
                let px = base.get_pixel(x, y);
                let mut linear = [to_linear(px[0]), to_linear(px[1]), to_linear(px[2])];
                if let Some(matrix) = &rotate {
                    linear = apply_matrix(linear, matrix);
                }
                out.set_pixel(
                    x,
                    y,
                    [
                        from_linear(linear[0]).clamp(0.0, 1.0),
                        from_linear(linear[1]).clamp(0.0, 1.0),
                        from_linear(linear[2]).clamp(0.0, 1.0),
                        px[3],
                    ],
                );
            }
        }
        return Ok(());
    }

    // Float copies of the metadata, hoisted out of the pixel loop.
    let mut gamma_inv = [0.0f32; 3];
    let mut gain_min = [0.0f32; 3];
    let mut gain_max = [0.0f32; 3];
    let mut base_offset = [0.0f32; 3];
    let mut alternate_offset = [0.0f32; 3];
    for c in 0..3 {
        gamma_inv[c] = 1.0 / metadata.gain_map_gamma[c].as_f32();
        gain_min[c] = metadata.gain_map_min[c].as_f32();
        gain_max[c] = metadata.gain_map_max[c].as_f32();
        base_offset[c] = metadata.base_offset[c].as_f32();
        alternate_offset[c] = metadata.alternate_offset[c].as_f32();
    }

    let rescaled: YuvImage;
    let map_image = if map.image.width != base.width || map.image.height != base.height {
        rescaled = map.image.rescaled(base.width, base.height)?;
        &rescaled
    } else {
        &map.image
    };
    let map_rgb = map_image.to_rgb()?;

    let to_linear = base_transfer.to_linear()?;
    let from_linear = out_transfer.from_linear()?;
    let to_math = rotation(base_primaries, math_primaries)?;
    let to_out = rotation(math_primaries, out_primaries)?;

    let mut rgb_max_linear = 0.0f32;
    let mut rgb_sum_linear = 0.0f64;

    for y in 0..base.height {
        for x in 0..base.width {
            let px = base.get_pixel(x, y);
            let gain = map_rgb.get_pixel(x, y);

            let mut linear = [to_linear(px[0]), to_linear(px[1]), to_linear(px[2])];
            if let Some(matrix) = &to_math {
                linear = apply_matrix(linear, matrix);
            }

            let mut tone = [0.0f32; 3];
            let mut pixel_max_linear = f32::MIN;
            for c in 0..3 {
                let log_gain = lerp(gain_min[c], gain_max[c], gain[c].powf(gamma_inv[c]));
                tone[c] = (linear[c] + base_offset[c]) * (log_gain * weight).exp2()
                    - alternate_offset[c];
                pixel_max_linear = pixel_max_linear.max(tone[c]);
            }
            rgb_max_linear = rgb_max_linear.max(pixel_max_linear);
            rgb_sum_linear += f64::from(pixel_max_linear);

            if let Some(matrix) = &to_out {
                tone = apply_matrix(tone, matrix);
            }
            out.set_pixel(
                x,
                y,
                [
                    from_linear(tone[0]).clamp(0.0, 1.0),
                    from_linear(tone[1]).clamp(0.0, 1.0),
                    from_linear(tone[2]).clamp(0.0, 1.0),
                    px[3],
                ],
            );
        }
    }

    if let Some(clli) = clli {
        let pixel_count = f64::from(base.width) * f64::from(base.height);
        clli.max_cll =
            (f64::from(rgb_max_linear) * f64::from(SDR_WHITE_NITS)).round().clamp(0.0, 65535.0)
                as u16;
        clli.max_pall = (rgb_sum_linear / pixel_count * f64::from(SDR_WHITE_NITS))
            .round()
            .clamp(0.0, 65535.0) as u16;
    }
    Ok(())
}

/// YUV entry point: converts `base` to RGB and applies the gain map.
///
/// Bases carrying an ICC profile are refused; profile-driven color
/// management is out of scope.
pub fn apply_image(
    base: &YuvImage,
    map: &GainMap,
    hdr_headroom: f32,
    out_primaries: ColorPrimaries,
    out_transfer: TransferCharacteristics,
    out: &mut RgbImage,
    clli: Option<&mut ContentLightLevelInformation>,
) -> Result<()> {
    if !base.icc.is_empty() {
        return Err(GainMapError::unsupported(
            "ICC profiles are not supported on the base image",
        ));
    }
    let base_rgb = base.to_rgb()?;
    apply_rgb(
        &base_rgb,
        base.color_primaries,
        base.transfer_characteristics,
        map,
        hdr_headroom,
        out_primaries,
        out_transfer,
        out,
        clli,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::{SignedFraction, UnsignedFraction};
    use crate::image::{RgbFormat, YuvFormat};

    fn approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
        (a - b).abs() < tolerance
    }

    /// Metadata for an SDR base with one stop of headroom in the alternate.
    fn sdr_base_metadata() -> GainMapMetadata {
        GainMapMetadata {
            gain_map_min: [SignedFraction::new(0, 1); 3],
            gain_map_max: [SignedFraction::new(0, 1); 3],
            base_hdr_headroom: UnsignedFraction::new(0, 1),
            alternate_hdr_headroom: UnsignedFraction::new(1, 1),
            ..GainMapMetadata::default()
        }
    }

    fn gain_map_with(metadata: GainMapMetadata, width: u32, height: u32, code: u16) -> GainMap {
        let mut map = GainMap {
            metadata,
            image: YuvImage::new(width, height, 8, YuvFormat::Yuv444).unwrap(),
            ..GainMap::default()
        };
        map.image.planes[0].fill(code);
        // Neutral chroma for full range.
        map.image.planes[1].fill(128);
        map.image.planes[2].fill(128);
        map
    }

    fn gray_base(width: u32, height: u32, value: f32) -> RgbImage {
        let mut base = RgbImage::new(width, height, 32, RgbFormat::Rgba).unwrap();
        for y in 0..height {
            for x in 0..width {
                base.set_pixel(x, y, [value, value, value, 1.0]);
            }
        }
        base
    }

    #[test]
    fn test_weight_equal_headrooms_is_zero() {
        let mut metadata = GainMapMetadata::default();
        metadata.base_hdr_headroom = UnsignedFraction::new(2, 1);
        metadata.alternate_hdr_headroom = UnsignedFraction::new(4, 2);
        assert_eq!(gain_map_weight(0.0, &metadata), 0.0);
        assert_eq!(gain_map_weight(10.0, &metadata), 0.0);
    }

    #[test]
    fn test_weight_saturates_and_is_monotonic() {
        let metadata = sdr_base_metadata();
        assert_eq!(gain_map_weight(0.0, &metadata), 0.0);
        assert_eq!(gain_map_weight(1.0, &metadata), 1.0);
        assert_eq!(gain_map_weight(5.0, &metadata), 1.0);
        let mut previous = 0.0;
        for i in 0..=20 {
            let w = gain_map_weight(i as f32 / 20.0, &metadata);
            assert!(w >= previous);
            previous = w;
        }
        assert!(approx_eq(gain_map_weight(0.5, &metadata), 0.5, 1e-6));
    }

    #[test]
    fn test_weight_negative_when_alternate_is_darker() {
        let mut metadata = GainMapMetadata::default();
        metadata.base_hdr_headroom = UnsignedFraction::new(1, 1);
        metadata.alternate_hdr_headroom = UnsignedFraction::new(0, 1);
        assert!(approx_eq(gain_map_weight(0.5, &metadata), -0.5, 1e-6));
        assert_eq!(gain_map_weight(0.0, &metadata), -1.0);
        assert_eq!(gain_map_weight(1.0, &metadata), 0.0);
        assert_eq!(gain_map_weight(2.0, &metadata), 0.0);
    }

    #[test]
    fn test_identity_gain_map_preserves_base() {
        // All-gray base, gain map with min = max = 0: the multiplier is
        // exactly 1 at any weight and the offsets cancel.
        let base = gray_base(2, 2, 0.5);
        let map = gain_map_with(sdr_base_metadata(), 2, 2, 128);
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .unwrap();

        for y in 0..2 {
            for x in 0..2 {
                let px = out.get_pixel(x, y);
                for c in 0..3 {
                    assert!(approx_eq(px[c], 0.5, 1e-6), "({x},{y})[{c}] = {}", px[c]);
                }
                assert_eq!(px[3], 1.0);
            }
        }
    }

    #[test]
    fn test_full_gain_clips_to_white() {
        // gain_map_max = 1 stop, map at full code, headroom 1:
        // (0.5 + 1/64) * 2 - 1/64 = 1.015625, clamped to 1 in gamma space.
        let mut metadata = sdr_base_metadata();
        metadata.gain_map_max = [SignedFraction::new(1, 1); 3];
        let base = gray_base(2, 2, 0.5);
        let map = gain_map_with(metadata, 2, 2, 255);
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgba).unwrap();
        let mut clli = ContentLightLevelInformation::default();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &map,
            1.0,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut out,
            Some(&mut clli),
        )
        .unwrap();

        for c in 0..3 {
            assert_eq!(out.get_pixel(0, 0)[c], 1.0);
        }
        // 1.015625 * 203 nits = 206.17, for both the peak and the average.
        assert_eq!(clli.max_cll, 206);
        assert_eq!(clli.max_pall, 206);
    }

    #[test]
    fn test_zero_weight_fast_path_is_byte_identical() {
        let mut metadata = GainMapMetadata::default();
        metadata.base_hdr_headroom = UnsignedFraction::new(1, 1);
        metadata.alternate_hdr_headroom = UnsignedFraction::new(1, 1);

        let mut base = RgbImage::new(3, 2, 8, RgbFormat::Rgba).unwrap();
        for y in 0..2 {
            for x in 0..3 {
                base.set_pixel(x, y, [0.1 * x as f32, 0.3 * y as f32, 0.9, 0.5]);
            }
        }
        let map = gain_map_with(metadata, 3, 2, 200);
        let mut out = RgbImage::new(3, 2, 8, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(out.pixels, base.pixels);
    }

    #[test]
    fn test_zero_weight_with_layout_change() {
        // Same rendition, but an 8-bit output from a float base goes
        // through the per-pixel path.
        let base = gray_base(2, 2, 0.5);
        let mut metadata = sdr_base_metadata();
        metadata.alternate_hdr_headroom = UnsignedFraction::new(0, 1);
        let map = gain_map_with(metadata, 2, 2, 128);
        let mut out = RgbImage::new(2, 2, 8, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            1.0,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .unwrap();
        let px = out.get_pixel(0, 0);
        for c in 0..3 {
            assert!(approx_eq(px[c], 0.5, 1.0 / 255.0));
        }
        assert_eq!(px[3], 1.0);
    }

    #[test]
    fn test_unspecified_alt_primaries_fall_back_to_base() {
        // use_base_color_space = false but no alternate primaries: math
        // stays in the base space instead of failing.
        let base = gray_base(2, 2, 0.5);
        let mut metadata = sdr_base_metadata();
        metadata.use_base_color_space = false;
        let mut map = gain_map_with(metadata, 2, 2, 128);
        map.alt_color_primaries = ColorPrimaries::Unspecified;
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .unwrap();
        assert!(approx_eq(out.get_pixel(1, 1)[0], 0.5, 1e-6));
    }

    #[test]
    fn test_math_in_alternate_color_space_round_trips() {
        // Identity gain map computed in Display P3 math space: the base is
        // rotated in and back out, which must be lossless up to float
        // precision.
        let base = gray_base(2, 2, 0.25);
        let mut metadata = sdr_base_metadata();
        metadata.use_base_color_space = false;
        let mut map = gain_map_with(metadata, 2, 2, 128);
        map.alt_color_primaries = ColorPrimaries::DisplayP3;
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .unwrap();
        for c in 0..3 {
            assert!(approx_eq(out.get_pixel(0, 0)[c], 0.25, 1e-4));
        }
    }

    #[test]
    fn test_gain_map_is_rescaled_to_base() {
        let base = gray_base(4, 4, 0.5);
        let mut metadata = sdr_base_metadata();
        metadata.gain_map_max = [SignedFraction::new(1, 1); 3];
        let map = gain_map_with(metadata, 2, 2, 255);
        let mut out = RgbImage::new(4, 4, 32, RgbFormat::Rgba).unwrap();

        apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &map,
            1.0,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Linear,
            &mut out,
            None,
        )
        .unwrap();
        // Constant full-code map rescales to itself: every pixel doubles.
        assert_eq!(out.get_pixel(3, 3)[1], 1.0);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let base = gray_base(2, 2, 0.5);
        let map = gain_map_with(sdr_base_metadata(), 2, 2, 128);
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgba).unwrap();

        for bad_headroom in [-0.5, f32::NAN] {
            assert!(apply_rgb(
                &base,
                ColorPrimaries::Srgb,
                TransferCharacteristics::Srgb,
                &map,
                bad_headroom,
                ColorPrimaries::Srgb,
                TransferCharacteristics::Srgb,
                &mut out,
                None,
            )
            .is_err());
        }

        let mut small = RgbImage::new(1, 1, 32, RgbFormat::Rgba).unwrap();
        assert!(apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut small,
            None,
        )
        .is_err());

        let mut bad_map = gain_map_with(sdr_base_metadata(), 2, 2, 128);
        bad_map.metadata.gain_map_gamma[0].n = 0;
        assert!(apply_rgb(
            &base,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &bad_map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        )
        .is_err());
    }

    #[test]
    fn test_apply_image_refuses_icc() {
        let mut base = YuvImage::new(2, 2, 8, YuvFormat::Yuv444).unwrap();
        base.icc = vec![0; 16];
        let map = gain_map_with(sdr_base_metadata(), 2, 2, 128);
        let mut out = RgbImage::new(2, 2, 32, RgbFormat::Rgb).unwrap();
        let result = apply_image(
            &base,
            &map,
            0.5,
            ColorPrimaries::Srgb,
            TransferCharacteristics::Srgb,
            &mut out,
            None,
        );
        assert!(matches!(result, Err(GainMapError::NotImplemented(_))));
    }
}
