//! Gain map metadata and its structural validation.

use serde::{Deserialize, Serialize};

use crate::color::{ColorPrimaries, TransferCharacteristics};
use crate::error::{GainMapError, Result};
use crate::fraction::{SignedFraction, UnsignedFraction};
use crate::image::{ContentLightLevelInformation, MatrixCoefficients, YuvImage, YuvRange};

/// ISO 21496-1 gain map metadata.
///
/// Per-channel values are indexed R, G, B. `gain_map_min` and
/// `gain_map_max` are log2-space bounds of the stored ratios; the gain map
/// pixel interpolates between them. The stored ratios always encode
/// `log2(HDR / SDR)` regardless of which rendition is the base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainMapMetadata {
    pub gain_map_min: [SignedFraction; 3],
    pub gain_map_max: [SignedFraction; 3],
    pub gain_map_gamma: [UnsignedFraction; 3],
    pub base_offset: [SignedFraction; 3],
    pub alternate_offset: [SignedFraction; 3],
    pub base_hdr_headroom: UnsignedFraction,
    pub alternate_hdr_headroom: UnsignedFraction,
    /// Whether ratio math happens in the base image's color space rather
    /// than the alternate's.
    pub use_base_color_space: bool,
}

impl Default for GainMapMetadata {
    /// Encoding defaults: the state expected before a compute call fills
    /// the record in.
    fn default() -> Self {
        Self {
            gain_map_min: [SignedFraction::new(1, 1); 3],
            gain_map_max: [SignedFraction::new(1, 1); 3],
            gain_map_gamma: [UnsignedFraction::new(1, 1); 3],
            base_offset: [SignedFraction::new(1, 64); 3],
            alternate_offset: [SignedFraction::new(1, 64); 3],
            base_hdr_headroom: UnsignedFraction::new(0, 1),
            alternate_hdr_headroom: UnsignedFraction::new(1, 1),
            use_base_color_space: true,
        }
    }
}

impl GainMapMetadata {
    /// Checks the structural invariants every apply call relies on: no
    /// zero denominators, non-zero gamma numerators, and `max >= min` per
    /// channel compared as exact rationals.
    pub fn validate(&self) -> Result<()> {
        for c in 0..3 {
            let min = self.gain_map_min[c];
            let max = self.gain_map_max[c];
            if min.d == 0
                || max.d == 0
                || self.gain_map_gamma[c].d == 0
                || self.base_offset[c].d == 0
                || self.alternate_offset[c].d == 0
            {
                return Err(GainMapError::invalid(format!(
                    "gain map metadata channel {c} has a zero denominator"
                )));
            }
            if self.gain_map_gamma[c].n == 0 {
                return Err(GainMapError::invalid(format!(
                    "gain map gamma numerator is zero for channel {c}"
                )));
            }
            // Cross-multiplied comparison; 64-bit intermediates so the sign
            // of the numerators is handled exactly.
            if i64::from(max.n) * i64::from(min.d) < i64::from(min.n) * i64::from(max.d) {
                return Err(GainMapError::invalid(format!(
                    "gain map max is below min for channel {c}"
                )));
            }
        }
        if self.base_hdr_headroom.d == 0 || self.alternate_hdr_headroom.d == 0 {
            return Err(GainMapError::invalid(
                "gain map headroom has a zero denominator",
            ));
        }
        Ok(())
    }
}

/// A gain map image together with its metadata and the descriptors of the
/// alternate rendition it reproduces.
#[derive(Debug, Default, Clone)]
pub struct GainMap {
    pub image: YuvImage,
    pub metadata: GainMapMetadata,

    pub alt_icc: Vec<u8>,
    pub alt_color_primaries: ColorPrimaries,
    pub alt_transfer_characteristics: TransferCharacteristics,
    pub alt_matrix_coefficients: MatrixCoefficients,
    pub alt_yuv_range: YuvRange,

    pub alt_plane_count: u8,
    pub alt_plane_depth: u8,

    pub alt_clli: ContentLightLevelInformation,
}

/// Byte-equality of the tone-mapping fields of two metadata records:
/// both headrooms and the per-channel min/max/gamma and offsets, compared
/// as raw `(n, d)` pairs.
pub fn same_gain_map_metadata(a: &GainMapMetadata, b: &GainMapMetadata) -> bool {
    a.base_hdr_headroom == b.base_hdr_headroom
        && a.alternate_hdr_headroom == b.alternate_hdr_headroom
        && a.gain_map_min == b.gain_map_min
        && a.gain_map_max == b.gain_map_max
        && a.gain_map_gamma == b.gain_map_gamma
        && a.base_offset == b.base_offset
        && a.alternate_offset == b.alternate_offset
}

/// Byte-equality of two gain maps' alternate-rendition descriptors: ICC
/// payload, color descriptors, YUV range, depth, plane count, and content
/// light level.
pub fn same_gain_map_alt_metadata(a: &GainMap, b: &GainMap) -> bool {
    a.alt_icc == b.alt_icc
        && a.alt_color_primaries == b.alt_color_primaries
        && a.alt_transfer_characteristics == b.alt_transfer_characteristics
        && a.alt_matrix_coefficients == b.alt_matrix_coefficients
        && a.alt_yuv_range == b.alt_yuv_range
        && a.alt_plane_depth == b.alt_plane_depth
        && a.alt_plane_count == b.alt_plane_count
        && a.alt_clli == b.alt_clli
}
