//! Open Gain Map Library
//!
//! A GPLv2-compatible Rust library implementing the ISO 21496-1 gain map
//! tone-mapping math: reconstructing a rendition at any display HDR
//! headroom from a base image plus a gain map, and synthesizing a gain
//! map (with its metadata) from a base/alternate image pair.
//!
//! # Features
//!
//! - **Application**: blend continuously between the base and alternate
//!   renditions for a given display headroom, with optional content light
//!   level statistics
//! - **Computation**: derive the per-channel log2 ratios, outlier-trimmed
//!   bounds, and offsets that reproduce an alternate rendition
//! - **Metadata**: fraction-exact validation and deduplication predicates
//!
//! Container parsing, codecs, and ICC-based color management are out of
//! scope; inputs and outputs are raw RGB or YUV pixel buffers.
//!
//! # Standards Support
//!
//! - ISO 21496-1:2025 (Gain map metadata)
//! - Adobe Gain Map specification
//!
//! # License
//!
//! GPL-2.0-or-later

pub mod color;
pub mod error;
pub mod fraction;
pub mod gainmap;
pub mod image;

pub use color::{ColorPrimaries, TransferCharacteristics, SDR_WHITE_NITS};
pub use error::{GainMapError, Result};
pub use fraction::{SignedFraction, UnsignedFraction};
pub use gainmap::{
    apply_image, apply_rgb, choose_math_color_space, compute_image, compute_rgb,
    find_min_max_without_outliers, gain_map_weight, same_gain_map_alt_metadata,
    same_gain_map_metadata, ComputeOptions, GainMap, GainMapMetadata,
};
pub use image::{
    ContentLightLevelInformation, MatrixCoefficients, RgbFormat, RgbImage, YuvFormat, YuvImage,
    YuvRange,
};
