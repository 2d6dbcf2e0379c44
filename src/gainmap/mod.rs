//! Gain map engine: metadata, computation, and application.
//!
//! Implements the ISO 21496-1 reconstruction math in both directions.

pub mod apply;
pub mod compute;
pub mod metadata;
pub mod range;

pub use apply::{apply_image, apply_rgb, gain_map_weight};
pub use compute::{choose_math_color_space, compute_image, compute_rgb, ComputeOptions};
pub use metadata::{same_gain_map_alt_metadata, same_gain_map_metadata, GainMap, GainMapMetadata};
pub use range::find_min_max_without_outliers;
