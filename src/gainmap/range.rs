//! Outlier-robust range estimation for gain map values.

use crate::error::{try_vec, GainMapError, Result};

/// Histogram bucket size, in the sample's own units.
const BUCKET_SIZE: f32 = 0.01;
/// Fraction of samples that may be discarded in total (split between the
/// two tails).
const OUTLIER_RATIO: f64 = 0.001;
/// Upper bound on histogram size for very wide sample ranges.
const MAX_BUCKETS: usize = 10_000;

/// Computes an approximate `[min, max]` of `data`, discarding up to
/// 0.05% of samples on each tail.
///
/// Trimming is bucket-granular: the returned range excludes whole empty
/// histogram buckets but never cuts through a populated one, so boundary
/// samples may remain just outside the reported range.
pub fn find_min_max_without_outliers(data: &[f32]) -> Result<(f32, f32)> {
    if data.is_empty() {
        return Err(GainMapError::invalid("empty sample array"));
    }

    let mut min = data[0];
    let mut max = data[0];
    for &v in data {
        min = min.min(v);
        max = max.max(v);
    }

    let allowed = (data.len() as f64 * OUTLIER_RATIO / 2.0).floor() as usize;
    if max - min <= 2.0 * BUCKET_SIZE || allowed == 0 {
        return Ok((min, max));
    }

    let num_buckets = (((max - min) / BUCKET_SIZE).ceil() as usize).min(MAX_BUCKETS);
    let bucket_width = (max - min) / num_buckets as f32;
    let mut buckets: Vec<u32> = try_vec(num_buckets)?;
    for &v in data {
        let bucket = ((v - min) / (max - min) * num_buckets as f32).round() as usize;
        buckets[bucket.min(num_buckets - 1)] += 1;
    }

    let mut range_min = min;
    let mut left_outliers = 0usize;
    for (i, &count) in buckets.iter().enumerate() {
        left_outliers += count as usize;
        if left_outliers > allowed {
            break;
        }
        if count == 0 {
            // Snap to the bucket's upper edge.
            range_min = min + (i + 1) as f32 * bucket_width;
        }
    }

    let mut range_max = max;
    let mut right_outliers = 0usize;
    for (i, &count) in buckets.iter().enumerate().rev() {
        right_outliers += count as usize;
        if right_outliers > allowed {
            break;
        }
        if count == 0 {
            // Snap to the bucket's lower edge.
            range_max = min + i as f32 * bucket_width;
        }
    }

    Ok((range_min, range_max))
}
