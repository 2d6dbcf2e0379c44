//! Rational number helpers for gain map metadata.
//!
//! ISO 21496-1 stores every tuning parameter as a fraction. The float
//! conversions here follow the interchange convention that a zero
//! denominator reads as `0`, while writing a float into a fraction is a
//! fallible best-effort approximation.

use serde::{Deserialize, Serialize};

use crate::error::{GainMapError, Result};

/// A rational number with the sign carried by the numerator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFraction {
    pub n: i32,
    pub d: u32,
}

/// A non-negative rational number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedFraction {
    pub n: u32,
    pub d: u32,
}

impl SignedFraction {
    pub const fn new(n: i32, d: u32) -> Self {
        Self { n, d }
    }

    /// Reads the fraction as a double. A zero denominator reads as `0`.
    pub fn as_f64(self) -> f64 {
        if self.d == 0 {
            0.0
        } else {
            f64::from(self.n) / f64::from(self.d)
        }
    }

    pub fn as_f32(self) -> f32 {
        self.as_f64() as f32
    }

    /// Approximates a double as a signed fraction.
    ///
    /// The magnitude is scaled so that the larger of numerator and
    /// denominator occupies the full 31-bit range, which keeps the
    /// representation error below one part in `i32::MAX`.
    pub fn from_f64(v: f64) -> Result<Self> {
        let magnitude = UnsignedFraction::approximate(v.abs(), i32::MAX as u32)?;
        let mut n = magnitude.n as i32;
        if v < 0.0 {
            n = -n;
        }
        Ok(Self { n, d: magnitude.d })
    }
}

impl UnsignedFraction {
    pub const fn new(n: u32, d: u32) -> Self {
        Self { n, d }
    }

    /// Reads the fraction as a double. A zero denominator reads as `0`.
    pub fn as_f64(self) -> f64 {
        if self.d == 0 {
            0.0
        } else {
            f64::from(self.n) / f64::from(self.d)
        }
    }

    pub fn as_f32(self) -> f32 {
        self.as_f64() as f32
    }

    /// Approximates a non-negative double as an unsigned fraction.
    ///
    /// Fails on negative, non-finite, or too-large input.
    pub fn from_f64(v: f64) -> Result<Self> {
        Self::approximate(v, u32::MAX)
    }

    fn approximate(v: f64, max_term: u32) -> Result<Self> {
        if !v.is_finite() || v < 0.0 || v > f64::from(max_term) {
            return Err(GainMapError::invalid(format!(
                "cannot represent {v} as an unsigned fraction"
            )));
        }
        if v <= 1.0 {
            let d = max_term;
            let n = (v * f64::from(d)).round() as u32;
            Ok(Self { n, d })
        } else {
            let n = max_term;
            let d = (f64::from(n) / v).round() as u32;
            debug_assert!(d != 0);
            Ok(Self { n, d })
        }
    }
}
