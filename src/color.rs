//! Color primaries and transfer characteristic math.
//!
//! Implements the color conversions the gain map engine relies on:
//! transfer functions (sRGB, PQ, HLG), linear RGB conversion between
//! primary sets via D65 XYZ, and per-primaries luma coefficients.

use serde::{Deserialize, Serialize};

use crate::error::{GainMapError, Result};

/// sRGB transfer function constants.
const SRGB_THRESHOLD: f32 = 0.04045;
const SRGB_LINEAR_SCALE: f32 = 12.92;
const SRGB_GAMMA: f32 = 2.4;
const SRGB_A: f32 = 0.055;

/// BT.2100 PQ constants.
const PQ_M1: f32 = 0.1593017578125; // 2610/16384
const PQ_M2: f32 = 78.84375; // 2523/32 * 128
const PQ_C1: f32 = 0.8359375; // 3424/4096
const PQ_C2: f32 = 18.8515625; // 2413/128 * 32
const PQ_C3: f32 = 18.6875; // 2392/128 * 32

/// HLG constants.
const HLG_A: f32 = 0.17883277;
const HLG_B: f32 = 0.28466892; // 1 - 4*a
const HLG_C: f32 = 0.55991073; // 0.5 - a * ln(4*a)

/// Reference white luminance in nits for SDR.
pub const SDR_WHITE_NITS: f32 = 203.0;

/// RGB color primaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorPrimaries {
    /// BT.709 primaries (also used by sRGB).
    #[default]
    Srgb,
    /// Display P3 wide color gamut.
    DisplayP3,
    /// BT.2020/BT.2100 wide color gamut.
    Bt2020,
    /// Primaries not signaled by the container.
    Unspecified,
}

/// Transfer characteristics relating signal values to linear light.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCharacteristics {
    /// sRGB transfer function (gamma ~2.2).
    #[default]
    Srgb,
    /// Linear (no gamma).
    Linear,
    /// Perceptual Quantizer (PQ) - SMPTE ST 2084.
    Pq,
    /// Hybrid Log-Gamma (HLG) - BT.2100.
    Hlg,
    /// Transfer not signaled by the container.
    Unspecified,
}

/// A 3x3 linear RGB conversion matrix, row major.
pub type Mat3 = [[f32; 3]; 3];

pub const IDENTITY_MATRIX: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

// ============================================================================
// Transfer Functions
// ============================================================================

fn srgb_from_linear(linear: f32) -> f32 {
    let v = linear.max(0.0);
    if v <= 0.0031308 {
        v * SRGB_LINEAR_SCALE
    } else {
        (1.0 + SRGB_A) * v.powf(1.0 / SRGB_GAMMA) - SRGB_A
    }
}

fn srgb_to_linear(srgb: f32) -> f32 {
    let v = srgb.max(0.0);
    if v <= SRGB_THRESHOLD {
        v / SRGB_LINEAR_SCALE
    } else {
        ((v + SRGB_A) / (1.0 + SRGB_A)).powf(SRGB_GAMMA)
    }
}

fn identity(v: f32) -> f32 {
    v
}

/// PQ encode. Linear input is in the range [0, 1] for [0, 10000] nits.
fn pq_from_linear(linear: f32) -> f32 {
    let y_m1 = linear.max(0.0).powf(PQ_M1);
    let numerator = PQ_C1 + PQ_C2 * y_m1;
    let denominator = 1.0 + PQ_C3 * y_m1;
    (numerator / denominator).powf(PQ_M2)
}

fn pq_to_linear(pq: f32) -> f32 {
    let pq_clamped = pq.max(0.0).min(1.0);
    let pq_m2_inv = pq_clamped.powf(1.0 / PQ_M2);
    let numerator = (pq_m2_inv - PQ_C1).max(0.0);
    let denominator = PQ_C2 - PQ_C3 * pq_m2_inv;
    if denominator <= 0.0 {
        0.0
    } else {
        (numerator / denominator).powf(1.0 / PQ_M1)
    }
}

/// HLG encode for scene-referred linear light.
fn hlg_from_linear(linear: f32) -> f32 {
    let e = linear.max(0.0);
    if e <= 1.0 / 12.0 {
        (3.0 * e).sqrt()
    } else {
        HLG_A * (12.0 * e - HLG_B).ln() + HLG_C
    }
}

fn hlg_to_linear(hlg: f32) -> f32 {
    let hlg_clamped = hlg.max(0.0).min(1.0);
    if hlg_clamped <= 0.5 {
        hlg_clamped * hlg_clamped / 3.0
    } else {
        (((hlg_clamped - HLG_C) / HLG_A).exp() + HLG_B) / 12.0
    }
}

impl TransferCharacteristics {
    /// Returns the signal-to-linear function for these characteristics.
    pub fn to_linear(self) -> Result<fn(f32) -> f32> {
        match self {
            TransferCharacteristics::Srgb => Ok(srgb_to_linear),
            TransferCharacteristics::Linear => Ok(identity),
            TransferCharacteristics::Pq => Ok(pq_to_linear),
            TransferCharacteristics::Hlg => Ok(hlg_to_linear),
            TransferCharacteristics::Unspecified => Err(GainMapError::unsupported(
                "no transfer function for unspecified characteristics",
            )),
        }
    }

    /// Returns the linear-to-signal function for these characteristics.
    pub fn from_linear(self) -> Result<fn(f32) -> f32> {
        match self {
            TransferCharacteristics::Srgb => Ok(srgb_from_linear),
            TransferCharacteristics::Linear => Ok(identity),
            TransferCharacteristics::Pq => Ok(pq_from_linear),
            TransferCharacteristics::Hlg => Ok(hlg_from_linear),
            TransferCharacteristics::Unspecified => Err(GainMapError::unsupported(
                "no transfer function for unspecified characteristics",
            )),
        }
    }
}

// ============================================================================
// Primaries Conversion
// ============================================================================

/// sRGB to XYZ matrix (D65 illuminant).
#[rustfmt::skip]
const SRGB_TO_XYZ: Mat3 = [
    [0.4124564, 0.3575761, 0.1804375],
    [0.2126729, 0.7151522, 0.0721750],
    [0.0193339, 0.1191920, 0.9503041],
];

/// XYZ to sRGB matrix (D65 illuminant).
#[rustfmt::skip]
const XYZ_TO_SRGB: Mat3 = [
    [ 3.2404542, -1.5371385, -0.4985314],
    [-0.9692660,  1.8760108,  0.0415560],
    [ 0.0556434, -0.2040259,  1.0572252],
];

/// Display P3 to XYZ matrix (D65 illuminant).
#[rustfmt::skip]
const P3_TO_XYZ: Mat3 = [
    [0.4865709, 0.2656677, 0.1982173],
    [0.2289746, 0.6917385, 0.0792869],
    [0.0000000, 0.0451134, 1.0439444],
];

/// XYZ to Display P3 matrix (D65 illuminant).
#[rustfmt::skip]
const XYZ_TO_P3: Mat3 = [
    [ 2.4934969, -0.9313836, -0.4027108],
    [-0.8294890,  1.7626641,  0.0236247],
    [ 0.0358458, -0.0761724,  0.9568845],
];

/// BT.2020 to XYZ matrix (D65 illuminant).
#[rustfmt::skip]
const BT2020_TO_XYZ: Mat3 = [
    [0.6369580, 0.1446169, 0.1688810],
    [0.2627002, 0.6779981, 0.0593017],
    [0.0000000, 0.0280727, 1.0609851],
];

/// XYZ to BT.2020 matrix (D65 illuminant).
#[rustfmt::skip]
const XYZ_TO_BT2020: Mat3 = [
    [ 1.7166512, -0.3556708, -0.2533663],
    [-0.6666844,  1.6164812,  0.0157685],
    [ 0.0176399, -0.0427706,  0.9421031],
];

/// BT.709 luminance coefficients (also used for sRGB).
const LUMA_BT709: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Display P3 luminance coefficients.
const LUMA_P3: [f32; 3] = [0.2289, 0.6917, 0.0793];

/// BT.2020 luminance coefficients.
const LUMA_BT2020: [f32; 3] = [0.2627, 0.6780, 0.0593];

impl ColorPrimaries {
    fn to_xyz(self) -> Option<&'static Mat3> {
        match self {
            ColorPrimaries::Srgb => Some(&SRGB_TO_XYZ),
            ColorPrimaries::DisplayP3 => Some(&P3_TO_XYZ),
            ColorPrimaries::Bt2020 => Some(&BT2020_TO_XYZ),
            ColorPrimaries::Unspecified => None,
        }
    }

    fn from_xyz(self) -> Option<&'static Mat3> {
        match self {
            ColorPrimaries::Srgb => Some(&XYZ_TO_SRGB),
            ColorPrimaries::DisplayP3 => Some(&XYZ_TO_P3),
            ColorPrimaries::Bt2020 => Some(&XYZ_TO_BT2020),
            ColorPrimaries::Unspecified => None,
        }
    }

    /// Y coefficients for computing luma from linear RGB in these primaries.
    pub fn luma_coefficients(self) -> Option<[f32; 3]> {
        match self {
            ColorPrimaries::Srgb => Some(LUMA_BT709),
            ColorPrimaries::DisplayP3 => Some(LUMA_P3),
            ColorPrimaries::Bt2020 => Some(LUMA_BT2020),
            ColorPrimaries::Unspecified => None,
        }
    }
}

/// Applies a 3x3 color matrix to linear RGB values.
#[inline]
pub fn apply_matrix(rgb: [f32; 3], matrix: &Mat3) -> [f32; 3] {
    [
        matrix[0][0] * rgb[0] + matrix[0][1] * rgb[1] + matrix[0][2] * rgb[2],
        matrix[1][0] * rgb[0] + matrix[1][1] * rgb[1] + matrix[1][2] * rgb[2],
        matrix[2][0] * rgb[0] + matrix[2][1] * rgb[1] + matrix[2][2] * rgb[2],
    ]
}

fn multiply(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0f32; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Builds the linear RGB conversion matrix between two primary sets.
///
/// Returns `None` when either set of primaries is unknown. Identical
/// primaries yield the identity matrix.
pub fn conversion_matrix(from: ColorPrimaries, to: ColorPrimaries) -> Option<Mat3> {
    if from == to {
        return from.to_xyz().map(|_| IDENTITY_MATRIX);
    }
    Some(multiply(to.from_xyz()?, from.to_xyz()?))
}
