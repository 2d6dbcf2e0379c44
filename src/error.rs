//! Error types for gain map operations.

use thiserror::Error;

/// Errors that can occur during gain map computation or application.
#[derive(Error, Debug)]
pub enum GainMapError {
    /// Malformed input: null-equivalent arguments, invalid metadata,
    /// dimension mismatches, or values a fraction cannot represent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A color space, transfer characteristic, or pixel layout the engine
    /// does not support.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Allocation failure for a histogram or an intermediate pixel plane.
    #[error("Out of memory")]
    OutOfMemory,
}

/// Result type alias for gain map operations.
pub type Result<T> = std::result::Result<T, GainMapError>;

impl GainMapError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GainMapError::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        GainMapError::NotImplemented(msg.into())
    }
}

/// Reserves space for `len` elements up front so an allocation failure
/// surfaces as an error instead of an abort.
pub(crate) fn try_vec<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| GainMapError::OutOfMemory)?;
    v.resize(len, T::default());
    Ok(v)
}
