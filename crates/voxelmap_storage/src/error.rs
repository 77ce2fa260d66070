use std::io;

use thiserror::Error;

/// Errors raised by map construction and layer access.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A construction parameter was rejected: non-positive resolution, zero region dimension or
    /// an unknown layer name.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A required layer is not present in the map layout.
    #[error("layer missing: {0}")]
    LayerMissing(String),

    /// A region would exceed the addressable voxel count.
    #[error("region voxel volume overflows the addressable range")]
    ValueOverflow,
}

/// Errors raised by map serialisation and loading.
#[derive(Debug, Error)]
pub enum SerialiseError {
    #[error("i/o failure")]
    Io(#[from] io::Error),

    /// The file is not a map stream, or its version cannot be read by this build.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// A serialised size field does not fit the addressable range.
    #[error("serialised value overflows the addressable range")]
    ValueOverflow,

    /// The progress observer requested quit. The map is left consistent with the regions loaded
    /// or written so far.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}
