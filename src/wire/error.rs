//! Wire codec failure modes.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WireError {
    #[error("corrupt envelope header: {reason}")]
    CorruptHeader { reason: String },

    #[error("unsupported envelope version: major={major}")]
    VersionUnsupported { major: u8 },

    #[error("corrupt envelope body: {reason}")]
    CorruptBody { reason: String },

    #[error("multipart boundary missing")]
    BoundaryMissing,

    #[error("envelope format not recognized")]
    UnknownEnvelope,

    #[error("integer {value} exceeds safe numeric range")]
    NumericRange { value: i64 },
}
