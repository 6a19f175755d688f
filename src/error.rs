use std::io;
use thiserror::Error;

/// Errors returned by tree operations.
///
/// Searching for a cell that has no node is not an error; those lookups return `None`.
#[derive(Debug, Error)]
pub enum OcTreeError {
    #[error("coordinate {coordinate} is outside the representable key range")]
    OutOfBounds { coordinate: f64 },
    #[error("invalid tree parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("the resolution of a non-empty tree cannot be changed")]
    NonEmptyTree,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("stream does not start with an octree header")]
    BadMagic,
    #[error("unsupported octree format version {0}")]
    UnsupportedVersion(u8),
    #[error("stream holds a {found} but a {expected} was expected")]
    TreeTypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("no tree type is registered under {0:?}")]
    UnknownTreeType(String),
    #[error("tree type name is not valid UTF-8")]
    InvalidTypeName,
    #[error("malformed octree stream: {0}")]
    MalformedStream(&'static str),
}

pub type Result<T> = std::result::Result<T, OcTreeError>;
