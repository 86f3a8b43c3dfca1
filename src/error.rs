use std::path::PathBuf;
use thiserror::Error;

use crate::skipper::Operation;

/// Everything that can go wrong outside of plain matching.
///
/// Matching itself never errors: a test that can't seek or read simply
/// doesn't pass, and a registry that finds nothing hands back an empty rule.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid catalog: {0}")]
    Catalog(String),

    #[error("Invalid test: {0}")]
    InvalidTest(&'static str),

    #[error("{operation} needs a length divisible by {width}, got {length}")]
    Misaligned {
        operation: Operation,
        width: u64,
        length: u64,
    },

    #[error("{0} needs an even start offset")]
    UnalignedStart(Operation),

    #[error("Rule has no start offset")]
    UndefinedStart,

    #[error("Offset {offset} is outside a stream of {length} bytes")]
    OutOfRange { offset: i64, length: u64 },

    #[error("Output would overwrite its own input: {0}")]
    SameFile(PathBuf),

    #[error("Rule stops at 0x{end:X} of {length} bytes, the tail could not be restored")]
    TruncatedTail { end: u64, length: u64 },

    #[error("Transform produced no output: {0}")]
    EmptyOutput(PathBuf),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("No copier header detected in {0}")]
    NoMatch(PathBuf),

    #[error("Rule uses {0}, only plain header removal can be stored")]
    UnsupportedOperation(Operation),
}

pub type Result<T> = std::result::Result<T, Error>;
