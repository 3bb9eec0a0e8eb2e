use std::io;

use thiserror::Error;

/// All errors the crate's public surface can return.
///
/// Internal plumbing (seeking, reading a single block) is free to propagate
/// `anyhow::Error` where the failure is a pure I/O detail; everything that
/// crosses the `EhashIndex` boundary is converted into one of these variants
/// so callers can match on it without depending on `anyhow`.
#[derive(Error, Debug)]
pub enum EhashError {
    /// Failed to open, read, or write either the directory or the hash file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The directory or hash file does not parse, or parses into a state
    /// that violates the directory invariants (e.g. local depth > global
    /// depth, or a directory/bucket-file size mismatch).
    #[error("corrupt index: {0}")]
    Corrupt(String),

    /// Primary-key insert of a key that is already present in the
    /// reachable chain.
    #[error("duplicate key")]
    DuplicateKey,

    /// A single hash sequence has collected more colliding records than the
    /// configured cap on overflow chain length.
    #[error("capacity exhausted: chain at offset {offset} exceeds cap of {cap} blocks")]
    CapacityExhausted { offset: u64, cap: u32 },

    /// Raised at construction time: the record/key layout doesn't fit the
    /// chosen block size, or the configured parameters are nonsensical.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, EhashError>;

/// Internal plumbing returns `anyhow::Error` for I/O and invariant-check
/// failures; this collapses them into `Corrupt` at the public boundary.
impl From<anyhow::Error> for EhashError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<io::Error>() {
            Ok(io_err) => EhashError::Io(io_err),
            Err(err) => EhashError::Corrupt(err.to_string()),
        }
    }
}
