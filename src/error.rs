// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Crate-wide error type.
//!
//! Only *soft* failures (per-call, recoverable by the caller) and
//! configuration/IO failures are represented here. Fatal conditions —
//! malformed blocks on reopen, allocator exhaustion, programmer invariant
//! violations such as acquiring more than [`crate::allocator::CHUNK`] slots —
//! are `panic!`/`assert!` at the point of violation, matching the source
//! system's "fatal errors abort the process" contract. Nothing here is ever
//! silently swallowed.

use crate::coding::DecodeError;

/// Errors that can occur while operating on blocks, layouts, and
/// configuration.
#[derive(Debug)]
pub enum Error {
    /// A tuple could not be inserted into an otherwise-empty block; its
    /// fixed byte length exceeds the block's capacity. Retrying in another
    /// block will not help.
    TupleTooLarge,

    /// The current block (or sub-block) had no room left for the value
    /// being inserted. The caller may retry in a different block.
    BlockFull,

    /// An ad hoc insert succeeded in the tuple store but exhausted an
    /// index's capacity; the insert was rolled back and every affected
    /// index rebuilt. The caller may retry in a different block.
    IndexSpaceExhausted,

    /// A sub-block was asked to construct itself over a memory region too
    /// small to hold even its own fixed metadata.
    RegionTooSmall(String),

    /// A block was reopened from a memory image whose header failed
    /// validation (bad magic, size mismatch, or invalid layout description).
    MalformedBlock(String),

    /// Deserializing a header or layout description failed.
    Decode(DecodeError),

    /// The experiment-driver configuration was invalid or unparsable.
    Config(String),

    /// Underlying I/O error (reading a configuration file).
    Io(std::io::Error),

    /// Underlying JSON (de)serialization error.
    #[cfg(feature = "cli")]
    Json(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TupleTooLarge => write!(f, "tuple too large for block"),
            Self::BlockFull => write!(f, "block is full"),
            Self::IndexSpaceExhausted => write!(f, "index ran out of space during ad hoc insert"),
            Self::RegionTooSmall(msg) => write!(f, "region too small: {msg}"),
            Self::MalformedBlock(msg) => write!(f, "malformed block: {msg}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "cli")]
            Self::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(feature = "cli")]
impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
