/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The error taxonomy shared by all components.
//!
//! The library reports failures through [`Error`]; the CLI layer wraps them
//! with [`anyhow`] for human-facing context. Parsing of individual patterns
//! during model load is fatal: a partially read model is never returned.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// An option or parameter is out of its admissible range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A token could not be encoded under the strict unknown-token policy.
    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// Corpus or model bytes are inconsistent with the on-disk format.
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// The file was produced by a newer writer than this reader.
    #[error("unsupported version {found} (this reader supports up to {supported})")]
    VersionUnsupported { found: u8, supported: u8 },

    /// A pattern is absent from a model, or cannot be matched at a position.
    #[error("pattern not found")]
    NotFound,

    /// A reverse index or other required resource has not been loaded.
    #[error("no reverse index loaded")]
    NotLoaded,

    /// Slice or token indices exceed the pattern or sentence bounds.
    #[error("slice of {length} tokens at {begin} out of bounds for length {len}")]
    OutOfRange {
        begin: usize,
        length: usize,
        len: usize,
    },

    /// An internal invariant was violated; this is a bug.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True if the error is recoverable when training with
    /// `ignore_errors`: the offending sentence is skipped and
    /// training continues.
    pub fn is_per_sentence(&self) -> bool {
        matches!(self, Error::MalformedData(_) | Error::OutOfRange { .. })
    }
}
