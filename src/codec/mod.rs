/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The class codec: a bidirectional mapping between textual tokens and small
//! positive integer classes, plus the byte-level codec used to store class
//! sequences.
//!
//! Classes are assigned from a frequency-ranked vocabulary so that frequent
//! tokens get small classes and therefore short encodings. A handful of
//! classes is reserved and never assigned to corpus tokens; see
//! [`reserved`].

pub mod decoder;
pub mod encoder;
pub mod varint;

pub use decoder::ClassDecoder;
pub use encoder::{ClassEncoder, UnknownPolicy};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;

/// Reserved classes, never assigned to corpus tokens.
pub mod reserved {
    /// Sentence and pattern terminator; its single-byte encoding doubles as
    /// the end-of-pattern sentinel.
    pub const DELIMITER: u32 = 0;
    /// Placeholder for tokens outside the vocabulary, `{?}` in text form.
    pub const UNKNOWN: u32 = 1;
    /// A fixed-width gap of exactly one token, `{*}` in text form.
    pub const SKIP: u32 = 2;
    /// A variable-width gap of one or more tokens, `{**}` in text form.
    pub const FLEX: u32 = 3;
    /// Structural boundary, `{|}` in text form.
    pub const BOUNDARY: u32 = 4;
    /// The lowest class the encoder may assign to a corpus token.
    pub const FIRST_ASSIGNABLE: u32 = 6;
}

/// Single-byte images of the reserved classes, usable directly on encoded
/// data.
pub mod marker {
    pub const DELIMITER: u8 = super::reserved::DELIMITER as u8;
    pub const UNKNOWN: u8 = super::reserved::UNKNOWN as u8;
    pub const SKIP: u8 = super::reserved::SKIP as u8;
    pub const FLEX: u8 = super::reserved::FLEX as u8;
}

/// Magic prefix of a version-2 encoded corpus file.
pub const CORPUS_MAGIC: [u8; 2] = [0xa2, 0x02];

/// Version-1 corpora mark gaps with magic bytes instead of reserved classes.
pub const V1_SKIP_MARKER: u8 = 128;
pub const V1_FLEX_MARKER: u8 = 129;

/// Textual form of a reserved class, if it has one.
pub fn reserved_str(cls: u32) -> Option<&'static str> {
    match cls {
        reserved::UNKNOWN => Some("{?}"),
        reserved::SKIP => Some("{*}"),
        reserved::FLEX => Some("{**}"),
        reserved::BOUNDARY => Some("{|}"),
        _ => None,
    }
}

/// Opens a plain-text input file, transparently decompressing `.bz2` and
/// `.gz` suffixes.
pub fn open_text(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let name = path.to_string_lossy();
    if name.ends_with(".bz2") {
        Ok(Box::new(BufReader::new(bzip2::read::BzDecoder::new(file))))
    } else if name.ends_with(".gz") {
        Ok(Box::new(BufReader::new(flate2::read::GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
