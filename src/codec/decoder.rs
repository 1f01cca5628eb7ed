/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Decoding class byte sequences back into text, and reading encoded corpus
//! files of either format version.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use super::{open_text, reserved, reserved_str, varint, CORPUS_MAGIC, V1_FLEX_MARKER, V1_SKIP_MARKER};
use crate::error::{Error, Result};

/// Maps classes back to tokens.
///
/// The reserved gap and unknown classes always decode to their textual forms
/// (`{*}`, `{**}`, `{?}`, `{|}`).
pub struct ClassDecoder {
    classes: HashMap<u32, String>,
    highest: u32,
}

impl Default for ClassDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassDecoder {
    pub fn new() -> Self {
        ClassDecoder {
            classes: HashMap::new(),
            highest: 0,
        }
    }

    /// Loads a class file (`class TAB token` per line).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut decoder = ClassDecoder::new();
        let reader = open_text(&path)?;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (cls_s, token) = line.split_once('\t').ok_or_else(|| {
                Error::MalformedData(format!("class file line {} has no tab", lineno + 1))
            })?;
            let cls: u32 = cls_s.parse().map_err(|_| {
                Error::MalformedData(format!("bad class id on line {}", lineno + 1))
            })?;
            decoder.add(cls, token.to_string());
        }
        Ok(decoder)
    }

    pub fn add(&mut self, cls: u32, token: String) {
        if cls > self.highest {
            self.highest = cls;
        }
        self.classes.insert(cls, token);
    }

    /// The number of known token classes, reserved ones excluded.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn highest_class(&self) -> u32 {
        self.highest
    }

    /// The textual form of a class, or `None` if the class is unknown to
    /// this decoder.
    pub fn token(&self, cls: u32) -> Option<&str> {
        reserved_str(cls).or_else(|| self.classes.get(&cls).map(String::as_str))
    }

    /// Drops all classes at or above `threshold`.
    pub fn prune(&mut self, threshold: u32) {
        self.classes.retain(|&cls, _| cls < threshold);
        self.highest = threshold.saturating_sub(1);
    }

    /// Decodes an encoded corpus file to text, one sentence per line.
    /// `start`/`end` select a 1-indexed line range; 0 disables a bound.
    /// Returns the number of lines processed.
    pub fn decode_file(
        &self,
        input: impl AsRef<Path>,
        out: &mut impl Write,
        start: u32,
        end: u32,
    ) -> Result<u64> {
        let file = File::open(input)?;
        let mut reader = BufReader::new(file);
        let version = read_corpus_version(&mut reader)?;
        if version == 1 {
            return self.decode_v1(&mut reader, out, start, end);
        }

        let mut line = 1u32;
        let mut first = true;
        while let Some(cls) = varint::read_class_from(&mut reader)? {
            let selected = (start == 0 || line >= start) && (end == 0 || line <= end);
            if cls == reserved::DELIMITER {
                if selected {
                    writeln!(out)?;
                }
                line += 1;
                first = true;
            } else if selected {
                let token = self.token(cls).ok_or_else(|| {
                    Error::MalformedData(format!("unknown class {} in corpus", cls))
                })?;
                if !first {
                    write!(out, " ")?;
                }
                write!(out, "{}", token)?;
                first = false;
            }
        }
        log::info!("Processed {} lines", line - 1);
        Ok((line - 1) as u64)
    }

    fn decode_v1(
        &self,
        reader: &mut impl Read,
        out: &mut impl Write,
        start: u32,
        end: u32,
    ) -> Result<u64> {
        let mut line = 1u32;
        let mut first = true;
        let mut byte = [0u8; 1];
        loop {
            match reader.read_exact(&mut byte) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let selected = (start == 0 || line >= start) && (end == 0 || line <= end);
            match byte[0] {
                0 => {
                    if selected {
                        writeln!(out)?;
                    }
                    line += 1;
                    first = true;
                }
                len @ 1..=127 => {
                    let mut payload = vec![0u8; len as usize];
                    reader.read_exact(&mut payload)?;
                    if selected {
                        let cls = varint::read_class_v1(&payload);
                        let token = self.token(cls).ok_or_else(|| {
                            Error::MalformedData(format!("unknown class {} in corpus", cls))
                        })?;
                        if !first {
                            write!(out, " ")?;
                        }
                        write!(out, "{}", token)?;
                        first = false;
                    }
                }
                V1_SKIP_MARKER | V1_FLEX_MARKER => {
                    if selected {
                        if !first {
                            write!(out, " ")?;
                        }
                        write!(
                            out,
                            "{}",
                            if byte[0] == V1_SKIP_MARKER { "{*}" } else { "{**}" }
                        )?;
                        first = false;
                    }
                }
                // other v1 markers carry no tokens
                _ => {}
            }
        }
        Ok((line - 1) as u64)
    }
}

/// Reads the corpus version from the head of a stream. Version-2 corpora
/// start with the magic prefix; anything else is a version-1 corpus whose
/// first byte has already been determined to not match (the reader is left
/// positioned after the consumed bytes, so callers must only rely on this
/// with rewindable readers or treat a non-magic result as version 1 with the
/// first bytes pushed back).
pub fn read_corpus_version(reader: &mut impl BufRead) -> Result<u8> {
    let buf = reader.fill_buf()?;
    if buf.len() >= 2 && buf[0] == CORPUS_MAGIC[0] && buf[1] == CORPUS_MAGIC[1] {
        reader.consume(2);
        Ok(2)
    } else {
        Ok(1)
    }
}

/// Detects the corpus version of in-memory bytes and returns the version
/// together with the body (magic stripped for version 2).
pub fn corpus_body(data: &[u8]) -> (u8, &[u8]) {
    if data.len() >= 2 && data[0] == CORPUS_MAGIC[0] && data[1] == CORPUS_MAGIC[1] {
        (2, &data[2..])
    } else {
        (1, data)
    }
}

/// Upgrades a version-1 corpus body to the version-2 byte format in memory:
/// length-prefixed tokens become variable-length class encodings and the
/// legacy gap markers become the reserved gap classes.
pub fn upgrade_v1(old: &[u8]) -> Result<Vec<u8>> {
    let mut new = Vec::with_capacity(old.len());
    let mut i = 0;
    while i < old.len() {
        match old[i] {
            0 => {
                new.push(reserved::DELIMITER as u8);
                i += 1;
            }
            len @ 1..=127 => {
                let len = len as usize;
                if i + 1 + len > old.len() {
                    return Err(Error::MalformedData(
                        "truncated token in version-1 corpus".into(),
                    ));
                }
                let cls = varint::read_class_v1(&old[i + 1..i + 1 + len]);
                varint::write_class(&mut new, cls);
                i += 1 + len;
            }
            V1_SKIP_MARKER => {
                new.push(reserved::SKIP as u8);
                i += 1;
            }
            V1_FLEX_MARKER => {
                new.push(reserved::FLEX as u8);
                i += 1;
            }
            // other v1 markers are dropped on upgrade
            _ => i += 1,
        }
    }
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_classes_always_decode() {
        let decoder = ClassDecoder::new();
        assert_eq!(decoder.token(reserved::SKIP), Some("{*}"));
        assert_eq!(decoder.token(reserved::FLEX), Some("{**}"));
        assert_eq!(decoder.token(reserved::UNKNOWN), Some("{?}"));
        assert_eq!(decoder.token(7), None);
    }

    #[test]
    fn v1_upgrade_matches_v2_encoding() {
        // "a b c" with classes 6, 7, 8 in the v1 layout: 1-byte length
        // prefix, then the payload, sentence terminated by 0.
        let v1 = [1u8, 6, 1, 7, 1, 8, 0];
        let upgraded = upgrade_v1(&v1).unwrap();
        assert_eq!(upgraded, vec![6, 7, 8, 0]);
    }

    #[test]
    fn v1_gap_markers_become_reserved_classes() {
        let v1 = [1u8, 6, V1_SKIP_MARKER, 1, 7, V1_FLEX_MARKER, 0];
        let upgraded = upgrade_v1(&v1).unwrap();
        assert_eq!(
            upgraded,
            vec![6, reserved::SKIP as u8, 7, reserved::FLEX as u8, 0]
        );
    }

    #[test]
    fn v1_multibyte_token_payloads_upgrade() {
        // class 300 in v1: two base-256 bytes, little-endian
        let v1 = [2u8, 44, 1, 0];
        let upgraded = upgrade_v1(&v1).unwrap();
        let (cls, len) = varint::read_class(&upgraded).unwrap();
        assert_eq!(cls, 300);
        assert_eq!(upgraded.len(), len + 1);
    }

    #[test]
    fn corpus_body_detects_version() {
        assert_eq!(corpus_body(&[0xa2, 0x02, 6, 0]), (2, &[6u8, 0][..]));
        assert_eq!(corpus_body(&[1, 6, 0]), (1, &[1u8, 6, 0][..]));
    }
}
