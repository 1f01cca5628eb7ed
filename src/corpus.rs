/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The indexed corpus: a class-encoded corpus loaded in full into memory,
//! with a sentence index providing position-to-pattern lookup (the *reverse
//! index* of pattern models).
//!
//! The corpus owns the only copy of the decoded bytes; every
//! [`PatternRef`] handed out borrows it and the borrow checker guarantees
//! no view outlives the buffer.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::codec::decoder::{corpus_body, upgrade_v1};
use crate::codec::marker;
use crate::error::{Error, Result};
use crate::pattern::{Pattern, PatternCategory, PatternRef, FLEX_BIT};
use crate::skipgram::gaps_to_mask;

/// A position in the corpus: 1-indexed sentence, 0-indexed token. Ordered
/// lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IndexReference {
    pub sentence: u32,
    pub token: u16,
}

impl IndexReference {
    pub fn new(sentence: u32, token: u16) -> Self {
        IndexReference { sentence, token }
    }

    /// The position `delta` tokens to the right.
    pub fn advanced(self, delta: u16) -> Self {
        IndexReference {
            sentence: self.sentence,
            token: self.token + delta,
        }
    }

    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut sentence = [0u8; 4];
        let mut token = [0u8; 2];
        reader.read_exact(&mut sentence)?;
        reader.read_exact(&mut token)?;
        Ok(IndexReference {
            sentence: u32::from_le_bytes(sentence),
            token: u16::from_le_bytes(token),
        })
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.sentence.to_le_bytes())?;
        writer.write_all(&self.token.to_le_bytes())?;
        Ok(())
    }
}

impl std::fmt::Display for IndexReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.sentence, self.token)
    }
}

/// An encoded corpus held in memory as one contiguous byte buffer plus a
/// sentence index. Immutable once loaded.
pub struct IndexedCorpus {
    /// Version-2 corpus body (no magic); sentences terminated by the
    /// sentinel byte.
    data: Vec<u8>,
    /// Byte offset at which each sentence starts; entry `i` is sentence
    /// `i + 1`.
    sentence_index: Vec<usize>,
    total_tokens: u64,
}

impl IndexedCorpus {
    /// Builds the index over raw corpus file bytes, transparently upgrading
    /// version-1 corpora in memory.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        let (version, _) = corpus_body(&bytes);
        let data = if version == 1 {
            log::info!("Upgrading version-1 corpus in memory");
            upgrade_v1(&bytes)?
        } else {
            bytes.drain(..2);
            bytes
        };

        let mut sentence_index = Vec::new();
        let mut total_tokens = 0u64;
        let mut at_sentence_start = true;
        let mut prev_high = false;
        for (offset, &byte) in data.iter().enumerate() {
            if at_sentence_start {
                sentence_index.push(offset);
                at_sentence_start = false;
            }
            if byte & 0x80 == 0 {
                if byte == marker::DELIMITER && !prev_high {
                    at_sentence_start = true;
                } else {
                    total_tokens += 1;
                }
            }
            prev_high = byte & 0x80 != 0;
        }
        log::info!("Loaded {} sentences", sentence_index.len());
        Ok(IndexedCorpus {
            data,
            sentence_index,
            total_tokens,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        IndexedCorpus::from_bytes(bytes)
    }

    /// The number of sentences; sentences are numbered `1..=sentences()`.
    pub fn sentences(&self) -> u32 {
        self.sentence_index.len() as u32
    }

    /// The total number of tokens (sentence delimiters excluded).
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// The corpus body bytes (version-2 layout, no magic).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn sentence_start(&self, sentence: u32) -> Result<usize> {
        if sentence == 0 || sentence as usize > self.sentence_index.len() {
            return Err(Error::NotFound);
        }
        Ok(self.sentence_index[sentence as usize - 1])
    }

    /// Byte offset of the token at `position`.
    fn pointer(&self, position: IndexReference) -> Result<usize> {
        let mut offset = self.sentence_start(position.sentence)?;
        let mut token = 0u16;
        let mut prev_high = false;
        while offset < self.data.len() {
            if token == position.token {
                return Ok(offset);
            }
            let byte = self.data[offset];
            if byte & 0x80 == 0 {
                if byte == marker::DELIMITER && !prev_high {
                    break;
                }
                token += 1;
            }
            prev_high = byte & 0x80 != 0;
            offset += 1;
        }
        Err(Error::NotFound)
    }

    /// A view of `length` tokens starting at `position`; fails with
    /// [`Error::NotFound`] if the sentence does not exist or the range
    /// overflows it.
    pub fn get_pattern(&self, position: IndexReference, length: usize) -> Result<PatternRef<'_>> {
        let start = self.pointer(position)?;
        let mut end = start;
        let mut tokens = 0;
        let mut prev_high = false;
        while end < self.data.len() && tokens < length {
            let byte = self.data[end];
            if byte & 0x80 == 0 {
                if byte == marker::DELIMITER && !prev_high {
                    return Err(Error::NotFound);
                }
                tokens += 1;
            }
            prev_high = byte & 0x80 != 0;
            end += 1;
        }
        if tokens < length {
            return Err(Error::NotFound);
        }
        Ok(PatternRef::new(&self.data[start..end]))
    }

    /// The token count of a sentence.
    pub fn sentence_length(&self, sentence: u32) -> Result<usize> {
        let start = self.sentence_start(sentence)?;
        let mut tokens = 0;
        let mut prev_high = false;
        for &byte in &self.data[start..] {
            if byte & 0x80 == 0 {
                if byte == marker::DELIMITER && !prev_high {
                    break;
                }
                tokens += 1;
            }
            prev_high = byte & 0x80 != 0;
        }
        Ok(tokens)
    }

    /// A view of an entire sentence.
    pub fn get_sentence(&self, sentence: u32) -> Result<PatternRef<'_>> {
        let length = self.sentence_length(sentence)?;
        if length == 0 {
            let start = self.sentence_start(sentence)?;
            return Ok(PatternRef::new(&self.data[start..start]));
        }
        self.get_pattern(IndexReference::new(sentence, 0), length)
    }

    /// Iterates `(sentence_number, sentence_view)` pairs.
    pub fn sentence_iter(&self) -> impl Iterator<Item = (u32, PatternRef<'_>)> {
        (1..=self.sentences()).filter_map(move |s| self.get_sentence(s).ok().map(|p| (s, p)))
    }

    /// Matches `template` anchored at `position` and returns the matching
    /// view, whose category is forced to `result_category`.
    ///
    /// N-gram templates compare directly. Skipgram templates compare each
    /// non-gap part positionally; the result carries the template's mask
    /// (plus the flexgram bit when requested). Flexgram templates match
    /// greedily left to right, each gap absorbing at least one token; the
    /// result carries a fresh mask encoding the matched gap widths.
    pub fn find_pattern_at(
        &self,
        position: IndexReference,
        template: &Pattern,
        result_category: PatternCategory,
    ) -> Result<PatternRef<'_>> {
        match template.category() {
            PatternCategory::Ngram => {
                let candidate = self.get_pattern(position, template.n())?;
                if candidate != *template {
                    return Err(Error::NotFound);
                }
                Ok(candidate)
            }
            PatternCategory::Skipgram => {
                let view = template.as_ref();
                for (begin, length) in view.part_spans() {
                    let part = view.slice(begin, length)?;
                    let candidate =
                        self.get_pattern(position.advanced(begin as u16), length)?;
                    if candidate != part {
                        return Err(Error::NotFound);
                    }
                }
                let mut result = self.get_pattern(position, template.n())?;
                if result_category == PatternCategory::Ngram {
                    return Ok(result);
                }
                let mut mask = template.mask_of() & !FLEX_BIT;
                if result_category == PatternCategory::Flexgram {
                    mask |= FLEX_BIT;
                }
                result = PatternRef::with_mask(result.as_bytes(), mask);
                Ok(result)
            }
            PatternCategory::Flexgram => {
                let view = template.as_ref();
                let spans = view.part_spans();
                let sentence_len = self.sentence_length(position.sentence)?;
                let mut gaps = Vec::new();
                let mut cursor = position.token as usize;
                let mut gap_begin = None;
                for (index, &(begin, length)) in spans.iter().enumerate() {
                    let part = view.slice(begin, length)?;
                    if index == 0 {
                        let candidate = self.get_pattern(position, length)?;
                        if candidate != part {
                            return Err(Error::NotFound);
                        }
                        cursor += length;
                        gap_begin = Some(cursor);
                        continue;
                    }
                    // greedy: advance the anchor until the part matches
                    let mut pos = cursor + 1;
                    loop {
                        if pos + length > sentence_len {
                            return Err(Error::NotFound);
                        }
                        let candidate = self
                            .get_pattern(IndexReference::new(position.sentence, pos as u16), length)?;
                        if candidate == part {
                            break;
                        }
                        pos += 1;
                    }
                    let gap_start = gap_begin.take().ok_or_else(|| {
                        Error::Internal("flexgram part without preceding gap".into())
                    })?;
                    gaps.push((
                        gap_start - position.token as usize,
                        pos - gap_start,
                    ));
                    cursor = pos + length;
                    gap_begin = Some(cursor);
                }
                if gaps.len() + 1 != spans.len() {
                    return Err(Error::NotFound);
                }
                let total = cursor - position.token as usize;
                let matched = self.get_pattern(position, total)?;
                if result_category == PatternCategory::Ngram {
                    return Ok(matched);
                }
                let mut mask = gaps_to_mask(&gaps);
                if result_category == PatternCategory::Flexgram {
                    mask |= FLEX_BIT;
                }
                Ok(PatternRef::with_mask(matched.as_bytes(), mask))
            }
        }
    }

    /// Scans all positions of `sentence` (or of every sentence when 0) for
    /// occurrences of `template`. Unavoidably slow; pattern models are the
    /// normal path. When `instantiate` is set, matches of gapped templates
    /// are returned as plain n-gram views.
    pub fn find_pattern(
        &self,
        template: &Pattern,
        sentence: u32,
        instantiate: bool,
    ) -> Vec<(IndexReference, PatternRef<'_>)> {
        let mut result = Vec::new();
        let result_category = if instantiate {
            PatternCategory::Ngram
        } else {
            template.category()
        };
        let sentences: Box<dyn Iterator<Item = u32>> = if sentence == 0 {
            Box::new(1..=self.sentences())
        } else {
            Box::new(std::iter::once(sentence))
        };
        for s in sentences {
            let Ok(len) = self.sentence_length(s) else {
                continue;
            };
            for token in 0..len {
                let position = IndexReference::new(s, token as u16);
                if let Ok(found) = self.find_pattern_at(position, template, result_category) {
                    result.push((position, found));
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reserved;

    /// Corpus of two sentences: "6 7 8 9" and "6 7".
    fn corpus() -> IndexedCorpus {
        let bytes = vec![0xa2, 0x02, 6, 7, 8, 9, 0, 6, 7, 0];
        IndexedCorpus::from_bytes(bytes).unwrap()
    }

    #[test]
    fn index_reference_ordering() {
        let a = IndexReference::new(1, 5);
        let b = IndexReference::new(2, 0);
        let c = IndexReference::new(2, 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn index_reference_io() {
        let r = IndexReference::new(300, 7);
        let mut buf = Vec::new();
        r.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 6);
        let mut cursor = std::io::Cursor::new(&buf);
        assert_eq!(IndexReference::read_from(&mut cursor).unwrap(), r);
    }

    #[test]
    fn sentences_and_lengths() {
        let corpus = corpus();
        assert_eq!(corpus.sentences(), 2);
        assert_eq!(corpus.sentence_length(1).unwrap(), 4);
        assert_eq!(corpus.sentence_length(2).unwrap(), 2);
        assert_eq!(corpus.total_tokens(), 6);
        assert!(corpus.sentence_length(3).is_err());
    }

    #[test]
    fn get_pattern_respects_sentence_bounds() {
        let corpus = corpus();
        let p = corpus
            .get_pattern(IndexReference::new(1, 1), 2)
            .unwrap()
            .to_owned_pattern();
        assert_eq!(p.to_classes(), vec![7, 8]);
        // range overflows the first sentence
        assert!(corpus.get_pattern(IndexReference::new(1, 3), 2).is_err());
        assert!(corpus.get_pattern(IndexReference::new(9, 0), 1).is_err());
    }

    #[test]
    fn get_sentence_views() {
        let corpus = corpus();
        assert_eq!(
            corpus.get_sentence(2).unwrap().to_owned_pattern().to_classes(),
            vec![6, 7]
        );
    }

    #[test]
    fn find_ngram_at_position() {
        let corpus = corpus();
        let template = Pattern::from_classes(&[7, 8]);
        assert!(corpus
            .find_pattern_at(IndexReference::new(1, 1), &template, PatternCategory::Ngram)
            .is_ok());
        assert!(corpus
            .find_pattern_at(IndexReference::new(1, 0), &template, PatternCategory::Ngram)
            .is_err());
    }

    #[test]
    fn find_skipgram_at_position() {
        let corpus = corpus();
        let template = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        let found = corpus
            .find_pattern_at(
                IndexReference::new(1, 0),
                &template,
                PatternCategory::Skipgram,
            )
            .unwrap();
        assert_eq!(found.mask(), 0b010);
        assert_eq!(found.category(), PatternCategory::Skipgram);
        assert!(found == template);
    }

    #[test]
    fn find_flexgram_matches_greedily() {
        // sentence 1 is 6 7 8 9; template 6 {**} 9 must match with a
        // two-token gap
        let corpus = corpus();
        let template = Pattern::from_classes(&[6, reserved::FLEX, 9]);
        let found = corpus
            .find_pattern_at(
                IndexReference::new(1, 0),
                &template,
                PatternCategory::Flexgram,
            )
            .unwrap();
        assert_eq!(found.n(), 4);
        assert_eq!(found.mask() & !FLEX_BIT, 0b0110);
        assert!(found.is_flexgram());
    }

    #[test]
    fn find_pattern_scans_all_sentences() {
        let corpus = corpus();
        let template = Pattern::from_classes(&[6, 7]);
        let matches = corpus.find_pattern(&template, 0, false);
        let positions: Vec<_> = matches.iter().map(|(r, _)| *r).collect();
        assert_eq!(
            positions,
            vec![IndexReference::new(1, 0), IndexReference::new(2, 0)]
        );
    }

    #[test]
    fn v1_corpus_loads_transparently() {
        // "6 7" in the version-1 layout
        let v1 = vec![1u8, 6, 1, 7, 0];
        let corpus = IndexedCorpus::from_bytes(v1).unwrap();
        assert_eq!(corpus.sentences(), 1);
        assert_eq!(
            corpus.get_sentence(1).unwrap().to_owned_pattern().to_classes(),
            vec![6, 7]
        );
    }
}
