/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::io::{Read, Write};

use super::{
    count_tokens, scan_category, scan_mask, token_spans, Ngrams, Parts, PatternCategory,
    PatternRef,
};
use crate::codec::{marker, varint, ClassDecoder};
use crate::error::{Error, Result};

/// An owning pattern: a byte buffer of variable-length class encodings
/// terminated by the sentinel byte.
///
/// Gaps are stored as literal `skip`/`flex` class bytes. Owning patterns
/// have no token-length limit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern {
    /// Encoded classes followed by exactly one sentinel byte.
    data: Box<[u8]>,
}

impl Pattern {
    /// The empty pattern (just the sentinel).
    pub fn empty() -> Self {
        Pattern {
            data: Box::new([marker::DELIMITER]),
        }
    }

    /// Wraps encoded class bytes (without sentinel) into a pattern.
    pub fn from_encoded(mut body: Vec<u8>) -> Self {
        body.push(marker::DELIMITER);
        Pattern {
            data: body.into_boxed_slice(),
        }
    }

    /// Builds a pattern of `n` consecutive fixed gaps.
    pub fn skip_run(n: usize) -> Self {
        let mut body = vec![marker::SKIP; n];
        body.push(marker::DELIMITER);
        Pattern {
            data: body.into_boxed_slice(),
        }
    }

    /// The single-token flexgram `{**}`.
    pub fn flex_gap() -> Self {
        Pattern {
            data: Box::new([marker::FLEX, marker::DELIMITER]),
        }
    }

    /// Builds a pattern from a class sequence.
    pub fn from_classes(classes: &[u32]) -> Self {
        let mut body = Vec::with_capacity(classes.len());
        for &cls in classes {
            varint::write_class(&mut body, cls);
        }
        Pattern::from_encoded(body)
    }

    /// Reads one pattern from a stream: bytes up to and including the first
    /// unescorted sentinel.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut data = Vec::new();
        let mut byte = [0u8; 1];
        let mut prev_high = false;
        loop {
            if let Err(e) = reader.read_exact(&mut byte) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Err(Error::MalformedData(
                        "pattern truncated before its sentinel".into(),
                    ));
                }
                return Err(e.into());
            }
            data.push(byte[0]);
            if byte[0] == marker::DELIMITER && !prev_high {
                return Ok(Pattern {
                    data: data.into_boxed_slice(),
                });
            }
            prev_high = byte[0] & 0x80 != 0;
        }
    }

    /// Writes the pattern, sentinel included.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// The full buffer, sentinel included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The encoded classes without the trailing sentinel.
    pub fn body(&self) -> &[u8] {
        &self.data[..self.data.len() - 1]
    }

    /// Offset of the sentinel.
    pub fn byte_size(&self) -> usize {
        self.data.len() - 1
    }

    /// Number of tokens.
    pub fn n(&self) -> usize {
        count_tokens(self.body())
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    pub fn category(&self) -> PatternCategory {
        scan_category(self.body())
    }

    /// The gap mask computed from the bytes (bit 31 set iff any gap is
    /// variable-width). Only meaningful for patterns of at most 31 tokens.
    pub fn mask_of(&self) -> u32 {
        scan_mask(self.body())
    }

    /// A borrowed view of this pattern; the view's mask reflects the
    /// literal gap bytes.
    pub fn as_ref(&self) -> PatternRef<'_> {
        PatternRef::new(self.body())
    }

    /// Content hash; equal patterns hash equal across owning patterns and
    /// views of any category.
    pub fn hash64(&self) -> u64 {
        rapidhash::rapidhash(&self.data)
    }

    /// True if the token at `index` is a gap.
    pub fn is_gap(&self, index: usize) -> bool {
        for (i, (start, end)) in token_spans(self.body()).enumerate() {
            if i == index {
                return end - start == 1
                    && (self.data[start] == marker::SKIP || self.data[start] == marker::FLEX);
            }
        }
        false
    }

    /// Number of gap runs.
    pub fn skip_count(&self) -> usize {
        self.gaps().len()
    }

    /// The class at token `index`.
    pub fn class_at(&self, index: usize) -> Result<u32> {
        let (start, _) = token_spans(self.body())
            .nth(index)
            .ok_or(Error::OutOfRange {
                begin: index,
                length: 1,
                len: self.n(),
            })?;
        Ok(varint::read_class(&self.data[start..])?.0)
    }

    /// The class sequence of the pattern.
    pub fn to_classes(&self) -> Vec<u32> {
        token_spans(self.body())
            .map(|(start, _)| varint::read_class(&self.data[start..]).map(|(cls, _)| cls))
            .collect::<Result<_>>()
            .unwrap_or_default()
    }

    /// True if the pattern contains the reserved `unknown` class.
    pub fn unknown(&self) -> bool {
        token_spans(self.body())
            .any(|(start, end)| end - start == 1 && self.data[start] == marker::UNKNOWN)
    }

    /// Copies `length` tokens starting at token `begin` into a new pattern.
    pub fn slice(&self, begin: usize, length: usize) -> Result<Pattern> {
        let view = self.as_ref().slice(begin, length)?;
        Ok(view.to_owned_pattern())
    }

    /// Byte-concatenates two patterns, keeping a single trailing sentinel.
    pub fn concat(&self, other: &Pattern) -> Pattern {
        let mut body = Vec::with_capacity(self.byte_size() + other.byte_size());
        body.extend_from_slice(self.body());
        body.extend_from_slice(other.body());
        Pattern::from_encoded(body)
    }

    /// Byte offset at which `other` occurs contiguously in this pattern, if
    /// any. N-grams only.
    pub fn find(&self, other: &Pattern) -> Option<usize> {
        let haystack = self.body();
        let needle = other.body();
        if needle.is_empty() || needle.len() > haystack.len() {
            return None;
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// True if `other`'s byte sequence occurs contiguously before this
    /// pattern's sentinel.
    pub fn contains(&self, other: &Pattern) -> bool {
        self.find(other).is_some()
    }

    /// Iterates every contiguous window of `n` tokens, with its token
    /// offset. Gap bytes propagate into the windows.
    pub fn ngrams(&self, n: usize) -> Ngrams<'_> {
        self.as_ref().ngrams(n)
    }

    /// The union of `ngrams(n)` for `n` in `min..=max`.
    pub fn subngrams(&self, min: usize, max: usize) -> Vec<(PatternRef<'_>, usize)> {
        self.as_ref().subngrams(min, max)
    }

    /// The maximal contiguous non-gap runs.
    pub fn parts(&self) -> Parts<'_> {
        self.as_ref().parts()
    }

    /// The `(start_token, length)` pairs of every gap run.
    pub fn gaps(&self) -> Vec<(usize, usize)> {
        self.as_ref().gaps()
    }

    /// Replaces every run of fixed gaps by a single variable-width gap;
    /// n-grams come out unchanged.
    pub fn to_flexgram(&self) -> Pattern {
        let mut body = Vec::with_capacity(self.byte_size());
        let mut in_gap = false;
        for (start, end) in token_spans(self.body()) {
            if end - start == 1 && self.data[start] == marker::SKIP {
                if !in_gap {
                    body.push(marker::FLEX);
                    in_gap = true;
                }
            } else {
                body.extend_from_slice(&self.data[start..end]);
                in_gap = false;
            }
        }
        Pattern::from_encoded(body)
    }

    /// Replaces tokens `begin..begin + length` with `replacement`.
    pub fn replace(&self, begin: usize, length: usize, replacement: &Pattern) -> Result<Pattern> {
        let n = self.n();
        if begin + length > n {
            return Err(Error::OutOfRange {
                begin,
                length,
                len: n,
            });
        }
        let mut result = if begin > 0 {
            self.slice(0, begin)?.concat(replacement)
        } else {
            replacement.clone()
        };
        if begin + length < n {
            result = result.concat(&self.slice(begin + length, n - (begin + length))?);
        }
        Ok(result)
    }

    /// Masks the token range `gap` with fixed gaps, producing a skipgram.
    pub fn add_skip(&self, gap: (usize, usize)) -> Result<Pattern> {
        self.replace(gap.0, gap.1, &Pattern::skip_run(gap.1))
    }

    /// Masks several token ranges with fixed gaps.
    pub fn add_skips(&self, gaps: &[(usize, usize)]) -> Result<Pattern> {
        let mut pattern = self.clone();
        for &gap in gaps {
            pattern = pattern.add_skip(gap)?;
        }
        Ok(pattern)
    }

    /// Replaces several token ranges with variable-width gaps.
    pub fn add_flex_gaps(&self, gaps: &[(usize, usize)]) -> Result<Pattern> {
        let mut pattern = self.clone();
        // right to left so earlier spans stay valid as tokens collapse
        let mut sorted: Vec<_> = gaps.to_vec();
        sorted.sort_by(|a, b| b.0.cmp(&a.0));
        for (begin, length) in sorted {
            pattern = pattern.replace(begin, length, &Pattern::flex_gap())?;
        }
        Ok(pattern)
    }

    /// Given an instance with the same token count, extracts the tokens
    /// that occupy this skipgram's gap positions. Gap runs separated by
    /// content are joined with fixed gaps so that the result mirrors the
    /// skipgram's shape. The caller must have verified that `instance` has
    /// the same `n`; the result is unspecified otherwise.
    pub fn extract_skip_content(&self, instance: &Pattern) -> Result<Pattern> {
        match self.category() {
            PatternCategory::Ngram => {
                return Err(Error::InvalidArgument(
                    "cannot extract skip content from a pattern without gaps".into(),
                ))
            }
            PatternCategory::Flexgram => {
                return Err(Error::InvalidArgument(
                    "cannot extract skip content from a pattern with variable-width gaps".into(),
                ))
            }
            PatternCategory::Skipgram => {}
        }
        let gaps = self.gaps();
        let mut iter = gaps.iter();
        let &(first_begin, first_len) = iter.next().ok_or_else(|| {
            Error::Internal("skipgram without gap runs".into())
        })?;
        let mut content = instance.slice(first_begin, first_len)?;
        let mut cursor = first_begin + first_len;
        for &(begin, length) in iter {
            let distance = begin - cursor;
            if distance > 0 {
                content = content.concat(&Pattern::skip_run(distance));
            }
            content = content.concat(&instance.slice(begin, length)?);
            cursor = begin + length;
        }
        Ok(content)
    }

    /// True iff this pattern instantiates `template`: replacing the
    /// template's gap positions with the corresponding tokens of this
    /// pattern yields equality on all non-gap positions.
    pub fn instance_of(&self, template: PatternRef<'_>) -> bool {
        self.as_ref().instance_of(template)
    }

    /// The token-reversed pattern.
    pub fn reverse(&self) -> Pattern {
        let mut body = Vec::with_capacity(self.byte_size());
        let spans: Vec<_> = token_spans(self.body()).collect();
        for &(start, end) in spans.iter().rev() {
            body.extend_from_slice(&self.data[start..end]);
        }
        Pattern::from_encoded(body)
    }

    /// Decodes the pattern to text.
    pub fn to_text(&self, decoder: &ClassDecoder) -> Result<String> {
        let mut out = String::new();
        for cls in self.to_classes() {
            let token = decoder.token(cls).ok_or(Error::NotFound)?;
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(token);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern({:?})", self.to_classes())
    }
}

impl PartialEq<PatternRef<'_>> for Pattern {
    fn eq(&self, other: &PatternRef<'_>) -> bool {
        other == self
    }
}

impl std::ops::Add<&Pattern> for &Pattern {
    type Output = Pattern;

    fn add(self, rhs: &Pattern) -> Pattern {
        self.concat(rhs)
    }
}
