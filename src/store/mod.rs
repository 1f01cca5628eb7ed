/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Hash-based pattern containers and their binary serialisation.
//!
//! Both containers serialise as a 64-bit record count followed by the
//! records; a record is the pattern's bytes up to and including the
//! sentinel, optionally followed by the value's own binary form.
//! Deserialisation is filtered: token-length bounds, a minimum occurrence
//! count, a category mask, an optional constraint store and a value reset
//! can all be applied while reading.

mod values;

pub use values::{IndexedData, PatternValue};

use std::io::{Read, Write};

use bitflags::bitflags;
use rapidhash::{RapidHashMap, RapidHashSet};

use crate::error::{Error, Result};
use crate::pattern::{Pattern, PatternCategory, PatternRef};

bitflags! {
    /// Category filter for store deserialisation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Categories: u8 {
        const NGRAM = 1;
        const SKIPGRAM = 2;
        const FLEXGRAM = 4;
    }
}

impl Default for Categories {
    fn default() -> Self {
        Categories::all()
    }
}

impl Categories {
    pub fn admits(&self, category: PatternCategory) -> bool {
        match category {
            PatternCategory::Ngram => self.contains(Categories::NGRAM),
            PatternCategory::Skipgram => self.contains(Categories::SKIPGRAM),
            PatternCategory::Flexgram => self.contains(Categories::FLEXGRAM),
        }
    }
}

/// Read-only membership interface shared by pattern stores and models, used
/// for constraint filtering while reading.
pub trait PatternStoreQuery {
    fn contains_pattern(&self, pattern: &Pattern) -> bool;
}

/// Filters applied while deserialising a store.
#[derive(Clone, Copy)]
pub struct ReadFilter<'a> {
    /// Minimum occurrence count (only effective when the stored value is a
    /// count).
    pub min_tokens: u32,
    /// Token-length bounds, inclusive.
    pub min_length: usize,
    pub max_length: usize,
    /// Categories to retain.
    pub categories: Categories,
    /// Only patterns present in this store are retained.
    pub constraint: Option<&'a dyn PatternStoreQuery>,
    /// Load the structure but zero the values.
    pub reset: bool,
}

impl Default for ReadFilter<'_> {
    fn default() -> Self {
        ReadFilter {
            min_tokens: 0,
            min_length: 0,
            max_length: usize::MAX,
            categories: Categories::all(),
            constraint: None,
            reset: false,
        }
    }
}

impl ReadFilter<'_> {
    fn admits(&self, pattern: &Pattern, count: u32) -> bool {
        let n = pattern.n();
        if n < self.min_length || n > self.max_length {
            return false;
        }
        if count < self.min_tokens {
            return false;
        }
        if !self.categories.admits(pattern.category()) {
            return false;
        }
        if let Some(constraint) = self.constraint {
            if !constraint.contains_pattern(pattern) {
                return false;
            }
        }
        true
    }
}

/// A hash set of owning patterns.
#[derive(Default)]
pub struct PatternSet {
    data: RapidHashSet<Pattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        PatternSet::default()
    }

    pub fn insert(&mut self, pattern: Pattern) -> bool {
        self.data.insert(pattern)
    }

    pub fn contains(&self, pattern: &Pattern) -> bool {
        self.data.contains(pattern)
    }

    /// Membership for a borrowed view; the view is materialised for the
    /// lookup.
    pub fn contains_ref(&self, view: PatternRef<'_>) -> bool {
        self.data.contains(&view.to_owned_pattern())
    }

    pub fn remove(&mut self, pattern: &Pattern) -> bool {
        self.data.remove(pattern)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.data.iter()
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&(self.data.len() as u64).to_le_bytes())?;
        for pattern in &self.data {
            pattern.write_to(writer)?;
        }
        Ok(())
    }

    pub fn read_from(reader: &mut impl Read, filter: &ReadFilter<'_>) -> Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let count = u64::from_le_bytes(buf);
        let mut set = PatternSet::new();
        for i in 0..count {
            let pattern = Pattern::read_from(reader).map_err(|e| {
                Error::MalformedData(format!("pattern {} of {}: {}", i + 1, count, e))
            })?;
            if filter.admits(&pattern, u32::MAX) {
                set.insert(pattern);
            }
        }
        Ok(set)
    }
}

impl PatternStoreQuery for PatternSet {
    fn contains_pattern(&self, pattern: &Pattern) -> bool {
        self.contains(pattern)
    }
}

impl FromIterator<Pattern> for PatternSet {
    fn from_iter<T: IntoIterator<Item = Pattern>>(iter: T) -> Self {
        PatternSet {
            data: iter.into_iter().collect(),
        }
    }
}

/// A hash map from owning patterns to values.
#[derive(Default)]
pub struct PatternMap<V> {
    data: RapidHashMap<Pattern, V>,
}

impl<V> PatternMap<V> {
    pub fn new() -> Self {
        PatternMap {
            data: RapidHashMap::default(),
        }
    }

    pub fn insert(&mut self, pattern: Pattern, value: V) {
        self.data.insert(pattern, value);
    }

    pub fn get(&self, pattern: &Pattern) -> Option<&V> {
        self.data.get(pattern)
    }

    pub fn get_mut(&mut self, pattern: &Pattern) -> Option<&mut V> {
        self.data.get_mut(pattern)
    }

    pub fn contains(&self, pattern: &Pattern) -> bool {
        self.data.contains_key(pattern)
    }

    pub fn remove(&mut self, pattern: &Pattern) -> Option<V> {
        self.data.remove(pattern)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pattern, &V)> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Pattern, &mut V)> {
        self.data.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Pattern> {
        self.data.keys()
    }

    pub fn retain(&mut self, f: impl FnMut(&Pattern, &mut V) -> bool) {
        self.data.retain(f);
    }
}

impl<V: Default> PatternMap<V> {
    /// The value for `pattern`, inserting a default if absent.
    pub fn get_or_default(&mut self, pattern: &Pattern) -> &mut V {
        self.data.entry(pattern.clone()).or_default()
    }
}

impl<V: PatternValue> PatternMap<V> {
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&(self.data.len() as u64).to_le_bytes())?;
        for (pattern, value) in &self.data {
            pattern.write_to(writer)?;
            value.write_to(writer)?;
        }
        Ok(())
    }

    /// Reads a map whose stored value type is `S`, coercing every value to
    /// `V`. The coercion goes through the canonical forms: an indexed
    /// stored value coerces via its position list, an unindexed one via
    /// its count.
    pub fn read_from<S: PatternValue>(
        reader: &mut impl Read,
        filter: &ReadFilter<'_>,
    ) -> Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let count = u64::from_le_bytes(buf);
        let mut map = PatternMap::new();
        for i in 0..count {
            let pattern = Pattern::read_from(reader).map_err(|e| {
                Error::MalformedData(format!("pattern {} of {}: {}", i + 1, count, e))
            })?;
            let stored = S::read_from(reader).map_err(|e| {
                Error::MalformedData(format!("value of pattern {} of {}: {}", i + 1, count, e))
            })?;
            if !filter.admits(&pattern, stored.count()) {
                continue;
            }
            let value = if filter.reset {
                V::default()
            } else if S::INDEXED {
                V::from_indexed(
                    stored
                        .refs()
                        .map(|refs| refs.iter().copied().collect())
                        .unwrap_or_default(),
                )
            } else {
                V::from_count(stored.count())
            };
            map.insert(pattern, value);
        }
        Ok(map)
    }
}

impl<V> PatternStoreQuery for PatternMap<V> {
    fn contains_pattern(&self, pattern: &Pattern) -> bool {
        self.contains(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reserved;
    use crate::corpus::IndexReference;

    fn p(classes: &[u32]) -> Pattern {
        Pattern::from_classes(classes)
    }

    #[test]
    fn set_roundtrip() {
        let mut set = PatternSet::new();
        set.insert(p(&[6, 7]));
        set.insert(p(&[6, 7, 8]));
        set.insert(p(&[9]));
        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded = PatternSet::read_from(&mut cursor, &ReadFilter::default()).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.contains(&p(&[6, 7, 8])));
    }

    #[test]
    fn set_read_honours_length_filter() {
        let mut set = PatternSet::new();
        set.insert(p(&[6]));
        set.insert(p(&[6, 7]));
        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        let filter = ReadFilter {
            min_length: 2,
            ..Default::default()
        };
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded = PatternSet::read_from(&mut cursor, &filter).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&p(&[6, 7])));
    }

    #[test]
    fn map_roundtrip_with_counts() {
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6, 7]), 4);
        map.insert(p(&[8]), 1);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> =
            PatternMap::read_from::<u32>(&mut cursor, &ReadFilter::default()).unwrap();
        assert_eq!(reloaded.get(&p(&[6, 7])), Some(&4));
        assert_eq!(reloaded.get(&p(&[8])), Some(&1));
    }

    #[test]
    fn map_coerces_indexed_to_counts() {
        let mut map: PatternMap<IndexedData> = PatternMap::new();
        let refs: IndexedData = [IndexReference::new(1, 0), IndexReference::new(2, 5)]
            .into_iter()
            .collect();
        map.insert(p(&[6, 7]), refs);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> =
            PatternMap::read_from::<IndexedData>(&mut cursor, &ReadFilter::default()).unwrap();
        assert_eq!(reloaded.get(&p(&[6, 7])), Some(&2));
    }

    #[test]
    fn map_coerces_counts_to_empty_indices() {
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6, 7]), 9);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<IndexedData> =
            PatternMap::read_from::<u32>(&mut cursor, &ReadFilter::default()).unwrap();
        assert!(reloaded.get(&p(&[6, 7])).unwrap().is_empty());
    }

    #[test]
    fn min_tokens_filter_drops_rare_patterns() {
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6]), 1);
        map.insert(p(&[7]), 5);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let filter = ReadFilter {
            min_tokens: 2,
            ..Default::default()
        };
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> = PatternMap::read_from::<u32>(&mut cursor, &filter).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&p(&[7])));
    }

    #[test]
    fn category_filter() {
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6, 7]), 2);
        map.insert(p(&[6, reserved::SKIP, 7]), 2);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let filter = ReadFilter {
            categories: Categories::NGRAM,
            ..Default::default()
        };
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> = PatternMap::read_from::<u32>(&mut cursor, &filter).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&p(&[6, 7])));
    }

    #[test]
    fn constraint_filter_retains_intersection() {
        let mut constraint = PatternSet::new();
        constraint.insert(p(&[6]));
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6]), 3);
        map.insert(p(&[7]), 3);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let filter = ReadFilter {
            constraint: Some(&constraint),
            ..Default::default()
        };
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> = PatternMap::read_from::<u32>(&mut cursor, &filter).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&p(&[6])));
    }

    #[test]
    fn reset_zeroes_values() {
        let mut map: PatternMap<u32> = PatternMap::new();
        map.insert(p(&[6]), 3);
        let mut buf = Vec::new();
        map.write_to(&mut buf).unwrap();
        let filter = ReadFilter {
            reset: true,
            ..Default::default()
        };
        let mut cursor = std::io::Cursor::new(&buf);
        let reloaded: PatternMap<u32> = PatternMap::read_from::<u32>(&mut cursor, &filter).unwrap();
        assert_eq!(reloaded.get(&p(&[6])), Some(&0));
    }
}
