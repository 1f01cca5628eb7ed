/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Model value types and the uniform handler trait over them.
//!
//! There are two canonical values: an unindexed 32-bit occurrence counter
//! and an indexed, sorted sequence of corpus positions. Coercions between
//! them are explicit and invoked only at load time: indexed data coerces to
//! its length, a bare counter coerces to an empty position list (the counts
//! are lost).

use std::io::{Read, Write};

use crate::corpus::IndexReference;
use crate::error::Result;

/// Uniform interface over model values.
pub trait PatternValue: Default + Clone {
    /// True for values that track individual occurrence positions.
    const INDEXED: bool;

    fn read_from(reader: &mut impl Read) -> Result<Self>;
    fn write_to(&self, writer: &mut impl Write) -> Result<()>;

    /// The occurrence count this value represents.
    fn count(&self) -> u32;

    /// Records one occurrence at `position`; counters ignore the position.
    fn add_ref(&mut self, position: IndexReference);

    /// Merges another value into this one (used when occurrences of several
    /// source patterns are attributed to one target pattern).
    fn merge(&mut self, other: &Self);

    /// Human-readable form for the print front-ends.
    fn value_string(&self) -> String;

    /// The position list, for indexed values.
    fn refs(&self) -> Option<&[IndexReference]> {
        None
    }

    /// Restores the published ordering invariant of the position list.
    fn sort_refs(&mut self) {}

    /// Coercion from a stored counter.
    fn from_count(count: u32) -> Self;

    /// Coercion from stored indexed data.
    fn from_indexed(data: IndexedData) -> Self;
}

impl PatternValue for u32 {
    const INDEXED: bool = false;

    fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.to_le_bytes())?;
        Ok(())
    }

    fn count(&self) -> u32 {
        *self
    }

    fn add_ref(&mut self, _position: IndexReference) {
        *self += 1;
    }

    fn merge(&mut self, other: &Self) {
        *self += *other;
    }

    fn value_string(&self) -> String {
        self.to_string()
    }

    fn from_count(count: u32) -> Self {
        count
    }

    fn from_indexed(data: IndexedData) -> Self {
        data.count()
    }
}

/// The occurrence positions of one pattern, kept in `(sentence, token)`
/// order once training finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedData {
    refs: Vec<IndexReference>,
}

impl IndexedData {
    pub fn new() -> Self {
        IndexedData::default()
    }

    pub fn insert(&mut self, position: IndexReference) {
        self.refs.push(position);
    }

    pub fn count(&self) -> u32 {
        self.refs.len() as u32
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexReference> {
        self.refs.iter()
    }

    pub fn as_slice(&self) -> &[IndexReference] {
        &self.refs
    }

    /// Binary-searches when the list is known sorted, else scans.
    pub fn has(&self, position: IndexReference, sorted: bool) -> bool {
        if sorted {
            self.refs.binary_search(&position).is_ok()
        } else {
            self.refs.contains(&position)
        }
    }

    /// The distinct sentences covered.
    pub fn sentences(&self) -> std::collections::BTreeSet<u32> {
        self.refs.iter().map(|r| r.sentence).collect()
    }

    pub fn sort(&mut self) {
        self.refs.sort_unstable();
        self.refs.dedup();
    }
}

impl<'a> IntoIterator for &'a IndexedData {
    type Item = &'a IndexReference;
    type IntoIter = std::slice::Iter<'a, IndexReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

impl FromIterator<IndexReference> for IndexedData {
    fn from_iter<T: IntoIterator<Item = IndexReference>>(iter: T) -> Self {
        IndexedData {
            refs: iter.into_iter().collect(),
        }
    }
}

impl PatternValue for IndexedData {
    const INDEXED: bool = true;

    fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        let count = u32::from_le_bytes(buf);
        // a corrupt count must not trigger a huge allocation up front
        let mut refs = Vec::with_capacity((count as usize).min(1 << 20));
        for _ in 0..count {
            refs.push(IndexReference::read_from(reader)?);
        }
        Ok(IndexedData { refs })
    }

    fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.count().to_le_bytes())?;
        // the ordering invariant holds by the time values are written
        for position in &self.refs {
            position.write_to(writer)?;
        }
        Ok(())
    }

    fn count(&self) -> u32 {
        IndexedData::count(self)
    }

    fn add_ref(&mut self, position: IndexReference) {
        self.insert(position);
    }

    fn merge(&mut self, other: &Self) {
        self.refs.extend_from_slice(&other.refs);
    }

    fn value_string(&self) -> String {
        use itertools::Itertools;
        self.refs.iter().map(|r| r.to_string()).join(" ")
    }

    fn refs(&self) -> Option<&[IndexReference]> {
        Some(&self.refs)
    }

    fn sort_refs(&mut self) {
        self.sort();
    }

    fn from_count(_count: u32) -> Self {
        // counts cannot be turned back into positions
        IndexedData::default()
    }

    fn from_indexed(data: IndexedData) -> Self {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_semantics() {
        let mut v = 0u32;
        v.add_ref(IndexReference::new(1, 0));
        v.add_ref(IndexReference::new(2, 3));
        assert_eq!(v.count(), 2);
        assert_eq!(u32::from_indexed(IndexedData::from_iter([
            IndexReference::new(1, 0),
            IndexReference::new(1, 1),
        ])), 2);
    }

    #[test]
    fn indexed_semantics() {
        let mut v = IndexedData::new();
        v.add_ref(IndexReference::new(2, 1));
        v.add_ref(IndexReference::new(1, 0));
        assert_eq!(v.count(), 2);
        v.sort_refs();
        assert_eq!(
            v.as_slice(),
            &[IndexReference::new(1, 0), IndexReference::new(2, 1)]
        );
        assert!(v.has(IndexReference::new(2, 1), true));
        assert!(!v.has(IndexReference::new(2, 2), true));
        // a counter coerces to an empty position list
        assert!(IndexedData::from_count(42).is_empty());
    }

    #[test]
    fn sort_removes_duplicates() {
        let mut v = IndexedData::from_iter([
            IndexReference::new(1, 1),
            IndexReference::new(1, 1),
            IndexReference::new(1, 0),
        ]);
        v.sort();
        assert_eq!(
            v.as_slice(),
            &[IndexReference::new(1, 0), IndexReference::new(1, 1)]
        );
    }

    #[test]
    fn value_io_roundtrip() {
        let v = IndexedData::from_iter([IndexReference::new(1, 0), IndexReference::new(3, 7)]);
        let mut buf = Vec::new();
        v.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 2 * 6);
        let mut cursor = std::io::Cursor::new(&buf);
        assert_eq!(IndexedData::read_from(&mut cursor).unwrap(), v);

        let c = 7u32;
        let mut buf = Vec::new();
        c.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf);
        assert_eq!(u32::read_from(&mut cursor).unwrap(), 7);
    }
}
