/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Cached coverage statistics per (category, size) group.
//!
//! Every mutation of the model (adding, pruning, retraining) invalidates
//! the caches; the expensive coverage pass is re-run lazily on the next
//! query.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;

use itertools::Itertools;

use crate::corpus::IndexReference;
use crate::error::Result;
use crate::pattern::{Pattern, PatternCategory};
use crate::store::PatternValue;

use super::PatternModel;

/// Group key component: 0 stands for "all categories".
pub(crate) fn category_code(category: Option<PatternCategory>) -> u8 {
    match category {
        None => 0,
        Some(PatternCategory::Ngram) => 1,
        Some(PatternCategory::Skipgram) => 2,
        Some(PatternCategory::Flexgram) => 3,
    }
}

fn code_category(code: u8) -> Option<PatternCategory> {
    match code {
        1 => Some(PatternCategory::Ngram),
        2 => Some(PatternCategory::Skipgram),
        3 => Some(PatternCategory::Flexgram),
        _ => None,
    }
}

/// Lazily computed per-group totals. A group is a (category, size) pair,
/// with 0 meaning "all" on either axis.
#[derive(Default)]
pub(crate) struct StatsCache {
    pub(crate) computed: bool,
    pub(crate) categories: BTreeSet<u8>,
    pub(crate) sizes: BTreeSet<usize>,
    pub(crate) occurrences: HashMap<(u8, usize), u64>,
    pub(crate) patterns: HashMap<(u8, usize), u64>,
    pub(crate) covered_types: HashMap<(u8, usize), u64>,
    pub(crate) covered_tokens: HashMap<(u8, usize), u64>,
    pub(crate) coverage_done: HashSet<(u8, usize)>,
}

impl StatsCache {
    pub(crate) fn invalidate(&mut self) {
        *self = StatsCache::default();
    }
}

impl<V: PatternValue> PatternModel<V> {
    /// Computes occurrence and pattern totals per group; cached until the
    /// next mutation.
    pub fn compute_stats(&mut self) {
        if self.stats.computed {
            return;
        }
        self.stats.invalidate();
        self.stats.categories.insert(0);
        self.stats.sizes.insert(0);
        for (pattern, value) in self.data.iter() {
            let code = category_code(Some(pattern.category()));
            let n = pattern.n();
            let count = value.count() as u64;
            self.stats.categories.insert(code);
            self.stats.sizes.insert(n);
            // flexgrams have no well-defined size class: their per-n totals
            // are only accumulated under size 0
            if pattern.category() != PatternCategory::Flexgram {
                *self.stats.occurrences.entry((code, n)).or_default() += count;
                *self.stats.occurrences.entry((0, n)).or_default() += count;
                *self.stats.patterns.entry((code, n)).or_default() += 1;
                *self.stats.patterns.entry((0, n)).or_default() += 1;
            }
            *self.stats.occurrences.entry((code, 0)).or_default() += count;
            *self.stats.occurrences.entry((0, 0)).or_default() += count;
            *self.stats.patterns.entry((code, 0)).or_default() += 1;
            *self.stats.patterns.entry((0, 0)).or_default() += 1;
        }
        self.stats.computed = true;
    }

    /// Computes covered-token and covered-type totals for the requested
    /// groups (`None`/0 for all). Unindexed models report upper-bound
    /// projections (count × size, overlaps not deduplicated); indexed
    /// models derive exact values from the union of occurrence positions.
    pub fn compute_coverage_stats(&mut self, category: Option<PatternCategory>, size: usize) {
        self.compute_stats();
        let categories: Vec<u8> = self.stats.categories.iter().copied().collect();
        let sizes: Vec<usize> = self.stats.sizes.iter().copied().collect();
        for &code in &categories {
            if category.is_some() && code != category_code(category) && code != 0 {
                continue;
            }
            for &n in &sizes {
                if (size != 0 && n != size && n != 0)
                    || self.stats.coverage_done.contains(&(code, n))
                {
                    continue;
                }
                let group_category = code_category(code);
                let mut types: HashSet<Pattern> = HashSet::new();
                let mut positions: BTreeSet<IndexReference> = BTreeSet::new();
                let mut projected = 0u64;
                for (pattern, value) in self.data.iter() {
                    let pn = pattern.n();
                    let in_category = group_category
                        .map(|c| pattern.category() == c)
                        .unwrap_or(true);
                    let in_group = (n == 0 || pn == n) && in_category;
                    if pn == 1 && n <= 1 && in_category {
                        types.insert(pattern.clone());
                    } else if in_group {
                        for (unigram, _) in pattern.ngrams(1) {
                            types.insert(unigram.to_owned_pattern());
                        }
                    }
                    if in_group {
                        if let Some(refs) = value.refs() {
                            for position in refs {
                                for i in 0..pn as u16 {
                                    positions.insert(position.advanced(i));
                                }
                            }
                        } else {
                            projected += value.count() as u64 * pn as u64;
                        }
                    }
                }
                let covered = if V::INDEXED {
                    positions.len() as u64
                } else {
                    projected
                };
                self.stats.covered_types.insert((code, n), types.len() as u64);
                self.stats.covered_tokens.insert((code, n), covered);
                self.stats.coverage_done.insert((code, n));
            }
        }
    }

    /// Total occurrences within a (category, size) group.
    pub fn total_occurrences_in_group(
        &mut self,
        category: Option<PatternCategory>,
        size: usize,
    ) -> u64 {
        self.compute_stats();
        self.stats
            .occurrences
            .get(&(category_code(category), size))
            .copied()
            .unwrap_or(0)
    }

    /// Distinct patterns within a (category, size) group.
    pub fn total_patterns_in_group(
        &mut self,
        category: Option<PatternCategory>,
        size: usize,
    ) -> u64 {
        self.compute_stats();
        self.stats
            .patterns
            .get(&(category_code(category), size))
            .copied()
            .unwrap_or(0)
    }

    /// Distinct covered word types within a (category, size) group.
    pub fn total_word_types_in_group(
        &mut self,
        category: Option<PatternCategory>,
        size: usize,
    ) -> u64 {
        let key = (category_code(category), size);
        if !self.stats.coverage_done.contains(&key) {
            self.compute_coverage_stats(category, size);
        }
        self.stats.covered_types.get(&key).copied().unwrap_or(0)
    }

    /// Covered token positions within a (category, size) group.
    pub fn total_tokens_in_group(
        &mut self,
        category: Option<PatternCategory>,
        size: usize,
    ) -> u64 {
        let key = (category_code(category), size);
        if !self.stats.coverage_done.contains(&key) {
            self.compute_coverage_stats(category, size);
        }
        self.stats.covered_tokens.get(&key).copied().unwrap_or(0)
    }

    /// Writes the statistical report: corpus totals, covered/uncovered
    /// splits, and one row per (category, size) group.
    pub fn report(&mut self, out: &mut impl Write, no_coverage: bool) -> Result<()> {
        if no_coverage {
            self.compute_stats();
        } else {
            self.compute_coverage_stats(None, 0);
        }
        writeln!(out, "REPORT")?;
        if !V::INDEXED && !no_coverage {
            writeln!(
                out,
                "   Warning: the model is unindexed; token coverage counts are maximal projections"
            )?;
            writeln!(
                out,
                "            assuming no overlap at all. Use an indexed model for exact counts."
            )?;
        }
        writeln!(out, "----------------------------------")?;
        writeln!(
            out,
            "                          {:>15}{:>15}{:>15}{:>15}",
            "PATTERNS", "TOKENS", "COVERAGE", "TYPES"
        )?;
        writeln!(
            out,
            "Total:                    {:>15}{:>15}{:>15}{:>15}",
            "-",
            self.total_tokens,
            "-",
            self.total_types
        )?;
        if !no_coverage {
            let covered_tokens = self
                .total_tokens_in_group(None, 0)
                .min(self.total_tokens);
            let covered_types = self.total_word_types_in_group(None, 0);
            let uncovered = self.total_tokens - covered_tokens;
            let total = self.total_tokens.max(1) as f64;
            writeln!(
                out,
                "Uncovered:                {:>15}{:>15}{:>15.4}{:>15}",
                "-",
                uncovered,
                uncovered as f64 / total,
                self.total_types.saturating_sub(covered_types)
            )?;
            writeln!(
                out,
                "Covered:                  {:>15}{:>15}{:>15.4}{:>15}",
                self.len(),
                covered_tokens,
                covered_tokens as f64 / total,
                covered_types
            )?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}",
            "CATEGORY", "N (SIZE)", "PATTERNS", "TOKENS", "COVERAGE", "TYPES", "OCCURRENCES"
        )?;
        let categories: Vec<u8> = self.stats.categories.iter().copied().collect();
        let sizes: Vec<usize> = self.stats.sizes.iter().copied().collect();
        let total = self.total_tokens.max(1) as f64;
        for code in categories {
            for &n in &sizes {
                if self.stats.patterns.get(&(code, n)).is_none() {
                    continue;
                }
                let category_name = match code_category(code) {
                    None => "all".to_string(),
                    Some(c) => c.to_string(),
                };
                let size_name = if n == 0 {
                    "all".to_string()
                } else {
                    n.to_string()
                };
                let patterns = self.stats.patterns[&(code, n)];
                let occurrences = self.stats.occurrences.get(&(code, n)).copied().unwrap_or(0);
                if no_coverage {
                    writeln!(
                        out,
                        "{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}",
                        category_name, size_name, patterns, "-", "-", "-", occurrences
                    )?;
                } else {
                    let tokens = self
                        .stats
                        .covered_tokens
                        .get(&(code, n))
                        .copied()
                        .unwrap_or(0);
                    let types = self
                        .stats
                        .covered_types
                        .get(&(code, n))
                        .copied()
                        .unwrap_or(0);
                    writeln!(
                        out,
                        "{:>15}{:>15}{:>15}{:>15}{:>15.4}{:>15}{:>15}",
                        category_name,
                        size_name,
                        patterns,
                        tokens,
                        tokens as f64 / total,
                        types,
                        occurrences
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Writes the occurrence-count histogram, optionally capped and
    /// thresholded.
    pub fn histogram(
        &mut self,
        out: &mut impl Write,
        threshold: u32,
        cap: Option<usize>,
    ) -> Result<()> {
        let mut histogram: HashMap<u32, u64> = HashMap::new();
        for (_, value) in self.data.iter() {
            let count = value.count();
            if count >= threshold {
                *histogram.entry(count).or_default() += 1;
            }
        }
        writeln!(out, "HISTOGRAM")?;
        writeln!(out, "------------------------------")?;
        writeln!(out, "OCCURRENCES\tPATTERNS")?;
        let rows = histogram.into_iter().sorted();
        let rows: Box<dyn Iterator<Item = (u32, u64)>> = match cap {
            Some(cap) => Box::new(rows.take(cap)),
            None => Box::new(rows),
        };
        for (count, patterns) in rows {
            writeln!(out, "{}\t{}", count, patterns)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::IndexReference;
    use crate::model::{IndexedPatternModel, UnindexedPatternModel};
    use crate::store::IndexedData;

    fn p(classes: &[u32]) -> Pattern {
        Pattern::from_classes(classes)
    }

    #[test]
    fn group_totals() {
        let mut model = UnindexedPatternModel::new();
        model.insert(p(&[6]), 3);
        model.insert(p(&[7]), 2);
        model.insert(p(&[6, 7]), 2);
        assert_eq!(model.total_occurrences_in_group(None, 0), 7);
        assert_eq!(model.total_occurrences_in_group(None, 1), 5);
        assert_eq!(model.total_patterns_in_group(None, 1), 2);
        assert_eq!(
            model.total_occurrences_in_group(Some(PatternCategory::Ngram), 2),
            2
        );
    }

    #[test]
    fn caches_invalidate_on_mutation() {
        let mut model = UnindexedPatternModel::new();
        model.insert(p(&[6]), 3);
        assert_eq!(model.total_occurrences_in_group(None, 0), 3);
        model.insert(p(&[7]), 1);
        assert_eq!(model.total_occurrences_in_group(None, 0), 4);
        model.prune(Some(2), 0, None);
        assert_eq!(model.total_occurrences_in_group(None, 0), 3);
    }

    #[test]
    fn unindexed_coverage_is_projection() {
        let mut model = UnindexedPatternModel::new();
        model.insert(p(&[6, 7]), 3);
        assert_eq!(model.total_tokens_in_group(None, 2), 6);
    }

    #[test]
    fn indexed_coverage_deduplicates_overlaps() {
        let mut model = IndexedPatternModel::new();
        let mut refs = IndexedData::new();
        // two overlapping bigram occurrences cover three positions
        refs.insert(IndexReference::new(1, 0));
        refs.insert(IndexReference::new(1, 1));
        model.insert(p(&[6, 6]), refs);
        assert_eq!(model.total_tokens_in_group(None, 2), 3);
    }

    #[test]
    fn covered_types_count_unigrams() {
        let mut model = UnindexedPatternModel::new();
        model.insert(p(&[6, 7]), 1);
        model.insert(p(&[7, 8]), 1);
        assert_eq!(model.total_word_types_in_group(None, 2), 3);
    }
}
