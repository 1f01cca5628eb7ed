/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Pattern models: maps from patterns to occurrence counts or occurrence
//! position lists, together with the training algorithm, pruning, coverage
//! statistics, relations and the versioned on-disk format.
//!
//! A model is generic over its value type: [`PatternModel<u32>`] counts
//! occurrences ([`UnindexedPatternModel`]), [`PatternModel<IndexedData>`]
//! additionally records every `(sentence, token)` anchor
//! ([`IndexedPatternModel`]). Position-dependent functionality (skipgram
//! type thresholds, relations, flexgram computation) requires the indexed
//! variant plus a loaded [`IndexedCorpus`] acting as reverse index.

mod io;
mod options;
mod relations;
mod stats;
mod train;

pub use io::{load_pattern_set, model_type_of, ModelType, MODEL_VERSION};
pub use options::TrainingOptions;
pub use relations::RelationMap;
pub use train::TrainConstraint;

use crate::corpus::{IndexedCorpus, IndexReference};
use crate::error::Result;
use crate::pattern::{Pattern, PatternCategory, PatternRef};
use crate::skipgram::GapConfigurationCache;
use crate::store::{IndexedData, PatternMap, PatternSet, PatternStoreQuery, PatternValue};

pub(crate) use stats::StatsCache;

/// A model counting pattern occurrences.
pub type UnindexedPatternModel = PatternModel<u32>;

/// A model recording every occurrence position.
pub type IndexedPatternModel = PatternModel<IndexedData>;

/// Read-only interface shared by models, used when one model constrains the
/// training or loading of another.
pub trait ModelInterface: PatternStoreQuery {
    fn tokens(&self) -> u64;
    fn types(&self) -> u64;
}

/// A map from patterns to values, with training and statistics.
pub struct PatternModel<V: PatternValue> {
    pub(crate) data: PatternMap<V>,
    pub(crate) total_tokens: u64,
    pub(crate) total_types: u64,
    pub(crate) max_n: usize,
    pub(crate) min_n: usize,
    pub(crate) has_skipgrams: bool,
    pub(crate) has_flexgrams: bool,
    pub(crate) stats: StatsCache,
    pub(crate) gap_cache: GapConfigurationCache,
    pub(crate) match_helpers: Option<relations::MatchHelpers>,
}

impl<V: PatternValue> Default for PatternModel<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: PatternValue> PatternModel<V> {
    pub fn new() -> Self {
        PatternModel {
            data: PatternMap::new(),
            total_tokens: 0,
            total_types: 0,
            max_n: 0,
            min_n: usize::MAX,
            has_skipgrams: false,
            has_flexgrams: false,
            stats: StatsCache::default(),
            gap_cache: GapConfigurationCache::new(),
            match_helpers: None,
        }
    }

    /// Invalidates every derived cache; called on any mutation.
    pub(crate) fn invalidate_caches(&mut self) {
        self.stats.invalidate();
        self.match_helpers = None;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total tokens in the corpus the model was trained on.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Total word types in the corpus the model was trained on.
    pub fn total_types(&self) -> u64 {
        self.total_types
    }

    pub fn set_totals(&mut self, tokens: u64, types: u64) {
        self.total_tokens = tokens;
        self.total_types = types;
    }

    /// Longest pattern in the model.
    pub fn max_length(&self) -> usize {
        self.max_n
    }

    /// Shortest pattern in the model.
    pub fn min_length(&self) -> usize {
        if self.min_n == usize::MAX {
            0
        } else {
            self.min_n
        }
    }

    pub fn has_skipgrams(&self) -> bool {
        self.has_skipgrams
    }

    pub fn has_flexgrams(&self) -> bool {
        self.has_flexgrams
    }

    pub fn contains(&self, pattern: &Pattern) -> bool {
        self.data.contains(pattern)
    }

    /// Membership for a borrowed view.
    pub fn contains_ref(&self, view: PatternRef<'_>) -> bool {
        self.data.contains(&view.to_owned_pattern())
    }

    pub fn get(&self, pattern: &Pattern) -> Option<&V> {
        self.data.get(pattern)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pattern, &V)> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Pattern> {
        self.data.keys()
    }

    /// The occurrence count of a pattern (0 when absent).
    pub fn occurrence_count(&self, pattern: &Pattern) -> u32 {
        self.data.get(pattern).map(V::count).unwrap_or(0)
    }

    pub fn occurrence_count_ref(&self, view: PatternRef<'_>) -> u32 {
        self.occurrence_count(&view.to_owned_pattern())
    }

    /// Records one occurrence of `view` at `position`. Called for every
    /// instance found during training.
    pub fn add(&mut self, view: PatternRef<'_>, position: IndexReference) {
        let pattern = view.to_owned_pattern();
        self.add_pattern(pattern, position);
    }

    pub fn add_pattern(&mut self, pattern: Pattern, position: IndexReference) {
        self.invalidate_caches();
        let n = pattern.n();
        self.max_n = self.max_n.max(n);
        self.min_n = self.min_n.min(n);
        match pattern.category() {
            PatternCategory::Skipgram => self.has_skipgrams = true,
            PatternCategory::Flexgram => self.has_flexgrams = true,
            PatternCategory::Ngram => {}
        }
        self.data.get_or_default(&pattern).add_ref(position);
    }

    pub fn insert(&mut self, pattern: Pattern, value: V) {
        self.invalidate_caches();
        self.data.insert(pattern, value);
    }

    pub fn remove(&mut self, pattern: &Pattern) -> Option<V> {
        self.invalidate_caches();
        self.data.remove(pattern)
    }

    /// Recomputes the length bounds and category flags by scanning the
    /// model; called after loading or bulk edits.
    pub(crate) fn recompute_bounds(&mut self) {
        self.max_n = 0;
        self.min_n = usize::MAX;
        self.has_skipgrams = false;
        self.has_flexgrams = false;
        for (pattern, _) in self.data.iter() {
            let n = pattern.n();
            self.max_n = self.max_n.max(n);
            self.min_n = self.min_n.min(n);
            match pattern.category() {
                PatternCategory::Skipgram => self.has_skipgrams = true,
                PatternCategory::Flexgram => self.has_flexgrams = true,
                PatternCategory::Ngram => {}
            }
        }
    }

    /// Prunes all patterns with occurrence count below `threshold`
    /// (`None` prunes unconditionally), optionally restricted to one
    /// pattern length and one category. Returns the number of patterns
    /// pruned.
    pub fn prune(
        &mut self,
        threshold: Option<u32>,
        n: usize,
        category: Option<PatternCategory>,
    ) -> usize {
        let before = self.data.len();
        self.data.retain(|pattern, value| {
            if n != 0 && pattern.n() != n {
                return true;
            }
            if let Some(category) = category {
                if pattern.category() != category {
                    return true;
                }
            }
            match threshold {
                None => false,
                Some(threshold) => value.count() >= threshold,
            }
        });
        let pruned = before - self.data.len();
        if pruned > 0 {
            self.invalidate_caches();
        }
        pruned
    }

    /// Prunes every pattern shorter than `min_length` tokens.
    pub fn prune_below_length(&mut self, min_length: usize) -> usize {
        let before = self.data.len();
        self.data.retain(|pattern, _| pattern.n() >= min_length);
        let pruned = before - self.data.len();
        if pruned > 0 {
            self.invalidate_caches();
        }
        pruned
    }

    /// Prunes patterns of length `n` not present in `keep`.
    pub fn prune_not_in_set(&mut self, keep: &PatternSet, n: usize) -> usize {
        let before = self.data.len();
        self.data
            .retain(|pattern, _| pattern.n() != n || keep.contains(pattern));
        let pruned = before - self.data.len();
        if pruned > 0 {
            self.invalidate_caches();
        }
        pruned
    }

    /// Keeps only patterns also present in `other` (model intersection).
    pub fn prune_by_model(&mut self, other: &dyn PatternStoreQuery) -> usize {
        let before = self.data.len();
        self.data.retain(|pattern, _| other.contains_pattern(pattern));
        let pruned = before - self.data.len();
        if pruned > 0 {
            self.invalidate_caches();
        }
        pruned
    }

    /// Applies the post-load options: category removal, value reset and
    /// index removal. Returns the number of patterns removed.
    pub fn apply_post_load_options(&mut self, options: &TrainingOptions) -> usize {
        let removed = self.remove_categories(options);
        if options.do_reset || (options.do_remove_index && V::INDEXED) {
            self.invalidate_caches();
            for (_, value) in self.data.iter_mut() {
                *value = V::default();
            }
        }
        removed
    }

    /// Removes whole categories, per the post-load filter options.
    pub fn remove_categories(&mut self, options: &TrainingOptions) -> usize {
        if !(options.do_remove_ngrams || options.do_remove_skipgrams || options.do_remove_flexgrams)
        {
            return 0;
        }
        let before = self.data.len();
        self.data.retain(|pattern, _| match pattern.category() {
            PatternCategory::Ngram => !options.do_remove_ngrams,
            PatternCategory::Skipgram => !options.do_remove_skipgrams,
            PatternCategory::Flexgram => !options.do_remove_flexgrams,
        });
        let pruned = before - self.data.len();
        if pruned > 0 {
            self.invalidate_caches();
            self.recompute_bounds();
        }
        pruned
    }

    /// The maximum number of corpus tokens this pattern may cover: its
    /// occurrence count times its length. Exact when no two occurrences
    /// overlap.
    pub fn coverage_count(&self, pattern: &Pattern) -> u64 {
        self.occurrence_count(pattern) as u64 * pattern.n() as u64
    }

    /// Coverage as a fraction of the corpus token count.
    pub fn coverage(&self, pattern: &Pattern) -> f64 {
        if self.total_tokens == 0 {
            return 0.0;
        }
        self.coverage_count(pattern) as f64 / self.total_tokens as f64
    }

    /// The occurrence count of a pattern as a fraction of the total
    /// occurrences within its own (category, size) group.
    pub fn frequency(&mut self, pattern: &Pattern) -> f64 {
        let count = self.occurrence_count(pattern);
        let group =
            self.total_occurrences_in_group(Some(pattern.category()), pattern.n());
        if group == 0 {
            0.0
        } else {
            count as f64 / group as f64
        }
    }

    /// Prints all patterns with their statistics as tab-separated rows.
    pub fn print(
        &mut self,
        out: &mut impl std::io::Write,
        decoder: &crate::codec::ClassDecoder,
    ) -> Result<()> {
        writeln!(
            out,
            "PATTERN\tCOUNT\tTOKENS\tCOVERAGE\tCATEGORY\tSIZE\tFREQUENCY\tREFERENCES"
        )?;
        let patterns: Vec<Pattern> = self.data.keys().cloned().collect();
        for pattern in patterns {
            self.print_pattern(out, decoder, &pattern)?;
        }
        Ok(())
    }

    /// Prints one pattern row.
    pub fn print_pattern(
        &mut self,
        out: &mut impl std::io::Write,
        decoder: &crate::codec::ClassDecoder,
        pattern: &Pattern,
    ) -> Result<()> {
        let text = pattern.to_text(decoder)?;
        let count = self.occurrence_count(pattern);
        let coverage_count = self.coverage_count(pattern);
        let coverage = self.coverage(pattern);
        let frequency = self.frequency(pattern);
        let references = self
            .data
            .get(pattern)
            .map(V::value_string)
            .unwrap_or_default();
        writeln!(
            out,
            "{}\t{}\t{}\t{:.7}\t{}\t{}\t{:.7}\t{}",
            text,
            count,
            coverage_count,
            coverage,
            pattern.category(),
            pattern.n(),
            frequency,
            if V::INDEXED { references } else { String::new() },
        )?;
        Ok(())
    }

    /// Re-sorts every position list so downstream consumers may rely on
    /// `(sentence, token)` ordering. A no-op for unindexed models.
    pub fn sort_indices(&mut self) {
        for (_, value) in self.data.iter_mut() {
            value.sort_refs();
        }
    }
}

impl IndexedPatternModel {
    /// The position list of a pattern.
    pub fn references(&self, pattern: &Pattern) -> Option<&IndexedData> {
        self.data.get(pattern)
    }

    /// Removes all position information, keeping patterns with zeroed
    /// counts.
    pub fn remove_index(&mut self) {
        self.invalidate_caches();
        for (_, value) in self.data.iter_mut() {
            *value = IndexedData::new();
        }
    }

    /// Dumps the reverse index: for every corpus position, the patterns in
    /// the model that start there.
    pub fn print_reverse_index(
        &mut self,
        corpus: &IndexedCorpus,
        out: &mut impl std::io::Write,
        decoder: &crate::codec::ClassDecoder,
    ) -> Result<()> {
        for sentence in 1..=corpus.sentences() {
            let length = corpus.sentence_length(sentence)?;
            for token in 0..length {
                let position = IndexReference::new(sentence, token as u16);
                let patterns = self.patterns_at(corpus, position, 0, None, 0);
                let mut texts = Vec::with_capacity(patterns.len());
                for pattern in patterns {
                    texts.push(pattern.to_text(decoder)?);
                }
                texts.sort();
                writeln!(out, "{}\t{}", position, texts.join("\t"))?;
            }
        }
        Ok(())
    }
}

impl<V: PatternValue> PatternStoreQuery for PatternModel<V> {
    fn contains_pattern(&self, pattern: &Pattern) -> bool {
        self.contains(pattern)
    }
}

impl<V: PatternValue> ModelInterface for PatternModel<V> {
    fn tokens(&self) -> u64 {
        self.total_tokens
    }

    fn types(&self) -> u64 {
        self.total_types
    }
}

/// A pattern-set model: patterns without values, with corpus totals. The
/// usual in-memory form of a constraint ("joined") model.
#[derive(Default)]
pub struct PatternSetModel {
    pub set: PatternSet,
    pub total_tokens: u64,
    pub total_types: u64,
}

impl PatternStoreQuery for PatternSetModel {
    fn contains_pattern(&self, pattern: &Pattern) -> bool {
        self.set.contains(pattern)
    }
}

impl ModelInterface for PatternSetModel {
    fn tokens(&self) -> u64 {
        self.total_tokens
    }

    fn types(&self) -> u64 {
        self.total_types
    }
}

#[allow(unused_imports)]
pub(crate) use stats::category_code;

#[cfg(test)]
mod tests {
    use super::*;

    fn p(classes: &[u32]) -> Pattern {
        Pattern::from_classes(classes)
    }

    #[test]
    fn add_and_count() {
        let mut model: UnindexedPatternModel = PatternModel::new();
        model.add_pattern(p(&[6, 7]), IndexReference::new(1, 0));
        model.add_pattern(p(&[6, 7]), IndexReference::new(2, 0));
        assert_eq!(model.occurrence_count(&p(&[6, 7])), 2);
        assert_eq!(model.occurrence_count(&p(&[6])), 0);
    }

    #[test]
    fn indexed_add_records_positions() {
        let mut model: IndexedPatternModel = PatternModel::new();
        model.add_pattern(p(&[6]), IndexReference::new(2, 1));
        model.add_pattern(p(&[6]), IndexReference::new(1, 0));
        model.sort_indices();
        assert_eq!(
            model.references(&p(&[6])).unwrap().as_slice(),
            &[IndexReference::new(1, 0), IndexReference::new(2, 1)]
        );
    }

    #[test]
    fn prune_by_threshold_and_length() {
        let mut model: UnindexedPatternModel = PatternModel::new();
        model.insert(p(&[6]), 5);
        model.insert(p(&[7]), 1);
        model.insert(p(&[6, 7]), 1);
        assert_eq!(model.prune(Some(2), 1, None), 1);
        assert!(model.contains(&p(&[6])));
        assert!(!model.contains(&p(&[7])));
        // the bigram was outside the pruned length class
        assert!(model.contains(&p(&[6, 7])));
        assert_eq!(model.prune(None, 2, None), 1);
        assert!(!model.is_empty());
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn coverage_bound() {
        let mut model: UnindexedPatternModel = PatternModel::new();
        model.insert(p(&[6, 7]), 3);
        model.set_totals(100, 10);
        assert_eq!(model.coverage_count(&p(&[6, 7])), 6);
        assert!(model.coverage(&p(&[6, 7])) <= 1.0);
    }
}
