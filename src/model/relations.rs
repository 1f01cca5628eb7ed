/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Position-to-pattern lookup and the relations between patterns of an
//! indexed model: subsumption, adjacency, co-occurrence, abstraction and
//! instantiation, and skip content. All of these require a loaded reverse
//! index ([`IndexedCorpus`]).

use std::collections::{HashMap, HashSet};
use std::collections::BTreeSet;
use std::io::Write;

use itertools::Itertools;

use crate::codec::ClassDecoder;
use crate::corpus::{IndexedCorpus, IndexReference};
use crate::error::{Error, Result};
use crate::pattern::{Pattern, PatternCategory, PatternRef, FLEX_BIT, MAX_VIEW_TOKENS};
use crate::skipgram::{head_gap, reverse_mask, tail_gap};
use crate::store::{Categories, IndexedData, PatternMap, PatternValue};

use super::{IndexedPatternModel, PatternModel};

/// A map from patterns to co-occurrence counts, as returned by every
/// relation query.
pub type RelationMap = PatternMap<u32>;

/// Accelerates position-to-pattern lookup: the distinct gap masks of the
/// model's skipgrams per length, and the flexgrams to try.
#[derive(Default)]
pub(crate) struct MatchHelpers {
    pub(crate) skipgram_masks: HashMap<usize, Vec<u32>>,
    pub(crate) flexgrams: Vec<Pattern>,
}

impl<V: PatternValue> PatternModel<V> {
    pub(crate) fn ensure_match_helpers(&mut self) {
        if self.match_helpers.is_some() {
            return;
        }
        let mut masks: HashMap<usize, BTreeSet<u32>> = HashMap::new();
        let mut flexgrams = Vec::new();
        for (pattern, _) in self.data.iter() {
            match pattern.category() {
                PatternCategory::Skipgram => {
                    let n = pattern.n();
                    if n <= MAX_VIEW_TOKENS {
                        masks
                            .entry(n)
                            .or_default()
                            .insert(pattern.mask_of() & !FLEX_BIT);
                    }
                }
                PatternCategory::Flexgram => flexgrams.push(pattern.clone()),
                PatternCategory::Ngram => {}
            }
        }
        self.match_helpers = Some(MatchHelpers {
            skipgram_masks: masks
                .into_iter()
                .map(|(n, set)| (n, set.into_iter().collect()))
                .collect(),
            flexgrams,
        });
    }

    fn admits_count(&self, view: PatternRef<'_>, min_count: u32) -> bool {
        if min_count == 0 {
            self.contains_ref(view)
        } else {
            self.occurrence_count_ref(view) >= min_count
        }
    }

    /// All patterns of the model that start at `position`, including the
    /// skipgrams and flexgrams covering it. Optionally filtered by a
    /// minimum occurrence count, a category set and an exact size.
    pub fn patterns_at<'c>(
        &mut self,
        corpus: &'c IndexedCorpus,
        position: IndexReference,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Vec<PatternRef<'c>> {
        self.ensure_match_helpers();
        let Some(helpers) = self.match_helpers.take() else {
            return Vec::new();
        };
        let categories = categories.unwrap_or_default();
        let include_skipgrams =
            categories.contains(Categories::SKIPGRAM) && self.has_skipgrams;
        let include_flexgrams =
            categories.contains(Categories::FLEXGRAM) && self.has_flexgrams;

        let mut result = Vec::new();
        let sentence_len = match corpus.sentence_length(position.sentence) {
            Ok(len) => len,
            Err(_) => {
                self.match_helpers = Some(helpers);
                return result;
            }
        };
        let min_n = self.min_length().max(1);
        let max_n = self.max_length();
        for n in min_n..=max_n {
            if position.token as usize + n > sentence_len {
                break;
            }
            if size != 0 && n != size {
                continue;
            }
            let Ok(ngram) = corpus.get_pattern(position, n) else {
                break;
            };
            if categories.admits(ngram.category()) && self.admits_count(ngram, min_count) {
                result.push(ngram);
            }
            if include_skipgrams && n >= 3 {
                if let Some(masks) = helpers.skipgram_masks.get(&n) {
                    for &mask in masks {
                        let skipgram = PatternRef::with_mask(ngram.as_bytes(), mask);
                        if self.admits_count(skipgram, min_count) {
                            result.push(skipgram);
                        }
                    }
                }
            }
        }
        if include_flexgrams {
            for flexgram in &helpers.flexgrams {
                if size != 0 && flexgram.n() != size {
                    continue;
                }
                if let Ok(view) =
                    corpus.find_pattern_at(position, flexgram, PatternCategory::Flexgram)
                {
                    if self.admits_count(view, min_count) {
                        result.push(view);
                    }
                }
            }
        }
        self.match_helpers = Some(helpers);
        result
    }
}

/// Extracts the content filling the gaps of a skipgram occurrence: the
/// corpus tokens at the gap positions, with the skipgram's inner content
/// positions masked, leading and trailing content trimmed.
fn skip_content_at<'c>(
    corpus: &'c IndexedCorpus,
    position: IndexReference,
    n: usize,
    mask: u32,
) -> Option<PatternRef<'c>> {
    let content_mask = reverse_mask(mask, n);
    let head = head_gap(content_mask, n);
    let tail = tail_gap(content_mask, n);
    if head + tail >= n {
        return None;
    }
    let raw = corpus.get_pattern(position, n).ok()?;
    let view = PatternRef::with_mask(raw.as_bytes(), content_mask);
    view.slice(head, n - head - tail).ok()
}

/// Number of distinct fillers observed in the gaps of `pattern` over its
/// occurrences.
pub(crate) fn distinct_skip_content(
    corpus: &IndexedCorpus,
    pattern: &Pattern,
    refs: &[IndexReference],
) -> usize {
    let n = pattern.n();
    let mask = pattern.mask_of() & !FLEX_BIT;
    let mut fillers: HashSet<Pattern> = HashSet::new();
    for &position in refs {
        if let Some(content) = skip_content_at(corpus, position, n, mask) {
            fillers.insert(content.to_owned_pattern());
        }
    }
    fillers.len()
}

fn prune_relations(map: &mut RelationMap, min_count: u32) {
    if min_count > 0 {
        map.retain(|_, count| *count >= min_count);
    }
}

impl IndexedPatternModel {
    fn positions_of(&self, pattern: &Pattern) -> Result<Vec<IndexReference>> {
        self.references(pattern)
            .map(|refs| refs.as_slice().to_vec())
            .ok_or(Error::NotFound)
    }

    /// Patterns whose occurrences instantiate the gaps of `pattern`
    /// (a skipgram or flexgram), with counts. Skipgram and skip content
    /// complement each other.
    pub fn skip_content(
        &self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
    ) -> Result<RelationMap> {
        let mut result = RelationMap::new();
        let refs = self.positions_of(pattern)?;
        match pattern.category() {
            PatternCategory::Ngram => {}
            PatternCategory::Skipgram => {
                let n = pattern.n();
                let mask = pattern.mask_of() & !FLEX_BIT;
                for position in refs {
                    if let Some(content) = skip_content_at(corpus, position, n, mask) {
                        *result.get_or_default(&content.to_owned_pattern()) += 1;
                    }
                }
            }
            PatternCategory::Flexgram => {
                // gap widths vary per occurrence; re-match to recover them
                for position in refs {
                    let Ok(view) =
                        corpus.find_pattern_at(position, pattern, PatternCategory::Flexgram)
                    else {
                        continue;
                    };
                    let n = view.n();
                    if let Some(content) =
                        skip_content_at(corpus, position, n, view.mask() & !FLEX_BIT)
                    {
                        *result.get_or_default(&content.to_owned_pattern()) += 1;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Patterns in the model subsumed by some occurrence of `pattern`.
    pub fn sub_children(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let is_gapped = pattern.category() != PatternCategory::Ngram;
        let mut result = RelationMap::new();
        for position in refs {
            for i in 0..n {
                let begin = position.advanced(i as u16);
                let max_sub_n = n - i;
                let candidates = self.patterns_at(corpus, begin, min_count, categories, size);
                for candidate in candidates {
                    let candidate_n = candidate.n();
                    if candidate_n > max_sub_n {
                        continue;
                    }
                    let owned = candidate.to_owned_pattern();
                    if owned == *pattern {
                        continue;
                    }
                    match candidate.category() {
                        PatternCategory::Flexgram => continue,
                        PatternCategory::Skipgram => {
                            let Ok(template) = pattern.slice(i, candidate_n) else {
                                continue;
                            };
                            if candidate.instance_of(template.as_ref())
                                || template.as_ref().instance_of(candidate)
                            {
                                *result.get_or_default(&owned) += 1;
                            }
                        }
                        PatternCategory::Ngram => {
                            if is_gapped {
                                let Ok(template) = pattern.slice(i, candidate_n) else {
                                    continue;
                                };
                                if !candidate.instance_of(template.as_ref()) {
                                    continue;
                                }
                            }
                            *result.get_or_default(&owned) += 1;
                        }
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Patterns in the model that subsume some occurrence of `pattern`.
    pub fn sub_parents(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let mut result = RelationMap::new();
        for position in refs {
            for start in 0..=position.token {
                let begin = IndexReference::new(position.sentence, start);
                let min_parent_n = n + (position.token - start) as usize;
                let candidates = self.patterns_at(corpus, begin, min_count, categories, size);
                for candidate in candidates {
                    if candidate.n() < min_parent_n {
                        continue;
                    }
                    let owned = candidate.to_owned_pattern();
                    if owned == *pattern {
                        continue;
                    }
                    if candidate.category() == PatternCategory::Flexgram {
                        continue;
                    }
                    if candidate.category() == PatternCategory::Skipgram
                        || pattern.category() == PatternCategory::Skipgram
                    {
                        let offset = (position.token - start) as usize;
                        let Ok(slice) = candidate.slice(offset, n) else {
                            continue;
                        };
                        if !pattern.as_ref().instance_of(slice)
                            && !slice.instance_of(pattern.as_ref())
                        {
                            continue;
                        }
                    }
                    *result.get_or_default(&owned) += 1;
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Patterns immediately adjacent to the left of occurrences of
    /// `pattern`, within the same sentence.
    pub fn left_neighbours(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let mut result = RelationMap::new();
        for position in refs {
            for start in 0..position.token {
                let begin = IndexReference::new(position.sentence, start);
                for neighbour in self.patterns_at(corpus, begin, min_count, categories, size) {
                    if start as usize + neighbour.n() == position.token as usize {
                        *result.get_or_default(&neighbour.to_owned_pattern()) += 1;
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Patterns immediately adjacent to the right of occurrences of
    /// `pattern`, within the same sentence.
    pub fn right_neighbours(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n() as u16;
        let mut result = RelationMap::new();
        for position in refs {
            let begin = position.advanced(n);
            for neighbour in self.patterns_at(corpus, begin, min_count, categories, size) {
                *result.get_or_default(&neighbour.to_owned_pattern()) += 1;
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    fn right_cooc_with_matches(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<(RelationMap, HashMap<Pattern, Vec<IndexReference>>)> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let mut result = RelationMap::new();
        let mut matches: HashMap<Pattern, Vec<IndexReference>> = HashMap::new();
        for position in refs {
            let Ok(sentence_len) = corpus.sentence_length(position.sentence) else {
                continue;
            };
            // strictly beyond the pattern, leaving at least a one-token gap
            for start in (position.token as usize + n + 1)..sentence_len {
                let begin = IndexReference::new(position.sentence, start as u16);
                for cooc in self.patterns_at(corpus, begin, min_count, categories, size) {
                    let owned = cooc.to_owned_pattern();
                    *result.get_or_default(&owned) += 1;
                    matches.entry(owned).or_default().push(position);
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok((result, matches))
    }

    /// Patterns co-occurring with `pattern` in the same sentence, to the
    /// right and without overlap.
    pub fn right_cooc(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        self.right_cooc_with_matches(corpus, pattern, min_count, categories, size)
            .map(|(map, _)| map)
    }

    /// Patterns co-occurring with `pattern` in the same sentence, to the
    /// left and without overlap.
    pub fn left_cooc(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let mut result = RelationMap::new();
        for position in refs {
            for start in 0..position.token {
                let begin = IndexReference::new(position.sentence, start);
                for cooc in self.patterns_at(corpus, begin, min_count, categories, size) {
                    if (start as usize + cooc.n()) < position.token as usize {
                        *result.get_or_default(&cooc.to_owned_pattern()) += 1;
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Patterns co-occurring with `pattern` in the same sentence on either
    /// side, without overlap.
    pub fn cooc(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
        categories: Option<Categories>,
        size: usize,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let mut result = RelationMap::new();
        for position in refs {
            let Ok(sentence_len) = corpus.sentence_length(position.sentence) else {
                continue;
            };
            for start in 0..sentence_len {
                let begin = IndexReference::new(position.sentence, start as u16);
                for cooc in self.patterns_at(corpus, begin, min_count, categories, size) {
                    let ends_before = start + cooc.n() < position.token as usize;
                    let starts_after = start > position.token as usize + n;
                    if ends_before || starts_after {
                        *result.get_or_default(&cooc.to_owned_pattern()) += 1;
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Skipgrams of the same length whose non-gap parts match `pattern`
    /// positionally (abstractions of `pattern`).
    pub fn templates(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let mut result = RelationMap::new();
        for position in refs {
            let candidates = self.patterns_at(corpus, position, 0, None, 0);
            for candidate in candidates {
                if candidate.n() == n && candidate.category() == PatternCategory::Skipgram {
                    let owned = candidate.to_owned_pattern();
                    if owned != *pattern {
                        *result.get_or_default(&owned) += 1;
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// N-grams of the same length that instantiate the skipgram `pattern`.
    pub fn instances(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        min_count: u32,
    ) -> Result<RelationMap> {
        let refs = self.positions_of(pattern)?;
        let n = pattern.n();
        let mut result = RelationMap::new();
        for position in refs {
            let candidates =
                self.patterns_at(corpus, position, min_count, Some(Categories::NGRAM), 0);
            for candidate in candidates {
                if candidate.n() == n {
                    let owned = candidate.to_owned_pattern();
                    if owned != *pattern && owned.instance_of(pattern.as_ref()) {
                        *result.get_or_default(&owned) += 1;
                    }
                }
            }
        }
        prune_relations(&mut result, min_count);
        Ok(result)
    }

    /// Normalised pointwise mutual information of two patterns given their
    /// joint occurrence count; symmetric, in `[-1, 1]`.
    pub fn npmi(&mut self, a: &Pattern, b: &Pattern, joint: u32) -> f64 {
        let joint = joint as f64;
        let total = self.total_occurrences_in_group(None, 0) as f64;
        let count_a = self.occurrence_count(a) as f64;
        let count_b = self.occurrence_count(b) as f64;
        (joint / (count_a * count_b)).ln() / -(joint / total).ln()
    }

    /// Computes right-hand co-occurrence for every pattern and keeps the
    /// pairs with NPMI at or above `threshold`, sorted descending.
    pub fn compute_npmi(
        &mut self,
        corpus: &IndexedCorpus,
        threshold: f64,
    ) -> Result<Vec<(Pattern, Pattern, f64)>> {
        let patterns: Vec<Pattern> = self.data.keys().cloned().collect();
        let mut result = Vec::new();
        for pattern in patterns {
            let cooc = self.cooc(corpus, &pattern, 0, None, 0)?;
            for (other, &joint) in cooc.iter() {
                let value = self.npmi(&pattern, other, joint);
                if value >= threshold {
                    result.push((pattern.clone(), other.clone(), value));
                }
            }
        }
        result.sort_by(|a, b| b.2.total_cmp(&a.2));
        Ok(result)
    }

    /// Computes co-occurrence counts for every pattern and keeps the pairs
    /// at or above `threshold`, sorted descending.
    pub fn compute_cooc(
        &mut self,
        corpus: &IndexedCorpus,
        threshold: u32,
    ) -> Result<Vec<(Pattern, Pattern, u32)>> {
        let patterns: Vec<Pattern> = self.data.keys().cloned().collect();
        let mut result = Vec::new();
        for pattern in patterns {
            let cooc = self.cooc(corpus, &pattern, threshold, None, 0)?;
            for (other, &joint) in cooc.iter() {
                if joint >= threshold {
                    result.push((pattern.clone(), other.clone(), joint));
                }
            }
        }
        result.sort_by(|a, b| b.2.cmp(&a.2));
        Ok(result)
    }

    /// For every skipgram in the model, adds its flexgram form with the
    /// union of the source position sets. Returns the number of new
    /// flexgrams.
    pub fn compute_flexgrams_from_skipgrams(&mut self) -> usize {
        let sources: Vec<(Pattern, IndexedData)> = self
            .data
            .iter()
            .filter(|(pattern, _)| pattern.category() == PatternCategory::Skipgram)
            .map(|(pattern, value)| (pattern.to_flexgram(), value.clone()))
            .collect();
        let mut new_flexgrams = 0;
        for (flexgram, refs) in sources {
            if !self.data.contains(&flexgram) {
                new_flexgrams += 1;
            }
            self.data.get_or_default(&flexgram).merge(&refs);
        }
        if new_flexgrams > 0 {
            self.has_flexgrams = true;
        }
        self.invalidate_caches();
        self.sort_indices();
        new_flexgrams
    }

    /// For every pattern pair `(A, B)` co-occurring to the right with NPMI
    /// at or above `threshold`, records the flexgram `A {**} B` anchored at
    /// the occurrences of `A`. Returns the number of new flexgrams.
    pub fn compute_flexgrams_from_cooc(
        &mut self,
        corpus: &IndexedCorpus,
        threshold: f64,
    ) -> Result<usize> {
        let patterns: Vec<Pattern> = self.data.keys().cloned().collect();
        let mut found = 0;
        for pattern in patterns {
            let (cooc, matches) =
                self.right_cooc_with_matches(corpus, &pattern, 0, None, 0)?;
            for (other, &joint) in cooc.iter() {
                let value = self.npmi(&pattern, other, joint);
                if value >= threshold {
                    let flexgram = pattern.concat(&Pattern::flex_gap()).concat(other);
                    if !self.data.contains(&flexgram) {
                        found += 1;
                    }
                    if let Some(positions) = matches.get(other) {
                        let entry = self.data.get_or_default(&flexgram);
                        for &position in positions {
                            entry.add_ref(position);
                        }
                    }
                }
            }
        }
        if found > 0 {
            self.has_flexgrams = true;
        }
        self.invalidate_caches();
        self.sort_indices();
        Ok(found)
    }

    /// Computes and prints every relation of `pattern` (or only the one
    /// named by `selection`).
    pub fn output_relations(
        &mut self,
        corpus: &IndexedCorpus,
        pattern: &Pattern,
        decoder: &ClassDecoder,
        out: &mut impl Write,
        selection: Option<&str>,
    ) -> Result<()> {
        writeln!(
            out,
            "#\tPATTERN1\tRELATION\tPATTERN2\tREL.COUNT\tREL.FREQUENCY\tCOUNT2"
        )?;
        let selected = |name: &str| selection.map(|s| s == name).unwrap_or(true);
        if selected("subsumed") || selected("subparents") {
            let map = self.sub_parents(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "SUBSUMED-BY", &map, decoder, out)?;
        }
        if selected("subsumes") || selected("subchildren") {
            let map = self.sub_children(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "SUBSUMES", &map, decoder, out)?;
        }
        if selected("rightneighbours") {
            let map = self.left_neighbours(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "RIGHT-NEIGHBOUR-OF", &map, decoder, out)?;
        }
        if selected("leftneighbours") {
            let map = self.right_neighbours(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "LEFT-NEIGHBOUR-OF", &map, decoder, out)?;
        }
        if selected("rightcooc") {
            let map = self.right_cooc(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "LEFT-COOC-OF", &map, decoder, out)?;
        }
        if selected("leftcooc") {
            let map = self.left_cooc(corpus, pattern, 0, None, 0)?;
            self.print_relation_map(pattern, "RIGHT-COOC-OF", &map, decoder, out)?;
        }
        if selected("skipcontent") && pattern.category() != PatternCategory::Ngram {
            let map = self.skip_content(corpus, pattern)?;
            self.print_relation_map(pattern, "INSTANTIATED-BY", &map, decoder, out)?;
        }
        if selected("instances") && pattern.category() != PatternCategory::Ngram {
            let map = self.instances(corpus, pattern, 0)?;
            self.print_relation_map(pattern, "INSTANCE-OF", &map, decoder, out)?;
        }
        if selected("templates") {
            let map = self.templates(corpus, pattern, 0)?;
            self.print_relation_map(pattern, "TEMPLATE-OF", &map, decoder, out)?;
        }
        Ok(())
    }

    fn print_relation_map(
        &mut self,
        pattern: &Pattern,
        label: &str,
        map: &RelationMap,
        decoder: &ClassDecoder,
        out: &mut impl Write,
    ) -> Result<()> {
        let total: u64 = map.iter().map(|(_, &count)| count as u64).sum();
        if total == 0 {
            return Ok(());
        }
        let text = pattern.to_text(decoder)?;
        for (other, &count) in map
            .iter()
            .sorted_by(|(_, a), (_, b)| b.cmp(a))
        {
            writeln!(
                out,
                "\t{}\t{}\t{}\t{}\t{:.7}\t{}",
                text,
                label,
                other.to_text(decoder)?,
                count,
                count as f64 / total as f64,
                self.occurrence_count(other)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::reserved;

    /// Corpus of three sentences over classes 6..=9:
    ///   6 7 8, 6 9 8, 6 7 8
    fn corpus() -> IndexedCorpus {
        IndexedCorpus::from_bytes(vec![0xa2, 0x02, 6, 7, 8, 0, 6, 9, 8, 0, 6, 7, 8, 0]).unwrap()
    }

    fn trained_model(corpus: &IndexedCorpus) -> IndexedPatternModel {
        let mut model = IndexedPatternModel::new();
        let options = crate::model::TrainingOptions {
            min_tokens: 1,
            max_length: 3,
            ..Default::default()
        };
        model
            .train(corpus, &options, Default::default(), None, false)
            .unwrap();
        model
    }

    #[test]
    fn patterns_at_returns_all_lengths() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let found = model.patterns_at(&corpus, IndexReference::new(1, 0), 0, None, 0);
        let lengths: Vec<usize> = found.iter().map(|p| p.n()).sorted().collect();
        assert_eq!(lengths, vec![1, 2, 3]);
    }

    #[test]
    fn patterns_at_includes_skipgrams() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let skipgram = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        model.add_pattern(skipgram.clone(), IndexReference::new(1, 0));
        let found = model.patterns_at(
            &corpus,
            IndexReference::new(2, 0),
            0,
            Some(Categories::SKIPGRAM),
            0,
        );
        assert_eq!(found.len(), 1);
        assert!(found[0] == skipgram);
    }

    #[test]
    fn skip_content_counts_fillers() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let skipgram = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        for sentence in 1..=3 {
            model.add_pattern(skipgram.clone(), IndexReference::new(sentence, 0));
        }
        let content = model.skip_content(&corpus, &skipgram).unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content.get(&Pattern::from_classes(&[7])), Some(&2));
        assert_eq!(content.get(&Pattern::from_classes(&[9])), Some(&1));
    }

    #[test]
    fn distinct_fillers() {
        let corpus = corpus();
        let skipgram = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        let refs = [
            IndexReference::new(1, 0),
            IndexReference::new(2, 0),
            IndexReference::new(3, 0),
        ];
        assert_eq!(distinct_skip_content(&corpus, &skipgram, &refs), 2);
    }

    #[test]
    fn neighbours() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let six = Pattern::from_classes(&[6]);
        let seven = Pattern::from_classes(&[7]);
        let right = model
            .right_neighbours(&corpus, &six, 0, None, 1)
            .unwrap();
        assert_eq!(right.get(&seven), Some(&2));
        let left = model.left_neighbours(&corpus, &seven, 0, None, 1).unwrap();
        assert_eq!(left.get(&six), Some(&2));
    }

    #[test]
    fn templates_and_instances() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let skipgram = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        for sentence in 1..=3 {
            model.add_pattern(skipgram.clone(), IndexReference::new(sentence, 0));
        }
        let ngram = Pattern::from_classes(&[6, 7, 8]);
        let templates = model.templates(&corpus, &ngram, 0).unwrap();
        assert_eq!(templates.get(&skipgram), Some(&2));
        let instances = model.instances(&corpus, &skipgram, 0).unwrap();
        assert_eq!(instances.get(&ngram), Some(&2));
        assert_eq!(
            instances.get(&Pattern::from_classes(&[6, 9, 8])),
            Some(&1)
        );
    }

    #[test]
    fn flexgrams_from_skipgrams_union_positions() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let skipgram = Pattern::from_classes(&[6, reserved::SKIP, 8]);
        for sentence in 1..=3 {
            model.add_pattern(skipgram.clone(), IndexReference::new(sentence, 0));
        }
        let added = model.compute_flexgrams_from_skipgrams();
        assert_eq!(added, 1);
        let flexgram = Pattern::from_classes(&[6, reserved::FLEX, 8]);
        assert_eq!(model.occurrence_count(&flexgram), 3);
    }

    #[test]
    fn npmi_is_bounded() {
        let corpus = corpus();
        let mut model = trained_model(&corpus);
        let six = Pattern::from_classes(&[6]);
        let eight = Pattern::from_classes(&[8]);
        let value = model.npmi(&six, &eight, 3);
        assert!((-1.0..=1.0).contains(&value));
    }
}
