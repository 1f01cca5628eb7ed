/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Model training: iterative n-gram counting with back-off pruning, plus
//! skipgram extraction in the indexed and exhaustive regimes.
//!
//! Training is strictly sequential across sentences and across n-passes;
//! the outer loop over `n` is the observable contract.

use dsi_progress_logger::prelude::*;

use crate::corpus::{IndexedCorpus, IndexReference};
use crate::error::{Error, Result};
use crate::pattern::{Pattern, PatternCategory, PatternRef};
use crate::skipgram::mask_to_gaps;
use crate::store::{Categories, IndexedData, PatternSet, PatternValue};

use super::relations::distinct_skip_content;
use super::{ModelInterface, PatternModel, TrainingOptions};

/// What constrains the admission of patterns during training.
#[derive(Clone, Copy, Default)]
pub enum TrainConstraint<'a> {
    /// No constraint: patterns are admitted on their own merit.
    #[default]
    None,
    /// The model itself is the constraint (in-place rebuild): only patterns
    /// already present are re-counted, back-off checks are skipped.
    SelfModel,
    /// Another model is the constraint; only its patterns are admitted.
    Model(&'a dyn ModelInterface),
}

impl TrainConstraint<'_> {
    fn is_none(&self) -> bool {
        matches!(self, TrainConstraint::None)
    }
}

impl<V: PatternValue> PatternModel<V> {
    fn constraint_admits(&self, constraint: &TrainConstraint<'_>, pattern: &Pattern) -> bool {
        match constraint {
            TrainConstraint::None => true,
            TrainConstraint::SelfModel => self.contains(pattern),
            TrainConstraint::Model(model) => model.contains_pattern(pattern),
        }
    }

    /// Trains the model on `corpus`.
    ///
    /// With the default options this iterates `n = 1..=max_length`,
    /// counting all n-grams per pass, requiring every sub-(n−1)-gram to
    /// have survived the previous pass, and pruning each pass below
    /// `min_tokens`. With `min_tokens == 1` or a constraint, a single pass
    /// enumerates every length at every position and back-off is skipped.
    ///
    /// `filter` is disjunctive: a candidate is retained only if one of its
    /// subpatterns occurs in the filter, or if it instantiates a filter
    /// skipgram. Set `continued` to extend a preloaded model; orders
    /// already present are not recounted.
    pub fn train(
        &mut self,
        corpus: &IndexedCorpus,
        options: &TrainingOptions,
        constraint: TrainConstraint<'_>,
        filter: Option<&PatternSet>,
        continued: bool,
    ) -> Result<()> {
        let mut options = options.resolved()?;

        match &constraint {
            TrainConstraint::SelfModel => {
                self.total_tokens = 0;
                self.total_types = 0;
            }
            TrainConstraint::Model(model) => {
                self.total_tokens = model.tokens();
                self.total_types = model.types();
            }
            TrainConstraint::None => {}
        }

        let filter = filter.filter(|f| !f.is_empty());
        let mut filter_has_ngrams = false;
        let mut filter_has_skipgrams = false;
        if let Some(filter) = filter {
            for pattern in filter.iter() {
                if pattern.category() == PatternCategory::Ngram {
                    filter_has_ngrams = true;
                } else {
                    filter_has_skipgrams = true;
                }
                if filter_has_ngrams && filter_has_skipgrams {
                    break;
                }
            }
        }

        // a preliminary unigram pass is needed when unigrams are subject to
        // their own threshold but would not be counted (or not be counted
        // first) by the regular passes
        let mut iter_unigrams_only = (options.min_length > 1 || options.min_tokens == 1)
            && options.min_tokens_unigrams > options.min_tokens;
        let mut skip_unigrams = false;

        if !constraint.is_none()
            && !matches!(constraint, TrainConstraint::SelfModel)
            && options.do_skipgrams
        {
            options.do_skipgrams = false;
            options.do_skipgrams_exhaustive = true;
            log::warn!(
                "Skipgrams will be extracted exhaustively from the found n-grams; \
                 the constraint is applied per candidate. Skipgrams of the constraint \
                 model longer than the candidate n-grams may be missed."
            );
        }

        log::info!(
            "Training pattern model{}, occurrence threshold {}",
            if constraint.is_none() {
                ""
            } else {
                ", constrained by another model"
            },
            options.min_tokens
        );
        if filter_has_ngrams {
            log::info!("Filter with n-grams provided; only patterns containing a filtered pattern will be included");
        }
        if filter_has_skipgrams {
            log::info!("Filter with skipgrams provided; only matching instances will be included");
        }

        let mut prev_size = if matches!(constraint, TrainConstraint::SelfModel) {
            0
        } else {
            self.len()
        };
        if !self.is_empty() {
            if continued {
                log::info!("Continuing training on a preloaded model, computing statistics...");
            }
            self.compute_stats();
        }

        let mut tokens_counted = continued;
        let mut n = 1usize;
        while n <= options.max_length {
            let mut skipgrams_only = false;
            if continued && !iter_unigrams_only && options.min_tokens > 1 && constraint.is_none() {
                if self.total_occurrences_in_group(Some(PatternCategory::Ngram), n) > 0 {
                    if options.do_skipgrams_exhaustive
                        && self.total_occurrences_in_group(Some(PatternCategory::Skipgram), n) == 0
                    {
                        skipgrams_only = true;
                    } else {
                        log::info!("Skipping {}-grams, already in the model", n);
                        n += 1;
                        continue;
                    }
                }
            }

            if iter_unigrams_only {
                log::info!(
                    "Counting unigrams using the secondary word occurrence threshold ({})",
                    options.min_tokens_unigrams
                );
            } else if options.one_per_line {
                log::info!("Counting patterns from list, one per line");
            } else if !constraint.is_none() {
                log::info!("Counting n-grams that occur in the constraint model");
            } else if options.min_tokens > 1 {
                log::info!("Counting {}-grams", n);
            } else {
                log::info!("Counting *all* n-grams (occurrence threshold 1)");
            }

            let mut found_skipgrams = 0usize;
            let mut single_pass = false;
            // orders already in a preloaded model are not re-extracted
            let single_pass_min_length = if continued {
                self.max_n + 1
            } else {
                options.min_length
            };

            let mut pl = ProgressLogger::default();
            pl.item_name("sentence");
            pl.expected_updates(Some(corpus.sentences() as usize));
            pl.start("Counting...");
            for sentence in 1..=corpus.sentences() {
                let line = match corpus.get_sentence(sentence) {
                    Ok(line) => line,
                    Err(e) if options.ignore_errors => {
                        log::warn!("Skipping sentence {}: {}", sentence, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let line_size = line.n();
                pl.light_update();
                if line_size == 0 {
                    continue;
                }
                if n == 1 && !tokens_counted {
                    self.total_tokens += line_size as u64;
                }

                let candidates: Vec<(PatternRef<'_>, usize)> = if options.one_per_line {
                    if line_size > options.max_length {
                        continue;
                    }
                    vec![(line, 0)]
                } else if iter_unigrams_only
                    || (options.min_tokens > 1 && constraint.is_none())
                {
                    line.ngrams(n).collect()
                } else {
                    // single pass: extract every admissible length at every
                    // position, no back-off
                    single_pass = true;
                    line.subngrams(single_pass_min_length, options.max_length)
                };

                for (candidate, token_offset) in candidates {
                    let position = IndexReference::new(sentence, token_offset as u16);
                    let result = self.process_candidate(
                        candidate,
                        position,
                        n,
                        &options,
                        &constraint,
                        filter,
                        filter_has_ngrams,
                        filter_has_skipgrams,
                        iter_unigrams_only,
                        single_pass,
                        skip_unigrams,
                        skipgrams_only,
                    );
                    match result {
                        Ok(skipgrams) => found_skipgrams += skipgrams,
                        Err(e) if options.ignore_errors && e.is_per_sentence() => {
                            log::warn!("Error while counting at {}: {}", position, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            pl.done();

            if iter_unigrams_only {
                log::info!("Found {} unigrams", self.len());
                if !continued && constraint.is_none() {
                    self.total_types = self.len() as u64;
                }
                // prune by the word threshold, then rerun this order
                // normally
                self.prune(Some(options.min_tokens_unigrams), 1, None);
                iter_unigrams_only = false;
                if n == 1 && options.min_length == 1 {
                    skip_unigrams = true;
                }
                tokens_counted = true;
                prev_size = self.len();
                continue;
            }

            let found_ngrams = self.len().saturating_sub(found_skipgrams + prev_size);
            let found_any = found_ngrams > 0 || found_skipgrams > 0;
            if found_any {
                self.max_n = self.max_n.max(n);
                self.min_n = self.min_n.min(n);
            } else {
                log::info!("None found");
                if !continued {
                    break;
                }
            }
            log::info!("Found {} new n-grams", found_ngrams);
            if options.do_skipgrams_exhaustive {
                log::info!("Found {} skipgram occurrences", found_skipgrams);
            }
            if !continued && !matches!(constraint, TrainConstraint::Model(_)) {
                if options.min_tokens > 1 && n == 1 {
                    self.total_types = self.len() as u64;
                } else if options.min_tokens == 1 && options.min_length == 1 {
                    self.total_types =
                        self.total_word_types_in_group(Some(PatternCategory::Ngram), 1);
                }
            }

            let mut pruned;
            if single_pass {
                // prune regardless of size; skipgram entries of a
                // constraint model must survive for later counting
                pruned = if options.do_skipgrams {
                    self.prune(Some(options.min_tokens), 0, Some(PatternCategory::Ngram))
                } else {
                    self.prune(Some(options.min_tokens), 0, None)
                };
            } else {
                pruned = self.prune(Some(options.min_tokens), n, None);
                if !options.do_skipgrams
                    && !options.do_skipgrams_exhaustive
                    && n >= 2
                    && n - 1 < options.min_length
                    && n - 1 != options.max_backoff_length
                    && !(n - 1 == 1 && options.min_tokens_unigrams > options.min_tokens)
                {
                    // the previous order is below the minimum length and no
                    // longer needed for back-off
                    self.prune(None, n - 1, None);
                    log::info!("(pruned the previous order, below the minimum length)");
                }
            }
            if found_skipgrams > 0 {
                let scope_n = if options.min_tokens == 1 || !constraint.is_none() {
                    0
                } else {
                    n
                };
                let extra = self.prune(
                    Some(options.min_tokens_skipgrams),
                    scope_n,
                    Some(PatternCategory::Skipgram),
                );
                if extra > 0 {
                    log::info!("Pruned {} extra skipgrams", extra);
                }
                pruned += extra;
            }
            log::info!("Pruned {}, total kept: {}", pruned, self.len() - prev_size.min(self.len()));

            if options.min_tokens == 1 || !constraint.is_none() {
                // everything was done in a single pass
                break;
            }
            prev_size = self.len();
            tokens_counted = true;
            n += 1;
        }

        if options.do_skipgrams {
            match constraint {
                TrainConstraint::SelfModel => {
                    self.train_skipgrams_self_constrained(corpus, &options)?;
                }
                _ => self.train_skipgrams(corpus, &options, &constraint)?,
            }
        } else if options.do_skipgrams_exhaustive && self.has_skipgrams {
            let extra = self.prune_skipgrams(
                Some(corpus),
                options.min_tokens_skipgrams,
                options.min_skip_types,
                0,
            );
            if extra > 0 {
                log::info!("Pruned {} skipgrams below the skip type threshold", extra);
            }
        }

        if options.min_tokens == 1 {
            self.recompute_bounds();
        }
        if options.max_backoff_length < options.min_length {
            self.prune(None, options.max_backoff_length, None);
        }
        if options.min_length > 1 && options.min_tokens_unigrams > options.min_tokens {
            self.prune(None, 1, None);
        }
        if options.prune_non_subsumed > 0 {
            log::info!("Pruning non-subsumed n-grams");
            self.prune_non_subsumed(options.prune_non_subsumed.min(options.max_length));
        }
        if options.min_length > 1
            && (options.do_skipgrams || options.do_skipgrams_exhaustive)
        {
            let pruned = self.prune_below_length(options.min_length);
            log::info!(
                "Pruned {} patterns below the minimum length ({})",
                pruned,
                options.min_length
            );
        }
        self.sort_indices();
        Ok(())
    }

    /// Handles one candidate window during a training pass. Returns the
    /// number of skipgram occurrences recorded for it.
    #[allow(clippy::too_many_arguments)]
    fn process_candidate(
        &mut self,
        candidate: PatternRef<'_>,
        position: IndexReference,
        n: usize,
        options: &TrainingOptions,
        constraint: &TrainConstraint<'_>,
        filter: Option<&PatternSet>,
        filter_has_ngrams: bool,
        filter_has_skipgrams: bool,
        iter_unigrams_only: bool,
        single_pass: bool,
        skip_unigrams: bool,
        skipgrams_only: bool,
    ) -> Result<usize> {
        let candidate_n = candidate.n();
        if single_pass && options.min_length == 1 && skip_unigrams && candidate_n == 1 {
            // unigrams were already counted by the preliminary pass
            return Ok(0);
        }

        if !skipgrams_only {
            let owned = candidate.to_owned_pattern();
            if !constraint.is_none()
                && !iter_unigrams_only
                && !self.constraint_admits(constraint, &owned)
            {
                return Ok(0);
            }

            let mut found = true;

            if !iter_unigrams_only
                && options.min_tokens_unigrams > options.min_tokens
                && (n > 1 || single_pass)
            {
                for (unigram, _) in candidate.ngrams(1) {
                    if self.occurrence_count_ref(unigram) < options.min_tokens_unigrams {
                        found = false;
                        break;
                    }
                }
            }

            let mut ignore_filter = false;
            if let Some(filter) = filter.filter(|_| found && constraint.is_none()) {
                let effective_n = if options.min_tokens > 1 { n } else { candidate_n };
                if effective_n >= options.min_length {
                    let mut matches = false;
                    if filter_has_ngrams {
                        for (sub, _) in candidate.subngrams(1, effective_n) {
                            if filter.contains_ref(sub) {
                                matches = true;
                                break;
                            }
                        }
                    }
                    if !matches && filter_has_skipgrams {
                        for template in filter.iter() {
                            if candidate.instance_of(template.as_ref()) {
                                matches = true;
                                break;
                            }
                        }
                    }
                    if !matches {
                        return Ok(0);
                    }
                } else {
                    // stages below the minimum length are not filtered;
                    // they are pruned later when no longer needed
                    ignore_filter = true;
                }
            }

            if (filter.is_none() || ignore_filter)
                && found
                && n > 1
                && options.min_tokens > 1
                && !options.one_per_line
                && constraint.is_none()
            {
                // back-off: every sub-(n-1)-gram must have survived the
                // previous pass
                let backoff_n = (n - 1).min(options.max_backoff_length);
                for (sub, _) in candidate.ngrams(backoff_n) {
                    if !self.contains_ref(sub) {
                        found = false;
                        break;
                    }
                }
            }

            if found {
                self.add_pattern(owned, position);
            }
        }

        let mut found_skipgrams = 0;
        if (n >= 3 || options.min_tokens == 1) && options.do_skipgrams_exhaustive {
            found_skipgrams = self.compute_skipgrams(
                candidate,
                options.min_tokens_skipgrams,
                options.max_skips,
                Some(position),
                None,
                constraint,
                true,
            )?;
            if found_skipgrams > 0 {
                self.has_skipgrams = true;
            }
        }
        Ok(found_skipgrams)
    }

    /// Enumerates every gap configuration of `candidate` and records each
    /// valid skipgram, either at `single_position` or at all
    /// `multi_positions`. Returns the number of new skipgrams recorded.
    pub(crate) fn compute_skipgrams(
        &mut self,
        candidate: PatternRef<'_>,
        min_tokens_skipgrams: u32,
        max_skips: usize,
        single_position: Option<IndexReference>,
        multi_positions: Option<&IndexedData>,
        constraint: &TrainConstraint<'_>,
        exhaustive: bool,
    ) -> Result<usize> {
        let n = candidate.n();
        let min_tokens = min_tokens_skipgrams.max(1);
        let masks: Vec<u32> = self.gap_cache.get(n, max_skips).to_vec();

        let mut found = 0;
        'masks: for mask in masks {
            let skipgram = PatternRef::with_mask(candidate.as_bytes(), mask);

            if !constraint.is_none() {
                if !self.constraint_admits(constraint, &skipgram.to_owned_pattern()) {
                    continue;
                }
            } else if min_tokens != 1 {
                let mut check_extra = false;
                for (sub, _) in skipgram.ngrams(n - 1) {
                    if !sub.is_gap(0) && !sub.is_gap(sub.n() - 1) {
                        // a valid sub-skipgram (or n-gram) that must have
                        // been counted before
                        if !self.contains_ref(sub) {
                            continue 'masks;
                        }
                    } else {
                        // leading or trailing gap; fall back to the
                        // contextual gap checks
                        check_extra = true;
                        break;
                    }
                }
                if check_extra {
                    if exhaustive {
                        for part in skipgram.parts() {
                            if !self.contains_ref(part) {
                                continue 'masks;
                            }
                        }
                    }
                    // the gap with one token of context on each side must
                    // itself occur
                    for (begin, length) in mask_to_gaps(mask, n) {
                        if begin == 1 && begin + length + 1 == n {
                            // the whole skipgram is already X {*} Y
                            continue;
                        }
                        let sub = skipgram.slice(begin - 1, length + 2)?;
                        if !self.contains_ref(sub) {
                            continue 'masks;
                        }
                    }
                }
            }

            let owned = skipgram.to_owned_pattern();
            if !self.contains(&owned) {
                found += 1;
            }
            if let Some(position) = single_position {
                self.add_pattern(owned, position);
            } else if let Some(positions) = multi_positions {
                for &position in positions {
                    self.add_pattern(owned.clone(), position);
                }
            } else {
                return Err(Error::Internal(
                    "skipgram computation without occurrence positions".into(),
                ));
            }
        }
        Ok(found)
    }

    /// Extracts skipgrams from the n-grams already in the model (the
    /// indexed regime): every candidate inherits the n-gram's position
    /// set, then the occurrence and distinct-filler thresholds are
    /// applied.
    pub fn train_skipgrams(
        &mut self,
        corpus: &IndexedCorpus,
        options: &TrainingOptions,
        constraint: &TrainConstraint<'_>,
    ) -> Result<()> {
        if !V::INDEXED {
            return Err(Error::InvalidArgument(
                "skipgram extraction needs an indexed model; use exhaustive extraction for unindexed models".into(),
            ));
        }
        self.invalidate_caches();
        log::info!("Finding skipgrams on the basis of the extracted n-grams...");
        for n in 3..=options.max_length {
            log::info!("Counting {}-skipgrams", n);
            let candidates: Vec<(Pattern, IndexedData)> = self
                .data
                .iter()
                .filter(|(pattern, _)| {
                    pattern.n() == n && pattern.category() == PatternCategory::Ngram
                })
                .map(|(pattern, value)| {
                    (
                        pattern.clone(),
                        value.refs().map(|r| r.iter().copied().collect()).unwrap_or_default(),
                    )
                })
                .collect();
            let mut found = 0;
            for (pattern, positions) in &candidates {
                found += self.compute_skipgrams(
                    pattern.as_ref(),
                    options.min_tokens_skipgrams,
                    options.max_skips,
                    None,
                    Some(positions),
                    constraint,
                    false,
                )?;
            }
            if found == 0 {
                log::info!("None found");
                break;
            }
            self.has_skipgrams = true;
            log::info!("Found {} skipgrams", found);
            let pruned = self.prune(
                Some(options.min_tokens_skipgrams),
                n,
                Some(PatternCategory::Skipgram),
            );
            log::info!("Pruned {}, kept {}", pruned, found.saturating_sub(pruned));
        }
        // the contextual checks of order n consult the skipgrams of order
        // n - 1, so the distinct-filler threshold applies only after the
        // last order
        let extra = self.prune_skipgrams(
            Some(corpus),
            options.min_tokens_skipgrams,
            options.min_skip_types,
            0,
        );
        if extra > 0 {
            log::info!("Pruned {} skipgrams below the skip type threshold", extra);
        }
        Ok(())
    }

    /// Re-counts the skipgrams and flexgrams already present in the model
    /// (in-place rebuild): walks every corpus position and records the
    /// model patterns found there.
    pub fn train_skipgrams_self_constrained(
        &mut self,
        corpus: &IndexedCorpus,
        options: &TrainingOptions,
    ) -> Result<()> {
        self.invalidate_caches();
        log::info!(
            "Finding skipgrams and flexgrams matching the preloaded model, occurrence threshold {}",
            options.min_tokens
        );
        let mut found_skipgrams = 0u64;
        let mut found_flexgrams = 0u64;
        for sentence in 1..=corpus.sentences() {
            let length = corpus.sentence_length(sentence)?;
            for token in 0..length {
                let position = IndexReference::new(sentence, token as u16);
                let matches = self.patterns_at(
                    corpus,
                    position,
                    0,
                    Some(Categories::SKIPGRAM | Categories::FLEXGRAM),
                    0,
                );
                for pattern in matches {
                    match pattern.category() {
                        PatternCategory::Flexgram => found_flexgrams += 1,
                        _ => found_skipgrams += 1,
                    }
                    self.add(pattern, position);
                }
            }
        }
        if found_skipgrams == 0 && found_flexgrams == 0 {
            log::info!("None found");
        } else {
            self.has_skipgrams |= found_skipgrams > 0;
            self.has_flexgrams |= found_flexgrams > 0;
            log::info!(
                "Found {} skipgrams, {} flexgrams",
                found_skipgrams,
                found_flexgrams
            );
        }
        let pruned = self.prune(Some(options.min_tokens), 0, None);
        log::info!("Pruned {}", pruned);
        Ok(())
    }

    /// Drops skipgrams below the occurrence threshold and, for indexed
    /// models with a reverse index, skipgrams whose gaps are filled by
    /// fewer than `min_skip_types` distinct fillers.
    pub fn prune_skipgrams(
        &mut self,
        corpus: Option<&IndexedCorpus>,
        threshold: u32,
        min_skip_types: u32,
        n: usize,
    ) -> usize {
        let mut pruned = self.prune(Some(threshold), n, Some(PatternCategory::Skipgram));
        if min_skip_types <= 1 || !V::INDEXED {
            return pruned;
        }
        let Some(corpus) = corpus else {
            return pruned;
        };
        let mut doomed = Vec::new();
        for (pattern, value) in self.data.iter() {
            if (n == 0 || pattern.n() == n) && pattern.category() == PatternCategory::Skipgram {
                let Some(refs) = value.refs() else { continue };
                if distinct_skip_content(corpus, pattern, refs) < min_skip_types as usize {
                    doomed.push(pattern.clone());
                }
            }
        }
        for pattern in doomed {
            self.data.remove(&pattern);
            pruned += 1;
        }
        if pruned > 0 {
            self.invalidate_caches();
        }
        pruned
    }

    /// Walks from `from_order` down to 2, keeping at each step only the
    /// (n−1)-grams subsumed by a retained n-gram.
    pub fn prune_non_subsumed(&mut self, from_order: usize) -> usize {
        let mut total = 0;
        for n in (2..=from_order).rev() {
            let mut subsumed = PatternSet::new();
            for (pattern, _) in self.data.iter() {
                if pattern.n() == n {
                    for (sub, _) in pattern.ngrams(n - 1) {
                        subsumed.insert(sub.to_owned_pattern());
                    }
                }
            }
            let pruned = self.prune_not_in_set(&subsumed, n - 1);
            log::info!("Pruned {} non-subsumed {}-grams", pruned, n - 1);
            total += pruned;
        }
        total
    }
}
