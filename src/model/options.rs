/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::error::{Error, Result};

/// Options steering model training and filtered model loading.
///
/// All fields are public and can be set directly; [`TrainingOptions::resolved`]
/// fills in the derived defaults before training starts.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    /// Occurrence threshold: patterns occurring fewer times are pruned.
    pub min_tokens: u32,
    /// Occurrence threshold specific to skipgrams; raised to `min_tokens`
    /// when lower.
    pub min_tokens_skipgrams: u32,
    /// Secondary threshold: higher-order patterns are retained only if all
    /// their unigrams reach this count. Only effective when raised above
    /// `min_tokens`.
    pub min_tokens_unigrams: u32,
    /// Token-length bounds on extracted patterns, inclusive.
    pub min_length: usize,
    pub max_length: usize,
    /// Cap on the order used for back-off checks.
    pub max_backoff_length: usize,
    /// Extract skipgrams (indexed regime).
    pub do_skipgrams: bool,
    /// Enumerate skipgrams directly during the n-gram pass (unindexed
    /// fallback).
    pub do_skipgrams_exhaustive: bool,
    /// A skipgram is kept only if its gaps are filled by at least this many
    /// distinct fillers (indexed regime only).
    pub min_skip_types: u32,
    /// Maximum number of gap runs per skipgram.
    pub max_skips: usize,
    /// Treat each line as one integral pattern, without subpattern
    /// enumeration.
    pub one_per_line: bool,
    /// Prune n-grams of order below this value that are not subsumed by any
    /// retained higher-order n-gram (0 disables).
    pub prune_non_subsumed: usize,
    /// Load structure but zero all values.
    pub do_reset: bool,
    /// Post-load filters.
    pub do_remove_ngrams: bool,
    pub do_remove_skipgrams: bool,
    pub do_remove_flexgrams: bool,
    pub do_remove_index: bool,
    /// Swallow per-sentence errors during training and continue.
    pub ignore_errors: bool,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            min_tokens: 2,
            min_tokens_skipgrams: 0,
            min_tokens_unigrams: 1,
            min_length: 1,
            max_length: 100,
            max_backoff_length: 100,
            do_skipgrams: false,
            do_skipgrams_exhaustive: false,
            min_skip_types: 2,
            max_skips: 3,
            one_per_line: false,
            prune_non_subsumed: 0,
            do_reset: false,
            do_remove_ngrams: false,
            do_remove_skipgrams: false,
            do_remove_flexgrams: false,
            do_remove_index: false,
            ignore_errors: false,
        }
    }
}

impl TrainingOptions {
    /// Validates the options and fills in derived defaults.
    pub fn resolved(&self) -> Result<TrainingOptions> {
        let mut options = self.clone();
        if options.min_tokens == 0 {
            options.min_tokens = 1;
        }
        if options.min_tokens_skipgrams < options.min_tokens {
            options.min_tokens_skipgrams = options.min_tokens;
        }
        if options.min_length == 0 {
            options.min_length = 1;
        }
        if options.min_length > options.max_length {
            return Err(Error::InvalidArgument(format!(
                "minimum length {} exceeds maximum length {}",
                options.min_length, options.max_length
            )));
        }
        if options.max_skips == 0 {
            return Err(Error::InvalidArgument(
                "at least one skip must be allowed".into(),
            ));
        }
        if options.do_skipgrams && options.do_skipgrams_exhaustive {
            return Err(Error::InvalidArgument(
                "choose either indexed or exhaustive skipgram extraction, not both".into(),
            ));
        }
        if options.one_per_line {
            options.min_tokens = 1;
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipgram_threshold_is_raised_to_min_tokens() {
        let options = TrainingOptions {
            min_tokens: 5,
            min_tokens_skipgrams: 2,
            ..Default::default()
        }
        .resolved()
        .unwrap();
        assert_eq!(options.min_tokens_skipgrams, 5);
    }

    #[test]
    fn conflicting_skipgram_modes_are_rejected() {
        let options = TrainingOptions {
            do_skipgrams: true,
            do_skipgrams_exhaustive: true,
            ..Default::default()
        };
        assert!(options.resolved().is_err());
    }

    #[test]
    fn one_per_line_forces_single_pass() {
        let options = TrainingOptions {
            one_per_line: true,
            min_tokens: 5,
            ..Default::default()
        }
        .resolved()
        .unwrap();
        assert_eq!(options.min_tokens, 1);
    }
}
