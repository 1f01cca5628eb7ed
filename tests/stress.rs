#![cfg(feature = "slow_tests")]

/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Long-running training stress test over a large synthetic corpus,
//! cross-checking the unindexed and indexed regimes against each other.
//! Run with `cargo test --features slow_tests`.

use std::collections::HashSet;

use patternmodel::prelude::*;

const SENTENCES: usize = 3000;

/// Generates a deterministic corpus with a skewed word distribution: half
/// of the draws come from the ten most frequent words, the rest from a
/// 200-word tail.
fn synthetic_corpus() -> (String, u64) {
    let mut state: u64 = 0x243f_6a88_85a3_08d3;
    let mut step = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };
    let mut text = String::new();
    let mut tokens = 0u64;
    for _ in 0..SENTENCES {
        let length = 8 + step() % 9;
        for i in 0..length {
            let draw = step();
            let word = if draw % 2 == 0 { draw % 10 } else { draw % 200 };
            if i > 0 {
                text.push(' ');
            }
            text.push_str(&format!("w{}", word));
            tokens += 1;
        }
        text.push('\n');
    }
    (text, tokens)
}

fn encode(text: &str) -> IndexedCorpus {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("corpus.txt");
    let data_path = dir.path().join("corpus.dat");
    std::fs::write(&text_path, text).unwrap();
    let mut encoder = ClassEncoder::new();
    encoder.build(&[&text_path], 1, None).unwrap();
    encoder
        .encode_file(&text_path, &data_path, UnknownPolicy::Strict, false)
        .unwrap();
    IndexedCorpus::load(&data_path).unwrap()
}

#[test]
fn synthetic_corpus_training_stress() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (text, tokens) = synthetic_corpus();
    let corpus = encode(&text);
    assert_eq!(corpus.total_tokens(), tokens);
    assert_eq!(corpus.sentences() as usize, SENTENCES);

    let options = TrainingOptions {
        min_tokens: 2,
        max_length: 5,
        ..Default::default()
    };

    let mut unindexed = UnindexedPatternModel::new();
    unindexed
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    assert_eq!(unindexed.total_tokens(), tokens);
    assert!(!unindexed.is_empty());

    let indexed_options = TrainingOptions {
        do_skipgrams: true,
        ..options.clone()
    };
    let mut indexed = IndexedPatternModel::new();
    indexed
        .train(&corpus, &indexed_options, TrainConstraint::None, None, false)
        .unwrap();

    // both regimes agree on the retained n-grams and their counts
    for (pattern, &count) in unindexed.iter() {
        let refs = indexed
            .references(pattern)
            .unwrap_or_else(|| panic!("{:?} missing from the indexed model", pattern));
        assert_eq!(refs.len() as u32, count, "count mismatch for {:?}", pattern);
    }

    // published ordering invariant of every position list
    for (pattern, value) in indexed.iter() {
        for pair in value.as_slice().windows(2) {
            assert!(
                pair[0] < pair[1],
                "index list of {:?} is not strictly ascending",
                pattern
            );
        }
    }

    // raising the threshold can only shrink the key set
    let strict_options = TrainingOptions {
        min_tokens: 3,
        ..options
    };
    let mut strict = UnindexedPatternModel::new();
    strict
        .train(&corpus, &strict_options, TrainConstraint::None, None, false)
        .unwrap();
    let strict_keys: HashSet<Pattern> = strict.keys().cloned().collect();
    let loose_keys: HashSet<Pattern> = unindexed.keys().cloned().collect();
    assert!(strict_keys.is_subset(&loose_keys));

    // the big model survives a disk round trip unchanged
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stress.model");
    indexed.save(&path).unwrap();
    let reloaded = IndexedPatternModel::load(&path, &ReadFilter::default()).unwrap();
    assert_eq!(reloaded.len(), indexed.len());
    assert_eq!(reloaded.total_tokens(), indexed.total_tokens());
    for (pattern, value) in indexed.iter() {
        assert_eq!(
            reloaded.references(pattern).map(|r| r.as_slice()),
            Some(value.as_slice())
        );
    }

    // the reporting paths handle a model of this size
    let mut report = Vec::new();
    indexed.report(&mut report, false).unwrap();
    assert!(!report.is_empty());
    let mut histogram = Vec::new();
    indexed.histogram(&mut histogram, 0, None).unwrap();
    assert!(!histogram.is_empty());
}
