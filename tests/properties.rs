/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Cross-cutting invariants: round trips, hash/equality agreement,
//! sub-enumeration arithmetic, training monotonicity and index ordering.

use std::collections::HashSet;

use patternmodel::prelude::*;

fn corpus_from(text: &str) -> (ClassEncoder, IndexedCorpus) {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("corpus.txt");
    let data_path = dir.path().join("corpus.dat");
    std::fs::write(&text_path, text).unwrap();
    let mut encoder = ClassEncoder::new();
    encoder.build(&[&text_path], 1, None).unwrap();
    encoder
        .encode_file(&text_path, &data_path, UnknownPolicy::Strict, false)
        .unwrap();
    (encoder, IndexedCorpus::load(&data_path).unwrap())
}

fn train(
    corpus: &IndexedCorpus,
    min_tokens: u32,
    max_length: usize,
) -> UnindexedPatternModel {
    let mut model = UnindexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens,
        max_length,
        ..Default::default()
    };
    model
        .train(corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    model
}

const TEXT: &str = "\
a b c d a b\n\
b c d e f g\n\
a b c a b c\n\
d e f d e f\n";

#[test]
fn encode_decode_roundtrip() {
    let (mut encoder, _) = corpus_from(TEXT);
    let decoder = encoder.build_decoder();
    for line in TEXT.lines() {
        let pattern = encoder.build_pattern(line, UnknownPolicy::Strict).unwrap();
        assert_eq!(pattern.to_text(&decoder).unwrap(), line);
    }
}

#[test]
fn pattern_bytes_roundtrip() {
    for classes in [
        vec![6u32],
        vec![6, 7, 8],
        vec![6, 2, 8],
        vec![6, 3, 9],
        vec![300, 40000, 6],
    ] {
        let pattern = Pattern::from_classes(&classes);
        let mut buf = Vec::new();
        pattern.write_to(&mut buf).unwrap();
        let reread = Pattern::read_from(&mut std::io::Cursor::new(&buf)).unwrap();
        assert_eq!(pattern, reread);
        assert_eq!(pattern.as_bytes(), reread.as_bytes());
    }
}

#[test]
fn equal_patterns_hash_equal_across_categories() {
    let (mut encoder, corpus) = corpus_from(TEXT);
    // owning n-gram vs corpus view
    let ngram = encoder.build_pattern("a b c", UnknownPolicy::Strict).unwrap();
    let view = corpus.get_pattern(IndexReference::new(1, 0), 3).unwrap();
    assert!(view == ngram);
    assert_eq!(view.hash64(), ngram.hash64());

    // owning skipgram vs masked view
    let skipgram = encoder
        .build_pattern("a {*} c", UnknownPolicy::Strict)
        .unwrap();
    let masked = view.add_skip((1, 1));
    assert!(masked == skipgram);
    assert_eq!(masked.hash64(), skipgram.hash64());

    // owning flexgram vs flexed view
    let flexgram = encoder
        .build_pattern("a {**} c", UnknownPolicy::Strict)
        .unwrap();
    let flexed = masked.to_flexgram();
    assert!(flexed == flexgram);
    assert_eq!(flexed.hash64(), flexgram.hash64());
}

#[test]
fn sub_enumeration_counts() {
    let pattern = Pattern::from_classes(&[6, 7, 8, 9, 10, 11]);
    let n = pattern.n();
    for k in 1..=n {
        let windows: Vec<_> = pattern.ngrams(k).collect();
        assert_eq!(windows.len(), n - k + 1);
        for (window, offset) in windows {
            assert!(pattern.contains(&window.to_owned_pattern()));
            assert!(offset + k <= n);
        }
    }
    assert_eq!(pattern.ngrams(n + 1).count(), 0);
    assert_eq!(
        pattern.subngrams(1, n).len(),
        (1..=n).map(|k| n - k + 1).sum::<usize>()
    );
}

#[test]
fn skipgram_mask_consistency() {
    let bytes = [6u8, 7, 8, 9, 10];
    for mask in [0b00010u32, 0b00110, 0b01010] {
        let view = PatternRef::with_mask(&bytes, mask);
        assert_eq!(view.category(), PatternCategory::Skipgram);
        let owned = view.to_owned_pattern();
        assert_eq!(owned.mask_of(), mask);
        assert_eq!(owned.category(), PatternCategory::Skipgram);
    }
    let plain = PatternRef::with_mask(&bytes, 0);
    assert_eq!(plain.category(), PatternCategory::Ngram);
}

#[test]
fn training_monotonicity_in_min_tokens() {
    let (_, corpus) = corpus_from(TEXT);
    let strict = train(&corpus, 3, 5);
    let loose = train(&corpus, 2, 5);
    let strict_keys: HashSet<Pattern> = strict.keys().cloned().collect();
    let loose_keys: HashSet<Pattern> = loose.keys().cloned().collect();
    assert!(strict_keys.is_subset(&loose_keys));
}

#[test]
fn training_monotonicity_in_max_length() {
    let (_, corpus) = corpus_from(TEXT);
    let short = train(&corpus, 2, 2);
    let long = train(&corpus, 2, 5);
    let short_keys: HashSet<Pattern> = short.keys().cloned().collect();
    let long_keys: HashSet<Pattern> = long.keys().cloned().collect();
    assert!(short_keys.is_subset(&long_keys));
}

#[test]
fn index_lists_are_sorted_and_unique() {
    let (_, corpus) = corpus_from(TEXT);
    let mut model = IndexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 1,
        max_length: 4,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    for (pattern, value) in model.iter() {
        let refs = value.as_slice();
        for pair in refs.windows(2) {
            assert!(
                pair[0] < pair[1],
                "index list of {:?} is not strictly ascending",
                pattern
            );
        }
    }
}

#[test]
fn coverage_is_bounded_by_projection() {
    let (_, corpus) = corpus_from(TEXT);
    let mut model = IndexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 2,
        max_length: 4,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    let patterns: Vec<Pattern> = model.keys().cloned().collect();
    for pattern in patterns {
        let projection = model.coverage_count(&pattern);
        assert!(projection >= model.occurrence_count(&pattern) as u64);
    }
    // exact covered tokens never exceed the summed projections
    let exact = model.total_tokens_in_group(None, 2);
    let projected: u64 = model
        .iter()
        .filter(|(p, _)| p.n() == 2)
        .map(|(p, v)| v.count() as u64 * p.n() as u64)
        .sum();
    assert!(exact <= projected);
}

#[test]
fn model_totals_survive_reload() {
    let (_, corpus) = corpus_from(TEXT);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.dat");
    let mut model = train(&corpus, 2, 4);
    model.save(&path).unwrap();
    let reloaded = UnindexedPatternModel::load(&path, &ReadFilter::default()).unwrap();
    assert_eq!(reloaded.total_tokens(), model.total_tokens());
    assert_eq!(reloaded.total_types(), model.total_types());
    assert_eq!(reloaded.len(), model.len());
}
