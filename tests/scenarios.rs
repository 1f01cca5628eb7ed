/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! End-to-end scenarios: text → class codec → encoded corpus → model
//! training → queries, and the on-disk round trips in between.

use std::collections::HashSet;

use patternmodel::prelude::*;

const STANZA: &str = "to be or not to be , that is the question\n";
const FLEE: &str = "to flee or not to flee\n";

fn encode_corpus(text: &str) -> (ClassEncoder, ClassDecoder, IndexedCorpus) {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("corpus.txt");
    let data_path = dir.path().join("corpus.dat");
    std::fs::write(&text_path, text).unwrap();
    let mut encoder = ClassEncoder::new();
    encoder.build(&[&text_path], 1, None).unwrap();
    encoder
        .encode_file(&text_path, &data_path, UnknownPolicy::Strict, false)
        .unwrap();
    let decoder = encoder.build_decoder();
    let corpus = IndexedCorpus::load(&data_path).unwrap();
    (encoder, decoder, corpus)
}

fn pattern(encoder: &mut ClassEncoder, text: &str) -> Pattern {
    encoder.build_pattern(text, UnknownPolicy::Strict).unwrap()
}

#[test]
fn stanza_unindexed_model() {
    let (mut encoder, _, corpus) = encode_corpus(STANZA);
    let mut model = UnindexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 2,
        max_length: 5,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();

    assert_eq!(model.total_tokens(), 11);
    assert_eq!(
        model.occurrence_count(&pattern(&mut encoder, "to")),
        2
    );
    assert_eq!(
        model.occurrence_count(&pattern(&mut encoder, "be")),
        2
    );
    assert_eq!(
        model.occurrence_count(&pattern(&mut encoder, "to be")),
        2
    );
    // occurs once and is pruned
    assert!(!model.contains(&pattern(&mut encoder, "not to be")));
    assert_eq!(model.len(), 3);
}

/// The stanza (twice, so that its five-gram survives the occurrence
/// threshold) plus three skipgram-inducing sentences.
fn skipgram_corpus() -> String {
    format!("{}{}{}{}{}", STANZA, STANZA, FLEE, FLEE, FLEE)
}

#[test]
fn indexed_model_with_skipgrams() {
    let (mut encoder, _, corpus) = encode_corpus(&skipgram_corpus());
    let mut model = IndexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 2,
        do_skipgrams: true,
        min_skip_types: 2,
        max_length: 8,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    assert!(model.has_skipgrams());

    // the skipgram occurs in every sentence
    let skipgram = pattern(&mut encoder, "to {*} or {*} to");
    assert!(model.contains(&skipgram));
    assert_eq!(model.occurrence_count(&skipgram), 5);

    let content = model.skip_content(&corpus, &skipgram).unwrap();
    let be_filler = pattern(&mut encoder, "be {*} not");
    let flee_filler = pattern(&mut encoder, "flee {*} not");
    assert_eq!(content.get(&be_filler), Some(&2));
    assert_eq!(content.get(&flee_filler), Some(&3));

    // "or {*} to" is only ever filled by "not": below the skip type
    // threshold
    assert!(!model.contains(&pattern(&mut encoder, "or {*} to")));
    // "to {*} or" is filled by both "be" and "flee"
    assert!(model.contains(&pattern(&mut encoder, "to {*} or")));
}

#[test]
fn constrained_rebuild_preserves_keys_and_counts() {
    let (_, _, corpus) = encode_corpus(&skipgram_corpus());
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("m1.model");

    let options = TrainingOptions {
        min_tokens: 3,
        max_length: 8,
        ..Default::default()
    };
    let mut m1 = UnindexedPatternModel::new();
    m1.train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    m1.save(&model_path).unwrap();

    // reload with reset and rebuild in place as an indexed model
    let filter = ReadFilter {
        reset: true,
        ..Default::default()
    };
    let mut m2 = IndexedPatternModel::load(&model_path, &filter).unwrap();
    m2.train(&corpus, &options, TrainConstraint::SelfModel, None, false)
        .unwrap();

    let keys1: HashSet<Pattern> = m1.keys().cloned().collect();
    let keys2: HashSet<Pattern> = m2.keys().cloned().collect();
    assert_eq!(keys1, keys2);
    for pattern in &keys1 {
        assert_eq!(
            m2.references(pattern).unwrap().len() as u32,
            m1.occurrence_count(pattern),
            "index list length differs for {:?}",
            pattern
        );
    }
}

#[test]
fn flexgrams_from_skipgrams_sum_contributions() {
    let (mut encoder, _, corpus) =
        encode_corpus("not to be\nnot to sleep\nnot to be\n");
    let mut model = IndexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 1,
        max_length: 3,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();

    // two skipgram shapes that collapse onto the same flexgram
    let narrow = pattern(&mut encoder, "not {*} be");
    let wide = pattern(&mut encoder, "not {*} {*} sleep");
    model.add_pattern(narrow.clone(), IndexReference::new(1, 0));
    model.add_pattern(narrow.clone(), IndexReference::new(3, 0));
    model.add_pattern(wide.clone(), IndexReference::new(2, 0));

    model.compute_flexgrams_from_skipgrams();
    let flex_narrow = pattern(&mut encoder, "not {**} be");
    let flex_wide = pattern(&mut encoder, "not {**} sleep");
    assert_eq!(model.occurrence_count(&flex_narrow), 2);
    assert_eq!(model.occurrence_count(&flex_wide), 1);

    // a flexgram absorbs the positions of every contributing skipgram
    let other = pattern(&mut encoder, "not {*} {*} be");
    model.add_pattern(other, IndexReference::new(2, 0));
    model.compute_flexgrams_from_skipgrams();
    assert_eq!(model.occurrence_count(&flex_narrow), 3);
}

#[test]
fn equality_and_hashing_across_representations() {
    let (mut encoder, _, corpus) = encode_corpus("to be to be\n");
    let own = pattern(&mut encoder, "to {*} to");
    // view over the corpus bytes "to be to" with the middle token masked
    let view = corpus.get_pattern(IndexReference::new(1, 0), 3).unwrap();
    let view = view.add_skip((1, 1));
    assert_eq!(view.mask(), 0b010);
    assert_eq!(view.category(), PatternCategory::Skipgram);
    assert!(view == own);
    assert_eq!(view.hash64(), own.hash64());
    assert_eq!(view.to_owned_pattern(), own);

    // the flexgram forms agree as well
    let flex_own = own.to_flexgram();
    let flex_view = view.to_flexgram();
    assert!(flex_view == flex_own);
    assert_eq!(flex_view.hash64(), flex_own.hash64());
}

#[test]
fn version1_corpus_upgrade() {
    // "a b c" in the version-1 layout: length-prefixed tokens, no magic
    let (mut encoder, decoder, _) = encode_corpus("a b c\n");
    let a = encoder.class("a").unwrap() as u8;
    let b = encoder.class("b").unwrap() as u8;
    let c = encoder.class("c").unwrap() as u8;
    let v1 = vec![1u8, a, 1, b, 1, c, 0];
    let v2 = vec![0xa2, 0x02, a, b, c, 0];

    let old = IndexedCorpus::from_bytes(v1).unwrap();
    let new = IndexedCorpus::from_bytes(v2).unwrap();
    assert_eq!(old.sentences(), 1);
    assert_eq!(
        old.get_sentence(1).unwrap().to_owned_pattern(),
        new.get_sentence(1).unwrap().to_owned_pattern()
    );
    assert_eq!(
        old.get_sentence(1)
            .unwrap()
            .to_text(&decoder)
            .unwrap(),
        "a b c"
    );
}

#[test]
fn corpus_text_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("corpus.txt");
    let data_path = dir.path().join("corpus.dat");
    let text = "the quick brown fox\njumps over the lazy dog\n";
    std::fs::write(&text_path, text).unwrap();

    let mut encoder = ClassEncoder::new();
    encoder.build(&[&text_path], 1, None).unwrap();
    encoder
        .encode_file(&text_path, &data_path, UnknownPolicy::Strict, false)
        .unwrap();
    let decoder = encoder.build_decoder();
    let mut decoded = Vec::new();
    decoder.decode_file(&data_path, &mut decoded, 0, 0).unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), text);
}

#[test]
fn model_files_roundtrip_through_disk() {
    let (_, _, corpus) = encode_corpus(&skipgram_corpus());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.dat");

    let mut model = IndexedPatternModel::new();
    let options = TrainingOptions {
        min_tokens: 2,
        max_length: 5,
        ..Default::default()
    };
    model
        .train(&corpus, &options, TrainConstraint::None, None, false)
        .unwrap();
    model.save(&path).unwrap();

    assert_eq!(model_type_of(&path).unwrap(), ModelType::Indexed);
    let reloaded = IndexedPatternModel::load(&path, &ReadFilter::default()).unwrap();
    assert_eq!(reloaded.len(), model.len());
    assert_eq!(reloaded.total_tokens(), model.total_tokens());
    for (pattern, value) in model.iter() {
        assert_eq!(
            reloaded.references(pattern).map(|r| r.as_slice()),
            Some(value.as_slice())
        );
    }
}
