/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]
#![allow(clippy::type_complexity)]

pub mod codec;
pub mod corpus;
pub mod error;
pub mod model;
pub mod pattern;
pub mod skipgram;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

pub mod prelude {
    pub use crate::codec::{ClassDecoder, ClassEncoder, UnknownPolicy};
    pub use crate::corpus::{IndexReference, IndexedCorpus};
    pub use crate::error::{Error, Result};
    pub use crate::model::{
        load_pattern_set, model_type_of, IndexedPatternModel, ModelInterface, ModelType,
        PatternModel, PatternSetModel, RelationMap, TrainConstraint, TrainingOptions,
        UnindexedPatternModel,
    };
    pub use crate::pattern::{Pattern, PatternCategory, PatternRef};
    pub use crate::store::{
        Categories, IndexedData, PatternMap, PatternSet, PatternStoreQuery, PatternValue,
        ReadFilter,
    };
}
