/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The versioned binary model format.
//!
//! A model file starts with a null byte, a model type byte and a version
//! byte. Pointer variants embed the raw corpus bytes (a `u32` length
//! followed by the bytes) right after the header. Then follow the corpus
//! totals (`u64` tokens, `u64` types) and the pattern-store serialisation.
//!
//! A reader requesting unindexed data may load an indexed file (each
//! position list coerces to its length) and vice versa (position lists
//! come out empty). Pointer variants are readable (each stored
//! `(offset, length, mask)` triple is materialised against the embedded
//! corpus) but never written.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::pattern::{Pattern, PatternRef};
use crate::store::{IndexedData, PatternMap, PatternSet, PatternValue, ReadFilter};

use super::{PatternModel, PatternSetModel};

/// The model version this reader and writer speak.
pub const MODEL_VERSION: u8 = 2;

/// On-disk model types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModelType {
    Unindexed = 10,
    UnindexedPointer = 11,
    Indexed = 20,
    IndexedPointer = 21,
    Set = 30,
    Alignment = 40,
}

impl ModelType {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            10 => Ok(ModelType::Unindexed),
            11 => Ok(ModelType::UnindexedPointer),
            20 => Ok(ModelType::Indexed),
            21 => Ok(ModelType::IndexedPointer),
            30 => Ok(ModelType::Set),
            40 => Ok(ModelType::Alignment),
            _ => Err(Error::MalformedData(format!(
                "unknown model type {}",
                byte
            ))),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, ModelType::UnindexedPointer | ModelType::IndexedPointer)
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, ModelType::Indexed | ModelType::IndexedPointer)
    }
}

struct Header {
    model_type: ModelType,
    corpus: Option<Vec<u8>>,
    total_tokens: u64,
    total_types: u64,
}

fn read_header(reader: &mut impl Read) -> Result<Header> {
    let mut bytes = [0u8; 3];
    reader.read_exact(&mut bytes)?;
    if bytes[0] != 0 {
        return Err(Error::MalformedData(
            "not a pattern model file (missing null byte)".into(),
        ));
    }
    let model_type = ModelType::from_byte(bytes[1])?;
    let version = bytes[2];
    if version > MODEL_VERSION {
        log::warn!(
            "Model was written by a newer version ({} > {}); attempting to continue, but failure is likely",
            version,
            MODEL_VERSION
        );
    }
    let corpus = if model_type.is_pointer() {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut corpus = vec![0u8; len];
        reader.read_exact(&mut corpus)?;
        Some(corpus)
    } else {
        None
    };
    let mut totals = [0u8; 16];
    reader.read_exact(&mut totals)?;
    Ok(Header {
        model_type,
        corpus,
        total_tokens: u64::from_le_bytes(totals[0..8].try_into().unwrap()),
        total_types: u64::from_le_bytes(totals[8..16].try_into().unwrap()),
    })
}

fn write_header(
    writer: &mut impl Write,
    model_type: ModelType,
    total_tokens: u64,
    total_types: u64,
) -> Result<()> {
    writer.write_all(&[0, model_type as u8, MODEL_VERSION])?;
    writer.write_all(&total_tokens.to_le_bytes())?;
    writer.write_all(&total_types.to_le_bytes())?;
    Ok(())
}

/// The model type stored in a file, without loading it.
pub fn model_type_of(path: impl AsRef<Path>) -> Result<ModelType> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    if bytes[0] != 0 {
        return Err(Error::MalformedData(
            "not a pattern model file (missing null byte)".into(),
        ));
    }
    ModelType::from_byte(bytes[1])
}

/// Reads the pattern records of a pointer model: `(offset, length, mask)`
/// triples materialised against the embedded corpus bytes, each followed by
/// a value.
fn read_pointer_map<V: PatternValue, S: PatternValue>(
    reader: &mut impl Read,
    corpus: &[u8],
    filter: &ReadFilter<'_>,
) -> Result<PatternMap<V>> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    let count = u64::from_le_bytes(buf);
    let mut map = PatternMap::new();
    for i in 0..count {
        let mut triple = [0u8; 12];
        reader.read_exact(&mut triple).map_err(|_| {
            Error::MalformedData(format!("pattern {} of {}: truncated record", i + 1, count))
        })?;
        let offset = u32::from_le_bytes(triple[0..4].try_into().unwrap()) as usize;
        let length = u32::from_le_bytes(triple[4..8].try_into().unwrap()) as usize;
        let mask = u32::from_le_bytes(triple[8..12].try_into().unwrap());
        if offset + length > corpus.len() {
            return Err(Error::MalformedData(format!(
                "pattern {} of {}: view outside the embedded corpus",
                i + 1,
                count
            )));
        }
        let pattern = PatternRef::with_mask(&corpus[offset..offset + length], mask)
            .to_owned_pattern();
        let stored = S::read_from(reader)?;
        if !filter_admits::<S>(filter, &pattern, &stored) {
            continue;
        }
        let value = coerce::<V, S>(&stored, filter.reset);
        map.insert(pattern, value);
    }
    Ok(map)
}

fn filter_admits<S: PatternValue>(
    filter: &ReadFilter<'_>,
    pattern: &Pattern,
    stored: &S,
) -> bool {
    let n = pattern.n();
    if n < filter.min_length || n > filter.max_length {
        return false;
    }
    if stored.count() < filter.min_tokens {
        return false;
    }
    if !filter.categories.admits(pattern.category()) {
        return false;
    }
    if let Some(constraint) = filter.constraint {
        if !constraint.contains_pattern(pattern) {
            return false;
        }
    }
    true
}

fn coerce<V: PatternValue, S: PatternValue>(stored: &S, reset: bool) -> V {
    if reset {
        V::default()
    } else if S::INDEXED {
        V::from_indexed(
            stored
                .refs()
                .map(|refs| refs.iter().copied().collect())
                .unwrap_or_default(),
        )
    } else {
        V::from_count(stored.count())
    }
}

impl<V: PatternValue> PatternModel<V> {
    /// The on-disk type this model writes.
    pub fn model_type(&self) -> ModelType {
        if V::INDEXED {
            ModelType::Indexed
        } else {
            ModelType::Unindexed
        }
    }

    /// Writes the model. The type totals are computed on the fly if they
    /// were never set.
    pub fn write_to(&mut self, writer: &mut impl Write) -> Result<()> {
        if self.total_types == 0 && !self.is_empty() {
            self.total_types = self.total_word_types_in_group(None, 0);
        }
        // position lists are published in sorted order
        self.sort_indices();
        write_header(
            writer,
            self.model_type(),
            self.total_tokens,
            self.total_types,
        )?;
        self.data.write_to(writer)?;
        Ok(())
    }

    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a model of any stored type, coercing the values to this
    /// model's value type and applying the read filters.
    pub fn load_from(reader: &mut impl Read, filter: &ReadFilter<'_>) -> Result<Self> {
        let header = read_header(reader)?;
        log::info!(
            "Loading pattern model (type {:?}, {} tokens, {} types)",
            header.model_type,
            header.total_tokens,
            header.total_types
        );
        let data = match header.model_type {
            ModelType::Unindexed => PatternMap::read_from::<u32>(reader, filter)?,
            ModelType::Indexed => PatternMap::read_from::<IndexedData>(reader, filter)?,
            ModelType::UnindexedPointer => read_pointer_map::<V, u32>(
                reader,
                header.corpus.as_deref().unwrap_or_default(),
                filter,
            )?,
            ModelType::IndexedPointer => read_pointer_map::<V, IndexedData>(
                reader,
                header.corpus.as_deref().unwrap_or_default(),
                filter,
            )?,
            ModelType::Set => {
                // a set carries no values; patterns come out with zero counts
                let set = PatternSet::read_from(reader, filter)?;
                let mut map = PatternMap::new();
                for pattern in set.iter() {
                    map.insert(pattern.clone(), V::default());
                }
                map
            }
            ModelType::Alignment => {
                return Err(Error::InvalidArgument(
                    "alignment models cannot be read as pattern models".into(),
                ))
            }
        };
        let mut model = PatternModel::new();
        model.data = data;
        model.total_tokens = header.total_tokens;
        model.total_types = header.total_types;
        model.recompute_bounds();
        Ok(model)
    }

    pub fn load(path: impl AsRef<Path>, filter: &ReadFilter<'_>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(&path)?);
        Self::load_from(&mut reader, filter)
    }
}

impl PatternSetModel {
    /// Writes the set model (type 30).
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        write_header(writer, ModelType::Set, self.total_tokens, self.total_types)?;
        self.set.write_to(writer)?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Loads the patterns of any model file into a set, discarding values. The
/// usual way to obtain a constraint model.
pub fn load_pattern_set(
    path: impl AsRef<Path>,
    filter: &ReadFilter<'_>,
) -> Result<PatternSetModel> {
    let mut reader = BufReader::new(File::open(&path)?);
    let header = read_header(&mut reader)?;
    let mut set = PatternSet::new();
    match header.model_type {
        ModelType::Set => {
            set = PatternSet::read_from(&mut reader, filter)?;
        }
        ModelType::Unindexed => {
            let map: PatternMap<u32> = PatternMap::read_from::<u32>(&mut reader, filter)?;
            for (pattern, _) in map.iter() {
                set.insert(pattern.clone());
            }
        }
        ModelType::Indexed => {
            let map: PatternMap<u32> = PatternMap::read_from::<IndexedData>(&mut reader, filter)?;
            for (pattern, _) in map.iter() {
                set.insert(pattern.clone());
            }
        }
        ModelType::UnindexedPointer => {
            let map: PatternMap<u32> = read_pointer_map::<u32, u32>(
                &mut reader,
                header.corpus.as_deref().unwrap_or_default(),
                filter,
            )?;
            for (pattern, _) in map.iter() {
                set.insert(pattern.clone());
            }
        }
        ModelType::IndexedPointer => {
            let map: PatternMap<u32> = read_pointer_map::<u32, IndexedData>(
                &mut reader,
                header.corpus.as_deref().unwrap_or_default(),
                filter,
            )?;
            for (pattern, _) in map.iter() {
                set.insert(pattern.clone());
            }
        }
        ModelType::Alignment => {
            return Err(Error::InvalidArgument(
                "alignment models cannot be read as pattern sets".into(),
            ))
        }
    }
    Ok(PatternSetModel {
        set,
        total_tokens: header.total_tokens,
        total_types: header.total_types,
    })
}
