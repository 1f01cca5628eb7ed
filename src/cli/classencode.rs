/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The `classencode` front-end: builds a class file from plain-text corpora
//! and encodes them into the binary corpus format.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::codec::{ClassEncoder, UnknownPolicy};

#[derive(Parser, Debug)]
#[command(
    name = "classencode",
    version,
    about = "Build a class file from plain-text corpora (whitespace-tokenised, one sentence per line; .bz2 and .gz are read transparently) and encode them."
)]
pub struct Cli {
    /// Input corpus files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Basename for the output files (defaults to the first input file
    /// without its extension)
    #[arg(short = 'o')]
    pub output: Option<PathBuf>,

    /// Load an existing class file instead of building one
    #[arg(short = 'c', value_name = "CLASSFILE")]
    pub class_file: Option<PathBuf>,

    /// Extend the loaded class file with any new tokens (requires -c)
    #[arg(short = 'e', requires = "class_file")]
    pub extend: bool,

    /// Encode unknown tokens as {?} instead of failing (only with -c)
    #[arg(short = 'U', requires = "class_file")]
    pub allow_unknown: bool,

    /// Occurrence threshold for class assignment; rarer tokens get no
    /// class
    #[arg(short = 't', default_value_t = 1)]
    pub threshold: u64,

    /// Restrict the vocabulary to the tokens listed in this file
    #[arg(short = 'v', value_name = "VOCABFILE")]
    pub vocab: Option<PathBuf>,

    /// Build classes from a pre-computed frequency list (`token TAB
    /// count` per line) instead of counting the corpus files
    #[arg(short = 'l', value_name = "FREQLIST")]
    pub freq_list: Option<PathBuf>,

    /// Append to the output corpus file instead of overwriting it
    #[arg(short = 'a')]
    pub append: bool,
}

pub fn classencode_main(cli: Cli) -> Result<()> {
    let basename = cli.output.clone().unwrap_or_else(|| {
        let mut base = cli.files[0].clone();
        base.set_extension("");
        base
    });
    let class_path = basename.with_extension("cls");
    let corpus_path = basename.with_extension("dat");

    let (mut encoder, policy) = match &cli.class_file {
        Some(path) => {
            log::info!("Loading classes from {}", path.display());
            let mut encoder = ClassEncoder::load(path)
                .with_context(|| format!("could not load class file {}", path.display()))?;
            if cli.extend {
                log::info!("Extending the class file with new tokens");
                encoder.build(&cli.files, cli.threshold, cli.vocab.as_deref())?;
                (encoder, UnknownPolicy::Extend)
            } else if cli.allow_unknown {
                (encoder, UnknownPolicy::Unknown)
            } else {
                (encoder, UnknownPolicy::Strict)
            }
        }
        None => {
            let mut encoder = ClassEncoder::new();
            match &cli.freq_list {
                Some(list) => encoder
                    .build_from_freq_list(list, cli.threshold)
                    .with_context(|| format!("could not read frequency list {}", list.display()))?,
                None => encoder
                    .build(&cli.files, cli.threshold, cli.vocab.as_deref())
                    .context("could not build classes")?,
            }
            (encoder, UnknownPolicy::Unknown)
        }
    };

    let mut append = cli.append;
    for file in &cli.files {
        log::info!("Encoding {}", file.display());
        encoder
            .encode_file(file, &corpus_path, policy, append)
            .with_context(|| format!("could not encode {}", file.display()))?;
        append = true;
    }

    encoder
        .save(&class_path)
        .with_context(|| format!("could not save class file {}", class_path.display()))?;
    log::info!(
        "Wrote {} and {}",
        class_path.display(),
        corpus_path.display()
    );
    Ok(())
}
