/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The `classdecode` front-end: decodes a binary corpus file back to plain
//! text.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::codec::ClassDecoder;

#[derive(Parser, Debug)]
#[command(
    name = "classdecode",
    version,
    about = "Decode a class-encoded corpus file back to plain text, one sentence per line."
)]
pub struct Cli {
    /// Encoded corpus file
    pub corpus_file: PathBuf,

    /// Class file
    #[arg(short = 'c', value_name = "CLASSFILE", required = true)]
    pub class_file: PathBuf,

    /// First line to decode (1-indexed, 0 for no bound)
    #[arg(short = 'F', default_value_t = 0)]
    pub start: u32,

    /// Last line to decode (inclusive, 0 for no bound)
    #[arg(short = 'L', default_value_t = 0)]
    pub end: u32,
}

pub fn classdecode_main(cli: Cli) -> Result<()> {
    let decoder = ClassDecoder::load(&cli.class_file)
        .with_context(|| format!("could not load class file {}", cli.class_file.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    decoder
        .decode_file(&cli.corpus_file, &mut out, cli.start, cli.end)
        .with_context(|| format!("could not decode {}", cli.corpus_file.display()))?;
    out.flush()?;
    Ok(())
}
