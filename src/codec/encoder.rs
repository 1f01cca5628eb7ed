/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Building class assignments from raw text and encoding text into the
//! byte-level corpus format.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use dsi_progress_logger::prelude::*;

use super::{open_text, reserved, varint, CORPUS_MAGIC};
use crate::error::{Error, Result};
use crate::pattern::Pattern;

/// What to do with a token that has no class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownPolicy {
    /// Fail with [`Error::UnknownToken`].
    #[default]
    Strict,
    /// Encode the token as the reserved `unknown` class.
    Unknown,
    /// Assign a fresh class on the fly, extending the codec in place.
    Extend,
}

/// Maps tokens to classes and encodes text lines into class byte sequences.
///
/// An encoder is built once from one or more corpora (or loaded from a class
/// file) and afterwards used read-only, except under
/// [`UnknownPolicy::Extend`].
pub struct ClassEncoder {
    classes: HashMap<String, u32>,
    highest: u32,
    /// Bounds on token length in characters; 0 disables the bound.
    min_token_len: usize,
    max_token_len: usize,
}

impl Default for ClassEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassEncoder {
    pub fn new() -> Self {
        let mut encoder = ClassEncoder {
            classes: HashMap::new(),
            highest: reserved::FIRST_ASSIGNABLE - 1,
            min_token_len: 0,
            max_token_len: 0,
        };
        encoder.insert_reserved();
        encoder
    }

    /// Restricts class assignment to tokens whose character count lies in
    /// the given bounds (0 disables a bound).
    pub fn with_token_length_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_token_len = min;
        self.max_token_len = max;
        self
    }

    fn insert_reserved(&mut self) {
        self.classes.insert("{?}".into(), reserved::UNKNOWN);
        self.classes.insert("{*}".into(), reserved::SKIP);
        self.classes.insert("{**}".into(), reserved::FLEX);
        self.classes.insert("{|}".into(), reserved::BOUNDARY);
    }

    /// Loads a class file (`class TAB token` per line).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut encoder = ClassEncoder::new();
        let reader = open_text(&path)?;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (cls_s, token) = line.split_once('\t').ok_or_else(|| {
                Error::MalformedData(format!("class file line {} has no tab", lineno + 1))
            })?;
            let cls: u32 = cls_s.parse().map_err(|_| {
                Error::MalformedData(format!("bad class id on line {}", lineno + 1))
            })?;
            encoder.add(token, cls);
        }
        Ok(encoder)
    }

    /// Adds an explicit token/class association.
    pub fn add(&mut self, token: &str, cls: u32) {
        self.classes.insert(token.into(), cls);
        if cls > self.highest {
            self.highest = cls;
        }
    }

    /// The highest class currently assigned.
    pub fn highest_class(&self) -> u32 {
        self.highest
    }

    /// The number of token classes, reserved ones excluded.
    pub fn len(&self) -> usize {
        self.classes
            .values()
            .filter(|&&c| c >= reserved::FIRST_ASSIGNABLE)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The class of a token, if any.
    pub fn class(&self, token: &str) -> Option<u32> {
        self.classes.get(token).copied()
    }

    fn admits(&self, token: &str) -> bool {
        if self.min_token_len == 0 && self.max_token_len == 0 {
            return true;
        }
        let l = token.chars().count();
        (self.min_token_len == 0 || l >= self.min_token_len)
            && (self.max_token_len == 0 || l <= self.max_token_len)
    }

    /// Counts token frequencies in one corpus file, accumulating into
    /// `freq`. The second component of each entry records first-seen order
    /// so that class assignment can break frequency ties deterministically.
    pub fn count_tokens(
        &self,
        path: impl AsRef<Path>,
        freq: &mut HashMap<String, (u64, usize)>,
        vocab: Option<&HashSet<String>>,
    ) -> Result<()> {
        let reader = open_text(&path)?;
        for line in reader.lines() {
            let line = line?;
            for token in line.split_whitespace() {
                if !self.admits(token) {
                    continue;
                }
                if let Some(vocab) = vocab {
                    if !vocab.contains(token) {
                        continue;
                    }
                }
                let next_rank = freq.len();
                let entry = freq.entry(token.into()).or_insert((0, next_rank));
                entry.0 += 1;
            }
        }
        Ok(())
    }

    /// Assigns classes to every token in `freq` that reaches `threshold`,
    /// most frequent first, ties broken by first-seen order. Tokens that
    /// already have a class keep it.
    pub fn assign_classes(&mut self, freq: &HashMap<String, (u64, usize)>, threshold: u64) {
        let mut ranked: Vec<(&String, &(u64, usize))> = freq
            .iter()
            .filter(|(_, (count, _))| *count >= threshold)
            .collect();
        ranked.sort_by(|(_, (ca, ra)), (_, (cb, rb))| cb.cmp(ca).then(ra.cmp(rb)));
        for (token, _) in ranked {
            if !self.classes.contains_key(token) {
                self.highest += 1;
                self.classes.insert(token.clone(), self.highest);
            }
        }
    }

    /// Builds a frequency-ranked class assignment from one or more corpus
    /// files. Tokens below `threshold` occurrences get no class. If a
    /// vocabulary file is given, only tokens listed in it are eligible.
    pub fn build(
        &mut self,
        files: &[impl AsRef<Path>],
        threshold: u64,
        vocab_file: Option<&Path>,
    ) -> Result<()> {
        let vocab = match vocab_file {
            Some(path) => Some(load_vocab(path)?),
            None => None,
        };
        let mut freq = HashMap::new();
        for file in files {
            log::info!("Processing {}", file.as_ref().display());
            self.count_tokens(file, &mut freq, vocab.as_ref())?;
        }
        self.assign_classes(&freq, threshold);
        log::info!("Built {} classes", self.len());
        Ok(())
    }

    /// Builds classes from a pre-computed frequency list (`token TAB count`
    /// per line).
    pub fn build_from_freq_list(&mut self, path: impl AsRef<Path>, threshold: u64) -> Result<()> {
        let reader = open_text(&path)?;
        let mut freq = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((token, count_s)) = line.split_once('\t') {
                let count: u64 = count_s.trim().parse().map_err(|_| {
                    Error::MalformedData(format!("bad count in frequency list: {:?}", count_s))
                })?;
                let rank = freq.len();
                freq.insert(token.to_string(), (count, rank));
            }
        }
        self.assign_classes(&freq, threshold);
        Ok(())
    }

    /// Encodes one whitespace-tokenised line, appending class bytes to
    /// `out`. Returns the number of tokens emitted. The sentence delimiter
    /// is *not* appended.
    ///
    /// The syntactic tokens `{*}`, `{**}`, `{*N*}` and `{?}` encode as the
    /// reserved gap and unknown classes.
    pub fn encode_line(
        &mut self,
        line: &str,
        out: &mut Vec<u8>,
        policy: UnknownPolicy,
    ) -> Result<usize> {
        let mut tokens = 0;
        for token in line.split_whitespace() {
            if token == "{*}" {
                out.push(reserved::SKIP as u8);
                tokens += 1;
                continue;
            }
            if token == "{**}" {
                out.push(reserved::FLEX as u8);
                tokens += 1;
                continue;
            }
            if token == "{?}" {
                out.push(reserved::UNKNOWN as u8);
                tokens += 1;
                continue;
            }
            if let Some(count) = parse_skip_run(token) {
                for _ in 0..count {
                    out.push(reserved::SKIP as u8);
                    tokens += 1;
                }
                continue;
            }
            let cls = match self.classes.get(token) {
                Some(&cls) => cls,
                None => match policy {
                    UnknownPolicy::Strict => return Err(Error::UnknownToken(token.into())),
                    UnknownPolicy::Unknown => reserved::UNKNOWN,
                    UnknownPolicy::Extend => {
                        self.highest += 1;
                        self.classes.insert(token.into(), self.highest);
                        self.highest
                    }
                },
            };
            varint::write_class(out, cls);
            tokens += 1;
        }
        Ok(tokens)
    }

    /// Encodes a pattern string (which may contain gap tokens) into an
    /// owning pattern.
    pub fn build_pattern(&mut self, text: &str, policy: UnknownPolicy) -> Result<Pattern> {
        let mut buf = Vec::new();
        self.encode_line(text, &mut buf, policy)?;
        Ok(Pattern::from_encoded(buf))
    }

    /// Encodes a plain-text file into the version-2 corpus format. When
    /// `append` is set the output is opened in append mode and no magic is
    /// written. Returns the number of lines encoded.
    pub fn encode_file(
        &mut self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        policy: UnknownPolicy,
        append: bool,
    ) -> Result<u64> {
        let reader = open_text(&input)?;
        let file = if append {
            OpenOptions::new().append(true).create(true).open(&output)?
        } else {
            File::create(&output)?
        };
        let mut writer = BufWriter::new(file);
        if !append {
            writer.write_all(&CORPUS_MAGIC)?;
        }

        let mut pl = ProgressLogger::default();
        pl.item_name("line");
        pl.start("Encoding corpus...");
        let mut lines = 0u64;
        let mut buf = Vec::new();
        for line in reader.lines() {
            let line = line?;
            buf.clear();
            self.encode_line(&line, &mut buf, policy)?;
            buf.push(reserved::DELIMITER as u8);
            writer.write_all(&buf)?;
            lines += 1;
            pl.light_update();
        }
        pl.done();
        writer.flush()?;
        log::info!("Encoded {} lines", lines);
        Ok(lines)
    }

    /// Writes the class file: one `class TAB token` line per assigned
    /// class, sorted by class. Reserved classes are not persisted.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut entries: Vec<(&u32, &String)> = self
            .classes
            .iter()
            .filter(|(_, &cls)| cls >= reserved::FIRST_ASSIGNABLE)
            .map(|(token, cls)| (cls, token))
            .collect();
        entries.sort();
        let mut writer = BufWriter::new(File::create(path)?);
        for (cls, token) in entries {
            writeln!(writer, "{}\t{}", cls, token)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Builds the matching decoder, including any classes added on the fly.
    pub fn build_decoder(&self) -> super::ClassDecoder {
        let mut decoder = super::ClassDecoder::new();
        for (token, &cls) in &self.classes {
            if cls >= reserved::FIRST_ASSIGNABLE {
                decoder.add(cls, token.clone());
            }
        }
        decoder
    }
}

/// Parses a `{*N*}` token into the gap run length `N`.
fn parse_skip_run(token: &str) -> Option<usize> {
    let inner = token.strip_prefix("{*")?.strip_suffix("*}")?;
    if inner.is_empty() {
        return None;
    }
    inner.parse().ok()
}

fn load_vocab(path: &Path) -> Result<HashSet<String>> {
    let reader = open_text(path)?;
    let mut vocab = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            vocab.insert(line.to_string());
        }
    }
    Ok(vocab)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn encoder_for(text: &str) -> ClassEncoder {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, text).unwrap();
        let mut encoder = ClassEncoder::new();
        encoder.build(&[&path], 1, None).unwrap();
        encoder
    }

    #[test]
    fn classes_are_frequency_ranked() {
        let encoder = encoder_for("b a a a c b a\n");
        // a occurs 4 times, b twice, c once
        assert_eq!(encoder.class("a"), Some(reserved::FIRST_ASSIGNABLE));
        assert_eq!(encoder.class("b"), Some(reserved::FIRST_ASSIGNABLE + 1));
        assert_eq!(encoder.class("c"), Some(reserved::FIRST_ASSIGNABLE + 2));
    }

    #[test]
    fn frequency_ties_break_by_first_seen() {
        let encoder = encoder_for("x y\nx y\n");
        assert_eq!(encoder.class("x"), Some(reserved::FIRST_ASSIGNABLE));
        assert_eq!(encoder.class("y"), Some(reserved::FIRST_ASSIGNABLE + 1));
    }

    #[test]
    fn threshold_prunes_rare_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, "a a a hapax\n").unwrap();
        let mut encoder = ClassEncoder::new();
        encoder.build(&[&path], 2, None).unwrap();
        assert!(encoder.class("a").is_some());
        assert!(encoder.class("hapax").is_none());
    }

    #[test]
    fn gap_tokens_encode_as_reserved_classes() {
        let mut encoder = encoder_for("a b c\n");
        let mut out = Vec::new();
        let n = encoder
            .encode_line("a {*} b {**} {?} {*2*} c", &mut out, UnknownPolicy::Strict)
            .unwrap();
        // {*2*} expands to two fixed gaps, each counting as one token
        assert_eq!(n, 8);
        let a = encoder.class("a").unwrap() as u8;
        let b = encoder.class("b").unwrap() as u8;
        let c = encoder.class("c").unwrap() as u8;
        assert_eq!(out, vec![a, 2, b, 3, 1, 2, 2, c]);
    }

    #[test]
    fn strict_policy_rejects_unknown_tokens() {
        let mut encoder = encoder_for("a\n");
        let mut out = Vec::new();
        assert!(matches!(
            encoder.encode_line("nope", &mut out, UnknownPolicy::Strict),
            Err(Error::UnknownToken(_))
        ));
    }

    #[test]
    fn extend_policy_grows_the_codec() {
        let mut encoder = encoder_for("a\n");
        let before = encoder.highest_class();
        let mut out = Vec::new();
        encoder
            .encode_line("fresh", &mut out, UnknownPolicy::Extend)
            .unwrap();
        assert_eq!(encoder.class("fresh"), Some(before + 1));
    }

    #[test]
    fn class_file_roundtrip() {
        let encoder = encoder_for("alpha beta alpha\n");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.cls");
        encoder.save(&path).unwrap();
        let reloaded = ClassEncoder::load(&path).unwrap();
        assert_eq!(reloaded.class("alpha"), encoder.class("alpha"));
        assert_eq!(reloaded.class("beta"), encoder.class("beta"));
        // reserved classes are present but not persisted
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("{*}"));
    }

    #[test]
    fn gzip_input_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        gz.write_all(b"z z z\n").unwrap();
        gz.finish().unwrap();
        let mut encoder = ClassEncoder::new();
        encoder.build(&[&path], 1, None).unwrap();
        assert_eq!(encoder.class("z"), Some(reserved::FIRST_ASSIGNABLE));
    }
}
