/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The command-line front-ends: `patternmodeller` plus the `classencode`
//! and `classdecode` codec utilities.
//!
//! These are conventional glue around the library; all of the semantics
//! live in [`crate::model`] and friends. Exit codes: 0 on success, 2 for
//! usage errors or missing input, 1 for anything else.

pub mod classdecode;
pub mod classencode;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::codec::{ClassDecoder, ClassEncoder, UnknownPolicy};
use crate::corpus::IndexedCorpus;
use crate::error::Error;
use crate::model::{
    load_pattern_set, model_type_of, IndexedPatternModel, ModelType, PatternModel,
    PatternSetModel, TrainConstraint, TrainingOptions,
};
use crate::pattern::Pattern;
use crate::store::{Categories, IndexedData, PatternStoreQuery, PatternValue, ReadFilter};

/// Initializes `env_logger` with timestamps, defaulting to the `info`
/// level.
pub fn init_env_logger() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()?;
    Ok(())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "patternmodeller",
    version,
    about = "Extract, model and compare recurring patterns (n-grams, skipgrams, flexgrams) and their frequencies in corpus data."
)]
pub struct Cli {
    /// Input model
    #[arg(short = 'i', value_name = "MODELFILE")]
    pub input_model: Option<PathBuf>,

    /// Output model
    #[arg(short = 'o', value_name = "MODELFILE")]
    pub output_model: Option<PathBuf>,

    /// Encoded corpus data file; used for training and as reverse index
    #[arg(short = 'f', value_name = "DATAFILE")]
    pub corpus_file: Option<PathBuf>,

    /// Class file
    #[arg(short = 'c', value_name = "CLASSFILE")]
    pub class_file: Option<PathBuf>,

    /// Constraint model; the result is the intersection with this model
    #[arg(short = 'j', value_name = "MODELFILE")]
    pub constraint_model: Option<PathBuf>,

    /// Occurrence threshold: patterns occurring less often are pruned
    /// (default: 2 when training; loading applies no threshold unless one
    /// is given)
    #[arg(short = 't')]
    pub min_tokens: Option<u32>,

    /// Minimum pattern length
    #[arg(short = 'm', default_value_t = 1)]
    pub min_length: usize,

    /// Maximum pattern length
    #[arg(short = 'l', default_value_t = 100)]
    pub max_length: usize,

    /// Maximum back-off length
    #[arg(short = 'b', default_value_t = 100)]
    pub max_backoff_length: usize,

    /// Secondary word occurrence threshold: only count patterns whose
    /// words all occur at least this many times
    #[arg(short = 'W', default_value_t = 1)]
    pub min_tokens_unigrams: u32,

    /// Build an unindexed model (default is indexed)
    #[arg(short = 'u')]
    pub unindexed: bool,

    /// Compute skipgrams
    #[arg(short = 's')]
    pub skipgrams: bool,

    /// Skip type threshold: skipgrams with fewer distinct fillers are
    /// pruned (indexed models only)
    #[arg(short = 'T', default_value_t = 2)]
    pub min_skip_types: u32,

    /// Occurrence threshold for skipgrams (defaults to the value of -t)
    #[arg(short = 'y', default_value_t = 0)]
    pub min_tokens_skipgrams: u32,

    /// Compute flexgrams: "S" abstracts over skipgrams, a number is an
    /// NPMI threshold for co-occurrence based extraction
    #[arg(short = 'S', value_name = "S|THRESHOLD")]
    pub flexgrams: Option<String>,

    /// Prune n-grams below this order that are not subsumed by a higher
    /// order n-gram
    #[arg(short = 'p', default_value_t = 0)]
    pub prune_non_subsumed: usize,

    /// The data file is a list of patterns, one per line (implies -t 1)
    #[arg(short = 'L')]
    pub one_per_line: bool,

    /// Rebuild the input model in place on the corpus data; only patterns
    /// of the input model are counted
    #[arg(short = 'I')]
    pub in_place_rebuild: bool,

    /// Two-stage building: first an unindexed model, then an indexed
    /// rebuild (saves memory on large corpora)
    #[arg(short = '2')]
    pub two_stage: bool,

    /// Delete all n-grams from the model
    #[arg(short = 'N')]
    pub remove_ngrams: bool,

    /// Delete all skipgrams from the model
    #[arg(short = 'x')]
    pub remove_skipgrams: bool,

    /// Delete all flexgrams from the model
    #[arg(short = 'X')]
    pub remove_flexgrams: bool,

    /// Print the entire model
    #[arg(short = 'P')]
    pub print: bool,

    /// Generate a statistical and coverage report
    #[arg(short = 'R')]
    pub report: bool,

    /// Generate an occurrence histogram
    #[arg(short = 'H')]
    pub histogram: bool,

    /// Interactive query mode
    #[arg(short = 'Q')]
    pub interactive: bool,

    /// Storage information
    #[arg(short = 'V')]
    pub info: bool,

    /// Print the reverse index (indexed models only)
    #[arg(short = 'Z')]
    pub dump_reverse_index: bool,

    /// Query a pattern (can be repeated)
    #[arg(short = 'q', value_name = "PATTERN")]
    pub query_patterns: Vec<String>,

    /// Also show relationships for queried patterns (indexed models only)
    #[arg(short = 'g')]
    pub relations: bool,

    /// Show absolute co-occurrence counts above this threshold
    #[arg(short = 'C', value_name = "THRESHOLD")]
    pub cooc: Option<u32>,

    /// Show normalised pointwise mutual information above this threshold
    #[arg(short = 'Y', value_name = "THRESHOLD")]
    pub npmi: Option<f64>,
}

impl Cli {
    fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            min_tokens: self.min_tokens.unwrap_or(2),
            min_tokens_skipgrams: self.min_tokens_skipgrams,
            min_tokens_unigrams: self.min_tokens_unigrams,
            min_length: self.min_length,
            max_length: self.max_length,
            max_backoff_length: self.max_backoff_length,
            do_skipgrams: self.skipgrams,
            min_skip_types: self.min_skip_types,
            one_per_line: self.one_per_line,
            prune_non_subsumed: self.prune_non_subsumed,
            do_remove_ngrams: self.remove_ngrams,
            do_remove_skipgrams: self.remove_skipgrams,
            do_remove_flexgrams: self.remove_flexgrams,
            ..Default::default()
        }
    }

    fn read_filter<'a>(&self, constraint: Option<&'a PatternSetModel>) -> ReadFilter<'a> {
        let mut categories = Categories::all();
        if self.remove_ngrams {
            categories.remove(Categories::NGRAM);
        }
        if self.remove_skipgrams {
            categories.remove(Categories::SKIPGRAM);
        }
        if self.remove_flexgrams {
            categories.remove(Categories::FLEXGRAM);
        }
        ReadFilter {
            min_tokens: self.min_tokens.unwrap_or(0),
            min_length: self.min_length,
            max_length: self.max_length,
            categories,
            constraint: constraint.map(|c| -> &dyn PatternStoreQuery { c }),
            reset: false,
        }
    }

    fn wants_view(&self) -> bool {
        self.print
            || self.report
            || self.histogram
            || self.interactive
            || self.info
            || self.dump_reverse_index
            || !self.query_patterns.is_empty()
            || self.cooc.is_some()
            || self.npmi.is_some()
    }
}

/// The flexgram strategy selected with `-S`.
enum FlexgramMode {
    FromSkipgrams,
    FromCooc(f64),
}

fn flexgram_mode(cli: &Cli) -> Result<Option<FlexgramMode>> {
    match cli.flexgrams.as_deref() {
        None => Ok(None),
        Some("S") => Ok(Some(FlexgramMode::FromSkipgrams)),
        Some(value) => {
            let threshold: f64 = value.parse().with_context(|| {
                format!("-S expects \"S\" or an NPMI threshold, got {:?}", value)
            })?;
            Ok(Some(FlexgramMode::FromCooc(threshold)))
        }
    }
}

/// Entry point of the `patternmodeller` front-end.
pub fn patternmodeller_main(cli: Cli) -> Result<()> {
    if cli.input_model.is_none() && cli.corpus_file.is_none() {
        log::error!(
            "No input model (-i) or corpus data file (-f) specified; specify at least one"
        );
        std::process::exit(2);
    }

    if cli.two_stage {
        return run_two_stage(cli);
    }

    if cli.unindexed {
        run::<u32>(&cli)
    } else {
        run::<IndexedData>(&cli)
    }
}

fn run_two_stage(cli: Cli) -> Result<()> {
    if cli.min_tokens == Some(1) {
        bail!("two-stage building has no value with -t 1");
    }
    let Some(output) = cli.output_model.clone() else {
        log::error!("An output model (-o) is mandatory for two-stage building");
        std::process::exit(2);
    };
    let stage1_path = output.with_extension("stage1");

    log::info!("Stage 1/2: building an intermediate unindexed model");
    let mut stage1 = cli.clone();
    stage1.two_stage = false;
    stage1.output_model = Some(stage1_path.clone());
    stage1.unindexed = true;
    stage1.skipgrams = false;
    stage1.flexgrams = None;
    stage1.in_place_rebuild = false;
    stage1.print = false;
    stage1.report = false;
    stage1.histogram = false;
    stage1.interactive = false;
    stage1.info = false;
    stage1.dump_reverse_index = false;
    stage1.query_patterns.clear();
    stage1.cooc = None;
    stage1.npmi = None;
    run::<u32>(&stage1)?;

    log::info!("Stage 2/2: building the indexed model");
    let mut stage2 = cli.clone();
    stage2.two_stage = false;
    stage2.unindexed = false;
    stage2.input_model = Some(stage1_path.clone());
    stage2.in_place_rebuild = true;
    let result = run::<IndexedData>(&stage2);
    let _ = std::fs::remove_file(&stage1_path);
    result
}

fn load_constraint(cli: &Cli) -> Result<Option<PatternSetModel>> {
    match &cli.constraint_model {
        None => Ok(None),
        Some(path) => {
            log::info!("Loading constraint model {}", path.display());
            let set = load_pattern_set(path, &ReadFilter::default())
                .with_context(|| format!("could not load constraint model {}", path.display()))?;
            Ok(Some(set))
        }
    }
}

fn load_corpus(path: &Path) -> Result<IndexedCorpus> {
    log::info!("Loading corpus data {}", path.display());
    IndexedCorpus::load(path)
        .with_context(|| format!("could not load corpus data {}", path.display()))
}

fn run<V: ValueSpecific>(cli: &Cli) -> Result<()> {
    let constraint = load_constraint(cli)?;
    let corpus = match &cli.corpus_file {
        Some(path) => Some(load_corpus(path)?),
        None => None,
    };
    let mut options = cli.training_options();
    let mut model: PatternModel<V> = match &cli.input_model {
        Some(path) => {
            let requested = model_type_of(path)?;
            if requested.is_indexed() && !V::INDEXED {
                log::info!("The indexed input model will be read as unindexed");
            }
            let mut filter = cli.read_filter(constraint.as_ref());
            if cli.in_place_rebuild {
                filter.reset = true;
            }
            log::info!("Loading model {}", path.display());
            let mut model = PatternModel::load(path, &filter)
                .with_context(|| format!("could not load model {}", path.display()))?;
            if requested == ModelType::Set {
                log::warn!("The input model is a pattern set; all counts are zero");
            }
            if cli.in_place_rebuild {
                let corpus = corpus
                    .as_ref()
                    .ok_or(Error::NotLoaded)
                    .context("in-place rebuild (-I) requires corpus data (-f)")?;
                model.train(
                    corpus,
                    &options,
                    TrainConstraint::SelfModel,
                    None,
                    false,
                )?;
            }
            model
        }
        None => {
            // train a new model from the corpus data
            let corpus = corpus
                .as_ref()
                .ok_or(Error::NotLoaded)
                .context("training requires corpus data (-f)")?;
            let mut model = PatternModel::new();
            let constraint_ref = match &constraint {
                Some(set) => TrainConstraint::Model(set),
                None => TrainConstraint::None,
            };
            model.train(corpus, &options, constraint_ref, None, false)?;
            model
        }
    };

    // skipgrams requested on a preloaded model; after an in-place rebuild
    // that recounted no skipgram entries, they are extracted afresh
    if cli.skipgrams
        && cli.input_model.is_some()
        && (!cli.in_place_rebuild || !model.has_skipgrams())
    {
        options = options.resolved()?;
        let corpus = corpus
            .as_ref()
            .ok_or(Error::NotLoaded)
            .context("skipgram extraction requires corpus data (-f)")?;
        model.train_skipgrams(corpus, &options, &TrainConstraint::None)?;
    }

    model.apply_post_load_options(&options);

    V::run_value_specific(cli, &mut model, corpus.as_ref())?;

    if let Some(output) = &cli.output_model {
        log::info!("Saving model to {}", output.display());
        model
            .save(output)
            .with_context(|| format!("could not save model to {}", output.display()))?;
    } else if !cli.wants_view() {
        log::warn!("Nothing to do: no output model (-o) and no view options given");
    }
    Ok(())
}

/// The operations that depend on the value type: only the indexed
/// instantiation carries the position-dependent operations.
trait ValueSpecific: PatternValue {
    fn run_value_specific(
        cli: &Cli,
        model: &mut PatternModel<Self>,
        corpus: Option<&IndexedCorpus>,
    ) -> Result<()>;
}

impl ValueSpecific for u32 {
    fn run_value_specific(
        cli: &Cli,
        model: &mut PatternModel<u32>,
        corpus: Option<&IndexedCorpus>,
    ) -> Result<()> {
        if cli.flexgrams.is_some() {
            bail!("flexgram computation (-S) requires an indexed model");
        }
        if cli.cooc.is_some() || cli.npmi.is_some() {
            bail!("co-occurrence computation (-C/-Y) requires an indexed model");
        }
        if cli.dump_reverse_index {
            bail!("the reverse index dump (-Z) requires an indexed model");
        }
        if cli.relations {
            bail!("relations (-g) require an indexed model");
        }
        run_views(cli, model, corpus)
    }
}

impl ValueSpecific for IndexedData {
    fn run_value_specific(
        cli: &Cli,
        model: &mut IndexedPatternModel,
        corpus: Option<&IndexedCorpus>,
    ) -> Result<()> {
        run_indexed(cli, model, corpus)
    }
}

fn run_indexed(
    cli: &Cli,
    model: &mut IndexedPatternModel,
    corpus: Option<&IndexedCorpus>,
) -> Result<()> {
    match flexgram_mode(cli)? {
        None => {}
        Some(FlexgramMode::FromSkipgrams) => {
            let found = model.compute_flexgrams_from_skipgrams();
            log::info!("Computed {} flexgrams from skipgrams", found);
        }
        Some(FlexgramMode::FromCooc(threshold)) => {
            let corpus = corpus
                .ok_or(Error::NotLoaded)
                .context("flexgram computation from co-occurrence requires corpus data (-f)")?;
            let found = model.compute_flexgrams_from_cooc(corpus, threshold)?;
            log::info!("Computed {} flexgrams from co-occurrence", found);
        }
    }

    let stdout = std::io::stdout();
    if let Some(threshold) = cli.cooc {
        let corpus = corpus
            .ok_or(Error::NotLoaded)
            .context("co-occurrence computation requires corpus data (-f)")?;
        let mut out = stdout.lock();
        writeln!(out, "Pattern1\tPattern2\tCooc")?;
        let decoder = load_decoder(cli)?;
        for (a, b, count) in model.compute_cooc(corpus, threshold)? {
            writeln!(
                out,
                "{}\t{}\t{}",
                a.to_text(&decoder)?,
                b.to_text(&decoder)?,
                count
            )?;
        }
    }
    if let Some(threshold) = cli.npmi {
        let corpus = corpus
            .ok_or(Error::NotLoaded)
            .context("NPMI computation requires corpus data (-f)")?;
        let mut out = stdout.lock();
        writeln!(out, "Pattern1\tPattern2\tNPMI")?;
        let decoder = load_decoder(cli)?;
        for (a, b, value) in model.compute_npmi(corpus, threshold)? {
            writeln!(
                out,
                "{}\t{}\t{}",
                a.to_text(&decoder)?,
                b.to_text(&decoder)?,
                value
            )?;
        }
    }
    if cli.dump_reverse_index {
        let corpus = corpus
            .ok_or(Error::NotLoaded)
            .context("the reverse index dump requires corpus data (-f)")?;
        let decoder = load_decoder(cli)?;
        let mut out = stdout.lock();
        model.print_reverse_index(corpus, &mut out, &decoder)?;
    }

    run_views(cli, model, corpus)?;

    // relations for queried patterns
    if cli.relations && !cli.query_patterns.is_empty() {
        let corpus = corpus
            .ok_or(Error::NotLoaded)
            .context("relations require corpus data (-f)")?;
        let mut encoder = load_encoder(cli)?;
        let decoder = load_decoder(cli)?;
        let mut out = stdout.lock();
        for query in &cli.query_patterns {
            let pattern = encoder.build_pattern(query, UnknownPolicy::Unknown)?;
            if model.contains(&pattern) {
                model.output_relations(corpus, &pattern, &decoder, &mut out, None)?;
            }
        }
    }
    Ok(())
}

fn load_decoder(cli: &Cli) -> Result<ClassDecoder> {
    let path = cli
        .class_file
        .as_ref()
        .ok_or(Error::NotLoaded)
        .context("a class file (-c) is required to decode patterns")?;
    Ok(ClassDecoder::load(path)?)
}

fn load_encoder(cli: &Cli) -> Result<ClassEncoder> {
    let path = cli
        .class_file
        .as_ref()
        .ok_or(Error::NotLoaded)
        .context("a class file (-c) is required to encode queries")?;
    Ok(ClassEncoder::load(path)?)
}

/// The value-type-independent views.
fn run_views<V: PatternValue>(
    cli: &Cli,
    model: &mut PatternModel<V>,
    _corpus: Option<&IndexedCorpus>,
) -> Result<()> {
    let stdout = std::io::stdout();
    if cli.print {
        let decoder = load_decoder(cli)?;
        let mut out = stdout.lock();
        model.print(&mut out, &decoder)?;
    }
    if cli.report {
        let mut out = stdout.lock();
        model.report(&mut out, false)?;
    }
    if cli.histogram {
        let mut out = stdout.lock();
        model.histogram(&mut out, 0, None)?;
    }
    if cli.info {
        let mut out = stdout.lock();
        print_info(model, &mut out)?;
    }
    if !cli.query_patterns.is_empty() {
        let mut encoder = load_encoder(cli)?;
        let decoder = load_decoder(cli)?;
        let mut out = stdout.lock();
        for query in &cli.query_patterns {
            let pattern = encoder.build_pattern(query, UnknownPolicy::Unknown)?;
            query_pattern(model, &pattern, &decoder, &mut out)?;
        }
    }
    if cli.interactive {
        let mut encoder = load_encoder(cli)?;
        let decoder = load_decoder(cli)?;
        interactive_query(model, &mut encoder, &decoder)?;
    }
    Ok(())
}

fn query_pattern<V: PatternValue>(
    model: &mut PatternModel<V>,
    pattern: &Pattern,
    decoder: &ClassDecoder,
    out: &mut impl Write,
) -> Result<()> {
    if model.contains(pattern) {
        model.print_pattern(out, decoder, pattern)?;
    } else {
        writeln!(
            out,
            "PATTERN \"{}\" NOT FOUND IN MODEL",
            pattern.to_text(decoder)?
        )?;
    }
    Ok(())
}

fn interactive_query<V: PatternValue>(
    model: &mut PatternModel<V>,
    encoder: &mut ClassEncoder,
    decoder: &ClassDecoder,
) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    log::info!("Reading patterns from standard input (one per line)");
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pattern = encoder.build_pattern(line, UnknownPolicy::Unknown)?;
        let mut out = stdout.lock();
        query_pattern(model, &pattern, decoder, &mut out)?;
    }
    Ok(())
}

fn print_info<V: PatternValue>(
    model: &mut PatternModel<V>,
    out: &mut impl Write,
) -> Result<()> {
    let mut key_bytes = 0u64;
    let mut value_bytes = 0u64;
    let mut index_lengths = 0u64;
    for (pattern, value) in model.iter() {
        key_bytes += pattern.as_bytes().len() as u64;
        value_bytes += match value.refs() {
            Some(refs) => 4 + refs.len() as u64 * 6,
            None => 4,
        };
        index_lengths += value.count() as u64;
    }
    let patterns = model.len().max(1) as u64;
    writeln!(out, "Type: {:?}, version {}", model.model_type(), crate::model::MODEL_VERSION)?;
    writeln!(out, "Patterns: {}", model.len())?;
    writeln!(out, "Total tokens: {}", model.total_tokens())?;
    writeln!(out, "Total types: {}", model.total_types())?;
    writeln!(
        out,
        "Total key bytesize: {} bytes ({} MiB)",
        key_bytes,
        key_bytes / 1024 / 1024
    )?;
    writeln!(
        out,
        "Total value bytesize: {} bytes ({} MiB)",
        value_bytes,
        value_bytes / 1024 / 1024
    )?;
    writeln!(out, "Mean key bytesize: {:.2}", key_bytes as f64 / patterns as f64)?;
    writeln!(
        out,
        "Mean value bytesize: {:.2}",
        value_bytes as f64 / patterns as f64
    )?;
    writeln!(
        out,
        "Mean occurrence count: {:.2}",
        index_lengths as f64 / patterns as f64
    )?;
    Ok(())
}
