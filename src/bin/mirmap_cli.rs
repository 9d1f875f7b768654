use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use mirmap_rs::batch::BatchPredictor;
use mirmap_rs::config::{
    ExecutionMode, OutputOptions, PredictionConfig, PredictionParams, DEFAULTS_FILE_NAME, DEFAULT_CHUNK_SIZE,
};
use mirmap_rs::error::{MirmapError, Result};
use mirmap_rs::fasta::load_fasta;
use mirmap_rs::output::write_predictions;
use mirmap_rs::pipeline::PredictionContext;
use mirmap_rs::tabseq::load_tab;
use mirmap_rs::types::SequenceSet;

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Parser, Debug)]
#[command(name = "mirmap-rs")]
#[command(about = "Predict miRNA target sites and their features")]
#[command(version)]
#[command(group(ArgGroup::new("mirna_source").required(true).args(["mirna", "mirna_fasta", "mirna_tab"])))]
#[command(group(ArgGroup::new("transcript_source").required(true).args(["transcript", "transcript_fasta", "transcript_tab"])))]
struct Cli {
    /// miRNA sequence (repeatable)
    #[arg(short = 'm', long = "mirna")]
    mirna: Vec<String>,

    /// miRNA FASTA file (optionally gzipped)
    #[arg(short = 'a', long = "mirna-fasta")]
    mirna_fasta: Option<PathBuf>,

    /// miRNA tab-separated file: id<TAB>sequence
    #[arg(short = 'b', long = "mirna-tab")]
    mirna_tab: Option<PathBuf>,

    /// miRNA identifiers (name inline sequences or filter files)
    #[arg(short = 'n', long = "mirna-id")]
    mirna_id: Vec<String>,

    /// Transcript sequence (repeatable)
    #[arg(short = 't', long = "transcript")]
    transcript: Vec<String>,

    /// Transcript FASTA file (optionally gzipped)
    #[arg(short = 'f', long = "transcript-fasta")]
    transcript_fasta: Option<PathBuf>,

    /// Transcript tab-separated file: id<TAB>sequence
    #[arg(short = 'u', long = "transcript-tab")]
    transcript_tab: Option<PathBuf>,

    /// Transcript identifiers (name inline sequences or filter files)
    #[arg(short = 'i', long = "transcript-id")]
    transcript_id: Vec<String>,

    /// Prefix per-site rows with the site ordinal
    #[arg(short = 'z', long = "site-id")]
    site_id: bool,

    /// One row per miRNA/transcript pair
    #[arg(short = 'c', long = "combine")]
    combine: bool,

    /// Directory of the ViennaRNA executables. Without it the built-in duplex
    /// model is used: dg_open is 0 and the binding energies equal the duplex
    /// energies
    #[arg(short = 'e', long = "exe")]
    exe: Option<PathBuf>,

    /// Directory of per-transcript alignments (<id>.fa)
    #[arg(short = 's', long = "aln")]
    aln: Option<PathBuf>,

    /// Directory of per-transcript phylogenetic models (<id>.mod)
    #[arg(short = 'd', long = "mod")]
    model: Option<PathBuf>,

    /// Reference species tree used without model files
    #[arg(long = "species-tree", default_value = "species.tree")]
    species_tree: PathBuf,

    /// Prediction defaults (JSON)
    #[arg(long = "defaults")]
    defaults: Option<PathBuf>,

    /// Output file, '-' for standard output
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,

    /// Number of worker threads
    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    workers: usize,

    /// Pairs per worker task
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Logging level
    #[arg(
        short = 'g',
        long = "logging-level",
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    logging_level: String,
}

fn spinner(color: &str, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(SPINNER_TICKS)
        .template(&format!("{{spinner:.{}}} {{msg}}", color))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.set_message(message);
    bar
}

fn load_sequences(
    what: &str,
    inline: &[String],
    fasta: Option<&Path>,
    tab: Option<&Path>,
    ids: &[String],
) -> Result<SequenceSet> {
    let mut set = if let Some(path) = fasta {
        load_fasta(path, true)?
    } else if let Some(path) = tab {
        load_tab(path)?
    } else {
        let ids = if ids.is_empty() { None } else { Some(ids) };
        return SequenceSet::from_inline(inline, ids);
    };
    if !ids.is_empty() {
        set.retain_ids(ids);
    }
    if set.is_empty() {
        return Err(MirmapError::Config(format!("no {} sequence to process", what)));
    }
    Ok(set)
}

fn load_params(defaults: Option<&Path>) -> Result<PredictionParams> {
    let local = Path::new(DEFAULTS_FILE_NAME);
    let path = match defaults {
        Some(path) => path,
        None if local.exists() => local,
        None => {
            log::debug!("Prediction defaults kept");
            return Ok(PredictionParams::default());
        }
    };
    let params = PredictionParams::from_json_file(path)?;
    log::debug!("Prediction defaults changed from {}", path.display());
    Ok(params)
}

/// A transcript's Markov model is reused only when more than one miRNA is
/// scanned against it.
fn caches_transitions(mirna_count: usize) -> bool {
    mirna_count > 1
}

fn run(cli: Cli) -> Result<()> {
    let mirnas = load_sequences(
        "miRNA",
        &cli.mirna,
        cli.mirna_fasta.as_deref(),
        cli.mirna_tab.as_deref(),
        &cli.mirna_id,
    )?;
    let transcripts = load_sequences(
        "transcript",
        &cli.transcript,
        cli.transcript_fasta.as_deref(),
        cli.transcript_tab.as_deref(),
        &cli.transcript_id,
    )?;

    let config = PredictionConfig {
        params: load_params(cli.defaults.as_deref())?,
        exe_path: cli.exe,
        aln_dir: cli.aln,
        mod_dir: cli.model,
        species_tree: cli.species_tree,
        mode: ExecutionMode::from_workers(cli.workers, cli.chunk_size),
        cache_transitions: caches_transitions(mirnas.len()),
    };
    config.params.validate()?;
    let reducers = config.params.reducers;
    let options = OutputOptions {
        combine: cli.combine,
        site_id: cli.site_id,
    };

    let sink: Box<dyn Write> = if cli.output == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(&cli.output)?)
    };
    let mut writer = BufWriter::new(sink);

    log::info!(
        "Starting predictions with {} miRNA(s) and {} transcript(s)",
        mirnas.len(),
        transcripts.len()
    );
    let progress = spinner("green", "Predicting targets...");
    let predictor = BatchPredictor::new(PredictionContext::new(config)).with_progress(progress.clone());
    let outcomes = predictor.run(&mirnas, &transcripts)?;
    let summary = write_predictions(&mut writer, outcomes, &options, &reducers)?;
    writer.flush()?;
    progress.finish_with_message(format!(
        "{} row(s) for {} pair(s) with sites, {} failed",
        summary.rows, summary.pairs_with_sites, summary.failed
    ));

    if mirnas.len() == 1 {
        log::info!("Predictions ready for miRNA {}", mirnas.as_slice()[0].id);
    } else {
        log::info!("Predictions ready");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = log::LevelFilter::from_str(&cli.logging_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sources_are_exclusive_and_required() {
        assert!(Cli::try_parse_from(["mirmap-rs", "-m", "UGAGGUAG", "-t", "CUACCUCA"]).is_ok());
        assert!(Cli::try_parse_from(["mirmap-rs", "-t", "CUACCUCA"]).is_err());
        assert!(Cli::try_parse_from([
            "mirmap-rs", "-m", "UGAGGUAG", "-a", "mirs.fa", "-t", "CUACCUCA"
        ])
        .is_err());
        let cli = Cli::try_parse_from([
            "mirmap-rs", "-m", "UGAG", "-m", "UAGC", "-n", "a", "-n", "b", "-f", "tx.fa", "-w", "4", "-c",
        ])
        .unwrap();
        assert_eq!(cli.mirna.len(), 2);
        assert_eq!(cli.workers, 4);
        assert!(cli.combine);
        assert_eq!(cli.output, "-");
    }

    #[test]
    fn test_inline_sequences_get_ids() {
        let set = load_sequences("miRNA", &["UGAG".into(), "UAGC".into()], None, None, &[]).unwrap();
        assert_eq!(set.get("1"), Some("UGAG"));
        assert_eq!(set.get("2"), Some("UAGC"));
        assert!(load_sequences("miRNA", &["UGAG".into()], None, None, &["a".into(), "b".into()]).is_err());
    }

    #[test]
    fn test_transition_cache_needs_several_mirnas() {
        assert!(!caches_transitions(1));
        assert!(caches_transitions(2));
        let cli = Cli::try_parse_from(["mirmap-rs", "-m", "UGAG", "-t", "CUACCUCA", "-w", "8"]).unwrap();
        assert!(!caches_transitions(cli.mirna.len()));
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("dg_open is 0"));
    }
}
