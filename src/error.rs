//src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the prediction engine can report.
///
/// `Config`, `Parse` and `Defaults` are fatal and surface before any pair is
/// processed. The remaining variants are tied to a single miRNA/transcript pair
/// and never abort the batch.
#[derive(Debug, Error)]
pub enum MirmapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error in {path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid sequence {id}: {reason}")]
    InvalidSequence { id: String, reason: String },

    #[error("seed search failed: {0}")]
    SeedSearch(String),

    #[error("folding engine error: {0}")]
    Folding(String),

    #[error("conservation error: {0}")]
    Conservation(String),

    #[error("feature `{0}` has not been evaluated")]
    NotEvaluated(&'static str),

    #[error("worker panicked on mirna:{mirna_id} transcript:{transcript_id}: {message}")]
    WorkerPanic {
        mirna_id: String,
        transcript_id: String,
        message: String,
    },

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("prediction defaults error: {0}")]
    Defaults(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MirmapError>;
