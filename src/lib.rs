// src/lib.rs
pub mod batch;
pub mod config;
pub mod error;
pub mod fasta;
pub mod features;
pub mod markov;
pub mod output;
pub mod pipeline;
pub mod prob_binomial;
pub mod seed;
pub mod seq_utils;
pub mod tabseq;
pub mod types;

use crate::batch::{BatchPredictor, PairOutcome};
use crate::config::{FeatureReducers, OutputOptions, PredictionConfig};
use crate::error::{MirmapError, Result};
use crate::output::write_predictions;
use crate::pipeline::PredictionContext;
use crate::types::{PairPrediction, SequenceSet};

/// Outcomes of a whole batch, in enumeration order.
/// Text is generated on demand.
#[derive(Debug)]
pub struct PredictionResults {
    pub outcomes: Vec<PairOutcome>,
    /// Reducers used for combined rows
    pub reducers: FeatureReducers,
}

impl PredictionResults {
    /// Tab-separated rows, without header.
    pub fn to_tsv(&self, options: &OutputOptions) -> Result<String> {
        let mut buf = Vec::new();
        write_predictions(&mut buf, &self.outcomes, options, &self.reducers)?;
        String::from_utf8(buf).map_err(|e| MirmapError::Config(format!("non UTF-8 output: {}", e)))
    }

    /// Pairs with at least one site.
    pub fn predictions(&self) -> impl Iterator<Item = &PairPrediction> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().and_then(|p| p.as_ref()))
    }

    /// Pairs that failed, with their error.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str, &MirmapError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Err(e) => Some((o.mirna_id.as_str(), o.transcript_id.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// Predicts every miRNA against every transcript with the built-in collaborators.
pub fn predict_targets(
    mirnas: &SequenceSet,
    transcripts: &SequenceSet,
    config: PredictionConfig,
) -> Result<PredictionResults> {
    config.params.validate()?;
    if mirnas.is_empty() {
        return Err(MirmapError::Config("no miRNA sequence given".into()));
    }
    if transcripts.is_empty() {
        return Err(MirmapError::Config("no transcript sequence given".into()));
    }

    log::info!(
        "Starting predictions with {} miRNA(s) and {} transcript(s)",
        mirnas.len(),
        transcripts.len()
    );
    let reducers = config.params.reducers;
    let predictor = BatchPredictor::new(PredictionContext::new(config));
    let outcomes: Vec<PairOutcome> = predictor.run(mirnas, transcripts)?.collect();

    if mirnas.len() == 1 {
        log::info!("Predictions ready for miRNA {}", mirnas.as_slice()[0].id);
    } else {
        log::info!("Predictions ready");
    }
    Ok(PredictionResults { outcomes, reducers })
}
