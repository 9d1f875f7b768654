//src/config.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MirmapError, Result};
use crate::types::{Feature, Reducer};

/// Name of the prediction defaults file picked up from the working directory.
pub const DEFAULTS_FILE_NAME: &str = "mirmap_defaults.json";

/// Pairs handed to a worker per dispatch.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// One accepted seed configuration: length and tolerated imperfections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedKind {
    pub length: usize,
    #[serde(default)]
    pub max_mismatches: usize,
    #[serde(default)]
    pub max_gu_wobbles: usize,
}

impl SeedKind {
    pub const fn new(length: usize, max_mismatches: usize, max_gu_wobbles: usize) -> Self {
        Self {
            length,
            max_mismatches,
            max_gu_wobbles,
        }
    }
}

/// Which transcript stretch a site's motif covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotifDef {
    Seed,
    SeedExtended,
    Site,
}

/// Reducers for the aggregate-configurable features. All other features use
/// [`Feature::default_reducer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReducers {
    #[serde(default = "default_probability_reducer")]
    pub prob_exact: Reducer,
    #[serde(default = "default_probability_reducer")]
    pub prob_binomial: Reducer,
}

fn default_probability_reducer() -> Reducer {
    Reducer::Min
}

impl Default for FeatureReducers {
    fn default() -> Self {
        Self {
            prob_exact: Reducer::Min,
            prob_binomial: Reducer::Min,
        }
    }
}

impl FeatureReducers {
    pub fn for_feature(&self, feature: Feature) -> Reducer {
        match feature {
            Feature::ProbExact => self.prob_exact,
            Feature::ProbBinomial => self.prob_binomial,
            other => other.default_reducer(),
        }
    }
}

/// Linear model folding the site features into the final score.
/// Lower scores mean stronger predicted repression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreModel {
    pub intercept: f64,
    pub tgs_score: f64,
    pub dg_total: f64,
    pub prob_exact: f64,
    pub prob_binomial: f64,
    pub cons_bls: f64,
    pub selec_phylop: f64,
}

impl Default for ScoreModel {
    fn default() -> Self {
        Self {
            intercept: 0.0,
            tgs_score: 1.0,
            dg_total: 0.02,
            prob_exact: 0.05,
            prob_binomial: 0.1,
            cons_bls: -0.05,
            selec_phylop: 0.02,
        }
    }
}

/// Tunable prediction parameters. Every field has a default so a defaults
/// file only needs to mention what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionParams {
    pub markov_order: usize,
    pub alphabet: String,
    pub motif_def: MotifDef,
    pub motif_upstream_extension: usize,
    pub motif_downstream_extension: usize,
    /// Tried in order; the first kind a position satisfies wins.
    pub seed_kinds: Vec<SeedKind>,
    pub min_target_length: usize,
    pub reducers: FeatureReducers,
    pub score_model: ScoreModel,
}

impl Default for PredictionParams {
    fn default() -> Self {
        Self {
            markov_order: 1,
            alphabet: "ACGU".to_string(),
            motif_def: MotifDef::Seed,
            motif_upstream_extension: 0,
            motif_downstream_extension: 0,
            seed_kinds: vec![
                SeedKind::new(7, 0, 0),
                SeedKind::new(6, 0, 0),
                SeedKind::new(7, 0, 1),
            ],
            min_target_length: 8,
            reducers: FeatureReducers::default(),
            score_model: ScoreModel::default(),
        }
    }
}

impl PredictionParams {
    /// Reads a JSON defaults file; absent keys keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let params: PredictionParams = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.alphabet.is_empty() {
            return Err(MirmapError::Config("alphabet must not be empty".into()));
        }
        if self.seed_kinds.is_empty() {
            return Err(MirmapError::Config("at least one seed kind is required".into()));
        }
        if let Some(kind) = self.seed_kinds.iter().find(|k| k.length < 2) {
            return Err(MirmapError::Config(format!(
                "seed length {} is too short",
                kind.length
            )));
        }
        Ok(())
    }

    pub fn alphabet_bytes(&self) -> Vec<u8> {
        self.alphabet.to_ascii_uppercase().into_bytes()
    }
}

/// How pairs are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { workers: usize, chunk_size: usize },
}

impl ExecutionMode {
    /// One worker means sequential execution.
    pub fn from_workers(workers: usize, chunk_size: usize) -> Self {
        if workers > 1 {
            ExecutionMode::Parallel {
                workers,
                chunk_size: chunk_size.max(1),
            }
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// Immutable configuration shared by every worker.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub params: PredictionParams,
    /// Directory holding the ViennaRNA executables. Built-in energies otherwise.
    pub exe_path: Option<PathBuf>,
    /// Directory of per-transcript alignments, `<id>.fa`.
    pub aln_dir: Option<PathBuf>,
    /// Directory of per-transcript models, `<id>.mod`.
    pub mod_dir: Option<PathBuf>,
    /// Species tree used when no model file pins the tree.
    pub species_tree: PathBuf,
    pub mode: ExecutionMode,
    /// Share one Markov model per transcript across pairs.
    pub cache_transitions: bool,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            params: PredictionParams::default(),
            exe_path: None,
            aln_dir: None,
            mod_dir: None,
            species_tree: PathBuf::from("species.tree"),
            mode: ExecutionMode::Sequential,
            cache_transitions: false,
        }
    }
}

/// Row layout of the tab-separated output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// One row per pair instead of one row per site.
    pub combine: bool,
    /// Prefix per-site rows with the 1-based site ordinal.
    pub site_id: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_defaults_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULTS_FILE_NAME);
        fs::write(
            &path,
            r#"{"markov_order": 2, "motif_def": "site", "reducers": {"prob_binomial": "prod"}}"#,
        )
        .unwrap();

        let params = PredictionParams::from_json_file(&path).unwrap();
        assert_eq!(params.markov_order, 2);
        assert_eq!(params.motif_def, MotifDef::Site);
        assert_eq!(params.reducers.prob_binomial, Reducer::Prod);
        assert_eq!(params.reducers.prob_exact, Reducer::Min);
        assert_eq!(params.alphabet, "ACGU");
        assert_eq!(params.seed_kinds.len(), 3);
    }

    #[test]
    fn test_invalid_defaults_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"seed_kinds": []}"#).unwrap();
        assert!(matches!(
            PredictionParams::from_json_file(&path),
            Err(MirmapError::Config(_))
        ));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            PredictionParams::from_json_file(&path),
            Err(MirmapError::Defaults(_))
        ));
    }

    #[test]
    fn test_execution_mode_from_workers() {
        assert_eq!(ExecutionMode::from_workers(1, 5), ExecutionMode::Sequential);
        assert_eq!(
            ExecutionMode::from_workers(4, 0),
            ExecutionMode::Parallel {
                workers: 4,
                chunk_size: 1
            }
        );
    }
}
