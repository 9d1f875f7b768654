//src/features/conservation.rs

use ahash::{AHashMap, AHashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PredictionConfig;
use crate::error::{MirmapError, Result};
use crate::fasta::load_fasta;
use crate::prob_binomial::{binomial_at_least, motif_placements};
use crate::seq_utils::normalize_rna;

pub const DEFAULT_CONS_BLS: f64 = 0.0;
pub const DEFAULT_SELEC_PHYLOP: f64 = 1.0;

const TREE_MARKER: &str = "TREE: ";
const BACKGROUND_MARKER: &str = "BACKGROUND:";

/// Where the phylogeny of a conservation evaluation comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeSource {
    /// Newick tree pinned by a model file.
    Fixed(String),
    /// Reference species tree whose branches are fitted to the alignment.
    Fitted(PathBuf),
}

/// Conservation capability. Both methods return one value per motif.
pub trait ConservationEstimator: Send + Sync {
    fn branch_length_scores(
        &self,
        alignment: &Path,
        tree: &TreeSource,
        motifs: &[Vec<u8>],
    ) -> Result<Vec<f64>>;

    fn selection_pvalues(
        &self,
        alignment: &Path,
        tree: &TreeSource,
        model: Option<&Path>,
        motifs: &[Vec<u8>],
    ) -> Result<Vec<f64>>;
}

/// Newick tree of a phylogenetic model file: from `TREE: ` to the first `;`.
pub fn extract_model_tree(model_text: &str) -> Option<String> {
    let start = model_text.find(TREE_MARKER)? + TREE_MARKER.len();
    let end = model_text[start..].find(';')? + start + 1;
    Some(model_text[start..end].to_string())
}

/// Equilibrium frequencies of a model file, in `A C G U` order.
pub fn parse_background(model_text: &str) -> Option<[f64; 4]> {
    let line = model_text
        .lines()
        .find(|l| l.trim_start().starts_with(BACKGROUND_MARKER))?;
    let values: Vec<f64> = line.trim_start()[BACKGROUND_MARKER.len()..]
        .split_whitespace()
        .filter_map(|v| v.parse().ok())
        .collect();
    match values.as_slice() {
        [a, c, g, u] => Some([*a, *c, *g, *u]),
        _ => None,
    }
}

/// Leaf names of a Newick tree with their branch lengths (1.0 when absent).
pub fn newick_leaves(tree: &str) -> Vec<(String, f64)> {
    let mut leaves = Vec::new();
    let chars: Vec<char> = tree.chars().collect();
    let mut i = 0;
    let mut expect_label = true;
    while i < chars.len() {
        match chars[i] {
            '(' | ',' => {
                expect_label = true;
                i += 1;
            }
            ')' => {
                // Internal node label and length are skipped
                expect_label = false;
                i += 1;
            }
            ';' => break,
            c if c.is_whitespace() => i += 1,
            ':' => {
                i += 1;
                while i < chars.len() && !matches!(chars[i], ',' | ')' | ';') {
                    i += 1;
                }
            }
            _ => {
                let start = i;
                while i < chars.len() && !matches!(chars[i], ':' | ',' | ')' | '(' | ';') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect::<String>().trim().to_string();
                let mut length = 1.0;
                if i < chars.len() && chars[i] == ':' {
                    let num_start = i + 1;
                    i += 1;
                    while i < chars.len() && !matches!(chars[i], ',' | ')' | ';') {
                        i += 1;
                    }
                    let text: String = chars[num_start..i].iter().collect();
                    length = text.trim().parse().unwrap_or(1.0);
                }
                if expect_label && !name.is_empty() {
                    leaves.push((name, length));
                }
                expect_label = false;
            }
        }
    }
    leaves
}

/// Species name of an alignment row header such as `hg19.chr1` or `mm10 ...`.
fn species_of(header: &str) -> &str {
    let token = header.split_whitespace().next().unwrap_or("");
    token.split('.').next().unwrap_or(token)
}

struct AlignedSpecies {
    name: String,
    seq: Vec<u8>,
}

/// Presence-based conservation: species are weighted by their tree branch
/// length and scored on whether their ungapped sequence contains the motif.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotifPresenceConservation;

impl MotifPresenceConservation {
    /// Reference row first, then the other species, all ungapped.
    fn read_alignment(path: &Path) -> Result<Vec<AlignedSpecies>> {
        let rows = load_fasta(path, true)?;
        if rows.is_empty() {
            return Err(MirmapError::Conservation(format!(
                "empty alignment {}",
                path.display()
            )));
        }
        Ok(rows
            .iter()
            .map(|r| {
                let ungapped: String = r.seq.chars().filter(|&c| c != '-' && c != '.').collect();
                AlignedSpecies {
                    name: species_of(&r.id).to_string(),
                    seq: normalize_rna(&ungapped),
                }
            })
            .collect())
    }

    fn tree_leaves(tree: &TreeSource) -> Vec<(String, f64)> {
        match tree {
            TreeSource::Fixed(newick) => newick_leaves(newick),
            TreeSource::Fitted(path) => match fs::read_to_string(path) {
                Ok(text) => newick_leaves(&text),
                Err(e) => {
                    log::debug!(
                        "Species tree {} unavailable ({}), weighting species equally",
                        path.display(),
                        e
                    );
                    Vec::new()
                }
            },
        }
    }

    /// Non-reference species with their weight.
    fn weighted_species<'a>(
        rows: &'a [AlignedSpecies],
        tree: &TreeSource,
    ) -> Vec<(&'a AlignedSpecies, f64)> {
        let lengths: AHashMap<String, f64> = Self::tree_leaves(tree).into_iter().collect();
        let others = &rows[1..];
        let in_tree = others.iter().any(|s| lengths.contains_key(&s.name));

        let mut seen = AHashSet::new();
        others
            .iter()
            .filter(|s| seen.insert(s.name.as_str()))
            .filter_map(|s| match lengths.get(&s.name) {
                Some(&len) => Some((s, len.max(0.0))),
                None if !in_tree => Some((s, 1.0)),
                None => None,
            })
            .collect()
    }

    fn contains(seq: &[u8], motif: &[u8]) -> bool {
        !motif.is_empty() && seq.windows(motif.len()).any(|w| w == motif)
    }
}

impl ConservationEstimator for MotifPresenceConservation {
    fn branch_length_scores(
        &self,
        alignment: &Path,
        tree: &TreeSource,
        motifs: &[Vec<u8>],
    ) -> Result<Vec<f64>> {
        let rows = Self::read_alignment(alignment)?;
        let species = Self::weighted_species(&rows, tree);
        let total: f64 = species.iter().map(|(_, w)| w).sum();

        Ok(motifs
            .iter()
            .map(|motif| {
                if total <= 0.0 {
                    return DEFAULT_CONS_BLS;
                }
                let present: f64 = species
                    .iter()
                    .filter(|(s, _)| Self::contains(&s.seq, motif))
                    .map(|(_, w)| w)
                    .sum();
                present / total
            })
            .collect())
    }

    fn selection_pvalues(
        &self,
        alignment: &Path,
        tree: &TreeSource,
        model: Option<&Path>,
        motifs: &[Vec<u8>],
    ) -> Result<Vec<f64>> {
        let rows = Self::read_alignment(alignment)?;
        let species = Self::weighted_species(&rows, tree);
        let background = match model {
            Some(path) => parse_background(&fs::read_to_string(path)?).unwrap_or([0.25; 4]),
            None => [0.25; 4],
        };
        let freq = |b: u8| match b {
            b'A' => background[0],
            b'C' => background[1],
            b'G' => background[2],
            b'U' => background[3],
            _ => 0.0,
        };

        Ok(motifs
            .iter()
            .map(|motif| {
                if species.is_empty() {
                    return DEFAULT_SELEC_PHYLOP;
                }
                let p_word: f64 = motif.iter().map(|&b| freq(b)).product();
                let chance: f64 = species
                    .iter()
                    .map(|(s, _)| {
                        let placements = motif_placements(s.seq.len(), motif.len()) as i32;
                        1.0 - (1.0 - p_word).powi(placements)
                    })
                    .sum::<f64>()
                    / species.len() as f64;
                let hits = species
                    .iter()
                    .filter(|(s, _)| Self::contains(&s.seq, motif))
                    .count() as u64;
                binomial_at_least(hits, species.len() as u64, chance)
            })
            .collect())
    }
}

/// Conservation resources available for one transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum ConservationPlan {
    Defaults,
    Evaluate {
        alignment: PathBuf,
        tree: TreeSource,
        model: Option<PathBuf>,
    },
}

/// Decides which conservation resources apply to `transcript_id`.
pub fn conservation_plan(config: &PredictionConfig, transcript_id: &str) -> ConservationPlan {
    let alignment = match &config.aln_dir {
        Some(dir) => dir.join(format!("{}.fa", transcript_id)),
        None => return ConservationPlan::Defaults,
    };
    if !alignment.exists() {
        return ConservationPlan::Defaults;
    }

    match &config.mod_dir {
        Some(dir) => {
            let model = dir.join(format!("{}.mod", transcript_id));
            if !model.exists() {
                log::debug!("No model {} for transcript {}", model.display(), transcript_id);
                return ConservationPlan::Defaults;
            }
            let tree = match fs::read_to_string(&model) {
                Ok(text) => extract_model_tree(&text),
                Err(e) => {
                    log::warn!("Cannot read model {}: {}", model.display(), e);
                    return ConservationPlan::Defaults;
                }
            };
            match tree {
                Some(tree) => ConservationPlan::Evaluate {
                    alignment,
                    tree: TreeSource::Fixed(tree),
                    model: Some(model),
                },
                None => {
                    log::warn!("No tree in model {}", model.display());
                    ConservationPlan::Defaults
                }
            }
        }
        None => ConservationPlan::Evaluate {
            alignment,
            tree: TreeSource::Fitted(config.species_tree.clone()),
            model: None,
        },
    }
}

/// `(cons_bls, selec_phylop)` per motif; defaults when resources are missing
/// or the estimator fails.
pub fn conservation_features(
    config: &PredictionConfig,
    estimator: &dyn ConservationEstimator,
    transcript_id: &str,
    motifs: &[Vec<u8>],
) -> Vec<(f64, f64)> {
    let defaults = vec![(DEFAULT_CONS_BLS, DEFAULT_SELEC_PHYLOP); motifs.len()];
    let (alignment, tree, model) = match conservation_plan(config, transcript_id) {
        ConservationPlan::Defaults => return defaults,
        ConservationPlan::Evaluate {
            alignment,
            tree,
            model,
        } => (alignment, tree, model),
    };
    log::debug!(
        "Conservation of transcript {} from {}",
        transcript_id,
        alignment.display()
    );

    let evaluated = estimator
        .branch_length_scores(&alignment, &tree, motifs)
        .and_then(|bls| {
            let pvalues =
                estimator.selection_pvalues(&alignment, &tree, model.as_deref(), motifs)?;
            Ok((bls, pvalues))
        });
    match evaluated {
        Ok((bls, pvalues)) if bls.len() == motifs.len() && pvalues.len() == motifs.len() => {
            bls.into_iter().zip(pvalues).collect()
        }
        Ok(_) => {
            log::warn!(
                "Conservation estimator returned the wrong number of values for transcript {}",
                transcript_id
            );
            defaults
        }
        Err(e) => {
            log::warn!("Conservation failed for transcript {}: {}", transcript_id, e);
            defaults
        }
    }
}
