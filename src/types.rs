//src/types.rs

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::config::FeatureReducers;
use crate::error::{MirmapError, Result};

/// An identifier paired with a nucleotide sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSequence {
    pub id: String,
    pub seq: String,
}

/// An insertion-ordered mapping from identifier to sequence.
///
/// Re-inserting an identifier replaces its sequence but keeps its original
/// position, so output ordering is decided by first appearance.
#[derive(Debug, Clone, Default)]
pub struct SequenceSet {
    records: Vec<NamedSequence>,
    index: AHashMap<String, usize>,
}

impl SequenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from inline sequences. Without `ids`, identifiers are the
    /// 1-based positions of the sequences.
    pub fn from_inline(seqs: &[String], ids: Option<&[String]>) -> Result<Self> {
        let mut set = Self::new();
        match ids {
            Some(ids) => {
                if ids.len() != seqs.len() {
                    return Err(MirmapError::Config(format!(
                        "{} identifier(s) given for {} sequence(s)",
                        ids.len(),
                        seqs.len()
                    )));
                }
                for (id, seq) in ids.iter().zip(seqs) {
                    set.insert(id.clone(), seq.clone());
                }
            }
            None => {
                for (i, seq) in seqs.iter().enumerate() {
                    set.insert((i + 1).to_string(), seq.clone());
                }
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, id: String, seq: String) {
        match self.index.get(&id) {
            Some(&i) => self.records[i].seq = seq,
            None => {
                self.index.insert(id.clone(), self.records.len());
                self.records.push(NamedSequence { id, seq });
            }
        }
    }

    /// Appends a chunk to an existing record's sequence. Returns `false` when
    /// the identifier is unknown.
    pub fn append(&mut self, id: &str, chunk: &str) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                self.records[i].seq.push_str(chunk);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(|&i| self.records[i].seq.as_str())
    }

    /// Keeps only the listed identifiers, in their current order.
    pub fn retain_ids(&mut self, ids: &[String]) {
        let records = std::mem::take(&mut self.records);
        self.index.clear();
        for record in records {
            if ids.iter().any(|id| *id == record.id) {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NamedSequence> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[NamedSequence] {
        &self.records
    }
}

impl PartialEq for SequenceSet {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl<'a> IntoIterator for &'a SequenceSet {
    type Item = &'a NamedSequence;
    type IntoIter = std::slice::Iter<'a, NamedSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// One paired position of a miRNA/transcript duplex, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasePair {
    pub target_pos: usize,
    pub mirna_pos: usize,
}

/// A candidate binding site found by a seed finder.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    /// 1-based transcript coordinate facing miRNA position 1.
    pub end_site: usize,
    pub seed_length: usize,
    pub nb_mismatches: usize,
    pub nb_gu_wobbles: usize,
    /// Paired positions ordered by miRNA position.
    pub pairing: Vec<BasePair>,
}

impl Site {
    /// Seed window on the transcript, 1-based and inclusive.
    pub fn seed_window(&self) -> (usize, usize) {
        (self.end_site - self.seed_length, self.end_site - 1)
    }

    /// Pairs whose miRNA position falls inside the seed.
    pub fn seed_pairs(&self) -> impl Iterator<Item = &BasePair> {
        let last = self.seed_length + 1;
        self.pairing
            .iter()
            .filter(move |bp| bp.mirna_pos >= 2 && bp.mirna_pos <= last)
    }

    /// No mismatch and no G-U wobble in the seed.
    pub fn is_perfect(&self) -> bool {
        self.nb_mismatches == 0 && self.nb_gu_wobbles == 0
    }
}

/// Per-site features, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    TgsAu,
    TgsPosition,
    TgsPairing3p,
    TgsScore,
    DgDuplex,
    DgBinding,
    DgDuplexSeed,
    DgBindingSeed,
    DgOpen,
    DgTotal,
    ProbExact,
    ProbBinomial,
    ConsBls,
    SelecPhylop,
    Score,
}

impl Feature {
    pub const ALL: [Feature; 15] = [
        Feature::TgsAu,
        Feature::TgsPosition,
        Feature::TgsPairing3p,
        Feature::TgsScore,
        Feature::DgDuplex,
        Feature::DgBinding,
        Feature::DgDuplexSeed,
        Feature::DgBindingSeed,
        Feature::DgOpen,
        Feature::DgTotal,
        Feature::ProbExact,
        Feature::ProbBinomial,
        Feature::ConsBls,
        Feature::SelecPhylop,
        Feature::Score,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::TgsAu => "tgs_au",
            Feature::TgsPosition => "tgs_position",
            Feature::TgsPairing3p => "tgs_pairing3p",
            Feature::TgsScore => "tgs_score",
            Feature::DgDuplex => "dg_duplex",
            Feature::DgBinding => "dg_binding",
            Feature::DgDuplexSeed => "dg_duplex_seed",
            Feature::DgBindingSeed => "dg_binding_seed",
            Feature::DgOpen => "dg_open",
            Feature::DgTotal => "dg_total",
            Feature::ProbExact => "prob_exact",
            Feature::ProbBinomial => "prob_binomial",
            Feature::ConsBls => "cons_bls",
            Feature::SelecPhylop => "selec_phylop",
            Feature::Score => "score",
        }
    }

    /// How a pair's sites are folded into one value when nothing else is configured.
    pub fn default_reducer(self) -> Reducer {
        match self {
            Feature::TgsAu | Feature::TgsPairing3p | Feature::ConsBls => Reducer::Max,
            Feature::TgsScore => Reducer::Sum,
            _ => Reducer::Min,
        }
    }
}

/// Folds a per-site column into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Min,
    Max,
    Prod,
    Sum,
}

impl Reducer {
    /// `None` for an empty column.
    pub fn reduce<I: IntoIterator<Item = f64>>(self, values: I) -> Option<f64> {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, v| match self {
            Reducer::Min => acc.min(v),
            Reducer::Max => acc.max(v),
            Reducer::Prod => acc * v,
            Reducer::Sum => acc + v,
        }))
    }
}

/// All feature values of one site.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SiteFeatures {
    pub tgs_au: f64,
    pub tgs_position: f64,
    pub tgs_pairing3p: f64,
    pub tgs_score: f64,
    pub dg_duplex: f64,
    pub dg_binding: f64,
    pub dg_duplex_seed: f64,
    pub dg_binding_seed: f64,
    pub dg_open: f64,
    pub dg_total: f64,
    pub prob_exact: f64,
    pub prob_binomial: f64,
    pub cons_bls: f64,
    pub selec_phylop: f64,
    pub score: f64,
}

impl SiteFeatures {
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::TgsAu => self.tgs_au,
            Feature::TgsPosition => self.tgs_position,
            Feature::TgsPairing3p => self.tgs_pairing3p,
            Feature::TgsScore => self.tgs_score,
            Feature::DgDuplex => self.dg_duplex,
            Feature::DgBinding => self.dg_binding,
            Feature::DgDuplexSeed => self.dg_duplex_seed,
            Feature::DgBindingSeed => self.dg_binding_seed,
            Feature::DgOpen => self.dg_open,
            Feature::DgTotal => self.dg_total,
            Feature::ProbExact => self.prob_exact,
            Feature::ProbBinomial => self.prob_binomial,
            Feature::ConsBls => self.cons_bls,
            Feature::SelecPhylop => self.selec_phylop,
            Feature::Score => self.score,
        }
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        let slot = match feature {
            Feature::TgsAu => &mut self.tgs_au,
            Feature::TgsPosition => &mut self.tgs_position,
            Feature::TgsPairing3p => &mut self.tgs_pairing3p,
            Feature::TgsScore => &mut self.tgs_score,
            Feature::DgDuplex => &mut self.dg_duplex,
            Feature::DgBinding => &mut self.dg_binding,
            Feature::DgDuplexSeed => &mut self.dg_duplex_seed,
            Feature::DgBindingSeed => &mut self.dg_binding_seed,
            Feature::DgOpen => &mut self.dg_open,
            Feature::DgTotal => &mut self.dg_total,
            Feature::ProbExact => &mut self.prob_exact,
            Feature::ProbBinomial => &mut self.prob_binomial,
            Feature::ConsBls => &mut self.cons_bls,
            Feature::SelecPhylop => &mut self.selec_phylop,
            Feature::Score => &mut self.score,
        };
        *slot = value;
    }
}

/// A site and every feature computed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub site: Site,
    pub features: SiteFeatures,
}

/// Prediction for one miRNA/transcript pair with at least one site.
#[derive(Debug, Clone, PartialEq)]
pub struct PairPrediction {
    pub mirna_id: String,
    pub transcript_id: String,
    pub sites: Vec<SiteRecord>,
}

impl PairPrediction {
    /// Per-site values of one feature, in site order.
    pub fn column(&self, feature: Feature) -> Vec<f64> {
        self.sites.iter().map(|r| r.features.get(feature)).collect()
    }

    /// One value per feature, each folded with its configured reducer.
    pub fn combined(&self, reducers: &FeatureReducers) -> Vec<f64> {
        Feature::ALL
            .iter()
            .map(|&f| {
                reducers
                    .for_feature(f)
                    .reduce(self.sites.iter().map(|r| r.features.get(f)))
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_set_keeps_first_position_on_overwrite() {
        let mut set = SequenceSet::new();
        set.insert("a".into(), "ACGU".into());
        set.insert("b".into(), "GGGG".into());
        set.insert("a".into(), "UUUU".into());

        let ids: Vec<&str> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(set.get("a"), Some("UUUU"));
    }

    #[test]
    fn test_from_inline_generates_ids() {
        let seqs = vec!["AAA".to_string(), "CCC".to_string()];
        let set = SequenceSet::from_inline(&seqs, None).unwrap();
        assert_eq!(set.get("1"), Some("AAA"));
        assert_eq!(set.get("2"), Some("CCC"));

        let ids = vec!["only-one".to_string()];
        assert!(SequenceSet::from_inline(&seqs, Some(&ids)).is_err());
    }

    #[test]
    fn test_retain_ids_preserves_order() {
        let mut set = SequenceSet::new();
        for id in ["x", "y", "z"] {
            set.insert(id.into(), "A".into());
        }
        set.retain_ids(&["z".to_string(), "x".to_string()]);
        let ids: Vec<&str> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);
        assert!(set.append("z", "C"));
        assert!(!set.append("y", "C"));
    }

    #[test]
    fn test_reducers() {
        let values = [0.5, 0.2, 0.4];
        assert_eq!(Reducer::Min.reduce(values), Some(0.2));
        assert_eq!(Reducer::Max.reduce(values), Some(0.5));
        assert!((Reducer::Prod.reduce(values).unwrap() - 0.04).abs() < 1e-12);
        assert!((Reducer::Sum.reduce(values).unwrap() - 1.1).abs() < 1e-12);
        assert_eq!(Reducer::Min.reduce(Vec::<f64>::new()), None);
    }

    #[test]
    fn test_site_features_get_set() {
        let mut features = SiteFeatures::default();
        for (i, &f) in Feature::ALL.iter().enumerate() {
            features.set(f, i as f64);
        }
        for (i, &f) in Feature::ALL.iter().enumerate() {
            assert_eq!(features.get(f), i as f64, "{}", f.name());
        }
    }
}
