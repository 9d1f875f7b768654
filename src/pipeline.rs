//src/pipeline.rs

use ahash::AHashSet;
use std::sync::Arc;

use crate::config::{MotifDef, PredictionConfig, PredictionParams, ScoreModel};
use crate::error::{MirmapError, Result};
use crate::features::conservation::{conservation_features, ConservationEstimator, MotifPresenceConservation};
use crate::features::probability::prob_exact;
use crate::features::score::combined_score;
use crate::features::targetscan::{tgs_au, tgs_pairing3p, tgs_position, tgs_score};
use crate::features::thermo::{duplex_energies, folding_engine, FoldingEngine};
use crate::markov::{get_transitions, MarkovModel, TransitionCache};
use crate::prob_binomial::motif_enrichment;
use crate::seed::{motif_coordinates, SeedFinder, SeedMatcher};
use crate::seq_utils::normalize_rna;
use crate::types::{Feature, NamedSequence, PairPrediction, Reducer, Site, SiteFeatures, SiteRecord};

/// Read-only state shared by every pair of a batch.
#[derive(Clone)]
pub struct PredictionContext {
    pub config: Arc<PredictionConfig>,
    pub seed_finder: Arc<dyn SeedFinder>,
    pub folding: Arc<dyn FoldingEngine>,
    pub conservation: Arc<dyn ConservationEstimator>,
    pub transitions: Option<Arc<TransitionCache>>,
}

impl PredictionContext {
    /// Built-in collaborators chosen from `config`.
    pub fn new(config: PredictionConfig) -> Self {
        let seed_finder = Arc::new(SeedMatcher::new(config.params.seed_kinds.clone()));
        let folding = folding_engine(config.exe_path.as_deref());
        let transitions = if config.cache_transitions {
            Some(Arc::new(TransitionCache::new()))
        } else {
            None
        };
        Self {
            config: Arc::new(config),
            seed_finder,
            folding,
            conservation: Arc::new(MotifPresenceConservation),
            transitions,
        }
    }

    pub fn with_seed_finder(mut self, seed_finder: Arc<dyn SeedFinder>) -> Self {
        self.seed_finder = seed_finder;
        self
    }

    pub fn with_folding(mut self, folding: Arc<dyn FoldingEngine>) -> Self {
        self.folding = folding;
        self
    }

    pub fn with_conservation(mut self, conservation: Arc<dyn ConservationEstimator>) -> Self {
        self.conservation = conservation;
        self
    }
}

/// Feature evaluation state of one miRNA/transcript pair.
///
/// Every `eval_*` call recomputes its feature for all current sites and may be
/// re-run; getters fail with [`MirmapError::NotEvaluated`] until the matching
/// evaluation has happened since the last seed search.
#[derive(Debug, Clone)]
pub struct TargetSearch {
    mirna_id: String,
    transcript_id: String,
    mirna: Vec<u8>,
    transcript: Vec<u8>,
    records: Vec<SiteRecord>,
    evaluated: AHashSet<Feature>,
}

impl TargetSearch {
    pub fn new(mirna: &NamedSequence, transcript: &NamedSequence) -> Result<Self> {
        Ok(Self {
            mirna: checked_sequence(mirna)?,
            transcript: checked_sequence(transcript)?,
            mirna_id: mirna.id.clone(),
            transcript_id: transcript.id.clone(),
            records: Vec::new(),
            evaluated: AHashSet::new(),
        })
    }

    pub fn mirna(&self) -> &[u8] {
        &self.mirna
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub fn records(&self) -> &[SiteRecord] {
        &self.records
    }

    pub fn is_evaluated(&self, feature: Feature) -> bool {
        self.evaluated.contains(&feature)
    }

    /// Replaces the sites and forgets every evaluated feature.
    pub fn find_potential_targets_with_seed(&mut self, finder: &dyn SeedFinder) -> Result<usize> {
        let sites = finder.find_sites(&self.mirna, &self.transcript)?;
        if let Some(bad) = sites
            .iter()
            .find(|s| s.end_site > self.transcript.len() || s.end_site <= s.seed_length)
        {
            return Err(MirmapError::SeedSearch(format!(
                "site ending at {} does not fit transcript {}",
                bad.end_site, self.transcript_id
            )));
        }
        self.records = sites
            .into_iter()
            .map(|site| SiteRecord {
                site,
                features: SiteFeatures::default(),
            })
            .collect();
        self.evaluated.clear();
        Ok(self.records.len())
    }

    fn store(&mut self, feature: Feature, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.records.len());
        for (record, value) in self.records.iter_mut().zip(values) {
            record.features.set(feature, value);
        }
        self.evaluated.insert(feature);
    }

    fn require(&self, features: &[Feature]) -> Result<()> {
        match features.iter().find(|f| !self.evaluated.contains(f)) {
            Some(f) => Err(MirmapError::NotEvaluated(f.name())),
            None => Ok(()),
        }
    }

    fn sites(&self) -> impl Iterator<Item = &Site> {
        self.records.iter().map(|r| &r.site)
    }

    fn motif(&self, site: &Site, params: &PredictionParams) -> &[u8] {
        let (start, end) = motif_coordinates(
            site,
            params.motif_def,
            params.motif_upstream_extension,
            params.motif_downstream_extension,
            params.min_target_length,
            self.transcript.len(),
        );
        &self.transcript[start - 1..end]
    }

    pub fn eval_tgs_au(&mut self) {
        let values = self.sites().map(|s| tgs_au(&self.transcript, s)).collect();
        self.store(Feature::TgsAu, values);
    }

    pub fn eval_tgs_position(&mut self) {
        let len = self.transcript.len();
        let values = self.sites().map(|s| tgs_position(len, s)).collect();
        self.store(Feature::TgsPosition, values);
    }

    pub fn eval_tgs_pairing3p(&mut self) {
        let values = self
            .sites()
            .map(|s| tgs_pairing3p(&self.mirna, &self.transcript, s))
            .collect();
        self.store(Feature::TgsPairing3p, values);
    }

    pub fn eval_tgs_score(&mut self) -> Result<()> {
        self.require(&[Feature::TgsAu, Feature::TgsPosition, Feature::TgsPairing3p])?;
        let values = self
            .records
            .iter()
            .map(|r| {
                let f = &r.features;
                tgs_score(&r.site, f.tgs_au, f.tgs_position, f.tgs_pairing3p)
            })
            .collect();
        self.store(Feature::TgsScore, values);
        Ok(())
    }

    /// Duplex and binding energies of the whole site and of its seed.
    pub fn eval_dg_duplex(&mut self, engine: &dyn FoldingEngine, params: &PredictionParams) -> Result<()> {
        let mirna_open = if self.records.is_empty() {
            0.0
        } else {
            engine.open_energy(&self.mirna, (1, self.mirna.len()))?
        };
        let mut energies = Vec::with_capacity(self.records.len());
        for site in self.sites() {
            let window = motif_coordinates(
                site,
                MotifDef::Site,
                0,
                0,
                params.min_target_length,
                self.transcript.len(),
            );
            energies.push(duplex_energies(
                engine,
                &self.mirna,
                &self.transcript,
                site,
                window,
                mirna_open,
            )?);
        }
        self.store(Feature::DgDuplex, energies.iter().map(|e| e.duplex).collect());
        self.store(Feature::DgBinding, energies.iter().map(|e| e.binding).collect());
        self.store(Feature::DgDuplexSeed, energies.iter().map(|e| e.duplex_seed).collect());
        self.store(Feature::DgBindingSeed, energies.iter().map(|e| e.binding_seed).collect());
        Ok(())
    }

    /// Cost of opening the transcript over each site's motif.
    pub fn eval_dg_open(&mut self, engine: &dyn FoldingEngine, params: &PredictionParams) -> Result<()> {
        let mut values = Vec::with_capacity(self.records.len());
        for site in self.sites() {
            let window = motif_coordinates(
                site,
                params.motif_def,
                params.motif_upstream_extension,
                params.motif_downstream_extension,
                params.min_target_length,
                self.transcript.len(),
            );
            values.push(engine.open_energy(&self.transcript, window)?);
        }
        self.store(Feature::DgOpen, values);
        Ok(())
    }

    pub fn eval_dg_total(&mut self) -> Result<()> {
        self.require(&[Feature::DgDuplex, Feature::DgOpen])?;
        let values = self
            .records
            .iter()
            .map(|r| r.features.dg_duplex + r.features.dg_open)
            .collect();
        self.store(Feature::DgTotal, values);
        Ok(())
    }

    pub fn eval_prob_exact(&mut self, params: &PredictionParams) {
        let alphabet = params.alphabet_bytes();
        let values = self
            .sites()
            .map(|s| prob_exact(&self.transcript, self.motif(s, params), &alphabet))
            .collect();
        self.store(Feature::ProbExact, values);
    }

    /// Enrichment of each site's motif under the transcript's Markov model.
    /// The model is estimated from the transcript when none is given.
    pub fn eval_prob_binomial(&mut self, params: &PredictionParams, model: Option<&MarkovModel>) {
        let local;
        let model = match model {
            Some(m) => m,
            None => {
                local = get_transitions(&self.transcript, &params.alphabet_bytes(), params.markov_order);
                &local
            }
        };
        let values = self
            .sites()
            .map(|s| motif_enrichment(&self.transcript, self.motif(s, params), model))
            .collect();
        self.store(Feature::ProbBinomial, values);
    }

    /// Branch-length score and selection p-value, or their neutral defaults.
    pub fn eval_conservation(&mut self, config: &PredictionConfig, estimator: &dyn ConservationEstimator) {
        let motifs: Vec<Vec<u8>> = self
            .sites()
            .map(|s| self.motif(s, &config.params).to_vec())
            .collect();
        let values = conservation_features(config, estimator, &self.transcript_id, &motifs);
        self.store(Feature::ConsBls, values.iter().map(|v| v.0).collect());
        self.store(Feature::SelecPhylop, values.iter().map(|v| v.1).collect());
    }

    pub fn eval_score(&mut self, model: &ScoreModel) -> Result<()> {
        self.require(&[
            Feature::TgsScore,
            Feature::DgTotal,
            Feature::ProbExact,
            Feature::ProbBinomial,
            Feature::ConsBls,
            Feature::SelecPhylop,
        ])?;
        let values = self
            .records
            .iter()
            .map(|r| combined_score(model, &r.features))
            .collect();
        self.store(Feature::Score, values);
        Ok(())
    }

    /// Per-site values of an evaluated feature folded with `reducer`.
    /// NaN when there are no sites.
    pub fn value(&self, feature: Feature, reducer: Reducer) -> Result<f64> {
        self.require(&[feature])?;
        Ok(reducer
            .reduce(self.records.iter().map(|r| r.features.get(feature)))
            .unwrap_or(f64::NAN))
    }

    pub fn prob_binomial(&self, reducer: Reducer) -> Result<f64> {
        self.value(Feature::ProbBinomial, reducer)
    }

    pub fn into_prediction(self) -> PairPrediction {
        PairPrediction {
            mirna_id: self.mirna_id,
            transcript_id: self.transcript_id,
            sites: self.records,
        }
    }
}

fn checked_sequence(seq: &NamedSequence) -> Result<Vec<u8>> {
    let normalized = normalize_rna(seq.seq.trim());
    if normalized.is_empty() {
        return Err(MirmapError::InvalidSequence {
            id: seq.id.clone(),
            reason: "empty sequence".into(),
        });
    }
    if normalized.iter().all(|&b| b == b'N') {
        return Err(MirmapError::InvalidSequence {
            id: seq.id.clone(),
            reason: "no nucleotide in sequence".into(),
        });
    }
    Ok(normalized)
}

/// Runs every stage on one pair. `None` when the seed search finds nothing.
pub fn predict_pair(
    mirna: &NamedSequence,
    transcript: &NamedSequence,
    ctx: &PredictionContext,
) -> Result<Option<PairPrediction>> {
    let mut search = TargetSearch::new(mirna, transcript)?;
    if search.find_potential_targets_with_seed(ctx.seed_finder.as_ref())? == 0 {
        return Ok(None);
    }
    log::debug!("Evaluating mirna:{} transcript:{}", mirna.id, transcript.id);

    let config = ctx.config.as_ref();
    let params = &config.params;
    search.eval_tgs_au();
    search.eval_tgs_position();
    search.eval_tgs_pairing3p();
    search.eval_tgs_score()?;
    search.eval_dg_duplex(ctx.folding.as_ref(), params)?;
    search.eval_dg_open(ctx.folding.as_ref(), params)?;
    search.eval_dg_total()?;
    search.eval_prob_exact(params);

    match &ctx.transitions {
        Some(cache) => {
            let model = cache.get_or_build(&transcript.id, || {
                get_transitions(search.transcript(), &params.alphabet_bytes(), params.markov_order)
            });
            search.eval_prob_binomial(params, Some(model.as_ref()));
        }
        None => search.eval_prob_binomial(params, None),
    }

    search.eval_conservation(config, ctx.conservation.as_ref());
    search.eval_score(&params.score_model)?;
    Ok(Some(search.into_prediction()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: &str, seq: &str) -> NamedSequence {
        NamedSequence {
            id: id.to_string(),
            seq: seq.to_string(),
        }
    }

    fn let7() -> NamedSequence {
        named("let-7a", "UGAGGUAGUAGGUUGUAUAGUU")
    }

    const TWO_SITES: &str = "GCAUGCAUGCAUCUACCUCAGCAUGCAUGCAUGCAUGCAUCUACCUCAGCAUGCAU";

    #[test]
    fn test_getter_requires_evaluation() {
        let mut search = TargetSearch::new(&let7(), &named("t1", TWO_SITES)).unwrap();
        let finder = SeedMatcher::new(PredictionParams::default().seed_kinds);
        assert_eq!(search.find_potential_targets_with_seed(&finder).unwrap(), 2);

        let params = PredictionParams::default();
        assert!(matches!(
            search.prob_binomial(Reducer::Min),
            Err(MirmapError::NotEvaluated("prob_binomial"))
        ));
        assert!(search.eval_tgs_score().is_err());

        search.eval_prob_binomial(&params, None);
        let min = search.prob_binomial(Reducer::Min).unwrap();
        let prod = search.prob_binomial(Reducer::Prod).unwrap();
        assert!(prod <= min + 1e-15);

        // a new seed search forgets previous evaluations
        search.find_potential_targets_with_seed(&finder).unwrap();
        assert!(!search.is_evaluated(Feature::ProbBinomial));
    }

    #[test]
    fn test_reevaluation_is_stable() {
        let params = PredictionParams::default();
        let finder = SeedMatcher::new(params.seed_kinds.clone());
        let mut search = TargetSearch::new(&let7(), &named("t1", TWO_SITES)).unwrap();
        search.find_potential_targets_with_seed(&finder).unwrap();
        search.eval_prob_exact(&params);
        let first = search.value(Feature::ProbExact, Reducer::Min).unwrap();
        search.eval_prob_exact(&params);
        assert_eq!(search.value(Feature::ProbExact, Reducer::Min).unwrap(), first);
        assert_eq!(search.records().len(), 2);
    }

    #[test]
    fn test_predict_pair_fills_every_feature() {
        let ctx = PredictionContext::new(PredictionConfig::default());
        let prediction = predict_pair(&let7(), &named("t1", TWO_SITES), &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(prediction.mirna_id, "let-7a");
        assert_eq!(prediction.sites.len(), 2);
        for record in &prediction.sites {
            let f = &record.features;
            assert!(f.tgs_au > 0.0 && f.tgs_au < 1.0);
            assert!(f.dg_duplex < 0.0);
            assert_eq!(f.dg_total, f.dg_duplex + f.dg_open);
            assert_eq!(f.cons_bls, 0.0);
            assert_eq!(f.selec_phylop, 1.0);
            assert!((0.0..=1.0).contains(&f.prob_exact));
            assert!((0.0..=1.0).contains(&f.prob_binomial));
            assert!(Feature::ALL.iter().all(|&feat| f.get(feat).is_finite()));
        }
    }

    #[test]
    fn test_zero_sites_and_invalid_input() {
        let ctx = PredictionContext::new(PredictionConfig::default());
        let none = predict_pair(&let7(), &named("t0", "AAAAAAAAAAAAAAAAAAAAAAAA"), &ctx).unwrap();
        assert!(none.is_none());

        assert!(matches!(
            predict_pair(&let7(), &named("empty", ""), &ctx),
            Err(MirmapError::InvalidSequence { .. })
        ));
        assert!(matches!(
            predict_pair(&named("m", "????"), &named("t1", TWO_SITES), &ctx),
            Err(MirmapError::InvalidSequence { .. })
        ));
    }

    #[test]
    fn test_shared_transition_cache() {
        let config = PredictionConfig {
            cache_transitions: true,
            ..PredictionConfig::default()
        };
        let ctx = PredictionContext::new(config);
        let uncached = PredictionContext::new(PredictionConfig::default());
        let transcript = named("t1", TWO_SITES);
        let a = predict_pair(&let7(), &transcript, &ctx).unwrap().unwrap();
        let b = predict_pair(&let7(), &transcript, &uncached).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.transitions.as_ref().map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_motif_with_unknown_base_has_no_evidence() {
        let mut config = PredictionConfig::default();
        config.params.motif_upstream_extension = 2;
        let ctx = PredictionContext::new(config);
        // the extended seed motif is NUCUACCUC
        let transcript = named("tn", "GCAUGCAUGCNUCUACCUCAGCAUGCAU");
        let prediction = predict_pair(&let7(), &transcript, &ctx).unwrap().unwrap();
        let record = prediction
            .sites
            .iter()
            .find(|r| r.site.end_site == 20)
            .unwrap();
        assert_eq!(record.features.prob_exact, 1.0);
        assert_eq!(record.features.prob_binomial, 1.0);
    }
}
