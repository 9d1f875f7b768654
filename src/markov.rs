//src/markov.rs

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Order-k Markov chain estimated from a reference sequence.
///
/// Transitions are keyed by the `k`-symbol context followed by the next
/// symbol. A context that was never observed falls back to the uniform
/// distribution over the alphabet; an observed context followed by an
/// unobserved symbol has probability zero. Symbols outside the alphabet
/// always have probability zero.
#[derive(Debug, Clone)]
pub struct MarkovModel {
    order: usize,
    alphabet: Vec<u8>,
    in_alphabet: [bool; 256],
    marginals: AHashMap<u8, f64>,
    transitions: AHashMap<Vec<u8>, f64>,
    context_totals: AHashMap<Vec<u8>, u64>,
}

impl MarkovModel {
    /// Counts every window of `order + 1` symbols lying fully inside the alphabet.
    pub fn from_sequence(reference: &[u8], alphabet: &[u8], order: usize) -> Self {
        let mut in_alphabet = [false; 256];
        let mut symbols: Vec<u8> = Vec::with_capacity(alphabet.len());
        for &b in alphabet {
            if !in_alphabet[b as usize] {
                in_alphabet[b as usize] = true;
                symbols.push(b);
            }
        }

        // Order-0 marginals
        let mut symbol_counts: AHashMap<u8, u64> = AHashMap::new();
        for &b in reference {
            if in_alphabet[b as usize] {
                *symbol_counts.entry(b).or_insert(0) += 1;
            }
        }
        let total: u64 = symbol_counts.values().sum();
        let uniform = if symbols.is_empty() { 0.0 } else { 1.0 / symbols.len() as f64 };
        let marginals = symbols
            .iter()
            .map(|&s| {
                let p = if total == 0 {
                    uniform
                } else {
                    symbol_counts.get(&s).copied().unwrap_or(0) as f64 / total as f64
                };
                (s, p)
            })
            .collect();

        // Context -> successor counts
        let mut window_counts: AHashMap<Vec<u8>, u64> = AHashMap::new();
        let mut context_totals: AHashMap<Vec<u8>, u64> = AHashMap::new();
        if reference.len() > order {
            for window in reference.windows(order + 1) {
                if window.iter().all(|&b| in_alphabet[b as usize]) {
                    *window_counts.entry(window.to_vec()).or_insert(0) += 1;
                    *context_totals.entry(window[..order].to_vec()).or_insert(0) += 1;
                }
            }
        }

        let transitions = window_counts
            .into_iter()
            .map(|(window, count)| {
                let ctx_total = context_totals[&window[..order]];
                (window, count as f64 / ctx_total as f64)
            })
            .collect();

        Self {
            order,
            alphabet: symbols,
            in_alphabet,
            marginals,
            transitions,
            context_totals,
        }
    }

    /// Order-0 probability of a symbol.
    pub fn marginal(&self, symbol: u8) -> f64 {
        self.marginals.get(&symbol).copied().unwrap_or(0.0)
    }

    /// Probability of `symbol` following `context` (`context.len() == order`).
    pub fn transition(&self, context: &[u8], symbol: u8) -> f64 {
        if !self.in_alphabet[symbol as usize] {
            return 0.0;
        }
        if !self.context_totals.contains_key(context) {
            return 1.0 / self.alphabet.len() as f64;
        }
        let mut key = Vec::with_capacity(context.len() + 1);
        key.extend_from_slice(context);
        key.push(symbol);
        self.transitions.get(&key).copied().unwrap_or(0.0)
    }

    /// Natural log of the motif probability; `-inf` when the motif is impossible.
    ///
    /// The first `order` symbols are scored with the marginals, every later
    /// symbol with its transition from the preceding `order` symbols.
    pub fn log_prob_motif(&self, motif: &[u8]) -> f64 {
        let mut log_p = 0.0;
        for (i, &symbol) in motif.iter().enumerate() {
            let p = if i < self.order {
                if self.in_alphabet[symbol as usize] {
                    self.marginal(symbol)
                } else {
                    0.0
                }
            } else {
                self.transition(&motif[i - self.order..i], symbol)
            };
            if p <= 0.0 {
                return f64::NEG_INFINITY;
            }
            log_p += p.ln();
        }
        log_p
    }

    pub fn prob_motif(&self, motif: &[u8]) -> f64 {
        self.log_prob_motif(motif).exp()
    }
}

/// Builds the transition model of `reference` restricted to `alphabet`.
pub fn get_transitions(reference: &[u8], alphabet: &[u8], order: usize) -> MarkovModel {
    MarkovModel::from_sequence(reference, alphabet, order)
}

/// Joint probability of `motif` under an order-k chain.
pub fn prob_motif(motif: &[u8], transitions: &MarkovModel) -> f64 {
    transitions.prob_motif(motif)
}

/// Models kept by a [`TransitionCache`] built with [`TransitionCache::new`].
pub const DEFAULT_CACHED_MODELS: usize = 4096;

/// Caller-owned cache of Markov models keyed by transcript id, shared by workers.
///
/// Holds at most `capacity` models; once full, models of new transcripts are
/// built for the caller and not kept.
#[derive(Debug)]
pub struct TransitionCache {
    models: RwLock<AHashMap<String, Arc<MarkovModel>>>,
    capacity: usize,
}

impl Default for TransitionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHED_MODELS)
    }
}

impl TransitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            models: RwLock::new(AHashMap::new()),
            capacity,
        }
    }

    pub fn get_or_build<F>(&self, transcript_id: &str, build: F) -> Arc<MarkovModel>
    where
        F: FnOnce() -> MarkovModel,
    {
        if let Some(model) = self.models.read().get(transcript_id) {
            return Arc::clone(model);
        }
        let mut models = self.models.write();
        if let Some(model) = models.get(transcript_id) {
            return Arc::clone(model);
        }
        let model = Arc::new(build());
        if models.len() < self.capacity {
            models.insert(transcript_id.to_string(), Arc::clone(&model));
        } else {
            log::trace!("Transition cache full, model of {} not kept", transcript_id);
        }
        model
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACGU: &[u8] = b"ACGU";

    #[test]
    fn test_first_order_transitions() {
        let model = get_transitions(b"ACGUACGU", ACGU, 1);
        assert_eq!(model.transition(b"A", b'C'), 1.0);
        assert_eq!(model.transition(b"A", b'G'), 0.0);
        assert!((model.marginal(b'A') - 0.25).abs() < 1e-12);
        assert!((prob_motif(b"ACG", &model) - 0.25).abs() < 1e-12);
        assert_eq!(prob_motif(b"AG", &model), 0.0);
    }

    #[test]
    fn test_unseen_context_is_uniform() {
        let model = get_transitions(b"AAAAAA", ACGU, 1);
        assert_eq!(model.transition(b"C", b'G'), 0.25);
        assert_eq!(model.transition(b"A", b'A'), 1.0);
        assert_eq!(model.transition(b"A", b'C'), 0.0);
    }

    #[test]
    fn test_windows_outside_alphabet_are_skipped() {
        let model = get_transitions(b"ANCACAC", ACGU, 1);
        // "AN" and "NC" are ignored
        assert_eq!(model.transition(b"A", b'C'), 1.0);
        assert_eq!(model.transition(b"C", b'A'), 1.0);
        assert_eq!(prob_motif(b"ANC", &model), 0.0);
    }

    #[test]
    fn test_order_zero_matches_marginals() {
        let model = get_transitions(b"AACG", ACGU, 0);
        let expected = 0.5 * 0.25 * 0.25;
        assert!((prob_motif(b"ACG", &model) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_long_motif_stays_finite_in_log_space() {
        let reference: Vec<u8> = b"ACGU".iter().cycle().take(4000).copied().collect();
        let model = get_transitions(&reference, ACGU, 0);
        let log_p = model.log_prob_motif(&reference[..2000]);
        assert!(log_p.is_finite());
        assert!((log_p - 2000.0 * 0.25f64.ln()).abs() < 1e-6);
        assert_eq!(model.prob_motif(&reference[..2000]), 0.0);
    }

    #[test]
    fn test_transition_cache_builds_once() {
        let cache = TransitionCache::new();
        let mut builds = 0;
        let first = cache.get_or_build("t1", || {
            builds += 1;
            get_transitions(b"ACGU", ACGU, 1)
        });
        let second = cache.get_or_build("t1", || unreachable!());
        assert_eq!(builds, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_transition_cache_is_bounded() {
        let cache = TransitionCache::with_capacity(1);
        let kept = cache.get_or_build("t1", || get_transitions(b"ACGU", ACGU, 1));
        let extra = cache.get_or_build("t2", || get_transitions(b"AAAA", ACGU, 1));
        assert_eq!(cache.len(), 1);
        assert_eq!(extra.transition(b"A", b'A'), 1.0);

        let mut builds = 0;
        cache.get_or_build("t2", || {
            builds += 1;
            get_transitions(b"AAAA", ACGU, 1)
        });
        assert_eq!(builds, 1);
        assert!(Arc::ptr_eq(&kept, &cache.get_or_build("t1", || unreachable!())));
    }
}
