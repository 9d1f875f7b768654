//src/prob_binomial.rs

use crate::markov::MarkovModel;
use crate::seq_utils::count_overlapping;

/// P(X <= k) for X ~ Binomial(n, p).
///
/// Each term is built in log-space with an incrementally updated log binomial
/// coefficient, so large `n` neither overflows nor produces NaN.
/// Requires `k <= n` and `0 < p < 1`.
pub fn binomial_cdf(k: u64, n: u64, p: f64) -> f64 {
    debug_assert!(k <= n, "binomial_cdf requires k <= n");
    debug_assert!(p > 0.0 && p < 1.0, "binomial_cdf requires 0 < p < 1");

    let log_p = p.ln();
    let log_q = (-p).ln_1p();
    let mut cdf = 0.0;
    let mut log_coef = 0.0;
    for i in 0..=k {
        if i > 0 {
            log_coef += ((n - i + 1) as f64).ln() - (i as f64).ln();
        }
        let log_pmf = log_coef + i as f64 * log_p + (n - i) as f64 * log_q;
        cdf += log_pmf.exp();
    }
    cdf
}

/// P(X > k) for X ~ Binomial(n, p), with the degenerate cases handled
/// explicitly instead of taking the log of zero.
pub fn binomial_upper_tail(k: u64, n: u64, p: f64) -> f64 {
    if k >= n || p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }
    (1.0 - binomial_cdf(k, n, p)).max(0.0)
}

/// P(X >= k) for X ~ Binomial(n, p).
pub fn binomial_at_least(k: u64, n: u64, p: f64) -> f64 {
    if k == 0 {
        1.0
    } else {
        binomial_upper_tail(k - 1, n, p)
    }
}

/// Number of possible placements of a motif of `motif_len` in `seq_len`.
#[inline]
pub fn motif_placements(seq_len: usize, motif_len: usize) -> u64 {
    if motif_len == 0 || motif_len > seq_len {
        0
    } else {
        (seq_len - motif_len + 1) as u64
    }
}

/// Over-representation of `motif` in `transcript` under the Markov null model:
/// the probability of seeing the motif more often than observed.
///
/// A motif the model cannot produce (a symbol outside the alphabet, or a
/// transition never seen) carries no evidence and scores 1.
pub fn motif_enrichment(transcript: &[u8], motif: &[u8], model: &MarkovModel) -> f64 {
    let p = model.prob_motif(motif);
    if p <= 0.0 {
        return 1.0;
    }
    let observed = count_overlapping(transcript, motif) as u64;
    let n = motif_placements(transcript.len(), motif.len());
    binomial_upper_tail(observed, n, p)
}
