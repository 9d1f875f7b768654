//src/features/probability.rs

use ahash::AHashMap;

use crate::prob_binomial::{binomial_at_least, motif_placements};
use crate::seq_utils::count_overlapping;

/// Probability of drawing `motif` letter by letter, without replacement, from
/// the alphabet composition of `transcript`.
pub fn word_probability(transcript: &[u8], motif: &[u8], alphabet: &[u8]) -> f64 {
    let mut counts: AHashMap<u8, u64> = alphabet.iter().map(|&b| (b, 0)).collect();
    let mut total: u64 = 0;
    for b in transcript {
        if let Some(c) = counts.get_mut(b) {
            *c += 1;
            total += 1;
        }
    }

    let mut prob = 1.0;
    for &symbol in motif {
        let left = match counts.get_mut(&symbol) {
            Some(c) if *c > 0 && total > 0 => c,
            _ => return 0.0,
        };
        prob *= *left as f64 / total as f64;
        *left -= 1;
        total -= 1;
    }
    prob
}

/// Chance of finding the motif at least as often as it occurs in the transcript.
/// A motif that cannot be drawn from the alphabet composition scores 1.
pub fn prob_exact(transcript: &[u8], motif: &[u8], alphabet: &[u8]) -> f64 {
    let p = word_probability(transcript, motif, alphabet);
    if p <= 0.0 {
        return 1.0;
    }
    let observed = count_overlapping(transcript, motif) as u64;
    let n = motif_placements(transcript.len(), motif.len());
    binomial_at_least(observed, n, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_probability_without_replacement() {
        // 2 A, 2 C out of 4: P(AA) = 2/4 * 1/3
        let p = word_probability(b"AACC", b"AA", b"ACGU");
        assert!((p - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(word_probability(b"AACC", b"AAA", b"ACGU"), 0.0);
        assert_eq!(word_probability(b"AACC", b"G", b"ACGU"), 0.0);
        assert_eq!(word_probability(b"NNNN", b"A", b"ACGU"), 0.0);
    }

    #[test]
    fn test_prob_exact_bounds() {
        let transcript = b"GCAUGCAUGCAUCUACCUCAGCAUGCAUGCAU";
        let p = prob_exact(transcript, b"CUACCUC", b"ACGU");
        assert!(p > 0.0 && p < 1.0, "p = {}", p);

        let repeated = prob_exact(b"GCAUGCAUGCAUGCAUGCAU", b"GCAU", b"ACGU");
        let single = prob_exact(b"GCAUUUUUUUUUUUUUUUUU", b"GCAU", b"ACGU");
        assert!(repeated < single);
    }

    #[test]
    fn test_prob_exact_motif_outside_alphabet() {
        let transcript = b"GCAUGCNUCUACCUCAGCAUGCAU";
        assert_eq!(word_probability(transcript, b"NUCUACCUC", b"ACGU"), 0.0);
        assert_eq!(prob_exact(transcript, b"NUCUACCUC", b"ACGU"), 1.0);
    }
}
