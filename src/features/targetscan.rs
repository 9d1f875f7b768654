//src/features/targetscan.rs

use crate::seed::is_watson_crick;
use crate::types::Site;

/// Flank length scanned on each side of a site for AU content.
pub const AU_FLANK: usize = 30;

/// Largest target-side shift tried when pairing the miRNA 3' end.
pub const MAX_PAIRING3P_OFFSET: usize = 4;

/// Distance cap of the positional term of the context score.
pub const POSITION_CAP: f64 = 1500.0;

/// Weighted AU content around a site, each flank base weighted `1 / distance`.
pub fn tgs_au(transcript: &[u8], site: &Site) -> f64 {
    let (seed_start, _) = site.seed_window();
    let end = site.end_site;

    let mut au = 0.0;
    let mut total = 0.0;
    let mut add = |base: u8, distance: usize| {
        let w = 1.0 / distance as f64;
        total += w;
        if base == b'A' || base == b'U' {
            au += w;
        }
    };

    // Upstream of the seed
    for d in 1..=AU_FLANK {
        if d >= seed_start {
            break;
        }
        add(transcript[seed_start - d - 1], d);
    }
    // Downstream of the position facing miRNA nt 1
    for d in 1..=AU_FLANK {
        let pos = end + d;
        if pos > transcript.len() {
            break;
        }
        add(transcript[pos - 1], d);
    }

    if total == 0.0 {
        0.0
    } else {
        au / total
    }
}

/// Distance in nucleotides from the site to the nearest transcript end.
pub fn tgs_position(transcript_len: usize, site: &Site) -> f64 {
    let (seed_start, _) = site.seed_window();
    let before = seed_start - 1;
    let after = transcript_len.saturating_sub(site.end_site);
    before.min(after) as f64
}

#[inline]
fn pairing3p_weight(mirna_pos: usize) -> f64 {
    if (13..=16).contains(&mirna_pos) {
        1.0
    } else {
        0.5
    }
}

/// Supplementary pairing of miRNA nt 12-17.
///
/// For every target shift the best contiguous Watson-Crick run is scored
/// (nt 13-16 weigh 1, the others 0.5; runs shorter than 2 count 0) and
/// shifts beyond 2 nt are penalized by 0.5 per extra nucleotide.
pub fn tgs_pairing3p(mirna: &[u8], transcript: &[u8], site: &Site) -> f64 {
    let last = mirna.len().min(17);
    if last < 12 {
        return 0.0;
    }

    let mut best: f64 = 0.0;
    for offset in 0..=MAX_PAIRING3P_OFFSET {
        let mut best_run = 0.0;
        let mut run = 0.0;
        let mut run_len = 0;
        for j in 12..=last {
            let paired = match (site.end_site + 1).checked_sub(j + offset) {
                Some(t) if t >= 1 => is_watson_crick(mirna[j - 1], transcript[t - 1]),
                _ => false,
            };
            if paired {
                run += pairing3p_weight(j);
                run_len += 1;
                if run_len >= 2 && run > best_run {
                    best_run = run;
                }
            } else {
                run = 0.0;
                run_len = 0;
            }
        }
        let penalty = 0.5 * offset.saturating_sub(2) as f64;
        best = best.max(best_run - penalty);
    }
    best
}

/// Seed-type contribution of the context score.
pub fn seed_base_score(site: &Site) -> f64 {
    match (site.seed_length, site.is_perfect()) {
        (l, true) if l >= 7 => -0.31,
        (6, true) => -0.161,
        _ => -0.1,
    }
}

/// Context score: lower means stronger expected repression.
pub fn tgs_score(site: &Site, au: f64, position: f64, pairing3p: f64) -> f64 {
    seed_base_score(site) - 0.64 * (au - 0.5) - 0.06 * (pairing3p - 1.0)
        + 0.00005 * position.min(POSITION_CAP)
}
