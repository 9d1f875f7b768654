//src/seed.rs

use crate::config::{MotifDef, SeedKind};
use crate::error::{MirmapError, Result};
use crate::types::{BasePair, Site};

/// Discovers candidate binding sites of a miRNA on a transcript.
///
/// Both sequences are normalized RNA (`ACGU`, anything else `N`). Sites must
/// be returned ordered by `end_site`.
pub trait SeedFinder: Send + Sync {
    fn find_sites(&self, mirna: &[u8], transcript: &[u8]) -> Result<Vec<Site>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairClass {
    WatsonCrick,
    Wobble,
    Mismatch,
}

#[inline]
fn classify_pair(mirna_base: u8, target_base: u8) -> PairClass {
    match (mirna_base, target_base) {
        (b'A', b'U') | (b'U', b'A') | (b'G', b'C') | (b'C', b'G') => PairClass::WatsonCrick,
        (b'G', b'U') | (b'U', b'G') => PairClass::Wobble,
        _ => PairClass::Mismatch,
    }
}

#[inline]
pub(crate) fn is_watson_crick(mirna_base: u8, target_base: u8) -> bool {
    classify_pair(mirna_base, target_base) == PairClass::WatsonCrick
}

#[inline]
pub(crate) fn is_gu_wobble(mirna_base: u8, target_base: u8) -> bool {
    classify_pair(mirna_base, target_base) == PairClass::Wobble
}

/// Ungapped seed matcher.
///
/// miRNA position `j` faces transcript position `end_site - (j - 1)`; the seed
/// spans miRNA positions `2..=length + 1`.
#[derive(Debug, Clone)]
pub struct SeedMatcher {
    kinds: Vec<SeedKind>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    rank: usize,
    end_site: usize,
    kind: SeedKind,
    nb_mismatches: usize,
    nb_gu_wobbles: usize,
}

impl Candidate {
    fn window(&self) -> (usize, usize) {
        (self.end_site - self.kind.length, self.end_site - 1)
    }
}

impl SeedMatcher {
    /// `kinds` in priority order.
    pub fn new(kinds: Vec<SeedKind>) -> Self {
        Self { kinds }
    }

    /// Scores the seed of `kind` ending at `end_site`; `None` if it does not fit.
    fn match_kind(
        &self,
        mirna: &[u8],
        transcript: &[u8],
        end_site: usize,
        kind: &SeedKind,
    ) -> Option<(usize, usize)> {
        if mirna.len() < kind.length + 1 || end_site <= kind.length {
            return None;
        }
        let mut mismatches = 0;
        let mut wobbles = 0;
        for j in 2..=kind.length + 1 {
            let t = end_site - (j - 1);
            match classify_pair(mirna[j - 1], transcript[t - 1]) {
                PairClass::WatsonCrick => {}
                PairClass::Wobble => wobbles += 1,
                PairClass::Mismatch => mismatches += 1,
            }
            if mismatches > kind.max_mismatches || wobbles > kind.max_gu_wobbles {
                return None;
            }
        }
        Some((mismatches, wobbles))
    }

    /// Every paired position of the ungapped duplex anchored at `end_site`.
    fn pairing(mirna: &[u8], transcript: &[u8], end_site: usize) -> Vec<BasePair> {
        let mut pairs = Vec::with_capacity(mirna.len());
        for j in 2..=mirna.len() {
            if end_site < j {
                break;
            }
            let t = end_site - (j - 1);
            if classify_pair(mirna[j - 1], transcript[t - 1]) != PairClass::Mismatch {
                pairs.push(BasePair {
                    target_pos: t,
                    mirna_pos: j,
                });
            }
        }
        pairs
    }
}

impl SeedFinder for SeedMatcher {
    fn find_sites(&self, mirna: &[u8], transcript: &[u8]) -> Result<Vec<Site>> {
        let min_len = match self.kinds.iter().map(|k| k.length).min() {
            Some(len) => len,
            None => return Err(MirmapError::SeedSearch("no seed kind configured".into())),
        };
        if mirna.len() < min_len + 1 {
            return Err(MirmapError::SeedSearch(format!(
                "miRNA of length {} is shorter than its seed",
                mirna.len()
            )));
        }

        // 1) Best kind per end position
        let mut candidates = Vec::new();
        for end_site in 1..=transcript.len() {
            for (rank, kind) in self.kinds.iter().enumerate() {
                if let Some((nb_mismatches, nb_gu_wobbles)) =
                    self.match_kind(mirna, transcript, end_site, kind)
                {
                    candidates.push(Candidate {
                        rank,
                        end_site,
                        kind: *kind,
                        nb_mismatches,
                        nb_gu_wobbles,
                    });
                    break;
                }
            }
        }

        // 2) Better kinds first, then leftmost; drop seeds overlapping an accepted one
        candidates.sort_by_key(|c| (c.rank, c.end_site));
        let mut accepted: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for c in candidates {
            let (start, end) = c.window();
            let overlaps = accepted.iter().any(|a| {
                let (a_start, a_end) = a.window();
                start <= a_end && a_start <= end
            });
            if !overlaps {
                accepted.push(c);
            }
        }
        accepted.sort_by_key(|c| c.end_site);

        Ok(accepted
            .into_iter()
            .map(|c| Site {
                end_site: c.end_site,
                seed_length: c.kind.length,
                nb_mismatches: c.nb_mismatches,
                nb_gu_wobbles: c.nb_gu_wobbles,
                pairing: Self::pairing(mirna, transcript, c.end_site),
            })
            .collect())
    }
}

/// 1-based inclusive transcript coordinates of a site's motif.
pub fn motif_coordinates(
    site: &Site,
    motif_def: MotifDef,
    upstream_extension: usize,
    downstream_extension: usize,
    min_target_length: usize,
    target_len: usize,
) -> (usize, usize) {
    let e = site.end_site;
    let seed_start = e - site.seed_length;
    let (start, end) = match motif_def {
        MotifDef::Seed => (seed_start, e - 1),
        MotifDef::SeedExtended => (seed_start, e),
        MotifDef::Site => {
            let first_paired = site
                .pairing
                .iter()
                .map(|bp| bp.target_pos)
                .min()
                .unwrap_or(seed_start);
            let floor = (e + 1).saturating_sub(min_target_length).max(1);
            (seed_start.min(first_paired).min(floor), e)
        }
    };
    let start = start.saturating_sub(upstream_extension).max(1);
    let end = (end + downstream_extension).min(target_len);
    (start, end)
}
