//src/features/thermo.rs

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::{MirmapError, Result};
use crate::seed::is_gu_wobble;
use crate::types::{BasePair, Site};

/// Duplex initiation free energy (kcal/mol).
pub const HELIX_INITIATION: f64 = 4.09;
/// Penalty per helix end closed by an A-U or G-U pair.
pub const TERMINAL_AU_PENALTY: f64 = 0.45;
/// Flat cost of the internal loop separating two helices.
pub const INTERNAL_LOOP_PENALTY: f64 = 1.0;
/// Stack energy used whenever a G-U pair is involved.
pub const GU_STACK_ENERGY: f64 = -1.3;
/// Sequence kept on each side of a site when folding locally.
pub const OPEN_FLANK: usize = 50;

/// Thermodynamic capability consumed by the energy features.
///
/// Coordinates are 1-based and inclusive. `pairs` carries the duplex found by
/// the seed finder in miRNA/`target` coordinates; engines that fold the
/// duplex themselves may ignore it.
pub trait FoldingEngine: Send + Sync {
    fn duplex_energy(
        &self,
        mirna: &[u8],
        target: &[u8],
        region: (usize, usize),
        pairs: &[BasePair],
    ) -> Result<f64>;

    /// Energy needed to make `region` of `seq` single-stranded.
    fn open_energy(&self, seq: &[u8], region: (usize, usize)) -> Result<f64>;
}

/// Watson-Crick stacks, 5'-XY-3' on the miRNA against 3'-X'Y'-5' on the target.
fn wc_stack(x: u8, y: u8, xp: u8, yp: u8) -> Option<f64> {
    let e = match (x, y, xp, yp) {
        (b'A', b'A', b'U', b'U') => -0.93,
        (b'A', b'U', b'U', b'A') => -1.10,
        (b'U', b'A', b'A', b'U') => -1.33,
        (b'C', b'U', b'G', b'A') => -2.08,
        (b'C', b'A', b'G', b'U') => -2.11,
        (b'G', b'U', b'C', b'A') => -2.24,
        (b'G', b'A', b'C', b'U') => -2.35,
        (b'C', b'G', b'G', b'C') => -2.36,
        (b'G', b'G', b'C', b'C') => -3.26,
        (b'G', b'C', b'C', b'G') => -3.42,
        _ => return None,
    };
    Some(e)
}

/// Free energy of stacking pair (x, xp) on pair (y, yp).
pub fn stack_energy(x: u8, y: u8, xp: u8, yp: u8) -> f64 {
    if is_gu_wobble(x, xp) || is_gu_wobble(y, yp) {
        return GU_STACK_ENERGY;
    }
    // A stack read from the other strand is the same stack
    wc_stack(x, y, xp, yp)
        .or_else(|| wc_stack(yp, xp, y, x))
        .unwrap_or(0.0)
}

#[inline]
fn is_au_or_gu(m: u8, t: u8) -> bool {
    matches!((m, t), (b'A', b'U') | (b'U', b'A')) || is_gu_wobble(m, t)
}

/// Nearest-neighbor duplex model over the seed finder's ungapped pairing.
///
/// Helices are maximal runs of stacked pairs. The helix holding the first
/// pair is always kept; every later helix is kept only when it lowers the
/// energy after paying the internal loop penalty. Accessibility needs a real
/// folding engine, so `open_energy` is zero: `dg_open` stays 0, `dg_total`
/// equals `dg_duplex` and the binding energies equal the duplex energies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborModel;

impl NearestNeighborModel {
    fn helix_energy(mirna: &[u8], target: &[u8], helix: &[BasePair]) -> f64 {
        let base = |bp: &BasePair| (mirna[bp.mirna_pos - 1], target[bp.target_pos - 1]);
        let mut energy = 0.0;
        for w in helix.windows(2) {
            let (x, xp) = base(&w[0]);
            let (y, yp) = base(&w[1]);
            energy += stack_energy(x, y, xp, yp);
        }
        if let (Some(first), Some(last)) = (helix.first(), helix.last()) {
            let (m, t) = base(first);
            if is_au_or_gu(m, t) {
                energy += TERMINAL_AU_PENALTY;
            }
            let (m, t) = base(last);
            if is_au_or_gu(m, t) {
                energy += TERMINAL_AU_PENALTY;
            }
        }
        energy
    }
}

impl FoldingEngine for NearestNeighborModel {
    fn duplex_energy(
        &self,
        mirna: &[u8],
        target: &[u8],
        _region: (usize, usize),
        pairs: &[BasePair],
    ) -> Result<f64> {
        if pairs.is_empty() {
            return Ok(0.0);
        }
        for bp in pairs {
            if bp.mirna_pos == 0
                || bp.mirna_pos > mirna.len()
                || bp.target_pos == 0
                || bp.target_pos > target.len()
            {
                return Err(MirmapError::Folding(format!(
                    "pair {}:{} outside the sequences",
                    bp.mirna_pos, bp.target_pos
                )));
            }
        }

        let mut helices: Vec<&[BasePair]> = Vec::new();
        let mut start = 0;
        for i in 1..=pairs.len() {
            let stacked = i < pairs.len()
                && pairs[i].mirna_pos == pairs[i - 1].mirna_pos + 1
                && pairs[i].target_pos + 1 == pairs[i - 1].target_pos;
            if !stacked {
                helices.push(&pairs[start..i]);
                start = i;
            }
        }

        let mut energy = HELIX_INITIATION + Self::helix_energy(mirna, target, helices[0]);
        for helix in &helices[1..] {
            let extra = INTERNAL_LOOP_PENALTY + Self::helix_energy(mirna, target, helix);
            if extra < 0.0 {
                energy += extra;
            }
        }
        Ok(energy.min(0.0))
    }

    fn open_energy(&self, _seq: &[u8], _region: (usize, usize)) -> Result<f64> {
        Ok(0.0)
    }
}

/// ViennaRNA executables found in one directory (`RNAduplex`, `RNAfold`).
#[derive(Debug, Clone)]
pub struct ViennaExecutables {
    dir: PathBuf,
}

impl ViennaExecutables {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn run(&self, program: &str, args: &[&str], input: &str) -> Result<String> {
        let exe = self.dir.join(program);
        let mut child = Command::new(&exe)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MirmapError::Folding(format!("cannot start {}: {}", exe.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(MirmapError::Folding(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn fold(&self, seq: &str, constraint: Option<&str>) -> Result<f64> {
        match constraint {
            Some(c) => parse_vienna_energy(&self.run("RNAfold", &["--noPS", "-C"], &format!("{}\n{}\n", seq, c))?),
            None => parse_vienna_energy(&self.run("RNAfold", &["--noPS"], &format!("{}\n", seq))?),
        }
    }
}

impl FoldingEngine for ViennaExecutables {
    fn duplex_energy(
        &self,
        mirna: &[u8],
        target: &[u8],
        region: (usize, usize),
        _pairs: &[BasePair],
    ) -> Result<f64> {
        let (start, end) = region;
        let site = String::from_utf8_lossy(&target[start - 1..end]);
        let input = format!("{}\n{}\n", String::from_utf8_lossy(mirna), site);
        parse_vienna_energy(&self.run("RNAduplex", &[], &input)?)
    }

    fn open_energy(&self, seq: &[u8], region: (usize, usize)) -> Result<f64> {
        let (start, end) = region;
        let win_start = start.saturating_sub(OPEN_FLANK).max(1);
        let win_end = (end + OPEN_FLANK).min(seq.len());
        let window = String::from_utf8_lossy(&seq[win_start - 1..win_end]).into_owned();

        let constraint: String = (win_start..=win_end)
            .map(|p| if p >= start && p <= end { 'x' } else { '.' })
            .collect();

        let free = self.fold(&window, None)?;
        let constrained = self.fold(&window, Some(&constraint))?;
        Ok(constrained - free)
    }
}

/// Reads the energy in the last parenthesized group of a ViennaRNA output.
pub fn parse_vienna_energy(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .rev()
        .find(|l| l.contains('(') && l.trim_end().ends_with(')'))
        .ok_or_else(|| MirmapError::Folding(format!("no energy in output: {:?}", output)))?;
    let open = line.rfind('(').unwrap_or(0);
    let close = line.rfind(')').unwrap_or(line.len());
    line[open + 1..close]
        .trim()
        .parse::<f64>()
        .map_err(|e| MirmapError::Folding(format!("bad energy in {:?}: {}", line, e)))
}

/// Picks the external executables when a directory is configured.
pub fn folding_engine(exe_path: Option<&Path>) -> Arc<dyn FoldingEngine> {
    match exe_path {
        Some(dir) => Arc::new(ViennaExecutables::new(dir)),
        None => Arc::new(NearestNeighborModel),
    }
}

/// Duplex energies of one site. The binding energies add the cost of
/// unfolding the miRNA.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SiteEnergies {
    pub duplex: f64,
    pub binding: f64,
    pub duplex_seed: f64,
    pub binding_seed: f64,
}

/// Duplex energies of the whole site and of its seed. `mirna_open` is the
/// cost of unfolding the miRNA, shared by every site of a pair.
pub fn duplex_energies(
    engine: &dyn FoldingEngine,
    mirna: &[u8],
    transcript: &[u8],
    site: &Site,
    site_window: (usize, usize),
    mirna_open: f64,
) -> Result<SiteEnergies> {
    let duplex = engine.duplex_energy(mirna, transcript, site_window, &site.pairing)?;

    let seed_pairs: Vec<BasePair> = site.seed_pairs().copied().collect();
    let seed_mirna = &mirna[..(site.seed_length + 1).min(mirna.len())];
    let (seed_start, _) = site.seed_window();
    let duplex_seed =
        engine.duplex_energy(seed_mirna, transcript, (seed_start, site.end_site), &seed_pairs)?;

    Ok(SiteEnergies {
        duplex,
        binding: duplex + mirna_open,
        duplex_seed,
        binding_seed: duplex_seed + mirna_open,
    })
}
