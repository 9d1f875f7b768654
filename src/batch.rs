//src/batch.rs

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::ExecutionMode;
use crate::error::{MirmapError, Result};
use crate::pipeline::{predict_pair, PredictionContext};
use crate::types::{NamedSequence, PairPrediction, SequenceSet};

/// Result of one miRNA/transcript pair, tagged with its enumeration index.
#[derive(Debug)]
pub struct PairOutcome {
    pub index: usize,
    pub mirna_id: String,
    pub transcript_id: String,
    /// `Ok(None)` when no site was found.
    pub result: Result<Option<PairPrediction>>,
}

type Pair<'a> = (usize, &'a NamedSequence, &'a NamedSequence);

/// Cartesian product of the inputs: miRNAs in the outer loop, transcripts
/// varying fastest.
pub fn pair_iter<'a>(
    mirnas: &'a SequenceSet,
    transcripts: &'a SequenceSet,
) -> impl Iterator<Item = Pair<'a>> + 'a {
    mirnas
        .iter()
        .flat_map(move |m| transcripts.iter().map(move |t| (m, t)))
        .enumerate()
        .map(|(i, (m, t))| (i, m, t))
}

pub fn enumerate_pairs<'a>(mirnas: &'a SequenceSet, transcripts: &'a SequenceSet) -> Vec<Pair<'a>> {
    let mut pairs = Vec::with_capacity(mirnas.len() * transcripts.len());
    pairs.extend(pair_iter(mirnas, transcripts));
    pairs
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one pair; a panic becomes a `WorkerPanic` error for that pair only.
pub fn guarded_predict(
    index: usize,
    mirna: &NamedSequence,
    transcript: &NamedSequence,
    ctx: &PredictionContext,
) -> PairOutcome {
    let result = match panic::catch_unwind(AssertUnwindSafe(|| predict_pair(mirna, transcript, ctx))) {
        Ok(result) => result,
        Err(payload) => Err(MirmapError::WorkerPanic {
            mirna_id: mirna.id.clone(),
            transcript_id: transcript.id.clone(),
            message: panic_message(payload.as_ref()),
        }),
    };
    PairOutcome {
        index,
        mirna_id: mirna.id.clone(),
        transcript_id: transcript.id.clone(),
        result,
    }
}

/// Lazily evaluates the pairs one after the other, in enumeration order.
pub fn predict_sequential<'a>(
    mirnas: &'a SequenceSet,
    transcripts: &'a SequenceSet,
    ctx: &'a PredictionContext,
) -> impl Iterator<Item = PairOutcome> + 'a {
    pair_iter(mirnas, transcripts).map(move |(i, m, t)| guarded_predict(i, m, t, ctx))
}

fn run_parallel(
    mirnas: &SequenceSet,
    transcripts: &SequenceSet,
    ctx: &PredictionContext,
    workers: usize,
    chunk_size: usize,
    progress: &ProgressBar,
) -> Result<Vec<PairOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| MirmapError::ThreadPool(e.to_string()))?;

    let pairs = enumerate_pairs(mirnas, transcripts);
    let chunks: Vec<Vec<PairOutcome>> = pool.install(|| {
        pairs
            .par_chunks(chunk_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|&(i, m, t)| {
                        let outcome = guarded_predict(i, m, t, ctx);
                        progress.inc(1);
                        outcome
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    });

    // Chunks come back in submission order
    Ok(chunks.into_iter().flatten().collect())
}

/// Evaluates the pairs on a dedicated pool of `workers` threads, `chunk_size`
/// pairs per task. Outcomes follow enumeration order, not completion order.
pub fn predict_parallel(
    mirnas: &SequenceSet,
    transcripts: &SequenceSet,
    ctx: &PredictionContext,
    workers: usize,
    chunk_size: usize,
) -> Result<Vec<PairOutcome>> {
    run_parallel(mirnas, transcripts, ctx, workers, chunk_size, &ProgressBar::hidden())
}

/// Drives a batch with the execution mode of its configuration.
pub struct BatchPredictor {
    ctx: Arc<PredictionContext>,
    progress: ProgressBar,
}

impl BatchPredictor {
    pub fn new(ctx: PredictionContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            progress: ProgressBar::hidden(),
        }
    }

    /// Ticks `progress` once per finished pair.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Sequential batches are produced lazily; parallel batches are complete
    /// before the first outcome is returned.
    pub fn run<'a>(
        &'a self,
        mirnas: &'a SequenceSet,
        transcripts: &'a SequenceSet,
    ) -> Result<Box<dyn Iterator<Item = PairOutcome> + 'a>> {
        self.progress.set_length((mirnas.len() * transcripts.len()) as u64);
        match self.ctx.config.mode {
            ExecutionMode::Sequential => {
                let progress = self.progress.clone();
                Ok(Box::new(
                    predict_sequential(mirnas, transcripts, &self.ctx).inspect(move |_| progress.inc(1)),
                ))
            }
            ExecutionMode::Parallel {
                workers,
                chunk_size,
            } => {
                let outcomes =
                    run_parallel(mirnas, transcripts, &self.ctx, workers, chunk_size, &self.progress)?;
                Ok(Box::new(outcomes.into_iter()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictionConfig;
    use crate::seed::SeedFinder;
    use crate::types::Site;

    fn sets() -> (SequenceSet, SequenceSet) {
        let mut mirnas = SequenceSet::new();
        mirnas.insert("m1".into(), "UGAGGUAGUAGGUUGUAUAGUU".into());
        mirnas.insert("m2".into(), "UAGCUUAUCAGACUGAUGUUGA".into());
        let mut transcripts = SequenceSet::new();
        transcripts.insert("t1".into(), "GCAUGCAUGCAUCUACCUCAGCAUGCAUGCAU".into());
        transcripts.insert("t2".into(), "AUAAGCUAAGCAUGCAUGCAUGCAUGCAU".into());
        transcripts.insert("t3".into(), "GGGGGGGGGGGGGGGGGG".into());
        (mirnas, transcripts)
    }

    #[test]
    fn test_transcripts_vary_fastest() {
        let (mirnas, transcripts) = sets();
        let ids: Vec<(usize, &str, &str)> = enumerate_pairs(&mirnas, &transcripts)
            .into_iter()
            .map(|(i, m, t)| (i, m.id.as_str(), t.id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                (0, "m1", "t1"),
                (1, "m1", "t2"),
                (2, "m1", "t3"),
                (3, "m2", "t1"),
                (4, "m2", "t2"),
                (5, "m2", "t3"),
            ]
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (mirnas, transcripts) = sets();
        let ctx = PredictionContext::new(PredictionConfig::default());
        let sequential: Vec<PairOutcome> = predict_sequential(&mirnas, &transcripts, &ctx).collect();
        let parallel = predict_parallel(&mirnas, &transcripts, &ctx, 3, 1).unwrap();
        assert_eq!(sequential.len(), parallel.len());
        for (s, p) in sequential.iter().zip(&parallel) {
            assert_eq!(s.index, p.index);
            assert_eq!((&s.mirna_id, &s.transcript_id), (&p.mirna_id, &p.transcript_id));
            assert_eq!(s.result.as_ref().ok(), p.result.as_ref().ok());
        }
        assert!(parallel.iter().enumerate().all(|(i, o)| o.index == i));
    }

    struct PanicsOnT2;

    impl SeedFinder for PanicsOnT2 {
        fn find_sites(&self, _mirna: &[u8], transcript: &[u8]) -> Result<Vec<Site>> {
            if transcript.starts_with(b"AUAAG") {
                panic!("seed finder crashed");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panic_is_isolated_to_its_pair() {
        let (mirnas, transcripts) = sets();
        let ctx = PredictionContext::new(PredictionConfig::default())
            .with_seed_finder(Arc::new(PanicsOnT2));
        let outcomes = predict_parallel(&mirnas, &transcripts, &ctx, 2, 2).unwrap();
        assert_eq!(outcomes.len(), 6);
        for outcome in &outcomes {
            match (&outcome.transcript_id[..], &outcome.result) {
                ("t2", Err(MirmapError::WorkerPanic { message, .. })) => {
                    assert_eq!(message, "seed finder crashed")
                }
                ("t2", other) => panic!("expected a worker panic, got {:?}", other),
                (_, result) => assert!(matches!(result, Ok(None))),
            }
        }
    }

    #[test]
    fn test_batch_predictor_runs_both_modes() {
        let (mirnas, transcripts) = sets();
        let sequential = BatchPredictor::new(PredictionContext::new(PredictionConfig::default()));
        let config = PredictionConfig {
            mode: ExecutionMode::from_workers(2, 5),
            ..PredictionConfig::default()
        };
        let parallel = BatchPredictor::new(PredictionContext::new(config));

        let a: Vec<usize> = sequential
            .run(&mirnas, &transcripts)
            .unwrap()
            .map(|o| o.index)
            .collect();
        let b: Vec<usize> = parallel
            .run(&mirnas, &transcripts)
            .unwrap()
            .map(|o| o.index)
            .collect();
        assert_eq!(a, (0..6).collect::<Vec<_>>());
        assert_eq!(a, b);
    }
}
