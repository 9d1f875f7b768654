use std::fs;

use mirmap_rs::batch::{predict_parallel, predict_sequential};
use mirmap_rs::config::{ExecutionMode, OutputOptions, PredictionConfig};
use mirmap_rs::fasta::{load_fasta, write_fasta};
use mirmap_rs::output::write_predictions;
use mirmap_rs::pipeline::PredictionContext;
use mirmap_rs::predict_targets;
use mirmap_rs::types::{Feature, SequenceSet};

const LET7: &str = "UGAGGUAGUAGGUUGUAUAGUU";
const MIR21: &str = "UAGCUUAUCAGACUGAUGUUGA";
// 7-mer match of let-7 (CUACCUC + A) inside 44 nt
const T1: &str = "GCAUGCAUGCAUGCAUCUACCUCAGCAUGCAUGCAUGCAUGCAU";
// 7-mer match of miR-21 (AUAAGCU + A) and two of let-7
const T2: &str = "GGCAUAAGCUAGCAUCUACCUCAGCAUGCAUGCAUCUACCUCAGCAUGCA";

fn set(entries: &[(&str, &str)]) -> SequenceSet {
    let mut s = SequenceSet::new();
    for (id, seq) in entries {
        s.insert(id.to_string(), seq.to_string());
    }
    s
}

#[test]
fn per_site_rows_for_single_pair() {
    let mirnas = set(&[("mir1", LET7)]);
    let transcripts = set(&[("t1", T1)]);
    let results = predict_targets(&mirnas, &transcripts, PredictionConfig::default()).unwrap();
    let tsv = results.to_tsv(&OutputOptions::default()).unwrap();

    let rows: Vec<Vec<&str>> = tsv.lines().map(|l| l.split('\t').collect()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 2 + 4 + Feature::ALL.len());
    assert_eq!(rows[0][0], "mir1");
    assert_eq!(rows[0][1], "t1");
    assert_eq!(rows[0][2], "24");
    assert_eq!(rows[0][3], "7");
}

#[test]
fn zero_sites_emit_no_rows() {
    let mirnas = set(&[("mir1", LET7)]);
    let transcripts = set(&[("polyA", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")]);
    for combine in [false, true] {
        let results = predict_targets(&mirnas, &transcripts, PredictionConfig::default()).unwrap();
        let options = OutputOptions {
            combine,
            site_id: true,
        };
        assert_eq!(results.to_tsv(&options).unwrap(), "");
        assert_eq!(results.failures().count(), 0);
    }
}

#[test]
fn parallel_rows_match_sequential_rows() {
    let mirnas = set(&[("let-7", LET7), ("mir-21", MIR21)]);
    let transcripts = set(&[("t1", T1), ("t2", T2)]);
    let options = OutputOptions {
        combine: false,
        site_id: true,
    };

    let sequential = predict_targets(&mirnas, &transcripts, PredictionConfig::default())
        .unwrap()
        .to_tsv(&options)
        .unwrap();
    let parallel_config = PredictionConfig {
        mode: ExecutionMode::from_workers(2, 1),
        ..PredictionConfig::default()
    };
    let parallel = predict_targets(&mirnas, &transcripts, parallel_config)
        .unwrap()
        .to_tsv(&options)
        .unwrap();

    assert!(!sequential.is_empty());
    assert_eq!(sequential, parallel);
    let pairs: Vec<(&str, &str)> = sequential
        .lines()
        .map(|l| {
            let mut f = l.split('\t');
            (f.next().unwrap_or(""), f.next().unwrap_or(""))
        })
        .collect();
    assert_eq!(pairs.first(), Some(&("let-7", "t1")));
    assert_eq!(pairs.last(), Some(&("mir-21", "t2")));
}

#[test]
fn combined_value_is_reducer_of_site_column() {
    let mirnas = set(&[("let-7", LET7)]);
    let transcripts = set(&[("t2", T2)]);
    let config = PredictionConfig::default();
    let reducers = config.params.reducers;
    let results = predict_targets(&mirnas, &transcripts, config).unwrap();
    let prediction = results.predictions().next().unwrap();
    assert_eq!(prediction.sites.len(), 2);

    let combined = prediction.combined(&reducers);
    for (i, &feature) in Feature::ALL.iter().enumerate() {
        let expected = reducers
            .for_feature(feature)
            .reduce(prediction.column(feature))
            .unwrap();
        assert_eq!(combined[i], expected, "{}", feature.name());
    }
    assert_eq!(
        combined[Feature::ALL.iter().position(|&f| f == Feature::ProbBinomial).unwrap()],
        prediction
            .column(Feature::ProbBinomial)
            .into_iter()
            .fold(f64::INFINITY, f64::min)
    );
}

#[test]
fn every_site_carries_every_feature() {
    let mirnas = set(&[("let-7", LET7), ("mir-21", MIR21)]);
    let transcripts = set(&[("t1", T1), ("t2", T2)]);
    let ctx = PredictionContext::new(PredictionConfig::default());
    let sequential: Vec<_> = predict_sequential(&mirnas, &transcripts, &ctx).collect();
    let parallel = predict_parallel(&mirnas, &transcripts, &ctx, 2, 5).unwrap();

    let mut buf_seq = Vec::new();
    let mut buf_par = Vec::new();
    let options = OutputOptions::default();
    let reducers = ctx.config.params.reducers;
    let summary = write_predictions(&mut buf_seq, &sequential, &options, &reducers).unwrap();
    write_predictions(&mut buf_par, &parallel, &options, &reducers).unwrap();
    assert_eq!(buf_seq, buf_par);
    assert_eq!(summary.failed, 0);

    for outcome in &sequential {
        if let Ok(Some(prediction)) = &outcome.result {
            for record in &prediction.sites {
                for &feature in Feature::ALL.iter() {
                    assert!(record.features.get(feature).is_finite());
                }
            }
        }
    }
}

#[test]
fn fasta_round_trip_feeds_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transcripts.fa");
    let transcripts = set(&[("t1", T1), ("t2", T2)]);
    let mut file = fs::File::create(&path).unwrap();
    write_fasta(&mut file, &transcripts).unwrap();
    drop(file);

    let loaded = load_fasta(&path, true).unwrap();
    assert_eq!(loaded, transcripts);

    let results = predict_targets(&set(&[("let-7", LET7)]), &loaded, PredictionConfig::default()).unwrap();
    assert_eq!(results.predictions().count(), 2);
}
