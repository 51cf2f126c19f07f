//! End-to-end: compute statistics over a partitioned CSV dataset, then
//! transform and write it as shuffled Parquet files.

mod common;

use std::collections::HashSet;

use tabflow::ops::{
    Buckets, Categorify, Dropna, FillMedian, FillMissing, HashBucket, LogOp, MinMax, Normalize,
    Operator,
};
use tabflow::{
    ApplyOptions, ApplyOutput, Chunk, ColumnData, FlexType, Stats, TabflowError, Workflow,
    WorkflowConfig, WorkflowState,
};
use tabflow_storage::stream::materialize_sync;

use common::*;

fn config() -> WorkflowConfig {
    WorkflowConfig {
        num_workers: 1,
        ..WorkflowConfig::default()
    }
    .with_seed(17)
}

fn floats(chunk: &Chunk, name: &str) -> Vec<Option<f64>> {
    match chunk.column_by_name(name).unwrap() {
        ColumnData::Float(v) => v.clone(),
        other => panic!("{} is {:?}", name, other.dtype()),
    }
}

fn ints(chunk: &Chunk, name: &str) -> Vec<Option<i64>> {
    match chunk.column_by_name(name).unwrap() {
        ColumnData::Integer(v) => v.clone(),
        other => panic!("{} is {:?}", name, other.dtype()),
    }
}

fn standard_workflow(config: WorkflowConfig) -> Workflow {
    let mut wf = Workflow::with_config(
        strings(&["name"]),
        strings(&["x", "y"]),
        strings(&["label"]),
        config,
    )
    .unwrap();
    wf.add_cont_preprocess(Normalize::new()).unwrap();
    wf.add_cat_preprocess(Categorify::new()).unwrap();
    wf.finalize().unwrap();
    wf
}

#[test]
fn test_normalize_categorify() {
    let rows = generate_rows(7);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    write_partitions(&input, &rows);
    let dataset = csv_dataset(&input);

    let mut wf = standard_workflow(config());
    wf.update_stats(&dataset).unwrap();
    assert_eq!(wf.state(), WorkflowState::StatsComputed);

    let xs: Vec<f64> = rows.iter().filter_map(|r| r.x).collect();
    let ys: Vec<f64> = rows.iter().map(|r| r.y).collect();
    let (x_mean, x_std) = mean_std(&xs);
    let (y_mean, y_std) = mean_std(&ys);
    let stats = wf.stats().clone();
    assert_close(stats.means["x"], x_mean, 1e-9);
    assert_close(stats.stds["x"], x_std, 1e-9);
    assert_close(stats.means["y"], y_mean, 1e-9);
    assert_close(stats.stds["y"], y_std, 1e-9);

    // Categories in first-seen order behind the null sentinel.
    let mut expected_vocab = Vec::new();
    let mut seen = HashSet::new();
    for row in &rows {
        if seen.insert(row.name.clone()) {
            expected_vocab.push(row.name.clone());
        }
    }
    let vocab = &stats.encoders["name"];
    assert_eq!(vocab.categories()[0], FlexType::Undefined);
    let actual_vocab: Vec<String> = vocab.categories()[1..]
        .iter()
        .map(|c| match c {
            FlexType::String(s) => s.to_string(),
            other => panic!("unexpected category {:?}", other),
        })
        .collect();
    assert_eq!(actual_vocab, expected_vocab);

    let out = dir.path().join("out");
    let manifest = wf.write_to_dataset(&out, &dataset, 10, true, true).unwrap();
    assert_eq!(wf.state(), WorkflowState::Done);
    assert_eq!(manifest.num_files(), 10);
    assert_eq!(manifest.total_rows, NUM_ROWS as u64);
    assert!(out.join("_metadata.json").exists());

    let written = materialize_sync(parquet_dataset(&out).stream())
        .unwrap()
        .unwrap();
    assert_eq!(written.num_rows(), NUM_ROWS);
    assert_eq!(written.names(), wf.final_columns().unwrap());

    let x_out = floats(&written, "x");
    assert_eq!(
        x_out.iter().filter(|v| v.is_none()).count(),
        rows.iter().filter(|r| r.x.is_none()).count()
    );
    let x_norm: Vec<f64> = x_out.into_iter().flatten().collect();
    let (m, s) = mean_std(&x_norm);
    assert!(m.abs() < 1e-9);
    assert_close(s, 1.0, 1e-9);

    let codes = ints(&written, "name");
    assert!(codes
        .iter()
        .all(|c| matches!(c, Some(c) if *c >= 1 && (*c as usize) < vocab.len())));
}

#[test]
fn test_fill_log_and_hash() {
    let rows = generate_rows(11);
    let dir = tempfile::tempdir().unwrap();
    write_partitions(dir.path(), &rows);
    let dataset = csv_dataset(dir.path());
    let first = materialize_sync(dataset.partition_stream(0).unwrap())
        .unwrap()
        .unwrap();
    let originals = floats(&first, "x");

    let mut fill = Workflow::with_config(
        strings(&["name"]),
        strings(&["x"]),
        strings(&["label"]),
        config(),
    )
    .unwrap();
    fill.add_cont_feature(FillMissing::with_value(42.0)).unwrap();
    fill.finalize().unwrap();
    fill.update_stats(&dataset).unwrap();
    let filled = floats(&fill.transform_chunk(first.clone()).unwrap(), "x");
    assert!(originals.iter().any(|v| v.is_none()));
    for (orig, out) in originals.iter().zip(&filled) {
        assert_eq!(*out, Some(orig.unwrap_or(42.0)));
    }

    let mut chained = Workflow::with_config(
        strings(&["name"]),
        strings(&["x"]),
        strings(&["label"]),
        config(),
    )
    .unwrap();
    let chain: Vec<Operator> = vec![FillMissing::with_value(42.0).into(), LogOp::new().into()];
    chained.add_cont_feature(chain).unwrap();
    chained
        .add_cat_preprocess(HashBucket::with_buckets(Buckets::Global(10)))
        .unwrap();
    chained.finalize().unwrap();
    chained.update_stats(&dataset).unwrap();

    let out = chained.transform_chunk(first.clone()).unwrap();
    for (orig, out) in originals.iter().zip(floats(&out, "x")) {
        let expected = orig.unwrap_or(42.0).ln_1p();
        let out = out.unwrap();
        assert!(
            (out.is_nan() && expected.is_nan()) || (out - expected).abs() < 1e-12,
            "{} != {}",
            out,
            expected
        );
    }

    let buckets = ints(&out, "name");
    assert!(buckets.iter().all(|b| matches!(b, Some(b) if (0..10).contains(b))));
    let distinct: HashSet<_> = buckets.iter().collect();
    assert!(distinct.len() > 1);
    let again = chained.transform_chunk(first).unwrap();
    assert_eq!(ints(&again, "name"), buckets);
}

#[test]
fn test_stats_across_levels() {
    let rows = generate_rows(5);
    let dir = tempfile::tempdir().unwrap();
    write_partitions(dir.path(), &rows);
    let dataset = csv_dataset(dir.path());

    // Min/max of x after normalization needs a second pass.
    let mut wf = Workflow::with_config(
        strings(&["name"]),
        strings(&["x"]),
        strings(&["label"]),
        config(),
    )
    .unwrap();
    wf.add_cont_feature(Normalize::new()).unwrap();
    wf.add_cont_preprocess(MinMax::new()).unwrap();
    wf.finalize().unwrap();
    wf.update_stats(&dataset).unwrap();

    let xs: Vec<f64> = rows.iter().filter_map(|r| r.x).collect();
    let (mean, std) = mean_std(&xs);
    let min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    match (&wf.stats().mins["x"], &wf.stats().maxs["x"]) {
        (FlexType::Float(lo), FlexType::Float(hi)) => {
            assert_close(*lo, (min - mean) / std, 1e-9);
            assert_close(*hi, (max - mean) / std, 1e-9);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_dropna_then_fill_median() {
    let rows = generate_rows(3);
    let dir = tempfile::tempdir().unwrap();
    write_partitions(dir.path(), &rows);
    let dataset = csv_dataset(dir.path());

    let mut wf = Workflow::with_config(
        strings(&["name"]),
        strings(&["x", "y"]),
        strings(&["label"]),
        config(),
    )
    .unwrap();
    wf.add_feature(Dropna::new()).unwrap();
    wf.add_cont_preprocess(Normalize::on(["y"])).unwrap();
    wf.add_cont_preprocess(FillMedian::on(["x"])).unwrap();
    wf.finalize().unwrap();
    wf.update_stats(&dataset).unwrap();

    // Moments of y are taken over the rows that survive the filter.
    let kept: Vec<&Row> = rows.iter().filter(|r| r.x.is_some()).collect();
    let (y_mean, y_std) = mean_std(&kept.iter().map(|r| r.y).collect::<Vec<_>>());
    assert_close(wf.stats().means["y"], y_mean, 1e-9);
    assert_close(wf.stats().stds["y"], y_std, 1e-9);

    let mut xs: Vec<f64> = kept.iter().filter_map(|r| r.x).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = wf.stats().medians["x"];
    let rank = xs.partition_point(|v| *v < median) as f64;
    let n = xs.len() as f64;
    assert!((rank - n / 2.0).abs() <= 0.01 * n, "rank {} of {}", rank, n);

    let out = dir.path().join("out");
    let manifest = wf.write_to_dataset(&out, &dataset, 2, false, true).unwrap();
    assert_eq!(manifest.total_rows, kept.len() as u64);
}

#[test]
fn test_save_clear_load() {
    let rows = generate_rows(13);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    write_partitions(&input, &rows);
    let dataset = csv_dataset(&input);

    let mut wf = standard_workflow(config());
    wf.update_stats(&dataset).unwrap();
    let before: Stats = wf.stats().clone();
    let first = dir.path().join("stats.json");
    wf.save_stats(&first).unwrap();

    wf.clear_stats();
    assert_eq!(wf.state(), WorkflowState::Finalized);
    assert!(wf.stats().is_empty());
    let chunk = materialize_sync(dataset.partition_stream(0).unwrap())
        .unwrap()
        .unwrap();
    assert!(wf.transform_chunk(chunk.clone()).is_err());

    wf.load_stats(&first).unwrap();
    assert_eq!(wf.state(), WorkflowState::StatsComputed);
    assert_eq!(wf.stats(), &before);
    assert!(wf.transform_chunk(chunk).is_ok());

    let second = dir.path().join("stats2.json");
    wf.save_stats(&second).unwrap();
    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn test_failed_update_keeps_stats() {
    let rows = generate_rows(19);
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good");
    write_partitions(&good, &rows);

    let mut wf = standard_workflow(config());
    wf.update_stats(&csv_dataset(&good)).unwrap();
    let before = wf.stats().clone();

    let bad = dir.path().join("bad");
    write_partitions(&bad, &rows);
    std::fs::write(
        bad.join("part9.csv"),
        "id,x,y,name,label\n1,1.5,2.0,a,0\n2,abc,3.0,b,1\n",
    )
    .unwrap();
    let result = wf.update_stats(&csv_dataset(&bad));
    assert!(matches!(result, Err(TabflowError::Data(_))), "{:?}", result);
    assert_eq!(wf.stats(), &before);
    assert_eq!(wf.state(), WorkflowState::StatsComputed);
}

#[test]
fn test_parallel_matches_sequential() {
    let rows = generate_rows(23);
    let dir = tempfile::tempdir().unwrap();
    write_partitions(dir.path(), &rows);
    let dataset = csv_dataset(dir.path());

    let mut sequential = standard_workflow(config());
    sequential.update_stats(&dataset).unwrap();
    let mut rerun = standard_workflow(config());
    rerun.update_stats(&dataset).unwrap();
    let mut parallel = standard_workflow(WorkflowConfig {
        num_workers: 3,
        ..config()
    });
    parallel.update_stats(&dataset).unwrap();

    assert_eq!(sequential.stats(), rerun.stats());
    assert_eq!(sequential.stats(), parallel.stats());
}

#[test]
fn test_write_requires_stats() {
    let rows = generate_rows(29);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    write_partitions(&input, &rows);
    let dataset = csv_dataset(&input);
    let out = dir.path().join("out");

    let mut wf = standard_workflow(config());
    assert!(matches!(
        wf.write_to_dataset(&out, &dataset, 2, true, true),
        Err(TabflowError::Configuration(_))
    ));

    // Loaded stats that miss the plan's entries fail before any output.
    let empty = dir.path().join("empty.json");
    Stats::new().save(&empty).unwrap();
    wf.load_stats(&empty).unwrap();
    assert!(matches!(
        wf.write_to_dataset(&out, &dataset, 2, true, true),
        Err(TabflowError::StatsNotReady { .. })
    ));
    assert!(!out.exists());
}

#[test]
fn test_apply_online_stream() {
    let rows = generate_rows(31);
    let dir = tempfile::tempdir().unwrap();
    write_partitions(dir.path(), &rows);
    let dataset = csv_dataset(dir.path());

    let mut wf = standard_workflow(config());
    let output = wf
        .apply(
            &dataset,
            ApplyOptions {
                apply_offline: false,
                ..ApplyOptions::default()
            },
        )
        .unwrap();
    let stream = match output {
        ApplyOutput::Stream(stream) => stream,
        other => panic!("expected a stream, got {:?}", other),
    };
    let chunk = materialize_sync(stream).unwrap().unwrap();
    assert_eq!(chunk.num_rows(), NUM_ROWS);
    assert_eq!(chunk.names(), wf.final_columns().unwrap());
    let labels = ints(&chunk, "label");
    let expected: Vec<Option<i64>> = rows.iter().map(|r| Some(r.label)).collect();
    assert_eq!(labels, expected);
}

#[test]
fn test_failed_apply_keeps_stats() {
    let rows = generate_rows(37);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    write_partitions(&input, &rows);
    let dataset = csv_dataset(&input);

    // A regular file where the output directory should go.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let options = ApplyOptions {
        output_path: Some(blocker.join("out")),
        num_out_files: 2,
        ..ApplyOptions::default()
    };

    let mut wf = standard_workflow(config());
    let result = wf.apply(&dataset, options.clone());
    assert!(matches!(result, Err(TabflowError::Io(_))), "{:?}", result);
    assert_eq!(wf.state(), WorkflowState::Finalized);
    assert!(wf.stats().is_empty());

    let other = dir.path().join("other");
    write_partitions(&other, &generate_rows(38));
    wf.update_stats(&csv_dataset(&other)).unwrap();
    let before = wf.stats().clone();
    assert!(wf.apply(&dataset, options).is_err());
    assert_eq!(wf.state(), WorkflowState::StatsComputed);
    assert_eq!(wf.stats(), &before);
}

#[test]
fn test_non_finite_stats_fail_update() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("part0.csv"),
        "id,x,y,name,label\n0,-1.0,1.0,a,0\n1,2.0,2.0,b,1\n2,3.0,3.0,a,0\n",
    )
    .unwrap();
    let dataset = csv_dataset(dir.path());

    let mut wf = Workflow::with_config(
        strings(&["name"]),
        strings(&["x"]),
        strings(&["label"]),
        config(),
    )
    .unwrap();
    wf.add_cont_feature(LogOp::new()).unwrap();
    wf.add_cont_preprocess(Normalize::new()).unwrap();
    wf.finalize().unwrap();

    // ln(1 + -1) is -inf, which has no mean.
    let result = wf.update_stats(&dataset);
    assert!(matches!(result, Err(TabflowError::Data(_))), "{:?}", result);
    assert!(wf.stats().is_empty());
    assert_eq!(wf.state(), WorkflowState::Finalized);
}

#[test]
fn test_failed_write_leaves_no_output() {
    let rows = generate_rows(41);
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good");
    write_partitions(&good, &rows);

    let mut wf = standard_workflow(config());
    wf.update_stats(&csv_dataset(&good)).unwrap();

    let bad = dir.path().join("bad");
    write_partitions(&bad, &rows);
    std::fs::write(
        bad.join("part9.csv"),
        "id,x,y,name,label\n1,1.5,2.0,a,0\n2,abc,3.0,b,1\n",
    )
    .unwrap();
    let out = dir.path().join("out");
    let result = wf.write_to_dataset(&out, &csv_dataset(&bad), 4, true, true);
    assert!(matches!(result, Err(TabflowError::Data(_))), "{:?}", result);
    assert_eq!(wf.state(), WorkflowState::StatsComputed);

    assert!(!out.join("_metadata.json").exists());
    let leftovers: Vec<String> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}
