//! Shared fixture: a seeded, three-partition CSV dataset.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tabflow::{Dataset, FileFormat};

pub const NUM_ROWS: usize = 4321;
pub const PARTITION_ENDS: [usize; 3] = [1500, 3000, NUM_ROWS];

#[derive(Debug, Clone)]
pub struct Row {
    pub id: i64,
    pub x: Option<f64>,
    pub y: f64,
    pub name: String,
    pub label: i64,
}

pub fn generate_rows(seed: u64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..NUM_ROWS)
        .map(|i| Row {
            id: i as i64,
            x: if rng.random_bool(0.1) {
                None
            } else {
                Some(rng.random_range(-10.0..10.0))
            },
            y: rng.random_range(0.5..100.0),
            name: format!("n{}", rng.random_range(0..50)),
            label: rng.random_range(0..2),
        })
        .collect()
}

fn write_csv(path: &Path, rows: &[Row]) {
    let mut text = String::from("id,x,y,name,label\n");
    for row in rows {
        let x = row.x.map(|v| format!("{:?}", v)).unwrap_or_default();
        writeln!(text, "{},{},{:?},{},{}", row.id, x, row.y, row.name, row.label).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// Write `rows` as `part0.csv`, `part1.csv`, `part2.csv` under `dir`.
pub fn write_partitions(dir: &Path, rows: &[Row]) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    let mut start = 0;
    let mut paths = Vec::new();
    for (p, end) in PARTITION_ENDS.iter().enumerate() {
        let path = dir.join(format!("part{}.csv", p));
        write_csv(&path, &rows[start..*end]);
        paths.push(path);
        start = *end;
    }
    paths
}

pub fn csv_dataset(dir: &Path) -> Dataset {
    Dataset::from_dir(dir, "csv", FileFormat::csv())
        .unwrap()
        .with_chunk_rows(500)
}

pub fn parquet_dataset(dir: &Path) -> Dataset {
    Dataset::from_dir(dir, "parquet", FileFormat::Parquet).unwrap()
}

pub fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// Sample mean and standard deviation (n - 1 denominator).
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol * expected.abs().max(1.0),
        "{} != {}",
        actual,
        expected
    );
}
