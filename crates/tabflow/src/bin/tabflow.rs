//! Command line runner for pipeline definitions.
//!
//! ```sh
//! tabflow --pipeline pipeline.json --format csv --stats-out stats.json \
//!     --num-out-files 10 --output out/ data/part-*.csv
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use tabflow::{Dataset, FileFormat, PipelineDefinition, Result, WorkflowConfig};
use tabflow_storage::csv_source::CsvOptions;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputFormat {
    Csv,
    Parquet,
}

#[derive(Parser, Debug)]
#[command(about = "Compute statistics and write a transformed, shuffled dataset")]
struct Args {
    /// Pipeline definition (JSON).
    #[arg(long)]
    pipeline: PathBuf,

    /// Format of the input partitions.
    #[arg(long, value_enum, default_value_t = InputFormat::Csv)]
    format: InputFormat,

    /// CSV input has no header row; columns are named by the pipeline in
    /// categorical, continuous, label order.
    #[arg(long, default_value_t = false)]
    no_header: bool,

    /// Load statistics from this file instead of computing them.
    #[arg(long)]
    stats_in: Option<PathBuf>,

    /// Save the statistics to this file.
    #[arg(long)]
    stats_out: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    num_out_files: usize,

    /// Assign whole chunks to output files round-robin.
    #[arg(long, default_value_t = false)]
    no_shuffle: bool,

    /// Rows per chunk (accepts K/M/G suffixes).
    #[arg(long, value_parser = tabflow_config::parse_count)]
    chunk_rows: Option<usize>,

    /// Partitions processed concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for the output shuffle.
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory.
    #[arg(long)]
    output: PathBuf,

    /// Input partition files.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn run(args: Args) -> Result<()> {
    let definition = PipelineDefinition::load(&args.pipeline)?;

    if let Some(rows) = args.chunk_rows {
        tabflow_config::set_chunk_rows(rows);
    }
    if let Some(workers) = args.workers {
        tabflow_config::set_num_workers(workers);
    }
    let mut config = WorkflowConfig::default();
    config.shuffle_seed = args.seed;

    let format = match args.format {
        InputFormat::Parquet => FileFormat::Parquet,
        InputFormat::Csv if args.no_header => FileFormat::Csv(CsvOptions {
            has_header: false,
            names: Some(
                definition
                    .categorical
                    .iter()
                    .chain(&definition.continuous)
                    .chain(&definition.label)
                    .cloned()
                    .collect(),
            ),
            ..CsvOptions::default()
        }),
        InputFormat::Csv => FileFormat::csv(),
    };
    let dataset = Dataset::new(&args.files, format).with_chunk_rows(config.chunk_rows);
    info!(partitions = dataset.num_partitions(), "opened dataset");

    let mut workflow = definition.build_workflow(config)?;
    match &args.stats_in {
        Some(path) => workflow.load_stats(path)?,
        None => workflow.update_stats(&dataset)?,
    }
    if let Some(path) = &args.stats_out {
        workflow.save_stats(path)?;
    }

    let manifest = workflow.write_to_dataset(
        &args.output,
        &dataset,
        args.num_out_files,
        !args.no_shuffle,
        true,
    )?;
    for (name, entry) in &manifest.files {
        info!(
            file = %name,
            rows = entry.num_rows,
            row_groups = entry.num_row_groups,
            "output file"
        );
    }
    info!(
        files = manifest.num_files(),
        rows = manifest.total_rows,
        columns = ?manifest.schema.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tabflow failed");
            ExitCode::FAILURE
        }
    }
}
