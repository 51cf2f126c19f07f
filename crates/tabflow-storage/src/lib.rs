//! Storage layer for tabflow.
//!
//! Partitioned datasets are read lazily, one bounded [`Chunk`] at a time,
//! from CSV or Parquet files. Output partitions are written as Parquet
//! files, one row group per flush, and summarised by a [`Manifest`].
//!
//! [`Chunk`]: tabflow_types::chunk::Chunk
//! [`Manifest`]: manifest::Manifest

pub mod convert;
pub mod csv_source;
pub mod dataset;
pub mod manifest;
pub mod parquet_source;
pub mod part_writer;
pub mod stream;
