//! Columns, statistics and operators for tabflow workflows.
//!
//! [`columns`] tracks which names every operator reads and writes,
//! [`stats`] holds finalized statistics, [`algorithms`] the mergeable
//! aggregators behind the stat operators, and [`ops`] the operator
//! catalogue itself.

pub mod algorithms;
pub mod columns;
pub mod config;
pub mod hashing;
pub mod ops;
pub mod stats;
pub mod vocabulary;
