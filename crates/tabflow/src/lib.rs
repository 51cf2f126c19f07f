//! Out-of-core feature engineering workflows.
//!
//! A [`Workflow`] declares categorical, continuous and label columns,
//! collects statistic and transform operators into a [`PipelinePlan`],
//! computes the statistics over a partitioned [`Dataset`] and writes the
//! transformed rows, shuffled across output files, next to a manifest.
//!
//! ```no_run
//! use tabflow::{Dataset, FileFormat, Workflow};
//! use tabflow::ops::{Categorify, Normalize};
//!
//! # fn main() -> tabflow::Result<()> {
//! let mut workflow = Workflow::new(
//!     vec!["name".into()],
//!     vec!["x".into()],
//!     vec!["label".into()],
//! )?;
//! workflow.add_preprocess(Normalize::new())?;
//! workflow.add_preprocess(Categorify::new())?;
//! workflow.finalize()?;
//!
//! let dataset = Dataset::from_dir("data".as_ref(), "csv", FileFormat::csv())?;
//! workflow.update_stats(&dataset)?;
//! let manifest = workflow.write_to_dataset("out".as_ref(), &dataset, 10, true, true)?;
//! println!("{} rows", manifest.total_rows);
//! # Ok(())
//! # }
//! ```

pub mod definition;
pub mod plan;
pub mod shuffle;
pub mod workflow;

pub use tabflow_ops::columns::{ColumnGroup, ColumnsContext};
pub use tabflow_ops::config::WorkflowConfig;
pub use tabflow_ops::ops;
pub use tabflow_ops::stats::{StatKind, Stats};
pub use tabflow_storage::dataset::{Dataset, FileFormat};
pub use tabflow_storage::manifest::Manifest;
pub use tabflow_types::chunk::{Chunk, ColumnData};
pub use tabflow_types::error::{Result, TabflowError};
pub use tabflow_types::flex_type::{FlexType, FlexTypeEnum};

pub use definition::{OpSpec, PipelineDefinition};
pub use plan::{Phase, PipelinePlan};
pub use shuffle::ShuffleWriter;
pub use workflow::{ApplyOptions, ApplyOutput, Workflow, WorkflowState};
