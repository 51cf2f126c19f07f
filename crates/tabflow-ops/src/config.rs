//! Configuration for one workflow run.
//!
//! Controls chunk sizing, the shuffled writer's memory bound, the number
//! of partition workers and the accuracy of the streaming median.

use tabflow_types::error::{Result, TabflowError};

/// Configuration for a workflow.
///
/// [`WorkflowConfig::default()`] reads the process-wide knobs from
/// `tabflow_config`, so environment overrides apply.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Rows per chunk requested from the readers.
    pub chunk_rows: usize,

    /// Rows buffered per output file before a row group is flushed. Peak
    /// buffered memory is bounded by `num_out_files * shuffle_buffer_rows`
    /// rows plus one chunk.
    pub shuffle_buffer_rows: usize,

    /// Partitions processed concurrently during the statistics pass.
    pub num_workers: usize,

    /// Rank error bound of the median sketch, as a fraction of the count.
    pub quantile_epsilon: f64,

    /// Seed for the shuffled writer. `None` seeds from the OS.
    pub shuffle_seed: Option<u64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            chunk_rows: tabflow_config::get_chunk_rows(),
            shuffle_buffer_rows: tabflow_config::get_shuffle_buffer_rows(),
            num_workers: tabflow_config::get_num_workers(),
            quantile_epsilon: 0.001,
            shuffle_seed: None,
        }
    }
}

impl WorkflowConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Reject values no pass can run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 || self.shuffle_buffer_rows == 0 || self.num_workers == 0 {
            return Err(TabflowError::Configuration(format!(
                "chunk_rows, shuffle_buffer_rows and num_workers must be positive: {:?}",
                self
            )));
        }
        if !(self.quantile_epsilon > 0.0 && self.quantile_epsilon < 1.0) {
            return Err(TabflowError::Configuration(format!(
                "quantile_epsilon must be in (0, 1), got {}",
                self.quantile_epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WorkflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shuffle_seed, None);
        assert_eq!(config.with_seed(7).shuffle_seed, Some(7));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = WorkflowConfig::default();
        config.quantile_epsilon = 0.0;
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::default();
        config.num_workers = 0;
        assert!(config.validate().is_err());
    }
}
