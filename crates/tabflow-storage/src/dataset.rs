//! Partitioned input datasets.
//!
//! A dataset is a list of partition files in one format. Partitions are
//! kept in lexicographic path order; every consumer that merges partial
//! results across partitions relies on that order for determinism.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use futures::stream::{self, StreamExt};
use tracing::debug;

use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

use crate::csv_source::{self, CsvChunkReader, CsvOptions};
use crate::parquet_source::{self, ParquetChunkReader};
use crate::stream::{stream_from_iter, ChunkStream};

/// On-disk format of every partition of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum FileFormat {
    Csv(CsvOptions),
    Parquet,
}

impl FileFormat {
    /// CSV with a header row and `,` as delimiter.
    pub fn csv() -> Self {
        FileFormat::Csv(CsvOptions::default())
    }
}

/// A partitioned dataset read lazily, one chunk at a time.
#[derive(Debug, Clone)]
pub struct Dataset {
    paths: Vec<PathBuf>,
    format: FileFormat,
    columns: Option<Vec<String>>,
    dtype_hints: BTreeMap<String, FlexTypeEnum>,
    chunk_rows: usize,
    file_schema: Arc<OnceLock<Vec<(String, FlexTypeEnum)>>>,
}

impl Dataset {
    /// Create a dataset over the given partition files.
    pub fn new<I, P>(paths: I, format: FileFormat) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        paths.sort();
        paths.dedup();
        Dataset {
            paths,
            format,
            columns: None,
            dtype_hints: BTreeMap::new(),
            chunk_rows: tabflow_config::get_chunk_rows(),
            file_schema: Arc::new(OnceLock::new()),
        }
    }

    /// Create a dataset from every file in `dir` with the given extension.
    pub fn from_dir(dir: &Path, extension: &str, format: FileFormat) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == extension) {
                paths.push(path);
            }
        }
        Ok(Dataset::new(paths, format))
    }

    /// Restrict reads to these columns, in this order.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Force the type of a CSV column instead of inferring it.
    pub fn with_dtype(mut self, column: &str, dtype: FlexTypeEnum) -> Self {
        self.dtype_hints.insert(column.to_string(), dtype);
        self.file_schema = Arc::new(OnceLock::new());
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn num_partitions(&self) -> usize {
        self.paths.len()
    }

    pub fn format(&self) -> &FileFormat {
        &self.format
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Schema of the underlying files, before column selection.
    ///
    /// For CSV this is resolved once per dataset from the first chunk of
    /// the first partition and enforced for every other chunk.
    pub fn file_schema(&self) -> Result<Vec<(String, FlexTypeEnum)>> {
        if let Some(schema) = self.file_schema.get() {
            return Ok(schema.clone());
        }
        let first = self.paths.first().ok_or_else(|| {
            TabflowError::Configuration("Dataset has no partitions".to_string())
        })?;
        let schema = match &self.format {
            FileFormat::Csv(options) => {
                csv_source::infer_schema(first, options, self.chunk_rows, &self.dtype_hints)?
            }
            FileFormat::Parquet => parquet_source::read_schema(first)?,
        };
        debug!(path = %first.display(), ?schema, "resolved dataset schema");
        let _ = self.file_schema.set(schema.clone());
        Ok(schema)
    }

    /// Schema of the chunks this dataset yields.
    pub fn schema(&self) -> Result<Vec<(String, FlexTypeEnum)>> {
        let schema = self.file_schema()?;
        match &self.columns {
            None => Ok(schema),
            Some(columns) => columns
                .iter()
                .map(|c| {
                    schema
                        .iter()
                        .find(|(n, _)| n == c)
                        .cloned()
                        .ok_or_else(|| {
                            TabflowError::Configuration(format!(
                                "Column '{}' not found in dataset",
                                c
                            ))
                        })
                })
                .collect(),
        }
    }

    /// Synchronous chunk iterator over one partition.
    pub fn partition_iter(
        &self,
        index: usize,
    ) -> Result<Box<dyn Iterator<Item = Result<Chunk>> + Send>> {
        let path = self.paths.get(index).ok_or_else(|| {
            TabflowError::Configuration(format!(
                "Partition index {} out of range ({})",
                index,
                self.paths.len()
            ))
        })?;
        debug!(partition = index, path = %path.display(), "opening partition");
        let iter: Box<dyn Iterator<Item = Result<Chunk>> + Send> = match &self.format {
            FileFormat::Csv(options) => Box::new(CsvChunkReader::open(
                path,
                options,
                self.file_schema()?,
                self.chunk_rows,
            )?),
            FileFormat::Parquet => Box::new(ParquetChunkReader::open(path, self.chunk_rows)?),
        };
        match self.columns.clone() {
            None => Ok(iter),
            Some(columns) => Ok(Box::new(
                iter.map(move |chunk| chunk.and_then(|c| c.select(&columns))),
            )),
        }
    }

    /// Lazy stream over one partition, in file order.
    pub fn partition_stream(&self, index: usize) -> Result<ChunkStream> {
        Ok(stream_from_iter(self.partition_iter(index)?))
    }

    /// Lazy stream over every partition in partition order. Each
    /// partition is opened only when the previous one is exhausted.
    pub fn stream(&self) -> ChunkStream {
        let dataset = self.clone();
        Box::pin(
            stream::iter(0..self.paths.len())
                .map(move |i| match dataset.partition_stream(i) {
                    Ok(s) => s,
                    Err(e) => Box::pin(stream::once(async move { Err(e) })) as ChunkStream,
                })
                .flatten(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::materialize_sync;
    use tabflow_types::flex_type::FlexType;

    #[test]
    fn test_paths_are_sorted() {
        let ds = Dataset::new(["b.csv", "a.csv", "c.csv", "a.csv"], FileFormat::csv());
        let names: Vec<_> = ds.paths().iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.csv"]);
    }

    #[test]
    fn test_stream_reads_all_partitions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p1.csv"), "v,w\n3,c\n4,d\n").unwrap();
        std::fs::write(dir.path().join("p0.csv"), "v,w\n1,a\n2,b\n").unwrap();

        let ds = Dataset::from_dir(dir.path(), "csv", FileFormat::csv())
            .unwrap()
            .with_chunk_rows(1)
            .with_columns(vec!["v".to_string()]);
        assert_eq!(ds.num_partitions(), 2);
        assert_eq!(ds.schema().unwrap(), vec![("v".to_string(), FlexTypeEnum::Integer)]);

        let all = materialize_sync(ds.stream()).unwrap().unwrap();
        let values: Vec<FlexType> = all.to_rows().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            values,
            vec![
                FlexType::Integer(1),
                FlexType::Integer(2),
                FlexType::Integer(3),
                FlexType::Integer(4)
            ]
        );
    }

    #[test]
    fn test_schema_from_first_partition_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "v\n1\n").unwrap();
        std::fs::write(dir.path().join("b.csv"), "v\n1.5\n").unwrap();
        let ds = Dataset::from_dir(dir.path(), "csv", FileFormat::csv()).unwrap();
        assert!(matches!(
            materialize_sync(ds.stream()),
            Err(TabflowError::Data(_))
        ));

        let ds = ds.with_dtype("v", FlexTypeEnum::Float);
        let all = materialize_sync(ds.stream()).unwrap().unwrap();
        assert_eq!(all.num_rows(), 2);
    }

    #[test]
    fn test_unknown_column_selection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "v\n1\n").unwrap();
        let ds = Dataset::from_dir(dir.path(), "csv", FileFormat::csv())
            .unwrap()
            .with_columns(vec!["nope".to_string()]);
        assert!(matches!(ds.schema(), Err(TabflowError::Configuration(_))));
    }
}
