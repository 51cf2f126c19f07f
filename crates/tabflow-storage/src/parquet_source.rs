//! Chunked Parquet reading through the arrow record batch reader.

use std::fs::File;
use std::path::{Path, PathBuf};

use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

use crate::convert::{record_batch_to_chunk, schema_from_arrow};

fn open_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path)?;
    ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| TabflowError::Format(format!("{}: {}", path.display(), e)))
}

/// Chunk schema of a Parquet file, read from its footer.
pub fn read_schema(path: &Path) -> Result<Vec<(String, FlexTypeEnum)>> {
    let builder = open_builder(path)?;
    schema_from_arrow(builder.schema())
}

/// Iterator over the chunks of one Parquet partition.
pub struct ParquetChunkReader {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
}

impl ParquetChunkReader {
    pub fn open(path: &Path, chunk_rows: usize) -> Result<Self> {
        let reader = open_builder(path)?
            .with_batch_size(chunk_rows.max(1))
            .build()
            .map_err(|e| TabflowError::Format(format!("{}: {}", path.display(), e)))?;
        Ok(ParquetChunkReader {
            path: path.to_path_buf(),
            reader,
        })
    }
}

impl Iterator for ParquetChunkReader {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.reader.next()?;
        Some(
            batch
                .map_err(|e| TabflowError::Data(format!("{}: {}", self.path.display(), e)))
                .and_then(|b| record_batch_to_chunk(&b)),
        )
    }
}
