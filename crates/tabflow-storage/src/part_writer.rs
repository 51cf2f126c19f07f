//! Writer for one output partition file.
//!
//! Rows are written to `<path>.tmp` as a sequence of Parquet row groups,
//! one per call to [`PartWriter::write_row_group`]. The file only appears
//! under its final name once [`PartWriter::finish`] has closed it.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, warn};

use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

use crate::convert::{arrow_schema, chunk_to_record_batch};

pub struct PartWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    schema: Vec<(String, FlexTypeEnum)>,
    arrow_schema: SchemaRef,
    writer: Option<ArrowWriter<BufWriter<File>>>,
    rows_written: u64,
    row_groups: usize,
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn parquet_err(path: &Path, e: parquet::errors::ParquetError) -> TabflowError {
    match e {
        parquet::errors::ParquetError::External(inner) => TabflowError::Io(std::io::Error::other(
            format!("{}: {}", path.display(), inner),
        )),
        other => TabflowError::Format(format!("{}: {}", path.display(), other)),
    }
}

impl PartWriter {
    /// Create the temp file for `path` with the given schema.
    pub fn create(path: impl Into<PathBuf>, schema: &[(String, FlexTypeEnum)]) -> Result<Self> {
        let path = path.into();
        let tmp_path = tmp_path_for(&path);
        let arrow_schema = arrow_schema(schema);
        let file = File::create(&tmp_path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(BufWriter::new(file), arrow_schema.clone(), Some(props))
            .map_err(|e| parquet_err(&tmp_path, e))?;
        Ok(PartWriter {
            path,
            tmp_path,
            schema: schema.to_vec(),
            arrow_schema,
            writer: Some(writer),
            rows_written: 0,
            row_groups: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn row_groups(&self) -> usize {
        self.row_groups
    }

    /// Write `chunk` as one row group. Empty chunks are skipped.
    pub fn write_row_group(&mut self, chunk: &Chunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if chunk.schema() != self.schema {
            return Err(TabflowError::Type(format!(
                "{}: chunk schema {:?} does not match file schema {:?}",
                self.path.display(),
                chunk.schema(),
                self.schema
            )));
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            TabflowError::Format(format!("{}: writer already closed", self.path.display()))
        })?;
        let batch = chunk_to_record_batch(chunk, &self.arrow_schema)?;
        writer
            .write(&batch)
            .map_err(|e| parquet_err(&self.tmp_path, e))?;
        writer.flush().map_err(|e| parquet_err(&self.tmp_path, e))?;
        self.rows_written += chunk.num_rows() as u64;
        self.row_groups += 1;
        debug!(path = %self.path.display(), rows = chunk.num_rows(), "wrote row group");
        Ok(())
    }

    /// Close the file and move it to its final name.
    pub fn finish(mut self) -> Result<PathBuf> {
        let writer = self.writer.take().ok_or_else(|| {
            TabflowError::Format(format!("{}: writer already closed", self.path.display()))
        })?;
        if let Err(e) = writer.close() {
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(parquet_err(&self.tmp_path, e));
        }
        if let Err(e) = std::fs::rename(&self.tmp_path, &self.path) {
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(e.into());
        }
        Ok(self.path.clone())
    }

    /// Drop the partially written file.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.tmp_path) {
                warn!(path = %self.tmp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

impl Drop for PartWriter {
    fn drop(&mut self) {
        self.discard();
    }
}
