//! Output dataset manifest.
//!
//! Summarises the written partition files by reading back their Parquet
//! footers, and is stored next to them as `_metadata.json`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

use crate::convert::schema_from_arrow;

/// Name of the manifest file inside an output directory.
pub const MANIFEST_FILE_NAME: &str = "_metadata.json";

/// Per-file entry of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub num_rows: u64,
    pub num_row_groups: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Keyed by file name relative to the output directory.
    pub files: BTreeMap<String, FileEntry>,
    pub schema: Vec<(String, FlexTypeEnum)>,
    pub total_rows: u64,
}

impl Manifest {
    /// Build a manifest by reading the footer of each file in `dir`.
    ///
    /// Every file must carry the same schema.
    pub fn from_files(dir: &Path, file_names: &[String]) -> Result<Self> {
        let mut manifest = Manifest::default();
        for name in file_names {
            let path = dir.join(name);
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)
                .map_err(|e| TabflowError::Format(format!("{}: {}", path.display(), e)))?;
            let schema = schema_from_arrow(builder.schema())?;
            let metadata = builder.metadata();
            let entry = FileEntry {
                num_rows: metadata.file_metadata().num_rows() as u64,
                num_row_groups: metadata.num_row_groups(),
                columns: schema.iter().map(|(n, _)| n.clone()).collect(),
            };
            if manifest.files.is_empty() {
                manifest.schema = schema;
            } else if manifest.schema != schema {
                return Err(TabflowError::Format(format!(
                    "{}: schema {:?} differs from {:?}",
                    path.display(),
                    schema,
                    manifest.schema
                )));
            }
            manifest.total_rows += entry.num_rows;
            manifest.files.insert(name.clone(), entry);
        }
        Ok(manifest)
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Write the manifest to `<dir>/_metadata.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(path)
    }

    /// Read the manifest of an output directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(dir.join(MANIFEST_FILE_NAME))?);
        Ok(serde_json::from_reader(reader)?)
    }
}
