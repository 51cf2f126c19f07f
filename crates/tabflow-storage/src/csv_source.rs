//! Chunked CSV reading.
//!
//! Cells are parsed against a fixed per-dataset schema. Empty cells are
//! null; a non-empty cell that does not parse as its column's type is a
//! data error rather than a silent null.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{StringRecord, StringRecordsIntoIter};

use tabflow_types::chunk::{Chunk, ColumnData};
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

/// Options shared by every CSV partition of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvOptions {
    pub has_header: bool,
    pub delimiter: u8,
    /// Column names. Required when `has_header` is false; overrides the
    /// header otherwise.
    pub names: Option<Vec<String>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            has_header: true,
            delimiter: b',',
            names: None,
        }
    }
}

fn open_reader(path: &Path, options: &CsvOptions) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(options.has_header)
        .delimiter(options.delimiter)
        .from_path(path)
        .map_err(|e| csv_error(path, e))
}

fn csv_error(path: &Path, e: csv::Error) -> TabflowError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => TabflowError::Io(io),
        other => TabflowError::Data(format!("{}: {:?}", path.display(), other)),
    }
}

/// Column names of a CSV file: the explicit names, else its header.
fn column_names(reader: &mut csv::Reader<File>, path: &Path, options: &CsvOptions) -> Result<Vec<String>> {
    let header: Option<Vec<String>> = if options.has_header {
        Some(
            reader
                .headers()
                .map_err(|e| csv_error(path, e))?
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
        )
    } else {
        None
    };
    match (&options.names, header) {
        (Some(names), _) => Ok(names.clone()),
        (None, Some(header)) => Ok(header),
        (None, None) => Err(TabflowError::Configuration(format!(
            "{}: column names are required for a CSV file without a header",
            path.display()
        ))),
    }
}

/// Infer the schema of a CSV file from its first `sample_rows` records.
///
/// Per column: Integer if every non-empty cell parses as i64, else Float
/// if every one parses as f64, else String. A column with no non-empty
/// cell in the sample is String. `hints` override inference.
pub fn infer_schema(
    path: &Path,
    options: &CsvOptions,
    sample_rows: usize,
    hints: &BTreeMap<String, FlexTypeEnum>,
) -> Result<Vec<(String, FlexTypeEnum)>> {
    let mut reader = open_reader(path, options)?;
    let names = column_names(&mut reader, path, options)?;

    let mut can_int = vec![true; names.len()];
    let mut can_float = vec![true; names.len()];
    let mut seen = vec![false; names.len()];

    for record in reader.records().take(sample_rows) {
        let record = record.map_err(|e| csv_error(path, e))?;
        check_width(&record, names.len(), path)?;
        for (i, cell) in record.iter().enumerate() {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            seen[i] = true;
            if can_int[i] && cell.parse::<i64>().is_err() {
                can_int[i] = false;
            }
            if can_float[i] && cell.parse::<f64>().is_err() {
                can_float[i] = false;
            }
        }
    }

    Ok(names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let dtype = match hints.get(&name) {
                Some(&hint) => hint,
                None if !seen[i] => FlexTypeEnum::String,
                None if can_int[i] => FlexTypeEnum::Integer,
                None if can_float[i] => FlexTypeEnum::Float,
                None => FlexTypeEnum::String,
            };
            (name, dtype)
        })
        .collect())
}

fn check_width(record: &StringRecord, expected: usize, path: &Path) -> Result<()> {
    if record.len() != expected {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        return Err(TabflowError::Data(format!(
            "{}:{}: expected {} fields, found {}",
            path.display(),
            line,
            expected,
            record.len()
        )));
    }
    Ok(())
}

/// Iterator over the chunks of one CSV partition.
pub struct CsvChunkReader {
    path: PathBuf,
    records: StringRecordsIntoIter<File>,
    schema: Vec<(String, FlexTypeEnum)>,
    chunk_rows: usize,
    finished: bool,
}

impl CsvChunkReader {
    /// Open a partition for reading against a resolved schema.
    ///
    /// A header that disagrees with the schema is a data error, so all
    /// partitions of a dataset must agree on column order.
    pub fn open(
        path: &Path,
        options: &CsvOptions,
        schema: Vec<(String, FlexTypeEnum)>,
        chunk_rows: usize,
    ) -> Result<Self> {
        let mut reader = open_reader(path, options)?;
        let names = column_names(&mut reader, path, options)?;
        let expected: Vec<&str> = schema.iter().map(|(n, _)| n.as_str()).collect();
        if names.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(TabflowError::Data(format!(
                "{}: columns {:?} do not match dataset columns {:?}",
                path.display(),
                names,
                expected
            )));
        }
        Ok(CsvChunkReader {
            path: path.to_path_buf(),
            records: reader.into_records(),
            schema,
            chunk_rows: chunk_rows.max(1),
            finished: false,
        })
    }

    fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut columns: Vec<ColumnData> = self
            .schema
            .iter()
            .map(|(_, dt)| ColumnData::empty(*dt))
            .collect();
        let mut rows = 0;
        while rows < self.chunk_rows {
            let record = match self.records.next() {
                Some(r) => r.map_err(|e| csv_error(&self.path, e))?,
                None => {
                    self.finished = true;
                    break;
                }
            };
            check_width(&record, self.schema.len(), &self.path)?;
            for (i, cell) in record.iter().enumerate() {
                push_cell(&mut columns[i], cell.trim()).map_err(|msg| {
                    let line = record.position().map(|p| p.line()).unwrap_or(0);
                    TabflowError::Data(format!(
                        "{}:{}: column '{}': {}",
                        self.path.display(),
                        line,
                        self.schema[i].0,
                        msg
                    ))
                })?;
            }
            rows += 1;
        }
        if rows == 0 {
            return Ok(None);
        }
        let names = self.schema.iter().map(|(n, _)| n.clone()).collect();
        Chunk::new(names, columns).map(Some)
    }
}

fn push_cell(column: &mut ColumnData, cell: &str) -> std::result::Result<(), String> {
    match column {
        ColumnData::Integer(v) if cell.is_empty() => v.push(None),
        ColumnData::Float(v) if cell.is_empty() => v.push(None),
        ColumnData::String(v) if cell.is_empty() => v.push(None),
        ColumnData::Integer(v) => v.push(Some(
            cell.parse::<i64>()
                .map_err(|_| format!("'{}' is not an integer", cell))?,
        )),
        ColumnData::Float(v) => v.push(Some(
            cell.parse::<f64>()
                .map_err(|_| format!("'{}' is not a float", cell))?,
        )),
        ColumnData::String(v) => v.push(Some(Arc::from(cell))),
    }
    Ok(())
}

impl Iterator for CsvChunkReader {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
