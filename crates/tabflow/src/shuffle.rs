//! Bounded-memory shuffled writer.
//!
//! Rows are scattered into one buffer per output file. A buffer is
//! written out as one row group once it reaches the configured
//! threshold, so at most `num_files * buffer_rows` rows (plus the chunk
//! being scattered) are held in memory. Each buffer sits behind its own
//! lock; concurrent writers only contend when they hit the same file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use tabflow_storage::manifest::{Manifest, MANIFEST_FILE_NAME};
use tabflow_storage::part_writer::PartWriter;
use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

/// File name of output partition `index`.
pub fn part_file_name(index: usize) -> String {
    format!("part.{}.parquet", index)
}

struct OutputFile {
    writer: PartWriter,
    pending: Chunk,
}

pub struct ShuffleWriter {
    dir: PathBuf,
    schema: Vec<(String, FlexTypeEnum)>,
    files: Vec<Mutex<OutputFile>>,
    rng: Mutex<StdRng>,
    shuffle: bool,
    buffer_rows: usize,
    next_file: AtomicUsize,
    rows_in: AtomicU64,
}

impl ShuffleWriter {
    /// Create `num_files` output files in `dir` with the given schema.
    ///
    /// With `shuffle` every row goes to a random file and buffers are
    /// permuted before they are written; without it whole chunks are
    /// assigned to files round-robin and keep their row order.
    pub fn create(
        dir: &Path,
        schema: &[(String, FlexTypeEnum)],
        num_files: usize,
        shuffle: bool,
        buffer_rows: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if num_files == 0 {
            return Err(TabflowError::Configuration(
                "Number of output files must be positive".to_string(),
            ));
        }
        std::fs::create_dir_all(dir)?;
        let stale = dir.join(MANIFEST_FILE_NAME);
        if stale.exists() {
            std::fs::remove_file(&stale)?;
        }

        let mut files = Vec::with_capacity(num_files);
        for i in 0..num_files {
            // Already created writers discard their temp files on drop.
            let writer = PartWriter::create(dir.join(part_file_name(i)), schema)?;
            files.push(Mutex::new(OutputFile {
                writer,
                pending: Chunk::empty(schema),
            }));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(ShuffleWriter {
            dir: dir.to_path_buf(),
            schema: schema.to_vec(),
            files,
            rng: Mutex::new(rng),
            shuffle,
            buffer_rows: buffer_rows.max(1),
            next_file: AtomicUsize::new(0),
            rows_in: AtomicU64::new(0),
        })
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Rows accepted so far.
    pub fn rows_in(&self) -> u64 {
        self.rows_in.load(Ordering::Relaxed)
    }

    /// Scatter one chunk into the output buffers.
    pub fn write_chunk(&self, chunk: &Chunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if chunk.schema() != self.schema {
            return Err(TabflowError::Type(format!(
                "Chunk schema {:?} does not match output schema {:?}",
                chunk.schema(),
                self.schema
            )));
        }
        self.rows_in
            .fetch_add(chunk.num_rows() as u64, Ordering::Relaxed);

        if !self.shuffle {
            let index = self.next_file.fetch_add(1, Ordering::Relaxed) % self.files.len();
            return self.append(index, chunk);
        }

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); self.files.len()];
        {
            let mut rng = self.rng.lock();
            for row in 0..chunk.num_rows() {
                buckets[rng.random_range(0..self.files.len())].push(row);
            }
        }
        for (index, rows) in buckets.iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            self.append(index, &chunk.take(rows)?)?;
        }
        Ok(())
    }

    fn append(&self, index: usize, rows: &Chunk) -> Result<()> {
        let mut file = self.files[index].lock();
        file.pending.append(rows)?;
        if file.pending.num_rows() >= self.buffer_rows {
            self.flush(index, &mut file)?;
        }
        Ok(())
    }

    fn flush(&self, index: usize, file: &mut OutputFile) -> Result<()> {
        if file.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::replace(&mut file.pending, Chunk::empty(&self.schema));
        let pending = if self.shuffle {
            let mut order: Vec<usize> = (0..pending.num_rows()).collect();
            order.shuffle(&mut *self.rng.lock());
            pending.take(&order)?
        } else {
            pending
        };
        file.writer.write_row_group(&pending)?;
        debug!(file = index, rows = pending.num_rows(), "flushed output buffer");
        Ok(())
    }

    /// Flush every buffer, finish every file and write the manifest.
    ///
    /// On failure every output file of this writer is removed and no
    /// manifest is written.
    pub fn close(self) -> Result<Manifest> {
        for (index, file) in self.files.iter().enumerate() {
            let mut guard = file.lock();
            if let Err(e) = self.flush(index, &mut guard) {
                warn!(file = index, error = %e, "final flush failed, aborting write");
                return Err(e);
            }
        }
        let names: Vec<String> = (0..self.files.len()).map(part_file_name).collect();

        let expected = self.rows_in();
        let mut finished: Vec<PathBuf> = Vec::with_capacity(names.len());
        for file in self.files {
            let OutputFile { writer, .. } = file.into_inner();
            match writer.finish() {
                Ok(path) => finished.push(path),
                Err(e) => {
                    remove_all(&finished);
                    return Err(e);
                }
            }
        }

        if let Err(e) = remove_stale_parts(&self.dir, names.len()) {
            remove_all(&finished);
            return Err(e);
        }

        let manifest = match Manifest::from_files(&self.dir, &names) {
            Ok(m) if m.total_rows == expected => m,
            Ok(m) => {
                remove_all(&finished);
                return Err(TabflowError::Format(format!(
                    "Wrote {} rows but accepted {}",
                    m.total_rows, expected
                )));
            }
            Err(e) => {
                remove_all(&finished);
                return Err(e);
            }
        };
        if let Err(e) = manifest.save(&self.dir) {
            remove_all(&finished);
            return Err(e);
        }
        info!(
            dir = %self.dir.display(),
            files = manifest.num_files(),
            rows = manifest.total_rows,
            "wrote dataset manifest"
        );
        Ok(manifest)
    }

    /// Discard every buffer and temp file.
    pub fn abort(self) {
        warn!(dir = %self.dir.display(), "aborting shuffled write");
        for file in self.files {
            file.into_inner().writer.abort();
        }
    }
}

/// Index of an output partition file name, `None` for any other file.
fn part_index(name: &str) -> Option<usize> {
    name.strip_prefix("part.")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

/// Remove partitions of an earlier, larger write into `dir`.
fn remove_stale_parts(dir: &Path, num_files: usize) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        match name.to_str().and_then(part_index) {
            Some(index) if index >= num_files => {
                std::fs::remove_file(entry.path())?;
                debug!(file = index, "removed stale output partition");
            }
            _ => {}
        }
    }
    Ok(())
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove output file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tabflow_storage::dataset::{Dataset, FileFormat};
    use tabflow_storage::stream::for_each_chunk_sync;
    use tabflow_types::chunk::ColumnData;
    use tabflow_types::flex_type::FlexType;

    use super::*;

    fn schema() -> Vec<(String, FlexTypeEnum)> {
        vec![
            ("id".to_string(), FlexTypeEnum::Integer),
            ("tag".to_string(), FlexTypeEnum::String),
        ]
    }

    fn chunk(start: i64, len: i64) -> Chunk {
        Chunk::new(
            vec!["id".into(), "tag".into()],
            vec![
                ColumnData::Integer((start..start + len).map(Some).collect()),
                ColumnData::String(
                    (start..start + len)
                        .map(|i| Some(std::sync::Arc::from(format!("t{}", i % 7).as_str())))
                        .collect(),
                ),
            ],
        )
        .unwrap()
    }

    fn read_ids(dir: &Path, manifest: &Manifest) -> Vec<Vec<i64>> {
        let paths: Vec<PathBuf> = manifest.files.keys().map(|n| dir.join(n)).collect();
        let mut out = Vec::new();
        for path in paths {
            let dataset = Dataset::new([path], FileFormat::Parquet);
            let mut ids = Vec::new();
            for_each_chunk_sync(dataset.stream(), |c| {
                for i in 0..c.num_rows() {
                    if let FlexType::Integer(v) = c.column(0).get(i) {
                        ids.push(v);
                    }
                }
                Ok(())
            })
            .unwrap();
            out.push(ids);
        }
        out
    }

    #[test]
    fn test_round_trip_no_loss() {
        for num_files in [1, 2, 10] {
            let dir = tempfile::tempdir().unwrap();
            let writer =
                ShuffleWriter::create(dir.path(), &schema(), num_files, true, 64, Some(7)).unwrap();
            for start in (0..1000).step_by(100) {
                writer.write_chunk(&chunk(start, 100)).unwrap();
            }
            let manifest = writer.close().unwrap();
            assert_eq!(manifest.num_files(), num_files);
            assert_eq!(manifest.total_rows, 1000);

            let files = read_ids(dir.path(), &manifest);
            let mut all: Vec<i64> = files.iter().flatten().copied().collect();
            all.sort();
            assert_eq!(all, (0..1000).collect::<Vec<_>>());

            let loaded = Manifest::load(dir.path()).unwrap();
            assert_eq!(loaded, manifest);
        }
    }

    #[test]
    fn test_shuffle_breaks_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShuffleWriter::create(dir.path(), &schema(), 2, true, 1000, Some(1)).unwrap();
        writer.write_chunk(&chunk(0, 500)).unwrap();
        let manifest = writer.close().unwrap();
        for ids in read_ids(dir.path(), &manifest) {
            let mut sorted = ids.clone();
            sorted.sort();
            assert_ne!(ids, sorted);
        }
    }

    #[test]
    fn test_round_robin_keeps_chunk_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShuffleWriter::create(dir.path(), &schema(), 3, false, 10, None).unwrap();
        for start in (0..60).step_by(10) {
            writer.write_chunk(&chunk(start, 10)).unwrap();
        }
        let manifest = writer.close().unwrap();
        let files = read_ids(dir.path(), &manifest);
        assert_eq!(files[0], (0..10).chain(30..40).collect::<Vec<_>>());
        let groups: HashMap<_, _> = manifest
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.num_row_groups))
            .collect();
        assert_eq!(groups["part.1.parquet"], 2);
    }

    #[test]
    fn test_buffer_bound_flushes_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShuffleWriter::create(dir.path(), &schema(), 1, true, 25, Some(3)).unwrap();
        for start in (0..100).step_by(10) {
            writer.write_chunk(&chunk(start, 10)).unwrap();
        }
        let manifest = writer.close().unwrap();
        assert_eq!(manifest.files["part.0.parquet"].num_row_groups, 4);
    }

    #[test]
    fn test_smaller_rewrite_removes_stale_parts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShuffleWriter::create(dir.path(), &schema(), 10, true, 64, Some(2)).unwrap();
        writer.write_chunk(&chunk(0, 500)).unwrap();
        writer.close().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let writer = ShuffleWriter::create(dir.path(), &schema(), 2, true, 64, Some(2)).unwrap();
        writer.write_chunk(&chunk(0, 500)).unwrap();
        let manifest = writer.close().unwrap();

        let mut parts: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| part_index(n).is_some())
            .collect();
        parts.sort();
        assert_eq!(parts, vec!["part.0.parquet", "part.1.parquet"]);
        assert!(dir.path().join("notes.txt").exists());

        let dataset = Dataset::from_dir(dir.path(), "parquet", FileFormat::Parquet).unwrap();
        let mut rows = 0;
        for_each_chunk_sync(dataset.stream(), |c| {
            rows += c.num_rows();
            Ok(())
        })
        .unwrap();
        assert_eq!(rows, 500);
        assert_eq!(manifest.total_rows, 500);
    }

    #[test]
    fn test_part_index() {
        assert_eq!(part_index("part.12.parquet"), Some(12));
        assert_eq!(part_index("part.0.parquet.tmp"), None);
        assert_eq!(part_index("_metadata.json"), None);
    }

    #[test]
    fn test_empty_input_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ShuffleWriter::create(dir.path(), &schema(), 2, true, 10, Some(3)).unwrap();
        let manifest = writer.close().unwrap();
        assert_eq!(manifest.num_files(), 2);
        assert_eq!(manifest.total_rows, 0);

        assert!(ShuffleWriter::create(dir.path(), &schema(), 0, true, 10, None).is_err());

        let writer = ShuffleWriter::create(dir.path(), &schema(), 2, true, 10, None).unwrap();
        let wrong = Chunk::new(vec!["id".into()], vec![ColumnData::Integer(vec![Some(1)])]).unwrap();
        assert!(writer.write_chunk(&wrong).is_err());
        writer.abort();
        assert!(!dir.path().join(MANIFEST_FILE_NAME).exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
