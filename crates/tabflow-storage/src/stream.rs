//! Chunk streams and helpers to drive them from synchronous code.

use std::pin::Pin;

use futures::stream::{Stream, StreamExt};

use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};

/// A lazy stream of chunks. Errors end the pass that consumes them.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Build a stream over an iterator of chunks without materializing it.
pub fn stream_from_iter<I>(iter: I) -> ChunkStream
where
    I: Iterator<Item = Result<Chunk>> + Send + 'static,
{
    Box::pin(futures::stream::iter(iter))
}

/// Materialize a stream into a single chunk.
///
/// Returns `None` when the stream yields no chunks at all.
pub async fn materialize(mut stream: ChunkStream) -> Result<Option<Chunk>> {
    let mut result: Option<Chunk> = None;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result?;
        match &mut result {
            None => result = Some(chunk),
            Some(existing) => existing.append(&chunk)?,
        }
    }

    Ok(result)
}

/// Helper: materialize synchronously using a tokio runtime.
pub fn materialize_sync(stream: ChunkStream) -> Result<Option<Chunk>> {
    runtime()?.block_on(materialize(stream))
}

/// Consume a stream chunk-by-chunk synchronously, calling `callback` for
/// each chunk. Only one chunk is alive at a time.
pub fn for_each_chunk_sync<F>(stream: ChunkStream, mut callback: F) -> Result<()>
where
    F: FnMut(Chunk) -> Result<()>,
{
    runtime()?.block_on(async move {
        let mut stream = stream;
        while let Some(chunk_result) = stream.next().await {
            callback(chunk_result?)?;
        }
        Ok(())
    })
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| TabflowError::Format(format!("Failed to create tokio runtime: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_types::chunk::ColumnData;

    fn ints(values: &[i64]) -> Result<Chunk> {
        Chunk::new(
            vec!["v".to_string()],
            vec![ColumnData::Integer(values.iter().map(|&v| Some(v)).collect())],
        )
    }

    #[tokio::test]
    async fn test_materialize_concatenates() {
        let stream = stream_from_iter(vec![ints(&[1, 2]), ints(&[3])].into_iter());
        let chunk = materialize(stream).await.unwrap().unwrap();
        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.column(0), &ColumnData::Integer(vec![Some(1), Some(2), Some(3)]));
    }

    #[tokio::test]
    async fn test_materialize_empty() {
        let stream = stream_from_iter(std::iter::empty());
        assert!(materialize(stream).await.unwrap().is_none());
    }

    #[test]
    fn test_for_each_stops_on_error() {
        let items = vec![
            ints(&[1]),
            Err(TabflowError::Data("bad chunk".to_string())),
            ints(&[2]),
        ];
        let mut seen = 0;
        let result = for_each_chunk_sync(stream_from_iter(items.into_iter()), |_| {
            seen += 1;
            Ok(())
        });
        assert!(matches!(result, Err(TabflowError::Data(_))));
        assert_eq!(seen, 1);
    }
}
