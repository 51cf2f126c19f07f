//! Global configuration for the tabflow runtime.
//!
//! Values are initialized from environment variables on first access and
//! can be overridden at runtime via setter functions.
//!
//! - `TABFLOW_CHUNK_ROWS`: rows per chunk handed out by the readers.
//!   Default: 65 536.
//!
//! - `TABFLOW_SHUFFLE_BUFFER_ROWS`: rows the shuffled writer buffers per
//!   output file before flushing a row group. Default: 100 000.
//!
//! - `TABFLOW_NUM_WORKERS`: number of partitions processed concurrently
//!   during the statistics pass. Default: 1.
//!
//! Row counts accept `K`, `M` and `G` suffixes (powers of 1000).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_CHUNK_ROWS: usize = 65_536;
const DEFAULT_SHUFFLE_BUFFER_ROWS: usize = 100_000;
const DEFAULT_NUM_WORKERS: usize = 1;

// ---------------------------------------------------------------------------
// Atomic globals
// ---------------------------------------------------------------------------

static CHUNK_ROWS: AtomicUsize = AtomicUsize::new(DEFAULT_CHUNK_ROWS);
static SHUFFLE_BUFFER_ROWS: AtomicUsize = AtomicUsize::new(DEFAULT_SHUFFLE_BUFFER_ROWS);
static NUM_WORKERS: AtomicUsize = AtomicUsize::new(DEFAULT_NUM_WORKERS);

static INIT: Once = Once::new();

/// Ensure environment variable overrides are applied (idempotent).
fn ensure_init() {
    INIT.call_once(|| {
        load_env("TABFLOW_CHUNK_ROWS", &CHUNK_ROWS);
        load_env("TABFLOW_SHUFFLE_BUFFER_ROWS", &SHUFFLE_BUFFER_ROWS);
        load_env("TABFLOW_NUM_WORKERS", &NUM_WORKERS);
    });
}

fn load_env(var: &str, target: &AtomicUsize) {
    if let Ok(val) = std::env::var(var) {
        // Zero is never a usable value for any knob.
        if let Ok(n) = parse_count(&val) {
            if n > 0 {
                target.store(n, Ordering::Relaxed);
            }
        }
    }
}

/// Parse a row count. Supports plain integers and the suffixes `K`, `M`
/// and `G` (case-insensitive, powers of 1000).
pub fn parse_count(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (num_str, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1_000_000),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1_000_000_000),
        _ => (s, 1),
    };
    num_str
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid count '{}'", s))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Get the number of rows per chunk produced by the readers.
pub fn get_chunk_rows() -> usize {
    ensure_init();
    CHUNK_ROWS.load(Ordering::Relaxed)
}

/// Set the number of rows per chunk produced by the readers.
pub fn set_chunk_rows(rows: usize) {
    ensure_init();
    CHUNK_ROWS.store(rows.max(1), Ordering::Relaxed);
}

/// Get the per-file buffer threshold of the shuffled writer.
pub fn get_shuffle_buffer_rows() -> usize {
    ensure_init();
    SHUFFLE_BUFFER_ROWS.load(Ordering::Relaxed)
}

/// Set the per-file buffer threshold of the shuffled writer.
pub fn set_shuffle_buffer_rows(rows: usize) {
    ensure_init();
    SHUFFLE_BUFFER_ROWS.store(rows.max(1), Ordering::Relaxed);
}

/// Get the number of partition workers.
pub fn get_num_workers() -> usize {
    ensure_init();
    NUM_WORKERS.load(Ordering::Relaxed)
}

/// Set the number of partition workers.
pub fn set_num_workers(workers: usize) {
    ensure_init();
    NUM_WORKERS.store(workers.max(1), Ordering::Relaxed);
}
