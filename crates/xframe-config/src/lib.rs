//! Global configuration for the xframe runtime.
//!
//! Runtime-configurable knobs for the out-of-core machinery. Values are
//! initialized from environment variables on first access and can be
//! overridden at runtime via setter functions. Long-running jobs (the
//! materializer, sort, shuffle) snapshot the knobs they use at job start so
//! a concurrent setter cannot change behavior mid-job.
//!
//! # Knobs
//!
//! - `XFRAME_SORT_BUFFER_SIZE`: bytes a sort partition must fit within.
//!   Inputs estimated below this sort entirely in memory. Default: 256 MiB.
//! - `XFRAME_READ_BATCH_SIZE`: rows fetched per column per iterator refill.
//!   Default: 4096.
//! - `XFRAME_DEFAULT_NUM_SEGMENTS`: writer fan-out when the caller does not
//!   choose one. Default: 16.
//! - `XFRAME_SHUFFLE_BUCKET_SIZE`: target rows per bucket for whole-frame
//!   shuffles. Default: 1,000,000.
//! - `XFRAME_WRITER_BUFFER_SOFT_LIMIT`: buffered bytes at which a shuffle
//!   writer attempts an opportunistic flush. Default: 1 MiB.
//! - `XFRAME_WRITER_BUFFER_HARD_LIMIT`: buffered bytes at which a shuffle
//!   writer blocks until it can flush. Default: 4 MiB.
//! - `XFRAME_FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT`: a segment with fewer
//!   blocks than this counts as "small" for fast compaction. Default: 8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_SORT_BUFFER_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_READ_BATCH_SIZE: usize = 4096;
const DEFAULT_NUM_SEGMENTS: usize = 16;
const DEFAULT_SHUFFLE_BUCKET_SIZE: usize = 1_000_000;
const DEFAULT_WRITER_BUFFER_SOFT_LIMIT: usize = 1024 * 1024;
const DEFAULT_WRITER_BUFFER_HARD_LIMIT: usize = 4 * 1024 * 1024;
const DEFAULT_FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT: usize = 8;

// ---------------------------------------------------------------------------
// Atomic globals
// ---------------------------------------------------------------------------

static SORT_BUFFER_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_SORT_BUFFER_SIZE);
static READ_BATCH_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_READ_BATCH_SIZE);
static NUM_SEGMENTS: AtomicUsize = AtomicUsize::new(DEFAULT_NUM_SEGMENTS);
static SHUFFLE_BUCKET_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_SHUFFLE_BUCKET_SIZE);
static WRITER_BUFFER_SOFT_LIMIT: AtomicUsize =
    AtomicUsize::new(DEFAULT_WRITER_BUFFER_SOFT_LIMIT);
static WRITER_BUFFER_HARD_LIMIT: AtomicUsize =
    AtomicUsize::new(DEFAULT_WRITER_BUFFER_HARD_LIMIT);
static FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT: AtomicUsize =
    AtomicUsize::new(DEFAULT_FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT);

static INIT: Once = Once::new();

/// Ensure environment variable overrides are applied (idempotent).
fn ensure_init() {
    INIT.call_once(|| {
        let byte_knobs: [(&str, &AtomicUsize); 3] = [
            ("XFRAME_SORT_BUFFER_SIZE", &SORT_BUFFER_SIZE),
            ("XFRAME_WRITER_BUFFER_SOFT_LIMIT", &WRITER_BUFFER_SOFT_LIMIT),
            ("XFRAME_WRITER_BUFFER_HARD_LIMIT", &WRITER_BUFFER_HARD_LIMIT),
        ];
        for (name, slot) in byte_knobs {
            if let Ok(val) = std::env::var(name) {
                if let Ok(n) = parse_byte_size(&val) {
                    slot.store(n, Ordering::Relaxed);
                }
            }
        }

        let count_knobs: [(&str, &AtomicUsize); 4] = [
            ("XFRAME_READ_BATCH_SIZE", &READ_BATCH_SIZE),
            ("XFRAME_DEFAULT_NUM_SEGMENTS", &NUM_SEGMENTS),
            ("XFRAME_SHUFFLE_BUCKET_SIZE", &SHUFFLE_BUCKET_SIZE),
            (
                "XFRAME_FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT",
                &FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT,
            ),
        ];
        for (name, slot) in count_knobs {
            if let Ok(val) = std::env::var(name) {
                if let Ok(n) = val.trim().parse::<usize>() {
                    if n > 0 {
                        slot.store(n, Ordering::Relaxed);
                    }
                }
            }
        }
    });
}

/// Parse a byte size string. Supports plain integers and suffixes:
/// `K`/`KB`, `M`/`MB`, `G`/`GB` (case-insensitive).
pub fn parse_byte_size(s: &str) -> Result<usize, ()> {
    let upper = s.trim().to_ascii_uppercase();
    let (num_str, multiplier) =
        if let Some(n) = upper.strip_suffix("GB").or_else(|| upper.strip_suffix('G')) {
            (n.trim(), 1024 * 1024 * 1024)
        } else if let Some(n) = upper.strip_suffix("MB").or_else(|| upper.strip_suffix('M')) {
            (n.trim(), 1024 * 1024)
        } else if let Some(n) = upper.strip_suffix("KB").or_else(|| upper.strip_suffix('K')) {
            (n.trim(), 1024)
        } else {
            (upper.as_str(), 1)
        };
    num_str
        .parse::<usize>()
        .map(|n| n * multiplier)
        .map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Bytes a sort partition must fit within.
pub fn get_sort_buffer_size() -> usize {
    ensure_init();
    SORT_BUFFER_SIZE.load(Ordering::Relaxed).max(1)
}

pub fn set_sort_buffer_size(bytes: usize) {
    ensure_init();
    SORT_BUFFER_SIZE.store(bytes.max(1), Ordering::Relaxed);
}

/// Rows fetched per column per iterator refill.
pub fn get_read_batch_size() -> usize {
    ensure_init();
    READ_BATCH_SIZE.load(Ordering::Relaxed).max(1)
}

pub fn set_read_batch_size(rows: usize) {
    ensure_init();
    READ_BATCH_SIZE.store(rows.max(1), Ordering::Relaxed);
}

/// Writer fan-out when the caller does not choose one.
pub fn get_default_num_segments() -> usize {
    ensure_init();
    NUM_SEGMENTS.load(Ordering::Relaxed).max(1)
}

pub fn set_default_num_segments(n: usize) {
    ensure_init();
    NUM_SEGMENTS.store(n.max(1), Ordering::Relaxed);
}

/// Target rows per bucket for whole-frame shuffles.
pub fn get_shuffle_bucket_size() -> usize {
    ensure_init();
    SHUFFLE_BUCKET_SIZE.load(Ordering::Relaxed).max(1)
}

pub fn set_shuffle_bucket_size(rows: usize) {
    ensure_init();
    SHUFFLE_BUCKET_SIZE.store(rows.max(1), Ordering::Relaxed);
}

/// Buffered bytes at which a shuffle writer attempts an opportunistic flush.
pub fn get_writer_buffer_soft_limit() -> usize {
    ensure_init();
    WRITER_BUFFER_SOFT_LIMIT.load(Ordering::Relaxed)
}

pub fn set_writer_buffer_soft_limit(bytes: usize) {
    ensure_init();
    WRITER_BUFFER_SOFT_LIMIT.store(bytes, Ordering::Relaxed);
}

/// Buffered bytes at which a shuffle writer blocks until it can flush.
pub fn get_writer_buffer_hard_limit() -> usize {
    ensure_init();
    WRITER_BUFFER_HARD_LIMIT.load(Ordering::Relaxed)
}

pub fn set_writer_buffer_hard_limit(bytes: usize) {
    ensure_init();
    WRITER_BUFFER_HARD_LIMIT.store(bytes, Ordering::Relaxed);
}

/// A segment with fewer blocks than this is "small" for fast compaction.
pub fn get_fast_compact_blocks_in_small_segment() -> usize {
    ensure_init();
    FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT
        .load(Ordering::Relaxed)
        .max(1)
}

pub fn set_fast_compact_blocks_in_small_segment(blocks: usize) {
    ensure_init();
    FAST_COMPACT_BLOCKS_IN_SMALL_SEGMENT.store(blocks.max(1), Ordering::Relaxed);
}
