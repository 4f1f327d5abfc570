//! External (partitioned) sort.
//!
//! The pipeline:
//! 1. stream the sort-key tuples into a quantile sketch;
//! 2. pick partition boundaries so each partition fits the sort buffer;
//! 3. scatter rows into the on-disk partition array (one segment per
//!    partition, records of archive-packed `(key, rest-of-row)` pairs);
//! 4. sort each partition in memory, in parallel, skipping partitions
//!    whose keys are all equal;
//! 5. concatenate partitions in order: they are disjoint ascending key
//!    ranges, so the concatenation is the sorted frame.
//!
//! Keys are packed first in the partition records; a column permutation
//! computed up front restores the caller's schema when rows are written
//! back out.
//!
//! Short-circuits: an input whose keys are all equal is returned as-is
//! (materialized), and an input that fits the sort buffer is sorted in
//! one in-memory pass.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use xframe_io::local_fs::LocalFileSystem;
use xframe_io::temp::alloc_temp_dir;
use xframe_io::vfs::{ReadableFile, VirtualFileSystem, WritableFile};
use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_storage::readers::ParallelRowsIter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::serialization::{read_row, write_row};
use xframe_types::value::Value;

use crate::algorithms::quantile_sketch::{compare_keys, QuantileSketch};
use crate::execute::materialize;
use crate::planner::{infer_kinds, PlanNode};

const SKETCH_EPSILON: f64 = 0.01;
const SIZE_SAMPLE_ROWS: u64 = 1000;
const MAX_PARTITIONS: usize = 512;

/// Sort a plan by the given key columns. `ascending[i]` gives the
/// direction of `key_indices[i]`. Stable within equal keys.
pub fn sort(
    plan: &Arc<PlanNode>,
    key_indices: &[usize],
    ascending: &[bool],
) -> Result<Arc<XFrame>> {
    let kinds = infer_kinds(plan)?;
    if key_indices.is_empty() {
        return Err(XFrameError::SchemaMismatch(
            "sort needs at least one key column".to_string(),
        ));
    }
    if key_indices.len() != ascending.len() {
        return Err(XFrameError::SchemaMismatch(format!(
            "{} sort keys with {} order flags",
            key_indices.len(),
            ascending.len()
        )));
    }
    for &k in key_indices {
        if k >= kinds.len() {
            return Err(XFrameError::OutOfRange(format!(
                "sort key column {} out of range ({} columns)",
                k,
                kinds.len()
            )));
        }
    }

    let frame = materialize(plan)?;
    let num_rows = frame.num_rows();
    if num_rows <= 1 {
        return Ok(frame);
    }

    let ascending: Arc<[bool]> = Arc::from(ascending.to_vec());
    let sketch = build_sketch(&frame, key_indices, &ascending)?;

    // All sampled keys identical: the input is already sorted.
    if let (Some(min), Some(max)) = (sketch.min_key(), sketch.max_key()) {
        if compare_keys(min, max, &ascending) == std::cmp::Ordering::Equal {
            log::debug!("sort: all keys equal, returning input unchanged");
            return Ok(frame);
        }
    }

    let estimated_bytes = estimate_frame_bytes(&frame)?;
    let buffer = xframe_config::get_sort_buffer_size();

    if estimated_bytes <= buffer {
        log::debug!("sort: {} bytes fit the buffer, in-memory path", estimated_bytes);
        return in_memory_sort(&frame, key_indices, &ascending);
    }

    let num_partitions = estimated_bytes
        .div_ceil(buffer)
        .clamp(2, (num_rows as usize).min(MAX_PARTITIONS));
    let boundaries = sketch.quantiles(num_partitions);
    log::debug!(
        "sort: {} estimated bytes into {} partitions",
        estimated_bytes,
        num_partitions
    );

    let scattered = scatter(&frame, key_indices, &ascending, &boundaries)?;
    sort_and_merge(&frame, key_indices, &ascending, scattered)
}

// ---------------------------------------------------------------------------
// Phase 1: sampling
// ---------------------------------------------------------------------------

/// Stream every row's key tuple into per-worker sketches and merge them.
fn build_sketch(
    frame: &Arc<XFrame>,
    key_indices: &[usize],
    ascending: &Arc<[bool]>,
) -> Result<QuantileSketch> {
    let num_workers = rayon::current_num_threads().max(1);
    let source = ParallelRowsIter::new(vec![frame.clone()], num_workers)?;

    let sketches: Vec<QuantileSketch> = (0..num_workers)
        .into_par_iter()
        .map(|worker| -> Result<QuantileSketch> {
            let mut sketch = QuantileSketch::new(SKETCH_EPSILON, ascending.clone());
            let mut cursor = source.cursor(worker)?;
            let mut row: Vec<Value> = Vec::new();
            while cursor.next_row(&mut row)? {
                sketch.insert(key_indices.iter().map(|&k| row[k].clone()).collect());
            }
            sketch.finish();
            Ok(sketch)
        })
        .collect::<Result<_>>()?;

    let mut merged = QuantileSketch::new(SKETCH_EPSILON, ascending.clone());
    for sketch in &sketches {
        merged.merge(sketch);
    }
    merged.finish();
    Ok(merged)
}

/// Estimate total frame bytes from a row-sample prefix.
fn estimate_frame_bytes(frame: &Arc<XFrame>) -> Result<usize> {
    let num_rows = frame.num_rows();
    let sample = num_rows.min(SIZE_SAMPLE_ROWS);
    if sample == 0 {
        return Ok(0);
    }
    let mut bytes = 0usize;
    for col in frame.columns() {
        let mut reader = col.reader(None)?;
        let mut out = Vec::new();
        reader.read_rows(0, sample, &mut out)?;
        bytes += out.iter().map(|v| v.estimate_bytes()).sum::<usize>();
    }
    Ok((bytes as u64 * num_rows / sample) as usize)
}

// ---------------------------------------------------------------------------
// Phase 2: in-memory fast path
// ---------------------------------------------------------------------------

fn in_memory_sort(
    frame: &Arc<XFrame>,
    key_indices: &[usize],
    ascending: &[bool],
) -> Result<Arc<XFrame>> {
    let columns: Vec<Vec<Value>> = frame
        .columns()
        .iter()
        .map(|c| c.read_all())
        .collect::<Result<_>>()?;
    let num_rows = frame.num_rows() as usize;

    let mut order: Vec<usize> = (0..num_rows).collect();
    order.sort_by(|&a, &b| {
        let ka: Vec<Value> = key_indices.iter().map(|&k| columns[k][a].clone()).collect();
        let kb: Vec<Value> = key_indices.iter().map(|&k| columns[k][b].clone()).collect();
        compare_keys(&ka, &kb, ascending)
    });

    let names: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&names, &frame.column_types(), 1)?;
    let mut sink = writer.get_output_iterator(0)?;
    let mut row: Vec<Value> = Vec::with_capacity(columns.len());
    for &i in &order {
        row.clear();
        row.extend(columns.iter().map(|c| c[i].clone()));
        sink.write_row(&row)?;
    }
    let finished = [sink.finish()?];
    writer.close(&finished)
}

// ---------------------------------------------------------------------------
// Phase 3: scatter into the partition array
// ---------------------------------------------------------------------------

/// The on-disk partition array: one record file per partition holding
/// archive-packed `(key values, non-key row values)` pairs.
struct PartitionArray {
    paths: Vec<String>,
    counts: Vec<u64>,
    /// True when all keys within the partition are equal.
    sorted: Vec<bool>,
    _guard: Arc<xframe_io::temp::TempDirGuard>,
}

/// Per-worker, per-partition record buffer with the shuffle writers'
/// soft/hard backpressure.
struct RecordBuffer {
    bytes: Vec<u8>,
    records: u64,
    first_key: Option<Vec<Value>>,
    keys_equal: bool,
}

impl RecordBuffer {
    fn new() -> Self {
        RecordBuffer {
            bytes: Vec::new(),
            records: 0,
            first_key: None,
            keys_equal: true,
        }
    }
}

struct PartitionSink {
    file: Mutex<Box<dyn WritableFile>>,
    count: Mutex<PartitionTally>,
}

#[derive(Default)]
struct PartitionTally {
    records: u64,
    first_key: Option<Vec<Value>>,
    keys_equal: bool,
}

fn scatter(
    frame: &Arc<XFrame>,
    key_indices: &[usize],
    ascending: &Arc<[bool]>,
    boundaries: &[Vec<Value>],
) -> Result<PartitionArray> {
    let num_partitions = boundaries.len() + 1;
    let (dir, guard) = alloc_temp_dir("sort")?;
    let fs = LocalFileSystem;

    let mut paths = Vec::with_capacity(num_partitions);
    let mut sinks = Vec::with_capacity(num_partitions);
    for p in 0..num_partitions {
        let path = std::path::Path::new(&dir)
            .join(format!("part.{:04}", p))
            .to_string_lossy()
            .into_owned();
        sinks.push(PartitionSink {
            file: Mutex::new(fs.open_write(&path)?),
            count: Mutex::new(PartitionTally {
                keys_equal: true,
                ..Default::default()
            }),
        });
        paths.push(path);
    }

    let rest_indices: Vec<usize> = (0..frame.num_columns())
        .filter(|i| !key_indices.contains(i))
        .collect();

    let num_workers = rayon::current_num_threads().max(1);
    let source = ParallelRowsIter::new(vec![frame.clone()], num_workers)?;
    let soft_limit = xframe_config::get_writer_buffer_soft_limit();
    let hard_limit = xframe_config::get_writer_buffer_hard_limit().max(soft_limit);

    (0..num_workers)
        .into_par_iter()
        .try_for_each(|worker| -> Result<()> {
            let mut cursor = source.cursor(worker)?;
            let mut buffers: Vec<RecordBuffer> =
                (0..num_partitions).map(|_| RecordBuffer::new()).collect();

            let mut row: Vec<Value> = Vec::new();
            let mut key: Vec<Value> = Vec::new();
            let mut rest: Vec<Value> = Vec::new();
            loop {
                let row_index = cursor.next_row_index();
                if !cursor.next_row(&mut row)? {
                    break;
                }
                key.clear();
                key.extend(key_indices.iter().map(|&k| row[k].clone()));
                rest.clear();
                rest.extend(rest_indices.iter().map(|&k| row[k].clone()));

                let p = find_partition(&key, boundaries, ascending);
                let buffer = &mut buffers[p];
                write_row(&mut buffer.bytes, &key)?;
                // Original row position: workers interleave their flushes,
                // so file order alone cannot provide stable tie-breaks.
                xframe_types::serialization::write_u64(&mut buffer.bytes, row_index)?;
                write_row(&mut buffer.bytes, &rest)?;
                buffer.records += 1;
                match &buffer.first_key {
                    None => buffer.first_key = Some(key.clone()),
                    Some(first) => {
                        if buffer.keys_equal
                            && compare_keys(first, &key, ascending)
                                != std::cmp::Ordering::Equal
                        {
                            buffer.keys_equal = false;
                        }
                    }
                }

                if buffer.bytes.len() >= hard_limit {
                    flush_records(&mut buffers[p], &sinks[p], ascending, true)?;
                } else if buffer.bytes.len() >= soft_limit {
                    flush_records(&mut buffers[p], &sinks[p], ascending, false)?;
                }
            }
            for (p, buffer) in buffers.iter_mut().enumerate() {
                flush_records(buffer, &sinks[p], ascending, true)?;
            }
            Ok(())
        })?;

    let mut counts = Vec::with_capacity(num_partitions);
    let mut sorted = Vec::with_capacity(num_partitions);
    for sink in sinks {
        sink.file.into_inner().flush_all()?;
        let tally = sink.count.into_inner();
        counts.push(tally.records);
        sorted.push(tally.keys_equal);
    }

    Ok(PartitionArray {
        paths,
        counts,
        sorted,
        _guard: guard,
    })
}

/// First partition whose boundary is >= the key; ties land in the lower
/// partition index.
fn find_partition(key: &[Value], boundaries: &[Vec<Value>], ascending: &[bool]) -> usize {
    let mut lo = 0;
    let mut hi = boundaries.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if compare_keys(key, &boundaries[mid], ascending) == std::cmp::Ordering::Greater {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn flush_records(
    buffer: &mut RecordBuffer,
    sink: &PartitionSink,
    ascending: &[bool],
    blocking: bool,
) -> Result<()> {
    if buffer.records == 0 {
        return Ok(());
    }
    let guard = if blocking {
        Some(sink.file.lock())
    } else {
        sink.file.try_lock()
    };
    let Some(mut file) = guard else {
        return Ok(()); // soft limit: try again later
    };
    file.write_all(&buffer.bytes)?;
    drop(file);

    let mut tally = sink.count.lock();
    tally.records += buffer.records;
    if let Some(key) = &buffer.first_key {
        match &tally.first_key {
            None => {
                tally.first_key = Some(key.clone());
                tally.keys_equal = buffer.keys_equal;
            }
            Some(first) => {
                tally.keys_equal = tally.keys_equal
                    && buffer.keys_equal
                    && compare_keys(first, key, ascending) == std::cmp::Ordering::Equal;
            }
        }
    }
    drop(tally);

    buffer.bytes.clear();
    buffer.records = 0;
    // first_key/keys_equal persist: they describe the whole worker stream
    // for this partition, already folded into the tally above.
    Ok(())
}

// ---------------------------------------------------------------------------
// Phases 4+5: per-partition sort and concatenation
// ---------------------------------------------------------------------------

fn sort_and_merge(
    frame: &Arc<XFrame>,
    key_indices: &[usize],
    ascending: &Arc<[bool]>,
    partitions: PartitionArray,
) -> Result<Arc<XFrame>> {
    let num_partitions = partitions.paths.len();
    let num_columns = frame.num_columns();

    // Column permutation: partition records pack keys first; output
    // column j takes packed position permute_order[j].
    let rest_indices: Vec<usize> = (0..num_columns)
        .filter(|i| !key_indices.contains(i))
        .collect();
    let mut permute_order = vec![0usize; num_columns];
    for (packed, &col) in key_indices.iter().chain(rest_indices.iter()).enumerate() {
        permute_order[col] = packed;
    }

    let names: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    let mut writer =
        XFrameWriter::open_anonymous(&names, &frame.column_types(), num_partitions)?;
    let sinks = writer.get_output_iterators()?;

    let finished: Vec<(usize, u64)> = sinks
        .into_par_iter()
        .enumerate()
        .map(|(p, mut sink)| -> Result<(usize, u64)> {
            let fs = LocalFileSystem;
            let mut file = fs.open_read(&partitions.paths[p])?;
            let count = partitions.counts[p] as usize;

            let mut records: Vec<(Vec<Value>, u64, Vec<Value>)> = Vec::with_capacity(count);
            for _ in 0..count {
                let key = read_partition_row(&mut file)?;
                let row_index = xframe_types::serialization::read_u64(&mut file)?;
                let rest = read_partition_row(&mut file)?;
                records.push((key, row_index, rest));
            }

            if partitions.sorted[p] {
                // Keys all equal: only the stable tie-break order matters.
                records.sort_unstable_by_key(|r| r.1);
            } else {
                records.sort_by(|a, b| {
                    compare_keys(&a.0, &b.0, ascending).then(a.1.cmp(&b.1))
                });
            }

            let mut row = vec![Value::Undefined; num_columns];
            for (key, _, rest) in &records {
                for (col, &packed) in permute_order.iter().enumerate() {
                    row[col] = if packed < key.len() {
                        key[packed].clone()
                    } else {
                        rest[packed - key.len()].clone()
                    };
                }
                sink.write_row(&row)?;
            }
            sink.finish()
        })
        .collect::<Result<_>>()?;

    writer.close(&finished)
}

fn read_partition_row(file: &mut Box<dyn ReadableFile>) -> Result<Vec<Value>> {
    read_row(file)
}
