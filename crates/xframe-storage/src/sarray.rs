//! `SArray`: the segmented on-disk column store.
//!
//! A column is written with a fixed number of segments (its parallel
//! fan-out), each fed through its own [`SegmentSink`]. Once closed, the
//! column is immutable: any number of concurrent readers may be built,
//! each owning its own file handles.

use std::path::Path;
use std::sync::Arc;

use xframe_io::local_fs::LocalFileSystem;
use xframe_io::temp::{alloc_temp_dir, TempDirGuard};
use xframe_io::vfs::{VirtualFileSystem, WritableFile};
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

use crate::index::ColumnIndex;
use crate::segment_reader::SegmentReader;
use crate::segment_writer::SegmentWriter;

/// Target block size in bytes.
const TARGET_BLOCK_SIZE: usize = 64 * 1024;
const MIN_ROWS_PER_BLOCK: usize = 8;
const MAX_ROWS_PER_BLOCK: usize = 256 * 1024;

/// Static per-kind estimate used to seed the adaptive block size.
fn estimate_bytes_per_value(dtype: ValueKind) -> usize {
    match dtype {
        ValueKind::Integer | ValueKind::Float => 8,
        ValueKind::String => 32,
        ValueKind::Vector | ValueKind::List | ValueKind::Dict => 64,
        ValueKind::DateTime => 13,
        ValueKind::NdArray => 128,
        ValueKind::Undefined => 1,
    }
}

// ---------------------------------------------------------------------------
// Immutable column
// ---------------------------------------------------------------------------

/// An immutable-after-close segmented column of values.
#[derive(Clone)]
pub struct SArray {
    dtype: ValueKind,
    index_path: String,
    segment_paths: Vec<String>,
    segment_sizes: Vec<u64>,
    /// Temp-dir guards for scratch-backed columns; dropping the last
    /// handle unlinks the backing files.
    keep_alive: Vec<Arc<TempDirGuard>>,
}

impl SArray {
    /// Open a column from its .sidx index file.
    pub fn open(index_path: &str) -> Result<Self> {
        let fs = LocalFileSystem;
        let content = fs.read_to_string(index_path)?;
        let idx = ColumnIndex::parse(&content, index_path)?;
        Ok(SArray {
            dtype: idx.dtype,
            index_path: index_path.to_string(),
            segment_paths: idx.segment_files,
            segment_sizes: idx.segment_sizes,
            keep_alive: Vec::new(),
        })
    }

    pub(crate) fn from_parts(
        dtype: ValueKind,
        index_path: String,
        segment_paths: Vec<String>,
        segment_sizes: Vec<u64>,
        keep_alive: Vec<Arc<TempDirGuard>>,
    ) -> Self {
        SArray {
            dtype,
            index_path,
            segment_paths,
            segment_sizes,
            keep_alive,
        }
    }

    pub fn dtype(&self) -> ValueKind {
        self.dtype
    }

    pub fn len(&self) -> u64 {
        self.segment_sizes.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_segments(&self) -> usize {
        self.segment_paths.len()
    }

    pub fn segment_sizes(&self) -> &[u64] {
        &self.segment_sizes
    }

    pub fn segment_paths(&self) -> &[String] {
        &self.segment_paths
    }

    pub fn index_path(&self) -> &str {
        &self.index_path
    }

    pub fn keep_alive(&self) -> &[Arc<TempDirGuard>] {
        &self.keep_alive
    }

    /// Build a reader, optionally re-segmented into caller-chosen segment
    /// lengths (their sum must equal the column length).
    pub fn reader(&self, resegmentation: Option<&[u64]>) -> Result<SArrayReader> {
        let logical_sizes = match resegmentation {
            Some(sizes) => {
                let total: u64 = sizes.iter().sum();
                if total != self.len() {
                    return Err(XFrameError::OutOfRange(format!(
                        "resegmentation covers {} rows, column has {}",
                        total,
                        self.len()
                    )));
                }
                sizes.to_vec()
            }
            None => self.segment_sizes.clone(),
        };
        Ok(SArrayReader::new(self, logical_sizes))
    }

    /// Convenience: read the entire column into memory.
    pub fn read_all(&self) -> Result<Vec<Value>> {
        let mut reader = self.reader(None)?;
        let mut out = Vec::with_capacity(self.len() as usize);
        reader.read_rows(0, self.len(), &mut out)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends values to one segment of a column under construction.
pub struct SegmentSink {
    writer: SegmentWriter<Box<dyn WritableFile>>,
    buffer: Vec<Value>,
    rows_per_block: usize,
    segment_id: usize,
    rows: u64,
    // Online block-size estimation from observed on-disk bytes.
    encoded_bytes: u64,
    encoded_values: u64,
}

impl SegmentSink {
    pub fn segment_id(&self) -> usize {
        self.segment_id
    }

    /// Number of rows appended so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one value.
    pub fn write(&mut self, value: Value) -> Result<()> {
        self.buffer.push(value);
        self.rows += 1;
        if self.buffer.len() >= self.rows_per_block {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Append many values.
    pub fn write_all<I: IntoIterator<Item = Value>>(&mut self, values: I) -> Result<()> {
        for v in values {
            self.write(v)?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let n = self.buffer.len() as u64;
        let block = std::mem::take(&mut self.buffer);
        let on_disk = self.writer.write_block(&block)?;

        // Cumulative-average bytes per value steers rows-per-block toward
        // the target block size.
        self.encoded_bytes += on_disk;
        self.encoded_values += n;
        let avg_bpv = self.encoded_bytes as f64 / self.encoded_values as f64;
        if avg_bpv > 0.0 {
            self.rows_per_block = ((TARGET_BLOCK_SIZE as f64 / avg_bpv) as usize)
                .clamp(MIN_ROWS_PER_BLOCK, MAX_ROWS_PER_BLOCK);
        }
        Ok(())
    }

    /// Seal this segment: flush the partial block and write the footer.
    /// Returns the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush_block()?;
        let count = self.writer.finish()?;
        debug_assert_eq!(count, self.rows);
        Ok(count)
    }
}

/// Writer for a column with a fixed segment fan-out.
pub struct SArrayWriter {
    dtype: ValueKind,
    index_path: String,
    segment_paths: Vec<String>,
    sinks: Vec<Option<SegmentSink>>,
    keep_alive: Vec<Arc<TempDirGuard>>,
}

impl SArrayWriter {
    /// Create an empty column with `num_segments` segments under
    /// `dir/prefix.*`. The segment count fixes the parallel fan-out.
    pub fn open(dir: &str, prefix: &str, dtype: ValueKind, num_segments: usize) -> Result<Self> {
        if num_segments == 0 {
            return Err(XFrameError::OutOfRange(
                "a column needs at least one segment".to_string(),
            ));
        }
        let fs = LocalFileSystem;
        fs.mkdir_p(dir)?;

        let index_path = Path::new(dir)
            .join(format!("{}.sidx", prefix))
            .to_string_lossy()
            .into_owned();

        let mut segment_paths = Vec::with_capacity(num_segments);
        let mut sinks = Vec::with_capacity(num_segments);
        let initial_rpb = (TARGET_BLOCK_SIZE / estimate_bytes_per_value(dtype).max(1))
            .clamp(MIN_ROWS_PER_BLOCK, MAX_ROWS_PER_BLOCK);

        for seg in 0..num_segments {
            let path = Path::new(dir)
                .join(format!("{}.{:04}", prefix, seg))
                .to_string_lossy()
                .into_owned();
            let file = fs.open_write(&path)?;
            segment_paths.push(path);
            sinks.push(Some(SegmentSink {
                writer: SegmentWriter::new(file),
                buffer: Vec::new(),
                rows_per_block: initial_rpb,
                segment_id: seg,
                rows: 0,
                encoded_bytes: 0,
                encoded_values: 0,
            }));
        }

        Ok(SArrayWriter {
            dtype,
            index_path,
            segment_paths,
            sinks,
            keep_alive: Vec::new(),
        })
    }

    /// Create a scratch-backed column that unlinks itself when the last
    /// `SArray` handle drops.
    pub fn open_anonymous(dtype: ValueKind, num_segments: usize) -> Result<Self> {
        let (dir, guard) = alloc_temp_dir("sarray")?;
        let mut writer = Self::open(&dir, "m_anon", dtype, num_segments)?;
        writer.keep_alive.push(guard);
        Ok(writer)
    }

    pub fn dtype(&self) -> ValueKind {
        self.dtype
    }

    pub fn num_segments(&self) -> usize {
        self.segment_paths.len()
    }

    /// Take the append sink for one segment. Each sink may be taken once;
    /// the caller finishes it (possibly on another thread) before `close`.
    pub fn output_iterator(&mut self, segment_id: usize) -> Result<SegmentSink> {
        if segment_id >= self.sinks.len() {
            return Err(XFrameError::OutOfRange(format!(
                "segment {} out of range ({} segments)",
                segment_id,
                self.sinks.len()
            )));
        }
        self.sinks[segment_id].take().ok_or_else(|| {
            XFrameError::Invariant(format!("segment {} sink already taken", segment_id))
        })
    }

    /// Take every remaining sink, in segment order.
    pub fn output_iterators(&mut self) -> Result<Vec<SegmentSink>> {
        (0..self.sinks.len())
            .map(|seg| self.output_iterator(seg))
            .collect()
    }

    pub fn attach_guard(&mut self, guard: Arc<TempDirGuard>) {
        self.keep_alive.push(guard);
    }

    /// Seal the column. `segment_counts[i]` is the row count returned by
    /// segment `i`'s finished sink.
    pub fn close(self, segment_counts: Vec<u64>) -> Result<SArray> {
        if segment_counts.len() != self.segment_paths.len() {
            return Err(XFrameError::Invariant(format!(
                "close got {} segment counts for {} segments",
                segment_counts.len(),
                self.segment_paths.len()
            )));
        }
        if let Some(open) = self.sinks.iter().position(|s| s.is_some()) {
            return Err(XFrameError::Invariant(format!(
                "segment {} sink was never taken and finished",
                open
            )));
        }

        let fs = LocalFileSystem;
        let content = ColumnIndex::build(
            &self.index_path,
            self.dtype,
            &self.segment_paths,
            &segment_counts,
        )?;
        fs.write_string(&self.index_path, &content)?;

        Ok(SArray {
            dtype: self.dtype,
            index_path: self.index_path,
            segment_paths: self.segment_paths,
            segment_sizes: segment_counts,
            keep_alive: self.keep_alive,
        })
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct OpenSegment {
    reader: SegmentReader,
    /// Global row index at the start of each block.
    block_starts: Vec<u64>,
}

/// Reads rows from a closed column. Each reader owns its file handles and
/// a one-block decode cache, so concurrent readers never contend.
pub struct SArrayReader {
    dtype: ValueKind,
    segment_paths: Vec<String>,
    stored_starts: Vec<u64>,
    len: u64,
    logical_sizes: Vec<u64>,
    logical_starts: Vec<u64>,
    open_segments: Vec<Option<OpenSegment>>,
    cache: Option<CachedBlock>,
}

struct CachedBlock {
    start_row: u64,
    values: Vec<Value>,
}

impl SArrayReader {
    fn new(array: &SArray, logical_sizes: Vec<u64>) -> Self {
        let stored_starts = prefix_sums(&array.segment_sizes);
        let logical_starts = prefix_sums(&logical_sizes);
        SArrayReader {
            dtype: array.dtype,
            segment_paths: array.segment_paths.clone(),
            stored_starts,
            len: array.len(),
            logical_sizes,
            logical_starts,
            open_segments: (0..array.segment_paths.len()).map(|_| None).collect(),
            cache: None,
        }
    }

    pub fn dtype(&self) -> ValueKind {
        self.dtype
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of logical segments (after any resegmentation).
    pub fn num_segments(&self) -> usize {
        self.logical_sizes.len()
    }

    /// Row range `[begin, end)` of a logical segment.
    pub fn segment_range(&self, segment_id: usize) -> Result<(u64, u64)> {
        if segment_id >= self.logical_sizes.len() {
            return Err(XFrameError::OutOfRange(format!(
                "segment {} out of range ({} segments)",
                segment_id,
                self.logical_sizes.len()
            )));
        }
        let begin = self.logical_starts[segment_id];
        Ok((begin, begin + self.logical_sizes[segment_id]))
    }

    /// Fill `out` with rows `[start, min(end, len))`; returns the number
    /// of rows appended. Reads past the end are clamped, not errors.
    pub fn read_rows(&mut self, start: u64, end: u64, out: &mut Vec<Value>) -> Result<usize> {
        let end = end.min(self.len);
        if start >= end {
            return Ok(0);
        }
        out.reserve((end - start) as usize);

        let mut row = start;
        let before = out.len();
        while row < end {
            let (block_start, values_len) = {
                let cached = self.ensure_block(row)?;
                (cached.start_row, cached.values.len() as u64)
            };
            let block_end = block_start + values_len;
            let take_end = end.min(block_end);
            let cached = self.cache.as_ref().unwrap();
            out.extend(
                cached.values[(row - block_start) as usize..(take_end - block_start) as usize]
                    .iter()
                    .cloned(),
            );
            row = take_end;
        }
        Ok(out.len() - before)
    }

    /// Sequential iterator over one logical segment.
    pub fn segment_iter(&mut self, segment_id: usize) -> Result<SegmentRowIter<'_>> {
        let (begin, end) = self.segment_range(segment_id)?;
        let batch = xframe_config::get_read_batch_size() as u64;
        Ok(SegmentRowIter {
            reader: self,
            pos: begin,
            end,
            batch,
            buffer: Vec::new(),
            buffer_pos: 0,
        })
    }

    /// Make the cache hold the block covering `row`; returns the cache.
    fn ensure_block(&mut self, row: u64) -> Result<&CachedBlock> {
        let hit = match &self.cache {
            Some(c) => row >= c.start_row && row < c.start_row + c.values.len() as u64,
            None => false,
        };
        if !hit {
            let seg = partition_of(&self.stored_starts, row);
            self.ensure_open(seg)?;
            let open = self.open_segments[seg].as_mut().unwrap();
            let block = partition_of(&open.block_starts, row);
            let values = open.reader.read_block(block)?;
            self.cache = Some(CachedBlock {
                start_row: open.block_starts[block],
                values,
            });
        }
        Ok(self.cache.as_ref().unwrap())
    }

    fn ensure_open(&mut self, seg: usize) -> Result<()> {
        if self.open_segments[seg].is_none() {
            let fs = LocalFileSystem;
            let reader = SegmentReader::open(fs.open_read(&self.segment_paths[seg])?)?;
            let seg_start = self.stored_starts[seg];
            let mut block_starts = Vec::with_capacity(reader.num_blocks() + 1);
            let mut acc = seg_start;
            for b in 0..reader.num_blocks() {
                block_starts.push(acc);
                acc += reader.block_info(b).num_elem;
            }
            // Trailing sentinel so block lookup mirrors segment lookup.
            block_starts.push(acc);
            self.open_segments[seg] = Some(OpenSegment {
                reader,
                block_starts,
            });
        }
        Ok(())
    }
}

/// Sequential row iterator over one segment of a column reader.
pub struct SegmentRowIter<'a> {
    reader: &'a mut SArrayReader,
    pos: u64,
    end: u64,
    batch: u64,
    buffer: Vec<Value>,
    buffer_pos: usize,
}

impl Iterator for SegmentRowIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer_pos >= self.buffer.len() {
            if self.pos >= self.end {
                return None;
            }
            self.buffer.clear();
            self.buffer_pos = 0;
            let chunk_end = (self.pos + self.batch).min(self.end);
            if let Err(e) = self.reader.read_rows(self.pos, chunk_end, &mut self.buffer) {
                self.pos = self.end; // poison further iteration
                return Some(Err(e));
            }
            self.pos = chunk_end;
            if self.buffer.is_empty() {
                return None;
            }
        }
        let v = self.buffer[self.buffer_pos].clone();
        self.buffer_pos += 1;
        Some(Ok(v))
    }
}

/// Exclusive prefix sums: `[0, s0, s0+s1, ...]` (length `sizes.len()+1`).
fn prefix_sums(sizes: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(sizes.len() + 1);
    let mut acc = 0u64;
    out.push(0);
    for s in sizes {
        acc += s;
        out.push(acc);
    }
    out
}

/// Index of the partition containing `row`, given exclusive prefix sums.
fn partition_of(starts: &[u64], row: u64) -> usize {
    // starts has a trailing total; the answer is in 0..starts.len()-1.
    match starts.binary_search(&row) {
        Ok(i) => {
            // Skip empty partitions that share the same start.
            let mut i = i;
            while i + 1 < starts.len() - 1 && starts[i + 1] == row {
                i += 1;
            }
            i.min(starts.len().saturating_sub(2))
        }
        Err(i) => i - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_column(values: &[Value], dtype: ValueKind, num_segments: usize) -> SArray {
        let mut writer = SArrayWriter::open_anonymous(dtype, num_segments).unwrap();
        let sinks = writer.output_iterators().unwrap();
        let per_seg = values.len().div_ceil(num_segments).max(1);
        let mut counts = vec![0u64; num_segments];
        for (seg, sink) in sinks.into_iter().enumerate() {
            let lo = (seg * per_seg).min(values.len());
            let hi = ((seg + 1) * per_seg).min(values.len());
            let mut sink = sink;
            sink.write_all(values[lo..hi].iter().cloned()).unwrap();
            counts[seg] = sink.finish().unwrap();
        }
        writer.close(counts).unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let values: Vec<Value> = (0..10_000).map(Value::Integer).collect();
        let col = build_column(&values, ValueKind::Integer, 4);

        assert_eq!(col.len(), 10_000);
        assert_eq!(col.num_segments(), 4);
        assert_eq!(col.read_all().unwrap(), values);
    }

    #[test]
    fn test_read_rows_ranges() {
        let values: Vec<Value> = (0..1000).map(Value::Integer).collect();
        let col = build_column(&values, ValueKind::Integer, 3);
        let mut reader = col.reader(None).unwrap();

        let mut out = Vec::new();
        let n = reader.read_rows(100, 200, &mut out).unwrap();
        assert_eq!(n, 100);
        assert_eq!(out, values[100..200]);

        // Clamped read past the end.
        out.clear();
        let n = reader.read_rows(950, 2000, &mut out).unwrap();
        assert_eq!(n, 50);
        assert_eq!(out, values[950..]);

        // Empty range.
        out.clear();
        assert_eq!(reader.read_rows(500, 500, &mut out).unwrap(), 0);
    }

    #[test]
    fn test_resegmentation() {
        let values: Vec<Value> = (0..100).map(Value::Integer).collect();
        let col = build_column(&values, ValueKind::Integer, 2);

        let mut reader = col.reader(Some(&[10, 60, 30])).unwrap();
        assert_eq!(reader.num_segments(), 3);
        assert_eq!(reader.segment_range(1).unwrap(), (10, 70));

        let seg1: Vec<Value> = reader
            .segment_iter(1)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(seg1, values[10..70]);

        // Mismatched segmentation is rejected.
        assert!(col.reader(Some(&[50, 49])).is_err());
    }

    #[test]
    fn test_segment_iter_exactly_once_coverage() {
        let values: Vec<Value> = (0..500).map(|i| Value::Float(i as f64)).collect();
        let col = build_column(&values, ValueKind::Float, 4);
        let mut reader = col.reader(None).unwrap();

        let mut seen = Vec::new();
        for seg in 0..reader.num_segments() {
            let rows: Vec<Value> = reader
                .segment_iter(seg)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            seen.extend(rows);
        }
        assert_eq!(seen, values);
    }

    #[test]
    fn test_reopen_from_index() {
        let values: Vec<Value> = (0..50).map(|i| Value::String(format!("s{}", i).into())).collect();
        let col = build_column(&values, ValueKind::String, 2);

        let reopened = SArray::open(col.index_path()).unwrap();
        assert_eq!(reopened.dtype(), ValueKind::String);
        assert_eq!(reopened.segment_sizes(), col.segment_sizes());
        assert_eq!(reopened.read_all().unwrap(), values);
    }

    #[test]
    fn test_sink_taken_once() {
        let mut writer = SArrayWriter::open_anonymous(ValueKind::Integer, 2).unwrap();
        let _sink = writer.output_iterator(0).unwrap();
        assert!(writer.output_iterator(0).is_err());
    }

    #[test]
    fn test_empty_segments_allowed() {
        // All rows land in segment 0; segment 1 stays empty.
        let mut writer = SArrayWriter::open_anonymous(ValueKind::Integer, 2).unwrap();
        let mut s0 = writer.output_iterator(0).unwrap();
        let s1 = writer.output_iterator(1).unwrap();
        s0.write_all((0..10).map(Value::Integer)).unwrap();
        let c0 = s0.finish().unwrap();
        let c1 = s1.finish().unwrap();
        let col = writer.close(vec![c0, c1]).unwrap();

        assert_eq!(col.segment_sizes(), &[10, 0]);
        assert_eq!(col.len(), 10);
        let all: Vec<Value> = col.read_all().unwrap();
        assert_eq!(all.len(), 10);
    }
}
