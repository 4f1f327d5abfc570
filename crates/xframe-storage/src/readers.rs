//! Reader facades over frames.
//!
//! [`RowIter`] walks one frame segment sequentially, advancing every
//! column in lockstep. [`ParallelRowsIter`] splits a row range into equal
//! slices, one per worker; each worker's [`RowCursor`] keeps per-column
//! row buffers of `READ_BATCH_SIZE` and refills on exhaustion. Multiple
//! frames of equal length expose their columns under a single flat index
//! via the precomputed `column_offsets` prefix sums.

use std::sync::Arc;

use xframe_types::error::{Result, XFrameError};
use xframe_types::value::Value;

use crate::frame::XFrame;
use crate::sarray::SArrayReader;

/// Sequential row iterator over one frame segment.
pub struct RowIter {
    cursor: RowCursor,
}

impl RowIter {
    pub fn new(frame: &Arc<XFrame>, segment_id: usize) -> Result<Self> {
        let sizes = frame.segment_sizes();
        if segment_id >= sizes.len() {
            return Err(XFrameError::OutOfRange(format!(
                "segment {} out of range ({} segments)",
                segment_id,
                sizes.len()
            )));
        }
        let begin: u64 = sizes[..segment_id].iter().sum();
        let end = begin + sizes[segment_id];
        let cursor = RowCursor::open(std::slice::from_ref(frame), begin, end)?;
        Ok(RowIter { cursor })
    }

    /// Read the next row into `out`. Returns false at end of segment.
    pub fn next_row(&mut self, out: &mut Vec<Value>) -> Result<bool> {
        self.cursor.next_row(out)
    }
}

/// Splits `[row_start, row_end)` of one or more equal-length frames into
/// equal worker slices.
pub struct ParallelRowsIter {
    frames: Vec<Arc<XFrame>>,
    column_offsets: Vec<usize>,
    row_start: u64,
    row_end: u64,
    num_slices: usize,
}

impl ParallelRowsIter {
    pub fn new(frames: Vec<Arc<XFrame>>, num_slices: usize) -> Result<Self> {
        let num_rows = frames.first().map(|f| f.num_rows()).unwrap_or(0);
        Self::with_range(frames, 0, num_rows, num_slices)
    }

    pub fn with_range(
        frames: Vec<Arc<XFrame>>,
        row_start: u64,
        row_end: u64,
        num_slices: usize,
    ) -> Result<Self> {
        if frames.is_empty() {
            return Err(XFrameError::OutOfRange(
                "parallel iteration needs at least one frame".to_string(),
            ));
        }
        let num_rows = frames[0].num_rows();
        for f in &frames[1..] {
            if f.num_rows() != num_rows {
                return Err(XFrameError::SchemaMismatch(format!(
                    "parallel iteration over frames of different lengths ({} vs {})",
                    num_rows,
                    f.num_rows()
                )));
            }
        }
        if row_end > num_rows || row_start > row_end {
            return Err(XFrameError::OutOfRange(format!(
                "row range [{}, {}) exceeds frame length {}",
                row_start, row_end, num_rows
            )));
        }

        // Flat column index across frames.
        let mut column_offsets = Vec::with_capacity(frames.len() + 1);
        let mut acc = 0usize;
        column_offsets.push(0);
        for f in &frames {
            acc += f.num_columns();
            column_offsets.push(acc);
        }

        Ok(ParallelRowsIter {
            frames,
            column_offsets,
            row_start,
            row_end,
            num_slices: num_slices.max(1),
        })
    }

    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    /// Prefix sums mapping each frame to its first flat column index.
    pub fn column_offsets(&self) -> &[usize] {
        &self.column_offsets
    }

    pub fn total_columns(&self) -> usize {
        *self.column_offsets.last().unwrap()
    }

    /// Row range `[begin, end)` owned by one slice; the last slice takes
    /// the remainder.
    pub fn slice_range(&self, slice: usize) -> (u64, u64) {
        let total = self.row_end - self.row_start;
        let per_slice = total / self.num_slices as u64;
        let begin = self.row_start + slice as u64 * per_slice;
        let end = if slice + 1 == self.num_slices {
            self.row_end
        } else {
            begin + per_slice
        };
        (begin, end)
    }

    /// Open the cursor for one slice. Cursors own their file handles, so
    /// every worker can read concurrently.
    pub fn cursor(&self, slice: usize) -> Result<RowCursor> {
        if slice >= self.num_slices {
            return Err(XFrameError::OutOfRange(format!(
                "slice {} out of range ({} slices)",
                slice, self.num_slices
            )));
        }
        let (begin, end) = self.slice_range(slice);
        RowCursor::open(&self.frames, begin, end)
    }
}

/// Buffered cursor over a row range, yielding rows across all columns of
/// all frames (in flat column order).
pub struct RowCursor {
    readers: Vec<SArrayReader>,
    buffers: Vec<Vec<Value>>,
    buffer_start: u64,
    buffer_len: usize,
    buffer_pos: usize,
    row: u64,
    end: u64,
    batch: u64,
}

impl RowCursor {
    fn open(frames: &[Arc<XFrame>], begin: u64, end: u64) -> Result<Self> {
        let mut readers = Vec::new();
        for frame in frames {
            for col in frame.columns() {
                readers.push(col.reader(None)?);
            }
        }
        let num_readers = readers.len();
        Ok(RowCursor {
            readers,
            buffers: vec![Vec::new(); num_readers],
            buffer_start: begin,
            buffer_len: 0,
            buffer_pos: 0,
            row: begin,
            end,
            batch: xframe_config::get_read_batch_size() as u64,
        })
    }

    /// Global index of the next row `next_row` would return.
    pub fn next_row_index(&self) -> u64 {
        self.row
    }

    pub fn rows_remaining(&self) -> u64 {
        self.end - self.row
    }

    /// Read the next row into `out` (cleared first). Returns false at the
    /// end of the slice.
    pub fn next_row(&mut self, out: &mut Vec<Value>) -> Result<bool> {
        if self.buffer_pos >= self.buffer_len {
            if self.row >= self.end {
                return Ok(false);
            }
            let chunk_end = (self.row + self.batch).min(self.end);
            for (reader, buffer) in self.readers.iter_mut().zip(self.buffers.iter_mut()) {
                buffer.clear();
                reader.read_rows(self.row, chunk_end, buffer)?;
            }
            self.buffer_start = self.row;
            self.buffer_len = (chunk_end - self.row) as usize;
            self.buffer_pos = 0;
        }

        out.clear();
        out.extend(self.buffers.iter().map(|b| b[self.buffer_pos].clone()));
        self.buffer_pos += 1;
        self.row = self.buffer_start + self.buffer_pos as u64;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::XFrameWriter;
    use xframe_types::value::ValueKind;

    fn sample_frame(n: i64, num_segments: usize) -> Arc<XFrame> {
        let mut writer = XFrameWriter::open_anonymous(
            &["id", "tag"],
            &[ValueKind::Integer, ValueKind::String],
            num_segments,
        )
        .unwrap();
        let per_seg = (n as usize).div_ceil(num_segments).max(1);
        let mut finished = Vec::new();
        for seg in 0..num_segments {
            let lo = (seg * per_seg).min(n as usize) as i64;
            let hi = (((seg + 1) * per_seg).min(n as usize)) as i64;
            let mut sink = writer.get_output_iterator(seg).unwrap();
            for i in lo..hi {
                sink.write_row(&[
                    Value::Integer(i),
                    Value::String(format!("t{}", i).into()),
                ])
                .unwrap();
            }
            finished.push(sink.finish().unwrap());
        }
        writer.close(&finished).unwrap()
    }

    #[test]
    fn test_row_iter_lockstep() {
        let frame = sample_frame(100, 3);
        let mut all = Vec::new();
        for seg in 0..frame.num_segments() {
            let mut iter = RowIter::new(&frame, seg).unwrap();
            let mut row = Vec::new();
            while iter.next_row(&mut row).unwrap() {
                all.push(row.clone());
            }
        }
        assert_eq!(all.len(), 100);
        for (i, row) in all.iter().enumerate() {
            assert_eq!(row[0], Value::Integer(i as i64));
            assert_eq!(row[1], Value::String(format!("t{}", i).into()));
        }
    }

    #[test]
    fn test_parallel_slices_cover_exactly_once() {
        let frame = sample_frame(1003, 4);
        let iter = ParallelRowsIter::new(vec![frame], 7).unwrap();

        let mut all = Vec::new();
        for slice in 0..iter.num_slices() {
            let mut cursor = iter.cursor(slice).unwrap();
            let mut row = Vec::new();
            while cursor.next_row(&mut row).unwrap() {
                all.push(row[0].clone());
            }
        }
        assert_eq!(all.len(), 1003);
        for (i, v) in all.iter().enumerate() {
            assert_eq!(*v, Value::Integer(i as i64));
        }
    }

    #[test]
    fn test_multi_frame_flat_columns() {
        let a = sample_frame(20, 2);
        let b = sample_frame(20, 3); // different segmentation is fine
        let iter = ParallelRowsIter::new(vec![a, b], 2).unwrap();

        assert_eq!(iter.column_offsets(), &[0, 2, 4]);
        assert_eq!(iter.total_columns(), 4);

        let mut cursor = iter.cursor(0).unwrap();
        let mut row = Vec::new();
        assert!(cursor.next_row(&mut row).unwrap());
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], row[2]); // same id from both frames
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let a = sample_frame(10, 1);
        let b = sample_frame(11, 1);
        assert!(ParallelRowsIter::new(vec![a, b], 2).is_err());
    }

    #[test]
    fn test_range_restriction() {
        let frame = sample_frame(100, 2);
        let iter = ParallelRowsIter::with_range(vec![frame], 10, 20, 3).unwrap();
        let mut seen = Vec::new();
        for s in 0..iter.num_slices() {
            let mut cursor = iter.cursor(s).unwrap();
            let mut row = Vec::new();
            while cursor.next_row(&mut row).unwrap() {
                seen.push(row[0].clone());
            }
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], Value::Integer(10));
        assert_eq!(seen[9], Value::Integer(19));
    }
}
