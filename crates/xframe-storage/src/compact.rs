//! Segment compaction.
//!
//! Writers with a high fan-out (shuffles, incremental appends) can leave a
//! column as a long tail of tiny segments. Fast compaction finds runs of
//! small segments and splices each run into one segment by copying raw
//! block bytes, never decoding values. The slow fallback rewrites the
//! whole frame with a bounded segment count.

use std::sync::Arc;

use rayon::prelude::*;

use xframe_io::local_fs::LocalFileSystem;
use xframe_io::temp::alloc_temp_dir;
use xframe_io::vfs::VirtualFileSystem;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::Value;

use crate::frame::{XFrame, XFrameWriter};
use crate::index::ColumnIndex;
use crate::readers::ParallelRowsIter;
use crate::sarray::SArray;
use crate::segment_reader::SegmentReader;
use crate::segment_writer::SegmentWriter;

/// Number of blocks per segment of a column (reads footers only).
fn segment_block_counts(array: &SArray) -> Result<Vec<usize>> {
    let fs = LocalFileSystem;
    array
        .segment_paths()
        .iter()
        .map(|path| Ok(SegmentReader::open(fs.open_read(path)?)?.num_blocks()))
        .collect()
}

/// Runs `[begin, end)` of two or more consecutive segments where `small`
/// holds for every member.
fn find_small_runs(small: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut begin = None;
    for (i, &s) in small.iter().enumerate() {
        match (s, begin) {
            (true, None) => begin = Some(i),
            (false, Some(b)) => {
                if i - b >= 2 {
                    runs.push((b, i));
                }
                begin = None;
            }
            _ => {}
        }
    }
    if let Some(b) = begin {
        if small.len() - b >= 2 {
            runs.push((b, small.len()));
        }
    }
    runs
}

/// Splice the given runs of a column into single segments by copying raw
/// block bytes. Untouched segments are referenced in place.
fn splice_column(array: &SArray, runs: &[(usize, usize)]) -> Result<SArray> {
    let fs = LocalFileSystem;
    let (dir, guard) = alloc_temp_dir("compact")?;

    let mut new_paths = Vec::new();
    let mut new_sizes = Vec::new();
    let mut merged_idx = 0usize;
    let mut seg = 0usize;

    while seg < array.num_segments() {
        if let Some(&(begin, end)) = runs.iter().find(|(b, _)| *b == seg) {
            let path = std::path::Path::new(&dir)
                .join(format!("m_compact.{:04}", merged_idx))
                .to_string_lossy()
                .into_owned();
            merged_idx += 1;

            let mut writer = SegmentWriter::new(fs.open_write(&path)?);
            for s in begin..end {
                let mut reader = SegmentReader::open(fs.open_read(&array.segment_paths()[s])?)?;
                for b in 0..reader.num_blocks() {
                    let (info, raw) = reader.read_raw_block(b)?;
                    writer.write_raw_block(&info, &raw)?;
                }
            }
            let rows = writer.finish()?;
            let expected: u64 = array.segment_sizes()[begin..end].iter().sum();
            if rows != expected {
                return Err(XFrameError::Invariant(format!(
                    "compacted run [{}, {}) holds {} rows, expected {}",
                    begin, end, rows, expected
                )));
            }
            new_paths.push(path);
            new_sizes.push(rows);
            seg = end;
        } else {
            new_paths.push(array.segment_paths()[seg].clone());
            new_sizes.push(array.segment_sizes()[seg]);
            seg += 1;
        }
    }

    let index_path = std::path::Path::new(&dir)
        .join("m_compact.sidx")
        .to_string_lossy()
        .into_owned();
    let content = ColumnIndex::build(&index_path, array.dtype(), &new_paths, &new_sizes)?;
    fs.write_string(&index_path, &content)?;

    let mut keep_alive = array.keep_alive().to_vec();
    keep_alive.push(guard);
    Ok(SArray::from_parts(
        array.dtype(),
        index_path,
        new_paths,
        new_sizes,
        keep_alive,
    ))
}

/// Fast-compact one column. Returns the compacted column, or `None` when
/// no run of small segments exists.
pub fn sarray_fast_compact(array: &SArray) -> Result<Option<SArray>> {
    let threshold = xframe_config::get_fast_compact_blocks_in_small_segment();
    let counts = segment_block_counts(array)?;
    let small: Vec<bool> = counts.iter().map(|&c| c < threshold).collect();
    let runs = find_small_runs(&small);
    if runs.is_empty() {
        return Ok(None);
    }
    log::debug!(
        "fast compact: {} -> {} segments",
        array.num_segments(),
        array.num_segments() - runs.iter().map(|(b, e)| e - b - 1).sum::<usize>()
    );
    Ok(Some(splice_column(array, &runs)?))
}

/// Fast-compact a frame. Only runs that are small in *every* column are
/// merged, so all columns keep one shared segmentation. Returns the new
/// frame and whether any work happened.
pub fn xframe_fast_compact(frame: &Arc<XFrame>) -> Result<(Arc<XFrame>, bool)> {
    if frame.num_columns() == 0 {
        return Ok((frame.clone(), false));
    }
    let threshold = xframe_config::get_fast_compact_blocks_in_small_segment();

    let mut small = vec![true; frame.num_segments()];
    for col in frame.columns() {
        for (s, count) in segment_block_counts(col)?.iter().enumerate() {
            small[s] = small[s] && *count < threshold;
        }
    }
    let runs = find_small_runs(&small);
    if runs.is_empty() {
        return Ok((frame.clone(), false));
    }

    let mut out = XFrame::new();
    for (name, col) in frame.column_names().iter().zip(frame.columns()) {
        out.add_column(Some(name.as_str()), Arc::new(splice_column(col, &runs)?))?;
    }
    Ok((out.seal(), true))
}

/// Compact a frame to at most `target` segments: fast compaction first,
/// then a whole-frame rewrite with `min(target, CPU count)` segments if
/// the count is still above target.
pub fn xframe_compact(frame: &Arc<XFrame>, target: usize) -> Result<Arc<XFrame>> {
    let target = target.max(1);
    let (frame, did_fast) = xframe_fast_compact(frame)?;
    if frame.num_segments() <= target || frame.num_columns() == 0 {
        if did_fast {
            log::debug!("compact: fast pass reached {} segments", frame.num_segments());
        }
        return Ok(frame);
    }

    let num_segments = target.min(rayon::current_num_threads()).max(1);
    log::debug!(
        "compact: rewriting {} segments into {}",
        frame.num_segments(),
        num_segments
    );
    rewrite_frame(&frame, num_segments)
}

/// Rewrite a frame with a new even segmentation, one worker per segment.
pub fn rewrite_frame(frame: &Arc<XFrame>, num_segments: usize) -> Result<Arc<XFrame>> {
    let names: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&names, &frame.column_types(), num_segments)?;
    let sinks = writer.get_output_iterators()?;
    let source = ParallelRowsIter::new(vec![frame.clone()], num_segments)?;

    let finished: Vec<(usize, u64)> = sinks
        .into_par_iter()
        .enumerate()
        .map(|(seg, mut sink)| {
            let mut cursor = source.cursor(seg)?;
            let mut row: Vec<Value> = Vec::new();
            while cursor.next_row(&mut row)? {
                sink.write_row(&row)?;
            }
            sink.finish()
        })
        .collect::<Result<_>>()?;

    writer.close(&finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::XFrameWriter;
    use xframe_types::value::ValueKind;

    /// One row per segment makes every segment a single tiny block.
    fn fragmented_frame(num_segments: usize) -> Arc<XFrame> {
        let mut writer = XFrameWriter::open_anonymous(
            &["v"],
            &[ValueKind::Integer],
            num_segments,
        )
        .unwrap();
        let mut finished = Vec::new();
        for seg in 0..num_segments {
            let mut sink = writer.get_output_iterator(seg).unwrap();
            sink.write_row(&[Value::Integer(seg as i64)]).unwrap();
            finished.push(sink.finish().unwrap());
        }
        writer.close(&finished).unwrap()
    }

    #[test]
    fn test_find_small_runs() {
        assert_eq!(
            find_small_runs(&[true, true, false, true, true, true]),
            vec![(0, 2), (3, 6)]
        );
        assert!(find_small_runs(&[true, false, true]).is_empty());
        assert!(find_small_runs(&[false, false]).is_empty());
        assert_eq!(find_small_runs(&[true, true]), vec![(0, 2)]);
    }

    #[test]
    fn test_fast_compact_preserves_content() {
        let frame = fragmented_frame(128);
        let expected = frame.columns()[0].read_all().unwrap();

        let (compacted, did_work) = xframe_fast_compact(&frame).unwrap();
        assert!(did_work);
        assert!(compacted.num_segments() < frame.num_segments());
        assert_eq!(compacted.num_rows(), 128);
        assert_eq!(compacted.columns()[0].read_all().unwrap(), expected);
    }

    #[test]
    fn test_fast_compact_idempotent_on_large_segments() {
        // A single segment of many blocks is not "small".
        let mut writer =
            XFrameWriter::open_anonymous(&["v"], &[ValueKind::Integer], 1).unwrap();
        let mut sink = writer.get_output_iterator(0).unwrap();
        for i in 0..100_000i64 {
            sink.write_row(&[Value::Integer(i)]).unwrap();
        }
        let finished = vec![sink.finish().unwrap()];
        let frame = writer.close(&finished).unwrap();

        let (compacted, did_work) = xframe_fast_compact(&frame).unwrap();
        assert!(!did_work);
        assert_eq!(compacted.num_segments(), 1);
    }

    #[test]
    fn test_compact_to_target() {
        let frame = fragmented_frame(128);
        let expected = frame.columns()[0].read_all().unwrap();

        let compacted = xframe_compact(&frame, 8).unwrap();
        assert!(compacted.num_segments() <= 8);
        assert_eq!(compacted.num_rows(), 128);
        assert_eq!(compacted.columns()[0].read_all().unwrap(), expected);
    }

    #[test]
    fn test_sarray_fast_compact() {
        let frame = fragmented_frame(16);
        let col = frame.columns()[0].clone();
        let expected = col.read_all().unwrap();

        let compacted = sarray_fast_compact(&col).unwrap().expect("should compact");
        assert!(compacted.num_segments() < col.num_segments());
        assert_eq!(compacted.read_all().unwrap(), expected);
        assert_eq!(compacted.len(), col.len());
    }

    #[test]
    fn test_rewrite_frame_row_order() {
        let frame = fragmented_frame(10);
        let rewritten = rewrite_frame(&frame, 3).unwrap();
        assert_eq!(rewritten.num_segments(), 3);
        assert_eq!(
            rewritten.columns()[0].read_all().unwrap(),
            frame.columns()[0].read_all().unwrap()
        );
    }
}
