//! Forward-map permutation of a frame's rows.
//!
//! Given a forward map `m` (a permutation of `[0, len)`), input row `i`
//! lands at output position `m[i]`. The hot path does not validate the
//! map; debug builds run a dense-bitset coverage check first. A map that
//! is not a permutation yields ill-defined output (a missing target slot
//! is reported, a doubly-hit slot is not).

use std::sync::Arc;

use rayon::prelude::*;

use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_storage::readers::ParallelRowsIter;
use xframe_storage::sarray::SArray;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

/// Write input row `i` at output position `forward_map[i]`.
pub fn permute_xframe(frame: &Arc<XFrame>, forward_map: &SArray) -> Result<Arc<XFrame>> {
    let num_rows = frame.num_rows();
    if forward_map.len() != num_rows {
        return Err(XFrameError::SchemaMismatch(format!(
            "forward map has {} entries for {} rows",
            forward_map.len(),
            num_rows
        )));
    }
    if forward_map.dtype() != ValueKind::Integer {
        return Err(XFrameError::SchemaMismatch(format!(
            "forward map must be an integer column, found {}",
            forward_map.dtype()
        )));
    }

    #[cfg(debug_assertions)]
    validate_permutation(forward_map, num_rows)?;

    let num_segments = frame.num_segments().max(1).min(rayon::current_num_threads());
    let names: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&names, &frame.column_types(), num_segments)?;
    let sinks = writer.get_output_iterators()?;

    // Each worker owns one output range and scans the whole input for the
    // rows that land in it.
    let per_seg = num_rows / num_segments as u64;
    let batch = xframe_config::get_read_batch_size() as u64;

    let finished: Vec<(usize, u64)> = sinks
        .into_par_iter()
        .enumerate()
        .map(|(seg, mut sink)| -> Result<(usize, u64)> {
            let out_lo = seg as u64 * per_seg;
            let out_hi = if seg + 1 == num_segments {
                num_rows
            } else {
                out_lo + per_seg
            };
            let slots = (out_hi - out_lo) as usize;
            let mut pending: Vec<Option<Vec<Value>>> = vec![None; slots];

            let source = ParallelRowsIter::new(vec![frame.clone()], 1)?;
            let mut cursor = source.cursor(0)?;
            let mut map_reader = forward_map.reader(None)?;
            let mut targets: Vec<Value> = Vec::new();
            let mut row: Vec<Value> = Vec::new();

            let mut pos = 0u64;
            while pos < num_rows {
                let chunk_end = (pos + batch).min(num_rows);
                targets.clear();
                map_reader.read_rows(pos, chunk_end, &mut targets)?;
                for target in &targets {
                    if !cursor.next_row(&mut row)? {
                        return Err(XFrameError::Invariant(
                            "input ended before its forward map".to_string(),
                        ));
                    }
                    let t = match target {
                        Value::Integer(t) if *t >= 0 => *t as u64,
                        other => {
                            return Err(XFrameError::OutOfRange(format!(
                                "forward map entry {} is not a row position",
                                other
                            )));
                        }
                    };
                    if t >= out_lo && t < out_hi {
                        pending[(t - out_lo) as usize] = Some(row.clone());
                    }
                }
                pos = chunk_end;
            }

            for (offset, slot) in pending.into_iter().enumerate() {
                match slot {
                    Some(row) => sink.write_row(&row)?,
                    None => {
                        return Err(XFrameError::Invariant(format!(
                            "forward map never produced output row {}",
                            out_lo + offset as u64
                        )));
                    }
                }
            }
            sink.finish()
        })
        .collect::<Result<_>>()?;

    writer.close(&finished)
}

/// Debug-only coverage check: every position hit exactly once.
#[cfg(debug_assertions)]
fn validate_permutation(forward_map: &SArray, num_rows: u64) -> Result<()> {
    use xframe_types::bitset::DenseBitset;

    let mut seen = DenseBitset::new(num_rows as usize);
    let mut reader = forward_map.reader(None)?;
    let mut out = Vec::new();
    reader.read_rows(0, num_rows, &mut out)?;
    for v in &out {
        match v {
            Value::Integer(t) if *t >= 0 && (*t as u64) < num_rows => {
                let t = *t as usize;
                if seen.get(t) {
                    return Err(XFrameError::Invariant(format!(
                        "forward map hits position {} twice",
                        t
                    )));
                }
                seen.set(t);
            }
            other => {
                return Err(XFrameError::Invariant(format!(
                    "forward map entry {} is not a row position",
                    other
                )));
            }
        }
    }
    if seen.count_ones() != num_rows as usize {
        return Err(XFrameError::Invariant(
            "forward map does not cover all output positions".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xframe_storage::sarray::SArrayWriter;

    fn int_frame(values: &[i64], num_segments: usize) -> Arc<XFrame> {
        let mut writer =
            XFrameWriter::open_anonymous(&["v"], &[ValueKind::Integer], num_segments).unwrap();
        let per_seg = values.len().div_ceil(num_segments).max(1);
        let mut finished = Vec::new();
        for seg in 0..num_segments {
            let lo = (seg * per_seg).min(values.len());
            let hi = ((seg + 1) * per_seg).min(values.len());
            let mut sink = writer.get_output_iterator(seg).unwrap();
            for &v in &values[lo..hi] {
                sink.write_row(&[Value::Integer(v)]).unwrap();
            }
            finished.push(sink.finish().unwrap());
        }
        writer.close(&finished).unwrap()
    }

    fn int_column(values: &[i64]) -> SArray {
        let mut writer = SArrayWriter::open_anonymous(ValueKind::Integer, 1).unwrap();
        let mut sink = writer.output_iterator(0).unwrap();
        sink.write_all(values.iter().map(|&v| Value::Integer(v)))
            .unwrap();
        let count = sink.finish().unwrap();
        writer.close(vec![count]).unwrap()
    }

    #[test]
    fn test_reversal_permutation() {
        let n = 1000i64;
        let values: Vec<i64> = (0..n).collect();
        let frame = int_frame(&values, 3);
        let map = int_column(&(0..n).map(|i| n - 1 - i).collect::<Vec<_>>());

        let permuted = permute_xframe(&frame, &map).unwrap();
        assert_eq!(permuted.num_rows(), n as u64);
        let out = permuted.columns()[0].read_all().unwrap();
        for (i, v) in out.iter().enumerate() {
            assert_eq!(*v, Value::Integer(n - 1 - i as i64));
        }
    }

    #[test]
    fn test_identity_permutation() {
        let values: Vec<i64> = (0..100).collect();
        let frame = int_frame(&values, 2);
        let map = int_column(&(0..100).collect::<Vec<_>>());
        let permuted = permute_xframe(&frame, &map).unwrap();
        assert_eq!(
            permuted.columns()[0].read_all().unwrap(),
            frame.columns()[0].read_all().unwrap()
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let frame = int_frame(&[1, 2, 3], 1);
        let map = int_column(&[0, 1]);
        assert!(permute_xframe(&frame, &map).is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_non_permutation_caught_in_debug() {
        let frame = int_frame(&[1, 2, 3], 1);
        let map = int_column(&[0, 0, 2]);
        assert!(matches!(
            permute_xframe(&frame, &map),
            Err(XFrameError::Invariant(_))
        ));
    }
}
