//! Hash-partition a frame's rows into N single-segment output frames.
//!
//! CPU-count workers read disjoint row ranges. Each worker keeps one
//! buffered writer per output bucket; at the soft byte limit it attempts
//! an opportunistic (`try_lock`) flush into the bucket's append sink, and
//! at the hard limit it blocks for the lock. Row order within a bucket is
//! not guaranteed.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use xframe_storage::frame::{FrameSegmentSink, XFrame, XFrameWriter};
use xframe_storage::readers::ParallelRowsIter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::Value;

/// Hashes one row to a bucket ordinal (taken modulo N).
pub type RowHashFn = dyn Fn(&[Value]) -> u64 + Send + Sync;

/// Observes each row before it is buffered: `(row, worker_id)`.
pub type EmitCallback = dyn Fn(&[Value], usize) + Send + Sync;

/// Per-bucket write buffer with soft/hard backpressure.
struct BufferedRowWriter {
    rows: Vec<Vec<Value>>,
    bytes: usize,
    soft_limit: usize,
    hard_limit: usize,
}

impl BufferedRowWriter {
    fn new(soft_limit: usize, hard_limit: usize) -> Self {
        BufferedRowWriter {
            rows: Vec::new(),
            bytes: 0,
            soft_limit,
            hard_limit: hard_limit.max(soft_limit),
        }
    }

    fn write(&mut self, row: Vec<Value>, sink: &Mutex<FrameSegmentSink>) -> Result<()> {
        self.bytes += row.iter().map(|v| v.estimate_bytes()).sum::<usize>();
        self.rows.push(row);

        if self.bytes >= self.hard_limit {
            let mut guard = sink.lock();
            self.drain_into(&mut guard)?;
        } else if self.bytes >= self.soft_limit {
            if let Some(mut guard) = sink.try_lock() {
                self.drain_into(&mut guard)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, sink: &Mutex<FrameSegmentSink>) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let mut guard = sink.lock();
        self.drain_into(&mut guard)
    }

    fn drain_into(&mut self, sink: &mut FrameSegmentSink) -> Result<()> {
        for row in self.rows.drain(..) {
            sink.write_row(&row)?;
        }
        self.bytes = 0;
        Ok(())
    }
}

/// Shuffle `frame`'s rows into `n` output frames by `hash_fn(row) % n`.
/// Output frames share the input schema and have one segment each; empty
/// outputs are legal.
pub fn shuffle(
    frame: &Arc<XFrame>,
    n: usize,
    hash_fn: &RowHashFn,
    emit_cb: Option<&EmitCallback>,
) -> Result<Vec<Arc<XFrame>>> {
    if n == 0 {
        return Err(XFrameError::OutOfRange(
            "shuffle needs at least one output bucket".to_string(),
        ));
    }

    let names: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    let dtypes = frame.column_types();

    let mut writers = Vec::with_capacity(n);
    let mut sinks = Vec::with_capacity(n);
    for _ in 0..n {
        let mut writer = XFrameWriter::open_anonymous(&names, &dtypes, 1)?;
        sinks.push(Mutex::new(writer.get_output_iterator(0)?));
        writers.push(writer);
    }

    let num_workers = rayon::current_num_threads().max(1);
    let source = ParallelRowsIter::new(vec![frame.clone()], num_workers)?;
    let soft_limit = xframe_config::get_writer_buffer_soft_limit();
    let hard_limit = xframe_config::get_writer_buffer_hard_limit();
    log::debug!(
        "shuffle: {} rows into {} buckets with {} workers",
        frame.num_rows(),
        n,
        num_workers
    );

    (0..num_workers)
        .into_par_iter()
        .try_for_each(|worker_id| -> Result<()> {
            let mut cursor = source.cursor(worker_id)?;
            let mut buffers: Vec<BufferedRowWriter> = (0..n)
                .map(|_| BufferedRowWriter::new(soft_limit, hard_limit))
                .collect();

            let mut row: Vec<Value> = Vec::new();
            while cursor.next_row(&mut row)? {
                let bucket = (hash_fn(&row) % n as u64) as usize;
                if let Some(cb) = emit_cb {
                    cb(&row, worker_id);
                }
                buffers[bucket].write(std::mem::take(&mut row), &sinks[bucket])?;
            }
            for (bucket, buffer) in buffers.iter_mut().enumerate() {
                buffer.flush(&sinks[bucket])?;
            }
            Ok(())
        })?;

    let mut outputs = Vec::with_capacity(n);
    for (writer, sink) in writers.into_iter().zip(sinks) {
        let finished = sink.into_inner().finish()?;
        outputs.push(writer.close(&[finished])?);
    }
    Ok(outputs)
}
