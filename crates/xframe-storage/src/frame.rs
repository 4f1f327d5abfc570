//! `XFrame`: an ordered set of named columns sharing one segmentation.
//!
//! A frame under construction accepts column mutations; [`XFrame::seal`]
//! freezes it into a shared handle. Frames produced by [`XFrameWriter`]
//! or [`XFrame::load`] are born frozen.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use xframe_io::local_fs::LocalFileSystem;
use xframe_io::temp::{alloc_temp_dir, TempDirGuard};
use xframe_io::vfs::VirtualFileSystem;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

use crate::dir_archive::{DirArchive, DirArchiveWriter};
use crate::index::FrameIndex;
use crate::sarray::{SArray, SArrayWriter, SegmentSink};

/// Archive metadata marker for frame directories.
pub const FRAME_CONTENTS: &str = "xframe";

/// Generate a default column name `X{k}` (1-based), suffixed until unique.
pub fn generate_column_name(existing: &[String], k: usize) -> String {
    let base = format!("X{}", k + 1);
    if !existing.contains(&base) {
        return base;
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{}.{}", base, suffix);
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[derive(Clone)]
pub struct XFrame {
    names: Vec<String>,
    columns: Vec<Arc<SArray>>,
    frozen: bool,
    keep_alive: Vec<Arc<TempDirGuard>>,
}

impl Default for XFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl XFrame {
    /// An empty frame under construction.
    pub fn new() -> Self {
        XFrame {
            names: Vec::new(),
            columns: Vec::new(),
            frozen: false,
            keep_alive: Vec::new(),
        }
    }

    /// Build a frame from named columns and seal it.
    pub fn from_columns(columns: Vec<(Option<&str>, Arc<SArray>)>) -> Result<Arc<XFrame>> {
        let mut frame = XFrame::new();
        for (name, col) in columns {
            frame.add_column(name, col)?;
        }
        Ok(frame.seal())
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(XFrameError::Unsupported(
                "frame is frozen; column mutations are only legal during construction"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Freeze the frame into a shared handle.
    pub fn seal(mut self) -> Arc<XFrame> {
        self.frozen = true;
        Arc::new(self)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn num_rows(&self) -> u64 {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_segments(&self) -> usize {
        self.columns.first().map(|c| c.num_segments()).unwrap_or(0)
    }

    /// Per-segment row counts, shared by every column.
    pub fn segment_sizes(&self) -> Vec<u64> {
        self.columns
            .first()
            .map(|c| c.segment_sizes().to_vec())
            .unwrap_or_default()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_types(&self) -> Vec<ValueKind> {
        self.columns.iter().map(|c| c.dtype()).collect()
    }

    pub fn columns(&self) -> &[Arc<SArray>] {
        &self.columns
    }

    pub fn keep_alive(&self) -> &[Arc<TempDirGuard>] {
        &self.keep_alive
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| XFrameError::OutOfRange(format!("column '{}' not found", name)))
    }

    pub fn select_column(&self, name: &str) -> Result<Arc<SArray>> {
        Ok(self.columns[self.column_index(name)?].clone())
    }

    pub fn select_column_at(&self, index: usize) -> Result<Arc<SArray>> {
        self.columns.get(index).cloned().ok_or_else(|| {
            XFrameError::OutOfRange(format!(
                "column index {} out of range ({} columns)",
                index,
                self.columns.len()
            ))
        })
    }

    /// A frozen copy of this frame with different column names.
    pub fn with_column_names(&self, names: &[String]) -> Result<Arc<XFrame>> {
        if names.len() != self.columns.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "{} names for {} columns",
                names.len(),
                self.columns.len()
            )));
        }
        let mut frame = XFrame::new();
        for (name, col) in names.iter().zip(&self.columns) {
            frame.add_column(Some(name.as_str()), col.clone())?;
        }
        frame.keep_alive = self.keep_alive.clone();
        Ok(frame.seal())
    }

    /// A new frozen frame sharing the named columns.
    pub fn select_columns(&self, names: &[&str]) -> Result<Arc<XFrame>> {
        let mut frame = XFrame::new();
        for &name in names {
            let idx = self.column_index(name)?;
            frame.add_column(Some(name), self.columns[idx].clone())?;
        }
        frame.keep_alive = self.keep_alive.clone();
        Ok(frame.seal())
    }

    /// Add a column; `None` auto-generates an `X{k}` name. Returns the
    /// name used. Only legal during construction.
    pub fn add_column(&mut self, name: Option<&str>, column: Arc<SArray>) -> Result<String> {
        self.ensure_mutable()?;
        let name = match name {
            Some(n) if n.is_empty() => generate_column_name(&self.names, self.names.len()),
            Some(n) => {
                if self.names.iter().any(|existing| existing == n) {
                    return Err(XFrameError::DuplicateColumn(format!(
                        "column '{}' already exists",
                        n
                    )));
                }
                n.to_string()
            }
            None => generate_column_name(&self.names, self.names.len()),
        };

        if let Some(first) = self.columns.first() {
            if first.segment_sizes() != column.segment_sizes() {
                return Err(XFrameError::SchemaMismatch(format!(
                    "column '{}' segmentation {:?} differs from the frame's {:?}",
                    name,
                    column.segment_sizes(),
                    first.segment_sizes()
                )));
            }
        }

        self.keep_alive.extend(column.keep_alive().iter().cloned());
        self.names.push(name.clone());
        self.columns.push(column);
        Ok(name)
    }

    /// Remove a column by name. Only legal during construction.
    pub fn remove_column(&mut self, name: &str) -> Result<Arc<SArray>> {
        self.ensure_mutable()?;
        let idx = self.column_index(name)?;
        self.names.remove(idx);
        Ok(self.columns.remove(idx))
    }

    /// Swap two columns by index. Only legal during construction.
    pub fn swap_columns(&mut self, a: usize, b: usize) -> Result<()> {
        self.ensure_mutable()?;
        if a >= self.columns.len() || b >= self.columns.len() {
            return Err(XFrameError::OutOfRange(format!(
                "swap indices {}/{} out of range ({} columns)",
                a,
                b,
                self.columns.len()
            )));
        }
        self.names.swap(a, b);
        self.columns.swap(a, b);
        Ok(())
    }

    /// Rename a column. Only legal during construction.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_mutable()?;
        let idx = self.column_index(old)?;
        if new.is_empty() {
            return Err(XFrameError::Unsupported(
                "column names must be non-empty".to_string(),
            ));
        }
        if old != new && self.names.iter().any(|n| n == new) {
            return Err(XFrameError::DuplicateColumn(format!(
                "column '{}' already exists",
                new
            )));
        }
        self.names[idx] = new.to_string();
        Ok(())
    }

    pub(crate) fn attach_guards(&mut self, guards: Vec<Arc<TempDirGuard>>) {
        self.keep_alive.extend(guards);
    }

    /// Persist a full copy of the frame into `path`.
    pub fn save(&self, path: &str) -> Result<()> {
        let num_segments = self.num_segments().max(1);
        let names: Vec<&str> = self.names.iter().map(|s| s.as_str()).collect();
        let mut writer = XFrameWriter::open(path, &names, &self.column_types(), num_segments)?;

        let segment_sizes = self.segment_sizes();
        let batch = xframe_config::get_read_batch_size() as u64;
        let mut finished = Vec::with_capacity(num_segments);
        let mut readers: Vec<_> = self
            .columns
            .iter()
            .map(|c| c.reader(None))
            .collect::<Result<_>>()?;

        for seg in 0..num_segments {
            let mut sink = writer.get_output_iterator(seg)?;
            if !segment_sizes.is_empty() {
                let (begin, end) = (
                    segment_sizes[..seg].iter().sum::<u64>(),
                    segment_sizes[..=seg].iter().sum::<u64>(),
                );
                let mut row = begin;
                let mut columns: Vec<Vec<Value>> = vec![Vec::new(); self.columns.len()];
                while row < end {
                    let chunk_end = (row + batch).min(end);
                    for (col, reader) in columns.iter_mut().zip(readers.iter_mut()) {
                        col.clear();
                        reader.read_rows(row, chunk_end, col)?;
                    }
                    sink.write_columns(&columns)?;
                    row = chunk_end;
                }
            }
            finished.push(sink.finish()?);
        }
        writer.close(&finished)?;
        Ok(())
    }

    /// Persist by reference: writes only the archive manifest and frame
    /// index, recording absolute paths to the existing column files.
    pub fn save_reference(&self, path: &str) -> Result<()> {
        let fs = LocalFileSystem;
        let mut archive = DirArchiveWriter::open_for_write(&fs, path)?;
        archive.set_metadata("contents", FRAME_CONTENTS);
        let prefix = archive.get_next_prefix();

        let frame_idx_path = archive.path_for(&format!("{}.frame_idx", prefix));
        let column_files: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.index_path().to_string())
            .collect();
        let content = FrameIndex::build(
            &frame_idx_path,
            self.num_rows(),
            self.num_segments(),
            &self.names,
            &column_files,
            &HashMap::new(),
        );
        fs.write_string(&frame_idx_path, &content)?;
        archive.close(&fs)
    }

    /// Load a frame from a directory written by [`XFrame::save`] or
    /// [`XFrame::save_reference`].
    pub fn load(path: &str) -> Result<Arc<XFrame>> {
        let fs = LocalFileSystem;
        let archive = DirArchive::open_for_read(&fs, path)?;
        if archive.get_metadata("contents") != Some(FRAME_CONTENTS) {
            return Err(XFrameError::Parse(format!(
                "archive at {} does not contain an xframe",
                path
            )));
        }
        let prefix = archive.data_prefix()?;
        let frame_idx_path = Path::new(path)
            .join(format!("{}.frame_idx", prefix))
            .to_string_lossy()
            .into_owned();
        let content = fs.read_to_string(&frame_idx_path)?;
        let index = FrameIndex::parse(&content, &frame_idx_path)?;

        let mut frame = XFrame::new();
        for (name, col_file) in index.column_names.iter().zip(index.column_files.iter()) {
            let column = Arc::new(SArray::open(col_file)?);
            frame.add_column(Some(name.as_str()), column)?;
        }
        if frame.num_rows() != index.nrows {
            return Err(XFrameError::Invariant(format!(
                "frame index says {} rows, columns hold {}",
                index.nrows,
                frame.num_rows()
            )));
        }
        Ok(frame.seal())
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends whole rows to one segment of a frame under construction.
pub struct FrameSegmentSink {
    segment_id: usize,
    sinks: Vec<SegmentSink>,
    rows: u64,
}

impl FrameSegmentSink {
    pub fn segment_id(&self) -> usize {
        self.segment_id
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one row; `row.len()` must equal the column count.
    pub fn write_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.sinks.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "row has {} values, frame has {} columns",
                row.len(),
                self.sinks.len()
            )));
        }
        for (sink, value) in self.sinks.iter_mut().zip(row.iter()) {
            sink.write(value.clone())?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Append a column-major batch; all columns must share one length.
    pub fn write_columns(&mut self, columns: &[Vec<Value>]) -> Result<()> {
        if columns.len() != self.sinks.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "batch has {} columns, frame has {}",
                columns.len(),
                self.sinks.len()
            )));
        }
        let nrows = columns.first().map(|c| c.len()).unwrap_or(0);
        for (i, col) in columns.iter().enumerate() {
            if col.len() != nrows {
                return Err(XFrameError::SchemaMismatch(format!(
                    "batch column {} has {} rows, expected {}",
                    i,
                    col.len(),
                    nrows
                )));
            }
        }
        for (sink, col) in self.sinks.iter_mut().zip(columns.iter()) {
            sink.write_all(col.iter().cloned())?;
        }
        self.rows += nrows as u64;
        Ok(())
    }

    /// Seal this segment across all columns; returns `(segment, rows)`.
    pub fn finish(self) -> Result<(usize, u64)> {
        let expected = self.rows;
        for sink in self.sinks {
            let written = sink.finish()?;
            if written != expected {
                return Err(XFrameError::Invariant(format!(
                    "segment {} column wrote {} rows, expected {}",
                    self.segment_id, written, expected
                )));
            }
        }
        Ok((self.segment_id, expected))
    }
}

/// Writer producing a frozen `XFrame` with a fixed segment fan-out.
pub struct XFrameWriter {
    names: Vec<String>,
    column_writers: Vec<SArrayWriter>,
    archive: Option<(DirArchiveWriter, String)>, // writer + frame prefix
    frame_idx_path: String,
    num_segments: usize,
    metadata: HashMap<String, String>,
    keep_alive: Vec<Arc<TempDirGuard>>,
}

impl XFrameWriter {
    /// Create a frame archive at `dir`.
    pub fn open(
        dir: &str,
        column_names: &[&str],
        column_types: &[ValueKind],
        num_segments: usize,
    ) -> Result<Self> {
        if column_names.len() != column_types.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "{} column names for {} types",
                column_names.len(),
                column_types.len()
            )));
        }
        let mut names: Vec<String> = Vec::with_capacity(column_names.len());
        for &n in column_names {
            let name = if n.is_empty() {
                generate_column_name(&names, names.len())
            } else {
                n.to_string()
            };
            if names.contains(&name) {
                return Err(XFrameError::DuplicateColumn(format!(
                    "column '{}' already exists",
                    name
                )));
            }
            names.push(name);
        }

        let fs = LocalFileSystem;
        let mut archive = DirArchiveWriter::open_for_write(&fs, dir)?;
        archive.set_metadata("contents", FRAME_CONTENTS);
        let prefix = archive.get_next_prefix();
        let frame_idx_path = archive.path_for(&format!("{}.frame_idx", prefix));

        let column_writers: Vec<SArrayWriter> = column_types
            .iter()
            .enumerate()
            .map(|(i, &dtype)| {
                SArrayWriter::open(dir, &format!("{}_{}", prefix, i), dtype, num_segments)
            })
            .collect::<Result<_>>()?;

        Ok(XFrameWriter {
            names,
            column_writers,
            archive: Some((archive, prefix)),
            frame_idx_path,
            num_segments,
            metadata: HashMap::new(),
            keep_alive: Vec::new(),
        })
    }

    /// Create a scratch-backed frame that unlinks itself when the last
    /// handle drops.
    pub fn open_anonymous(
        column_names: &[&str],
        column_types: &[ValueKind],
        num_segments: usize,
    ) -> Result<Self> {
        let (dir, guard) = alloc_temp_dir("xframe")?;
        let mut writer = Self::open(&dir, column_names, column_types, num_segments)?;
        // Every column carries the guard, so frames later rebuilt from a
        // subset of these columns keep the backing files alive.
        for column_writer in &mut writer.column_writers {
            column_writer.attach_guard(guard.clone());
        }
        writer.keep_alive.push(guard);
        Ok(writer)
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Take the row sink for one segment. Each may be taken once.
    pub fn get_output_iterator(&mut self, segment_id: usize) -> Result<FrameSegmentSink> {
        let sinks: Vec<SegmentSink> = self
            .column_writers
            .iter_mut()
            .map(|w| w.output_iterator(segment_id))
            .collect::<Result<_>>()?;
        Ok(FrameSegmentSink {
            segment_id,
            sinks,
            rows: 0,
        })
    }

    /// Take every remaining segment sink, in segment order.
    pub fn get_output_iterators(&mut self) -> Result<Vec<FrameSegmentSink>> {
        (0..self.num_segments)
            .map(|seg| self.get_output_iterator(seg))
            .collect()
    }

    /// Seal the frame. `finished` holds each segment sink's
    /// `(segment, rows)` result, in any order.
    pub fn close(mut self, finished: &[(usize, u64)]) -> Result<Arc<XFrame>> {
        if finished.len() != self.num_segments {
            return Err(XFrameError::Invariant(format!(
                "close got {} finished segments, frame has {}",
                finished.len(),
                self.num_segments
            )));
        }
        let mut counts = vec![None; self.num_segments];
        for &(seg, rows) in finished {
            if seg >= self.num_segments || counts[seg].replace(rows).is_some() {
                return Err(XFrameError::Invariant(format!(
                    "bad or duplicate segment id {} in close",
                    seg
                )));
            }
        }
        let counts: Vec<u64> = counts.into_iter().map(|c| c.unwrap()).collect();

        let mut frame = XFrame::new();
        let names = std::mem::take(&mut self.names);
        for (name, writer) in names.iter().zip(self.column_writers.drain(..)) {
            let column = Arc::new(writer.close(counts.clone())?);
            frame.add_column(Some(name.as_str()), column)?;
        }

        let fs = LocalFileSystem;
        let column_files: Vec<String> = frame
            .columns
            .iter()
            .map(|c| c.index_path().to_string())
            .collect();
        let content = FrameIndex::build(
            &self.frame_idx_path,
            frame.num_rows(),
            self.num_segments,
            &names,
            &column_files,
            &self.metadata,
        );
        fs.write_string(&self.frame_idx_path, &content)?;

        if let Some((archive, _)) = self.archive.take() {
            archive.close(&fs)?;
        }

        frame.attach_guards(std::mem::take(&mut self.keep_alive));
        Ok(frame.seal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn build_frame(
        names: &[&str],
        columns: Vec<Vec<Value>>,
        dtypes: &[ValueKind],
        num_segments: usize,
    ) -> Arc<XFrame> {
        let mut writer = XFrameWriter::open_anonymous(names, dtypes, num_segments).unwrap();
        let nrows = columns.first().map(|c| c.len()).unwrap_or(0);
        let per_seg = nrows.div_ceil(num_segments).max(1);
        let mut finished = Vec::new();
        for seg in 0..num_segments {
            let lo = (seg * per_seg).min(nrows);
            let hi = ((seg + 1) * per_seg).min(nrows);
            let mut sink = writer.get_output_iterator(seg).unwrap();
            for row in lo..hi {
                let row_values: Vec<Value> =
                    columns.iter().map(|c| c[row].clone()).collect();
                sink.write_row(&row_values).unwrap();
            }
            finished.push(sink.finish().unwrap());
        }
        writer.close(&finished).unwrap()
    }

    fn int_col(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(Value::Integer).collect()
    }

    #[test]
    fn test_writer_roundtrip() {
        let frame = build_frame(
            &["id", "name"],
            vec![
                int_col(0..100),
                (0..100)
                    .map(|i| Value::String(format!("s{}", i).into()))
                    .collect(),
            ],
            &[ValueKind::Integer, ValueKind::String],
            3,
        );

        assert_eq!(frame.num_rows(), 100);
        assert_eq!(frame.num_columns(), 2);
        assert_eq!(frame.num_segments(), 3);
        assert_eq!(frame.column_names(), &["id", "name"]);

        // Every column shares one segmentation.
        for col in frame.columns() {
            assert_eq!(col.segment_sizes(), frame.segment_sizes());
        }

        let ids = frame.select_column("id").unwrap().read_all().unwrap();
        assert_eq!(ids, int_col(0..100));
    }

    #[test]
    fn test_construction_mutators() {
        let a = build_frame(&["a"], vec![int_col(0..10)], &[ValueKind::Integer], 2);
        let b = build_frame(&["b"], vec![int_col(10..20)], &[ValueKind::Integer], 2);

        let mut frame = XFrame::new();
        frame
            .add_column(Some("a"), a.select_column("a").unwrap())
            .unwrap();
        frame
            .add_column(Some("b"), b.select_column("b").unwrap())
            .unwrap();

        // Duplicate name rejected.
        let err = frame.add_column(Some("a"), b.select_column("b").unwrap());
        assert!(matches!(err, Err(XFrameError::DuplicateColumn(_))));

        // Auto-generated name avoids collisions.
        let name = frame
            .add_column(None, a.select_column("a").unwrap())
            .unwrap();
        assert_eq!(name, "X3");

        frame.swap_columns(0, 1).unwrap();
        assert_eq!(frame.column_names()[0], "b");
        frame.rename_column("b", "first").unwrap();
        assert_eq!(frame.column_names()[0], "first");
        frame.remove_column("X3").unwrap();
        assert_eq!(frame.num_columns(), 2);

        // Frozen frames refuse mutation.
        let sealed = frame.seal();
        let mut clone = (*sealed).clone();
        assert!(matches!(
            clone.rename_column("first", "x"),
            Err(XFrameError::Unsupported(_))
        ));
    }

    #[test]
    fn test_segmentation_mismatch_rejected() {
        let a = build_frame(&["a"], vec![int_col(0..10)], &[ValueKind::Integer], 2);
        let b = build_frame(&["b"], vec![int_col(0..10)], &[ValueKind::Integer], 5);

        let mut frame = XFrame::new();
        frame
            .add_column(Some("a"), a.select_column("a").unwrap())
            .unwrap();
        let err = frame.add_column(Some("b"), b.select_column("b").unwrap());
        assert!(matches!(err, Err(XFrameError::SchemaMismatch(_))));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let frame = build_frame(
            &["x", "y"],
            vec![
                int_col(0..50),
                (0..50).map(|i| Value::Float(i as f64 / 2.0)).collect(),
            ],
            &[ValueKind::Integer, ValueKind::Float],
            2,
        );

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("saved.xf");
        frame.save(path.to_str().unwrap()).unwrap();

        let loaded = XFrame::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.num_rows(), 50);
        assert_eq!(loaded.column_names(), frame.column_names());
        for name in ["x", "y"] {
            assert_eq!(
                loaded.select_column(name).unwrap().read_all().unwrap(),
                frame.select_column(name).unwrap().read_all().unwrap()
            );
        }
    }

    #[test]
    fn test_save_reference_shares_columns() {
        let frame = build_frame(
            &["v"],
            vec![int_col(0..30)],
            &[ValueKind::Integer],
            2,
        );

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ref.xf");
        frame.save_reference(path.to_str().unwrap()).unwrap();

        let loaded = XFrame::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.num_rows(), 30);
        // The reference save points at the original column index.
        assert_eq!(
            loaded.columns()[0].index_path(),
            frame.columns()[0].index_path()
        );
        assert_eq!(
            loaded.select_column("v").unwrap().read_all().unwrap(),
            int_col(0..30)
        );
    }

    #[test]
    fn test_empty_frame() {
        let frame = XFrame::new().seal();
        assert_eq!(frame.num_rows(), 0);
        assert_eq!(frame.num_columns(), 0);
        assert!(frame.segment_sizes().is_empty());
    }

    #[test]
    fn test_generate_column_name_disambiguates() {
        let existing = vec!["X1".to_string(), "X1.1".to_string()];
        assert_eq!(generate_column_name(&existing, 0), "X1.2");
        assert_eq!(generate_column_name(&existing, 2), "X3");
    }
}
