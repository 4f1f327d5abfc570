//! Batch representation for the query engine.
//!
//! `RowBatch` is a columnar batch using typed column vectors, avoiding the
//! per-value tag overhead of `Vec<Vec<Value>>` for the common homogeneous
//! case. `None` entries represent NA.

use std::sync::Arc;

use xframe_types::error::{Result, XFrameError};
use xframe_types::ndarray::NdArray;
use xframe_types::value::{DateTimeValue, Value, ValueKind};

/// Typed column vector. `None` represents NA.
#[derive(Debug, Clone)]
pub enum ColumnSlab {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    String(Vec<Option<Arc<str>>>),
    Vector(Vec<Option<Arc<[f64]>>>),
    List(Vec<Option<Arc<[Value]>>>),
    Dict(Vec<Option<Arc<[(Value, Value)]>>>),
    DateTime(Vec<Option<DateTimeValue>>),
    NdArray(Vec<Option<NdArray>>),
    /// Escape hatch for mixed-kind columns.
    Mixed(Vec<Value>),
}

impl ColumnSlab {
    /// Create an empty slab of the given kind.
    pub fn empty(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Integer | ValueKind::Undefined => ColumnSlab::Integer(Vec::new()),
            ValueKind::Float => ColumnSlab::Float(Vec::new()),
            ValueKind::String => ColumnSlab::String(Vec::new()),
            ValueKind::Vector => ColumnSlab::Vector(Vec::new()),
            ValueKind::List => ColumnSlab::List(Vec::new()),
            ValueKind::Dict => ColumnSlab::Dict(Vec::new()),
            ValueKind::DateTime => ColumnSlab::DateTime(Vec::new()),
            ValueKind::NdArray => ColumnSlab::NdArray(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnSlab::Integer(v) => v.len(),
            ColumnSlab::Float(v) => v.len(),
            ColumnSlab::String(v) => v.len(),
            ColumnSlab::Vector(v) => v.len(),
            ColumnSlab::List(v) => v.len(),
            ColumnSlab::Dict(v) => v.len(),
            ColumnSlab::DateTime(v) => v.len(),
            ColumnSlab::NdArray(v) => v.len(),
            ColumnSlab::Mixed(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            ColumnSlab::Integer(_) => ValueKind::Integer,
            ColumnSlab::Float(_) => ValueKind::Float,
            ColumnSlab::String(_) => ValueKind::String,
            ColumnSlab::Vector(_) => ValueKind::Vector,
            ColumnSlab::List(_) => ValueKind::List,
            ColumnSlab::Dict(_) => ValueKind::Dict,
            ColumnSlab::DateTime(_) => ValueKind::DateTime,
            ColumnSlab::NdArray(_) => ValueKind::NdArray,
            ColumnSlab::Mixed(_) => ValueKind::Undefined,
        }
    }

    /// Push a value. A value of a foreign kind degrades the slab to Mixed
    /// rather than erroring; column types in this engine are declarations,
    /// not straitjackets.
    pub fn push(&mut self, value: &Value) {
        match (&mut *self, value) {
            (ColumnSlab::Integer(v), Value::Integer(i)) => v.push(Some(*i)),
            (ColumnSlab::Integer(v), Value::Undefined) => v.push(None),
            (ColumnSlab::Float(v), Value::Float(f)) => v.push(Some(*f)),
            (ColumnSlab::Float(v), Value::Undefined) => v.push(None),
            (ColumnSlab::String(v), Value::String(s)) => v.push(Some(s.clone())),
            (ColumnSlab::String(v), Value::Undefined) => v.push(None),
            (ColumnSlab::Vector(v), Value::Vector(x)) => v.push(Some(x.clone())),
            (ColumnSlab::Vector(v), Value::Undefined) => v.push(None),
            (ColumnSlab::List(v), Value::List(l)) => v.push(Some(l.clone())),
            (ColumnSlab::List(v), Value::Undefined) => v.push(None),
            (ColumnSlab::Dict(v), Value::Dict(d)) => v.push(Some(d.clone())),
            (ColumnSlab::Dict(v), Value::Undefined) => v.push(None),
            (ColumnSlab::DateTime(v), Value::DateTime(dt)) => v.push(Some(*dt)),
            (ColumnSlab::DateTime(v), Value::Undefined) => v.push(None),
            (ColumnSlab::NdArray(v), Value::NdArray(nd)) => v.push(Some(nd.clone())),
            (ColumnSlab::NdArray(v), Value::Undefined) => v.push(None),
            (ColumnSlab::Mixed(v), val) => v.push(val.clone()),
            (slab, val) => {
                // Degrade to a mixed slab and retry.
                let mut mixed: Vec<Value> = (0..slab.len()).map(|i| slab.get(i)).collect();
                mixed.push(val.clone());
                *slab = ColumnSlab::Mixed(mixed);
            }
        }
    }

    /// Get the value at an index.
    pub fn get(&self, index: usize) -> Value {
        match self {
            ColumnSlab::Integer(v) => v[index].map(Value::Integer).unwrap_or(Value::Undefined),
            ColumnSlab::Float(v) => v[index].map(Value::Float).unwrap_or(Value::Undefined),
            ColumnSlab::String(v) => v[index]
                .as_ref()
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Undefined),
            ColumnSlab::Vector(v) => v[index]
                .as_ref()
                .map(|x| Value::Vector(x.clone()))
                .unwrap_or(Value::Undefined),
            ColumnSlab::List(v) => v[index]
                .as_ref()
                .map(|l| Value::List(l.clone()))
                .unwrap_or(Value::Undefined),
            ColumnSlab::Dict(v) => v[index]
                .as_ref()
                .map(|d| Value::Dict(d.clone()))
                .unwrap_or(Value::Undefined),
            ColumnSlab::DateTime(v) => v[index]
                .map(Value::DateTime)
                .unwrap_or(Value::Undefined),
            ColumnSlab::NdArray(v) => v[index]
                .as_ref()
                .map(|nd| Value::NdArray(nd.clone()))
                .unwrap_or(Value::Undefined),
            ColumnSlab::Mixed(v) => v[index].clone(),
        }
    }

    /// Append another slab's contents.
    pub fn extend_from(&mut self, other: &ColumnSlab) {
        for i in 0..other.len() {
            self.push(&other.get(i));
        }
    }
}

/// A columnar batch of rows.
#[derive(Debug, Clone)]
pub struct RowBatch {
    columns: Vec<ColumnSlab>,
    num_rows: usize,
}

impl RowBatch {
    /// An empty batch with the given schema.
    pub fn empty(kinds: &[ValueKind]) -> Self {
        RowBatch {
            columns: kinds.iter().map(|&k| ColumnSlab::empty(k)).collect(),
            num_rows: 0,
        }
    }

    /// Build from typed columns of equal length.
    pub fn new(columns: Vec<ColumnSlab>) -> Result<Self> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for (i, c) in columns.iter().enumerate() {
            if c.len() != num_rows {
                return Err(XFrameError::SchemaMismatch(format!(
                    "batch column {} has {} rows, expected {}",
                    i,
                    c.len(),
                    num_rows
                )));
            }
        }
        Ok(RowBatch { columns, num_rows })
    }

    /// Build from column-major value vectors.
    pub fn from_column_vecs(columns: Vec<Vec<Value>>, kinds: &[ValueKind]) -> Result<Self> {
        if columns.len() != kinds.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "{} columns for {} kinds",
                columns.len(),
                kinds.len()
            )));
        }
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        let mut slabs = Vec::with_capacity(columns.len());
        for (col, &kind) in columns.iter().zip(kinds) {
            if col.len() != num_rows {
                return Err(XFrameError::SchemaMismatch(format!(
                    "batch column has {} rows, expected {}",
                    col.len(),
                    num_rows
                )));
            }
            let mut slab = ColumnSlab::empty(kind);
            for v in col {
                slab.push(v);
            }
            slabs.push(slab);
        }
        Ok(RowBatch {
            columns: slabs,
            num_rows,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn kinds(&self) -> Vec<ValueKind> {
        self.columns.iter().map(|c| c.kind()).collect()
    }

    pub fn column(&self, index: usize) -> &ColumnSlab {
        &self.columns[index]
    }

    /// One row as values.
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.get(index)).collect()
    }

    /// Append a row; its arity must match.
    pub fn push_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "row has {} values, batch has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (slab, v) in self.columns.iter_mut().zip(row) {
            slab.push(v);
        }
        self.num_rows += 1;
        Ok(())
    }

    /// Select columns by index into a new batch.
    pub fn select_columns(&self, indices: &[usize]) -> Result<RowBatch> {
        let mut columns = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.columns.len() {
                return Err(XFrameError::OutOfRange(format!(
                    "column index {} out of range ({} columns)",
                    i,
                    self.columns.len()
                )));
            }
            columns.push(self.columns[i].clone());
        }
        Ok(RowBatch {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Gather rows by index.
    pub fn take(&self, indices: &[usize]) -> Result<RowBatch> {
        let mut out = RowBatch {
            columns: self.kinds().iter().map(|&k| ColumnSlab::empty(k)).collect(),
            num_rows: 0,
        };
        for &i in indices {
            if i >= self.num_rows {
                return Err(XFrameError::OutOfRange(format!(
                    "row index {} out of range ({} rows)",
                    i, self.num_rows
                )));
            }
            for (slab, src) in out.columns.iter_mut().zip(self.columns.iter()) {
                slab.push(&src.get(i));
            }
            out.num_rows += 1;
        }
        Ok(out)
    }

    /// Append another batch vertically; arity must match.
    pub fn append(&mut self, other: &RowBatch) -> Result<()> {
        if self.columns.len() != other.columns.len() {
            return Err(XFrameError::SchemaMismatch(format!(
                "append of {}-column batch onto {}-column batch",
                other.columns.len(),
                self.columns.len()
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(other.columns.iter()) {
            dst.extend_from(src);
        }
        self.num_rows += other.num_rows;
        Ok(())
    }

    /// Concatenate columns horizontally; row counts must match.
    pub fn hconcat(&self, other: &RowBatch) -> Result<RowBatch> {
        if self.num_rows != other.num_rows {
            return Err(XFrameError::SchemaMismatch(format!(
                "horizontal concat of {} rows with {} rows",
                self.num_rows, other.num_rows
            )));
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(RowBatch {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Column-major value vectors (what frame sinks consume).
    pub fn to_column_vecs(&self) -> Vec<Vec<Value>> {
        self.columns
            .iter()
            .map(|c| (0..self.num_rows).map(|i| c.get(i)).collect())
            .collect()
    }

    /// Row-major values.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.num_rows).map(|i| self.row(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowBatch {
        let mut b = RowBatch::empty(&[ValueKind::Integer, ValueKind::String]);
        for i in 0..4 {
            b.push_row(&[
                Value::Integer(i),
                Value::String(format!("r{}", i).into()),
            ])
            .unwrap();
        }
        b
    }

    #[test]
    fn test_push_and_get() {
        let b = sample();
        assert_eq!(b.num_rows(), 4);
        assert_eq!(b.num_columns(), 2);
        assert_eq!(b.row(2), vec![Value::Integer(2), Value::String("r2".into())]);
    }

    #[test]
    fn test_na_handling() {
        let mut b = RowBatch::empty(&[ValueKind::Float]);
        b.push_row(&[Value::Undefined]).unwrap();
        b.push_row(&[Value::Float(1.5)]).unwrap();
        assert_eq!(b.row(0), vec![Value::Undefined]);
        assert_eq!(b.row(1), vec![Value::Float(1.5)]);
    }

    #[test]
    fn test_mixed_degradation() {
        let mut slab = ColumnSlab::empty(ValueKind::Integer);
        slab.push(&Value::Integer(1));
        slab.push(&Value::String("oops".into()));
        assert_eq!(slab.get(0), Value::Integer(1));
        assert_eq!(slab.get(1), Value::String("oops".into()));
    }

    #[test]
    fn test_select_take_append() {
        let b = sample();
        let sel = b.select_columns(&[1]).unwrap();
        assert_eq!(sel.num_columns(), 1);
        assert_eq!(sel.row(0), vec![Value::String("r0".into())]);

        let taken = b.take(&[3, 0]).unwrap();
        assert_eq!(taken.row(0)[0], Value::Integer(3));
        assert_eq!(taken.row(1)[0], Value::Integer(0));

        let mut a = sample();
        a.append(&b).unwrap();
        assert_eq!(a.num_rows(), 8);
    }

    #[test]
    fn test_hconcat() {
        let a = sample();
        let b = sample();
        let c = a.hconcat(&b).unwrap();
        assert_eq!(c.num_columns(), 4);
        assert_eq!(c.num_rows(), 4);
        assert_eq!(c.row(1)[2], Value::Integer(1));

        let short = RowBatch::empty(&[ValueKind::Integer]);
        assert!(a.hconcat(&short).is_err());
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let mut b = sample();
        assert!(b.push_row(&[Value::Integer(0)]).is_err());
    }
}
