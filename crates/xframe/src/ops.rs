//! Frame-level user operations.
//!
//! These compose plan graphs over source frames and hand them to the
//! materializer; the row-restructuring operations (`stack`,
//! `pack_columns`, `drop_missing`) stream rows through the reader facades
//! into fresh writers.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use xframe_query::execute::{materialize, materialize_with_callback, materialize_with_names};
use xframe_query::planner::{infer_kinds, PlanNode, PlanOp};
use xframe_storage::frame::{generate_column_name, XFrame, XFrameWriter};
use xframe_storage::readers::RowIter;
use xframe_storage::sarray::SArrayWriter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

/// Column names carried by a plan, when it is a plain frame read.
fn plan_names(plan: &Arc<PlanNode>) -> Option<Vec<String>> {
    if let Some(frame) = plan.cached() {
        return Some(frame.column_names().to_vec());
    }
    if let PlanOp::Source { frame, .. } = &plan.op {
        return Some(frame.column_names().to_vec());
    }
    None
}

/// Build a single-segment frame from in-memory rows.
fn frame_from_rows(
    names: Option<Vec<String>>,
    kinds: &[ValueKind],
    rows: &[Vec<Value>],
) -> Result<Arc<XFrame>> {
    let names = match names {
        Some(n) => n,
        None => {
            let mut generated = Vec::with_capacity(kinds.len());
            for k in 0..kinds.len() {
                generated.push(generate_column_name(&generated, k));
            }
            generated
        }
    };
    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, kinds, 1)?;
    let mut sink = writer.get_output_iterator(0)?;
    for row in rows {
        sink.write_row(row)?;
    }
    let finished = [sink.finish()?];
    writer.close(&finished)
}

/// First `n` rows of a plan.
///
/// Drives a single-segment callback materialization and stops at the
/// first batch boundary past `n` rows, so at most one extra read batch is
/// pulled from each source column.
pub fn head(plan: &Arc<PlanNode>, n: u64) -> Result<Arc<XFrame>> {
    let kinds = infer_kinds(plan)?;
    let names = plan_names(plan);
    if n == 0 {
        return frame_from_rows(names, &kinds, &[]);
    }

    let collected: Mutex<Vec<Vec<Value>>> = Mutex::new(Vec::new());
    materialize_with_callback(plan, 1, |_seg, batch| {
        let mut rows = collected.lock().expect("head collector poisoned");
        for i in 0..batch.num_rows() {
            if rows.len() as u64 >= n {
                return Ok(true);
            }
            rows.push(batch.row(i));
        }
        Ok(rows.len() as u64 >= n)
    })?;

    let rows = collected.into_inner().expect("head collector poisoned");
    frame_from_rows(names, &kinds, &rows)
}

/// Last `n` rows of a plan (materializes to learn the length).
pub fn tail(plan: &Arc<PlanNode>, n: u64) -> Result<Arc<XFrame>> {
    let names = plan_names(plan);
    let frame = match names.clone() {
        Some(names) => materialize_with_names(plan, Some(&names))?,
        None => materialize(plan)?,
    };
    let len = frame.num_rows();
    copy_range(&frame, len.saturating_sub(n), 1, len)
}

/// Rows `start, start + step, ...` below `end`. A full-prefix range
/// (`start == 0 && step == 1`) shares the underlying columns or streams a
/// plan-level slice; other ranges gather row by row.
pub fn copy_range(frame: &Arc<XFrame>, start: u64, step: u64, end: u64) -> Result<Arc<XFrame>> {
    if step == 0 {
        return Err(XFrameError::OutOfRange(
            "copy_range step must be positive".to_string(),
        ));
    }
    let len = frame.num_rows();
    let end = end.min(len);
    let start = start.min(end);

    if start == 0 && step == 1 {
        if end == len {
            return Ok(frame.clone());
        }
        let plan = PlanNode::slice(PlanNode::source(frame.clone()), 0, end);
        return materialize_with_names(&plan, Some(frame.column_names()));
    }

    let names = Some(frame.column_names().to_vec());
    let kinds = frame.column_types();
    let mut readers: Vec<_> = frame
        .columns()
        .iter()
        .map(|c| c.reader(None))
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    let mut scratch: Vec<Value> = Vec::new();
    let mut pos = start;
    while pos < end {
        let mut row = Vec::with_capacity(kinds.len());
        for reader in readers.iter_mut() {
            scratch.clear();
            reader.read_rows(pos, pos + 1, &mut scratch)?;
            row.push(scratch.pop().ok_or_else(|| {
                XFrameError::OutOfRange(format!("row {} out of range ({} rows)", pos, len))
            })?);
        }
        rows.push(row);
        pos += step;
    }
    frame_from_rows(names, &kinds, &rows)
}

/// Build a 0/1 integer mask frame aligned with `len` rows.
fn mask_frame(keep: &[bool]) -> Result<Arc<XFrame>> {
    let mut writer = SArrayWriter::open_anonymous(ValueKind::Integer, 1)?;
    let mut sink = writer.output_iterator(0)?;
    sink.write_all(keep.iter().map(|&k| Value::Integer(k as i64)))?;
    let count = sink.finish()?;
    let column = Arc::new(writer.close(vec![count])?);
    XFrame::from_columns(vec![(Some("mask"), column)])
}

fn filter_by_mask(frame: &Arc<XFrame>, keep: &[bool]) -> Result<Arc<XFrame>> {
    let mask = mask_frame(keep)?;
    let plan = PlanNode::logical_filter(
        PlanNode::source(frame.clone()),
        PlanNode::source(mask),
    );
    materialize_with_names(&plan, Some(frame.column_names()))
}

fn sample_coins(len: u64, fraction: f64, seed: u64, exact: bool) -> Vec<bool> {
    let fraction = fraction.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);
    if exact {
        let k = (fraction * len as f64).floor() as usize;
        let mut keep = vec![false; len as usize];
        for idx in rand::seq::index::sample(&mut rng, len as usize, k) {
            keep[idx] = true;
        }
        keep
    } else {
        (0..len).map(|_| rng.gen::<f64>() < fraction).collect()
    }
}

/// Bernoulli (or exact-count) row sample. Deterministic for a fixed seed.
pub fn sample(frame: &Arc<XFrame>, fraction: f64, seed: u64, exact: bool) -> Result<Arc<XFrame>> {
    let keep = sample_coins(frame.num_rows(), fraction, seed, exact);
    filter_by_mask(frame, &keep)
}

/// Split into (kept, dropped) halves from one coin sequence, so the two
/// results partition the input exactly.
pub fn random_split(
    frame: &Arc<XFrame>,
    fraction: f64,
    seed: u64,
    exact: bool,
) -> Result<(Arc<XFrame>, Arc<XFrame>)> {
    let keep = sample_coins(frame.num_rows(), fraction, seed, exact);
    let complement: Vec<bool> = keep.iter().map(|k| !k).collect();
    Ok((
        filter_by_mask(frame, &keep)?,
        filter_by_mask(frame, &complement)?,
    ))
}

/// Uniformly permute the rows: sort by a seeded random key column.
pub fn shuffle_rows(frame: &Arc<XFrame>, seed: u64) -> Result<Arc<XFrame>> {
    if frame.num_rows() <= 1 || frame.num_columns() == 0 {
        return Ok(frame.clone());
    }

    // Random key column sharing the frame's segmentation.
    let sizes = frame.segment_sizes();
    let mut writer = SArrayWriter::open_anonymous(ValueKind::Integer, sizes.len())?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts = Vec::with_capacity(sizes.len());
    for (seg, &size) in sizes.iter().enumerate() {
        let mut sink = writer.output_iterator(seg)?;
        for _ in 0..size {
            sink.write(Value::Integer(rng.gen::<i64>()))?;
        }
        counts.push(sink.finish()?);
    }
    let key_column = Arc::new(writer.close(counts)?);

    let key_name = generate_column_name(frame.column_names(), frame.num_columns());
    let mut keyed = XFrame::new();
    for (name, col) in frame.column_names().iter().zip(frame.columns()) {
        keyed.add_column(Some(name.as_str()), col.clone())?;
    }
    keyed.add_column(Some(key_name.as_str()), key_column)?;
    let keyed = keyed.seal();

    let sorted = xframe_query::algorithms::sort::sort(
        &PlanNode::source(keyed),
        &[frame.num_columns()],
        &[true],
    )?;
    let original: Vec<&str> = frame.column_names().iter().map(|s| s.as_str()).collect();
    sorted.select_columns(&original)
}

/// Vertical concatenation with a fail-fast schema check.
pub fn append_frames(a: &Arc<XFrame>, b: &Arc<XFrame>) -> Result<Arc<XFrame>> {
    if a.column_names() != b.column_names() {
        return Err(XFrameError::SchemaMismatch(format!(
            "append of frames with column names {:?} and {:?}",
            a.column_names(),
            b.column_names()
        )));
    }
    if a.column_types() != b.column_types() {
        return Err(XFrameError::SchemaMismatch(format!(
            "append of frames with column types {:?} and {:?}",
            a.column_types(),
            b.column_types()
        )));
    }
    let plan = PlanNode::append(
        PlanNode::source(a.clone()),
        PlanNode::source(b.clone()),
    );
    materialize_with_names(&plan, Some(a.column_names()))
}

/// Sort by named key columns; `keys[i].1` is the ascending flag.
pub fn sort_by_names(frame: &Arc<XFrame>, keys: &[(&str, bool)]) -> Result<Arc<XFrame>> {
    let indices: Vec<usize> = keys
        .iter()
        .map(|(name, _)| frame.column_index(name))
        .collect::<Result<_>>()?;
    let ascending: Vec<bool> = keys.iter().map(|(_, asc)| *asc).collect();
    xframe_query::algorithms::sort::sort(&PlanNode::source(frame.clone()), &indices, &ascending)
}

/// Unnest a container column: one output row per element.
///
/// - List/Vector columns take one replacement name in `new_names`.
/// - Dict columns take two (key column, value column).
///
/// Rows with an empty or NA container emit a single NA row unless
/// `drop_na` is set.
pub fn stack(
    frame: &Arc<XFrame>,
    column: &str,
    new_names: &[&str],
    drop_na: bool,
) -> Result<Arc<XFrame>> {
    let col_idx = frame.column_index(column)?;
    let col_kind = frame.column_types()[col_idx];

    let expected_names = match col_kind {
        ValueKind::List | ValueKind::Vector => 1,
        ValueKind::Dict => 2,
        other => {
            return Err(XFrameError::Unsupported(format!(
                "cannot stack column '{}' of type {}; expected list, vector or dict",
                column, other
            )));
        }
    };
    if new_names.len() != expected_names {
        return Err(XFrameError::SchemaMismatch(format!(
            "stacking a {} column needs {} new names, got {}",
            col_kind,
            expected_names,
            new_names.len()
        )));
    }

    // Output schema: the container column is replaced in place.
    let mut names: Vec<String> = Vec::new();
    let mut kinds: Vec<ValueKind> = Vec::new();
    let in_kinds = frame.column_types();
    for (i, name) in frame.column_names().iter().enumerate() {
        if i == col_idx {
            match col_kind {
                ValueKind::Vector => {
                    names.push(new_names[0].to_string());
                    kinds.push(ValueKind::Float);
                }
                ValueKind::List => {
                    names.push(new_names[0].to_string());
                    kinds.push(scan_list_elem_kind(frame, col_idx)?);
                }
                ValueKind::Dict => {
                    names.push(new_names[0].to_string());
                    names.push(new_names[1].to_string());
                    let (k, v) = scan_dict_elem_kinds(frame, col_idx)?;
                    kinds.push(k);
                    kinds.push(v);
                }
                _ => unreachable!(),
            }
        } else {
            names.push(name.clone());
            kinds.push(in_kinds[i]);
        }
    }

    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &kinds, 1)?;
    let mut sink = writer.get_output_iterator(0)?;

    let mut out_row: Vec<Value> = Vec::with_capacity(kinds.len());
    for seg in 0..frame.num_segments() {
        let mut rows = RowIter::new(frame, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while rows.next_row(&mut row)? {
            let container = &row[col_idx];
            let elements: Vec<Vec<Value>> = match container {
                Value::List(l) => l.iter().map(|v| vec![v.clone()]).collect(),
                Value::Vector(v) => v.iter().map(|&f| vec![Value::Float(f)]).collect(),
                Value::Dict(d) => d
                    .iter()
                    .map(|(k, v)| vec![k.clone(), v.clone()])
                    .collect(),
                Value::Undefined => Vec::new(),
                other => {
                    return Err(XFrameError::Unsupported(format!(
                        "cannot stack value {} in column '{}'",
                        other, column
                    )));
                }
            };

            if elements.is_empty() {
                if drop_na {
                    continue;
                }
                out_row.clear();
                for (i, v) in row.iter().enumerate() {
                    if i == col_idx {
                        out_row.extend(std::iter::repeat(Value::Undefined).take(expected_names));
                    } else {
                        out_row.push(v.clone());
                    }
                }
                sink.write_row(&out_row)?;
            } else {
                for element in elements {
                    out_row.clear();
                    for (i, v) in row.iter().enumerate() {
                        if i == col_idx {
                            out_row.extend(element.iter().cloned());
                        } else {
                            out_row.push(v.clone());
                        }
                    }
                    sink.write_row(&out_row)?;
                }
            }
        }
    }

    let finished = [sink.finish()?];
    writer.close(&finished)
}

fn scan_list_elem_kind(frame: &Arc<XFrame>, col_idx: usize) -> Result<ValueKind> {
    let values = frame.columns()[col_idx].read_all()?;
    for v in &values {
        if let Value::List(l) = v {
            if let Some(first) = l.iter().find(|e| !e.is_na()) {
                return Ok(first.kind());
            }
        }
    }
    Ok(ValueKind::String)
}

fn scan_dict_elem_kinds(frame: &Arc<XFrame>, col_idx: usize) -> Result<(ValueKind, ValueKind)> {
    let values = frame.columns()[col_idx].read_all()?;
    let mut key_kind = None;
    let mut value_kind = None;
    for v in &values {
        if let Value::Dict(d) = v {
            for (k, val) in d.iter() {
                if key_kind.is_none() && !k.is_na() {
                    key_kind = Some(k.kind());
                }
                if value_kind.is_none() && !val.is_na() {
                    value_kind = Some(val.kind());
                }
            }
        }
        if key_kind.is_some() && value_kind.is_some() {
            break;
        }
    }
    Ok((
        key_kind.unwrap_or(ValueKind::String),
        value_kind.unwrap_or(ValueKind::String),
    ))
}

/// Pack several columns into one container column appended at the end.
///
/// - `dtype` selects the container: `List`, `Vector` or `Dict`.
/// - `keys` names the dict keys (defaults to the packed column names).
/// - `fill_na` replaces NA inputs; without it, dict entries with NA
///   values are dropped and vector entries become NaN.
pub fn pack_columns(
    frame: &Arc<XFrame>,
    columns: &[&str],
    new_name: &str,
    dtype: ValueKind,
    keys: Option<&[Value]>,
    fill_na: Option<&Value>,
) -> Result<Arc<XFrame>> {
    if columns.is_empty() {
        return Err(XFrameError::SchemaMismatch(
            "pack_columns needs at least one input column".to_string(),
        ));
    }
    if !matches!(dtype, ValueKind::List | ValueKind::Vector | ValueKind::Dict) {
        return Err(XFrameError::Unsupported(format!(
            "cannot pack into a {} column; expected list, vector or dict",
            dtype
        )));
    }
    let pack_indices: Vec<usize> = columns
        .iter()
        .map(|&name| frame.column_index(name))
        .collect::<Result<_>>()?;

    let dict_keys: Vec<Value> = match keys {
        Some(keys) => {
            if keys.len() != columns.len() {
                return Err(XFrameError::SchemaMismatch(format!(
                    "{} keys for {} packed columns",
                    keys.len(),
                    columns.len()
                )));
            }
            keys.to_vec()
        }
        None => columns
            .iter()
            .map(|&name| Value::String(Arc::from(name)))
            .collect(),
    };

    // Output schema: untouched columns, then the packed column.
    let mut names: Vec<String> = Vec::new();
    let mut kinds: Vec<ValueKind> = Vec::new();
    let mut carry: Vec<usize> = Vec::new();
    let in_kinds = frame.column_types();
    for (i, name) in frame.column_names().iter().enumerate() {
        if !pack_indices.contains(&i) {
            names.push(name.clone());
            kinds.push(in_kinds[i]);
            carry.push(i);
        }
    }
    if names.iter().any(|n| n == new_name) {
        return Err(XFrameError::DuplicateColumn(format!(
            "column '{}' already exists",
            new_name
        )));
    }
    names.push(new_name.to_string());
    kinds.push(dtype);

    let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &kinds, 1)?;
    let mut sink = writer.get_output_iterator(0)?;

    let mut out_row: Vec<Value> = Vec::with_capacity(kinds.len());
    for seg in 0..frame.num_segments() {
        let mut rows = RowIter::new(frame, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while rows.next_row(&mut row)? {
            out_row.clear();
            out_row.extend(carry.iter().map(|&i| row[i].clone()));

            let packed = match dtype {
                ValueKind::List => {
                    let items: Vec<Value> = pack_indices
                        .iter()
                        .map(|&i| match (&row[i], fill_na) {
                            (Value::Undefined, Some(fill)) => fill.clone(),
                            (v, _) => v.clone(),
                        })
                        .collect();
                    Value::List(Arc::from(items))
                }
                ValueKind::Vector => {
                    let mut floats = Vec::with_capacity(pack_indices.len());
                    for &i in &pack_indices {
                        let v = match (&row[i], fill_na) {
                            (Value::Undefined, Some(fill)) => fill.clone(),
                            (v, _) => v.clone(),
                        };
                        floats.push(match v {
                            Value::Integer(x) => x as f64,
                            Value::Float(f) => f,
                            Value::Undefined => f64::NAN,
                            other => {
                                return Err(XFrameError::Unsupported(format!(
                                    "cannot pack value {} into a vector",
                                    other
                                )));
                            }
                        });
                    }
                    Value::Vector(Arc::from(floats))
                }
                ValueKind::Dict => {
                    let mut pairs = Vec::with_capacity(pack_indices.len());
                    for (key, &i) in dict_keys.iter().zip(&pack_indices) {
                        match (&row[i], fill_na) {
                            (Value::Undefined, Some(fill)) => {
                                pairs.push((key.clone(), fill.clone()));
                            }
                            (Value::Undefined, None) => {}
                            (v, _) => pairs.push((key.clone(), v.clone())),
                        }
                    }
                    Value::Dict(Arc::from(pairs))
                }
                _ => unreachable!(),
            };
            out_row.push(packed);
            sink.write_row(&out_row)?;
        }
    }

    let finished = [sink.finish()?];
    writer.close(&finished)
}

/// NA test, optionally looking inside containers.
fn is_missing(v: &Value, recursive: bool) -> bool {
    match v {
        Value::Undefined => true,
        Value::List(l) if recursive => l.iter().any(|e| is_missing(e, true)),
        Value::Dict(d) if recursive => d
            .iter()
            .any(|(k, val)| is_missing(k, true) || is_missing(val, true)),
        Value::Vector(x) if recursive => x.iter().any(|f| f.is_nan()),
        _ => false,
    }
}

/// Drop rows with missing values in the named columns (all columns when
/// `columns` is `None`). `all` drops only rows where *every* checked
/// column is missing.
pub fn drop_missing(
    frame: &Arc<XFrame>,
    columns: Option<&[&str]>,
    all: bool,
    recursive: bool,
) -> Result<Arc<XFrame>> {
    Ok(drop_missing_split(frame, columns, all, recursive)?.0)
}

/// As [`drop_missing`], also returning the dropped rows as a second
/// frame.
pub fn drop_missing_split(
    frame: &Arc<XFrame>,
    columns: Option<&[&str]>,
    all: bool,
    recursive: bool,
) -> Result<(Arc<XFrame>, Arc<XFrame>)> {
    let check: Vec<usize> = match columns {
        Some(names) => names
            .iter()
            .map(|&n| frame.column_index(n))
            .collect::<Result<_>>()?,
        None => (0..frame.num_columns()).collect(),
    };

    let mut keep: Vec<bool> = Vec::with_capacity(frame.num_rows() as usize);
    for seg in 0..frame.num_segments() {
        let mut rows = RowIter::new(frame, seg)?;
        let mut row: Vec<Value> = Vec::new();
        while rows.next_row(&mut row)? {
            let missing = check
                .iter()
                .filter(|&&c| is_missing(&row[c], recursive))
                .count();
            let drop = if all {
                !check.is_empty() && missing == check.len()
            } else {
                missing > 0
            };
            keep.push(!drop);
        }
    }

    let complement: Vec<bool> = keep.iter().map(|k| !k).collect();
    Ok((
        filter_by_mask(frame, &keep)?,
        filter_by_mask(frame, &complement)?,
    ))
}
