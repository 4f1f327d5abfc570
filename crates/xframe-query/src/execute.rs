//! The parallel materializer.
//!
//! A plan executes as N independent segment workers. Each worker compiles
//! the operator chain for its row range into explicit state machines
//! (`Operator::fill`) and pulls `READ_BATCH_SIZE`-row batches from its
//! sources; there is no scheduler or async runtime beyond the rayon
//! worker thread. The segmentation is decided over the plan's *driving
//! length*, the length of the deepest length-known spine; a filter
//! drives in its input's coordinates, so its per-segment output is simply
//! whatever survives its input range.
//!
//! Consumers that need a child's length (`Union`, `Append`, `Slice`,
//! both `LogicalFilter` inputs) force materialization of length-unknown
//! children; the result is installed in the child's one-shot cache, after
//! which the child behaves as a source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use xframe_storage::frame::{generate_column_name, XFrame, XFrameWriter};
use xframe_storage::sarray::SArrayReader;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

use crate::batch::RowBatch;
use crate::optimizer::optimize;
use crate::planner::{infer_kinds, infer_length, input_column_names, PlanNode, PlanOp};

/// What a fill call reports about the operator's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More rows may follow.
    More,
    /// The stream is exhausted; the batch holds the final rows (if any).
    Done,
}

/// A resumable operator state machine. `fill` appends up to `budget`
/// output rows to `out` and reports whether more may follow. All loop
/// state lives in the operator struct itself.
trait Operator: Send {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step>;
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// True iff the optimized plan is a plain data read.
pub fn is_materialized(plan: &Arc<PlanNode>) -> bool {
    optimize(plan).is_source_node()
}

/// Execute a plan into a frame with auto-generated `X{k}` column names,
/// installing the result in the plan's cache.
pub fn materialize(plan: &Arc<PlanNode>) -> Result<Arc<XFrame>> {
    materialize_with_names(plan, None)
}

/// Execute a plan into a frame. `names` overrides the output column names.
pub fn materialize_with_names(
    plan: &Arc<PlanNode>,
    names: Option<&[String]>,
) -> Result<Arc<XFrame>> {
    if let Some(frame) = plan.cached() {
        return Ok(relabel(frame, names)?);
    }
    let optimized = optimize(plan);
    if let Some(frame) = full_source_frame(&optimized) {
        plan.set_cache(frame.clone());
        return Ok(relabel(frame, names)?);
    }

    prepare(&optimized)?;
    let kinds = infer_kinds(&optimized)?;
    let num_segments = choose_num_segments(&optimized);
    let total = driving_length(&optimized)?;
    let ranges = split_range(total, num_segments);
    let batch_size = xframe_config::get_read_batch_size();
    log::debug!(
        "materialize: {} driving rows over {} segments",
        total,
        num_segments
    );

    let owned_names = output_names(names, &kinds)?;
    let name_refs: Vec<&str> = owned_names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &kinds, num_segments)?;
    let sinks = writer.get_output_iterators()?;

    let finished: Vec<(usize, u64)> = sinks
        .into_par_iter()
        .zip(ranges.into_par_iter())
        .map(|(mut sink, range)| {
            let mut op = compile_node(&optimized, range)?;
            loop {
                let mut out = RowBatch::empty(&kinds);
                let step = op.fill(&mut out, batch_size)?;
                if out.num_rows() > 0 {
                    sink.write_columns(&out.to_column_vecs())?;
                }
                if step == Step::Done {
                    break;
                }
            }
            sink.finish()
        })
        .collect::<Result<_>>()?;

    let frame = writer.close(&finished)?;
    plan.set_cache(frame.clone());
    Ok(frame)
}

/// Execute a plan into a user sink with a caller-chosen segment count.
/// The callback receives `(segment_id, batch)` and returns `true` to stop;
/// other workers observe the stop at their next batch boundary.
pub fn materialize_with_callback<F>(
    plan: &Arc<PlanNode>,
    num_segments: usize,
    callback: F,
) -> Result<()>
where
    F: Fn(usize, &RowBatch) -> Result<bool> + Send + Sync,
{
    let num_segments = num_segments.max(1);
    let optimized = optimize(plan);
    prepare(&optimized)?;
    let kinds = infer_kinds(&optimized)?;
    let total = driving_length(&optimized)?;
    let ranges = split_range(total, num_segments);
    let batch_size = xframe_config::get_read_batch_size();

    let stop = AtomicBool::new(false);
    ranges
        .into_par_iter()
        .enumerate()
        .try_for_each(|(seg, range)| -> Result<()> {
            let mut op = compile_node(&optimized, range)?;
            loop {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let mut out = RowBatch::empty(&kinds);
                let step = op.fill(&mut out, batch_size)?;
                if callback(seg, &out)? {
                    stop.store(true, Ordering::Relaxed);
                    return Ok(());
                }
                if step == Step::Done {
                    return Ok(());
                }
            }
        })
}

/// Compare the lengths of two plans, partially materializing when
/// inference cannot answer.
pub fn test_equal_length(a: &Arc<PlanNode>, b: &Arc<PlanNode>) -> Result<bool> {
    let len_a = match infer_length(a) {
        Some(n) => n,
        None => materialize(a)?.num_rows(),
    };
    let len_b = match infer_length(b) {
        Some(n) => n,
        None => materialize(b)?.num_rows(),
    };
    Ok(len_a == len_b)
}

// ---------------------------------------------------------------------------
// Planning helpers
// ---------------------------------------------------------------------------

fn relabel(frame: Arc<XFrame>, names: Option<&[String]>) -> Result<Arc<XFrame>> {
    let Some(names) = names else {
        return Ok(frame);
    };
    if names == frame.column_names() {
        return Ok(frame);
    }
    frame.with_column_names(names)
}

fn output_names(names: Option<&[String]>, kinds: &[ValueKind]) -> Result<Vec<String>> {
    match names {
        Some(names) => {
            if names.len() != kinds.len() {
                return Err(XFrameError::SchemaMismatch(format!(
                    "{} output names for {} columns",
                    names.len(),
                    kinds.len()
                )));
            }
            Ok(names.to_vec())
        }
        None => {
            let mut out = Vec::with_capacity(kinds.len());
            for k in 0..kinds.len() {
                out.push(generate_column_name(&out, k));
            }
            Ok(out)
        }
    }
}

/// The frame behind a full-range source node, if the plan is exactly that.
fn full_source_frame(plan: &Arc<PlanNode>) -> Option<Arc<XFrame>> {
    if let Some(frame) = plan.cached() {
        return Some(frame);
    }
    if let PlanOp::Source {
        frame,
        row_begin,
        row_end,
    } = &plan.op
    {
        if *row_begin == 0 && *row_end == frame.num_rows() {
            return Some(frame.clone());
        }
    }
    None
}

/// Materialize length-unknown children of length-needing consumers, and
/// fail fast on equal-length violations.
fn prepare(plan: &Arc<PlanNode>) -> Result<()> {
    if plan.cached().is_some() {
        return Ok(());
    }
    for input in &plan.inputs {
        prepare(input)?;
    }
    match &plan.op {
        PlanOp::Union => {
            ensure_length_known(&plan.inputs[0])?;
            ensure_length_known(&plan.inputs[1])?;
            let l = infer_length(&plan.inputs[0]).unwrap();
            let r = infer_length(&plan.inputs[1]).unwrap();
            if l != r {
                return Err(XFrameError::SchemaMismatch(format!(
                    "union of inputs with {} and {} rows",
                    l, r
                )));
            }
        }
        PlanOp::LogicalFilter => {
            ensure_length_known(&plan.inputs[0])?;
            ensure_length_known(&plan.inputs[1])?;
            let values = infer_length(&plan.inputs[0]).unwrap();
            let mask = infer_length(&plan.inputs[1]).unwrap();
            if values != mask {
                return Err(XFrameError::SchemaMismatch(format!(
                    "filter over {} rows with a {}-row mask",
                    values, mask
                )));
            }
        }
        PlanOp::Append | PlanOp::Slice { .. } => {
            for input in &plan.inputs {
                ensure_length_known(input)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn ensure_length_known(plan: &Arc<PlanNode>) -> Result<()> {
    if infer_length(plan).is_none() {
        log::debug!("materializing intermediate node to learn its length");
        materialize(plan)?;
    }
    Ok(())
}

/// Length of the coordinate space workers partition. After `prepare`,
/// every node can answer this.
fn driving_length(plan: &Arc<PlanNode>) -> Result<u64> {
    if let Some(frame) = plan.cached() {
        return Ok(frame.num_rows());
    }
    match &plan.op {
        PlanOp::LogicalFilter => driving_length(&plan.inputs[0]),
        PlanOp::Project { .. }
        | PlanOp::Transform { .. }
        | PlanOp::LambdaTransform { .. } => driving_length(&plan.inputs[0]),
        _ => infer_length(plan).ok_or_else(|| {
            XFrameError::NotMaterialized(
                "plan length unknown after preparation".to_string(),
            )
        }),
    }
}

/// Segment count: the first source frame's fan-out, else the configured
/// default, bounded by the worker-pool width.
fn choose_num_segments(plan: &Arc<PlanNode>) -> usize {
    let from_source = first_source_frame(plan)
        .map(|f| f.num_segments())
        .unwrap_or_else(xframe_config::get_default_num_segments);
    from_source.clamp(1, rayon::current_num_threads().max(1))
}

fn first_source_frame(plan: &Arc<PlanNode>) -> Option<Arc<XFrame>> {
    if let Some(frame) = plan.cached() {
        return Some(frame);
    }
    if let PlanOp::Source { frame, .. } = &plan.op {
        return Some(frame.clone());
    }
    plan.inputs.iter().find_map(first_source_frame)
}

/// Split `[0, total)` into `n` contiguous ranges; the last one takes the
/// remainder.
fn split_range(total: u64, n: usize) -> Vec<(u64, u64)> {
    let per = total / n as u64;
    (0..n as u64)
        .map(|i| {
            let lo = i * per;
            let hi = if i + 1 == n as u64 { total } else { lo + per };
            (lo, hi)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile the operator chain producing output rows for `range` (in the
/// node's driving coordinates).
fn compile_node(plan: &Arc<PlanNode>, range: (u64, u64)) -> Result<Box<dyn Operator>> {
    if let Some(frame) = plan.cached() {
        return Ok(Box::new(SourceOp::open(&frame, range.0, range.1)?));
    }

    match &plan.op {
        PlanOp::Source {
            frame,
            row_begin,
            row_end,
        } => {
            let lo = (row_begin + range.0).min(*row_end);
            let hi = (row_begin + range.1).min(*row_end);
            Ok(Box::new(SourceOp::open(frame, lo, hi)?))
        }
        PlanOp::Range { start, step, len } => {
            let lo = range.0.min(*len);
            let hi = range.1.min(*len);
            Ok(Box::new(RangeOp {
                value: start + step * lo as i64,
                step: *step,
                remaining: hi - lo,
            }))
        }
        PlanOp::Constant { value, len } => {
            let lo = range.0.min(*len);
            let hi = range.1.min(*len);
            Ok(Box::new(ConstantOp {
                value: value.clone(),
                remaining: hi - lo,
            }))
        }
        PlanOp::Project { indices } => Ok(Box::new(ProjectOp {
            input: compile_node(&plan.inputs[0], range)?,
            input_kinds: infer_kinds(&plan.inputs[0])?,
            indices: indices.clone(),
        })),
        PlanOp::Union => Ok(Box::new(UnionOp {
            left: PendingStream::new(compile_node(&plan.inputs[0], range)?, infer_kinds(&plan.inputs[0])?),
            right: PendingStream::new(compile_node(&plan.inputs[1], range)?, infer_kinds(&plan.inputs[1])?),
        })),
        PlanOp::Append => {
            let left_len = infer_length(&plan.inputs[0]).ok_or_else(|| {
                XFrameError::NotMaterialized("append input length unknown".to_string())
            })?;
            let (lo, hi) = range;
            let mut parts: Vec<Box<dyn Operator>> = Vec::new();
            if lo < left_len {
                parts.push(compile_node(
                    &plan.inputs[0],
                    (lo, hi.min(left_len)),
                )?);
            }
            if hi > left_len {
                parts.push(compile_node(
                    &plan.inputs[1],
                    (lo.saturating_sub(left_len), hi - left_len),
                )?);
            }
            Ok(Box::new(AppendOp { parts, current: 0 }))
        }
        PlanOp::LogicalFilter => Ok(Box::new(FilterOp {
            values: PendingStream::new(
                compile_node(&plan.inputs[0], range)?,
                infer_kinds(&plan.inputs[0])?,
            ),
            mask: PendingStream::new(
                compile_node(&plan.inputs[1], range)?,
                infer_kinds(&plan.inputs[1])?,
            ),
        })),
        PlanOp::Transform { func, .. } => Ok(Box::new(TransformOp {
            input: compile_node(&plan.inputs[0], range)?,
            input_kinds: infer_kinds(&plan.inputs[0])?,
            func: func.clone(),
        })),
        PlanOp::LambdaTransform { evaluator, .. } => Ok(Box::new(LambdaOp {
            input: compile_node(&plan.inputs[0], range)?,
            input_kinds: infer_kinds(&plan.inputs[0])?,
            column_names: input_column_names(&plan.inputs[0])?,
            evaluator: evaluator.clone(),
        })),
        PlanOp::Slice { start, end } => {
            let input_len = infer_length(&plan.inputs[0]).ok_or_else(|| {
                XFrameError::NotMaterialized("slice input length unknown".to_string())
            })?;
            let s_end = (*end).min(input_len);
            let s_start = (*start).min(s_end);
            let lo = (s_start + range.0).min(s_end);
            let hi = (s_start + range.1).min(s_end);
            compile_node(&plan.inputs[0], (lo, hi))
        }
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Reads a row range of a materialized frame, one reader per column.
struct SourceOp {
    readers: Vec<SArrayReader>,
    kinds: Vec<ValueKind>,
    pos: u64,
    end: u64,
}

impl SourceOp {
    fn open(frame: &Arc<XFrame>, lo: u64, hi: u64) -> Result<Self> {
        let readers: Vec<SArrayReader> = frame
            .columns()
            .iter()
            .map(|c| c.reader(None))
            .collect::<Result<_>>()?;
        Ok(SourceOp {
            readers,
            kinds: frame.column_types(),
            pos: lo,
            end: hi.max(lo),
        })
    }
}

impl Operator for SourceOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let take = (self.end - self.pos).min(budget as u64);
        if take > 0 {
            let mut columns = Vec::with_capacity(self.readers.len());
            for reader in &mut self.readers {
                let mut col = Vec::with_capacity(take as usize);
                reader.read_rows(self.pos, self.pos + take, &mut col)?;
                columns.push(col);
            }
            out.append(&RowBatch::from_column_vecs(columns, &self.kinds)?)?;
            self.pos += take;
        }
        Ok(if self.pos >= self.end {
            Step::Done
        } else {
            Step::More
        })
    }
}

struct RangeOp {
    value: i64,
    step: i64,
    remaining: u64,
}

impl Operator for RangeOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let take = self.remaining.min(budget as u64);
        for _ in 0..take {
            out.push_row(&[Value::Integer(self.value)])?;
            self.value += self.step;
        }
        self.remaining -= take;
        Ok(if self.remaining == 0 {
            Step::Done
        } else {
            Step::More
        })
    }
}

struct ConstantOp {
    value: Value,
    remaining: u64,
}

impl Operator for ConstantOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let take = self.remaining.min(budget as u64);
        for _ in 0..take {
            out.push_row(std::slice::from_ref(&self.value))?;
        }
        self.remaining -= take;
        Ok(if self.remaining == 0 {
            Step::Done
        } else {
            Step::More
        })
    }
}

struct ProjectOp {
    input: Box<dyn Operator>,
    input_kinds: Vec<ValueKind>,
    indices: Vec<usize>,
}

impl Operator for ProjectOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let mut inner = RowBatch::empty(&self.input_kinds);
        let step = self.input.fill(&mut inner, budget)?;
        if inner.num_rows() > 0 {
            out.append(&inner.select_columns(&self.indices)?)?;
        }
        Ok(step)
    }
}

/// A child stream with carry-over rows not yet consumed by the parent.
struct PendingStream {
    op: Box<dyn Operator>,
    kinds: Vec<ValueKind>,
    pending: RowBatch,
    offset: usize,
    done: bool,
}

impl PendingStream {
    fn new(op: Box<dyn Operator>, kinds: Vec<ValueKind>) -> Self {
        let pending = RowBatch::empty(&kinds);
        PendingStream {
            op,
            kinds,
            pending,
            offset: 0,
            done: false,
        }
    }

    fn available(&self) -> usize {
        self.pending.num_rows() - self.offset
    }

    /// Pull another batch if nothing is pending. Returns false when the
    /// stream is exhausted and empty.
    fn refill(&mut self, budget: usize) -> Result<bool> {
        while self.available() == 0 && !self.done {
            let mut batch = RowBatch::empty(&self.kinds);
            if self.op.fill(&mut batch, budget)? == Step::Done {
                self.done = true;
            }
            self.pending = batch;
            self.offset = 0;
        }
        Ok(self.available() > 0)
    }

    fn row(&self, i: usize) -> Vec<Value> {
        self.pending.row(self.offset + i)
    }

    fn consume(&mut self, n: usize) {
        self.offset += n;
    }
}

/// Horizontal concatenation of two equal-length inputs.
struct UnionOp {
    left: PendingStream,
    right: PendingStream,
}

impl Operator for UnionOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        while out.num_rows() < budget {
            let left_has = self.left.refill(budget)?;
            let right_has = self.right.refill(budget)?;
            match (left_has, right_has) {
                (false, false) => return Ok(Step::Done),
                (true, true) => {}
                _ => {
                    return Err(XFrameError::SchemaMismatch(
                        "union inputs produced different row counts".to_string(),
                    ));
                }
            }
            let take = self
                .left
                .available()
                .min(self.right.available())
                .min(budget - out.num_rows());
            for i in 0..take {
                let mut row = self.left.row(i);
                row.extend(self.right.row(i));
                out.push_row(&row)?;
            }
            self.left.consume(take);
            self.right.consume(take);
        }
        Ok(Step::More)
    }
}

/// Chains sub-operators (used by `Append`, whose range may span inputs).
struct AppendOp {
    parts: Vec<Box<dyn Operator>>,
    current: usize,
}

impl Operator for AppendOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        while self.current < self.parts.len() {
            let remaining = budget.saturating_sub(out.num_rows());
            if remaining == 0 {
                return Ok(Step::More);
            }
            match self.parts[self.current].fill(out, remaining)? {
                Step::More => return Ok(Step::More),
                Step::Done => self.current += 1,
            }
        }
        Ok(Step::Done)
    }
}

/// Keeps rows whose mask value is non-zero, pulling more input until the
/// output batch fills or the input ends.
struct FilterOp {
    values: PendingStream,
    mask: PendingStream,
}

impl Operator for FilterOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        loop {
            if out.num_rows() >= budget {
                return Ok(Step::More);
            }
            if !self.values.refill(budget)? {
                return Ok(Step::Done);
            }
            if !self.mask.refill(budget)? {
                return Err(XFrameError::SchemaMismatch(
                    "filter mask ended before its input".to_string(),
                ));
            }

            let take = self.values.available().min(self.mask.available());
            let mut consumed = take;
            for i in 0..take {
                let keep = match &self.mask.row(i)[0] {
                    Value::Integer(x) => *x != 0,
                    Value::Undefined => false,
                    other => {
                        return Err(XFrameError::SchemaMismatch(format!(
                            "filter mask holds non-integer value {}",
                            other
                        )));
                    }
                };
                if keep {
                    out.push_row(&self.values.row(i))?;
                    if out.num_rows() >= budget {
                        consumed = i + 1;
                        break;
                    }
                }
            }
            self.values.consume(consumed);
            self.mask.consume(consumed);
        }
    }
}

struct TransformOp {
    input: Box<dyn Operator>,
    input_kinds: Vec<ValueKind>,
    func: Arc<crate::planner::RowFn>,
}

impl Operator for TransformOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let mut inner = RowBatch::empty(&self.input_kinds);
        let step = self.input.fill(&mut inner, budget)?;
        for i in 0..inner.num_rows() {
            let value = (self.func)(&inner.row(i));
            out.push_row(std::slice::from_ref(&value))?;
        }
        Ok(step)
    }
}

struct LambdaOp {
    input: Box<dyn Operator>,
    input_kinds: Vec<ValueKind>,
    column_names: Vec<String>,
    evaluator: Arc<dyn crate::planner::LambdaEvaluator>,
}

impl Operator for LambdaOp {
    fn fill(&mut self, out: &mut RowBatch, budget: usize) -> Result<Step> {
        let mut inner = RowBatch::empty(&self.input_kinds);
        let step = self.input.fill(&mut inner, budget)?;
        if inner.num_rows() > 0 {
            let rows = inner.to_rows();
            let values = self.evaluator.eval(&self.column_names, &rows)?;
            if values.len() != rows.len() {
                return Err(XFrameError::Invariant(format!(
                    "lambda evaluator returned {} values for {} rows",
                    values.len(),
                    rows.len()
                )));
            }
            for value in &values {
                out.push_row(std::slice::from_ref(value))?;
            }
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::tests::frame_of_ints;

    fn int_transform(
        input: Arc<PlanNode>,
        f: impl Fn(i64) -> i64 + Send + Sync + 'static,
    ) -> Arc<PlanNode> {
        PlanNode::transform(
            input,
            Arc::new(move |row| match &row[0] {
                Value::Integer(i) => Value::Integer(f(*i)),
                _ => Value::Undefined,
            }),
            ValueKind::Integer,
        )
    }

    fn column_values(frame: &Arc<XFrame>, idx: usize) -> Vec<Value> {
        frame.columns()[idx].read_all().unwrap()
    }

    #[test]
    fn test_materialize_source_is_identity() {
        let frame = frame_of_ints(&[1, 2, 3], 2);
        let plan = PlanNode::source(frame.clone());
        let out = materialize(&plan).unwrap();
        assert!(Arc::ptr_eq(&out, &frame));
        assert!(is_materialized(&plan));
    }

    #[test]
    fn test_transform_and_cache() {
        let values: Vec<i64> = (0..10_000).collect();
        let frame = frame_of_ints(&values, 4);
        let plan = int_transform(PlanNode::source(frame), |i| i * 2);
        assert!(!is_materialized(&plan));

        let out = materialize(&plan).unwrap();
        assert_eq!(out.num_rows(), 10_000);
        assert_eq!(
            column_values(&out, 0),
            values.iter().map(|i| Value::Integer(i * 2)).collect::<Vec<_>>()
        );
        // The cache is installed and the node now acts as a source.
        assert!(plan.cached().is_some());
        assert!(is_materialized(&plan));
        // Auto-generated column name.
        assert_eq!(out.column_names(), &["X1"]);
    }

    #[test]
    fn test_logical_filter_even_rows() {
        let n = 20_000i64;
        let values: Vec<i64> = (0..n).collect();
        let frame = frame_of_ints(&values, 4);
        let source = PlanNode::source(frame);
        let mask = int_transform(source.clone(), |i| (i % 2 == 0) as i64);
        let filtered = PlanNode::logical_filter(source, mask);

        let out = materialize(&filtered).unwrap();
        assert_eq!(out.num_rows(), 10_000);
        let col = column_values(&out, 0);
        assert_eq!(col[0], Value::Integer(0));
        assert_eq!(col[9999], Value::Integer(19_998));
    }

    #[test]
    fn test_filter_length_mismatch_is_schema_error() {
        let frame = frame_of_ints(&[1, 2, 3], 1);
        let mask = PlanNode::constant(Value::Integer(1), 2);
        let filtered = PlanNode::logical_filter(PlanNode::source(frame), mask);
        assert!(matches!(
            materialize(&filtered),
            Err(XFrameError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_union_combines_columns() {
        let frame = frame_of_ints(&[1, 2, 3, 4], 2);
        let source = PlanNode::source(frame);
        let doubled = int_transform(source.clone(), |i| i * 10);
        let union = PlanNode::union(source, doubled);

        let out = materialize(&union).unwrap();
        assert_eq!(out.num_columns(), 2);
        assert_eq!(
            column_values(&out, 1),
            vec![
                Value::Integer(10),
                Value::Integer(20),
                Value::Integer(30),
                Value::Integer(40)
            ]
        );
    }

    #[test]
    fn test_append_across_segments() {
        let a = frame_of_ints(&[1, 2, 3], 2);
        let b = frame_of_ints(&[4, 5], 1);
        let plan = PlanNode::append(PlanNode::source(a), PlanNode::source(b));
        let out = materialize(&plan).unwrap();
        assert_eq!(out.num_rows(), 5);
        assert_eq!(
            column_values(&out, 0),
            (1..=5).map(Value::Integer).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_union_over_filter_materializes_inputs() {
        // Both union inputs are filters (length unknown); the planner must
        // materialize them to check lengths, then still produce the union.
        let frame = frame_of_ints(&(0..100).collect::<Vec<_>>(), 2);
        let source = PlanNode::source(frame);
        let mask = int_transform(source.clone(), |i| (i % 2 == 0) as i64);
        let evens = PlanNode::logical_filter(source.clone(), mask.clone());
        let evens_scaled = int_transform(
            PlanNode::logical_filter(source, mask),
            |i| i + 1000,
        );

        let union = PlanNode::union(evens, evens_scaled);
        let out = materialize(&union).unwrap();
        assert_eq!(out.num_rows(), 50);
        assert_eq!(out.num_columns(), 2);
        assert_eq!(column_values(&out, 0)[1], Value::Integer(2));
        assert_eq!(column_values(&out, 1)[1], Value::Integer(1002));
    }

    #[test]
    fn test_slice_and_range() {
        let plan = PlanNode::slice(PlanNode::range(0, 3, 100), 10, 20);
        let out = materialize(&plan).unwrap();
        assert_eq!(out.num_rows(), 10);
        assert_eq!(column_values(&out, 0)[0], Value::Integer(30));
        assert_eq!(column_values(&out, 0)[9], Value::Integer(57));
    }

    #[test]
    fn test_callback_segments_and_stop() {
        let values: Vec<i64> = (0..50_000).collect();
        let frame = frame_of_ints(&values, 4);
        let plan = int_transform(PlanNode::source(frame), |i| i);

        // Count rows until 100 have been seen, then stop.
        let seen = std::sync::atomic::AtomicU64::new(0);
        materialize_with_callback(&plan, 4, |_seg, batch| {
            let total = seen.fetch_add(batch.num_rows() as u64, Ordering::SeqCst)
                + batch.num_rows() as u64;
            Ok(total >= 100)
        })
        .unwrap();

        let total = seen.load(Ordering::SeqCst);
        assert!(total >= 100);
        // Cancellation at batch boundaries bounds the overshoot.
        let batch = xframe_config::get_read_batch_size() as u64;
        assert!(total <= 100 + 4 * batch);
    }

    #[test]
    fn test_callback_error_propagates() {
        let frame = frame_of_ints(&[1, 2, 3], 1);
        let plan = PlanNode::source(frame);
        let err = materialize_with_callback(&plan, 2, |_seg, _batch| {
            Err(XFrameError::Unsupported("sink failure".to_string()))
        });
        assert!(matches!(err, Err(XFrameError::Unsupported(_))));
    }

    #[test]
    fn test_test_equal_length() {
        let frame = frame_of_ints(&(0..10).collect::<Vec<_>>(), 1);
        let source = PlanNode::source(frame);
        let mask_all = int_transform(source.clone(), |_| 1);
        let filtered = PlanNode::logical_filter(source.clone(), mask_all);

        // Requires partial materialization of the filter.
        assert!(test_equal_length(&source, &filtered).unwrap());

        let shorter = PlanNode::range(0, 1, 3);
        assert!(!test_equal_length(&source, &shorter).unwrap());
    }

    #[test]
    fn test_lambda_transform() {
        struct Doubler;
        impl crate::planner::LambdaEvaluator for Doubler {
            fn eval(&self, _names: &[String], rows: &[Vec<Value>]) -> Result<Vec<Value>> {
                Ok(rows
                    .iter()
                    .map(|r| match &r[0] {
                        Value::Integer(i) => Value::Integer(i * 2),
                        _ => Value::Undefined,
                    })
                    .collect())
            }
        }

        let frame = frame_of_ints(&[1, 2, 3], 1);
        let plan = PlanNode::lambda_transform(
            PlanNode::source(frame),
            Arc::new(Doubler),
            ValueKind::Integer,
        );
        let out = materialize(&plan).unwrap();
        assert_eq!(
            column_values(&out, 0),
            vec![Value::Integer(2), Value::Integer(4), Value::Integer(6)]
        );
    }
}
