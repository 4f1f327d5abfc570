//! The lazy plan graph.
//!
//! A plan is a DAG of `Arc<PlanNode>`s; nodes share inputs by reference
//! count and never hold parent pointers. Each node carries a one-shot
//! materialization cache: once the planner materializes a node, it behaves
//! as a source from then on.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use xframe_storage::frame::XFrame;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{Value, ValueKind};

/// A row-level closure: consumes one input row, produces one value.
pub type RowFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// External embedded-lambda runtime (may be absent; nothing in the engine
/// implements it). Must be deterministic for a fixed seed.
pub trait LambdaEvaluator: Send + Sync {
    /// Evaluate a batch of rows; returns one value per row.
    fn eval(&self, column_names: &[String], rows: &[Vec<Value>]) -> Result<Vec<Value>>;
}

/// Operators the planner recognizes.
pub enum PlanOp {
    /// Read a row range of a materialized frame. A full-range source is
    /// what `PlanNode::source` builds; the optimizer narrows the range
    /// when folding a slice into its source.
    Source {
        frame: Arc<XFrame>,
        row_begin: u64,
        row_end: u64,
    },
    /// Integer range source.
    Range { start: i64, step: i64, len: u64 },
    /// Repeated-constant source.
    Constant { value: Value, len: u64 },
    /// Column reindexing.
    Project { indices: Vec<usize> },
    /// Horizontal column concatenation of two equal-length inputs.
    Union,
    /// Vertical concatenation of two schema-matching inputs.
    Append,
    /// Keep the rows of the first input whose mask row (second input, a
    /// single 0/1 integer column of equal length) is non-zero.
    LogicalFilter,
    /// Row-wise closure producing a single new column.
    Transform {
        func: Arc<RowFn>,
        output_kind: ValueKind,
    },
    /// Row-wise evaluation through the external lambda runtime.
    LambdaTransform {
        evaluator: Arc<dyn LambdaEvaluator>,
        output_kind: ValueKind,
    },
    /// Row slice `[start, end)` of one input.
    Slice { start: u64, end: u64 },
}

pub struct PlanNode {
    pub op: PlanOp,
    pub inputs: Vec<Arc<PlanNode>>,
    cache: OnceLock<Arc<XFrame>>,
}

impl PlanNode {
    pub(crate) fn rebuild(op: PlanOp, inputs: Vec<Arc<PlanNode>>) -> Arc<Self> {
        Self::build(op, inputs)
    }

    fn build(op: PlanOp, inputs: Vec<Arc<PlanNode>>) -> Arc<Self> {
        Arc::new(PlanNode {
            op,
            inputs,
            cache: OnceLock::new(),
        })
    }

    /// Source over a whole frame.
    pub fn source(frame: Arc<XFrame>) -> Arc<Self> {
        let len = frame.num_rows();
        Self::build(
            PlanOp::Source {
                frame,
                row_begin: 0,
                row_end: len,
            },
            vec![],
        )
    }

    /// Source over a row range of a frame.
    pub fn source_range(frame: Arc<XFrame>, row_begin: u64, row_end: u64) -> Arc<Self> {
        Self::build(
            PlanOp::Source {
                frame,
                row_begin,
                row_end,
            },
            vec![],
        )
    }

    pub fn range(start: i64, step: i64, len: u64) -> Arc<Self> {
        Self::build(PlanOp::Range { start, step, len }, vec![])
    }

    pub fn constant(value: Value, len: u64) -> Arc<Self> {
        Self::build(PlanOp::Constant { value, len }, vec![])
    }

    pub fn project(input: Arc<PlanNode>, indices: Vec<usize>) -> Arc<Self> {
        Self::build(PlanOp::Project { indices }, vec![input])
    }

    pub fn union(left: Arc<PlanNode>, right: Arc<PlanNode>) -> Arc<Self> {
        Self::build(PlanOp::Union, vec![left, right])
    }

    pub fn append(left: Arc<PlanNode>, right: Arc<PlanNode>) -> Arc<Self> {
        Self::build(PlanOp::Append, vec![left, right])
    }

    pub fn logical_filter(values: Arc<PlanNode>, mask: Arc<PlanNode>) -> Arc<Self> {
        Self::build(PlanOp::LogicalFilter, vec![values, mask])
    }

    pub fn transform(
        input: Arc<PlanNode>,
        func: Arc<RowFn>,
        output_kind: ValueKind,
    ) -> Arc<Self> {
        Self::build(PlanOp::Transform { func, output_kind }, vec![input])
    }

    pub fn lambda_transform(
        input: Arc<PlanNode>,
        evaluator: Arc<dyn LambdaEvaluator>,
        output_kind: ValueKind,
    ) -> Arc<Self> {
        Self::build(
            PlanOp::LambdaTransform {
                evaluator,
                output_kind,
            },
            vec![input],
        )
    }

    pub fn slice(input: Arc<PlanNode>, start: u64, end: u64) -> Arc<Self> {
        Self::build(PlanOp::Slice { start, end }, vec![input])
    }

    /// The cached materialization, if the planner has produced one.
    pub fn cached(&self) -> Option<Arc<XFrame>> {
        self.cache.get().cloned()
    }

    /// One-shot cache install; later writes are ignored.
    pub fn set_cache(&self, frame: Arc<XFrame>) {
        let _ = self.cache.set(frame);
    }

    /// True when this node reads data rather than computing it: a
    /// source/range/constant, or any node with a cached materialization.
    pub fn is_source_node(&self) -> bool {
        self.cache.get().is_some()
            || matches!(
                self.op,
                PlanOp::Source { .. } | PlanOp::Range { .. } | PlanOp::Constant { .. }
            )
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Infer per-column output kinds, memoized over the DAG.
pub fn infer_kinds(plan: &Arc<PlanNode>) -> Result<Vec<ValueKind>> {
    let mut memo: HashMap<*const PlanNode, Vec<ValueKind>> = HashMap::new();
    infer_kinds_memo(plan, &mut memo)
}

fn infer_kinds_memo(
    plan: &Arc<PlanNode>,
    memo: &mut HashMap<*const PlanNode, Vec<ValueKind>>,
) -> Result<Vec<ValueKind>> {
    let key = Arc::as_ptr(plan);
    if let Some(kinds) = memo.get(&key) {
        return Ok(kinds.clone());
    }

    let kinds = match &plan.op {
        PlanOp::Source { frame, .. } => frame.column_types(),
        PlanOp::Range { .. } => vec![ValueKind::Integer],
        PlanOp::Constant { value, .. } => vec![value.kind()],
        PlanOp::Project { indices } => {
            let input = infer_kinds_memo(&plan.inputs[0], memo)?;
            let mut out = Vec::with_capacity(indices.len());
            for &i in indices {
                let k = input.get(i).ok_or_else(|| {
                    XFrameError::OutOfRange(format!(
                        "projection index {} out of range ({} columns)",
                        i,
                        input.len()
                    ))
                })?;
                out.push(*k);
            }
            out
        }
        PlanOp::Union => {
            let mut left = infer_kinds_memo(&plan.inputs[0], memo)?;
            let right = infer_kinds_memo(&plan.inputs[1], memo)?;
            left.extend(right);
            left
        }
        PlanOp::Append => {
            let left = infer_kinds_memo(&plan.inputs[0], memo)?;
            let right = infer_kinds_memo(&plan.inputs[1], memo)?;
            if left != right {
                return Err(XFrameError::SchemaMismatch(format!(
                    "append of mismatched schemas {:?} and {:?}",
                    left, right
                )));
            }
            left
        }
        PlanOp::LogicalFilter => {
            let values = infer_kinds_memo(&plan.inputs[0], memo)?;
            let mask = infer_kinds_memo(&plan.inputs[1], memo)?;
            if mask.len() != 1 || mask[0] != ValueKind::Integer {
                return Err(XFrameError::SchemaMismatch(format!(
                    "filter mask must be a single integer column, found {:?}",
                    mask
                )));
            }
            values
        }
        PlanOp::Transform { output_kind, .. }
        | PlanOp::LambdaTransform { output_kind, .. } => {
            infer_kinds_memo(&plan.inputs[0], memo)?;
            vec![*output_kind]
        }
        PlanOp::Slice { .. } => infer_kinds_memo(&plan.inputs[0], memo)?,
    };

    memo.insert(key, kinds.clone());
    Ok(kinds)
}

/// Infer the output length. `None` means the length is only knowable by
/// materializing (anything downstream of an unmaterialized filter).
pub fn infer_length(plan: &Arc<PlanNode>) -> Option<u64> {
    if let Some(frame) = plan.cached() {
        return Some(frame.num_rows());
    }
    match &plan.op {
        PlanOp::Source {
            row_begin, row_end, ..
        } => Some(row_end - row_begin),
        PlanOp::Range { len, .. } | PlanOp::Constant { len, .. } => Some(*len),
        PlanOp::Project { .. }
        | PlanOp::Transform { .. }
        | PlanOp::LambdaTransform { .. } => infer_length(&plan.inputs[0]),
        PlanOp::Union => {
            infer_length(&plan.inputs[0]).or_else(|| infer_length(&plan.inputs[1]))
        }
        PlanOp::Append => {
            Some(infer_length(&plan.inputs[0])? + infer_length(&plan.inputs[1])?)
        }
        PlanOp::LogicalFilter => None,
        PlanOp::Slice { start, end } => Some(end.saturating_sub(*start)),
    }
}

/// Column names a lambda evaluator sees: real names for frame sources,
/// generated `X{k}` names for computed inputs.
pub fn input_column_names(plan: &Arc<PlanNode>) -> Result<Vec<String>> {
    if let Some(frame) = plan.cached() {
        return Ok(frame.column_names().to_vec());
    }
    match &plan.op {
        PlanOp::Source { frame, .. } => Ok(frame.column_names().to_vec()),
        _ => {
            let n = infer_kinds(plan)?.len();
            let mut names = Vec::with_capacity(n);
            for k in 0..n {
                names.push(xframe_storage::frame::generate_column_name(&names, k));
            }
            Ok(names)
        }
    }
}
