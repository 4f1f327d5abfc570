//! First-pass plan rewrites.
//!
//! All rewrites are semantic-preserving; there is no cost model:
//! - fold adjacent `Project`s and drop identity `Project`s
//! - push `Project` through `Union` and `Append`
//! - fuse back-to-back `Transform`s into one closure composition
//! - fold `Slice` chains and narrow a `Slice` of a source into a
//!   range-restricted source read
//!
//! Nodes with a cached materialization are left untouched: they already
//! behave as sources.

use std::sync::Arc;

use crate::planner::{PlanNode, PlanOp};

/// Apply all optimization passes to a plan.
pub fn optimize(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    let plan = fuse_transforms(plan);
    let plan = fuse_projects(&plan);
    let plan = pushdown_projects(&plan);
    let plan = narrow_slices(&plan);
    eliminate_identity_projects(&plan)
}

/// Number of output columns, when derivable without full inference.
fn count_output_columns(plan: &PlanNode) -> Option<usize> {
    if let Some(frame) = plan.cached() {
        return Some(frame.num_columns());
    }
    match &plan.op {
        PlanOp::Source { frame, .. } => Some(frame.num_columns()),
        PlanOp::Range { .. } | PlanOp::Constant { .. } => Some(1),
        PlanOp::Project { indices } => Some(indices.len()),
        PlanOp::Union => Some(
            count_output_columns(&plan.inputs[0])? + count_output_columns(&plan.inputs[1])?,
        ),
        PlanOp::Append => count_output_columns(&plan.inputs[0]),
        PlanOp::LogicalFilter => count_output_columns(&plan.inputs[0]),
        PlanOp::Transform { .. } | PlanOp::LambdaTransform { .. } => Some(1),
        PlanOp::Slice { .. } => count_output_columns(&plan.inputs[0]),
    }
}

/// Fuse `Project(b) → Project(a)` into `Project(a[b[i]])`.
fn fuse_projects(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    rewrite(plan, &|node| {
        if let PlanOp::Project { indices: outer } = &node.op {
            if let PlanOp::Project { indices: inner } = &node.inputs[0].op {
                if node.inputs[0].cached().is_none()
                    && outer.iter().all(|&i| i < inner.len())
                {
                    let composed: Vec<usize> = outer.iter().map(|&i| inner[i]).collect();
                    return Some(PlanNode::project(
                        node.inputs[0].inputs[0].clone(),
                        composed,
                    ));
                }
            }
        }
        None
    })
}

/// Drop `Project`s that select all columns in order.
fn eliminate_identity_projects(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    rewrite(plan, &|node| {
        if let PlanOp::Project { indices } = &node.op {
            let is_identity = indices.iter().enumerate().all(|(i, &c)| c == i);
            if is_identity {
                if let Some(n) = count_output_columns(&node.inputs[0]) {
                    if indices.len() == n {
                        return Some(node.inputs[0].clone());
                    }
                }
            }
        }
        None
    })
}

/// Push `Project` through `Union` and `Append`.
fn pushdown_projects(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    rewrite(plan, &|node| {
        let PlanOp::Project { indices } = &node.op else {
            return None;
        };
        let input = &node.inputs[0];
        if input.cached().is_some() {
            return None;
        }
        match &input.op {
            PlanOp::Append => {
                let left = PlanNode::project(input.inputs[0].clone(), indices.clone());
                let right = PlanNode::project(input.inputs[1].clone(), indices.clone());
                Some(PlanNode::append(left, right))
            }
            PlanOp::Union => {
                let left_cols = count_output_columns(&input.inputs[0])?;
                if indices.iter().all(|&i| i < left_cols) {
                    return Some(PlanNode::project(
                        input.inputs[0].clone(),
                        indices.clone(),
                    ));
                }
                if indices.iter().all(|&i| i >= left_cols) {
                    let shifted: Vec<usize> = indices.iter().map(|&i| i - left_cols).collect();
                    return Some(PlanNode::project(input.inputs[1].clone(), shifted));
                }
                // Left-block followed by right-block keeps the union shape.
                let split = indices.iter().position(|&i| i >= left_cols)?;
                if indices[..split].iter().all(|&i| i < left_cols)
                    && indices[split..].iter().all(|&i| i >= left_cols)
                {
                    let left =
                        PlanNode::project(input.inputs[0].clone(), indices[..split].to_vec());
                    let right = PlanNode::project(
                        input.inputs[1].clone(),
                        indices[split..].iter().map(|&i| i - left_cols).collect(),
                    );
                    return Some(PlanNode::union(left, right));
                }
                None
            }
            _ => None,
        }
    })
}

/// Fuse `Transform(g) → Transform(f)` into one closure composition.
fn fuse_transforms(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    rewrite(plan, &|node| {
        if let PlanOp::Transform {
            func: outer,
            output_kind,
        } = &node.op
        {
            if let PlanOp::Transform { func: inner, .. } = &node.inputs[0].op {
                if node.inputs[0].cached().is_none() {
                    let f = inner.clone();
                    let g = outer.clone();
                    let composed: Arc<crate::planner::RowFn> =
                        Arc::new(move |row| g(&[f(row)]));
                    return Some(PlanNode::transform(
                        node.inputs[0].inputs[0].clone(),
                        composed,
                        *output_kind,
                    ));
                }
            }
        }
        None
    })
}

/// Fold `Slice` chains and turn a `Slice` of a source into a narrowed
/// source read.
fn narrow_slices(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    rewrite(plan, &|node| {
        let PlanOp::Slice { start, end } = &node.op else {
            return None;
        };
        let input = &node.inputs[0];
        if input.cached().is_some() {
            return None;
        }
        match &input.op {
            PlanOp::Slice {
                start: inner_start,
                end: inner_end,
            } => {
                let lo = (inner_start + start).min(*inner_end);
                let hi = (inner_start + end).min(*inner_end);
                Some(PlanNode::slice(input.inputs[0].clone(), lo, hi))
            }
            PlanOp::Source {
                frame,
                row_begin,
                row_end,
            } => {
                let lo = (row_begin + start).min(*row_end);
                let hi = (row_begin + end).min(*row_end);
                Some(PlanNode::source_range(frame.clone(), lo, hi))
            }
            PlanOp::Range {
                start: r_start,
                step,
                len,
            } => {
                let lo = (*start).min(*len);
                let hi = (*end).min(*len);
                Some(PlanNode::range(
                    r_start + *step * lo as i64,
                    *step,
                    hi - lo,
                ))
            }
            PlanOp::Constant { value, len } => {
                let lo = (*start).min(*len);
                let hi = (*end).min(*len);
                Some(PlanNode::constant(value.clone(), hi - lo))
            }
            _ => None,
        }
    })
}

/// Bottom-up rewrite driver: optimize inputs first, then repeatedly apply
/// `rule` at this node until it no longer fires. Nodes with a cached
/// materialization are sources and never rewritten.
fn rewrite(
    plan: &Arc<PlanNode>,
    rule: &dyn Fn(&Arc<PlanNode>) -> Option<Arc<PlanNode>>,
) -> Arc<PlanNode> {
    if plan.cached().is_some() {
        return plan.clone();
    }
    let new_inputs: Vec<Arc<PlanNode>> =
        plan.inputs.iter().map(|i| rewrite(i, rule)).collect();
    let mut node = rebuild_with_inputs(plan, new_inputs);
    while let Some(next) = rule(&node) {
        node = next;
    }
    node
}

/// Rebuild a node with new inputs, reusing it (and its cache slot) when
/// nothing changed.
fn rebuild_with_inputs(plan: &Arc<PlanNode>, new_inputs: Vec<Arc<PlanNode>>) -> Arc<PlanNode> {
    if plan.inputs.len() == new_inputs.len()
        && plan
            .inputs
            .iter()
            .zip(new_inputs.iter())
            .all(|(a, b)| Arc::ptr_eq(a, b))
    {
        return plan.clone();
    }

    let op = match &plan.op {
        PlanOp::Source {
            frame,
            row_begin,
            row_end,
        } => PlanOp::Source {
            frame: frame.clone(),
            row_begin: *row_begin,
            row_end: *row_end,
        },
        PlanOp::Range { start, step, len } => PlanOp::Range {
            start: *start,
            step: *step,
            len: *len,
        },
        PlanOp::Constant { value, len } => PlanOp::Constant {
            value: value.clone(),
            len: *len,
        },
        PlanOp::Project { indices } => PlanOp::Project {
            indices: indices.clone(),
        },
        PlanOp::Union => PlanOp::Union,
        PlanOp::Append => PlanOp::Append,
        PlanOp::LogicalFilter => PlanOp::LogicalFilter,
        PlanOp::Transform { func, output_kind } => PlanOp::Transform {
            func: func.clone(),
            output_kind: *output_kind,
        },
        PlanOp::LambdaTransform {
            evaluator,
            output_kind,
        } => PlanOp::LambdaTransform {
            evaluator: evaluator.clone(),
            output_kind: *output_kind,
        },
        PlanOp::Slice { start, end } => PlanOp::Slice {
            start: *start,
            end: *end,
        },
    };

    PlanNode::rebuild(op, new_inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::infer_kinds;
    use std::sync::Arc;
    use xframe_storage::frame::XFrameWriter;
    use xframe_types::value::{Value, ValueKind};

    fn three_column_source() -> Arc<PlanNode> {
        let mut writer = XFrameWriter::open_anonymous(
            &["a", "b", "c"],
            &[ValueKind::Integer, ValueKind::Float, ValueKind::String],
            1,
        )
        .unwrap();
        let mut sink = writer.get_output_iterator(0).unwrap();
        for i in 0..10 {
            sink.write_row(&[
                Value::Integer(i),
                Value::Float(i as f64),
                Value::String(format!("{}", i).into()),
            ])
            .unwrap();
        }
        let finished = vec![sink.finish().unwrap()];
        PlanNode::source(writer.close(&finished).unwrap())
    }

    #[test]
    fn test_fuse_adjacent_projects() {
        let source = three_column_source();
        let p1 = PlanNode::project(source, vec![0, 2]);
        let p2 = PlanNode::project(p1, vec![1]);

        let optimized = optimize(&p2);
        match &optimized.op {
            PlanOp::Project { indices } => assert_eq!(indices, &[2]),
            _ => panic!("expected a fused project"),
        }
        assert!(matches!(optimized.inputs[0].op, PlanOp::Source { .. }));
    }

    #[test]
    fn test_identity_project_eliminated() {
        let source = three_column_source();
        let p = PlanNode::project(source, vec![0, 1, 2]);
        let optimized = optimize(&p);
        assert!(matches!(optimized.op, PlanOp::Source { .. }));
    }

    #[test]
    fn test_project_through_append() {
        let a = three_column_source();
        let b = three_column_source();
        let appended = PlanNode::append(a, b);
        let p = PlanNode::project(appended, vec![1]);

        let optimized = optimize(&p);
        assert!(matches!(optimized.op, PlanOp::Append));
        assert!(matches!(
            optimized.inputs[0].op,
            PlanOp::Project { .. }
        ));
    }

    #[test]
    fn test_project_through_union_single_side() {
        let a = three_column_source();
        let b = three_column_source();
        let union = PlanNode::union(a, b);
        // Columns 3..6 all come from the right side.
        let p = PlanNode::project(union, vec![4]);

        let optimized = optimize(&p);
        match &optimized.op {
            PlanOp::Project { indices } => assert_eq!(indices, &[1]),
            _ => panic!("expected project pushed to the right input"),
        }
        assert!(matches!(optimized.inputs[0].op, PlanOp::Source { .. }));
    }

    #[test]
    fn test_transform_fusion() {
        let source = three_column_source();
        let t1 = PlanNode::transform(
            source,
            Arc::new(|row| match &row[0] {
                Value::Integer(i) => Value::Integer(i + 1),
                _ => Value::Undefined,
            }),
            ValueKind::Integer,
        );
        let t2 = PlanNode::transform(
            t1,
            Arc::new(|row| match &row[0] {
                Value::Integer(i) => Value::Integer(i * 10),
                _ => Value::Undefined,
            }),
            ValueKind::Integer,
        );

        let optimized = optimize(&t2);
        // One fused transform directly over the source.
        assert!(matches!(optimized.op, PlanOp::Transform { .. }));
        assert!(matches!(optimized.inputs[0].op, PlanOp::Source { .. }));

        if let PlanOp::Transform { func, .. } = &optimized.op {
            assert_eq!(func(&[Value::Integer(4)]), Value::Integer(50));
        }
    }

    #[test]
    fn test_slice_of_source_narrowed() {
        let source = three_column_source();
        let sliced = PlanNode::slice(source, 2, 7);
        let optimized = optimize(&sliced);
        match &optimized.op {
            PlanOp::Source {
                row_begin, row_end, ..
            } => {
                assert_eq!((*row_begin, *row_end), (2, 7));
            }
            _ => panic!("expected a narrowed source"),
        }
    }

    #[test]
    fn test_slice_chain_folds() {
        let range = PlanNode::range(0, 1, 100);
        let s1 = PlanNode::slice(range, 10, 60);
        let s2 = PlanNode::slice(s1, 5, 20);
        let optimized = optimize(&s2);
        match &optimized.op {
            PlanOp::Range { start, step, len } => {
                assert_eq!((*start, *step, *len), (15, 1, 15));
            }
            _ => panic!("expected a narrowed range"),
        }
    }

    #[test]
    fn test_optimized_plan_keeps_schema() {
        let source = three_column_source();
        let p1 = PlanNode::project(source.clone(), vec![2, 0]);
        let appended = PlanNode::append(p1.clone(), p1);
        let p2 = PlanNode::project(appended, vec![1]);

        let before = infer_kinds(&p2).unwrap();
        let after = infer_kinds(&optimize(&p2)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_untouched_plan_reused() {
        let source = three_column_source();
        let optimized = optimize(&source);
        assert!(Arc::ptr_eq(&source, &optimized));
    }
}
