//! Groupby aggregation.
//!
//! Aggregators are opaque collaborators behind the [`AggregatorFactory`] /
//! [`Aggregator`] contract: `init` a state per group, `add_row` input
//! rows, `combine` partial states, `finalize` into a value. The driver
//! hash-partitions rows by key through the shuffle primitive, aggregates
//! each bucket with a hash map, and concatenates bucket outputs.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use xframe_storage::frame::{XFrame, XFrameWriter};
use xframe_storage::readers::RowIter;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::{compare_values, Value, ValueKind};

use crate::algorithms::shuffle::shuffle;

/// Running state of one aggregation over one group.
pub trait Aggregator: Send {
    /// Fold one row (already projected to the aggregation's columns).
    fn add_row(&mut self, row: &[Value]);

    /// Merge a sibling state produced by the same factory.
    fn combine(&mut self, other: Box<dyn Aggregator>);

    /// Produce the final value.
    fn finalize(self: Box<Self>) -> Value;

    /// Downcast support for `combine`.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Creates aggregation states and declares their output type.
pub trait AggregatorFactory: Send + Sync {
    fn init(&self) -> Box<dyn Aggregator>;
    fn output_kind(&self, input_kinds: &[ValueKind]) -> ValueKind;
}

/// One aggregation request: which columns feed it, what to call the
/// output, and the operator itself.
pub struct AggregationSpec {
    pub input_columns: Vec<usize>,
    pub output_name: String,
    pub factory: Arc<dyn AggregatorFactory>,
}

impl AggregationSpec {
    pub fn new(
        input_columns: Vec<usize>,
        output_name: &str,
        factory: Arc<dyn AggregatorFactory>,
    ) -> Self {
        AggregationSpec {
            input_columns,
            output_name: output_name.to_string(),
            factory,
        }
    }
}

/// Group `frame` by the key columns and apply each aggregation. Output
/// columns are the keys (original names) followed by the aggregation
/// outputs. Group order is unspecified.
pub fn groupby_aggregate(
    frame: &Arc<XFrame>,
    key_indices: &[usize],
    specs: &[AggregationSpec],
) -> Result<Arc<XFrame>> {
    if key_indices.is_empty() {
        return Err(XFrameError::SchemaMismatch(
            "groupby needs at least one key column".to_string(),
        ));
    }
    let kinds = frame.column_types();
    for &k in key_indices {
        if k >= kinds.len() {
            return Err(XFrameError::OutOfRange(format!(
                "groupby key column {} out of range ({} columns)",
                k,
                kinds.len()
            )));
        }
    }
    for spec in specs {
        for &c in &spec.input_columns {
            if c >= kinds.len() {
                return Err(XFrameError::OutOfRange(format!(
                    "aggregation input column {} out of range ({} columns)",
                    c,
                    kinds.len()
                )));
            }
        }
    }

    // Output schema: keys first, then one column per aggregation.
    let mut out_names: Vec<String> = key_indices
        .iter()
        .map(|&k| frame.column_names()[k].clone())
        .collect();
    let mut out_kinds: Vec<ValueKind> =
        key_indices.iter().map(|&k| kinds[k]).collect();
    for spec in specs {
        if out_names.contains(&spec.output_name) {
            return Err(XFrameError::DuplicateColumn(format!(
                "column '{}' already exists",
                spec.output_name
            )));
        }
        let input_kinds: Vec<ValueKind> =
            spec.input_columns.iter().map(|&c| kinds[c]).collect();
        out_names.push(spec.output_name.clone());
        out_kinds.push(spec.factory.output_kind(&input_kinds));
    }

    let bucket_rows = xframe_config::get_shuffle_bucket_size() as u64;
    let num_buckets = (frame.num_rows().div_ceil(bucket_rows.max(1)) as usize)
        .clamp(1, rayon::current_num_threads().max(1));

    let keys: Vec<usize> = key_indices.to_vec();
    let buckets = shuffle(
        frame,
        num_buckets,
        &move |row| {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            for &k in &keys {
                row[k].hash(&mut hasher);
            }
            hasher.finish()
        },
        None,
    )?;

    let name_refs: Vec<&str> = out_names.iter().map(|s| s.as_str()).collect();
    let mut writer = XFrameWriter::open_anonymous(&name_refs, &out_kinds, num_buckets)?;
    let sinks = writer.get_output_iterators()?;

    let finished: Vec<(usize, u64)> = sinks
        .into_par_iter()
        .zip(buckets.into_par_iter())
        .map(|(mut sink, bucket)| -> Result<(usize, u64)> {
            let mut groups: HashMap<Vec<Value>, Vec<Box<dyn Aggregator>>> = HashMap::new();

            if bucket.num_rows() > 0 {
                let mut rows = RowIter::new(&bucket, 0)?;
                let mut row: Vec<Value> = Vec::new();
                let mut projected: Vec<Value> = Vec::new();
                while rows.next_row(&mut row)? {
                    let key: Vec<Value> =
                        key_indices.iter().map(|&k| row[k].clone()).collect();
                    let states = groups
                        .entry(key)
                        .or_insert_with(|| specs.iter().map(|s| s.factory.init()).collect());
                    for (state, spec) in states.iter_mut().zip(specs) {
                        projected.clear();
                        projected.extend(spec.input_columns.iter().map(|&c| row[c].clone()));
                        state.add_row(&projected);
                    }
                }
            }

            // Deterministic within-bucket output order.
            let mut entries: Vec<(Vec<Value>, Vec<Box<dyn Aggregator>>)> =
                groups.into_iter().collect();
            entries.sort_by(|a, b| {
                for (x, y) in a.0.iter().zip(b.0.iter()) {
                    let ord = compare_values(x, y);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });

            for (key, states) in entries {
                let mut out_row = key;
                for state in states {
                    out_row.push(state.finalize());
                }
                sink.write_row(&out_row)?;
            }
            sink.finish()
        })
        .collect::<Result<_>>()?;

    writer.close(&finished)
}

// ---------------------------------------------------------------------------
// Shipped aggregators
// ---------------------------------------------------------------------------

/// Count of non-NA rows (or all rows when built with `CountFactory::all`).
pub struct CountFactory {
    count_na: bool,
}

impl CountFactory {
    pub fn non_na() -> Arc<dyn AggregatorFactory> {
        Arc::new(CountFactory { count_na: false })
    }

    pub fn all() -> Arc<dyn AggregatorFactory> {
        Arc::new(CountFactory { count_na: true })
    }
}

struct CountState {
    count: i64,
    count_na: bool,
}

impl Aggregator for CountState {
    fn add_row(&mut self, row: &[Value]) {
        if self.count_na || row.first().map(|v| !v.is_na()).unwrap_or(true) {
            self.count += 1;
        }
    }

    fn combine(&mut self, other: Box<dyn Aggregator>) {
        let other = other
            .as_any()
            .downcast_ref::<CountState>()
            .expect("combine across aggregator kinds");
        self.count += other.count;
    }

    fn finalize(self: Box<Self>) -> Value {
        Value::Integer(self.count)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl AggregatorFactory for CountFactory {
    fn init(&self) -> Box<dyn Aggregator> {
        Box::new(CountState {
            count: 0,
            count_na: self.count_na,
        })
    }

    fn output_kind(&self, _input_kinds: &[ValueKind]) -> ValueKind {
        ValueKind::Integer
    }
}

/// Numeric sum; NA rows are skipped. Integer inputs stay integer.
pub struct SumFactory;

impl SumFactory {
    pub fn new() -> Arc<dyn AggregatorFactory> {
        Arc::new(SumFactory)
    }
}

struct SumState {
    int_sum: i64,
    float_sum: f64,
    saw_float: bool,
    saw_any: bool,
}

impl Aggregator for SumState {
    fn add_row(&mut self, row: &[Value]) {
        match row.first() {
            Some(Value::Integer(i)) => {
                self.int_sum += i;
                self.saw_any = true;
            }
            Some(Value::Float(f)) => {
                self.float_sum += f;
                self.saw_float = true;
                self.saw_any = true;
            }
            _ => {}
        }
    }

    fn combine(&mut self, other: Box<dyn Aggregator>) {
        let other = other
            .as_any()
            .downcast_ref::<SumState>()
            .expect("combine across aggregator kinds");
        self.int_sum += other.int_sum;
        self.float_sum += other.float_sum;
        self.saw_float |= other.saw_float;
        self.saw_any |= other.saw_any;
    }

    fn finalize(self: Box<Self>) -> Value {
        if !self.saw_any {
            Value::Undefined
        } else if self.saw_float {
            Value::Float(self.float_sum + self.int_sum as f64)
        } else {
            Value::Integer(self.int_sum)
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl AggregatorFactory for SumFactory {
    fn init(&self) -> Box<dyn Aggregator> {
        Box::new(SumState {
            int_sum: 0,
            float_sum: 0.0,
            saw_float: false,
            saw_any: false,
        })
    }

    fn output_kind(&self, input_kinds: &[ValueKind]) -> ValueKind {
        match input_kinds.first() {
            Some(ValueKind::Integer) => ValueKind::Integer,
            _ => ValueKind::Float,
        }
    }
}

/// Minimum / maximum under the engine's value ordering; NA rows skipped.
pub struct ExtremumFactory {
    take_max: bool,
}

impl ExtremumFactory {
    pub fn min() -> Arc<dyn AggregatorFactory> {
        Arc::new(ExtremumFactory { take_max: false })
    }

    pub fn max() -> Arc<dyn AggregatorFactory> {
        Arc::new(ExtremumFactory { take_max: true })
    }
}

struct ExtremumState {
    best: Option<Value>,
    take_max: bool,
}

impl Aggregator for ExtremumState {
    fn add_row(&mut self, row: &[Value]) {
        let Some(v) = row.first() else { return };
        if v.is_na() {
            return;
        }
        let better = match &self.best {
            None => true,
            Some(cur) => {
                let ord = compare_values(v, cur);
                if self.take_max {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                }
            }
        };
        if better {
            self.best = Some(v.clone());
        }
    }

    fn combine(&mut self, other: Box<dyn Aggregator>) {
        let other = other
            .as_any()
            .downcast_ref::<ExtremumState>()
            .expect("combine across aggregator kinds");
        if let Some(v) = &other.best {
            self.add_row(std::slice::from_ref(v));
        }
    }

    fn finalize(self: Box<Self>) -> Value {
        self.best.unwrap_or(Value::Undefined)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl AggregatorFactory for ExtremumFactory {
    fn init(&self) -> Box<dyn Aggregator> {
        Box::new(ExtremumState {
            best: None,
            take_max: self.take_max,
        })
    }

    fn output_kind(&self, input_kinds: &[ValueKind]) -> ValueKind {
        input_kinds.first().copied().unwrap_or(ValueKind::Undefined)
    }
}

/// Arithmetic mean of non-NA numeric rows.
pub struct MeanFactory;

impl MeanFactory {
    pub fn new() -> Arc<dyn AggregatorFactory> {
        Arc::new(MeanFactory)
    }
}

struct MeanState {
    sum: f64,
    count: u64,
}

impl Aggregator for MeanState {
    fn add_row(&mut self, row: &[Value]) {
        let x = match row.first() {
            Some(Value::Integer(i)) => *i as f64,
            Some(Value::Float(f)) => *f,
            _ => return,
        };
        self.sum += x;
        self.count += 1;
    }

    fn combine(&mut self, other: Box<dyn Aggregator>) {
        let other = other
            .as_any()
            .downcast_ref::<MeanState>()
            .expect("combine across aggregator kinds");
        self.sum += other.sum;
        self.count += other.count;
    }

    fn finalize(self: Box<Self>) -> Value {
        if self.count == 0 {
            Value::Undefined
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl AggregatorFactory for MeanFactory {
    fn init(&self) -> Box<dyn Aggregator> {
        Box::new(MeanState { sum: 0.0, count: 0 })
    }

    fn output_kind(&self, _input_kinds: &[ValueKind]) -> ValueKind {
        ValueKind::Float
    }
}
