//! xframe: an out-of-core columnar dataframe engine.
//!
//! Columns ([`SArray`]) live on disk in segmented files; frames
//! ([`XFrame`]) are ordered sets of named columns sharing one
//! segmentation. User operations compose lazy [`PlanNode`] graphs that the
//! parallel materializer executes segment-by-segment; sort, shuffle,
//! groupby and join produce new materialized frames.
//!
//! The [`ops`] module carries the frame-level operations: `head`, `tail`,
//! `sample`, `random_split`, `shuffle_rows`, `stack`, `pack_columns`,
//! `drop_missing`, `append_frames`, `copy_range` and `sort_by_names`.

pub mod ops;

pub use xframe_query::algorithms::csv::{read_csv_frame, write_csv, CsvConfig};
pub use xframe_query::algorithms::groupby::{
    groupby_aggregate, AggregationSpec, Aggregator, AggregatorFactory, CountFactory,
    ExtremumFactory, MeanFactory, SumFactory,
};
pub use xframe_query::algorithms::join::{join, JoinType};
pub use xframe_query::algorithms::permute::permute_xframe;
pub use xframe_query::algorithms::shuffle::shuffle;
pub use xframe_query::algorithms::sort::sort;
pub use xframe_query::batch::{ColumnSlab, RowBatch};
pub use xframe_query::execute::{
    is_materialized, materialize, materialize_with_callback, materialize_with_names,
    test_equal_length,
};
pub use xframe_query::optimizer::optimize;
pub use xframe_query::planner::{infer_kinds, infer_length, LambdaEvaluator, PlanNode};
pub use xframe_storage::compact::{sarray_fast_compact, xframe_compact, xframe_fast_compact};
pub use xframe_storage::frame::{XFrame, XFrameWriter};
pub use xframe_storage::readers::{ParallelRowsIter, RowIter};
pub use xframe_storage::sarray::{SArray, SArrayWriter};
pub use xframe_types::error::{Result, XFrameError};
pub use xframe_types::ndarray::NdArray;
pub use xframe_types::value::{compare_values, DateTimeValue, Value, ValueKind};
