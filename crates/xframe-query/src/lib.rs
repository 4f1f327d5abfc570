//! The xframe query engine.
//!
//! User operations build a DAG of [`planner::PlanNode`]s over source
//! frames. [`optimizer::optimize`] applies first-pass semantic-preserving
//! rewrites, and [`execute`] runs the optimized plan with one worker per
//! output segment. The [`algorithms`] module holds the out-of-core
//! machinery built on top: external sort, shuffle, groupby, join and the
//! CSV row producer/sink.

pub mod algorithms;
pub mod batch;
pub mod execute;
pub mod optimizer;
pub mod planner;
