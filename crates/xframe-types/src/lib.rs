//! Core value types shared by every layer of the xframe engine.
//!
//! - [`value`]: the `Value` tagged scalar and its ordering/hashing rules
//! - [`ndarray`]: strided n-dimensional arrays with canonicalization
//! - [`bitset`]: dense bitset used by the block codec and permutation checks
//! - [`serialization`]: little-endian archive readers and writers
//! - [`error`]: the engine-wide error enum

pub mod bitset;
pub mod error;
pub mod ndarray;
pub mod serialization;
pub mod value;
