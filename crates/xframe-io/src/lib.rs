//! Filesystem plumbing for the xframe engine.
//!
//! All storage access goes through the [`vfs::VirtualFileSystem`] trait so
//! the engine never touches `std::fs` directly. The [`temp`] module owns
//! the process-wide scratch area used by materialized intermediates,
//! shuffle buckets and sort partitions.

pub mod local_fs;
pub mod temp;
pub mod vfs;
