//! On-disk storage for the xframe engine.
//!
//! A column ([`sarray::SArray`]) is a set of segment files plus a JSON
//! index; a segment file is a sequence of LZ4-compressed typed blocks with
//! a seekable footer. A frame ([`frame::XFrame`]) is an ordered set of
//! named columns sharing one segmentation, persisted as a directory
//! archive whose frame index references the per-column indices.

pub mod block;
pub mod block_codec;
pub mod compact;
pub mod dir_archive;
pub mod frame;
pub mod index;
pub mod readers;
pub mod sarray;
pub mod segment_reader;
pub mod segment_writer;
