//! Writes one column's blocks to a segment file.
//!
//! Each block is optionally LZ4-compressed and padded to 4K alignment.
//! The footer stores block metadata for seeking during reads.

use std::io::Write;

use xframe_types::error::Result;
use xframe_types::serialization::write_u64;
use xframe_types::value::Value;

use crate::block::{write_block_index, BlockInfo, LZ4_COMPRESSION};
use crate::block_codec::encode_block;

/// LZ4 compression is skipped if compressed size >= 90% of original.
const COMPRESSION_DISABLE_THRESHOLD: f64 = 0.9;

/// 4K alignment for blocks.
const BLOCK_ALIGNMENT: u64 = 4096;

/// Writer for a single segment file of a single column.
pub struct SegmentWriter<W: Write> {
    writer: W,
    block_index: Vec<BlockInfo>,
    bytes_written: u64,
}

impl<W: Write> SegmentWriter<W> {
    pub fn new(writer: W) -> Self {
        SegmentWriter {
            writer,
            block_index: Vec::new(),
            bytes_written: 0,
        }
    }

    /// Encode and write a block of values.
    ///
    /// Returns the on-disk (post-compression, pre-padding) byte count,
    /// which callers use for online block-size estimation.
    pub fn write_block(&mut self, values: &[Value]) -> Result<u64> {
        let encoded = encode_block(values)?;
        let decoded_size = encoded.len() as u64;

        let compressed = lz4_flex::compress(&encoded);
        let use_compression =
            (compressed.len() as f64) < COMPRESSION_DISABLE_THRESHOLD * (decoded_size as f64);
        let (data, flags, on_disk_len) = if use_compression {
            let len = compressed.len() as u64;
            (compressed, LZ4_COMPRESSION, len)
        } else {
            (encoded, 0, decoded_size)
        };

        self.append_block(
            &data,
            BlockInfo {
                offset: 0, // filled by append_block
                length: on_disk_len,
                decoded_size,
                num_elem: values.len() as u64,
                flags,
            },
        )?;
        Ok(on_disk_len)
    }

    /// Write an already-encoded block verbatim, preserving its metadata.
    /// Fast compaction uses this to splice segments without decoding.
    pub fn write_raw_block(&mut self, info: &BlockInfo, data: &[u8]) -> Result<()> {
        self.append_block(
            data,
            BlockInfo {
                offset: 0,
                length: info.length,
                decoded_size: info.decoded_size,
                num_elem: info.num_elem,
                flags: info.flags,
            },
        )
    }

    fn append_block(&mut self, data: &[u8], mut info: BlockInfo) -> Result<()> {
        info.offset = self.bytes_written;
        self.writer.write_all(data)?;
        self.bytes_written += data.len() as u64;

        let padded = self.bytes_written.div_ceil(BLOCK_ALIGNMENT) * BLOCK_ALIGNMENT;
        let padding = padded - self.bytes_written;
        if padding > 0 {
            let zeros = vec![0u8; padding as usize];
            self.writer.write_all(&zeros)?;
            self.bytes_written = padded;
        }

        self.block_index.push(info);
        Ok(())
    }

    /// Number of blocks written so far.
    pub fn num_blocks(&self) -> usize {
        self.block_index.len()
    }

    /// Finalize the segment: write the footer and return the element count.
    pub fn finish(mut self) -> Result<u64> {
        let footer_size = write_block_index(&mut self.writer, &self.block_index)?;
        write_u64(&mut self.writer, footer_size)?;
        self.writer.flush()?;
        Ok(self.block_index.iter().map(|b| b.num_elem).sum())
    }
}
