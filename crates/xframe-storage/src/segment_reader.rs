//! Reads one column's blocks from a segment file.

use std::io::SeekFrom;

use xframe_io::vfs::ReadableFile;
use xframe_types::error::{Result, XFrameError};
use xframe_types::value::Value;

use crate::block::{read_block_index, BlockInfo};
use crate::block_codec::decode_block;

/// Reader for a single segment file of a single column.
pub struct SegmentReader {
    file: Box<dyn ReadableFile>,
    block_index: Vec<BlockInfo>,
}

impl SegmentReader {
    /// Open a segment file and read its footer.
    pub fn open(mut file: Box<dyn ReadableFile>) -> Result<Self> {
        let file_size = file.size()?;
        let block_index = read_block_index(&mut file, file_size)?;
        Ok(SegmentReader { file, block_index })
    }

    pub fn num_blocks(&self) -> usize {
        self.block_index.len()
    }

    pub fn block_info(&self, block_idx: usize) -> &BlockInfo {
        &self.block_index[block_idx]
    }

    /// Total number of elements in this segment.
    pub fn num_elem(&self) -> u64 {
        self.block_index.iter().map(|b| b.num_elem).sum()
    }

    /// Read a block's raw on-disk bytes (still compressed if it was).
    pub fn read_raw_block(&mut self, block_idx: usize) -> Result<(BlockInfo, Vec<u8>)> {
        let info = self.block_index[block_idx].clone();
        self.file.seek(SeekFrom::Start(info.offset))?;
        let mut buf = vec![0u8; info.length as usize];
        self.file.read_exact(&mut buf)?;
        Ok((info, buf))
    }

    /// Read and decode a block into values.
    pub fn read_block(&mut self, block_idx: usize) -> Result<Vec<Value>> {
        let (info, raw) = self.read_raw_block(block_idx)?;
        let decompressed = if info.is_lz4_compressed() {
            lz4_flex::decompress(&raw, info.decoded_size as usize)
                .map_err(|e| XFrameError::Parse(format!("LZ4 decompression failed: {}", e)))?
        } else {
            raw
        };
        let values = decode_block(&decompressed, info.num_elem as usize)?;
        if values.len() != info.num_elem as usize {
            return Err(XFrameError::Invariant(format!(
                "block {} decoded {} values, footer says {}",
                block_idx,
                values.len(),
                info.num_elem
            )));
        }
        Ok(values)
    }

    /// Read all values in the segment.
    pub fn read_all(&mut self) -> Result<Vec<Value>> {
        let mut result = Vec::with_capacity(self.num_elem() as usize);
        for i in 0..self.num_blocks() {
            result.extend(self.read_block(i)?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_writer::SegmentWriter;
    use xframe_io::local_fs::LocalFileSystem;
    use xframe_io::vfs::VirtualFileSystem;

    #[test]
    fn test_write_then_read_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.0000");
        let path_str = path.to_str().unwrap();
        let fs = LocalFileSystem;

        let values: Vec<Value> = (0..5000)
            .map(|i| {
                if i % 11 == 0 {
                    Value::Undefined
                } else {
                    Value::Integer(i)
                }
            })
            .collect();

        {
            let mut w = SegmentWriter::new(fs.open_write(path_str).unwrap());
            for chunk in values.chunks(700) {
                w.write_block(chunk).unwrap();
            }
            assert_eq!(w.finish().unwrap(), 5000);
        }

        let mut r = SegmentReader::open(fs.open_read(path_str).unwrap()).unwrap();
        assert_eq!(r.num_elem(), 5000);
        assert_eq!(r.read_all().unwrap(), values);

        // Single block read.
        let block1 = r.read_block(1).unwrap();
        assert_eq!(block1.len(), 700);
        assert_eq!(block1, values[700..1400]);
    }

    #[test]
    fn test_raw_block_splice_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let src_path = dir.path().join("src.0000");
        let dst_path = dir.path().join("dst.0000");

        let values: Vec<Value> = (0..100).map(|i| Value::Float(i as f64)).collect();
        {
            let mut w = SegmentWriter::new(fs.open_write(src_path.to_str().unwrap()).unwrap());
            w.write_block(&values).unwrap();
            w.finish().unwrap();
        }

        // Splice raw bytes into a new segment without decoding.
        {
            let mut r = SegmentReader::open(fs.open_read(src_path.to_str().unwrap()).unwrap())
                .unwrap();
            let mut w = SegmentWriter::new(fs.open_write(dst_path.to_str().unwrap()).unwrap());
            for i in 0..r.num_blocks() {
                let (info, raw) = r.read_raw_block(i).unwrap();
                w.write_raw_block(&info, &raw).unwrap();
            }
            assert_eq!(w.finish().unwrap(), 100);
        }

        let mut r2 =
            SegmentReader::open(fs.open_read(dst_path.to_str().unwrap()).unwrap()).unwrap();
        assert_eq!(r2.read_all().unwrap(), values);
    }
}
