//! Block metadata and the segment-file footer.
//!
//! A segment file holds one column's blocks followed by a footer:
//!
//! ```text
//! [block bytes ...] [footer: block index] [footer_size: u64]
//! ```
//!
//! The footer is the block count followed by one fixed-width record per
//! block, so a reader seeks to the last 8 bytes, reads the footer size,
//! then seeks back to the footer start.

use std::io::{Read, Seek, SeekFrom, Write};

use xframe_types::error::{Result, XFrameError};
use xframe_types::serialization::{read_u64, write_u64};

/// Block flag bits.
pub const LZ4_COMPRESSION: u64 = 1;

/// Metadata for a single block in a segment file.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Byte offset of the block within the segment file.
    pub offset: u64,
    /// On-disk byte count (post-compression, pre-padding).
    pub length: u64,
    /// Decoded (pre-compression) byte count.
    pub decoded_size: u64,
    /// Number of values in the block.
    pub num_elem: u64,
    pub flags: u64,
}

impl BlockInfo {
    pub fn is_lz4_compressed(&self) -> bool {
        self.flags & LZ4_COMPRESSION != 0
    }

    fn read_from(reader: &mut (impl Read + ?Sized)) -> Result<Self> {
        Ok(BlockInfo {
            offset: read_u64(reader)?,
            length: read_u64(reader)?,
            decoded_size: read_u64(reader)?,
            num_elem: read_u64(reader)?,
            flags: read_u64(reader)?,
        })
    }

    fn write_to(&self, writer: &mut (impl Write + ?Sized)) -> Result<()> {
        write_u64(writer, self.offset)?;
        write_u64(writer, self.length)?;
        write_u64(writer, self.decoded_size)?;
        write_u64(writer, self.num_elem)?;
        write_u64(writer, self.flags)
    }
}

/// Serialize the block index; returns the footer's byte length.
pub fn write_block_index(
    writer: &mut (impl Write + ?Sized),
    blocks: &[BlockInfo],
) -> Result<u64> {
    write_u64(writer, blocks.len() as u64)?;
    for b in blocks {
        b.write_to(writer)?;
    }
    Ok(8 + blocks.len() as u64 * 40)
}

/// Read the block index from a segment file footer.
pub fn read_block_index(
    reader: &mut (impl Read + Seek),
    file_size: u64,
) -> Result<Vec<BlockInfo>> {
    if file_size < 16 {
        return Err(XFrameError::Parse(format!(
            "segment file too small ({} bytes) to hold a footer",
            file_size
        )));
    }
    reader.seek(SeekFrom::Start(file_size - 8))?;
    let footer_size = read_u64(reader)?;

    if footer_size > file_size - 8 {
        return Err(XFrameError::Parse(format!(
            "footer size {} exceeds file size {}",
            footer_size, file_size
        )));
    }
    reader.seek(SeekFrom::Start(file_size - 8 - footer_size))?;

    let num_blocks = read_u64(reader)? as usize;
    let mut blocks = Vec::with_capacity(num_blocks);
    for _ in 0..num_blocks {
        blocks.push(BlockInfo::read_from(reader)?);
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_footer_roundtrip() {
        let blocks = vec![
            BlockInfo {
                offset: 0,
                length: 100,
                decoded_size: 150,
                num_elem: 10,
                flags: LZ4_COMPRESSION,
            },
            BlockInfo {
                offset: 4096,
                length: 64,
                decoded_size: 64,
                num_elem: 8,
                flags: 0,
            },
        ];

        // Fake segment: 8192 bytes of block data, then footer + size.
        let mut file = vec![0u8; 8192];
        let footer_size = write_block_index(&mut file, &blocks).unwrap();
        write_u64(&mut file, footer_size).unwrap();

        let file_size = file.len() as u64;
        let mut cursor = Cursor::new(&file);
        let back = read_block_index(&mut cursor, file_size).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back[0].offset, 0);
        assert_eq!(back[0].num_elem, 10);
        assert!(back[0].is_lz4_compressed());
        assert_eq!(back[1].offset, 4096);
        assert!(!back[1].is_lz4_compressed());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let file = vec![0u8; 4];
        let mut cursor = Cursor::new(&file);
        assert!(read_block_index(&mut cursor, 4).is_err());
    }

    #[test]
    fn test_corrupt_footer_size_rejected() {
        let mut file = vec![0u8; 64];
        let len = file.len();
        file[len - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let mut cursor = Cursor::new(&file);
        assert!(read_block_index(&mut cursor, 64).is_err());
    }
}
