//! Fixed 20-byte archive header
//!
//! ```text
//! offset 0   5 bytes  magic "BUNKR"
//! offset 5   3 bytes  version (0.0.0)
//! offset 8   4 bytes  block size (i32, big-endian)
//! offset 12  8 bytes  block-data region length (i64, big-endian)
//! ```

use crate::error::{BunkrError, Result};

pub const MAGIC: [u8; 5] = *b"BUNKR";
pub const VERSION: [u8; 3] = [0, 0, 0];

/// Size of the header, and the offset of block 0
pub const DATABLOCKS_START: u64 = 20;

pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

/// Archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: [u8; 3],

    /// Block size in bytes
    pub block_size: u32,

    /// Length of the block-data region in bytes, always a multiple of `block_size`
    pub block_data_length: u64,
}

impl Header {
    /// Header for a new, empty archive
    pub fn new(block_size: u32) -> Result<Self> {
        if block_size == 0 || block_size > i32::MAX as u32 {
            return Err(BunkrError::InvalidBlockSize(block_size as i64));
        }
        Ok(Header {
            version: VERSION,
            block_size,
            block_data_length: 0,
        })
    }

    pub fn to_bytes(&self) -> [u8; DATABLOCKS_START as usize] {
        let mut bytes = [0u8; DATABLOCKS_START as usize];
        bytes[0..5].copy_from_slice(&MAGIC);
        bytes[5..8].copy_from_slice(&self.version);
        bytes[8..12].copy_from_slice(&(self.block_size as i32).to_be_bytes());
        bytes[12..20].copy_from_slice(&(self.block_data_length as i64).to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATABLOCKS_START as usize {
            return Err(BunkrError::Truncated(format!(
                "header needs {} bytes, found {}",
                DATABLOCKS_START,
                bytes.len()
            )));
        }
        if bytes[0..5] != MAGIC {
            return Err(BunkrError::InvalidMagic);
        }

        let mut version = [0u8; 3];
        version.copy_from_slice(&bytes[5..8]);

        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[8..12]);
        let block_size = i32::from_be_bytes(word);

        let mut long = [0u8; 8];
        long.copy_from_slice(&bytes[12..20]);
        let block_data_length = i64::from_be_bytes(long);

        if version != VERSION {
            return Err(BunkrError::UnsupportedVersion(
                version[0], version[1], version[2],
            ));
        }
        if block_size <= 0 {
            return Err(BunkrError::InvalidBlockSize(block_size as i64));
        }
        if block_data_length < 0 || block_data_length % block_size as i64 != 0 {
            return Err(BunkrError::MisalignedBlockData {
                length: block_data_length,
                block_size: block_size as u32,
            });
        }

        Ok(Header {
            version,
            block_size: block_size as u32,
            block_data_length: block_data_length as u64,
        })
    }

    /// Number of blocks in the data region
    pub fn block_count(&self) -> u64 {
        self.block_data_length / self.block_size as u64
    }

    /// Absolute file offset of block `index`
    pub fn block_offset(&self, index: u64) -> u64 {
        DATABLOCKS_START + index * self.block_size as u64
    }

    /// Absolute file offset of the metadata trailer
    pub fn metadata_offset(&self) -> u64 {
        DATABLOCKS_START + self.block_data_length
    }

    /// Grow or shrink the data region to exactly `blocks` blocks
    pub fn set_block_count(&mut self, blocks: u64) {
        self.block_data_length = blocks * self.block_size as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = Header::new(1024).unwrap();
        header.set_block_count(3);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..5], b"BUNKR");
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0, 0, 4, 0]);
        assert_eq!(&bytes[12..20], &[0, 0, 0, 0, 0, 0, 12, 0]);

        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.block_count(), 3);
        assert_eq!(parsed.block_offset(2), 20 + 2048);
        assert_eq!(parsed.metadata_offset(), 20 + 3072);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = Header::new(512).unwrap().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(BunkrError::InvalidMagic)
        ));
    }

    #[test]
    fn test_misaligned_length() {
        let mut bytes = Header::new(512).unwrap().to_bytes();
        bytes[12..20].copy_from_slice(&700i64.to_be_bytes());
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(BunkrError::MisalignedBlockData {
                length: 700,
                block_size: 512
            })
        ));
    }

    #[test]
    fn test_truncated_and_bad_block_size() {
        assert!(matches!(
            Header::from_bytes(b"BUNKR\0\0\0"),
            Err(BunkrError::Truncated(_))
        ));

        let mut bytes = Header::new(512).unwrap().to_bytes();
        bytes[8..12].copy_from_slice(&(-4i32).to_be_bytes());
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(BunkrError::InvalidBlockSize(-4))
        ));
        assert!(Header::new(0).is_err());
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = Header::new(512).unwrap().to_bytes();
        bytes[7] = 1;
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(BunkrError::UnsupportedVersion(0, 0, 1))
        ));
    }
}
