//! Raw stored bytes of one file, read block by block

use crate::error::{BunkrError, Result};
use crate::io::BlockSource;
use crate::range::FragmentedRange;
use std::io::{self, Read};
use zeroize::Zeroizing;

/// Presents a file's blocks as one contiguous stream of exactly
/// `size_on_disk` bytes. Blocks are consumed in ascending order.
pub struct BlockReader {
    source: BlockSource,
    blocks: FragmentedRange,
    remaining: u64,
    buffer: Zeroizing<Vec<u8>>,
    pos: usize,
    filled: usize,
}

impl BlockReader {
    /// Fails when `blocks` cannot hold `size_on_disk` bytes
    pub fn new(source: BlockSource, blocks: &FragmentedRange, size_on_disk: u64) -> Result<Self> {
        let block_size = source.block_size() as u64;
        let capacity = blocks.size() * block_size;
        if capacity < size_on_disk {
            return Err(BunkrError::BlockStream(format!(
                "{} blocks of {} bytes cannot hold {} bytes",
                blocks.size(),
                block_size,
                size_on_disk
            )));
        }
        Ok(BlockReader {
            buffer: Zeroizing::new(vec![0u8; block_size as usize]),
            source,
            blocks: blocks.clone(),
            remaining: size_on_disk,
            pos: 0,
            filled: 0,
        })
    }

    /// Stored bytes not yet delivered
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn load_next_block(&mut self) -> Result<()> {
        let index = self.blocks.pop_min().ok_or_else(|| {
            BunkrError::BlockStream("ran out of blocks before end of data".to_string())
        })?;
        let index = u64::try_from(index)
            .map_err(|_| BunkrError::BlockStream(format!("negative block index {}", index)))?;
        self.source.read_block(index, &mut self.buffer)?;
        self.pos = 0;
        self.filled = self.remaining.min(self.buffer.len() as u64) as usize;
        Ok(())
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.filled {
            self.load_next_block()?;
        }
        let n = buf.len().min(self.filled - self.pos);
        buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        self.remaining -= n as u64;
        Ok(n)
    }
}
