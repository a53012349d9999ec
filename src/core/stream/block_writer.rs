//! Bottom of the write pipeline: bytes into whole blocks

use super::{BlockWriteSummary, LayerWrite};
use crate::allocator::BlockAllocator;
use crate::error::Result;
use crate::io::ArchiveFile;
use crate::random::SecureRandom;
use std::io::{self, Write};
use zeroize::Zeroizing;

/// Buffers one block at a time and writes it to the next allocated index.
///
/// The last, partial block is padded with random bytes. If any written block
/// lies past the end of the block region, the header is grown on finish.
pub struct BlockWriter {
    file: ArchiveFile,
    allocator: Box<dyn BlockAllocator>,
    random: SecureRandom,
    buffer: Zeroizing<Vec<u8>>,
    filled: usize,
    written: u64,
}

impl BlockWriter {
    pub fn new(file: ArchiveFile, allocator: Box<dyn BlockAllocator>, random: SecureRandom) -> Self {
        let block_size = file.header().block_size as usize;
        BlockWriter {
            file,
            allocator,
            random,
            buffer: Zeroizing::new(vec![0u8; block_size]),
            filled: 0,
            written: 0,
        }
    }

    fn flush_block(&mut self) -> Result<()> {
        let index = self.allocator.allocate()?;
        self.file.write_block(index, &self.buffer)?;
        self.filled = 0;
        Ok(())
    }

    /// Write the padded last block and grow the region if needed
    pub fn finish_blocks(mut self) -> Result<BlockWriteSummary> {
        if self.filled > 0 {
            let filled = self.filled;
            self.random.fill(&mut self.buffer[filled..]);
            self.flush_block()?;
        }

        let blocks = self.allocator.allocated().clone();
        if let Some(max) = blocks.max() {
            let needed = max as u64 + 1;
            if needed > self.file.header().block_count() {
                self.file.set_block_count(needed)?;
            }
        }
        self.file.sync()?;

        Ok(BlockWriteSummary {
            blocks,
            size_on_disk: self.written,
        })
    }
}

impl Write for BlockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.buffer.len() - self.filled);
        self.buffer[self.filled..self.filled + n].copy_from_slice(&buf[..n]);
        self.filled += n;
        self.written += n as u64;
        if self.filled == self.buffer.len() {
            self.flush_block()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LayerWrite for BlockWriter {
    fn finish_layer(self: Box<Self>) -> Result<BlockWriteSummary> {
        (*self).finish_blocks()
    }
}
