//! Block allocation for block writers
//!
//! New file content is always appended past the end of the block region, so
//! a write never lands on blocks another file still owns. Defragmentation
//! instead hands out a precomputed set of target blocks.

use crate::error::{BunkrError, Result};
use crate::range::FragmentedRange;

/// Hands out block indices one at a time
pub trait BlockAllocator: Send {
    /// Next block to write
    fn allocate(&mut self) -> Result<u64>;

    /// Everything handed out so far
    fn allocated(&self) -> &FragmentedRange;
}

/// Allocates fresh blocks after the current end of the block region
#[derive(Debug, Clone)]
pub struct AppendAllocator {
    next: u64,
    allocated: FragmentedRange,
}

impl AppendAllocator {
    /// Start allocating at `block_count`, the first index past the region
    pub fn new(block_count: u64) -> Self {
        AppendAllocator {
            next: block_count,
            allocated: FragmentedRange::new(),
        }
    }
}

impl BlockAllocator for AppendAllocator {
    fn allocate(&mut self) -> Result<u64> {
        let index = self.next;
        let signed = i64::try_from(index)
            .map_err(|_| BunkrError::BlockStream("block index overflow".to_string()))?;
        self.allocated.add_one(signed);
        self.next += 1;
        Ok(index)
    }

    fn allocated(&self) -> &FragmentedRange {
        &self.allocated
    }
}

/// Allocates from a fixed set of blocks, lowest first
#[derive(Debug, Clone)]
pub struct PlannedAllocator {
    pending: FragmentedRange,
    allocated: FragmentedRange,
}

impl PlannedAllocator {
    pub fn new(targets: FragmentedRange) -> Self {
        PlannedAllocator {
            pending: targets,
            allocated: FragmentedRange::new(),
        }
    }

    /// Blocks not handed out yet
    pub fn remaining(&self) -> &FragmentedRange {
        &self.pending
    }
}

impl BlockAllocator for PlannedAllocator {
    fn allocate(&mut self) -> Result<u64> {
        let index = self.pending.pop_min().ok_or_else(|| {
            BunkrError::BlockStream("planned block allocation exhausted".to_string())
        })?;
        let unsigned = u64::try_from(index).map_err(|_| {
            BunkrError::BlockStream(format!("planned block {} is negative", index))
        })?;
        self.allocated.add_one(index);
        Ok(unsigned)
    }

    fn allocated(&self) -> &FragmentedRange {
        &self.allocated
    }
}
