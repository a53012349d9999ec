//! Defragmentation
//!
//! [`plan`] decides which files move where; [`Archive::defragment`] carries
//! the plan out and then shrinks the block region.
//!
//! The planner is greedy. Files are taken by descending highest block and
//! each one is reassigned the lowest free blocks, until the occupied blocks
//! form one run starting at block 0. Files sharing a highest block cannot
//! occur (block sets are disjoint); equal keys would keep inventory order.

use crate::allocator::PlannedAllocator;
use crate::archive::Archive;
use crate::error::{BunkrError, Result};
use crate::inventory::{FileEntry, Inventory};
use crate::range::FragmentedRange;
use crate::stream::BlockReader;
use crate::wipe::CancelToken;
use std::io::{Read, Write};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// One file relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub uuid: Uuid,
    pub current: FragmentedRange,
    pub target: FragmentedRange,
}

/// Outcome of [`Archive::defragment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefragReport {
    pub planned: usize,
    pub moved: usize,
    pub completed: bool,
    pub blocks_before: u64,
    pub blocks_after: u64,
}

/// Files to rewrite, in the order they must be processed
pub fn plan(inventory: &Inventory) -> Vec<PlannedMove> {
    let files: Vec<&FileEntry> = inventory
        .files()
        .filter(|f| !f.blocks().is_empty())
        .collect();
    let mut occupied = inventory.occupied_blocks();
    let min = match occupied.min() {
        Some(min) => min,
        None => return Vec::new(),
    };
    if min == 0 && occupied.is_continuous() {
        return Vec::new();
    }

    let mut pool = occupied.invert();
    if min > 0 {
        pool.add(0, min);
    }

    let mut order: Vec<usize> = (0..files.len()).collect();
    order.sort_by(|&a, &b| files[b].blocks().max().cmp(&files[a].blocks().max()));

    let mut moves = Vec::new();
    for i in order {
        if occupied.is_continuous() && occupied.min() == Some(0) {
            break;
        }
        let current = files[i].blocks().clone();
        occupied.subtract(&current);
        pool.union(&current);

        let mut target = FragmentedRange::new();
        for _ in 0..current.size() {
            if let Some(block) = pool.pop_min() {
                target.add_one(block);
                occupied.add_one(block);
            }
        }
        moves.push(PlannedMove {
            uuid: files[i].uuid(),
            current,
            target,
        });
    }
    moves
}

impl Archive {
    /// Relocate files so the occupied blocks start at 0 with no gaps, then
    /// cut the block region down to what is used.
    ///
    /// Metadata is saved after every move. Cancellation is checked between
    /// files; a cancelled run leaves every file readable and the region
    /// unshrunk.
    pub fn defragment<F: FnMut(usize, usize)>(
        &mut self,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<DefragReport> {
        let moves = plan(self.inventory());
        let blocks_before = self.block_count();
        info!("Defragmenting: {} files to move", moves.len());

        let mut moved = 0;
        for planned in &moves {
            if cancel.is_cancelled() {
                info!("Defragmentation cancelled after {} moves", moved);
                return Ok(DefragReport {
                    planned: moves.len(),
                    moved,
                    completed: false,
                    blocks_before,
                    blocks_after: self.block_count(),
                });
            }
            self.relocate(planned)?;
            moved += 1;
            progress(moved, moves.len());
        }

        let used = self
            .inventory()
            .occupied_blocks()
            .max()
            .map_or(0, |max| max as u64 + 1);
        if used < self.block_count() {
            self.shrink_block_region(used)?;
        }
        info!(
            "Defragmentation finished: {} moves, {} -> {} blocks",
            moved,
            blocks_before,
            self.block_count()
        );
        Ok(DefragReport {
            planned: moves.len(),
            moved,
            completed: true,
            blocks_before,
            blocks_after: self.block_count(),
        })
    }

    fn relocate(&mut self, planned: &PlannedMove) -> Result<()> {
        let entry = self.inventory().find_file(planned.uuid).ok_or_else(|| {
            BunkrError::InvalidArgument(format!("planned file {} is gone", planned.uuid))
        })?;
        if entry.blocks() != &planned.current {
            return Err(BunkrError::InvalidArgument(format!(
                "blocks of '{}' changed since planning",
                entry.name()
            )));
        }

        // The whole stored file is held in memory first since the target
        // blocks may overlap the current ones.
        let mut stored = Zeroizing::new(Vec::with_capacity(entry.size_on_disk() as usize));
        BlockReader::new(self.block_source(), entry.blocks(), entry.size_on_disk())?
            .read_to_end(&mut stored)?;

        let mut writer = self.block_writer(Box::new(PlannedAllocator::new(planned.target.clone())))?;
        writer.write_all(&stored)?;
        let summary = writer.finish_blocks()?;
        self.reload_header()?;

        let entry = self.inventory_mut().find_file_mut(planned.uuid).ok_or_else(|| {
            BunkrError::InvalidArgument(format!("planned file {} is gone", planned.uuid))
        })?;
        debug!(
            "Moved '{}' from {} to {}",
            entry.name(),
            planned.current,
            summary.blocks
        );
        entry.set_blocks(summary.blocks);
        self.save_metadata()
    }
}
