//! Secure block wiping
//!
//! Overwrites freed blocks in place so removed content cannot be recovered
//! from the archive file. Cancellation is honoured between blocks only: a
//! cancelled wipe leaves a fully wiped prefix and an untouched remainder.

use crate::error::{BunkrError, Result};
use crate::io::ArchiveFile;
use crate::random::SecureRandom;
use crate::range::FragmentedRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Fill pattern for wiped blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeMode {
    #[default]
    Zeros,
    Random,
}

/// Shared flag for cooperative cancellation of long operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WipeOperation {
    path: PathBuf,
    block_size: u32,
    blocks: FragmentedRange,
    mode: WipeMode,
    random: SecureRandom,
    cancel: CancelToken,
    wiped: Arc<AtomicU64>,
}

impl WipeOperation {
    pub fn new<P: AsRef<Path>>(path: P, block_size: u32, blocks: FragmentedRange, mode: WipeMode) -> Self {
        WipeOperation {
            path: path.as_ref().to_path_buf(),
            block_size,
            blocks,
            mode,
            random: SecureRandom::system(),
            cancel: CancelToken::new(),
            wiped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_random(mut self, random: SecureRandom) -> Self {
        self.random = random;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops this operation at the next block boundary
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Live count of wiped blocks, readable from other threads
    pub fn wiped_counter(&self) -> Arc<AtomicU64> {
        self.wiped.clone()
    }

    pub fn total(&self) -> u64 {
        self.blocks.size()
    }

    /// Wipe every block in ascending order, calling `progress(wiped, total)`
    /// after each one. Returns `false` if cancelled before the end.
    pub fn run<F: FnMut(u64, u64)>(&self, mut progress: F) -> Result<bool> {
        if let Some(min) = self.blocks.min() {
            if min < 0 {
                return Err(BunkrError::InvalidArgument(format!(
                    "cannot wipe negative block index {}",
                    min
                )));
            }
        }

        let mut file = ArchiveFile::open(&self.path)?;
        // the trailer starts right after the last block
        let block_count = file.header().block_count();
        if let Some(max) = self.blocks.max() {
            if max as u64 >= block_count {
                return Err(BunkrError::InvalidArgument(format!(
                    "block {} is past the end of the block region ({} blocks)",
                    max, block_count
                )));
            }
        }
        let mut buffer = Zeroizing::new(vec![0u8; self.block_size as usize]);
        let total = self.total();
        debug!("Wiping {} blocks in {:?} ({:?})", total, self.path, self.mode);

        for index in self.blocks.iter() {
            if self.cancel.is_cancelled() {
                info!(
                    "Wipe cancelled after {} of {} blocks",
                    self.wiped.load(Ordering::SeqCst),
                    total
                );
                file.sync()?;
                return Ok(false);
            }
            if self.mode == WipeMode::Random {
                self.random.fill(&mut buffer);
            }
            file.write_block(index as u64, &buffer)?;
            let done = self.wiped.fetch_add(1, Ordering::SeqCst) + 1;
            progress(done, total);
        }

        file.sync()?;
        info!("Wiped {} blocks", total);
        Ok(true)
    }
}
