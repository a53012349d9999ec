//! Open archives
//!
//! An [`Archive`] owns the cached inventory and descriptor of one archive
//! file. Structural edits go through it and rewrite the metadata trailer
//! before returning. One `Archive` is one writer: callers serialize access.

use crate::allocator::{AppendAllocator, BlockAllocator};
use crate::descriptor::{Descriptor, KdfParams};
use crate::encryption::{CipherAlgorithm, EncryptionMaterial};
use crate::error::{BunkrError, Result};
use crate::header::Header;
use crate::inventory::{FileEntry, Inventory};
use crate::io::{ArchiveFile, BlockSource};
use crate::random::SecureRandom;
use crate::range::FragmentedRange;
use crate::stream::{ArchiveReader, ArchiveWriter, BlockWriter, WriteOutcome};
use crate::usersec::{hash_password, PasswordProvider};
use crate::wipe::{CancelToken, WipeMode, WipeOperation};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

pub struct Archive {
    file: ArchiveFile,
    source: BlockSource,
    inventory: Inventory,
    descriptor: Descriptor,
    passwords: PasswordProvider,
    random: SecureRandom,
}

impl Archive {
    /// Create a new, empty archive at `path`.
    ///
    /// The block size must be a positive multiple of the cipher block size.
    /// For an encrypted descriptor the password is obtained before anything
    /// touches the disk.
    pub fn create<P: AsRef<Path>>(
        path: P,
        block_size: u32,
        descriptor: Descriptor,
        mut passwords: PasswordProvider,
        random: SecureRandom,
    ) -> Result<Self> {
        let path = path.as_ref();
        if block_size % CipherAlgorithm::BLOCK_SIZE as u32 != 0 {
            return Err(BunkrError::InvalidBlockSize(block_size as i64));
        }
        let header = Header::new(block_size)?;
        descriptor.validate()?;
        if descriptor.encryption_enabled() {
            passwords.hashed_password()?;
        }

        let file = ArchiveFile::create(path, &header)?;
        let source = BlockSource::open(path, block_size)?;
        let mut archive = Archive {
            file,
            source,
            inventory: Inventory::new(),
            descriptor,
            passwords,
            random,
        };
        archive.save_metadata()?;
        info!(
            "Created archive {:?} (block size {}, encryption {:?}, compression {:?})",
            path, block_size, archive.descriptor.encryption, archive.descriptor.compression
        );
        Ok(archive)
    }

    /// Open an existing archive, decrypting the inventory if needed
    pub fn open<P: AsRef<Path>>(
        path: P,
        passwords: PasswordProvider,
        random: SecureRandom,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = ArchiveFile::open(path)?;
        let source = BlockSource::open(path, file.header().block_size)?;
        let mut archive = Archive {
            file,
            source,
            inventory: Inventory::new(),
            descriptor: Descriptor::plaintext(Default::default()),
            passwords,
            random,
        };
        archive.refresh()?;
        info!(
            "Opened archive {:?} ({} blocks, {} files)",
            path,
            archive.block_count(),
            archive.inventory.files().count()
        );
        Ok(archive)
    }

    /// Drop the cached metadata and read it again from disk
    pub fn refresh(&mut self) -> Result<()> {
        self.file.reload_header()?;
        let (inventory_section, descriptor_section) = self.file.read_metadata()?;
        let descriptor = Descriptor::from_json(&descriptor_section)?;
        let block_size = self.file.header().block_size;

        let inventory = if descriptor.encryption_enabled() {
            let plain = descriptor
                .open_inventory(&inventory_section, self.passwords.hashed_password()?)?;
            Inventory::from_json(&plain, block_size)?
        } else {
            Inventory::from_json(&inventory_section, block_size)?
        };

        self.descriptor = descriptor;
        self.inventory = inventory;
        debug!("Loaded metadata for {:?}", self.file.path());
        Ok(())
    }

    /// Rewrite the inventory and descriptor trailer
    pub fn save_metadata(&mut self) -> Result<()> {
        let json = Zeroizing::new(self.inventory.to_json()?);
        let section = if self.descriptor.encryption_enabled() {
            let hashed = self.passwords.hashed_password()?;
            self.descriptor.seal_inventory(&json, hashed, &self.random)?
        } else {
            json.to_vec()
        };
        self.file
            .write_metadata(&section, &self.descriptor.to_json()?)?;
        debug!("Saved metadata ({} byte inventory section)", section.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn header(&self) -> &Header {
        self.file.header()
    }

    pub fn block_size(&self) -> u32 {
        self.file.header().block_size
    }

    pub fn block_count(&self) -> u64 {
        self.file.header().block_count()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Direct access to the cached tree. Call [`save_metadata`] afterwards.
    ///
    /// [`save_metadata`]: Archive::save_metadata
    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn random(&self) -> &SecureRandom {
        &self.random
    }

    pub fn mkdir(&mut self, path: &str, recursive: bool) -> Result<()> {
        self.inventory.mkdir(path, recursive)?;
        self.save_metadata()
    }

    /// Add an empty file, returning its id
    pub fn create_file(&mut self, path: &str) -> Result<Uuid> {
        let uuid = self.inventory.create_file(path)?.uuid();
        self.save_metadata()?;
        Ok(uuid)
    }

    /// Remove a file or folder, returning the blocks it released so the
    /// caller can wipe them
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<FragmentedRange> {
        let freed = self.inventory.remove(path, recursive)?;
        self.save_metadata()?;
        info!("Removed {} ({} blocks released)", path, freed.size());
        Ok(freed)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.inventory.rename(from, to)?;
        self.save_metadata()
    }

    /// Returns whether the tag set changed
    pub fn add_tag(&mut self, path: &str, tag: &str) -> Result<bool> {
        let changed = self.inventory.resolve_file_mut(path)?.add_tag(tag)?;
        if changed {
            self.save_metadata()?;
        }
        Ok(changed)
    }

    /// Returns whether the tag set changed
    pub fn remove_tag(&mut self, path: &str, tag: &str) -> Result<bool> {
        let changed = self.inventory.resolve_file_mut(path)?.remove_tag(tag);
        if changed {
            self.save_metadata()?;
        }
        Ok(changed)
    }

    /// Paths of the files carrying `tag`
    pub fn find_by_tag(&self, tag: &str) -> Vec<String> {
        self.inventory
            .find_by_tag(tag)
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }

    /// Read stream over the file at `path`
    pub fn open_reader(&self, path: &str) -> Result<ArchiveReader> {
        let entry = self.inventory.resolve_file(path)?;
        self.reader_for(entry)
    }

    fn reader_for(&self, entry: &FileEntry) -> Result<ArchiveReader> {
        if self.descriptor.encryption_enabled()
            && entry.encryption().is_none()
            && entry.actual_size() > 0
        {
            return Err(BunkrError::CorruptMetadata(format!(
                "'{}' has content but no encryption material",
                entry.name()
            )));
        }
        ArchiveReader::open(self.source.clone(), entry, self.descriptor.compression)
    }

    /// Write stream replacing the content of the existing file at `path`.
    ///
    /// Nothing changes in the inventory until [`FileWriter::commit`].
    pub fn open_writer(&mut self, path: &str) -> Result<FileWriter<'_>> {
        let uuid = self.inventory.resolve_file(path)?.uuid();
        let encryption = self
            .descriptor
            .encryption
            .map(|alg| EncryptionMaterial::generate(alg, &self.random));
        let blocks = self.block_writer(Box::new(AppendAllocator::new(self.block_count())))?;
        let writer = ArchiveWriter::new(blocks, encryption, self.descriptor.compression)?;
        debug!("Opened write stream for {}", path);
        Ok(FileWriter {
            archive: self,
            uuid,
            writer: Some(writer),
            committed: false,
        })
    }

    /// Replace the content of `path` with `data`, creating the file if needed
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let created = self.inventory.resolve(path).is_err();
        if created {
            self.inventory.create_file(path)?;
        }
        let written = self.open_writer(path).and_then(|mut writer| {
            writer.write_all(data)?;
            writer.commit()
        });
        if let Err(e) = written {
            if created && self.inventory.remove(path, false).is_ok() {
                if let Err(restore) = self.save_metadata() {
                    warn!("Could not restore metadata after failed write: {}", restore);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Whole content of `path`, integrity checked
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(path)?;
        let mut out = Vec::with_capacity(reader.remaining() as usize);
        reader.read_to_end(&mut out)?;
        reader.finish()?;
        Ok(out)
    }

    /// Read `path` to the end, failing on an integrity mismatch
    pub fn verify_file(&self, path: &str) -> Result<()> {
        self.open_reader(path)?.finish()
    }

    /// Re-seal the inventory under a new password with a fresh salt
    pub fn change_password(&mut self, new_password: Zeroizing<Vec<u8>>) -> Result<()> {
        let kdf = match &self.descriptor.kdf {
            Some(kdf) if self.descriptor.encryption_enabled() => kdf,
            _ => {
                return Err(BunkrError::InvalidArgument(
                    "archive is not encrypted".to_string(),
                ))
            }
        };
        let new_hash = hash_password(&new_password)?;
        drop(new_password);
        let new_kdf = KdfParams::generate(kdf.iterations, kdf.salt.len(), &self.random)?;

        let old_kdf = self.descriptor.kdf.replace(new_kdf);
        let old_hash = self.passwords.replace_hashed(Some(new_hash));
        if let Err(e) = self.save_metadata() {
            self.descriptor.kdf = old_kdf;
            self.passwords.replace_hashed(old_hash);
            return Err(e);
        }
        info!("Archive password changed");
        Ok(())
    }

    /// Overwrite `blocks` in place. Blocks still owned by a file, or past the
    /// end of the block region, are refused.
    pub fn wipe_blocks<F: FnMut(u64, u64)>(
        &self,
        blocks: &FragmentedRange,
        mode: WipeMode,
        cancel: &CancelToken,
        progress: F,
    ) -> Result<bool> {
        let outside = FragmentedRange::difference(
            blocks,
            &FragmentedRange::with_range(0, self.block_count() as i64),
        );
        if !outside.is_empty() {
            return Err(BunkrError::InvalidArgument(format!(
                "blocks {} are outside the block region ({} blocks)",
                outside,
                self.block_count()
            )));
        }
        let owned = FragmentedRange::difference(
            blocks,
            &FragmentedRange::difference(blocks, &self.inventory.occupied_blocks()),
        );
        if !owned.is_empty() {
            return Err(BunkrError::InvalidArgument(format!(
                "blocks {} still belong to files",
                owned
            )));
        }
        WipeOperation::new(self.path(), self.block_size(), blocks.clone(), mode)
            .with_random(self.random.clone())
            .with_cancel_token(cancel.clone())
            .run(progress)
    }

    pub(crate) fn block_source(&self) -> BlockSource {
        self.source.clone()
    }

    /// Block writer on its own file handle
    pub(crate) fn block_writer(&self, allocator: Box<dyn BlockAllocator>) -> Result<BlockWriter> {
        let file = ArchiveFile::open(self.path())?;
        Ok(BlockWriter::new(file, allocator, self.random.clone()))
    }

    pub(crate) fn reload_header(&mut self) -> Result<()> {
        self.file.reload_header()
    }

    /// Cut the block region to `blocks` and move the trailer down after it
    pub(crate) fn shrink_block_region(&mut self, blocks: u64) -> Result<()> {
        self.file.set_block_count(blocks)?;
        self.save_metadata()
    }

    fn apply_write(&mut self, uuid: Uuid, outcome: WriteOutcome) -> Result<()> {
        self.file.reload_header()?;
        let entry = self.inventory.find_file_mut(uuid).ok_or_else(|| {
            BunkrError::InvalidArgument(format!("file {} was removed while writing", uuid))
        })?;
        entry.set_blocks(outcome.blocks);
        entry.set_size_on_disk(outcome.size_on_disk);
        entry.set_actual_size(outcome.actual_size);
        entry.set_integrity_hash(Some(outcome.integrity_hash));
        entry.set_encryption(outcome.encryption);
        entry.touch();
        info!(
            "Wrote '{}': {} bytes in {} blocks",
            entry.name(),
            entry.actual_size(),
            entry.blocks().size()
        );
        self.save_metadata()
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.file.path())
            .field("header", self.file.header())
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Write handle on one file of an [`Archive`].
///
/// Content goes to freshly appended blocks. [`commit`] points the file
/// entry at them; dropping the handle uncommitted leaves the entry as it
/// was.
///
/// [`commit`]: FileWriter::commit
pub struct FileWriter<'a> {
    archive: &'a mut Archive,
    uuid: Uuid,
    writer: Option<ArchiveWriter>,
    committed: bool,
}

impl<'a> FileWriter<'a> {
    /// Logical bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map_or(0, ArchiveWriter::bytes_written)
    }

    /// Finish the pipeline and update the file entry
    pub fn commit(mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| BunkrError::BlockStream("writer already closed".to_string()))?;
        let outcome = writer.finish()?;
        self.archive.apply_write(self.uuid, outcome)?;
        self.committed = true;
        Ok(())
    }

    /// Alias of [`commit`](FileWriter::commit)
    pub fn finish(self) -> Result<()> {
        self.commit()
    }
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for FileWriter<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // flushes any buffered compressed bytes into blocks nobody owns
        drop(self.writer.take());
        // appended blocks may have overwritten the trailer
        let restored = self
            .archive
            .reload_header()
            .and_then(|_| self.archive.save_metadata());
        if let Err(e) = restored {
            warn!("Could not restore metadata after abandoned write: {}", e);
        }
    }
}
