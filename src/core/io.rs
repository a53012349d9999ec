//! Disk I/O for archive files

use crate::error::{BunkrError, Result};
use crate::header::{Header, DATABLOCKS_START};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Length prefix of each metadata section
const SECTION_PREFIX: usize = 4;

/// Read-write handle on an archive file
#[derive(Debug)]
pub struct ArchiveFile {
    file: File,
    path: PathBuf,
    header: Header,
}

impl ArchiveFile {
    /// Create a new archive file with an empty block region.
    ///
    /// Fails if `path` already exists. Metadata must be written before the
    /// archive can be opened.
    pub fn create<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(ArchiveFile {
            file,
            path: path.as_ref().to_path_buf(),
            header: *header,
        })
    }

    /// Open an existing archive and validate its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut archive = ArchiveFile {
            file,
            path: path.as_ref().to_path_buf(),
            header: Header::new(crate::header::DEFAULT_BLOCK_SIZE)?,
        };
        archive.reload_header()?;
        Ok(archive)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the header from disk, e.g. after another handle grew the region
    pub fn reload_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = [0u8; DATABLOCKS_START as usize];
        read_exact_or_truncated(&mut self.file, &mut buffer, "header")?;
        let header = Header::from_bytes(&buffer)?;

        let file_len = self.file.metadata()?.len();
        if file_len < header.metadata_offset() {
            return Err(BunkrError::Truncated(format!(
                "block region ends at {} but file is {} bytes",
                header.metadata_offset(),
                file_len
            )));
        }

        self.header = header;
        Ok(())
    }

    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;
        self.header = *header;
        Ok(())
    }

    /// Resize the block region to `blocks` blocks and persist the header
    pub fn set_block_count(&mut self, blocks: u64) -> Result<()> {
        let mut header = self.header;
        header.set_block_count(blocks);
        self.write_header(&header)
    }

    /// Read one whole block
    pub fn read_block(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        check_block_buffer(&self.header, buf.len())?;
        self.file
            .seek(SeekFrom::Start(self.header.block_offset(index)))?;
        read_exact_or_truncated(&mut self.file, buf, "block")
    }

    /// Write one whole block. Blocks past the region end overwrite the
    /// metadata trailer, which must be saved again afterwards.
    pub fn write_block(&mut self, index: u64, data: &[u8]) -> Result<()> {
        check_block_buffer(&self.header, data.len())?;
        self.file
            .seek(SeekFrom::Start(self.header.block_offset(index)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Read the inventory and descriptor sections
    pub fn read_metadata(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let file_len = self.file.metadata()?.len();
        self.file
            .seek(SeekFrom::Start(self.header.metadata_offset()))?;
        let inventory = self.read_section(file_len, "inventory")?;
        let descriptor = self.read_section(file_len, "descriptor")?;
        Ok((inventory, descriptor))
    }

    /// Rewrite the trailing metadata and cut the file just after it.
    ///
    /// The header and the block region are left untouched.
    pub fn write_metadata(&mut self, inventory: &[u8], descriptor: &[u8]) -> Result<()> {
        let offset = self.header.metadata_offset();
        self.file.seek(SeekFrom::Start(offset))?;
        for section in [inventory, descriptor] {
            let len = i32::try_from(section.len()).map_err(|_| {
                BunkrError::InvalidArgument(format!(
                    "metadata section of {} bytes is too large",
                    section.len()
                ))
            })?;
            self.file.write_all(&len.to_be_bytes())?;
            self.file.write_all(section)?;
        }
        let end = offset + (2 * SECTION_PREFIX + inventory.len() + descriptor.len()) as u64;
        self.file.set_len(end)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn read_section(&mut self, file_len: u64, what: &str) -> Result<Vec<u8>> {
        let mut prefix = [0u8; SECTION_PREFIX];
        read_exact_or_truncated(&mut self.file, &mut prefix, what)?;
        let len = i32::from_be_bytes(prefix);
        let pos = self.file.stream_position()?;
        if len < 0 || pos + len as u64 > file_len {
            return Err(BunkrError::Truncated(format!(
                "{} section declares {} bytes at offset {} in a {} byte file",
                what, len, pos, file_len
            )));
        }
        let mut section = vec![0u8; len as usize];
        read_exact_or_truncated(&mut self.file, &mut section, what)?;
        Ok(section)
    }
}

/// Read-only block access shared by any number of read streams.
///
/// Every read locks the handle, seeks, then reads one block, so a clone
/// can move to another thread.
#[derive(Debug, Clone)]
pub struct BlockSource {
    file: Arc<Mutex<File>>,
    block_size: u32,
}

impl BlockSource {
    pub fn open<P: AsRef<Path>>(path: P, block_size: u32) -> Result<Self> {
        let file = File::open(path)?;
        Ok(BlockSource {
            file: Arc::new(Mutex::new(file)),
            block_size,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn read_block(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.block_size as usize {
            return Err(BunkrError::InvalidArgument(format!(
                "block buffer must be {} bytes, got {}",
                self.block_size,
                buf.len()
            )));
        }
        let offset = DATABLOCKS_START + index * self.block_size as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        read_exact_or_truncated(&mut *file, buf, "block")
    }
}

fn check_block_buffer(header: &Header, len: usize) -> Result<()> {
    if len != header.block_size as usize {
        return Err(BunkrError::InvalidArgument(format!(
            "block buffer must be {} bytes, got {}",
            header.block_size, len
        )));
    }
    Ok(())
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            BunkrError::Truncated(format!("unexpected end of file reading {}", what))
        }
        _ => BunkrError::from(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.bunkr");
        (dir, path)
    }

    #[test]
    fn test_create_and_reopen() {
        let (_dir, path) = scratch();
        let header = Header::new(64).unwrap();
        let mut file = ArchiveFile::create(&path, &header).unwrap();
        file.write_metadata(b"{}", b"{\"d\":1}").unwrap();
        drop(file);

        let mut reopened = ArchiveFile::open(&path).unwrap();
        assert_eq!(reopened.header().block_size, 64);
        assert_eq!(reopened.header().block_count(), 0);
        let (inv, desc) = reopened.read_metadata().unwrap();
        assert_eq!(inv, b"{}");
        assert_eq!(desc, b"{\"d\":1}");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 20 + 4 + 2 + 4 + 7);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let (_dir, path) = scratch();
        std::fs::write(&path, b"occupied").unwrap();
        assert!(ArchiveFile::create(&path, &Header::new(64).unwrap()).is_err());
    }

    #[test]
    fn test_blocks_and_trailer() {
        let (_dir, path) = scratch();
        let mut file = ArchiveFile::create(&path, &Header::new(16).unwrap()).unwrap();
        file.write_block(0, &[1u8; 16]).unwrap();
        file.write_block(1, &[2u8; 16]).unwrap();
        file.set_block_count(2).unwrap();
        file.write_metadata(b"[]", b"{}").unwrap();

        let mut buf = [0u8; 16];
        file.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 16]);
        assert!(file.write_block(0, &[0u8; 15]).is_err());

        // shrinking trailer truncates the file
        file.write_metadata(b"", b"").unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 20 + 32 + 8);

        let source = BlockSource::open(&path, 16).unwrap();
        let clone = source.clone();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            clone.read_block(0, &mut buf).unwrap();
            buf
        });
        assert_eq!(handle.join().unwrap(), [1u8; 16]);
        source.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 16]);
    }

    #[test]
    fn test_truncated_trailer() {
        let (_dir, path) = scratch();
        let mut file = ArchiveFile::create(&path, &Header::new(16).unwrap()).unwrap();
        file.write_metadata(b"{\"a\":1}", b"{}").unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        drop(file);

        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 3).unwrap();
        drop(f);

        let mut reopened = ArchiveFile::open(&path).unwrap();
        assert!(matches!(
            reopened.read_metadata(),
            Err(BunkrError::Truncated(_))
        ));
    }

    #[test]
    fn test_region_longer_than_file() {
        let (_dir, path) = scratch();
        let mut header = Header::new(16).unwrap();
        header.set_block_count(4);
        std::fs::write(&path, header.to_bytes()).unwrap();
        assert!(matches!(
            ArchiveFile::open(&path),
            Err(BunkrError::Truncated(_))
        ));
    }
}
