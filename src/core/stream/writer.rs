use super::{BlockWriter, DeflateWriter, EncryptingWriter, LayerWrite};
use crate::descriptor::CompressionMethod;
use crate::encryption::EncryptionMaterial;
use crate::error::Result;
use crate::range::FragmentedRange;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tracing::debug;

/// Everything a finished write changes on the file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub blocks: FragmentedRange,
    pub size_on_disk: u64,
    pub actual_size: u64,
    pub integrity_hash: Vec<u8>,
    pub encryption: Option<EncryptionMaterial>,
}

/// Top of the write pipeline: hashes logical bytes and passes them down
pub struct ArchiveWriter {
    inner: Box<dyn LayerWrite>,
    hasher: Sha256,
    written: u64,
    encryption: Option<EncryptionMaterial>,
}

impl ArchiveWriter {
    /// Stack the optional layers on top of `blocks`
    pub fn new(
        blocks: BlockWriter,
        encryption: Option<EncryptionMaterial>,
        compression: CompressionMethod,
    ) -> Result<Self> {
        let mut inner: Box<dyn LayerWrite> = Box::new(blocks);
        if let Some(material) = &encryption {
            inner = Box::new(EncryptingWriter::new(inner, material.keystream()?));
        }
        if compression.is_enabled() {
            inner = Box::new(DeflateWriter::new(inner));
        }
        Ok(ArchiveWriter {
            inner,
            hasher: Sha256::new(),
            written: 0,
            encryption,
        })
    }

    /// Logical bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush every layer and report what was written
    pub fn finish(self) -> Result<WriteOutcome> {
        let summary = self.inner.finish_layer()?;
        let integrity_hash = self.hasher.finalize().to_vec();
        debug!(
            "Write stream closed: {} bytes -> {} stored in {} blocks",
            self.written,
            summary.size_on_disk,
            summary.blocks.size()
        );
        Ok(WriteOutcome {
            blocks: summary.blocks,
            size_on_disk: summary.size_on_disk,
            actual_size: self.written,
            integrity_hash,
            encryption: self.encryption,
        })
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AppendAllocator;
    use crate::encryption::CipherAlgorithm;
    use crate::header::Header;
    use crate::io::{ArchiveFile, BlockSource};
    use crate::random::SecureRandom;
    use crate::stream::BlockReader;
    use std::io::Read;

    fn writer(
        path: &std::path::Path,
        encryption: Option<EncryptionMaterial>,
        compression: CompressionMethod,
    ) -> ArchiveWriter {
        let mut file = ArchiveFile::create(path, &Header::new(32).unwrap()).unwrap();
        file.write_metadata(b"{}", b"{}").unwrap();
        let blocks = BlockWriter::new(
            ArchiveFile::open(path).unwrap(),
            Box::new(AppendAllocator::new(0)),
            SecureRandom::system(),
        );
        ArchiveWriter::new(blocks, encryption, compression).unwrap()
    }

    fn stored(path: &std::path::Path, outcome: &WriteOutcome) -> Vec<u8> {
        let source = BlockSource::open(path, 32).unwrap();
        let mut out = Vec::new();
        BlockReader::new(source, &outcome.blocks, outcome.size_on_disk)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_plain_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bunkr");
        let mut w = writer(&path, None, CompressionMethod::None);
        w.write_all(b"some plain bytes, more than one block long").unwrap();
        assert_eq!(w.bytes_written(), 42);
        let outcome = w.finish().unwrap();

        assert_eq!(outcome.actual_size, 42);
        assert_eq!(outcome.size_on_disk, 42);
        assert_eq!(outcome.blocks.to_list(), vec![0, 1]);
        assert_eq!(
            outcome.integrity_hash,
            Sha256::digest(b"some plain bytes, more than one block long").to_vec()
        );
        assert_eq!(stored(&path, &outcome), b"some plain bytes, more than one block long");
    }

    #[test]
    fn test_encrypted_and_deflated_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layered.bunkr");
        let data = b"repetitive ".repeat(100);
        let material = EncryptionMaterial::generate(CipherAlgorithm::Aes256Ctr, &SecureRandom::system());
        let mut w = writer(&path, Some(material.clone()), CompressionMethod::Deflate);
        w.write_all(&data).unwrap();
        let outcome = w.finish().unwrap();

        assert_eq!(outcome.actual_size, data.len() as u64);
        assert!(outcome.size_on_disk < outcome.actual_size);
        assert_eq!(outcome.encryption, Some(material.clone()));

        let mut raw = stored(&path, &outcome);
        material.keystream().unwrap().apply(&mut raw);
        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(&raw[..])
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, data);
    }
}
