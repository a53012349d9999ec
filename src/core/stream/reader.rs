use super::{BlockReader, DecryptingReader};
use crate::descriptor::CompressionMethod;
use crate::error::{BunkrError, Result};
use crate::inventory::FileEntry;
use crate::io::BlockSource;
use flate2::read::ZlibDecoder;
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use tracing::{debug, warn};

const SKIP_CHUNK: usize = 8192;

/// Top of the read pipeline.
///
/// Yields exactly the file's logical size. When hash checking is on (the
/// default), the digest of everything read is compared with the stored
/// integrity hash at the read that reaches the end, or on [`finish`].
/// Dropping a partly read stream checks nothing.
///
/// [`finish`]: ArchiveReader::finish
pub struct ArchiveReader {
    inner: Box<dyn Read + Send>,
    name: String,
    remaining: u64,
    consumed: u64,
    hasher: Option<Sha256>,
    expected: Option<Vec<u8>>,
    verified: bool,
}

impl ArchiveReader {
    /// Build the pipeline for `entry`
    pub fn open(source: BlockSource, entry: &FileEntry, compression: CompressionMethod) -> Result<Self> {
        let expected = entry.integrity_hash().map(<[u8]>::to_vec);
        if entry.actual_size() == 0 {
            return Ok(Self::with_inner(Box::new(io::empty()), entry.name(), 0, expected));
        }

        let blocks = BlockReader::new(source, entry.blocks(), entry.size_on_disk())?;
        let mut inner: Box<dyn Read + Send> = Box::new(blocks);
        if let Some(material) = entry.encryption() {
            inner = Box::new(DecryptingReader::new(inner, material.keystream()?));
        }
        if compression.is_enabled() {
            inner = Box::new(ZlibDecoder::new(inner));
        }
        debug!(
            "Opened read stream for '{}' ({} bytes, {} blocks)",
            entry.name(),
            entry.actual_size(),
            entry.blocks().size()
        );
        Ok(Self::with_inner(inner, entry.name(), entry.actual_size(), expected))
    }

    pub(crate) fn with_inner(
        inner: Box<dyn Read + Send>,
        name: &str,
        actual_size: u64,
        expected: Option<Vec<u8>>,
    ) -> Self {
        ArchiveReader {
            inner,
            name: name.to_string(),
            remaining: actual_size,
            consumed: 0,
            hasher: Some(Sha256::new()),
            expected,
            verified: false,
        }
    }

    /// Turn integrity checking on or off. It can only be turned on before
    /// the first byte is read.
    pub fn set_check_hash(&mut self, check: bool) -> Result<()> {
        match (check, self.hasher.is_some()) {
            (true, false) if self.consumed > 0 => Err(BunkrError::InvalidArgument(
                "hash checking must be enabled before reading".to_string(),
            )),
            (true, false) => {
                self.hasher = Some(Sha256::new());
                Ok(())
            }
            (false, _) => {
                self.hasher = None;
                Ok(())
            }
            (true, true) => Ok(()),
        }
    }

    pub fn check_hash(&self) -> bool {
        self.hasher.is_some()
    }

    /// Logical bytes left
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read and discard up to `n` bytes. Returns how many were skipped, or
    /// -1 if the stream was already exhausted.
    pub fn skip(&mut self, n: u64) -> Result<i64> {
        if self.remaining == 0 {
            return Ok(-1);
        }
        let mut scratch = vec![0u8; SKIP_CHUNK];
        let mut skipped = 0u64;
        while skipped < n && self.remaining > 0 {
            let want = (n - skipped).min(SKIP_CHUNK as u64) as usize;
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            skipped += got as u64;
        }
        Ok(skipped as i64)
    }

    /// Consume whatever is left and check the integrity hash
    pub fn finish(mut self) -> Result<()> {
        let mut scratch = vec![0u8; SKIP_CHUNK];
        while self.read(&mut scratch)? > 0 {}
        self.verify()
    }

    fn verify(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        if let (Some(hasher), Some(expected)) = (&self.hasher, &self.expected) {
            let actual = hasher.clone().finalize();
            if actual.as_slice() != expected.as_slice() {
                warn!("Integrity hash mismatch for '{}'", self.name);
                return Err(BunkrError::IntegrityHash(self.name.clone()));
            }
        }
        self.verified = true;
        Ok(())
    }
}

impl Read for ArchiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            self.verify()?;
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(BunkrError::BlockStream(format!(
                "'{}' ended {} bytes early",
                self.name, self.remaining
            ))
            .into());
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.remaining -= n as u64;
        self.consumed += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_over(data: &[u8], expected: Option<Vec<u8>>) -> ArchiveReader {
        ArchiveReader::with_inner(
            Box::new(io::Cursor::new(data.to_vec())),
            "t",
            data.len() as u64,
            expected,
        )
    }

    #[test]
    fn test_error_only_at_exhaustion() {
        let mut reader = reader_over(b"hello world", Some(vec![0u8; 32]));
        let mut buf = [0u8; 11];
        assert_eq!(reader.read(&mut buf).unwrap(), 11);
        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(
            BunkrError::from(err),
            BunkrError::IntegrityHash(_)
        ));
    }

    #[test]
    fn test_matching_hash_and_skip() {
        let data = b"0123456789".repeat(2000);
        let hash = Sha256::digest(&data).to_vec();
        let mut reader = reader_over(&data, Some(hash));
        assert_eq!(reader.skip(15_000).unwrap(), 15_000);
        assert_eq!(reader.skip(10_000).unwrap(), 5_000);
        assert_eq!(reader.skip(1).unwrap(), -1);
        assert_eq!(reader.read(&mut [0u8; 4]).unwrap(), 0);
    }

    #[test]
    fn test_early_drop_and_disabled_check() {
        let mut reader = reader_over(b"abcdef", Some(vec![1u8; 32]));
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        drop(reader);

        let mut reader = reader_over(b"abcdef", Some(vec![1u8; 32]));
        reader.set_check_hash(false).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
        assert!(reader.set_check_hash(true).is_err());
    }

    #[test]
    fn test_finish_drains_and_checks() {
        let mut reader = reader_over(b"abcdef", Some(vec![1u8; 32]));
        reader.read_exact(&mut [0u8; 2]).unwrap();
        assert!(matches!(reader.finish(), Err(BunkrError::IntegrityHash(_))));

        let reader = reader_over(b"abcdef", None);
        reader.finish().unwrap();
    }

    #[test]
    fn test_short_inner_stream() {
        let mut reader = ArchiveReader::with_inner(Box::new(io::Cursor::new(vec![1u8; 3])), "t", 5, None);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
