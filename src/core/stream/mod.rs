//! Layered read and write pipelines over a file's blocks
//!
//! ```text
//! read:   BlockReader -> [decrypt] -> [inflate] -> ArchiveReader (hash, size limit)
//! write:  ArchiveWriter (hash) -> [deflate] -> [encrypt] -> BlockWriter
//! ```
//!
//! Both directions are strictly sequential; the only way to move forward
//! without consuming is [`ArchiveReader::skip`].

mod block_reader;
mod block_writer;
mod reader;
mod writer;

pub use block_reader::BlockReader;
pub use block_writer::BlockWriter;
pub use reader::ArchiveReader;
pub use writer::{ArchiveWriter, WriteOutcome};

use crate::encryption::Keystream;
use crate::error::Result;
use crate::range::FragmentedRange;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

/// What the block layer wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockWriteSummary {
    pub blocks: FragmentedRange,
    pub size_on_disk: u64,
}

/// A write layer that can be closed, flushing everything below it
pub trait LayerWrite: Write + Send {
    fn finish_layer(self: Box<Self>) -> Result<BlockWriteSummary>;
}

/// XORs the keystream into bytes on their way up
pub struct DecryptingReader<R> {
    inner: R,
    keystream: Keystream,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R, keystream: Keystream) -> Self {
        DecryptingReader { inner, keystream }
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.keystream.apply(&mut buf[..n]);
        Ok(n)
    }
}

/// XORs the keystream into bytes on their way down
pub struct EncryptingWriter {
    inner: Box<dyn LayerWrite>,
    keystream: Keystream,
    scratch: Zeroizing<Vec<u8>>,
}

impl EncryptingWriter {
    pub fn new(inner: Box<dyn LayerWrite>, keystream: Keystream) -> Self {
        EncryptingWriter {
            inner,
            keystream,
            scratch: Zeroizing::new(Vec::new()),
        }
    }
}

impl Write for EncryptingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.keystream.apply(&mut self.scratch);
        // the keystream has advanced past all of buf, so all of it must go down
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl LayerWrite for EncryptingWriter {
    fn finish_layer(self: Box<Self>) -> Result<BlockWriteSummary> {
        let EncryptingWriter { inner, .. } = *self;
        inner.finish_layer()
    }
}

/// DEFLATE (zlib framing) on the way down
pub struct DeflateWriter {
    encoder: ZlibEncoder<Box<dyn LayerWrite>>,
}

impl DeflateWriter {
    pub fn new(inner: Box<dyn LayerWrite>) -> Self {
        DeflateWriter {
            encoder: ZlibEncoder::new(inner, Compression::default()),
        }
    }
}

impl Write for DeflateWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl LayerWrite for DeflateWriter {
    fn finish_layer(self: Box<Self>) -> Result<BlockWriteSummary> {
        let inner = self.encoder.finish()?;
        inner.finish_layer()
    }
}
