//! Per-file content encryption
//!
//! File content is encrypted with a block cipher run in counter mode. CTR
//! turns the cipher into a keystream, so any byte offset of the ciphertext can
//! be decrypted without touching the preceding blocks, which fits the
//! archive's block-addressed reads.
//!
//! **Design**:
//! - Closed choice of two engines: AES-256 and Twofish-256, both with 16-byte blocks
//! - Fresh key + IV for every write of a file, stored in the file's inventory entry
//! - Key/IV of the wrong length are rejected, never truncated or padded

use crate::codec::base64_bytes;
use crate::error::{BunkrError, Result};
use crate::random::SecureRandom;
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use serde::{Deserialize, Serialize};
use std::fmt;
use twofish::Twofish;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Twofish256Ctr = ctr::Ctr128BE<Twofish>;

/// Supported content ciphers (always counter mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "AES256_CTR")]
    Aes256Ctr,
    #[serde(rename = "TWOFISH256_CTR")]
    Twofish256Ctr,
}

impl CipherAlgorithm {
    pub const AES256_KEY_LEN: usize = 32;
    pub const TWOFISH256_KEY_LEN: usize = 32;
    /// Both engines use 128-bit blocks
    pub const BLOCK_SIZE: usize = 16;

    /// Required key length in bytes
    pub const fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::Aes256Ctr => Self::AES256_KEY_LEN,
            CipherAlgorithm::Twofish256Ctr => Self::TWOFISH256_KEY_LEN,
        }
    }

    /// Cipher block size in bytes; the CTR IV is one block
    pub const fn block_size(self) -> usize {
        Self::BLOCK_SIZE
    }

    pub const fn iv_len(self) -> usize {
        self.block_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Ctr => "AES256_CTR",
            CipherAlgorithm::Twofish256Ctr => "TWOFISH256_CTR",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A ready-to-use CTR keystream. The expanded key schedule is wiped on drop.
pub enum Keystream {
    Aes(Box<Aes256Ctr>),
    Twofish(Box<Twofish256Ctr>),
}

impl Keystream {
    /// XOR the keystream into `buf`, advancing the stream position.
    ///
    /// Encryption and decryption are the same operation.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes(c) => c.apply_keystream(buf),
            Keystream::Twofish(c) => c.apply_keystream(buf),
        }
    }

    /// Jump to an absolute byte offset of the stream
    pub fn seek(&mut self, offset: u64) {
        match self {
            Keystream::Aes(c) => c.seek(offset),
            Keystream::Twofish(c) => c.seek(offset),
        }
    }
}

impl fmt::Debug for Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Keystream::Aes(_) => "Aes256Ctr",
            Keystream::Twofish(_) => "Twofish256Ctr",
        };
        f.debug_tuple("Keystream").field(&name).finish()
    }
}

/// Build a keystream for `alg` from raw key and IV bytes.
///
/// Fails if either length differs from what the algorithm requires.
pub fn build_keystream(alg: CipherAlgorithm, key: &[u8], iv: &[u8]) -> Result<Keystream> {
    if key.len() != alg.key_len() {
        return Err(BunkrError::InvalidKeyLength {
            expected: alg.key_len(),
            actual: key.len(),
        });
    }
    if iv.len() != alg.iv_len() {
        return Err(BunkrError::InvalidIvLength {
            expected: alg.iv_len(),
            actual: iv.len(),
        });
    }

    let stream = match alg {
        CipherAlgorithm::Aes256Ctr => Keystream::Aes(Box::new(
            Aes256Ctr::new_from_slices(key, iv)
                .map_err(|e| BunkrError::Crypto(format!("AES-CTR init failed: {}", e)))?,
        )),
        CipherAlgorithm::Twofish256Ctr => Keystream::Twofish(Box::new(
            Twofish256Ctr::new_from_slices(key, iv)
                .map_err(|e| BunkrError::Crypto(format!("Twofish-CTR init failed: {}", e)))?,
        )),
    };
    Ok(stream)
}

/// Key material for one written version of a file
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionMaterial {
    #[zeroize(skip)]
    algorithm: CipherAlgorithm,
    #[serde(with = "base64_bytes")]
    key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    iv: Vec<u8>,
}

impl EncryptionMaterial {
    /// Wrap existing key and IV bytes, validating their lengths
    pub fn new(algorithm: CipherAlgorithm, key: Vec<u8>, iv: Vec<u8>) -> Result<Self> {
        let material = EncryptionMaterial { algorithm, key, iv };
        material.validate()?;
        Ok(material)
    }

    /// Fresh random key and IV sized for `algorithm`
    pub fn generate(algorithm: CipherAlgorithm, random: &SecureRandom) -> Self {
        EncryptionMaterial {
            algorithm,
            key: random.bytes(algorithm.key_len()),
            iv: random.bytes(algorithm.iv_len()),
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Keystream positioned at the start of the file's stored bytes
    pub fn keystream(&self) -> Result<Keystream> {
        build_keystream(self.algorithm, &self.key, &self.iv)
    }

    fn validate(&self) -> Result<()> {
        build_keystream(self.algorithm, &self.key, &self.iv).map(|_| ())
    }
}

impl fmt::Debug for EncryptionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionMaterial")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}
