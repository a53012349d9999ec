//! Archive creation settings
//!
//! ```toml
//! block_size = 4096
//! encryption = "TWOFISH256_CTR"
//! compression = "NONE"
//! pbkdf2_iterations = 200000
//! salt_len = 64
//! ```
//!
//! Every key is optional. Set `encryption = "NONE"` for a plaintext archive.

use crate::descriptor::{
    CompressionMethod, DEFAULT_KDF_ITERATIONS, DEFAULT_SALT_LENGTH, MIN_KDF_ITERATIONS,
};
use crate::encryption::CipherAlgorithm;
use crate::error::{BunkrError, Result};
use crate::header::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cipher choice as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionSetting {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "AES256_CTR")]
    Aes256Ctr,
    #[serde(rename = "TWOFISH256_CTR")]
    Twofish256Ctr,
}

impl EncryptionSetting {
    pub fn algorithm(self) -> Option<CipherAlgorithm> {
        match self {
            EncryptionSetting::None => None,
            EncryptionSetting::Aes256Ctr => Some(CipherAlgorithm::Aes256Ctr),
            EncryptionSetting::Twofish256Ctr => Some(CipherAlgorithm::Twofish256Ctr),
        }
    }
}

impl From<Option<CipherAlgorithm>> for EncryptionSetting {
    fn from(alg: Option<CipherAlgorithm>) -> Self {
        match alg {
            None => EncryptionSetting::None,
            Some(CipherAlgorithm::Aes256Ctr) => EncryptionSetting::Aes256Ctr,
            Some(CipherAlgorithm::Twofish256Ctr) => EncryptionSetting::Twofish256Ctr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub block_size: u32,
    pub encryption: EncryptionSetting,
    pub compression: CompressionMethod,
    pub pbkdf2_iterations: u32,
    pub salt_len: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            encryption: EncryptionSetting::Aes256Ctr,
            compression: CompressionMethod::Deflate,
            pbkdf2_iterations: DEFAULT_KDF_ITERATIONS,
            salt_len: DEFAULT_SALT_LENGTH,
        }
    }
}

impl ArchiveConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ArchiveConfig =
            toml::from_str(text).map_err(|e| BunkrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| BunkrError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let cipher_block = CipherAlgorithm::BLOCK_SIZE as u32;
        if self.block_size == 0
            || self.block_size % cipher_block != 0
            || self.block_size > i32::MAX as u32
        {
            return Err(BunkrError::Config(format!(
                "block_size must be a positive multiple of {}, got {}",
                cipher_block, self.block_size
            )));
        }
        if self.encryption != EncryptionSetting::None {
            if self.pbkdf2_iterations < MIN_KDF_ITERATIONS {
                return Err(BunkrError::Config(format!(
                    "pbkdf2_iterations must be at least {}",
                    MIN_KDF_ITERATIONS
                )));
            }
            if self.salt_len == 0 {
                return Err(BunkrError::Config("salt_len must be positive".to_string()));
            }
        }
        Ok(())
    }
}
