//! Archive descriptor
//!
//! The descriptor is the plaintext, archive-wide configuration stored after
//! the inventory: which cipher new file versions are written with, whether
//! content is deflated, and the key-derivation parameters used to seal the
//! inventory.
//!
//! When encryption is enabled the inventory section is sealed with
//! AES-256-GCM under a key derived by PBKDF2-HMAC-SHA256 from the hashed
//! archive password and the descriptor salt. The sealed section is itself a
//! small JSON document holding the nonce and ciphertext.

use crate::codec::base64_bytes;
use crate::encryption::CipherAlgorithm;
use crate::error::{BunkrError, Result};
use crate::random::SecureRandom;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

/// Derived key length in bits
pub const KDF_KEY_LENGTH_BITS: usize = 256;

/// Lowest accepted PBKDF2 iteration count
pub const MIN_KDF_ITERATIONS: u32 = 4096;

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
pub const DEFAULT_SALT_LENGTH: usize = 128;

const GCM_NONCE_LEN: usize = 12;

/// Content compression applied before encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionMethod {
    None,
    #[default]
    Deflate,
}

impl CompressionMethod {
    pub fn is_enabled(self) -> bool {
        self != CompressionMethod::None
    }
}

/// PBKDF2 parameters for the inventory key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

impl KdfParams {
    /// Fresh parameters with a random salt
    pub fn generate(iterations: u32, salt_len: usize, random: &SecureRandom) -> Result<Self> {
        let params = KdfParams {
            iterations,
            salt: random.bytes(salt_len),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(BunkrError::InvalidArgument(format!(
                "PBKDF2 iteration count {} is below the minimum of {}",
                self.iterations, MIN_KDF_ITERATIONS
            )));
        }
        if self.salt.is_empty() {
            return Err(BunkrError::InvalidArgument(
                "PBKDF2 salt must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 256-bit key derived from the hashed password
    pub fn derive_key(&self, hashed_password: &[u8]) -> Zeroizing<[u8; KDF_KEY_LENGTH_BITS / 8]> {
        let mut key = Zeroizing::new([0u8; KDF_KEY_LENGTH_BITS / 8]);
        pbkdf2_hmac::<Sha256>(hashed_password, &self.salt, self.iterations, key.as_mut_slice());
        key
    }
}

#[derive(Serialize, Deserialize)]
struct SealedSection {
    #[serde(with = "base64_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    ciphertext: Vec<u8>,
}

/// Archive-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub encryption: Option<CipherAlgorithm>,
    #[serde(default)]
    pub compression: CompressionMethod,
    #[serde(default)]
    pub kdf: Option<KdfParams>,
}

impl Descriptor {
    /// Descriptor without encryption
    pub fn plaintext(compression: CompressionMethod) -> Self {
        Descriptor {
            encryption: None,
            compression,
            kdf: None,
        }
    }

    pub fn encrypted(algorithm: CipherAlgorithm, compression: CompressionMethod, kdf: KdfParams) -> Self {
        Descriptor {
            encryption: Some(algorithm),
            compression,
            kdf: Some(kdf),
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.encryption, &self.kdf) {
            (Some(_), None) => Err(BunkrError::CorruptMetadata(
                "encrypted archive has no key derivation parameters".to_string(),
            )),
            (_, Some(kdf)) => kdf.validate(),
            (None, None) => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: Descriptor = serde_json::from_slice(bytes)
            .map_err(|e| BunkrError::CorruptMetadata(format!("descriptor: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Encrypt the inventory JSON into the sealed section format
    pub fn seal_inventory(
        &self,
        inventory_json: &[u8],
        hashed_password: &[u8],
        random: &SecureRandom,
    ) -> Result<Vec<u8>> {
        let kdf = self.kdf_params()?;
        let key = kdf.derive_key(hashed_password);
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| BunkrError::Crypto(e.to_string()))?;
        let nonce = random.bytes(GCM_NONCE_LEN);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), inventory_json)
            .map_err(|e| BunkrError::Crypto(e.to_string()))?;
        debug!("Sealed inventory ({} bytes)", inventory_json.len());
        Ok(serde_json::to_vec(&SealedSection { nonce, ciphertext })?)
    }

    /// Decrypt a sealed inventory section
    pub fn open_inventory(&self, section: &[u8], hashed_password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let kdf = self.kdf_params()?;
        let sealed: SealedSection = serde_json::from_slice(section)
            .map_err(|e| BunkrError::CorruptMetadata(format!("sealed inventory: {}", e)))?;
        if sealed.nonce.len() != GCM_NONCE_LEN {
            return Err(BunkrError::CorruptMetadata(format!(
                "sealed inventory nonce is {} bytes",
                sealed.nonce.len()
            )));
        }
        let key = kdf.derive_key(hashed_password);
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| BunkrError::Crypto(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| BunkrError::WrongPassword)
    }

    fn kdf_params(&self) -> Result<&KdfParams> {
        self.kdf.as_ref().ok_or_else(|| {
            BunkrError::InvalidArgument("archive has no key derivation parameters".to_string())
        })
    }
}
