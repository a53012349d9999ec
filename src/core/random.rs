//! Secure randomness
//!
//! All key, IV, salt, nonce and wipe-fill bytes come from a [`SecureRandom`]
//! handle. The process-wide OS-backed instance is created once on first use;
//! tests inject their own [`RandomSource`].

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Anything able to fill a buffer with cryptographically secure bytes
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

struct OsSource;

impl RandomSource for OsSource {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Cloneable handle over a shared random source
#[derive(Clone)]
pub struct SecureRandom {
    source: Arc<dyn RandomSource>,
}

static SYSTEM: OnceLock<SecureRandom> = OnceLock::new();

impl SecureRandom {
    /// The process-wide OS-backed generator
    pub fn system() -> SecureRandom {
        SYSTEM
            .get_or_init(|| SecureRandom {
                source: Arc::new(OsSource),
            })
            .clone()
    }

    /// Wrap a caller-provided source
    pub fn from_source(source: Arc<dyn RandomSource>) -> SecureRandom {
        SecureRandom { source }
    }

    pub fn fill(&self, buf: &mut [u8]) {
        self.source.fill(buf);
    }

    /// Fresh vector of `len` random bytes
    pub fn bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        SecureRandom::system()
    }
}

impl fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureRandom").finish_non_exhaustive()
    }
}
