//! Archive passwords
//!
//! A [`PasswordProvider`] hands out the SHA-256 hash of the archive password,
//! never the password itself. The plaintext is zeroed as soon as it has been
//! validated and hashed; the hash lives in zeroizing memory and is dropped on
//! [`PasswordProvider::clear`] or when the provider goes out of scope.

use crate::error::{BunkrError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

pub const MINIMUM_PASSWORD_LENGTH: usize = 8;
pub const CHAR_SPACE: u8 = 0x20;
pub const CHAR_TILDE: u8 = 0x7E;

/// Source of a raw password, asked at most once per session
pub trait PasswordPrompter: Send {
    fn get_password(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Reject passwords that are too short or contain bytes outside printable ASCII
pub fn check_password(password: &[u8]) -> Result<()> {
    if password.len() < MINIMUM_PASSWORD_LENGTH {
        return Err(BunkrError::IllegalPassword(format!(
            "Password must be at least {} characters.",
            MINIMUM_PASSWORD_LENGTH
        )));
    }
    if let Some(b) = password
        .iter()
        .find(|&&b| !(CHAR_SPACE..=CHAR_TILDE).contains(&b))
    {
        return Err(BunkrError::IllegalPassword(format!(
            "Password cannot contain byte 0x{:02X}",
            b
        )));
    }
    Ok(())
}

/// Lazily obtains and caches the hashed archive password
#[derive(Default)]
pub struct PasswordProvider {
    hashed: Option<Zeroizing<Vec<u8>>>,
    prompter: Option<Box<dyn PasswordPrompter>>,
}

impl PasswordProvider {
    /// Provider with no password and no prompt
    pub fn new() -> Self {
        PasswordProvider::default()
    }

    pub fn with_prompter(prompter: Box<dyn PasswordPrompter>) -> Self {
        PasswordProvider {
            hashed: None,
            prompter: Some(prompter),
        }
    }

    /// Provider initialised from a plaintext password
    pub fn with_password(password: Zeroizing<Vec<u8>>) -> Result<Self> {
        let mut provider = PasswordProvider::new();
        provider.set_password(password)?;
        Ok(provider)
    }

    /// Provider holding an already-hashed secret
    pub fn with_hashed(hashed: Zeroizing<Vec<u8>>) -> Self {
        PasswordProvider {
            hashed: Some(hashed),
            prompter: None,
        }
    }

    pub fn set_prompter(&mut self, prompter: Box<dyn PasswordPrompter>) {
        self.prompter = Some(prompter);
    }

    /// The hashed password, prompting for it on first use
    pub fn hashed_password(&mut self) -> Result<&[u8]> {
        if self.hashed.is_none() {
            let prompter = self
                .prompter
                .as_mut()
                .ok_or(BunkrError::PasswordUnavailable)?;
            let password = prompter.get_password()?;
            self.set_password(password)?;
        }
        self.hashed
            .as_deref()
            .map(Vec::as_slice)
            .ok_or(BunkrError::PasswordUnavailable)
    }

    /// Validate and hash `password`; the plaintext is zeroed when this returns
    pub fn set_password(&mut self, password: Zeroizing<Vec<u8>>) -> Result<()> {
        self.hashed = Some(hash_password(&password)?);
        Ok(())
    }

    /// Swap in a new hashed secret, handing back the previous one
    pub(crate) fn replace_hashed(
        &mut self,
        hashed: Option<Zeroizing<Vec<u8>>>,
    ) -> Option<Zeroizing<Vec<u8>>> {
        std::mem::replace(&mut self.hashed, hashed)
    }

    /// Read the password from the first line of a file.
    ///
    /// The file must not be readable or writable by group or others.
    pub fn set_password_from_file(&mut self, path: &Path) -> Result<()> {
        check_file_permissions(path)?;
        let file = fs::File::open(path)?;
        let mut line = Zeroizing::new(String::new());
        BufReader::new(file).read_line(&mut line)?;
        let trimmed = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        debug!("Read password file {:?}", path);
        self.set_password(Zeroizing::new(trimmed.as_bytes().to_vec()))
    }

    /// Forget the cached hash; the next request prompts again
    pub fn clear(&mut self) {
        self.hashed = None;
    }

    pub fn has_password(&self) -> bool {
        self.hashed.is_some()
    }
}

impl fmt::Debug for PasswordProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordProvider")
            .field("has_password", &self.hashed.is_some())
            .field("has_prompter", &self.prompter.is_some())
            .finish()
    }
}

/// Validate `password` and return its SHA-256
pub fn hash_password(password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    check_password(password)?;
    Ok(Zeroizing::new(Sha256::digest(password).to_vec()))
}

#[cfg(unix)]
fn check_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o044 != 0 {
        return Err(BunkrError::Security(
            "For security reasons, the password file may not be group or world readable."
                .to_string(),
        ));
    }
    if mode & 0o022 != 0 {
        return Err(BunkrError::Security(
            "For security reasons, the password file may not be group or world writable."
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_file_permissions(path: &Path) -> Result<()> {
    fs::metadata(path)?;
    Ok(())
}
