//! # Bunkr - Encrypted Block Archive
//!
//! `bunkr-rs` stores a tree of files inside a single archive file. Content
//! is split into fixed-size blocks, optionally deflated and encrypted with a
//! per-file key, and every file carries a SHA-256 integrity hash checked on
//! read.
//!
//! - **Block-structured** storage with a 20-byte header and a JSON trailer
//! - **Counter-mode encryption** (AES-256 or Twofish-256), fresh key per write
//! - **Sealed inventory**: per-file keys are protected by the archive password
//! - **Maintenance**: defragmentation and secure block wiping
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bunkr_rs::{ArchiveBuilder, Result};
//! use zeroize::Zeroizing;
//!
//! # fn main() -> Result<()> {
//! let mut archive = ArchiveBuilder::new("secrets.bunkr")
//!     .password(Zeroizing::new(b"correct horse battery".to_vec()))
//!     .create()?;
//!
//! archive.mkdir("/notes", false)?;
//! archive.write_file("/notes/todo.txt", b"water the plants")?;
//! archive.add_tag("/notes/todo.txt", "home.chores")?;
//!
//! let content = archive.read_file("/notes/todo.txt")?;
//! assert_eq!(content, b"water the plants");
//! # Ok(())
//! # }
//! ```
//!
//! ## Opening an existing archive
//!
//! ```rust,no_run
//! use bunkr_rs::{Archive, PasswordProvider, Result, SecureRandom};
//! use std::path::Path;
//!
//! # fn main() -> Result<()> {
//! let mut passwords = PasswordProvider::new();
//! passwords.set_password_from_file(Path::new("/home/me/.bunkr-pass"))?;
//! let archive = Archive::open("secrets.bunkr", passwords, SecureRandom::system())?;
//!
//! for entry in archive.list_children("/notes")? {
//!     println!("{} {:?}", entry.name, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocator, archive, codec, config, defrag, descriptor, encryption, error, header, inventory,
    io, random, range, stream, usersec, wipe,
};

pub use crate::core::{
    archive::{Archive, FileWriter},
    config::{ArchiveConfig, EncryptionSetting},
    defrag::{DefragReport, PlannedMove},
    descriptor::{CompressionMethod, Descriptor, KdfParams},
    encryption::{CipherAlgorithm, EncryptionMaterial},
    error::{BunkrError, ErrorKind, Result},
    header::{Header, DATABLOCKS_START, DEFAULT_BLOCK_SIZE},
    inventory::{FileEntry, FolderEntry, Inventory, MediaType, Node},
    random::{RandomSource, SecureRandom},
    range::FragmentedRange,
    stream::{ArchiveReader, WriteOutcome},
    usersec::{PasswordPrompter, PasswordProvider},
    wipe::{CancelToken, WipeMode, WipeOperation},
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

/// One child of a folder, as shown in a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Full path in the archive (e.g. "/notes/todo.txt")
    pub path: String,

    /// Just the name (e.g. "todo.txt")
    pub name: String,

    /// Parent folder path, "/" for top-level entries
    pub parent: String,

    pub is_dir: bool,

    /// Logical size (None for folders)
    pub size: Option<u64>,

    /// Bytes stored in blocks (None for folders)
    pub size_on_disk: Option<u64>,

    /// Milliseconds since the epoch (None for folders)
    pub modified: Option<i64>,

    pub media_type: Option<MediaType>,

    pub tags: Vec<String>,
}

impl Archive {
    /// Entries directly inside the folder at `path`, folders first, then by name
    pub fn list_children(&self, path: &str) -> Result<Vec<Entry>> {
        let container = self.inventory().resolve_folder(path)?;
        let parent = format!("/{}", inventory::path::segments(path)?.join("/"));

        let mut entries: Vec<Entry> = container
            .folders()
            .iter()
            .map(|folder| Entry {
                path: inventory::path::join(&parent, folder.name()),
                name: folder.name().to_string(),
                parent: parent.clone(),
                is_dir: true,
                size: None,
                size_on_disk: None,
                modified: None,
                media_type: None,
                tags: Vec::new(),
            })
            .collect();
        entries.extend(container.files().iter().map(|file| Entry {
            path: inventory::path::join(&parent, file.name()),
            name: file.name().to_string(),
            parent: parent.clone(),
            is_dir: false,
            size: Some(file.actual_size()),
            size_on_disk: Some(file.size_on_disk()),
            modified: Some(file.modified_at()),
            media_type: Some(file.media_type()),
            tags: file.tags().iter().cloned().collect(),
        }));

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(entries)
    }
}

/// Builder for new archives
///
/// Starts from [`ArchiveConfig::default`]; explicit setters override the
/// config.
///
/// # Examples
///
/// ```rust,no_run
/// use bunkr_rs::{ArchiveBuilder, CipherAlgorithm, CompressionMethod};
///
/// # fn main() -> bunkr_rs::Result<()> {
/// let archive = ArchiveBuilder::new("media.bunkr")
///     .block_size(4096)
///     .encryption(None)
///     .compression(CompressionMethod::None)
///     .create()?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    path: PathBuf,
    config: ArchiveConfig,
    passwords: PasswordProvider,
    password: Option<Zeroizing<Vec<u8>>>,
    random: SecureRandom,
}

impl ArchiveBuilder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ArchiveBuilder {
            path: path.as_ref().to_path_buf(),
            config: ArchiveConfig::default(),
            passwords: PasswordProvider::new(),
            password: None,
            random: SecureRandom::system(),
        }
    }

    /// Replace every setting with `config`
    pub fn config(mut self, config: ArchiveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// `None` creates a plaintext archive
    pub fn encryption(mut self, algorithm: Option<CipherAlgorithm>) -> Self {
        self.config.encryption = algorithm.into();
        self
    }

    pub fn compression(mut self, compression: CompressionMethod) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn pbkdf2_iterations(mut self, iterations: u32) -> Self {
        self.config.pbkdf2_iterations = iterations;
        self
    }

    pub fn salt_len(mut self, salt_len: usize) -> Self {
        self.config.salt_len = salt_len;
        self
    }

    /// Password source for encrypted archives
    pub fn password_provider(mut self, passwords: PasswordProvider) -> Self {
        self.passwords = passwords;
        self
    }

    /// Plaintext password, validated and hashed on [`create`](ArchiveBuilder::create)
    pub fn password(mut self, password: Zeroizing<Vec<u8>>) -> Self {
        self.password = Some(password);
        self
    }

    /// Inject a random source, mainly for tests
    pub fn random(mut self, random: SecureRandom) -> Self {
        self.random = random;
        self
    }

    pub fn create(self) -> Result<Archive> {
        self.config.validate()?;
        let mut passwords = self.passwords;
        if let Some(password) = self.password {
            passwords.set_password(password)?;
        }

        let descriptor = match self.config.encryption.algorithm() {
            Some(algorithm) => {
                let kdf = KdfParams::generate(
                    self.config.pbkdf2_iterations,
                    self.config.salt_len,
                    &self.random,
                )?;
                Descriptor::encrypted(algorithm, self.config.compression, kdf)
            }
            None => Descriptor::plaintext(self.config.compression),
        };

        info!("Building archive at {:?}", self.path);
        Archive::create(
            &self.path,
            self.config.block_size,
            descriptor,
            passwords,
            self.random,
        )
    }
}
