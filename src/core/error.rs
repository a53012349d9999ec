use std::io;
use thiserror::Error;

/// Broad classes of failure a caller may want to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive bytes are malformed; the archive is unusable.
    Format,
    /// A path did not resolve the way the caller required.
    Traversal,
    /// A digest mismatch at stream finalization.
    Integrity,
    /// Input rejected at the boundary before any state changed.
    Validation,
    /// A security precondition failed (password file permissions, wrong password).
    Security,
    /// Underlying I/O failure.
    Io,
}

#[derive(Error, Debug)]
pub enum BunkrError {
    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(i64),

    #[error("Block data length {length} is not a multiple of block size {block_size}")]
    MisalignedBlockData { length: i64, block_size: u32 },

    #[error("Archive is truncated: {0}")]
    Truncated(String),

    #[error("Corrupt archive metadata: {0}")]
    CorruptMetadata(String),

    #[error("{reason}: '{path}'")]
    Traversal { path: String, reason: String },

    #[error("Integrity hash did not match for '{0}'")]
    IntegrityHash(String),

    #[error("Invalid path: '{0}'")]
    InvalidPath(String),

    #[error("Invalid name: '{0}'")]
    InvalidName(String),

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Supplied key length {actual} != required key length {expected}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Supplied iv length {actual} != required iv length {expected}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Illegal password: {0}")]
    IllegalPassword(String),

    #[error("Password requested, but no password prompt available")]
    PasswordUnavailable,

    #[error("Security error: {0}")]
    Security(String),

    #[error("Could not decrypt the inventory: wrong password or corrupt archive")]
    WrongPassword,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Block stream error: {0}")]
    BlockStream(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BunkrError>;

impl BunkrError {
    pub(crate) fn traversal(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BunkrError::Traversal {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_tag(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        BunkrError::InvalidTag {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto one of the broad [`ErrorKind`]s.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BunkrError::InvalidMagic
            | BunkrError::UnsupportedVersion(..)
            | BunkrError::InvalidBlockSize(_)
            | BunkrError::MisalignedBlockData { .. }
            | BunkrError::Truncated(_)
            | BunkrError::CorruptMetadata(_)
            | BunkrError::BlockStream(_)
            | BunkrError::Serialization(_) => ErrorKind::Format,
            BunkrError::Traversal { .. } => ErrorKind::Traversal,
            BunkrError::IntegrityHash(_) => ErrorKind::Integrity,
            BunkrError::InvalidPath(_)
            | BunkrError::InvalidName(_)
            | BunkrError::InvalidTag { .. }
            | BunkrError::InvalidKeyLength { .. }
            | BunkrError::InvalidIvLength { .. }
            | BunkrError::IllegalPassword(_)
            | BunkrError::PasswordUnavailable
            | BunkrError::InvalidArgument(_)
            | BunkrError::Config(_) => ErrorKind::Validation,
            BunkrError::Security(_) | BunkrError::WrongPassword | BunkrError::Crypto(_) => {
                ErrorKind::Security
            }
            BunkrError::Io(_) => ErrorKind::Io,
        }
    }

    /// Errors a front end should render as a plain message rather than with a trace.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            BunkrError::Io(_)
                | BunkrError::Serialization(_)
                | BunkrError::Crypto(_)
                | BunkrError::BlockStream(_)
        )
    }
}

// Streams report through std::io, so errors raised inside a Read/Write impl
// travel wrapped in an io::Error. Unwrap them again on the way out.
impl From<io::Error> for BunkrError {
    fn from(err: io::Error) -> Self {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<BunkrError>())
        {
            return BunkrError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<BunkrError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => BunkrError::Io(io::Error::new(io::ErrorKind::Other, other)),
            None => BunkrError::Io(io::Error::from(io::ErrorKind::Other)),
        }
    }
}

impl From<BunkrError> for io::Error {
    fn from(err: BunkrError) -> Self {
        match err {
            BunkrError::Io(inner) => inner,
            other => {
                let kind = match other.kind() {
                    ErrorKind::Validation => io::ErrorKind::InvalidInput,
                    ErrorKind::Traversal => io::ErrorKind::NotFound,
                    ErrorKind::Security => io::ErrorKind::PermissionDenied,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
