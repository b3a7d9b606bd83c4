//! Error kinds surfaced to callers of the filesystem adapter.

use std::fmt;

/// The POSIX-like errors this crate can raise.
///
/// Internal plumbing still leans on `eyre` for ad hoc context the way the
/// backend client does; this enum is the boundary callers actually match on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target blob, directory marker, bucket, or filesystem does not exist.
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// `CREATE_NEW` on an existing target, or a non-`REPLACE_EXISTING` copy
    /// onto an existing target.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// Deleting a non-empty directory or bucket.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// EXECUTE access mode requested, or an underlying authorization failure.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Malformed URI, missing bucket, provider-mismatched path, invalid
    /// open-mode combination.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// An operation this crate deliberately does not implement.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// `newFileSystem` was called for a bucket already bound in the registry.
    #[error("filesystem already exists for bucket: {0}")]
    FileSystemAlreadyExists(String),

    /// `getFileSystem` was called for a bucket with no registered instance.
    #[error("filesystem not found for bucket: {0}")]
    FileSystemNotFound(String),

    /// Any other backend failure, wrapping the underlying cause.
    #[error("io error: {0:#}")]
    Io(#[from] eyre::Report),
}

impl Error {
    pub fn no_such_file(file_key: impl Into<String>) -> Self {
        Self::NoSuchFile(file_key.into())
    }

    pub fn file_already_exists(file_key: impl Into<String>) -> Self {
        Self::FileAlreadyExists(file_key.into())
    }

    pub fn directory_not_empty(file_key: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(file_key.into())
    }

    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    /// `true` for errors that model an absent target (useful where callers
    /// want to treat "not found" as a normal outcome rather than a failure).
    pub fn is_no_such_file(&self) -> bool {
        matches!(self, Self::NoSuchFile(_))
    }
}

/// Distinguishes the cause of a backend failure without inspecting an
/// exception chain: `checkExistOrEmpty` classifies by this signal, not by
/// downcasting errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
