//! Immutable attribute descriptors for files, directories and buckets.

use time::OffsetDateTime;

/// The kind of entry an [`Attributes`] value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Bucket,
}

/// Basic file attributes — the only attribute view this crate supports
/// (`"basic"`).
///
/// A directory's `size` is always `0` and it carries no modification time. A
/// bucket carries only a creation time. `last_access_time` is always `None`
/// on every variant — the store never records access time.
#[derive(Debug, Clone)]
pub enum Attributes {
    File {
        size: u64,
        last_modified_time: Option<OffsetDateTime>,
        creation_time: Option<OffsetDateTime>,
        file_key: String,
    },
    Directory {
        creation_time: Option<OffsetDateTime>,
        file_key: String,
    },
    Bucket {
        creation_time: Option<OffsetDateTime>,
        file_key: String,
    },
}

impl Attributes {
    pub fn kind(&self) -> FileKind {
        match self {
            Self::File { .. } => FileKind::File,
            Self::Directory { .. } => FileKind::Directory,
            Self::Bucket { .. } => FileKind::Bucket,
        }
    }

    pub fn is_regular_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. } | Self::Bucket { .. })
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::File { size, .. } => *size,
            Self::Directory { .. } | Self::Bucket { .. } => 0,
        }
    }

    pub fn last_modified_time(&self) -> Option<OffsetDateTime> {
        match self {
            Self::File { last_modified_time, .. } => *last_modified_time,
            Self::Directory { .. } | Self::Bucket { .. } => None,
        }
    }

    pub fn creation_time(&self) -> Option<OffsetDateTime> {
        match self {
            Self::File { creation_time, .. } => *creation_time,
            Self::Directory { creation_time, .. } => *creation_time,
            Self::Bucket { creation_time, .. } => *creation_time,
        }
    }

    /// The store never records access time.
    pub fn last_access_time(&self) -> Option<OffsetDateTime> {
        None
    }

    /// Canonical `/bucket/key` identity string, stable across `Path`
    /// recreations.
    pub fn file_key(&self) -> &str {
        match self {
            Self::File { file_key, .. } => file_key,
            Self::Directory { file_key, .. } => file_key,
            Self::Bucket { file_key, .. } => file_key,
        }
    }
}

/// Builds the canonical `/bucket/key` identity string.
pub fn file_key(bucket: &str, key: &str) -> String {
    if key.is_empty() {
        format!("/{bucket}")
    } else {
        format!("/{bucket}/{key}")
    }
}
