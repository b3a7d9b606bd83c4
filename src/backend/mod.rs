//! The narrow interface this crate needs from a GCS-like object store.

pub mod gcs;

use crate::error::{BackendErrorKind, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use time::OffsetDateTime;

/// A logical record for a stored object. A name ending in `/` is a
/// directory marker.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub create_time: Option<OffsetDateTime>,
    pub update_time: Option<OffsetDateTime>,
}

impl Blob {
    pub fn is_directory_marker(&self) -> bool {
        self.name.ends_with('/')
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub location: Option<String>,
    pub storage_class: Option<String>,
    pub create_time: Option<OffsetDateTime>,
}

/// Stands in for the optional `delimiter="/"` on a prefix listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// A flat, recursive listing under the prefix.
    None,
    /// "Current directory" mode: objects directly under the prefix, plus
    /// synthesized directory markers for immediate sub-prefixes.
    CurrentDirectory,
}

pub type BlobStream = BoxStream<'static, Result<Blob>>;

/// A seekable reader over a single object's bytes, backed by a range
/// request. `size` is fixed at open time from the blob's metadata.
#[async_trait]
pub trait SeekableReader: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn position(&self) -> u64;
    async fn seek(&mut self, pos: u64) -> Result<()>;
    fn size(&self) -> u64;
}

/// A sequential, append-only writer over a resumable upload session. The
/// object is not visible to readers until `close` completes.
#[async_trait]
pub trait SequentialWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn position(&self) -> u64;
    async fn close(&mut self) -> Result<()>;
}

/// The storage client abstraction. Implementations may call a
/// remote API; callers treat every method as if it were synchronous I/O —
/// the only suspension points in this crate live behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageClient: Send + Sync + std::fmt::Debug {
    async fn get_blob(&self, bucket: &str, key: &str) -> Result<Option<Blob>>;

    async fn open_range_reader(&self, bucket: &str, key: &str) -> Result<Box<dyn SeekableReader>>;

    async fn open_resumable_writer(&self, bucket: &str, key: &str) -> Result<Box<dyn SequentialWriter>>;

    async fn list_by_prefix(&self, bucket: &str, prefix: &str, delimiter: Delimiter) -> Result<BlobStream>;

    /// Server-side copy; loops internally (advancing a rewrite token) until
    /// the backend reports completion.
    async fn copy_blob(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()>;

    async fn delete_blob(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn create_bucket(&self, name: &str, location: Option<&str>, storage_class: Option<&str>) -> Result<()>;

    async fn delete_bucket(&self, name: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<Bucket>>;

    /// Classifies a backend failure by the store's own "not found"/"conflict"
    /// signal rather than by inspecting an exception chain — used by the
    /// bucket-delete retry policy to decide whether to retry, translate to
    /// `NoSuchFile`/`DirectoryNotEmpty`, or surface the failure unchanged.
    fn classify_error(&self, err: &eyre::Report) -> BackendErrorKind;
}
