//! Lazy, single-pass, non-restartable iteration over a listing. Each
//! [`DirEntries`] owns its paging cursor (the underlying
//! [`crate::backend::BlobStream`]) and releases it on drop. There is no
//! `remove` — unsupported removal is simply a method that doesn't exist on
//! the iteration surface.

use crate::attrs::{self, Attributes};
use crate::backend::{Blob, BlobStream, Bucket};
use crate::error::Result;
use crate::filesystem::GsFileSystem;
use crate::path::{split_segments, GsPath};
use futures::StreamExt;
use std::sync::Arc;
use std::vec::IntoIter;

/// A predicate a caller supplies to `newDirectoryStream` to skip entries it
/// isn't interested in. Applied after the origin directory marker is
/// skipped and before an entry is yielded.
pub type DirectoryFilter = Arc<dyn Fn(&GsPath) -> bool + Send + Sync>;

pub fn accept_all() -> DirectoryFilter {
    Arc::new(|_| true)
}

enum Source {
    /// One listing page-chain over blob entries directly under `origin`.
    Blobs { stream: BlobStream, fs: Arc<GsFileSystem>, origin: String },
    /// One listing over bucket entries, under the global root.
    Buckets { items: IntoIter<Bucket>, fs: Arc<GsFileSystem> },
}

pub struct DirEntries {
    source: Source,
    filter: DirectoryFilter,
}

impl DirEntries {
    pub(crate) fn blobs(fs: Arc<GsFileSystem>, stream: BlobStream, origin: String, filter: DirectoryFilter) -> Self {
        Self {
            source: Source::Blobs { stream, fs, origin },
            filter,
        }
    }

    pub(crate) fn buckets(fs: Arc<GsFileSystem>, buckets: Vec<Bucket>, filter: DirectoryFilter) -> Self {
        Self {
            source: Source::Buckets {
                items: buckets.into_iter(),
                fs,
            },
            filter,
        }
    }

    /// Advances the cursor by one entry, skipping the origin marker and any
    /// entry the filter rejects. `None` once the page-chain is exhausted.
    pub async fn next(&mut self) -> Option<Result<GsPath>> {
        loop {
            let candidate = match &mut self.source {
                Source::Blobs { stream, fs, origin } => match stream.next().await {
                    None => return None,
                    Some(Err(e)) => return Some(Err(e)),
                    Some(Ok(blob)) if blob.name == *origin => continue,
                    Some(Ok(blob)) => blob_to_path(fs.clone(), blob),
                },
                Source::Buckets { items, fs } => match items.next() {
                    None => return None,
                    Some(bucket) => bucket_to_path(fs.clone(), bucket),
                },
            };

            if (self.filter)(&candidate) {
                return Some(Ok(candidate));
            }
        }
    }
}

fn blob_to_path(fs: Arc<GsFileSystem>, blob: Blob) -> GsPath {
    let is_dir = blob.is_directory_marker();
    let key = blob.name.trim_end_matches('/');
    let (key_segments, _) = split_segments(key);

    let mut full_segments = vec![fs.bucket().to_string()];
    full_segments.extend(key_segments);

    let file_key = attrs::file_key(fs.bucket(), key);
    let attributes = if is_dir {
        Attributes::Directory {
            creation_time: blob.create_time,
            file_key,
        }
    } else {
        Attributes::File {
            size: blob.size,
            last_modified_time: blob.update_time,
            creation_time: blob.create_time,
            file_key,
        }
    };

    GsPath::new_absolute(fs, full_segments, is_dir).with_cached_attrs(attributes)
}

fn bucket_to_path(fs: Arc<GsFileSystem>, bucket: Bucket) -> GsPath {
    let file_key = attrs::file_key(&bucket.name, "");
    let attributes = Attributes::Bucket {
        creation_time: bucket.create_time,
        file_key,
    };
    GsPath::new_absolute(fs, vec![bucket.name], true).with_cached_attrs(attributes)
}
