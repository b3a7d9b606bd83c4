//! One (bucket → storage client) binding.
//!
//! Buckets are *not* queried upon construction — every operation talks to
//! the backend on demand, with no whole-lifetime listing cache. Listings
//! are only as fresh as the backend's own eventual consistency allows.

use crate::attrs::{self, Attributes};
use crate::backend::{Delimiter, StorageClient};
use crate::channel::{ReadableByteChannel, WritableByteChannel};
use crate::dirstream::{DirEntries, DirectoryFilter};
use crate::error::{Error, Result};
use crate::path::{split_segments, GsPath};
use futures::StreamExt;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// The bucket name bound to the special, read-only filesystem used only to
/// enumerate buckets (the global root, `gs:///`).
pub const ROOT_BUCKET: &str = "/";

#[derive(Debug)]
pub struct GsFileSystem {
    bucket: String,
    client: Arc<dyn StorageClient>,
    location: Option<String>,
    storage_class: Option<String>,
    open: AtomicBool,
    self_ref: Weak<GsFileSystem>,
}

impl GsFileSystem {
    pub(crate) fn new(
        bucket: String,
        client: Arc<dyn StorageClient>,
        location: Option<String>,
        storage_class: Option<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            bucket,
            client,
            location,
            storage_class,
            open: AtomicBool::new(true),
            self_ref: weak.clone(),
        })
    }

    pub(crate) fn new_root(client: Arc<dyn StorageClient>) -> Arc<Self> {
        Self::new(ROOT_BUCKET.to_string(), client, None, None)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn is_root(&self) -> bool {
        self.bucket == ROOT_BUCKET
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("filesystem used after being dropped")
    }

    /// Builds an absolute [`GsPath`] owned by this filesystem from a bare
    /// key (no leading bucket segment).
    pub fn path(&self, key: &str) -> GsPath {
        let (segments, directory) = split_segments(key);
        let directory = segments.is_empty() || directory;
        let mut full = vec![self.bucket.clone()];
        full.extend(segments);
        GsPath::new_absolute(self.arc(), full, directory)
    }

    pub(crate) async fn exists_as_file(&self, path: &GsPath) -> Result<bool> {
        Ok(self.client.get_blob(&self.bucket, &path.object_name()).await?.is_some())
    }

    pub async fn new_readable_byte_channel(&self, path: &GsPath) -> Result<ReadableByteChannel> {
        let key = path.object_name();
        debug!("new_readable_byte_channel(bucket={}, key={key})", self.bucket);
        let blob = self
            .client
            .get_blob(&self.bucket, &key)
            .await?
            .ok_or_else(|| Error::no_such_file(attrs::file_key(&self.bucket, &key)))?;
        let reader = self.client.open_range_reader(&self.bucket, &key).await?;
        Ok(ReadableByteChannel::new(reader, blob.size))
    }

    pub async fn new_writable_byte_channel(&self, path: &GsPath) -> Result<WritableByteChannel> {
        let key = path.object_name();
        debug!("new_writable_byte_channel(bucket={}, key={key})", self.bucket);
        let writer = self.client.open_resumable_writer(&self.bucket, &key).await?;
        Ok(WritableByteChannel::new(writer))
    }

    pub async fn create_directory(&self, path: &GsPath) -> Result<()> {
        if path.is_bucket_root() {
            debug!("create_directory: creating bucket {}", self.bucket);
            return self
                .client
                .create_bucket(&self.bucket, self.location.as_deref(), self.storage_class.as_deref())
                .await;
        }

        let marker_key = format!("{}/", path.object_name());
        debug!("create_directory: creating marker bucket={} key={marker_key}", self.bucket);
        let mut writer = self.client.open_resumable_writer(&self.bucket, &marker_key).await?;
        writer.close().await
    }

    /// Bucket root: deletes the bucket. File or directory: runs
    /// `checkExistOrEmpty` and deletes the single resolved blob.
    pub async fn delete(&self, path: &GsPath) -> Result<()> {
        if path.is_bucket_root() {
            return self.client.delete_bucket(&self.bucket).await;
        }

        let key = path.object_name();
        if !path.is_directory_hint() {
            return self.delete_file(&key).await;
        }
        self.delete_directory(&key).await
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let deleted = self.client.delete_blob(&self.bucket, key).await?;
        if !deleted {
            return Err(Error::no_such_file(attrs::file_key(&self.bucket, key)));
        }
        Ok(())
    }

    async fn delete_directory(&self, key: &str) -> Result<()> {
        let marker = format!("{key}/");
        let mut stream = self.client.list_by_prefix(&self.bucket, &marker, Delimiter::None).await?;

        let mut marker_exists = false;
        let mut has_children = false;
        while let Some(entry) = stream.next().await {
            let blob = entry?;
            if blob.name == marker {
                marker_exists = true;
            } else {
                has_children = true;
            }
        }

        if has_children {
            return Err(Error::directory_not_empty(attrs::file_key(&self.bucket, key)));
        }
        if !marker_exists {
            return Err(Error::no_such_file(attrs::file_key(&self.bucket, key)));
        }
        self.delete_file(&marker).await
    }

    /// Server-side copy; the chunked advance-until-done loop lives in the
    /// `StorageClient` (the backend call is itself iterative).
    pub async fn copy(&self, source: &GsPath, target: &GsPath) -> Result<()> {
        let (Some(src_fs), Some(dst_fs)) = (source.filesystem(), target.filesystem()) else {
            return Err(Error::illegal_argument("copy requires two absolute paths"));
        };
        self.client
            .copy_blob(src_fs.bucket(), &source.object_name(), dst_fs.bucket(), &target.object_name())
            .await
    }

    /// Resolution order:
    /// 1. cached attribute from a listing (consumed, then cleared)
    /// 2. global root → synthetic root attributes
    /// 3. bucket root → fetch the bucket
    /// 4. directory hint set → directory probe (marker or synthesized prefix)
    /// 5. otherwise → fetch the blob, falling back to the directory probe
    pub async fn read_attributes(&self, path: &GsPath) -> Result<Attributes> {
        if let Some(cached) = path.take_cached_attrs() {
            return Ok(cached);
        }

        if path.is_global_root() {
            return Ok(Attributes::Directory {
                creation_time: None,
                file_key: "/".to_string(),
            });
        }

        if path.is_bucket_root() {
            let bucket_name = path.bucket().unwrap_or(&self.bucket).to_string();
            let buckets = self.client.list_buckets().await?;
            return buckets
                .into_iter()
                .find(|b| b.name == bucket_name)
                .map(|b| Attributes::Bucket {
                    creation_time: b.create_time,
                    file_key: attrs::file_key(&bucket_name, ""),
                })
                .ok_or_else(|| Error::no_such_file(attrs::file_key(&bucket_name, "")));
        }

        let key = path.object_name();
        if path.is_directory_hint() {
            return self.read_directory_attributes(&key).await;
        }

        match self.client.get_blob(&self.bucket, &key).await? {
            Some(blob) => Ok(Attributes::File {
                size: blob.size,
                last_modified_time: blob.update_time,
                creation_time: blob.create_time,
                file_key: attrs::file_key(&self.bucket, &key),
            }),
            None => self.read_directory_attributes(&key).await,
        }
    }

    async fn read_directory_attributes(&self, key: &str) -> Result<Attributes> {
        let marker = format!("{key}/");
        let mut stream = self.client.list_by_prefix(&self.bucket, &marker, Delimiter::CurrentDirectory).await?;

        let mut marker_create_time = None;
        let mut any = false;
        while let Some(entry) = stream.next().await {
            let blob = entry?;
            any = true;
            if blob.name == marker {
                marker_create_time = blob.create_time;
            }
        }

        if !any {
            return Err(Error::no_such_file(attrs::file_key(&self.bucket, key)));
        }
        Ok(Attributes::Directory {
            creation_time: marker_create_time,
            file_key: attrs::file_key(&self.bucket, key),
        })
    }

    pub async fn new_directory_stream(&self, dir: &GsPath, filter: DirectoryFilter) -> Result<DirEntries> {
        if dir.is_global_root() {
            let buckets = self.client.list_buckets().await?;
            return Ok(DirEntries::buckets(self.arc(), buckets, filter));
        }

        let prefix = if dir.object_name().is_empty() {
            String::new()
        } else {
            format!("{}/", dir.object_name())
        };
        let stream = self.client.list_by_prefix(&self.bucket, &prefix, Delimiter::CurrentDirectory).await?;
        Ok(DirEntries::blobs(self.arc(), stream, prefix, filter))
    }
}

impl Drop for GsFileSystem {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("filesystem for bucket={} dropped without an explicit close", self.bucket);
        }
    }
}
