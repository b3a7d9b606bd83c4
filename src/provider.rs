//! Process-wide registry of filesystem instances, URI parsing, credential
//! bootstrap, and the entry point for every public file operation.

use crate::backend::gcs::{self, GcsStorageClient};
use crate::backend::StorageClient;
use crate::channel::{ReadableByteChannel, WritableByteChannel};
use crate::dirstream::{self, DirEntries, DirectoryFilter};
use crate::error::{Error, Result};
use crate::filesystem::GsFileSystem;
use crate::path::{split_segments, GsPath, SCHEME};
use lifterr::IntoOk;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The subset of `newFileSystem`'s configuration options this crate
/// recognizes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSystemConfig {
    pub credentials: Option<String>,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "storageClass")]
    pub storage_class: Option<String>,
}

/// The open-mode bits enforced by `newByteChannel`. Reimplemented
/// locally, in the shape of `std::fs::OpenOptions`, since no filesystem I/O
/// crate sits in this dependency graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub sync: bool,
    pub dsync: bool,
}

impl FileSystemConfig {
    /// Loads configuration from a file, overlaid with `GCSFS_*` environment
    /// variables. Mirrors the credential precedence `resolve_client` applies
    /// at the client level: explicit config wins over environment, and
    /// environment wins over the implicit default-credentials fallback used
    /// when both are absent.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> eyre::Result<Self> {
        use eyre::Context;

        let cfg = config::ConfigBuilder::<config::builder::DefaultState>::default()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("GCSFS"))
            .build()
            .wrap_err("unable to load from source")?;

        cfg.try_deserialize().wrap_err("unable to deserialize")
    }
}

impl OpenOptions {
    pub fn read() -> Self {
        Self { read: true, ..Default::default() }
    }

    pub fn write() -> Self {
        Self { write: true, ..Default::default() }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn create_new(mut self) -> Self {
        self.create_new = true;
        self
    }
}

pub enum ByteChannel {
    Readable(ReadableByteChannel),
    Writable(WritableByteChannel),
}

/// The access modes `checkAccess` understands. `Execute` has no meaning over
/// an object store — there are no executable bits on a blob — so requesting
/// it is always denied rather than merely unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

struct ClientKey(Option<String>, Option<String>);

impl PartialEq for ClientKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Eq for ClientKey {}
impl std::hash::Hash for ClientKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
        self.1.hash(state);
    }
}

/// The process-wide bucket → filesystem registry plus a cache of
/// (credentials, project id) → storage client. Mutations are serialized
/// under a plain mutex; the registry is a [`HashMap`], not a concurrent map,
/// since filesystem instances are created once per bucket and then cached
/// for the process lifetime — contention is expected to be negligible.
pub struct FileSystemProvider {
    registry: Mutex<HashMap<String, Arc<GsFileSystem>>>,
    clients: Mutex<HashMap<ClientKey, Arc<dyn StorageClient>>>,
}

impl Default for FileSystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemProvider {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The default, process-wide provider instance. Explicit `init` is
    /// construction on first access; `teardown` is
    /// [`FileSystemProvider::close_all`].
    pub fn global() -> &'static FileSystemProvider {
        static INSTANCE: Lazy<FileSystemProvider> = Lazy::new(FileSystemProvider::new);
        &INSTANCE
    }

    pub fn get_file_system(&self, bucket: &str) -> Result<Arc<GsFileSystem>> {
        let bucket = bucket.to_lowercase();
        self.registry
            .lock()
            .unwrap()
            .get(&bucket)
            .cloned()
            .ok_or_else(|| Error::FileSystemNotFound(bucket))
    }

    pub async fn new_file_system(&self, bucket: &str, config: FileSystemConfig) -> Result<Arc<GsFileSystem>> {
        let bucket = bucket.to_lowercase();
        if self.registry.lock().unwrap().contains_key(&bucket) {
            return Err(Error::FileSystemAlreadyExists(bucket));
        }
        let client = self.resolve_client(&config).await?;
        self.bind(bucket, client, config.location, config.storage_class)
    }

    /// Registers a filesystem with an already-constructed client — useful
    /// for injecting a pre-authenticated client, or (in tests) a mock.
    pub fn bind(
        &self,
        bucket: impl Into<String>,
        client: Arc<dyn StorageClient>,
        location: Option<String>,
        storage_class: Option<String>,
    ) -> Result<Arc<GsFileSystem>> {
        let bucket = bucket.into().to_lowercase();
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&bucket) {
            return Err(Error::FileSystemAlreadyExists(bucket));
        }
        let fs = GsFileSystem::new(bucket.clone(), client, location, storage_class);
        registry.insert(bucket, fs.clone());
        fs.into_ok()
    }

    fn root_fs(&self) -> Result<Arc<GsFileSystem>> {
        const ROOT_KEY: &str = "/";
        if let Some(fs) = self.registry.lock().unwrap().get(ROOT_KEY) {
            return Ok(fs.clone());
        }
        Err(Error::FileSystemNotFound(ROOT_KEY.to_string()))
    }

    async fn ensure_root_fs(&self) -> Result<Arc<GsFileSystem>> {
        if let Ok(fs) = self.root_fs() {
            return Ok(fs);
        }
        let client = self.resolve_client(&FileSystemConfig::default()).await?;
        let fs = GsFileSystem::new_root(client);
        self.registry.lock().unwrap().insert("/".to_string(), fs.clone());
        Ok(fs)
    }

    /// Parses `uri`, auto-creating the filesystem for its bucket (using
    /// credentials from `config`, or the environment/default chain) if one
    /// isn't registered yet.
    pub async fn get_path(&self, uri: &str, config: FileSystemConfig) -> Result<GsPath> {
        let parsed = parse_absolute(uri)?;

        let Some(bucket) = parsed.bucket else {
            let fs = self.ensure_root_fs().await?;
            return Ok(GsPath::new_absolute(fs, vec![], true));
        };

        let fs = match self.get_file_system(&bucket) {
            Ok(fs) => fs,
            Err(Error::FileSystemNotFound(_)) => self.new_file_system(&bucket, config).await?,
            Err(e) => return Err(e),
        };

        let mut segments = vec![bucket];
        segments.extend(parsed.segments);
        Ok(GsPath::new_absolute(fs, segments, parsed.directory))
    }

    /// Resolves `other`, a textual path operand, against `base`. If `other`
    /// starts with `/` it may name a different bucket — that can switch
    /// filesystem identity, which is why this (unlike [`GsPath::resolve`])
    /// needs the registry.
    pub async fn resolve(&self, base: &GsPath, other: &str, config: FileSystemConfig) -> Result<GsPath> {
        if let Some(rest) = other.strip_prefix('/') {
            let uri = format!("{SCHEME}:/{rest}");
            return self.get_path(&uri, config).await;
        }
        let (segments, directory) = split_segments(other);
        Ok(base.resolve(&GsPath::new_relative(segments, directory)))
    }

    async fn resolve_client(&self, config: &FileSystemConfig) -> Result<Arc<dyn StorageClient>> {
        let (credentials, project_id) = if let (Some(c), Some(p)) = (&config.credentials, &config.project_id) {
            (Some(c.clone()), Some(p.clone()))
        } else if let (Ok(c), Ok(p)) = (
            std::env::var("GOOGLE_APPLICATION_CREDENTIALS"),
            std::env::var("GOOGLE_PROJECT_ID"),
        ) {
            (Some(c), Some(p))
        } else {
            (None, None)
        };

        let key = ClientKey(credentials.clone(), project_id.clone());
        if let Some(client) = self.clients.lock().unwrap().get(&key) {
            return Ok(client.clone());
        }

        let client = gcs::arc_client(
            GcsStorageClient::connect(gcs::Credentials {
                credentials_path: credentials,
                project_id,
            })
            .await?,
        );
        self.clients.lock().unwrap().insert(key, client.clone());
        Ok(client)
    }

    fn require_gs_path(&self, path: &GsPath) -> Result<()> {
        if !path.is_absolute() {
            return Err(Error::illegal_argument("operation requires an absolute gs:// path"));
        }
        Ok(())
    }

    pub async fn new_byte_channel(&self, path: &GsPath, opts: OpenOptions) -> Result<ByteChannel> {
        self.require_gs_path(path)?;
        if path.is_global_root() || path.is_bucket_root() {
            return Err(Error::illegal_argument("cannot open a byte channel on a root path"));
        }
        if opts.sync {
            return Err(Error::Unsupported("the SYNC open option"));
        }
        if opts.dsync {
            return Err(Error::Unsupported("the DSYNC open option"));
        }
        if opts.append {
            return Err(Error::Unsupported("the APPEND open option"));
        }
        if opts.read && (opts.write || opts.append) {
            return Err(Error::illegal_argument("cannot combine READ with WRITE/APPEND"));
        }

        let fs = path.filesystem().expect("checked by require_gs_path");

        if opts.read {
            return Ok(ByteChannel::Readable(fs.new_readable_byte_channel(path).await?));
        }

        let exists = fs.exists_as_file(path).await?;
        if opts.create_new && exists {
            return Err(Error::file_already_exists(path.to_string()));
        }
        if !opts.create && !opts.create_new && !exists {
            return Err(Error::no_such_file(path.to_string()));
        }

        Ok(ByteChannel::Writable(fs.new_writable_byte_channel(path).await?))
    }

    pub async fn create_directory(&self, path: &GsPath) -> Result<()> {
        self.require_gs_path(path)?;
        path.filesystem().expect("checked above").create_directory(path).await
    }

    pub async fn delete(&self, path: &GsPath) -> Result<()> {
        self.require_gs_path(path)?;
        path.filesystem().expect("checked above").delete(path).await
    }

    /// `move = copy + delete(source)`.
    pub async fn r#move(&self, source: &GsPath, target: &GsPath, replace_existing: bool) -> Result<()> {
        self.copy(source, target, replace_existing).await?;
        self.delete(source).await
    }

    /// `REPLACE_EXISTING` is honored here, not by the filesystem: a target
    /// that exists is deleted first; otherwise an existing target fails
    /// with `FileAlreadyExists` before any copy is attempted.
    pub async fn copy(&self, source: &GsPath, target: &GsPath, replace_existing: bool) -> Result<()> {
        self.require_gs_path(source)?;
        self.require_gs_path(target)?;
        let target_fs = target.filesystem().expect("checked above");

        if target_fs.exists_as_file(target).await? {
            if !replace_existing {
                return Err(Error::file_already_exists(target.to_string()));
            }
            target_fs.delete(target).await?;
        }

        let source_fs = source.filesystem().expect("checked above");
        source_fs.copy(source, target).await
    }

    pub async fn read_attributes(&self, path: &GsPath) -> Result<crate::attrs::Attributes> {
        self.require_gs_path(path)?;
        path.filesystem().expect("checked above").read_attributes(path).await
    }

    pub async fn new_directory_stream(&self, dir: &GsPath, filter: Option<DirectoryFilter>) -> Result<DirEntries> {
        self.require_gs_path(dir)?;
        let filter = filter.unwrap_or_else(dirstream::accept_all);
        dir.filesystem().expect("checked above").new_directory_stream(dir, filter).await
    }

    pub fn is_same_file(&self, a: &GsPath, b: &GsPath) -> bool {
        a == b
    }

    pub fn is_hidden(&self, path: &GsPath) -> bool {
        path.get_file_name().map(|n| n.to_string().starts_with('.')).unwrap_or(false)
    }

    /// `Read`/`Write` with no modes at all just confirm the path resolves to
    /// an existing entry; `Execute` is always denied — this store has no
    /// notion of an executable blob.
    pub async fn check_access(&self, path: &GsPath, modes: &[AccessMode]) -> Result<()> {
        self.require_gs_path(path)?;
        if modes.contains(&AccessMode::Execute) {
            return Err(Error::AccessDenied(format!("{path} has no executable permission bit")));
        }
        self.read_attributes(path).await.map(|_| ())
    }
}

struct ParsedAbsolute {
    bucket: Option<String>,
    segments: Vec<String>,
    directory: bool,
}

fn strip_scheme(uri: &str) -> Result<&str> {
    match uri.find(':') {
        Some(idx) => {
            let scheme = &uri[..idx];
            if !scheme.eq_ignore_ascii_case(SCHEME) {
                return Err(Error::illegal_argument(format!("unsupported uri scheme: {scheme}")));
            }
            Ok(&uri[idx + 1..])
        }
        None => Err(Error::illegal_argument(format!("missing scheme in uri: {uri}"))),
    }
}

/// Accepts both the external `gs://bucket/key` authority form and the
/// internal `gs:/bucket/key` form produced by [`GsPath::to_uri`] — they
/// describe the same path either way, the leading `//` is just the external
/// spelling's authority marker.
fn parse_absolute(uri: &str) -> Result<ParsedAbsolute> {
    let rest = strip_scheme(uri)?;

    if let Some(after_authority) = rest.strip_prefix("//") {
        let (authority, path) = match after_authority.find('/') {
            Some(idx) => (&after_authority[..idx], &after_authority[idx..]),
            None => (after_authority, ""),
        };
        if authority.is_empty() {
            if path.is_empty() || path == "/" {
                return Ok(ParsedAbsolute { bucket: None, segments: vec![], directory: true });
            }
            return Err(Error::illegal_argument(format!("missing bucket authority in uri: {uri}")));
        }
        let bucket = authority.to_lowercase();
        let (segments, directory) = split_segments(path);
        let directory = directory || segments.is_empty();
        return Ok(ParsedAbsolute { bucket: Some(bucket), segments, directory });
    }

    if !rest.starts_with('/') {
        return Err(Error::illegal_argument(format!("absolute gs uri must start with a slash: {uri}")));
    }
    if rest == "/" {
        return Ok(ParsedAbsolute { bucket: None, segments: vec![], directory: true });
    }

    let (mut segments, directory) = split_segments(rest);
    if segments.is_empty() {
        return Ok(ParsedAbsolute { bucket: None, segments: vec![], directory: true });
    }
    let bucket = segments.remove(0).to_lowercase();
    let directory = directory || segments.is_empty();
    Ok(ParsedAbsolute { bucket: Some(bucket), segments, directory })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Blob, MockStorageClient};

    async fn provider_with_bucket(bucket: &str, client: MockStorageClient) -> FileSystemProvider {
        let provider = FileSystemProvider::new();
        provider.bind(bucket, Arc::new(client), None, None).unwrap();
        provider
    }

    fn blob(name: &str, size: u64) -> Blob {
        Blob {
            bucket: "b".to_string(),
            name: name.to_string(),
            size,
            create_time: None,
            update_time: None,
        }
    }

    #[test]
    fn load_from_deserializes_a_toml_config_file() {
        let dir = std::env::temp_dir().join("gcsfs_load_from_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gcsfs.toml");
        std::fs::write(&path, "projectId = \"proj\"\nlocation = \"us\"\n").unwrap();

        let cfg = FileSystemConfig::load_from(&path).unwrap();
        assert_eq!(cfg.project_id.as_deref(), Some("proj"));
        assert_eq!(cfg.location.as_deref(), Some("us"));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn get_path_resolves_against_an_already_bound_bucket() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let path = provider.get_path("gs://b/a/b", FileSystemConfig::default()).await.unwrap();
        assert_eq!(path.to_string(), "/b/a/b");
    }

    #[tokio::test]
    async fn get_path_parses_the_global_root() {
        let client = MockStorageClient::new();
        let provider = FileSystemProvider::new();
        provider.bind("/", Arc::new(client), None, None).unwrap();
        let path = provider.get_path("gs:///", FileSystemConfig::default()).await.unwrap();
        assert!(path.is_global_root());
    }

    // URI parsing edge cases.
    #[test]
    fn parse_absolute_lowercases_the_bucket_and_preserves_directory_hint() {
        let parsed = parse_absolute("gs://Bucket/a/b/c/").unwrap();
        assert_eq!(parsed.bucket.as_deref(), Some("bucket"));
        assert_eq!(parsed.segments, vec!["a", "b", "c"]);
        assert!(parsed.directory);
    }

    #[test]
    fn parse_absolute_rejects_an_empty_authority_with_a_non_root_path() {
        let err = parse_absolute("gs:///a").unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn get_path_rejects_a_non_gs_scheme() {
        let provider = FileSystemProvider::new();
        let err = provider.get_path("s3://b/key", FileSystemConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn new_file_system_rejects_a_bucket_already_bound() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let err = provider.new_file_system("b", FileSystemConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::FileSystemAlreadyExists(_)));
    }

    #[tokio::test]
    async fn get_file_system_on_an_unregistered_bucket_is_not_found() {
        let provider = FileSystemProvider::new();
        let err = provider.get_file_system("nope").unwrap_err();
        assert!(matches!(err, Error::FileSystemNotFound(_)));
    }

    // Open-mode enforcement.
    #[tokio::test]
    async fn new_byte_channel_rejects_append_and_sync_modes() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();
        let path = fs.path("file.txt");

        let mut opts = OpenOptions::write();
        opts.append = true;
        assert!(matches!(provider.new_byte_channel(&path, opts).await, Err(Error::Unsupported(_))));

        let mut opts = OpenOptions::write();
        opts.sync = true;
        assert!(matches!(provider.new_byte_channel(&path, opts).await, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn new_byte_channel_rejects_combining_read_with_write() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();
        let mut opts = OpenOptions::read();
        opts.write = true;
        let result = provider.new_byte_channel(&fs.path("file.txt"), opts).await;
        assert!(matches!(result, Err(Error::IllegalArgument(_))));
    }

    #[tokio::test]
    async fn new_byte_channel_create_new_fails_if_target_exists() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, _| Ok(Some(blob("file.txt", 1))));
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        let result = provider
            .new_byte_channel(&fs.path("file.txt"), OpenOptions::write().create_new())
            .await;
        assert!(matches!(result, Err(Error::FileAlreadyExists(_))));
    }

    #[tokio::test]
    async fn new_byte_channel_without_create_fails_if_target_is_missing() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, _| Ok(None));
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        match provider.new_byte_channel(&fs.path("file.txt"), OpenOptions::write()).await {
            Err(e) => assert!(e.is_no_such_file()),
            Ok(_) => panic!("expected NoSuchFile"),
        }
    }

    // copy with/without REPLACE_EXISTING.
    #[tokio::test]
    async fn copy_without_replace_existing_fails_if_target_exists() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, _| Ok(Some(blob("dst", 1))));
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        let err = provider.copy(&fs.path("src"), &fs.path("dst"), false).await.unwrap_err();
        assert!(matches!(err, Error::FileAlreadyExists(_)));
    }

    #[tokio::test]
    async fn copy_with_replace_existing_deletes_the_target_first() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, _| Ok(Some(blob("dst", 1))));
        client.expect_delete_blob().returning(|_, _| Ok(true));
        client.expect_copy_blob().returning(|_, _, _, _| Ok(()));
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        provider.copy(&fs.path("src"), &fs.path("dst"), true).await.unwrap();
    }

    #[tokio::test]
    async fn move_is_copy_then_delete_source() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, _| Ok(None));
        client.expect_copy_blob().returning(|_, _, _, _| Ok(()));
        client.expect_delete_blob().returning(|_, _| Ok(true));
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        provider.r#move(&fs.path("src"), &fs.path("dst"), false).await.unwrap();
    }

    #[tokio::test]
    async fn is_same_file_is_structural_path_equality() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();
        assert!(provider.is_same_file(&fs.path("a"), &fs.path("a")));
        assert!(!provider.is_same_file(&fs.path("a"), &fs.path("b")));
    }

    #[tokio::test]
    async fn is_hidden_is_true_for_a_dotfile() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();
        assert!(provider.is_hidden(&fs.path(".env")));
        assert!(!provider.is_hidden(&fs.path("env")));
    }

    // checkAccess.
    #[tokio::test]
    async fn check_access_denies_execute_mode_without_touching_the_backend() {
        let client = MockStorageClient::new();
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        let err = provider
            .check_access(&fs.path("file.txt"), &[AccessMode::Execute])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn check_access_read_and_write_require_the_path_to_resolve() {
        let mut client = MockStorageClient::new();
        client.expect_get_blob().returning(|_, k| {
            if k == "file.txt" {
                Ok(Some(blob("file.txt", 1)))
            } else {
                Ok(None)
            }
        });
        let provider = provider_with_bucket("b", client).await;
        let fs = provider.get_file_system("b").unwrap();

        provider
            .check_access(&fs.path("file.txt"), &[AccessMode::Read, AccessMode::Write])
            .await
            .unwrap();

        let err = provider.check_access(&fs.path("missing.txt"), &[AccessMode::Read]).await.unwrap_err();
        assert!(err.is_no_such_file());
    }
}
