//! Pure, I/O-free path algebra for the `gs://` namespace.
//!
//! A [`GsPath`] is purely syntactic: constructing or manipulating one never
//! talks to a backend. The one exception is resolving a *textual* absolute
//! operand that may switch filesystem identity — that requires the
//! registry, so it lives on [`crate::provider::FileSystemProvider`] instead
//! of here.

use crate::filesystem::GsFileSystem;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::attrs::Attributes;

pub const SCHEME: &str = "gs";

/// An immutable path into the `gs://` namespace.
///
/// `fs` is `Some` iff the path is absolute; `segments[0]` is then the bucket
/// name and must equal `fs.bucket()` (or `fs` is the special `/` root
/// filesystem). A path with zero segments is the global root (`gs:///`). A
/// path with exactly one segment and `directory == true` is a bucket root.
#[derive(Clone)]
pub struct GsPath {
    fs: Option<Arc<GsFileSystem>>,
    segments: Vec<String>,
    directory: bool,
    /// Populated by a directory listing so a following `readAttributes` is
    /// zero-I/O; consumed (and cleared) on first read. Shared across clones
    /// on purpose — reading from any clone exhausts it for all of them.
    cached_attrs: Arc<Mutex<Option<Attributes>>>,
}

impl GsPath {
    pub(crate) fn new_absolute(fs: Arc<GsFileSystem>, segments: Vec<String>, directory: bool) -> Self {
        Self {
            fs: Some(fs),
            segments,
            directory,
            cached_attrs: Arc::new(Mutex::new(None)),
        }
    }

    pub fn new_relative(segments: Vec<String>, directory: bool) -> Self {
        Self {
            fs: None,
            segments,
            directory,
            cached_attrs: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn with_cached_attrs(mut self, attrs: Attributes) -> Self {
        self.cached_attrs = Arc::new(Mutex::new(Some(attrs)));
        self
    }

    /// Takes the cached attribute, clearing it, per `readAttributes` step 1.
    pub(crate) fn take_cached_attrs(&self) -> Option<Attributes> {
        self.cached_attrs.lock().unwrap().take()
    }

    pub fn is_absolute(&self) -> bool {
        self.fs.is_some()
    }

    pub fn filesystem(&self) -> Option<&Arc<GsFileSystem>> {
        self.fs.as_ref()
    }

    pub fn is_directory_hint(&self) -> bool {
        self.directory
    }

    pub fn is_global_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `true` iff this path denotes the root of its bucket (`/bucket/`).
    pub fn is_bucket_root(&self) -> bool {
        self.is_absolute() && self.segments.len() == 1 && self.directory
    }

    pub fn bucket(&self) -> Option<&str> {
        if self.is_absolute() {
            self.segments.first().map(String::as_str)
        } else {
            None
        }
    }

    /// The object key, i.e. the segments after the bucket, joined by `/`.
    /// Empty for the global root and for bucket roots.
    pub fn object_name(&self) -> String {
        self.key_segments().join("/")
    }

    fn key_segments(&self) -> &[String] {
        if self.is_absolute() {
            &self.segments[1.min(self.segments.len())..]
        } else {
            &self.segments[..]
        }
    }

    /// Number of name elements, excluding the bucket for absolute paths.
    pub fn name_count(&self) -> usize {
        self.key_segments().len()
    }

    pub fn get_root(&self) -> Option<GsPath> {
        let fs = self.fs.clone()?;
        let bucket = self.segments.first()?.clone();
        Some(GsPath::new_absolute(fs, vec![bucket], true))
    }

    pub fn get_file_name(&self) -> Option<GsPath> {
        let key = self.key_segments();
        let last = key.last()?.clone();
        Some(GsPath::new_relative(vec![last], self.directory))
    }

    /// `None` for a bucket root or for any relative path — this spec, unlike
    /// a general-purpose NIO path, defines relative paths as never having a
    /// parent (their eventual bucket isn't resolved yet).
    pub fn get_parent(&self) -> Option<GsPath> {
        if !self.is_absolute() || self.segments.len() < 2 {
            return None;
        }
        let fs = self.fs.clone().unwrap();
        let parent_segments = self.segments[..self.segments.len() - 1].to_vec();
        Some(GsPath::new_absolute(fs, parent_segments, true))
    }

    pub fn get_name(&self, index: usize) -> Option<GsPath> {
        self.subpath(index, index + 1)
    }

    /// `directory` hint of the result is `true` iff `end < name_count - 1`,
    /// i.e. the slice does not reach the final name element.
    pub fn subpath(&self, begin: usize, end: usize) -> Option<GsPath> {
        let key = self.key_segments();
        if begin >= end || end > key.len() {
            return None;
        }
        let directory = end < key.len().saturating_sub(1);
        let slice = key[begin..end].to_vec();
        Some(GsPath::new_relative(slice, directory))
    }

    /// Segment-wise prefix match (never a textual substring test).
    pub fn starts_with(&self, other: &GsPath) -> bool {
        if self.is_absolute() != other.is_absolute() {
            return false;
        }
        if self.is_absolute() {
            match (&self.fs, &other.fs) {
                (Some(a), Some(b)) if !Arc::ptr_eq(a, b) => return false,
                _ => {}
            }
        }
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Segment-wise suffix match. An absolute `other` can only "end" a path
    /// by being equal to it outright — a rooted path can't be a fragment in
    /// the middle of another.
    pub fn ends_with(&self, other: &GsPath) -> bool {
        if other.is_absolute() {
            return self == other;
        }
        let self_key = self.key_segments();
        let other_key = &other.segments[..];
        if other_key.len() > self_key.len() {
            return false;
        }
        self_key[self_key.len() - other_key.len()..] == *other_key
    }

    /// Resolves `.`/`..` segment-wise; clamps at the bucket boundary rather
    /// than escaping it.
    pub fn normalize(&self) -> GsPath {
        let mut out: Vec<String> = Vec::with_capacity(self.key_segments().len());
        for seg in self.key_segments() {
            match seg.as_str() {
                "." => {}
                ".." => {
                    out.pop();
                }
                _ => out.push(seg.clone()),
            }
        }
        match &self.fs {
            Some(fs) => {
                let mut segments = vec![self.segments[0].clone()];
                segments.extend(out);
                GsPath::new_absolute(fs.clone(), segments, self.directory)
            }
            None => GsPath::new_relative(out, self.directory),
        }
    }

    /// If `other` is absolute, returns `other`. Otherwise, concatenates
    /// `other`'s segments onto `self` and takes `other`'s directory hint.
    ///
    /// Resolving a textual operand that *may switch filesystem* (an operand
    /// beginning with `/`) is not handled here — see
    /// [`crate::provider::FileSystemProvider::resolve`].
    pub fn resolve(&self, other: &GsPath) -> GsPath {
        if other.is_absolute() {
            return other.clone();
        }
        if other.segments.is_empty() {
            return self.clone();
        }
        match &self.fs {
            Some(fs) => {
                let mut segments = self.segments.clone();
                segments.extend(other.segments.iter().cloned());
                GsPath::new_absolute(fs.clone(), segments, other.directory)
            }
            None => {
                let mut segments = self.segments.clone();
                segments.extend(other.segments.iter().cloned());
                GsPath::new_relative(segments, other.directory)
            }
        }
    }

    pub fn resolve_sibling(&self, other: &GsPath) -> GsPath {
        let base = self.get_parent().unwrap_or_else(|| match &self.fs {
            Some(fs) => GsPath::new_absolute(fs.clone(), vec![self.segments.first().cloned().unwrap_or_default()], true),
            None => GsPath::new_relative(vec![], true),
        });
        base.resolve(other)
    }

    /// Shortest relative path from `self` to `other`. Both must be absolute
    /// and share the same bucket.
    pub fn relativize(&self, other: &GsPath) -> Option<GsPath> {
        if !self.is_absolute() || !other.is_absolute() {
            return None;
        }
        if self.bucket() != other.bucket() {
            return None;
        }
        let a = self.key_segments();
        let b = other.key_segments();
        let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();

        let ups = a.len() - common;
        let mut segments: Vec<String> = std::iter::repeat("..".to_string()).take(ups).collect();
        segments.extend(b[common..].iter().cloned());
        Some(GsPath::new_relative(segments, other.directory))
    }

    /// Yields each key segment as a single-segment relative path;
    /// intermediate segments carry `directory = true`, the last carries this
    /// path's own directory hint.
    pub fn iter_segments(&self) -> impl Iterator<Item = GsPath> + '_ {
        let key = self.key_segments();
        let n = key.len();
        key.iter().enumerate().map(move |(i, seg)| {
            let directory = if i + 1 == n { self.directory } else { true };
            GsPath::new_relative(vec![seg.clone()], directory)
        })
    }

    /// `gs:/<path>` for absolute (single slash after the scheme — the
    /// authority is encoded as the first segment), `gs:<path>` for relative.
    /// Unlike the printable form, this preserves the directory hint as a
    /// trailing slash so that `parse(to_uri(p)) == p` round-trips.
    pub fn to_uri(&self) -> String {
        if self.is_absolute() {
            if self.is_global_root() {
                return "gs:///".to_string();
            }
            let mut s = format!("/{}", self.segments.join("/"));
            if self.directory && !s.ends_with('/') {
                s.push('/');
            }
            format!("gs:{}", s)
        } else {
            let mut s = self.segments.join("/");
            if self.directory && !s.is_empty() && !s.ends_with('/') {
                s.push('/');
            }
            format!("gs:{}", s)
        }
    }
}

impl PartialEq for GsPath {
    fn eq(&self, other: &Self) -> bool {
        let fs_eq = match (&self.fs, &other.fs) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        fs_eq && self.segments == other.segments && self.directory == other.directory
    }
}

impl Eq for GsPath {}

impl Hash for GsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.fs {
            Some(fs) => (Arc::as_ptr(fs) as usize).hash(state),
            None => 0usize.hash(state),
        }
        self.segments.hash(state);
        self.directory.hash(state);
    }
}

/// Lexicographic on the printable form. Deliberately *not* consistent with
/// `Eq`: `/bucket/foo` and `/bucket/foo/` compare equal here (same printable
/// form) while `eq` treats them as distinct (different directory hint) — the
/// spec calls this out explicitly rather than papering over it.
impl PartialOrd for GsPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GsPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// The printable form: `/bucket/key` (absolute) or `key` (relative), with
/// any trailing `/` removed — the directory hint stays internal.
impl fmt::Display for GsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute() {
            if self.is_global_root() {
                write!(f, "/")
            } else {
                write!(f, "/{}", self.segments.join("/"))
            }
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

impl fmt::Debug for GsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GsPath")
            .field("path", &self.to_string())
            .field("directory", &self.directory)
            .field("absolute", &self.is_absolute())
            .finish()
    }
}

/// Parses the segment list and directory hint out of a raw `/bucket/key/...`
/// or `key/...` string. Does not know about buckets or filesystems — callers
/// attach those.
pub(crate) fn split_segments(raw: &str) -> (Vec<String>, bool) {
    let directory = raw.ends_with('/') || raw.is_empty();
    let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        (vec![], directory)
    } else {
        (trimmed.split('/').map(str::to_string).collect(), directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockStorageClient;
    use crate::filesystem::GsFileSystem;
    use std::sync::Arc;

    fn fs(bucket: &str) -> Arc<GsFileSystem> {
        GsFileSystem::new(bucket.to_string(), Arc::new(MockStorageClient::new()), None, None)
    }

    fn abs(bucket: &str, key: &str) -> GsPath {
        fs(bucket).path(key)
    }

    // Path parsing table.
    #[test]
    fn parses_bucket_only_uri() {
        let p = abs("bucket", "");
        assert_eq!(p.to_string(), "/bucket");
        assert!(p.is_bucket_root());
    }

    #[test]
    fn trailing_slash_on_a_key_sets_the_directory_hint() {
        let p = abs("bucket", "a/b/c/");
        assert_eq!(p.to_string(), "/bucket/a/b/c");
        assert!(p.is_directory_hint());
        assert_eq!(p.name_count(), 3);
    }

    #[test]
    fn global_root_has_no_segments() {
        let fs = GsFileSystem::new_root(Arc::new(MockStorageClient::new()));
        let root = GsPath::new_absolute(fs, vec![], true);
        assert!(root.is_global_root());
        assert_eq!(root.to_string(), "/");
    }

    // Resolve.
    #[test]
    fn resolve_concatenates_a_relative_operand() {
        let base = abs("nxf-bucket", "some/path");
        let other = GsPath::new_relative(vec!["file-name.txt".to_string()], false);
        let resolved = base.resolve(&other);
        assert_eq!(resolved.to_string(), "/nxf-bucket/some/path/file-name.txt");
    }

    #[test]
    fn resolve_with_an_absolute_operand_switches_identity() {
        let base = abs("nxf-bucket", "data");
        let other = abs("other", "file");
        let resolved = base.resolve(&other);
        assert_eq!(resolved.to_string(), "/other/file");
    }

    // startsWith/endsWith.
    #[test]
    fn starts_with_is_segment_wise() {
        let f = fs("bucket");
        let p = f.path("some/data/file.txt");
        let prefix = f.path("some");
        assert!(p.starts_with(&prefix));
    }

    #[test]
    fn ends_with_relative_is_segment_wise() {
        let p = abs("bucket", "some/data/file.txt");
        let suffix = GsPath::new_relative(vec!["data".to_string(), "file.txt".to_string()], false);
        assert!(p.ends_with(&suffix));
    }

    #[test]
    fn ends_with_an_absolute_path_is_never_true_unless_equal() {
        let p = abs("bucket", "some/data/file.txt");
        let other = abs("data", "file.txt");
        assert!(!p.ends_with(&other));
    }

    // Invariant 1: URI round-trip.
    #[test]
    fn to_uri_round_trips_through_relative_paths() {
        let relative = GsPath::new_relative(vec!["a".to_string(), "b".to_string()], true);
        assert_eq!(relative.to_uri(), "gs:a/b/");
    }

    #[test]
    fn to_uri_round_trips_the_global_root() {
        let f = GsFileSystem::new_root(Arc::new(MockStorageClient::new()));
        let root = GsPath::new_absolute(f, vec![], true);
        assert_eq!(root.to_uri(), "gs:///");
    }

    // Invariant 2: normalize never grows nameCount.
    #[test]
    fn normalize_resolves_dot_and_dotdot_without_growing() {
        let p = abs("bucket", "a/./b/../c");
        let normalized = p.normalize();
        assert_eq!(normalized.to_string(), "/bucket/a/c");
        assert!(normalized.name_count() <= p.name_count());
    }

    #[test]
    fn normalize_clamps_at_the_bucket_boundary() {
        let p = abs("bucket", "../../a");
        let normalized = p.normalize();
        assert_eq!(normalized.to_string(), "/bucket/a");
    }

    // Invariant 3: resolve(relativize) round-trips under normalize.
    #[test]
    fn relativize_then_resolve_round_trips() {
        let f = fs("bucket");
        let base = f.path("some/path/");
        let other = f.path("some/path/file-name.txt");
        let rel = base.relativize(&other).expect("same bucket");
        let recombined = base.resolve(&rel).normalize();
        assert_eq!(recombined.to_string(), other.normalize().to_string());
    }

    #[test]
    fn relativize_across_buckets_is_none() {
        let a = abs("bucket-a", "x");
        let b = abs("bucket-b", "y");
        assert!(a.relativize(&b).is_none());
    }

    // Invariant 4: startsWith iff segment-prefix.
    #[test]
    fn starts_with_false_for_non_prefix_segments() {
        let f = fs("bucket");
        let p = f.path("some/data/file.txt");
        let not_prefix = f.path("other");
        assert!(!p.starts_with(&not_prefix));
    }

    // Invariant 5: iterator yields nameCount elements matching getName(i).
    #[test]
    fn iterator_yields_one_element_per_name() {
        let p = abs("bucket", "a/b/c");
        let collected: Vec<GsPath> = p.iter_segments().collect();
        assert_eq!(collected.len(), p.name_count());
        for (i, seg) in collected.iter().enumerate() {
            assert_eq!(seg.to_string(), p.get_name(i).unwrap().to_string());
        }
    }

    #[test]
    fn iterator_marks_all_but_the_last_segment_as_directories() {
        let p = abs("bucket", "a/b/c");
        let collected: Vec<GsPath> = p.iter_segments().collect();
        assert!(collected[0].is_directory_hint());
        assert!(collected[1].is_directory_hint());
        assert!(!collected[2].is_directory_hint());
    }

    #[test]
    fn directory_hint_does_not_affect_structural_equality_with_display() {
        // `/bucket/foo` and `/bucket/foo/` share a printable form but are not
        // `Eq` to one another — the directory hint is load-bearing.
        let file = abs("bucket", "foo");
        let dir = abs("bucket", "foo/");
        assert_eq!(file.to_string(), dir.to_string());
        assert_ne!(file, dir);
    }

    #[test]
    fn get_parent_of_a_bucket_root_is_none() {
        let root = abs("bucket", "");
        assert!(root.get_parent().is_none());
    }

    #[test]
    fn subpath_directory_hint_is_true_only_well_short_of_the_end() {
        let p = abs("bucket", "a/b/c");
        let first = p.subpath(0, 1).unwrap();
        assert!(first.is_directory_hint());
        let full = p.subpath(0, 3).unwrap();
        assert!(!full.is_directory_hint());
    }
}
