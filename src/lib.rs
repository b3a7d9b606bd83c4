//! A POSIX-style virtual filesystem adapter over a GCS-like object store.
//!
//! Client code parses `gs://<bucket>/<key>` URIs into [`path::GsPath`] values
//! through [`provider::FileSystemProvider`] and operates on them with
//! ordinary file verbs (open, read, write, copy, move, delete, list, stat)
//! without knowing the backend is a flat, prefix-indexed blob store. See
//! `SPEC_FULL.md` for the full component breakdown.
//!
//! This crate is a library: it never mounts anything onto the host OS — it
//! exposes an in-process path API only.

pub mod attrs;
pub mod backend;
pub mod channel;
pub mod dirstream;
pub mod error;
pub mod filesystem;
pub mod path;
pub mod provider;

pub use attrs::{Attributes, FileKind};
pub use channel::{ReadableByteChannel, WritableByteChannel};
pub use dirstream::{DirEntries, DirectoryFilter};
pub use error::{Error, Result};
pub use filesystem::GsFileSystem;
pub use path::GsPath;
pub use provider::{AccessMode, ByteChannel, FileSystemConfig, FileSystemProvider, OpenOptions};
