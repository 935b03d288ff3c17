//! berth-fs — filesystem facade for ACL and environment-file code.
//!
//! Components that touch disk take an `Arc<dyn Fs>` instead of calling
//! `std::fs` directly, so tests can swap in [`RecordingFs`] and assert
//! on the exact sequence of operations without a real filesystem.

pub mod os;
pub mod recording;

use std::fmt::Debug;
use std::io::{self, Read, Seek, Write};
use std::path::Path;

pub use os::OsFs;
pub use recording::{FakeFile, RecordingFs};

/// An open file handle. Rewrites shrink the file with [`FsFile::truncate`]
/// after seeking back to the start.
pub trait FsFile: Read + Write + Seek + Send + Debug {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// Flags for [`Fs::open_file`], mirroring the usual open(2) subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

/// The filesystem operations the control plane needs.
///
/// Paths are passed through verbatim; implementations do not resolve or
/// normalize them.
pub trait Fs: Send + Sync {
    /// Create (or truncate) a file for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn FsFile>>;

    /// Open an existing file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn FsFile>>;

    /// Open with explicit flags and a unix permission mode.
    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> io::Result<Box<dyn FsFile>>;

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn remove_all(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Existence check. `ErrorKind::NotFound` when the path is absent.
    fn stat(&self, path: &Path) -> io::Result<()>;
}
