//! Recording filesystem — in-memory files plus an action log.
//!
//! Every call is recorded as a stable action string so tests can assert
//! `fs.has_action("create /tmp/keydir/alice_key1.pub")` instead of
//! inspecting a real disk. File contents live in shared buffers, so a
//! write through one handle is visible to later opens.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{Fs, FsFile, OpenFlags};

type Buf = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct Inner {
    actions: Vec<String>,
    files: HashMap<PathBuf, Buf>,
    dirs: HashSet<PathBuf>,
}

/// In-memory filesystem that records every operation.
#[derive(Clone, Default)]
pub struct RecordingFs {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a file without recording an action.
    pub fn seed(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .files
            .insert(path.into(), Arc::new(Mutex::new(content.into())));
    }

    pub fn actions(&self) -> Vec<String> {
        self.inner.lock().unwrap().actions.clone()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.inner.lock().unwrap().actions.iter().any(|a| a == action)
    }

    /// Current content of a file, if it exists.
    pub fn file_bytes(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(path.as_ref())
            .map(|buf| buf.lock().unwrap().clone())
    }

    fn record(&self, action: String) {
        self.inner.lock().unwrap().actions.push(action);
    }
}

/// A file handle over a shared in-memory buffer.
#[derive(Debug)]
pub struct FakeFile {
    buf: Buf,
    pos: u64,
}

impl FakeFile {
    fn new(buf: Buf, pos: u64) -> Self {
        Self { buf, pos }
    }
}

impl Read for FakeFile {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let data = self.buf.lock().unwrap();
        let pos = self.pos as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = out.len().min(data.len() - pos);
        out[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for FakeFile {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let mut data = self.buf.lock().unwrap();
        let pos = self.pos as usize;
        if pos > data.len() {
            data.resize(pos, 0);
        }
        let end = pos + src.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(src);
        self.pos = end as u64;
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FakeFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buf.lock().unwrap().len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl FsFile for FakeFile {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.buf.lock().unwrap().resize(len as usize, 0);
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    )
}

impl Fs for RecordingFs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn FsFile>> {
        self.record(format!("create {}", path.display()));
        let buf: Buf = Arc::new(Mutex::new(Vec::new()));
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(path.to_path_buf(), buf.clone());
        Ok(Box::new(FakeFile::new(buf, 0)))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn FsFile>> {
        self.record(format!("open {}", path.display()));
        let inner = self.inner.lock().unwrap();
        match inner.files.get(path) {
            Some(buf) => Ok(Box::new(FakeFile::new(buf.clone(), 0))),
            None => Err(not_found(path)),
        }
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> io::Result<Box<dyn FsFile>> {
        self.record(format!("openfile {} with mode 0{:o}", path.display(), mode));
        let mut inner = self.inner.lock().unwrap();
        let buf = match inner.files.get(path) {
            Some(buf) => {
                if flags.truncate {
                    buf.lock().unwrap().clear();
                }
                buf.clone()
            }
            None if flags.create => {
                let buf: Buf = Arc::new(Mutex::new(Vec::new()));
                inner.files.insert(path.to_path_buf(), buf.clone());
                buf
            }
            None => return Err(not_found(path)),
        };
        let pos = if flags.append {
            buf.lock().unwrap().len() as u64
        } else {
            0
        };
        Ok(Box::new(FakeFile::new(buf, pos)))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.record(format!("mkdir {} with mode 0{:o}", path.display(), mode));
        self.inner.lock().unwrap().dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.record(format!("mkdirall {} with mode 0{:o}", path.display(), mode));
        self.inner.lock().unwrap().dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.record(format!("remove {}", path.display()));
        let mut inner = self.inner.lock().unwrap();
        if inner.files.remove(path).is_some() || inner.dirs.remove(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        self.record(format!("removeall {}", path.display()));
        let mut inner = self.inner.lock().unwrap();
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.record(format!("rename {} {}", from.display(), to.display()));
        let mut inner = self.inner.lock().unwrap();
        match inner.files.remove(from) {
            Some(buf) => {
                inner.files.insert(to.to_path_buf(), buf);
                Ok(())
            }
            None if inner.dirs.remove(from) => {
                inner.dirs.insert(to.to_path_buf());
                Ok(())
            }
            None => Err(not_found(from)),
        }
    }

    fn stat(&self, path: &Path) -> io::Result<()> {
        self.record(format!("stat {}", path.display()));
        let inner = self.inner.lock().unwrap();
        if inner.files.contains_key(path) || inner.dirs.contains(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }
}
