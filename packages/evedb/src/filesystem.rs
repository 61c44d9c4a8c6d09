//! The filesystem actor.
//!
//! All durable I/O flows through one actor rooted at a directory.
//! Relative paths resolve against the root; absolute paths are honored
//! verbatim. The actor processes one request at a time, keeps cumulative
//! per-operation counters, and is never killed by a per-request failure.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use crate::actor::{self, AccountantHandle, Mailbox, Verbosity};
use crate::chunk::Chunk;
use crate::data::Data;
use crate::error::{Error, Result};

// ── Requests ───────────────────────────────────────────────────────

/// Messages accepted by the filesystem actor.
pub enum FsRequest {
    Write { path: PathBuf, chunk: Chunk, reply: Sender<Result<()>> },
    Read { path: PathBuf, reply: Sender<Result<Chunk>> },
    Mmap { path: PathBuf, reply: Sender<Result<Chunk>> },
    Check { path: PathBuf, reply: Sender<Result<bool>> },
    Erase { path: PathBuf, reply: Sender<Result<()>> },
    Status { verbosity: Verbosity, reply: Sender<Data> },
}

// ── Counters ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OpStats {
    successful: u64,
    failed: u64,
    bytes: u64,
}

impl OpStats {
    fn record<T>(&mut self, result: &Result<T>, bytes: u64) {
        match result {
            Ok(_) => {
                self.successful += 1;
                self.bytes += bytes;
            }
            Err(_) => self.failed += 1,
        }
    }

    fn to_record(self) -> Data {
        Data::Record(vec![
            ("successful".into(), Data::Count(self.successful)),
            ("failed".into(), Data::Count(self.failed)),
            ("bytes".into(), Data::Count(self.bytes)),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FsStats {
    checks: OpStats,
    writes: OpStats,
    reads: OpStats,
    mmaps: OpStats,
    erases: OpStats,
}

// ── State machine ──────────────────────────────────────────────────

/// Filesystem state, driven by one request at a time.
pub struct Filesystem {
    root: PathBuf,
    stats: FsStats,
    accountant: AccountantHandle,
}

impl Filesystem {
    pub fn new(root: PathBuf) -> Self {
        Self { root, stats: FsStats::default(), accountant: AccountantHandle::disabled() }
    }

    pub fn with_accountant(root: PathBuf, accountant: AccountantHandle) -> Self {
        Self { root, stats: FsStats::default(), accountant }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn handle(&mut self, request: FsRequest) {
        match request {
            FsRequest::Write { path, chunk, reply } => {
                let bytes = chunk.len() as u64;
                let result = self.write(&path, &chunk);
                self.stats.writes.record(&result, bytes);
                self.accountant
                    .tell("filesystem.writes", self.stats.writes.successful);
                let _ = reply.send(result);
            }
            FsRequest::Read { path, reply } => {
                let result = self.read(&path);
                let bytes = result.as_ref().map(|c| c.len() as u64).unwrap_or(0);
                self.stats.reads.record(&result, bytes);
                let _ = reply.send(result);
            }
            FsRequest::Mmap { path, reply } => {
                let result = self.mmap(&path);
                let bytes = result.as_ref().map(|c| c.len() as u64).unwrap_or(0);
                self.stats.mmaps.record(&result, bytes);
                let _ = reply.send(result);
            }
            FsRequest::Check { path, reply } => {
                let result = self.check(&path);
                self.stats.checks.record(&result, 0);
                let _ = reply.send(result);
            }
            FsRequest::Erase { path, reply } => {
                let result = self.erase(&path);
                self.stats.erases.record(&result, 0);
                let _ = reply.send(result);
            }
            FsRequest::Status { verbosity, reply } => {
                let _ = reply.send(self.status(verbosity));
            }
        }
    }

    fn write(&self, path: &Path, chunk: &Chunk) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, chunk.as_bytes())?;
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Chunk> {
        let target = self.resolve(path);
        match std::fs::read(&target) {
            Ok(bytes) => Ok(Chunk::from_vec(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NoSuchFile(target.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn mmap(&self, path: &Path) -> Result<Chunk> {
        Chunk::mmap(&self.resolve(path))
    }

    fn check(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve(path).exists())
    }

    fn erase(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path);
        let result = if target.is_dir() {
            std::fs::remove_dir_all(&target)
        } else {
            std::fs::remove_file(&target)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NoSuchFile(target.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn status(&self, verbosity: Verbosity) -> Data {
        let mut fields: Vec<(String, Data)> = vec![(
            "type".into(),
            Data::String("filesystem".into()),
        )];
        if verbosity >= Verbosity::Info {
            fields.push((
                "root".into(),
                Data::String(self.root.display().to_string()),
            ));
        }
        if verbosity >= Verbosity::Detailed {
            fields.push(("checks".into(), self.stats.checks.to_record()));
            fields.push(("writes".into(), self.stats.writes.to_record()));
            fields.push(("reads".into(), self.stats.reads.to_record()));
            fields.push(("mmaps".into(), self.stats.mmaps.to_record()));
            fields.push(("erases".into(), self.stats.erases.to_record()));
        }
        Data::Record(fields)
    }
}

// ── Actor handle ───────────────────────────────────────────────────

/// Blocking typed facade over the filesystem actor's mailbox.
#[derive(Debug, Clone)]
pub struct FsHandle {
    mailbox: Mailbox<FsRequest>,
}

impl FsHandle {
    /// Spawn a filesystem actor rooted at `root`.
    pub fn spawn(root: PathBuf) -> Self {
        Self::spawn_with_accountant(root, AccountantHandle::disabled())
    }

    pub fn spawn_with_accountant(root: PathBuf, accountant: AccountantHandle) -> Self {
        let mut fs = Filesystem::with_accountant(root, accountant);
        let mailbox = actor::spawn("filesystem", move |request| fs.handle(request));
        Self { mailbox }
    }

    pub fn write(&self, path: impl Into<PathBuf>, chunk: Chunk) -> Result<()> {
        actor::request(&self.mailbox, |reply| FsRequest::Write {
            path: path.into(),
            chunk,
            reply,
        })?
    }

    pub fn read(&self, path: impl Into<PathBuf>) -> Result<Chunk> {
        actor::request(&self.mailbox, |reply| FsRequest::Read { path: path.into(), reply })?
    }

    pub fn mmap(&self, path: impl Into<PathBuf>) -> Result<Chunk> {
        actor::request(&self.mailbox, |reply| FsRequest::Mmap { path: path.into(), reply })?
    }

    pub fn check(&self, path: impl Into<PathBuf>) -> Result<bool> {
        actor::request(&self.mailbox, |reply| FsRequest::Check { path: path.into(), reply })?
    }

    pub fn erase(&self, path: impl Into<PathBuf>) -> Result<()> {
        actor::request(&self.mailbox, |reply| FsRequest::Erase { path: path.into(), reply })?
    }

    pub fn status(&self, verbosity: Verbosity) -> Result<Data> {
        actor::request(&self.mailbox, |reply| FsRequest::Status { verbosity, reply })
    }
}
