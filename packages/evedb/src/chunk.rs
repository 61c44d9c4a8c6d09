//! Shared immutable byte buffers.
//!
//! A [`Chunk`] is a reference-counted view of bytes that either live on
//! the heap or are memory-mapped from a file. Clones are cheap; many
//! queries may hold the same chunk concurrently without locking.

use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};

enum Backing {
    Heap(Vec<u8>),
    Mapped(Mmap),
}

/// Reference-counted immutable bytes.
#[derive(Clone)]
pub struct Chunk(Arc<Backing>);

impl Chunk {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Backing::Heap(bytes)))
    }

    /// Memory-map a file read-only.
    pub fn mmap(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoSuchFile(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let map = unsafe { Mmap::map(&file) }?;
        Ok(Self(Arc::new(Backing::Mapped(map))))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &*self.0 {
            Backing::Heap(v) => v,
            Backing::Mapped(m) => m,
        }
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.0 {
            Backing::Heap(_) => "heap",
            Backing::Mapped(_) => "mapped",
        };
        write!(f, "Chunk({}, {} bytes)", kind, self.len())
    }
}
