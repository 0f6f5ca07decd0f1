//! Memory-mapped file backend.

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{file::Backend, Result};

/// A [`Backend`] that memory-maps a file from disk.
///
/// The mapping stays alive for the lifetime of the backend, so all slices handed out by
/// [`Backend::data`] remain valid while the owning [`crate::file::File`] exists.
pub struct Physical {
    _file: fs::File,
    mmap: Mmap,
}

impl Physical {
    /// Opens and maps the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: &Path) -> Result<Physical> {
        let file = fs::File::open(path)?;

        // SAFETY: the file handle is kept alive alongside the mapping; the mapping is
        // never resized and only read.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Physical { _file: file, mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        &self.mmap
    }

    fn len(&self) -> usize {
        self.mmap.len()
    }
}
