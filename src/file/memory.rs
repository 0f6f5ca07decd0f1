//! Owned in-memory backend.

use crate::file::Backend;

/// A [`Backend`] over a byte buffer that is already in memory.
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wraps `data` as a backend.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
