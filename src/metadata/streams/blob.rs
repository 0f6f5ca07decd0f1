//! The `#Blob` heap: length-prefixed binary blobs (signatures, constant values, keys).

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// View over the `#Blob` heap.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wraps the raw heap bytes. The heap always starts with a null byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is empty or badly anchored.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// Returns the blob starting at `index`, without its compressed length prefix.
    ///
    /// # Errors
    /// Returns an error if the index or the encoded length exceeds the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index > self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        let skip = parser.pos();

        let Some(data_start) = index.checked_add(skip) else {
            return Err(OutOfBounds);
        };
        let Some(data_end) = data_start.checked_add(len) else {
            return Err(OutOfBounds);
        };
        if data_start > self.data.len() || data_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[data_start..data_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let data = [0x00, 0x03, 0x20, 0x00, 0x01, 0x02, 0x08];
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(1).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x08]);
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let data = [0x00, 0x10, 0x01];
        let blob = Blob::from(&data).unwrap();
        assert!(blob.get(1).is_err());
    }
}
