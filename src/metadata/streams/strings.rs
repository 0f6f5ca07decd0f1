//! The `#Strings` heap: null-terminated UTF-8 names referenced by metadata tables.

use std::{ffi::CStr, str};

use crate::{Error::OutOfBounds, Result};

/// View over the `#Strings` heap.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wraps the raw heap bytes. The heap always starts with a null byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is empty or badly anchored.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #Strings heap is empty"));
        }

        Ok(Strings { data })
    }

    /// Returns the string starting at `index`.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the data is not valid UTF-8.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index > self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => match result.to_str() {
                Ok(result) => Ok(result),
                Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
            },
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let data = b"\0Season\0Acme.Weather\0";
        let strings = Strings::from(data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "Season");
        assert_eq!(strings.get(8).unwrap(), "Acme.Weather");
    }

    #[test]
    fn rejects_unanchored_heap() {
        assert!(Strings::from(b"Season\0").is_err());
        assert!(Strings::from(b"").is_err());
    }
}
