//! Sequential parser for metadata blobs and signature streams.
//!
//! [`Parser`] tracks a position inside a byte slice and exposes the primitive reads the
//! signature decoder needs: plain little-endian values, the ECMA-335 variable-length
//! compressed unsigned integers (II.23.2), and the compressed `TypeDefOrRefOrSpec`
//! token encoding used inside signatures.

use crate::{
    file::io::{self, CilIO},
    metadata::token::CodedToken,
    Result,
};

/// A forward-only reader over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// `true` while at least one unread byte remains.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current offset from the start of the underlying slice.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }
        Ok(self.data[self.position])
    }

    /// Skips a single byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn advance(&mut self) -> Result<()> {
        if self.position >= self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }
        self.position += 1;
        Ok(())
    }

    /// Reads a little-endian primitive and advances past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the read would exceed the data.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        io::read_le_at(self.data, &mut self.position)
    }

    /// Reads a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// The encoding uses 1, 2 or 4 bytes selected by the top bits of the first byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] past the end of the data or
    /// [`crate::Error::Malformed`] for an invalid length prefix.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Reads a compressed `TypeDefOrRefOrSpec` token (ECMA-335 II.23.2.8).
    ///
    /// The low two bits select the target table (`TypeDef`, `TypeRef`, `TypeSpec`); the
    /// remaining bits are the row id.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown table tag or a zero row id.
    pub fn read_compressed_token(&mut self) -> Result<CodedToken> {
        let encoded = self.read_compressed_uint()?;
        CodedToken::from_compressed(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::CodedTokenTable;

    #[test]
    fn compressed_uint_tiers() {
        // Examples from ECMA-335 II.23.2
        let mut parser = Parser::new(&[0x03]);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x03);

        let mut parser = Parser::new(&[0x80, 0x80]);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x80);

        let mut parser = Parser::new(&[0xC0, 0x00, 0x40, 0x00]);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x4000);
    }

    #[test]
    fn compressed_uint_invalid_prefix() {
        let mut parser = Parser::new(&[0xFF]);
        assert!(parser.read_compressed_uint().is_err());
    }

    #[test]
    fn compressed_token_tags() {
        // 0x49 = (18 << 2) | 1 -> TypeRef row 18 (the classic mscorlib System.Object shape)
        let mut parser = Parser::new(&[0x49]);
        let token = parser.read_compressed_token().unwrap();
        assert_eq!(token.table, CodedTokenTable::TypeRef);
        assert_eq!(token.row, 18);
    }
}
