//! Compressed token encoding used inside signature blobs.

use crate::Result;

/// Target table of a compressed `TypeDefOrRefOrSpec` token (ECMA-335 II.23.2.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodedTokenTable {
    /// A row in the `TypeDef` table of the current assembly.
    TypeDef,
    /// A row in the `TypeRef` table (a type in another scope).
    TypeRef,
    /// A row in the `TypeSpec` table (an instantiated or constructed type).
    TypeSpec,
}

/// A decoded `TypeDefOrRefOrSpec` token: table tag plus 1-based row id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodedToken {
    /// Which table the row id indexes.
    pub table: CodedTokenTable,
    /// 1-based row id.
    pub row: u32,
}

impl CodedToken {
    /// Decodes the compressed form: low two bits select the table, the rest is the row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for the unused tag value or a zero row id.
    pub fn from_compressed(encoded: u32) -> Result<CodedToken> {
        let table = match encoded & 0x3 {
            0 => CodedTokenTable::TypeDef,
            1 => CodedTokenTable::TypeRef,
            2 => CodedTokenTable::TypeSpec,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token tag - {}",
                    encoded & 0x3
                ))
            }
        };

        let row = encoded >> 2;
        if row == 0 {
            return Err(malformed_error!("Compressed token with zero row id"));
        }

        Ok(CodedToken { table, row })
    }
}
