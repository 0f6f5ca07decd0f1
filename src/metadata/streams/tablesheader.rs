//! The `#~` stream: metadata table directory and row access.
//!
//! The compressed tables stream starts with a header describing which tables are
//! present and how many rows each has. Column widths are not fixed: string/guid/blob
//! heap indexes are 2 or 4 bytes depending on heap size bits, table indexes widen when
//! the indexed table exceeds 64k rows, and coded indexes widen when any member table
//! is large enough that the row id no longer fits beside the tag bits. This module
//! computes those widths once, derives every table's row size, and locates each
//! present table so the row readers in [`crate::metadata::tables`] can seek directly.

use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    Result,
};

/// Identifiers for the metadata tables defined in ECMA-335 II.22.
///
/// The numeric values are the table ids as stored in the `valid` bitmask of the `#~`
/// stream header. Tables beyond `GenericParamConstraint` (portable PDB tables) are not
/// supported by this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TableId {
    /// `Module` (0x00)
    Module = 0x00,
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `FieldPtr` (0x03)
    FieldPtr = 0x03,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodPtr` (0x05)
    MethodPtr = 0x05,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `ParamPtr` (0x07)
    ParamPtr = 0x07,
    /// `Param` (0x08)
    Param = 0x08,
    /// `InterfaceImpl` (0x09)
    InterfaceImpl = 0x09,
    /// `MemberRef` (0x0A)
    MemberRef = 0x0A,
    /// `Constant` (0x0B)
    Constant = 0x0B,
    /// `CustomAttribute` (0x0C)
    CustomAttribute = 0x0C,
    /// `FieldMarshal` (0x0D)
    FieldMarshal = 0x0D,
    /// `DeclSecurity` (0x0E)
    DeclSecurity = 0x0E,
    /// `ClassLayout` (0x0F)
    ClassLayout = 0x0F,
    /// `FieldLayout` (0x10)
    FieldLayout = 0x10,
    /// `StandAloneSig` (0x11)
    StandAloneSig = 0x11,
    /// `EventMap` (0x12)
    EventMap = 0x12,
    /// `EventPtr` (0x13)
    EventPtr = 0x13,
    /// `Event` (0x14)
    Event = 0x14,
    /// `PropertyMap` (0x15)
    PropertyMap = 0x15,
    /// `PropertyPtr` (0x16)
    PropertyPtr = 0x16,
    /// `Property` (0x17)
    Property = 0x17,
    /// `MethodSemantics` (0x18)
    MethodSemantics = 0x18,
    /// `MethodImpl` (0x19)
    MethodImpl = 0x19,
    /// `ModuleRef` (0x1A)
    ModuleRef = 0x1A,
    /// `TypeSpec` (0x1B)
    TypeSpec = 0x1B,
    /// `ImplMap` (0x1C)
    ImplMap = 0x1C,
    /// `FieldRVA` (0x1D)
    FieldRVA = 0x1D,
    /// `ENCLog` (0x1E)
    ENCLog = 0x1E,
    /// `ENCMap` (0x1F)
    ENCMap = 0x1F,
    /// `Assembly` (0x20)
    Assembly = 0x20,
    /// `AssemblyProcessor` (0x21)
    AssemblyProcessor = 0x21,
    /// `AssemblyOS` (0x22)
    AssemblyOS = 0x22,
    /// `AssemblyRef` (0x23)
    AssemblyRef = 0x23,
    /// `AssemblyRefProcessor` (0x24)
    AssemblyRefProcessor = 0x24,
    /// `AssemblyRefOS` (0x25)
    AssemblyRefOS = 0x25,
    /// `File` (0x26)
    File = 0x26,
    /// `ExportedType` (0x27)
    ExportedType = 0x27,
    /// `ManifestResource` (0x28)
    ManifestResource = 0x28,
    /// `NestedClass` (0x29)
    NestedClass = 0x29,
    /// `GenericParam` (0x2A)
    GenericParam = 0x2A,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// `GenericParamConstraint` (0x2C)
    GenericParamConstraint = 0x2C,
}

/// Coded index families (ECMA-335 II.24.2.6): which tables share the index and how
/// many tag bits the encoding spends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodedIndexType {
    /// `TypeDef` / `TypeRef` / `TypeSpec`
    TypeDefOrRef,
    /// `Field` / `Param` / `Property`
    HasConstant,
    /// The 22-member custom attribute parent family
    HasCustomAttribute,
    /// `Field` / `Param`
    HasFieldMarshal,
    /// `TypeDef` / `MethodDef` / `Assembly`
    HasDeclSecurity,
    /// `TypeDef` / `TypeRef` / `ModuleRef` / `MethodDef` / `TypeSpec`
    MemberRefParent,
    /// `Event` / `Property`
    HasSemantics,
    /// `MethodDef` / `MemberRef`
    MethodDefOrRef,
    /// `Field` / `MethodDef`
    MemberForwarded,
    /// `File` / `AssemblyRef` / `ExportedType`
    Implementation,
    /// `MethodDef` / `MemberRef` (3 tag bits, tags 2 and 3)
    CustomAttributeType,
    /// `Module` / `ModuleRef` / `AssemblyRef` / `TypeRef`
    ResolutionScope,
    /// `TypeDef` / `MethodDef`
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Number of tag bits the encoding reserves.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            CodedIndexType::HasFieldMarshal
            | CodedIndexType::HasSemantics
            | CodedIndexType::MethodDefOrRef
            | CodedIndexType::MemberForwarded
            | CodedIndexType::TypeOrMethodDef => 1,
            CodedIndexType::TypeDefOrRef
            | CodedIndexType::HasConstant
            | CodedIndexType::HasDeclSecurity
            | CodedIndexType::Implementation
            | CodedIndexType::ResolutionScope => 2,
            CodedIndexType::MemberRefParent | CodedIndexType::CustomAttributeType => 3,
            CodedIndexType::HasCustomAttribute => 5,
        }
    }

    /// The member tables, ordered by tag value. `None` entries are unused tag slots.
    #[must_use]
    pub fn tables(self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexType::TypeDefOrRef => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexType::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexType::HasDeclSecurity => &[
                Some(TableId::TypeDef),
                Some(TableId::MethodDef),
                Some(TableId::Assembly),
            ],
            CodedIndexType::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(TableId::MethodDef), Some(TableId::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexType::Implementation => &[
                Some(TableId::File),
                Some(TableId::AssemblyRef),
                Some(TableId::ExportedType),
            ],
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
            ],
            CodedIndexType::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(TableId::TypeDef), Some(TableId::MethodDef)],
        }
    }
}

/// A decoded coded index: target table plus 1-based row id (0 = null reference).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodedIndex {
    /// Target table, `None` for a null reference or an unused tag slot.
    pub table: Option<TableId>,
    /// 1-based row id; 0 encodes a null reference.
    pub row: u32,
}

impl CodedIndex {
    /// Converts a `TypeDefOrRef` coded index into the signature token form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a null reference or a table outside the
    /// `TypeDefOrRef` family.
    pub fn into_token(self) -> Result<crate::metadata::token::CodedToken> {
        use crate::metadata::token::{CodedToken, CodedTokenTable};

        let table = match self.table {
            Some(TableId::TypeDef) => CodedTokenTable::TypeDef,
            Some(TableId::TypeRef) => CodedTokenTable::TypeRef,
            Some(TableId::TypeSpec) => CodedTokenTable::TypeSpec,
            other => {
                return Err(malformed_error!(
                    "Coded index {:?} is not a TypeDefOrRef reference",
                    other
                ))
            }
        };

        Ok(CodedToken {
            table,
            row: self.row,
        })
    }
}

bitflags::bitflags! {
    /// Heap size flags from the `#~` header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HeapSizes: u8 {
        /// `#Strings` indexes are 4 bytes wide.
        const WIDE_STRINGS = 0x01;
        /// `#GUID` indexes are 4 bytes wide.
        const WIDE_GUIDS = 0x02;
        /// `#Blob` indexes are 4 bytes wide.
        const WIDE_BLOBS = 0x04;
    }
}

/// Parsed `#~` stream: header, per-table row counts, and per-table data offsets.
pub struct TablesStream<'a> {
    data: &'a [u8],
    heap_sizes: HeapSizes,
    row_counts: [u32; TableId::COUNT],
    offsets: [usize; TableId::COUNT],
}

impl<'a> TablesStream<'a> {
    /// Parses the tables stream header and locates every present table.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if the image carries tables outside the
    /// supported range, or a parsing error for a truncated stream.
    pub fn from(data: &'a [u8]) -> Result<TablesStream<'a>> {
        let mut offset = 4; // reserved
        let _major = read_le_at::<u8>(data, &mut offset)?;
        let _minor = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = HeapSizes::from_bits_truncate(read_le_at::<u8>(data, &mut offset)?);
        offset += 1; // reserved
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let _sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> (TableId::GenericParamConstraint as u8 + 1) != 0 {
            return Err(crate::Error::NotSupported);
        }

        let mut row_counts = [0_u32; TableId::COUNT];
        for id in TableId::iter() {
            if valid & (1_u64 << (id as u8)) != 0 {
                row_counts[id as usize] = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        let mut stream = TablesStream {
            data,
            heap_sizes,
            row_counts,
            offsets: [0; TableId::COUNT],
        };

        for id in TableId::iter() {
            if stream.row_counts[id as usize] != 0 {
                stream.offsets[id as usize] = offset;
                let table_bytes = stream
                    .row_size(id)
                    .checked_mul(stream.row_counts[id as usize] as usize)
                    .ok_or(crate::Error::OutOfBounds)?;
                offset = offset
                    .checked_add(table_bytes)
                    .ok_or(crate::Error::OutOfBounds)?;
                if offset > data.len() {
                    return Err(crate::Error::OutOfBounds);
                }
            }
        }

        Ok(stream)
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts[table as usize]
    }

    /// `true` if `#Strings` indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_strings(&self) -> bool {
        self.heap_sizes.contains(HeapSizes::WIDE_STRINGS)
    }

    /// `true` if `#GUID` indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_guids(&self) -> bool {
        self.heap_sizes.contains(HeapSizes::WIDE_GUIDS)
    }

    /// `true` if `#Blob` indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_blobs(&self) -> bool {
        self.heap_sizes.contains(HeapSizes::WIDE_BLOBS)
    }

    /// `true` if plain indexes into `table` are 4 bytes wide.
    #[must_use]
    pub fn wide_table(&self, table: TableId) -> bool {
        self.row_counts[table as usize] > 0xFFFF
    }

    /// `true` if `coded` indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_coded(&self, coded: CodedIndexType) -> bool {
        let limit = 1_u32 << (16 - coded.bits());
        coded
            .tables()
            .iter()
            .flatten()
            .any(|&table| self.row_counts[table as usize] >= limit)
    }

    fn str_size(&self) -> usize {
        if self.wide_strings() {
            4
        } else {
            2
        }
    }

    fn guid_size(&self) -> usize {
        if self.wide_guids() {
            4
        } else {
            2
        }
    }

    fn blob_size(&self) -> usize {
        if self.wide_blobs() {
            4
        } else {
            2
        }
    }

    fn table_size(&self, table: TableId) -> usize {
        if self.wide_table(table) {
            4
        } else {
            2
        }
    }

    fn coded_size(&self, coded: CodedIndexType) -> usize {
        if self.wide_coded(coded) {
            4
        } else {
            2
        }
    }

    /// Size in bytes of one row of `table` (ECMA-335 II.22 column layouts).
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        let s = self.str_size();
        let g = self.guid_size();
        let b = self.blob_size();
        match table {
            TableId::Module => 2 + s + 3 * g,
            TableId::TypeRef => self.coded_size(CodedIndexType::ResolutionScope) + 2 * s,
            TableId::TypeDef => {
                4 + 2 * s
                    + self.coded_size(CodedIndexType::TypeDefOrRef)
                    + self.table_size(TableId::Field)
                    + self.table_size(TableId::MethodDef)
            }
            TableId::FieldPtr => self.table_size(TableId::Field),
            TableId::Field => 2 + s + b,
            TableId::MethodPtr => self.table_size(TableId::MethodDef),
            TableId::MethodDef => 8 + s + b + self.table_size(TableId::Param),
            TableId::ParamPtr => self.table_size(TableId::Param),
            TableId::Param => 4 + s,
            TableId::InterfaceImpl => {
                self.table_size(TableId::TypeDef) + self.coded_size(CodedIndexType::TypeDefOrRef)
            }
            TableId::MemberRef => self.coded_size(CodedIndexType::MemberRefParent) + s + b,
            TableId::Constant => 2 + self.coded_size(CodedIndexType::HasConstant) + b,
            TableId::CustomAttribute => {
                self.coded_size(CodedIndexType::HasCustomAttribute)
                    + self.coded_size(CodedIndexType::CustomAttributeType)
                    + b
            }
            TableId::FieldMarshal => self.coded_size(CodedIndexType::HasFieldMarshal) + b,
            TableId::DeclSecurity => 2 + self.coded_size(CodedIndexType::HasDeclSecurity) + b,
            TableId::ClassLayout => 6 + self.table_size(TableId::TypeDef),
            TableId::FieldLayout => 4 + self.table_size(TableId::Field),
            TableId::StandAloneSig | TableId::TypeSpec => b,
            TableId::EventMap => {
                self.table_size(TableId::TypeDef) + self.table_size(TableId::Event)
            }
            TableId::EventPtr => self.table_size(TableId::Event),
            TableId::Event => 2 + s + self.coded_size(CodedIndexType::TypeDefOrRef),
            TableId::PropertyMap => {
                self.table_size(TableId::TypeDef) + self.table_size(TableId::Property)
            }
            TableId::PropertyPtr => self.table_size(TableId::Property),
            TableId::Property => 2 + s + b,
            TableId::MethodSemantics => {
                2 + self.table_size(TableId::MethodDef)
                    + self.coded_size(CodedIndexType::HasSemantics)
            }
            TableId::MethodImpl => {
                self.table_size(TableId::TypeDef)
                    + 2 * self.coded_size(CodedIndexType::MethodDefOrRef)
            }
            TableId::ModuleRef => s,
            TableId::ImplMap => {
                2 + self.coded_size(CodedIndexType::MemberForwarded)
                    + s
                    + self.table_size(TableId::ModuleRef)
            }
            TableId::FieldRVA => 4 + self.table_size(TableId::Field),
            TableId::ENCLog => 8,
            TableId::ENCMap => 4,
            TableId::Assembly => 16 + b + 2 * s,
            TableId::AssemblyProcessor => 4,
            TableId::AssemblyOS => 12,
            TableId::AssemblyRef => 12 + 2 * b + 2 * s,
            TableId::AssemblyRefProcessor => 4 + self.table_size(TableId::AssemblyRef),
            TableId::AssemblyRefOS => 12 + self.table_size(TableId::AssemblyRef),
            TableId::File => 4 + s + b,
            TableId::ExportedType => {
                8 + 2 * s + self.coded_size(CodedIndexType::Implementation)
            }
            TableId::ManifestResource => 8 + s + self.coded_size(CodedIndexType::Implementation),
            TableId::NestedClass => 2 * self.table_size(TableId::TypeDef),
            TableId::GenericParam => {
                4 + self.coded_size(CodedIndexType::TypeOrMethodDef) + s
            }
            TableId::MethodSpec => self.coded_size(CodedIndexType::MethodDefOrRef) + b,
            TableId::GenericParamConstraint => {
                self.table_size(TableId::GenericParam)
                    + self.coded_size(CodedIndexType::TypeDefOrRef)
            }
        }
    }

    /// Returns the stream bytes of row `rid` (1-based) of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a zero, absent, or out-of-range row.
    pub fn row_data(&self, table: TableId, rid: u32) -> Result<&'a [u8]> {
        if rid == 0 || rid > self.row_counts[table as usize] {
            return Err(crate::Error::OutOfBounds);
        }

        let size = self.row_size(table);
        let start = self.offsets[table as usize] + (rid as usize - 1) * size;
        self.data
            .get(start..start + size)
            .ok_or(crate::Error::OutOfBounds)
    }

    /// Reads a heap index (string/blob/guid selected by the caller's `wide` decision).
    pub(crate) fn read_heap_index(
        &self,
        data: &[u8],
        offset: &mut usize,
        wide: bool,
    ) -> Result<u32> {
        read_le_at_dyn(data, offset, wide)
    }

    /// Reads and decodes a coded index column.
    pub(crate) fn read_coded_index(
        &self,
        data: &[u8],
        offset: &mut usize,
        coded: CodedIndexType,
    ) -> Result<CodedIndex> {
        let raw = read_le_at_dyn(data, offset, self.wide_coded(coded))?;
        let bits = coded.bits();
        let tag = (raw & ((1 << bits) - 1)) as usize;
        let row = raw >> bits;

        let table = match coded.tables().get(tag) {
            Some(slot) => *slot,
            None => {
                return Err(malformed_error!(
                    "Invalid coded index tag {} for {:?}",
                    tag,
                    coded
                ))
            }
        };

        Ok(CodedIndex {
            table: if row == 0 { None } else { table },
            row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_stream(valid: u64, counts: &[u32]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0_u32.to_le_bytes());
        data.push(2); // major
        data.push(0); // minor
        data.push(0); // heap sizes: all narrow
        data.push(1); // reserved
        data.extend_from_slice(&valid.to_le_bytes());
        data.extend_from_slice(&0_u64.to_le_bytes()); // sorted
        for count in counts {
            data.extend_from_slice(&count.to_le_bytes());
        }
        data
    }

    #[test]
    fn narrow_row_sizes() {
        let mut data = minimal_stream(0, &[]);
        data.extend_from_slice(&[0; 64]);
        let stream = TablesStream::from(&data).unwrap();
        // All heaps/tables narrow: TypeDef = 4 + 2+2 + 2 + 2 + 2
        assert_eq!(stream.row_size(TableId::TypeDef), 14);
        assert_eq!(stream.row_size(TableId::NestedClass), 4);
        assert_eq!(stream.row_size(TableId::Assembly), 16 + 2 + 4);
    }

    #[test]
    fn rejects_unsupported_tables() {
        // Bit 0x30 (Document, portable PDB) is outside the supported range
        let data = minimal_stream(1_u64 << 0x30, &[1]);
        assert!(matches!(
            TablesStream::from(&data),
            Err(crate::Error::NotSupported)
        ));
    }

    #[test]
    fn locates_rows() {
        // One TypeRef row (ResolutionScope narrow + two string indexes narrow = 6 bytes)
        let mut data = minimal_stream(1_u64 << (TableId::TypeRef as u8), &[1]);
        data.extend_from_slice(&[0x19, 0x00, 0x01, 0x00, 0x02, 0x00]);
        let stream = TablesStream::from(&data).unwrap();
        assert_eq!(stream.row_count(TableId::TypeRef), 1);
        let row = stream.row_data(TableId::TypeRef, 1).unwrap();
        assert_eq!(row.len(), 6);
        assert_eq!(row[0], 0x19);
        assert!(stream.row_data(TableId::TypeRef, 2).is_err());
    }
}
