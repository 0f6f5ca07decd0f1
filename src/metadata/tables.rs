//! Raw row readers for the metadata tables this generator consumes.
//!
//! Each reader decodes one row of a table into a plain struct, resolving nothing:
//! string/blob columns stay heap indexes and cross-table columns stay row ids, to be
//! resolved by the loader. Only the tables the binding generator actually needs are
//! given readers; the remaining tables are sized (for seeking) but never decoded.

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    metadata::streams::{CodedIndex, CodedIndexType, TableId, TablesStream},
    Result,
};

bitflags::bitflags! {
    /// `TypeAttributes` subset consumed by the generator.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Visibility mask.
        const VISIBILITY_MASK = 0x0000_0007;
        /// Type is an interface.
        const INTERFACE = 0x0000_0020;
        /// Type is abstract.
        const ABSTRACT = 0x0000_0080;
        /// Type is sealed.
        const SEALED = 0x0000_0100;
        /// Name is special (e.g. `<Module>`).
        const SPECIAL_NAME = 0x0000_0400;
    }
}

bitflags::bitflags! {
    /// `MethodAttributes` subset consumed by the generator.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Accessibility mask (low three bits).
        const MEMBER_ACCESS_MASK = 0x0007;
        /// Compiler-controlled accessibility.
        const PRIVATE = 0x0001;
        /// Public accessibility.
        const PUBLIC = 0x0006;
        /// Method is static.
        const STATIC = 0x0010;
        /// Method is final.
        const FINAL = 0x0020;
        /// Method is virtual.
        const VIRTUAL = 0x0040;
        /// Method name is special (`.ctor`, `get_`/`set_` accessors).
        const SPECIAL_NAME = 0x0800;
        /// Runtime special name (`.ctor`, `.cctor`).
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags::bitflags! {
    /// `FieldAttributes` subset consumed by the generator.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FieldAttributes: u16 {
        /// Accessibility mask (low three bits).
        const FIELD_ACCESS_MASK = 0x0007;
        /// Public accessibility.
        const PUBLIC = 0x0006;
        /// Field is static.
        const STATIC = 0x0010;
        /// Field is a compile-time literal (enum members).
        const LITERAL = 0x0040;
        /// Field name is special.
        const SPECIAL_NAME = 0x0200;
    }
}

/// One `TypeDef` row (0x02).
#[derive(Debug, Clone)]
pub struct TypeDefRow {
    /// `TypeAttributes` bitmask.
    pub flags: u32,
    /// Name (#Strings index).
    pub type_name: u32,
    /// Namespace (#Strings index).
    pub type_namespace: u32,
    /// Base type (`TypeDefOrRef` coded index, null for `<Module>` and interfaces).
    pub extends: CodedIndex,
    /// First owned row in the `Field` table.
    pub field_list: u32,
    /// First owned row in the `MethodDef` table.
    pub method_list: u32,
}

/// One `TypeRef` row (0x01).
#[derive(Debug, Clone)]
pub struct TypeRefRow {
    /// Owning scope (`ResolutionScope` coded index).
    pub resolution_scope: CodedIndex,
    /// Name (#Strings index).
    pub type_name: u32,
    /// Namespace (#Strings index).
    pub type_namespace: u32,
}

/// One `Field` row (0x04).
#[derive(Debug, Clone)]
pub struct FieldRow {
    /// `FieldAttributes` bitmask.
    pub flags: u16,
    /// Name (#Strings index).
    pub name: u32,
    /// Field signature (#Blob index).
    pub signature: u32,
}

/// One `MethodDef` row (0x06).
#[derive(Debug, Clone)]
pub struct MethodDefRow {
    /// Relative virtual address of the method body (0 for abstract).
    pub rva: u32,
    /// `MethodImplAttributes` bitmask.
    pub impl_flags: u16,
    /// `MethodAttributes` bitmask.
    pub flags: u16,
    /// Name (#Strings index).
    pub name: u32,
    /// Method signature (#Blob index).
    pub signature: u32,
    /// First owned row in the `Param` table.
    pub param_list: u32,
}

/// One `Param` row (0x08).
#[derive(Debug, Clone)]
pub struct ParamRow {
    /// `ParamAttributes` bitmask.
    pub flags: u16,
    /// 1-based parameter position; 0 is the return value.
    pub sequence: u16,
    /// Name (#Strings index).
    pub name: u32,
}

/// One `Constant` row (0x0B).
#[derive(Debug, Clone)]
pub struct ConstantRow {
    /// `ELEMENT_TYPE` of the constant value.
    pub element_type: u8,
    /// Owner (`HasConstant` coded index).
    pub parent: CodedIndex,
    /// Value bytes (#Blob index).
    pub value: u32,
}

/// One `NestedClass` row (0x29).
#[derive(Debug, Clone)]
pub struct NestedClassRow {
    /// The nested type (`TypeDef` row id).
    pub nested_class: u32,
    /// The enclosing type (`TypeDef` row id).
    pub enclosing_class: u32,
}

/// The single `Assembly` row (0x20).
#[derive(Debug, Clone)]
pub struct AssemblyRow {
    /// Version quad.
    pub version: (u16, u16, u16, u16),
    /// Simple name (#Strings index).
    pub name: u32,
    /// Culture (#Strings index, 0 for neutral).
    pub culture: u32,
}

/// One `AssemblyRef` row (0x23).
#[derive(Debug, Clone)]
pub struct AssemblyRefRow {
    /// Version quad.
    pub version: (u16, u16, u16, u16),
    /// Simple name (#Strings index).
    pub name: u32,
}

/// One `GenericParam` row (0x2A).
#[derive(Debug, Clone)]
pub struct GenericParamRow {
    /// Ordinal of the parameter, 0-based.
    pub number: u16,
    /// Owner (`TypeOrMethodDef` coded index).
    pub owner: CodedIndex,
    /// Name (#Strings index).
    pub name: u32,
}

impl<'a> TablesStream<'a> {
    /// Reads `TypeDef` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn type_def(&self, rid: u32) -> Result<TypeDefRow> {
        let data = self.row_data(TableId::TypeDef, rid)?;
        let mut offset = 0;
        Ok(TypeDefRow {
            flags: read_le_at::<u32>(data, &mut offset)?,
            type_name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            type_namespace: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            extends: self.read_coded_index(data, &mut offset, CodedIndexType::TypeDefOrRef)?,
            field_list: read_le_at_dyn(data, &mut offset, self.wide_table(TableId::Field))?,
            method_list: read_le_at_dyn(data, &mut offset, self.wide_table(TableId::MethodDef))?,
        })
    }

    /// Reads `TypeRef` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn type_ref(&self, rid: u32) -> Result<TypeRefRow> {
        let data = self.row_data(TableId::TypeRef, rid)?;
        let mut offset = 0;
        Ok(TypeRefRow {
            resolution_scope: self.read_coded_index(
                data,
                &mut offset,
                CodedIndexType::ResolutionScope,
            )?,
            type_name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            type_namespace: self.read_heap_index(data, &mut offset, self.wide_strings())?,
        })
    }

    /// Reads `Field` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn field(&self, rid: u32) -> Result<FieldRow> {
        let data = self.row_data(TableId::Field, rid)?;
        let mut offset = 0;
        Ok(FieldRow {
            flags: read_le_at::<u16>(data, &mut offset)?,
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            signature: self.read_heap_index(data, &mut offset, self.wide_blobs())?,
        })
    }

    /// Reads `MethodDef` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn method_def(&self, rid: u32) -> Result<MethodDefRow> {
        let data = self.row_data(TableId::MethodDef, rid)?;
        let mut offset = 0;
        Ok(MethodDefRow {
            rva: read_le_at::<u32>(data, &mut offset)?,
            impl_flags: read_le_at::<u16>(data, &mut offset)?,
            flags: read_le_at::<u16>(data, &mut offset)?,
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            signature: self.read_heap_index(data, &mut offset, self.wide_blobs())?,
            param_list: read_le_at_dyn(data, &mut offset, self.wide_table(TableId::Param))?,
        })
    }

    /// Reads `Param` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn param(&self, rid: u32) -> Result<ParamRow> {
        let data = self.row_data(TableId::Param, rid)?;
        let mut offset = 0;
        Ok(ParamRow {
            flags: read_le_at::<u16>(data, &mut offset)?,
            sequence: read_le_at::<u16>(data, &mut offset)?,
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
        })
    }

    /// Reads `Constant` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn constant(&self, rid: u32) -> Result<ConstantRow> {
        let data = self.row_data(TableId::Constant, rid)?;
        let mut offset = 0;
        let element_type = read_le_at::<u8>(data, &mut offset)?;
        let _padding = read_le_at::<u8>(data, &mut offset)?;
        Ok(ConstantRow {
            element_type,
            parent: self.read_coded_index(data, &mut offset, CodedIndexType::HasConstant)?,
            value: self.read_heap_index(data, &mut offset, self.wide_blobs())?,
        })
    }

    /// Reads `NestedClass` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn nested_class(&self, rid: u32) -> Result<NestedClassRow> {
        let data = self.row_data(TableId::NestedClass, rid)?;
        let mut offset = 0;
        Ok(NestedClassRow {
            nested_class: read_le_at_dyn(data, &mut offset, self.wide_table(TableId::TypeDef))?,
            enclosing_class: read_le_at_dyn(data, &mut offset, self.wide_table(TableId::TypeDef))?,
        })
    }

    /// Reads the `TypeSpec` signature blob index of row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn type_spec(&self, rid: u32) -> Result<u32> {
        let data = self.row_data(TableId::TypeSpec, rid)?;
        let mut offset = 0;
        self.read_heap_index(data, &mut offset, self.wide_blobs())
    }

    /// Reads the single `Assembly` row, if present.
    ///
    /// # Errors
    /// Returns an error for truncated data.
    pub fn assembly(&self) -> Result<Option<AssemblyRow>> {
        if self.row_count(TableId::Assembly) == 0 {
            return Ok(None);
        }

        let data = self.row_data(TableId::Assembly, 1)?;
        let mut offset = 4; // hash algorithm id
        let major = read_le_at::<u16>(data, &mut offset)?;
        let minor = read_le_at::<u16>(data, &mut offset)?;
        let build = read_le_at::<u16>(data, &mut offset)?;
        let revision = read_le_at::<u16>(data, &mut offset)?;
        let _flags = read_le_at::<u32>(data, &mut offset)?;
        let _public_key = self.read_heap_index(data, &mut offset, self.wide_blobs())?;
        Ok(Some(AssemblyRow {
            version: (major, minor, build, revision),
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
            culture: self.read_heap_index(data, &mut offset, self.wide_strings())?,
        }))
    }

    /// Reads `AssemblyRef` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn assembly_ref(&self, rid: u32) -> Result<AssemblyRefRow> {
        let data = self.row_data(TableId::AssemblyRef, rid)?;
        let mut offset = 0;
        let major = read_le_at::<u16>(data, &mut offset)?;
        let minor = read_le_at::<u16>(data, &mut offset)?;
        let build = read_le_at::<u16>(data, &mut offset)?;
        let revision = read_le_at::<u16>(data, &mut offset)?;
        let _flags = read_le_at::<u32>(data, &mut offset)?;
        let _public_key_or_token = self.read_heap_index(data, &mut offset, self.wide_blobs())?;
        Ok(AssemblyRefRow {
            version: (major, minor, build, revision),
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
        })
    }

    /// Reads `GenericParam` row `rid`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range row or truncated data.
    pub fn generic_param(&self, rid: u32) -> Result<GenericParamRow> {
        let data = self.row_data(TableId::GenericParam, rid)?;
        let mut offset = 0;
        let number = read_le_at::<u16>(data, &mut offset)?;
        let _flags = read_le_at::<u16>(data, &mut offset)?;
        Ok(GenericParamRow {
            number,
            owner: self.read_coded_index(data, &mut offset, CodedIndexType::TypeOrMethodDef)?,
            name: self.read_heap_index(data, &mut offset, self.wide_strings())?,
        })
    }
}
