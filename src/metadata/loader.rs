//! Builds an [`AssemblyGraph`] from a loaded .NET PE file.
//!
//! One pass over the consumed tables produces the closed descriptor model: TypeDef
//! rows become [`TypeDesc`] entries, signature blobs become [`TypeSig`] trees with all
//! metadata tokens resolved to names, enum constants are attached from the Constant
//! table, and properties are derived from their SpecialName accessor pairs. Kind
//! classification follows the extends chain, the way reflection's `IsEnum` /
//! `IsValueType` checks bottom out.

use std::collections::HashMap;

use crate::{
    file::File,
    metadata::{
        descriptor::{
            AssemblyGraph, ConstantValue, FieldDesc, GraphBuilder, MethodDesc, ParamDesc,
            Primitive, PropertyDesc, TypeDesc, TypeKind, TypeName, TypeSig,
        },
        root::{Cor20Header, Root},
        signatures::{ELEMENT_TYPE, ParamSig, RawType, SignatureParser},
        streams::{Blob, Strings, TableId, TablesStream},
        tables::{FieldAttributes, MethodAttributes, TypeAttributes},
        token::{CodedToken, CodedTokenTable},
    },
    Result,
};

/// Upper bound on TypeSpec indirection while resolving signature tokens.
const MAX_TYPESPEC_DEPTH: usize = 16;

/// Loads the descriptor graph of `file`.
///
/// `fallback_name` is used as the assembly simple name when the image has no
/// `Assembly` table (pure module images).
///
/// # Errors
/// Returns an error if the metadata is malformed or uses unsupported features.
pub fn load_graph(file: &File, fallback_name: &str) -> Result<AssemblyGraph> {
    let (clr_rva, _clr_size) = file.clr();
    let cor20_offset = file.rva_to_offset(clr_rva as usize)?;
    let cor20 = Cor20Header::read(file.data_slice(cor20_offset, 72)?)?;
    if cor20.cb != 72 {
        tracing::debug!("unexpected cor20 header size {}", cor20.cb);
    }

    let meta_offset = file.rva_to_offset(cor20.metadata_rva as usize)?;
    let meta = file.data_slice(meta_offset, cor20.metadata_size as usize)?;
    let root = Root::read(meta)?;

    let tables = TablesStream::from(root.stream(meta, "#~")?)?;
    let strings = Strings::from(root.stream(meta, "#Strings")?)?;
    let blob = Blob::from(root.stream(meta, "#Blob")?)?;

    let loader = Loader::new(tables, strings, blob)?;
    loader.build(fallback_name)
}

struct Loader<'a> {
    tables: TablesStream<'a>,
    strings: Strings<'a>,
    blob: Blob<'a>,
    /// TypeDef rid of the enclosing type, for every nested TypeDef rid.
    enclosing: HashMap<u32, u32>,
    /// Generic parameter names per TypeDef rid, in ordinal order.
    type_generics: HashMap<u32, Vec<String>>,
    /// Generic parameter names per MethodDef rid, in ordinal order.
    method_generics: HashMap<u32, Vec<String>>,
    /// Constant rows keyed by owning Field rid.
    field_constants: HashMap<u32, (u8, u32)>,
}

impl<'a> Loader<'a> {
    fn new(tables: TablesStream<'a>, strings: Strings<'a>, blob: Blob<'a>) -> Result<Loader<'a>> {
        let mut enclosing = HashMap::new();
        for rid in 1..=tables.row_count(TableId::NestedClass) {
            let row = tables.nested_class(rid)?;
            enclosing.insert(row.nested_class, row.enclosing_class);
        }

        let mut type_generics: HashMap<u32, Vec<(u16, String)>> = HashMap::new();
        let mut method_generics: HashMap<u32, Vec<(u16, String)>> = HashMap::new();
        for rid in 1..=tables.row_count(TableId::GenericParam) {
            let row = tables.generic_param(rid)?;
            let name = strings.get(row.name as usize)?.to_string();
            match (row.owner.table, row.owner.row) {
                (Some(TableId::TypeDef), owner) => {
                    type_generics.entry(owner).or_default().push((row.number, name));
                }
                (Some(TableId::MethodDef), owner) => {
                    method_generics.entry(owner).or_default().push((row.number, name));
                }
                _ => {}
            }
        }
        let sort_by_ordinal = |map: HashMap<u32, Vec<(u16, String)>>| {
            map.into_iter()
                .map(|(owner, mut entries)| {
                    entries.sort_by_key(|(number, _)| *number);
                    (owner, entries.into_iter().map(|(_, name)| name).collect())
                })
                .collect::<HashMap<u32, Vec<String>>>()
        };

        let mut field_constants = HashMap::new();
        for rid in 1..=tables.row_count(TableId::Constant) {
            let row = tables.constant(rid)?;
            if row.parent.table == Some(TableId::Field) {
                field_constants.insert(row.parent.row, (row.element_type, row.value));
            }
        }

        Ok(Loader {
            tables,
            strings,
            blob,
            enclosing,
            type_generics: sort_by_ordinal(type_generics),
            method_generics: sort_by_ordinal(method_generics),
            field_constants,
        })
    }

    fn build(&self, fallback_name: &str) -> Result<AssemblyGraph> {
        let assembly_name = match self.tables.assembly()? {
            Some(row) => self.strings.get(row.name as usize)?.to_string(),
            None => fallback_name.to_string(),
        };

        let mut builder = GraphBuilder::new(&assembly_name);
        let type_count = self.tables.row_count(TableId::TypeDef);

        // TypeDef rid -> TypeId; the synthetic <Module> row is not a type.
        let mut rid_to_id = HashMap::new();
        for rid in 1..=type_count {
            let row = self.tables.type_def(rid)?;
            let name = self.strings.get(row.type_name as usize)?;
            if rid == 1 && name == "<Module>" {
                continue;
            }

            let namespace = self.strings.get(row.type_namespace as usize)?;
            let kind = self.classify(row.flags, &row.extends)?;

            let mut desc = TypeDesc::new(kind, namespace, name);
            desc.generic_params = self.type_generics.get(&rid).cloned().unwrap_or_default();
            if row.extends.row != 0 {
                desc.base = Some(self.resolve_coded_type(&row.extends.into_token()?, 0)?);
            }
            let id = builder.add_type(desc);
            rid_to_id.insert(rid, id);
        }

        for rid in 1..=type_count {
            let Some(&id) = rid_to_id.get(&rid) else {
                continue;
            };

            if let Some(&enclosing_rid) = self.enclosing.get(&rid) {
                builder.ty_mut(id).declaring = rid_to_id.get(&enclosing_rid).copied();
            }

            let row = self.tables.type_def(rid)?;
            let (field_end, method_end) = self.member_run_ends(rid, type_count)?;

            for field_rid in row.field_list.max(1)..field_end {
                if let Some(field) = self.load_field(field_rid)? {
                    builder.ty_mut(id).fields.push(field);
                }
            }

            let mut methods = Vec::new();
            let mut ctors = Vec::new();
            for method_rid in row.method_list.max(1)..method_end {
                if let Some(method) = self.load_method(method_rid)? {
                    if method.is_ctor {
                        ctors.push(method);
                    } else {
                        methods.push(method);
                    }
                }
            }
            builder.ty_mut(id).properties = derive_properties(&methods);
            builder.ty_mut(id).methods = methods;
            builder.ty_mut(id).ctors = ctors;
        }

        builder.finish()
    }

    /// End-of-run boundaries for fields and methods of TypeDef `rid` (the next row's
    /// list starts, or one past the table for the last row).
    fn member_run_ends(&self, rid: u32, type_count: u32) -> Result<(u32, u32)> {
        if rid == type_count {
            Ok((
                self.tables.row_count(TableId::Field) + 1,
                self.tables.row_count(TableId::MethodDef) + 1,
            ))
        } else {
            let next = self.tables.type_def(rid + 1)?;
            Ok((next.field_list, next.method_list))
        }
    }

    fn classify(
        &self,
        flags: u32,
        extends: &crate::metadata::streams::CodedIndex,
    ) -> Result<TypeKind> {
        let attributes = TypeAttributes::from_bits_truncate(flags);
        if attributes.contains(TypeAttributes::INTERFACE) {
            return Ok(TypeKind::Interface);
        }

        if extends.row != 0 {
            let base = self.coded_type_name(&extends.into_token()?, 0)?;
            if let Some(base_name) = base {
                match base_name.full_name().as_str() {
                    "System.Enum" => return Ok(TypeKind::Enum),
                    "System.ValueType" => return Ok(TypeKind::Struct),
                    "System.MulticastDelegate" | "System.Delegate" => {
                        return Ok(TypeKind::Delegate)
                    }
                    _ => {}
                }
            }
        }

        Ok(TypeKind::Class)
    }

    fn load_field(&self, rid: u32) -> Result<Option<FieldDesc>> {
        let row = self.tables.field(rid)?;
        let attributes = FieldAttributes::from_bits_truncate(row.flags);
        if (row.flags & FieldAttributes::FIELD_ACCESS_MASK.bits())
            != FieldAttributes::PUBLIC.bits()
        {
            return Ok(None);
        }

        let name = self.strings.get(row.name as usize)?.to_string();
        let sig_data = self.blob.get(row.signature as usize)?;
        let field_sig = SignatureParser::new(sig_data).parse_field_signature()?;
        let sig = self.resolve_raw(&field_sig.field_type, 0)?;

        let constant = match self.field_constants.get(&rid) {
            Some(&(element_type, value_index)) => {
                decode_constant(element_type, self.blob.get(value_index as usize)?)
            }
            None => None,
        };

        Ok(Some(FieldDesc {
            name,
            is_static: attributes.contains(FieldAttributes::STATIC),
            sig,
            constant,
        }))
    }

    fn load_method(&self, rid: u32) -> Result<Option<MethodDesc>> {
        let row = self.tables.method_def(rid)?;
        if (row.flags & MethodAttributes::MEMBER_ACCESS_MASK.bits())
            != MethodAttributes::PUBLIC.bits()
        {
            return Ok(None);
        }

        let attributes = MethodAttributes::from_bits_truncate(row.flags);
        let name = self.strings.get(row.name as usize)?.to_string();
        if name == ".cctor" {
            return Ok(None);
        }
        let is_ctor = name == ".ctor" && attributes.contains(MethodAttributes::RT_SPECIAL_NAME);

        let sig_data = self.blob.get(row.signature as usize)?;
        let method_sig = SignatureParser::new(sig_data).parse_method_signature()?;

        let param_names = self.param_names(rid, method_sig.params.len())?;
        let params = method_sig
            .params
            .iter()
            .zip(param_names)
            .map(|(param, param_name)| {
                Ok(ParamDesc {
                    name: param_name,
                    sig: self.resolve_param(param)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(MethodDesc {
            name,
            is_static: attributes.contains(MethodAttributes::STATIC),
            is_virtual: attributes.contains(MethodAttributes::VIRTUAL),
            is_final: attributes.contains(MethodAttributes::FINAL),
            is_private: false,
            is_ctor,
            generic_params: self.method_generics.get(&rid).cloned().unwrap_or_default(),
            return_type: self.resolve_param(&method_sig.return_type)?,
            params,
        }))
    }

    /// Parameter names for MethodDef `rid`, synthesizing `arg<N>` for gaps.
    fn param_names(&self, rid: u32, count: usize) -> Result<Vec<String>> {
        let row = self.tables.method_def(rid)?;
        let end = if rid == self.tables.row_count(TableId::MethodDef) {
            self.tables.row_count(TableId::Param) + 1
        } else {
            self.tables.method_def(rid + 1)?.param_list
        };

        let mut names = vec![None; count];
        for param_rid in row.param_list.max(1)..end {
            let param = self.tables.param(param_rid)?;
            // Sequence 0 describes the return value
            if param.sequence == 0 {
                continue;
            }
            let index = param.sequence as usize - 1;
            if index < count {
                let name = self.strings.get(param.name as usize)?;
                if !name.is_empty() {
                    names[index] = Some(name.to_string());
                }
            }
        }

        Ok(names
            .into_iter()
            .enumerate()
            .map(|(index, name)| name.unwrap_or_else(|| format!("arg{index}")))
            .collect())
    }

    fn resolve_param(&self, param: &ParamSig) -> Result<TypeSig> {
        let base = self.resolve_raw(&param.base, 0)?;
        if param.by_ref {
            Ok(TypeSig::ByRef(Box::new(base)))
        } else {
            Ok(base)
        }
    }

    /// Resolves a raw signature type into the named descriptor form.
    fn resolve_raw(&self, raw: &RawType, depth: usize) -> Result<TypeSig> {
        if depth > MAX_TYPESPEC_DEPTH {
            return Err(crate::Error::RecursionLimit(MAX_TYPESPEC_DEPTH));
        }

        Ok(match raw {
            RawType::Void => TypeSig::Void,
            RawType::Boolean => TypeSig::Primitive(Primitive::Boolean),
            RawType::Char => TypeSig::Primitive(Primitive::Char),
            RawType::I1 => TypeSig::Primitive(Primitive::SByte),
            RawType::U1 => TypeSig::Primitive(Primitive::Byte),
            RawType::I2 => TypeSig::Primitive(Primitive::Int16),
            RawType::U2 => TypeSig::Primitive(Primitive::UInt16),
            RawType::I4 => TypeSig::Primitive(Primitive::Int32),
            RawType::U4 => TypeSig::Primitive(Primitive::UInt32),
            RawType::I8 => TypeSig::Primitive(Primitive::Int64),
            RawType::U8 => TypeSig::Primitive(Primitive::UInt64),
            RawType::R4 => TypeSig::Primitive(Primitive::Single),
            RawType::R8 => TypeSig::Primitive(Primitive::Double),
            RawType::String => TypeSig::Primitive(Primitive::String),
            RawType::Object => TypeSig::Primitive(Primitive::Object),
            RawType::I => TypeSig::Unsupported("System.IntPtr".to_string()),
            RawType::U => TypeSig::Unsupported("System.UIntPtr".to_string()),
            RawType::TypedByRef => TypeSig::Unsupported("System.TypedReference".to_string()),
            RawType::FnPtr => TypeSig::Unsupported("fnptr".to_string()),
            RawType::Ptr(inner) => TypeSig::Ptr(Box::new(self.resolve_raw(inner, depth + 1)?)),
            RawType::ByRef(inner) => TypeSig::ByRef(Box::new(self.resolve_raw(inner, depth + 1)?)),
            RawType::SzArray(element) => {
                TypeSig::Array(Box::new(self.resolve_raw(element, depth + 1)?))
            }
            RawType::Array { element, .. } => {
                TypeSig::Array(Box::new(self.resolve_raw(element, depth + 1)?))
            }
            RawType::Var(index) => TypeSig::Var(*index),
            RawType::MVar(index) => TypeSig::MVar(*index),
            RawType::ValueType(token) | RawType::Class(token) => {
                self.resolve_coded_type(token, depth + 1)?
            }
            RawType::GenericInst { base, args } => TypeSig::GenericInst {
                base: Box::new(self.resolve_raw(base, depth + 1)?),
                args: args
                    .iter()
                    .map(|arg| self.resolve_raw(arg, depth + 1))
                    .collect::<Result<Vec<_>>>()?,
            },
        })
    }

    /// Resolves a `TypeDefOrRefOrSpec` token into a named (or nested-spec) TypeSig.
    fn resolve_coded_type(&self, token: &CodedToken, depth: usize) -> Result<TypeSig> {
        if depth > MAX_TYPESPEC_DEPTH {
            return Err(crate::Error::RecursionLimit(MAX_TYPESPEC_DEPTH));
        }

        if token.table == CodedTokenTable::TypeSpec {
            let sig_index = self.tables.type_spec(token.row)?;
            let raw = SignatureParser::new(self.blob.get(sig_index as usize)?)
                .parse_type_spec_signature()?;
            return self.resolve_raw(&raw, depth + 1);
        }

        match self.coded_type_name(token, depth)? {
            Some(name) => Ok(promote_primitive(name)),
            None => Err(malformed_error!(
                "Unresolvable type token {:?}/{}",
                token.table,
                token.row
            )),
        }
    }

    /// The [`TypeName`] behind a TypeDef or TypeRef token; `None` for TypeSpec tokens.
    fn coded_type_name(&self, token: &CodedToken, depth: usize) -> Result<Option<TypeName>> {
        if depth > MAX_TYPESPEC_DEPTH {
            return Err(crate::Error::RecursionLimit(MAX_TYPESPEC_DEPTH));
        }

        match token.table {
            CodedTokenTable::TypeDef => Ok(Some(self.type_def_name(token.row, 0)?)),
            CodedTokenTable::TypeRef => Ok(Some(self.type_ref_name(token.row, 0)?)),
            CodedTokenTable::TypeSpec => Ok(None),
        }
    }

    /// Name of TypeDef `rid`, joining the enclosing chain with `+`.
    fn type_def_name(&self, rid: u32, depth: usize) -> Result<TypeName> {
        if depth > MAX_TYPESPEC_DEPTH {
            return Err(crate::Error::RecursionLimit(MAX_TYPESPEC_DEPTH));
        }

        let row = self.tables.type_def(rid)?;
        let name = self.strings.get(row.type_name as usize)?;

        match self.enclosing.get(&rid) {
            Some(&enclosing_rid) => {
                let outer = self.type_def_name(enclosing_rid, depth + 1)?;
                Ok(TypeName {
                    assembly: None,
                    namespace: outer.namespace,
                    name: format!("{}+{}", outer.name, name),
                })
            }
            None => Ok(TypeName {
                assembly: None,
                namespace: self.strings.get(row.type_namespace as usize)?.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Name of TypeRef `rid`, resolving its scope to an owning assembly.
    fn type_ref_name(&self, rid: u32, depth: usize) -> Result<TypeName> {
        if depth > MAX_TYPESPEC_DEPTH {
            return Err(crate::Error::RecursionLimit(MAX_TYPESPEC_DEPTH));
        }

        let row = self.tables.type_ref(rid)?;
        let name = self.strings.get(row.type_name as usize)?;

        match row.resolution_scope.table {
            // Nested type: the scope is the enclosing TypeRef
            Some(TableId::TypeRef) => {
                let outer = self.type_ref_name(row.resolution_scope.row, depth + 1)?;
                Ok(TypeName {
                    assembly: outer.assembly,
                    namespace: outer.namespace,
                    name: format!("{}+{}", outer.name, name),
                })
            }
            Some(TableId::AssemblyRef) => {
                let assembly_row = self.tables.assembly_ref(row.resolution_scope.row)?;
                Ok(TypeName {
                    assembly: Some(self.strings.get(assembly_row.name as usize)?.to_string()),
                    namespace: self.strings.get(row.type_namespace as usize)?.to_string(),
                    name: name.to_string(),
                })
            }
            // Module / ModuleRef scopes stay within the current assembly
            _ => Ok(TypeName {
                assembly: None,
                namespace: self.strings.get(row.type_namespace as usize)?.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

/// Maps `System.*` named references onto the primitive table where applicable
/// (signatures reference `System.Decimal` and friends by token, not element type).
fn promote_primitive(name: TypeName) -> TypeSig {
    if name.namespace == "System" {
        let primitive = match name.name.as_str() {
            "Boolean" => Some(Primitive::Boolean),
            "Byte" => Some(Primitive::Byte),
            "SByte" => Some(Primitive::SByte),
            "UInt16" => Some(Primitive::UInt16),
            "Int16" => Some(Primitive::Int16),
            "UInt32" => Some(Primitive::UInt32),
            "Int32" => Some(Primitive::Int32),
            "UInt64" => Some(Primitive::UInt64),
            "Int64" => Some(Primitive::Int64),
            "Char" => Some(Primitive::Char),
            "String" => Some(Primitive::String),
            "Single" => Some(Primitive::Single),
            "Double" => Some(Primitive::Double),
            "Decimal" => Some(Primitive::Decimal),
            "Object" => Some(Primitive::Object),
            _ => None,
        };
        if let Some(primitive) = primitive {
            return TypeSig::Primitive(primitive);
        }
    }

    TypeSig::Named(name)
}

/// Decodes an integral Constant blob; non-integral constants yield `None`.
fn decode_constant(element_type: u8, data: &[u8]) -> Option<ConstantValue> {
    fn int_from<const N: usize>(data: &[u8], signed: bool) -> Option<i128> {
        let bytes: [u8; N] = data.get(..N)?.try_into().ok()?;
        let mut value = 0_i128;
        for (index, byte) in bytes.iter().enumerate() {
            value |= i128::from(*byte) << (8 * index);
        }
        if signed {
            let shift = 128 - 8 * N as u32;
            value = (value << shift) >> shift;
        }
        Some(value)
    }

    let value = match element_type {
        ELEMENT_TYPE::BOOLEAN | ELEMENT_TYPE::U1 => int_from::<1>(data, false),
        ELEMENT_TYPE::I1 => int_from::<1>(data, true),
        ELEMENT_TYPE::CHAR | ELEMENT_TYPE::U2 => int_from::<2>(data, false),
        ELEMENT_TYPE::I2 => int_from::<2>(data, true),
        ELEMENT_TYPE::U4 => int_from::<4>(data, false),
        ELEMENT_TYPE::I4 => int_from::<4>(data, true),
        ELEMENT_TYPE::U8 => int_from::<8>(data, false),
        ELEMENT_TYPE::I8 => int_from::<8>(data, true),
        _ => None,
    };

    value.map(ConstantValue)
}

/// Derives property descriptors from SpecialName `get_X` / `set_X` accessors.
fn derive_properties(methods: &[MethodDesc]) -> Vec<PropertyDesc> {
    let mut properties: Vec<PropertyDesc> = Vec::new();

    for method in methods {
        let (name, is_getter) = if let Some(rest) = method.name.strip_prefix("get_") {
            (rest, true)
        } else if let Some(rest) = method.name.strip_prefix("set_") {
            (rest, false)
        } else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let prop_type = if is_getter {
            method.return_type.clone()
        } else {
            match method.params.first() {
                Some(param) => param.sig.clone(),
                None => continue,
            }
        };

        match properties.iter_mut().find(|property| property.name == name) {
            Some(property) => {
                if is_getter {
                    property.has_getter = true;
                } else {
                    property.has_setter = true;
                }
            }
            None => properties.push(PropertyDesc {
                name: name.to_string(),
                prop_type,
                has_getter: is_getter,
                has_setter: !is_getter,
            }),
        }
    }

    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_decode_little_endian() {
        assert_eq!(
            decode_constant(ELEMENT_TYPE::I4, &[0x03, 0x00, 0x00, 0x00]),
            Some(ConstantValue(3))
        );
        assert_eq!(
            decode_constant(ELEMENT_TYPE::I4, &[0xFF, 0xFF, 0xFF, 0xFF]),
            Some(ConstantValue(-1))
        );
        assert_eq!(
            decode_constant(ELEMENT_TYPE::U8, &[0xFF; 8]),
            Some(ConstantValue(u64::MAX as i128))
        );
        assert_eq!(decode_constant(ELEMENT_TYPE::R4, &[0; 4]), None);
    }

    #[test]
    fn properties_pair_accessors() {
        let getter = MethodDesc {
            name: "get_Seconds".to_string(),
            is_static: false,
            is_virtual: false,
            is_final: false,
            is_private: false,
            is_ctor: false,
            generic_params: Vec::new(),
            return_type: TypeSig::Primitive(Primitive::UInt32),
            params: Vec::new(),
        };
        let mut setter = getter.clone();
        setter.name = "set_Seconds".to_string();
        setter.return_type = TypeSig::Void;
        setter.params = vec![ParamDesc {
            name: "value".to_string(),
            sig: TypeSig::Primitive(Primitive::UInt32),
        }];

        let properties = derive_properties(&[getter, setter]);
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].name, "Seconds");
        assert!(properties[0].has_getter && properties[0].has_setter);
        assert_eq!(
            properties[0].prop_type,
            TypeSig::Primitive(Primitive::UInt32)
        );
    }
}
