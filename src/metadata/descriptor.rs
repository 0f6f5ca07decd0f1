//! The type descriptor model consumed by the code generator.
//!
//! The generator never touches raw metadata rows: the loader turns an assembly into an
//! [`AssemblyGraph`] of [`TypeDesc`] entries once, and everything downstream pattern
//! matches on the closed [`TypeKind`] / [`TypeSig`] unions. Derived per-type facts the
//! emitters need repeatedly (nested-type lists, target module name, module-relative
//! qualified name) are precomputed and stored on the descriptor itself instead of in
//! side tables keyed by identity.

use std::collections::HashMap;

use crate::Result;

/// Index of a type within its [`AssemblyGraph`].
pub type TypeId = usize;

/// The fixed set of scalar primitives with dedicated target spellings and box kinds.
///
/// A closed 15-entry table; every other type goes through the named-reference or
/// unsupported paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `System.Boolean`
    Boolean,
    /// `System.Byte`
    Byte,
    /// `System.SByte`
    SByte,
    /// `System.UInt16`
    UInt16,
    /// `System.Int16`
    Int16,
    /// `System.UInt32`
    UInt32,
    /// `System.Int32`
    Int32,
    /// `System.UInt64`
    UInt64,
    /// `System.Int64`
    Int64,
    /// `System.Char`
    Char,
    /// `System.String`
    String,
    /// `System.Single`
    Single,
    /// `System.Double`
    Double,
    /// `System.Decimal`
    Decimal,
    /// `System.Object`
    Object,
}

impl Primitive {
    /// The CLR short name, as used in `PrimitiveType.*` box kinds and TypeSpec names.
    #[must_use]
    pub fn clr_name(self) -> &'static str {
        match self {
            Primitive::Boolean => "Boolean",
            Primitive::Byte => "Byte",
            Primitive::SByte => "SByte",
            Primitive::UInt16 => "UInt16",
            Primitive::Int16 => "Int16",
            Primitive::UInt32 => "UInt32",
            Primitive::Int32 => "Int32",
            Primitive::UInt64 => "UInt64",
            Primitive::Int64 => "Int64",
            Primitive::Char => "Char",
            Primitive::String => "String",
            Primitive::Single => "Single",
            Primitive::Double => "Double",
            Primitive::Decimal => "Decimal",
            Primitive::Object => "Object",
        }
    }

    /// The fully qualified CLR name (`System.` + short name).
    #[must_use]
    pub fn clr_full_name(self) -> String {
        format!("System.{}", self.clr_name())
    }
}

/// The kind of a defined type, derived from metadata flags and the extends chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// Value type extending `System.Enum`.
    Enum,
    /// Value type extending `System.ValueType`.
    Struct,
    /// Interface.
    Interface,
    /// Class extending `System.Delegate` / `System.MulticastDelegate`.
    Delegate,
    /// Any other reference type.
    Class,
}

/// A name-resolved reference to a type defined somewhere (this assembly or another).
///
/// Nested type names use the reflection `+` separator (`Ns.Outer+Inner`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeName {
    /// Owning assembly simple name; `None` for the current assembly.
    pub assembly: Option<String>,
    /// Namespace, possibly empty.
    pub namespace: String,
    /// Type name, including `+`-joined enclosing names for nested types.
    pub name: String,
}

impl TypeName {
    /// Reflection-style full name (`Namespace.Name` or bare `Name`).
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A type reference as it appears in member signatures, fully name-resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// `void`; valid only as a return type.
    Void,
    /// One of the fixed scalar primitives.
    Primitive(Primitive),
    /// A named class / struct / enum / interface / delegate reference.
    Named(TypeName),
    /// Generic parameter of the declaring type, by ordinal.
    Var(u32),
    /// Generic parameter of the declaring method, by ordinal.
    MVar(u32),
    /// Single- or multi-dimensional array of the element type.
    Array(Box<TypeSig>),
    /// Managed by-reference (`ref` / `out`).
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer.
    Ptr(Box<TypeSig>),
    /// Instantiated generic type.
    GenericInst {
        /// The open named type.
        base: Box<TypeSig>,
        /// Type arguments in declaration order.
        args: Vec<TypeSig>,
    },
    /// A shape the generator defers (function pointers, typed references, native ints).
    /// Carries the original name for diagnosability.
    Unsupported(String),
}

impl TypeSig {
    /// A display name preserving the original CLR spelling, used in placeholder tags
    /// and comments.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            TypeSig::Void => "System.Void".to_string(),
            TypeSig::Primitive(primitive) => primitive.clr_full_name(),
            TypeSig::Named(name) => name.full_name(),
            TypeSig::Var(index) => format!("!{index}"),
            TypeSig::MVar(index) => format!("!!{index}"),
            TypeSig::Array(element) => format!("{}[]", element.display_name()),
            TypeSig::ByRef(inner) => format!("{}&", inner.display_name()),
            TypeSig::Ptr(inner) => format!("{}*", inner.display_name()),
            TypeSig::GenericInst { base, args } => {
                let rendered: Vec<String> =
                    args.iter().map(TypeSig::display_name).collect();
                format!("{}<{}>", base.display_name(), rendered.join(","))
            }
            TypeSig::Unsupported(name) => name.clone(),
        }
    }
}

/// An integral constant attached to a field (enum members).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstantValue(
    /// The raw value, wide enough for every integral underlying type.
    pub i128,
);

impl std::fmt::Display for ConstantValue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A field declared by a type.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    /// Field name.
    pub name: String,
    /// `true` for static fields.
    pub is_static: bool,
    /// The field's type.
    pub sig: TypeSig,
    /// Compile-time constant value, for literal fields (enum members).
    pub constant: Option<ConstantValue>,
}

/// A parameter of a method or constructor.
#[derive(Clone, Debug)]
pub struct ParamDesc {
    /// Parameter name (synthesized `arg<N>` if absent from metadata).
    pub name: String,
    /// The parameter's type. By-ref parameters carry [`TypeSig::ByRef`].
    pub sig: TypeSig,
}

/// A method or constructor declared by a type.
///
/// Metadata member runs only ever contain members the type itself declares, which is
/// what keeps inherited members from producing duplicate symbols downstream.
#[derive(Clone, Debug)]
pub struct MethodDesc {
    /// Member name (`.ctor` for constructors).
    pub name: String,
    /// `true` for static methods.
    pub is_static: bool,
    /// `true` for virtual methods (including overrides).
    pub is_virtual: bool,
    /// `true` for final methods.
    pub is_final: bool,
    /// `true` for private methods.
    pub is_private: bool,
    /// `true` for constructors.
    pub is_ctor: bool,
    /// Names of generic parameters the method itself declares, in ordinal order.
    pub generic_params: Vec<String>,
    /// Return type ([`TypeSig::Void`] for `void`).
    pub return_type: TypeSig,
    /// Parameters in declaration order.
    pub params: Vec<ParamDesc>,
}

/// A property derived from its `get_X` / `set_X` accessor pair.
#[derive(Clone, Debug)]
pub struct PropertyDesc {
    /// Property name (accessor name without the prefix).
    pub name: String,
    /// The property type (the getter's return or the setter's value parameter).
    pub prop_type: TypeSig,
    /// `true` when a getter exists.
    pub has_getter: bool,
    /// `true` when a setter exists.
    pub has_setter: bool,
}

/// One type of the assembly, with everything the emitters need precomputed.
#[derive(Clone, Debug)]
pub struct TypeDesc {
    /// Metadata name, e.g. `Season` or `List`1`.
    pub name: String,
    /// Metadata namespace; empty for nested and global types.
    pub namespace: String,
    /// Reflection-style full name (`Ns.Outer+Inner`), filled by [`GraphBuilder::finish`].
    pub full_name: String,
    /// What kind of type this is.
    pub kind: TypeKind,
    /// Enclosing type for nested types.
    pub declaring: Option<TypeId>,
    /// Base type reference; `None` for interfaces and `System.Object` itself.
    pub base: Option<TypeSig>,
    /// All generic parameter names in ordinal order, including those inherited from
    /// enclosing types (metadata stores the accumulated list).
    pub generic_params: Vec<String>,
    /// Public fields the type declares.
    pub fields: Vec<FieldDesc>,
    /// Public non-constructor methods the type declares.
    pub methods: Vec<MethodDesc>,
    /// Public instance constructors the type declares.
    pub ctors: Vec<MethodDesc>,
    /// Properties derived from accessor pairs.
    pub properties: Vec<PropertyDesc>,
    /// Directly nested types, filled by [`GraphBuilder::finish`].
    pub nested: Vec<TypeId>,
    /// Target module name (`package.Name.Space`), filled before generation.
    pub module_name: String,
    /// Sanitized module-relative name (`Outer.Inner`), filled before generation.
    pub qualified_name: String,
}

impl TypeDesc {
    /// Creates a descriptor with the given identity and no members; callers fill the
    /// member lists directly.
    #[must_use]
    pub fn new(kind: TypeKind, namespace: &str, name: &str) -> TypeDesc {
        TypeDesc {
            name: name.to_string(),
            namespace: namespace.to_string(),
            full_name: String::new(),
            kind,
            declaring: None,
            base: None,
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
            properties: Vec::new(),
            nested: Vec::new(),
            module_name: String::new(),
            qualified_name: String::new(),
        }
    }
}

/// All types of one assembly, plus its identity.
#[derive(Debug)]
pub struct AssemblyGraph {
    /// Simple assembly name (the `Assembly` table name, or the file stem).
    pub name: String,
    /// All types; [`TypeId`] indexes into this.
    pub types: Vec<TypeDesc>,
    by_full_name: HashMap<String, TypeId>,
}

impl AssemblyGraph {
    /// Looks a type up by its reflection-style full name.
    #[must_use]
    pub fn find(&self, full_name: &str) -> Option<TypeId> {
        self.by_full_name.get(full_name).copied()
    }

    /// The descriptor for `id`.
    #[must_use]
    pub fn ty(&self, id: TypeId) -> &TypeDesc {
        &self.types[id]
    }

    /// Iterates over all top-level (non-nested) types in declaration order.
    pub fn root_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).filter(|&id| self.types[id].declaring.is_none())
    }
}

/// Builder for [`AssemblyGraph`]: collects descriptors, then derives full names,
/// nested-type lists and the lookup index in one pass.
pub struct GraphBuilder {
    name: String,
    types: Vec<TypeDesc>,
}

impl GraphBuilder {
    /// Starts a builder for the assembly `name`.
    #[must_use]
    pub fn new(name: &str) -> GraphBuilder {
        GraphBuilder {
            name: name.to_string(),
            types: Vec::new(),
        }
    }

    /// Adds a descriptor and returns its id.
    pub fn add_type(&mut self, desc: TypeDesc) -> TypeId {
        self.types.push(desc);
        self.types.len() - 1
    }

    /// Mutable access to a previously added descriptor.
    pub fn ty_mut(&mut self, id: TypeId) -> &mut TypeDesc {
        &mut self.types[id]
    }

    /// Number of types added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// `true` when no types have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Derives full names and nested lists, then freezes the graph.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if a declaring-type chain is cyclic.
    pub fn finish(mut self) -> Result<AssemblyGraph> {
        // Full names first: nested names depend on the enclosing chain.
        let mut full_names: Vec<Option<String>> = vec![None; self.types.len()];
        for id in 0..self.types.len() {
            Self::full_name_of(&self.types, &mut full_names, id, 0)?;
        }
        for (id, full_name) in full_names.into_iter().enumerate() {
            if let Some(full_name) = full_name {
                self.types[id].full_name = full_name;
            }
        }

        // Nested lists in declaration order.
        for id in 0..self.types.len() {
            if let Some(parent) = self.types[id].declaring {
                self.types[parent].nested.push(id);
            }
        }

        let mut by_full_name = HashMap::with_capacity(self.types.len());
        for (id, desc) in self.types.iter().enumerate() {
            by_full_name.insert(desc.full_name.clone(), id);
        }

        Ok(AssemblyGraph {
            name: self.name,
            types: self.types,
            by_full_name,
        })
    }

    fn full_name_of(
        types: &[TypeDesc],
        cache: &mut Vec<Option<String>>,
        id: TypeId,
        depth: usize,
    ) -> Result<String> {
        if let Some(cached) = &cache[id] {
            return Ok(cached.clone());
        }
        if depth > types.len() {
            return Err(crate::Error::Invariant(format!(
                "cyclic declaring-type chain at '{}'",
                types[id].name
            )));
        }

        let desc = &types[id];
        let full_name = match desc.declaring {
            Some(parent) => format!(
                "{}+{}",
                Self::full_name_of(types, cache, parent, depth + 1)?,
                desc.name
            ),
            None => {
                if desc.namespace.is_empty() {
                    desc.name.clone()
                } else {
                    format!("{}.{}", desc.namespace, desc.name)
                }
            }
        };

        cache[id] = Some(full_name.clone());
        Ok(full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names_and_nesting() {
        let mut builder = GraphBuilder::new("AcmeLib");
        let outer = builder.add_type(TypeDesc::new(TypeKind::Class, "Acme", "Outer"));
        let inner = builder.add_type({
            let mut desc = TypeDesc::new(TypeKind::Class, "", "Inner");
            desc.declaring = Some(outer);
            desc
        });
        let graph = builder.finish().unwrap();

        assert_eq!(graph.ty(outer).full_name, "Acme.Outer");
        assert_eq!(graph.ty(inner).full_name, "Acme.Outer+Inner");
        assert_eq!(graph.ty(outer).nested, vec![inner]);
        assert_eq!(graph.find("Acme.Outer+Inner"), Some(inner));
        assert_eq!(graph.root_types().collect::<Vec<_>>(), vec![outer]);
    }

    #[test]
    fn display_names() {
        let sig = TypeSig::Array(Box::new(TypeSig::Primitive(Primitive::Int32)));
        assert_eq!(sig.display_name(), "System.Int32[]");

        let byref = TypeSig::ByRef(Box::new(TypeSig::Named(TypeName {
            assembly: None,
            namespace: "Acme".to_string(),
            name: "Widget".to_string(),
        })));
        assert_eq!(byref.display_name(), "Acme.Widget&");
    }
}
