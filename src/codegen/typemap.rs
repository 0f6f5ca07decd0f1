//! Mapping from CLR type references to D type expressions.
//!
//! The mapper is a pure priority chain over the closed [`TypeSig`] union: deferred
//! shapes first (by-ref, pointers), then in-scope generic parameters, the fixed
//! primitive table, named enums and ordinary reference types (which resolve to their
//! generated modules and contribute import obligations), and finally everything else
//! lowered to a compile-time-visible placeholder carrying the original name. Named
//! resolutions are memoized per output module.

use std::collections::HashMap;

use crate::{
    metadata::descriptor::{Primitive, TypeKind, TypeName, TypeSig},
    Error, Result,
};

/// What a resolver knows about a named type: enough to classify it and to spell a
/// reference to its generated declaration.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    /// The type's kind.
    pub kind: TypeKind,
    /// `true` when the type declares generic parameters (open generic).
    pub is_generic: bool,
    /// Owning assembly simple name.
    pub assembly: String,
    /// Reflection-style full name.
    pub full_name: String,
    /// Target module holding the generated declaration.
    pub module_name: String,
    /// Sanitized module-relative name (`Outer.Inner`).
    pub qualified_name: String,
}

/// Resolves named type references across the current assembly and its dependencies.
///
/// Returning `None` means the owning assembly could not be located; the mapper then
/// degrades the reference to the universal object handle.
pub trait TypeResolver {
    /// Looks up `name`, loading the owning assembly if necessary.
    fn resolve(&mut self, name: &TypeName) -> Option<ResolvedType>;
}

/// Generic parameters in scope at a use site: the declaring type chain's accumulated
/// parameters plus the current method's own.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericScope<'a> {
    /// Type-level parameter names, ordinal order.
    pub type_params: &'a [String],
    /// Method-level parameter names, ordinal order.
    pub method_params: &'a [String],
}

/// Result of mapping one type reference.
#[derive(Debug, Clone)]
pub struct MappedType {
    /// The D type expression.
    pub expr: String,
    /// Module that must be imported for the expression to resolve.
    pub import: Option<String>,
    /// Original CLR name when the expression is an unsupported placeholder.
    pub unsupported: Option<String>,
}

/// How a parameter travels into the invocation argument array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxKind {
    /// Boxed through the primitive box entry point with this kind.
    Primitive(Primitive),
    /// Boxed against the enum's own resolved runtime type.
    Enum {
        /// Owning assembly simple name.
        assembly: String,
        /// Reflection-style full name.
        full_name: String,
    },
    /// Passed through directly (already an object handle).
    Direct,
    /// Not forwarded; a native null placeholder preserves arity.
    Skipped,
}

fn placeholder(original: &str) -> MappedType {
    MappedType {
        expr: format!("__d.clrbridge.Unsupported!(\"{original}\")"),
        import: None,
        unsupported: Some(original.to_string()),
    }
}

fn primitive_expr(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Boolean => "bool",
        Primitive::Byte => "ubyte",
        Primitive::SByte => "byte",
        Primitive::UInt16 => "ushort",
        Primitive::Int16 => "short",
        Primitive::UInt32 => "uint",
        Primitive::Int32 => "int",
        Primitive::UInt64 => "ulong",
        Primitive::Int64 => "long",
        Primitive::Char => "char",
        Primitive::String => "__d.CString",
        Primitive::Single => "float",
        Primitive::Double => "double",
        Primitive::Decimal => "__d.clr.Decimal",
        Primitive::Object => "__d.clr.DotNetObject",
    }
}

/// Maps `sig` to its D representation.
///
/// `memo` is the per-module named-type cache; `resolver` supplies cross-assembly
/// kind/module information.
///
/// # Errors
/// Returns [`Error::GenericContext`] when a generic parameter is referenced outside
/// its scope (a generator bug, not bad input), and [`Error::Invariant`] for `void` in
/// a value position.
pub fn map_type(
    sig: &TypeSig,
    scope: GenericScope<'_>,
    memo: &mut HashMap<TypeSig, MappedType>,
    resolver: &mut dyn TypeResolver,
) -> Result<MappedType> {
    match sig {
        // By-reference and pointer passing is deferred, not fatal
        TypeSig::ByRef(_) | TypeSig::Ptr(_) => Ok(placeholder(&sig.display_name())),

        TypeSig::Var(index) => match scope.type_params.get(*index as usize) {
            Some(name) => Ok(MappedType {
                expr: crate::codegen::ident::sanitize(name),
                import: None,
                unsupported: None,
            }),
            None => Err(Error::GenericContext(format!("!{index}"))),
        },
        TypeSig::MVar(index) => match scope.method_params.get(*index as usize) {
            Some(name) => Ok(MappedType {
                expr: crate::codegen::ident::sanitize(name),
                import: None,
                unsupported: None,
            }),
            None => Err(Error::GenericContext(format!("!!{index}"))),
        },

        TypeSig::Primitive(primitive) => Ok(MappedType {
            expr: primitive_expr(*primitive).to_string(),
            import: None,
            unsupported: None,
        }),

        TypeSig::Named(name) => {
            if let Some(mapped) = memo.get(sig) {
                return Ok(mapped.clone());
            }

            let mapped = map_named(name, resolver);
            memo.insert(sig.clone(), mapped.clone());
            Ok(mapped)
        }

        TypeSig::Array(_) | TypeSig::GenericInst { .. } | TypeSig::Unsupported(_) => {
            Ok(placeholder(&sig.display_name()))
        }

        TypeSig::Void => Err(Error::Invariant(
            "void mapped in a value position".to_string(),
        )),
    }
}

fn map_named(name: &TypeName, resolver: &mut dyn TypeResolver) -> MappedType {
    // System.Enum is the runtime-support enum handle, not a generated type
    if name.assembly.is_some() && name.namespace == "System" && name.name == "Enum" {
        return MappedType {
            expr: "__d.clrbridge.Enum".to_string(),
            import: None,
            unsupported: None,
        };
    }

    match resolver.resolve(name) {
        Some(resolved) => {
            if resolved.is_generic {
                return placeholder(&name.full_name());
            }
            match resolved.kind {
                // Enums and ordinary reference types resolve to their generated
                // declarations, qualified by owning module even intra-module so the
                // reference cannot clash with a sibling member of the same spelling.
                TypeKind::Enum | TypeKind::Class | TypeKind::Interface => MappedType {
                    expr: format!("{}.{}", resolved.module_name, resolved.qualified_name),
                    import: Some(resolved.module_name),
                    unsupported: None,
                },
                // Structs and delegates keep placeholder references
                TypeKind::Struct | TypeKind::Delegate => placeholder(&name.full_name()),
            }
        }
        None => {
            tracing::warn!(
                "type '{}' could not be resolved (assembly {:?}); using the object handle",
                name.full_name(),
                name.assembly
            );
            MappedType {
                expr: "__d.clr.DotNetObject".to_string(),
                import: None,
                unsupported: None,
            }
        }
    }
}

/// The marshal-representation variant of [`map_type`]: identical except that
/// `Boolean` maps to the bridge ABI's 16-bit unsigned integer (the native side has no
/// boolean type; a fixed external contract).
///
/// # Errors
/// Same failure modes as [`map_type`].
pub fn map_marshal_type(
    sig: &TypeSig,
    scope: GenericScope<'_>,
    memo: &mut HashMap<TypeSig, MappedType>,
    resolver: &mut dyn TypeResolver,
) -> Result<MappedType> {
    if *sig == TypeSig::Primitive(Primitive::Boolean) {
        return Ok(MappedType {
            expr: "ushort".to_string(),
            import: None,
            unsupported: None,
        });
    }

    map_type(sig, scope, memo, resolver)
}

/// Classifies how a parameter of type `sig` travels into the argument array.
///
/// Shapes whose declarations lower to placeholders cannot produce an object handle, so
/// they are skipped the same way arrays and by-ref parameters are; the thunk still
/// compiles and keeps the argument slot.
#[must_use]
pub fn classify_boxing(sig: &TypeSig, resolver: &mut dyn TypeResolver) -> BoxKind {
    match sig {
        // Object is already the universal handle; no boxing entry point exists for it
        TypeSig::Primitive(Primitive::Object) => BoxKind::Direct,
        TypeSig::Primitive(primitive) => BoxKind::Primitive(*primitive),
        TypeSig::Array(_) | TypeSig::ByRef(_) | TypeSig::Ptr(_) => BoxKind::Skipped,
        TypeSig::GenericInst { .. } | TypeSig::Unsupported(_) => BoxKind::Skipped,
        TypeSig::Named(name) => match resolver.resolve(name) {
            Some(resolved) if resolved.kind == TypeKind::Enum => BoxKind::Enum {
                assembly: resolved.assembly,
                full_name: resolved.full_name,
            },
            Some(resolved)
                if resolved.is_generic
                    || matches!(resolved.kind, TypeKind::Struct | TypeKind::Delegate) =>
            {
                BoxKind::Skipped
            }
            _ => BoxKind::Direct,
        },
        _ => BoxKind::Direct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResolver {
        entries: Vec<ResolvedType>,
    }

    impl TypeResolver for FakeResolver {
        fn resolve(&mut self, name: &TypeName) -> Option<ResolvedType> {
            self.entries
                .iter()
                .find(|entry| entry.full_name == name.full_name())
                .cloned()
        }
    }

    fn season_resolver() -> FakeResolver {
        FakeResolver {
            entries: vec![
                ResolvedType {
                    kind: TypeKind::Enum,
                    is_generic: false,
                    assembly: "AcmeLib".to_string(),
                    full_name: "Acme.Season".to_string(),
                    module_name: "AcmeLib.Acme".to_string(),
                    qualified_name: "Season".to_string(),
                },
                ResolvedType {
                    kind: TypeKind::Struct,
                    is_generic: false,
                    assembly: "AcmeLib".to_string(),
                    full_name: "Acme.Point".to_string(),
                    module_name: "AcmeLib.Acme".to_string(),
                    qualified_name: "Point".to_string(),
                },
            ],
        }
    }

    fn named(namespace: &str, name: &str) -> TypeSig {
        TypeSig::Named(TypeName {
            assembly: None,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    #[test]
    fn primitives_use_the_fixed_table() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let mapped = map_type(
            &TypeSig::Primitive(Primitive::Int32),
            GenericScope::default(),
            &mut memo,
            &mut resolver,
        )
        .unwrap();
        assert_eq!(mapped.expr, "int");
        assert!(mapped.import.is_none());
    }

    #[test]
    fn boolean_marshals_wide() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let scope = GenericScope::default();
        let logical = map_type(
            &TypeSig::Primitive(Primitive::Boolean),
            scope,
            &mut memo,
            &mut resolver,
        )
        .unwrap();
        let marshal = map_marshal_type(
            &TypeSig::Primitive(Primitive::Boolean),
            scope,
            &mut memo,
            &mut resolver,
        )
        .unwrap();
        assert_eq!(logical.expr, "bool");
        assert_eq!(marshal.expr, "ushort");
    }

    #[test]
    fn enums_resolve_with_import_qualifier() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let mapped = map_type(
            &named("Acme", "Season"),
            GenericScope::default(),
            &mut memo,
            &mut resolver,
        )
        .unwrap();
        assert_eq!(mapped.expr, "AcmeLib.Acme.Season");
        assert_eq!(mapped.import.as_deref(), Some("AcmeLib.Acme"));

        // Second resolution hits the memo
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn structs_lower_to_placeholders() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let mapped = map_type(
            &named("Acme", "Point"),
            GenericScope::default(),
            &mut memo,
            &mut resolver,
        )
        .unwrap();
        assert!(mapped.unsupported.is_some());
        assert!(mapped.expr.contains("Acme.Point"));
    }

    #[test]
    fn byref_is_deferred_with_original_name() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let sig = TypeSig::ByRef(Box::new(TypeSig::Primitive(Primitive::Int32)));
        let mapped = map_type(&sig, GenericScope::default(), &mut memo, &mut resolver).unwrap();
        assert_eq!(mapped.unsupported.as_deref(), Some("System.Int32&"));
        assert!(mapped.expr.contains("System.Int32&"));
    }

    #[test]
    fn generic_params_map_in_scope_only() {
        let mut memo = HashMap::new();
        let mut resolver = season_resolver();
        let params = vec!["T".to_string()];
        let scope = GenericScope {
            type_params: &params,
            method_params: &[],
        };
        let mapped = map_type(&TypeSig::Var(0), scope, &mut memo, &mut resolver).unwrap();
        assert_eq!(mapped.expr, "T");

        let out_of_scope = map_type(
            &TypeSig::MVar(0),
            scope,
            &mut memo,
            &mut resolver,
        );
        assert!(matches!(out_of_scope, Err(Error::GenericContext(_))));
    }

    #[test]
    fn unresolvable_references_fall_back_to_object() {
        let mut memo = HashMap::new();
        let mut resolver = FakeResolver { entries: vec![] };
        let sig = TypeSig::Named(TypeName {
            assembly: Some("Missing".to_string()),
            namespace: "Far".to_string(),
            name: "Away".to_string(),
        });
        let mapped = map_type(&sig, GenericScope::default(), &mut memo, &mut resolver).unwrap();
        assert_eq!(mapped.expr, "__d.clr.DotNetObject");
        assert!(mapped.unsupported.is_none());
    }

    #[test]
    fn boxing_classification() {
        let mut resolver = season_resolver();
        assert_eq!(
            classify_boxing(&TypeSig::Primitive(Primitive::Int32), &mut resolver),
            BoxKind::Primitive(Primitive::Int32)
        );
        assert_eq!(
            classify_boxing(&TypeSig::Primitive(Primitive::Object), &mut resolver),
            BoxKind::Direct
        );
        assert_eq!(
            classify_boxing(
                &TypeSig::Array(Box::new(TypeSig::Primitive(Primitive::Int32))),
                &mut resolver
            ),
            BoxKind::Skipped
        );
        // Placeholder-typed shapes cannot be marshaled either
        assert_eq!(
            classify_boxing(&named("Acme", "Point"), &mut resolver),
            BoxKind::Skipped
        );
        match classify_boxing(&named("Acme", "Season"), &mut resolver) {
            BoxKind::Enum {
                assembly,
                full_name,
            } => {
                assert_eq!(assembly, "AcmeLib");
                assert_eq!(full_name, "Acme.Season");
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }
}
