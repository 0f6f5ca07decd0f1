//! Method and constructor thunk emission.
//!
//! Every emitted callable compiles down to the same runtime sequence against the
//! native bridge: resolve the closed runtime type from its TypeSpec, resolve the
//! member handle from its MethodSpec, box the boxable arguments, assemble the
//! argument array, invoke, and release every acquired handle on the way out. Each
//! acquisition is paired with a `scope (exit)` release so the sequence is exception
//! safe in the generated language too.

use crate::{
    codegen::{
        ident,
        module::Fragment,
        typemap::{classify_boxing, map_marshal_type, map_type, BoxKind, GenericScope},
        EmitCtx,
    },
    metadata::descriptor::{MethodDesc, Primitive, TypeKind, TypeSig},
    Result,
};

/// Assembly hosting the primitive types in TypeSpec literals.
const CORE_ASSEMBLY: &str = "mscorlib";

/// Renders the TypeSpec literal for `sig`.
///
/// Generic parameters in scope resolve to a context-dependent spec rather than a
/// literal; shapes the bridge cannot resolve keep their display name so a runtime
/// lookup fails with a descriptive target instead of silently rebinding.
///
/// # Errors
/// Returns [`crate::Error::GenericContext`] for an out-of-scope generic parameter.
pub(crate) fn type_spec_expr(
    sig: &TypeSig,
    scope: GenericScope<'_>,
    current_assembly: &str,
) -> Result<String> {
    Ok(match sig {
        TypeSig::Primitive(primitive) => format!(
            "__d.clrbridge.TypeSpec(\"{CORE_ASSEMBLY}\", \"{}\")",
            primitive.clr_full_name()
        ),
        TypeSig::Named(name) => {
            let assembly = name.assembly.as_deref().unwrap_or(current_assembly);
            format!(
                "__d.clrbridge.TypeSpec(\"{assembly}\", \"{}\")",
                name.full_name()
            )
        }
        TypeSig::GenericInst { base, args } => {
            let base_spec = match base.as_ref() {
                TypeSig::Named(name) => {
                    let assembly = name.assembly.as_deref().unwrap_or(current_assembly);
                    (assembly.to_string(), name.full_name())
                }
                other => (String::new(), other.display_name()),
            };
            let mut rendered = Vec::with_capacity(args.len());
            for arg in args {
                rendered.push(type_spec_expr(arg, scope, current_assembly)?);
            }
            format!(
                "__d.clrbridge.TypeSpec(\"{}\", \"{}\", [{}])",
                base_spec.0,
                base_spec.1,
                rendered.join(", ")
            )
        }
        TypeSig::Var(index) => match scope.type_params.get(*index as usize) {
            Some(name) => format!("__d.clrbridge.typeSpec!({})", ident::sanitize(name)),
            None => return Err(crate::Error::GenericContext(format!("!{index}"))),
        },
        TypeSig::MVar(index) => match scope.method_params.get(*index as usize) {
            Some(name) => format!("__d.clrbridge.typeSpec!({})", ident::sanitize(name)),
            None => return Err(crate::Error::GenericContext(format!("!!{index}"))),
        },
        other => format!("__d.clrbridge.TypeSpec(\"\", \"{}\")", other.display_name()),
    })
}

/// Emits the declaration and thunk body for one method or constructor of a class or
/// struct. Interface members go through [`emit_interface_signature`] instead.
///
/// `indent` is the indentation of the declaration line; bodies indent one level
/// further.
///
/// # Errors
/// Propagates mapping failures (generic scope violations).
pub(crate) fn emit_callable(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    owner_kind: TypeKind,
    method: &MethodDesc,
    scope: GenericScope<'_>,
    indent: &str,
) -> Result<()> {
    let mut out = Fragment::new();

    let declaration = render_declaration(&mut out, ctx, method, scope, indent)?;
    out.line(&declaration);
    out.line(&format!("{indent}{{"));

    // Value types have no object handle to invoke through, so instance members on
    // structs stay stubs; everything else gets the full thunk.
    let stub_instance = owner_kind == TypeKind::Struct && !method.is_static && !method.is_ctor;
    if stub_instance {
        out.line(&format!(
            "{indent}    // instance members on value types are not marshaled"
        ));
        if method.return_type != TypeSig::Void {
            out.line(&format!("{indent}    return typeof(return).init;"));
        }
    } else {
        emit_thunk_body(&mut out, ctx, method, scope, &format!("{indent}    "))?;
    }

    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

/// Emits a body-less member signature, for interface surfaces.
///
/// # Errors
/// Propagates mapping failures (generic scope violations).
pub(crate) fn emit_interface_signature(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    method: &MethodDesc,
    scope: GenericScope<'_>,
    indent: &str,
) -> Result<()> {
    let mut out = Fragment::new();
    let declaration = render_declaration(&mut out, ctx, method, scope, indent)?;
    out.line(&format!("{declaration};"));
    parent.merge(out);
    Ok(())
}

fn render_declaration(
    out: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    method: &MethodDesc,
    scope: GenericScope<'_>,
    indent: &str,
) -> Result<String> {
    let mut declaration = String::from(indent);
    declaration.push_str(if method.is_private { "private" } else { "public" });

    if method.is_ctor {
        declaration.push_str(" static typeof(this) New");
    } else {
        if method.is_static {
            declaration.push_str(" static");
        } else if method.is_final {
            declaration.push_str(" final");
        }

        if method.return_type == TypeSig::Void {
            declaration.push_str(" void");
        } else {
            let mapped = map_type(&method.return_type, scope, ctx.memo, ctx.resolver)?;
            out.import_mapped(&mapped);
            declaration.push(' ');
            declaration.push_str(&mapped.expr);
        }

        declaration.push(' ');
        declaration.push_str(&ident::sanitize(&method.name));
    }

    declaration.push('(');
    let mut prefix = "";
    for param in &method.params {
        let mapped = map_type(&param.sig, scope, ctx.memo, ctx.resolver)?;
        out.import_mapped(&mapped);
        declaration.push_str(prefix);
        declaration.push_str(&mapped.expr);
        declaration.push(' ');
        declaration.push_str(&ident::sanitize(&param.name));
        prefix = ", ";
    }
    declaration.push(')');
    Ok(declaration)
}

fn emit_thunk_body(
    out: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    method: &MethodDesc,
    scope: GenericScope<'_>,
    indent: &str,
) -> Result<()> {
    let member_kind = if method.is_ctor { "Constructor" } else { "Method" };

    // Compile-time member descriptor: owning type spec, name (omitted for
    // constructors), generic arguments, and one spec per parameter
    let mut param_specs = Vec::with_capacity(method.params.len());
    for param in &method.params {
        param_specs.push(type_spec_expr(&param.sig, scope, ctx.current_assembly)?);
    }
    let spec_name = format!("__{}Spec", member_kind.to_lowercase());
    if method.is_ctor {
        out.line(&format!(
            "{indent}enum {spec_name} = __d.clrbridge.MethodSpec(__typeSpec, null, [], [{}]);",
            param_specs.join(", ")
        ));
    } else {
        out.line(&format!(
            "{indent}enum {spec_name} = __d.clrbridge.MethodSpec(__typeSpec, \"{}\", [], [{}]);",
            method.name,
            param_specs.join(", ")
        ));
    }

    // Scoped acquisition: runtime type, then member handle
    out.line(&format!(
        "{indent}const __this_type__ = __d.globalClrBridge.resolveClosedType(__typeSpec);"
    ));
    out.line(&format!(
        "{indent}scope (exit) __d.globalClrBridge.release(__this_type__);"
    ));
    out.line(&format!(
        "{indent}const __member__ = __d.globalClrBridge.resolve{member_kind}(__this_type__, {spec_name});"
    ));
    out.line(&format!(
        "{indent}scope (exit) __d.globalClrBridge.release(__member__);"
    ));

    // Box boxable arguments, each with a paired release
    for (index, param) in method.params.iter().enumerate() {
        match classify_boxing(&param.sig, ctx.resolver) {
            BoxKind::Primitive(primitive) => {
                out.line(&format!(
                    "{indent}auto __param{index}__ = __d.globalClrBridge.box!(__d.clr.PrimitiveType.{})({});",
                    primitive.clr_name(),
                    ident::sanitize(&param.name)
                ));
                out.line(&format!(
                    "{indent}scope (exit) __d.globalClrBridge.release(__param{index}__);"
                ));
            }
            BoxKind::Enum {
                assembly,
                full_name,
            } => {
                // Enums box against their own resolved runtime type; the generic
                // box-by-primitive-kind path does not apply to enum wrappers
                out.line(&format!(
                    "{indent}const __param{index}_type__ = __d.globalClrBridge.resolveClosedType(__d.clrbridge.TypeSpec(\"{assembly}\", \"{full_name}\"));"
                ));
                out.line(&format!(
                    "{indent}scope (exit) __d.globalClrBridge.release(__param{index}_type__);"
                ));
                out.line(&format!(
                    "{indent}auto __param{index}__ = __d.globalClrBridge.boxEnum(__param{index}_type__, {});",
                    ident::sanitize(&param.name)
                ));
                out.line(&format!(
                    "{indent}scope (exit) __d.globalClrBridge.release(__param{index}__);"
                ));
            }
            BoxKind::Direct | BoxKind::Skipped => {}
        }
    }

    // Ordered argument array, arity always preserved
    out.line(&format!(
        "{indent}__d.ObjectArray __param_values__ = __d.globalClrBridge.makeObjectArray("
    ));
    let mut prefix = " ";
    for (index, param) in method.params.iter().enumerate() {
        match classify_boxing(&param.sig, ctx.resolver) {
            BoxKind::Primitive(_) | BoxKind::Enum { .. } => {
                out.line(&format!("{indent}    {prefix}__param{index}__"));
            }
            BoxKind::Direct => {
                out.line(&format!("{indent}    {prefix}{}", ident::sanitize(&param.name)));
            }
            BoxKind::Skipped => {
                out.line(&format!(
                    "{indent}    {prefix}__d.clr.DotNetObject.nullObject // {} not marshaled",
                    param.sig.display_name()
                ));
            }
        }
        prefix = ",";
    }
    out.line(&format!("{indent});"));
    out.line(&format!(
        "{indent}scope (exit) __d.globalClrBridge.release(__param_values__);"
    ));

    // Invoke and marshal the return value
    if method.is_ctor {
        out.line(&format!(
            "{indent}auto __return_value__ = cast(typeof(return))__d.globalClrBridge.callConstructor(__member__, __param_values__);"
        ));
        out.line(&format!("{indent}return __return_value__;"));
        return Ok(());
    }

    let receiver = if method.is_static {
        "__d.clr.DotNetObject.nullObject"
    } else {
        "this.__obj__"
    };

    if method.return_type == TypeSig::Void {
        out.line(&format!(
            "{indent}__d.globalClrBridge.funcs.CallGeneric(__member__, {receiver}, __param_values__, null);"
        ));
        return Ok(());
    }

    // The bridge has no native boolean; returns widen to ushort and narrow back
    let marshal = map_marshal_type(&method.return_type, scope, ctx.memo, ctx.resolver)?;
    out.import_mapped(&marshal);
    out.line(&format!("{indent}{} __return_value__;", marshal.expr));
    out.line(&format!(
        "{indent}__d.globalClrBridge.funcs.CallGeneric(__member__, {receiver}, __param_values__, cast(void**)&__return_value__);"
    ));
    if method.return_type == TypeSig::Primitive(Primitive::Boolean) {
        out.line(&format!("{indent}return __return_value__ != 0;"));
    } else {
        out.line(&format!("{indent}return __return_value__;"));
    }

    Ok(())
}
