//! Per-type emission: one strategy per type kind.
//!
//! Dispatch is a closed match over the descriptor's kind. Every branch produces a
//! declaration plus the metadata block used for runtime type resolution, recurses into
//! nested types (which are emitted inside their enclosing declaration), and leaves a
//! comment trail for everything it deliberately skips. Types disabled by configuration
//! shrink to placeholders so cross-module references keep compiling.

use crate::{
    codegen::{
        ident, method,
        module::Fragment,
        typemap::{map_type, GenericScope},
        EmitCtx,
    },
    config::AssemblyConfig,
    metadata::descriptor::{AssemblyGraph, TypeDesc, TypeId, TypeKind, TypeSig},
    Error, Result,
};

/// Emits the declaration of the type `id` (and, recursively, its nested types) into
/// `parent`.
///
/// # Errors
/// Returns [`Error::Invariant`] for internal-consistency faults (an enum without
/// exactly one instance field, an interface with fields) and propagates mapping
/// failures.
pub(crate) fn emit_type(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    graph: &AssemblyGraph,
    id: TypeId,
    config: Option<&AssemblyConfig>,
    indent: &str,
) -> Result<()> {
    let desc = graph.ty(id);

    if config.is_some_and(|config| config.is_type_disabled(&desc.full_name)) {
        tracing::debug!("type '{}' is disabled by configuration", desc.full_name);
        let mut out = Fragment::new();
        out.line(&format!(
            "{indent}// type '{}' is disabled by configuration",
            desc.full_name
        ));
        let keyword = match desc.kind {
            TypeKind::Interface => "interface",
            _ => "struct",
        };
        out.line(&format!(
            "{indent}/* DisabledType */ {keyword} {}{}",
            ident::type_name(&desc.name),
            generic_suffix(graph, desc)
        ));
        out.line(&format!("{indent}{{"));
        out.line(&format!("{indent}}}"));
        parent.merge(out);
        return Ok(());
    }

    match desc.kind {
        TypeKind::Enum => emit_enum(parent, ctx, desc, indent),
        TypeKind::Struct => emit_struct(parent, ctx, graph, id, config, indent),
        TypeKind::Interface => emit_interface(parent, ctx, graph, id, config, indent),
        TypeKind::Delegate => emit_delegate(parent, desc, indent),
        TypeKind::Class => emit_class(parent, ctx, graph, id, config, indent),
    }
}

/// The generic parameter suffix a declaration introduces: only the parameters beyond
/// what the enclosing type already declares (inherited parameters are in scope and
/// must not be redeclared).
fn generic_suffix(graph: &AssemblyGraph, desc: &TypeDesc) -> String {
    let inherited = desc
        .declaring
        .map_or(0, |parent| graph.ty(parent).generic_params.len());
    let own: Vec<String> = desc.generic_params[inherited.min(desc.generic_params.len())..]
        .iter()
        .map(|name| ident::sanitize(name))
        .collect();

    if own.is_empty() {
        String::new()
    } else {
        format!("({})", own.join(", "))
    }
}

/// The `static immutable __typeSpec` metadata block shared by all emitting branches.
fn metadata_block(desc: &TypeDesc, ctx: &EmitCtx<'_>, indent: &str) -> String {
    let generic_args = if desc.generic_params.is_empty() {
        String::new()
    } else {
        let specs: Vec<String> = desc
            .generic_params
            .iter()
            .map(|name| format!("__d.clrbridge.typeSpec!({})", ident::sanitize(name)))
            .collect();
        format!(", [{}]", specs.join(", "))
    };

    format!(
        "{indent}    static immutable __typeSpec = __d.clrbridge.TypeSpec(\"{}\", \"{}\"{generic_args});",
        ctx.current_assembly, desc.full_name
    )
}

fn emit_enum(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    desc: &TypeDesc,
    indent: &str,
) -> Result<()> {
    const ENUM_VALUE_FIELD: &str = "value__";

    let instance_fields: Vec<_> = desc.fields.iter().filter(|field| !field.is_static).collect();
    if instance_fields.len() != 1 {
        return Err(Error::Invariant(format!(
            "enum '{}' has {} instance fields, expected exactly one",
            desc.full_name,
            instance_fields.len()
        )));
    }
    let value_field = instance_fields[0];

    let scope = GenericScope {
        type_params: &desc.generic_params,
        method_params: &[],
    };
    let base = map_type(&value_field.sig, scope, ctx.memo, ctx.resolver)?;

    let mut out = Fragment::new();
    out.import_mapped(&base);
    out.line(&format!(
        "{indent}/* .NET Enum */ struct {}",
        ident::type_name(&desc.name)
    ));
    out.line(&format!("{indent}{{"));
    out.line(&format!(
        "{indent}    private {} {ENUM_VALUE_FIELD}; // .NET base type is {}",
        base.expr,
        value_field.sig.display_name()
    ));
    out.line(&format!("{indent}    enum : typeof(this)"));
    out.line(&format!("{indent}    {{"));
    for field in &desc.fields {
        if !field.is_static {
            continue;
        }
        let Some(constant) = field.constant else {
            tracing::warn!(
                "enum member '{}.{}' has no constant value; skipped",
                desc.full_name,
                field.name
            );
            continue;
        };
        out.line(&format!(
            "{indent}        {} = typeof(this)({}({})),",
            ident::sanitize(&field.name),
            base.expr,
            constant
        ));
    }
    out.line(&format!("{indent}    }}"));
    out.line(&metadata_block(desc, ctx, indent));

    // Minimal operator surface so [Flags]-style composition works like a native enum
    out.line(&format!(
        "{indent}    typeof(this) opBinary(string op)(const typeof(this) right) const"
    ));
    out.line(&format!(
        "{indent}    {{ return typeof(this)(mixin(\"this.{ENUM_VALUE_FIELD} \" ~ op ~ \" right.{ENUM_VALUE_FIELD}\")); }}"
    ));
    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

fn emit_struct(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    graph: &AssemblyGraph,
    id: TypeId,
    config: Option<&AssemblyConfig>,
    indent: &str,
) -> Result<()> {
    let desc = graph.ty(id);
    let mut out = Fragment::new();
    out.line(&format!(
        "{indent}struct {}{}",
        ident::type_name(&desc.name),
        generic_suffix(graph, desc)
    ));
    out.line(&format!("{indent}{{"));
    out.line(&metadata_block(desc, ctx, indent));
    emit_fields(&mut out, ctx, desc, indent)?;
    emit_properties(&mut out, desc, indent);
    // Constructors are skipped for value types in this design
    emit_methods(&mut out, ctx, desc, config, false, indent)?;
    emit_nested(&mut out, ctx, graph, id, config, indent)?;
    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

fn emit_interface(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    graph: &AssemblyGraph,
    id: TypeId,
    config: Option<&AssemblyConfig>,
    indent: &str,
) -> Result<()> {
    let desc = graph.ty(id);
    if !desc.fields.is_empty() {
        return Err(Error::Invariant(format!(
            "interface '{}' declares fields",
            desc.full_name
        )));
    }

    let mut out = Fragment::new();
    out.line(&format!(
        "{indent}interface {}{}",
        ident::type_name(&desc.name),
        generic_suffix(graph, desc)
    ));
    out.line(&format!("{indent}{{"));
    out.line(&metadata_block(desc, ctx, indent));
    for member in &desc.methods {
        if let Some(skip_reason) = skip_reason(member, desc, config) {
            tracing::debug!("{skip_reason}");
            out.line(&format!("{indent}    // {skip_reason}"));
            continue;
        }
        let scope = GenericScope {
            type_params: &desc.generic_params,
            method_params: &member.generic_params,
        };
        method::emit_interface_signature(&mut out, ctx, member, scope, &format!("{indent}    "))?;
    }
    emit_nested(&mut out, ctx, graph, id, config, indent)?;
    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

fn emit_delegate(parent: &mut Fragment, desc: &TypeDesc, indent: &str) -> Result<()> {
    // Member generation for delegates is out of scope; a named placeholder keeps
    // references compiling
    tracing::debug!("delegate '{}' emitted as a placeholder", desc.full_name);
    let mut out = Fragment::new();
    out.line(&format!(
        "{indent}// TODO: generate delegate members for '{}'",
        desc.full_name
    ));
    out.line(&format!(
        "{indent}struct {}",
        ident::type_name(&desc.name)
    ));
    out.line(&format!("{indent}{{"));
    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

fn emit_class(
    parent: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    graph: &AssemblyGraph,
    id: TypeId,
    config: Option<&AssemblyConfig>,
    indent: &str,
) -> Result<()> {
    let desc = graph.ty(id);
    let scope = GenericScope {
        type_params: &desc.generic_params,
        method_params: &[],
    };

    let mut out = Fragment::new();
    out.line(&format!(
        "{indent}/* .NET class */ struct {}{}",
        ident::type_name(&desc.name),
        generic_suffix(graph, desc)
    ));
    out.line(&format!("{indent}{{"));

    // Handle-to-native-object representation, parameterized by the resolved base
    // type; an absent or unresolved base falls back to the universal object handle
    let base_expr = match &desc.base {
        Some(base_sig @ TypeSig::Named(_)) => {
            let mapped = map_type(base_sig, scope, ctx.memo, ctx.resolver)?;
            if mapped.unsupported.is_some() {
                "__d.clr.DotNetObject".to_string()
            } else {
                out.import_mapped(&mapped);
                mapped.expr
            }
        }
        _ => "__d.clr.DotNetObject".to_string(),
    };
    out.line(&format!(
        "{indent}    mixin __d.clrbridge.DotNetObjectMixin!\"{base_expr}\";"
    ));
    out.line(&metadata_block(desc, ctx, indent));

    emit_fields(&mut out, ctx, desc, indent)?;
    emit_properties(&mut out, desc, indent);
    emit_methods(&mut out, ctx, desc, config, true, indent)?;
    emit_nested(&mut out, ctx, graph, id, config, indent)?;
    out.line(&format!("{indent}}}"));
    parent.merge(out);
    Ok(())
}

/// Fields lower to `@property` getter stubs; real field access through the bridge is a
/// known limitation, so the stubs return the default value and record the original
/// type in a trailing comment.
fn emit_fields(
    out: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    desc: &TypeDesc,
    indent: &str,
) -> Result<()> {
    let scope = GenericScope {
        type_params: &desc.generic_params,
        method_params: &[],
    };

    for field in &desc.fields {
        let mapped = map_type(&field.sig, scope, ctx.memo, ctx.resolver)?;
        out.import_mapped(&mapped);
        out.line(&format!(
            "{indent}    @property {} {}() {{ return typeof(return).init; }} // {}",
            mapped.expr,
            ident::sanitize(&field.name),
            field.sig.display_name()
        ));
    }

    Ok(())
}

/// Property summaries; the accessors themselves are emitted as ordinary methods.
fn emit_properties(out: &mut Fragment, desc: &TypeDesc, indent: &str) {
    for property in &desc.properties {
        let accessors = match (property.has_getter, property.has_setter) {
            (true, true) => "get; set;",
            (true, false) => "get;",
            _ => "set;",
        };
        out.line(&format!(
            "{indent}    // .NET property: {} {} {{ {accessors} }}",
            property.prop_type.display_name(),
            property.name
        ));
    }
}

/// Why a member cannot be emitted, if any reason applies.
fn skip_reason(
    member: &crate::metadata::descriptor::MethodDesc,
    desc: &TypeDesc,
    config: Option<&AssemblyConfig>,
) -> Option<String> {
    if let Some(type_config) =
        config.and_then(|config| config.type_config(&desc.full_name))
    {
        if type_config.is_method_excluded(&member.name) {
            return Some(format!(
                "skipping method '{}' (excluded by configuration)",
                member.name
            ));
        }
    }
    if member.is_virtual {
        return Some(format!(
            "skipping virtual method '{}' (virtual dispatch is not implemented)",
            member.name
        ));
    }
    if !member.generic_params.is_empty() {
        return Some(format!(
            "skipping generic method '{}' (generic methods are not implemented)",
            member.name
        ));
    }

    None
}

fn emit_methods(
    out: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    desc: &TypeDesc,
    config: Option<&AssemblyConfig>,
    with_ctors: bool,
    indent: &str,
) -> Result<()> {
    let member_indent = format!("{indent}    ");

    if with_ctors {
        for ctor in &desc.ctors {
            let scope = GenericScope {
                type_params: &desc.generic_params,
                method_params: &[],
            };
            method::emit_callable(out, ctx, desc.kind, ctor, scope, &member_indent)?;
        }
    }

    for member in &desc.methods {
        if let Some(reason) = skip_reason(member, desc, config) {
            tracing::debug!("{reason}");
            out.line(&format!("{member_indent}// {reason}"));
            continue;
        }

        let scope = GenericScope {
            type_params: &desc.generic_params,
            method_params: &member.generic_params,
        };
        method::emit_callable(out, ctx, desc.kind, member, scope, &member_indent)?;
    }

    Ok(())
}

fn emit_nested(
    out: &mut Fragment,
    ctx: &mut EmitCtx<'_>,
    graph: &AssemblyGraph,
    id: TypeId,
    config: Option<&AssemblyConfig>,
    indent: &str,
) -> Result<()> {
    for &nested in &graph.ty(id).nested {
        emit_type(out, ctx, graph, nested, config, &format!("{indent}    "))?;
    }

    Ok(())
}
