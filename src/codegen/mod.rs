//! D binding generation for one assembly.
//!
//! The generator partitions an assembly's root types into module units by namespace,
//! dispatches every type to its kind-specific emitter, and produces a deterministic
//! in-memory output tree (one file per namespace plus the umbrella module). All
//! filesystem concerns - staging, hashing, atomic publication - live in the session.

pub mod ident;
pub mod module;
pub mod typemap;

mod emit;
mod method;

use std::collections::{BTreeMap, HashMap};

use crate::{
    codegen::{
        module::{Fragment, ModuleUnit},
        typemap::{MappedType, TypeResolver},
    },
    config::Config,
    metadata::descriptor::{AssemblyGraph, TypeSig},
    Error, Result,
};

/// Shared state threaded through the emitters: the per-module resolution memo, the
/// cross-assembly type resolver, and the identity of the assembly being generated.
pub(crate) struct EmitCtx<'a> {
    pub memo: &'a mut HashMap<TypeSig, MappedType>,
    pub resolver: &'a mut dyn TypeResolver,
    pub current_assembly: &'a str,
}

/// The deterministic result of generating one assembly: file contents keyed by path
/// relative to the package root (forward slashes).
#[derive(Debug)]
pub struct GeneratedTree {
    /// Relative path to file content.
    pub files: BTreeMap<String, String>,
}

/// Precomputes the generation-facing name fields on every descriptor: the target
/// module (`package` + sanitized namespace of the root enclosing type) and the
/// sanitized module-relative qualified name. Stable and independent of emission order.
pub fn prepare_graph(graph: &mut AssemblyGraph, package: &str) {
    for id in 0..graph.types.len() {
        let mut chain = Vec::new();
        let mut current = id;
        loop {
            chain.push(ident::type_name(&graph.types[current].name));
            match graph.types[current].declaring {
                Some(parent) => current = parent,
                None => break,
            }
        }
        chain.reverse();

        let root_namespace = &graph.types[current].namespace;
        graph.types[id].module_name = module_name(package, root_namespace);
        graph.types[id].qualified_name = chain.join(".");
    }
}

/// The emitted module name for a namespace of the given package.
fn module_name(package: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        package.to_string()
    } else {
        format!("{package}.{}", ident::sanitize(namespace))
    }
}

/// The generated file path for a namespace, relative to the package root.
fn module_path(namespace: &str) -> String {
    if namespace.is_empty() {
        "package.d".to_string()
    } else {
        let parts: Vec<String> = namespace
            .split('.')
            .map(|part| ident::sanitize(part))
            .collect();
        format!("{}/package.d", parts.join("/"))
    }
}

/// Generates the binding modules for `graph`.
///
/// `package` is the sanitized assembly root name; `resolver` supplies cross-assembly
/// type information (and is how dependency assemblies get discovered).
///
/// # Errors
/// Fails the run for stale configuration entries, namespace case collisions, and
/// internal-consistency faults; unsupported type shapes never fail here.
pub fn generate_assembly(
    graph: &AssemblyGraph,
    package: &str,
    config: &Config,
    resolver: &mut dyn TypeResolver,
) -> Result<GeneratedTree> {
    let assembly_config = config.assembly(&graph.name);

    // Stale configuration is a correctness guard: every configured type must exist
    if let Some(assembly_config) = assembly_config {
        let mut configured: Vec<_> = assembly_config.configured_types().collect();
        configured.sort_by_key(|type_config| type_config.line);
        for type_config in configured {
            if graph.find(&type_config.name).is_none() {
                return Err(Error::ConfigStaleType {
                    file: config.file.clone(),
                    line: type_config.line,
                    type_name: type_config.name.clone(),
                    assembly: graph.name.clone(),
                });
            }
        }
    }

    // Case-insensitive filesystems cannot host namespaces differing only by case
    let mut seen_casing: HashMap<String, String> = HashMap::new();
    for id in graph.root_types() {
        let namespace = &graph.ty(id).namespace;
        match seen_casing.get(&namespace.to_lowercase()) {
            Some(existing) if existing != namespace => {
                return Err(Error::NamespaceCaseCollision(
                    existing.clone(),
                    namespace.clone(),
                ));
            }
            _ => {
                seen_casing.insert(namespace.to_lowercase(), namespace.clone());
            }
        }
    }

    let mut modules: BTreeMap<String, ModuleUnit> = BTreeMap::new();
    for id in graph.root_types() {
        let namespace = graph.ty(id).namespace.clone();
        let unit = modules.entry(namespace.clone()).or_insert_with(|| {
            let name = module_name(package, &namespace);
            tracing::debug!("opening module '{name}'");
            ModuleUnit::new(&namespace, &name, &module_path(&namespace))
        });

        let mut fragment = Fragment::new();
        {
            let mut ctx = EmitCtx {
                memo: &mut unit.memo,
                resolver: &mut *resolver,
                current_assembly: &graph.name,
            };
            emit::emit_type(&mut fragment, &mut ctx, graph, id, assembly_config, "")?;
        }
        unit.absorb(fragment);
    }

    let mut files = BTreeMap::new();
    let mut umbrella = format!("module {package}.all;\n\n");
    for unit in modules.values() {
        umbrella.push_str(&format!("public import {};\n", unit.module_name));
        files.insert(unit.relative_path.clone(), unit.render());
    }
    files.insert("all.d".to_string(), umbrella);

    Ok(GeneratedTree { files })
}
