//! Module units and text builders.
//!
//! One [`ModuleUnit`] corresponds to one output source file (one source namespace).
//! Emitters never write to a module directly: they build [`Fragment`]s - text plus the
//! set of external modules that text references - and merge completed fragments into
//! their parent. That keeps the contract that imports discovered deep inside a method
//! body propagate to the enclosing module, which writes its deduplicated import list
//! ahead of every type body even though the bodies were produced first.

use std::collections::{BTreeSet, HashMap};

use crate::{codegen::typemap::MappedType, metadata::descriptor::TypeSig};

/// Fixed module preamble: forward-declares the bridge/runtime symbols generated code
/// uses, wrapped in a struct so its names cannot clash with generated members.
pub const MODULE_PREAMBLE: &str = "\
// Keep D symbols inside the __d struct to prevent symbol conflicts
struct __d
{
    import cstring : CString, CStringLiteral;
    static import clr;
    static import clrbridge;
    import clrbridge.global : globalClrBridge;
    alias ObjectArray = clrbridge.Array!(clr.PrimitiveType.Object);
}";

/// A block of emitted text plus the import obligations it accumulated.
#[derive(Debug, Default)]
pub struct Fragment {
    text: String,
    imports: BTreeSet<String>,
}

impl Fragment {
    /// An empty fragment.
    #[must_use]
    pub fn new() -> Fragment {
        Fragment::default()
    }

    /// Appends one line (without indentation handling; callers pass it spelled out).
    pub fn line(&mut self, text: &str) {
        self.text.push_str(text);
        self.text.push('\n');
    }

    /// Records that the fragment references `module`.
    pub fn import(&mut self, module: &str) {
        self.imports.insert(module.to_string());
    }

    /// Records everything a [`MappedType`] requires.
    pub fn import_mapped(&mut self, mapped: &MappedType) {
        if let Some(module) = &mapped.import {
            self.imports.insert(module.clone());
        }
    }

    /// Merges a completed child fragment into this one: text is appended, import
    /// obligations propagate.
    pub fn merge(&mut self, child: Fragment) {
        self.text.push_str(&child.text);
        self.imports.extend(child.imports);
    }

    /// The accumulated text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One output module: a source namespace of one assembly.
#[derive(Debug)]
pub struct ModuleUnit {
    /// The raw source namespace ("" for the global namespace).
    pub namespace: String,
    /// The emitted module name (`package` or `package.Name.Space`, sanitized).
    pub module_name: String,
    /// Path of the generated file relative to the package root.
    pub relative_path: String,
    body: Fragment,
    /// Per-module memo of named-type resolutions: a type referenced ten times in one
    /// module is resolved once and imported once.
    pub memo: HashMap<TypeSig, MappedType>,
}

impl ModuleUnit {
    /// Opens a module unit for `namespace`.
    #[must_use]
    pub fn new(namespace: &str, module_name: &str, relative_path: &str) -> ModuleUnit {
        ModuleUnit {
            namespace: namespace.to_string(),
            module_name: module_name.to_string(),
            relative_path: relative_path.to_string(),
            body: Fragment::new(),
            memo: HashMap::new(),
        }
    }

    /// Merges a completed top-level fragment (one type body) into the module.
    pub fn absorb(&mut self, fragment: Fragment) {
        self.body.merge(fragment);
    }

    /// Renders the complete module file: declaration, preamble, sorted import list,
    /// then every absorbed type body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("module {};\n\n", self.module_name));
        out.push_str(MODULE_PREAMBLE);
        out.push('\n');

        if !self.body.imports.is_empty() {
            out.push('\n');
            for import in &self.body.imports {
                out.push_str(&format!("static import {import};\n"));
            }
        }

        out.push('\n');
        out.push_str(&self.body.text);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_propagate_on_merge() {
        let mut module = ModuleUnit::new("Acme", "acme_lib.Acme", "Acme/package.d");

        let mut type_body = Fragment::new();
        type_body.line("struct Widget");
        let mut method_body = Fragment::new();
        method_body.line("    // thunk");
        method_body.import("acme_lib.Acme.Parts");
        type_body.merge(method_body);
        module.absorb(type_body);

        let rendered = module.render();
        assert!(rendered.starts_with("module acme_lib.Acme;\n"));
        assert!(rendered.contains("static import acme_lib.Acme.Parts;\n"));
        // Imports come before any type body
        let import_at = rendered.find("static import").unwrap();
        let body_at = rendered.find("struct Widget").unwrap();
        assert!(import_at < body_at);
    }

    #[test]
    fn deterministic_import_order() {
        let mut fragment = Fragment::new();
        fragment.import("pkg.B");
        fragment.import("pkg.A");
        fragment.import("pkg.B");

        let mut module = ModuleUnit::new("", "pkg", "package.d");
        module.absorb(fragment);
        let rendered = module.render();
        let a = rendered.find("static import pkg.A;").unwrap();
        let b = rendered.find("static import pkg.B;").unwrap();
        assert!(a < b);
        assert_eq!(rendered.matches("static import pkg.B;").count(), 1);
    }
}
