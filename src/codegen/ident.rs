//! D identifier sanitation.
//!
//! CLR member and type names are nearly free-form: compiler-generated members carry
//! angle brackets and dollar signs, generic types carry a backtick arity suffix, and
//! perfectly ordinary .NET names collide with D keywords or built-in types. Everything
//! emitted into a module goes through this table-driven, total mapping first.

/// D keywords that realistically collide with CLR member names. Escaped by appending
/// an underscore. This is a closed table, not a full D keyword list: names like `int`
/// cannot reach the generator as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "alias",
    "align",
    "asm",
    "assert",
    "body",
    "cast",
    "debug",
    "delegate",
    "deprecated",
    "do",
    "export",
    "final",
    "finally",
    "foreach",
    "function",
    "immutable",
    "import",
    "in",
    "inout",
    "invariant",
    "is",
    "lazy",
    "mixin",
    "module",
    "out",
    "override",
    "package",
    "pragma",
    "ref",
    "scope",
    "template",
    "typeof",
    "unittest",
    "version",
    "with",
];

/// Characters that cannot appear in a D identifier but do appear in CLR names:
/// generic arity backticks, compiler-generated name punctuation, and explicit
/// interface implementation separators.
const FORBIDDEN_CHARS: &[char] = &['`', '<', '>', '=', '{', '}', '|', '-', '$'];

/// Renames for types whose names shadow D built-ins. A static lookup, not a general
/// collision probe: these are the collisions observed in practice.
const TYPE_RENAMES: &[(&str, &str)] = &[
    ("Object", "DotNetObject"),
    ("Exception", "DotNetException"),
    ("TypeInfo", "DotNetTypeInfo"),
];

/// Maps an arbitrary member or namespace name to a valid D identifier.
///
/// Qualified (dot-separated) names are sanitized component-wise, preserving the
/// separator. Total: every input yields a syntactically valid identifier.
#[must_use]
pub fn sanitize(name: &str) -> String {
    if name.contains('.') {
        name.split('.')
            .map(sanitize_component)
            .collect::<Vec<_>>()
            .join(".")
    } else {
        sanitize_component(name)
    }
}

fn sanitize_component(name: &str) -> String {
    if RESERVED_WORDS.contains(&name) {
        return format!("{name}_");
    }

    name.chars()
        .map(|character| {
            if FORBIDDEN_CHARS.contains(&character) {
                '_'
            } else {
                character
            }
        })
        .collect()
}

/// Maps a metadata type name (one component, no namespace) to its emitted D name,
/// applying the built-in collision renames first.
#[must_use]
pub fn type_name(name: &str) -> String {
    for (original, replacement) in TYPE_RENAMES {
        if name == *original {
            return (*replacement).to_string();
        }
    }

    sanitize_component(name)
}

/// Derives the root package name for an assembly: dots become underscores, then the
/// usual sanitation applies.
#[must_use]
pub fn package_name(assembly_name: &str) -> String {
    sanitize_component(&assembly_name.replace('.', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_escaped() {
        assert_eq!(sanitize("version"), "version_");
        assert_eq!(sanitize("scope"), "scope_");
        assert_eq!(sanitize("Value"), "Value");
    }

    #[test]
    fn forbidden_characters_are_replaced() {
        assert_eq!(sanitize("<Main>$"), "_Main__");
        assert_eq!(sanitize("List`1"), "List_1");
        assert_eq!(sanitize("op_Equality="), "op_Equality_");
    }

    #[test]
    fn qualified_names_are_sanitized_componentwise() {
        assert_eq!(sanitize("System.module.Inner`2"), "System.module_.Inner_2");
    }

    #[test]
    fn builtin_type_collisions_are_renamed() {
        assert_eq!(type_name("Object"), "DotNetObject");
        assert_eq!(type_name("Exception"), "DotNetException");
        assert_eq!(type_name("TypeInfo"), "DotNetTypeInfo");
        assert_eq!(type_name("Widget"), "Widget");
    }

    #[test]
    fn package_names_flatten_dots() {
        assert_eq!(package_name("Acme.Widgets.Core"), "Acme_Widgets_Core");
    }

    #[test]
    fn totality_over_hostile_input() {
        for input in ["", "a b", "1234", "<>c__DisplayClass|0-$", "module", "x.y.z"] {
            let output = sanitize(input);
            for forbidden in FORBIDDEN_CHARS {
                assert!(!output.contains(*forbidden), "{output:?}");
            }
            for word in RESERVED_WORDS {
                assert_ne!(output, *word);
                for component in output.split('.') {
                    assert_ne!(component, *word);
                }
            }
        }
    }
}
