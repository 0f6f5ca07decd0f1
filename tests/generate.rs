//! Generation scenarios over programmatically built assembly graphs.

use clrbindgen::{
    codegen::{
        self,
        typemap::{ResolvedType, TypeResolver},
    },
    config::Config,
    metadata::descriptor::{
        AssemblyGraph, ConstantValue, FieldDesc, GraphBuilder, MethodDesc, ParamDesc, Primitive,
        TypeDesc, TypeKind, TypeName, TypeSig,
    },
    Error,
};

/// Resolves names against a single prepared graph, the way the session resolver does
/// for intra-assembly references.
struct GraphResolver<'a> {
    graph: &'a AssemblyGraph,
}

impl TypeResolver for GraphResolver<'_> {
    fn resolve(&mut self, name: &TypeName) -> Option<ResolvedType> {
        if name.assembly.is_some() {
            return None;
        }
        let id = self.graph.find(&name.full_name())?;
        let desc = self.graph.ty(id);
        Some(ResolvedType {
            kind: desc.kind,
            is_generic: !desc.generic_params.is_empty(),
            assembly: self.graph.name.clone(),
            full_name: desc.full_name.clone(),
            module_name: desc.module_name.clone(),
            qualified_name: desc.qualified_name.clone(),
        })
    }
}

fn static_method(name: &str, return_type: TypeSig, params: &[(&str, TypeSig)]) -> MethodDesc {
    MethodDesc {
        name: name.to_string(),
        is_static: true,
        is_virtual: false,
        is_final: false,
        is_private: false,
        is_ctor: false,
        generic_params: Vec::new(),
        return_type,
        params: params
            .iter()
            .map(|(param_name, sig)| ParamDesc {
                name: (*param_name).to_string(),
                sig: sig.clone(),
            })
            .collect(),
    }
}

fn season_enum() -> TypeDesc {
    let mut desc = TypeDesc::new(TypeKind::Enum, "Acme", "Season");
    desc.base = Some(TypeSig::Named(TypeName {
        assembly: Some("mscorlib".to_string()),
        namespace: "System".to_string(),
        name: "Enum".to_string(),
    }));
    desc.fields.push(FieldDesc {
        name: "value__".to_string(),
        is_static: false,
        sig: TypeSig::Primitive(Primitive::Int32),
        constant: None,
    });
    for (value, member) in ["Spring", "Summer", "Autumn", "Winter"].iter().enumerate() {
        desc.fields.push(FieldDesc {
            name: (*member).to_string(),
            is_static: true,
            sig: TypeSig::Named(TypeName {
                assembly: None,
                namespace: "Acme".to_string(),
                name: "Season".to_string(),
            }),
            constant: Some(ConstantValue(value as i128)),
        });
    }
    desc
}

fn generate(
    graph: &mut AssemblyGraph,
    config: &Config,
) -> clrbindgen::Result<codegen::GeneratedTree> {
    let package = codegen::ident::package_name(&graph.name);
    codegen::prepare_graph(graph, &package);
    let graph = &*graph;
    let mut resolver = GraphResolver { graph };
    codegen::generate_assembly(graph, &package, config, &mut resolver)
}

#[test]
fn season_enum_module() {
    let mut builder = GraphBuilder::new("AcmeLib");
    builder.add_type(season_enum());
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    assert!(module.starts_with("module AcmeLib.Acme;\n"));
    assert!(module.contains("/* .NET Enum */ struct Season"));
    for (value, member) in ["Spring", "Summer", "Autumn", "Winter"].iter().enumerate() {
        assert!(module.contains(&format!("{member} = typeof(this)(int({value})),")));
    }
    assert!(module.contains("private int value__;"));
    assert!(module
        .contains("static immutable __typeSpec = __d.clrbridge.TypeSpec(\"AcmeLib\", \"Acme.Season\");"));
    assert!(module.contains("opBinary"));

    let umbrella = tree.files.get("all.d").unwrap();
    assert!(umbrella.contains("module AcmeLib.all;"));
    assert!(umbrella.contains("public import AcmeLib.Acme;"));
}

#[test]
fn disabled_type_is_a_placeholder() {
    let mut builder = GraphBuilder::new("AcmeLib");
    builder.add_type(season_enum());
    let mut weather = TypeDesc::new(TypeKind::Class, "Acme", "Weather");
    weather.methods.push(static_method(
        "Forecast",
        TypeSig::Void,
        &[],
    ));
    builder.add_type(weather);
    let mut graph = builder.finish().unwrap();

    let config = Config::parse(
        "bindings.cfg",
        "Assemblies Whitelist\nAssembly AcmeLib Whitelist\nType Acme.Season\n",
    )
    .unwrap();
    let tree = generate(&mut graph, &config).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    // The mentioned type shrinks to a placeholder with zero members
    assert!(module.contains("// type 'Acme.Season' is disabled by configuration"));
    assert!(module.contains("/* DisabledType */ struct Season"));
    assert!(!module.contains("Spring"));
    assert!(!module.contains("opBinary"));

    // The unmentioned sibling is emitted normally
    assert!(module.contains("/* .NET class */ struct Weather"));
    assert!(module.contains("public static void Forecast()"));
}

#[test]
fn add_method_thunk_boxes_and_releases() {
    let mut builder = GraphBuilder::new("AcmeLib");
    let mut math = TypeDesc::new(TypeKind::Class, "Acme", "Math");
    math.methods.push(static_method(
        "Add",
        TypeSig::Primitive(Primitive::Int32),
        &[
            ("a", TypeSig::Primitive(Primitive::Int32)),
            ("b", TypeSig::Primitive(Primitive::Int32)),
        ],
    ));
    builder.add_type(math);
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    assert!(module.contains("public static int Add(int a, int b)"));
    assert!(module.contains(
        "enum __methodSpec = __d.clrbridge.MethodSpec(__typeSpec, \"Add\", [], \
         [__d.clrbridge.TypeSpec(\"mscorlib\", \"System.Int32\"), \
         __d.clrbridge.TypeSpec(\"mscorlib\", \"System.Int32\")]);"
    ));
    assert!(module.contains("auto __param0__ = __d.globalClrBridge.box!(__d.clr.PrimitiveType.Int32)(a);"));
    assert!(module.contains("auto __param1__ = __d.globalClrBridge.box!(__d.clr.PrimitiveType.Int32)(b);"));
    assert!(module.contains("__d.ObjectArray __param_values__ = __d.globalClrBridge.makeObjectArray("));

    // Released: runtime type, member handle, both boxed params, the argument array
    assert_eq!(
        module.matches("scope (exit) __d.globalClrBridge.release(").count(),
        5
    );
    assert!(module.contains(
        "__d.globalClrBridge.funcs.CallGeneric(__member__, __d.clr.DotNetObject.nullObject, __param_values__, cast(void**)&__return_value__);"
    ));
    assert!(module.contains("return __return_value__;"));
}

#[test]
fn type_spec_nests_one_entry_per_generic_argument() {
    let list = TypeSig::GenericInst {
        base: Box::new(TypeSig::Named(TypeName {
            assembly: Some("mscorlib".to_string()),
            namespace: "System.Collections.Generic".to_string(),
            name: "Dictionary`2".to_string(),
        })),
        args: vec![
            TypeSig::Primitive(Primitive::String),
            TypeSig::Primitive(Primitive::Int32),
        ],
    };

    let mut builder = GraphBuilder::new("AcmeLib");
    let mut holder = TypeDesc::new(TypeKind::Class, "Acme", "Holder");
    holder
        .methods
        .push(static_method("Consume", TypeSig::Void, &[("table", list)]));
    builder.add_type(holder);
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    let spec_line = module
        .lines()
        .find(|line| line.contains("enum __methodSpec"))
        .unwrap();
    // One outer spec for the instantiation plus exactly one nested spec per argument
    assert_eq!(spec_line.matches("__d.clrbridge.TypeSpec(").count(), 3);
    assert!(spec_line.contains("\"System.Collections.Generic.Dictionary`2\""));

    // The instantiated type itself stays a documented placeholder in the signature
    assert!(module.contains("__d.clrbridge.Unsupported!("));
}

#[test]
fn nested_generics_redeclare_only_their_own_parameters() {
    let mut builder = GraphBuilder::new("AcmeLib");
    let mut outer = TypeDesc::new(TypeKind::Class, "Acme", "Outer`1");
    outer.generic_params = vec!["T".to_string()];
    let outer_id = builder.add_type(outer);
    let mut inner = TypeDesc::new(TypeKind::Class, "", "Inner`1");
    inner.generic_params = vec!["T".to_string(), "U".to_string()];
    inner.declaring = Some(outer_id);
    builder.add_type(inner);
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    assert!(module.contains("/* .NET class */ struct Outer_1(T)"));
    // The nested declaration introduces only the parameter beyond the enclosing one
    assert!(module.contains("/* .NET class */ struct Inner_1(U)"));
    assert!(!module.contains("struct Inner_1(T, U)"));
}

#[test]
fn namespace_case_collision_fails_generation() {
    let mut builder = GraphBuilder::new("AcmeLib");
    builder.add_type(TypeDesc::new(TypeKind::Class, "Foo.Bar", "A"));
    builder.add_type(TypeDesc::new(TypeKind::Class, "foo.bar", "B"));
    let mut graph = builder.finish().unwrap();

    let error = generate(&mut graph, &Config::open()).unwrap_err();
    match error {
        Error::NamespaceCaseCollision(first, second) => {
            assert_eq!(first, "Foo.Bar");
            assert_eq!(second, "foo.bar");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn stale_configured_type_fails_the_run() {
    let mut builder = GraphBuilder::new("AcmeLib");
    builder.add_type(season_enum());
    let mut graph = builder.finish().unwrap();

    let config = Config::parse(
        "bindings.cfg",
        "Assemblies\nAssembly AcmeLib Whitelist\nType Acme.Gone\n",
    )
    .unwrap();
    let error = generate(&mut graph, &config).unwrap_err();
    match error {
        Error::ConfigStaleType {
            file,
            line,
            type_name,
            assembly,
        } => {
            assert_eq!(file, "bindings.cfg");
            assert_eq!(line, 3);
            assert_eq!(type_name, "Acme.Gone");
            assert_eq!(assembly, "AcmeLib");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn generation_is_deterministic() {
    let build = || {
        let mut builder = GraphBuilder::new("AcmeLib");
        builder.add_type(season_enum());
        let mut math = TypeDesc::new(TypeKind::Class, "Acme", "Math");
        math.methods.push(static_method(
            "Mark",
            TypeSig::Void,
            &[("season", TypeSig::Named(TypeName {
                assembly: None,
                namespace: "Acme".to_string(),
                name: "Season".to_string(),
            }))],
        ));
        builder.add_type(math);
        builder.finish().unwrap()
    };

    let mut first_graph = build();
    let mut second_graph = build();
    let first = generate(&mut first_graph, &Config::open()).unwrap();
    let second = generate(&mut second_graph, &Config::open()).unwrap();
    assert_eq!(first.files, second.files);
}

#[test]
fn enum_parameters_box_through_their_runtime_type() {
    let mut builder = GraphBuilder::new("AcmeLib");
    builder.add_type(season_enum());
    let mut math = TypeDesc::new(TypeKind::Class, "Acme", "Math");
    math.methods.push(static_method(
        "Mark",
        TypeSig::Void,
        &[("season", TypeSig::Named(TypeName {
            assembly: None,
            namespace: "Acme".to_string(),
            name: "Season".to_string(),
        }))],
    ));
    builder.add_type(math);
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    // The enum parameter spells the generated wrapper type, qualified by module
    assert!(module.contains("public static void Mark(AcmeLib.Acme.Season season)"));
    assert!(module.contains("static import AcmeLib.Acme;"));
    // Boxing goes through an extra resolution of the enum's own TypeSpec
    assert!(module.contains(
        "const __param0_type__ = __d.globalClrBridge.resolveClosedType(__d.clrbridge.TypeSpec(\"AcmeLib\", \"Acme.Season\"));"
    ));
    assert!(module.contains("auto __param0__ = __d.globalClrBridge.boxEnum(__param0_type__, season);"));
    // Released: runtime type, member handle, the enum's resolved type, the boxed
    // enum value, and the argument array
    assert_eq!(
        module.matches("scope (exit) __d.globalClrBridge.release(").count(),
        5
    );
}

#[test]
fn byref_parameters_are_deferred_with_null_placeholders() {
    let mut builder = GraphBuilder::new("AcmeLib");
    let mut math = TypeDesc::new(TypeKind::Class, "Acme", "Math");
    math.methods.push(static_method(
        "TryParse",
        TypeSig::Primitive(Primitive::Boolean),
        &[
            ("text", TypeSig::Primitive(Primitive::String)),
            (
                "result",
                TypeSig::ByRef(Box::new(TypeSig::Primitive(Primitive::Int32))),
            ),
        ],
    ));
    builder.add_type(math);
    let mut graph = builder.finish().unwrap();

    let tree = generate(&mut graph, &Config::open()).unwrap();
    let module = tree.files.get("Acme/package.d").unwrap();

    // By-ref parameter keeps its slot in the argument array but is not marshaled
    assert!(module.contains("__d.clr.DotNetObject.nullObject // System.Int32& not marshaled"));
    // Boolean return marshals through the 16-bit representation and narrows back
    assert!(module.contains("ushort __return_value__;"));
    assert!(module.contains("return __return_value__ != 0;"));
}
