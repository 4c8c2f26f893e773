//! End-to-end tests over the session pipeline: hand-built ASTs go in,
//! fully resolved and typed programs come out.

use crate::Session;
use ku_ast::{
    Block, CallStat, CompositeLiteral, Expr, ExprKind, Function, FunctionDecl, ModuleName, Node,
    NumericLiteral, PointerToExpr, ReturnStat, TypeDecl, UseDirective, Variable,
    VariableAccessExpr, VariableDecl,
};
use ku_diag::{Category, Position};
use ku_types::{
    EnumMember, EnumType, FunctionId, FunctionType, ModuleId, NamedTypeDef, Primitive,
    StructType, SubstitutionType, Type, TypeReference, UnresolvedName, VariableId, tuple_of,
};

fn pos() -> Position {
    Position::synthetic()
}

fn int_ref() -> TypeReference {
    TypeReference::new(Type::Primitive(Primitive::Int))
}

fn f64_ref() -> TypeReference {
    TypeReference::new(Type::Primitive(Primitive::F64))
}

fn int_lit(value: u128) -> Expr {
    Expr::new(
        ExprKind::NumericLiteral(NumericLiteral {
            int_value: value,
            float_value: 0.0,
            is_float: false,
            ty: None,
        }),
        pos(),
    )
}

fn float_lit(value: f64) -> Expr {
    Expr::new(
        ExprKind::NumericLiteral(NumericLiteral {
            int_value: 0,
            float_value: value,
            is_float: true,
            ty: None,
        }),
        pos(),
    )
}

fn access(parts: &[&str]) -> Expr {
    let (modules, name) = parts.split_at(parts.len() - 1);
    Expr::new(
        ExprKind::VariableAccess(VariableAccessExpr {
            name: UnresolvedName::qualified(modules, name[0]),
            variable: None,
            generic_args: vec![],
        }),
        pos(),
    )
}

fn call(function: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Call(ku_ast::CallExpr {
            function: Box::new(function),
            arguments,
            receiver_access: None,
        }),
        pos(),
    )
}

fn block(nodes: Vec<Node>) -> Block {
    Block {
        nodes,
        non_scoping: false,
        pos: pos(),
    }
}

fn ret(value: Option<Expr>) -> Node {
    Node::ReturnStat(ReturnStat { value, pos: pos() })
}

fn variable(session: &mut Session, name: &str, ty: Option<TypeReference>) -> VariableId {
    session.program.alloc_variable(Variable {
        name: name.to_string(),
        ty,
        mutable: false,
        attrs: Default::default(),
        pos: pos(),
    })
}

fn function(
    session: &mut Session,
    module: ModuleId,
    name: &str,
    ty: FunctionType,
    parameters: Vec<Node>,
    body: Option<Block>,
) -> FunctionId {
    session.program.alloc_function(Function {
        name: name.to_string(),
        ty,
        receiver: None,
        static_receiver: None,
        parameters,
        body,
        module,
        pos: pos(),
    })
}

fn fn_decl(function: FunctionId, public: bool) -> Node {
    Node::FunctionDecl(FunctionDecl {
        function,
        public,
        prototype: false,
        pos: pos(),
    })
}

fn var_decl(variable: VariableId, assignment: Option<Expr>) -> Node {
    Node::VariableDecl(VariableDecl {
        variable,
        assignment,
        public: false,
        pos: pos(),
    })
}

fn type_decl(named_type: ku_types::NamedTypeId) -> Node {
    Node::TypeDecl(TypeDecl {
        named_type,
        public: true,
        pos: pos(),
    })
}

fn main_fn(session: &mut Session, module: ModuleId, body: Vec<Node>) -> FunctionId {
    function(
        session,
        module,
        "main",
        FunctionType {
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        vec![],
        Some(block(body)),
    )
}

fn body_of(session: &Session, function: FunctionId) -> &[Node] {
    session
        .program
        .function(function)
        .body
        .as_ref()
        .map(|b| b.nodes.as_slice())
        .unwrap_or(&[])
}

#[test]
fn numeric_literals_default_to_int_and_f64() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");

    let a = variable(&mut s, "a", None);
    let b = variable(&mut s, "b", None);
    let main = main_fn(
        &mut s,
        module,
        vec![
            var_decl(a, Some(int_lit(2))),
            var_decl(b, Some(float_lit(2.5))),
            ret(Some(int_lit(0))),
        ],
    );
    s.add_file(module, file, vec![fn_decl(main, true)]);

    let analysis = s.analyze().unwrap();
    assert_eq!(s.program.variable(a).ty, Some(int_ref()));
    assert_eq!(s.program.variable(b).ty, Some(f64_ref()));
    assert_eq!(analysis.mangled_names[&main], "main");
    assert!(analysis.warnings.is_empty());
}

#[test]
fn method_dispatch_inserts_auto_deref() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");

    let named = s.program.types.alloc(NamedTypeDef::new(
        "C",
        Type::Struct(StructType {
            members: vec![],
            generic_params: vec![],
        }),
        module,
    ));

    let age = function(
        &mut s,
        module,
        "age",
        FunctionType {
            receiver: Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                "C",
            )))),
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        vec![],
        Some(block(vec![ret(Some(int_lit(0)))])),
    );

    let c = variable(&mut s, "c", None);
    let p = variable(&mut s, "p", None);
    let main = main_fn(
        &mut s,
        module,
        vec![
            var_decl(
                c,
                Some(Expr::new(
                    ExprKind::CompositeLiteral(CompositeLiteral {
                        ty: Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                            "C",
                        )))),
                        fields: vec![],
                        values: vec![],
                    }),
                    pos(),
                )),
            ),
            var_decl(
                p,
                Some(Expr::new(
                    ExprKind::PointerTo(PointerToExpr {
                        access: Box::new(access(&["c"])),
                        mutable: false,
                    }),
                    pos(),
                )),
            ),
            Node::CallStat(CallStat {
                call: call(access(&["p", "age"]), vec![]),
                pos: pos(),
            }),
            ret(Some(int_lit(0))),
        ],
    );
    s.add_file(
        module,
        file,
        vec![type_decl(named), fn_decl(age, false), fn_decl(main, true)],
    );

    s.analyze().unwrap();

    let [_, _, Node::CallStat(stat), _] = body_of(&s, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Call(call) = &stat.call.kind else {
        panic!("call survived as a call");
    };
    let ExprKind::FunctionAccess(fae) = &call.function.kind else {
        panic!("method call did not become a function access");
    };
    assert_eq!(fae.function, age);

    // One implicit deref bridges `^C` to the value receiver.
    let receiver = call.receiver_access.as_deref().expect("receiver present");
    let ExprKind::DerefAccess(deref) = &receiver.kind else {
        panic!("no auto-deref on the receiver");
    };
    assert!(matches!(deref.expr.kind, ExprKind::VariableAccess(_)));
}

#[test]
fn generic_arguments_are_extracted_from_call_sites() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");

    let t = SubstitutionType::new("T");
    let x = variable(
        &mut s,
        "x",
        Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
            "T",
        )))),
    );
    let id_fn = function(
        &mut s,
        module,
        "id",
        FunctionType {
            parameters: vec![TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                "T",
            )))],
            ret: Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                "T",
            )))),
            generic_params: vec![t],
            ..FunctionType::default()
        },
        vec![var_decl(x, None)],
        Some(block(vec![ret(Some(access(&["x"])))])),
    );

    let y = variable(&mut s, "y", None);
    let main = main_fn(
        &mut s,
        module,
        vec![
            var_decl(y, Some(call(access(&["id"]), vec![int_lit(42)]))),
            ret(Some(int_lit(0))),
        ],
    );
    s.add_file(module, file, vec![fn_decl(id_fn, false), fn_decl(main, true)]);

    s.analyze().unwrap();

    assert_eq!(s.program.variable(y).ty, Some(int_ref()));
    let [Node::VariableDecl(decl), _] = body_of(&s, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Call(call) = &decl.assignment.as_ref().unwrap().kind else {
        panic!("assignment is not a call");
    };
    let ExprKind::FunctionAccess(fae) = &call.function.kind else {
        panic!("callee did not resolve");
    };
    assert_eq!(fae.generic_args, vec![int_ref()]);
}

#[test]
fn cross_module_names_resolve_through_use() {
    let mut s = Session::new();
    let lib = s.load("a.b").unwrap();
    let lib_file = s.add_source("b", "a/b/b.ku", "");
    let f = function(
        &mut s,
        lib,
        "f",
        FunctionType {
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        vec![],
        Some(block(vec![ret(Some(int_lit(1)))])),
    );
    s.add_file(lib, lib_file, vec![fn_decl(f, true)]);

    let app = s.load("main.ku").unwrap();
    let app_file = s.add_source("main", "main.ku", "");
    let main = main_fn(
        &mut s,
        app,
        vec![
            Node::CallStat(CallStat {
                call: call(access(&["a", "b", "f"]), vec![]),
                pos: pos(),
            }),
            ret(Some(int_lit(0))),
        ],
    );
    s.add_file(
        app,
        app_file,
        vec![
            Node::UseDirective(UseDirective {
                module_name: UnresolvedName::qualified(&["a"], "b"),
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    let analysis = s.analyze().unwrap();

    let [Node::CallStat(stat), _] = body_of(&s, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Call(call) = &stat.call.kind else {
        panic!("call survived as a call");
    };
    let ExprKind::FunctionAccess(fae) = &call.function.kind else {
        panic!("cross-module call did not resolve");
    };
    assert_eq!(fae.function, f);

    // Mangled symbols are distinct and carry the module path.
    assert_eq!(analysis.mangled_names[&f], "_M1a_M1b_F1f_3int");
    assert_eq!(analysis.mangled_names[&main], "main");
}

#[test]
fn missing_cross_module_names_error_at_the_call_site() {
    let mut s = Session::new();
    let lib = s.load("a.b").unwrap();
    let lib_file = s.add_source("b", "a/b/b.ku", "");
    let f = function(
        &mut s,
        lib,
        "f",
        FunctionType::default(),
        vec![],
        Some(block(vec![])),
    );
    s.add_file(lib, lib_file, vec![fn_decl(f, true)]);

    let app = s.load("main.ku").unwrap();
    let app_file = s.add_source("main", "main.ku", "");
    let main = main_fn(
        &mut s,
        app,
        vec![Node::CallStat(CallStat {
            call: call(access(&["a", "b", "g"]), vec![]),
            pos: pos(),
        })],
    );
    s.add_file(
        app,
        app_file,
        vec![
            Node::UseDirective(UseDirective {
                module_name: UnresolvedName::qualified(&["a"], "b"),
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    let err = s.analyze().unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::UnresolvedName);
    assert!(err.diagnostics()[0].message.contains("a.b.g"));
}

#[test]
fn enum_construction_recovers_generic_arguments() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");

    let t = SubstitutionType::new("T");
    let opt = Type::Enum(EnumType {
        simple: false,
        members: vec![
            EnumMember {
                name: "Some".into(),
                ty: tuple_of(vec![TypeReference::new(Type::Substitution(t.clone()))]),
                tag: 0,
            },
            EnumMember {
                name: "None".into(),
                ty: Type::Primitive(Primitive::Void),
                tag: 1,
            },
        ],
        generic_params: vec![t.clone()],
    });
    let mut def = NamedTypeDef::new("Opt", opt, module);
    def.generic_params = vec![t];
    let named = s.program.types.alloc(def);

    let o = variable(&mut s, "o", None);
    let main = main_fn(
        &mut s,
        module,
        vec![
            var_decl(o, Some(call(access(&["Opt", "Some"]), vec![int_lit(1)]))),
            ret(Some(int_lit(0))),
        ],
    );
    s.add_file(module, file, vec![type_decl(named), fn_decl(main, true)]);

    s.analyze().unwrap();

    let [Node::VariableDecl(decl), _] = body_of(&s, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::EnumLiteral(lit) = &decl.assignment.as_ref().unwrap().kind else {
        panic!("enum construction did not become an enum literal");
    };
    assert_eq!(lit.member, "Some");

    let ty = lit.ty.as_ref().unwrap();
    assert_eq!(ty.base, Type::Named(named));
    assert_eq!(ty.generic_args, vec![int_ref()]);

    let tuple = lit.tuple.as_deref().expect("tuple payload");
    let ExprKind::TupleLiteral(tl) = &tuple.kind else {
        panic!("payload is not a tuple literal");
    };
    assert_eq!(
        tl.ty,
        Some(TypeReference::new(tuple_of(vec![int_ref()])))
    );

    assert_eq!(
        s.program.variable(o).ty,
        Some(TypeReference::with_args(
            Type::Named(named),
            vec![int_ref()]
        ))
    );
}

#[test]
fn import_cycles_are_rejected_before_resolution() {
    let mut s = Session::new();
    let x = s.load("x").unwrap();
    let x_file = s.add_source("x", "x/x.ku", "");
    s.add_file(
        x,
        x_file,
        vec![Node::UseDirective(UseDirective {
            module_name: UnresolvedName::plain("y"),
            pos: pos(),
        })],
    );

    let y = s.load("y").unwrap();
    let y_file = s.add_source("y", "y/y.ku", "");
    s.add_file(
        y,
        y_file,
        vec![Node::UseDirective(UseDirective {
            module_name: UnresolvedName::plain("x"),
            pos: pos(),
        })],
    );

    let err = s.analyze().unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::ImportCycle);
    assert_eq!(err.exit_code().code(), 1);
    assert!(!s.program.module(x).resolved, "resolution never began");
    assert!(!s.program.module(y).resolved, "resolution never began");
}

#[test]
fn duplicate_main_functions_are_rejected_during_resolution() {
    let mut s = Session::new();
    let one = s.load("one").unwrap();
    let one_file = s.add_source("one", "one/one.ku", "");
    let main_one = main_fn(&mut s, one, vec![ret(Some(int_lit(0)))]);
    s.add_file(one, one_file, vec![fn_decl(main_one, true)]);

    let two = s.load("two").unwrap();
    let two_file = s.add_source("two", "two/two.ku", "");
    let main_two = main_fn(&mut s, two, vec![ret(Some(int_lit(0)))]);
    s.add_file(two, two_file, vec![fn_decl(main_two, true)]);

    let err = s.analyze().unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::Redeclaration);
}

#[test]
fn analysis_is_idempotent_per_module() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");
    let a = variable(&mut s, "a", None);
    let main = main_fn(
        &mut s,
        module,
        vec![var_decl(a, Some(int_lit(2))), ret(Some(int_lit(0)))],
    );
    s.add_file(module, file, vec![fn_decl(main, true)]);

    s.analyze().unwrap();

    // Re-running the passes by hand is a no-op thanks to the
    // resolved/inferred guards.
    let c_module = s.c_module();
    ku_resolve::resolve_module(&mut s.program, &s.lookup, module, c_module).unwrap();
    let warnings = ku_infer::infer_submodule(&mut s.program, module, "main").unwrap();
    assert!(warnings.is_empty());
    assert_eq!(s.program.variable(a).ty, Some(int_ref()));
}

#[test]
fn linked_libraries_are_collected_per_module() {
    let mut s = Session::new();
    let module = s.load("main.ku").unwrap();
    let file = s.add_source("main", "main.ku", "");
    let main = main_fn(&mut s, module, vec![ret(Some(int_lit(0)))]);
    s.add_file(
        module,
        file,
        vec![
            Node::LinkDirective(ku_ast::LinkDirective {
                library: "m".into(),
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    let analysis = s.analyze().unwrap();
    let (name, libs) = &analysis.linked_libraries[0];
    assert_eq!(name, &ModuleName::single("__main"));
    assert_eq!(libs, &vec!["m".to_string()]);
}
