//! Tests for the resolution pass.
//!
//! Each test constructs an AST by hand the way the parser would deliver
//! it — unresolved dotted names, untagged declarations — and checks the
//! rewritten tree or the reported error.

use ku_ast::{
    Block, CallStat, EnumLiteral, Expr, ExprKind, Function, FunctionDecl, LambdaExpr, Module,
    ModuleLookup, ModuleName, Node, Program, ReturnStat, Submodule, UseDirective, Variable,
    VariableAccessExpr, VariableDecl,
};
use ku_diag::{Category, Position, SourceFile};
use ku_types::{
    EnumMember, EnumType, FunctionId, FunctionType, ModuleId, NamedTypeDef, Primitive,
    StructMember, StructType, Type, TypeReference, UnresolvedName, VariableId,
};

use crate::{create_c_module, resolve_module};

fn pos() -> Position {
    Position::synthetic()
}

fn int_ref() -> TypeReference {
    TypeReference::new(Type::Primitive(Primitive::Int))
}

fn int_lit(value: u128) -> Expr {
    Expr::new(
        ExprKind::NumericLiteral(ku_ast::NumericLiteral {
            int_value: value,
            float_value: 0.0,
            is_float: false,
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

struct Builder {
    program: Program,
    lookup: ModuleLookup,
    c_module: ModuleId,
}

impl Builder {
    fn new() -> Self {
        let mut program = Program::new();
        let c_module = create_c_module(&mut program);
        Self {
            program,
            lookup: ModuleLookup::new(),
            c_module,
        }
    }

    fn module(&mut self, parts: &[&str]) -> ModuleId {
        let name = ModuleName::new(parts);
        let id = ModuleId(self.program.modules.len() as u32);
        let id = self.program.alloc_module(Module::new(name.clone(), id));
        self.lookup.create(&name).module = Some(id);
        id
    }

    fn file(&mut self, module: ModuleId, key: &str, nodes: Vec<Node>) {
        let file = self
            .program
            .sources
            .add(SourceFile::new(key, format!("{key}.ku"), ""));
        self.program
            .module_mut(module)
            .parts
            .insert(key.to_string(), Submodule::new(module, file, nodes));
    }

    fn function(
        &mut self,
        module: ModuleId,
        name: &str,
        ty: FunctionType,
        body: Option<Block>,
    ) -> FunctionId {
        self.program.alloc_function(Function {
            name: name.to_string(),
            ty,
            receiver: None,
            static_receiver: None,
            parameters: vec![],
            body,
            module,
            pos: pos(),
        })
    }

    fn variable(&mut self, name: &str, ty: Option<TypeReference>) -> VariableId {
        self.program.alloc_variable(Variable {
            name: name.to_string(),
            ty,
            mutable: false,
            attrs: Default::default(),
            pos: pos(),
        })
    }

    fn resolve(&mut self, module: ModuleId) -> Result<(), ku_diag::DiagnosticError> {
        resolve_module(&mut self.program, &self.lookup, module, self.c_module)
    }
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

fn body_of(program: &Program, function: FunctionId) -> &[Node] {
    program
        .function(function)
        .body
        .as_ref()
        .map(|b| b.nodes.as_slice())
        .unwrap_or(&[])
}

#[test]
fn calls_resolve_to_function_accesses() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let f = b.function(module, "f", FunctionType::default(), Some(block(vec![])));
    let main_body = block(vec![Node::CallStat(CallStat {
        call: call(access(&["f"]), vec![]),
        pos: pos(),
    })]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(module, "m", vec![fn_decl(f, false), fn_decl(main, true)]);

    b.resolve(module).unwrap();

    let [Node::CallStat(stat)] = body_of(&b.program, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Call(call) = &stat.call.kind else {
        panic!("call survived as a call");
    };
    let ExprKind::FunctionAccess(fae) = &call.function.kind else {
        panic!("callee did not resolve to a function access");
    };
    assert_eq!(fae.function, f);
}

#[test]
fn dotted_names_peel_into_struct_accesses() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let strukt = Type::Struct(StructType {
        members: vec![StructMember {
            name: "x".into(),
            ty: int_ref(),
            public: true,
        }],
        generic_params: vec![],
    });
    let named = b
        .program
        .types
        .alloc(NamedTypeDef::new("S", strukt, module));

    let s = b.variable("s", Some(TypeReference::new(Type::Named(named))));
    let t = b.variable("t", None);
    let main_body = block(vec![
        var_decl(s, None),
        var_decl(t, Some(access(&["s", "x"]))),
    ]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    b.resolve(module).unwrap();

    let [_, Node::VariableDecl(decl)] = body_of(&b.program, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::StructAccess(sa) = &decl.assignment.as_ref().unwrap().kind else {
        panic!("dotted access did not become a struct access");
    };
    assert_eq!(sa.member, "x");
    let ExprKind::VariableAccess(base) = &sa.struct_expr.kind else {
        panic!("base is not a variable access");
    };
    assert_eq!(base.variable, Some(s));
}

#[test]
fn enum_members_resolve_to_literals() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let color = Type::Enum(EnumType {
        simple: true,
        members: vec![
            EnumMember {
                name: "Red".into(),
                ty: Type::Primitive(Primitive::Void),
                tag: 0,
            },
            EnumMember {
                name: "Green".into(),
                ty: Type::Primitive(Primitive::Void),
                tag: 1,
            },
        ],
        generic_params: vec![],
    });
    let named = b.program.types.alloc(NamedTypeDef::new("Color", color, module));

    let c = b.variable("c", None);
    let main_body = block(vec![var_decl(c, Some(access(&["Color", "Red"])))]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    b.resolve(module).unwrap();

    let [Node::VariableDecl(decl)] = body_of(&b.program, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::EnumLiteral(EnumLiteral {
        member,
        ty: Some(ty),
        tuple: None,
        composite: None,
    }) = &decl.assignment.as_ref().unwrap().kind
    else {
        panic!("enum member access did not become an enum literal");
    };
    assert_eq!(member, "Red");
    assert_eq!(ty.base, Type::Named(named));

    // A missing member is an unresolved-name error at the access site.
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let color = Type::Enum(EnumType {
        simple: true,
        members: vec![],
        generic_params: vec![],
    });
    let named = b.program.types.alloc(NamedTypeDef::new("Color", color, module));
    let c = b.variable("c", None);
    let main_body = block(vec![var_decl(c, Some(access(&["Color", "Blue"])))]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );
    let err = b.resolve(module).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::UnresolvedName);
}

#[test]
fn call_of_a_type_name_is_a_cast() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "Meters",
        Type::Primitive(Primitive::Int),
        module,
    ));
    let m = b.variable("m", None);
    let main_body = block(vec![var_decl(
        m,
        Some(call(access(&["Meters"]), vec![int_lit(5)])),
    )]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    b.resolve(module).unwrap();

    let [Node::VariableDecl(decl)] = body_of(&b.program, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Cast(cast) = &decl.assignment.as_ref().unwrap().kind else {
        panic!("type-name call did not become a cast");
    };
    assert_eq!(cast.ty.base, Type::Named(named));

    // A cast with the wrong arity is rejected.
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "Meters",
        Type::Primitive(Primitive::Int),
        module,
    ));
    let m = b.variable("m", None);
    let main_body = block(vec![var_decl(
        m,
        Some(call(access(&["Meters"]), vec![int_lit(5), int_lit(6)])),
    )]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );
    let err = b.resolve(module).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::Arity);
}

#[test]
fn cross_module_privacy_is_enforced() {
    let mut b = Builder::new();
    let lib = b.module(&["lib"]);
    let secret = b.function(lib, "secret", FunctionType::default(), Some(block(vec![])));
    b.file(lib, "lib", vec![fn_decl(secret, false)]);

    let app = b.module(&["app"]);
    let main_body = block(vec![Node::CallStat(CallStat {
        call: call(access(&["lib", "secret"]), vec![]),
        pos: pos(),
    })]);
    let main = b.function(app, "main", FunctionType::default(), Some(main_body));
    b.file(
        app,
        "app",
        vec![
            Node::UseDirective(UseDirective {
                module_name: UnresolvedName::plain("lib"),
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    let err = b.resolve(app).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::Privacy);
}

#[test]
fn public_cross_module_calls_resolve() {
    let mut b = Builder::new();
    let lib = b.module(&["a", "b"]);
    let f = b.function(
        lib,
        "f",
        FunctionType {
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        Some(block(vec![Node::ReturnStat(ReturnStat {
            value: Some(int_lit(0)),
            pos: pos(),
        })])),
    );
    b.file(lib, "b", vec![fn_decl(f, true)]);

    let app = b.module(&["app"]);
    let main_body = block(vec![Node::CallStat(CallStat {
        call: call(access(&["a", "b", "f"]), vec![]),
        pos: pos(),
    })]);
    let main = b.function(app, "main", FunctionType::default(), Some(main_body));
    b.file(
        app,
        "app",
        vec![
            Node::UseDirective(UseDirective {
                module_name: UnresolvedName::qualified(&["a"], "b"),
                pos: pos(),
            }),
            fn_decl(main, true),
        ],
    );

    b.resolve(app).unwrap();

    let [Node::CallStat(stat)] = body_of(&b.program, main) else {
        panic!("unexpected body shape");
    };
    let ExprKind::Call(call) = &stat.call.kind else {
        panic!("call survived as a call");
    };
    let ExprKind::FunctionAccess(fae) = &call.function.kind else {
        panic!("dotted module call did not resolve to a function access");
    };
    assert_eq!(fae.function, f);
}

#[test]
fn lambdas_cannot_capture_enclosing_locals() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);

    let lambda = b.function(
        module,
        "",
        FunctionType {
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        Some(block(vec![Node::ReturnStat(ReturnStat {
            value: Some(access(&["x"])),
            pos: pos(),
        })])),
    );

    let x = b.variable("x", None);
    let l = b.variable("l", None);
    let main_body = block(vec![
        var_decl(x, Some(int_lit(2))),
        var_decl(
            l,
            Some(Expr::new(
                ExprKind::Lambda(LambdaExpr { function: lambda }),
                pos(),
            )),
        ),
    ]);
    let main = b.function(module, "main", FunctionType::default(), Some(main_body));
    b.file(module, "m", vec![fn_decl(main, true)]);

    let err = b.resolve(module).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::Capture);
}

#[test]
fn methods_attach_and_synthesize_this() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "C",
        Type::Struct(StructType {
            members: vec![],
            generic_params: vec![],
        }),
        module,
    ));

    let age = b.function(
        module,
        "age",
        FunctionType {
            receiver: Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                "C",
            )))),
            ret: Some(int_ref()),
            ..FunctionType::default()
        },
        Some(block(vec![Node::ReturnStat(ReturnStat {
            value: Some(int_lit(0)),
            pos: pos(),
        })])),
    );
    let main = b.function(module, "main", FunctionType::default(), Some(block(vec![])));
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(age, false),
            fn_decl(main, true),
        ],
    );

    b.resolve(module).unwrap();

    assert_eq!(b.program.types.named(named).methods, vec![age]);
    let receiver = b
        .program
        .function(age)
        .receiver_variable()
        .expect("receiver was synthesized");
    assert_eq!(b.program.variable(receiver).name, "this");
    assert_eq!(
        b.program.variable(receiver).ty,
        Some(TypeReference::new(Type::Named(named)))
    );
}

#[test]
fn foreign_receiver_types_are_rejected() {
    let mut b = Builder::new();
    let lib = b.module(&["lib"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "T",
        Type::Struct(StructType {
            members: vec![],
            generic_params: vec![],
        }),
        lib,
    ));
    b.file(
        lib,
        "lib",
        vec![Node::TypeDecl(ku_ast::TypeDecl {
            named_type: named,
            public: true,
            pos: pos(),
        })],
    );

    let app = b.module(&["app"]);
    let method = b.function(
        app,
        "m",
        FunctionType {
            receiver: Some(TypeReference::new(Type::Unresolved(
                UnresolvedName::qualified(&["lib"], "T"),
            ))),
            ..FunctionType::default()
        },
        Some(block(vec![])),
    );
    b.file(
        app,
        "app",
        vec![
            Node::UseDirective(UseDirective {
                module_name: UnresolvedName::plain("lib"),
                pos: pos(),
            }),
            fn_decl(method, false),
        ],
    );

    let err = b.resolve(app).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::ReceiverMismatch);
}

#[test]
fn duplicate_declarations_are_rejected() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let f1 = b.function(module, "f", FunctionType::default(), Some(block(vec![])));
    let f2 = b.function(module, "f", FunctionType::default(), Some(block(vec![])));
    b.file(module, "m", vec![fn_decl(f1, false), fn_decl(f2, false)]);

    let err = b.resolve(module).unwrap_err();
    assert_eq!(err.diagnostics()[0].category, Category::Redeclaration);
}

#[test]
fn static_methods_attach_to_their_type() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "C",
        Type::Struct(StructType {
            members: vec![],
            generic_params: vec![],
        }),
        module,
    ));
    let make = b.function(module, "make", FunctionType::default(), Some(block(vec![])));
    b.program.function_mut(make).static_receiver =
        Some(Type::Unresolved(UnresolvedName::plain("C")));

    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(make, false),
        ],
    );

    b.resolve(module).unwrap();
    assert_eq!(b.program.types.named(named).static_methods, vec![make]);
    assert_eq!(
        b.program.function(make).static_receiver,
        Some(Type::Named(named))
    );
}

#[test]
fn resolution_is_idempotent() {
    let mut b = Builder::new();
    let module = b.module(&["m"]);
    let named = b.program.types.alloc(NamedTypeDef::new(
        "C",
        Type::Struct(StructType {
            members: vec![],
            generic_params: vec![],
        }),
        module,
    ));
    let age = b.function(
        module,
        "age",
        FunctionType {
            receiver: Some(TypeReference::new(Type::Unresolved(UnresolvedName::plain(
                "C",
            )))),
            ..FunctionType::default()
        },
        Some(block(vec![])),
    );
    b.file(
        module,
        "m",
        vec![
            Node::TypeDecl(ku_ast::TypeDecl {
                named_type: named,
                public: false,
                pos: pos(),
            }),
            fn_decl(age, false),
        ],
    );

    b.resolve(module).unwrap();
    b.resolve(module).unwrap();
    // The second run was a no-op: the method was not attached twice.
    assert_eq!(b.program.types.named(named).methods, vec![age]);
}
