//! Micro-benchmarks over the semantic pipeline: resolving and inferring
//! synthetic modules of increasing size.

use std::hint::black_box;

use divan::{AllocProfiler, Bencher};
use ku::Session;
use ku_ast::{
    Block, Expr, ExprKind, Function, FunctionDecl, Node, NumericLiteral, ReturnStat, Variable,
    VariableAccessExpr, VariableDecl,
};
use ku_diag::Position;
use ku_types::{FunctionType, ModuleId, Primitive, Type, TypeReference, UnresolvedName};

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn pos() -> Position {
    Position::synthetic()
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

fn var_access(name: &str) -> Expr {
    Expr::new(
        ExprKind::VariableAccess(VariableAccessExpr {
            name: UnresolvedName::plain(name),
            variable: None,
            generic_args: vec![],
        }),
        pos(),
    )
}

/// A module with `function_count` small functions, each declaring a
/// couple of locals and returning one of them.
fn build_session(function_count: usize) -> Session {
    let mut session = Session::new();
    let module = session.load("main.ku").expect("module loads");
    let file = session.add_source("main", "main.ku", "");

    let mut nodes = Vec::with_capacity(function_count + 1);
    for idx in 0..function_count {
        nodes.push(small_function(&mut session, module, &format!("f{idx}")));
    }
    nodes.push(main_function(&mut session, module));
    session.add_file(module, file, nodes);
    session
}

fn small_function(session: &mut Session, module: ModuleId, name: &str) -> Node {
    let a = session.program.alloc_variable(Variable::new("a", pos()));
    let b = session.program.alloc_variable(Variable::new("b", pos()));
    let body = Block {
        nodes: vec![
            Node::VariableDecl(VariableDecl {
                variable: a,
                assignment: Some(int_lit(1)),
                public: false,
                pos: pos(),
            }),
            Node::VariableDecl(VariableDecl {
                variable: b,
                assignment: Some(var_access("a")),
                public: false,
                pos: pos(),
            }),
            Node::ReturnStat(ReturnStat {
                value: Some(var_access("b")),
                pos: pos(),
            }),
        ],
        non_scoping: false,
        pos: pos(),
    };
    let function = session.program.alloc_function(Function {
        name: name.to_string(),
        ty: FunctionType {
            ret: Some(TypeReference::new(Type::Primitive(Primitive::Int))),
            ..FunctionType::default()
        },
        receiver: None,
        static_receiver: None,
        parameters: vec![],
        body: Some(body),
        module,
        pos: pos(),
    });
    Node::FunctionDecl(FunctionDecl {
        function,
        public: false,
        prototype: false,
        pos: pos(),
    })
}

fn main_function(session: &mut Session, module: ModuleId) -> Node {
    let function = session.program.alloc_function(Function {
        name: "main".to_string(),
        ty: FunctionType {
            ret: Some(TypeReference::new(Type::Primitive(Primitive::Int))),
            ..FunctionType::default()
        },
        receiver: None,
        static_receiver: None,
        parameters: vec![],
        body: Some(Block {
            nodes: vec![Node::ReturnStat(ReturnStat {
                value: Some(int_lit(0)),
                pos: pos(),
            })],
            non_scoping: false,
            pos: pos(),
        }),
        module,
        pos: pos(),
    });
    Node::FunctionDecl(FunctionDecl {
        function,
        public: true,
        prototype: false,
        pos: pos(),
    })
}

#[divan::bench(args = [8, 64, 256])]
fn resolve_and_infer_module(bencher: Bencher, function_count: usize) {
    bencher
        .with_inputs(|| build_session(function_count))
        .bench_values(|mut session| {
            let analysis = session.analyze().expect("analysis succeeds");
            black_box(analysis.mangled_names.len())
        });
}
