//! Generic pre/post traversal over the AST with scope hooks.
//!
//! Every semantic pass shares this walker. A visitor gets four hooks:
//! `enter_scope` / `exit_scope`, `visit` (return `false` to skip the
//! node's children), and `post_visit` after the children. Nodes are
//! handed out as `&mut`, so a visitor replaces a node by assigning
//! through the reference — this is how the resolver turns a variable
//! access into a struct access or enum literal, and how the inferrer
//! turns a call through a struct access into a direct method access.
//!
//! Scopes open around scoping blocks, function bodies, and match
//! branches; `do { … }` blocks are non-scoping and reuse the enclosing
//! scope. Children are visited in fixed order, conditions before bodies.
//! Function bodies live in the function arena and are moved out for the
//! duration of the walk so the visitor can borrow the whole [`Program`].

use std::convert::Infallible;

use ku_types::{FunctionId, ModuleId};

use crate::{Block, Expr, ExprKind, LoopKind, Node, Program};

/// A mutable view of one node, across both node categories.
pub enum NodeMut<'a> {
    Item(&'a mut Node),
    Expr(&'a mut Expr),
}

pub trait Visitor {
    type Error;

    fn enter_scope(&mut self) {}
    fn exit_scope(&mut self) {}

    /// Pre-order hook. Return `false` to skip the node's children (and
    /// its `post_visit`).
    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, Self::Error>;

    /// Post-order hook, called after the node's children.
    fn post_visit(
        &mut self,
        _program: &mut Program,
        _node: NodeMut<'_>,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Walk every top-level node of one sub-module.
pub fn walk_submodule<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    module: ModuleId,
    file: &str,
) -> Result<(), V::Error> {
    let mut nodes = {
        let submodule = program
            .module_mut(module)
            .parts
            .get_mut(file)
            .unwrap_or_else(|| panic!("INTERNAL ERROR: unknown sub-module `{file}`"));
        std::mem::take(&mut submodule.nodes)
    };

    visitor.enter_scope();
    let result = walk_nodes(visitor, program, &mut nodes);
    visitor.exit_scope();

    program
        .module_mut(module)
        .parts
        .get_mut(file)
        .expect("sub-module exists")
        .nodes = nodes;
    result
}

fn walk_nodes<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    nodes: &mut [Node],
) -> Result<(), V::Error> {
    for node in nodes {
        walk_node(visitor, program, node)?;
    }
    Ok(())
}

pub fn walk_node<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    node: &mut Node,
) -> Result<(), V::Error> {
    if visitor.visit(program, NodeMut::Item(node))? {
        walk_node_children(visitor, program, node)?;
        visitor.post_visit(program, NodeMut::Item(node))?;
    }
    Ok(())
}

pub fn walk_expr<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    expr: &mut Expr,
) -> Result<(), V::Error> {
    if visitor.visit(program, NodeMut::Expr(expr))? {
        walk_expr_children(visitor, program, expr)?;
        visitor.post_visit(program, NodeMut::Expr(expr))?;
    }
    Ok(())
}

fn walk_block<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    block: &mut Block,
) -> Result<(), V::Error> {
    if !block.non_scoping {
        visitor.enter_scope();
    }
    let result = walk_nodes(visitor, program, &mut block.nodes);
    if !block.non_scoping {
        visitor.exit_scope();
    }
    result
}

/// Walk a function's receiver, parameters, and body inside a fresh scope.
///
/// The pieces are moved out of the arena for the duration of the walk and
/// restored afterwards, on every control path.
pub fn walk_function<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    function: FunctionId,
) -> Result<(), V::Error> {
    visitor.enter_scope();

    let (mut receiver, mut parameters, mut body) = {
        let func = program.function_mut(function);
        (
            func.receiver.take(),
            std::mem::take(&mut func.parameters),
            func.body.take(),
        )
    };

    let result = (|| {
        if let Some(node) = receiver.as_deref_mut() {
            walk_node(visitor, program, node)?;
        }
        for param in &mut parameters {
            walk_node(visitor, program, param)?;
        }
        if let Some(block) = body.as_mut() {
            walk_block(visitor, program, block)?;
        }
        Ok(())
    })();

    let func = program.function_mut(function);
    func.receiver = receiver;
    func.parameters = parameters;
    func.body = body;

    visitor.exit_scope();
    result
}

fn walk_node_children<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    node: &mut Node,
) -> Result<(), V::Error> {
    match node {
        Node::TypeDecl(_)
        | Node::UseDirective(_)
        | Node::LinkDirective(_)
        | Node::BreakStat(_)
        | Node::NextStat(_) => Ok(()),

        Node::FunctionDecl(decl) => walk_function(visitor, program, decl.function),

        Node::VariableDecl(decl) => {
            if let Some(assignment) = decl.assignment.as_mut() {
                walk_expr(visitor, program, assignment)?;
            }
            Ok(())
        }

        Node::DestructVarDecl(decl) => walk_expr(visitor, program, &mut decl.assignment),

        Node::BlockStat(stat) => walk_block(visitor, program, &mut stat.block),

        Node::ReturnStat(stat) => {
            if let Some(value) = stat.value.as_mut() {
                walk_expr(visitor, program, value)?;
            }
            Ok(())
        }

        Node::IfStat(stat) => {
            for expr in &mut stat.exprs {
                walk_expr(visitor, program, expr)?;
            }
            for body in &mut stat.bodies {
                walk_block(visitor, program, body)?;
            }
            if let Some(else_body) = stat.else_body.as_mut() {
                walk_block(visitor, program, else_body)?;
            }
            Ok(())
        }

        Node::AssignStat(stat) => {
            walk_expr(visitor, program, &mut stat.assignment)?;
            walk_expr(visitor, program, &mut stat.access)
        }

        Node::BinopAssignStat(stat) => {
            walk_expr(visitor, program, &mut stat.assignment)?;
            walk_expr(visitor, program, &mut stat.access)
        }

        Node::DestructAssignStat(stat) => {
            walk_expr(visitor, program, &mut stat.assignment)?;
            for access in &mut stat.accesses {
                walk_expr(visitor, program, access)?;
            }
            Ok(())
        }

        Node::DestructBinopAssignStat(stat) => {
            walk_expr(visitor, program, &mut stat.assignment)?;
            for access in &mut stat.accesses {
                walk_expr(visitor, program, access)?;
            }
            Ok(())
        }

        Node::LoopStat(stat) => {
            if let LoopKind::Conditional(condition) = &mut stat.kind {
                walk_expr(visitor, program, condition)?;
            }
            walk_block(visitor, program, &mut stat.body)
        }

        Node::MatchStat(stat) => {
            walk_expr(visitor, program, &mut stat.target)?;
            for branch in &mut stat.branches {
                visitor.enter_scope();
                let result = walk_expr(visitor, program, &mut branch.pattern)
                    .and_then(|()| walk_node(visitor, program, &mut branch.body));
                visitor.exit_scope();
                result?;
            }
            Ok(())
        }

        Node::CallStat(stat) => walk_expr(visitor, program, &mut stat.call),
        Node::DeferStat(stat) => walk_expr(visitor, program, &mut stat.call),
    }
}

fn walk_expr_children<V: Visitor>(
    visitor: &mut V,
    program: &mut Program,
    expr: &mut Expr,
) -> Result<(), V::Error> {
    match &mut expr.kind {
        ExprKind::NumericLiteral(_)
        | ExprKind::StringLiteral(_)
        | ExprKind::BoolLiteral(_)
        | ExprKind::RuneLiteral(_)
        | ExprKind::VariableAccess(_)
        | ExprKind::DiscardAccess(_)
        | ExprKind::EnumPattern(_) => Ok(()),

        ExprKind::TupleLiteral(lit) => {
            for member in &mut lit.members {
                walk_expr(visitor, program, member)?;
            }
            Ok(())
        }

        ExprKind::CompositeLiteral(lit) => {
            for value in &mut lit.values {
                walk_expr(visitor, program, value)?;
            }
            Ok(())
        }

        ExprKind::EnumLiteral(lit) => {
            if let Some(tuple) = lit.tuple.as_deref_mut() {
                walk_expr(visitor, program, tuple)?;
            }
            if let Some(composite) = lit.composite.as_deref_mut() {
                walk_expr(visitor, program, composite)?;
            }
            Ok(())
        }

        ExprKind::Binary(binary) => {
            walk_expr(visitor, program, &mut binary.lhand)?;
            walk_expr(visitor, program, &mut binary.rhand)
        }

        ExprKind::Unary(unary) => walk_expr(visitor, program, &mut unary.expr),

        ExprKind::Call(call) => {
            walk_expr(visitor, program, &mut call.function)?;
            for argument in &mut call.arguments {
                walk_expr(visitor, program, argument)?;
            }
            if let Some(receiver) = call.receiver_access.as_deref_mut() {
                walk_expr(visitor, program, receiver)?;
            }
            Ok(())
        }

        ExprKind::Cast(cast) => walk_expr(visitor, program, &mut cast.expr),

        ExprKind::Lambda(lambda) => walk_function(visitor, program, lambda.function),

        ExprKind::Sizeof(sizeof) => {
            if let Some(inner) = sizeof.expr.as_deref_mut() {
                walk_expr(visitor, program, inner)?;
            }
            Ok(())
        }

        ExprKind::ArrayLen(len) => walk_expr(visitor, program, &mut len.expr),

        ExprKind::StructAccess(access) => walk_expr(visitor, program, &mut access.struct_expr),

        ExprKind::ArrayAccess(access) => {
            walk_expr(visitor, program, &mut access.array)?;
            walk_expr(visitor, program, &mut access.subscript)
        }

        ExprKind::DerefAccess(deref) => walk_expr(visitor, program, &mut deref.expr),

        ExprKind::FunctionAccess(access) => {
            if let Some(receiver) = access.receiver_access.as_deref_mut() {
                walk_expr(visitor, program, receiver)?;
            }
            Ok(())
        }

        ExprKind::PointerTo(ptr) => walk_expr(visitor, program, &mut ptr.access),
        ExprKind::ReferenceTo(rf) => walk_expr(visitor, program, &mut rf.access),
    }
}

// ---------------------------------------------------------------------------
// Bulk traversal
// ---------------------------------------------------------------------------

struct EachNode<F> {
    each: F,
}

impl<F: FnMut(&mut Program, NodeMut<'_>)> Visitor for EachNode<F> {
    type Error = Infallible;

    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, Infallible> {
        (self.each)(program, node);
        Ok(true)
    }
}

/// Yield every node of a sub-module once, without scope structure. Used
/// by bulk passes that only need to look at each node.
pub fn for_each_node<F: FnMut(&mut Program, NodeMut<'_>)>(
    program: &mut Program,
    module: ModuleId,
    file: &str,
    each: F,
) {
    let mut visitor = EachNode { each };
    match walk_submodule(&mut visitor, program, module, file) {
        Ok(()) => {}
        Err(never) => match never {},
    }
}
