//! AST node definitions and program arenas for ku.
//!
//! The parser delivers one node list per source file. Identifier
//! occurrences arrive as [`UnresolvedName`] paths and type occurrences
//! either fully tagged or as `Type::Unresolved`; the resolver and inferrer
//! then rewrite nodes in place until the tree is fully typed.
//!
//! Declarations with shared identity — functions, variables, named types,
//! modules — live in the [`Program`] arenas and are referenced by handle.
//! Method tables point at functions and functions point back at their
//! module, so neither side owns the other.

pub mod module;
pub mod scope;
pub mod visitor;

pub use module::{DependencyGraph, Module, ModuleLookup, ModuleName, Submodule};
pub use scope::{Ident, IdentKind, IdentValue, Scope};
pub use visitor::{NodeMut, Visitor, for_each_node, walk_function, walk_submodule};

use ku_diag::{Position, SourceMap};
use ku_types::{
    AttrSet, FunctionId, FunctionType, GenericContext, ModuleId, Primitive, Type, TypeReference,
    TypeStore, TypeVarId, UnresolvedName, VariableId, pointer_to, reference_to,
};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogAnd,
    LogOr,
}

/// Operator families with shared typing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    Arithmetic,
    Comparison,
    Bitwise,
    Logical,
}

impl BinOp {
    pub fn category(self) -> OpCategory {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                OpCategory::Arithmetic
            }
            BinOp::Eq
            | BinOp::NotEq
            | BinOp::Less
            | BinOp::LessEq
            | BinOp::Greater
            | BinOp::GreaterEq => OpCategory::Comparison,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                OpCategory::Bitwise
            }
            BinOp::LogAnd | BinOp::LogOr => OpCategory::Logical,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `!e`
    LogNot,
    /// `~e`
    BitNot,
    /// `-e`
    Negative,
}

// ---------------------------------------------------------------------------
// Functions and variables
// ---------------------------------------------------------------------------

/// A function declaration's semantic payload, arena-allocated so that
/// method tables, access expressions, and the declaring node can all refer
/// to one definition.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: FunctionType,
    /// The synthesized `this` parameter for value-receiver methods.
    /// Always a [`Node::VariableDecl`].
    pub receiver: Option<Box<Node>>,
    /// The receiver type of a static method (`fun Foo.make()`), resolved
    /// during top-level declaration processing.
    pub static_receiver: Option<Type>,
    /// Parameter declarations. Each entry is a [`Node::VariableDecl`].
    pub parameters: Vec<Node>,
    pub body: Option<Block>,
    pub module: ModuleId,
    pub pos: Position,
}

impl Function {
    pub fn parameter_ids(&self) -> Vec<VariableId> {
        self.parameters
            .iter()
            .map(|node| match node {
                Node::VariableDecl(decl) => decl.variable,
                _ => panic!("INTERNAL ERROR: function parameter is not a variable declaration"),
            })
            .collect()
    }

    pub fn receiver_variable(&self) -> Option<VariableId> {
        match self.receiver.as_deref() {
            Some(Node::VariableDecl(decl)) => Some(decl.variable),
            Some(_) => panic!("INTERNAL ERROR: function receiver is not a variable declaration"),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: Option<TypeReference>,
    pub mutable: bool,
    pub attrs: AttrSet,
    pub pos: Position,
}

impl Variable {
    pub fn new(name: impl Into<String>, pos: Position) -> Self {
        Self {
            name: name.into(),
            ty: None,
            mutable: false,
            attrs: AttrSet::new(),
            pos,
        }
    }

    pub fn typed(name: impl Into<String>, ty: TypeReference, pos: Position) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            mutable: false,
            attrs: AttrSet::new(),
            pos,
        }
    }
}

// ---------------------------------------------------------------------------
// Statements and declarations
// ---------------------------------------------------------------------------

/// A braced sequence of nodes. `non_scoping` marks `do { … }` blocks that
/// reuse the enclosing scope.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    pub non_scoping: bool,
    pub pos: Position,
}

/// A top-level or statement-position node.
#[derive(Debug, Clone)]
pub enum Node {
    TypeDecl(TypeDecl),
    FunctionDecl(FunctionDecl),
    VariableDecl(VariableDecl),
    DestructVarDecl(DestructVarDecl),
    UseDirective(UseDirective),
    LinkDirective(LinkDirective),

    BlockStat(BlockStat),
    ReturnStat(ReturnStat),
    IfStat(IfStat),
    AssignStat(AssignStat),
    BinopAssignStat(BinopAssignStat),
    DestructAssignStat(DestructAssignStat),
    DestructBinopAssignStat(DestructBinopAssignStat),
    LoopStat(LoopStat),
    MatchStat(MatchStat),
    CallStat(CallStat),
    DeferStat(DeferStat),
    BreakStat(BreakStat),
    NextStat(NextStat),
}

impl Node {
    pub fn pos(&self) -> Position {
        match self {
            Node::TypeDecl(n) => n.pos,
            Node::FunctionDecl(n) => n.pos,
            Node::VariableDecl(n) => n.pos,
            Node::DestructVarDecl(n) => n.pos,
            Node::UseDirective(n) => n.pos,
            Node::LinkDirective(n) => n.pos,
            Node::BlockStat(n) => n.block.pos,
            Node::ReturnStat(n) => n.pos,
            Node::IfStat(n) => n.pos,
            Node::AssignStat(n) => n.pos,
            Node::BinopAssignStat(n) => n.pos,
            Node::DestructAssignStat(n) => n.pos,
            Node::DestructBinopAssignStat(n) => n.pos,
            Node::LoopStat(n) => n.pos,
            Node::MatchStat(n) => n.pos,
            Node::CallStat(n) => n.pos,
            Node::DeferStat(n) => n.pos,
            Node::BreakStat(n) => n.pos,
            Node::NextStat(n) => n.pos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub named_type: ku_types::NamedTypeId,
    pub public: bool,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub function: FunctionId,
    pub public: bool,
    /// True for bodyless declarations such as `[C]` prototypes.
    pub prototype: bool,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub variable: VariableId,
    pub assignment: Option<Expr>,
    pub public: bool,
    pub pos: Position,
}

/// `var (a, _, c) = expr` — tuple destructuring with discard slots.
#[derive(Debug, Clone)]
pub struct DestructVarDecl {
    pub variables: Vec<VariableId>,
    pub should_discard: Vec<bool>,
    pub assignment: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct UseDirective {
    pub module_name: UnresolvedName,
    pub pos: Position,
}

/// `[link "m"]` — request a native library at link time.
#[derive(Debug, Clone)]
pub struct LinkDirective {
    pub library: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct BlockStat {
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct ReturnStat {
    pub value: Option<Expr>,
    pub pos: Position,
}

/// `if c1 { } else if c2 { } else { }` — conditions and bodies are kept in
/// parallel lists, with the trailing `else` body separate.
#[derive(Debug, Clone)]
pub struct IfStat {
    pub exprs: Vec<Expr>,
    pub bodies: Vec<Block>,
    pub else_body: Option<Block>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct AssignStat {
    pub access: Expr,
    pub assignment: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct BinopAssignStat {
    pub access: Expr,
    pub operator: BinOp,
    pub assignment: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct DestructAssignStat {
    pub accesses: Vec<Expr>,
    pub assignment: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct DestructBinopAssignStat {
    pub accesses: Vec<Expr>,
    pub operator: BinOp,
    pub assignment: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum LoopKind {
    Infinite,
    Conditional(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct LoopStat {
    pub kind: LoopKind,
    pub body: Block,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct MatchStat {
    pub target: Expr,
    pub branches: Vec<MatchBranch>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct MatchBranch {
    pub pattern: Expr,
    pub body: Box<Node>,
}

#[derive(Debug, Clone)]
pub struct CallStat {
    /// Always an [`ExprKind::Call`].
    pub call: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct DeferStat {
    /// Always an [`ExprKind::Call`].
    pub call: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct BreakStat {
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct NextStat {
    pub pos: Position,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// An expression node.
///
/// `type_var` is the inference variable the inferrer assigned to this
/// node; it is populated during constraint generation and cleared again
/// when finalization completes.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Position,
    pub type_var: Option<TypeVarId>,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Position) -> Self {
        Self {
            kind,
            pos,
            type_var: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    NumericLiteral(NumericLiteral),
    StringLiteral(StringLiteral),
    BoolLiteral(BoolLiteral),
    RuneLiteral(RuneLiteral),
    TupleLiteral(TupleLiteral),
    CompositeLiteral(CompositeLiteral),
    EnumLiteral(EnumLiteral),

    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Call(CallExpr),
    Cast(CastExpr),
    Lambda(LambdaExpr),
    Sizeof(SizeofExpr),
    ArrayLen(ArrayLenExpr),

    VariableAccess(VariableAccessExpr),
    StructAccess(StructAccessExpr),
    ArrayAccess(ArrayAccessExpr),
    DerefAccess(DerefAccessExpr),
    DiscardAccess(DiscardAccessExpr),
    FunctionAccess(FunctionAccessExpr),
    PointerTo(PointerToExpr),
    ReferenceTo(ReferenceToExpr),
    EnumPattern(EnumPatternExpr),
}

/// An integer or float literal. The payload arrives pre-parsed from the
/// lexer; untyped literals receive a default type at finalization.
#[derive(Debug, Clone)]
pub struct NumericLiteral {
    pub int_value: u128,
    pub float_value: f64,
    pub is_float: bool,
    pub ty: Option<TypeReference>,
}

/// A string literal. The parser binds `[]u8` for ordinary strings and
/// `^u8` for C strings, so `ty` is populated on arrival.
#[derive(Debug, Clone)]
pub struct StringLiteral {
    pub value: String,
    pub is_cstring: bool,
    pub ty: Option<TypeReference>,
}

#[derive(Debug, Clone)]
pub struct BoolLiteral {
    pub value: bool,
}

#[derive(Debug, Clone)]
pub struct RuneLiteral {
    pub value: char,
}

#[derive(Debug, Clone)]
pub struct TupleLiteral {
    pub members: Vec<Expr>,
    pub ty: Option<TypeReference>,
}

/// `T{a: x, b: y}` or `[]T{x, y}` — a struct or array literal. `fields`
/// runs parallel to `values`; array literals leave the field names empty.
#[derive(Debug, Clone)]
pub struct CompositeLiteral {
    pub ty: Option<TypeReference>,
    pub fields: Vec<Option<String>>,
    pub values: Vec<Expr>,
}

/// A constructed enum value. Exactly one of `tuple` / `composite` is set
/// for payload-carrying members; both are `None` for simple tags.
#[derive(Debug, Clone)]
pub struct EnumLiteral {
    pub member: String,
    pub ty: Option<TypeReference>,
    /// Always an [`ExprKind::TupleLiteral`] when present.
    pub tuple: Option<Box<Expr>>,
    /// Always an [`ExprKind::CompositeLiteral`] when present.
    pub composite: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinOp,
    pub lhand: Box<Expr>,
    pub rhand: Box<Expr>,
    pub ty: Option<TypeReference>,
}

#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub ty: Option<TypeReference>,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub function: Box<Expr>,
    pub arguments: Vec<Expr>,
    /// The receiver expression for method-call syntax, filled in by the
    /// resolver when it rewrites a dotted access.
    pub receiver_access: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub struct CastExpr {
    pub ty: TypeReference,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct LambdaExpr {
    pub function: FunctionId,
}

/// `sizeof(expr)` or `sizeof(T)`. The resolver turns the expression form
/// into the type form when the operand names a type.
#[derive(Debug, Clone)]
pub struct SizeofExpr {
    pub expr: Option<Box<Expr>>,
    pub ty: Option<TypeReference>,
}

#[derive(Debug, Clone)]
pub struct ArrayLenExpr {
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct VariableAccessExpr {
    pub name: UnresolvedName,
    pub variable: Option<VariableId>,
    pub generic_args: Vec<TypeReference>,
}

#[derive(Debug, Clone)]
pub struct StructAccessExpr {
    pub struct_expr: Box<Expr>,
    pub member: String,
    pub generic_args: Vec<TypeReference>,
    /// The function this access occurs in, for closure analysis.
    pub parent_function: Option<FunctionId>,
}

#[derive(Debug, Clone)]
pub struct ArrayAccessExpr {
    pub array: Box<Expr>,
    pub subscript: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct DerefAccessExpr {
    pub expr: Box<Expr>,
}

/// `_` in a destructuring position.
#[derive(Debug, Clone)]
pub struct DiscardAccessExpr;

#[derive(Debug, Clone)]
pub struct FunctionAccessExpr {
    pub function: FunctionId,
    pub generic_args: Vec<TypeReference>,
    pub receiver_access: Option<Box<Expr>>,
    pub parent_function: Option<FunctionId>,
    /// Extra substitutions when the function is reached through an
    /// interface constraint.
    pub extra_generic_context: Option<GenericContext>,
}

#[derive(Debug, Clone)]
pub struct PointerToExpr {
    pub access: Box<Expr>,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub struct ReferenceToExpr {
    pub access: Box<Expr>,
    pub mutable: bool,
}

/// `Some(x)` in a match pattern: an enum member name plus one binding
/// variable per payload slot (`None` entries are discards).
#[derive(Debug, Clone)]
pub struct EnumPatternExpr {
    pub member_name: UnresolvedName,
    pub variables: Vec<Option<VariableId>>,
}

// ---------------------------------------------------------------------------
// Program arenas
// ---------------------------------------------------------------------------

/// All arenas of one compilation session: source files, named types,
/// modules, functions, and variables.
///
/// Created by the driver before resolution, mutated by the resolver and
/// inferrer, then frozen before code generation.
#[derive(Debug, Default)]
pub struct Program {
    pub sources: SourceMap,
    pub types: TypeStore,
    pub modules: Vec<Module>,
    pub functions: Vec<Function>,
    pub variables: Vec<Variable>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_module(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(module);
        id
    }

    pub fn alloc_function(&mut self, function: Function) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn alloc_variable(&mut self, variable: Variable) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(variable);
        id
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id.0 as usize]
    }

    /// Look up a method on a type: named types search their method table,
    /// interfaces their function set, substitution types their
    /// constraints. Pointer wrappers are stripped first.
    pub fn get_method(&self, ty: &Type, name: &str) -> Option<FunctionId> {
        let ty = ty.without_pointers();
        if let Type::Interface(it) = ty.actual(&self.types) {
            return it
                .functions
                .iter()
                .copied()
                .find(|id| self.function(*id).name == name);
        }
        match ty {
            Type::Named(id) => self
                .types
                .named(*id)
                .methods
                .iter()
                .copied()
                .find(|f| self.function(*f).name == name),
            Type::Substitution(sub) => sub
                .constraints
                .iter()
                .find_map(|c| self.get_method(&c.base, name)),
            _ => None,
        }
    }

    /// The type of member `name` on `target`: an attached method's
    /// function type, or a struct member's type (reaching through one
    /// level of pointer, instantiated through the target's generic
    /// arguments).
    pub fn member_type(&self, target: &TypeReference, name: &str) -> Option<TypeReference> {
        if let Some(method) = self.get_method(&target.base, name) {
            return Some(TypeReference::new(Type::Function(Box::new(
                self.function(method).ty.clone(),
            ))));
        }

        let target = match &target.base {
            Type::Pointer(pt) => &pt.addressee,
            _ => target,
        };
        if let Type::Struct(st) = target.base.actual(&self.types) {
            let member = st.member(name)?;
            let mut ty = member.ty.clone();
            if !target.generic_args.is_empty() {
                ty = GenericContext::from_type_reference(target, &self.types).replace(&ty);
            }
            return Some(ty);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Expression type queries
// ---------------------------------------------------------------------------

impl Expr {
    /// The type of this expression, as far as it is currently known.
    ///
    /// Literals, casts, and operators read their stored type; access
    /// expressions derive theirs from the accessed declaration, so they
    /// become typed the moment the declaration does.
    pub fn type_of(&self, program: &Program) -> Option<TypeReference> {
        match &self.kind {
            // An untyped numeric literal reads as its default type; the
            // default is only materialized at finalization.
            ExprKind::NumericLiteral(n) => n.ty.clone().or_else(|| {
                Some(TypeReference::new(Type::Primitive(if n.is_float {
                    Primitive::F64
                } else {
                    Primitive::Int
                })))
            }),
            ExprKind::StringLiteral(s) => s.ty.clone(),
            ExprKind::BoolLiteral(_) => {
                Some(TypeReference::new(Type::Primitive(Primitive::Bool)))
            }
            ExprKind::RuneLiteral(_) => {
                Some(TypeReference::new(Type::Primitive(Primitive::Rune)))
            }
            ExprKind::TupleLiteral(t) => t.ty.clone(),
            ExprKind::CompositeLiteral(c) => c.ty.clone(),
            ExprKind::EnumLiteral(e) => e.ty.clone(),
            ExprKind::Binary(b) => b.ty.clone(),
            ExprKind::Unary(u) => u.ty.clone(),
            ExprKind::Cast(c) => Some(c.ty.clone()),
            ExprKind::Sizeof(_) | ExprKind::ArrayLen(_) => {
                Some(TypeReference::new(Type::Primitive(Primitive::Uint)))
            }

            ExprKind::VariableAccess(access) => access
                .variable
                .and_then(|id| program.variable(id).ty.clone()),

            ExprKind::FunctionAccess(access) => {
                let function = program.function(access.function);
                let base =
                    TypeReference::new(Type::Function(Box::new(function.ty.clone())));
                if !function.ty.generic_params.is_empty()
                    && access.generic_args.len() == function.ty.generic_params.len()
                {
                    let mut gcon =
                        GenericContext::new(&function.ty.generic_params, &access.generic_args);
                    if let Some(extra) = &access.extra_generic_context {
                        gcon = gcon.with_outer(extra.clone());
                    }
                    Some(gcon.replace(&base))
                } else {
                    Some(base)
                }
            }

            ExprKind::Lambda(lambda) => Some(TypeReference::new(Type::Function(Box::new(
                program.function(lambda.function).ty.clone(),
            )))),

            ExprKind::Call(call) => {
                let fn_type = call.function.type_of(program)?;
                match fn_type.base.actual(&program.types) {
                    Type::Function(ft) => Some(ft.return_type()),
                    _ => None,
                }
            }

            ExprKind::StructAccess(access) => {
                let target = access.struct_expr.type_of(program)?;
                program.member_type(&target, &access.member)
            }

            ExprKind::ArrayAccess(access) => {
                let target = access.array.type_of(program)?;
                match target.base.actual(&program.types) {
                    Type::Array(at) => {
                        let mut member = (*at.member).clone();
                        if !target.generic_args.is_empty() {
                            member = GenericContext::from_type_reference(&target, &program.types)
                                .replace(&member);
                        }
                        Some(member)
                    }
                    Type::Pointer(pt) => Some((*pt.addressee).clone()),
                    _ => None,
                }
            }

            ExprKind::DerefAccess(deref) => {
                let target = deref.expr.type_of(program)?;
                target.base.actual(&program.types).addressee().cloned()
            }

            ExprKind::PointerTo(ptr) => ptr
                .access
                .type_of(program)
                .map(|inner| TypeReference::new(pointer_to(inner, ptr.mutable))),

            ExprKind::ReferenceTo(rf) => rf
                .access
                .type_of(program)
                .map(|inner| TypeReference::new(reference_to(inner, rf.mutable))),

            ExprKind::DiscardAccess(_) | ExprKind::EnumPattern(_) => None,
        }
    }
}

impl Expr {
    /// Offer a type to this expression. Every variant applies its own
    /// acceptance rule; an incompatible offer leaves the stored type
    /// alone (numeric literals fall back to their default instead).
    ///
    /// Function accesses are the one variant handled elsewhere: offering
    /// them a type triggers generic-argument extraction, which belongs to
    /// the inferrer's finalization.
    pub fn set_type(&mut self, program: &mut Program, t: &TypeReference) {
        match &mut self.kind {
            ExprKind::NumericLiteral(lit) => {
                let actual = t.base.actual(&program.types);
                let accepted = match actual {
                    Type::Primitive(p) if lit.is_float => p.is_float(),
                    Type::Primitive(p) => p.is_numeric(),
                    _ => false,
                };
                if accepted {
                    lit.ty = Some(t.clone());
                } else {
                    lit.ty = Some(TypeReference::new(Type::Primitive(if lit.is_float {
                        Primitive::F64
                    } else {
                        Primitive::Int
                    })));
                }
            }

            ExprKind::StringLiteral(lit) => {
                let accepted = match t.base.actual(&program.types) {
                    Type::Array(_) => !lit.is_cstring,
                    Type::Pointer(_) => lit.is_cstring,
                    _ => false,
                };
                if accepted {
                    lit.ty = Some(t.clone());
                }
            }

            ExprKind::TupleLiteral(lit) => {
                if matches!(t.base.actual(&program.types), Type::Tuple(_)) {
                    lit.ty = Some(t.clone());
                }
            }

            ExprKind::CompositeLiteral(lit) => {
                if lit.ty.is_none()
                    && matches!(
                        t.base.actual(&program.types),
                        Type::Struct(_) | Type::Array(_)
                    )
                {
                    lit.ty = Some(t.clone());
                }
            }

            ExprKind::EnumLiteral(lit) => {
                // An enum literal owns its type from resolution; only the
                // generic arguments may still be missing.
                if let Some(own) = lit.ty.as_mut()
                    && let Type::Enum(et) = own.base.actual(&program.types).clone()
                    && !et.generic_params.is_empty()
                    && own.generic_args.len() != et.generic_params.len()
                {
                    own.generic_args = t.generic_args.clone();
                }
            }

            ExprKind::Binary(binary) => binary.ty = Some(t.clone()),
            ExprKind::Unary(unary) => unary.ty = Some(t.clone()),

            ExprKind::EnumPattern(pattern) => {
                let Type::Enum(et) = t.base.actual(&program.types).clone() else {
                    return;
                };
                let gcon = GenericContext::from_type_reference(t, &program.types);
                let Some(member) = et.member(&pattern.member_name.name).cloned() else {
                    return;
                };
                for (idx, variable) in pattern.variables.iter().enumerate() {
                    let Some(var) = variable else { continue };
                    let member_ty = match &member.ty {
                        Type::Struct(st) => st.members.get(idx).map(|m| m.ty.clone()),
                        Type::Tuple(tt) => tt.members.get(idx).cloned(),
                        _ => None,
                    };
                    if let Some(member_ty) = member_ty {
                        program.variable_mut(*var).ty = Some(gcon.replace(&member_ty));
                    }
                }
            }

            // Derived or externally-managed types: nothing to store.
            ExprKind::BoolLiteral(_)
            | ExprKind::RuneLiteral(_)
            | ExprKind::Call(_)
            | ExprKind::Cast(_)
            | ExprKind::Lambda(_)
            | ExprKind::Sizeof(_)
            | ExprKind::ArrayLen(_)
            | ExprKind::VariableAccess(_)
            | ExprKind::StructAccess(_)
            | ExprKind::ArrayAccess(_)
            | ExprKind::DerefAccess(_)
            | ExprKind::DiscardAccess(_)
            | ExprKind::FunctionAccess(_)
            | ExprKind::PointerTo(_)
            | ExprKind::ReferenceTo(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ku_diag::Position;
    use ku_types::{NamedTypeDef, StructMember, StructType};

    fn pos() -> Position {
        Position::synthetic()
    }

    fn int_ref() -> TypeReference {
        TypeReference::new(Type::Primitive(Primitive::Int))
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, pos())
    }

    #[test]
    fn variable_access_derives_type_from_variable() {
        let mut program = Program::new();
        let var = program.alloc_variable(Variable::typed("x", int_ref(), pos()));
        let access = expr(ExprKind::VariableAccess(VariableAccessExpr {
            name: UnresolvedName::plain("x"),
            variable: Some(var),
            generic_args: vec![],
        }));
        assert_eq!(access.type_of(&program), Some(int_ref()));

        program.variable_mut(var).ty = None;
        assert_eq!(access.type_of(&program), None);
    }

    #[test]
    fn struct_access_reaches_through_one_pointer() {
        let mut program = Program::new();
        let strukt = Type::Struct(StructType {
            members: vec![StructMember {
                name: "age".into(),
                ty: int_ref(),
                public: true,
            }],
            generic_params: vec![],
        });
        let named = program
            .types
            .alloc(NamedTypeDef::new("C", strukt, ModuleId(0)));
        let var = program.alloc_variable(Variable::typed(
            "p",
            TypeReference::new(pointer_to(TypeReference::new(Type::Named(named)), false)),
            pos(),
        ));
        let access = expr(ExprKind::StructAccess(StructAccessExpr {
            struct_expr: Box::new(expr(ExprKind::VariableAccess(VariableAccessExpr {
                name: UnresolvedName::plain("p"),
                variable: Some(var),
                generic_args: vec![],
            }))),
            member: "age".into(),
            generic_args: vec![],
            parent_function: None,
        }));
        assert_eq!(access.type_of(&program), Some(int_ref()));
    }

    #[test]
    fn call_type_is_the_function_return() {
        let mut program = Program::new();
        let function = program.alloc_function(Function {
            name: "f".into(),
            ty: FunctionType {
                ret: Some(int_ref()),
                ..FunctionType::default()
            },
            receiver: None,
            static_receiver: None,
            parameters: vec![],
            body: None,
            module: ModuleId(0),
            pos: pos(),
        });
        let call = expr(ExprKind::Call(CallExpr {
            function: Box::new(expr(ExprKind::FunctionAccess(FunctionAccessExpr {
                function,
                generic_args: vec![],
                receiver_access: None,
                parent_function: None,
                extra_generic_context: None,
            }))),
            arguments: vec![],
            receiver_access: None,
        }));
        assert_eq!(call.type_of(&program), Some(int_ref()));
    }

    #[test]
    fn operator_categories() {
        assert_eq!(BinOp::Add.category(), OpCategory::Arithmetic);
        assert_eq!(BinOp::Eq.category(), OpCategory::Comparison);
        assert_eq!(BinOp::Shl.category(), OpCategory::Bitwise);
        assert_eq!(BinOp::LogOr.category(), OpCategory::Logical);
    }
}
