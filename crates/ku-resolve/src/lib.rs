//! Name resolution for ku.
//!
//! The resolver runs three phases per module:
//!
//! 1. **Used modules** — every `use` directive resolves its target module
//!    first (the graph is already cycle-free) and registers it in the
//!    file's use-scope.
//! 2. **Top-level declarations** — types, free functions, and variables
//!    land in the module scope; `[C]` functions land in the synthetic `C`
//!    module; static methods are deferred until their receiver type can
//!    be resolved, then attached.
//! 3. **Descent** — a stateful visitor walks every node, maintaining a
//!    scope stack and a stack of enclosing functions, replacing
//!    unresolved names with concrete declarations and rewriting dotted
//!    accesses into the correct AST shape.
//!
//! All failures are fatal: the resolver reports the first error with its
//! source position and does not recover.

use ku_ast::{
    CastExpr, EnumLiteral, Expr, ExprKind, FunctionAccessExpr, Module, ModuleLookup, ModuleName,
    Node, NodeMut, Program, Scope, StructAccessExpr, TupleLiteral, Variable, VariableAccessExpr,
    VariableDecl, Visitor, walk_submodule,
};
use ku_diag::{Category, Diagnostic, DiagnosticError, Position};
use ku_types::{
    FunctionId, GenericContext, ModuleId, NamedTypeId, Type, TypeReference, UnresolvedName,
    pointer_to, reference_to,
};

// Re-exported for the session: the scope table lives with the AST's
// program model, but callers reach it through the resolver.
pub use ku_ast::scope::{Ident, IdentKind, IdentValue};

/// Create the synthetic `C` module. All `[C]`-attributed declarations are
/// public and reachable only via the `C.` path.
pub fn create_c_module(program: &mut Program) -> ModuleId {
    let id = ModuleId(program.modules.len() as u32);
    program.alloc_module(Module::new(ModuleName::single("C"), id))
}

/// Resolve one module (and, recursively, every module it uses).
/// Idempotent: a module is resolved at most once.
pub fn resolve_module(
    program: &mut Program,
    lookup: &ModuleLookup,
    module: ModuleId,
    c_module: ModuleId,
) -> Result<(), DiagnosticError> {
    if program.module(module).resolved {
        return Ok(());
    }
    program.module_mut(module).resolved = true;
    program.module_mut(module).scope.use_module("C", c_module);

    let mut resolver = Resolver {
        lookup,
        module,
        c_module,
        file: String::new(),
        function_stack: Vec::new(),
        frames: Vec::new(),
    };
    resolver.resolve_used_modules(program)?;
    resolver.resolve_top_level_decls(program)?;
    resolver.resolve_descent(program)
}

pub struct Resolver<'l> {
    lookup: &'l ModuleLookup,
    module: ModuleId,
    c_module: ModuleId,
    /// Key of the sub-module currently being processed.
    file: String,
    function_stack: Vec<FunctionId>,
    frames: Vec<Scope>,
}

impl<'l> Resolver<'l> {
    fn current_function(&self) -> Option<FunctionId> {
        self.function_stack.last().copied()
    }

    fn push_frame(&mut self) {
        self.frames
            .push(Scope::new(self.module, self.current_function()));
    }

    fn pop_frame(&mut self) {
        if self.frames.pop().is_none() {
            panic!("INTERNAL ERROR: trying to exit highest scope");
        }
    }

    fn top_frame(&mut self) -> &mut Scope {
        self.frames
            .last_mut()
            .expect("INTERNAL ERROR: no open scope")
    }

    fn err(&self, category: Category, pos: Position, message: String) -> DiagnosticError {
        Diagnostic::error(category, message).at(pos).into()
    }

    // -- Identifier lookup --------------------------------------------------

    fn lookup_ident(&self, program: &Program, name: &UnresolvedName) -> Option<Ident> {
        if name.modules.is_empty() {
            for frame in self.frames.iter().rev() {
                if let Some(ident) = frame.get_local(&name.name) {
                    return Some(ident.clone());
                }
            }
            return program
                .module(self.module)
                .scope
                .get_local(&name.name)
                .cloned();
        }

        let path = name.modules.join(".");
        let target = program
            .module(self.module)
            .scope
            .used_module(&path)
            .or_else(|| self.use_scope(program)?.used_module(&path))?;
        program
            .module(target)
            .scope
            .get_local(&name.name)
            .cloned()
    }

    fn use_scope<'p>(&self, program: &'p Program) -> Option<&'p Scope> {
        program
            .module(self.module)
            .parts
            .get(&self.file)
            .map(|submodule| &submodule.use_scope)
    }

    /// Look a name up without treating absence as an error. Privacy and
    /// capture violations are still fatal: a binding that exists but is
    /// illegal to touch must not silently trigger dotted-name peeling.
    fn try_get_ident(
        &self,
        program: &Program,
        pos: Position,
        name: &UnresolvedName,
    ) -> Result<Option<Ident>, DiagnosticError> {
        let Some(ident) = self.lookup_ident(program, name) else {
            return Ok(None);
        };

        if !ident.public && ident.module != self.module {
            return Err(self.err(
                Category::Privacy,
                pos,
                format!("Cannot access private identifier `{name}`"),
            ));
        }

        // A lambda may not capture locals of an enclosing function.
        if ident.kind == IdentKind::Variable
            && let Some(owner) = ident.function
            && self.current_function() != Some(owner)
        {
            return Err(self.err(
                Category::Capture,
                pos,
                format!("Cannot access local identifier `{name}` from lambda"),
            ));
        }

        Ok(Some(ident))
    }

    fn get_ident(
        &self,
        program: &Program,
        pos: Position,
        name: &UnresolvedName,
    ) -> Result<Ident, DiagnosticError> {
        self.try_get_ident(program, pos, name)?.ok_or_else(|| {
            self.err(
                Category::UnresolvedName,
                pos,
                format!("Cannot resolve `{name}`"),
            )
        })
    }

    // -- Phase 1: used modules ----------------------------------------------

    fn resolve_used_modules(&mut self, program: &mut Program) -> Result<(), DiagnosticError> {
        let files: Vec<String> = program.module(self.module).parts.keys().cloned().collect();
        for file in files {
            let directives: Vec<UnresolvedName> = program.module(self.module).parts[&file]
                .nodes
                .iter()
                .filter_map(|node| match node {
                    Node::UseDirective(directive) => Some(directive.module_name.clone()),
                    _ => None,
                })
                .collect();

            for directive in directives {
                let modname = ModuleName::from_unresolved(&directive);
                let Some(used) = self.lookup.get_module(&modname) else {
                    panic!("INTERNAL ERROR: used module not loaded: `{modname}`");
                };
                resolve_module(program, self.lookup, used, self.c_module)?;
                program
                    .module_mut(self.module)
                    .parts
                    .get_mut(&file)
                    .expect("sub-module exists")
                    .use_scope
                    .use_module(&modname.to_string(), used);
            }
        }
        Ok(())
    }

    // -- Phase 2: top-level declarations ------------------------------------

    fn resolve_top_level_decls(&mut self, program: &mut Program) -> Result<(), DiagnosticError> {
        let files: Vec<String> = program.module(self.module).parts.keys().cloned().collect();
        let mut static_methods: Vec<(String, FunctionId, Position)> = Vec::new();

        for file in &files {
            self.file = file.clone();
            let nodes = std::mem::take(
                &mut program
                    .module_mut(self.module)
                    .parts
                    .get_mut(file)
                    .expect("sub-module exists")
                    .nodes,
            );

            let result = self.insert_top_level(program, &nodes, file, &mut static_methods);

            program
                .module_mut(self.module)
                .parts
                .get_mut(file)
                .expect("sub-module exists")
                .nodes = nodes;
            result?;
        }

        for (file, function, pos) in static_methods {
            self.file = file;
            let receiver = program
                .function(function)
                .static_receiver
                .clone()
                .expect("deferred function has a static receiver");
            let resolved = self.resolve_type(program, pos, receiver)?;
            let reference = TypeReference::new(resolved.clone());
            let named = self.check_receiver_type(program, pos, &reference, "static receiver")?;
            program.function_mut(function).static_receiver = Some(resolved);
            program.types.named_mut(named).static_methods.push(function);
        }
        Ok(())
    }

    fn insert_top_level(
        &mut self,
        program: &mut Program,
        nodes: &[Node],
        file: &str,
        static_methods: &mut Vec<(String, FunctionId, Position)>,
    ) -> Result<(), DiagnosticError> {
        for node in nodes {
            match node {
                Node::TypeDecl(decl) => {
                    let name = program.types.named(decl.named_type).name.clone();
                    let previous = program.module_mut(self.module).scope.insert_type(
                        &name,
                        Type::Named(decl.named_type),
                        decl.public,
                    );
                    if previous.is_some() {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of type `{name}`"),
                        ));
                    }
                }

                Node::FunctionDecl(decl) => {
                    let func = program.function(decl.function);
                    if func.ty.receiver.is_some() {
                        // Value-receiver methods attach during descent.
                        continue;
                    }
                    if func.static_receiver.is_some() {
                        static_methods.push((file.to_string(), decl.function, decl.pos));
                        continue;
                    }

                    let name = func.name.clone();
                    let (scope_module, public) = if func.ty.attrs.contains("C") {
                        (self.c_module, true)
                    } else {
                        (self.module, decl.public)
                    };
                    let previous = program.module_mut(scope_module).scope.insert_function(
                        &name,
                        decl.function,
                        public,
                    );
                    if previous.is_some() {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of function `{name}`"),
                        ));
                    }
                }

                Node::VariableDecl(decl) => {
                    let name = program.variable(decl.variable).name.clone();
                    let previous = program.module_mut(self.module).scope.insert_variable(
                        &name,
                        decl.variable,
                        decl.public,
                    );
                    if previous.is_some() {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of variable `{name}`"),
                        ));
                    }
                }

                Node::LinkDirective(directive) => {
                    let module = program.module_mut(self.module);
                    if !module.linked_libraries.contains(&directive.library) {
                        module.linked_libraries.push(directive.library.clone());
                    }
                }

                _ => {}
            }
        }
        Ok(())
    }

    // -- Phase 3: descent ---------------------------------------------------

    fn resolve_descent(&mut self, program: &mut Program) -> Result<(), DiagnosticError> {
        let files: Vec<String> = program.module(self.module).parts.keys().cloned().collect();
        for file in files {
            self.file = file.clone();
            walk_submodule(self, program, self.module, &file)?;
        }
        Ok(())
    }

    fn resolve_item(&mut self, program: &mut Program, item: &mut Node) -> Result<(), DiagnosticError> {
        match item {
            Node::TypeDecl(decl) => {
                let underlying = program.types.named(decl.named_type).underlying.clone();
                let resolved = self.resolve_type(program, decl.pos, underlying)?;
                program.types.named_mut(decl.named_type).underlying = resolved;
            }

            Node::FunctionDecl(decl) => {
                let function = decl.function;
                self.function_stack.push(function);
                self.push_frame();

                // Synthesize the implicit `this` parameter for methods that
                // declare a receiver type without a receiver binding.
                let receiver_ty = program.function(function).ty.receiver.clone();
                if let Some(receiver_ty) = receiver_ty {
                    if program.function(function).receiver.is_none() {
                        let pos = program.function(function).pos;
                        let variable = program
                            .alloc_variable(Variable::typed("this", receiver_ty, pos));
                        program.function_mut(function).receiver =
                            Some(Box::new(Node::VariableDecl(VariableDecl {
                                variable,
                                assignment: None,
                                public: false,
                                pos,
                            })));
                    }
                    let variable = program
                        .function(function)
                        .receiver_variable()
                        .expect("receiver binding exists");
                    let name = program.variable(variable).name.clone();
                    if self.top_frame().insert_variable(&name, variable, false).is_some() {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of variable `{name}`"),
                        ));
                    }
                }

                for gpar in program.function(function).ty.generic_params.clone() {
                    let name = gpar.name.clone();
                    if self
                        .top_frame()
                        .insert_type(&name, Type::Substitution(gpar), false)
                        .is_some()
                    {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of generic type parameter `{name}`"),
                        ));
                    }
                }

                let ty = program.function(function).ty.clone();
                let resolved =
                    self.resolve_type(program, decl.pos, Type::Function(Box::new(ty)))?;
                let Type::Function(ft) = resolved else {
                    panic!("INTERNAL ERROR: function type resolved to a non-function");
                };
                program.function_mut(function).ty = *ft;
            }

            Node::VariableDecl(decl) => {
                if let Some(ty) = program.variable(decl.variable).ty.clone() {
                    let resolved = self.resolve_type_reference(program, decl.pos, &ty)?;
                    program.variable_mut(decl.variable).ty = Some(resolved);
                }
                let name = program.variable(decl.variable).name.clone();
                if self
                    .top_frame()
                    .insert_variable(&name, decl.variable, decl.public)
                    .is_some()
                {
                    return Err(self.err(
                        Category::Redeclaration,
                        decl.pos,
                        format!("Illegal redeclaration of variable `{name}`"),
                    ));
                }
            }

            Node::DestructVarDecl(decl) => {
                for (idx, variable) in decl.variables.iter().enumerate() {
                    if decl.should_discard.get(idx).copied().unwrap_or(false) {
                        continue;
                    }
                    let name = program.variable(*variable).name.clone();
                    if self
                        .top_frame()
                        .insert_variable(&name, *variable, false)
                        .is_some()
                    {
                        return Err(self.err(
                            Category::Redeclaration,
                            decl.pos,
                            format!("Illegal redeclaration of variable `{name}`"),
                        ));
                    }
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn resolve_expr(&mut self, program: &mut Program, expr: &mut Expr) -> Result<(), DiagnosticError> {
        let pos = expr.pos;
        match &mut expr.kind {
            ExprKind::Lambda(lambda) => {
                let function = lambda.function;
                self.function_stack.push(function);
                let ty = program.function(function).ty.clone();
                let resolved = self.resolve_type(program, pos, Type::Function(Box::new(ty)))?;
                let Type::Function(ft) = resolved else {
                    panic!("INTERNAL ERROR: lambda type resolved to a non-function");
                };
                program.function_mut(function).ty = *ft;
            }

            ExprKind::Cast(cast) => {
                let ty = cast.ty.clone();
                cast.ty = self.resolve_type_reference(program, pos, &ty)?;
            }

            ExprKind::Sizeof(sizeof) => {
                if let Some(inner) = sizeof.expr.as_deref()
                    && let Some(ty) = self.expr_to_type(program, inner)?
                {
                    sizeof.expr = None;
                    sizeof.ty = Some(TypeReference::new(ty));
                }
                if let Some(ty) = sizeof.ty.clone() {
                    sizeof.ty = Some(self.resolve_type_reference(program, pos, &ty)?);
                }
            }

            ExprKind::EnumLiteral(lit) => {
                if let Some(ty) = lit.ty.clone() {
                    lit.ty = Some(self.resolve_type_reference(program, pos, &ty)?);
                }
            }

            ExprKind::StructAccess(access) => {
                access.parent_function = self.current_function();
            }

            ExprKind::EnumPattern(pattern) => {
                for variable in pattern.variables.iter().flatten() {
                    let name = program.variable(*variable).name.clone();
                    if self
                        .top_frame()
                        .insert_variable(&name, *variable, false)
                        .is_some()
                    {
                        return Err(self.err(
                            Category::Redeclaration,
                            pos,
                            format!("Illegal redeclaration of variable `{name}`"),
                        ));
                    }
                }
            }

            ExprKind::VariableAccess(_) => return self.resolve_variable_access(program, expr),
            ExprKind::CompositeLiteral(_) => return self.resolve_composite_literal(program, expr),
            ExprKind::Call(_) => return self.resolve_call(program, expr),

            _ => {}
        }
        Ok(())
    }

    /// Disambiguate a (possibly dotted) identifier occurrence: enum member,
    /// function access, plain variable, or a struct-access chain peeled off
    /// a shorter base name.
    fn resolve_variable_access(
        &mut self,
        program: &mut Program,
        expr: &mut Expr,
    ) -> Result<(), DiagnosticError> {
        let pos = expr.pos;
        let ExprKind::VariableAccess(access) = expr.kind.clone() else {
            panic!("INTERNAL ERROR: expected variable access");
        };

        // `E.Member` where `E` names an enum type is a construction, not
        // an access.
        let mut no_arguments = None;
        if let Some(rewritten) = self.try_enum_literal(program, pos, &access, &mut no_arguments)? {
            *expr = rewritten;
            return Ok(());
        }

        // Try the name as written; peel qualifiers into struct accesses
        // until something resolves.
        let mut name = access.name.clone();
        let mut members: Vec<String> = Vec::new();
        let mut ident = self.try_get_ident(program, pos, &name)?;
        while ident.is_none() && !name.modules.is_empty() {
            let (parent, member) = name.split().expect("qualified name splits");
            members.push(member);
            name = parent;
            ident = self.try_get_ident(program, pos, &name)?;
        }
        let Some(ident) = ident else {
            return Err(self.err(
                Category::UnresolvedName,
                pos,
                format!("Cannot resolve `{}`", access.name),
            ));
        };

        let base_kind = match &ident.value {
            IdentValue::Function(function) => {
                if !members.is_empty() {
                    return Err(self.err(
                        Category::UnresolvedName,
                        pos,
                        format!("Expected variable identifier, found function `{name}`"),
                    ));
                }
                let generic_args =
                    self.resolve_type_references(program, pos, &access.generic_args)?;
                expr.kind = ExprKind::FunctionAccess(FunctionAccessExpr {
                    function: *function,
                    generic_args,
                    receiver_access: None,
                    parent_function: self.current_function(),
                    extra_generic_context: None,
                });
                return Ok(());
            }

            IdentValue::Variable(variable) => {
                // Module-level variables may be referenced before their
                // declaring file is descended; resolving here is
                // idempotent for already-resolved types.
                if let Some(ty) = program.variable(*variable).ty.clone() {
                    let resolved = self.resolve_type_reference(program, pos, &ty)?;
                    program.variable_mut(*variable).ty = Some(resolved);
                }
                ExprKind::VariableAccess(VariableAccessExpr {
                    name: name.clone(),
                    variable: Some(*variable),
                    generic_args: access.generic_args.clone(),
                })
            }

            IdentValue::Type(_) => {
                return Err(self.err(
                    Category::UnresolvedName,
                    pos,
                    format!(
                        "Expected variable identifier, found {} `{}`",
                        ident.kind.as_str(),
                        access.name
                    ),
                ));
            }
        };

        let mut built = Expr::new(base_kind, pos);
        for member in members.into_iter().rev() {
            built = Expr::new(
                ExprKind::StructAccess(StructAccessExpr {
                    struct_expr: Box::new(built),
                    member,
                    generic_args: Vec::new(),
                    parent_function: self.current_function(),
                }),
                pos,
            );
        }
        *expr = built;
        Ok(())
    }

    /// A call is rewritten when its callee turns out to be an enum member
    /// (tuple-payload construction), a dotted method access, or a type
    /// name (cast).
    fn resolve_call(&mut self, program: &mut Program, expr: &mut Expr) -> Result<(), DiagnosticError> {
        let pos = expr.pos;
        let ExprKind::Call(call) = &mut expr.kind else {
            panic!("INTERNAL ERROR: expected call expression");
        };

        if let ExprKind::VariableAccess(vae) = &call.function.kind {
            let vae = vae.clone();

            // `E.Member(args)` constructs a tuple-payload enum value.
            let mut arguments = Some(std::mem::take(&mut call.arguments));
            match self.try_enum_literal(program, pos, &vae, &mut arguments)? {
                Some(rewritten) => {
                    *expr = rewritten;
                    return Ok(());
                }
                None => {
                    // The rewrite declined and left the arguments alone.
                    call.arguments = arguments.take().expect("arguments untouched");
                }
            }

            // Peel a dotted callee into a struct-access chain; everything
            // below the outermost member is the method receiver.
            let mut name = vae.name.clone();
            let mut members: Vec<String> = Vec::new();
            let mut ident = self.try_get_ident(program, pos, &name)?;
            while ident.is_none() && !name.modules.is_empty() {
                let (parent, member) = name.split().expect("qualified name splits");
                members.push(member);
                name = parent;
                ident = self.try_get_ident(program, pos, &name)?;
            }

            if ident.is_some() && !members.is_empty() {
                let base = Expr::new(
                    ExprKind::VariableAccess(VariableAccessExpr {
                        name,
                        variable: None,
                        generic_args: vae.generic_args.clone(),
                    }),
                    call.function.pos,
                );
                let mut chain = base;
                let outermost = members.remove(0);
                for member in members.into_iter().rev() {
                    chain = Expr::new(
                        ExprKind::StructAccess(StructAccessExpr {
                            struct_expr: Box::new(chain),
                            member,
                            generic_args: Vec::new(),
                            parent_function: self.current_function(),
                        }),
                        pos,
                    );
                }
                call.receiver_access = Some(Box::new(chain.clone()));
                call.function = Box::new(Expr::new(
                    ExprKind::StructAccess(StructAccessExpr {
                        struct_expr: Box::new(chain),
                        member: outermost,
                        generic_args: Vec::new(),
                        parent_function: self.current_function(),
                    }),
                    pos,
                ));
            }
        }

        // A call whose callee names a type is a cast of exactly one
        // argument.
        let ExprKind::Call(call) = &mut expr.kind else {
            unreachable!();
        };
        let callee = (*call.function).clone();
        if let Some(ty) = self.expr_to_type(program, &callee)? {
            if call.arguments.len() != 1 {
                return Err(self.err(
                    Category::Arity,
                    pos,
                    "Casts must receive exactly one argument".to_string(),
                ));
            }
            let target = self.resolve_type_reference(program, pos, &TypeReference::new(ty))?;
            let inner = call.arguments.remove(0);
            expr.kind = ExprKind::Cast(CastExpr {
                ty: target,
                expr: Box::new(inner),
            });
        }
        Ok(())
    }

    /// Shared enum-member detection for access and call positions. When
    /// the rewrite applies, any call arguments are taken and become the
    /// tuple payload; when it declines, they are left for the caller.
    fn try_enum_literal(
        &mut self,
        program: &mut Program,
        pos: Position,
        access: &VariableAccessExpr,
        arguments: &mut Option<Vec<Expr>>,
    ) -> Result<Option<Expr>, DiagnosticError> {
        if access.name.modules.is_empty() {
            return Ok(None);
        }
        let Some((enum_name, member)) = access.name.split() else {
            return Ok(None);
        };
        let Some(ident) = self.try_get_ident(program, pos, &enum_name)? else {
            return Ok(None);
        };
        let IdentValue::Type(ty) = &ident.value else {
            return Ok(None);
        };
        if !matches!(ty.actual(&program.types), Type::Enum(_)) {
            return Ok(None);
        }

        let generic_args = self.resolve_type_references(program, pos, &access.generic_args)?;
        let enum_ref = self.resolve_type_reference(
            program,
            pos,
            &TypeReference::with_args(Type::Unresolved(enum_name.clone()), generic_args),
        )?;
        let Type::Enum(enum_type) = enum_ref.base.actual(&program.types).clone() else {
            panic!("INTERNAL ERROR: enum ident resolved to a non-enum");
        };
        let Some(member_decl) = enum_type.member(&member) else {
            return Err(self.err(
                Category::UnresolvedName,
                pos,
                format!(
                    "No such member in enum `{}`: `{member}`",
                    enum_ref.type_name(&program.types)
                ),
            ));
        };

        let tuple = arguments.take().map(|members| {
            Box::new(Expr::new(
                ExprKind::TupleLiteral(TupleLiteral {
                    members,
                    ty: Some(TypeReference::with_args(
                        member_decl.ty.clone(),
                        enum_ref.generic_args.clone(),
                    )),
                }),
                pos,
            ))
        });

        Ok(Some(Expr::new(
            ExprKind::EnumLiteral(EnumLiteral {
                member,
                ty: Some(enum_ref),
                tuple,
                composite: None,
            }),
            pos,
        )))
    }

    /// A composite literal may really be the struct payload of an enum
    /// member; otherwise its declared type is resolved and propagated to
    /// the member values as a hint for inference.
    fn resolve_composite_literal(
        &mut self,
        program: &mut Program,
        expr: &mut Expr,
    ) -> Result<(), DiagnosticError> {
        let pos = expr.pos;
        let ExprKind::CompositeLiteral(lit) = &expr.kind else {
            panic!("INTERNAL ERROR: expected composite literal");
        };
        let Some(declared) = lit.ty.clone() else {
            return Ok(());
        };

        if let Type::Unresolved(name) = &declared.base
            && let Some((enum_name, member)) = name.split()
        {
            let ident = self.get_ident(program, pos, &enum_name)?;
            if let IdentValue::Type(ty) = &ident.value
                && matches!(ty.actual(&program.types), Type::Enum(_))
            {
                let generic_args =
                    self.resolve_type_references(program, pos, &declared.generic_args)?;
                let enum_ref = self.resolve_type_reference(
                    program,
                    pos,
                    &TypeReference::with_args(Type::Unresolved(enum_name.clone()), generic_args),
                )?;
                let Type::Enum(enum_type) = enum_ref.base.actual(&program.types).clone() else {
                    panic!("INTERNAL ERROR: enum ident resolved to a non-enum");
                };
                let Some(member_decl) = enum_type.member(&member) else {
                    return Err(self.err(
                        Category::UnresolvedName,
                        pos,
                        format!("Enum `{enum_name}` has no member `{member}`"),
                    ));
                };
                let payload_ty = TypeReference::with_args(
                    member_decl.ty.clone(),
                    enum_ref.generic_args.clone(),
                );

                let ExprKind::CompositeLiteral(mut inner) = std::mem::replace(
                    &mut expr.kind,
                    ExprKind::DiscardAccess(ku_ast::DiscardAccessExpr),
                ) else {
                    unreachable!();
                };
                inner.ty = Some(payload_ty);
                expr.kind = ExprKind::EnumLiteral(EnumLiteral {
                    member,
                    ty: Some(TypeReference::with_args(
                        ty.clone(),
                        enum_ref.generic_args.clone(),
                    )),
                    tuple: None,
                    composite: Some(Box::new(Expr::new(
                        ExprKind::CompositeLiteral(inner),
                        pos,
                    ))),
                });
                return Ok(());
            }
        }

        let resolved = self.resolve_type_reference(program, pos, &declared)?;
        let gcon = if resolved.generic_args.is_empty() {
            None
        } else {
            Some(GenericContext::from_type_reference(&resolved, &program.types))
        };

        let actual = resolved.base.actual(&program.types).clone();
        let ExprKind::CompositeLiteral(lit) = &mut expr.kind else {
            unreachable!();
        };
        lit.ty = Some(resolved.clone());

        // Preliminary type hints for the inference pass.
        match actual {
            Type::Array(at) => {
                for value in &mut lit.values {
                    let mut ty = (*at.member).clone();
                    if let Some(gcon) = &gcon {
                        ty = gcon.replace(&ty);
                    }
                    value.set_type(program, &ty);
                }
            }
            Type::Struct(st) => {
                let fields = lit.fields.clone();
                for (field, value) in fields.iter().zip(&mut lit.values) {
                    let Some(field) = field else { continue };
                    let Some(member) = st.member(field) else { continue };
                    let mut ty = member.ty.clone();
                    if let Some(gcon) = &gcon {
                        ty = gcon.replace(&ty);
                    }
                    value.set_type(program, &ty);
                }
            }
            _ => {
                return Err(self.err(
                    Category::TypeMismatch,
                    pos,
                    format!(
                        "Type `{}` is not composite type",
                        resolved.type_name(&program.types)
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Unwrap pointer/reference expressions around an identifier naming a
    /// type, producing the spelled-out type. Used to tell casts apart
    /// from calls and `sizeof(T)` from `sizeof(expr)`.
    fn expr_to_type(
        &mut self,
        program: &mut Program,
        expr: &Expr,
    ) -> Result<Option<Type>, DiagnosticError> {
        let mut wrappers: Vec<(bool, bool)> = Vec::new();
        let mut current = expr;
        loop {
            match &current.kind {
                ExprKind::ReferenceTo(rf) => {
                    wrappers.push((true, rf.mutable));
                    current = &rf.access;
                }
                ExprKind::PointerTo(ptr) => {
                    wrappers.push((false, ptr.mutable));
                    current = &ptr.access;
                }
                _ => break,
            }
        }

        let ExprKind::VariableAccess(access) = &current.kind else {
            return Ok(None);
        };
        let ident = self.get_ident(program, current.pos, &access.name)?;
        let IdentValue::Type(ty) = &ident.value else {
            return Ok(None);
        };

        let mut result = ty.clone();
        for (is_reference, mutable) in wrappers.into_iter().rev() {
            result = if is_reference {
                reference_to(result.into(), mutable)
            } else {
                pointer_to(result.into(), mutable)
            };
        }
        Ok(Some(result))
    }

    // -- Type resolution ----------------------------------------------------

    fn resolve_type_references(
        &mut self,
        program: &mut Program,
        pos: Position,
        refs: &[TypeReference],
    ) -> Result<Vec<TypeReference>, DiagnosticError> {
        refs.iter()
            .map(|r| self.resolve_type_reference(program, pos, r))
            .collect()
    }

    fn resolve_type_reference(
        &mut self,
        program: &mut Program,
        pos: Position,
        reference: &TypeReference,
    ) -> Result<TypeReference, DiagnosticError> {
        Ok(TypeReference {
            base: self.resolve_type(program, pos, reference.base.clone())?,
            generic_args: self.resolve_type_references(program, pos, &reference.generic_args)?,
        })
    }

    fn resolve_type(
        &mut self,
        program: &mut Program,
        pos: Position,
        ty: Type,
    ) -> Result<Type, DiagnosticError> {
        match ty {
            Type::Primitive(_) | Type::Named(_) => Ok(ty),

            Type::Array(at) => Ok(ku_types::array_of(
                self.resolve_type_reference(program, pos, &at.member)?,
                at.length,
            )),

            Type::Reference(rt) => Ok(reference_to(
                self.resolve_type_reference(program, pos, &rt.referent)?,
                rt.mutable,
            )),

            Type::Pointer(pt) => Ok(pointer_to(
                self.resolve_type_reference(program, pos, &pt.addressee)?,
                pt.mutable,
            )),

            Type::Substitution(mut sub) => {
                let mut constraints = Vec::with_capacity(sub.constraints.len());
                for constraint in &sub.constraints {
                    let resolved = self.resolve_type_reference(program, pos, constraint)?;
                    if !matches!(resolved.base.actual(&program.types), Type::Interface(_)) {
                        return Err(self.err(
                            Category::GenericArguments,
                            pos,
                            "Generic parameter constraint must be interface".to_string(),
                        ));
                    }
                    constraints.push(resolved);
                }
                sub.constraints = constraints;
                Ok(Type::Substitution(sub))
            }

            Type::Struct(st) => {
                self.push_frame();
                let result = (|| {
                    for gpar in &st.generic_params {
                        self.top_frame().insert_type(
                            &gpar.name,
                            Type::Substitution(gpar.clone()),
                            false,
                        );
                    }
                    let mut members = Vec::with_capacity(st.members.len());
                    for member in &st.members {
                        members.push(ku_types::StructMember {
                            name: member.name.clone(),
                            ty: self.resolve_type_reference(program, pos, &member.ty)?,
                            public: member.public,
                        });
                    }
                    Ok(Type::Struct(ku_types::StructType {
                        members,
                        generic_params: st.generic_params.clone(),
                    }))
                })();
                self.pop_frame();
                result
            }

            Type::Tuple(tt) => {
                let members = tt
                    .members
                    .iter()
                    .map(|m| self.resolve_type_reference(program, pos, m))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ku_types::tuple_of(members))
            }

            Type::Enum(et) => {
                self.push_frame();
                let result = (|| {
                    for gpar in &et.generic_params {
                        self.top_frame().insert_type(
                            &gpar.name,
                            Type::Substitution(gpar.clone()),
                            false,
                        );
                    }
                    let mut members = Vec::with_capacity(et.members.len());
                    for member in &et.members {
                        members.push(ku_types::EnumMember {
                            name: member.name.clone(),
                            ty: self.resolve_type(program, pos, member.ty.clone())?,
                            tag: member.tag,
                        });
                    }
                    Ok(Type::Enum(ku_types::EnumType {
                        simple: et.simple,
                        members,
                        generic_params: et.generic_params.clone(),
                    }))
                })();
                self.pop_frame();
                result
            }

            Type::Interface(it) => {
                self.push_frame();
                let result = (|| {
                    for gpar in &it.generic_params {
                        self.top_frame().insert_type(
                            &gpar.name,
                            Type::Substitution(gpar.clone()),
                            false,
                        );
                    }
                    for function in &it.functions {
                        let ty = program.function(*function).ty.clone();
                        let resolved =
                            self.resolve_type(program, pos, Type::Function(Box::new(ty)))?;
                        let Type::Function(ft) = resolved else {
                            panic!("INTERNAL ERROR: interface function resolved to a non-function");
                        };
                        program.function_mut(*function).ty = *ft;
                    }
                    Ok(Type::Interface(it.clone()))
                })();
                self.pop_frame();
                result
            }

            Type::Function(ft) => {
                let parameters =
                    self.resolve_type_references(program, pos, &ft.parameters)?;
                let receiver = match &ft.receiver {
                    Some(receiver) => {
                        let resolved = self.resolve_type_reference(program, pos, receiver)?;
                        self.check_receiver_type(program, pos, &resolved, "receiver")?;
                        Some(resolved)
                    }
                    None => None,
                };
                let ret = match &ft.ret {
                    Some(ret) => Some(self.resolve_type_reference(program, pos, ret)?),
                    None => None,
                };
                Ok(Type::Function(Box::new(ku_types::FunctionType {
                    parameters,
                    ret,
                    receiver,
                    variadic: ft.variadic,
                    generic_params: ft.generic_params.clone(),
                    attrs: ft.attrs.clone(),
                })))
            }

            Type::Unresolved(name) => {
                let ident = self.get_ident(program, pos, &name)?;
                match &ident.value {
                    IdentValue::Type(found) => self.resolve_type(program, pos, found.clone()),
                    _ => Err(self.err(
                        Category::UnresolvedName,
                        pos,
                        format!(
                            "Expected type identifier, found {} `{name}`",
                            ident.kind.as_str()
                        ),
                    )),
                }
            }

            Type::Var(_) | Type::Constructor(_) => {
                panic!("INTERNAL ERROR: inference placeholder in resolve pass")
            }
        }
    }

    /// A method receiver must be a named type declared in this module.
    /// Returns the named type on success.
    fn check_receiver_type(
        &self,
        program: &Program,
        pos: Position,
        reference: &TypeReference,
        purpose: &str,
    ) -> Result<NamedTypeId, DiagnosticError> {
        let mut stripped = reference;
        while let Type::Pointer(pt) = &stripped.base {
            stripped = &pt.addressee;
        }
        match &stripped.base {
            Type::Named(id) => {
                let def = program.types.named(*id);
                if def.module != self.module {
                    Err(self.err(
                        Category::ReceiverMismatch,
                        pos,
                        format!(
                            "Cannot use type `{}` declared in module `{}` as {purpose}",
                            reference.type_name(&program.types),
                            program.module(def.module).name
                        ),
                    ))
                } else {
                    Ok(*id)
                }
            }
            _ => Err(self.err(
                Category::ReceiverMismatch,
                pos,
                format!(
                    "Expected named type for {purpose}, found `{}`",
                    reference.type_name(&program.types)
                ),
            )),
        }
    }
}

impl Visitor for Resolver<'_> {
    type Error = DiagnosticError;

    fn enter_scope(&mut self) {
        self.push_frame();
    }

    fn exit_scope(&mut self) {
        self.pop_frame();
    }

    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, DiagnosticError> {
        match node {
            NodeMut::Item(item) => self.resolve_item(program, item)?,
            NodeMut::Expr(expr) => self.resolve_expr(program, expr)?,
        }
        Ok(true)
    }

    fn post_visit(
        &mut self,
        program: &mut Program,
        node: NodeMut<'_>,
    ) -> Result<(), DiagnosticError> {
        match node {
            NodeMut::Item(Node::FunctionDecl(decl)) => {
                // Attach the method to its receiver's named type.
                let receiver = program.function(decl.function).ty.receiver.clone();
                if let Some(receiver) = receiver {
                    let mut stripped = &receiver;
                    while let Type::Pointer(pt) = &stripped.base {
                        stripped = &pt.addressee;
                    }
                    if let Type::Named(id) = &stripped.base {
                        program.types.named_mut(*id).methods.push(decl.function);
                    }
                }
                self.pop_frame();
                self.function_stack.pop();
            }
            NodeMut::Expr(expr) => {
                if matches!(expr.kind, ExprKind::Lambda(_)) {
                    self.function_stack.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod resolve_tests;
