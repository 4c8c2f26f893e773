//! The per-sub-module inference pass.
//!
//! Constraint generation walks the AST assigning a dense id to every
//! typed node (expressions and variables). Finalization solves, indexes
//! the substitution set by id, resolves leftover constructor queries,
//! applies the results back onto the AST, runs the per-node fix-ups
//! (method-call rewriting, auto-ref/deref, literal propagation), defaults
//! bare numeric literals, and takes variable types from initializers.

use std::collections::{BTreeSet, HashMap};

use ku_ast::{
    DerefAccessExpr, Expr, ExprKind, FunctionAccessExpr, LoopKind, Node, NodeMut, PointerToExpr,
    Program, Visitor, for_each_node, walk_submodule,
};
use ku_diag::{Category, Diagnostic, DiagnosticError, Position};
use ku_types::{
    ConstructorKind, ConstructorType, FunctionType, GenericContext, ModuleId, Primitive, Type,
    TypeReference, TypeVarId, VariableId, pointer_to, reference_to, tuple_of,
};

use crate::{
    Constraint, Side, Unifier, constructor_query, extract_type_variables, prim_ref, var_ref,
};

fn diag(category: Category, pos: Position, message: String) -> DiagnosticError {
    Diagnostic::error(category, message).at(pos).into()
}

/// Run inference over one sub-module (dependencies first). Idempotent:
/// a sub-module is inferred at most once. Returns any warnings.
pub fn infer_submodule(
    program: &mut Program,
    module: ModuleId,
    file: &str,
) -> Result<Vec<Diagnostic>, DiagnosticError> {
    {
        let submodule = program
            .module(module)
            .parts
            .get(file)
            .unwrap_or_else(|| panic!("INTERNAL ERROR: unknown sub-module `{file}`"));
        if submodule.inferred {
            return Ok(Vec::new());
        }
    }
    program
        .module_mut(module)
        .parts
        .get_mut(file)
        .expect("sub-module exists")
        .inferred = true;

    let mut warnings = Vec::new();

    // A module's dependencies must be fully inferred before the module
    // itself; the import graph is already cycle-free.
    let used: BTreeSet<ModuleId> = program.module(module).parts[file]
        .use_scope
        .used_modules()
        .map(|(_, id)| id)
        .collect();
    for used_module in used {
        let files: Vec<String> = program.module(used_module).parts.keys().cloned().collect();
        for used_file in files {
            warnings.extend(infer_submodule(program, used_module, &used_file)?);
        }
    }

    let mut inferrer = Inferrer::new(module, file);
    walk_submodule(&mut inferrer, program, module, file)?;
    inferrer.finalize(program)?;
    warnings.extend(inferrer.unifier.take_warnings());
    Ok(warnings)
}

/// Assigns type-variable ids, emits constraints, and finalizes one
/// sub-module. Ids are discarded when the inferrer finishes.
pub struct Inferrer {
    module: ModuleId,
    /// Key of the sub-module this inferrer owns.
    file: String,
    functions: Vec<ku_types::FunctionId>,
    pub unifier: Unifier,
    id_count: usize,
    positions: Vec<Position>,
    variable_ids: HashMap<VariableId, TypeVarId>,
}

impl Inferrer {
    pub fn new(module: ModuleId, file: &str) -> Self {
        Self {
            module,
            file: file.to_string(),
            functions: Vec::new(),
            unifier: Unifier::new(),
            id_count: 0,
            positions: Vec::new(),
            variable_ids: HashMap::new(),
        }
    }

    fn next_id(&mut self, pos: Position) -> TypeVarId {
        let id = TypeVarId(self.id_count);
        self.id_count += 1;
        self.positions.push(pos);
        id
    }

    fn pos_of(&self, id: TypeVarId) -> Position {
        self.positions[id.0]
    }

    fn current_function(&self) -> ku_types::FunctionId {
        *self
            .functions
            .last()
            .expect("INTERNAL ERROR: typed statement outside a function")
    }

    /// The id for a variable. Variables are shared between their
    /// declaration and every access, so the id is allocated once.
    fn handle_variable(
        &mut self,
        program: &Program,
        variable: VariableId,
        pos: Position,
    ) -> TypeVarId {
        if let Some(&id) = self.variable_ids.get(&variable) {
            return id;
        }
        let id = self.next_id(pos);
        self.variable_ids.insert(variable, id);
        if let Some(ty) = program.variable(variable).ty.clone() {
            self.unifier.add_simple_is(id, ty);
        }
        id
    }

    fn handle_expr(
        &mut self,
        program: &mut Program,
        expr: &mut Expr,
    ) -> Result<TypeVarId, DiagnosticError> {
        if let Some(id) = expr.type_var {
            return Ok(id);
        }
        let id = self.next_id(expr.pos);
        expr.type_var = Some(id);
        self.infer_expr(program, expr, id)?;
        Ok(id)
    }

    fn infer_expr(
        &mut self,
        program: &mut Program,
        expr: &mut Expr,
        id: TypeVarId,
    ) -> Result<(), DiagnosticError> {
        let pos = expr.pos;
        match &mut expr.kind {
            ExprKind::Binary(binary) => {
                let a = self.handle_expr(program, &mut binary.lhand)?;
                let b = self.handle_expr(program, &mut binary.rhand)?;
                let left_ty = binary.lhand.type_of(program);
                let right_ty = binary.rhand.type_of(program);
                match binary.op.category() {
                    ku_ast::OpCategory::Comparison => {
                        if left_ty.is_none() || right_ty.is_none() {
                            self.unifier.add_equals(a, b);
                        }
                        self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
                    }
                    ku_ast::OpCategory::Bitwise | ku_ast::OpCategory::Arithmetic => {
                        if let (Some(left_ty), Some(_)) = (left_ty, right_ty) {
                            self.unifier.add_simple_is(id, left_ty);
                        } else {
                            self.unifier.add_equals(a, b);
                            self.unifier.add_equals(id, a);
                        }
                    }
                    ku_ast::OpCategory::Logical => {
                        self.unifier.add_simple_is(a, prim_ref(Primitive::Bool));
                        self.unifier.add_simple_is(b, prim_ref(Primitive::Bool));
                        self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
                    }
                }
            }

            ExprKind::Unary(unary) => {
                let inner = self.handle_expr(program, &mut unary.expr)?;
                match unary.op {
                    ku_ast::UnaryOp::LogNot => {
                        self.unifier.add_simple_is(inner, prim_ref(Primitive::Bool));
                        self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
                    }
                    ku_ast::UnaryOp::BitNot | ku_ast::UnaryOp::Negative => {
                        self.unifier.add_equals(id, inner);
                    }
                }
            }

            ExprKind::Call(call) => {
                let fn_id = self.handle_expr(program, &mut call.function)?;

                if let Some(fn_ty) = call.function.type_of(program)
                    && let Type::Function(ft) = fn_ty.base.actual(&program.types).clone()
                {
                    if call.arguments.len() < ft.parameters.len() {
                        return Err(diag(
                            Category::Arity,
                            pos,
                            format!(
                                "Call has too few arguments, want {}, has {}",
                                ft.parameters.len(),
                                call.arguments.len()
                            ),
                        ));
                    }

                    if ft.generic_params.is_empty() {
                        for (idx, arg) in call.arguments.iter_mut().enumerate() {
                            let arg_id = self.handle_expr(program, arg)?;
                            if idx >= ft.parameters.len() {
                                continue;
                            }
                            self.unifier.add_simple_is(arg_id, ft.parameters[idx].clone());
                        }
                        self.unifier.add_simple_is(id, ft.return_type());
                        return Ok(());
                    }
                }

                // No usable signature: build one from the site's type
                // variables and unify it with the callee.
                let receiver_id = match call.receiver_access.as_deref_mut() {
                    Some(receiver) => Some(self.handle_expr(program, receiver)?),
                    None => None,
                };
                let mut arg_ids = Vec::with_capacity(call.arguments.len());
                for arg in &mut call.arguments {
                    arg_ids.push(self.handle_expr(program, arg)?);
                }

                let mut fn_type = FunctionType {
                    ret: Some(var_ref(id)),
                    ..FunctionType::default()
                };
                if receiver_id.is_some() {
                    fn_type.receiver = Some(var_ref(id));
                }
                for arg_id in arg_ids {
                    fn_type.parameters.push(var_ref(arg_id));
                }
                self.unifier.add_is(
                    fn_id,
                    TypeReference::new(Type::Function(Box::new(fn_type))),
                );
            }

            ExprKind::Cast(cast) => {
                self.handle_expr(program, &mut cast.expr)?;
                let target = cast.ty.clone();
                self.unifier.add_simple_is(id, target);
            }

            ExprKind::ReferenceTo(rf) => {
                let inner = self.handle_expr(program, &mut rf.access)?;
                if let Some(ty) = rf.access.type_of(program) {
                    self.unifier
                        .add_simple_is(id, TypeReference::new(reference_to(ty, rf.mutable)));
                }
                self.unifier.add_is(
                    id,
                    TypeReference::new(reference_to(var_ref(inner), rf.mutable)),
                );
            }

            ExprKind::PointerTo(ptr) => {
                let inner = self.handle_expr(program, &mut ptr.access)?;
                if let Some(ty) = ptr.access.type_of(program) {
                    self.unifier
                        .add_simple_is(id, TypeReference::new(pointer_to(ty, ptr.mutable)));
                }
                self.unifier.add_is(
                    id,
                    TypeReference::new(pointer_to(var_ref(inner), ptr.mutable)),
                );
            }

            ExprKind::DerefAccess(deref) => {
                let inner = self.handle_expr(program, &mut deref.expr)?;
                if let Some(ty) = deref.expr.type_of(program)
                    && let Some(addressee) = ty.base.actual(&program.types).addressee()
                {
                    self.unifier.add_simple_is(id, addressee.clone());
                    return Ok(());
                }
                self.unifier.add_is(
                    id,
                    TypeReference::new(Type::Constructor(ConstructorType {
                        kind: ConstructorKind::Deref,
                        args: vec![var_ref(inner)],
                        member: None,
                    })),
                );
            }

            ExprKind::Sizeof(sizeof) => {
                if let Some(inner) = sizeof.expr.as_deref_mut() {
                    self.handle_expr(program, inner)?;
                }
                self.unifier.add_simple_is(id, prim_ref(Primitive::Uint));
            }

            ExprKind::VariableAccess(access) => {
                let variable = access
                    .variable
                    .expect("INTERNAL ERROR: unresolved variable access in inference");
                let vid = self.handle_variable(program, variable, pos);
                if let Some(ty) = program.variable(variable).ty.clone() {
                    self.unifier.add_simple_is(id, ty);
                } else {
                    self.unifier.add_equals(id, vid);
                }
            }

            ExprKind::StructAccess(access) => {
                let inner = self.handle_expr(program, &mut access.struct_expr)?;
                self.unifier.add_is(
                    id,
                    TypeReference::new(Type::Constructor(ConstructorType {
                        kind: ConstructorKind::StructMember,
                        args: vec![var_ref(inner)],
                        member: Some(access.member.clone()),
                    })),
                );
            }

            ExprKind::ArrayAccess(access) => {
                let array_id = self.handle_expr(program, &mut access.array)?;
                self.handle_expr(program, &mut access.subscript)?;
                if let Some(ty) = access.array.type_of(program)
                    && let Type::Array(at) = ty.base.actual(&program.types)
                {
                    self.unifier.add_simple_is(id, (*at.member).clone());
                    return Ok(());
                }
                self.unifier.add_is(
                    id,
                    TypeReference::new(Type::Constructor(ConstructorType {
                        kind: ConstructorKind::ArrayIndex,
                        args: vec![var_ref(array_id)],
                        member: None,
                    })),
                );
            }

            ExprKind::ArrayLen(len) => {
                self.handle_expr(program, &mut len.expr)?;
                self.unifier.add_simple_is(id, prim_ref(Primitive::Uint));
            }

            ExprKind::EnumLiteral(lit) => {
                let ty = lit
                    .ty
                    .clone()
                    .expect("INTERNAL ERROR: encountered enum literal without a type");
                let mut payload_id = None;
                if let Some(tuple) = lit.tuple.as_deref_mut() {
                    payload_id = Some(self.handle_expr(program, tuple)?);
                } else if let Some(composite) = lit.composite.as_deref_mut() {
                    payload_id = Some(self.handle_expr(program, composite)?);
                }
                if let Some(payload_id) = payload_id {
                    self.unifier.add_is(payload_id, ty.clone());
                }
                self.unifier.add_is(id, ty);
            }

            ExprKind::BoolLiteral(_) => {
                self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
            }

            ExprKind::RuneLiteral(_) => {
                self.unifier.add_simple_is(id, prim_ref(Primitive::Rune));
            }

            ExprKind::CompositeLiteral(lit) => {
                if let Some(ty) = lit.ty.clone() {
                    match ty.base.actual(&program.types).clone() {
                        Type::Array(at) => {
                            for value in &mut lit.values {
                                let value_id = self.handle_expr(program, value)?;
                                self.unifier.add_simple_is(value_id, (*at.member).clone());
                            }
                        }
                        Type::Struct(st) => {
                            let fields = lit.fields.clone();
                            for (field, value) in fields.iter().zip(&mut lit.values) {
                                let value_id = self.handle_expr(program, value)?;
                                let Some(field) = field else { continue };
                                let Some(member) = st.member(field) else {
                                    return Err(diag(
                                        Category::TypeMismatch,
                                        pos,
                                        format!(
                                            "Struct `{}` has no member `{field}`",
                                            ty.type_name(&program.types)
                                        ),
                                    ));
                                };
                                self.unifier.add_simple_is(value_id, member.ty.clone());
                            }
                        }
                        _ => {}
                    }
                    self.unifier.add_simple_is(id, ty);
                }
            }

            ExprKind::TupleLiteral(lit) => {
                let tuple_ty = match lit.ty.as_ref().map(|t| &t.base) {
                    Some(Type::Tuple(tt)) => Some(tt.clone()),
                    _ => None,
                };

                let mut member_refs = Vec::with_capacity(lit.members.len());
                for (idx, member) in lit.members.iter_mut().enumerate() {
                    let member_id = self.handle_expr(program, member)?;
                    match tuple_ty.as_ref().and_then(|tt| tt.members.get(idx)) {
                        Some(declared) => {
                            self.unifier.add_simple_is(member_id, declared.clone());
                            member_refs.push(declared.clone());
                        }
                        None => member_refs.push(var_ref(member_id)),
                    }
                }

                if let Some(ty) = lit.ty.clone() {
                    self.unifier.add_simple_is(id, ty);
                } else {
                    self.unifier
                        .add_is(id, TypeReference::new(tuple_of(member_refs)));
                }
            }

            ExprKind::FunctionAccess(access) => {
                let func_ty = program.function(access.function).ty.clone();
                let base = TypeReference::new(Type::Function(Box::new(func_ty.clone())));
                if func_ty.generic_params.is_empty() {
                    self.unifier.add_simple_is(id, base);
                } else if !access.generic_args.is_empty() {
                    let gcon =
                        GenericContext::new(&func_ty.generic_params, &access.generic_args);
                    self.unifier.add_simple_is(id, gcon.replace(&base));
                }
            }

            ExprKind::Lambda(lambda) => {
                let func_ty = program.function(lambda.function).ty.clone();
                self.unifier
                    .add_simple_is(id, TypeReference::new(Type::Function(Box::new(func_ty))));
            }

            ExprKind::NumericLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::DiscardAccess(_)
            | ExprKind::EnumPattern(_) => {}
        }
        Ok(())
    }

    fn infer_item(&mut self, program: &mut Program, item: &mut Node) -> Result<(), DiagnosticError> {
        match item {
            Node::FunctionDecl(decl) => {
                self.functions.push(decl.function);
            }

            Node::VariableDecl(decl) => {
                if let Some(assignment) = decl.assignment.as_mut() {
                    let declared = program.variable(decl.variable).ty.clone();
                    if let Some(declared) = declared {
                        assignment.set_type(program, &declared);
                    } else if let Some(inferred) = assignment.type_of(program)
                        && !matches!(inferred.base, Type::Substitution(_))
                    {
                        let variable = program.variable_mut(decl.variable);
                        if variable.ty.is_none() {
                            variable.ty = Some(inferred);
                        }
                    }
                    let aid = self.handle_expr(program, assignment)?;
                    let vid = self.handle_variable(program, decl.variable, decl.pos);
                    self.unifier.add_equals(vid, aid);
                }
            }

            Node::DestructVarDecl(decl) => {
                let aid = self.handle_expr(program, &mut decl.assignment)?;
                if let Some(ty) = decl.assignment.type_of(program)
                    && let Type::Tuple(tt) = ty.base.actual(&program.types).clone()
                {
                    for (idx, variable) in decl.variables.iter().enumerate() {
                        if decl.should_discard.get(idx).copied().unwrap_or(false) {
                            continue;
                        }
                        if let Some(member) = tt.members.get(idx) {
                            let var = program.variable_mut(*variable);
                            if var.ty.is_none() {
                                var.ty = Some(member.clone());
                            }
                        }
                    }
                    return Ok(());
                }

                let mut member_refs = Vec::with_capacity(decl.variables.len());
                for (idx, variable) in decl.variables.iter().enumerate() {
                    let id = if decl.should_discard.get(idx).copied().unwrap_or(false) {
                        self.next_id(decl.pos)
                    } else {
                        self.handle_variable(program, *variable, decl.pos)
                    };
                    member_refs.push(var_ref(id));
                }
                self.unifier
                    .add_is(aid, TypeReference::new(tuple_of(member_refs)));
            }

            Node::AssignStat(stat) => {
                let a = self.handle_expr(program, &mut stat.access)?;
                let b = self.handle_expr(program, &mut stat.assignment)?;
                if let Some(ty) = stat.access.type_of(program) {
                    self.unifier.add_simple_is(b, ty);
                } else {
                    self.unifier.add_equals(a, b);
                }
            }

            Node::BinopAssignStat(stat) => {
                let a = self.handle_expr(program, &mut stat.access)?;
                let b = self.handle_expr(program, &mut stat.assignment)?;
                if let Some(ty) = stat.access.type_of(program) {
                    self.unifier.add_simple_is(b, ty);
                } else {
                    self.unifier.add_equals(a, b);
                }
            }

            Node::DestructAssignStat(stat) => {
                self.infer_destructuring_assign(
                    program,
                    &mut stat.assignment,
                    &mut stat.accesses,
                )?;
            }

            Node::DestructBinopAssignStat(stat) => {
                self.infer_destructuring_assign(
                    program,
                    &mut stat.assignment,
                    &mut stat.accesses,
                )?;
            }

            Node::CallStat(stat) => {
                self.handle_expr(program, &mut stat.call)?;
            }

            Node::DeferStat(stat) => {
                self.handle_expr(program, &mut stat.call)?;
            }

            Node::IfStat(stat) => {
                for condition in &mut stat.exprs {
                    let id = self.handle_expr(program, condition)?;
                    self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
                }
            }

            Node::ReturnStat(stat) => {
                if let Some(value) = stat.value.as_mut() {
                    let id = self.handle_expr(program, value)?;
                    let ret = program.function(self.current_function()).ty.return_type();
                    self.unifier.add_simple_is(id, ret);
                }
            }

            Node::LoopStat(stat) => {
                if let LoopKind::Conditional(condition) = &mut stat.kind {
                    let id = self.handle_expr(program, condition)?;
                    self.unifier.add_simple_is(id, prim_ref(Primitive::Bool));
                }
            }

            Node::MatchStat(stat) => {
                let target_id = self.handle_expr(program, &mut stat.target)?;
                let target_ty = stat.target.type_of(program);
                for branch in &mut stat.branches {
                    let pattern_id = self.handle_expr(program, &mut branch.pattern)?;
                    match &target_ty {
                        Some(ty) => branch.pattern.set_type(program, ty),
                        None => self.unifier.add_equals(pattern_id, target_id),
                    }
                }
            }

            _ => {}
        }
        Ok(())
    }

    /// Shared by plain and compound destructuring assignment.
    fn infer_destructuring_assign(
        &mut self,
        program: &mut Program,
        assignment: &mut Expr,
        accesses: &mut [Expr],
    ) -> Result<(), DiagnosticError> {
        // A raw tuple literal takes its member types from the accesses,
        // so untyped literals don't fall back to their defaults.
        if matches!(assignment.kind, ExprKind::TupleLiteral(_)) {
            let access_types: Vec<Option<TypeReference>> =
                accesses.iter().map(|a| a.type_of(program)).collect();
            if let ExprKind::TupleLiteral(tl) = &mut assignment.kind {
                for (idx, ty) in access_types.iter().enumerate() {
                    if let (Some(ty), Some(member)) = (ty, tl.members.get_mut(idx)) {
                        member.set_type(program, ty);
                    }
                }
            }
        }

        let assignment_id = self.handle_expr(program, assignment)?;
        let mut member_refs = Vec::with_capacity(accesses.len());
        for access in accesses.iter_mut() {
            let id = self.handle_expr(program, access)?;
            member_refs.push(access.type_of(program).unwrap_or_else(|| var_ref(id)));
        }
        self.unifier
            .add_is(assignment_id, TypeReference::new(tuple_of(member_refs)));
        Ok(())
    }

    // -- Finalization -------------------------------------------------------

    /// Solve, apply, fix up, and default: afterwards every typed node has
    /// a fully concrete type and the bookkeeping ids are cleared.
    pub fn finalize(&mut self, program: &mut Program) -> Result<(), DiagnosticError> {
        let substitutions = self.unifier.solve(program);

        // Index the substitution set by left-hand id; simple constraints
        // processed later override.
        let mut sub_list: Vec<Option<Constraint>> = vec![None; self.id_count];
        for subs in substitutions {
            let Side::Ident(id) = subs.left else {
                panic!("INTERNAL ERROR: left side of substitution was not ident");
            };
            sub_list[id.0] = Some(subs);
        }
        for subs in self.unifier.simple_constraints().to_vec() {
            let Side::Ident(id) = subs.left else {
                panic!("INTERNAL ERROR: left side of substitution was not ident");
            };
            sub_list[id.0] = Some(subs);
        }

        // Current per-node view of types (literal defaults included), for
        // back-filling variables that unification left behind.
        let mut node_types: Vec<Option<TypeReference>> = vec![None; self.id_count];
        let (module, files) = (self.module, vec![self.file.clone()]);
        for file in &files {
            for_each_node(program, module, file, |p, node| {
                if let NodeMut::Expr(expr) = node
                    && let Some(id) = expr.type_var
                {
                    node_types[id.0] = expr.type_of(p);
                }
            });
        }
        for (&variable, &id) in &self.variable_ids {
            node_types[id.0] = program.variable(variable).ty.clone();
        }

        // Resolve final types in id order: id order follows the original
        // walk, so earlier nodes are available to later ones.
        let mut final_types: Vec<Option<TypeReference>> = vec![None; self.id_count];
        for id in 0..self.id_count {
            let Some(subs) = sub_list[id].clone() else {
                continue;
            };
            match &subs.right {
                Side::Ident(other) => {
                    final_types[id] = final_types
                        .get(other.0)
                        .cloned()
                        .flatten()
                        .or_else(|| node_types[other.0].clone());
                }
                Side::Type(ty) => {
                    let ty = self.backfill(program, ty, &final_types, &node_types);
                    let ty = self.resolve_pending_constructors(program, TypeVarId(id), ty)?;
                    final_types[id] = Some(ty);
                }
            }
        }

        // Apply the substitution onto the AST.
        for file in &files {
            let mut apply = ApplyTypes {
                final_types: &final_types,
            };
            walk_submodule(&mut apply, program, module, file)?;
        }
        for (&variable, &id) in &self.variable_ids {
            if program.variable(variable).ty.is_none()
                && let Some(ty) = &final_types[id.0]
                && !matches!(ty.base, Type::Substitution(_))
            {
                program.variable_mut(variable).ty = Some(ty.clone());
            }
        }

        // Per-node fix-ups.
        for file in &files {
            walk_submodule(&mut FixUps, program, module, file)?;
        }

        // Default types for bare numeric literals.
        for file in &files {
            for_each_node(program, module, file, |_, node| {
                if let NodeMut::Expr(expr) = node
                    && let ExprKind::NumericLiteral(lit) = &mut expr.kind
                    && lit.ty.is_none()
                {
                    lit.ty = Some(prim_ref(if lit.is_float {
                        Primitive::F64
                    } else {
                        Primitive::Int
                    }));
                }
            });
        }

        // Variable types from assignments.
        for file in &files {
            for_each_node(program, module, file, |p, node| {
                if let NodeMut::Item(Node::VariableDecl(decl)) = node
                    && let Some(assignment) = &decl.assignment
                    && let Some(ty) = assignment.type_of(p)
                {
                    p.variable_mut(decl.variable).ty = Some(ty);
                }
            });
        }

        // Every typed node must have ended up with a type; clear the ids.
        let mut failure: Option<Position> = None;
        for file in &files {
            for_each_node(program, module, file, |p, node| {
                if let NodeMut::Expr(expr) = node {
                    expr.type_var = None;
                    if failure.is_none()
                        && !matches!(
                            expr.kind,
                            ExprKind::DiscardAccess(_) | ExprKind::EnumPattern(_)
                        )
                        && expr.type_of(p).is_none()
                    {
                        failure = Some(expr.pos);
                    }
                }
            });
        }
        if let Some(pos) = failure {
            return Err(diag(
                Category::TypeMismatch,
                pos,
                "Couldn't infer type of expression".to_string(),
            ));
        }
        for (&variable, &id) in &self.variable_ids {
            if program.variable(variable).ty.is_none() {
                return Err(diag(
                    Category::TypeMismatch,
                    self.pos_of(id),
                    "Couldn't infer type of expression".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Replace leftover inference variables by the types of the nodes
    /// they were allocated for.
    fn backfill(
        &self,
        program: &Program,
        reference: &TypeReference,
        final_types: &[Option<TypeReference>],
        node_types: &[Option<TypeReference>],
    ) -> TypeReference {
        let filled = |id: TypeVarId| -> Option<TypeReference> {
            final_types
                .get(id.0)
                .cloned()
                .flatten()
                .or_else(|| node_types.get(id.0).cloned().flatten())
        };

        // Substitute one variable at a time through the shared walker,
        // skipping self-referential fills.
        let mut current = reference.clone();
        loop {
            let mut changed = false;
            for var in collect_vars(&current) {
                if let Some(ty) = filled(var) {
                    if ty_contains_var(&ty, var) {
                        continue;
                    }
                    current = crate::subs_type(program, &current, var, &ty);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        current
    }

    /// A right-hand side that still contains a constructor type is either
    /// a resolvable query or an error.
    fn resolve_pending_constructors(
        &self,
        program: &Program,
        id: TypeVarId,
        reference: TypeReference,
    ) -> Result<TypeReference, DiagnosticError> {
        let Type::Constructor(ct) = &reference.base else {
            return Ok(reference);
        };
        if let Some(resolved) = constructor_query(program, ct, &reference.generic_args) {
            return Ok(resolved);
        }

        let pos = self.pos_of(id);
        let operand = ct
            .args
            .first()
            .map(|arg| arg.type_name(&program.types))
            .unwrap_or_default();
        match ct.kind {
            ConstructorKind::StructMember => Err(diag(
                Category::TypeMismatch,
                pos,
                format!(
                    "Unable to infer type of member `{}` on type `{operand}`",
                    ct.member.as_deref().unwrap_or("")
                ),
            )),
            ConstructorKind::Deref => Err(diag(
                Category::TypeMismatch,
                pos,
                format!("Cannot dereference non-pointer type `{operand}`"),
            )),
            ConstructorKind::ArrayIndex => Err(diag(
                Category::TypeMismatch,
                pos,
                format!("Cannot index non-array type `{operand}`"),
            )),
        }
    }
}

impl Visitor for Inferrer {
    type Error = DiagnosticError;

    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, DiagnosticError> {
        match node {
            NodeMut::Item(item) => self.infer_item(program, item)?,
            NodeMut::Expr(expr) => {
                if let ExprKind::Lambda(lambda) = &expr.kind {
                    self.functions.push(lambda.function);
                }
            }
        }
        Ok(true)
    }

    fn post_visit(
        &mut self,
        _program: &mut Program,
        node: NodeMut<'_>,
    ) -> Result<(), DiagnosticError> {
        match node {
            NodeMut::Item(Node::FunctionDecl(_)) => {
                self.functions.pop();
            }
            NodeMut::Expr(expr) => {
                if matches!(expr.kind, ExprKind::Lambda(_)) {
                    self.functions.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn collect_vars(reference: &TypeReference) -> Vec<TypeVarId> {
    fn walk(reference: &TypeReference, out: &mut Vec<TypeVarId>) {
        if let Type::Var(id) = &reference.base {
            out.push(*id);
        }
        match &reference.base {
            Type::Constructor(ct) => ct.args.iter().for_each(|a| walk(a, out)),
            Type::Function(ft) => {
                ft.parameters.iter().for_each(|p| walk(p, out));
                if let Some(ret) = &ft.ret {
                    walk(ret, out);
                }
                if let Some(receiver) = &ft.receiver {
                    walk(receiver, out);
                }
            }
            Type::Tuple(tt) => tt.members.iter().for_each(|m| walk(m, out)),
            Type::Array(at) => walk(&at.member, out),
            Type::Pointer(pt) => walk(&pt.addressee, out),
            Type::Reference(rt) => walk(&rt.referent, out),
            _ => {}
        }
        for arg in &reference.generic_args {
            walk(arg, out);
        }
    }
    let mut out = Vec::new();
    walk(reference, &mut out);
    out.sort();
    out.dedup();
    out
}

fn ty_contains_var(reference: &TypeReference, var: TypeVarId) -> bool {
    collect_vars(reference).contains(&var)
}

// ---------------------------------------------------------------------------
// Finalization visitors
// ---------------------------------------------------------------------------

/// Applies the solved substitution onto the AST.
struct ApplyTypes<'a> {
    final_types: &'a [Option<TypeReference>],
}

impl Visitor for ApplyTypes<'_> {
    type Error = DiagnosticError;

    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, DiagnosticError> {
        if let NodeMut::Expr(expr) = node
            && let Some(id) = expr.type_var
            && let Some(ty) = self.final_types.get(id.0).cloned().flatten()
        {
            if matches!(expr.kind, ExprKind::FunctionAccess(_)) {
                set_function_access_type(program, expr, &ty)?;
            } else {
                expr.set_type(program, &ty);
            }
        }
        Ok(true)
    }
}

/// Offering a type to a function access recovers the generic arguments
/// the user did not write, by extraction against the site's signature.
fn set_function_access_type(
    program: &mut Program,
    expr: &mut Expr,
    ty: &TypeReference,
) -> Result<(), DiagnosticError> {
    let pos = expr.pos;
    let ExprKind::FunctionAccess(access) = &mut expr.kind else {
        panic!("INTERNAL ERROR: expected function access");
    };
    let func_ty = program.function(access.function).ty.clone();

    if access.generic_args.is_empty() && !func_ty.generic_params.is_empty() {
        let pattern = TypeReference::new(Type::Function(Box::new(func_ty.clone())));
        let bindings = extract_type_variables(program, &pattern, ty).map_err(|detail| {
            diag(
                Category::GenericArguments,
                pos,
                format!("Unable to infer generic arguments for call: {detail}"),
            )
        })?;

        let mut generic_args = Vec::with_capacity(func_ty.generic_params.len());
        for param in &func_ty.generic_params {
            let Some(bound) = bindings.get(&param.name) else {
                return Err(diag(
                    Category::GenericArguments,
                    pos,
                    "Unable to infer generic arguments for call".to_string(),
                ));
            };
            generic_args.push(bound.clone());
        }
        access.generic_args = generic_args;
    } else if access.generic_args.len() != func_ty.generic_params.len() {
        return Err(diag(
            Category::GenericArguments,
            pos,
            format!(
                "Amount of generic arguments must match amount of generic parameters, {} vs {}",
                access.generic_args.len(),
                func_ty.generic_params.len()
            ),
        ));
    }
    Ok(())
}

/// The per-node fix-ups that run after the substitution is applied.
struct FixUps;

impl Visitor for FixUps {
    type Error = DiagnosticError;

    fn visit(&mut self, program: &mut Program, node: NodeMut<'_>) -> Result<bool, DiagnosticError> {
        if let NodeMut::Expr(expr) = node {
            fix_up_expr(program, expr)?;
        }
        Ok(true)
    }
}

fn fix_up_expr(program: &mut Program, expr: &mut Expr) -> Result<(), DiagnosticError> {
    let expr_ty = expr.type_of(program);
    let pos = expr.pos;

    match &mut expr.kind {
        // A call through a struct access resolves the method and becomes
        // a direct function access; the receiver gets one automatic `&`
        // or `*` when its indirection disagrees with the method's by one
        // level.
        ExprKind::Call(call) => {
            if let ExprKind::StructAccess(sae) = &call.function.kind {
                let sae = sae.clone();
                let Some(struct_ty) = sae.struct_expr.type_of(program) else {
                    return Err(diag(
                        Category::TypeMismatch,
                        sae.struct_expr.pos,
                        "Couldn't infer type of expression".to_string(),
                    ));
                };
                let Some(method) = program.get_method(&struct_ty.base, &sae.member) else {
                    return Err(diag(
                        Category::TypeMismatch,
                        call.function.pos,
                        format!(
                            "Type `{}` has no method `{}`",
                            struct_ty.base.without_pointers().type_name(&program.types),
                            sae.member
                        ),
                    ));
                };

                // Extra substitutions when the method is reached through
                // an interface constraint.
                let mut extra: Option<GenericContext> = None;
                if let Type::Substitution(sub) = &struct_ty.base {
                    'outer: for constraint in &sub.constraints {
                        if let Type::Interface(inter) =
                            constraint.base.actual(&program.types).clone()
                        {
                            for interface_fn in &inter.functions {
                                if *interface_fn == method {
                                    extra = Some(GenericContext::new(
                                        &inter.generic_params,
                                        &constraint.generic_args,
                                    ));
                                    break 'outer;
                                }
                            }
                        }
                    }
                }

                // The concrete signature at this site, for generic
                // argument extraction.
                let mut site_ty = FunctionType {
                    ret: expr_ty.clone(),
                    ..FunctionType::default()
                };
                if let Some(receiver) = &call.receiver_access {
                    site_ty.receiver = receiver.type_of(program);
                }
                for argument in &call.arguments {
                    site_ty.parameters.push(
                        argument
                            .type_of(program)
                            .unwrap_or_else(|| TypeReference::new(Type::default())),
                    );
                }

                let mut fae = Expr::new(
                    ExprKind::FunctionAccess(FunctionAccessExpr {
                        function: method,
                        generic_args: sae.generic_args.clone(),
                        receiver_access: call.receiver_access.clone(),
                        parent_function: sae.parent_function,
                        extra_generic_context: extra,
                    }),
                    call.function.pos,
                );
                set_function_access_type(
                    program,
                    &mut fae,
                    &TypeReference::new(Type::Function(Box::new(site_ty))),
                )?;
                call.function = Box::new(fae);
            }

            if let Some(fn_ty) = call.function.type_of(program) {
                let Type::Function(ft) = &fn_ty.base else {
                    return Err(diag(
                        Category::TypeMismatch,
                        call.function.pos,
                        format!(
                            "Attempt to call non-function `{}`",
                            fn_ty.type_name(&program.types)
                        ),
                    ));
                };

                if let (Some(receiver_ty), Some(receiver)) =
                    (&ft.receiver, call.receiver_access.as_mut())
                    && let Some(access_ty) = receiver.type_of(program)
                {
                    let access_levels = access_ty.base.levels_of_indirection();
                    let receiver_levels = receiver_ty.base.levels_of_indirection();
                    let receiver_pos = receiver.pos;

                    if access_levels == receiver_levels + 1 {
                        let inner = std::mem::replace(
                            receiver.as_mut(),
                            Expr::new(
                                ExprKind::DiscardAccess(ku_ast::DiscardAccessExpr),
                                receiver_pos,
                            ),
                        );
                        **receiver = Expr::new(
                            ExprKind::DerefAccess(DerefAccessExpr {
                                expr: Box::new(inner),
                            }),
                            receiver_pos,
                        );
                    } else if access_levels + 1 == receiver_levels {
                        let inner = std::mem::replace(
                            receiver.as_mut(),
                            Expr::new(
                                ExprKind::DiscardAccess(ku_ast::DiscardAccessExpr),
                                receiver_pos,
                            ),
                        );
                        **receiver = Expr::new(
                            ExprKind::PointerTo(PointerToExpr {
                                access: Box::new(inner),
                                mutable: true,
                            }),
                            receiver_pos,
                        );
                    }

                    // Keep the rewritten access's receiver in sync.
                    let synced = call.receiver_access.clone();
                    if let ExprKind::FunctionAccess(access) = &mut call.function.kind {
                        access.receiver_access = synced;
                    }
                }
            }
        }

        // A struct access that is not a method reaches through one level
        // of pointer automatically and must name an existing member.
        ExprKind::StructAccess(sae) => {
            let Some(struct_ty) = sae.struct_expr.type_of(program) else {
                return Err(diag(
                    Category::TypeMismatch,
                    sae.struct_expr.pos,
                    "Couldn't infer type of expression".to_string(),
                ));
            };
            if program.get_method(&struct_ty.base, &sae.member).is_some() {
                return Ok(());
            }

            if struct_ty.base.actual(&program.types).levels_of_indirection() == 1 {
                let inner_pos = sae.struct_expr.pos;
                let inner = std::mem::replace(
                    sae.struct_expr.as_mut(),
                    Expr::new(ExprKind::DiscardAccess(ku_ast::DiscardAccessExpr), inner_pos),
                );
                *sae.struct_expr = Expr::new(
                    ExprKind::DerefAccess(DerefAccessExpr {
                        expr: Box::new(inner),
                    }),
                    inner_pos,
                );
            }

            let Some(target_ty) = sae.struct_expr.type_of(program) else {
                return Err(diag(
                    Category::TypeMismatch,
                    pos,
                    "Couldn't infer type of expression".to_string(),
                ));
            };
            let Type::Struct(st) = target_ty.base.actual(&program.types) else {
                return Err(diag(
                    Category::TypeMismatch,
                    pos,
                    format!(
                        "Cannot access member of type `{}`",
                        target_ty.type_name(&program.types)
                    ),
                ));
            };
            if st.member(&sae.member).is_none() {
                return Err(diag(
                    Category::TypeMismatch,
                    pos,
                    format!(
                        "Struct `{}` does not contain member or method `{}`",
                        target_ty.type_name(&program.types),
                        sae.member
                    ),
                ));
            }
        }

        // A numeric literal mixed with a typed operand takes the typed
        // operand's type; two literals agree on float.
        ExprKind::Binary(binary) => {
            let left_lit = match &binary.lhand.kind {
                ExprKind::NumericLiteral(lit) => Some(lit.is_float),
                _ => None,
            };
            let right_lit = match &binary.rhand.kind {
                ExprKind::NumericLiteral(lit) => Some(lit.is_float),
                _ => None,
            };

            match (left_lit, right_lit) {
                (Some(true), Some(_)) => {
                    if let Some(ty) = binary.lhand.type_of(program) {
                        binary.rhand.set_type(program, &ty);
                    }
                }
                (Some(_), Some(true)) => {
                    if let Some(ty) = binary.rhand.type_of(program) {
                        binary.lhand.set_type(program, &ty);
                    }
                }
                (Some(_), None) => {
                    if let Some(ty) = binary.rhand.type_of(program) {
                        binary.lhand.set_type(program, &ty);
                    }
                }
                (None, Some(_)) => {
                    if let Some(ty) = binary.lhand.type_of(program) {
                        binary.rhand.set_type(program, &ty);
                    }
                }
                _ => {}
            }
        }

        // An enum literal whose generic arguments were not written
        // recovers them from the payload types.
        ExprKind::EnumLiteral(lit) => {
            let Some(ty) = lit.ty.clone() else {
                return Ok(());
            };
            let Type::Enum(et) = ty.base.actual(&program.types).clone() else {
                return Ok(());
            };
            if et.generic_params.is_empty() || ty.generic_args.len() == et.generic_params.len() {
                return Ok(());
            }
            let Some(member) = et.member(&lit.member).cloned() else {
                return Ok(());
            };

            let concrete = match (&lit.tuple, &lit.composite) {
                (Some(tuple), _) => {
                    let ExprKind::TupleLiteral(tl) = &tuple.kind else {
                        return Ok(());
                    };
                    let members: Option<Vec<TypeReference>> =
                        tl.members.iter().map(|m| m.type_of(program)).collect();
                    members.map(|members| TypeReference::new(tuple_of(members)))
                }
                (None, Some(composite)) => {
                    let ExprKind::CompositeLiteral(cl) = &composite.kind else {
                        return Ok(());
                    };
                    let Type::Struct(st) = &member.ty else {
                        return Ok(());
                    };
                    let mut members = Vec::with_capacity(st.members.len());
                    for field in &st.members {
                        let value_ty = cl
                            .fields
                            .iter()
                            .position(|f| f.as_deref() == Some(field.name.as_str()))
                            .and_then(|idx| cl.values.get(idx))
                            .and_then(|value| value.type_of(program));
                        match value_ty {
                            Some(value_ty) => members.push(ku_types::StructMember {
                                name: field.name.clone(),
                                ty: value_ty,
                                public: field.public,
                            }),
                            None => return Ok(()),
                        }
                    }
                    Some(TypeReference::new(Type::Struct(ku_types::StructType {
                        members,
                        generic_params: Vec::new(),
                    })))
                }
                _ => None,
            };
            let Some(concrete) = concrete else {
                return Ok(());
            };

            let pattern = TypeReference::new(member.ty.clone());
            let Ok(bindings) = extract_type_variables(program, &pattern, &concrete) else {
                return Ok(());
            };
            let mut generic_args = Vec::with_capacity(et.generic_params.len());
            for param in &et.generic_params {
                match bindings.get(&param.name) {
                    Some(bound) => generic_args.push(bound.clone()),
                    None => return Ok(()),
                }
            }

            let gcon = GenericContext::new(&et.generic_params, &generic_args);
            if let Some(tuple) = lit.tuple.as_deref_mut()
                && let ExprKind::TupleLiteral(tl) = &mut tuple.kind
            {
                tl.ty = Some(gcon.replace(&TypeReference::new(member.ty.clone())));
            }
            if let Some(composite) = lit.composite.as_deref_mut()
                && let ExprKind::CompositeLiteral(cl) = &mut composite.kind
            {
                cl.ty = Some(gcon.replace(&TypeReference::new(member.ty.clone())));
            }
            if let Some(own) = lit.ty.as_mut() {
                own.generic_args = generic_args;
            }
        }

        // A numeric literal cast to a pointer defaults to `uintptr`;
        // ordinary integers can't be cast to pointers.
        ExprKind::Cast(cast) => {
            if matches!(cast.expr.kind, ExprKind::NumericLiteral(_))
                && cast.ty.base.levels_of_indirection() > 0
            {
                cast.expr.set_type(program, &prim_ref(Primitive::UintPtr));
            }
        }

        _ => {}
    }
    Ok(())
}
