//! Type inference for ku: constraint generation, unification, and
//! finalization.
//!
//! Inference runs once per sub-module. The [`infer::Inferrer`] walks the
//! AST assigning a dense type-variable id to every typed node and emits
//! equality / is-type constraints; the [`Unifier`] solves them by
//! Robinson-style unification over a work stack; finalization applies the
//! resulting substitution back onto the AST, resolves the deferred
//! constructor queries (struct member, deref, array index), rewrites
//! method calls, and picks default types for bare numeric literals.
//!
//! Constructor-typed placeholders exist because inference is
//! order-sensitive for `.`, `*`, and `[]`: the result type depends on
//! knowing the operand type first. They live strictly inside this crate
//! and never escape to the AST.

pub mod infer;
pub mod trace;

pub use infer::{Inferrer, infer_submodule};

use std::collections::{BTreeMap, VecDeque};

use ku_ast::Program;
use ku_diag::{Category, Diagnostic};
use ku_types::{
    ConstructorKind, ConstructorType, FunctionType, GenericContext, Primitive, Type,
    TypeReference, TypeStore, TypeVarId, array_of, pointer_to, reference_to, tuple_of,
};

use trace::{UnifyAction, UnifyStep};

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// One side of a constraint: a type-variable id or a (possibly only
/// partly concrete) type reference.
#[derive(Debug, Clone)]
pub enum Side {
    Ident(TypeVarId),
    Type(TypeReference),
}

impl Side {
    /// Build a side from a type reference, turning a bare type variable
    /// into an ident side.
    pub fn from_type(reference: TypeReference) -> Side {
        if let Type::Var(id) = &reference.base
            && reference.generic_args.is_empty()
        {
            Side::Ident(*id)
        } else {
            Side::Type(reference)
        }
    }

    /// The reference this side stands for.
    pub fn as_reference(&self) -> TypeReference {
        match self {
            Side::Ident(id) => TypeReference::new(Type::Var(*id)),
            Side::Type(reference) => reference.clone(),
        }
    }

    /// Substitute every occurrence of variable `id` by `what`.
    pub fn subs(&self, program: &Program, id: TypeVarId, what: &Side) -> Side {
        match self {
            Side::Ident(own) => {
                if *own == id {
                    what.clone()
                } else {
                    self.clone()
                }
            }
            Side::Type(reference) => {
                let replacement = what.as_reference();
                Side::Type(subs_type(program, reference, id, &replacement))
            }
        }
    }

    pub fn render(&self, types: &TypeStore) -> String {
        match self {
            Side::Ident(id) => format!("${}", id.0),
            Side::Type(reference) => format!("type `{}`", reference.type_name(types)),
        }
    }
}

/// An equation between two sides, to be solved by unification.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub left: Side,
    pub right: Side,
}

impl Constraint {
    pub fn from_types(left: TypeReference, right: TypeReference) -> Self {
        Self {
            left: Side::from_type(left),
            right: Side::from_type(right),
        }
    }

    pub fn subs(&self, program: &Program, id: TypeVarId, what: &Side) -> Self {
        Self {
            left: self.left.subs(program, id, what),
            right: self.right.subs(program, id, what),
        }
    }
}

// ---------------------------------------------------------------------------
// Substitution over types
// ---------------------------------------------------------------------------

/// Descend through a type reference and replace every occurrence of the
/// type variable `id` by `what`.
///
/// Substituting into a constructor type also attempts to resolve the
/// deferred query right away: once the operand type is known, a
/// struct-member query collapses to the member (or method) type, a deref
/// to the addressee, an array index to the element type.
pub fn subs_type(
    program: &Program,
    reference: &TypeReference,
    id: TypeVarId,
    what: &TypeReference,
) -> TypeReference {
    match &reference.base {
        Type::Var(own) => {
            if *own == id {
                what.clone()
            } else {
                reference.clone()
            }
        }

        Type::Constructor(ct) => {
            let args: Vec<TypeReference> = ct
                .args
                .iter()
                .map(|arg| subs_type(program, arg, id, what))
                .collect();
            let ct = ConstructorType {
                kind: ct.kind,
                args,
                member: ct.member.clone(),
            };
            if let Some(resolved) = constructor_query(program, &ct, &reference.generic_args) {
                return resolved;
            }
            TypeReference {
                base: Type::Constructor(ct),
                generic_args: reference.generic_args.clone(),
            }
        }

        Type::Function(ft) => {
            let parameters = ft
                .parameters
                .iter()
                .map(|p| subs_type(program, p, id, what))
                .collect();
            let ret = ft.ret.as_ref().map(|r| subs_type(program, r, id, what));
            let receiver = ft
                .receiver
                .as_ref()
                .map(|r| subs_type(program, r, id, what));
            TypeReference {
                base: Type::Function(Box::new(FunctionType {
                    parameters,
                    ret,
                    receiver,
                    variadic: ft.variadic,
                    generic_params: ft.generic_params.clone(),
                    attrs: ft.attrs.clone(),
                })),
                generic_args: reference.generic_args.clone(),
            }
        }

        Type::Tuple(tt) => TypeReference {
            base: tuple_of(
                tt.members
                    .iter()
                    .map(|m| subs_type(program, m, id, what))
                    .collect(),
            ),
            generic_args: reference.generic_args.clone(),
        },

        Type::Array(at) => TypeReference {
            base: array_of(subs_type(program, &at.member, id, what), at.length),
            generic_args: reference.generic_args.clone(),
        },

        Type::Pointer(pt) => TypeReference {
            base: pointer_to(subs_type(program, &pt.addressee, id, what), pt.mutable),
            generic_args: reference.generic_args.clone(),
        },

        Type::Reference(rt) => TypeReference {
            base: reference_to(subs_type(program, &rt.referent, id, what), rt.mutable),
            generic_args: reference.generic_args.clone(),
        },

        // Named types, enums, and the remaining leaves carry no inference
        // variables of their own.
        Type::Primitive(_)
        | Type::Named(_)
        | Type::Struct(_)
        | Type::Enum(_)
        | Type::Interface(_)
        | Type::Substitution(_)
        | Type::Unresolved(_) => reference.clone(),
    }
}

/// Try to answer a constructor query from what is known about its
/// operand. Returns `None` while the operand is still a variable or the
/// query does not apply yet.
pub fn constructor_query(
    program: &Program,
    ct: &ConstructorType,
    outer_generic_args: &[TypeReference],
) -> Option<TypeReference> {
    let operand = ct.args.first()?;

    match ct.kind {
        ConstructorKind::StructMember => {
            let member = ct.member.as_deref()?;

            // Methods win over fields.
            if let Some(method) = program.get_method(&operand.base, member) {
                return Some(TypeReference {
                    base: Type::Function(Box::new(program.function(method).ty.clone())),
                    generic_args: outer_generic_args.to_vec(),
                });
            }

            // One level of auto-deref reaches through a pointer.
            let target = match &operand.base {
                Type::Pointer(pt) => &pt.addressee,
                _ => operand,
            };
            if let Type::Struct(st) = target.base.actual(&program.types) {
                let field = st.member(member)?;
                let mut ty = field.ty.clone();
                if !target.generic_args.is_empty() {
                    ty = GenericContext::from_type_reference(target, &program.types).replace(&ty);
                }
                return Some(ty);
            }
            None
        }

        ConstructorKind::Deref => {
            let addressee = operand.base.addressee()?.clone();
            if !operand.generic_args.is_empty() {
                return Some(
                    GenericContext::from_type_reference(operand, &program.types)
                        .replace(&addressee),
                );
            }
            Some(addressee)
        }

        ConstructorKind::ArrayIndex => match operand.base.actual(&program.types) {
            Type::Array(at) => {
                let mut member = (*at.member).clone();
                if !operand.generic_args.is_empty() {
                    member = GenericContext::from_type_reference(operand, &program.types)
                        .replace(&member);
                }
                Some(member)
            }
            Type::Pointer(pt) => Some((*pt.addressee).clone()),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Collects constraints and solves them by unification.
///
/// Constraints whose right-hand side is guaranteed variable-free go into
/// the *simple* list; they are processed first to seed the substitution.
#[derive(Debug, Default)]
pub struct Unifier {
    constraints: Vec<Constraint>,
    simple_constraints: Vec<Constraint>,
    warnings: Vec<Diagnostic>,
    tracing: bool,
    trace: Vec<UnifyStep>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    /// The two ids must be equal.
    pub fn add_equals(&mut self, a: TypeVarId, b: TypeVarId) {
        self.add_constraint(Constraint {
            left: Side::Ident(a),
            right: Side::Ident(b),
        });
    }

    /// The id is of the given (possibly variable-containing) type.
    pub fn add_is(&mut self, id: TypeVarId, reference: TypeReference) {
        self.add_constraint(Constraint {
            left: Side::Ident(id),
            right: Side::from_type(reference),
        });
    }

    /// The id is of the given type, which is guaranteed variable-free.
    pub fn add_simple_is(&mut self, id: TypeVarId, reference: TypeReference) {
        self.simple_constraints.push(Constraint {
            left: Side::Ident(id),
            right: Side::Type(reference),
        });
    }

    pub fn simple_constraints(&self) -> &[Constraint] {
        &self.simple_constraints
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.trace
    }

    fn record(&mut self, program: &Program, action: UnifyAction, left: &Side, right: &Side) {
        if !self.tracing {
            return;
        }
        self.trace.push(UnifyStep {
            step: self.trace.len(),
            action,
            left: left.render(&program.types),
            right: right.render(&program.types),
        });
    }

    /// Solve the collected constraints, returning the final substitution
    /// set (left-hand sides are always idents).
    pub fn solve(&mut self, program: &Program) -> Vec<Constraint> {
        let mut stack: VecDeque<Constraint> = self.constraints.iter().cloned().collect();
        let mut substitutions: Vec<Constraint> = Vec::new();

        let simple: Vec<Constraint> = self.simple_constraints.clone();
        for constraint in simple {
            self.solve_step(program, &mut stack, &mut substitutions, false, constraint);
        }

        while let Some(element) = stack.pop_front() {
            self.solve_step(program, &mut stack, &mut substitutions, true, element);
        }

        substitutions
    }

    fn solve_step(
        &mut self,
        program: &Program,
        stack: &mut VecDeque<Constraint>,
        substitutions: &mut Vec<Constraint>,
        add_subs: bool,
        element: Constraint,
    ) {
        fn subs_all(
            program: &Program,
            stack: &mut VecDeque<Constraint>,
            substitutions: &mut Vec<Constraint>,
            id: TypeVarId,
            what: &Side,
        ) {
            for constraint in stack.iter_mut() {
                *constraint = constraint.subs(program, id, what);
            }
            for constraint in substitutions.iter_mut() {
                *constraint = constraint.subs(program, id, what);
            }
        }

        let Constraint { left: x, right: y } = element;

        // 1. Identical identifiers: nothing to do.
        if let (Side::Ident(a), Side::Ident(b)) = (&x, &y)
            && a == b
        {
            self.record(program, UnifyAction::Identity, &x, &y);
            return;
        }

        // 2. / 3. A variable on either side: substitute it everywhere and
        // record the binding.
        if let Side::Ident(id) = x {
            self.record(program, UnifyAction::Bind, &x, &y);
            subs_all(program, stack, substitutions, id, &y);
            if add_subs {
                substitutions.push(Constraint { left: x, right: y });
            }
            return;
        }
        if let Side::Ident(id) = y {
            self.record(program, UnifyAction::Bind, &y, &x);
            subs_all(program, stack, substitutions, id, &x);
            if add_subs {
                substitutions.push(Constraint { left: y, right: x });
            }
            return;
        }

        let (Side::Type(left), Side::Type(right)) = (&x, &y) else {
            unreachable!();
        };

        // 4.0.1. Equal types.
        if left.actual_equals(right, &program.types) {
            self.record(program, UnifyAction::Identity, &x, &y);
            return;
        }

        // 4.1. {^, &mut, &}a = {^, &mut, &}b
        if let (Some(left_inner), Some(right_inner)) =
            (left.base.addressee(), right.base.addressee())
        {
            self.record(program, UnifyAction::Decompose, &x, &y);
            stack.push_back(Constraint::from_types(
                left_inner.clone(),
                right_inner.clone(),
            ));
            return;
        }

        // 4.2. []a = []b
        if let (Type::Array(left_at), Type::Array(right_at)) = (
            left.base.actual(&program.types),
            right.base.actual(&program.types),
        ) {
            self.record(program, UnifyAction::Decompose, &x, &y);
            stack.push_back(Constraint::from_types(
                (*left_at.member).clone(),
                (*right_at.member).clone(),
            ));
            return;
        }

        // 4.3. C(a1, ..., an).d = C(b1, ..., bn).d
        if let (Type::Constructor(left_ct), Type::Constructor(right_ct)) =
            (&left.base, &right.base)
            && left_ct.kind == right_ct.kind
            && left_ct.member == right_ct.member
            && left_ct.args.len() == right_ct.args.len()
        {
            self.record(program, UnifyAction::Decompose, &x, &y);
            for (left_arg, right_arg) in left_ct.args.iter().zip(&right_ct.args) {
                stack.push_back(Constraint::from_types(left_arg.clone(), right_arg.clone()));
            }
            return;
        }

        // 4.4. fn(a1, ...) -> an = fn(b1, ...) -> bn
        if let (Type::Function(left_ft), Type::Function(right_ft)) = (
            left.base.actual(&program.types).clone(),
            right.base.actual(&program.types).clone(),
        ) {
            self.record(program, UnifyAction::Decompose, &x, &y);

            // Minimum-length prefix of parameters, to accommodate
            // variadic functions.
            let len = left_ft.parameters.len().min(right_ft.parameters.len());
            for idx in 0..len {
                stack.push_back(Constraint::from_types(
                    left_ft.parameters[idx].clone(),
                    right_ft.parameters[idx].clone(),
                ));
            }

            match (&left_ft.receiver, &right_ft.receiver) {
                (Some(left_recv), Some(right_recv)) => {
                    stack.push_back(Constraint::from_types(
                        left_recv.clone(),
                        right_recv.clone(),
                    ));
                }
                (None, None) => {}
                // Receiverless against receiverful is intentionally lax:
                // note it and carry on.
                _ => {
                    self.warnings.push(Diagnostic::warning(
                        Category::TypeMismatch,
                        format!(
                            "function types disagree about a receiver: `{}` vs `{}`",
                            left.type_name(&program.types),
                            right.type_name(&program.types)
                        ),
                    ));
                }
            }

            stack.push_back(Constraint::from_types(
                left_ft.return_type(),
                right_ft.return_type(),
            ));
            return;
        }

        // 4.5. (a1, ..., an) = (b1, ..., bn)
        if let (Type::Tuple(left_tt), Type::Tuple(right_tt)) = (
            left.base.actual(&program.types),
            right.base.actual(&program.types),
        ) && left_tt.members.len() == right_tt.members.len()
        {
            self.record(program, UnifyAction::Decompose, &x, &y);
            for (left_member, right_member) in left_tt.members.iter().zip(&right_tt.members) {
                stack.push_back(Constraint::from_types(
                    left_member.clone(),
                    right_member.clone(),
                ));
            }
            return;
        }

        // 5. No rule applies. Leave the constraint pending; finalization
        // treats it as a resolvable constructor query or an error.
        self.record(program, UnifyAction::Pending, &x, &y);
    }
}

// ---------------------------------------------------------------------------
// Generic argument extraction
// ---------------------------------------------------------------------------

/// Walk a pattern type containing substitution variables in lock-step
/// with a value type and collect a mapping from the substitution names to
/// the corresponding parts of the value.
///
/// A pointer/value mismatch at one level triggers one implicit deref on
/// either side. Mismatched structural shapes are an error.
pub fn extract_type_variables(
    program: &Program,
    pattern: &TypeReference,
    value: &TypeReference,
) -> Result<BTreeMap<String, TypeReference>, String> {
    let mut res: BTreeMap<String, TypeReference> = BTreeMap::new();
    let mut patterns = vec![pattern.clone()];
    let mut values = vec![value.clone()];
    let mut idx = 0;

    while idx < patterns.len() {
        let mut p = patterns[idx].clone();
        let mut v = values[idx].clone();
        idx += 1;

        if let Type::Substitution(sub) = &p.base {
            match res.get(&sub.name) {
                None => {
                    res.insert(sub.name.clone(), v);
                }
                // A previous binding to another substitution variable is
                // upgraded by anything more concrete.
                Some(existing) if matches!(existing.base, Type::Substitution(_)) => {
                    res.insert(sub.name.clone(), v);
                }
                Some(_) => {}
            }
            continue;
        }

        // Parts still containing inference variables say nothing.
        if matches!(p.base, Type::Var(_)) || matches!(v.base, Type::Var(_)) {
            continue;
        }

        // One implicit deref on either side.
        if let (Type::Pointer(pp), vb) = (&p.base, &v.base)
            && !matches!(vb, Type::Pointer(_))
        {
            p = (*pp.addressee).clone();
        } else if let (pb, Type::Pointer(vp)) = (&p.base, &v.base)
            && !matches!(pb, Type::Pointer(_))
        {
            v = (*vp.addressee).clone();
        }

        if let Type::Substitution(sub) = &p.base {
            res.entry(sub.name.clone()).or_insert(v);
            continue;
        }

        if std::mem::discriminant(&p.base) != std::mem::discriminant(&v.base) {
            return Err(format!(
                "type mismatch `{}` != `{}`",
                p.type_name(&program.types),
                v.type_name(&program.types)
            ));
        }

        let before = patterns.len();
        add_children(&p, &mut patterns);
        let added_p = patterns.len() - before;
        let before = values.len();
        add_children(&v, &mut values);
        let added_v = values.len() - before;
        if added_p != added_v {
            return Err(format!(
                "type mismatch `{}` != `{}`",
                p.type_name(&program.types),
                v.type_name(&program.types)
            ));
        }
    }

    Ok(res)
}

/// Push the child type references of a type onto the work list.
fn add_children(reference: &TypeReference, dest: &mut Vec<TypeReference>) {
    match &reference.base {
        Type::Struct(st) => {
            for member in &st.members {
                dest.push(member.ty.clone());
            }
        }
        Type::Array(at) => dest.push((*at.member).clone()),
        Type::Pointer(pt) => dest.push((*pt.addressee).clone()),
        Type::Reference(rt) => dest.push((*rt.referent).clone()),
        Type::Tuple(tt) => {
            for member in &tt.members {
                dest.push(member.clone());
            }
        }
        Type::Enum(et) => {
            for member in &et.members {
                dest.push(TypeReference::new(member.ty.clone()));
            }
        }
        Type::Function(ft) => {
            if let Some(receiver) = &ft.receiver {
                dest.push(receiver.clone());
            }
            for param in &ft.parameters {
                dest.push(param.clone());
            }
            dest.push(ft.return_type());
        }
        Type::Named(_) => {
            for arg in &reference.generic_args {
                dest.push(arg.clone());
            }
        }
        Type::Primitive(_) | Type::Substitution(_) | Type::Var(_) => {}
        other => panic!(
            "INTERNAL ERROR: unhandled type in extraction: {:?}",
            std::mem::discriminant(other)
        ),
    }
}

/// Shorthand for a `$id` type reference.
pub(crate) fn var_ref(id: TypeVarId) -> TypeReference {
    TypeReference::new(Type::Var(id))
}

/// Shorthand for a primitive type reference.
pub(crate) fn prim_ref(primitive: Primitive) -> TypeReference {
    TypeReference::new(Type::Primitive(primitive))
}


#[cfg(test)]
mod tests {
    use super::*;
    use ku_types::SubstitutionType;

    fn int_ref() -> TypeReference {
        prim_ref(Primitive::Int)
    }

    fn sub_ref(name: &str) -> TypeReference {
        TypeReference::new(Type::Substitution(SubstitutionType::new(name)))
    }

    #[test]
    fn simple_bind_produces_substitution() {
        let program = Program::new();
        let mut unifier = Unifier::new();
        unifier.add_is(TypeVarId(0), int_ref());
        let subs = unifier.solve(&program);
        assert_eq!(subs.len(), 1);
        assert!(matches!(subs[0].left, Side::Ident(TypeVarId(0))));
        assert!(matches!(&subs[0].right, Side::Type(t) if *t == int_ref()));
    }

    #[test]
    fn equality_chains_collapse() {
        let program = Program::new();
        let mut unifier = Unifier::new();
        unifier.add_equals(TypeVarId(0), TypeVarId(1));
        unifier.add_equals(TypeVarId(1), TypeVarId(2));
        unifier.add_simple_is(TypeVarId(2), int_ref());

        let subs = unifier.solve(&program);
        // The simple seed replaces $2 up front, so both remaining ids
        // resolve to int.
        for id in [TypeVarId(0), TypeVarId(1)] {
            let bound = subs.iter().find(|c| matches!(c.left, Side::Ident(i) if i == id));
            let bound = bound.expect("id is bound");
            assert!(matches!(&bound.right, Side::Type(t) if *t == int_ref()));
        }
    }

    #[test]
    fn pointer_unification_decomposes() {
        let program = Program::new();
        let mut unifier = Unifier::new();
        unifier.add_is(
            TypeVarId(0),
            TypeReference::new(pointer_to(var_ref(TypeVarId(1)), false)),
        );
        unifier.add_simple_is(TypeVarId(0), TypeReference::new(pointer_to(int_ref(), false)));

        let subs = unifier.solve(&program);
        let inner = subs
            .iter()
            .find(|c| matches!(c.left, Side::Ident(TypeVarId(1))))
            .expect("addressee variable bound");
        assert!(matches!(&inner.right, Side::Type(t) if *t == int_ref()));
    }

    #[test]
    fn function_unification_pairs_min_prefix_and_returns() {
        let program = Program::new();
        let mut unifier = Unifier::new();
        // Variadic-style: value side has more arguments than the pattern
        // has parameters.
        let pattern = TypeReference::new(Type::Function(Box::new(FunctionType {
            parameters: vec![int_ref()],
            ret: Some(var_ref(TypeVarId(1))),
            variadic: true,
            ..FunctionType::default()
        })));
        let value = TypeReference::new(Type::Function(Box::new(FunctionType {
            parameters: vec![var_ref(TypeVarId(2)), prim_ref(Primitive::Bool)],
            ret: Some(prim_ref(Primitive::F64)),
            ..FunctionType::default()
        })));
        unifier.add_constraint(Constraint::from_types(pattern, value));

        let subs = unifier.solve(&program);
        let find = |id: TypeVarId| {
            subs.iter()
                .find(|c| matches!(c.left, Side::Ident(i) if i == id))
                .map(|c| c.right.as_reference())
        };
        assert_eq!(find(TypeVarId(1)), Some(prim_ref(Primitive::F64)));
        assert_eq!(find(TypeVarId(2)), Some(int_ref()));
    }

    #[test]
    fn mismatched_receivers_warn_but_do_not_fail() {
        let program = Program::new();
        let mut unifier = Unifier::new();
        let with_receiver = TypeReference::new(Type::Function(Box::new(FunctionType {
            receiver: Some(int_ref()),
            ret: Some(int_ref()),
            ..FunctionType::default()
        })));
        let without_receiver = TypeReference::new(Type::Function(Box::new(FunctionType {
            ret: Some(int_ref()),
            ..FunctionType::default()
        })));
        unifier.add_constraint(Constraint::from_types(with_receiver, without_receiver));

        let _ = unifier.solve(&program);
        assert_eq!(unifier.warnings().len(), 1);
    }

    #[test]
    fn extraction_binds_substitution_leaves() {
        let program = Program::new();
        let pattern = TypeReference::new(Type::Function(Box::new(FunctionType {
            parameters: vec![sub_ref("T")],
            ret: Some(sub_ref("T")),
            ..FunctionType::default()
        })));
        let value = TypeReference::new(Type::Function(Box::new(FunctionType {
            parameters: vec![int_ref()],
            ret: Some(int_ref()),
            ..FunctionType::default()
        })));
        let map = extract_type_variables(&program, &pattern, &value).unwrap();
        assert_eq!(map.get("T"), Some(&int_ref()));
    }

    #[test]
    fn extraction_bridges_one_pointer_level() {
        let program = Program::new();
        let pattern = TypeReference::new(pointer_to(sub_ref("T"), false));
        let value = int_ref();
        let map = extract_type_variables(&program, &pattern, &value).unwrap();
        assert_eq!(map.get("T"), Some(&int_ref()));
    }

    #[test]
    fn extraction_rejects_shape_mismatches() {
        let program = Program::new();
        let pattern = TypeReference::new(tuple_of(vec![sub_ref("T"), sub_ref("T")]));
        let value = int_ref();
        assert!(extract_type_variables(&program, &pattern, &value).is_err());
    }
}
