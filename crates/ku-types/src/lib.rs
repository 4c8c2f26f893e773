//! Semantic type representations for ku.
//!
//! This crate defines the types used by the resolver and the inference
//! engine. These are distinct from syntactic type occurrences, which the
//! parser delivers either fully tagged (primitives, composites) or as an
//! [`UnresolvedName`] stand-in cleared during resolution.
//!
//! Declarations with identity (named types, functions, variables, modules)
//! live in program arenas and are referenced through the handle newtypes
//! declared here, so that method tables and scopes never own their targets
//! from both sides.

mod generics;

pub use generics::GenericContext;

use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Arena handles
// ---------------------------------------------------------------------------

/// Handle into the program's module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Handle into the program's function arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Handle into the program's variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub u32);

/// Handle into the [`TypeStore`]'s named-type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedTypeId(pub u32);

/// Unique identifier for a type variable during inference.
///
/// Ids are dense integers allocated per sub-module inferrer and discarded
/// when that inferrer finishes; they never appear in a finished AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVarId(pub usize);

// ---------------------------------------------------------------------------
// Names and attributes
// ---------------------------------------------------------------------------

/// A dotted identifier as delivered by the parser, pending disambiguation
/// into module access, variable access, struct access, enum construction,
/// or a cast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct UnresolvedName {
    pub modules: Vec<String>,
    pub name: String,
}

impl UnresolvedName {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            modules: Vec::new(),
            name: name.into(),
        }
    }

    pub fn qualified(modules: &[&str], name: impl Into<String>) -> Self {
        Self {
            modules: modules.iter().map(|s| s.to_string()).collect(),
            name: name.into(),
        }
    }

    /// Peel the trailing segment: `a.b.c` becomes (`a.b`, `c`).
    ///
    /// Returns `None` when there are no module qualifiers left to peel.
    pub fn split(&self) -> Option<(UnresolvedName, String)> {
        let (last, front) = self.modules.split_last()?;
        Some((
            UnresolvedName {
                modules: front.to_vec(),
                name: last.clone(),
            },
            self.name.clone(),
        ))
    }
}

impl fmt::Display for UnresolvedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for module in &self.modules {
            write!(f, "{module}.")?;
        }
        write!(f, "{}", self.name)
    }
}

/// A single `[key]` or `[key "value"]` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub key: String,
    pub value: Option<String>,
}

/// The attribute set attached to declarations and function types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttrSet {
    attrs: Vec<Attr>,
}

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.add(key, None::<String>);
        set
    }

    pub fn add(&mut self, key: impl Into<String>, value: Option<impl Into<String>>) {
        self.attrs.push(Attr {
            key: key.into(),
            value: value.map(Into::into),
        });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.iter().any(|a| a.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.key == key)
            .and_then(|a| a.value.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.iter()
    }
}

// ---------------------------------------------------------------------------
// Primitive types
// ---------------------------------------------------------------------------

/// The primitive types of ku.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Rune,
    Void,
    S8,
    S16,
    S32,
    S64,
    S128,
    U8,
    U16,
    U32,
    U64,
    U128,
    Int,
    Uint,
    UintPtr,
    F32,
    F64,
    F128,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Rune => "rune",
            Primitive::Void => "void",
            Primitive::S8 => "s8",
            Primitive::S16 => "s16",
            Primitive::S32 => "s32",
            Primitive::S64 => "s64",
            Primitive::S128 => "s128",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::U128 => "u128",
            Primitive::Int => "int",
            Primitive::Uint => "uint",
            Primitive::UintPtr => "uintptr",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::F128 => "f128",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::S8
                | Primitive::S16
                | Primitive::S32
                | Primitive::S64
                | Primitive::S128
                | Primitive::U8
                | Primitive::U16
                | Primitive::U32
                | Primitive::U64
                | Primitive::U128
                | Primitive::Int
                | Primitive::Uint
                | Primitive::UintPtr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64 | Primitive::F128)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    /// A user-declared nominal type. Two named types are distinct even if
    /// their underlying types are equal.
    Named(NamedTypeId),
    Struct(StructType),
    Tuple(TupleType),
    Array(ArrayType),
    Pointer(PointerType),
    Reference(ReferenceType),
    Function(Box<FunctionType>),
    Enum(EnumType),
    Interface(InterfaceType),
    /// A generic parameter placeholder, replaced by concrete arguments
    /// through a [`GenericContext`].
    Substitution(SubstitutionType),
    /// Inference-time type variable. Never appears in a finished AST.
    Var(TypeVarId),
    /// Inference-time placeholder for an order-sensitive type query.
    /// Never appears in a finished AST.
    Constructor(ConstructorType),
    /// Parse-time stand-in for a dotted name, cleared by the resolver.
    Unresolved(UnresolvedName),
}

/// A struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeReference,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub members: Vec<StructMember>,
    pub generic_params: Vec<SubstitutionType>,
}

impl StructType {
    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleType {
    pub members: Vec<TypeReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub member: Box<TypeReference>,
    /// `Some(n)` for a fixed-length array, `None` for a dynamic one.
    pub length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerType {
    pub addressee: Box<TypeReference>,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceType {
    pub referent: Box<TypeReference>,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionType {
    pub parameters: Vec<TypeReference>,
    /// Absent returns unify as `void`.
    pub ret: Option<TypeReference>,
    pub receiver: Option<TypeReference>,
    pub variadic: bool,
    pub generic_params: Vec<SubstitutionType>,
    pub attrs: AttrSet,
}

impl FunctionType {
    /// The return type, with `void` standing in for an absent one.
    pub fn return_type(&self) -> TypeReference {
        self.ret
            .clone()
            .unwrap_or_else(|| TypeReference::new(Type::Primitive(Primitive::Void)))
    }
}

/// An enum member: a simple tag, a tuple payload, or a struct payload.
/// The payload type is `void` for simple tags.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    pub ty: Type,
    /// Numeric discriminant.
    pub tag: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    /// True when every member is a bare tag.
    pub simple: bool,
    pub members: Vec<EnumMember>,
    pub generic_params: Vec<SubstitutionType>,
}

impl EnumType {
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// A set of function signatures used only as a generic-parameter constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceType {
    pub functions: Vec<FunctionId>,
    pub generic_params: Vec<SubstitutionType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionType {
    pub name: String,
    /// Interface constraints. Resolution rejects non-interface entries.
    pub constraints: Vec<TypeReference>,
}

impl SubstitutionType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
        }
    }
}

/// The constructors a [`ConstructorType`] can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstructorKind {
    /// The type of member `data` on the argument type.
    StructMember,
    /// The addressee type of the argument type.
    Deref,
    /// The element type of the argument type.
    ArrayIndex,
}

/// An inference-time placeholder expressing "the type derived from applying
/// this constructor to these argument types". Defers order-sensitive
/// lookups (`.`, `*`, `[]`) until the operand type is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorType {
    pub kind: ConstructorKind,
    pub args: Vec<TypeReference>,
    /// Member name for [`ConstructorKind::StructMember`].
    pub member: Option<String>,
}

// ---------------------------------------------------------------------------
// Type references
// ---------------------------------------------------------------------------

/// A type together with its ordered generic arguments. This pair is what
/// appears in the AST at every typed position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeReference {
    pub base: Type,
    pub generic_args: Vec<TypeReference>,
}

impl Default for Type {
    fn default() -> Self {
        Type::Primitive(Primitive::Void)
    }
}

impl TypeReference {
    pub fn new(base: Type) -> Self {
        Self {
            base,
            generic_args: Vec::new(),
        }
    }

    pub fn with_args(base: Type, generic_args: Vec<TypeReference>) -> Self {
        Self { base, generic_args }
    }

    /// Structural equality of the underlying types, unwrapping named types.
    /// Generic arguments still compare pairwise.
    pub fn actual_equals(&self, other: &TypeReference, types: &TypeStore) -> bool {
        if self.generic_args.len() != other.generic_args.len() {
            return false;
        }
        if !self
            .generic_args
            .iter()
            .zip(&other.generic_args)
            .all(|(a, b)| a.actual_equals(b, types))
        {
            return false;
        }
        self.base.actual(types) == other.base.actual(types)
    }

    pub fn type_name(&self, types: &TypeStore) -> String {
        let mut name = self.base.type_name(types);
        if !self.generic_args.is_empty() {
            name.push('<');
            for (idx, arg) in self.generic_args.iter().enumerate() {
                if idx > 0 {
                    name.push_str(", ");
                }
                name.push_str(&arg.type_name(types));
            }
            name.push('>');
        }
        name
    }
}

impl From<Type> for TypeReference {
    fn from(base: Type) -> Self {
        TypeReference::new(base)
    }
}

impl Type {
    /// Follow named-type wrappers down to the underlying type.
    pub fn actual<'a>(&'a self, types: &'a TypeStore) -> &'a Type {
        match self {
            Type::Named(id) => types.named(*id).underlying.actual(types),
            other => other,
        }
    }

    /// Number of pointer/reference wrappers around the base type.
    pub fn levels_of_indirection(&self) -> usize {
        match self {
            Type::Pointer(p) => 1 + p.addressee.base.levels_of_indirection(),
            Type::Reference(r) => 1 + r.referent.base.levels_of_indirection(),
            _ => 0,
        }
    }

    /// The addressee of one level of indirection, if any.
    pub fn addressee(&self) -> Option<&TypeReference> {
        match self {
            Type::Pointer(p) => Some(&p.addressee),
            Type::Reference(r) => Some(&r.referent),
            _ => None,
        }
    }

    /// Strip pointer wrappers (but not references).
    pub fn without_pointers(&self) -> &Type {
        match self {
            Type::Pointer(p) => p.addressee.base.without_pointers(),
            other => other,
        }
    }

    /// The generic parameters a type declares, if any.
    pub fn generic_parameters<'a>(&'a self, types: &'a TypeStore) -> &'a [SubstitutionType] {
        match self {
            Type::Named(id) => &types.named(*id).generic_params,
            Type::Struct(st) => &st.generic_params,
            Type::Enum(et) => &et.generic_params,
            Type::Interface(it) => &it.generic_params,
            Type::Function(ft) => &ft.generic_params,
            _ => &[],
        }
    }

    /// Canonical name used for diagnostics and mangling.
    pub fn type_name(&self, types: &TypeStore) -> String {
        match self {
            Type::Primitive(p) => p.name().to_string(),
            Type::Named(id) => types.named(*id).name.clone(),
            Type::Struct(st) => {
                let mut out = String::from("struct {");
                for (idx, mem) in st.members.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&mem.name);
                    out.push_str(": ");
                    out.push_str(&mem.ty.type_name(types));
                }
                out.push('}');
                out
            }
            Type::Tuple(tt) => {
                let mut out = String::from("(");
                for (idx, mem) in tt.members.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&mem.type_name(types));
                }
                out.push(')');
                out
            }
            Type::Array(at) => match at.length {
                Some(n) => format!("[{n}]{}", at.member.type_name(types)),
                None => format!("[]{}", at.member.type_name(types)),
            },
            Type::Pointer(pt) => {
                if pt.mutable {
                    format!("^mut {}", pt.addressee.type_name(types))
                } else {
                    format!("^{}", pt.addressee.type_name(types))
                }
            }
            Type::Reference(rt) => {
                if rt.mutable {
                    format!("&mut {}", rt.referent.type_name(types))
                } else {
                    format!("&{}", rt.referent.type_name(types))
                }
            }
            Type::Function(ft) => {
                let mut out = String::from("fun(");
                for (idx, param) in ft.parameters.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&param.type_name(types));
                }
                if ft.variadic {
                    if !ft.parameters.is_empty() {
                        out.push_str(", ");
                    }
                    out.push_str("...");
                }
                out.push(')');
                if let Some(ret) = &ft.ret {
                    out.push_str(" -> ");
                    out.push_str(&ret.type_name(types));
                }
                out
            }
            Type::Enum(et) => {
                let mut out = String::from("enum {");
                for (idx, mem) in et.members.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&mem.name);
                }
                out.push('}');
                out
            }
            Type::Interface(it) => format!("interface ({} functions)", it.functions.len()),
            Type::Substitution(st) => st.name.clone(),
            Type::Var(id) => format!("${}", id.0),
            Type::Constructor(ct) => {
                let args = ct
                    .args
                    .iter()
                    .map(|a| a.type_name(types))
                    .collect::<Vec<_>>()
                    .join(", ");
                match (ct.kind, &ct.member) {
                    (ConstructorKind::StructMember, Some(member)) => {
                        format!("member `{member}` of ({args})")
                    }
                    (ConstructorKind::Deref, _) => format!("deref of ({args})"),
                    (ConstructorKind::ArrayIndex, _) => format!("element of ({args})"),
                    (ConstructorKind::StructMember, None) => format!("member of ({args})"),
                }
            }
            Type::Unresolved(name) => name.to_string(),
        }
    }
}

/// True when a type reference contains no inference-time placeholders
/// (type variables, constructor types) and no unresolved names. Every
/// type reachable from a finished AST must satisfy this.
pub fn is_fully_concrete(reference: &TypeReference) -> bool {
    if !reference.generic_args.iter().all(is_fully_concrete) {
        return false;
    }
    match &reference.base {
        Type::Var(_) | Type::Constructor(_) | Type::Unresolved(_) => false,
        Type::Pointer(pt) => is_fully_concrete(&pt.addressee),
        Type::Reference(rt) => is_fully_concrete(&rt.referent),
        Type::Array(at) => is_fully_concrete(&at.member),
        Type::Tuple(tt) => tt.members.iter().all(is_fully_concrete),
        Type::Struct(st) => st.members.iter().all(|m| is_fully_concrete(&m.ty)),
        Type::Function(ft) => {
            ft.parameters.iter().all(is_fully_concrete)
                && ft.ret.as_ref().is_none_or(|r| is_fully_concrete(r))
                && ft.receiver.as_ref().is_none_or(|r| is_fully_concrete(r))
        }
        Type::Enum(et) => et
            .members
            .iter()
            .all(|m| is_fully_concrete(&TypeReference::new(m.ty.clone()))),
        Type::Primitive(_) | Type::Named(_) | Type::Interface(_) | Type::Substitution(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

pub fn pointer_to(addressee: TypeReference, mutable: bool) -> Type {
    Type::Pointer(PointerType {
        addressee: Box::new(addressee),
        mutable,
    })
}

pub fn reference_to(referent: TypeReference, mutable: bool) -> Type {
    Type::Reference(ReferenceType {
        referent: Box::new(referent),
        mutable,
    })
}

pub fn array_of(member: TypeReference, length: Option<u64>) -> Type {
    Type::Array(ArrayType {
        member: Box::new(member),
        length,
    })
}

pub fn tuple_of(members: Vec<TypeReference>) -> Type {
    Type::Tuple(TupleType { members })
}

// ---------------------------------------------------------------------------
// Named-type definitions
// ---------------------------------------------------------------------------

/// A user-declared nominal type: a name, the wrapped underlying type, and
/// the methods attached to it during resolution.
///
/// Method lists hold [`FunctionId`] handles into the program's function
/// arena; a named type's method list is populated only by declarations in
/// the same module as the type.
#[derive(Debug, Clone)]
pub struct NamedTypeDef {
    pub name: String,
    pub underlying: Type,
    pub generic_params: Vec<SubstitutionType>,
    pub module: ModuleId,
    pub methods: Vec<FunctionId>,
    pub static_methods: Vec<FunctionId>,
}

impl NamedTypeDef {
    pub fn new(name: impl Into<String>, underlying: Type, module: ModuleId) -> Self {
        Self {
            name: name.into(),
            underlying,
            generic_params: Vec::new(),
            module,
            methods: Vec::new(),
            static_methods: Vec::new(),
        }
    }
}

/// Arena of named-type definitions for one compilation session.
#[derive(Debug, Clone, Default)]
pub struct TypeStore {
    named: Vec<NamedTypeDef>,
}

impl TypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, def: NamedTypeDef) -> NamedTypeId {
        let id = NamedTypeId(self.named.len() as u32);
        self.named.push(def);
        id
    }

    pub fn named(&self, id: NamedTypeId) -> &NamedTypeDef {
        &self.named[id.0 as usize]
    }

    pub fn named_mut(&mut self, id: NamedTypeId) -> &mut NamedTypeDef {
        &mut self.named[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NamedTypeId, &NamedTypeDef)> {
        self.named
            .iter()
            .enumerate()
            .map(|(idx, def)| (NamedTypeId(idx as u32), def))
    }
}
