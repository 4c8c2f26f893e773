//! Generic contexts: substitution environments mapping generic parameters
//! to concrete type references.
//!
//! A context is built either from a declaration's generic parameters plus
//! the call site's generic arguments, or directly from a type reference
//! that carries both. Contexts chain through an optional outer context so
//! that a method reached through an interface constraint can resolve the
//! interface's own parameters as well.

use std::collections::BTreeMap;

use crate::{
    ArrayType, ConstructorType, EnumMember, EnumType, FunctionType, PointerType, ReferenceType,
    StructMember, StructType, SubstitutionType, TupleType, Type, TypeReference, TypeStore,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericContext {
    submap: BTreeMap<String, TypeReference>,
    outer: Option<Box<GenericContext>>,
}

impl GenericContext {
    /// Build a context from parallel parameter/argument lists. Extra
    /// parameters are left unmapped and resolve to themselves.
    pub fn new(params: &[SubstitutionType], args: &[TypeReference]) -> Self {
        let submap = params
            .iter()
            .zip(args)
            .map(|(param, arg)| (param.name.clone(), arg.clone()))
            .collect();
        Self {
            submap,
            outer: None,
        }
    }

    /// Build a context from a type reference carrying generic arguments,
    /// pairing them with the base type's declared parameters.
    pub fn from_type_reference(reference: &TypeReference, types: &TypeStore) -> Self {
        Self::new(
            reference.base.generic_parameters(types),
            &reference.generic_args,
        )
    }

    /// Chain `outer` behind this context for lookups that miss locally.
    pub fn with_outer(mut self, outer: GenericContext) -> Self {
        self.outer = Some(Box::new(outer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.submap.is_empty() && self.outer.as_ref().is_none_or(|o| o.is_empty())
    }

    /// Look up the mapping for a generic parameter by name.
    pub fn get(&self, name: &str) -> Option<&TypeReference> {
        self.submap
            .get(name)
            .or_else(|| self.outer.as_ref().and_then(|o| o.get(name)))
    }

    /// Resolve a substitution type through this context, following chains
    /// of parameters mapped to other parameters.
    pub fn resolve(&self, sub: &SubstitutionType) -> Option<TypeReference> {
        let mut current = self.get(&sub.name)?.clone();
        let mut seen = vec![sub.name.clone()];
        while let Type::Substitution(next) = &current.base {
            if seen.contains(&next.name) {
                break;
            }
            seen.push(next.name.clone());
            match self.get(&next.name) {
                Some(mapped) => current = mapped.clone(),
                None => break,
            }
        }
        Some(current)
    }

    /// Descend through a type reference and substitute every substitution
    /// type this context has a mapping for.
    pub fn replace(&self, reference: &TypeReference) -> TypeReference {
        let generic_args = reference
            .generic_args
            .iter()
            .map(|arg| self.replace(arg))
            .collect();

        let base = match &reference.base {
            Type::Substitution(sub) => match self.resolve(sub) {
                // A mapped parameter contributes its own generic arguments.
                Some(mapped) => {
                    return TypeReference {
                        base: mapped.base,
                        generic_args: if mapped.generic_args.is_empty() {
                            generic_args
                        } else {
                            mapped.generic_args
                        },
                    };
                }
                None => Type::Substitution(sub.clone()),
            },

            Type::Pointer(pt) => Type::Pointer(PointerType {
                addressee: Box::new(self.replace(&pt.addressee)),
                mutable: pt.mutable,
            }),

            Type::Reference(rt) => Type::Reference(ReferenceType {
                referent: Box::new(self.replace(&rt.referent)),
                mutable: rt.mutable,
            }),

            Type::Array(at) => Type::Array(ArrayType {
                member: Box::new(self.replace(&at.member)),
                length: at.length,
            }),

            Type::Tuple(tt) => Type::Tuple(TupleType {
                members: tt.members.iter().map(|m| self.replace(m)).collect(),
            }),

            Type::Struct(st) => Type::Struct(StructType {
                members: st
                    .members
                    .iter()
                    .map(|m| StructMember {
                        name: m.name.clone(),
                        ty: self.replace(&m.ty),
                        public: m.public,
                    })
                    .collect(),
                generic_params: st.generic_params.clone(),
            }),

            Type::Enum(et) => Type::Enum(EnumType {
                simple: et.simple,
                members: et
                    .members
                    .iter()
                    .map(|m| EnumMember {
                        name: m.name.clone(),
                        ty: self
                            .replace(&TypeReference::new(m.ty.clone()))
                            .base,
                        tag: m.tag,
                    })
                    .collect(),
                generic_params: et.generic_params.clone(),
            }),

            Type::Function(ft) => Type::Function(Box::new(FunctionType {
                parameters: ft.parameters.iter().map(|p| self.replace(p)).collect(),
                ret: ft.ret.as_ref().map(|r| self.replace(r)),
                receiver: ft.receiver.as_ref().map(|r| self.replace(r)),
                variadic: ft.variadic,
                generic_params: ft.generic_params.clone(),
                attrs: ft.attrs.clone(),
            })),

            Type::Constructor(ct) => Type::Constructor(ConstructorType {
                kind: ct.kind,
                args: ct.args.iter().map(|a| self.replace(a)).collect(),
                member: ct.member.clone(),
            }),

            // Named types substitute through their generic arguments only;
            // primitives, interfaces, and inference variables pass through.
            other => other.clone(),
        };

        TypeReference { base, generic_args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Primitive, array_of, pointer_to, tuple_of};

    fn int_ref() -> TypeReference {
        TypeReference::new(Type::Primitive(Primitive::Int))
    }

    fn sub_ref(name: &str) -> TypeReference {
        TypeReference::new(Type::Substitution(SubstitutionType::new(name)))
    }

    #[test]
    fn replace_substitutes_at_every_leaf() {
        let gcon = GenericContext::new(&[SubstitutionType::new("T")], &[int_ref()]);
        let pattern = TypeReference::new(tuple_of(vec![
            sub_ref("T"),
            TypeReference::new(pointer_to(sub_ref("T"), false)),
            TypeReference::new(array_of(sub_ref("T"), None)),
        ]));
        let replaced = gcon.replace(&pattern);
        assert_eq!(
            replaced,
            TypeReference::new(tuple_of(vec![
                int_ref(),
                TypeReference::new(pointer_to(int_ref(), false)),
                TypeReference::new(array_of(int_ref(), None)),
            ]))
        );
    }

    #[test]
    fn unmapped_parameters_survive() {
        let gcon = GenericContext::new(&[SubstitutionType::new("T")], &[int_ref()]);
        let pattern = sub_ref("U");
        assert_eq!(gcon.replace(&pattern), pattern);
    }

    #[test]
    fn outer_context_resolves_misses() {
        let inner = GenericContext::new(&[SubstitutionType::new("T")], &[sub_ref("U")]);
        let outer = GenericContext::new(&[SubstitutionType::new("U")], &[int_ref()]);
        let chained = inner.with_outer(outer);
        assert_eq!(chained.replace(&sub_ref("T")), int_ref());
    }

    #[test]
    fn function_types_substitute_parameters_and_return() {
        let gcon = GenericContext::new(&[SubstitutionType::new("T")], &[int_ref()]);
        let fun = TypeReference::new(Type::Function(Box::new(FunctionType {
            parameters: vec![sub_ref("T")],
            ret: Some(sub_ref("T")),
            ..FunctionType::default()
        })));
        let replaced = gcon.replace(&fun);
        let Type::Function(ft) = replaced.base else {
            panic!("expected function type");
        };
        assert_eq!(ft.parameters[0], int_ref());
        assert_eq!(ft.ret.unwrap(), int_ref());
    }
}
