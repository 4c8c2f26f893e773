//! Name mangling: deterministic ASCII encoding of resolved symbols for
//! code generation.
//!
//! Length-prefixed names avoid ambiguity; type variants carry short
//! tags. Generic arguments append a `GA` suffix; modules encode as
//! `_M<len><segment>` per path segment. The function named `main`
//! mangles to the literal string `main`.

use ku_ast::Program;
use ku_types::{FunctionId, GenericContext, ModuleId, Type, TypeReference};

/// Mangle a list of type references back to back.
pub fn mangled_type_references(
    program: &Program,
    refs: &[TypeReference],
    gcon: Option<&GenericContext>,
) -> String {
    refs.iter()
        .map(|r| mangled_type_reference(program, r, gcon))
        .collect()
}

/// Mangle one type reference.
pub fn mangled_type_reference(
    program: &Program,
    reference: &TypeReference,
    gcon: Option<&GenericContext>,
) -> String {
    let mut res = String::from("_");

    // Pointer levels become a `p` prefix run.
    let mut reference = reference;
    while let Type::Pointer(pt) = &reference.base {
        res.push('p');
        reference = &pt.addressee;
    }

    match &reference.base {
        Type::Array(at) => {
            res.push('A');
            res.push_str(&mangled_type_reference(program, &at.member, gcon));
        }

        Type::Reference(rt) => {
            res.push('R');
            res.push(if rt.mutable { 'M' } else { 'C' });
            res.push_str(&mangled_type_reference(program, &rt.referent, gcon));
        }

        Type::Enum(et) => {
            res.push_str(&format!("E{}", et.members.len()));
            for member in &et.members {
                res.push_str(&mangled_type_reference(
                    program,
                    &TypeReference::new(member.ty.clone()),
                    gcon,
                ));
            }
        }

        Type::Struct(st) => {
            res.push_str(&format!("S{}", st.members.len()));
            for member in &st.members {
                res.push_str(&mangled_type_reference(program, &member.ty, gcon));
            }
        }

        Type::Tuple(tt) => {
            res.push_str(&format!("T{}", tt.members.len()));
            for member in &tt.members {
                res.push_str(&mangled_type_reference(program, member, gcon));
            }
        }

        Type::Function(ft) => {
            let mut encoded = mangled_type_references(program, &ft.parameters, gcon);
            encoded.push_str(&mangled_type_reference(program, &ft.return_type(), gcon));
            if let Some(receiver) = &ft.receiver {
                encoded = mangled_type_reference(program, receiver, gcon) + &encoded;
            }
            res.push_str(&format!("{}FT{}", encoded.len(), encoded));
        }

        Type::Named(_) | Type::Primitive(_) => {
            let name = reference.base.type_name(&program.types);
            res.push_str(&format!("{}{}", name.len(), name));
        }

        Type::Interface(it) => {
            let mut encoded = String::new();
            for function in &it.functions {
                encoded.push_str(&mangled_function(program, *function, gcon));
            }
            res.push_str(&format!("{}I{}", encoded.len(), encoded));
        }

        Type::Substitution(sub) => {
            // Resolve through the generic context; an unresolved
            // parameter encodes as its name literally.
            match gcon.and_then(|g| g.resolve(sub)) {
                Some(mapped) => {
                    if matches!(&mapped.base, Type::Substitution(inner) if inner.name == sub.name)
                    {
                        panic!("INTERNAL ERROR: substitution type mapped to itself");
                    }
                    res = mangled_type_reference(program, &mapped, gcon);
                }
                None => {
                    res = sub.name.clone();
                }
            }
        }

        other => panic!(
            "INTERNAL ERROR: unimplemented type mangling for `{}`",
            other.type_name(&program.types)
        ),
    }

    let generic_args = mangled_type_references(program, &reference.generic_args, gcon);
    if !generic_args.is_empty() {
        res.push_str("GA");
        res.push_str(&generic_args);
    }
    res
}

/// Mangle a module path: `_M<len><segment>` per segment.
pub fn mangled_module(program: &Program, module: ModuleId) -> String {
    let mut res = String::new();
    for part in &program.module(module).name.parts {
        res.push_str(&format!("_M{}{}", part.len(), part));
    }
    res
}

/// Mangle a resolved function: module path, receiver or static receiver
/// type, `m`/`s` marker, length-prefixed name, parameter types, return
/// type. `main` is special-cased to the literal `main`.
pub fn mangled_function(
    program: &Program,
    function: FunctionId,
    gcon: Option<&GenericContext>,
) -> String {
    let func = program.function(function);
    if func.name == "main" {
        return "main".to_string();
    }

    let prefix = if func.ty.receiver.is_some() {
        "m"
    } else if func.static_receiver.is_some() {
        "s"
    } else {
        ""
    };

    let mut res = format!("_{}F{}{}", prefix, func.name.len(), func.name);
    for parameter in &func.ty.parameters {
        res.push_str(&mangled_type_reference(program, parameter, gcon));
    }
    res.push_str(&mangled_type_reference(program, &func.ty.return_type(), gcon));

    if let Some(receiver) = &func.ty.receiver {
        res = mangled_type_reference(program, receiver, gcon) + &res;
    } else if let Some(static_receiver) = &func.static_receiver {
        res = mangled_type_reference(
            program,
            &TypeReference::new(static_receiver.clone()),
            gcon,
        ) + &res;
    }

    mangled_module(program, func.module) + &res
}

/// Mangle a module-level variable.
pub fn mangled_variable(name: &str) -> String {
    format!("_V{}{}", name.len(), name)
}
