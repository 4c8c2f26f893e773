//! The compilation session.
//!
//! The driver parses source files and registers the resulting node lists
//! here; the session then runs the semantic pipeline in dependency
//! order: cycle detection, resolution (with the duplicate-`main` check),
//! inference, and a final invariant sweep. The result is a fully typed
//! program plus the hand-off data code generation needs: mangled names,
//! method tables (on the named types themselves), and linked libraries.

use std::collections::BTreeMap;

use ku_ast::{
    DependencyGraph, ExprKind, Module, ModuleLookup, ModuleName, Node, NodeMut, Program,
    Submodule, for_each_node,
};
use ku_diag::{Category, Diagnostic, DiagnosticError, FileId, SourceFile};
use ku_infer::infer_submodule;
use ku_mangle::mangled_function;
use ku_resolve::{create_c_module, resolve_module};
use ku_types::{FunctionId, ModuleId, Type, TypeReference, is_fully_concrete};

/// One compilation session: the program arenas, the module lookup tree,
/// and the import graph.
pub struct Session {
    pub program: Program,
    pub lookup: ModuleLookup,
    dep_graph: DependencyGraph,
    modules: Vec<ModuleId>,
    c_module: ModuleId,
}

/// The summary handed to code generation after a successful run.
#[derive(Debug)]
pub struct Analysis {
    /// Deterministic symbol for every function.
    pub mangled_names: BTreeMap<FunctionId, String>,
    /// Native libraries requested per module, in module load order.
    pub linked_libraries: Vec<(ModuleName, Vec<String>)>,
    pub warnings: Vec<Diagnostic>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let mut program = Program::new();
        let c_module = create_c_module(&mut program);
        Self {
            program,
            lookup: ModuleLookup::new(),
            dep_graph: DependencyGraph::new(),
            modules: Vec::new(),
            c_module,
        }
    }

    /// The synthetic `C` module holding all C-FFI declarations.
    pub fn c_module(&self) -> ModuleId {
        self.c_module
    }

    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> FileId {
        self.program.sources.add(SourceFile::new(name, path, contents))
    }

    /// Interpret a build input: a single `.ku` file forms an anonymous
    /// `__main` module; anything else is a dotted module path.
    pub fn load(&mut self, input: &str) -> Result<ModuleId, DiagnosticError> {
        if input.ends_with(".ku") {
            return Ok(self.create_module(ModuleName::single("__main")));
        }
        if input.contains(['/', '\\', ' ']) {
            return Err(Diagnostic::error(
                Category::Setup,
                format!("Invalid module name: {input}"),
            )
            .into());
        }
        let parts: Vec<&str> = input.split('.').collect();
        Ok(self.create_module(ModuleName::new(&parts)))
    }

    pub fn create_module(&mut self, name: ModuleName) -> ModuleId {
        let id = ModuleId(self.program.modules.len() as u32);
        let id = self.program.alloc_module(Module::new(name.clone(), id));
        self.lookup.create(&name).module = Some(id);
        self.modules.push(id);
        id
    }

    /// Attach one parsed file to a module. The sub-module key is the
    /// source file's name.
    pub fn add_file(&mut self, module: ModuleId, file: FileId, nodes: Vec<Node>) {
        let key = self
            .program
            .sources
            .get(file)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| panic!("INTERNAL ERROR: unknown source file"));
        self.program
            .module_mut(module)
            .parts
            .insert(key, Submodule::new(module, file, nodes));
    }

    /// Run the full semantic pipeline over every loaded module.
    pub fn analyze(&mut self) -> Result<Analysis, DiagnosticError> {
        self.build_dep_graph()?;
        self.detect_cycles()?;
        self.resolve_all()?;
        let warnings = self.infer_all()?;
        self.check_invariants()?;

        let mut mangled_names = BTreeMap::new();
        for idx in 0..self.program.functions.len() {
            let id = FunctionId(idx as u32);
            mangled_names.insert(id, mangled_function(&self.program, id, None));
        }

        let linked_libraries = self
            .modules
            .iter()
            .map(|&module| {
                let module = self.program.module(module);
                (module.name.clone(), module.linked_libraries.clone())
            })
            .collect();

        Ok(Analysis {
            mangled_names,
            linked_libraries,
            warnings,
        })
    }

    /// Collect `use` edges from every file. Duplicates are deduplicated
    /// by name; a directive naming an unloaded module is a setup error.
    fn build_dep_graph(&mut self) -> Result<(), DiagnosticError> {
        for &module in &self.modules {
            let from = self.program.module(module).name.clone();
            for submodule in self.program.module(module).parts.values() {
                for node in &submodule.nodes {
                    let Node::UseDirective(directive) = node else {
                        continue;
                    };
                    let target = ModuleName::from_unresolved(&directive.module_name);
                    if self.lookup.get_module(&target).is_none() {
                        return Err(Diagnostic::error(
                            Category::Setup,
                            format!("Couldn't find module `{target}`"),
                        )
                        .at(directive.pos)
                        .into());
                    }
                    self.dep_graph.add_dependency(&from, &target);
                }
            }
        }
        Ok(())
    }

    /// Import cycles abort before resolution begins.
    fn detect_cycles(&self) -> Result<(), DiagnosticError> {
        let cycles = self.dep_graph.detect_cycles();
        if cycles.is_empty() {
            return Ok(());
        }
        let mut rendered = String::new();
        for (idx, cycle) in cycles.iter().enumerate() {
            if idx > 0 {
                rendered.push_str("; ");
            }
            for (part, name) in cycle.iter().enumerate() {
                if part > 0 {
                    rendered.push_str(", ");
                }
                rendered.push_str(&name.to_string());
            }
        }
        Err(Diagnostic::error(
            Category::ImportCycle,
            format!("Encountered cyclic dependency between: {rendered}"),
        )
        .into())
    }

    /// Resolve every module (dependencies first, via recursion inside the
    /// resolver) and enforce the single-`main` rule.
    fn resolve_all(&mut self) -> Result<(), DiagnosticError> {
        for module in self.modules.clone() {
            resolve_module(&mut self.program, &self.lookup, module, self.c_module)?;
        }

        let mut mains = 0usize;
        for &module in &self.modules {
            if let Some(ident) = self.program.module(module).scope.get_function("main")
                && ident.public
            {
                mains += 1;
            }
        }
        match mains {
            0 => Err(Diagnostic::error(Category::Setup, "main function not found").into()),
            1 => Ok(()),
            _ => Err(Diagnostic::error(
                Category::Redeclaration,
                "Found more than one `main` function",
            )
            .into()),
        }
    }

    fn infer_all(&mut self) -> Result<Vec<Diagnostic>, DiagnosticError> {
        let mut warnings = Vec::new();
        for module in self.modules.clone() {
            let files: Vec<String> = self.program.module(module).parts.keys().cloned().collect();
            for file in files {
                warnings.extend(infer_submodule(&mut self.program, module, &file)?);
            }
        }
        Ok(warnings)
    }

    /// The contract handed to code generation: every expression is fully
    /// typed with no inference placeholders, calls line up with their
    /// callees, and methods live in their type's module.
    fn check_invariants(&mut self) -> Result<(), DiagnosticError> {
        for module in self.modules.clone() {
            let files: Vec<String> = self.program.module(module).parts.keys().cloned().collect();
            for file in files {
                let mut failure: Option<Diagnostic> = None;
                for_each_node(&mut self.program, module, &file, |p, node| {
                    if failure.is_some() {
                        return;
                    }
                    let NodeMut::Expr(expr) = node else { return };
                    if matches!(
                        expr.kind,
                        ExprKind::DiscardAccess(_) | ExprKind::EnumPattern(_)
                    ) {
                        return;
                    }

                    let Some(ty) = expr.type_of(p) else {
                        failure = Some(
                            Diagnostic::error(
                                Category::TypeMismatch,
                                "expression has no type after inference",
                            )
                            .at(expr.pos),
                        );
                        return;
                    };
                    if !is_fully_concrete(&ty) {
                        failure = Some(
                            Diagnostic::error(
                                Category::TypeMismatch,
                                format!(
                                    "inference placeholder escaped onto `{}`",
                                    ty.type_name(&p.types)
                                ),
                            )
                            .at(expr.pos),
                        );
                        return;
                    }

                    if let ExprKind::Call(call) = &expr.kind {
                        failure = check_call(p, expr.pos, call).err();
                    }
                });
                if let Some(diagnostic) = failure {
                    return Err(diagnostic.into());
                }
            }
        }

        for (_, def) in self.program.types.iter() {
            for &method in def.methods.iter().chain(&def.static_methods) {
                if self.program.function(method).module != def.module {
                    panic!(
                        "INTERNAL ERROR: method `{}` attached across modules",
                        self.program.function(method).name
                    );
                }
            }
        }
        Ok(())
    }
}

/// Call-site invariant: the callee is a function, the argument count
/// fits, and each argument matches its parameter.
fn check_call(
    program: &Program,
    pos: ku_diag::Position,
    call: &ku_ast::CallExpr,
) -> Result<(), Diagnostic> {
    let Some(fn_ty) = call.function.type_of(program) else {
        return Ok(());
    };
    let Type::Function(ft) = fn_ty.base.actual(&program.types) else {
        return Err(Diagnostic::error(
            Category::TypeMismatch,
            format!(
                "Attempt to call non-function `{}`",
                fn_ty.type_name(&program.types)
            ),
        )
        .at(pos));
    };

    if call.arguments.len() < ft.parameters.len() {
        return Err(Diagnostic::error(
            Category::Arity,
            format!(
                "Call has too few arguments, want {}, has {}",
                ft.parameters.len(),
                call.arguments.len()
            ),
        )
        .at(pos));
    }
    if call.arguments.len() > ft.parameters.len() && !ft.variadic {
        return Err(Diagnostic::error(
            Category::Arity,
            format!(
                "Call has too many arguments, want {}, has {}",
                ft.parameters.len(),
                call.arguments.len()
            ),
        )
        .at(pos));
    }

    for (argument, parameter) in call.arguments.iter().zip(&ft.parameters) {
        let Some(arg_ty) = argument.type_of(program) else {
            continue;
        };
        // Calls inside generic bodies legitimately mention parameters.
        if has_substitution(parameter) || has_substitution(&arg_ty) {
            continue;
        }
        if !arg_ty.actual_equals(parameter, &program.types) {
            return Err(Diagnostic::error(
                Category::TypeMismatch,
                format!(
                    "argument type `{}` does not match parameter type `{}`",
                    arg_ty.type_name(&program.types),
                    parameter.type_name(&program.types)
                ),
            )
            .at(argument.pos));
        }
    }
    Ok(())
}

fn has_substitution(reference: &TypeReference) -> bool {
    if reference.generic_args.iter().any(has_substitution) {
        return true;
    }
    match &reference.base {
        Type::Substitution(_) => true,
        Type::Pointer(pt) => has_substitution(&pt.addressee),
        Type::Reference(rt) => has_substitution(&rt.referent),
        Type::Array(at) => has_substitution(&at.member),
        Type::Tuple(tt) => tt.members.iter().any(has_substitution),
        Type::Struct(st) => st.members.iter().any(|m| has_substitution(&m.ty)),
        Type::Function(ft) => {
            ft.parameters.iter().any(has_substitution)
                || ft.ret.as_ref().is_some_and(|r| has_substitution(r))
                || ft.receiver.as_ref().is_some_and(|r| has_substitution(r))
        }
        _ => false,
    }
}
