//! Lexical scopes and the identifier table.
//!
//! A scope holds three disjoint maps keyed by identifier name — types,
//! functions, variables — plus the modules brought in by `use`. Each
//! binding records whether it is public, the module it was declared in,
//! and the function it belongs to (used to reject lambda captures).
//! Insertion returns the previous binding so callers can report
//! redeclarations.

use std::collections::HashMap;

use ku_types::{FunctionId, ModuleId, Type, VariableId};

/// What kind of declaration a binding names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Type,
    Function,
    Variable,
}

impl IdentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentKind::Type => "type",
            IdentKind::Function => "function",
            IdentKind::Variable => "variable",
        }
    }
}

#[derive(Debug, Clone)]
pub enum IdentValue {
    Type(Type),
    Function(FunctionId),
    Variable(VariableId),
}

/// One scope binding.
#[derive(Debug, Clone)]
pub struct Ident {
    pub kind: IdentKind,
    pub value: IdentValue,
    pub public: bool,
    /// The module whose source declared this binding.
    pub module: ModuleId,
    /// The function the binding's scope belongs to, if any. A lookup from
    /// inside a different function is an illegal capture.
    pub function: Option<FunctionId>,
}

/// A lexical frame. Module root scopes persist inside their module; block
/// scopes are transient frames on the resolver's stack, linked by
/// position rather than by pointer.
#[derive(Debug)]
pub struct Scope {
    pub module: ModuleId,
    pub function: Option<FunctionId>,
    type_idents: HashMap<String, Ident>,
    function_idents: HashMap<String, Ident>,
    variable_idents: HashMap<String, Ident>,
    /// Modules visible through this scope, keyed by dotted path (and by
    /// last segment as a shorthand).
    used_modules: HashMap<String, ModuleId>,
}

impl Scope {
    pub fn new(module: ModuleId, function: Option<FunctionId>) -> Self {
        Self {
            module,
            function,
            type_idents: HashMap::new(),
            function_idents: HashMap::new(),
            variable_idents: HashMap::new(),
            used_modules: HashMap::new(),
        }
    }

    fn ident(&self, kind: IdentKind, value: IdentValue, public: bool) -> Ident {
        Ident {
            kind,
            value,
            public,
            module: self.module,
            function: self.function,
        }
    }

    /// Insert a type binding, returning the previous one if the name was
    /// already bound.
    pub fn insert_type(&mut self, name: impl Into<String>, ty: Type, public: bool) -> Option<Ident> {
        let ident = self.ident(IdentKind::Type, IdentValue::Type(ty), public);
        self.type_idents.insert(name.into(), ident)
    }

    pub fn insert_function(
        &mut self,
        name: impl Into<String>,
        function: FunctionId,
        public: bool,
    ) -> Option<Ident> {
        let ident = self.ident(IdentKind::Function, IdentValue::Function(function), public);
        self.function_idents.insert(name.into(), ident)
    }

    pub fn insert_variable(
        &mut self,
        name: impl Into<String>,
        variable: VariableId,
        public: bool,
    ) -> Option<Ident> {
        let ident = self.ident(IdentKind::Variable, IdentValue::Variable(variable), public);
        self.variable_idents.insert(name.into(), ident)
    }

    /// Make a module visible through this scope. Registered under its
    /// full dotted path and, as a shorthand, its last segment.
    pub fn use_module(&mut self, path: &str, id: ModuleId) {
        self.used_modules.insert(path.to_string(), id);
        if let Some(last) = path.rsplit('.').next()
            && last != path
        {
            self.used_modules.insert(last.to_string(), id);
        }
    }

    pub fn used_module(&self, path: &str) -> Option<ModuleId> {
        self.used_modules.get(path).copied()
    }

    pub fn used_modules(&self) -> impl Iterator<Item = (&str, ModuleId)> {
        self.used_modules.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Look up an unqualified name in this single frame. Variables shadow
    /// functions, which shadow types.
    pub fn get_local(&self, name: &str) -> Option<&Ident> {
        self.variable_idents
            .get(name)
            .or_else(|| self.function_idents.get(name))
            .or_else(|| self.type_idents.get(name))
    }

    pub fn get_type(&self, name: &str) -> Option<&Ident> {
        self.type_idents.get(name)
    }

    pub fn get_function(&self, name: &str) -> Option<&Ident> {
        self.function_idents.get(name)
    }

    pub fn get_variable(&self, name: &str) -> Option<&Ident> {
        self.variable_idents.get(name)
    }

    /// Names bound in this frame, for diagnostics and tests.
    pub fn is_empty(&self) -> bool {
        self.type_idents.is_empty()
            && self.function_idents.is_empty()
            && self.variable_idents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ku_types::Primitive;

    #[test]
    fn insertion_returns_previous_binding() {
        let mut scope = Scope::new(ModuleId(0), None);
        assert!(
            scope
                .insert_variable("x", VariableId(0), false)
                .is_none()
        );
        let previous = scope.insert_variable("x", VariableId(1), false);
        assert!(matches!(
            previous,
            Some(Ident {
                value: IdentValue::Variable(VariableId(0)),
                ..
            })
        ));
    }

    #[test]
    fn the_three_maps_are_disjoint() {
        let mut scope = Scope::new(ModuleId(0), None);
        scope.insert_type("x", Type::Primitive(Primitive::Int), false);
        scope.insert_function("x", FunctionId(0), false);
        scope.insert_variable("x", VariableId(0), false);

        assert_eq!(scope.get_type("x").unwrap().kind, IdentKind::Type);
        assert_eq!(scope.get_function("x").unwrap().kind, IdentKind::Function);
        // Unqualified lookup prefers the variable.
        assert_eq!(scope.get_local("x").unwrap().kind, IdentKind::Variable);
    }

    #[test]
    fn used_modules_register_shorthand() {
        let mut scope = Scope::new(ModuleId(0), None);
        scope.use_module("a.b", ModuleId(7));
        assert_eq!(scope.used_module("a.b"), Some(ModuleId(7)));
        assert_eq!(scope.used_module("b"), Some(ModuleId(7)));
        assert_eq!(scope.used_module("a"), None);
    }

    #[test]
    fn bindings_record_owner() {
        let mut scope = Scope::new(ModuleId(2), Some(FunctionId(5)));
        scope.insert_variable("local", VariableId(0), false);
        let ident = scope.get_variable("local").unwrap();
        assert_eq!(ident.module, ModuleId(2));
        assert_eq!(ident.function, Some(FunctionId(5)));
        assert!(!ident.public);
    }
}
