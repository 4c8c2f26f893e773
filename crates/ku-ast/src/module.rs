//! Modules, sub-modules, and the import graph.
//!
//! A module owns a dotted name-path, a root scope, one sub-module per
//! source file, and the native libraries its files ask to link. The
//! [`ModuleLookup`] tree finds modules by path; the [`DependencyGraph`]
//! records `use` edges and rejects import cycles before resolution runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ku_diag::FileId;
use ku_types::{ModuleId, UnresolvedName};

use crate::Node;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// Module names
// ---------------------------------------------------------------------------

/// A dotted module path such as `a.b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName {
    pub parts: Vec<String>,
}

impl ModuleName {
    pub fn new(parts: &[&str]) -> Self {
        Self {
            parts: parts.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn single(part: impl Into<String>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    /// The full path named by an unresolved name (`a.b` + `c` = `a.b.c`).
    pub fn from_unresolved(name: &UnresolvedName) -> Self {
        let mut parts = name.modules.clone();
        parts.push(name.name.clone());
        Self { parts }
    }

    pub fn last(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.parts.iter().enumerate() {
            if idx > 0 {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Modules and sub-modules
// ---------------------------------------------------------------------------

/// A module: a directory of `.ku` files, or a single anonymous file.
#[derive(Debug)]
pub struct Module {
    pub name: ModuleName,
    /// The module's root scope, holding its top-level declarations.
    pub scope: Scope,
    /// One sub-module per source file, keyed by file name.
    pub parts: BTreeMap<String, Submodule>,
    pub linked_libraries: Vec<String>,
    /// Set by the resolver so the pipeline is idempotent per module.
    pub resolved: bool,
}

impl Module {
    pub fn new(name: ModuleName, id: ModuleId) -> Self {
        Self {
            name,
            scope: Scope::new(id, None),
            parts: BTreeMap::new(),
            linked_libraries: Vec::new(),
            resolved: false,
        }
    }
}

/// One source file inside a module: its import scope and top-level nodes.
#[derive(Debug)]
pub struct Submodule {
    pub module: ModuleId,
    pub file: FileId,
    /// Holds the modules this file `use`s; consulted when scope lookup
    /// fails locally.
    pub use_scope: Scope,
    pub nodes: Vec<Node>,
    /// Set by the inferrer so the pipeline is idempotent per sub-module.
    pub inferred: bool,
}

impl Submodule {
    pub fn new(module: ModuleId, file: FileId, nodes: Vec<Node>) -> Self {
        Self {
            module,
            file,
            use_scope: Scope::new(module, None),
            nodes,
            inferred: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Module lookup tree
// ---------------------------------------------------------------------------

/// A tree over module path segments mapping each full path to its module.
#[derive(Debug, Default)]
pub struct ModuleLookup {
    pub module: Option<ModuleId>,
    children: BTreeMap<String, ModuleLookup>,
}

impl ModuleLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the entry for `name`, reporting the first missing prefix.
    pub fn get(&self, name: &ModuleName) -> Result<&ModuleLookup, String> {
        let mut entry = self;
        for (idx, part) in name.parts.iter().enumerate() {
            entry = entry.children.get(part).ok_or_else(|| {
                let prefix = ModuleName {
                    parts: name.parts[..=idx].to_vec(),
                };
                format!("Module not found in lookup: {prefix}")
            })?;
        }
        Ok(entry)
    }

    /// Find a registered module id by path.
    pub fn get_module(&self, name: &ModuleName) -> Option<ModuleId> {
        self.get(name).ok().and_then(|entry| entry.module)
    }

    /// Create (or find) the entry for `name`.
    pub fn create(&mut self, name: &ModuleName) -> &mut ModuleLookup {
        let mut entry = self;
        for part in &name.parts {
            entry = entry.children.entry(part.clone()).or_default();
        }
        entry
    }
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// The import graph over module names. Edges come from `use` directives,
/// deduplicated by name.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<ModuleName, BTreeSet<ModuleName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependency(&mut self, from: &ModuleName, to: &ModuleName) {
        self.edges
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.edges.entry(to.clone()).or_default();
    }

    /// Every strongly connected component of size > 1, each a cycle the
    /// import graph is not allowed to contain. Components come out in a
    /// deterministic order.
    pub fn detect_cycles(&self) -> Vec<Vec<ModuleName>> {
        let nodes: Vec<&ModuleName> = self.edges.keys().collect();
        let index_of: BTreeMap<&ModuleName, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut state = TarjanState {
            index: vec![None; nodes.len()],
            lowlink: vec![0; nodes.len()],
            on_stack: vec![false; nodes.len()],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        };

        for v in 0..nodes.len() {
            if state.index[v].is_none() {
                self.strongconnect(v, &nodes, &index_of, &mut state);
            }
        }

        let mut cycles: Vec<Vec<ModuleName>> = state
            .components
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut names: Vec<ModuleName> =
                    component.iter().map(|&v| nodes[v].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    fn strongconnect(
        &self,
        v: usize,
        nodes: &[&ModuleName],
        index_of: &BTreeMap<&ModuleName, usize>,
        state: &mut TarjanState,
    ) {
        state.index[v] = Some(state.next_index);
        state.lowlink[v] = state.next_index;
        state.next_index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        if let Some(successors) = self.edges.get(nodes[v]) {
            for succ in successors {
                let Some(&w) = index_of.get(succ) else {
                    continue;
                };
                if state.index[w].is_none() {
                    self.strongconnect(w, nodes, index_of, state);
                    state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
                } else if state.on_stack[w] {
                    state.lowlink[v] = state.lowlink[v].min(state.index[w].unwrap());
                }
            }
        }

        if Some(state.lowlink[v]) == state.index[v] {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().expect("tarjan stack underflow");
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            state.components.push(component);
        }
    }
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}
