use cu::pre::*;
use embercc_arena::{StrId, StrIdMap};

use crate::{NodeId, TypeId};

/// What kind of region a scope covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Namespace(StrId),
    Struct(TypeId),
    Function,
    Block,
    /// Temporary registrations of template parameter names
    TemplateParams,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    names: StrIdMap<NodeId>,
    /// Namespace-tree node active while this scope is open
    ns: usize,
}

#[derive(Debug)]
struct NsNode {
    name: StrId,
    parent: usize,
    children: StrIdMap<usize>,
    bindings: StrIdMap<NodeId>,
}

/// Scoped name -> node binding with a namespace hierarchy
///
/// Lookup walks the open scope chain innermost-out, then the namespace
/// ancestor chain. Namespace-level bindings are recorded in the tree so
/// qualified lookup works after the scope has closed.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    ns_nodes: Vec<NsNode>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Global,
                names: StrIdMap::default(),
                ns: 0,
            }],
            ns_nodes: vec![NsNode {
                name: StrId::INVALID,
                parent: 0,
                children: StrIdMap::default(),
                bindings: StrIdMap::default(),
            }],
        }
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_scope(&mut self, kind: ScopeKind) {
        let current_ns = self.current_ns();
        let ns = match kind {
            ScopeKind::Namespace(name) => self.find_or_create_ns(current_ns, name),
            _ => current_ns,
        };
        self.scopes.push(Scope {
            kind,
            names: StrIdMap::default(),
            ns,
        });
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Scope nesting depth, for speculative rollback
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Pop every scope opened past `depth`
    pub fn truncate(&mut self, depth: usize) {
        while self.scopes.len() > depth.max(1) {
            self.scopes.pop();
        }
    }

    pub fn current_kind(&self) -> ScopeKind {
        self.scopes.last().map(|s| s.kind).unwrap_or(ScopeKind::Global)
    }

    /// Innermost enclosing struct scope, if any
    pub fn current_struct(&self) -> Option<TypeId> {
        self.scopes.iter().rev().find_map(|s| match s.kind {
            ScopeKind::Struct(id) => Some(id),
            _ => None,
        })
    }

    /// Bind `name` in the current scope
    pub fn insert(&mut self, name: StrId, node: NodeId) {
        let ns = self.current_ns();
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        let namespace_level = matches!(scope.kind, ScopeKind::Global | ScopeKind::Namespace(_));
        scope.names.insert(name, node);
        if namespace_level {
            self.ns_nodes[ns].bindings.insert(name, node);
        }
    }

    /// Bind `name` in the global scope regardless of current depth. Used
    /// for template instantiations and out-of-line definitions.
    pub fn insert_global(&mut self, name: StrId, node: NodeId) {
        self.scopes[0].names.insert(name, node);
        self.ns_nodes[0].bindings.insert(name, node);
    }

    /// Unqualified lookup: scope chain innermost-out, then namespace
    /// ancestors
    pub fn lookup(&self, name: StrId) -> Option<NodeId> {
        for scope in self.scopes.iter().rev() {
            if let Some(n) = scope.names.get(&name) {
                return Some(*n);
            }
        }
        let mut ns = self.current_ns();
        loop {
            if let Some(n) = self.ns_nodes[ns].bindings.get(&name) {
                return Some(*n);
            }
            if ns == 0 {
                return None;
            }
            ns = self.ns_nodes[ns].parent;
        }
    }

    /// Qualified lookup `A::B::name`, starting from the current namespace
    /// then retrying from the root
    pub fn lookup_qualified(&self, path: &[StrId]) -> Option<NodeId> {
        let (name, prefix) = path.split_last()?;
        if prefix.is_empty() {
            return self.lookup(*name);
        }
        for start in [self.current_ns(), 0] {
            let mut ns = start;
            let mut ok = true;
            for seg in prefix {
                match self.ns_nodes[ns].children.get(seg) {
                    Some(child) => ns = *child,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && let Some(n) = self.ns_nodes[ns].bindings.get(name) {
                return Some(*n);
            }
        }
        None
    }

    /// The namespace path of the current scope, outermost first
    pub fn current_namespace_path(&self) -> Vec<StrId> {
        let mut path = vec![];
        let mut ns = self.current_ns();
        while ns != 0 {
            path.push(self.ns_nodes[ns].name);
            ns = self.ns_nodes[ns].parent;
        }
        path.reverse();
        path
    }

    /// Namespace ancestor chain, innermost first, ending at the root
    pub fn namespace_ancestors(&self) -> Vec<Vec<StrId>> {
        let mut out = vec![];
        let mut path = self.current_namespace_path();
        loop {
            out.push(path.clone());
            if path.is_empty() {
                break;
            }
            path.pop();
        }
        out
    }

    fn current_ns(&self) -> usize {
        self.scopes.last().map(|s| s.ns).unwrap_or(0)
    }

    fn find_or_create_ns(&mut self, parent: usize, name: StrId) -> usize {
        if let Some(child) = self.ns_nodes[parent].children.get(&name) {
            return *child;
        }
        let idx = self.ns_nodes.len();
        self.ns_nodes.push(NsNode {
            name,
            parent,
            children: StrIdMap::default(),
            bindings: StrIdMap::default(),
        });
        self.ns_nodes[parent].children.insert(name, idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercc_arena::StringTable;

    #[test]
    fn test_scope_chain_lookup() {
        let mut strings = StringTable::new();
        let mut sym = SymbolTable::new();
        let x = strings.intern("x");
        let y = strings.intern("y");
        sym.insert(x, NodeId(1));
        sym.enter_scope(ScopeKind::Function);
        sym.insert(y, NodeId(2));
        assert_eq!(sym.lookup(x), Some(NodeId(1)));
        assert_eq!(sym.lookup(y), Some(NodeId(2)));
        sym.exit_scope();
        assert_eq!(sym.lookup(y), None);
    }

    #[test]
    fn test_shadowing() {
        let mut strings = StringTable::new();
        let mut sym = SymbolTable::new();
        let x = strings.intern("x");
        sym.insert(x, NodeId(1));
        sym.enter_scope(ScopeKind::Block);
        sym.insert(x, NodeId(2));
        assert_eq!(sym.lookup(x), Some(NodeId(2)));
        sym.exit_scope();
        assert_eq!(sym.lookup(x), Some(NodeId(1)));
    }

    #[test]
    fn test_qualified_lookup() {
        let mut strings = StringTable::new();
        let mut sym = SymbolTable::new();
        let (a, b, f) = (strings.intern("A"), strings.intern("B"), strings.intern("f"));
        sym.enter_scope(ScopeKind::Namespace(a));
        sym.enter_scope(ScopeKind::Namespace(b));
        sym.insert(f, NodeId(7));
        sym.exit_scope();
        sym.exit_scope();
        assert_eq!(sym.lookup_qualified(&[a, b, f]), Some(NodeId(7)));
        assert_eq!(sym.lookup_qualified(&[b, f]), None);
        assert_eq!(sym.lookup(f), None);
    }

    #[test]
    fn test_insert_global_from_nested_scope() {
        let mut strings = StringTable::new();
        let mut sym = SymbolTable::new();
        let g = strings.intern("inst");
        sym.enter_scope(ScopeKind::Function);
        sym.enter_scope(ScopeKind::Block);
        sym.insert_global(g, NodeId(9));
        sym.exit_scope();
        sym.exit_scope();
        assert_eq!(sym.lookup(g), Some(NodeId(9)));
    }

    #[test]
    fn test_namespace_reopen_shares_tree() {
        let mut strings = StringTable::new();
        let mut sym = SymbolTable::new();
        let ns = strings.intern("util");
        let f = strings.intern("f");
        let g = strings.intern("g");
        sym.enter_scope(ScopeKind::Namespace(ns));
        sym.insert(f, NodeId(1));
        sym.exit_scope();
        sym.enter_scope(ScopeKind::Namespace(ns));
        sym.insert(g, NodeId(2));
        // reopened namespace sees earlier bindings through the tree
        assert_eq!(sym.lookup(f), Some(NodeId(1)));
        sym.exit_scope();
        assert_eq!(sym.lookup_qualified(&[ns, f]), Some(NodeId(1)));
        assert_eq!(sym.lookup_qualified(&[ns, g]), Some(NodeId(2)));
    }
}
