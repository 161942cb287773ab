use cu::pre::*;
use embercc_arena::{ArcStr, Cursor, StrId, StrIdMap, StringTable};
use embercc_sema::{FuncQuals, NodeId, TemplateParam, TplArg, TypeSpecifier};
use fxhash::{FxHashMap, FxHasher64};

/// What a template name declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Function,
    Class,
    Alias,
}

/// Out-of-line member definition waiting for its template's instantiation
///
/// `template<typename T> R Foo<T>::bar() { ... }` and
/// `template<typename T> T Foo<T>::value = ...;` park here until `Foo` is
/// materialized with concrete arguments.
#[derive(Debug, Clone)]
pub struct OutOfLineDef {
    pub member_name: StrId,
    pub tparams: Vec<TemplateParam>,
    pub body_start: Cursor,
    pub is_static_member: bool,
    pub quals: FuncQuals,
}

/// Everything registered under one template name
#[derive(Debug, Default)]
pub struct TemplateEntry {
    /// Primary declarations, in declaration order. Function templates may
    /// overload; class templates have one primary (later ones are
    /// redeclarations).
    pub primaries: Vec<NodeId>,
    /// Partial specialization patterns
    pub partials: Vec<NodeId>,
    /// Full specializations keyed by the exact argument print
    pub fulls: FxHashMap<ArcStr, NodeId>,
    /// Out-of-line member definitions awaiting instantiation
    pub out_of_line: Vec<OutOfLineDef>,
    pub kind: Option<TemplateKind>,
}

/// Stores every template of the compilation plus per-instantiation
/// bookkeeping the engine reads back
#[derive(Default)]
pub struct TemplateRegistry {
    entries: StrIdMap<TemplateEntry>,
    /// Member alias bindings per instantiated class:
    /// (instantiated class name, alias name) -> aliased type
    pub member_aliases: FxHashMap<(StrId, StrId), TypeSpecifier>,
    /// Which specialization pattern produced an instantiation:
    /// instantiated name -> pattern declaration
    pub pattern_binding: StrIdMap<NodeId>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_primary(&mut self, name: StrId, node: NodeId, kind: TemplateKind) {
        let e = self.entries.entry(name).or_default();
        e.primaries.push(node);
        e.kind.get_or_insert(kind);
    }

    pub fn declare_partial(&mut self, name: StrId, node: NodeId) {
        let e = self.entries.entry(name).or_default();
        e.partials.push(node);
        e.kind.get_or_insert(TemplateKind::Class);
    }

    pub fn declare_full(&mut self, name: StrId, args_key: impl Into<ArcStr>, node: NodeId) {
        let e = self.entries.entry(name).or_default();
        e.fulls.insert(args_key.into(), node);
        e.kind.get_or_insert(TemplateKind::Class);
    }

    pub fn add_out_of_line(&mut self, name: StrId, def: OutOfLineDef) {
        self.entries.entry(name).or_default().out_of_line.push(def);
    }

    pub fn get(&self, name: StrId) -> Option<&TemplateEntry> {
        self.entries.get(&name)
    }

    pub fn kind_of(&self, name: StrId) -> Option<TemplateKind> {
        self.entries.get(&name).and_then(|e| e.kind)
    }

    /// All primary declarations bound to `name`, in declaration order
    pub fn lookup_all_templates(&self, name: StrId) -> &[NodeId] {
        self.entries
            .get(&name)
            .map(|e| e.primaries.as_slice())
            .unwrap_or(&[])
    }

    /// Exact full specialization for an argument list
    pub fn lookup_exact_specialization(&self, name: StrId, args_key: &str) -> Option<NodeId> {
        self.entries
            .get(&name)?
            .fulls
            .get(args_key)
            .copied()
    }

    pub fn bind_member_alias(&mut self, class_name: StrId, alias: StrId, target: TypeSpecifier) {
        self.member_aliases.insert((class_name, alias), target);
    }

    pub fn member_alias(&self, class_name: StrId, alias: StrId) -> Option<&TypeSpecifier> {
        self.member_aliases.get(&(class_name, alias))
    }
}

/// Canonical print of an argument list, the content the cache key and the
/// hash mangling are both derived from
pub fn args_key(args: &[TplArg], strings: &StringTable) -> String {
    let parts: Vec<String> = args.iter().map(|a| a.key_string(strings)).collect();
    parts.join(",")
}

/// Content-addressed internal name of an instantiation: `base$hash`.
/// A pure function of the resolved arguments, so structurally identical
/// instantiations agree on it regardless of declaration order.
pub fn mangle_template_name(base: &str, args_key: &str) -> String {
    use std::hash::Hasher;
    let mut h = FxHasher64::default();
    h.write(args_key.as_bytes());
    format!("{base}${:016x}", h.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercc_sema::{BaseType, NodeId};

    #[test]
    fn test_overloaded_primaries_keep_order() {
        let mut strings = StringTable::new();
        let mut reg = TemplateRegistry::new();
        let f = strings.intern("f");
        reg.declare_primary(f, NodeId(1), TemplateKind::Function);
        reg.declare_primary(f, NodeId(2), TemplateKind::Function);
        assert_eq!(reg.lookup_all_templates(f), &[NodeId(1), NodeId(2)]);
        assert_eq!(reg.kind_of(f), Some(TemplateKind::Function));
    }

    #[test]
    fn test_full_specialization_lookup() {
        let mut strings = StringTable::new();
        let mut reg = TemplateRegistry::new();
        let t = strings.intern("Tuple");
        reg.declare_primary(t, NodeId(1), TemplateKind::Class);
        reg.declare_full(t, "", NodeId(2));
        assert_eq!(reg.lookup_exact_specialization(t, ""), Some(NodeId(2)));
        assert_eq!(reg.lookup_exact_specialization(t, "int"), None);
    }

    #[test]
    fn test_mangle_is_deterministic() {
        let mut strings = StringTable::new();
        let args = vec![
            TplArg::Type(TypeSpecifier::prim(BaseType::Int)),
            TplArg::Value(3),
        ];
        let key = args_key(&args, &strings);
        assert_eq!(key, "int,3");
        let a = mangle_template_name("Tuple", &key);
        let b = mangle_template_name("Tuple", &key);
        assert_eq!(a, b);
        assert!(a.starts_with("Tuple$"));
        let _ = strings.intern("unrelated");
        assert_ne!(a, mangle_template_name("Tuple", "int,4"));
    }
}
