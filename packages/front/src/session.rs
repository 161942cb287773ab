use cu::pre::*;
use embercc_arena::{Cursor, StrId, StringTable, loc};
use embercc_sema::{NodeArena, NodeId, SymbolTable, TypeId, TypeRegistry};

use crate::tpl::{ConceptRegistry, SubstMap, TemplateRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Linux,
    Windows,
}

/// Tunables of the semantic core. The hard caps bound template recursion;
/// they are configuration, not constants.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub recursion_cap: u32,
    pub iteration_budget: u32,
    pub lazy_instantiation: bool,
    pub platform: Platform,
    pub ptr_width: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            recursion_cap: 64,
            iteration_budget: 10000,
            lazy_instantiation: false,
            platform: Platform::Linux,
            ptr_width: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    pub col: u32,
}

/// Collected diagnostics, mirrored to the log as they arrive
#[derive(Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    fn push(&mut self, severity: Severity, message: String) {
        let (line, col) = match loc::last() {
            Some((_, line, col)) => (line, col),
            None => (0, 0),
        };
        self.records.push(Diagnostic {
            severity,
            message,
            line,
            col,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        cu::error!("{}: {message}", loc::format_last());
        self.push(Severity::Error, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        cu::warn!("{}: {message}", loc::format_last());
        self.push(Severity::Warning, message);
    }

    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        cu::info!("{}: {message}", loc::format_last());
        self.push(Severity::Note, message);
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }
}

/// A static member initializer registered for lazy realization
#[derive(Debug, Clone)]
pub struct LazyStaticMember {
    pub class_index: TypeId,
    pub member: StrId,
    pub init: NodeId,
    pub map: SubstMap,
}

/// A member function whose signature is registered but whose body is
/// instantiated on first call
#[derive(Debug, Clone)]
pub struct LazyMemberFunction {
    pub class_index: TypeId,
    pub class_name: StrId,
    pub member: StrId,
    /// The signature-only declaration inserted for name lookup
    pub decl: NodeId,
    pub body_start: Option<Cursor>,
    /// Original member function node of the template, for the
    /// deep-copy path when no cursor exists
    pub original: NodeId,
    pub map: SubstMap,
    pub realized: bool,
}

/// All state of one compilation, passed explicitly
///
/// Every registry is mutated by a single owner (the parser) and is
/// append-only for the compilation's lifetime; handles never invalidate.
pub struct Session {
    pub strings: StringTable,
    pub nodes: NodeArena,
    pub types: TypeRegistry,
    pub symbols: SymbolTable,
    pub templates: TemplateRegistry,
    pub concepts: ConceptRegistry,
    pub diags: Diagnostics,
    pub options: Options,
    /// Top-level AST list handed to the code generator
    pub top_level: Vec<NodeId>,
    pub lazy_statics: Vec<LazyStaticMember>,
    pub lazy_methods: Vec<LazyMemberFunction>,
    /// Active template-parameter scopes, innermost last
    pub subst_stack: Vec<SubstMap>,
    /// Function template instantiation depth, bounded by `recursion_cap`
    pub fn_inst_depth: u32,
    /// Class template materialization steps, bounded by `iteration_budget`
    pub class_inst_steps: u32,
}

impl Session {
    pub fn new(options: Options) -> Self {
        let mut types = TypeRegistry::new();
        types.ptr_width = options.ptr_width;
        Self {
            strings: StringTable::new(),
            nodes: NodeArena::new(),
            types,
            symbols: SymbolTable::new(),
            templates: TemplateRegistry::new(),
            concepts: ConceptRegistry::new(),
            diags: Diagnostics::default(),
            options,
            top_level: vec![],
            lazy_statics: vec![],
            lazy_methods: vec![],
            subst_stack: vec![],
            fn_inst_depth: 0,
            class_inst_steps: 0,
        }
    }

    pub fn intern(&mut self, s: &str) -> StrId {
        self.strings.intern(s)
    }

    pub fn view(&self, id: StrId) -> &str {
        self.strings.view(id)
    }

    /// Look a name up through the active template-parameter scopes,
    /// innermost first
    pub fn subst_lookup(&self, name: StrId) -> Option<&crate::tpl::TplBinding> {
        self.subst_stack.iter().rev().find_map(|m| m.get(name))
    }
}
