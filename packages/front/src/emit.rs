use cu::pre::*;
use embercc_sema::{Node, TypeRegistry};

use crate::Session;

/// Object sections the writer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Text,
    Data,
    Bss,
    RData,
}

/// Relocation kinds the core emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelocKind {
    /// PC-relative 32-bit
    Pc32,
    /// Absolute 64-bit
    Abs64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymLinkage {
    Global,
    Local,
    Weak,
}

/// A function signature as the writer wants it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSig {
    pub name: String,
    pub return_type: String,
    pub param_types: Vec<String>,
    pub class_name: Option<String>,
    pub linkage: SymLinkage,
    pub is_variadic: bool,
    pub mangled_name: String,
}

/// The capability set the object-file writer is consumed through
///
/// The core produces only this in-memory symbol/relocation stream; the
/// writer serializes it into a relocatable ELF64 or COFF object. Vtables
/// follow the Itanium layout `[offset-to-top][rtti][fn1][fn2]...`, with the
/// exported symbol pointing at the first function slot.
pub trait ObjectSink {
    fn add_function_symbol(
        &mut self,
        mangled_name: &str,
        section_offset: u64,
        stack_space: u32,
        linkage: SymLinkage,
    );
    fn add_data(&mut self, bytes: &[u8], section: Section);
    fn add_relocation(&mut self, offset: u64, symbol_name: &str, kind: RelocKind);
    /// Returns the symbol assigned to the literal. Symbols default to
    /// global linkage for cross-TU merging.
    fn add_string_literal(&mut self, content: &str) -> String;
    fn add_global_variable(
        &mut self,
        name: &str,
        size_bytes: u64,
        is_initialized: bool,
        init_data: &[u8],
    );
    fn add_vtable(
        &mut self,
        symbol: &str,
        function_symbols: &[String],
        class_name: &str,
        base_class_names: &[String],
        base_descriptors: &[String],
    );
    fn add_function_signature(&mut self, sig: &FunctionSig);
}

/// Collecting sink for tests and the symbol listing
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub functions: Vec<(String, SymLinkage)>,
    pub signatures: Vec<FunctionSig>,
    pub data: Vec<(Section, usize)>,
    pub relocations: Vec<(u64, String, RelocKind)>,
    pub string_literals: Vec<String>,
    pub globals: Vec<(String, u64, bool)>,
    pub vtables: Vec<(String, Vec<String>)>,
}

impl ObjectSink for RecordingSink {
    fn add_function_symbol(
        &mut self,
        mangled_name: &str,
        _section_offset: u64,
        _stack_space: u32,
        linkage: SymLinkage,
    ) {
        self.functions.push((mangled_name.to_string(), linkage));
    }

    fn add_data(&mut self, bytes: &[u8], section: Section) {
        self.data.push((section, bytes.len()));
    }

    fn add_relocation(&mut self, offset: u64, symbol_name: &str, kind: RelocKind) {
        self.relocations.push((offset, symbol_name.to_string(), kind));
    }

    fn add_string_literal(&mut self, content: &str) -> String {
        let sym = format!(".Lstr{}", self.string_literals.len());
        self.string_literals.push(content.to_string());
        sym
    }

    fn add_global_variable(
        &mut self,
        name: &str,
        size_bytes: u64,
        is_initialized: bool,
        _init_data: &[u8],
    ) {
        self.globals.push((name.to_string(), size_bytes, is_initialized));
    }

    fn add_vtable(
        &mut self,
        symbol: &str,
        function_symbols: &[String],
        _class_name: &str,
        _base_class_names: &[String],
        _base_descriptors: &[String],
    ) {
        self.vtables
            .push((symbol.to_string(), function_symbols.to_vec()));
    }

    fn add_function_signature(&mut self, sig: &FunctionSig) {
        self.signatures.push(sig.clone());
    }
}

/// Walk the finalized AST and surface symbols and signatures through the
/// sink. Code generation proper is the writer's job; this is the handoff.
pub fn emit_declarations(sess: &Session, sink: &mut dyn ObjectSink) {
    for id in &sess.top_level {
        match sess.nodes.get(*id) {
            Some(Node::Func(f)) => {
                let Some(mangled) = &f.mangled else {
                    continue;
                };
                if f.inline_always {
                    continue;
                }
                let linkage = if f.quals.storage.is_static {
                    SymLinkage::Local
                } else {
                    SymLinkage::Global
                };
                sink.add_function_symbol(mangled.as_ref(), 0, 0, linkage);
                sink.add_function_signature(&FunctionSig {
                    name: sess.view(f.name).to_string(),
                    return_type: f.ret.key_string(&sess.strings),
                    param_types: f
                        .params
                        .iter()
                        .map(|p| p.ty.key_string(&sess.strings))
                        .collect(),
                    class_name: f.class_name.map(|c| sess.view(c).to_string()),
                    linkage,
                    is_variadic: f.is_variadic,
                    mangled_name: mangled.to_string(),
                });
            }
            Some(Node::Var(v)) => {
                let size = sess.types.size_of(&v.ty).unwrap_or(0);
                sink.add_global_variable(
                    sess.view(v.name),
                    size as u64,
                    v.init.is_some(),
                    &[],
                );
            }
            Some(Node::Struct(s)) => {
                emit_vtable(sess, &sess.types, s.type_index, sink);
            }
            _ => {}
        }
    }
}

fn emit_vtable(
    sess: &Session,
    types: &TypeRegistry,
    type_index: embercc_sema::TypeId,
    sink: &mut dyn ObjectSink,
) {
    let Some(info) = types.get(type_index) else {
        return;
    };
    let Some(s) = &info.strukt else {
        return;
    };
    if !s.has_vtable {
        return;
    }
    let class_name = sess.view(info.name).to_string();
    let fn_symbols: Vec<String> = s
        .vtable
        .iter()
        .map(|slot| {
            slot.func
                .and_then(|f| sess.nodes.func(f))
                .and_then(|f| f.mangled.clone())
                .map(|m| m.to_string())
                .unwrap_or_else(|| "__cxa_pure_virtual".to_string())
        })
        .collect();
    let base_names: Vec<String> = s
        .bases
        .iter()
        .map(|b| sess.view(b.name).to_string())
        .collect();
    sink.add_vtable(
        &format!("_ZTV{}{}", class_name.len(), class_name),
        &fn_symbols,
        &class_name,
        &base_names,
        &[],
    );
}
