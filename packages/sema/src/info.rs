use cu::pre::*;
use embercc_arena::{ArcStr, StrId};

use crate::{AccessSpec, BaseType, NodeId, TplArg, TypeId, TypeSpecifier};

/// One registered type
///
/// Created empty when first named, finalized (layout computed) before the
/// first use that needs a size. `index` always equals the slot in the
/// registry pool.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: StrId,
    pub base: BaseType,
    pub index: TypeId,
    pub size_bits: u32,
    pub strukt: Option<StructTypeInfo>,
    pub enum_info: Option<EnumInfo>,
    /// Template instantiation metadata, present on instantiated types and
    /// on dependent placeholders
    pub inst: Option<InstMeta>,
    /// Still a forward declaration or a dependent placeholder
    pub incomplete: bool,
}

impl TypeInfo {
    pub fn new(name: StrId, base: BaseType, index: TypeId) -> Self {
        Self {
            name,
            base,
            index,
            size_bits: 0,
            strukt: None,
            enum_info: None,
            inst: None,
            incomplete: true,
        }
    }

    /// A fully laid out type the code generator can take the size of
    pub fn is_complete(&self) -> bool {
        !self.incomplete
            && self
                .inst
                .as_ref()
                .is_none_or(|m| !m.incomplete_instantiation)
    }
}

/// Which template an instantiated (or dependent placeholder) type came from
#[derive(Debug, Clone)]
pub struct InstMeta {
    pub base_template: StrId,
    pub args: Vec<TplArg>,
    /// Set on dependent placeholders created while the enclosing template
    /// was still being parsed
    pub incomplete_instantiation: bool,
}

/// Layout and member data of a struct, class or union
#[derive(Debug, Clone, Default)]
pub struct StructTypeInfo {
    pub members: Vec<Member>,
    pub static_members: Vec<StaticMember>,
    /// Member function declarations (FuncDecl nodes)
    pub methods: Vec<NodeId>,
    pub ctors: Vec<NodeId>,
    pub dtor: Option<NodeId>,
    pub bases: Vec<BaseClass>,
    /// Base specifiers that could not be resolved at parse time
    /// (dependent, decltype or pack-expanded bases of templates)
    pub deferred_bases: Vec<DeferredBase>,
    pub vtable: Vec<VtableSlot>,
    pub is_union: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub has_vtable: bool,
    pub has_user_ctor: bool,
    pub has_user_dtor: bool,
    pub deleted_default_ctor: bool,
    pub deleted_copy_ctor: bool,
    pub deleted_copy_assign: bool,
    pub total_size: u32,
    pub alignment: u32,
    pub pack_alignment: Option<u32>,
}

/// A non-static data member
#[derive(Debug, Clone)]
pub struct Member {
    pub name: StrId,
    pub ty: TypeSpecifier,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
    pub access: AccessSpec,
    pub default_init: Option<NodeId>,
    pub bitfield_width: Option<u32>,
}

/// A static data member, with its initializer AST
#[derive(Debug, Clone)]
pub struct StaticMember {
    pub name: StrId,
    pub ty: TypeSpecifier,
    pub init: Option<NodeId>,
    pub is_const: bool,
    /// Folded value, when the initializer was a constant expression
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BaseClass {
    pub name: StrId,
    pub index: TypeId,
    pub access: AccessSpec,
    pub is_virtual: bool,
    /// Byte offset of the base subobject, filled by layout
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct DeferredBase {
    pub spec: TypeSpecifier,
    pub access: AccessSpec,
    pub is_virtual: bool,
    pub is_pack: bool,
}

/// One slot of the virtual function table, in slot order
#[derive(Debug, Clone)]
pub struct VtableSlot {
    pub name: StrId,
    /// Canonical parameter-type print, used to match overrides
    pub sig: ArcStr,
    /// Implementing function for this class; None for pure virtuals
    pub func: Option<NodeId>,
    pub is_pure: bool,
    /// The slot was introduced by a base marked final
    pub from_final_base: bool,
}

/// Data of an `enum` / `enum class`
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub underlying: BaseType,
    pub byte_size: u32,
    pub enumerators: Vec<Enumerator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Enumerator {
    pub name: StrId,
    pub value: i64,
}

impl StructTypeInfo {
    pub fn member(&self, name: StrId) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn static_member(&self, name: StrId) -> Option<&StaticMember> {
        self.static_members.iter().find(|m| m.name == name)
    }

    pub fn vtable_slot(&self, name: StrId, sig: &str) -> Option<usize> {
        self.vtable
            .iter()
            .position(|s| s.name == name && s.sig.as_ref() == sig)
    }
}
