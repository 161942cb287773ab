use cu::pre::*;
use fxhash::FxHashMap;

/// Dense index of an AST node in the node arena
#[rustfmt::skip]
#[derive(DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("n{}", self.0)]
#[debug("n{}", self.0)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: Self = Self(u32::MAX);

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

/// Dense index of a TypeInfo in the type registry
#[rustfmt::skip]
#[derive(DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("t{}", self.0)]
#[debug("t{}", self.0)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const INVALID: Self = Self(u32::MAX);

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

pub type TypeIdMap<T> = FxHashMap<TypeId, T>;
