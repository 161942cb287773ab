use cu::pre::*;
use embercc_arena::{ArcStr, Pool, StrId};
use fxhash::FxHashMap;

use crate::{BaseType, NodeId, SemaError, SemaResult, TypeId, TypeInfo, TypeSpecifier};

/// Instantiation cache key: interned template name + canonical argument print
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstKey {
    pub name: StrId,
    pub args_key: ArcStr,
}

impl InstKey {
    pub fn new(name: StrId, args_key: impl Into<ArcStr>) -> Self {
        Self {
            name,
            args_key: args_key.into(),
        }
    }
}

/// Lifecycle of one instantiation key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstState {
    /// Materialization started; the TypeId is the pre-registered slot so
    /// recursive references (CRTP) can resolve to it
    InProgress(TypeId),
    /// Class template: fully registered type
    CompleteType(TypeId),
    /// Function template: declaration with a computed mangled name
    CompleteNode(NodeId),
}

/// Snapshot for rolling back speculative registrations (SFINAE trials)
#[derive(Debug, Clone, Copy)]
pub struct RegistryMark {
    infos: usize,
    names: usize,
    cache: usize,
}

/// Owns every TypeInfo of the compilation plus the instantiation cache
///
/// Append-only: handles never invalidate. The journal exists solely so a
/// discarded SFINAE trial can remove the types it speculatively created.
pub struct TypeRegistry {
    infos: Pool<TypeInfo>,
    by_name: FxHashMap<StrId, TypeId>,
    name_journal: Vec<StrId>,
    inst_cache: FxHashMap<InstKey, InstState>,
    cache_journal: Vec<InstKey>,
    pub ptr_width: u32,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self {
            infos: Pool::default(),
            by_name: FxHashMap::default(),
            name_journal: vec![],
            inst_cache: FxHashMap::default(),
            cache_journal: vec![],
            ptr_width: 8,
        }
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Create an empty struct TypeInfo bound to `name`
    pub fn add_struct(&mut self, name: StrId) -> TypeId {
        self.add_named(name, BaseType::Struct)
    }

    /// Create an empty TypeInfo bound to `name`. The binding is journaled
    /// for speculative rollback.
    pub fn add_named(&mut self, name: StrId, base: BaseType) -> TypeId {
        let index = TypeId(self.infos.len() as u32);
        self.infos.push(TypeInfo::new(name, base, index));
        if name.is_valid() {
            self.by_name.insert(name, index);
            self.name_journal.push(name);
        }
        index
    }

    /// Bind an additional name (alias) to an existing type
    pub fn add_alias(&mut self, name: StrId, index: TypeId) {
        self.by_name.insert(name, index);
        self.name_journal.push(name);
    }

    pub fn lookup(&self, name: StrId) -> Option<TypeId> {
        self.by_name.get(&name).copied()
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeInfo> {
        self.infos.get(id.0)
    }

    pub fn get_mut(&mut self, id: TypeId) -> Option<&mut TypeInfo> {
        self.infos.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.infos.iter()
    }

    // -- instantiation cache ------------------------------------------------

    pub fn cache_get(&self, key: &InstKey) -> Option<InstState> {
        self.inst_cache.get(key).copied()
    }

    pub fn cache_put(&mut self, key: InstKey, state: InstState) {
        self.cache_journal.push(key.clone());
        self.inst_cache.insert(key, state);
    }

    pub fn cache_remove(&mut self, key: &InstKey) {
        self.inst_cache.remove(key);
    }

    /// Completed instantiation counts: (class templates, function templates)
    pub fn cache_counts(&self) -> (usize, usize) {
        let mut types = 0;
        let mut nodes = 0;
        for state in self.inst_cache.values() {
            match state {
                InstState::CompleteType(_) => types += 1,
                InstState::CompleteNode(_) => nodes += 1,
                InstState::InProgress(_) => {}
            }
        }
        (types, nodes)
    }

    // -- speculation --------------------------------------------------------

    pub fn mark(&mut self) -> RegistryMark {
        RegistryMark {
            infos: self.infos.len(),
            names: self.name_journal.len(),
            cache: self.cache_journal.len(),
        }
    }

    /// Remove everything registered since `mark`. Only valid while no
    /// handle from the rolled-back range has escaped the trial.
    pub fn rollback(&mut self, mark: RegistryMark) {
        for name in self.name_journal.drain(mark.names..) {
            if let Some(id) = self.by_name.get(&name)
                && id.0 as usize >= mark.infos
            {
                self.by_name.remove(&name);
            }
        }
        for key in self.cache_journal.drain(mark.cache..) {
            self.inst_cache.remove(&key);
        }
        self.infos.truncate(mark.infos);
    }

    // -- sizing -------------------------------------------------------------

    /// Size in bytes of one value of this type use
    pub fn size_of(&self, spec: &TypeSpecifier) -> SemaResult<u32> {
        // references and pointers are address-sized storage
        if spec.is_reference() && !spec.is_array {
            return Ok(self.ptr_width);
        }
        if spec.is_array {
            let elem = {
                let mut e = spec.clone();
                e.is_array = false;
                e.array_len = None;
                e.ref_qual = crate::RefQual::None;
                e
            };
            let elem_size = self.size_of(&elem)?;
            let len = spec.array_len.unwrap_or(0) as u32;
            return Ok(elem_size * len);
        }
        if spec.is_pointer() {
            return Ok(self.ptr_width);
        }
        if let Some(b) = spec.base.byte_size() {
            return Ok(b);
        }
        if spec.base.is_user_defined() {
            let info = self
                .get(spec.index)
                .ok_or_else(|| SemaError::subst("type use with unregistered index"))?;
            if !info.is_complete() {
                return Err(SemaError::subst(format!(
                    "size of incomplete type t{}",
                    spec.index.0
                )));
            }
            return Ok(info.size_bits / 8);
        }
        Err(SemaError::subst(format!(
            "type {:?} has no size",
            spec.base
        )))
    }

    /// Alignment in bytes of one value of this type use
    pub fn align_of(&self, spec: &TypeSpecifier) -> SemaResult<u32> {
        if (spec.is_reference() && !spec.is_array) || spec.is_pointer() {
            return Ok(self.ptr_width);
        }
        if spec.is_array {
            let mut e = spec.clone();
            e.is_array = false;
            e.array_len = None;
            return self.align_of(&e);
        }
        if let Some(b) = spec.base.byte_size() {
            return Ok(b.min(16));
        }
        if spec.base.is_user_defined() {
            let info = self
                .get(spec.index)
                .ok_or_else(|| SemaError::subst("type use with unregistered index"))?;
            if let Some(s) = &info.strukt {
                return Ok(s.alignment.max(1));
            }
            if let Some(e) = &info.enum_info {
                return Ok(e.byte_size.max(1));
            }
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercc_arena::StringTable;

    #[test]
    fn test_add_and_lookup() {
        let mut strings = StringTable::new();
        let mut reg = TypeRegistry::new();
        let name = strings.intern("Widget");
        let id = reg.add_struct(name);
        assert_eq!(reg.lookup(name), Some(id));
        assert_eq!(reg.get(id).unwrap().index, id);
        assert!(reg.get(id).unwrap().incomplete);
    }

    #[test]
    fn test_rollback_removes_speculative_types() {
        let mut strings = StringTable::new();
        let mut reg = TypeRegistry::new();
        let keep = strings.intern("Keep");
        let keep_id = reg.add_struct(keep);

        let mark = reg.mark();
        let spec = strings.intern("Speculative");
        reg.add_struct(spec);
        reg.cache_put(
            InstKey::new(spec, "Speculative<int>"),
            InstState::InProgress(TypeId(1)),
        );
        reg.rollback(mark);

        assert_eq!(reg.lookup(keep), Some(keep_id));
        assert_eq!(reg.lookup(spec), None);
        assert_eq!(reg.len(), 1);
        assert!(
            reg.cache_get(&InstKey::new(spec, "Speculative<int>"))
                .is_none()
        );
    }

    #[test]
    fn test_size_of_builtins() {
        let reg = TypeRegistry::new();
        let int_t = TypeSpecifier::prim(BaseType::Int);
        assert_eq!(reg.size_of(&int_t).unwrap(), 4);
        let mut ptr = TypeSpecifier::prim(BaseType::Char);
        ptr.ptr.push(crate::Cv::NONE);
        assert_eq!(reg.size_of(&ptr).unwrap(), 8);
        let mut arr = TypeSpecifier::prim(BaseType::Short);
        arr.is_array = true;
        arr.array_len = Some(5);
        assert_eq!(reg.size_of(&arr).unwrap(), 10);
        assert_eq!(reg.align_of(&arr).unwrap(), 2);
    }
}
