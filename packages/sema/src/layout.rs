use cu::pre::*;

use crate::{SemaError, SemaResult, StructTypeInfo, TypeRegistry, VtableSlot};

/// Struct layout computation
///
/// `finalize` lays out a struct without base classes; `compute_with_bases`
/// merges base-class subobjects and vtables first, then members, then
/// virtual bases. Both leave `total_size`, `alignment` and every member
/// `offset`/`size`/`align` filled, with `total_size % alignment == 0`.

const fn round_up(v: u32, align: u32) -> u32 {
    if align <= 1 { v } else { v.div_ceil(align) * align }
}

/// Lay out a struct that has no base classes
pub fn finalize(s: &mut StructTypeInfo, reg: &TypeRegistry) -> SemaResult<()> {
    if !s.deferred_bases.is_empty() {
        return Err(SemaError::layout(
            "cannot finalize a struct with unresolved dependent bases",
        ));
    }
    if !s.bases.is_empty() {
        return compute_with_bases(s, reg);
    }
    let mut offset = 0u32;
    let mut align = 1u32;
    if s.has_vtable {
        // vptr occupies the first pointer-sized slot
        offset = reg.ptr_width;
        align = reg.ptr_width;
    }
    layout_members(s, reg, &mut offset, &mut align)?;
    finish(s, offset, align);
    Ok(())
}

/// Lay out a struct with base classes: own members first, then base
/// subobjects, then virtual bases
pub fn compute_with_bases(s: &mut StructTypeInfo, reg: &TypeRegistry) -> SemaResult<()> {
    if !s.deferred_bases.is_empty() {
        return Err(SemaError::layout(
            "cannot finalize a struct with unresolved dependent bases",
        ));
    }
    let mut offset = 0u32;
    let mut align = 1u32;

    merge_vtables(s, reg)?;

    let mut base_has_vptr = false;
    for base in &s.bases {
        if base.is_virtual {
            continue;
        }
        if let Some(info) = reg.get(base.index)
            && let Some(base_s) = &info.strukt
            && base_s.has_vtable
        {
            base_has_vptr = true;
        }
    }
    if s.has_vtable && !base_has_vptr {
        // vptr occupies the first pointer-sized slot, ahead of base
        // subobjects and members
        offset = reg.ptr_width;
        align = reg.ptr_width;
    }

    layout_members(s, reg, &mut offset, &mut align)?;

    for i in 0..s.bases.len() {
        let base = &s.bases[i];
        let info = reg.get(base.index).ok_or_else(|| {
            SemaError::layout(format!("base class t{} is not registered", base.index.0))
        })?;
        let Some(base_s) = &info.strukt else {
            return Err(SemaError::layout(format!(
                "base class '{}' is not a struct or class",
                info.index
            )));
        };
        if base_s.is_final {
            return Err(SemaError::layout(
                "cannot derive from a class marked final",
            ));
        }
        if base.is_virtual {
            continue; // laid out after the non-virtual bases
        }
        let (base_size, base_align) = (base_s.total_size, base_s.alignment.max(1));
        // empty-base optimization: an empty base takes no storage
        let empty = base_s.members.is_empty() && !base_s.has_vtable && base_s.bases.is_empty();
        align = align.max(base_align);
        if empty {
            s.bases[i].offset = offset;
        } else {
            offset = round_up(offset, base_align);
            s.bases[i].offset = offset;
            offset += base_size;
        }
    }

    for i in 0..s.bases.len() {
        if !s.bases[i].is_virtual {
            continue;
        }
        let base = &s.bases[i];
        let info = reg.get(base.index).ok_or_else(|| {
            SemaError::layout(format!("base class t{} is not registered", base.index.0))
        })?;
        let Some(base_s) = &info.strukt else {
            return Err(SemaError::layout("virtual base is not a struct or class"));
        };
        let base_align = base_s.alignment.max(1);
        align = align.max(base_align);
        offset = round_up(offset, base_align);
        s.bases[i].offset = offset;
        offset += base_s.total_size;
    }

    finish(s, offset, align);
    Ok(())
}

fn finish(s: &mut StructTypeInfo, offset: u32, align: u32) {
    s.alignment = align;
    let total = round_up(offset, align);
    // an empty class still occupies one byte
    s.total_size = total.max(1);
    s.is_abstract = s.vtable.iter().any(|slot| slot.is_pure);
}

/// Merge base-class vtables into this class's slot list. Own slots override
/// matching base slots in place; leftover own slots append in declaration
/// order.
fn merge_vtables(s: &mut StructTypeInfo, reg: &TypeRegistry) -> SemaResult<()> {
    let own = std::mem::take(&mut s.vtable);
    let mut merged: Vec<VtableSlot> = vec![];
    for base in &s.bases {
        let Some(info) = reg.get(base.index) else {
            continue;
        };
        let Some(base_s) = &info.strukt else {
            continue;
        };
        for slot in &base_s.vtable {
            if let Some(prev) = merged
                .iter()
                .find(|m| m.name == slot.name && m.sig == slot.sig)
            {
                // two bases provide the same virtual; legal only if this
                // class overrides it
                let overridden = own.iter().any(|o| o.name == slot.name && o.sig == slot.sig);
                if !overridden && prev.func != slot.func {
                    return Err(SemaError::layout(format!(
                        "conflicting virtual override for '{}' inherited from multiple bases",
                        slot.name
                    )));
                }
                continue;
            }
            merged.push(slot.clone());
        }
    }
    let mut used = vec![false; own.len()];
    for slot in merged.iter_mut() {
        if let Some(i) = own
            .iter()
            .position(|o| o.name == slot.name && o.sig == slot.sig)
        {
            slot.func = own[i].func;
            slot.is_pure = own[i].is_pure;
            used[i] = true;
        }
    }
    for (i, slot) in own.into_iter().enumerate() {
        if !used[i] {
            merged.push(slot);
        }
    }
    if !merged.is_empty() {
        s.has_vtable = true;
    }
    s.vtable = merged;
    Ok(())
}

fn layout_members(
    s: &mut StructTypeInfo,
    reg: &TypeRegistry,
    offset: &mut u32,
    align: &mut u32,
) -> SemaResult<()> {
    if s.is_union {
        let mut size = 0u32;
        for m in s.members.iter_mut() {
            let msize = reg.size_of(&m.ty)?;
            let malign = effective_align(reg.align_of(&m.ty)?, s.pack_alignment);
            m.offset = 0;
            m.size = msize;
            m.align = malign;
            size = size.max(msize);
            *align = (*align).max(malign);
        }
        *offset = (*offset).max(size);
        return Ok(());
    }

    // (unit offset, unit size in bytes, bits used)
    let mut bit_unit: Option<(u32, u32, u32)> = None;
    for m in s.members.iter_mut() {
        let msize = reg.size_of(&m.ty)?;
        let malign = effective_align(reg.align_of(&m.ty)?, s.pack_alignment);
        m.size = msize;
        m.align = malign;
        *align = (*align).max(malign);

        let Some(width) = m.bitfield_width else {
            bit_unit = None;
            *offset = round_up(*offset, malign);
            m.offset = *offset;
            *offset += msize;
            continue;
        };
        if width == 0 {
            // zero-width bitfield closes the current allocation unit
            bit_unit = None;
            m.offset = *offset;
            continue;
        }
        if width > msize * 8 {
            return Err(SemaError::layout(format!(
                "bitfield width {width} exceeds the storage unit of its type"
            )));
        }
        match &mut bit_unit {
            Some((unit_offset, unit_size, bits_used))
                if *unit_size == msize && *bits_used + width <= msize * 8 =>
            {
                m.offset = *unit_offset;
                *bits_used += width;
            }
            _ => {
                *offset = round_up(*offset, malign);
                m.offset = *offset;
                *offset += msize;
                bit_unit = Some((m.offset, msize, width));
            }
        }
    }
    Ok(())
}

fn effective_align(natural: u32, pack: Option<u32>) -> u32 {
    match pack {
        Some(p) if p > 0 => natural.min(p),
        _ => natural,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessSpec, BaseType, Member, TypeSpecifier};
    use embercc_arena::{StrId, StringTable};

    fn member(name: StrId, base: BaseType) -> Member {
        Member {
            name,
            ty: TypeSpecifier::prim(base),
            offset: 0,
            size: 0,
            align: 0,
            access: AccessSpec::Public,
            default_init: None,
            bitfield_width: None,
        }
    }

    #[test]
    fn test_padding_and_alignment() {
        let mut strings = StringTable::new();
        let reg = TypeRegistry::new();
        let mut s = StructTypeInfo::default();
        s.members.push(member(strings.intern("a"), BaseType::Char));
        s.members
            .push(member(strings.intern("b"), BaseType::Double));
        s.members.push(member(strings.intern("c"), BaseType::Int));
        finalize(&mut s, &reg).unwrap();
        assert_eq!(s.members[0].offset, 0);
        assert_eq!(s.members[1].offset, 8);
        assert_eq!(s.members[2].offset, 16);
        assert_eq!(s.alignment, 8);
        assert_eq!(s.total_size, 24);
        assert_eq!(s.total_size % s.alignment, 0);
    }

    #[test]
    fn test_union_layout() {
        let mut strings = StringTable::new();
        let reg = TypeRegistry::new();
        let mut s = StructTypeInfo {
            is_union: true,
            ..Default::default()
        };
        s.members.push(member(strings.intern("i"), BaseType::Int));
        s.members
            .push(member(strings.intern("d"), BaseType::Double));
        s.members.push(member(strings.intern("c"), BaseType::Char));
        finalize(&mut s, &reg).unwrap();
        for m in &s.members {
            assert_eq!(m.offset, 0);
        }
        assert_eq!(s.total_size, 8);
        assert_eq!(s.alignment, 8);
    }

    #[test]
    fn test_bitfield_packing() {
        let mut strings = StringTable::new();
        let reg = TypeRegistry::new();
        let mut s = StructTypeInfo::default();
        let mut a = member(strings.intern("a"), BaseType::UnsignedInt);
        a.bitfield_width = Some(3);
        let mut b = member(strings.intern("b"), BaseType::UnsignedInt);
        b.bitfield_width = Some(5);
        let mut c = member(strings.intern("c"), BaseType::UnsignedInt);
        c.bitfield_width = Some(30);
        s.members.push(a);
        s.members.push(b);
        s.members.push(c);
        finalize(&mut s, &reg).unwrap();
        // a and b share the first unit, c does not fit and opens a second
        assert_eq!(s.members[0].offset, 0);
        assert_eq!(s.members[1].offset, 0);
        assert_eq!(s.members[2].offset, 4);
        assert_eq!(s.total_size, 8);
    }

    #[test]
    fn test_pack_alignment() {
        let mut strings = StringTable::new();
        let reg = TypeRegistry::new();
        let mut s = StructTypeInfo {
            pack_alignment: Some(1),
            ..Default::default()
        };
        s.members.push(member(strings.intern("a"), BaseType::Char));
        s.members
            .push(member(strings.intern("b"), BaseType::Double));
        finalize(&mut s, &reg).unwrap();
        assert_eq!(s.members[1].offset, 1);
        assert_eq!(s.total_size, 9);
    }

    #[test]
    fn test_empty_struct_is_one_byte() {
        let reg = TypeRegistry::new();
        let mut s = StructTypeInfo::default();
        finalize(&mut s, &reg).unwrap();
        assert_eq!(s.total_size, 1);
        assert_eq!(s.alignment, 1);
    }

    #[test]
    fn test_final_base_rejected() {
        let mut strings = StringTable::new();
        let mut reg = TypeRegistry::new();
        let base_name = strings.intern("Sealed");
        let base_id = reg.add_struct(base_name);
        let mut base_s = StructTypeInfo {
            is_final: true,
            ..Default::default()
        };
        finalize(&mut base_s, &reg).unwrap();
        {
            let info = reg.get_mut(base_id).unwrap();
            info.size_bits = base_s.total_size * 8;
            info.strukt = Some(base_s);
            info.incomplete = false;
        }

        let mut derived = StructTypeInfo::default();
        derived.bases.push(crate::BaseClass {
            name: base_name,
            index: base_id,
            access: AccessSpec::Public,
            is_virtual: false,
            offset: 0,
        });
        let err = compute_with_bases(&mut derived, &reg).unwrap_err();
        assert!(matches!(err, SemaError::Layout { .. }));
    }

    #[test]
    fn test_base_subobject_layout() {
        let mut strings = StringTable::new();
        let mut reg = TypeRegistry::new();
        let base_name = strings.intern("Base");
        let base_id = reg.add_struct(base_name);
        let mut base_s = StructTypeInfo::default();
        base_s.members.push(member(strings.intern("x"), BaseType::Float));
        finalize(&mut base_s, &reg).unwrap();
        {
            let info = reg.get_mut(base_id).unwrap();
            info.size_bits = base_s.total_size * 8;
            info.strukt = Some(base_s);
            info.incomplete = false;
        }

        let mut derived = StructTypeInfo::default();
        derived.bases.push(crate::BaseClass {
            name: base_name,
            index: base_id,
            access: AccessSpec::Public,
            is_virtual: false,
            offset: 0,
        });
        derived
            .members
            .push(member(strings.intern("y"), BaseType::Int));
        compute_with_bases(&mut derived, &reg).unwrap();
        // own members come first, the base subobject follows
        assert_eq!(derived.members[0].offset, 0);
        assert_eq!(derived.bases[0].offset, 4);
        assert_eq!(derived.total_size, 8);
    }
}
