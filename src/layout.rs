//! Layout computation: size, alignment and part classes for a type,
//! memoized behind a cache keyed by a derived key, populated lazily and
//! referentially stable once populated -- backed by
//! [`crate::hash::U64Map`] rather than a `TypeId`-keyed `Rc<dyn Any>`
//! table, since the key space here is a known `u64`, not an arbitrary
//! Rust type.
//!
//! Open question resolution: the source carries two divergent
//! `layout_of` implementations for subtypes of an unconstrained array, one
//! returning the base's layout and one materializing a separate
//! unconstrained layout. This module picks the former -- a subtype's
//! layout is always its base's layout with a possibly tighter constraint
//! recorded separately by the elaborator -- since it is simpler and keeps
//! exactly one layout shape per base kind. See `DESIGN.md`.

use crate::arena::Handle;
use crate::hash::U64Map;
use crate::object::{ArrayElem, Object, Store};
use crate::types::TypeHandle;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PartClass {
    Data,
    Bounds,
    Offset,
    External,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Part {
    pub offset: u32,
    pub size: u32,
    pub repeat: u32,
    pub align: u32,
    pub class: PartClass,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
    pub parts: Vec<Part>,
}

impl Layout {
    fn from_parts(parts: Vec<Part>, align: u32) -> Self {
        let size = parts
            .iter()
            .map(|p| p.offset + p.size * p.repeat)
            .max()
            .unwrap_or(0);
        Layout { size, align, parts }
    }
}

const POINTER_SIZE: u32 = 8;
const POINTER_ALIGN: u32 = 8;

/// Number of bits needed to represent every value in `[lo, hi]`.
fn bits_for_range(lo: i64, hi: i64) -> u32 {
    let count = (hi.wrapping_sub(lo)).unsigned_abs().wrapping_add(1).max(1);
    if count <= 1 {
        1
    } else {
        64 - (count - 1).leading_zeros()
    }
}

fn range_of(store: &Store, t: TypeHandle) -> Option<(i64, i64)> {
    store
        .get_item(&t, crate::object::Slot::Dimensions)
        .ok()
        .and_then(|item| item.as_array())
        .and_then(|elems| elems.first())
        .and_then(|elem| match elem {
            ArrayElem::Range(r) => Some((r.low, r.high)),
            _ => None,
        })
}

fn index_count(store: &Store, t: TypeHandle) -> Option<u32> {
    let mut total: u64 = 1;
    for elem in store.type_index_constraints(t) {
        match elem {
            ArrayElem::Range(r) => {
                let n = (r.high - r.low + 1).max(0) as u64;
                total = total.saturating_mul(n);
            }
            _ => return None,
        }
    }
    Some(total as u32)
}

fn cache_key(handle: Handle<Object>, signal: bool) -> u64 {
    let arena = handle.arena().generation() as u64;
    let index = handle.index() as u64;
    (arena << 33) | (index << 1) | (signal as u64)
}

pub struct LayoutCache {
    cache: U64Map<Layout>,
}

impl LayoutCache {
    pub fn new() -> Self {
        LayoutCache { cache: U64Map::new() }
    }

    pub fn layout_of(&mut self, store: &Store, t: TypeHandle) -> Layout {
        let key = cache_key(t, false);
        if let Some(cached) = self.cache.get(key) {
            return cached.clone();
        }
        let layout = compute_layout(store, t, self, false);
        self.cache.insert(key, layout.clone());
        layout
    }

    pub fn signal_layout_of(&mut self, store: &Store, t: TypeHandle) -> Layout {
        let key = cache_key(t, true);
        if let Some(cached) = self.cache.get(key) {
            return cached.clone();
        }
        let layout = compute_layout(store, t, self, true);
        self.cache.insert(key, layout.clone());
        layout
    }
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_layout(store: &Store, t: TypeHandle, cache: &mut LayoutCache, signal: bool) -> Layout {
    use crate::types::TypeKind::*;

    let (base, kind) = store.base_kind_of(t);

    let data_layout = match kind {
        Integer | Physical => {
            let (lo, hi) = range_of(store, base).unwrap_or((0, 0));
            let size = ((bits_for_range(lo, hi) + 7) / 8).max(1);
            let align = size.next_power_of_two();
            Layout::from_parts(
                vec![Part { offset: 0, size, repeat: 1, align, class: PartClass::Data }],
                align,
            )
        }
        Enum => {
            // Enum has no Dimensions slot (its extent is its literal count,
            // not a bounded range); derive the bit width straight from
            // Fields instead.
            let n_literals = store.type_fields(base).len().max(1) as i64;
            let size = ((bits_for_range(0, n_literals - 1) + 7) / 8).max(1);
            let align = size.next_power_of_two();
            Layout::from_parts(
                vec![Part { offset: 0, size, repeat: 1, align, class: PartClass::Data }],
                align,
            )
        }
        Real => Layout::from_parts(
            vec![Part { offset: 0, size: 8, repeat: 1, align: 8, class: PartClass::Data }],
            8,
        ),
        ConstrainedArray => {
            let elem = store
                .type_element(base)
                .expect("constrained array type missing element_type");
            let elem_layout = cache.layout_of(store, elem);
            let count = index_count(store, base).unwrap_or(0);
            Layout::from_parts(
                vec![Part {
                    offset: 0,
                    size: elem_layout.size,
                    repeat: count,
                    align: elem_layout.align,
                    class: PartClass::Data,
                }],
                elem_layout.align,
            )
        }
        UnconstrainedArray => {
            let ndims = store.type_index_constraints(base).len().max(1) as u32;
            Layout::from_parts(
                vec![
                    Part {
                        offset: 0,
                        size: POINTER_SIZE,
                        repeat: 1,
                        align: POINTER_ALIGN,
                        class: PartClass::External,
                    },
                    Part {
                        offset: POINTER_SIZE,
                        size: 8,
                        repeat: 2 * ndims,
                        align: 8,
                        class: PartClass::Bounds,
                    },
                ],
                POINTER_ALIGN,
            )
        }
        Record => {
            let mut parts = Vec::new();
            let mut offset = 0u32;
            for field in store.type_fields(base) {
                if let ArrayElem::Param(p) = field {
                    let field_layout = cache.layout_of(store, p.ty);
                    offset = round_up(offset, field_layout.align);
                    parts.push(Part {
                        offset,
                        size: field_layout.size,
                        repeat: 1,
                        align: field_layout.align,
                        class: PartClass::Data,
                    });
                    offset += field_layout.size;
                }
            }
            Layout::from_parts(parts, POINTER_ALIGN)
        }
        File | Access => Layout::from_parts(
            vec![Part {
                offset: 0,
                size: POINTER_SIZE,
                repeat: 1,
                align: POINTER_ALIGN,
                class: PartClass::External,
            }],
            POINTER_ALIGN,
        ),
        _ => Layout::from_parts(Vec::new(), 1),
    };

    if !signal {
        return data_layout;
    }

    let homogeneous = matches!(kind, Integer | Enum | Physical | Real | ConstrainedArray | UnconstrainedArray);
    let mut parts = vec![Part {
        offset: 0,
        size: POINTER_SIZE,
        repeat: 1,
        align: POINTER_ALIGN,
        class: PartClass::External,
    }];
    if homogeneous {
        parts.push(Part {
            offset: POINTER_SIZE,
            size: 8,
            repeat: 1,
            align: 8,
            class: PartClass::Offset,
        });
    }
    Layout::from_parts(parts, POINTER_ALIGN)
}

fn round_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ArrayElem, Item, Loc, Range, SchemaTable, Slot};
    use crate::types::{self, TypeKind};

    fn store() -> Store {
        let mut schema = SchemaTable::new();
        types::register(&mut schema);
        Store::new(schema)
    }

    #[test]
    fn scalar_layout_size_covers_range() {
        let mut store = store();
        let t = store.new_type(TypeKind::Integer, Loc::default());
        store
            .set_item(&t, Slot::Dimensions, Item::Array(vec![ArrayElem::Range(Range {
                low: 0,
                high: 255,
                ascending: true,
            })]))
            .unwrap();

        let mut cache = LayoutCache::new();
        let layout = cache.layout_of(&store, t);
        assert_eq!(layout.size, 1);
        for part in &layout.parts {
            assert_eq!(part.offset % part.align, 0);
        }
    }

    #[test]
    fn enum_layout_size_covers_literal_count() {
        let mut store = store();
        let small = store.new_type(TypeKind::Enum, Loc::default());
        let literals: Vec<ArrayElem> = (0..9).map(|i| ArrayElem::Ident(crate::ident::intern(&format!("l{i}")))).collect();
        store.set_item(&small, Slot::Fields, Item::Array(literals)).unwrap();

        let mut cache = LayoutCache::new();
        assert_eq!(cache.layout_of(&store, small).size, 1);

        let mut store2 = store();
        let big = store2.new_type(TypeKind::Enum, Loc::default());
        let literals: Vec<ArrayElem> = (0..300).map(|i| ArrayElem::Ident(crate::ident::intern(&format!("l{i}")))).collect();
        store2.set_item(&big, Slot::Fields, Item::Array(literals)).unwrap();

        let mut cache2 = LayoutCache::new();
        assert_eq!(cache2.layout_of(&store2, big).size, 2);
    }

    #[test]
    fn layout_is_referentially_stable_across_calls() {
        let mut store = store();
        let t = store.new_type(TypeKind::Real, Loc::default());
        let mut cache = LayoutCache::new();
        let a = cache.layout_of(&store, t);
        let b = cache.layout_of(&store, t);
        assert_eq!(a, b);
    }

    #[test]
    fn unconstrained_array_gets_pointer_and_bounds_parts() {
        let mut store = store();
        let elem = store.new_type(TypeKind::Integer, Loc::default());
        store
            .set_item(&elem, Slot::Dimensions, Item::Array(vec![ArrayElem::Range(Range {
                low: 0,
                high: 1,
                ascending: true,
            })]))
            .unwrap();
        let array = store.new_type(TypeKind::UnconstrainedArray, Loc::default());
        store.set_item(&array, Slot::ElementType, Item::Ref(elem)).unwrap();

        let mut cache = LayoutCache::new();
        let layout = cache.layout_of(&store, array);
        assert_eq!(layout.parts.len(), 2);
        assert_eq!(layout.parts[0].class, PartClass::External);
        assert_eq!(layout.parts[1].class, PartClass::Bounds);
    }

    #[test]
    fn signal_layout_replaces_data_with_pointer_plus_offset() {
        let mut store = store();
        let t = store.new_type(TypeKind::Integer, Loc::default());
        store
            .set_item(&t, Slot::Dimensions, Item::Array(vec![ArrayElem::Range(Range {
                low: 0,
                high: 7,
                ascending: true,
            })]))
            .unwrap();

        let mut cache = LayoutCache::new();
        let layout = cache.signal_layout_of(&store, t);
        assert_eq!(layout.parts[0].class, PartClass::External);
        assert_eq!(layout.parts[1].class, PartClass::Offset);
    }

    #[test]
    fn every_part_size_sum_is_covered_by_total_size() {
        let mut store = store();
        let t = store.new_type(TypeKind::Real, Loc::default());
        let mut cache = LayoutCache::new();
        let layout = cache.layout_of(&store, t);
        let total: u32 = layout.parts.iter().map(|p| p.size * p.repeat).sum();
        assert!(layout.size >= total);
    }
}
