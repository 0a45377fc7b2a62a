//! VHDL type system: a specialization of the object store, building typed
//! queries over the generic arena rather than inventing a second storage
//! layer.
//!
//! Hot-path accessors here go straight at a known slot by name through
//! `Store::get_item`; they do not re-derive the schema on every call, and
//! they `expect` the slot to be present because the schema registered in
//! [`register`] is the only way a `Type` handle of a given kind is ever
//! constructed -- a missing slot at this point is a bug in this module,
//! not a user-facing condition.

pub mod parse;

use crate::object::{ArrayElem, Item, Loc, Object, Slot, Store, Tag};
use crate::ident::Ident;
use crate::arena::Handle;

pub type TypeHandle = Handle<Object>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeKind {
    Subtype,
    Integer,
    Real,
    Enum,
    Physical,
    ConstrainedArray,
    UnconstrainedArray,
    Record,
    File,
    Access,
    Func,
    Proc,
    Incomplete,
    None,
    Protected,
}

impl TypeKind {
    const ALL: [TypeKind; 15] = [
        TypeKind::Subtype,
        TypeKind::Integer,
        TypeKind::Real,
        TypeKind::Enum,
        TypeKind::Physical,
        TypeKind::ConstrainedArray,
        TypeKind::UnconstrainedArray,
        TypeKind::Record,
        TypeKind::File,
        TypeKind::Access,
        TypeKind::Func,
        TypeKind::Proc,
        TypeKind::Incomplete,
        TypeKind::None,
        TypeKind::Protected,
    ];

    pub fn as_kind(self) -> crate::object::Kind {
        crate::object::Kind(self as u16)
    }

    fn slots(self) -> &'static [Slot] {
        match self {
            TypeKind::Subtype => &[Slot::Ident, Slot::Base, Slot::Constraint, Slot::Resolution],
            TypeKind::Integer => &[Slot::Ident, Slot::Dimensions],
            TypeKind::Real => &[Slot::Ident, Slot::Dimensions],
            TypeKind::Enum => &[Slot::Ident, Slot::Fields],
            TypeKind::Physical => &[Slot::Ident, Slot::Dimensions, Slot::Fields],
            TypeKind::ConstrainedArray => &[Slot::ElementType, Slot::IndexConstraints],
            TypeKind::UnconstrainedArray => &[Slot::ElementType, Slot::IndexConstraints],
            TypeKind::Record => &[Slot::Ident, Slot::Fields],
            TypeKind::File => &[Slot::ElementType],
            TypeKind::Access => &[Slot::ElementType],
            TypeKind::Func => &[Slot::ParameterTypes, Slot::ResultType],
            TypeKind::Proc => &[Slot::ParameterTypes],
            TypeKind::Incomplete => &[Slot::Ident],
            TypeKind::None => &[],
            TypeKind::Protected => &[Slot::Ident, Slot::Fields],
        }
    }
}

/// Registers every type kind's has-map and the one standing kind-transition
/// allow-list entry (INCOMPLETE completing into a concrete kind once its
/// full declaration is seen).
pub fn register(schema: &mut crate::object::SchemaTable) {
    for kind in TypeKind::ALL {
        schema.declare(Tag::Type, kind.as_kind(), kind.slots());
    }
    for complete in [
        TypeKind::Integer,
        TypeKind::Real,
        TypeKind::Enum,
        TypeKind::Physical,
        TypeKind::ConstrainedArray,
        TypeKind::UnconstrainedArray,
        TypeKind::Record,
        TypeKind::Access,
        TypeKind::File,
        TypeKind::Protected,
    ] {
        schema.allow_transition(Tag::Type, TypeKind::Incomplete.as_kind(), complete.as_kind());
    }
}

impl Store {
    pub fn new_type(&mut self, kind: TypeKind, loc: Loc) -> TypeHandle {
        self.new_object(Tag::Type, kind.as_kind(), loc)
    }

    pub fn type_kind(&self, t: TypeHandle) -> TypeKind {
        let raw = self.get(&t).kind;
        TypeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_kind() == raw)
            .expect("type object carries an unregistered kind")
    }

    pub fn type_ident(&self, t: TypeHandle) -> Option<Ident> {
        self.get_item(&t, Slot::Ident).ok().and_then(Item::as_ident)
    }

    pub fn type_base(&self, t: TypeHandle) -> Option<TypeHandle> {
        self.get_item(&t, Slot::Base).ok().and_then(Item::as_ref)
    }

    pub fn type_element(&self, t: TypeHandle) -> Option<TypeHandle> {
        self.get_item(&t, Slot::ElementType).ok().and_then(Item::as_ref)
    }

    pub fn type_result(&self, t: TypeHandle) -> Option<TypeHandle> {
        self.get_item(&t, Slot::ResultType).ok().and_then(Item::as_ref)
    }

    pub fn type_fields(&self, t: TypeHandle) -> &[ArrayElem] {
        self.get_item(&t, Slot::Fields)
            .ok()
            .and_then(Item::as_array)
            .unwrap_or(&[])
    }

    pub fn type_parameters(&self, t: TypeHandle) -> &[ArrayElem] {
        self.get_item(&t, Slot::ParameterTypes)
            .ok()
            .and_then(Item::as_array)
            .unwrap_or(&[])
    }

    pub fn type_index_constraints(&self, t: TypeHandle) -> &[ArrayElem] {
        self.get_item(&t, Slot::IndexConstraints)
            .ok()
            .and_then(Item::as_array)
            .unwrap_or(&[])
    }

    /// Follows `base` through subtype chains to the first non-subtype kind,
    /// as required by strict/liberal equality and every predicate below.
    pub fn base_kind_of(&self, t: TypeHandle) -> (TypeHandle, TypeKind) {
        let mut cur = t;
        loop {
            let kind = self.type_kind(cur);
            if kind != TypeKind::Subtype {
                return (cur, kind);
            }
            match self.type_base(cur) {
                Some(next) => cur = next,
                None => return (cur, kind),
            }
        }
    }

    pub fn is_array(&self, t: TypeHandle) -> bool {
        matches!(
            self.base_kind_of(t).1,
            TypeKind::ConstrainedArray | TypeKind::UnconstrainedArray
        )
    }

    pub fn is_record(&self, t: TypeHandle) -> bool {
        self.base_kind_of(t).1 == TypeKind::Record
    }

    pub fn is_scalar(&self, t: TypeHandle) -> bool {
        matches!(
            self.base_kind_of(t).1,
            TypeKind::Integer | TypeKind::Real | TypeKind::Enum | TypeKind::Physical
        )
    }

    pub fn is_discrete(&self, t: TypeHandle) -> bool {
        matches!(self.base_kind_of(t).1, TypeKind::Integer | TypeKind::Enum)
    }

    pub fn is_universal(&self, t: TypeHandle) -> bool {
        match self.type_ident(self.base_kind_of(t).0) {
            Some(ident) => {
                ident.as_str() == "universal_integer" || ident.as_str() == "universal_real"
            }
            None => false,
        }
    }

    pub fn is_unconstrained(&self, t: TypeHandle) -> bool {
        self.base_kind_of(t).1 == TypeKind::UnconstrainedArray
    }

    pub fn is_composite(&self, t: TypeHandle) -> bool {
        self.is_array(t) || self.is_record(t)
    }

    /// Strict equality: same kind, same identifier when both
    /// have one, structural equality of items.
    pub fn type_strict_eq(&self, a: TypeHandle, b: TypeHandle) -> bool {
        if a == b {
            return true;
        }
        let obj_a = self.get(&a);
        let obj_b = self.get(&b);
        if obj_a.kind != obj_b.kind {
            return false;
        }

        let ident_a = self.type_ident(a);
        let ident_b = self.type_ident(b);
        if ident_a.is_some() || ident_b.is_some() {
            if ident_a != ident_b {
                return false;
            }
        }

        match TypeKind::ALL.iter().copied().find(|k| k.as_kind() == obj_a.kind) {
            Some(TypeKind::Subtype) => {
                self.type_base(a)
                    .zip(self.type_base(b))
                    .map(|(ba, bb)| self.type_strict_eq(ba, bb))
                    .unwrap_or(false)
            }
            Some(TypeKind::ConstrainedArray) | Some(TypeKind::UnconstrainedArray) => self
                .type_element(a)
                .zip(self.type_element(b))
                .map(|(ea, eb)| self.type_strict_eq(ea, eb))
                .unwrap_or(false),
            Some(TypeKind::Func) => {
                let ra = self.type_result(a);
                let rb = self.type_result(b);
                ra.zip(rb).map(|(x, y)| self.type_strict_eq(x, y)).unwrap_or(ra == rb)
            }
            _ => true,
        }
    }

    /// Liberal equality: subtype chains collapse to their base;
    /// constrained/unconstrained array pairs compare by element type alone;
    /// INCOMPLETE equals any completing kind; otherwise defers to strict.
    pub fn type_eq(&self, a: TypeHandle, b: TypeHandle) -> bool {
        let (base_a, kind_a) = self.base_kind_of(a);
        let (base_b, kind_b) = self.base_kind_of(b);

        if kind_a == TypeKind::Incomplete || kind_b == TypeKind::Incomplete {
            return true;
        }

        if matches!(kind_a, TypeKind::ConstrainedArray | TypeKind::UnconstrainedArray)
            && matches!(kind_b, TypeKind::ConstrainedArray | TypeKind::UnconstrainedArray)
        {
            return self
                .type_element(base_a)
                .zip(self.type_element(base_b))
                .map(|(ea, eb)| self.type_eq(ea, eb))
                .unwrap_or(false);
        }

        self.type_strict_eq(base_a, base_b)
    }

    /// Implicit coercion is allowed only from a universal integer/real to a
    /// non-universal type of the same family.
    pub fn is_convertible(&self, from: TypeHandle, to: TypeHandle) -> bool {
        if self.type_eq(from, to) {
            return true;
        }
        if !self.is_universal(from) || self.is_universal(to) {
            return false;
        }
        let from_kind = self.base_kind_of(from).1;
        let to_kind = self.base_kind_of(to).1;
        matches!(
            (from_kind, to_kind),
            (TypeKind::Integer, TypeKind::Integer) | (TypeKind::Real, TypeKind::Real)
        )
    }

    /// `name [p1, p2 … return r]` for subprograms, otherwise the final
    /// dotted component of the name. `peer`, if given, forces
    /// the fully qualified name when the short form would collide.
    pub fn pretty_print(&self, t: TypeHandle, peer: Option<TypeHandle>) -> String {
        let kind = self.type_kind(t);
        if kind == TypeKind::Func || kind == TypeKind::Proc {
            let params: Vec<String> = self
                .type_parameters(t)
                .iter()
                .filter_map(|p| match p {
                    ArrayElem::Obj(h) => Some(self.pretty_print(*h, None)),
                    _ => None,
                })
                .collect();
            let name = self
                .type_ident(t)
                .map(|i| i.as_str().to_string())
                .unwrap_or_else(|| "<anonymous>".to_string());
            return match self.type_result(t) {
                Some(r) => format!("{} [{} return {}]", name, params.join(", "), self.pretty_print(r, None)),
                None => format!("{} [{}]", name, params.join(", ")),
            };
        }

        let full = self
            .type_ident(t)
            .map(|i| i.as_str().to_string())
            .unwrap_or_else(|| "<anonymous>".to_string());
        let short = full.rsplit('.').next().unwrap_or(&full).to_string();

        let collides = peer
            .and_then(|p| self.type_ident(p))
            .map(|peer_ident| {
                let peer_short = peer_ident.as_str().rsplit('.').next().unwrap_or(peer_ident.as_str());
                peer_short == short && peer_ident.as_str() != full
            })
            .unwrap_or(false);

        if collides {
            full
        } else {
            short
        }
    }
}
