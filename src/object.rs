//! The universal tagged object store.
//!
//! Every tree, type and IR unit header is a [`Object`]: a `(tag, kind, loc)`
//! triple plus a fixed-shape set of *items*. Which item slots are legal for
//! a given `(tag, kind)` pair is declared once, in [`schema_of`]; mutating a
//! slot the schema does not list fails with [`SchemaError`] rather than
//! panicking, refusing to set an undeclared bit rather than accepting it
//! silently.
//!
//! Hot-path consumers (the type system in `types`, the AST in `tree`) do not
//! go through the dynamic `get_item`/`set_item` API at all: they hold a
//! `Handle<Object>` and index `items` positionally through typed wrapper
//! methods that know their own schema at compile time. The dynamic API
//! here exists for the things that must walk an object irrespective of its
//! kind: the serializer and the garbage collector's mark phase.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};

use crate::arena::{ArenaId, ArenaSet, Handle};
use crate::ident::{self, Ident};

/// Which of the four domains an object belongs to. Used by the serializer
/// to pick a decoder and by the GC to enumerate roots per-domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tag {
    Tree,
    Type,
    IrUnit,
    Runtime,
}

/// A domain-specific schema selector. Low byte distinguishes which `Tag`'s
/// numbering space it belongs to so that a `(Tag, Kind)` pair is always
/// looked up against the right schema table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Kind(pub u16);

/// Source location: file id, line, column, length. `file_id` indexes into
/// the library manager's filename table (see `library::FileTable`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Loc {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

impl fmt::Debug for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}:{}+{}", self.file_id, self.line, self.column, self.length)
    }
}

/// Stable names for item slots. The *set* that is legal for a given
/// `(Tag, Kind)` is declared in `schema_of`; `items` on an `Object` are
/// stored positionally in the order its schema lists them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Slot {
    Ident,
    Base,
    Dimensions,
    ElementType,
    IndexConstraints,
    Fields,
    ParameterTypes,
    ResultType,
    Resolution,
    Constraint,
    // Tree-domain slots.
    Target,
    Value,
    Operands,
    Decls,
    Stmts,
    Generics,
    Ports,
    Type,
}

/// A homogeneous array element: one of "object | identifier | range |
/// parameter", per the item kind spec.md allows for array slots.
#[derive(Clone, PartialEq, Debug)]
pub enum ArrayElem {
    Obj(Handle<Object>),
    Ident(Ident),
    Range(Range),
    Param(Parameter),
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Range {
    pub low: i64,
    pub high: i64,
    pub ascending: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Parameter {
    pub name: Ident,
    pub ty: Handle<Object>,
}

/// The value held by one item slot.
#[derive(Clone, PartialEq, Debug)]
pub enum Item {
    None,
    Int(i32),
    Int64(i64),
    Real(f64),
    Ident(Ident),
    Ref(Handle<Object>),
    Text(String),
    Array(Vec<ArrayElem>),
}

impl Item {
    pub fn as_ref(&self) -> Option<Handle<Object>> {
        match self {
            Item::Ref(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_ident(&self) -> Option<Ident> {
        match self {
            Item::Ident(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Item::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ArrayElem]> {
        match self {
            Item::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// The universal node. See module docs.
pub struct Object {
    pub tag: Tag,
    pub kind: Kind,
    pub loc: Loc,
    items: Vec<Item>,
}

impl Object {
    /// Positional access used by typed domain wrappers that already know
    /// their own schema; does not consult the has-map, matching the
    /// "avoid runtime does-this-kind-have-it lookups in hot paths" design
    /// guidance.
    pub fn item(&self, slot_index: usize) -> &Item {
        &self.items[slot_index]
    }

    pub fn set_item_at(&mut self, slot_index: usize, value: Item) {
        self.items[slot_index] = value;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SchemaError {
    /// The slot is not in the has-map for this object's `(tag, kind)`.
    SlotNotDeclared { tag: Tag, kind: Kind, slot: Slot },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::SlotNotDeclared { tag, kind, slot } => write!(
                f,
                "slot {:?} is not declared for {:?} kind {:?}",
                slot, tag, kind
            ),
        }
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug, PartialEq, Eq)]
pub struct KindTransitionError {
    pub tag: Tag,
    pub from: Kind,
    pub to: Kind,
}

impl fmt::Display for KindTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal kind transition for {:?}: {:?} -> {:?}",
            self.tag, self.from, self.to
        )
    }
}

impl std::error::Error for KindTransitionError {}

/// The has-map: which slots, in which order, are legal for a `(tag, kind)`
/// pair. Schemas are registered once by each domain module (`types::mod`,
/// `tree`, `ir`) during `Store::new`; this keeps the table itself generic
/// while letting each domain own the list of kinds it defines.
pub struct SchemaTable {
    slots: HashMap<(Tag, Kind), Vec<Slot>>,
    /// Declared allow-list of `(tag, from_kind) -> to_kind` transitions,
    /// e.g. INCOMPLETE -> INTEGER for a type that gets completed once its
    /// full declaration is seen.
    transitions: HashMap<(Tag, Kind), Vec<Kind>>,
}

impl SchemaTable {
    pub fn new() -> Self {
        SchemaTable {
            slots: HashMap::new(),
            transitions: HashMap::new(),
        }
    }

    pub fn declare(&mut self, tag: Tag, kind: Kind, slots: &[Slot]) {
        self.slots.insert((tag, kind), slots.to_vec());
    }

    pub fn allow_transition(&mut self, tag: Tag, from: Kind, to: Kind) {
        self.transitions.entry((tag, from)).or_default().push(to);
    }

    fn slots_for(&self, tag: Tag, kind: Kind) -> Option<&[Slot]> {
        self.slots.get(&(tag, kind)).map(|v| v.as_slice())
    }

    /// A stable digest of the whole table, used as the "schema digest" in
    /// the persisted library format: if a unit was serialized
    /// under a different schema, the digest will not match on load and
    /// `StaleUnitError` is raised instead of silently misinterpreting bytes.
    pub fn digest(&self) -> u64 {
        let mut entries: Vec<_> = self.slots.iter().collect();
        entries.sort_by_key(|((tag, kind), _)| (format!("{:?}", tag), kind.0));

        let mut hash: u64 = 0xcbf29ce484222325; // FNV offset basis
        for ((tag, kind), slots) in entries {
            for byte in format!("{:?}{}", tag, kind.0).bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            for slot in slots {
                for byte in format!("{:?}", slot).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
            }
        }
        hash
    }
}

impl Default for SchemaTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks an object's reachable references without knowing its concrete
/// domain type. Implemented by the serializer and by the GC mark phase.
pub trait Visitor {
    fn visit_ref(&mut self, referenced: Handle<Object>);
    fn visit_ident(&mut self, _ident: Ident) {}
}

/// The arena set of `Object`s plus the has-map schema and pinned GC roots.
/// One `Store` backs an entire `Session`: every tree, type and IR unit
/// header allocated during analysis, elaboration and simulation setup lives
/// here.
pub struct Store {
    arenas: ArenaSet<Object>,
    schema: SchemaTable,
}

impl Store {
    pub fn new(schema: SchemaTable) -> Self {
        let mut arenas = ArenaSet::new();
        arenas.new_arena();
        Store { arenas, schema }
    }

    pub fn schema(&self) -> &SchemaTable {
        &self.schema
    }

    pub fn new_arena(&mut self) -> ArenaId {
        self.arenas.new_arena()
    }

    pub fn freeze(&mut self, arena: ArenaId) {
        self.arenas.freeze(arena);
    }

    pub fn is_frozen(&self, arena: ArenaId) -> bool {
        self.arenas.is_frozen(arena)
    }

    /// `new(tag, kind)`: allocates an object with every declared slot
    /// defaulted to `Item::None`.
    pub fn new_object(&mut self, tag: Tag, kind: Kind, loc: Loc) -> Handle<Object> {
        let n_slots = self.schema.slots_for(tag, kind).map(|s| s.len()).unwrap_or(0);
        self.arenas.alloc(Object {
            tag,
            kind,
            loc,
            items: vec![Item::None; n_slots],
        })
    }

    pub fn get(&self, handle: &Handle<Object>) -> &Object {
        self.arenas.get(handle)
    }

    fn slot_index(&self, obj: &Object, slot: Slot) -> Result<usize, SchemaError> {
        self.schema
            .slots_for(obj.tag, obj.kind)
            .and_then(|slots| slots.iter().position(|s| *s == slot))
            .ok_or(SchemaError::SlotNotDeclared {
                tag: obj.tag,
                kind: obj.kind,
                slot,
            })
    }

    pub fn get_item(&self, handle: &Handle<Object>, slot: Slot) -> Result<&Item, SchemaError> {
        let obj = self.arenas.get(handle);
        let idx = self.slot_index(obj, slot)?;
        Ok(&obj.items[idx])
    }

    pub fn set_item(
        &mut self,
        handle: &Handle<Object>,
        slot: Slot,
        value: Item,
    ) -> Result<(), SchemaError> {
        let obj = self.arenas.get(handle);
        let idx = self.slot_index(obj, slot)?;
        if let Some(obj) = self.arenas.get_mut(handle) {
            obj.items[idx] = value;
        }
        Ok(())
    }

    /// Transitions `handle`'s kind along the schema's declared allow-list,
    /// resizing `items` to the new schema (slots with matching names keep
    /// their old position's value; new slots default to `Item::None`).
    pub fn transition_kind(
        &mut self,
        handle: &Handle<Object>,
        to: Kind,
    ) -> Result<(), KindTransitionError> {
        let (tag, from) = {
            let obj = self.arenas.get(handle);
            (obj.tag, obj.kind)
        };

        let allowed = self
            .schema
            .transitions
            .get(&(tag, from))
            .map(|v| v.contains(&to))
            .unwrap_or(false);

        if !allowed {
            return Err(KindTransitionError { tag, from, to });
        }

        let old_slots = self.schema.slots_for(tag, from).unwrap_or(&[]).to_vec();
        let new_slots = self.schema.slots_for(tag, to).unwrap_or(&[]).to_vec();

        if let Some(obj) = self.arenas.get_mut(handle) {
            let old_items = std::mem::take(&mut obj.items);
            let mut new_items = vec![Item::None; new_slots.len()];
            for (i, slot) in new_slots.iter().enumerate() {
                if let Some(old_pos) = old_slots.iter().position(|s| s == slot) {
                    new_items[i] = old_items[old_pos].clone();
                }
            }
            obj.items = new_items;
            obj.kind = to;
        }

        Ok(())
    }

    /// Visitor-based walk over one object's reference/identifier items,
    /// irrespective of its kind's schema -- the generic path used by the
    /// serializer and the GC.
    pub fn visit(&self, handle: &Handle<Object>, visitor: &mut dyn Visitor) {
        let obj = self.arenas.get(handle);
        for item in &obj.items {
            match item {
                Item::Ref(r) => visitor.visit_ref(*r),
                Item::Ident(i) => visitor.visit_ident(*i),
                Item::Array(elems) => {
                    for elem in elems {
                        match elem {
                            ArrayElem::Obj(r) => visitor.visit_ref(*r),
                            ArrayElem::Ident(i) => visitor.visit_ident(*i),
                            ArrayElem::Param(p) => {
                                visitor.visit_ref(p.ty);
                                visitor.visit_ident(p.name);
                            }
                            ArrayElem::Range(_) => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Depth-first serialization: writes a header (schema digest) then each
    /// reachable object, matching the tagged-byte-stream shape of the
    /// persisted library format. Identifiers are written as their
    /// string bytes (interning is re-established on read via
    /// `ident::intern`, satisfying the round-trip law
    /// `intern(string_of(i)) == i`).
    pub fn serialize<W: Write>(&self, root: Handle<Object>, sink: &mut W) -> io::Result<()> {
        sink.write_all(b"NVCO")?;
        sink.write_all(&self.schema.digest().to_le_bytes())?;

        let mut seen = std::collections::HashSet::new();
        let mut order = Vec::new();
        self.collect_reachable(root, &mut seen, &mut order);

        sink.write_all(&(order.len() as u32).to_le_bytes())?;
        for handle in order {
            self.write_object(handle, sink)?;
        }
        Ok(())
    }

    fn collect_reachable(
        &self,
        handle: Handle<Object>,
        seen: &mut std::collections::HashSet<(u32, u32)>,
        order: &mut Vec<Handle<Object>>,
    ) {
        let key = (handle.arena().generation(), handle.index());
        if !seen.insert(key) {
            return;
        }

        struct Collect<'a> {
            refs: &'a mut Vec<Handle<Object>>,
        }
        impl<'a> Visitor for Collect<'a> {
            fn visit_ref(&mut self, referenced: Handle<Object>) {
                self.refs.push(referenced);
            }
        }

        let mut refs = Vec::new();
        self.visit(&handle, &mut Collect { refs: &mut refs });
        order.push(handle);
        for r in refs {
            self.collect_reachable(r, seen, order);
        }
    }

    fn write_object<W: Write>(&self, handle: Handle<Object>, sink: &mut W) -> io::Result<()> {
        let obj = self.arenas.get(&handle);
        sink.write_all(&(handle.arena().generation()).to_le_bytes())?;
        sink.write_all(&handle.index().to_le_bytes())?;
        sink.write_all(&tag_byte(obj.tag).to_le_bytes())?;
        sink.write_all(&obj.kind.0.to_le_bytes())?;
        sink.write_all(&obj.loc.file_id.to_le_bytes())?;
        sink.write_all(&obj.loc.line.to_le_bytes())?;
        sink.write_all(&obj.loc.column.to_le_bytes())?;
        sink.write_all(&obj.loc.length.to_le_bytes())?;
        sink.write_all(&(obj.items.len() as u32).to_le_bytes())?;
        for item in &obj.items {
            write_item(item, sink)?;
        }
        Ok(())
    }

    /// Reads back a graph written by `serialize`. A schema digest mismatch
    /// yields `StaleUnitError` via the caller (`library::Library::load`),
    /// which owns the decision to trigger recompilation.
    pub fn deserialize<R: Read>(&mut self, source: &mut R) -> Result<(u64, Handle<Object>), io::Error> {
        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if &magic != b"NVCO" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
        }
        let digest = read_u64(source)?;
        let count = read_u32(source)?;

        let arena = self.arenas.new_arena();
        let mut remap: HashMap<(u32, u32), Handle<Object>> = HashMap::new();
        let mut pending = Vec::new();
        let mut root = None;

        for _ in 0..count {
            let (old_key, obj, raw_refs) = read_object(source)?;
            let new_handle = self.arenas.alloc(obj);
            remap.insert(old_key, new_handle);
            // `serialize` always writes the root object first (see
            // `collect_reachable`), so the first record read back is the root.
            // A `HashMap`'s iteration order is not that, so the root must be
            // captured here rather than picked out of `remap` afterward.
            if root.is_none() {
                root = Some(new_handle);
            }
            pending.push((new_handle, raw_refs));
        }

        // Patch references now that every object in this stream has a new
        // handle (objects may reference others later in the stream).
        for (handle, raw_refs) in pending {
            if let Some(obj) = self.arenas.get_mut(&handle) {
                for pending_ref in raw_refs {
                    match pending_ref {
                        PendingRef::Item(slot_idx, old_key) => {
                            if let Some(new_handle) = remap.get(&old_key) {
                                obj.items[slot_idx] = Item::Ref(*new_handle);
                            }
                        }
                        PendingRef::ArrayObj(slot_idx, array_idx, old_key) => {
                            if let Some(new_handle) = remap.get(&old_key) {
                                if let Item::Array(elems) = &mut obj.items[slot_idx] {
                                    elems[array_idx] = ArrayElem::Obj(*new_handle);
                                }
                            }
                        }
                        PendingRef::ArrayParamTy(slot_idx, array_idx, old_key) => {
                            if let Some(new_handle) = remap.get(&old_key) {
                                if let Item::Array(elems) = &mut obj.items[slot_idx] {
                                    if let ArrayElem::Param(p) = &mut elems[array_idx] {
                                        p.ty = *new_handle;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        self.arenas.freeze(arena);
        let root = root.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty unit"))?;
        Ok((digest, root))
    }

    /// Mark-sweep GC: marks every object reachable from `roots`, across all
    /// arenas, then drops any arena that has no surviving members. Per
    /// spec.md §4.1's pinned-root set ("live libraries, current
    /// elaboration, unfrozen arenas"), an arena still being written to is
    /// always pinned regardless of reachability -- the caller may not have
    /// rooted its in-progress contents yet, and dropping it out from under
    /// an open `new_object`/`set_item` sequence would violate the freeze
    /// invariant. Only arenas with zero surviving roots are reclaimed;
    /// compaction within a live arena is not required.
    pub fn gc(&mut self, roots: &[Handle<Object>]) {
        let mut seen = std::collections::HashSet::new();
        let mut stack: Vec<Handle<Object>> = roots.to_vec();

        while let Some(handle) = stack.pop() {
            let key = (handle.arena().generation(), handle.index());
            if !seen.insert(key) {
                continue;
            }
            struct Collect<'a> {
                refs: &'a mut Vec<Handle<Object>>,
            }
            impl<'a> Visitor for Collect<'a> {
                fn visit_ref(&mut self, referenced: Handle<Object>) {
                    self.refs.push(referenced);
                }
            }
            let mut refs = Vec::new();
            self.visit(&handle, &mut Collect { refs: &mut refs });
            stack.extend(refs);
        }

        let live_arenas: std::collections::HashSet<ArenaId> = seen
            .iter()
            .map(|(gen, _)| ArenaId::from_generation(*gen))
            .chain(self.arenas.ids().filter(|id| !self.arenas.is_frozen(*id)))
            .collect();

        let dead: Vec<ArenaId> = self
            .arenas
            .ids()
            .filter(|id| !live_arenas.contains(id))
            .collect();
        for id in dead {
            self.arenas.drop_arena(id);
        }
    }
}

fn tag_byte(tag: Tag) -> u8 {
    match tag {
        Tag::Tree => 0,
        Tag::Type => 1,
        Tag::IrUnit => 2,
        Tag::Runtime => 3,
    }
}

fn tag_from_byte(b: u8) -> Option<Tag> {
    match b {
        0 => Some(Tag::Tree),
        1 => Some(Tag::Type),
        2 => Some(Tag::IrUnit),
        3 => Some(Tag::Runtime),
        _ => None,
    }
}

fn write_item<W: Write>(item: &Item, sink: &mut W) -> io::Result<()> {
    match item {
        Item::None => sink.write_all(&[0]),
        Item::Int(v) => {
            sink.write_all(&[1])?;
            sink.write_all(&v.to_le_bytes())
        }
        Item::Int64(v) => {
            sink.write_all(&[2])?;
            sink.write_all(&v.to_le_bytes())
        }
        Item::Real(v) => {
            sink.write_all(&[3])?;
            sink.write_all(&v.to_le_bytes())
        }
        Item::Ident(i) => {
            sink.write_all(&[4])?;
            let bytes = i.as_str().as_bytes();
            sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
            sink.write_all(bytes)
        }
        Item::Ref(h) => {
            sink.write_all(&[5])?;
            sink.write_all(&h.arena().generation().to_le_bytes())?;
            sink.write_all(&h.index().to_le_bytes())
        }
        Item::Text(s) => {
            sink.write_all(&[6])?;
            let bytes = s.as_bytes();
            sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
            sink.write_all(bytes)
        }
        Item::Array(elems) => {
            sink.write_all(&[7])?;
            sink.write_all(&(elems.len() as u32).to_le_bytes())?;
            for elem in elems {
                write_array_elem(elem, sink)?;
            }
            Ok(())
        }
    }
}

fn write_array_elem<W: Write>(elem: &ArrayElem, sink: &mut W) -> io::Result<()> {
    match elem {
        ArrayElem::Obj(h) => {
            sink.write_all(&[0])?;
            sink.write_all(&h.arena().generation().to_le_bytes())?;
            sink.write_all(&h.index().to_le_bytes())
        }
        ArrayElem::Ident(i) => {
            sink.write_all(&[1])?;
            let bytes = i.as_str().as_bytes();
            sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
            sink.write_all(bytes)
        }
        ArrayElem::Range(r) => {
            sink.write_all(&[2])?;
            sink.write_all(&r.low.to_le_bytes())?;
            sink.write_all(&r.high.to_le_bytes())?;
            sink.write_all(&[r.ascending as u8])
        }
        ArrayElem::Param(p) => {
            sink.write_all(&[3])?;
            let bytes = p.name.as_str().as_bytes();
            sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
            sink.write_all(bytes)?;
            sink.write_all(&p.ty.arena().generation().to_le_bytes())?;
            sink.write_all(&p.ty.index().to_le_bytes())
        }
    }
}

fn read_u32<R: Read>(source: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(source: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i32<R: Read>(source: &mut R) -> io::Result<i32> {
    Ok(read_u32(source)? as i32)
}

fn read_i64<R: Read>(source: &mut R) -> io::Result<i64> {
    Ok(read_u64(source)? as i64)
}

fn read_f64<R: Read>(source: &mut R) -> io::Result<f64> {
    Ok(f64::from_bits(read_u64(source)?))
}

type RawKey = (u32, u32);

/// A reference recorded while reading one object, to be patched to a real
/// `Handle` once every object in the stream has been allocated.
enum PendingRef {
    /// `items[slot_idx]` is an `Item::Ref` pointing at `RawKey`.
    Item(usize, RawKey),
    /// `items[slot_idx]` is an `Item::Array` whose element `array_idx` is an
    /// `ArrayElem::Obj` pointing at `RawKey`.
    ArrayObj(usize, usize, RawKey),
    /// Same, but the element is an `ArrayElem::Param` and `RawKey` is its
    /// `ty` field.
    ArrayParamTy(usize, usize, RawKey),
}

#[allow(clippy::type_complexity)]
fn read_object<R: Read>(source: &mut R) -> io::Result<(RawKey, Object, Vec<PendingRef>)> {
    let gen = read_u32(source)?;
    let idx = read_u32(source)?;
    let mut tag_b = [0u8; 1];
    source.read_exact(&mut tag_b)?;
    let tag = tag_from_byte(tag_b[0])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad tag byte"))?;

    let mut kind_b = [0u8; 2];
    source.read_exact(&mut kind_b)?;
    let kind = Kind(u16::from_le_bytes(kind_b));

    let loc = Loc {
        file_id: read_u32(source)?,
        line: read_u32(source)?,
        column: read_u32(source)?,
        length: read_u32(source)?,
    };

    let n_items = read_u32(source)? as usize;
    let mut items = Vec::with_capacity(n_items);
    let mut raw_refs = Vec::new();

    for slot_idx in 0..n_items {
        let mut disc = [0u8; 1];
        source.read_exact(&mut disc)?;
        let item = match disc[0] {
            0 => Item::None,
            1 => Item::Int(read_i32(source)?),
            2 => Item::Int64(read_i64(source)?),
            3 => Item::Real(read_f64(source)?),
            4 => {
                let len = read_u32(source)? as usize;
                let mut buf = vec![0u8; len];
                source.read_exact(&mut buf)?;
                let s = String::from_utf8(buf)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8"))?;
                Item::Ident(ident::intern(s))
            }
            5 => {
                let ref_gen = read_u32(source)?;
                let ref_idx = read_u32(source)?;
                raw_refs.push(PendingRef::Item(slot_idx, (ref_gen, ref_idx)));
                Item::None // patched once all handles are known
            }
            6 => {
                let len = read_u32(source)? as usize;
                let mut buf = vec![0u8; len];
                source.read_exact(&mut buf)?;
                let s = String::from_utf8(buf)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8"))?;
                Item::Text(s)
            }
            7 => {
                let n_elems = read_u32(source)? as usize;
                let mut elems = Vec::with_capacity(n_elems);
                for array_idx in 0..n_elems {
                    elems.push(read_array_elem(source, slot_idx, array_idx, &mut raw_refs)?);
                }
                Item::Array(elems)
            }
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "bad item tag")),
        };
        items.push(item);
    }

    Ok(((gen, idx), Object { tag, kind, loc, items }, raw_refs))
}

/// Reads one array element. `Obj`/`Param` elements carry a `Handle` that is
/// not yet resolvable (the target may appear later in the stream), so a
/// placeholder is written and the real handle is patched in afterward via
/// `raw_refs`, the same way a top-level `Item::Ref` is.
fn read_array_elem<R: Read>(
    source: &mut R,
    slot_idx: usize,
    array_idx: usize,
    raw_refs: &mut Vec<PendingRef>,
) -> io::Result<ArrayElem> {
    let mut disc = [0u8; 1];
    source.read_exact(&mut disc)?;
    match disc[0] {
        0 => {
            let ref_gen = read_u32(source)?;
            let ref_idx = read_u32(source)?;
            raw_refs.push(PendingRef::ArrayObj(slot_idx, array_idx, (ref_gen, ref_idx)));
            Ok(ArrayElem::Obj(Handle::dangling()))
        }
        1 => {
            let len = read_u32(source)? as usize;
            let mut buf = vec![0u8; len];
            source.read_exact(&mut buf)?;
            let s = String::from_utf8(buf)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8"))?;
            Ok(ArrayElem::Ident(ident::intern(s)))
        }
        2 => {
            let low = read_i64(source)?;
            let high = read_i64(source)?;
            let mut ascending = [0u8; 1];
            source.read_exact(&mut ascending)?;
            Ok(ArrayElem::Range(Range { low, high, ascending: ascending[0] != 0 }))
        }
        3 => {
            let len = read_u32(source)? as usize;
            let mut buf = vec![0u8; len];
            source.read_exact(&mut buf)?;
            let name = String::from_utf8(buf)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8"))?;
            let ref_gen = read_u32(source)?;
            let ref_idx = read_u32(source)?;
            raw_refs.push(PendingRef::ArrayParamTy(slot_idx, array_idx, (ref_gen, ref_idx)));
            Ok(ArrayElem::Param(Parameter { name: ident::intern(name), ty: Handle::dangling() }))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad array element tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> SchemaTable {
        let mut schema = SchemaTable::new();
        schema.declare(Tag::Type, Kind(0), &[Slot::Ident]); // INCOMPLETE
        schema.declare(Tag::Type, Kind(1), &[Slot::Ident, Slot::Dimensions]); // INTEGER
        schema.declare(Tag::Type, Kind(2), &[Slot::Ident, Slot::Fields]); // RECORD-ish, for array tests
        schema.allow_transition(Tag::Type, Kind(0), Kind(1));
        schema
    }

    #[test]
    fn setting_undeclared_slot_is_a_schema_error() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        let err = store.set_item(&h, Slot::Dimensions, Item::Int(1));
        assert!(matches!(err, Err(SchemaError::SlotNotDeclared { .. })));
    }

    #[test]
    fn declared_slot_round_trips() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        let name = ident::intern("x");
        store.set_item(&h, Slot::Ident, Item::Ident(name)).unwrap();
        assert_eq!(store.get_item(&h, Slot::Ident).unwrap().as_ident(), Some(name));
    }

    #[test]
    fn kind_transition_follows_allow_list() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        assert!(store.transition_kind(&h, Kind(1)).is_ok());
        assert_eq!(store.get(&h).kind, Kind(1));

        // INTEGER -> INCOMPLETE is not on the allow-list.
        let err = store.transition_kind(&h, Kind(0));
        assert!(err.is_err());
    }

    #[test]
    fn transition_preserves_overlapping_slots() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        let name = ident::intern("counter");
        store.set_item(&h, Slot::Ident, Item::Ident(name)).unwrap();
        store.transition_kind(&h, Kind(1)).unwrap();
        assert_eq!(store.get_item(&h, Slot::Ident).unwrap().as_ident(), Some(name));
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(1), Loc::default());
        let name = ident::intern("byte_t");
        store.set_item(&h, Slot::Ident, Item::Ident(name)).unwrap();

        let mut buf = Vec::new();
        store.serialize(h, &mut buf).unwrap();

        let mut store2 = Store::new(test_schema());
        let (digest, root) = store2.deserialize(&mut &buf[..]).unwrap();
        assert_eq!(digest, store.schema().digest());
        assert_eq!(
            store2.get_item(&root, Slot::Ident).unwrap().as_ident(),
            Some(name)
        );
    }

    #[test]
    fn serialize_deserialize_round_trips_array_items() {
        let mut store = Store::new(test_schema());
        let element_ty = store.new_object(Tag::Type, Kind(0), Loc::default());
        let param_ty = store.new_object(Tag::Type, Kind(0), Loc::default());
        let field_name = ident::intern("width");
        let param_name = ident::intern("generic_n");

        let record = store.new_object(Tag::Type, Kind(2), Loc::default());
        store
            .set_item(
                &record,
                Slot::Fields,
                Item::Array(vec![
                    ArrayElem::Obj(element_ty),
                    ArrayElem::Ident(field_name),
                    ArrayElem::Range(Range { low: 0, high: 7, ascending: true }),
                    ArrayElem::Param(Parameter { name: param_name, ty: param_ty }),
                ]),
            )
            .unwrap();

        let mut buf = Vec::new();
        store.serialize(record, &mut buf).unwrap();

        let mut store2 = Store::new(test_schema());
        let (_, root) = store2.deserialize(&mut &buf[..]).unwrap();
        let fields = store2.get_item(&root, Slot::Fields).unwrap().as_array().unwrap();
        assert_eq!(fields.len(), 4);

        match &fields[0] {
            ArrayElem::Obj(h) => assert_eq!(store2.get(h).kind, Kind(0)),
            other => panic!("expected Obj, got {:?}", other),
        }
        assert_eq!(fields[1], ArrayElem::Ident(field_name));
        assert_eq!(fields[2], ArrayElem::Range(Range { low: 0, high: 7, ascending: true }));
        match &fields[3] {
            ArrayElem::Param(p) => {
                assert_eq!(p.name, param_name);
                assert_eq!(store2.get(&p.ty).kind, Kind(0));
            }
            other => panic!("expected Param, got {:?}", other),
        }
    }

    #[test]
    fn gc_is_idempotent_with_unchanged_roots() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        store.gc(&[h]);
        store.gc(&[h]);
        assert_eq!(store.get(&h).kind, Kind(0));
    }

    #[test]
    fn gc_never_drops_an_unfrozen_arena_even_with_no_roots() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        // No roots passed at all: a frozen arena in this position would be
        // reclaimed, but the current (unfrozen) arena must survive so that
        // in-progress work that hasn't been rooted yet is not lost.
        store.gc(&[]);
        assert_eq!(store.get(&h).kind, Kind(0));
    }

    #[test]
    fn gc_drops_a_frozen_arena_with_no_surviving_roots() {
        let mut store = Store::new(test_schema());
        let h = store.new_object(Tag::Type, Kind(0), Loc::default());
        let arena = h.arena();
        store.freeze(arena);
        store.new_arena();
        store.gc(&[]);
        assert!(store.arenas.ids().all(|id| id != arena));
    }
}
