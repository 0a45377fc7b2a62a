//! Arena allocation with cross-arena handles.
//!
//! A contiguous bump-allocated region with a monotonic generation id.
//! Objects from one arena may reference objects in *older* arenas but never
//! in newer ones -- this is the freeze invariant that makes serialization
//! and sharing across library loads safe (see [`crate::object`]).
//!
//! This is the generic building block; [`crate::object::Store`] is the
//! concrete arena *set* used for the tagged object model. The type is kept
//! generic so the same machinery also backs, e.g., the JIT's per-unit
//! constant pools.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Identifies one arena within an [`ArenaSet`]. Generations increase
/// monotonically as arenas are pushed; they are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId(u32);

impl fmt::Debug for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

impl ArenaId {
    pub fn generation(&self) -> u32 {
        self.0
    }

    /// Reconstructs an id from a generation number previously obtained via
    /// `generation()`. Used by the object store's GC to group live handles
    /// by arena without holding onto the originating `ArenaSet`.
    pub fn from_generation(generation: u32) -> Self {
        ArenaId(generation)
    }
}

/// A cross-arena reference: which arena, and which slot within it. Opaque to
/// callers beyond equality/ordering; the only way to get the value back is
/// through the [`ArenaSet`] that produced it.
#[derive(Hash)]
pub struct Handle<T> {
    arena: ArenaId,
    index: u32,
    typ: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.arena == other.arena && self.index == other.index
    }
}
impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.arena, self.index).cmp(&(other.arena, other.index))
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("arena", &self.arena)
            .field("index", &self.index)
            .finish()
    }
}

impl<T> Handle<T> {
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether `self` is allowed to be stored as a referenced item inside an
    /// object living in `from`: the freeze invariant requires references to
    /// point at the same or an older arena, never a newer one.
    pub fn points_backward_from(&self, from: ArenaId) -> bool {
        self.arena.0 <= from.0
    }

    #[cfg(test)]
    fn new_for_test(arena: ArenaId, index: u32) -> Self {
        Handle {
            arena,
            index,
            typ: PhantomData,
        }
    }

    /// A placeholder handle that does not point at any real object. Used by
    /// the object deserializer to fill an array slot whose target appears
    /// later in the stream; overwritten with the real handle once every
    /// object has been allocated, before any other code can observe it.
    pub(crate) fn dangling() -> Self {
        Handle {
            arena: ArenaId(0),
            index: 0,
            typ: PhantomData,
        }
    }
}

struct Arena<T> {
    id: ArenaId,
    storage: Vec<T>,
    frozen: bool,
}

/// An ordered collection of arenas of a single element type, each with its
/// own generation id. Allocation always targets the most recently pushed,
/// unfrozen arena.
pub struct ArenaSet<T> {
    arenas: Vec<Arena<T>>,
    /// Next generation to hand out. Kept separate from `arenas.len()`
    /// because `drop_arena` removes entries from the middle, and a
    /// generation id must never be reused once issued.
    next_generation: u32,
}

impl<T> ArenaSet<T> {
    pub fn new() -> Self {
        ArenaSet {
            arenas: Vec::new(),
            next_generation: 0,
        }
    }

    /// Starts a new, unfrozen arena and returns its id. Any previously
    /// current arena is left exactly as it was (frozen or not) -- callers
    /// that want the freeze invariant enforced should freeze the previous
    /// arena themselves before starting a new one.
    pub fn new_arena(&mut self) -> ArenaId {
        let id = ArenaId(self.next_generation);
        self.next_generation += 1;
        self.arenas.push(Arena {
            id,
            storage: Vec::new(),
            frozen: false,
        });
        id
    }

    fn current_mut(&mut self) -> &mut Arena<T> {
        self.arenas
            .last_mut()
            .expect("alloc on an ArenaSet with no arena; call new_arena() first")
    }

    /// Allocates `value` into the current arena.
    ///
    /// # Panics
    /// Panics if the current arena is frozen, or if no arena has been
    /// started yet.
    pub fn alloc(&mut self, value: T) -> Handle<T> {
        let arena = self.current_mut();
        assert!(!arena.frozen, "cannot allocate into a frozen arena");
        let index = arena.storage.len() as u32;
        arena.storage.push(value);
        Handle {
            arena: arena.id,
            index,
            typ: PhantomData,
        }
    }

    /// Looks an arena up by its stable generation id, *not* its position in
    /// `self.arenas`: once `drop_arena` has removed an earlier generation,
    /// position and generation diverge, so every lookup goes through this
    /// (or the mutable equivalent below) rather than direct indexing.
    fn arena(&self, id: ArenaId) -> &Arena<T> {
        self.arenas
            .iter()
            .find(|a| a.id == id)
            .expect("arena id refers to a dropped or unknown arena")
    }

    fn arena_mut(&mut self, id: ArenaId) -> Option<&mut Arena<T>> {
        self.arenas.iter_mut().find(|a| a.id == id)
    }

    pub fn get(&self, handle: &Handle<T>) -> &T {
        &self.arena(handle.arena).storage[handle.index as usize]
    }

    /// Mutable access. Refused once the arena is frozen: frozen arenas are
    /// shared read-only state (they may already be referenced from newer
    /// arenas or be mid-serialization).
    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        let arena = self.arena_mut(handle.arena)?;
        if arena.frozen {
            None
        } else {
            Some(&mut arena.storage[handle.index as usize])
        }
    }

    /// One-way transition. Idempotent: freezing an already-frozen arena is a
    /// no-op.
    pub fn freeze(&mut self, id: ArenaId) {
        if let Some(arena) = self.arena_mut(id) {
            arena.frozen = true;
        }
    }

    pub fn is_frozen(&self, id: ArenaId) -> bool {
        self.arena(id).frozen
    }

    pub fn latest(&self) -> Option<ArenaId> {
        self.arenas.last().map(|a| a.id)
    }

    /// All currently-live arena ids, oldest first. Used by the object
    /// store's mark phase to find pinned roots across generations.
    pub fn ids(&self) -> impl Iterator<Item = ArenaId> + '_ {
        self.arenas.iter().map(|a| a.id)
    }

    pub fn len(&self, id: ArenaId) -> usize {
        self.arena(id).storage.len()
    }

    /// Drops a fully-unreferenced arena, returning its storage to the
    /// allocator. Used by `gc()` once mark-sweep has determined an arena has
    /// no surviving roots.
    pub fn drop_arena(&mut self, id: ArenaId) {
        if let Some(pos) = self.arenas.iter().position(|a| a.id == id) {
            self.arenas.remove(pos);
        }
    }
}

impl<T> Default for ArenaSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get_round_trip() {
        let mut set: ArenaSet<i32> = ArenaSet::new();
        set.new_arena();
        let h = set.alloc(42);
        assert_eq!(*set.get(&h), 42);
    }

    #[test]
    fn freeze_blocks_mutation_but_not_reads() {
        let mut set: ArenaSet<i32> = ArenaSet::new();
        let id = set.new_arena();
        let h = set.alloc(1);
        set.freeze(id);
        assert!(set.get_mut(&h).is_none());
        assert_eq!(*set.get(&h), 1);
    }

    #[test]
    fn freeze_is_idempotent() {
        let mut set: ArenaSet<i32> = ArenaSet::new();
        let id = set.new_arena();
        set.freeze(id);
        set.freeze(id);
        assert!(set.is_frozen(id));
    }

    #[test]
    fn handles_only_point_backward_across_generations() {
        let mut set: ArenaSet<i32> = ArenaSet::new();
        let g0 = set.new_arena();
        let h0 = set.alloc(10);
        set.freeze(g0);
        let g1 = set.new_arena();
        let _h1 = set.alloc(20);

        assert!(h0.points_backward_from(g1));
        assert!(!Handle::<i32>::new_for_test(g1, 0).points_backward_from(g0));
    }
}
