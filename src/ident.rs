//! Identifier interning.
//!
//! Mirrors the arena-backed string handles in [`crate::arena`] (`S<T>`) but
//! generalizes them into a single process-global table so that two
//! identifiers compare equal in O(1) regardless of which arena produced the
//! bytes behind them. Names live for the lifetime of the process; nothing is
//! ever evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// An interned, immutable name. Two identifiers are equal iff their handles
/// are equal -- the underlying bytes are never compared once interned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(u32);

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Ident {
    /// Borrows the interned bytes. Valid for the lifetime of the process.
    pub fn as_str(&self) -> &'static str {
        string_of(*self)
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

struct Interner {
    // Kept alive for `'static` so `Ident::as_str` can hand out references
    // that outlive the lock guard.
    strings: Vec<&'static str>,
    by_str: HashMap<&'static str, Ident>,
}

impl Interner {
    fn new() -> Self {
        Interner {
            strings: Vec::new(),
            by_str: HashMap::new(),
        }
    }
}

struct Table {
    inner: RwLock<Interner>,
    unique_seq: AtomicUsize,
}

// Re-mixed DJB2-style hash, matching the hash shape used by the other
// canonical containers in `hash.rs`.
fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    // Re-mix before any masking is applied by a caller, so that low bits
    // carry signal from the whole string and not just its tail byte.
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;
    hash
}

fn table() -> &'static Table {
    static TABLE: std::sync::OnceLock<Table> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| Table {
        inner: RwLock::new(Interner::new()),
        unique_seq: AtomicUsize::new(0),
    })
}

/// Interns `bytes`, returning an identifier equal to any other interning of
/// the same bytes. Readers never block other readers; a writer is only
/// taken when the string is new.
pub fn intern<S: AsRef<str>>(bytes: S) -> Ident {
    let s = bytes.as_ref();
    let table = table();

    if let Some(ident) = table.inner.read().unwrap().by_str.get(s) {
        return *ident;
    }

    let mut guard = table.inner.write().unwrap();
    // Someone may have raced us between the read and write lock.
    if let Some(ident) = guard.by_str.get(s) {
        return *ident;
    }

    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let ident = Ident(guard.strings.len() as u32);
    guard.strings.push(leaked);
    guard.by_str.insert(leaked, ident);
    ident
}

/// Returns the bytes behind `ident`. Panics if `ident` was not produced by
/// this process's interner (cannot happen for any `Ident` obtained via
/// `intern`/`prefix`/`unique`).
pub fn string_of(ident: Ident) -> &'static str {
    let table = table();
    let guard = table.inner.read().unwrap();
    guard.strings[ident.0 as usize]
}

/// Hierarchical composition: `prefix(intern("a"), intern("b"), '.') ==
/// intern("a.b")`.
pub fn prefix(a: Ident, b: Ident, sep: char) -> Ident {
    let mut joined = String::with_capacity(a.len() + b.len() + sep.len_utf8());
    joined.push_str(a.as_str());
    joined.push(sep);
    joined.push_str(b.as_str());
    intern(joined)
}

/// Produces an identifier guaranteed to be fresh for the lifetime of this
/// process: `base` suffixed with a run-local monotonic counter.
pub fn unique(base: Ident) -> Ident {
    let table = table();
    let n = table.unique_seq.fetch_add(1, Ordering::Relaxed);
    intern(format!("{}%{}", base.as_str(), n))
}

pub(crate) fn mix_bits_64(x: u64) -> u64 {
    djb2(&x.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_intern_to_equal_handles() {
        let a = intern("foo");
        let b = intern("foo");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "foo");
    }

    #[test]
    fn round_trip_law() {
        let i = intern("entity_under_test");
        assert_eq!(intern(string_of(i)), i);
    }

    #[test]
    fn prefix_matches_direct_intern() {
        let a = intern("work");
        let b = intern("counter");
        assert_eq!(prefix(a, b, '.'), intern("work.counter"));
    }

    #[test]
    fn unique_is_fresh_and_distinct() {
        let base = intern("proc");
        let u1 = unique(base);
        let u2 = unique(base);
        assert_ne!(u1, u2);
        assert_ne!(u1, base);
    }
}
