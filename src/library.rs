//! Library manager: a named design library backed by a directory of
//! serialized unit files plus a catalog -- a plain directory plus a text
//! catalog rather than an embedded database.
//!
//! Each unit file nests the object store's own tagged-stream serialization
//! (`crate::object::Store::serialize`) inside a library-level header: magic
//! bytes, tool version, schema digest, and a dependency triple list. A
//! schema digest mismatch, or a missing dependency, surfaces as
//! [`crate::diagnostics::Error::StaleUnit`] and never partially mutates the
//! catalog -- the new unit file is written to a temporary path and renamed
//! into place only once it is fully flushed.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::arena::Handle;
use crate::diagnostics::Error;
use crate::hash::StrMap;
use crate::object::{Object, Store};

const LIBRARY_MAGIC: &[u8; 4] = b"NVCL";
const TOOL_VERSION: &str = "nvc-core 0.1.0";
const CATALOG_FILE: &str = "catalog";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub library: String,
    pub unit: String,
    pub generation: u32,
}

/// Resolves a dependency's current generation, decoupling `load_unit`'s
/// dependency-closure check from any particular collection of open
/// libraries -- the same way `elaborate::EntityResolver` decouples the
/// elaborator from the library manager.
pub trait LibraryResolver {
    /// The generation currently on disk for `unit` in `library`, or `None`
    /// if that library or unit is not known to the resolver at all.
    fn generation_of(&self, library: &str, unit: &str) -> Option<u32>;
}

impl LibraryResolver for [Library] {
    fn generation_of(&self, library: &str, unit: &str) -> Option<u32> {
        self.iter().find(|l| l.name == library)?.generation_of(unit)
    }
}

impl LibraryResolver for Vec<Library> {
    fn generation_of(&self, library: &str, unit: &str) -> Option<u32> {
        self.as_slice().generation_of(library, unit)
    }
}

/// One design library: a directory containing a catalog file (one unit
/// name and generation per line) and one `<unit>.nvcu` file per serialized
/// design unit.
pub struct Library {
    name: String,
    root: PathBuf,
    catalog: StrMap<(PathBuf, u32)>,
    /// `StrMap` does not expose a keys iterator (spec's four canonical
    /// hash containers promise only insert/get); the catalog file is kept
    /// in sync via this side list instead.
    unit_names: Vec<String>,
}

impl Library {
    /// Opens (creating if necessary) the library directory at `root` and
    /// loads its catalog.
    pub fn open<P: AsRef<Path>>(name: &str, root: P) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut catalog = StrMap::new();
        let mut unit_names = Vec::new();
        let catalog_path = root.join(CATALOG_FILE);
        if catalog_path.exists() {
            let contents = fs::read_to_string(&catalog_path)?;
            for line in contents.lines().filter(|l| !l.is_empty()) {
                let mut parts = line.rsplitn(2, ' ');
                let generation: u32 = parts
                    .next()
                    .and_then(|g| g.parse().ok())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed catalog line"))?;
                let name = parts
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed catalog line"))?;
                catalog.insert(name.to_string(), (root.join(format!("{}.nvcu", name)), generation));
                unit_names.push(name.to_string());
            }
        }

        Ok(Library {
            name: name.to_string(),
            root,
            catalog,
            unit_names,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_unit(&self, unit: &str) -> bool {
        self.catalog.get(unit).is_some()
    }

    /// The generation currently on disk for `unit`, or `None` if it has
    /// never been saved in this library.
    pub fn generation_of(&self, unit: &str) -> Option<u32> {
        self.catalog.get(unit).map(|(_, generation)| *generation)
    }

    fn rewrite_catalog(&self) -> io::Result<()> {
        // Sorted so the catalog file's diff is stable across saves, even
        // though StrMap's own iteration order is unspecified.
        let mut names = self.unit_names.clone();
        names.sort_unstable();
        names.dedup();
        let mut contents = String::new();
        for name in names {
            let generation = self.catalog.get(&name).map(|(_, g)| *g).unwrap_or(0);
            contents.push_str(&name);
            contents.push(' ');
            contents.push_str(&generation.to_string());
            contents.push('\n');
        }
        fs::write(self.root.join(CATALOG_FILE), contents)
    }

    /// Serializes `root_obj` (and everything reachable from it) into this
    /// library under `unit`, with the given dependency list. Writes to a
    /// temporary file first so a failure partway through never corrupts an
    /// existing unit file.
    pub fn save_unit(
        &mut self,
        store: &Store,
        unit: &str,
        root_obj: Handle<Object>,
        deps: &[Dependency],
    ) -> io::Result<()> {
        let final_path = self.root.join(format!("{}.nvcu", unit));
        let tmp_path = self.root.join(format!("{}.nvcu.tmp", unit));
        let generation = self.generation_of(unit).map(|g| g + 1).unwrap_or(0);

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(LIBRARY_MAGIC)?;
            write_string(&mut file, TOOL_VERSION)?;
            file.write_all(&store.schema().digest().to_le_bytes())?;
            file.write_all(&(deps.len() as u32).to_le_bytes())?;
            for dep in deps {
                write_string(&mut file, &dep.library)?;
                write_string(&mut file, &dep.unit)?;
                file.write_all(&dep.generation.to_le_bytes())?;
            }
            store.serialize(root_obj, &mut file)?;
        }

        fs::rename(&tmp_path, &final_path)?;
        self.catalog.insert(unit.to_string(), (final_path, generation));
        if !self.unit_names.iter().any(|n| n == unit) {
            self.unit_names.push(unit.to_string());
        }
        self.rewrite_catalog()?;
        Ok(())
    }

    /// Loads `unit`, checking its schema digest and dependency closure.
    /// Returns `StaleUnit` rather than partially-deserialized state if
    /// anything does not match the tool currently running -- including a
    /// dependency that `resolver` no longer knows about, or that has moved
    /// on to a different generation since `unit` was compiled against it.
    pub fn load_unit(
        &self,
        store: &mut Store,
        unit: &str,
        resolver: &dyn LibraryResolver,
    ) -> Result<Handle<Object>, Error> {
        let (path, _) = self
            .catalog
            .get(unit)
            .ok_or_else(|| Error::UserSource(format!("no such unit '{}' in library '{}'", unit, self.name)))?;

        let mut file = fs::File::open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LIBRARY_MAGIC {
            return Err(Error::UserSource(format!("'{}' is not a library unit file", unit)));
        }
        let _tool_version = read_string(&mut file)?;

        let mut digest_buf = [0u8; 8];
        file.read_exact(&mut digest_buf)?;
        let digest = u64::from_le_bytes(digest_buf);

        let mut count_buf = [0u8; 4];
        file.read_exact(&mut count_buf)?;
        let dep_count = u32::from_le_bytes(count_buf);
        let mut deps = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            let library = read_string(&mut file)?;
            let dep_unit = read_string(&mut file)?;
            let mut gen_buf = [0u8; 4];
            file.read_exact(&mut gen_buf)?;
            let generation = u32::from_le_bytes(gen_buf);
            deps.push(Dependency { library, unit: dep_unit, generation });
        }

        for dep in &deps {
            match resolver.generation_of(&dep.library, &dep.unit) {
                Some(current) if current == dep.generation => {}
                _ => {
                    return Err(Error::StaleUnit {
                        library: self.name.clone(),
                        unit: unit.to_string(),
                    })
                }
            }
        }

        if digest != store.schema().digest() {
            return Err(Error::StaleUnit {
                library: self.name.clone(),
                unit: unit.to_string(),
            });
        }

        let (object_digest, root) = store.deserialize(&mut file)?;
        if object_digest != store.schema().digest() {
            return Err(Error::StaleUnit {
                library: self.name.clone(),
                unit: unit.to_string(),
            });
        }
        Ok(root)
    }
}

fn write_string<W: Write>(sink: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
    sink.write_all(bytes)
}

fn read_string<R: Read>(source: &mut R) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    source.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    source.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad utf8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Loc, SchemaTable};
    use crate::types::{self, TypeKind};

    fn schema() -> SchemaTable {
        let mut schema = SchemaTable::new();
        types::register(&mut schema);
        schema
    }

    #[test]
    fn save_then_load_round_trips_a_unit() {
        let dir = std::env::temp_dir().join(format!("nvc-core-test-lib-{}", std::process::id()));
        let mut store = Store::new(schema());
        let t = store.new_type(TypeKind::Integer, Loc::default());

        let mut lib = Library::open("work", &dir).unwrap();
        lib.save_unit(&store, "byte_t", t, &[]).unwrap();

        let mut reader_store = Store::new(schema());
        let lib2 = Library::open("work", &dir).unwrap();
        let loaded = lib2.load_unit(&mut reader_store, "byte_t", &[][..]).unwrap();
        assert_eq!(reader_store.type_kind(loaded), TypeKind::Integer);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn digest_mismatch_is_reported_as_stale_unit() {
        let dir = std::env::temp_dir().join(format!("nvc-core-test-stale-{}", std::process::id()));
        let mut store = Store::new(schema());
        let t = store.new_type(TypeKind::Integer, Loc::default());

        let mut lib = Library::open("work", &dir).unwrap();
        lib.save_unit(&store, "byte_t", t, &[]).unwrap();

        // A store with a different (empty) schema has a different digest.
        let mut other_store = Store::new(SchemaTable::new());
        let lib2 = Library::open("work", &dir).unwrap();
        let result = lib2.load_unit(&mut other_store, "byte_t", &[][..]);
        assert!(matches!(result, Err(Error::StaleUnit { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_dependency_is_reported_as_stale_unit() {
        let dir = std::env::temp_dir().join(format!("nvc-core-test-missing-dep-{}", std::process::id()));
        let mut store = Store::new(schema());
        let t = store.new_type(TypeKind::Integer, Loc::default());

        let mut lib = Library::open("work", &dir).unwrap();
        let deps = [Dependency { library: "other".to_string(), unit: "helper".to_string(), generation: 0 }];
        lib.save_unit(&store, "byte_t", t, &deps).unwrap();

        let mut reader_store = Store::new(schema());
        let lib2 = Library::open("work", &dir).unwrap();
        // No open libraries at all: "other" cannot be resolved.
        let result = lib2.load_unit(&mut reader_store, "byte_t", &[][..]);
        assert!(matches!(result, Err(Error::StaleUnit { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_generation_dependency_is_reported_as_stale_unit() {
        let dir = std::env::temp_dir().join(format!("nvc-core-test-stale-dep-{}", std::process::id()));
        let other_dir = std::env::temp_dir().join(format!("nvc-core-test-stale-dep-other-{}", std::process::id()));
        let mut store = Store::new(schema());
        let t = store.new_type(TypeKind::Integer, Loc::default());

        let mut other_lib = Library::open("other", &other_dir).unwrap();
        other_lib.save_unit(&store, "helper", t, &[]).unwrap();
        // Recompiled since `byte_t` was linked against it: generation bumps.
        other_lib.save_unit(&store, "helper", t, &[]).unwrap();

        let mut lib = Library::open("work", &dir).unwrap();
        let deps = [Dependency { library: "other".to_string(), unit: "helper".to_string(), generation: 0 }];
        lib.save_unit(&store, "byte_t", t, &deps).unwrap();

        let mut reader_store = Store::new(schema());
        let lib2 = Library::open("work", &dir).unwrap();
        let libraries = vec![other_lib];
        let result = lib2.load_unit(&mut reader_store, "byte_t", &libraries);
        assert!(matches!(result, Err(Error::StaleUnit { .. })));

        let _ = fs::remove_dir_all(&dir);
        let _ = fs::remove_dir_all(&other_dir);
    }
}
