//! `nvc-core`: object store, type system, elaboration/JIT pipeline, and
//! simulation kernel for a VHDL/Verilog compiler and discrete-event
//! simulator. See `DESIGN.md` for how each module is grounded.
//!
//! [`Session`] is the one value the thin `nvc` driver (and any other
//! frontend) threads through every public entry point: it owns the object
//! store, the interner's process-wide state is separate (see [`ident`]),
//! the diagnostic collector, the logger, and the options loaded from
//! `.nvc.yml` or `clap` matches -- one `Options` and one `Logger` per run.

pub mod arena;
pub mod config;
pub mod diagnostics;
pub mod elaborate;
pub mod hash;
pub mod ident;
pub mod ir;
pub mod layout;
pub mod library;
pub mod logger;
pub mod object;
pub mod shell;
pub mod sim;
pub mod tree;
pub mod types;

use config::Options;
use diagnostics::DiagnosticCollector;
use layout::LayoutCache;
use library::Library;
use logger::Logger;
use object::{SchemaTable, Store};

/// Opens a fresh object store with every component's has-map registered.
/// Every entry point that needs a `Store` from scratch (tests, the driver,
/// a future REPL) should go through this rather than re-declaring the
/// schema piecemeal.
pub fn new_store() -> Store {
    let mut schema = SchemaTable::new();
    types::register(&mut schema);
    tree::register(&mut schema);
    Store::new(schema)
}

/// The state threaded through one `analyse`/`elaborate`/`run` invocation.
pub struct Session {
    pub options: Options,
    pub store: Store,
    pub layouts: LayoutCache,
    pub diagnostics: DiagnosticCollector,
    pub logger: Option<Logger>,
    libraries: Vec<Library>,
}

impl Session {
    pub fn new(options: Options) -> Self {
        Session {
            options,
            store: new_store(),
            layouts: LayoutCache::new(),
            diagnostics: DiagnosticCollector::new(),
            logger: None,
            libraries: Vec::new(),
        }
    }

    /// Attaches a file-backed logger at the session's configured library
    /// directory, the way `driver::Driver` opens its log next to
    /// `output_dir` before running a script.
    pub fn enable_logging<P: AsRef<std::path::Path>>(&mut self, path: P) {
        self.logger = Some(Logger::new(path));
    }

    /// Opens (or creates) a library under the session's configured library
    /// search path and keeps it open for subsequent unit loads/saves.
    pub fn open_library(&mut self, name: &str) -> std::io::Result<usize> {
        let library = Library::open(name, &self.options.library_dir)?;
        self.libraries.push(library);
        Ok(self.libraries.len() - 1)
    }

    pub fn library(&self, index: usize) -> &Library {
        &self.libraries[index]
    }

    pub fn library_mut(&mut self, index: usize) -> &mut Library {
        &mut self.libraries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_session_has_no_open_libraries_and_no_diagnostics() {
        let session = Session::new(Options::default());
        assert_eq!(session.libraries.len(), 0);
        assert!(!session.diagnostics.has_errors());
    }

    #[test]
    fn new_store_registers_both_type_and_tree_schemas() {
        let mut store = new_store();
        let ty = store.new_type(types::TypeKind::Integer, object::Loc::default());
        let entity = store.new_tree(tree::TreeKind::Entity, object::Loc::default());
        assert_eq!(store.type_kind(ty), types::TypeKind::Integer);
        assert_eq!(store.tree_kind(entity), tree::TreeKind::Entity);
    }
}
