//! Elaborator: instantiates a design hierarchy, resolves generic/port
//! bindings, allocates signals via their layouts, and registers processes
//! for the kernel. The scope tree is a `petgraph::DiGraph`, the same
//! backbone used for control-flow graphs elsewhere in this crate -- here
//! its nodes are instantiated scopes instead of basic blocks.
//!
//! Library lookups are abstracted behind [`EntityResolver`] rather than
//! this module depending on `crate::library::Library` directly, keeping
//! the elaborator testable without a filesystem and the library manager
//! and elaborator loosely coupled.

use petgraph::graph::{DiGraph, NodeIndex};

use crate::diagnostics::Error;
use crate::ident::Ident;
use crate::layout::{Layout, LayoutCache};
use crate::object::Store;
use crate::tree::{TreeHandle, TreeKind};
use crate::types::TypeHandle;

pub trait EntityResolver {
    /// Resolves an entity name to its (entity, architecture) tree pair.
    fn resolve(&self, name: Ident) -> Option<(TreeHandle, TreeHandle)>;
}

#[derive(Clone, Debug)]
pub struct ScopeInfo {
    pub name: Ident,
}

#[derive(Clone, Debug)]
pub struct SignalInfo {
    pub name: Ident,
    pub ty: TypeHandle,
    pub layout: Layout,
    pub scope: NodeIndex,
}

#[derive(Clone, Debug)]
pub struct ProcessInfo {
    pub name: Ident,
    pub tree: TreeHandle,
    /// Indices into `ElaboratedDesign::signals`.
    pub sensitivity: Vec<usize>,
    pub scope: NodeIndex,
}

pub struct ElaboratedDesign {
    pub scopes: DiGraph<ScopeInfo, ()>,
    pub root: NodeIndex,
    pub signals: Vec<SignalInfo>,
    pub processes: Vec<ProcessInfo>,
}

struct Context<'a> {
    store: &'a Store,
    layouts: &'a mut LayoutCache,
    resolver: &'a dyn EntityResolver,
    scopes: DiGraph<ScopeInfo, ()>,
    signals: Vec<SignalInfo>,
    processes: Vec<ProcessInfo>,
    /// Entity names currently being instantiated, for cycle detection.
    stack: Vec<Ident>,
}

pub fn elaborate(
    store: &Store,
    layouts: &mut LayoutCache,
    resolver: &dyn EntityResolver,
    entity: TreeHandle,
    architecture: TreeHandle,
) -> Result<ElaboratedDesign, Error> {
    let root_name = store
        .tree_ident(entity)
        .unwrap_or_else(|| crate::ident::intern("<top>"));

    let mut ctx = Context {
        store,
        layouts,
        resolver,
        scopes: DiGraph::new(),
        signals: Vec::new(),
        processes: Vec::new(),
        stack: vec![root_name],
    };

    let root = ctx.scopes.add_node(ScopeInfo { name: root_name });
    elaborate_architecture(&mut ctx, architecture, root)?;

    Ok(ElaboratedDesign {
        scopes: ctx.scopes,
        root,
        signals: ctx.signals,
        processes: ctx.processes,
    })
}

fn elaborate_architecture(ctx: &mut Context, architecture: TreeHandle, scope: NodeIndex) -> Result<(), Error> {
    for decl in ctx.store.tree_decls(architecture) {
        if ctx.store.tree_kind(decl) == TreeKind::SignalDecl {
            let loc = ctx.store.get(&decl).loc;
            let name = ctx.store.tree_ident(decl).ok_or_else(|| Error::UnresolvedName {
                name: "<anonymous signal>".to_string(),
                loc,
            })?;
            let ty = ctx.store.tree_type(decl).ok_or_else(|| Error::TypeMismatch {
                expected: "a type mark".to_string(),
                found: "none".to_string(),
                loc,
            })?;
            let layout = ctx.layouts.signal_layout_of(ctx.store, ty);
            ctx.signals.push(SignalInfo { name, ty, layout, scope });
        }
    }

    for stmt in ctx.store.tree_stmts(architecture) {
        match ctx.store.tree_kind(stmt) {
            TreeKind::Process => elaborate_process(ctx, stmt, scope)?,
            TreeKind::ComponentInstance => elaborate_instance(ctx, stmt, scope)?,
            _ => {}
        }
    }

    Ok(())
}

fn elaborate_process(ctx: &mut Context, stmt: TreeHandle, scope: NodeIndex) -> Result<(), Error> {
    let loc = ctx.store.get(&stmt).loc;
    let name = ctx
        .store
        .tree_ident(stmt)
        .unwrap_or_else(|| crate::ident::unique(crate::ident::intern("process")));

    let mut sensitivity = Vec::new();
    for operand in ctx.store.tree_operands(stmt) {
        let sig_name = ctx.store.tree_ident(operand).ok_or_else(|| Error::UnresolvedName {
            name: "<anonymous>".to_string(),
            loc,
        })?;
        let idx = ctx
            .signals
            .iter()
            .position(|s| s.name == sig_name)
            .ok_or_else(|| Error::UnresolvedName { name: sig_name.as_str().to_string(), loc })?;
        sensitivity.push(idx);
    }

    ctx.processes.push(ProcessInfo { name, tree: stmt, sensitivity, scope });
    Ok(())
}

fn elaborate_instance(ctx: &mut Context, stmt: TreeHandle, scope: NodeIndex) -> Result<(), Error> {
    let loc = ctx.store.get(&stmt).loc;
    let label = ctx
        .store
        .tree_ident(stmt)
        .unwrap_or_else(|| crate::ident::unique(crate::ident::intern("instance")));

    let target = ctx.store.tree_target(stmt).ok_or_else(|| Error::UnresolvedName {
        name: "<missing entity reference>".to_string(),
        loc,
    })?;
    let target_name = ctx.store.tree_ident(target).ok_or_else(|| Error::UnresolvedName {
        name: "<anonymous>".to_string(),
        loc,
    })?;

    if ctx.stack.contains(&target_name) {
        let mut path: Vec<String> = ctx.stack.iter().map(|i| i.as_str().to_string()).collect();
        path.push(target_name.as_str().to_string());
        return Err(Error::CircularInstantiation { path });
    }

    let (child_entity, child_architecture) = ctx
        .resolver
        .resolve(target_name)
        .ok_or_else(|| Error::UnresolvedName { name: target_name.as_str().to_string(), loc })?;

    check_generic_arity(ctx, stmt, child_entity, loc)?;
    check_port_formals(ctx, stmt, child_entity, loc)?;

    let child_scope = ctx.scopes.add_node(ScopeInfo { name: label });
    ctx.scopes.add_edge(scope, child_scope, ());

    ctx.stack.push(target_name);
    elaborate_architecture(ctx, child_architecture, child_scope)?;
    ctx.stack.pop();

    Ok(())
}

fn check_generic_arity(
    ctx: &Context,
    instance: TreeHandle,
    entity: TreeHandle,
    loc: crate::object::Loc,
) -> Result<(), Error> {
    let actual = ctx.store.tree_generics(instance).len();
    let formal = ctx.store.tree_generics(entity).len();
    if actual != formal {
        return Err(Error::ConstraintUnsatisfied {
            detail: format!("generic map supplies {} actuals, entity declares {}", actual, formal),
            loc,
        });
    }
    Ok(())
}

fn check_port_formals(
    ctx: &Context,
    instance: TreeHandle,
    entity: TreeHandle,
    loc: crate::object::Loc,
) -> Result<(), Error> {
    let declared: Vec<Ident> = ctx.store.tree_ports(entity).into_iter().map(|(name, _)| name).collect();
    for (formal, _actual) in ctx.store.tree_ports(instance) {
        if !declared.contains(&formal) {
            return Err(Error::UnresolvedName { name: formal.as_str().to_string(), loc });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::intern;
    use crate::object::{Item, Loc, SchemaTable, Slot};
    use crate::types::{self, TypeKind};

    struct NoEntities;
    impl EntityResolver for NoEntities {
        fn resolve(&self, _name: Ident) -> Option<(TreeHandle, TreeHandle)> {
            None
        }
    }

    fn new_store() -> Store {
        let mut schema = SchemaTable::new();
        types::register(&mut schema);
        crate::tree::register(&mut schema);
        Store::new(schema)
    }

    #[test]
    fn empty_architecture_elaborates_with_no_signals_or_processes() {
        let mut store = new_store();
        let entity = store.new_tree(TreeKind::Entity, Loc::default());
        store.set_item(&entity, Slot::Ident, Item::Ident(intern("empty_e"))).unwrap();
        let architecture = store.new_tree(TreeKind::Architecture, Loc::default());

        let mut layouts = LayoutCache::new();
        let design = elaborate(&store, &mut layouts, &NoEntities, entity, architecture).unwrap();

        assert!(design.signals.is_empty());
        assert!(design.processes.is_empty());
    }

    #[test]
    fn process_sensitivity_resolves_to_signal_index() {
        let mut store = new_store();
        let entity = store.new_tree(TreeKind::Entity, Loc::default());
        store.set_item(&entity, Slot::Ident, Item::Ident(intern("counter_e"))).unwrap();
        let architecture = store.new_tree(TreeKind::Architecture, Loc::default());

        let clk_type = store.new_type(TypeKind::Enum, Loc::default());
        let clk_decl = store.new_tree(TreeKind::SignalDecl, Loc::default());
        store.set_item(&clk_decl, Slot::Ident, Item::Ident(intern("clk"))).unwrap();
        store.set_item(&clk_decl, Slot::Type, Item::Ref(clk_type)).unwrap();
        store.set_tree_decls(&architecture, vec![clk_decl]).unwrap();

        let clk_ref = store.new_tree(TreeKind::NameRef, Loc::default());
        store.set_item(&clk_ref, Slot::Ident, Item::Ident(intern("clk"))).unwrap();
        let process = store.new_tree(TreeKind::Process, Loc::default());
        store.set_tree_operands(&process, vec![clk_ref]).unwrap();
        store.set_tree_stmts(&architecture, vec![process]).unwrap();

        let mut layouts = LayoutCache::new();
        let design = elaborate(&store, &mut layouts, &NoEntities, entity, architecture).unwrap();

        assert_eq!(design.signals.len(), 1);
        assert_eq!(design.processes.len(), 1);
        assert_eq!(design.processes[0].sensitivity, vec![0]);
    }

    #[test]
    fn instantiating_an_unresolvable_entity_is_an_error() {
        let mut store = new_store();
        let entity = store.new_tree(TreeKind::Entity, Loc::default());
        let architecture = store.new_tree(TreeKind::Architecture, Loc::default());

        let target = store.new_tree(TreeKind::NameRef, Loc::default());
        store.set_item(&target, Slot::Ident, Item::Ident(intern("missing_e"))).unwrap();
        let instance = store.new_tree(TreeKind::ComponentInstance, Loc::default());
        store.set_item(&instance, Slot::Target, Item::Ref(target)).unwrap();
        store.set_tree_stmts(&architecture, vec![instance]).unwrap();

        let mut layouts = LayoutCache::new();
        let result = elaborate(&store, &mut layouts, &NoEntities, entity, architecture);
        assert!(matches!(result, Err(Error::UnresolvedName { .. })));
    }
}
