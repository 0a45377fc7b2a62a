//! Abstract syntax tree: parsed and elaborated syntax built on the object
//! store, the same way [`crate::types`] specializes it for the type
//! system. Trees carry type references into `types` and identifier
//! references into `ident`.
//!
//! This module does not implement a parser; it defines the node kinds a
//! parser would produce and the accessors the elaborator
//! (`crate::elaborate`) and JIT lowering (`crate::ir`) read them through.

use crate::arena::Handle;
use crate::ident::Ident;
use crate::object::{ArrayElem, Item, Loc, Object, SchemaError, Slot, Store, Tag};
use crate::types::TypeHandle;

pub type TreeHandle = Handle<Object>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TreeKind {
    Entity,
    Architecture,
    Process,
    SignalDecl,
    VariableDecl,
    ConstantDecl,
    WaitStmt,
    SignalAssignStmt,
    VariableAssignStmt,
    IfStmt,
    AssertStmt,
    Literal,
    NameRef,
    BinaryExpr,
    UnaryExpr,
    Range,
    /// `label : entity_name generic map (...) port map (...)`.
    ComponentInstance,
}

impl TreeKind {
    const ALL: [TreeKind; 17] = [
        TreeKind::Entity,
        TreeKind::Architecture,
        TreeKind::Process,
        TreeKind::SignalDecl,
        TreeKind::VariableDecl,
        TreeKind::ConstantDecl,
        TreeKind::WaitStmt,
        TreeKind::SignalAssignStmt,
        TreeKind::VariableAssignStmt,
        TreeKind::IfStmt,
        TreeKind::AssertStmt,
        TreeKind::Literal,
        TreeKind::NameRef,
        TreeKind::BinaryExpr,
        TreeKind::UnaryExpr,
        TreeKind::Range,
        TreeKind::ComponentInstance,
    ];

    pub fn as_kind(self) -> crate::object::Kind {
        crate::object::Kind(self as u16)
    }

    fn slots(self) -> &'static [Slot] {
        match self {
            TreeKind::Entity => &[Slot::Ident, Slot::Generics, Slot::Ports],
            TreeKind::Architecture => &[Slot::Ident, Slot::Target, Slot::Decls, Slot::Stmts],
            TreeKind::Process => &[Slot::Ident, Slot::Operands, Slot::Decls, Slot::Stmts],
            TreeKind::SignalDecl => &[Slot::Ident, Slot::Type, Slot::Value],
            TreeKind::VariableDecl => &[Slot::Ident, Slot::Type, Slot::Value],
            TreeKind::ConstantDecl => &[Slot::Ident, Slot::Type, Slot::Value],
            TreeKind::WaitStmt => &[Slot::Operands, Slot::Value],
            TreeKind::SignalAssignStmt => &[Slot::Target, Slot::Value],
            TreeKind::VariableAssignStmt => &[Slot::Target, Slot::Value],
            TreeKind::IfStmt => &[Slot::Value, Slot::Stmts, Slot::Decls],
            TreeKind::AssertStmt => &[Slot::Value, Slot::Constraint],
            TreeKind::Literal => &[Slot::Type, Slot::Value],
            TreeKind::NameRef => &[Slot::Ident, Slot::Type],
            TreeKind::BinaryExpr => &[Slot::Ident, Slot::Operands, Slot::Type],
            TreeKind::UnaryExpr => &[Slot::Ident, Slot::Operands, Slot::Type],
            TreeKind::Range => &[Slot::Operands],
            TreeKind::ComponentInstance => &[Slot::Ident, Slot::Target, Slot::Generics, Slot::Ports],
        }
    }
}

/// Registers every tree kind's has-map. No kind-transition allow-list is
/// declared for trees: once parsed, a tree node's shape never changes kind
/// (unlike a type that completes from INCOMPLETE).
pub fn register(schema: &mut crate::object::SchemaTable) {
    for kind in TreeKind::ALL {
        schema.declare(Tag::Tree, kind.as_kind(), kind.slots());
    }
}

impl Store {
    pub fn new_tree(&mut self, kind: TreeKind, loc: Loc) -> TreeHandle {
        self.new_object(Tag::Tree, kind.as_kind(), loc)
    }

    pub fn tree_kind(&self, t: TreeHandle) -> TreeKind {
        let raw = self.get(&t).kind;
        TreeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_kind() == raw)
            .expect("tree object carries an unregistered kind")
    }

    pub fn tree_ident(&self, t: TreeHandle) -> Option<Ident> {
        self.get_item(&t, Slot::Ident).ok().and_then(Item::as_ident)
    }

    pub fn tree_type(&self, t: TreeHandle) -> Option<TypeHandle> {
        self.get_item(&t, Slot::Type).ok().and_then(Item::as_ref)
    }

    pub fn tree_target(&self, t: TreeHandle) -> Option<TreeHandle> {
        self.get_item(&t, Slot::Target).ok().and_then(Item::as_ref)
    }

    pub fn tree_value(&self, t: TreeHandle) -> Option<TreeHandle> {
        self.get_item(&t, Slot::Value).ok().and_then(Item::as_ref)
    }

    pub fn tree_stmts(&self, t: TreeHandle) -> Vec<TreeHandle> {
        self.get_item(&t, Slot::Stmts)
            .ok()
            .and_then(Item::as_array)
            .map(|items| items.iter().filter_map(array_elem_handle).collect())
            .unwrap_or_default()
    }

    pub fn tree_decls(&self, t: TreeHandle) -> Vec<TreeHandle> {
        self.get_item(&t, Slot::Decls)
            .ok()
            .and_then(Item::as_array)
            .map(|items| items.iter().filter_map(array_elem_handle).collect())
            .unwrap_or_default()
    }

    /// The sensitivity list of a `wait on ...` statement, or the operand
    /// list of a process (its sensitivity list if present).
    pub fn tree_operands(&self, t: TreeHandle) -> Vec<TreeHandle> {
        self.get_item(&t, Slot::Operands)
            .ok()
            .and_then(Item::as_array)
            .map(|items| items.iter().filter_map(array_elem_handle).collect())
            .unwrap_or_default()
    }

    pub fn set_tree_stmts(&mut self, t: &TreeHandle, stmts: Vec<TreeHandle>) -> Result<(), SchemaError> {
        let array = stmts.into_iter().map(ArrayElem::Obj).collect();
        self.set_item(t, Slot::Stmts, Item::Array(array))
    }

    pub fn set_tree_decls(&mut self, t: &TreeHandle, decls: Vec<TreeHandle>) -> Result<(), SchemaError> {
        let array = decls.into_iter().map(ArrayElem::Obj).collect();
        self.set_item(t, Slot::Decls, Item::Array(array))
    }

    pub fn set_tree_operands(&mut self, t: &TreeHandle, operands: Vec<TreeHandle>) -> Result<(), SchemaError> {
        let array = operands.into_iter().map(ArrayElem::Obj).collect();
        self.set_item(t, Slot::Operands, Item::Array(array))
    }

    pub fn tree_generics(&self, t: TreeHandle) -> Vec<TreeHandle> {
        self.get_item(&t, Slot::Generics)
            .ok()
            .and_then(Item::as_array)
            .map(|items| items.iter().filter_map(array_elem_handle).collect())
            .unwrap_or_default()
    }

    pub fn set_tree_generics(&mut self, t: &TreeHandle, generics: Vec<TreeHandle>) -> Result<(), SchemaError> {
        let array = generics.into_iter().map(ArrayElem::Obj).collect();
        self.set_item(t, Slot::Generics, Item::Array(array))
    }

    /// Port map associations: formal port name to actual-side tree.
    pub fn tree_ports(&self, t: TreeHandle) -> Vec<(Ident, TreeHandle)> {
        self.get_item(&t, Slot::Ports)
            .ok()
            .and_then(Item::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|elem| match elem {
                        ArrayElem::Param(p) => Some((p.name, p.ty)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_tree_ports(&mut self, t: &TreeHandle, ports: Vec<(Ident, TreeHandle)>) -> Result<(), SchemaError> {
        let array = ports
            .into_iter()
            .map(|(name, ty)| ArrayElem::Param(crate::object::Parameter { name, ty }))
            .collect();
        self.set_item(t, Slot::Ports, Item::Array(array))
    }
}

fn array_elem_handle(elem: &ArrayElem) -> Option<TreeHandle> {
    match elem {
        ArrayElem::Obj(h) => Some(*h),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::intern;
    use crate::object::{Loc, SchemaTable};
    use crate::types;

    fn store() -> Store {
        let mut schema = SchemaTable::new();
        types::register(&mut schema);
        register(&mut schema);
        Store::new(schema)
    }

    #[test]
    fn process_carries_its_statements_in_order() {
        let mut store = store();
        let wait = store.new_tree(TreeKind::WaitStmt, Loc::default());
        let assign = store.new_tree(TreeKind::SignalAssignStmt, Loc::default());
        let process = store.new_tree(TreeKind::Process, Loc::default());
        store.set_tree_stmts(&process, vec![assign, wait]).unwrap();

        assert_eq!(store.tree_stmts(process), vec![assign, wait]);
    }

    #[test]
    fn signal_assign_target_and_value_round_trip() {
        let mut store = store();
        let target = store.new_tree(TreeKind::NameRef, Loc::default());
        let name = intern("counter");
        store.set_item(&target, Slot::Ident, Item::Ident(name)).unwrap();

        let value = store.new_tree(TreeKind::Literal, Loc::default());
        let assign = store.new_tree(TreeKind::SignalAssignStmt, Loc::default());
        store.set_item(&assign, Slot::Target, Item::Ref(target)).unwrap();
        store.set_item(&assign, Slot::Value, Item::Ref(value)).unwrap();

        assert_eq!(store.tree_target(assign), Some(target));
        assert_eq!(store.tree_value(assign), Some(value));
        assert_eq!(store.tree_ident(target), Some(name));
    }

    #[test]
    fn set_tree_stmts_on_a_kind_without_the_slot_surfaces_a_schema_error() {
        let mut store = store();
        let decl = store.new_tree(TreeKind::SignalDecl, Loc::default());
        let stray = store.new_tree(TreeKind::Literal, Loc::default());
        let err = store.set_tree_stmts(&decl, vec![stray]);
        assert!(matches!(err, Err(crate::object::SchemaError::SlotNotDeclared { .. })));
    }

    #[test]
    fn wait_statement_sensitivity_list() {
        let mut store = store();
        let s1 = store.new_tree(TreeKind::NameRef, Loc::default());
        let s2 = store.new_tree(TreeKind::NameRef, Loc::default());
        let wait = store.new_tree(TreeKind::WaitStmt, Loc::default());
        store.set_tree_operands(&wait, vec![s1, s2]).unwrap();

        assert_eq!(store.tree_operands(wait), vec![s1, s2]);
    }
}
