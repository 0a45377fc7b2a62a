//! JIT IR and code generator: a three-address, register-based
//! representation lowered from elaborated trees, with an always-present
//! interpreter backend and a native-codegen trait seam.
//!
//! The unit's basic-block graph is built on `petgraph::DiGraph`: blocks
//! are nodes, control flow is edges, which is what the peephole pass's
//! dominance queries need.

pub mod interp;
pub mod opt;

use crate::ident::Ident;
use crate::types::TypeHandle;

/// Compiles an `IrUnit` to native machine code, as an alternative to
/// `interp::run`. A contract-only collaborator the way `sim::WaveformSink`
/// and `shell::ShellTransport` are: no implementation lives in this crate,
/// the interpreter remains the semantic oracle, and a host embedding this
/// crate on a platform worth JIT-compiling for provides one.
pub trait NativeBackend {
    /// Lowers `unit` to a callable native routine, returning an opaque
    /// handle the backend can later invoke given a `Host`'s signal/call
    /// surface. Implementations choose their own calling convention.
    fn compile(&mut self, unit: &IrUnit) -> Result<u64, String>;

    /// Discards a routine produced by `compile`, so a backend can reclaim
    /// its generated code when a unit is recompiled or unloaded.
    fn free(&mut self, handle: u64);
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operand {
    Reg(RegId),
    /// A 64-bit immediate; float immediates are carried as their bit
    /// pattern (`f64::to_bits`), matching the interpreter's register file.
    Imm(i64),
}

impl Operand {
    pub fn as_imm(self) -> Option<i64> {
        match self {
            Operand::Imm(v) => Some(v),
            Operand::Reg(_) => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Load,
    Store,
    /// Record/array element access: `dst = base + layout_offset(a, field)`.
    ElemPtr,
    SignalRead,
    SignalSchedule,
    SignalResolve,
    /// Suspends the owning process until its sensitivity condition is met;
    /// the only suspension point in an IR unit.
    Wait,
    Call,
    Return,
    /// Unconditional control transfer to `target`.
    Jump,
    /// `a` is the condition register; jumps to `target` if non-zero,
    /// `target2` otherwise.
    Branch,
    /// Raises a runtime trap (failed assertion, unresolved multi-driver,
    /// out-of-range index) carrying `aux` as the message.
    Trap,
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub op: Opcode,
    pub dst: Option<RegId>,
    pub a: Option<Operand>,
    pub b: Option<Operand>,
    pub target: Option<BlockId>,
    pub target2: Option<BlockId>,
    pub aux: Option<String>,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Instr {
            op,
            dst: None,
            a: None,
            b: None,
            target: None,
            target2: None,
            aux: None,
        }
    }

    pub fn with_dst(mut self, dst: RegId) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_a(mut self, a: Operand) -> Self {
        self.a = Some(a);
        self
    }

    pub fn with_b(mut self, b: Operand) -> Self {
        self.b = Some(b);
        self
    }

    pub fn with_target(mut self, target: BlockId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_target2(mut self, target2: BlockId) -> Self {
        self.target2 = Some(target2);
        self
    }

    pub fn with_aux<S: Into<String>>(mut self, aux: S) -> Self {
        self.aux = Some(aux.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
}

/// A compiled function or process body: parameter types, local register
/// count, basic blocks, and metadata captured at compile time.
#[derive(Clone, Debug)]
pub struct IrUnit {
    pub name: Ident,
    pub param_types: Vec<TypeHandle>,
    pub n_registers: u32,
    pub blocks: Vec<BasicBlock>,
    pub constants: Vec<i64>,
    pub referenced_libraries: Vec<String>,
}

impl IrUnit {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .expect("jump/branch target block not present in unit")
    }

    /// Successor block ids of every block, for the peephole pass's
    /// dominance queries -- built as a `petgraph::DiGraph`.
    pub fn control_flow_graph(&self) -> petgraph::graph::DiGraph<BlockId, ()> {
        let mut graph = petgraph::graph::DiGraph::new();
        let mut nodes = std::collections::HashMap::new();
        for block in &self.blocks {
            nodes.insert(block.id, graph.add_node(block.id));
        }
        for block in &self.blocks {
            for instr in &block.instrs {
                if let Some(target) = instr.target {
                    graph.add_edge(nodes[&block.id], nodes[&target], ());
                }
                if let Some(target2) = instr.target2 {
                    graph.add_edge(nodes[&block.id], nodes[&target2], ());
                }
            }
        }
        graph
    }
}
