//! Constant folding and peephole simplification, run on the IR
//! before backend selection. Simplifications must never introduce or
//! remove a trap: a `Div` by a literal zero is left unfolded so the
//! interpreter still raises it at run time, exactly as an un-simplified
//! program would.

use std::collections::HashSet;

use petgraph::visit::Dfs;

use super::{BasicBlock, BlockId, Instr, IrUnit, Opcode, Operand};

fn fold_binary(op: Opcode, a: i64, b: i64) -> Option<i64> {
    match op {
        Opcode::Add => Some(a.wrapping_add(b)),
        Opcode::Sub => Some(a.wrapping_sub(b)),
        Opcode::Mul => Some(a.wrapping_mul(b)),
        Opcode::Div if b != 0 => Some(a.wrapping_div(b)),
        Opcode::Div => None, // preserve the division-by-zero trap
        Opcode::Eq => Some((a == b) as i64),
        Opcode::Ne => Some((a != b) as i64),
        Opcode::Lt => Some((a < b) as i64),
        Opcode::Le => Some((a <= b) as i64),
        Opcode::Gt => Some((a > b) as i64),
        Opcode::Ge => Some((a >= b) as i64),
        _ => None,
    }
}

fn fold_instr(instr: &Instr) -> Instr {
    let is_arith = matches!(
        instr.op,
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge
    );
    if !is_arith {
        return instr.clone();
    }
    match (instr.a, instr.b) {
        (Some(Operand::Imm(a)), Some(Operand::Imm(b))) => match fold_binary(instr.op, a, b) {
            Some(value) => {
                let mut folded = Instr::new(Opcode::Load).with_a(Operand::Imm(value));
                folded.dst = instr.dst;
                folded
            }
            None => instr.clone(),
        },
        _ => peephole(instr),
    }
}

/// Single-instruction identities that do not require both operands to be
/// immediates: `x + 0`, `x * 1`, `x - 0`.
fn peephole(instr: &Instr) -> Instr {
    match (instr.op, instr.a, instr.b) {
        (Opcode::Add, Some(a), Some(Operand::Imm(0))) | (Opcode::Sub, Some(a), Some(Operand::Imm(0))) => {
            let mut simplified = Instr::new(Opcode::Load).with_a(a);
            simplified.dst = instr.dst;
            simplified
        }
        (Opcode::Mul, Some(a), Some(Operand::Imm(1))) => {
            let mut simplified = Instr::new(Opcode::Load).with_a(a);
            simplified.dst = instr.dst;
            simplified
        }
        _ => instr.clone(),
    }
}

pub fn fold_constants(unit: &IrUnit) -> IrUnit {
    let mut new_unit = unit.clone();
    for block in &mut new_unit.blocks {
        block.instrs = block.instrs.iter().map(fold_instr).collect();
    }
    new_unit
}

/// Drops blocks unreachable from the unit's entry block (its first block),
/// found via a `petgraph` DFS over the control-flow graph.
pub fn remove_unreachable_blocks(unit: &IrUnit) -> IrUnit {
    let entry = match unit.blocks.first().map(|b| b.id) {
        Some(id) => id,
        None => return unit.clone(),
    };

    let graph = unit.control_flow_graph();
    let entry_node = graph
        .node_indices()
        .find(|&n| graph[n] == entry)
        .expect("entry block missing from its own control-flow graph");

    let mut dfs = Dfs::new(&graph, entry_node);
    let mut reachable: HashSet<BlockId> = HashSet::new();
    while let Some(node) = dfs.next(&graph) {
        reachable.insert(graph[node]);
    }

    let mut new_unit = unit.clone();
    new_unit.blocks.retain(|b| reachable.contains(&b.id));
    new_unit
}

pub fn optimize(unit: &IrUnit) -> IrUnit {
    let folded = fold_constants(unit);
    remove_unreachable_blocks(&folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::intern;
    use crate::ir::RegId;

    fn unit(blocks: Vec<BasicBlock>) -> IrUnit {
        IrUnit {
            name: intern("opt_test"),
            param_types: Vec::new(),
            n_registers: 4,
            blocks,
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        }
    }

    #[test]
    fn folds_two_immediate_operands() {
        let block = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Opcode::Add)
                .with_dst(RegId(0))
                .with_a(Operand::Imm(2))
                .with_b(Operand::Imm(3))],
        };
        let folded = fold_constants(&unit(vec![block]));
        assert_eq!(folded.blocks[0].instrs[0].op, Opcode::Load);
        assert_eq!(folded.blocks[0].instrs[0].a, Some(Operand::Imm(5)));
    }

    #[test]
    fn never_folds_division_by_zero_so_the_trap_survives() {
        let block = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Opcode::Div)
                .with_dst(RegId(0))
                .with_a(Operand::Imm(10))
                .with_b(Operand::Imm(0))],
        };
        let folded = fold_constants(&unit(vec![block]));
        assert_eq!(folded.blocks[0].instrs[0].op, Opcode::Div);
    }

    #[test]
    fn drops_blocks_unreachable_from_entry() {
        let entry = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Opcode::Return).with_a(Operand::Imm(0))],
        };
        let dead = BasicBlock {
            id: BlockId(1),
            instrs: vec![Instr::new(Opcode::Return).with_a(Operand::Imm(1))],
        };
        let reduced = remove_unreachable_blocks(&unit(vec![entry, dead]));
        assert_eq!(reduced.blocks.len(), 1);
        assert_eq!(reduced.blocks[0].id, BlockId(0));
    }
}
