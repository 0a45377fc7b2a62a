//! Reference interpreter backend: always present, defines
//! observable semantics that an optional native backend must match bit for
//! bit. Everything the IR can do that reaches outside the register file --
//! signal reads/schedules and subprogram calls -- goes through a [`Host`]
//! trait object supplied by the caller (the simulation kernel during a
//! run, a `NullHost` in standalone JIT tests).

use super::{BasicBlock, BlockId, IrUnit, Opcode, Operand, RegId};

/// What an IR unit's execution is suspended on, mirroring the kernel's
/// process states.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitCondition {
    Time(i64),
    Signals(Vec<u32>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepResult {
    Halted(Option<i64>),
    /// Suspended at a `wait`. `resume` is the block the kernel re-enters
    /// `run` at once `condition` is satisfied -- carried on the `Wait`
    /// instruction's `target` field, the same slot `Jump`/`Branch` use for
    /// their own successors.
    Waiting { condition: WaitCondition, resume: BlockId },
    Trapped(String),
}

/// The interpreter's register file. `regs[i]` holds the raw bit pattern of
/// register `i`; integers are stored directly, reals via `f64::to_bits`.
pub struct Frame {
    pub regs: Vec<i64>,
}

impl Frame {
    pub fn new(n_registers: u32) -> Self {
        Frame { regs: vec![0; n_registers as usize] }
    }
}

/// Everything an IR unit can reach outside its own register file.
pub trait Host {
    fn read_signal(&mut self, signal: u32) -> i64;
    fn schedule_signal(&mut self, signal: u32, value: i64);
    fn resolve_signal(&mut self, signal: u32) -> i64;
    fn call(&mut self, name: &str, args: &[i64]) -> i64;
}

/// A host with no signals and no callable units, for interpreting
/// arithmetic-only IR in isolation.
pub struct NullHost;

impl Host for NullHost {
    fn read_signal(&mut self, _signal: u32) -> i64 {
        0
    }
    fn schedule_signal(&mut self, _signal: u32, _value: i64) {}
    fn resolve_signal(&mut self, _signal: u32) -> i64 {
        0
    }
    fn call(&mut self, _name: &str, _args: &[i64]) -> i64 {
        0
    }
}

fn operand_value(frame: &Frame, op: Operand) -> i64 {
    match op {
        Operand::Reg(r) => frame.regs[r.0 as usize],
        Operand::Imm(v) => v,
    }
}

fn set_reg(frame: &mut Frame, r: Option<RegId>, value: i64) {
    if let Some(r) = r {
        frame.regs[r.0 as usize] = value;
    }
}

/// Runs `unit` from `start` to its next `wait`, `return` or `trap`. IR
/// between two `wait` ops is atomic with respect to signal updates (spec
/// §4.8): the kernel never interleaves another process's instructions
/// inside one call to `run`.
pub fn run(unit: &IrUnit, frame: &mut Frame, start: BlockId, host: &mut dyn Host) -> StepResult {
    let mut block: &BasicBlock = unit.block(start);

    loop {
        for instr in &block.instrs {
            match instr.op {
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let a = operand_value(frame, instr.a.expect("binary op missing operand a"));
                    let b = operand_value(frame, instr.b.expect("binary op missing operand b"));
                    let result = match instr.op {
                        Opcode::Add => a.wrapping_add(b),
                        Opcode::Sub => a.wrapping_sub(b),
                        Opcode::Mul => a.wrapping_mul(b),
                        Opcode::Div => {
                            if b == 0 {
                                return StepResult::Trapped("division by zero".to_string());
                            }
                            a.wrapping_div(b)
                        }
                        _ => unreachable!(),
                    };
                    set_reg(frame, instr.dst, result);
                }
                Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let a = operand_value(frame, instr.a.expect("compare op missing operand a"));
                    let b = operand_value(frame, instr.b.expect("compare op missing operand b"));
                    let result = match instr.op {
                        Opcode::Eq => a == b,
                        Opcode::Ne => a != b,
                        Opcode::Lt => a < b,
                        Opcode::Le => a <= b,
                        Opcode::Gt => a > b,
                        Opcode::Ge => a >= b,
                        _ => unreachable!(),
                    };
                    set_reg(frame, instr.dst, result as i64);
                }
                Opcode::Load => {
                    let a = operand_value(frame, instr.a.expect("load missing operand a"));
                    set_reg(frame, instr.dst, a);
                }
                Opcode::Store => {
                    let a = operand_value(frame, instr.a.expect("store missing operand a"));
                    set_reg(frame, instr.dst, a);
                }
                Opcode::ElemPtr => {
                    let base = operand_value(frame, instr.a.expect("elem_ptr missing base"));
                    let offset = operand_value(frame, instr.b.expect("elem_ptr missing offset"));
                    set_reg(frame, instr.dst, base.wrapping_add(offset));
                }
                Opcode::SignalRead => {
                    let signal = operand_value(frame, instr.a.expect("signal_read missing signal id")) as u32;
                    let value = host.read_signal(signal);
                    set_reg(frame, instr.dst, value);
                }
                Opcode::SignalSchedule => {
                    let signal = operand_value(frame, instr.a.expect("signal_schedule missing signal id")) as u32;
                    let value = operand_value(frame, instr.b.expect("signal_schedule missing value"));
                    host.schedule_signal(signal, value);
                }
                Opcode::SignalResolve => {
                    let signal = operand_value(frame, instr.a.expect("signal_resolve missing signal id")) as u32;
                    let value = host.resolve_signal(signal);
                    set_reg(frame, instr.dst, value);
                }
                Opcode::Call => {
                    let name = instr.aux.as_deref().unwrap_or("");
                    let arg = instr.a.map(|op| operand_value(frame, op)).unwrap_or(0);
                    let result = host.call(name, &[arg]);
                    set_reg(frame, instr.dst, result);
                }
                Opcode::Return => {
                    let value = instr.a.map(|op| operand_value(frame, op));
                    return StepResult::Halted(value);
                }
                Opcode::Wait => {
                    let resume = instr.target.expect("wait instruction missing its resume block");
                    let condition = match instr.a {
                        Some(op) => WaitCondition::Time(operand_value(frame, op)),
                        None => WaitCondition::Signals(
                            instr
                                .aux
                                .as_deref()
                                .unwrap_or("")
                                .split(',')
                                .filter(|s| !s.is_empty())
                                .filter_map(|s| s.parse().ok())
                                .collect(),
                        ),
                    };
                    return StepResult::Waiting { condition, resume };
                }
                Opcode::Jump => {
                    block = unit.block(instr.target.expect("jump missing target"));
                    return step_into(unit, frame, block.id, host);
                }
                Opcode::Branch => {
                    let cond = operand_value(frame, instr.a.expect("branch missing condition"));
                    let target = if cond != 0 {
                        instr.target.expect("branch missing then-target")
                    } else {
                        instr.target2.expect("branch missing else-target")
                    };
                    return step_into(unit, frame, target, host);
                }
                Opcode::Trap => {
                    return StepResult::Trapped(instr.aux.clone().unwrap_or_default());
                }
            }
        }
        return StepResult::Trapped("control fell off the end of a basic block".to_string());
    }
}

fn step_into(unit: &IrUnit, frame: &mut Frame, target: BlockId, host: &mut dyn Host) -> StepResult {
    run(unit, frame, target, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instr, Opcode as Op};
    use crate::ident::intern;

    fn unit_with_blocks(blocks: Vec<BasicBlock>) -> IrUnit {
        IrUnit {
            name: intern("test_unit"),
            param_types: Vec::new(),
            n_registers: 8,
            blocks,
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        }
    }

    #[test]
    fn adds_two_immediates_and_returns() {
        let block = BasicBlock {
            id: BlockId(0),
            instrs: vec![
                Instr::new(Op::Add)
                    .with_dst(RegId(0))
                    .with_a(Operand::Imm(2))
                    .with_b(Operand::Imm(3)),
                Instr::new(Op::Return).with_a(Operand::Reg(RegId(0))),
            ],
        };
        let unit = unit_with_blocks(vec![block]);
        let mut frame = Frame::new(unit.n_registers);
        let result = run(&unit, &mut frame, BlockId(0), &mut NullHost);
        assert_eq!(result, StepResult::Halted(Some(5)));
    }

    #[test]
    fn division_by_zero_traps_instead_of_panicking() {
        let block = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Op::Div)
                .with_dst(RegId(0))
                .with_a(Operand::Imm(10))
                .with_b(Operand::Imm(0))],
        };
        let unit = unit_with_blocks(vec![block]);
        let mut frame = Frame::new(unit.n_registers);
        let result = run(&unit, &mut frame, BlockId(0), &mut NullHost);
        assert_eq!(result, StepResult::Trapped("division by zero".to_string()));
    }

    #[test]
    fn wait_on_time_suspends_with_the_requested_deadline() {
        let block = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Op::Wait)
                .with_a(Operand::Imm(10_000_000))
                .with_target(BlockId(0))],
        };
        let unit = unit_with_blocks(vec![block]);
        let mut frame = Frame::new(unit.n_registers);
        let result = run(&unit, &mut frame, BlockId(0), &mut NullHost);
        assert_eq!(
            result,
            StepResult::Waiting { condition: WaitCondition::Time(10_000_000), resume: BlockId(0) }
        );
    }

    #[test]
    fn branch_selects_target_by_condition_register() {
        let then_block = BasicBlock {
            id: BlockId(1),
            instrs: vec![Instr::new(Op::Return).with_a(Operand::Imm(1))],
        };
        let else_block = BasicBlock {
            id: BlockId(2),
            instrs: vec![Instr::new(Op::Return).with_a(Operand::Imm(0))],
        };
        let entry = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Op::Branch)
                .with_a(Operand::Imm(1))
                .with_target(BlockId(1))
                .with_target2(BlockId(2))],
        };
        let unit = unit_with_blocks(vec![entry, then_block, else_block]);
        let mut frame = Frame::new(unit.n_registers);
        let result = run(&unit, &mut frame, BlockId(0), &mut NullHost);
        assert_eq!(result, StepResult::Halted(Some(1)));
    }
}
