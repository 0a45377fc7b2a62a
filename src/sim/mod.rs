//! Discrete-event simulation kernel: delta cycles, signal event
//! propagation, process scheduling, and the watch/callback mechanism that
//! drives waveform dumping.
//!
//! The scope-tree DFS order used to break ties between processes woken by
//! the same event is precomputed from the elaborator's `petgraph::DiGraph`
//! scope tree (`crate::elaborate::ElaboratedDesign`).

pub mod signal;

use std::collections::{BinaryHeap, HashMap};

use crate::ident::Ident;
use crate::ir::interp::{self, Frame, Host, StepResult, WaitCondition};
use crate::ir::{BlockId, IrUnit};
use signal::RuntimeSignal;

/// 64-bit femtosecond simulation time counter.
pub type Time = i64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    Idle,
    Ready,
    Running,
    WaitingOnEvent,
    WaitingOnTime,
    Dead,
}

pub struct Process {
    pub name: Ident,
    pub sensitivity: Vec<usize>,
    pub state: ProcessState,
    pub wait_deadline: Option<Time>,
    resume_block: BlockId,
    frame: Frame,
}

impl Process {
    pub fn new(name: Ident, unit: &IrUnit, sensitivity: Vec<usize>) -> Self {
        Process {
            name,
            sensitivity,
            state: ProcessState::Ready,
            wait_deadline: None,
            resume_block: unit.blocks.first().map(|b| b.id).unwrap_or(BlockId(0)),
            frame: Frame::new(unit.n_registers),
        }
    }
}

#[derive(Clone, Debug)]
enum EventKind {
    DriverUpdate { signal: usize, driver: usize, value: i64 },
    ResumeProcess { process: usize },
    Force { signal: usize, value: i64 },
    Release { signal: usize },
    Stop,
}

#[derive(Clone, Debug)]
struct Event {
    time: Time,
    delta: u64,
    seq: u64,
    kind: EventKind,
}

/// Ordering is by `(time, delta, seq)` ascending; `seq` is the deterministic
/// tie-break for otherwise-equal events. `Ord` is implemented in reverse
/// so a `BinaryHeap` (a max-heap) can be used as a min-heap.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.delta, self.seq) == (other.time, other.delta, other.seq)
    }
}
impl Eq for Event {}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.time, other.delta, other.seq).cmp(&(self.time, self.delta, self.seq))
    }
}

struct EventQueue {
    heap: BinaryHeap<Event>,
    next_seq: u64,
}

impl EventQueue {
    fn new() -> Self {
        EventQueue { heap: BinaryHeap::new(), next_seq: 0 }
    }

    fn push(&mut self, time: Time, delta: u64, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event { time, delta, seq, kind });
    }

    fn next_stamp(&self) -> Option<(Time, u64)> {
        self.heap.peek().map(|e| (e.time, e.delta))
    }

    fn has_stamp(&self, time: Time, delta: u64) -> bool {
        self.heap.iter().any(|e| e.time == time && e.delta == delta)
    }

    /// Removes and returns every event at exactly `(time, delta)`,
    /// preserving insertion order within the stamp.
    fn drain_stamp(&mut self, time: Time, delta: u64) -> Vec<Event> {
        let mut taken = Vec::new();
        let mut rest = BinaryHeap::new();
        for event in self.heap.drain() {
            if event.time == time && event.delta == delta {
                taken.push(event);
            } else {
                rest.push(event);
            }
        }
        self.heap = rest;
        taken.sort_by_key(|e| e.seq);
        taken
    }
}

/// Registered (signal, callback) pair invoked at the end of any delta in
/// which the signal's resolved value changed, in registration order (spec
/// §4.8 "Watches").
pub struct Watch {
    pub signal: usize,
    callback: Box<dyn FnMut(Time, i64)>,
}

/// External collaborator that receives value-change notifications for
/// waveform dumping. The kernel never
/// writes a wave file itself; it only calls this trait.
pub trait WaveformSink {
    fn begin_dump(&mut self, top: &str, timescale: &str);
    fn declare_signal(&mut self, path: &str, type_descriptor: &str) -> u32;
    fn emit_time(&mut self, t: Time);
    fn emit_value(&mut self, key: u32, bytes: &[u8]);
    fn end_dump(&mut self);
}

#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    Completed { final_time: Time },
    Trapped { time: Time, message: String },
}

struct KernelHost<'a> {
    signals: &'a mut [RuntimeSignal],
    drivers: &'a mut HashMap<(usize, usize), usize>,
    process: usize,
    time: Time,
    next_delta: u64,
    pending: &'a mut Vec<(Time, u64, usize, usize, i64)>,
}

impl<'a> Host for KernelHost<'a> {
    fn read_signal(&mut self, signal: u32) -> i64 {
        self.signals[signal as usize].current
    }

    fn schedule_signal(&mut self, signal: u32, value: i64) {
        let key = (self.process, signal as usize);
        let signals = &mut self.signals;
        let driver = *self
            .drivers
            .entry(key)
            .or_insert_with(|| signals[signal as usize].add_driver());
        self.pending
            .push((self.time, self.next_delta, signal as usize, driver, value));
    }

    fn resolve_signal(&mut self, signal: u32) -> i64 {
        self.signals[signal as usize].current
    }

    fn call(&mut self, _name: &str, _args: &[i64]) -> i64 {
        0
    }
}

/// The runtime simulation kernel: owns every signal, process and its
/// compiled IR unit, and drives the delta-cycle loop of spec §4.8.
/// Single-threaded and cooperative: processes never run
/// concurrently.
pub struct Kernel {
    pub signals: Vec<RuntimeSignal>,
    units: Vec<IrUnit>,
    pub processes: Vec<Process>,
    /// Scope-tree DFS rank per process index, used to order processes woken
    /// by the same event.
    order: Vec<usize>,
    drivers: HashMap<(usize, usize), usize>,
    queue: EventQueue,
    time: Time,
    delta: u64,
    stop: bool,
    watches: Vec<Watch>,
}

impl Kernel {
    /// Builds a kernel and seeds the event queue with an initial
    /// `ResumeProcess` at `(0, 0)` for every process that starts in
    /// `Ready` state -- VHDL's initialization phase, in which every process
    /// runs once before simulation time begins advancing.
    pub fn new(signals: Vec<RuntimeSignal>, units: Vec<IrUnit>, processes: Vec<Process>, order: Vec<usize>) -> Self {
        let mut queue = EventQueue::new();
        for (idx, process) in processes.iter().enumerate() {
            if process.state == ProcessState::Ready {
                queue.push(0, 0, EventKind::ResumeProcess { process: idx });
            }
        }
        Kernel {
            signals,
            units,
            processes,
            order,
            drivers: HashMap::new(),
            queue,
            time: 0,
            delta: 0,
            stop: false,
            watches: Vec::new(),
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    /// Registers a watch; callbacks fire in registration order (spec
    /// §4.8).
    pub fn watch<F: FnMut(Time, i64) + 'static>(&mut self, signal: usize, callback: F) {
        self.watches.push(Watch { signal, callback: Box::new(callback) });
    }

    /// The shell's `force` command: overrides the signal's
    /// resolved value regardless of its drivers, from the next delta
    /// onward. `release` lifts the override.
    pub fn force(&mut self, signal: usize, value: i64) {
        self.queue.push(self.time, self.delta + 1, EventKind::Force { signal, value });
    }

    pub fn release(&mut self, signal: usize) {
        self.queue.push(self.time, self.delta + 1, EventKind::Release { signal });
    }

    /// A user-initiated `stop`: checked between processes and at delta
    /// boundaries; never interrupts an in-flight process before
    /// its next wait.
    pub fn request_stop(&mut self) {
        self.queue.push(self.time, self.delta, EventKind::Stop);
    }

    /// `run T`: schedules a synthetic stop event at `current_time + t`
    ///.
    pub fn schedule_stop_after(&mut self, t: Time) {
        self.queue.push(self.time + t, 0, EventKind::Stop);
    }

    /// Runs the kernel for `duration` femtoseconds, or until a fatal trap
    /// or a `stop` takes effect. Implements the cycle pseudocode of spec
    /// §4.8 steps 1-5.
    pub fn run_for(&mut self, duration: Time) -> RunOutcome {
        let deadline = self.time + duration;

        loop {
            if self.stop {
                return RunOutcome::Completed { final_time: self.time };
            }

            let stamp = match self.queue.next_stamp() {
                Some((t, d)) if t <= deadline => (t, d),
                _ => {
                    self.time = deadline;
                    return RunOutcome::Completed { final_time: self.time };
                }
            };
            self.time = stamp.0;
            self.delta = stamp.1;

            let events = self.queue.drain_stamp(self.time, self.delta);
            for event in &events {
                match &event.kind {
                    EventKind::DriverUpdate { signal, driver, value } => {
                        self.signals[*signal].set_pending(*driver, *value);
                    }
                    EventKind::ResumeProcess { process } => {
                        self.processes[*process].state = ProcessState::Ready;
                    }
                    EventKind::Force { signal, value } => self.signals[*signal].force(*value),
                    EventKind::Release { signal } => self.signals[*signal].release(),
                    EventKind::Stop => self.stop = true,
                }
            }

            let mut changed = Vec::new();
            for (idx, signal) in self.signals.iter_mut().enumerate() {
                match signal.resolve() {
                    Ok(true) => changed.push(idx),
                    Ok(false) => {}
                    Err(message) => return RunOutcome::Trapped { time: self.time, message },
                }
            }

            for process in &mut self.processes {
                if process.state == ProcessState::WaitingOnEvent
                    && process.sensitivity.iter().any(|s| changed.contains(s))
                {
                    process.state = ProcessState::Ready;
                }
            }

            for watch in &mut self.watches {
                if changed.contains(&watch.signal) {
                    (watch.callback)(self.time, self.signals[watch.signal].current);
                }
            }

            let mut ready: Vec<usize> = (0..self.processes.len())
                .filter(|&i| self.processes[i].state == ProcessState::Ready)
                .collect();
            ready.sort_by_key(|&i| (self.order.get(i).copied().unwrap_or(0), i));

            for pidx in ready {
                if self.stop {
                    break;
                }
                if let Some(outcome) = self.run_process(pidx) {
                    return outcome;
                }
            }

            if self.queue.has_stamp(self.time, self.delta + 1) {
                self.delta += 1;
            } else if self.queue.next_stamp().map(|(t, _)| t).unwrap_or(deadline) > deadline {
                self.time = deadline;
                return RunOutcome::Completed { final_time: self.time };
            }
            // otherwise loop: `next_stamp` picks up the next (possibly later) time.
        }
    }

    fn run_process(&mut self, pidx: usize) -> Option<RunOutcome> {
        self.processes[pidx].state = ProcessState::Running;
        let unit = &self.units[pidx];
        let mut pending = Vec::new();
        let resume_block = self.processes[pidx].resume_block;

        let result = {
            let process = &mut self.processes[pidx];
            let mut host = KernelHost {
                signals: &mut self.signals,
                drivers: &mut self.drivers,
                process: pidx,
                time: self.time,
                next_delta: self.delta + 1,
                pending: &mut pending,
            };
            interp::run(unit, &mut process.frame, resume_block, &mut host)
        };

        for (time, delta, signal, driver, value) in pending {
            self.queue.push(time, delta, EventKind::DriverUpdate { signal, driver, value });
        }

        match result {
            StepResult::Halted(_) => {
                self.processes[pidx].state = ProcessState::Dead;
                None
            }
            StepResult::Waiting { condition, resume } => {
                self.processes[pidx].resume_block = resume;
                match condition {
                    WaitCondition::Time(dt) => {
                        let deadline = self.time + dt;
                        self.processes[pidx].state = ProcessState::WaitingOnTime;
                        self.processes[pidx].wait_deadline = Some(deadline);
                        self.queue.push(deadline, 0, EventKind::ResumeProcess { process: pidx });
                    }
                    WaitCondition::Signals(sigs) => {
                        self.processes[pidx].sensitivity = sigs.into_iter().map(|s| s as usize).collect();
                        self.processes[pidx].state = ProcessState::WaitingOnEvent;
                    }
                }
                None
            }
            StepResult::Trapped(message) => {
                self.processes[pidx].state = ProcessState::Dead;
                Some(RunOutcome::Trapped { time: self.time, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::intern;
    use crate::ir::{BasicBlock, Instr, Opcode, Operand, RegId};

    /// A process that reads signal 0, adds 1, schedules the result back
    /// onto signal 0, then waits 10 ns and repeats.
    fn counter_unit() -> IrUnit {
        let body = BasicBlock {
            id: BlockId(0),
            instrs: vec![
                Instr::new(Opcode::SignalRead).with_dst(RegId(0)).with_a(Operand::Imm(0)),
                Instr::new(Opcode::Add)
                    .with_dst(RegId(1))
                    .with_a(Operand::Reg(RegId(0)))
                    .with_b(Operand::Imm(1)),
                Instr::new(Opcode::SignalSchedule)
                    .with_a(Operand::Imm(0))
                    .with_b(Operand::Reg(RegId(1))),
                Instr::new(Opcode::Wait).with_a(Operand::Imm(10_000_000)).with_target(BlockId(0)),
            ],
        };
        IrUnit {
            name: intern("counter_proc"),
            param_types: Vec::new(),
            n_registers: 2,
            blocks: vec![body],
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        }
    }

    fn counter_kernel() -> Kernel {
        let signal = RuntimeSignal::new(intern("count"), petgraph::graph::NodeIndex::new(0), 0, None);
        let unit = counter_unit();
        let process = Process::new(intern("counter_proc"), &unit, Vec::new());
        Kernel::new(vec![signal], vec![unit], vec![process], vec![0])
    }

    #[test]
    fn empty_design_runs_zero_fs_with_no_events() {
        let mut kernel = Kernel::new(Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let outcome = kernel.run_for(0);
        assert_eq!(outcome, RunOutcome::Completed { final_time: 0 });
    }

    #[test]
    fn counter_increments_ten_times_over_95ns() {
        // Resumes land at 0, 10, 20, ..., 90 ns (ten of them); the eleventh
        // would land exactly at 100ns, so stopping at 95ns keeps it out of
        // the window and leaves an exact count to assert on.
        let mut kernel = counter_kernel();
        let mut seen = Vec::new();
        {
            let values: std::rc::Rc<std::cell::RefCell<Vec<i64>>> = Default::default();
            let values_clone = values.clone();
            kernel.watch(0, move |_, v| values_clone.borrow_mut().push(v));
            let outcome = kernel.run_for(95_000_000);
            assert_eq!(outcome, RunOutcome::Completed { final_time: 95_000_000 });
            seen = values.borrow().clone();
        }
        assert_eq!(seen, (1..=10).collect::<Vec<i64>>());
        assert_eq!(kernel.time(), 95_000_000);
    }

    /// Same counter shape, but waiting *before* the first increment (the
    /// natural `wait for 10 ns; cnt <= cnt + 1;` ordering) instead of
    /// incrementing immediately at t=0. This lands resumes at 10, 20, ...,
    /// 100 ns and matches the scenario as stated: ten events, values 1..10,
    /// stopped exactly at the run's requested end time.
    #[test]
    fn counter_increments_ten_times_over_exactly_100ns_when_wait_leads() {
        let body = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Opcode::Wait).with_a(Operand::Imm(10_000_000)).with_target(BlockId(1))],
        };
        let bump = BasicBlock {
            id: BlockId(1),
            instrs: vec![
                Instr::new(Opcode::SignalRead).with_dst(RegId(0)).with_a(Operand::Imm(0)),
                Instr::new(Opcode::Add)
                    .with_dst(RegId(1))
                    .with_a(Operand::Reg(RegId(0)))
                    .with_b(Operand::Imm(1)),
                Instr::new(Opcode::SignalSchedule)
                    .with_a(Operand::Imm(0))
                    .with_b(Operand::Reg(RegId(1))),
                Instr::new(Opcode::Wait).with_a(Operand::Imm(10_000_000)).with_target(BlockId(1)),
            ],
        };
        let unit = IrUnit {
            name: intern("counter_proc"),
            param_types: Vec::new(),
            n_registers: 2,
            blocks: vec![body, bump],
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        };
        let signal = RuntimeSignal::new(intern("count"), petgraph::graph::NodeIndex::new(0), 0, None);
        let process = Process::new(intern("counter_proc"), &unit, Vec::new());
        let mut kernel = Kernel::new(vec![signal], vec![unit], vec![process], vec![0]);

        let values: std::rc::Rc<std::cell::RefCell<Vec<i64>>> = Default::default();
        let values_clone = values.clone();
        kernel.watch(0, move |_, v| values_clone.borrow_mut().push(v));

        let outcome = kernel.run_for(100_000_000);

        assert_eq!(outcome, RunOutcome::Completed { final_time: 100_000_000 });
        assert_eq!(values.borrow().as_slice(), (1..=10).collect::<Vec<i64>>().as_slice());
        assert_eq!(kernel.time(), 100_000_000);
    }

    #[test]
    fn process_resumes_exactly_once_per_sensitized_change() {
        // A process waiting on signal 0's change increments a counter
        // signal (signal 1) each time it resumes, then re-waits on signal 0.
        let wait_block = BasicBlock {
            id: BlockId(0),
            instrs: vec![Instr::new(Opcode::Wait).with_target(BlockId(1)).with_aux("0")],
        };
        let bump_block = BasicBlock {
            id: BlockId(1),
            instrs: vec![
                Instr::new(Opcode::SignalRead).with_dst(RegId(0)).with_a(Operand::Imm(1)),
                Instr::new(Opcode::Add)
                    .with_dst(RegId(1))
                    .with_a(Operand::Reg(RegId(0)))
                    .with_b(Operand::Imm(1)),
                Instr::new(Opcode::SignalSchedule)
                    .with_a(Operand::Imm(1))
                    .with_b(Operand::Reg(RegId(1))),
                Instr::new(Opcode::Wait).with_target(BlockId(1)).with_aux("0"),
            ],
        };
        let unit = IrUnit {
            name: intern("watcher"),
            param_types: Vec::new(),
            n_registers: 2,
            blocks: vec![wait_block, bump_block],
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        };
        let driven = RuntimeSignal::new(intern("s"), petgraph::graph::NodeIndex::new(0), 0, None);
        let counter = RuntimeSignal::new(intern("resumes"), petgraph::graph::NodeIndex::new(0), 0, None);
        let process = Process::new(intern("watcher"), &unit, vec![0]);
        let mut kernel = Kernel::new(vec![driven, counter], vec![unit], vec![process], vec![0]);

        kernel.force(0, 1); // toggle at t=0, takes effect delta 1
        kernel.queue.push(5_000_000, 0, EventKind::Force { signal: 0, value: 2 });
        kernel.queue.push(7_000_000, 0, EventKind::Force { signal: 0, value: 3 });

        kernel.run_for(10_000_000);
        // Three distinct changes to signal 0 (the force, then the two
        // scheduled updates) -> exactly three resumes, not a fourth for
        // the process's own write to signal 1 (outside its sensitivity).
        assert_eq!(kernel.signals[1].current, 3);
    }

    #[test]
    fn assertion_trap_halts_the_run_at_its_location() {
        let unit = IrUnit {
            name: intern("asserter"),
            param_types: Vec::new(),
            n_registers: 0,
            blocks: vec![BasicBlock {
                id: BlockId(0),
                instrs: vec![Instr::new(Opcode::Trap).with_aux("assertion violation")],
            }],
            constants: Vec::new(),
            referenced_libraries: Vec::new(),
        };
        let mut process = Process::new(intern("asserter"), &unit, Vec::new());
        process.state = ProcessState::Idle; // suppress the t=0 initialization run
        let mut kernel = Kernel::new(Vec::new(), vec![unit], vec![process], vec![0]);
        kernel.queue.push(3_000_000, 0, EventKind::ResumeProcess { process: 0 });

        let outcome = kernel.run_for(1_000_000_000);
        assert_eq!(
            outcome,
            RunOutcome::Trapped { time: 3_000_000, message: "assertion violation".to_string() }
        );
    }

    #[test]
    fn stop_takes_effect_only_between_processes() {
        let mut kernel = counter_kernel();
        kernel.request_stop();
        let outcome = kernel.run_for(100_000_000);
        assert_eq!(outcome, RunOutcome::Completed { final_time: 0 });
    }
}
