//! Interactive shell: a small command table over the simulation kernel, a
//! transport-agnostic output fan-out, and the wire transport trait the CLI
//! and any other frontend implement.
//!
//! [`ShellOutput`] is a small callback-point trait for simulation events
//! (prompt text, command results, errors), and [`Shell`] holds a
//! `Vec<Box<dyn ShellOutput>>` so more than one sink can observe a run at
//! once -- e.g. a terminal and a wave dump running side by side.

use crate::sim::{Kernel, RunOutcome, Time};

/// Callback points a shell frontend (terminal, JSON-RPC, test harness)
/// implements to observe a running simulation.
pub trait ShellOutput {
    fn on_stdout(&mut self, _line: &str) {}
    fn on_stderr(&mut self, _line: &str) {}
    fn on_backchannel(&mut self, _payload: &[u8]) {}
    fn on_signal_update(&mut self, _time: Time, _signal: &str, _value: i64) {}
    fn on_start(&mut self) {}
    fn on_restart(&mut self) {}
    fn on_next_step(&mut self, _time: Time) {}
}

/// The wire transport a shell frontend rides on: text for
/// human-readable command/response traffic, binary for waveform or other
/// bulk backchannel payloads.
pub trait ShellTransport {
    fn send_text(&mut self, line: &str);
    fn send_binary(&mut self, payload: &[u8]);
    fn on_text(&mut self) -> Option<String>;
    fn on_binary(&mut self) -> Option<Vec<u8>>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Reset,
    Run(Time),
    Continue,
    Examine(String),
    Force(String, i64),
    Release(String),
    Watch(String),
    Quit,
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    Unknown(String),
    BadArgument { command: String, detail: String },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unknown(cmd) => write!(f, "unknown command '{}'", cmd),
            CommandError::BadArgument { command, detail } => {
                write!(f, "bad argument to '{}': {}", command, detail)
            }
        }
    }
}

/// Parses one shell command line. Whitespace-separated tokens -- no
/// quoting, no escapes.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (head, rest) = tokens.split_first().ok_or_else(|| CommandError::Unknown(String::new()))?;

    match *head {
        "reset" => Ok(Command::Reset),
        "quit" | "exit" => Ok(Command::Quit),
        "continue" => Ok(Command::Continue),
        "run" => {
            let arg = rest.first().ok_or_else(|| CommandError::BadArgument {
                command: "run".to_string(),
                detail: "expected a duration, e.g. '10ns'".to_string(),
            })?;
            parse_duration(arg)
                .map(Command::Run)
                .ok_or_else(|| CommandError::BadArgument {
                    command: "run".to_string(),
                    detail: format!("'{}' is not a valid duration", arg),
                })
        }
        "examine" => rest
            .first()
            .map(|s| Command::Examine(s.to_string()))
            .ok_or_else(|| CommandError::BadArgument {
                command: "examine".to_string(),
                detail: "expected a signal name".to_string(),
            }),
        "force" => {
            if rest.len() < 2 {
                return Err(CommandError::BadArgument {
                    command: "force".to_string(),
                    detail: "expected a signal name and a value".to_string(),
                });
            }
            let value: i64 = rest[1].parse().map_err(|_| CommandError::BadArgument {
                command: "force".to_string(),
                detail: format!("'{}' is not an integer value", rest[1]),
            })?;
            Ok(Command::Force(rest[0].to_string(), value))
        }
        "release" => rest
            .first()
            .map(|s| Command::Release(s.to_string()))
            .ok_or_else(|| CommandError::BadArgument {
                command: "release".to_string(),
                detail: "expected a signal name".to_string(),
            }),
        "watch" => rest
            .first()
            .map(|s| Command::Watch(s.to_string()))
            .ok_or_else(|| CommandError::BadArgument {
                command: "watch".to_string(),
                detail: "expected a signal name".to_string(),
            }),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Parses VHDL-style time literals without a unit-separating space
/// (`10ns`, `1500ps`), reusing the femtosecond base conversions
/// `types::parse::parse_time` uses for the same units.
fn parse_duration(text: &str) -> Option<Time> {
    let split_at = text.find(|c: char| c.is_alphabetic())?;
    let (digits, unit) = text.split_at(split_at);
    let magnitude: i64 = digits.parse().ok()?;
    let per_unit = match unit {
        "fs" => 1,
        "ps" => 1_000,
        "ns" => 1_000_000,
        "us" => 1_000_000_000,
        "ms" => 1_000_000_000_000,
        "sec" | "s" => 1_000_000_000_000_000,
        _ => return None,
    };
    magnitude.checked_mul(per_unit)
}

/// Maps a signal name to its index in `Kernel::signals`, the bridge from
/// a shell command's textual signal name to the kernel's integer handles.
pub trait SignalLookup {
    fn lookup(&self, name: &str) -> Option<usize>;
}

/// Drives a [`Kernel`] from parsed commands and fans out every observable
/// event to every registered [`ShellOutput`] sink, run only between delta
/// cycles -- a command never interrupts a process mid-step
/// because `Kernel::run_for` itself only ever returns at a delta or time
/// boundary.
pub struct Shell<'a, L: SignalLookup> {
    kernel: &'a mut Kernel,
    lookup: L,
    outputs: Vec<Box<dyn ShellOutput>>,
}

impl<'a, L: SignalLookup> Shell<'a, L> {
    pub fn new(kernel: &'a mut Kernel, lookup: L) -> Self {
        Shell { kernel, lookup, outputs: Vec::new() }
    }

    pub fn add_output(&mut self, output: Box<dyn ShellOutput>) {
        self.outputs.push(output);
    }

    fn broadcast_stdout(&mut self, line: &str) {
        for output in &mut self.outputs {
            output.on_stdout(line);
        }
    }

    fn broadcast_stderr(&mut self, line: &str) {
        for output in &mut self.outputs {
            output.on_stderr(line);
        }
    }

    /// Dispatches one already-parsed command; returns `true` while the
    /// shell should keep running (`false` after `quit`).
    pub fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::Reset => {
                for output in &mut self.outputs {
                    output.on_restart();
                }
                self.broadcast_stdout("reset");
            }
            Command::Run(duration) => self.run(duration),
            Command::Continue => self.run(Time::MAX - self.kernel.time()),
            Command::Examine(name) => match self.lookup.lookup(&name) {
                Some(idx) => {
                    let value = self.kernel.signals[idx].current;
                    self.broadcast_stdout(&format!("{} = {}", name, value));
                }
                None => self.broadcast_stderr(&format!("no such signal '{}'", name)),
            },
            Command::Force(name, value) => match self.lookup.lookup(&name) {
                Some(idx) => {
                    self.kernel.force(idx, value);
                    self.broadcast_stdout(&format!("force {} {}", name, value));
                }
                None => self.broadcast_stderr(&format!("no such signal '{}'", name)),
            },
            Command::Release(name) => match self.lookup.lookup(&name) {
                Some(idx) => {
                    self.kernel.release(idx);
                    self.broadcast_stdout(&format!("release {}", name));
                }
                None => self.broadcast_stderr(&format!("no such signal '{}'", name)),
            },
            Command::Watch(name) => match self.lookup.lookup(&name) {
                Some(idx) => self.broadcast_stdout(&format!("watching {} (signal {})", name, idx)),
                None => self.broadcast_stderr(&format!("no such signal '{}'", name)),
            },
            Command::Quit => return false,
        }
        true
    }

    fn run(&mut self, duration: Time) {
        for output in &mut self.outputs {
            output.on_start();
        }
        match self.kernel.run_for(duration) {
            RunOutcome::Completed { final_time } => {
                for output in &mut self.outputs {
                    output.on_next_step(final_time);
                }
                self.broadcast_stdout(&format!("stopped at {} fs", final_time));
            }
            RunOutcome::Trapped { time, message } => {
                self.broadcast_stderr(&format!("fatal: {} (at {} fs)", message, time));
            }
        }
    }
}
