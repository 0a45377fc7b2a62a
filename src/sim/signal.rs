//! Runtime signals. A signal holds its current value, one pending slot per
//! driver, and an optional resolution function invoked when more than one
//! driver has a pending value in the same delta.

use petgraph::graph::NodeIndex;

use crate::ident::Ident;

/// The nine-value `std_logic` enumeration, in the order IEEE 1164 declares
/// it (the order the resolution table below is indexed by).
pub const STD_LOGIC_U: i64 = 0;
pub const STD_LOGIC_X: i64 = 1;
pub const STD_LOGIC_0: i64 = 2;
pub const STD_LOGIC_1: i64 = 3;
pub const STD_LOGIC_Z: i64 = 4;
pub const STD_LOGIC_W: i64 = 5;
pub const STD_LOGIC_L: i64 = 6;
pub const STD_LOGIC_H: i64 = 7;
pub const STD_LOGIC_DONT_CARE: i64 = 8;

/// IEEE 1164 `resolved` table: `TABLE[a][b]` for the nine-value logic
/// system, rows/columns ordered U X 0 1 Z W L H -.
const RESOLUTION_TABLE: [[i64; 9]; 9] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 1, 1, 1, 1],
    [0, 1, 2, 1, 2, 2, 2, 2, 1],
    [0, 1, 1, 3, 3, 3, 3, 3, 1],
    [0, 1, 2, 3, 4, 5, 6, 7, 1],
    [0, 1, 2, 3, 5, 5, 5, 5, 1],
    [0, 1, 2, 3, 6, 5, 6, 5, 1],
    [0, 1, 2, 3, 7, 5, 5, 7, 1],
    [0, 1, 1, 1, 1, 1, 1, 1, 1],
];

fn resolve_pair(a: i64, b: i64) -> i64 {
    RESOLUTION_TABLE[a as usize][b as usize]
}

/// The built-in resolution function for `std_logic` nets: folds every
/// active driver value through the IEEE table pairwise. An undriven net
/// (no active drivers) resolves to `'U'`, handled by the caller.
pub fn resolve_std_logic(drivers: &[i64]) -> i64 {
    drivers.iter().copied().fold(STD_LOGIC_Z, resolve_pair)
}

pub struct RuntimeSignal {
    pub name: Ident,
    pub scope: NodeIndex,
    pub current: i64,
    pending: Vec<Option<i64>>,
    resolution: Option<fn(&[i64]) -> i64>,
    /// Set by the shell's `force` command; while present it overrides
    /// whatever the signal's own drivers resolve to, independent of the
    /// per-delta `pending` slots. Cleared by `release`.
    forced: Option<i64>,
}

impl RuntimeSignal {
    pub fn new(name: Ident, scope: NodeIndex, initial: i64, resolution: Option<fn(&[i64]) -> i64>) -> Self {
        RuntimeSignal { name, scope, current: initial, pending: Vec::new(), resolution, forced: None }
    }

    pub fn force(&mut self, value: i64) {
        self.forced = Some(value);
    }

    pub fn release(&mut self) {
        self.forced = None;
    }

    /// Registers a new driver, returning its id (an index stable for the
    /// lifetime of the signal).
    pub fn add_driver(&mut self) -> usize {
        self.pending.push(None);
        self.pending.len() - 1
    }

    pub fn set_pending(&mut self, driver: usize, value: i64) {
        self.pending[driver] = Some(value);
    }

    /// Applies this delta's driver updates: if more
    /// than one driver has a pending value and a resolution function is
    /// present, combine them; with exactly one, adopt it; with more than
    /// one and no resolution function this is a fatal trap (elaboration
    /// should have rejected the design, but this is enforced at run time
    /// too).
    ///
    /// Returns `Ok(true)` iff the resolved value changed. A standing
    /// `force` wins over every driver but still consumes this delta's
    /// pending values, so a released signal resumes from its drivers'
    /// latest state rather than a stale pre-force one.
    pub fn resolve(&mut self) -> Result<bool, String> {
        let active: Vec<i64> = self.pending.iter().filter_map(|v| *v).collect();
        let driven = match active.len() {
            0 => None,
            1 => Some(active[0]),
            _ => match self.resolution {
                Some(f) => Some(f(&active)),
                None => {
                    return Err(format!(
                        "signal '{}' has {} active drivers with no resolution function",
                        self.name,
                        active.len()
                    ))
                }
            },
        };
        for slot in &mut self.pending {
            *slot = None;
        }
        let result = match (self.forced, driven) {
            (Some(v), _) => v,
            (None, Some(v)) => v,
            (None, None) => return Ok(false),
        };
        let changed = result != self.current;
        self.current = result;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_drivers_0_and_z_resolve_to_0() {
        assert_eq!(resolve_std_logic(&[STD_LOGIC_0, STD_LOGIC_Z]), STD_LOGIC_0);
    }

    #[test]
    fn drivers_0_and_1_resolve_to_x() {
        assert_eq!(resolve_std_logic(&[STD_LOGIC_0, STD_LOGIC_1]), STD_LOGIC_X);
    }

    #[test]
    fn single_driver_is_adopted_without_calling_resolution() {
        let mut signal = RuntimeSignal::new(crate::ident::intern("s"), NodeIndex::new(0), STD_LOGIC_U, None);
        let d = signal.add_driver();
        signal.set_pending(d, STD_LOGIC_1);
        assert_eq!(signal.resolve(), Ok(true));
        assert_eq!(signal.current, STD_LOGIC_1);
    }

    #[test]
    fn multiple_drivers_without_resolution_function_trap() {
        let mut signal = RuntimeSignal::new(crate::ident::intern("s"), NodeIndex::new(0), 0, None);
        let d1 = signal.add_driver();
        let d2 = signal.add_driver();
        signal.set_pending(d1, 1);
        signal.set_pending(d2, 2);
        assert!(signal.resolve().is_err());
    }

    #[test]
    fn resolve_with_no_pending_drivers_reports_no_change() {
        let mut signal = RuntimeSignal::new(crate::ident::intern("s"), NodeIndex::new(0), 5, None);
        signal.add_driver();
        assert_eq!(signal.resolve(), Ok(false));
        assert_eq!(signal.current, 5);
    }

    #[test]
    fn force_overrides_drivers_until_released() {
        let mut signal = RuntimeSignal::new(crate::ident::intern("s"), NodeIndex::new(0), 0, None);
        let d = signal.add_driver();
        signal.force(9);
        signal.set_pending(d, 1);
        assert_eq!(signal.resolve(), Ok(true));
        assert_eq!(signal.current, 9);

        signal.release();
        signal.set_pending(d, 1);
        assert_eq!(signal.resolve(), Ok(true));
        assert_eq!(signal.current, 1);
    }
}
