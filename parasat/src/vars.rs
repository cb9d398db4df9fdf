//! Variable metadata of the shared problem.
use bitflags::bitflags;

use parasat_formula::Var;

/// Type tag of a variable.
///
/// Atoms and rule bodies come from logic programs; plain SAT input uses `Hybrid`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VarKind {
    Atom,
    Body,
    Hybrid,
}

bitflags! {
    /// Per-variable flags.
    pub struct VarFlags: u8 {
        /// May not be eliminated by preprocessing.
        const FROZEN = 1 << 0;
        /// Part of the projected output.
        const PROJECT = 1 << 1;
        /// Occurs in a negative antecedent.
        const NANT = 1 << 2;
        /// Declared by the input program.
        const INPUT = 1 << 3;
        /// Marked positive by a loop/dependency analysis.
        const POS = 1 << 4;
        /// Marked negative by a loop/dependency analysis.
        const NEG = 1 << 5;
        /// Removed from the active assignment.
        const ELIMINATED = 1 << 6;
    }
}

/// Metadata of a single variable.
#[derive(Copy, Clone, Debug)]
pub struct VarInfo {
    pub kind: VarKind,
    pub flags: VarFlags,
}

impl Default for VarInfo {
    fn default() -> VarInfo {
        VarInfo {
            kind: VarKind::Hybrid,
            flags: VarFlags::INPUT,
        }
    }
}

impl VarInfo {
    pub fn eliminated(&self) -> bool {
        self.flags.contains(VarFlags::ELIMINATED)
    }
}

/// Variable metadata of the frozen problem.
#[derive(Default)]
pub struct Vars {
    info: Vec<VarInfo>,
}

impl Vars {
    /// Number of problem variables.
    pub fn count(&self) -> usize {
        self.info.len()
    }

    /// Add `count` fresh variables and return the first one.
    pub fn add_vars(&mut self, count: usize, kind: VarKind, flags: VarFlags) -> Var {
        let first = Var::from_index(self.info.len());
        self.info
            .resize(self.info.len() + count, VarInfo { kind, flags });
        first
    }

    pub fn info(&self, var: Var) -> &VarInfo {
        &self.info[var.index()]
    }

    pub fn info_mut(&mut self, var: Var) -> &mut VarInfo {
        &mut self.info[var.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_flag_vars() {
        let mut vars = Vars::default();
        let first = vars.add_vars(3, VarKind::Atom, VarFlags::INPUT);
        assert_eq!(first.index(), 0);
        assert_eq!(vars.count(), 3);

        let second = vars.add_vars(2, VarKind::Body, VarFlags::empty());
        assert_eq!(second.index(), 3);

        vars.info_mut(second).flags |= VarFlags::ELIMINATED;
        assert!(vars.info(second).eliminated());
        assert!(!vars.info(first).eliminated());
        assert_eq!(vars.info(first).kind, VarKind::Atom);
    }
}
