//! Pure formula, formula manager, and guarded formula
//!
//! This module is the symbolic-execution heart of §3/§4.3: a monotonic fresh
//! name source (`FormulaManager`, grounded on `transcript.rs`'s `Transcript`
//! — a mutable accumulator with a single `ctr` field advanced on every
//! derivation), a conjunctive formula over per-side header-field and
//! input-buffer variables (`PureFormula`), and the worklist item that pairs
//! a `PureFormula` with the four-tuple guard and a back-pointer for
//! counterexample reconstruction (`GuardedFormula`).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::bitvec::{Expr, Side};
use crate::error::IrError;

/// An existentially-bound bit-vector variable with a process-unique name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: String,
    pub width: u32,
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.width)
    }
}

/// A monotonic source of fresh variable names, one per bisimulation run.
///
/// No process-wide singleton (§9): the counter lives as a field here,
/// instantiated once by [`crate::engine::check_bisimulation`].
#[derive(Debug, Default)]
pub struct FormulaManager {
    next_free_var_name: u64,
}

impl FormulaManager {
    pub fn new() -> Self {
        Self { next_free_var_name: 0 }
    }

    /// Generate a fresh variable name, e.g. `"v0"`, `"v1"`, ...
    pub fn fresh_name(&mut self) -> String {
        let name = format!("v{}", self.next_free_var_name);
        self.next_free_var_name += 1;
        name
    }

    /// Create a fresh variable of the given bit-width.
    pub fn fresh_var(&mut self, width: u32) -> Var {
        Var { name: self.fresh_name(), width }
    }
}

/// A boolean combination of bit-vector equalities.
///
/// `Equals` is well-typed only on equal-width operands; the constructors
/// that build one (`sp`, `transition`, `constraint`) are responsible for
/// checking widths before calling [`Formula::equals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    True,
    And(Box<Formula>, Box<Formula>),
    Not(Box<Formula>),
    Equals(Expr, Expr),
}

impl Formula {
    /// `False`, expressed as `Not(True)` — there is no dedicated variant,
    /// matching the spec's minimal formula grammar (§3).
    pub fn false_() -> Formula {
        Formula::Not(Box::new(Formula::True))
    }

    pub fn and(self, other: Formula) -> Formula {
        match (&self, &other) {
            (Formula::True, _) => other,
            (_, Formula::True) => self,
            _ => Formula::And(Box::new(self), Box::new(other)),
        }
    }

    pub fn not(self) -> Formula {
        Formula::Not(Box::new(self))
    }

    /// `l ∨ r`, via De Morgan's (§3's grammar has no dedicated `Or` variant).
    pub fn or(self, other: Formula) -> Formula {
        Formula::Not(Box::new(Formula::And(Box::new(Formula::Not(Box::new(self))), Box::new(Formula::Not(Box::new(other))))))
    }

    /// Build `Equals(l, r)`, requiring equal widths.
    pub fn equals(l: Expr, r: Expr) -> Result<Formula, IrError> {
        match (l.width(), r.width()) {
            (Some(lw), Some(rw)) if lw == rw => Ok(Formula::Equals(l, r)),
            (lw, rw) => Err(IrError::Malformed(format!(
                "Equals requires equal widths, got {lw:?} and {rw:?}"
            ))),
        }
    }

    pub fn used_vars(&self, pf: &PureFormula) -> Result<std::collections::HashSet<Var>, IrError> {
        match self {
            Formula::True => Ok(Default::default()),
            Formula::And(l, r) => {
                let mut vs = l.used_vars(pf)?;
                vs.extend(r.used_vars(pf)?);
                Ok(vs)
            }
            Formula::Not(x) => x.used_vars(pf),
            Formula::Equals(l, r) => {
                let mut vs = l.used_vars(pf)?;
                vs.extend(r.used_vars(pf)?);
                Ok(vs)
            }
        }
    }

    /// Resolve every `Reference` in this formula against `pf`. This is the
    /// "SMT representation" of §4.3's `to_smt`: the result contains only
    /// `Var`/`Const`/structural nodes and is safe to hand to a
    /// [`crate::solver::SolverOracle`].
    pub fn to_smt(&self, pf: &PureFormula) -> Result<Formula, IrError> {
        match self {
            Formula::True => Ok(Formula::True),
            Formula::And(l, r) => Ok(Formula::And(
                Box::new(l.to_smt(pf)?),
                Box::new(r.to_smt(pf)?),
            )),
            Formula::Not(x) => Ok(Formula::Not(Box::new(x.to_smt(pf)?))),
            Formula::Equals(l, r) => Ok(Formula::Equals(l.resolve(pf)?, r.resolve(pf)?)),
        }
    }

    pub fn substitute(
        &self,
        pf: &PureFormula,
        mapping: &HashMap<Var, Expr>,
    ) -> Result<Formula, IrError> {
        match self {
            Formula::True => Ok(Formula::True),
            Formula::And(l, r) => Ok(Formula::And(
                Box::new(l.substitute(pf, mapping)?),
                Box::new(r.substitute(pf, mapping)?),
            )),
            Formula::Not(x) => Ok(Formula::Not(Box::new(x.substitute(pf, mapping)?))),
            Formula::Equals(l, r) => Ok(Formula::Equals(
                l.substitute(pf, mapping)?,
                r.substitute(pf, mapping)?,
            )),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::True => write!(f, "TRUE"),
            Formula::And(l, r) => write!(f, "({l}) & ({r})"),
            Formula::Not(x) => write!(f, "~({x})"),
            Formula::Equals(l, r) => write!(f, "({l}) == ({r})"),
        }
    }
}

/// The conjunctive bit-vector formula plus per-side header-field and
/// input-buffer variable maps (§3).
///
/// Invariants (documented, not actively re-checked on every mutation, the
/// way `PureFormula` in the original does not re-verify them either):
/// - every `Var` syntactically reachable from `root` is also reachable from
///   `header_vars` or `buf_vars` modulo substitutions performed in place;
/// - `header_vars` is injective up to equal widths;
/// - `buf_vars[side]`'s width, when present, equals the number of
///   undigested input bits modelled on that side at this program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PureFormula {
    pub root: Formula,
    header_vars: HashMap<(String, bool), Var>,
    buf_vars: HashMap<bool, Var>,
    /// The most recent `new_bits` variable allocated by the engine's leap
    /// step (§4.7 step 6), kept around for trace rendering in §4.8.
    last_fresh_bits: Option<Var>,
}

fn side_key(side: Side) -> bool {
    side.is_left()
}

impl Default for PureFormula {
    fn default() -> Self {
        PureFormula {
            root: Formula::True,
            header_vars: HashMap::new(),
            buf_vars: HashMap::new(),
            last_fresh_bits: None,
        }
    }
}

impl PureFormula {
    pub fn new(root: Formula) -> Self {
        PureFormula { root, ..Default::default() }
    }

    pub fn get_header_var(&self, path: &str, side: Side) -> Option<&Var> {
        self.header_vars.get(&(path.to_string(), side_key(side)))
    }

    pub fn set_header_var(&mut self, path: &str, side: Side, var: Var) {
        self.header_vars.insert((path.to_string(), side_key(side)), var);
    }

    pub fn header_vars(&self) -> &HashMap<(String, bool), Var> {
        &self.header_vars
    }

    pub fn get_buffer_var(&self, side: Side) -> Option<&Var> {
        self.buf_vars.get(&side_key(side))
    }

    /// Set (or, with `None`, clear) the buffer variable for `side`.
    pub fn set_buffer_var(&mut self, side: Side, var: Option<Var>) {
        match var {
            Some(v) => {
                self.buf_vars.insert(side_key(side), v);
            }
            None => {
                self.buf_vars.remove(&side_key(side));
            }
        }
    }

    pub fn last_fresh_bits(&self) -> Option<&Var> {
        self.last_fresh_bits.as_ref()
    }

    pub fn set_last_fresh_bits(&mut self, var: Var) {
        self.last_fresh_bits = Some(var);
    }

    /// Rewrite `root` under a variable-to-expression mapping.
    pub fn substitute(&mut self, mapping: &HashMap<Var, Expr>) -> Result<(), IrError> {
        self.root = self.root.substitute(self, mapping)?;
        Ok(())
    }

    /// A deep, alias-free copy. Every successor `PureFormula` the engine
    /// enqueues is built from a clone, never from the expander's working
    /// copy (§5).
    pub fn clone_deep(&self) -> PureFormula {
        self.clone()
    }

    /// Resolve `root` into its closed (reference-free) SMT representation.
    pub fn to_smt(&self) -> Result<Formula, IrError> {
        self.root.to_smt(self)
    }
}

impl fmt::Display for PureFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// A P4 parser state name, drawn from `ParserStates ∪ {"start","accept","reject"}`.
pub type StateName = String;

pub const START: &str = "start";
pub const ACCEPT: &str = "accept";
pub const REJECT: &str = "reject";

pub fn is_terminal(state: &str) -> bool {
    state == ACCEPT || state == REJECT
}

/// The four-tuple identifying which "program counter" pair and buffered-bit
/// counts a formula pertains to.
pub type Guard = (StateName, StateName, usize, usize);

/// A guarded formula: a worklist item pairing a guard with the `PureFormula`
/// that holds at that point, plus a back-pointer for trace reconstruction.
///
/// `prev` forms a chain, never a DAG (§9): each `GuardedFormula` has at most
/// one predecessor, held via `Rc` since the chain is shared-read-only and
/// its lifetime equals that of the longest still-reachable descendant.
#[derive(Debug, Clone)]
pub struct GuardedFormula {
    pub state_l: StateName,
    pub state_r: StateName,
    pub buf_len_l: usize,
    pub buf_len_r: usize,
    pub pf: PureFormula,
    pub prev: Option<Rc<GuardedFormula>>,
}

impl GuardedFormula {
    pub fn initial() -> Self {
        GuardedFormula {
            state_l: START.to_string(),
            state_r: START.to_string(),
            buf_len_l: 0,
            buf_len_r: 0,
            pf: PureFormula::new(Formula::True),
            prev: None,
        }
    }

    pub fn guard(&self) -> Guard {
        (self.state_l.clone(), self.state_r.clone(), self.buf_len_l, self.buf_len_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::Expr;

    #[test]
    fn fresh_names_are_distinct() {
        let mut mgr = FormulaManager::new();
        let a = mgr.fresh_var(8);
        let b = mgr.fresh_var(8);
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn header_var_roundtrip() {
        let mut pf = PureFormula::default();
        let var = Var { name: "v0".into(), width: 8 };
        pf.set_header_var("hdr.eth.dst", Side::Left, var.clone());
        assert_eq!(pf.get_header_var("hdr.eth.dst", Side::Left), Some(&var));
        assert_eq!(pf.get_header_var("hdr.eth.dst", Side::Right), None);
    }

    #[test]
    fn substitute_is_idempotent() {
        let mut pf = PureFormula::default();
        let a = Var { name: "a".into(), width: 8 };
        let b = Var { name: "b".into(), width: 8 };
        pf.root = Formula::Equals(Expr::Var(a.clone()), Expr::Var(b.clone()));

        let mut mapping = HashMap::new();
        mapping.insert(a.clone(), Expr::Const(num_bigint::BigUint::from(3u32), 8));

        let mut once = pf.clone();
        once.substitute(&mapping).unwrap();

        let mut twice = pf.clone();
        twice.substitute(&mapping).unwrap();
        twice.substitute(&mapping).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn initial_guard_is_start_start_zero_zero() {
        let gf = GuardedFormula::initial();
        assert_eq!(gf.guard(), (START.to_string(), START.to_string(), 0, 0));
        assert!(gf.prev.is_none());
    }
}
