//! SMT solver oracle interface
//!
//! The core never talks to a concrete SMT solver; it talks to this trait
//! (§5, §6). A hosting program supplies the implementation — wiring up an
//! actual portfolio of solvers is out of scope here (§1). Existentials over
//! free variables are not added at the formula level (§4.3); the oracle
//! treats them as existential automatically via satisfiability, the way an
//! SMT-LIB `(check-sat)` query does for any declared-but-unconstrained
//! constant.

use std::collections::HashMap;

use num_bigint::BigUint;

use crate::error::SolverError;
use crate::formula::{Formula, Var};

/// A concrete variable assignment returned by [`SolverOracle::get_model`].
pub type Model = HashMap<Var, BigUint>;

/// The abstract solver session the engine drives (§6).
///
/// A session is begun once per bisimulation run and ended once at the end;
/// queries within it may be interleaved freely. Implementations are free to
/// race an internal portfolio of solvers, so long as the trait's contract
/// (deterministic answer for a deterministic formula) holds from the
/// caller's perspective.
pub trait SolverOracle {
    fn begin_session(&mut self) -> Result<(), SolverError>;

    /// Is `formula` satisfiable?
    fn is_sat(&mut self, formula: &Formula) -> Result<bool, SolverError>;

    /// Is `formula` valid (true under every assignment)?
    fn is_valid(&mut self, formula: &Formula) -> Result<bool, SolverError>;

    /// A concrete model for the most recent satisfiable query, restricted
    /// to the variables the caller cares about. Returns `None` if the most
    /// recent query was not `is_sat` returning `true`.
    fn get_model(&mut self) -> Result<Option<Model>, SolverError>;

    fn end_session(&mut self) -> Result<(), SolverError>;
}

/// `valid(lhs ⇒ rhs)`, built from the primitives `is_sat`/`is_valid`
/// exposed by [`SolverOracle`]. Used by the engine's subsumption check
/// (§4.7 step 1): `A ⇒ B` is valid iff `A ∧ ¬B` is unsatisfiable.
pub fn implies(oracle: &mut dyn SolverOracle, lhs: &Formula, rhs: &Formula) -> Result<bool, SolverError> {
    let not_implication = Formula::And(Box::new(lhs.clone()), Box::new(Formula::Not(Box::new(rhs.clone()))));
    oracle.is_valid(&Formula::Not(Box::new(not_implication)))
}

/// A brute-force oracle over small, explicit bit-widths.
///
/// Exposed outside the test profile only behind the `dev-solver` feature,
/// mirroring the teacher's `dev-srs` gate on its in-crate deterministic SRS:
/// fine for development and small demos, never a substitute for a real
/// solver portfolio in production (§1 keeps solver implementation itself out
/// of scope; this is test/demo infrastructure, not that).
#[cfg(any(test, feature = "dev-solver"))]
pub mod reference_oracle {

    use super::*;
    use crate::bitvec::Expr;

    #[derive(Default)]
    pub struct BruteForceOracle {
        last_model: Option<Model>,
    }

    impl BruteForceOracle {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn collect_vars(formula: &Formula, out: &mut Vec<Var>) {
        match formula {
            Formula::True => {}
            Formula::And(l, r) => {
                collect_vars(l, out);
                collect_vars(r, out);
            }
            Formula::Not(x) => collect_vars(x, out),
            Formula::Equals(l, r) => {
                collect_expr_vars(l, out);
                collect_expr_vars(r, out);
            }
        }
    }

    fn collect_expr_vars(expr: &Expr, out: &mut Vec<Var>) {
        match expr {
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Expr::Const(_, _) | Expr::DontCare => {}
            Expr::Concat(l, r) | Expr::BvAnd(l, r) | Expr::BvLShr(l, r) => {
                collect_expr_vars(l, out);
                collect_expr_vars(r, out);
            }
            Expr::Slice(inner, _, _) => collect_expr_vars(inner, out),
            Expr::Reference(_) => panic!("reference_oracle requires a fully-resolved formula"),
        }
    }

    fn eval_expr(expr: &Expr, model: &Model) -> BigUint {
        match expr {
            Expr::Var(v) => model.get(v).cloned().unwrap_or_else(|| BigUint::from(0u32)),
            Expr::Const(v, _) => v.clone(),
            Expr::Concat(l, r) => {
                let rw = r.width().expect("concat operand must have known width");
                (eval_expr(l, model) << rw) | eval_expr(r, model)
            }
            Expr::Slice(inner, hi, lo) => {
                let v = eval_expr(inner, model);
                let mask = (BigUint::from(1u32) << (hi - lo + 1)) - BigUint::from(1u32);
                (v >> *lo) & mask
            }
            Expr::BvAnd(l, r) => eval_expr(l, model) & eval_expr(r, model),
            Expr::BvLShr(l, r) => {
                let shift: u64 = eval_expr(r, model).try_into().unwrap_or(u64::MAX);
                eval_expr(l, model) >> shift
            }
            Expr::Reference(_) => panic!("reference_oracle requires a fully-resolved formula"),
            Expr::DontCare => panic!("DontCare has no value"),
        }
    }

    fn eval_formula(formula: &Formula, model: &Model) -> bool {
        match formula {
            Formula::True => true,
            Formula::And(l, r) => eval_formula(l, model) && eval_formula(r, model),
            Formula::Not(x) => !eval_formula(x, model),
            Formula::Equals(l, r) => eval_expr(l, model) == eval_expr(r, model),
        }
    }

    /// Enumerate every assignment of `vars` up to `max_value_per_var`
    /// (inclusive), calling `f` with each candidate model; stops early if
    /// `f` returns `true`.
    fn for_each_model(vars: &[Var], cap_bits: u32, mut f: impl FnMut(&Model) -> bool) -> bool {
        fn go(vars: &[Var], idx: usize, cap_bits: u32, model: &mut Model, f: &mut dyn FnMut(&Model) -> bool) -> bool {
            if idx == vars.len() {
                return f(model);
            }
            let v = &vars[idx];
            let bits = v.width.min(cap_bits);
            let count = 1u64 << bits;
            for n in 0..count {
                model.insert(v.clone(), BigUint::from(n));
                if go(vars, idx + 1, cap_bits, model, f) {
                    return true;
                }
            }
            false
        }
        let mut model = Model::new();
        go(vars, 0, cap_bits, &mut model, &mut f)
    }

    impl SolverOracle for BruteForceOracle {
        fn begin_session(&mut self) -> Result<(), SolverError> {
            self.last_model = None;
            Ok(())
        }

        fn is_sat(&mut self, formula: &Formula) -> Result<bool, SolverError> {
            let mut vars = Vec::new();
            collect_vars(formula, &mut vars);
            let mut found = None;
            for_each_model(&vars, 6, |model| {
                if eval_formula(formula, model) {
                    found = Some(model.clone());
                    true
                } else {
                    false
                }
            });
            self.last_model = found.clone();
            Ok(found.is_some())
        }

        fn is_valid(&mut self, formula: &Formula) -> Result<bool, SolverError> {
            let mut vars = Vec::new();
            collect_vars(formula, &mut vars);
            let mut all_hold = true;
            for_each_model(&vars, 6, |model| {
                if !eval_formula(formula, model) {
                    all_hold = false;
                    true
                } else {
                    false
                }
            });
            Ok(all_hold)
        }

        fn get_model(&mut self) -> Result<Option<Model>, SolverError> {
            Ok(self.last_model.clone())
        }

        fn end_session(&mut self) -> Result<(), SolverError> {
            Ok(())
        }
    }

    #[test]
    fn sat_finds_a_satisfying_model() {
        let mut oracle = BruteForceOracle::new();
        let a = Var { name: "a".to_string(), width: 2 };
        let f = Formula::Equals(Expr::Var(a.clone()), Expr::Const(BigUint::from(1u32), 2));
        oracle.begin_session().unwrap();
        assert!(oracle.is_sat(&f).unwrap());
        let model = oracle.get_model().unwrap().unwrap();
        assert_eq!(model.get(&a), Some(&BigUint::from(1u32)));
    }

    #[test]
    fn valid_detects_tautology() {
        let mut oracle = BruteForceOracle::new();
        let a = Var { name: "a".to_string(), width: 2 };
        let f = Formula::Equals(Expr::Var(a.clone()), Expr::Var(a));
        oracle.begin_session().unwrap();
        assert!(oracle.is_valid(&f).unwrap());
    }

    #[test]
    fn unsat_formula_reports_false() {
        let mut oracle = BruteForceOracle::new();
        let a = Var { name: "a".to_string(), width: 1 };
        let f = Formula::And(
            Box::new(Formula::Equals(Expr::Var(a.clone()), Expr::Const(BigUint::from(0u32), 1))),
            Box::new(Formula::Equals(Expr::Var(a), Expr::Const(BigUint::from(1u32), 1))),
        );
        oracle.begin_session().unwrap();
        assert!(!oracle.is_sat(&f).unwrap());
    }
}
