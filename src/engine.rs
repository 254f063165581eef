//! Bisimulation engine
//!
//! The worklist algorithm of §4.7: pops a guarded formula, checks
//! subsumption, handles the accept/reject special cases, and otherwise
//! computes a leap, extends both sides' buffers, fires any transitions due,
//! and enqueues Cartesian successors. §4.8's counterexample extraction runs
//! on the first disagreement found. Orchestrator shape grounded on
//! `scheduler.rs`'s `Prover`/`Verifier`: a params struct, a `thiserror` enum
//! wrapping the narrower error kinds, and a single entry point doing the
//! real work.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::bitvec::Side;
use crate::constraint::CFormula;
use crate::error::EngineError;
use crate::formula::{is_terminal, Formula, FormulaManager, Guard, GuardedFormula, PureFormula, StateName, ACCEPT, START};
use crate::ir::ParserProgram;
use crate::solver::SolverOracle;
use crate::sp;
use crate::transition;

/// Knobs for one bisimulation run (§4.7, §4.6, §8.6).
#[derive(Debug, Default, Clone)]
pub struct BisimulationConfig {
    /// `false` disables the leaps optimisation: every step advances the
    /// buffer by exactly one bit. Exists for the "leap safety" testable
    /// property (§8.6); the `no-leaps` cargo feature wires this to `false`
    /// by default for the CLI.
    pub enable_leaps: bool,
    pub disagreeing_filter: Option<CFormula>,
    pub accepting_filter: Option<CFormula>,
}

/// One explored guard, carried in the returned certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub state_l: StateName,
    pub state_r: StateName,
    pub buf_len_l: usize,
    pub buf_len_r: usize,
}

/// One step of a reconstructed counterexample trace (§4.8).
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub state_l: StateName,
    pub state_r: StateName,
    pub buf_len_l: usize,
    pub buf_len_r: usize,
}

/// A reconstructed disagreement: the per-step trace plus the concrete bit
/// stream that witnesses it, read off the longer side's buffer variable.
#[derive(Debug, Clone)]
pub struct Counterexample {
    pub trace: Vec<TraceStep>,
    pub stream: num_bigint::BigUint,
    pub stream_width: u32,
}

/// The result of a completed bisimulation run.
#[derive(Debug, Clone)]
pub enum BisimResult {
    Equivalent { certificate: Vec<CertificateEntry> },
    Disagreement(Counterexample),
}

/// Run the bisimulation engine to completion on `left` vs `right` (§4.7).
pub fn check_bisimulation(
    left: &ParserProgram,
    right: &ParserProgram,
    config: &BisimulationConfig,
    oracle: &mut dyn SolverOracle,
) -> Result<BisimResult, EngineError> {
    let disagreeing_filter = config
        .disagreeing_filter
        .as_ref()
        .map(|f| typecheck_filter(f, left, right))
        .transpose()?;
    let accepting_filter = config
        .accepting_filter
        .as_ref()
        .map(|f| typecheck_filter(f, left, right))
        .transpose()?;

    oracle.begin_session().map_err(EngineError::from)?;
    let result = run(left, right, config, disagreeing_filter.as_ref(), accepting_filter.as_ref(), oracle);
    oracle.end_session().map_err(EngineError::from)?;
    result
}

fn typecheck_filter(filter: &CFormula, left: &ParserProgram, right: &ParserProgram) -> Result<CFormula, EngineError> {
    crate::constraint::typecheck(
        filter,
        &left.output_name,
        &left.types,
        &left.output_type,
        &right.output_name,
        &right.types,
        &right.output_type,
    )
    .map_err(EngineError::from)
}

fn run(
    left: &ParserProgram,
    right: &ParserProgram,
    config: &BisimulationConfig,
    disagreeing_filter: Option<&CFormula>,
    accepting_filter: Option<&CFormula>,
    oracle: &mut dyn SolverOracle,
) -> Result<BisimResult, EngineError> {
    let mut mgr = FormulaManager::new();

    let initial = Rc::new(GuardedFormula {
        state_l: START.to_string(),
        state_r: START.to_string(),
        buf_len_l: 0,
        buf_len_r: 0,
        pf: PureFormula::new(Formula::True),
        prev: None,
    });

    let mut knowledge: HashMap<Guard, Vec<Formula>> = HashMap::new();
    let mut work_queue: VecDeque<Rc<GuardedFormula>> = VecDeque::new();
    work_queue.push_back(initial);

    while let Some(g) = work_queue.pop_front() {
        let guard = g.guard();
        let g_smt = g.pf.to_smt().map_err(EngineError::from)?;

        // 1. Subsumption, run unconditionally: an empty (or missing) knowledge
        // entry folds to `Or() == False`, so `g.pf ⇒ False` is valid exactly
        // when `g.pf` itself is unsatisfiable, pruning infeasible branches
        // the same way the original's `_has_new_information` does.
        let disjunction = knowledge.get(&guard).into_iter().flatten().cloned().reduce(Formula::or).unwrap_or_else(Formula::false_);
        if crate::solver::implies(oracle, &g_smt, &disjunction).map_err(EngineError::from)? {
            continue;
        }

        let one_is_accept = (g.state_l == ACCEPT) != (g.state_r == ACCEPT);

        // 2. Disagreement (accept / non-accept mismatch).
        if one_is_accept {
            let witness = match disagreeing_filter {
                None => sat_witness(oracle, g_smt.clone())?,
                Some(filter) => match crate::constraint::evaluate(filter, &g.pf).map_err(EngineError::from)? {
                    None => sat_witness(oracle, g_smt.clone())?,
                    Some(filter_formula) => sat_witness(oracle, g_smt.clone().and(filter_formula))?,
                },
            };
            if let Some(witness) = witness {
                return Ok(BisimResult::Disagreement(build_counterexample(&g, &witness, oracle)?));
            }
            knowledge.entry(guard).or_default().push(g_smt);
            continue;
        }

        // 3. Accepting-accepting relation check.
        if g.state_l == ACCEPT && g.state_r == ACCEPT {
            if let Some(filter) = accepting_filter {
                let constrained = crate::constraint::evaluate(filter, &g.pf).map_err(EngineError::from)?;
                if let Some(filter_formula) = constrained {
                    let violation = g_smt.clone().and(filter_formula.not());
                    if oracle.is_sat(&violation).map_err(EngineError::from)? {
                        return Ok(BisimResult::Disagreement(build_counterexample(&g, &violation, oracle)?));
                    }
                }
            }
        }

        // 4. Both terminal.
        if is_terminal(&g.state_l) && is_terminal(&g.state_r) {
            knowledge.entry(guard).or_default().push(g_smt);
            continue;
        }

        // 5-8. Leap, buffer extension, firing transitions, successor enqueue.
        expand(left, right, &g, config.enable_leaps, &mut mgr, &mut work_queue).map_err(EngineError::from)?;
        knowledge.entry(guard).or_default().push(g_smt);
    }

    let certificate = knowledge
        .keys()
        .map(|(sl, sr, bl, br)| CertificateEntry { state_l: sl.clone(), state_r: sr.clone(), buf_len_l: *bl, buf_len_r: *br })
        .collect();
    Ok(BisimResult::Equivalent { certificate })
}

/// §4.7 steps 5-7: compute the leap, extend buffers, fire due transitions,
/// and enqueue Cartesian successors.
fn expand(
    left: &ParserProgram,
    right: &ParserProgram,
    g: &Rc<GuardedFormula>,
    enable_leaps: bool,
    mgr: &mut FormulaManager,
    work_queue: &mut VecDeque<Rc<GuardedFormula>>,
) -> Result<(), crate::error::IrError> {
    let term_l = is_terminal(&g.state_l);
    let term_r = is_terminal(&g.state_r);

    let state_l = if term_l { None } else { Some(lookup_state(left, &g.state_l)?) };
    let state_r = if term_r { None } else { Some(lookup_state(right, &g.state_r)?) };

    let op_size_l = state_l.map(|s| s.op_block.size()).unwrap_or(0);
    let op_size_r = state_r.map(|s| s.op_block.size()).unwrap_or(0);

    // A side already at its boundary (including a zero-size op block just
    // entered) must fire this round without waiting on a leap: forcing a
    // minimum leap of 1 bit would overshoot it and the transition would
    // never become due.
    let ready_l = !term_l && g.buf_len_l as u32 >= op_size_l;
    let ready_r = !term_r && g.buf_len_r as u32 >= op_size_r;

    let mut pf = g.pf.clone_deep();
    let mut buf_len_l = g.buf_len_l;
    let mut buf_len_r = g.buf_len_r;

    if !ready_l && !ready_r {
        let leap = compute_leap(enable_leaps, term_l, term_r, op_size_l, buf_len_l, op_size_r, buf_len_r);
        let new_bits = mgr.fresh_var(leap);
        pf.set_last_fresh_bits(new_bits.clone());

        if !term_l {
            extend_buffer(&mut pf, Side::Left, &new_bits, mgr)?;
            buf_len_l += leap as usize;
        }
        if !term_r {
            extend_buffer(&mut pf, Side::Right, &new_bits, mgr)?;
            buf_len_r += leap as usize;
        }
    }

    let transition_l = !term_l && buf_len_l as u32 >= op_size_l;
    let transition_r = !term_r && buf_len_r as u32 >= op_size_r;

    if transition_l {
        sp::sp_block(&state_l.expect("transition_l implies a non-terminal state was resolved above").op_block, Side::Left, &mut pf, mgr)?;
    }
    if transition_r {
        sp::sp_block(&state_r.expect("transition_r implies a non-terminal state was resolved above").op_block, Side::Right, &mut pf, mgr)?;
    }

    let left_edges = if transition_l {
        transition::enumerate_transitions(&state_l.expect("checked above").trans_block, &pf)?
    } else {
        vec![crate::transition::TransitionEdge { guard: Formula::True, target: g.state_l.clone() }]
    };
    let right_edges = if transition_r {
        transition::enumerate_transitions(&state_r.expect("checked above").trans_block, &pf)?
    } else {
        vec![crate::transition::TransitionEdge { guard: Formula::True, target: g.state_r.clone() }]
    };

    for l_edge in &left_edges {
        for r_edge in &right_edges {
            let mut succ_pf = pf.clone_deep();
            succ_pf.root = std::mem::replace(&mut succ_pf.root, Formula::True)
                .and(l_edge.guard.clone())
                .and(r_edge.guard.clone());

            let succ = Rc::new(GuardedFormula {
                state_l: l_edge.target.clone(),
                state_r: r_edge.target.clone(),
                buf_len_l: if transition_l { 0 } else { buf_len_l },
                buf_len_r: if transition_r { 0 } else { buf_len_r },
                pf: succ_pf,
                prev: Some(Rc::clone(g)),
            });
            work_queue.push_back(succ);
        }
    }

    Ok(())
}

/// `Some(formula)` if `formula` is satisfiable, `None` otherwise. Used to
/// turn a candidate disagreement formula into an actual witness only once
/// its satisfiability has been confirmed (§4.7 step 2, §8.1).
fn sat_witness(oracle: &mut dyn SolverOracle, formula: Formula) -> Result<Option<Formula>, EngineError> {
    if oracle.is_sat(&formula).map_err(EngineError::from)? {
        Ok(Some(formula))
    } else {
        Ok(None)
    }
}

fn lookup_state<'a>(program: &'a ParserProgram, name: &str) -> Result<&'a crate::ir::ParserState, crate::error::IrError> {
    program.state(name).ok_or_else(|| crate::error::IrError::UnknownField(format!("no such state `{name}`")))
}

fn compute_leap(enable_leaps: bool, term_l: bool, term_r: bool, op_size_l: u32, buf_len_l: usize, op_size_r: u32, buf_len_r: usize) -> u32 {
    if !enable_leaps {
        return 1;
    }
    let remaining_l = if term_l { None } else { Some(op_size_l.saturating_sub(buf_len_l as u32)) };
    let remaining_r = if term_r { None } else { Some(op_size_r.saturating_sub(buf_len_r as u32)) };
    let leap = match (remaining_l, remaining_r) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 1,
    };
    leap.max(1)
}

fn extend_buffer(pf: &mut PureFormula, side: Side, new_bits: &crate::formula::Var, mgr: &mut FormulaManager) -> Result<(), crate::error::IrError> {
    match pf.get_buffer_var(side).cloned() {
        None => {
            pf.set_buffer_var(side, Some(new_bits.clone()));
        }
        Some(old) => {
            let wider = mgr.fresh_var(old.width + new_bits.width);
            let eq = Formula::equals(
                crate::bitvec::Expr::Var(wider.clone()),
                crate::bitvec::Expr::Concat(Box::new(crate::bitvec::Expr::Var(old)), Box::new(crate::bitvec::Expr::Var(new_bits.clone()))),
            )?;
            pf.root = std::mem::replace(&mut pf.root, Formula::True).and(eq);
            pf.set_buffer_var(side, Some(wider));
        }
    }
    Ok(())
}

/// §4.8: walk `g.prev*` to the root gathering per-step trace data and the
/// longest buffer variable seen per side, then ask the solver for a model of
/// `witness` (the closed formula already shown satisfiable — either `g.pf`
/// alone or `g.pf` combined with a disagreeing/accepting filter) and read
/// out the concrete bit-string for the longest buffer variable.
fn build_counterexample(g: &Rc<GuardedFormula>, witness: &Formula, oracle: &mut dyn SolverOracle) -> Result<Counterexample, EngineError> {
    let mut trace = Vec::new();
    let mut longest: Option<crate::formula::Var> = None;

    let mut current = Some(Rc::clone(g));
    while let Some(node) = current {
        trace.push(TraceStep {
            state_l: node.state_l.clone(),
            state_r: node.state_r.clone(),
            buf_len_l: node.buf_len_l,
            buf_len_r: node.buf_len_r,
        });
        for side in [Side::Left, Side::Right] {
            if let Some(v) = node.pf.get_buffer_var(side) {
                if longest.as_ref().map(|l| v.width > l.width).unwrap_or(true) {
                    longest = Some(v.clone());
                }
            }
        }
        current = node.prev.clone();
    }
    trace.reverse();

    oracle.is_sat(witness).map_err(EngineError::from)?;
    let model = oracle.get_model().map_err(EngineError::from)?;

    let (stream, stream_width) = match (&longest, &model) {
        (Some(var), Some(model)) => (model.get(var).cloned().unwrap_or_else(|| num_bigint::BigUint::from(0u32)), var.width),
        _ => (num_bigint::BigUint::from(0u32), 0),
    };

    Ok(Counterexample { trace, stream, stream_width })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::Expr;
    use crate::ir::{Component, OperationBlock, ParserState, TransitionBlock};
    use crate::solver::reference_oracle::BruteForceOracle;
    use std::collections::HashMap;

    fn identity_parser(side: Side) -> ParserProgram {
        let mut types = HashMap::new();
        types.insert(
            "eth_t".to_string(),
            crate::ir::TypeDef { fields: vec![("val".to_string(), crate::ir::FieldType::Bits(8))] },
        );
        let mut states = HashMap::new();
        states.insert(
            START.to_string(),
            ParserState {
                op_block: OperationBlock {
                    components: vec![Component::Extract { header_path: "hdr.eth".to_string(), field_sizes: vec![("val".to_string(), 8)] }],
                },
                trans_block: TransitionBlock::direct(ACCEPT),
            },
        );
        ParserProgram { side, input_name: "pkt".to_string(), output_name: "hdr".to_string(), output_type: "eth_t".to_string(), types, states }
    }

    #[test]
    fn reflexivity_on_single_state_parser() {
        let left = identity_parser(Side::Left);
        let right = identity_parser(Side::Right);
        let config = BisimulationConfig { enable_leaps: true, disagreeing_filter: None, accepting_filter: None };
        let mut oracle = BruteForceOracle::new();
        let result = check_bisimulation(&left, &right, &config, &mut oracle).unwrap();
        match result {
            BisimResult::Equivalent { certificate } => {
                assert!(certificate.iter().any(|c| c.state_l == START && c.state_r == START));
                assert!(certificate.iter().any(|c| c.state_l == ACCEPT && c.state_r == ACCEPT));
            }
            BisimResult::Disagreement(cex) => panic!("expected equivalence, got counterexample: {cex:?}"),
        }
    }

    fn selecting_parser(side: Side) -> ParserProgram {
        let mut types = HashMap::new();
        types.insert(
            "eth_t".to_string(),
            crate::ir::TypeDef { fields: vec![("val".to_string(), crate::ir::FieldType::Bits(8))] },
        );
        let mut states = HashMap::new();
        let selector = Expr::Reference(crate::bitvec::Reference { path: "hdr.val".to_string(), width: 8, side });
        states.insert(
            START.to_string(),
            ParserState {
                op_block: OperationBlock {
                    components: vec![Component::Extract { header_path: "hdr".to_string(), field_sizes: vec![("val".to_string(), 8)] }],
                },
                trans_block: TransitionBlock {
                    selectors: vec![selector],
                    cases: vec![
                        crate::ir::TransitionCase { pattern: vec![Expr::Const(num_bigint::BigUint::from(0u32), 8)], target: ACCEPT.to_string() },
                        crate::ir::TransitionCase { pattern: vec![Expr::DontCare], target: "reject".to_string() },
                    ],
                },
            },
        );
        ParserProgram { side, input_name: "pkt".to_string(), output_name: "hdr".to_string(), output_type: "eth_t".to_string(), types, states }
    }

    #[test]
    fn reflexivity_on_parser_with_select_does_not_report_spurious_disagreement() {
        let left = selecting_parser(Side::Left);
        let right = selecting_parser(Side::Right);
        let config = BisimulationConfig { enable_leaps: true, disagreeing_filter: None, accepting_filter: None };
        let mut oracle = BruteForceOracle::new();
        let result = check_bisimulation(&left, &right, &config, &mut oracle).unwrap();
        match result {
            BisimResult::Equivalent { .. } => {}
            BisimResult::Disagreement(cex) => panic!("identical parser reported as disagreeing with itself: {cex:?}"),
        }
    }

    #[test]
    fn leap_safety_same_verdict_with_and_without_leaps() {
        let left = identity_parser(Side::Left);
        let right = identity_parser(Side::Right);
        let mut oracle_leap = BruteForceOracle::new();
        let mut oracle_no_leap = BruteForceOracle::new();
        let with_leaps = check_bisimulation(
            &left,
            &right,
            &BisimulationConfig { enable_leaps: true, disagreeing_filter: None, accepting_filter: None },
            &mut oracle_leap,
        )
        .unwrap();
        let without_leaps = check_bisimulation(
            &left,
            &right,
            &BisimulationConfig { enable_leaps: false, disagreeing_filter: None, accepting_filter: None },
            &mut oracle_no_leap,
        )
        .unwrap();
        assert_eq!(matches!(with_leaps, BisimResult::Equivalent { .. }), matches!(without_leaps, BisimResult::Equivalent { .. }));
    }
}
