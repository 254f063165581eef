//! Symbolic transition enumerator
//!
//! Lowers a [`TransitionBlock`] to a disjoint, priority-ordered list of
//! `(guard, target)` pairs per §4.5: earlier cases shadow later ones,
//! including an all-`DontCare` fall-through case, mirroring P4 `select`
//! semantics. A block without selectors (`selectors.is_empty()`) always
//! yields the single unconditional pair `[(True, target)]`.

use crate::bitvec::Expr;
use crate::error::IrError;
use crate::formula::{Formula, PureFormula};
use crate::ir::TransitionBlock;

/// One resolved (and therefore solver-ready) outgoing edge.
#[derive(Debug, Clone)]
pub struct TransitionEdge {
    pub guard: Formula,
    pub target: String,
}

/// Enumerate every edge of `block`, resolving all selector/pattern
/// references against `pf`.
pub fn enumerate_transitions(block: &TransitionBlock, pf: &PureFormula) -> Result<Vec<TransitionEdge>, IrError> {
    if block.selectors.is_empty() {
        let target = block
            .cases
            .first()
            .ok_or_else(|| IrError::Malformed("transition block has no selectors and no cases".to_string()))?
            .target
            .clone();
        return Ok(vec![TransitionEdge { guard: Formula::True, target }]);
    }

    let selectors_resolved: Vec<Expr> = block
        .selectors
        .iter()
        .map(|s| s.resolve(pf))
        .collect::<Result<_, _>>()?;

    let mut edges = Vec::with_capacity(block.cases.len());
    let mut earlier_negations = Formula::True;

    for case in &block.cases {
        if case.pattern.len() != selectors_resolved.len() {
            return Err(IrError::Malformed(format!(
                "case pattern has {} components but there are {} selectors",
                case.pattern.len(),
                selectors_resolved.len()
            )));
        }

        let mut match_j = Formula::True;
        for (selector, pattern) in selectors_resolved.iter().zip(&case.pattern) {
            if matches!(pattern, Expr::DontCare) {
                continue;
            }
            let pattern_resolved = pattern.resolve(pf)?;
            match_j = match_j.and(Formula::equals(selector.clone(), pattern_resolved)?);
        }

        // The priority rule applies to every case, including an
        // all-`DontCare` fall-through (§9): guard_j = match_j ∧ ¬(earlier matches).
        let guard = match_j.clone().and(earlier_negations.clone());
        edges.push(TransitionEdge { guard, target: case.target.clone() });

        earlier_negations = earlier_negations.and(match_j.not());
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::Side;
    use crate::formula::FormulaManager;
    use crate::ir::TransitionCase;

    fn pf_with_selector(width: u32, mgr: &mut FormulaManager) -> (PureFormula, Expr) {
        let mut pf = PureFormula::default();
        let var = mgr.fresh_var(width);
        pf.set_header_var("hdr.x", Side::Left, var.clone());
        (pf, Expr::Reference(crate::bitvec::Reference { path: "hdr.x".to_string(), width, side: Side::Left }))
    }

    #[test]
    fn direct_transition_is_unconditional() {
        let block = TransitionBlock::direct("accept");
        let pf = PureFormula::default();
        let edges = enumerate_transitions(&block, &pf).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].guard, Formula::True);
        assert_eq!(edges[0].target, "accept");
    }

    #[test]
    fn earlier_case_shadows_later_default() {
        let mut mgr = FormulaManager::new();
        let (pf, selector) = pf_with_selector(8, &mut mgr);
        let block = TransitionBlock {
            selectors: vec![selector],
            cases: vec![
                TransitionCase { pattern: vec![Expr::Const(num_bigint::BigUint::from(0u32), 8)], target: "accept".to_string() },
                TransitionCase { pattern: vec![Expr::DontCare], target: "reject".to_string() },
            ],
        };
        let edges = enumerate_transitions(&block, &pf).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].target, "accept");
        // second edge's guard must negate the first case's match.
        assert!(matches!(edges[1].guard, Formula::And(_, _)));
    }

    #[test]
    fn mismatched_pattern_arity_is_malformed() {
        let mut mgr = FormulaManager::new();
        let (pf, selector) = pf_with_selector(8, &mut mgr);
        let block = TransitionBlock {
            selectors: vec![selector],
            cases: vec![TransitionCase {
                pattern: vec![Expr::DontCare, Expr::DontCare],
                target: "accept".to_string(),
            }],
        };
        assert!(matches!(enumerate_transitions(&block, &pf), Err(IrError::Malformed(_))));
    }
}
