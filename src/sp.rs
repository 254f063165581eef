//! Strongest-postcondition transformer
//!
//! `sp(component, pf)` and `sp_block(op_block, pf)` update a
//! [`PureFormula`] to model the effect of running a component / a whole
//! straight-line operation block (§4.4). Each component function mutates
//! the working `PureFormula` in place and is itself a small, named
//! accumulator step, the way `perm_lookup.rs` factors one function per
//! permutation-argument contribution instead of one monolithic pass.

use crate::bitvec::{Expr, Side};
use crate::error::IrError;
use crate::formula::{Formula, FormulaManager, PureFormula};
use crate::ir::{Component, OperationBlock};

/// Apply a single component's strongest postcondition to `pf`, in place.
pub fn sp(component: &Component, side: Side, pf: &mut PureFormula, mgr: &mut FormulaManager) -> Result<(), IrError> {
    match component {
        Component::Assign { lhs, rhs } => sp_assign(lhs, rhs, side, pf, mgr),
        Component::Extract { header_path, field_sizes } => sp_extract(header_path, field_sizes, side, pf, mgr),
    }
}

/// Left-fold `sp` over `block.components` in source order (§4.4).
pub fn sp_block(block: &OperationBlock, side: Side, pf: &mut PureFormula, mgr: &mut FormulaManager) -> Result<(), IrError> {
    for component in &block.components {
        sp(component, side, pf, mgr)?;
    }
    Ok(())
}

fn sp_assign(lhs: &str, rhs: &Expr, side: Side, pf: &mut PureFormula, mgr: &mut FormulaManager) -> Result<(), IrError> {
    // Resolve the RHS against the *old* header variables before installing
    // the fresh LHS variable, so a self-referencing assignment (`x = x + 1`)
    // captures the prior value.
    let rhs_resolved = rhs.resolve(pf)?;

    let old_width = pf
        .get_header_var(lhs, side)
        .map(|v| v.width)
        .ok_or_else(|| IrError::UnknownField(lhs.to_string()))?;
    let rhs_width = rhs_resolved
        .width()
        .ok_or_else(|| IrError::Malformed(format!("assignment RHS for `{lhs}` has no determinable width")))?;
    if rhs_width != old_width {
        return Err(IrError::Malformed(format!(
            "assignment to `{lhs}` ({old_width} bits) from a {rhs_width}-bit expression"
        )));
    }

    let fresh = mgr.fresh_var(old_width);
    let eq = Formula::equals(Expr::Var(fresh.clone()), rhs_resolved)?;
    pf.set_header_var(lhs, side, fresh);
    pf.root = std::mem::replace(&mut pf.root, Formula::True).and(eq);
    Ok(())
}

fn sp_extract(
    header_path: &str,
    field_sizes: &[(String, u32)],
    side: Side,
    pf: &mut PureFormula,
    mgr: &mut FormulaManager,
) -> Result<(), IrError> {
    let buffer = pf
        .get_buffer_var(side)
        .cloned()
        .ok_or_else(|| IrError::Malformed(format!("extract of `{header_path}` with no buffer variable on {side}")))?;

    let header_width: u32 = field_sizes.iter().map(|(_, w)| w).sum();
    if buffer.width < header_width {
        return Err(IrError::Malformed(format!(
            "extract of `{header_path}` needs {header_width} bits but only {} are buffered",
            buffer.width
        )));
    }

    let mut field_vars = Vec::with_capacity(field_sizes.len());
    for (field_name, width) in field_sizes {
        let fresh = mgr.fresh_var(*width);
        pf.set_header_var(&format!("{header_path}.{field_name}"), side, fresh.clone());
        field_vars.push(Expr::Var(fresh));
    }

    let remainder_width = buffer.width - header_width;
    let mut parts = field_vars;
    if remainder_width > 0 {
        let remainder = mgr.fresh_var(remainder_width);
        pf.set_buffer_var(side, Some(remainder.clone()));
        parts.push(Expr::Var(remainder));
    } else {
        pf.set_buffer_var(side, None);
    }

    let concat = Expr::concat_all(parts)
        .ok_or_else(|| IrError::Malformed(format!("extract of `{header_path}` has no fields and no remainder")))?;
    let eq = Formula::equals(Expr::Var(buffer), concat)?;
    pf.root = std::mem::replace(&mut pf.root, Formula::True).and(eq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Var;

    fn fresh_pf_with_buffer(side: Side, width: u32, mgr: &mut FormulaManager) -> PureFormula {
        let mut pf = PureFormula::default();
        let buf = mgr.fresh_var(width);
        pf.set_buffer_var(side, Some(buf));
        pf
    }

    #[test]
    fn extract_exact_width_clears_buffer() {
        let mut mgr = FormulaManager::new();
        let mut pf = fresh_pf_with_buffer(Side::Left, 48, &mut mgr);
        sp_extract(
            "hdr.eth",
            &[("dst".to_string(), 24), ("src".to_string(), 24)],
            Side::Left,
            &mut pf,
            &mut mgr,
        )
        .unwrap();
        assert!(pf.get_buffer_var(Side::Left).is_none());
        assert!(pf.get_header_var("hdr.eth.dst", Side::Left).is_some());
        assert!(pf.get_header_var("hdr.eth.src", Side::Left).is_some());
    }

    #[test]
    fn extract_with_remainder_keeps_buffer() {
        let mut mgr = FormulaManager::new();
        let mut pf = fresh_pf_with_buffer(Side::Left, 64, &mut mgr);
        sp_extract("hdr.eth", &[("dst".to_string(), 24), ("src".to_string(), 24)], Side::Left, &mut pf, &mut mgr).unwrap();
        let remainder = pf.get_buffer_var(Side::Left).unwrap();
        assert_eq!(remainder.width, 16);
    }

    #[test]
    fn extract_insufficient_buffer_is_malformed() {
        let mut mgr = FormulaManager::new();
        let mut pf = fresh_pf_with_buffer(Side::Left, 8, &mut mgr);
        let result = sp_extract("hdr.eth", &[("dst".to_string(), 24)], Side::Left, &mut pf, &mut mgr);
        assert!(matches!(result, Err(IrError::Malformed(_))));
    }

    #[test]
    fn assign_uses_old_value_in_rhs() {
        let mut mgr = FormulaManager::new();
        let mut pf = PureFormula::default();
        let x0 = mgr.fresh_var(8);
        pf.set_header_var("hdr.x", Side::Left, x0.clone());

        sp_assign("hdr.x", &Expr::Var(x0.clone()), Side::Left, &mut pf, &mut mgr).unwrap();

        let x1 = pf.get_header_var("hdr.x", Side::Left).unwrap().clone();
        assert_ne!(x1.name, x0.name);
        // root should mention both the old and new variable names.
        let rendered = format!("{}", pf.root);
        assert!(rendered.contains(&x0.name));
        assert!(rendered.contains(&x1.name));
    }

    #[test]
    fn assign_width_mismatch_is_rejected() {
        let mut mgr = FormulaManager::new();
        let mut pf = PureFormula::default();
        pf.set_header_var("hdr.x", Side::Left, Var { name: "x".to_string(), width: 8 });
        let rhs = Expr::Const(num_bigint::BigUint::from(1u32), 16);
        assert!(matches!(sp_assign("hdr.x", &rhs, Side::Left, &mut pf, &mut mgr), Err(IrError::Malformed(_))));
    }
}
