//! Bit-vector expression DAG
//!
//! A small, typed expression language for P4 parser select keys, assignment
//! right-hand sides, and buffer contents. Every node carries (or can derive)
//! a known bit-width; there is no dynamic dispatch — `to_smt`, `used_vars`,
//! and `substitute` are exhaustive matches over [`Expr`], the way the
//! teacher's AIR evaluator matches over row-local components instead of
//! trait objects.
//!
//! `Reference` has a two-phase life, per the whitepaper this crate follows
//! for IR ingestion: it is built carrying only a symbolic path and a side,
//! and is only resolved against a [`crate::formula::PureFormula`]'s header
//! variables when it is actually used in `to_smt`/`used_vars`/`substitute`.

use std::collections::HashSet;
use std::fmt;

use num_bigint::BigUint;

use crate::formula::{PureFormula, Var};
use crate::error::IrError;

/// Bit-width of an expression node.
pub type Width = u32;

/// Which of the two compared parsers an expression or variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    pub fn is_left(self) -> bool {
        matches!(self, Side::Left)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// A reference to a header field, by dotted path, on a fixed side.
///
/// Before resolution the path is just a string; resolution binds it to the
/// [`Var`] currently recorded in a [`PureFormula`]'s header-variable map for
/// `(path, side)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub path: String,
    pub width: Width,
    pub side: Side,
}

/// A bit-vector expression node.
///
/// Equality is structural. `Const` carries an explicit width resolved at
/// parse time from surrounding context (the IR build contract never emits a
/// contextless `Const`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(Var),
    Const(BigUint, Width),
    Concat(Box<Expr>, Box<Expr>),
    /// Inclusive `[hi:lo]` slice, `hi >= lo`.
    Slice(Box<Expr>, Width, Width),
    BvAnd(Box<Expr>, Box<Expr>),
    BvLShr(Box<Expr>, Box<Expr>),
    Reference(Reference),
    /// A wildcard pattern component (`default`/`_` in a select case).
    DontCare,
}

impl Expr {
    /// The bit-width of this node. `DontCare` has no width — it is never
    /// lowered to SMT on its own, only matched on structurally in
    /// [`crate::transition`].
    pub fn width(&self) -> Option<Width> {
        match self {
            Expr::Var(v) => Some(v.width),
            Expr::Const(_, w) => Some(*w),
            Expr::Concat(l, r) => Some(l.width()? + r.width()?),
            Expr::Slice(_, hi, lo) => Some(hi - lo + 1),
            Expr::BvAnd(l, _) => l.width(),
            Expr::BvLShr(l, _) => l.width(),
            Expr::Reference(r) => Some(r.width),
            Expr::DontCare => None,
        }
    }

    /// Resolve every [`Reference`] against `pf`'s header variables, binding
    /// each one to the concrete [`Var`] currently recorded for its
    /// `(path, side)`. This is the `to_formula`/`to_smt` boundary of §4.2:
    /// everything downstream (the solver oracle) only ever sees `Var`,
    /// `Const`, and the structural combinators.
    pub fn resolve(&self, pf: &PureFormula) -> Result<Expr, IrError> {
        match self {
            Expr::Var(_) | Expr::Const(_, _) => Ok(self.clone()),
            Expr::Concat(l, r) => Ok(Expr::Concat(
                Box::new(l.resolve(pf)?),
                Box::new(r.resolve(pf)?),
            )),
            Expr::Slice(inner, hi, lo) => {
                Ok(Expr::Slice(Box::new(inner.resolve(pf)?), *hi, *lo))
            }
            Expr::BvAnd(l, r) => Ok(Expr::BvAnd(
                Box::new(l.resolve(pf)?),
                Box::new(r.resolve(pf)?),
            )),
            Expr::BvLShr(l, r) => Ok(Expr::BvLShr(
                Box::new(l.resolve(pf)?),
                Box::new(r.resolve(pf)?),
            )),
            Expr::Reference(reference) => {
                let var = pf
                    .get_header_var(&reference.path, reference.side)
                    .ok_or_else(|| IrError::UnknownField(reference.path.clone()))?;
                Ok(Expr::Var(var.clone()))
            }
            Expr::DontCare => Ok(Expr::DontCare),
        }
    }

    /// Variables used by this node, after resolving references against `pf`.
    pub fn used_vars(&self, pf: &PureFormula) -> Result<HashSet<Var>, IrError> {
        let mut out = HashSet::new();
        self.collect_used_vars(pf, &mut out)?;
        Ok(out)
    }

    fn collect_used_vars(&self, pf: &PureFormula, out: &mut HashSet<Var>) -> Result<(), IrError> {
        match self {
            Expr::Var(v) => {
                out.insert(v.clone());
                Ok(())
            }
            Expr::Const(_, _) | Expr::DontCare => Ok(()),
            Expr::Concat(l, r) | Expr::BvAnd(l, r) | Expr::BvLShr(l, r) => {
                l.collect_used_vars(pf, out)?;
                r.collect_used_vars(pf, out)
            }
            Expr::Slice(inner, _, _) => inner.collect_used_vars(pf, out),
            Expr::Reference(reference) => {
                let var = pf
                    .get_header_var(&reference.path, reference.side)
                    .ok_or_else(|| IrError::UnknownField(reference.path.clone()))?;
                out.insert(var.clone());
                Ok(())
            }
        }
    }

    /// Capture-free substitution: rewrite every `Var` found in `mapping`
    /// with its replacement expression. References are resolved to `Var`
    /// first (substitution only ever applies after resolution, at
    /// strongest-postcondition time).
    pub fn substitute(
        &self,
        pf: &PureFormula,
        mapping: &std::collections::HashMap<Var, Expr>,
    ) -> Result<Expr, IrError> {
        match self {
            Expr::Var(v) => Ok(mapping.get(v).cloned().unwrap_or_else(|| Expr::Var(v.clone()))),
            Expr::Const(_, _) | Expr::DontCare => Ok(self.clone()),
            Expr::Concat(l, r) => Ok(Expr::Concat(
                Box::new(l.substitute(pf, mapping)?),
                Box::new(r.substitute(pf, mapping)?),
            )),
            Expr::Slice(inner, hi, lo) => {
                Ok(Expr::Slice(Box::new(inner.substitute(pf, mapping)?), *hi, *lo))
            }
            Expr::BvAnd(l, r) => Ok(Expr::BvAnd(
                Box::new(l.substitute(pf, mapping)?),
                Box::new(r.substitute(pf, mapping)?),
            )),
            Expr::BvLShr(l, r) => Ok(Expr::BvLShr(
                Box::new(l.substitute(pf, mapping)?),
                Box::new(r.substitute(pf, mapping)?),
            )),
            Expr::Reference(_) => self.resolve(pf)?.substitute(pf, mapping),
        }
    }

    /// Build a right-associated concatenation of `parts` in the given
    /// order (`parts[0]` ends up the most-significant operand), skipping
    /// any empty tail. Used by `sp::extract` to build `f_1 ++ ... ++ f_k [++ R]`.
    pub fn concat_all(parts: Vec<Expr>) -> Option<Expr> {
        let mut it = parts.into_iter().rev();
        let mut acc = it.next()?;
        for part in it {
            acc = Expr::Concat(Box::new(part), Box::new(acc));
        }
        Some(acc)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}({})", v.name, v.width),
            Expr::Const(value, width) => write!(f, "0x{:x}_{}", value, width),
            Expr::Concat(l, r) => write!(f, "({l} ++ {r})"),
            Expr::Slice(inner, hi, lo) => write!(f, "{inner}[{hi}:{lo}]"),
            Expr::BvAnd(l, r) => write!(f, "({l} & {r})"),
            Expr::BvLShr(l, r) => write!(f, "({l} >> {r})"),
            Expr::Reference(r) => write!(f, "{}<{}>", r.path, r.side),
            Expr::DontCare => write!(f, "_"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str, width: Width) -> Var {
        Var { name: name.to_string(), width }
    }

    #[test]
    fn concat_width_is_sum() {
        let e = Expr::Concat(
            Box::new(Expr::Var(v("a", 8))),
            Box::new(Expr::Var(v("b", 16))),
        );
        assert_eq!(e.width(), Some(24));
    }

    #[test]
    fn slice_width_is_inclusive() {
        let e = Expr::Slice(Box::new(Expr::Var(v("a", 32))), 15, 0);
        assert_eq!(e.width(), Some(16));
    }

    #[test]
    fn concat_all_builds_msb_first() {
        let parts = vec![
            Expr::Var(v("f1", 8)),
            Expr::Var(v("f2", 8)),
            Expr::Var(v("r", 4)),
        ];
        let joined = Expr::concat_all(parts).unwrap();
        assert_eq!(joined.width(), Some(20));
        // f1 is the outermost (most significant) operand.
        match joined {
            Expr::Concat(l, _) => assert_eq!(*l, Expr::Var(v("f1", 8))),
            _ => panic!("expected Concat"),
        }
    }

    #[test]
    fn dont_care_has_no_width() {
        assert_eq!(Expr::DontCare.width(), None);
    }
}
