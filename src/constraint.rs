//! Constraint compiler
//!
//! A small recursive-descent parser and evaluator for the optional
//! disagreeing-filter/accepting-filter relations of §4.6: literals
//! `value_width`, `hdr_l.`/`hdr_r.`-prefixed dotted names, `+` (bit-vector
//! concatenation), `==`/`!=`, boolean `and`/`or`, and `name[hi:lo]` slicing.
//! Anything outside this grammar is rejected as `UnsafeExpression` rather
//! than silently accepted, the way `constraint.py`'s evaluator refuses any
//! AST node kind it does not explicitly recognise.

use crate::bitvec::{Expr, Reference, Side};
use crate::error::ConstraintError;
use crate::formula::{Formula, PureFormula};

/// A parsed constraint expression, still referencing header paths by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CExpr {
    Literal(num_bigint::BigUint, u32),
    Field(Reference),
    Concat(Box<CExpr>, Box<CExpr>),
    Slice(Box<CExpr>, u32, u32),
}

/// A parsed constraint relation: the boolean-level grammar over [`CExpr`]
/// comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CFormula {
    Eq(CExpr, CExpr),
    Neq(CExpr, CExpr),
    And(Box<CFormula>, Box<CFormula>),
    Or(Box<CFormula>, Box<CFormula>),
}

/// Parse a constraint-language source string into a [`CFormula`].
pub fn parse(source: &str) -> Result<CFormula, ConstraintError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let formula = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ConstraintError::UnsafeExpression(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(formula)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String, Option<u32>),
    Plus,
    EqEq,
    NotEq,
    And,
    Or,
    LBracket,
    RBracket,
    Colon,
    LParen,
    RParen,
}

fn lex(source: &str) -> Result<Vec<Token>, ConstraintError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == 'x') {
                    i += 1;
                }
                let mut text: String = chars[start..i].iter().collect();
                let mut width = None;
                if i < chars.len() && chars[i] == '_' {
                    i += 1;
                    let wstart = i;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    if wstart == i {
                        return Err(ConstraintError::UnsafeExpression(format!(
                            "malformed literal near column {start}: missing width after `_`"
                        )));
                    }
                    width = Some(chars[wstart..i].iter().collect::<String>().parse::<u32>().map_err(|e| {
                        ConstraintError::UnsafeExpression(format!("invalid literal width: {e}"))
                    })?);
                }
                if let Some(stripped) = text.strip_prefix("0x") {
                    text = stripped.to_string();
                    tokens.push(Token::Number(format!("0x{text}"), width));
                } else {
                    tokens.push(Token::Number(text, width));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            other => {
                return Err(ConstraintError::UnsafeExpression(format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<CFormula, ConstraintError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = CFormula::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<CFormula, ConstraintError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = CFormula::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<CFormula, ConstraintError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.bump();
            let inner = self.parse_or()?;
            match self.bump() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(ConstraintError::UnsafeExpression("unmatched `(`".to_string())),
            }
        }
        let lhs = self.parse_concat()?;
        match self.bump() {
            Some(Token::EqEq) => Ok(CFormula::Eq(lhs, self.parse_concat()?)),
            Some(Token::NotEq) => Ok(CFormula::Neq(lhs, self.parse_concat()?)),
            other => Err(ConstraintError::UnsafeExpression(format!("expected `==` or `!=`, found {other:?}"))),
        }
    }

    fn parse_concat(&mut self) -> Result<CExpr, ConstraintError> {
        let mut lhs = self.parse_slice()?;
        while matches!(self.peek(), Some(Token::Plus)) {
            self.bump();
            let rhs = self.parse_slice()?;
            lhs = CExpr::Concat(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_slice(&mut self) -> Result<CExpr, ConstraintError> {
        let atom = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::LBracket)) {
            self.bump();
            let hi = self.expect_number()?;
            match self.bump() {
                Some(Token::Colon) => {}
                other => return Err(ConstraintError::UnsafeExpression(format!("expected `:` in slice, found {other:?}"))),
            }
            let lo = self.expect_number()?;
            match self.bump() {
                Some(Token::RBracket) => {}
                other => return Err(ConstraintError::UnsafeExpression(format!("expected `]`, found {other:?}"))),
            }
            return Ok(CExpr::Slice(Box::new(atom), hi, lo));
        }
        Ok(atom)
    }

    fn expect_number(&mut self) -> Result<u32, ConstraintError> {
        match self.bump() {
            Some(Token::Number(text, None)) => {
                text.parse::<u32>().map_err(|e| ConstraintError::UnsafeExpression(format!("invalid index: {e}")))
            }
            other => Err(ConstraintError::UnsafeExpression(format!("expected an unsuffixed integer index, found {other:?}"))),
        }
    }

    fn parse_atom(&mut self) -> Result<CExpr, ConstraintError> {
        match self.bump() {
            Some(Token::Number(text, Some(width))) => {
                let value = parse_literal_value(text)?;
                Ok(CExpr::Literal(value, *width))
            }
            Some(Token::Number(text, None)) => Err(ConstraintError::UnsafeExpression(format!(
                "literal `{text}` is missing an explicit `_width` suffix"
            ))),
            Some(Token::Ident(name)) => parse_field_ref(name),
            Some(Token::LParen) => {
                let inner = self.parse_concat()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(ConstraintError::UnsafeExpression(format!("expected `)`, found {other:?}"))),
                }
            }
            other => Err(ConstraintError::UnsafeExpression(format!("expected a literal or field reference, found {other:?}"))),
        }
    }
}

fn parse_literal_value(text: &str) -> Result<num_bigint::BigUint, ConstraintError> {
    if let Some(hex) = text.strip_prefix("0x") {
        num_bigint::BigUint::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| ConstraintError::UnsafeExpression(format!("invalid hex literal `{text}`")))
    } else {
        text.parse::<num_bigint::BigUint>()
            .map_err(|e| ConstraintError::UnsafeExpression(format!("invalid decimal literal `{text}`: {e}")))
    }
}

/// `hdr_l.a.b` / `hdr_r.a.b` is the constraint language's own side-prefixed
/// path syntax; it is distinct from an IR header path (which starts with
/// the parser's own `output_name`) and is translated to one by the caller
/// at evaluation time, since only then is `output_name` known.
fn parse_field_ref(name: &str) -> Result<CExpr, ConstraintError> {
    let (side, rest) = if let Some(rest) = name.strip_prefix("hdr_l.") {
        (Side::Left, rest)
    } else if let Some(rest) = name.strip_prefix("hdr_r.") {
        (Side::Right, rest)
    } else {
        return Err(ConstraintError::UnsafeExpression(format!(
            "identifier `{name}` must be prefixed with `hdr_l.` or `hdr_r.`"
        )));
    };
    // Width is resolved later, against the owning side's IR, in `typecheck`.
    Ok(CExpr::Field(Reference { path: rest.to_string(), width: 0, side }))
}

/// Resolve every [`CExpr::Field`]'s bare path against the owning side's
/// parser IR, prefixing it with that side's `output_name` and filling in
/// its declared width. This is a one-time, pf-independent structural check:
/// it fails only when a name in the constraint does not exist in the IR at
/// all. Whether a field is *initialized yet* at a given point of the
/// bisimulation is checked dynamically, per guarded formula, by
/// [`evaluate`] — not here (§4.6's "uninitialised-variable semantics" is a
/// property of where in the exploration a relation is asked, not of the
/// constraint text).
pub fn typecheck(
    formula: &CFormula,
    left_output_name: &str,
    left_types: &std::collections::HashMap<String, crate::ir::TypeDef>,
    left_output_type: &str,
    right_output_name: &str,
    right_types: &std::collections::HashMap<String, crate::ir::TypeDef>,
    right_output_type: &str,
) -> Result<CFormula, ConstraintError> {
    fn go(
        expr: &CExpr,
        left_output_name: &str,
        left_types: &std::collections::HashMap<String, crate::ir::TypeDef>,
        left_output_type: &str,
        right_output_name: &str,
        right_types: &std::collections::HashMap<String, crate::ir::TypeDef>,
        right_output_type: &str,
    ) -> Result<CExpr, ConstraintError> {
        match expr {
            CExpr::Literal(v, w) => Ok(CExpr::Literal(v.clone(), *w)),
            CExpr::Field(r) => {
                let (output_name, types, output_type) = match r.side {
                    Side::Left => (left_output_name, left_types, left_output_type),
                    Side::Right => (right_output_name, right_types, right_output_type),
                };
                let full_path = format!("{output_name}.{}", r.path);
                match crate::ir::resolve_header_width(types, output_name, output_type, &full_path) {
                    Ok(crate::ir::HeaderWidth::Leaf(w)) => Ok(CExpr::Field(Reference { path: full_path, width: w, side: r.side })),
                    Ok(crate::ir::HeaderWidth::Struct(_)) => {
                        Err(ConstraintError::WidthMismatch(format!("`{full_path}` names a struct/header, not a leaf field")))
                    }
                    Err(e) => Err(ConstraintError::WidthMismatch(format!("`{full_path}` does not exist: {e}"))),
                }
            }
            CExpr::Concat(l, r) => Ok(CExpr::Concat(
                Box::new(go(l, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
                Box::new(go(r, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
            )),
            CExpr::Slice(inner, hi, lo) => Ok(CExpr::Slice(
                Box::new(go(inner, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
                *hi,
                *lo,
            )),
        }
    }
    match formula {
        CFormula::Eq(l, r) => Ok(CFormula::Eq(
            go(l, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?,
            go(r, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?,
        )),
        CFormula::Neq(l, r) => Ok(CFormula::Neq(
            go(l, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?,
            go(r, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?,
        )),
        CFormula::And(l, r) => Ok(CFormula::And(
            Box::new(typecheck(l, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
            Box::new(typecheck(r, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
        )),
        CFormula::Or(l, r) => Ok(CFormula::Or(
            Box::new(typecheck(l, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
            Box::new(typecheck(r, left_output_name, left_types, left_output_type, right_output_name, right_types, right_output_type)?),
        )),
    }
}

/// Try to resolve every [`CExpr::Field`] in `expr` against `pf`'s currently
/// installed header variables. Returns `None` as soon as any field is not
/// yet initialized on its side at this point of the bisimulation.
fn try_resolve(expr: &CExpr, pf: &PureFormula) -> Option<Expr> {
    match expr {
        CExpr::Literal(v, w) => Some(Expr::Const(v.clone(), *w)),
        CExpr::Field(r) => pf.get_header_var(&r.path, r.side).map(|v| Expr::Var(v.clone())),
        CExpr::Concat(l, r) => Some(Expr::Concat(Box::new(try_resolve(l, pf)?), Box::new(try_resolve(r, pf)?))),
        CExpr::Slice(inner, hi, lo) => Some(Expr::Slice(Box::new(try_resolve(inner, pf)?), *hi, *lo)),
    }
}

/// Evaluate a type-checked [`CFormula`] against a specific guarded
/// formula's [`PureFormula`], applying §4.6's uninitialised-variable
/// semantics dynamically: `None` means "every path unresolved, relation
/// omitted (trivially satisfied)".
pub fn evaluate(formula: &CFormula, pf: &PureFormula) -> Result<Option<Formula>, ConstraintError> {
    match formula {
        CFormula::Eq(l, r) => Ok(eval_comparison(l, r, false, pf)),
        CFormula::Neq(l, r) => Ok(eval_comparison(l, r, true, pf)),
        CFormula::And(l, r) => {
            let lf = evaluate(l, pf)?;
            let rf = evaluate(r, pf)?;
            Ok(match (lf, rf) {
                (None, None) => None,
                (Some(f), None) | (None, Some(f)) => Some(f),
                (Some(l), Some(r)) => Some(l.and(r)),
            })
        }
        CFormula::Or(l, r) => {
            let lf = evaluate(l, pf)?;
            let rf = evaluate(r, pf)?;
            Ok(match (lf, rf) {
                (None, None) => None,
                (Some(f), None) | (None, Some(f)) => Some(f),
                (Some(l), Some(r)) => Some(or_formula(l, r)),
            })
        }
    }
}

fn eval_comparison(l: &CExpr, r: &CExpr, negate: bool, pf: &PureFormula) -> Option<Formula> {
    match (try_resolve(l, pf), try_resolve(r, pf)) {
        // Every path unresolved: the relation is omitted (trivially satisfied).
        (None, None) => None,
        // Exactly one side resolves: inconsistent, evaluates to false regardless of `==`/`!=`.
        (Some(_), None) | (None, Some(_)) => Some(Formula::false_()),
        (Some(l), Some(r)) => {
            let eq = Formula::equals(l, r).unwrap_or_else(|_| Formula::false_());
            Some(if negate { eq.not() } else { eq })
        }
    }
}

fn or_formula(l: Formula, r: Formula) -> Formula {
    l.or(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_hex_literal_with_width() {
        let tokens = lex("0x4503_16").unwrap();
        assert_eq!(tokens, vec![Token::Number("0x4503".to_string(), Some(16))]);
    }

    #[test]
    fn parses_simple_equality() {
        let f = parse("hdr_l.eth.dst == hdr_r.eth.dst").unwrap();
        assert!(matches!(f, CFormula::Eq(CExpr::Field(_), CExpr::Field(_))));
    }

    #[test]
    fn parses_and_or_precedence() {
        let f = parse("hdr_l.a == 0x1_8 and hdr_l.b == 0x2_8 or hdr_l.c == 0x3_8").unwrap();
        assert!(matches!(f, CFormula::Or(_, _)));
    }

    #[test]
    fn rejects_disallowed_syntax() {
        assert!(matches!(parse("hdr_l.a + 1"), Err(ConstraintError::UnsafeExpression(_))));
    }

    #[test]
    fn parses_slice() {
        let f = parse("hdr_l.a[7:0] == 0x1_8").unwrap();
        match f {
            CFormula::Eq(CExpr::Slice(_, 7, 0), _) => {}
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_unprefixed_identifier() {
        assert!(matches!(parse("a == 0x1_8"), Err(ConstraintError::UnsafeExpression(_))));
    }

    #[test]
    fn evaluate_omits_relation_when_both_sides_unresolved() {
        let formula = parse("hdr_l.eth.dst == hdr_r.eth.dst").unwrap();
        let typed = CFormula::Eq(
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Left }),
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Right }),
        );
        let _ = formula;
        let pf = PureFormula::default();
        assert_eq!(evaluate(&typed, &pf).unwrap(), None);
    }

    #[test]
    fn evaluate_is_false_when_exactly_one_side_resolved() {
        let typed = CFormula::Eq(
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Left }),
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Right }),
        );
        let mut pf = PureFormula::default();
        pf.set_header_var("hdr.eth.dst", Side::Left, crate::formula::Var { name: "a".to_string(), width: 24 });
        assert_eq!(evaluate(&typed, &pf).unwrap(), Some(Formula::false_()));
    }

    #[test]
    fn evaluate_compares_when_both_sides_resolved() {
        let typed = CFormula::Eq(
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Left }),
            CExpr::Field(Reference { path: "hdr.eth.dst".to_string(), width: 24, side: Side::Right }),
        );
        let mut pf = PureFormula::default();
        pf.set_header_var("hdr.eth.dst", Side::Left, crate::formula::Var { name: "a".to_string(), width: 24 });
        pf.set_header_var("hdr.eth.dst", Side::Right, crate::formula::Var { name: "b".to_string(), width: 24 });
        assert!(matches!(evaluate(&typed, &pf).unwrap(), Some(Formula::Equals(_, _))));
    }
}
