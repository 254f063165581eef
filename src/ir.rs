//! Parser IR
//!
//! A typed, immutable-after-construction model of a single P4 parser
//! program: named types, named states each carrying a straight-line
//! operation block and a transition block, and the handful of lookup
//! operations the rest of the crate needs (`header_width`, `states`,
//! `is_terminal`). Construction from IR-JSON lives in [`crate::ir_json`];
//! this module only knows about the typed shape, the way `air.rs`'s
//! `AirSpec`/`Row` know nothing about how their values were produced.

use std::collections::HashMap;

use crate::bitvec::{Expr, Side, Width};
use crate::error::IrError;
use crate::formula::{ACCEPT, REJECT, START};

/// A P4 type: either a leaf bit-field or a reference to another named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Bits(Width),
    Named(String),
}

/// A `Type_Header`/`Type_Struct` definition: an ordered list of named fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDef {
    pub fields: Vec<(String, FieldType)>,
}

/// One component of an operation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Assign { lhs: String, rhs: Expr },
    /// `header_path` names the header struct being filled in; `field_sizes`
    /// gives each leaf field's name and width, in source (layout) order.
    Extract { header_path: String, field_sizes: Vec<(String, Width)> },
}

impl Component {
    /// Bits consumed by this component. Assignments consume none.
    pub fn size(&self) -> Width {
        match self {
            Component::Assign { .. } => 0,
            Component::Extract { field_sizes, .. } => field_sizes.iter().map(|(_, w)| w).sum(),
        }
    }
}

/// A straight-line sequence of [`Component`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationBlock {
    pub components: Vec<Component>,
}

impl OperationBlock {
    /// Total bits consumed by this block's extracts, in source order (§4.1).
    pub fn size(&self) -> Width {
        self.components.iter().map(Component::size).sum()
    }
}

/// One case of a transition block: a pattern per selector (or empty for a
/// direct transition) and the target state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCase {
    pub pattern: Vec<Expr>,
    pub target: String,
}

/// A transition block: zero or more selector expressions plus an ordered
/// list of cases. Earlier cases take priority (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionBlock {
    pub selectors: Vec<Expr>,
    pub cases: Vec<TransitionCase>,
}

impl TransitionBlock {
    /// A transition block with no selectors, unconditionally going to `target`.
    pub fn direct(target: impl Into<String>) -> Self {
        TransitionBlock {
            selectors: Vec::new(),
            cases: vec![TransitionCase { pattern: vec![Expr::DontCare], target: target.into() }],
        }
    }
}

/// One named state: its straight-line operation block plus its transition block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    pub op_block: OperationBlock,
    pub trans_block: TransitionBlock,
}

/// A complete, immutable parser program, tagged with the side it models.
#[derive(Debug, Clone)]
pub struct ParserProgram {
    pub side: Side,
    pub input_name: String,
    pub output_name: String,
    pub output_type: String,
    pub types: HashMap<String, TypeDef>,
    pub states: HashMap<String, ParserState>,
}

impl ParserProgram {
    /// Look up a non-terminal state by name. Reserved terminal names return
    /// `None`, matching §4.1's "state lookup" rule; callers must check
    /// [`is_terminal`](crate::formula::is_terminal) before calling this for
    /// a definitive "unknown state" error.
    pub fn state(&self, name: &str) -> Option<&ParserState> {
        if name == START || name == ACCEPT || name == REJECT {
            return self.states.get(name);
        }
        self.states.get(name)
    }

    /// Walk `types[self.output_type]` following `path`'s components after
    /// stripping the leading `<output_name>.` prefix, returning either the
    /// leaf field's width or, for a struct/header node, the map of leaf
    /// fields reachable beneath it.
    ///
    /// `path` must be of the form `<output_name>.f1.f2...fk`; this is total
    /// over well-formed paths (§4.1) and fails with `UnknownField` otherwise.
    pub fn header_width(&self, path: &str) -> Result<HeaderWidth, IrError> {
        resolve_header_width(&self.types, &self.output_name, &self.output_type, path)
    }

    /// All leaf fields reachable beneath `type_name`, in declaration order,
    /// used when an Extract's header path names a whole struct/header.
    pub fn all_leaf_fields(&self, type_name: &str, path_for_errors: &str) -> Result<Vec<(String, Width)>, IrError> {
        all_leaf_fields(&self.types, type_name, path_for_errors)
    }
}

/// Free-standing form of [`ParserProgram::header_width`], usable while a
/// program is still being assembled (the two-pass IR-JSON ingest has a
/// complete `types` map before any state is parsed, but no `ParserProgram`
/// yet).
pub fn resolve_header_width(
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
    path: &str,
) -> Result<HeaderWidth, IrError> {
    let rest = path
        .strip_prefix(output_name)
        .and_then(|s| s.strip_prefix('.'))
        .ok_or_else(|| IrError::UnknownField(format!("path `{path}` does not start with `{output_name}.`")))?;

    let mut current_type = output_type.to_string();
    let mut components = rest.split('.').peekable();

    loop {
        let field_name = components
            .next()
            .ok_or_else(|| IrError::UnknownField(format!("empty path component in `{path}`")))?;
        let type_def = types
            .get(&current_type)
            .ok_or_else(|| IrError::UnknownField(format!("unknown type `{current_type}` for path `{path}`")))?;
        let field_type = type_def
            .fields
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, ty)| ty)
            .ok_or_else(|| IrError::UnknownField(format!("field `{field_name}` not found on type `{current_type}`")))?;

        match field_type {
            FieldType::Bits(w) => {
                if components.peek().is_some() {
                    return Err(IrError::UnknownField(format!(
                        "path `{path}` continues past leaf bit-field `{field_name}`"
                    )));
                }
                return Ok(HeaderWidth::Leaf(*w));
            }
            FieldType::Named(next_type) => {
                if components.peek().is_none() {
                    return Ok(HeaderWidth::Struct(all_leaf_fields(types, next_type, path)?));
                }
                current_type = next_type.clone();
            }
        }
    }
}

/// Free-standing form of [`ParserProgram::all_leaf_fields`].
pub fn all_leaf_fields(
    types: &HashMap<String, TypeDef>,
    type_name: &str,
    path_for_errors: &str,
) -> Result<Vec<(String, Width)>, IrError> {
    let type_def = types
        .get(type_name)
        .ok_or_else(|| IrError::UnknownField(format!("unknown type `{type_name}` while resolving `{path_for_errors}`")))?;
    let mut out = Vec::with_capacity(type_def.fields.len());
    for (name, ty) in &type_def.fields {
        match ty {
            FieldType::Bits(w) => out.push((name.clone(), *w)),
            FieldType::Named(nested) => {
                for (nested_name, w) in all_leaf_fields(types, nested, path_for_errors)? {
                    out.push((format!("{name}.{nested_name}"), w));
                }
            }
        }
    }
    Ok(out)
}

/// Result of [`ParserProgram::header_width`]: either a single leaf width or
/// the full set of leaf fields beneath a struct/header node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderWidth {
    Leaf(Width),
    Struct(Vec<(String, Width)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> ParserProgram {
        let mut types = HashMap::new();
        types.insert(
            "eth_t".to_string(),
            TypeDef { fields: vec![("dst".to_string(), FieldType::Bits(24)), ("src".to_string(), FieldType::Bits(24))] },
        );
        types.insert(
            "headers_t".to_string(),
            TypeDef { fields: vec![("eth".to_string(), FieldType::Named("eth_t".to_string()))] },
        );

        let mut states = HashMap::new();
        states.insert(
            START.to_string(),
            ParserState {
                op_block: OperationBlock {
                    components: vec![Component::Extract {
                        header_path: "hdr.eth".to_string(),
                        field_sizes: vec![("dst".to_string(), 24), ("src".to_string(), 24)],
                    }],
                },
                trans_block: TransitionBlock::direct(ACCEPT),
            },
        );

        ParserProgram {
            side: Side::Left,
            input_name: "pkt".to_string(),
            output_name: "hdr".to_string(),
            output_type: "headers_t".to_string(),
            types,
            states,
        }
    }

    #[test]
    fn header_width_resolves_leaf() {
        let p = sample_program();
        assert_eq!(p.header_width("hdr.eth.dst").unwrap(), HeaderWidth::Leaf(24));
    }

    #[test]
    fn header_width_resolves_struct() {
        let p = sample_program();
        match p.header_width("hdr.eth").unwrap() {
            HeaderWidth::Struct(fields) => {
                assert_eq!(fields, vec![("dst".to_string(), 24), ("src".to_string(), 24)]);
            }
            _ => panic!("expected Struct"),
        }
    }

    #[test]
    fn header_width_rejects_unknown_field() {
        let p = sample_program();
        assert!(matches!(p.header_width("hdr.eth.checksum"), Err(IrError::UnknownField(_))));
    }

    #[test]
    fn op_block_size_sums_extracts() {
        let p = sample_program();
        assert_eq!(p.states[START].op_block.size(), 48);
    }

    #[test]
    fn terminal_states_not_in_map() {
        let p = sample_program();
        assert!(p.state(ACCEPT).is_none());
        assert!(p.state(REJECT).is_none());
    }
}
