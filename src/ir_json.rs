//! IR-JSON ingestion
//!
//! Builds a [`ParserProgram`] from the IR-JSON document produced by the
//! (out of scope, §1) P4 front end. Two passes over `objects.vec`, per
//! §4.1: first every `Type_Header`/`Type_Struct` node, so that constant
//! widths and header paths can be resolved while building states; then the
//! first `P4Parser` node, with later ones warned about and ignored.
//!
//! Unknown node types and unusual shapes are warnings (`tracing::warn!`),
//! not errors (§4.9, §7) — they do not block semantics as long as the
//! required nodes for the chosen parser are well-formed.

use std::collections::HashMap;

use num_bigint::BigUint;
use serde_json::Value;

use crate::bitvec::{Expr, Reference, Side};
use crate::error::IrError;
use crate::ir::{self, Component, FieldType, OperationBlock, ParserProgram, ParserState, TransitionBlock, TransitionCase, TypeDef};

/// Parse a complete `ParserProgram` for `side` out of an IR-JSON document.
pub fn parse_program(doc: &Value, side: Side) -> Result<ParserProgram, IrError> {
    let objects = doc
        .get("objects")
        .and_then(|o| o.get("vec"))
        .and_then(Value::as_array)
        .ok_or_else(|| IrError::Malformed("missing `objects.vec` array".to_string()))?;

    let types = parse_types(objects);

    let mut parser_node = None;
    let mut seen_parser = false;
    for obj in objects {
        if node_type(obj) == Some("P4Parser") {
            if seen_parser {
                tracing::warn!("multiple P4Parser objects found; ignoring all but the first");
                continue;
            }
            seen_parser = true;
            parser_node = Some(obj);
        }
    }
    let parser_node = parser_node.ok_or_else(|| IrError::Malformed("no P4Parser object found".to_string()))?;

    let (input_name, output_name, output_type) = parse_params(parser_node)?;

    let states_array = parser_node
        .get("states")
        .and_then(|s| s.get("vec"))
        .and_then(Value::as_array)
        .ok_or_else(|| IrError::Malformed("P4Parser missing `states.vec`".to_string()))?;

    let mut states = HashMap::new();
    for state_node in states_array {
        let name = state_node
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| IrError::Malformed("parser state missing `name`".to_string()))?;
        let op_block = parse_op_block(state_node, side, &types, &output_name, &output_type)?;
        let trans_block = parse_trans_block(state_node, side, &types, &output_name, &output_type)?;
        states.insert(name.to_string(), ParserState { op_block, trans_block });
    }

    Ok(ParserProgram { side, input_name, output_name, output_type, types, states })
}

fn node_type(node: &Value) -> Option<&str> {
    node.get("Node_Type").and_then(Value::as_str)
}

fn parse_types(objects: &[Value]) -> HashMap<String, TypeDef> {
    let mut types = HashMap::new();
    for obj in objects {
        match node_type(obj) {
            Some("Type_Header") | Some("Type_Struct") => {
                let Some(name) = obj.get("name").and_then(Value::as_str) else {
                    tracing::warn!("type node missing `name`; skipping");
                    continue;
                };
                let fields = obj
                    .get("fields")
                    .and_then(|f| f.get("vec"))
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(parse_field).collect())
                    .unwrap_or_default();
                types.insert(name.to_string(), TypeDef { fields });
            }
            Some(_) | None => {}
        }
    }
    types
}

fn parse_field(field_node: &Value) -> Option<(String, FieldType)> {
    let name = field_node.get("name").and_then(Value::as_str)?;
    let ty = field_node.get("type")?;
    match node_type(ty) {
        Some("Type_Bits") => {
            let size = ty.get("size").and_then(Value::as_u64)?;
            Some((name.to_string(), FieldType::Bits(size as u32)))
        }
        Some("Type_Name") => {
            let referenced = ty.get("path").and_then(|p| p.get("name")).and_then(Value::as_str)?;
            Some((name.to_string(), FieldType::Named(referenced.to_string())))
        }
        Some(other) => {
            tracing::warn!("field `{name}` has unsupported type node `{other}`; skipping");
            None
        }
        None => {
            tracing::warn!("field `{name}` has no `Node_Type` on its type; skipping");
            None
        }
    }
}

fn parse_params(parser_node: &Value) -> Result<(String, String, String), IrError> {
    let params = parser_node
        .get("type")
        .and_then(|t| t.get("applyParams"))
        .and_then(|a| a.get("parameters"))
        .and_then(|p| p.get("vec"))
        .and_then(Value::as_array)
        .ok_or_else(|| IrError::Malformed("P4Parser missing `type.applyParams.parameters.vec`".to_string()))?;

    if params.len() != 2 {
        return Err(IrError::Malformed(format!("P4Parser expects exactly 2 parameters, found {}", params.len())));
    }

    let mut input_name = None;
    let mut output_name = None;
    let mut output_type = None;

    for param in params {
        let name = param
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| IrError::Malformed("parser parameter missing `name`".to_string()))?;
        let direction = param.get("direction").and_then(Value::as_str).unwrap_or("in");
        if direction == "out" {
            let type_name = param
                .get("type")
                .and_then(|t| t.get("path"))
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| IrError::Malformed("`out` parameter missing `type.path.name`".to_string()))?;
            output_name = Some(name.to_string());
            output_type = Some(type_name.to_string());
        } else {
            input_name = Some(name.to_string());
        }
    }

    match (input_name, output_name, output_type) {
        (Some(i), Some(o), Some(ot)) => Ok((i, o, ot)),
        _ => Err(IrError::Malformed("P4Parser parameters must include one `out` and one non-`out` parameter".to_string())),
    }
}

fn parse_op_block(
    state_node: &Value,
    side: Side,
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
) -> Result<OperationBlock, IrError> {
    let components_array = state_node
        .get("components")
        .and_then(|c| c.get("vec"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut components = Vec::with_capacity(components_array.len());
    for node in components_array {
        match node_type(node) {
            Some("AssignmentStatement") => {
                let lhs_node = node.get("left").ok_or_else(|| IrError::Malformed("AssignmentStatement missing `left`".to_string()))?;
                let lhs = dotted_path(lhs_node)?;
                let lhs_width = match ir::resolve_header_width(types, output_name, output_type, &lhs)? {
                    ir::HeaderWidth::Leaf(w) => w,
                    ir::HeaderWidth::Struct(_) => {
                        return Err(IrError::Unsupported(format!("assignment LHS `{lhs}` is not a leaf field")))
                    }
                };
                let rhs_node = node.get("right").ok_or_else(|| IrError::Malformed("AssignmentStatement missing `right`".to_string()))?;
                let rhs = parse_expr(rhs_node, side, types, output_name, output_type, Some(lhs_width))?;
                components.push(Component::Assign { lhs, rhs });
            }
            Some("MethodCallStatement") => {
                let method_call = node
                    .get("methodCall")
                    .ok_or_else(|| IrError::Malformed("MethodCallStatement missing `methodCall`".to_string()))?;
                let member = method_call
                    .get("method")
                    .and_then(|m| m.get("member"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| IrError::Malformed("methodCall missing `method.member`".to_string()))?;
                if member != "extract" {
                    tracing::warn!("ignoring unsupported method call `{member}`");
                    continue;
                }
                let args = method_call
                    .get("arguments")
                    .and_then(|a| a.get("vec"))
                    .and_then(Value::as_array)
                    .ok_or_else(|| IrError::Malformed("extract call missing `arguments.vec`".to_string()))?;
                let header_arg = args
                    .first()
                    .ok_or_else(|| IrError::Malformed("extract call has no arguments".to_string()))?;
                let header_path = dotted_path(header_arg)?;
                let field_sizes = match ir::resolve_header_width(types, output_name, output_type, &header_path)? {
                    ir::HeaderWidth::Struct(fields) => fields,
                    ir::HeaderWidth::Leaf(w) => vec![(header_path.clone(), w)],
                };
                components.push(Component::Extract { header_path, field_sizes });
            }
            Some(other) => {
                tracing::warn!("ignoring unsupported component node `{other}`");
            }
            None => {
                tracing::warn!("component node missing `Node_Type`; ignoring");
            }
        }
    }

    Ok(OperationBlock { components })
}

fn parse_trans_block(
    state_node: &Value,
    side: Side,
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
) -> Result<TransitionBlock, IrError> {
    let select_node = state_node
        .get("selectExpression")
        .ok_or_else(|| IrError::Malformed("parser state missing `selectExpression`".to_string()))?;

    match node_type(select_node) {
        Some("PathExpression") => {
            let target = select_node
                .get("path")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| IrError::Malformed("direct transition PathExpression missing `path.name`".to_string()))?;
            Ok(TransitionBlock::direct(target))
        }
        Some("SelectExpression") => {
            let select_components = select_node
                .get("select")
                .and_then(|s| s.get("components"))
                .and_then(|c| c.get("vec"))
                .and_then(Value::as_array)
                .ok_or_else(|| IrError::Malformed("SelectExpression missing `select.components.vec`".to_string()))?;

            let mut selectors = Vec::with_capacity(select_components.len());
            for node in select_components {
                selectors.push(parse_expr(node, side, types, output_name, output_type, None)?);
            }

            let select_cases = select_node
                .get("selectCases")
                .and_then(|c| c.get("vec"))
                .and_then(Value::as_array)
                .ok_or_else(|| IrError::Malformed("SelectExpression missing `selectCases.vec`".to_string()))?;

            let mut cases = Vec::with_capacity(select_cases.len());
            for case_node in select_cases {
                let target = case_node
                    .get("state")
                    .and_then(|s| s.get("path"))
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| IrError::Malformed("select case missing `state.path.name`".to_string()))?;
                let keyset = case_node
                    .get("keyset")
                    .ok_or_else(|| IrError::Malformed("select case missing `keyset`".to_string()))?;
                let pattern = parse_keyset(keyset, side, &selectors, types, output_name, output_type)?;
                cases.push(TransitionCase { pattern, target: target.to_string() });
            }

            Ok(TransitionBlock { selectors, cases })
        }
        Some(other) => Err(IrError::Unsupported(format!("unsupported selectExpression node `{other}`"))),
        None => Err(IrError::Malformed("selectExpression missing `Node_Type`".to_string())),
    }
}

/// Parse a select-case keyset into a pattern list of the same length as
/// `selectors`. A bare `DefaultExpression` keyset (the fall-through case,
/// §4.5, §9) yields an all-`DontCare` pattern regardless of selector count.
fn parse_keyset(
    keyset: &Value,
    side: Side,
    selectors: &[Expr],
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
) -> Result<Vec<Expr>, IrError> {
    if node_type(keyset) == Some("DefaultExpression") {
        return Ok(vec![Expr::DontCare; selectors.len().max(1)]);
    }

    if let Some(components) = keyset.get("components").and_then(|c| c.get("vec")).and_then(Value::as_array) {
        let mut out = Vec::with_capacity(components.len());
        for (i, node) in components.iter().enumerate() {
            let hint = selectors.get(i).and_then(Expr::width);
            out.push(parse_keyset_component(node, side, types, output_name, output_type, hint)?);
        }
        return Ok(out);
    }

    let hint = selectors.first().and_then(Expr::width);
    Ok(vec![parse_keyset_component(keyset, side, types, output_name, output_type, hint)?])
}

fn parse_keyset_component(
    node: &Value,
    side: Side,
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
    width_hint: Option<u32>,
) -> Result<Expr, IrError> {
    if node_type(node) == Some("DefaultExpression") {
        return Ok(Expr::DontCare);
    }
    parse_expr(node, side, types, output_name, output_type, width_hint)
}

/// Parse an expression node. `width_hint` supplies the bit-width a
/// context-free `Constant` must inherit (§4.2) when the node itself carries
/// none.
fn parse_expr(
    node: &Value,
    side: Side,
    types: &HashMap<String, TypeDef>,
    output_name: &str,
    output_type: &str,
    width_hint: Option<u32>,
) -> Result<Expr, IrError> {
    match node_type(node) {
        Some("Concat") => {
            let left = node.get("left").ok_or_else(|| IrError::Malformed("Concat missing `left`".to_string()))?;
            let right = node.get("right").ok_or_else(|| IrError::Malformed("Concat missing `right`".to_string()))?;
            Ok(Expr::Concat(
                Box::new(parse_expr(left, side, types, output_name, output_type, None)?),
                Box::new(parse_expr(right, side, types, output_name, output_type, None)?),
            ))
        }
        Some("Slice") => {
            let e0 = node.get("e0").ok_or_else(|| IrError::Malformed("Slice missing `e0`".to_string()))?;
            let hi = node
                .get("e1")
                .and_then(|e| e.get("value"))
                .and_then(Value::as_u64)
                .ok_or_else(|| IrError::Malformed("Slice missing `e1.value`".to_string()))?;
            let lo = node
                .get("e2")
                .and_then(|e| e.get("value"))
                .and_then(Value::as_u64)
                .ok_or_else(|| IrError::Malformed("Slice missing `e2.value`".to_string()))?;
            let inner = parse_expr(e0, side, types, output_name, output_type, None)?;
            Ok(Expr::Slice(Box::new(inner), hi as u32, lo as u32))
        }
        Some("Constant") => {
            let value = parse_biguint(node.get("value").ok_or_else(|| IrError::Malformed("Constant missing `value`".to_string()))?)?;
            let width = node
                .get("type")
                .and_then(|t| t.get("size"))
                .and_then(Value::as_u64)
                .map(|w| w as u32)
                .or(width_hint)
                .ok_or_else(|| IrError::Malformed("Constant has no declared width and no surrounding context".to_string()))?;
            Ok(Expr::Const(value, width))
        }
        Some("Member") | Some("PathExpression") => {
            let path = dotted_path(node)?;
            match ir::resolve_header_width(types, output_name, output_type, &path)? {
                ir::HeaderWidth::Leaf(w) => Ok(Expr::Reference(Reference { path, width: w, side })),
                ir::HeaderWidth::Struct(_) => Err(IrError::Unsupported(format!("reference to non-leaf path `{path}` in expression position"))),
            }
        }
        Some("DefaultExpression") => Ok(Expr::DontCare),
        Some("BAnd") => {
            let left = node.get("left").ok_or_else(|| IrError::Malformed("BAnd missing `left`".to_string()))?;
            let right = node.get("right").ok_or_else(|| IrError::Malformed("BAnd missing `right`".to_string()))?;
            let l = parse_expr(left, side, types, output_name, output_type, width_hint)?;
            let r = parse_expr(right, side, types, output_name, output_type, l.width())?;
            Ok(Expr::BvAnd(Box::new(l), Box::new(r)))
        }
        Some("Shr") => {
            let left = node.get("left").ok_or_else(|| IrError::Malformed("Shr missing `left`".to_string()))?;
            let right = node.get("right").ok_or_else(|| IrError::Malformed("Shr missing `right`".to_string()))?;
            let l = parse_expr(left, side, types, output_name, output_type, width_hint)?;
            let r = parse_expr(right, side, types, output_name, output_type, None)?;
            Ok(Expr::BvLShr(Box::new(l), Box::new(r)))
        }
        Some(other) => Err(IrError::Unsupported(format!("unsupported expression node `{other}`"))),
        None => Err(IrError::Malformed("expression node missing `Node_Type`".to_string())),
    }
}

fn parse_biguint(value: &Value) -> Result<BigUint, IrError> {
    if let Some(n) = value.as_u64() {
        return Ok(BigUint::from(n));
    }
    if let Some(s) = value.as_str() {
        return s.parse::<BigUint>().map_err(|e| IrError::Malformed(format!("invalid constant value `{s}`: {e}")));
    }
    Err(IrError::Malformed(format!("unsupported constant value shape: {value}")))
}

/// Walk a `Member`/`PathExpression` chain into a dotted path string, e.g.
/// `Member{expr: Member{expr: PathExpression{path:{name:"hdr"}}, member:"eth"}, member:"dst"}`
/// becomes `"hdr.eth.dst"`.
fn dotted_path(node: &Value) -> Result<String, IrError> {
    match node_type(node) {
        Some("PathExpression") => node
            .get("path")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| IrError::Malformed("PathExpression missing `path.name`".to_string())),
        Some("Member") => {
            let prefix = dotted_path(node.get("expr").ok_or_else(|| IrError::Malformed("Member missing `expr`".to_string()))?)?;
            let member = node
                .get("member")
                .and_then(Value::as_str)
                .ok_or_else(|| IrError::Malformed("Member missing `member`".to_string()))?;
            Ok(format!("{prefix}.{member}"))
        }
        Some(other) => Err(IrError::Malformed(format!("expected a dotted path, found `{other}`"))),
        None => Err(IrError::Malformed("path node missing `Node_Type`".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "objects": { "vec": [
                {
                    "Node_Type": "Type_Header",
                    "name": "eth_t",
                    "fields": { "vec": [
                        { "name": "dst", "type": { "Node_Type": "Type_Bits", "size": 24 } },
                        { "name": "src", "type": { "Node_Type": "Type_Bits", "size": 24 } }
                    ]}
                },
                {
                    "Node_Type": "Type_Struct",
                    "name": "headers_t",
                    "fields": { "vec": [
                        { "name": "eth", "type": { "Node_Type": "Type_Name", "path": { "name": "eth_t" } } }
                    ]}
                },
                {
                    "Node_Type": "P4Parser",
                    "type": { "applyParams": { "parameters": { "vec": [
                        { "name": "pkt", "direction": "in", "type": { "path": { "name": "packet_in" } } },
                        { "name": "hdr", "direction": "out", "type": { "path": { "name": "headers_t" } } }
                    ]}}},
                    "states": { "vec": [
                        {
                            "name": "start",
                            "components": { "vec": [
                                { "Node_Type": "MethodCallStatement", "methodCall": {
                                    "method": { "member": "extract" },
                                    "arguments": { "vec": [
                                        { "Node_Type": "PathExpression", "path": { "name": "hdr.eth" } }
                                    ]}
                                }}
                            ]},
                            "selectExpression": { "Node_Type": "PathExpression", "path": { "name": "accept" } }
                        }
                    ]}
                }
            ]}
        })
    }

    #[test]
    fn parses_types_and_states() {
        let doc = sample_doc();
        let program = parse_program(&doc, Side::Left).unwrap();
        assert_eq!(program.input_name, "pkt");
        assert_eq!(program.output_name, "hdr");
        assert_eq!(program.output_type, "headers_t");
        assert!(program.types.contains_key("eth_t"));
        let start = &program.states["start"];
        assert_eq!(start.op_block.size(), 48);
        assert_eq!(start.trans_block.cases.len(), 1);
        assert_eq!(start.trans_block.cases[0].target, "accept");
    }

    #[test]
    fn rejects_missing_objects_vec() {
        let doc = json!({});
        assert!(matches!(parse_program(&doc, Side::Left), Err(IrError::Malformed(_))));
    }

    #[test]
    fn select_with_default_case_yields_dont_care_pattern() {
        let mut doc = sample_doc();
        doc["objects"]["vec"][2]["states"]["vec"][0]["selectExpression"] = json!({
            "Node_Type": "SelectExpression",
            "select": { "components": { "vec": [
                { "Node_Type": "PathExpression", "path": { "name": "hdr.eth.dst" } }
            ]}},
            "selectCases": { "vec": [
                { "keyset": { "Node_Type": "Constant", "value": 0, "type": { "size": 24 } }, "state": { "path": { "name": "accept" } } },
                { "keyset": { "Node_Type": "DefaultExpression" }, "state": { "path": { "name": "reject" } } }
            ]}
        });
        let program = parse_program(&doc, Side::Left).unwrap();
        let start = &program.states["start"];
        assert_eq!(start.trans_block.cases.len(), 2);
        assert_eq!(start.trans_block.cases[1].pattern, vec![Expr::DontCare]);
    }
}
