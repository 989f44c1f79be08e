// Licensed under the Apache-2.0 license

//! JSON serialization of the two interchange formats: the elaborated model
//! and the raw parse tree. Both shapes are built as `serde_json::Value`
//! trees; addresses serialize as hex strings, array dimensions as
//! `{"size": n}` objects, and absent optional sections are omitted.

use serde_json::{json, Map, Value};

use crate::cst::{CstNode, RuleNode};
use crate::model::ElaboratedNode;
use crate::value::PropertyValue;

const MODEL_FORMAT: &str = "SystemRDL_ElaboratedModel";
const AST_FORMAT: &str = "SystemRDL_AST";
const FORMAT_VERSION: &str = "1.0";

/// Serialize an elaborated model to its interchange JSON.
pub fn model_to_json(root: &ElaboratedNode) -> Value {
    json!({
        "format": MODEL_FORMAT,
        "version": FORMAT_VERSION,
        "model": [node_to_json(root, root)],
    })
}

/// Pretty-printed form of [`model_to_json`].
pub fn model_to_json_string(root: &ElaboratedNode) -> String {
    serde_json::to_string_pretty(&model_to_json(root)).unwrap_or_default()
}

fn node_to_json(node: &ElaboratedNode, root: &ElaboratedNode) -> Value {
    let mut obj = Map::new();
    obj.insert("node_type".into(), json!(node.kind.as_str()));
    obj.insert("inst_name".into(), json!(node.inst_name));
    obj.insert(
        "absolute_address".into(),
        json!(format!("{:#x}", node.absolute_address)),
    );
    obj.insert("size".into(), json!(node.size));

    if !node.array_dimensions.is_empty() {
        let dims: Vec<Value> = node
            .array_dimensions
            .iter()
            .map(|d| json!({ "size": d }))
            .collect();
        obj.insert("array_dimensions".into(), Value::Array(dims));
    }

    if !node.properties.is_empty() {
        let mut props = Map::new();
        for (name, value) in &node.properties {
            props.insert(name.clone(), property_to_json(value, root));
        }
        obj.insert("properties".into(), Value::Object(props));
    }

    if !node.children.is_empty() {
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|c| node_to_json(c, root))
            .collect();
        obj.insert("children".into(), Value::Array(children));
    }

    Value::Object(obj)
}

fn property_to_json(value: &PropertyValue, root: &ElaboratedNode) -> Value {
    match value {
        PropertyValue::Int(v) => json!(v),
        PropertyValue::Bool(b) => json!(b),
        PropertyValue::Str(s) => json!(s),
        // Enumerators serialize as the enumerator's name.
        PropertyValue::Enum(e) => json!(e.name),
        // Node references serialize as the dotted instance path.
        PropertyValue::Ref(path) => json!(root
            .path_name(path)
            .unwrap_or_else(|| "<unresolved>".to_string())),
    }
}

/// Serialize a parse tree to the AST interchange JSON. `src` must be the
/// source text the tree was parsed from; rule node text is sliced from it.
pub fn ast_to_json(src: &str, root: &RuleNode) -> Value {
    json!({
        "format": AST_FORMAT,
        "version": FORMAT_VERSION,
        "ast": [rule_to_json(src, root)],
    })
}

/// Pretty-printed form of [`ast_to_json`].
pub fn ast_to_json_string(src: &str, root: &RuleNode) -> String {
    serde_json::to_string_pretty(&ast_to_json(src, root)).unwrap_or_default()
}

fn rule_to_json(src: &str, node: &RuleNode) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), json!("rule"));
    obj.insert("rule_name".into(), json!(node.rule.name()));
    obj.insert("text".into(), json!(node.text(src)));
    obj.insert("start_line".into(), json!(node.start.line));
    obj.insert("start_column".into(), json!(node.start.column));
    obj.insert("stop_line".into(), json!(node.stop.line));
    obj.insert("stop_column".into(), json!(node.stop.column));

    if !node.children.is_empty() {
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|child| match child {
                CstNode::Rule(rule) => rule_to_json(src, rule),
                CstNode::Token(token) => json!({
                    "type": "terminal",
                    "text": token.text,
                    "line": token.line,
                    "column": token.column,
                }),
            })
            .collect();
        obj.insert("children".into(), Value::Array(children));
    }

    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Span;
    use crate::model::ComponentKind;
    use crate::parser::parse;

    #[test]
    fn test_model_shape() {
        let mut root = ElaboratedNode::new(ComponentKind::AddrMap, "top", "", Span::default());
        let mut reg = ElaboratedNode::new(ComponentKind::Reg, "r", "", Span::default());
        reg.absolute_address = 0x100;
        reg.size = 4;
        reg.array_dimensions = vec![3];
        reg.array_stride = vec![4];
        reg.set_property("regwidth", PropertyValue::Int(32));
        root.children.push(reg);
        root.size = 12;

        let v = model_to_json(&root);
        assert_eq!(v["format"], "SystemRDL_ElaboratedModel");
        assert_eq!(v["version"], "1.0");
        let top = &v["model"][0];
        assert_eq!(top["node_type"], "addrmap");
        assert!(top.get("array_dimensions").is_none(), "absent when empty");
        let r = &top["children"][0];
        assert_eq!(r["absolute_address"], "0x100");
        assert_eq!(r["array_dimensions"][0]["size"], 3);
        assert_eq!(r["properties"]["regwidth"], 32);
    }

    #[test]
    fn test_enum_serializes_as_name() {
        let mut f = ElaboratedNode::new(ComponentKind::Field, "f", "", Span::default());
        f.set_property("sw", PropertyValue::enumerator("AccessType", "rw", 1));
        let v = model_to_json(&f);
        assert_eq!(v["model"][0]["properties"]["sw"], "rw");
    }

    #[test]
    fn test_ast_shape() {
        let src = "addrmap m { };";
        let tree = parse(src).unwrap();
        let v = ast_to_json(src, &tree);
        assert_eq!(v["format"], "SystemRDL_AST");
        let root = &v["ast"][0];
        assert_eq!(root["rule_name"], "root");
        assert_eq!(root["text"], src);
        assert_eq!(root["start_line"], 1);
        // First child of the component_def is the named def; its first
        // terminal is the addrmap keyword.
        let def = &root["children"][0];
        assert_eq!(def["rule_name"], "component_def");
        let named = &def["children"][0];
        assert_eq!(named["rule_name"], "component_named_def");
        assert_eq!(named["children"][0]["type"], "terminal");
        assert_eq!(named["children"][0]["text"], "addrmap");
    }

    #[test]
    fn test_json_round_trip_parses() {
        let mut root = ElaboratedNode::new(ComponentKind::AddrMap, "top", "", Span::default());
        root.set_property("desc", PropertyValue::Str("chip \"top\"".to_string()));
        let text = model_to_json_string(&root);
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed["model"][0]["properties"]["desc"], "chip \"top\"");
    }
}
