//! Variable expansion over a parsed YAML tree.
//!
//! Every string scalar anywhere in the tree has its `${name}` references
//! replaced from the configuration's `variables` mapping. Traversal recurses
//! through mappings and sequences; non-string scalars pass through untouched.
//! Replacement text is never re-expanded, so a literal `${x}` inside a
//! variable's value survives verbatim.

use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::errors::ValidationError;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder regex is valid"))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Expand all `${name}` references in one string, left to right, in a single
/// pass. Fails with `VariableNotDefined` on the first dangling reference.
fn expand_string(
    input: &str,
    variables: &BTreeMap<String, Value>,
    path: &str,
) -> Result<String, ValidationError> {
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;
    for caps in placeholder_re().captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = variables
            .get(name)
            .ok_or_else(|| ValidationError::VariableNotDefined {
                name: name.to_string(),
                path: path.to_string(),
            })?;
        result.push_str(&input[last_end..whole.start()]);
        result.push_str(&scalar_to_string(value));
        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);
    Ok(result)
}

fn expand_value(
    value: &Value,
    variables: &BTreeMap<String, Value>,
    path: &str,
) -> Result<Value, ValidationError> {
    match value {
        Value::String(s) => Ok(Value::String(expand_string(s, variables, path)?)),
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(expand_value(item, variables, &format!("{path}[{i}]"))?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, item) in map {
                let child_path = match key.as_str() {
                    Some(k) if path.is_empty() => k.to_string(),
                    Some(k) => format!("{path}.{k}"),
                    None => path.to_string(),
                };
                out.insert(key.clone(), expand_value(item, variables, &child_path)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

/// Rewrite an entire parsed YAML tree against the variables mapping.
///
/// The output is structurally identical to the input; only string scalars
/// change. A dangling reference fails the whole expansion even if the
/// containing string is never used downstream.
pub fn expand_tree(
    tree: &Value,
    variables: &BTreeMap<String, Value>,
) -> Result<Value, ValidationError> {
    expand_value(tree, variables, "")
}
