//! Schema validation helpers.
//!
//! [`validate`] checks a `serde_json::Value` against a [`Schema`]; the
//! `check_*` helpers cover value rules that the schema types cannot express,
//! such as enumerations of allowed strings.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_couchbase::schema::{Attribute, Schema};
//! use hemmer_provider_couchbase::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("ram_quota_mb", Attribute::required_int64());
//!
//! let diagnostics = validate(&schema, &json!({"name": "beer-sample", "ram_quota_mb": 100}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "beer-sample", "ram_quota_mb": "lots"}));
//! assert_eq!(diagnostics[0].attribute, Some("ram_quota_mb".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped
/// - Attribute types must match the schema
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], but returns `Err` with the diagnostics when invalid.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Check that the string at `path` is one of `allowed`.
///
/// Unset values pass; required-ness is enforced by [`validate`].
pub fn check_one_of(
    value: &Value,
    path: &str,
    label: &str,
    allowed: &[&str],
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(actual) = lookup(value, path).and_then(Value::as_str) else {
        return;
    };
    if !allowed.contains(&actual) {
        diagnostics.push(
            Diagnostic::error(format!("{} doesn't exist {}", label, actual))
                .with_detail(format!("{} must be: {}", label, allowed.join(", ")))
                .with_attribute(path),
        );
    }
}

/// Check that the integer at `path` is one of `allowed`.
pub fn check_int_one_of(
    value: &Value,
    path: &str,
    label: &str,
    allowed: &[i64],
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(actual) = lookup(value, path).and_then(Value::as_i64) else {
        return;
    };
    if !allowed.contains(&actual) {
        let allowed: Vec<String> = allowed.iter().map(i64::to_string).collect();
        diagnostics.push(
            Diagnostic::error(format!("{} doesn't exist {}", label, actual))
                .with_detail(format!("{} must be: {}", label, allowed.join(", ")))
                .with_attribute(path),
        );
    }
}

/// Check that the string at `path` is not `forbidden`.
pub fn check_not_equal(
    value: &Value,
    path: &str,
    forbidden: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if lookup(value, path).and_then(Value::as_str) == Some(forbidden) {
        diagnostics.push(
            Diagnostic::error(format!("Value of '{}' can't be \"{}\"", path, forbidden))
                .with_attribute(path),
        );
    }
}

/// Check that the integer at `path` is not negative.
pub fn check_non_negative(value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(actual) = lookup(value, path).and_then(Value::as_i64) {
        if actual < 0 {
            diagnostics.push(
                Diagnostic::error(format!("Value of '{}' must not be negative", path))
                    .with_detail(format!("Got {}", actual))
                    .with_attribute(path),
            );
        }
    }
}

/// Resolve a dotted path (`role.0.scope`) inside a JSON value.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        // Null is valid for optional blocks, but we can't validate further
        Value::Null => return,
        _ => {
            let mut diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            if !path.is_empty() {
                diagnostic = diagnostic.with_attribute(path);
            }
            diagnostics.push(diagnostic);
            return;
        }
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required && attr.default.is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        // Sets are represented as arrays in JSON
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        }
        Some(Value::Array(items)) => {
            let len = items.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        }
        Some(single @ Value::Object(_)) => {
            validate_block(&nested.block, single, path, diagnostics);
        }
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.as_i64().is_some()
                || n.as_f64().is_some_and(|f| {
                    f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
                })
        }
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
