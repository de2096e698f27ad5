//! Schema-driven planning shared by every resource.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, BlockNestingMode, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Diff `proposed` against `prior` using `schema`.
///
/// A Null `proposed` plans a delete. Otherwise defaults are filled in and
/// computed attributes the configuration leaves unset keep their prior
/// values, unless a `force_new` change makes the plan a replacement.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        return match prior {
            Some(prior) => plan_delete(prior),
            None => PlanResult::no_change(Value::Null),
        };
    }

    let mut planned = proposed;
    schema.apply_defaults(&mut planned);

    let Some(prior) = prior else {
        let changes = diff_state(schema, None, &planned);
        return PlanResult::with_changes(planned, changes, false);
    };

    let mut carried = planned.clone();
    if let Value::Object(obj) = &mut carried {
        carry_computed(schema, prior, obj);
    }
    if !requires_replace(schema, prior, &carried) {
        let changes = diff_state(schema, Some(prior), &carried);
        return PlanResult::with_changes(carried, changes, false);
    }

    // A replacement gets fresh computed values from create.
    let changes = diff_state(schema, Some(prior), &planned);
    PlanResult::with_changes(planned, changes, true)
}

fn requires_replace(schema: &Schema, prior: &Value, planned: &Value) -> bool {
    let attributes = schema
        .block
        .attributes
        .iter()
        .filter(|(_, attr)| attr.force_new)
        .any(|(name, attr)| {
            let unordered = matches!(attr.attr_type, AttributeType::Set(_));
            diff(name, present(Some(prior), name), present(Some(planned), name), unordered).is_some()
        });
    let blocks = schema
        .block
        .blocks
        .iter()
        .filter(|(_, nested)| nested.force_new)
        .any(|(name, nested)| {
            let unordered = nested.nesting_mode == BlockNestingMode::Set;
            diff(name, present(Some(prior), name), present(Some(planned), name), unordered).is_some()
        });
    attributes || blocks
}

fn diff_state(schema: &Schema, prior: Option<&Value>, planned: &Value) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    for (name, attr) in &schema.block.attributes {
        let unordered = matches!(attr.attr_type, AttributeType::Set(_));
        changes.extend(diff(name, present(prior, name), present(Some(planned), name), unordered));
    }
    for (name, nested) in &schema.block.blocks {
        let unordered = nested.nesting_mode == BlockNestingMode::Set;
        changes.extend(diff(name, present(prior, name), present(Some(planned), name), unordered));
    }
    changes
}

fn plan_delete(prior: &Value) -> PlanResult {
    let changes = match prior {
        Value::Object(obj) => obj
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
            .collect(),
        other => vec![AttributeChange::removed("", other.clone())],
    };
    PlanResult::with_changes(Value::Null, changes, false)
}

fn carry_computed(schema: &Schema, prior: &Value, planned: &mut Map<String, Value>) {
    for (name, attr) in &schema.block.attributes {
        if !attr.flags.computed {
            continue;
        }
        let Some(prior_value) = prior.get(name).filter(|v| !v.is_null()) else {
            continue;
        };
        let entry = planned.entry(name.clone()).or_insert(Value::Null);
        if entry.is_null() {
            *entry = prior_value.clone();
        }
    }
}

/// The value of `name`, treating null, "" and empty collections as unset.
fn present<'a>(state: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    state?.get(name).filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn diff(
    name: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    unordered: bool,
) -> Option<AttributeChange> {
    match (before, after) {
        (None, None) => None,
        (None, Some(after)) => Some(AttributeChange::added(name, after.clone())),
        (Some(before), None) => Some(AttributeChange::removed(name, before.clone())),
        (Some(before), Some(after)) => {
            let same = if unordered {
                sorted_items(before) == sorted_items(after)
            } else {
                before == after
            };
            (!same).then(|| AttributeChange::modified(name, before.clone(), after.clone()))
        }
    }
}

/// Canonical form of a collection for order-insensitive comparison.
fn sorted_items(value: &Value) -> Vec<String> {
    let mut items: Vec<String> = match value {
        Value::Array(items) => items.iter().map(Value::to_string).collect(),
        other => vec![other.to_string()],
    };
    items.sort();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock};
    use serde_json::json;

    fn scope_like() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("bucket", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "max_expiry",
                Attribute::optional_int64().with_default(json!(10)),
            )
            .with_block(
                "role",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("bucket", Attribute::required_string()),
                ),
            )
    }

    #[test]
    fn test_plan_create_fills_defaults() {
        let result = plan(&scope_like(), None, json!({"bucket": "b", "name": "s"}));

        assert!(!result.requires_replace);
        assert_eq!(result.planned_state["max_expiry"], 10);
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["bucket", "max_expiry", "name"]);
        assert!(result.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_plan_no_change_keeps_id() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s", "max_expiry": 10});
        let result = plan(&scope_like(), Some(&prior), json!({"bucket": "b", "name": "s"}));

        assert!(!result.has_changes());
        assert_eq!(result.planned_state["id"], "b/s");
    }

    #[test]
    fn test_plan_force_new_change_replaces() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s"});
        let result = plan(&scope_like(), Some(&prior), json!({"bucket": "b", "name": "t"}));

        assert!(result.requires_replace);
        let change = result.changes.iter().find(|c| c.path == "name").unwrap();
        assert_eq!(change.before, Some(json!("s")));
        assert_eq!(change.after, Some(json!("t")));
    }

    #[test]
    fn test_plan_replacement_drops_computed_values() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s", "max_expiry": 10});
        let result = plan(&scope_like(), Some(&prior), json!({"bucket": "b", "name": "t"}));

        assert!(result.requires_replace);
        assert!(result.planned_state["id"].is_null());
        let id = result.changes.iter().find(|c| c.path == "id").unwrap();
        assert_eq!(id.before, Some(json!("b/s")));
        assert!(id.after.is_none());
    }

    #[test]
    fn test_plan_in_place_change() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s", "max_expiry": 10});
        let result = plan(
            &scope_like(),
            Some(&prior),
            json!({"bucket": "b", "name": "s", "description": "new"}),
        );

        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "description");
    }

    #[test]
    fn test_plan_set_block_order_ignored() {
        let roles = |a: &str, b: &str| {
            json!([{"name": a, "bucket": "*"}, {"name": b, "bucket": "*"}])
        };
        let prior = json!({"id": "x", "bucket": "b", "name": "s", "max_expiry": 10,
                           "role": roles("ro_admin", "bucket_admin")});
        let result = plan(
            &scope_like(),
            Some(&prior),
            json!({"bucket": "b", "name": "s", "role": roles("bucket_admin", "ro_admin")}),
        );
        assert!(!result.has_changes());
    }

    #[test]
    fn test_plan_empty_values_match_unset() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s", "max_expiry": 10,
                           "description": "", "role": []});
        let result = plan(&scope_like(), Some(&prior), json!({"bucket": "b", "name": "s"}));
        assert!(!result.has_changes());
    }

    #[test]
    fn test_plan_delete_reports_removals() {
        let prior = json!({"id": "b/s", "bucket": "b", "name": "s", "description": null});
        let result = plan(&scope_like(), Some(&prior), Value::Null);

        assert!(result.planned_state.is_null());
        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 3);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_plan_nothing_to_nothing() {
        let result = plan(&scope_like(), None, Value::Null);
        assert!(!result.has_changes());
        assert!(result.planned_state.is_null());
    }
}
