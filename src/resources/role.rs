//! The `role` block shared by users and groups.

use serde_json::Value;

use crate::client::Role;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock};
use crate::validation::check_not_equal;

pub(crate) const ROLE_BLOCK: &str = "role";

pub(crate) fn role_block() -> NestedBlock {
    NestedBlock::set(
        Block::new()
            .with_description("RBAC role, optionally limited to a bucket, scope and collection")
            .with_attribute("name", Attribute::required_string())
            .with_attribute("bucket", Attribute::required_string())
            .with_attribute(
                "scope",
                Attribute::optional_string().with_default(Value::from("")),
            )
            .with_attribute(
                "collection",
                Attribute::optional_string().with_default(Value::from("")),
            ),
    )
}

/// Wildcards are only allowed on the bucket.
pub(crate) fn validate_roles(config: &Value, diagnostics: &mut Vec<Diagnostic>) {
    let count = config
        .get(ROLE_BLOCK)
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    for i in 0..count {
        for field in ["scope", "collection"] {
            check_not_equal(config, &format!("{}.{}.{}", ROLE_BLOCK, i, field), "*", diagnostics);
        }
    }
}

/// Roles in a stable order for state.
pub(crate) fn sorted(mut roles: Vec<Role>) -> Vec<Role> {
    roles.sort();
    roles.dedup();
    roles
}
