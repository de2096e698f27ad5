//! `couchbase_security_group`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::role::{role_block, sorted, validate_roles, ROLE_BLOCK};
use super::{found, from_state, ignore_not_found, to_state, Resource, ResourceContext};
use crate::client::{Group, Role};
use crate::error::ProviderError;
use crate::retry::{retry_until, Attempt};
use crate::schema::{Attribute, Diagnostic, Schema};

/// `couchbase_security_group`.
pub struct SecurityGroupResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct GroupState {
    id: Option<String>,
    name: String,
    description: String,
    role: Vec<Role>,
    ldap_reference: String,
}

impl GroupState {
    fn group_name(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.name,
        }
    }

    fn to_group(&self) -> Group {
        Group {
            name: self.name.clone(),
            description: self.description.clone(),
            roles: self.role.clone(),
            ldap_group_reference: self.ldap_reference.clone(),
        }
    }

    fn from_group(group: Group) -> Self {
        Self {
            id: Some(group.name.clone()),
            name: group.name,
            description: group.description,
            role: sorted(group.roles),
            ldap_reference: group.ldap_group_reference,
        }
    }
}

#[async_trait]
impl Resource for SecurityGroupResource {
    fn type_name(&self) -> &'static str {
        "couchbase_security_group"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manage groups in couchbase")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Group name"),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_description("Group description"),
            )
            .with_attribute(
                "ldap_reference",
                Attribute::optional_string().with_description("Group ldap reference"),
            )
            .with_block(ROLE_BLOCK, role_block())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        validate_roles(config, &mut diagnostics);
        diagnostics
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: GroupState = from_state(planned)?;
        let group = state.to_group();
        ctx.client.upsert_group(&group).await?;

        let name = group.name.as_str();
        let created = retry_until(ctx.retry, &format!("group {}", name), || async move {
            match ctx.client.get_group(name).await {
                Ok(group) => Attempt::Ready(group),
                Err(e) if e.is_not_found() => Attempt::Retry(e.into()),
                Err(e) => Attempt::Fail(ProviderError::Sdk(format!(
                    "can't create security group: {} error: {}",
                    name, e
                ))),
            }
        })
        .await?;

        to_state(&GroupState::from_group(created))
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: GroupState = from_state(state)?;
        debug!(group = state.group_name(), "Reading group");
        match found(ctx.client.get_group(state.group_name()).await)? {
            Some(group) => Ok(Some(to_state(&GroupState::from_group(group))?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: GroupState = from_state(prior)?;
        let mut planned: GroupState = from_state(planned)?;
        planned.name = prior.group_name().to_string();

        let group = planned.to_group();
        ctx.client.upsert_group(&group).await?;
        match found(ctx.client.get_group(&group.name).await)? {
            Some(group) => to_state(&GroupState::from_group(group)),
            None => Err(ProviderError::NotFound(format!("group {}", group.name))),
        }
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: GroupState = from_state(state)?;
        ignore_not_found(ctx.client.drop_group(state.group_name()).await)
    }
}
