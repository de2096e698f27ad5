//! `couchbase_security_user`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::role::{role_block, sorted, validate_roles, ROLE_BLOCK};
use super::{found, from_state, ignore_not_found, to_state, Resource, ResourceContext};
use crate::client::{Role, User};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

/// `couchbase_security_user`.
pub struct SecurityUserResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct UserState {
    id: Option<String>,
    username: String,
    display_name: String,
    /// Kept from configuration; the cluster never returns it.
    password: Option<String>,
    role: Vec<Role>,
    groups: Vec<String>,
}

impl UserState {
    fn username(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.username,
        }
    }

    fn to_user(&self) -> User {
        User {
            username: self.username().to_string(),
            display_name: self.display_name.clone(),
            password: self.password.clone(),
            roles: self.role.clone(),
            groups: self.groups.clone(),
        }
    }
}

impl SecurityUserResource {
    async fn read_user(
        ctx: &ResourceContext,
        state: &UserState,
    ) -> Result<Option<Value>, ProviderError> {
        let username = state.username();
        debug!(username, "Reading user");
        let Some(user) = found(ctx.client.get_user(username).await)? else {
            return Ok(None);
        };
        Ok(Some(to_state(&UserState {
            id: Some(user.username.clone()),
            username: user.username,
            display_name: user.display_name,
            password: state.password.clone(),
            role: sorted(user.roles),
            groups: user.groups,
        })?))
    }

    async fn upsert(ctx: &ResourceContext, state: &UserState) -> Result<Value, ProviderError> {
        ctx.client.upsert_user(&state.to_user()).await?;
        Self::read_user(ctx, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", state.username())))
    }
}

#[async_trait]
impl Resource for SecurityUserResource {
    fn type_name(&self) -> &'static str {
        "couchbase_security_user"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manage users in couchbase")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "username",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("User name"),
            )
            .with_attribute(
                "display_name",
                Attribute::optional_string().with_description("Full user name"),
            )
            .with_attribute(
                "password",
                Attribute::required_string()
                    .sensitive()
                    .with_description("Password"),
            )
            .with_attribute(
                "groups",
                Attribute::optional_string_list().with_description("Assigned groups"),
            )
            .with_block(ROLE_BLOCK, role_block())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        validate_roles(config, &mut diagnostics);
        diagnostics
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let mut state: UserState = from_state(planned)?;
        state.id = Some(state.username.clone());
        Self::upsert(ctx, &state).await
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: UserState = from_state(state)?;
        Self::read_user(ctx, &state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: UserState = from_state(prior)?;
        let mut planned: UserState = from_state(planned)?;
        planned.id = Some(prior.username().to_string());
        Self::upsert(ctx, &planned).await
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: UserState = from_state(state)?;
        ignore_not_found(ctx.client.drop_user(state.username()).await)
    }
}
