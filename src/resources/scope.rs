//! `couchbase_scope`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::id;
use super::{found, from_state, ignore_not_found, to_state, Resource, ResourceContext};
use crate::client::ClientError;
use crate::error::ProviderError;
use crate::retry::{retry_until, Attempt};
use crate::schema::{Attribute, Schema};

/// `couchbase_scope`.
pub struct ScopeResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ScopeState {
    id: Option<String>,
    bucket: String,
    name: String,
}

impl ScopeState {
    fn id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => id::join(&[self.bucket.as_str(), self.name.as_str()]),
        }
    }
}

#[async_trait]
impl Resource for ScopeResource {
    fn type_name(&self) -> &'static str {
        "couchbase_scope"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manage scopes in couchbase")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "bucket",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Bucket name"),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Scope name"),
            )
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: ScopeState = from_state(planned)?;
        let (bucket, scope) = (state.bucket.as_str(), state.name.as_str());

        ctx.client.create_scope(bucket, scope).await?;

        retry_until(ctx.retry, &format!("scope {}", scope), || async move {
            match ctx.client.find_scope(bucket, scope).await {
                Ok(_) => Attempt::Ready(()),
                Err(e @ ClientError::ScopeNotFound(_)) => Attempt::Retry(e.into()),
                Err(e) => Attempt::Fail(ProviderError::Sdk(format!(
                    "can't create scope: {} error: {}",
                    scope, e
                ))),
            }
        })
        .await?;

        to_state(&ScopeState {
            id: Some(id::join(&[bucket, scope])),
            ..state.clone()
        })
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: ScopeState = from_state(state)?;
        let resource_id = state.id();
        let (bucket, scope) = id::scope_id(&resource_id)?;
        debug!(bucket, scope, "Reading scope");

        let Some(found_scope) = found(ctx.client.find_scope(bucket, scope).await)? else {
            return Ok(None);
        };
        Ok(Some(to_state(&ScopeState {
            id: Some(resource_id.clone()),
            bucket: bucket.to_string(),
            name: found_scope.name,
        })?))
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: ScopeState = from_state(state)?;
        let resource_id = state.id();
        let (bucket, scope) = id::scope_id(&resource_id)?;
        ignore_not_found(ctx.client.drop_scope(bucket, scope).await)
    }
}
