//! `couchbase_collection`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::id;
use super::{found, from_state, ignore_not_found, to_state, Resource, ResourceContext};
use crate::client::{ClientError, CreateCollectionSettings, StorageBackend};
use crate::error::ProviderError;
use crate::retry::{retry_until, Attempt};
use crate::schema::{Attribute, Schema};

/// `couchbase_collection`.
pub struct CollectionResource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct CollectionState {
    id: Option<String>,
    bucket: String,
    scope: String,
    name: String,
    max_expiry: i64,
    history: bool,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            id: None,
            bucket: String::new(),
            scope: String::new(),
            name: String::new(),
            max_expiry: 10,
            history: false,
        }
    }
}

impl CollectionState {
    fn id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => id::join(&[
                self.bucket.as_str(),
                self.scope.as_str(),
                self.name.as_str(),
            ]),
        }
    }
}

#[async_trait]
impl Resource for CollectionResource {
    fn type_name(&self) -> &'static str {
        "couchbase_collection"
    }

    fn schema(&self) -> Schema {
        let defaults = CollectionState::default();
        Schema::v0()
            .with_description("Manage collections in couchbase")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "bucket",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Bucket name"),
            )
            .with_attribute(
                "scope",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Scope name"),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Collection name"),
            )
            .with_attribute(
                "max_expiry",
                Attribute::optional_int64()
                    .with_default(Value::from(defaults.max_expiry))
                    .with_force_new()
                    .with_description("Max expiry in seconds"),
            )
            .with_attribute(
                "history",
                Attribute::optional_bool()
                    .with_default(Value::Bool(defaults.history))
                    .with_force_new()
                    .with_description(
                        "Collection history enable/disable. Bucket must have \"magma\" storage mode",
                    ),
            )
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: CollectionState = from_state(planned)?;
        let (bucket, scope, name) = (
            state.bucket.as_str(),
            state.scope.as_str(),
            state.name.as_str(),
        );

        let storage_backend = ctx.client.get_bucket(bucket).await?.storage_backend;
        let settings = CreateCollectionSettings {
            max_expiry: state.max_expiry,
            history: (storage_backend == Some(StorageBackend::Magma)).then_some(state.history),
        };
        ctx.client
            .create_collection(bucket, scope, name, &settings)
            .await?;

        retry_until(ctx.retry, &format!("collection {}", name), || async move {
            match ctx.client.find_collection(bucket, scope, name).await {
                Ok(_) => Attempt::Ready(()),
                Err(e @ (ClientError::ScopeNotFound(_) | ClientError::CollectionNotFound(_))) => {
                    Attempt::Retry(e.into())
                }
                Err(e) => Attempt::Fail(ProviderError::Sdk(format!(
                    "can't create collection: {} error: {}",
                    name, e
                ))),
            }
        })
        .await?;

        to_state(&CollectionState {
            id: Some(id::join(&[bucket, scope, name])),
            ..state.clone()
        })
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: CollectionState = from_state(state)?;
        let resource_id = state.id();
        let (bucket, scope, name) = id::collection_id(&resource_id)?;
        debug!(bucket, scope, collection = name, "Reading collection");

        let Some(spec) = found(ctx.client.find_collection(bucket, scope, name).await)? else {
            return Ok(None);
        };
        Ok(Some(to_state(&CollectionState {
            id: Some(resource_id.clone()),
            bucket: bucket.to_string(),
            scope: scope.to_string(),
            name: spec.name,
            max_expiry: spec.max_expiry,
            history: spec.history.unwrap_or(state.history),
        })?))
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: CollectionState = from_state(state)?;
        let resource_id = state.id();
        let (bucket, scope, name) = id::collection_id(&resource_id)?;
        ignore_not_found(ctx.client.drop_collection(bucket, scope, name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::context_for;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COLLECTIONS: &str = "/pools/default/buckets/travel-sample/scopes/inventory/collections";

    async fn mount_bucket(server: &MockServer, storage_backend: &str) {
        Mock::given(method("GET"))
            .and(path("/pools/default/buckets/travel-sample"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "travel-sample",
                "bucketType": "membase",
                "storageBackend": storage_backend
            })))
            .mount(server)
            .await;
    }

    async fn mount_scopes(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/pools/default/buckets/travel-sample/scopes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "scopes": [{
                    "name": "inventory",
                    "collections": [{"name": "airline", "maxTTL": 10, "history": true}]
                }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_sends_history_for_magma() {
        let server = MockServer::start().await;
        mount_bucket(&server, "magma").await;
        mount_scopes(&server).await;
        Mock::given(method("POST"))
            .and(path(COLLECTIONS))
            .and(body_string_contains("history=true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let state = CollectionResource
            .create(
                &ctx,
                json!({"bucket": "travel-sample", "scope": "inventory", "name": "airline", "history": true}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "travel-sample/inventory/airline");
        assert_eq!(state["max_expiry"], 10);
    }

    #[tokio::test]
    async fn test_create_omits_history_for_couchstore() {
        let server = MockServer::start().await;
        mount_bucket(&server, "couchstore").await;
        mount_scopes(&server).await;
        Mock::given(method("POST"))
            .and(path(COLLECTIONS))
            .and(body_string_contains("history"))
            .respond_with(ResponseTemplate::new(400))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COLLECTIONS))
            .and(body_string_contains("maxTTL=10"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        CollectionResource
            .create(
                &ctx,
                json!({"bucket": "travel-sample", "scope": "inventory", "name": "airline"}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_collection() {
        let server = MockServer::start().await;
        mount_scopes(&server).await;

        let ctx = context_for(&server);
        let state = CollectionResource
            .read(&ctx, json!({"id": "travel-sample/inventory/hotel"}))
            .await
            .unwrap();
        assert!(state.is_none());

        let state = CollectionResource
            .read(&ctx, json!({"id": "travel-sample/tenants/airline"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_malformed_id() {
        let server = MockServer::start().await;
        let ctx = context_for(&server);
        let err = CollectionResource
            .delete(&ctx, json!({"id": "travel-sample/inventory"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed ID for collection"));
    }
}
