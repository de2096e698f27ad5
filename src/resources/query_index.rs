//! `couchbase_primary_query_index` and `couchbase_query_index`
//!
//! Both resources are identified by the index id from `system:indexes` and
//! are immutable: every attribute forces replacement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::id;
use super::{found, from_state, to_state, Resource, ResourceContext};
use crate::client::{index_state, QueryIndex, QueryIndexSpec};
use crate::error::ProviderError;
use crate::retry::{retry_until, Attempt};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation::check_non_negative;

/// `couchbase_primary_query_index`.
pub struct PrimaryQueryIndexResource;

/// `couchbase_query_index`.
pub struct QueryIndexResource;

fn default_deferred() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PrimaryIndexState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    num_replica: i64,
    #[serde(default = "default_deferred")]
    deferred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QueryIndexState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    num_replica: i64,
    #[serde(default = "default_deferred")]
    deferred: bool,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    condition: String,
}

fn base_schema(kind: &str) -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description(format!("{} name", kind)),
        )
        .with_attribute(
            "bucket",
            Attribute::required_string()
                .with_force_new()
                .with_description(format!("{} bucket name", kind)),
        )
        .with_attribute(
            "num_replica",
            Attribute::optional_int64()
                .with_default(Value::from(0))
                .with_force_new()
                .with_description(format!("{} number of replica", kind)),
        )
        .with_attribute(
            "deferred",
            Attribute::optional_bool()
                .with_default(Value::Bool(default_deferred()))
                .with_force_new()
                .with_description("Create the index with defer_build; it stays deferred until built"),
        )
}

fn state_id(id: &Option<String>) -> Result<&str, ProviderError> {
    id.as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::InvalidRequest("query index state has no id".to_string()))
}

/// Issue the DDL, then poll `system:indexes` until the index reaches its target state.
async fn create_index(ctx: &ResourceContext, spec: &QueryIndexSpec) -> Result<String, ProviderError> {
    ctx.client.create_query_index(spec).await?;

    let kind = if spec.primary { "primary query index" } else { "query index" };
    let target = index_state(spec.deferred);
    let (bucket, name) = (spec.bucket.as_str(), spec.name.as_str());

    retry_until(ctx.retry, &format!("{} {}", kind, name), || async move {
        match ctx.client.query_index_by_name(bucket, name).await {
            Err(e) => Attempt::Retry(e.into()),
            Ok(index) if index.is_primary != spec.primary || index.name != name => {
                Attempt::Fail(ProviderError::Sdk(format!(
                    "{} doesn't exist index: {} bucket: {}",
                    kind, name, bucket
                )))
            }
            Ok(index) if index.state != target => Attempt::Retry(ProviderError::Sdk(format!(
                "{}: {} bucket: {} creation in progress: {}",
                kind, name, bucket, index.state
            ))),
            Ok(index) => Attempt::Ready(index.id),
        }
    })
    .await
}

/// Look an index up by id and check that it has the expected kind.
async fn read_index(
    ctx: &ResourceContext,
    index_id: &str,
    primary: bool,
) -> Result<Option<QueryIndex>, ProviderError> {
    debug!(index_id, primary, "Reading query index");
    let Some(index) = found(ctx.client.query_index_by_id(index_id).await)? else {
        return Ok(None);
    };
    match (primary, index.is_primary) {
        (true, false) => Err(ProviderError::Sdk(format!(
            "Index is not primary: (index_id={})",
            index_id
        ))),
        (false, true) => Err(ProviderError::Sdk(format!(
            "Index is primary: (index_id={})",
            index_id
        ))),
        _ => Ok(Some(index)),
    }
}

async fn drop_index(ctx: &ResourceContext, bucket: &str, name: &str) -> Result<(), ProviderError> {
    Ok(ctx.client.drop_index(bucket, name, true).await?)
}

fn validate_index(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_non_negative(config, "num_replica", &mut diagnostics);
    diagnostics
}

#[async_trait]
impl Resource for PrimaryQueryIndexResource {
    fn type_name(&self) -> &'static str {
        "couchbase_primary_query_index"
    }

    fn schema(&self) -> Schema {
        base_schema("Primary query index").with_description("Manage primary query indexes in couchbase")
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_index(config)
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: PrimaryIndexState = from_state(planned)?;
        let spec = QueryIndexSpec {
            name: state.name.clone(),
            bucket: state.bucket.clone(),
            fields: Vec::new(),
            condition: String::new(),
            deferred: state.deferred,
            num_replica: state.num_replica,
            primary: true,
        };
        let index_id = create_index(ctx, &spec).await?;
        to_state(&PrimaryIndexState {
            id: Some(index_id),
            ..state
        })
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: PrimaryIndexState = from_state(state)?;
        let index_id = state_id(&state.id)?;
        let Some(index) = read_index(ctx, index_id, true).await? else {
            return Ok(None);
        };
        Ok(Some(to_state(&PrimaryIndexState {
            name: index.name,
            bucket: index.keyspace_id,
            ..state.clone()
        })?))
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: PrimaryIndexState = from_state(state)?;
        drop_index(ctx, &state.bucket, &state.name).await
    }

    async fn import(&self, ctx: &ResourceContext, id: &str) -> Result<Option<Value>, ProviderError> {
        let (index_id, num_replica) = id::index_import_id(id)?;
        self.read(ctx, json!({"id": index_id, "num_replica": num_replica}))
            .await
    }
}

#[async_trait]
impl Resource for QueryIndexResource {
    fn type_name(&self) -> &'static str {
        "couchbase_query_index"
    }

    fn schema(&self) -> Schema {
        base_schema("Query index")
            .with_description("Manage query indexes in couchbase")
            .with_attribute(
                "fields",
                Attribute::required_string_list()
                    .with_force_new()
                    .with_description("Query index fields"),
            )
            .with_attribute(
                "condition",
                Attribute::optional_string()
                    .with_default(Value::from(""))
                    .with_force_new()
                    .with_description("Query index condition"),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validate_index(config);
        if config
            .get("fields")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty)
        {
            diagnostics.push(
                Diagnostic::error("you must specify at least one field to index")
                    .with_attribute("fields"),
            );
        }
        diagnostics
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: QueryIndexState = from_state(planned)?;
        let spec = QueryIndexSpec {
            name: state.name.clone(),
            bucket: state.bucket.clone(),
            fields: state.fields.clone(),
            condition: state.condition.clone(),
            deferred: state.deferred,
            num_replica: state.num_replica,
            primary: false,
        };
        let index_id = create_index(ctx, &spec).await?;
        to_state(&QueryIndexState {
            id: Some(index_id),
            ..state
        })
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: QueryIndexState = from_state(state)?;
        let index_id = state_id(&state.id)?;
        let Some(index) = read_index(ctx, index_id, false).await? else {
            return Ok(None);
        };
        Ok(Some(to_state(&QueryIndexState {
            name: index.name,
            bucket: index.keyspace_id,
            fields: index.index_key,
            condition: index.condition,
            ..state.clone()
        })?))
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: QueryIndexState = from_state(state)?;
        drop_index(ctx, &state.bucket, &state.name).await
    }

    async fn import(&self, ctx: &ResourceContext, id: &str) -> Result<Option<Value>, ProviderError> {
        let (index_id, num_replica) = id::index_import_id(id)?;
        self.read(ctx, json!({"id": index_id, "num_replica": num_replica}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::context_for;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn index_row(primary: bool, state: &str) -> Value {
        let index_key = if primary { json!([]) } else { json!(["`type`"]) };
        json!({
            "id": "a1b2c3",
            "name": "idx_type",
            "keyspace_id": "beer-sample",
            "index_key": index_key,
            "condition": "",
            "is_primary": primary,
            "state": state,
            "using": "gsi"
        })
    }

    fn rows(results: Vec<Value>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"status": "success", "results": results}))
    }

    /// Index lookups report `pending` until the n-th call.
    struct Building {
        calls: Arc<AtomicU32>,
        ready_after: u32,
        primary: bool,
    }

    impl Respond for Building {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let state = if n >= self.ready_after { "online" } else { "pending" };
            rows(vec![index_row(self.primary, state)])
        }
    }

    async fn mount_ddl(server: &MockServer, statement: &str) {
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains(statement))
            .respond_with(rows(vec![]))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_secondary_waits_until_online() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        mount_ddl(&server, "CREATE+INDEX").await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains("keyspace_id"))
            .respond_with(Building {
                calls: calls.clone(),
                ready_after: 2,
                primary: false,
            })
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let state = QueryIndexResource
            .create(
                &ctx,
                json!({
                    "name": "idx_type",
                    "bucket": "beer-sample",
                    "fields": ["`type`"],
                    "deferred": false
                }),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "a1b2c3");
        assert_eq!(state["num_replica"], 0);
        assert_eq!(state["condition"], "");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_primary_rejects_secondary_index() {
        let server = MockServer::start().await;
        mount_ddl(&server, "CREATE+PRIMARY+INDEX").await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains("keyspace_id"))
            .respond_with(rows(vec![index_row(false, "deferred")]))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let err = PrimaryQueryIndexResource
            .create(&ctx, json!({"name": "idx_type", "bucket": "beer-sample"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "primary query index doesn't exist index: idx_type bucket: beer-sample"
        );
    }

    #[tokio::test]
    async fn test_read_rejects_wrong_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .respond_with(rows(vec![index_row(true, "online")]))
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let err = QueryIndexResource
            .read(&ctx, json!({"id": "a1b2c3", "name": "idx_type", "bucket": "beer-sample"}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Index is primary: (index_id=a1b2c3)");

        let state = PrimaryQueryIndexResource
            .read(&ctx, json!({"id": "a1b2c3"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["name"], "idx_type");
        assert_eq!(state["deferred"], true);
    }

    #[tokio::test]
    async fn test_import_sets_num_replica() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .respond_with(rows(vec![index_row(false, "deferred")]))
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let state = QueryIndexResource
            .import(&ctx, "a1b2c3,2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["id"], "a1b2c3");
        assert_eq!(state["num_replica"], 2);
        assert_eq!(state["fields"], json!(["`type`"]));

        let err = QueryIndexResource.import(&ctx, "a1b2c3").await.unwrap_err();
        assert_eq!(err.message(), "cannot parse id during import id: a1b2c3");
    }

    #[tokio::test]
    async fn test_read_gone_and_delete_gone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains("DROP+INDEX"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "status": "errors",
                "errors": [{"code": 12004, "msg": "GSI index idx_type not found."}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains("system%3Aindexes"))
            .respond_with(rows(vec![]))
            .mount(&server)
            .await;

        let ctx = context_for(&server);
        let state = json!({"id": "a1b2c3", "name": "idx_type", "bucket": "beer-sample"});
        assert!(PrimaryQueryIndexResource
            .read(&ctx, state.clone())
            .await
            .unwrap()
            .is_none());
        PrimaryQueryIndexResource.delete(&ctx, state).await.unwrap();
    }

    #[test]
    fn test_validate_empty_fields() {
        let diagnostics = QueryIndexResource.validate(&json!({
            "name": "idx", "bucket": "b", "fields": [], "num_replica": -1
        }));
        let attributes: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert_eq!(attributes, vec!["num_replica", "fields"]);
    }
}
