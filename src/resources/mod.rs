//! Resource implementations.
//!
//! Each resource owns its schema and maps JSON state onto calls of the
//! shared [`CouchbaseClient`]. [`CouchbaseProvider`](crate::CouchbaseProvider)
//! dispatches by [`Resource::type_name`].

mod bucket;
mod collection;
mod id;
mod query_index;
mod role;
mod scope;
mod security_group;
mod security_user;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::{ClientResult, CouchbaseClient};
use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use crate::schema::{Diagnostic, Schema};

pub use bucket::BucketResource;
pub use collection::CollectionResource;
pub use query_index::{PrimaryQueryIndexResource, QueryIndexResource};
pub use scope::ScopeResource;
pub use security_group::SecurityGroupResource;
pub use security_user::SecurityUserResource;

/// What every resource operation gets to work with.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    /// Connection opened by `Configure`.
    pub client: Arc<CouchbaseClient>,
    /// Used when waiting for newly created objects to become visible.
    pub retry: RetryPolicy,
}

/// One managed resource type.
///
/// States are JSON objects shaped by [`Resource::schema`].
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name used in configuration, e.g. `couchbase_scope`.
    fn type_name(&self) -> &'static str;

    /// Attributes and blocks of this resource.
    fn schema(&self) -> Schema;

    /// Value checks beyond what the schema expresses.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the object and return its state as read back from the cluster.
    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError>;

    /// `None` when the object no longer exists.
    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError>;

    /// Apply in-place changes. Immutable resources keep the default.
    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (ctx, prior, planned);
        Err(ProviderError::Unimplemented(format!(
            "{} does not support in-place updates",
            self.type_name()
        )))
    }

    /// Delete the object. An object that is already gone is not an error.
    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its import id.
    async fn import(&self, ctx: &ResourceContext, id: &str) -> Result<Option<Value>, ProviderError> {
        self.read(ctx, json!({ "id": id })).await
    }
}

/// Every resource this provider manages.
pub fn all() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(BucketResource),
        Arc::new(ScopeResource),
        Arc::new(CollectionResource),
        Arc::new(PrimaryQueryIndexResource),
        Arc::new(QueryIndexResource),
        Arc::new(SecurityUserResource),
        Arc::new(SecurityGroupResource),
    ]
}

/// Deserialize resource state, treating explicit nulls as unset.
pub(crate) fn from_state<T: DeserializeOwned>(mut state: Value) -> Result<T, ProviderError> {
    strip_nulls(&mut state);
    Ok(serde_json::from_value(state)?)
}

pub(crate) fn to_state<T: Serialize>(value: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(value)?)
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Map a not-found lookup to `None`.
pub(crate) fn found<T>(result: ClientResult<T>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Treat dropping something that is already gone as success.
pub(crate) fn ignore_not_found(result: ClientResult<()>) -> Result<(), ProviderError> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "Already deleted");
            Ok(())
        }
        other => other.map_err(ProviderError::from),
    }
}

/// Retry on not-found while waiting for a created object, fail otherwise.
pub(crate) fn retry_on_not_found<T>(result: ClientResult<T>) -> crate::retry::Attempt<T> {
    use crate::retry::Attempt;
    match result {
        Ok(value) => Attempt::Ready(value),
        Err(e) if e.is_not_found() => Attempt::Retry(e.into()),
        Err(e) => Attempt::Fail(e.into()),
    }
}
