//! [`CouchbaseProvider`]: the [`ProviderService`] implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::CouchbaseClient;
use crate::config::{process_env, provider_schema, EnvLookup, ProviderConfig};
use crate::error::ProviderError;
use crate::plan::plan;
use crate::resources::{self, Resource, ResourceContext};
use crate::retry::RetryPolicy;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// Couchbase provider.
///
/// Holds no connection until `Configure` succeeds. Every resource operation
/// before that fails with `FailedPrecondition`.
pub struct CouchbaseProvider {
    client: RwLock<Option<Arc<CouchbaseClient>>>,
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    retry: RetryPolicy,
    env: EnvLookup,
}

impl Default for CouchbaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CouchbaseProvider {
    /// An unconfigured provider with every resource registered.
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            resources: resources::all()
                .into_iter()
                .map(|resource| (resource.type_name(), resource))
                .collect(),
            retry: RetryPolicy::create(),
            env: process_env(),
        }
    }

    /// Override how long creates wait for objects to become visible.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the environment used for provider attribute fallbacks.
    pub fn with_env_lookup(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Whether `Configure` has succeeded since the last `Stop`.
    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    fn resource(&self, resource_type: &str) -> Result<&Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn context(&self) -> Result<ResourceContext, ProviderError> {
        let client = self.client.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition("provider is not configured".to_string())
        })?;
        Ok(ResourceContext {
            client,
            retry: self.retry,
        })
    }

    /// Resolve the configuration and open a verified connection.
    async fn connect(&self, config: &Value) -> Result<CouchbaseClient, Vec<Diagnostic>> {
        let config = ProviderConfig::resolve(config, &self.env)?;
        let management_url = config.management_url();

        let invalid = |e: &dyn std::fmt::Display| {
            vec![Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())]
        };
        let options = config.client_options().map_err(|e| invalid(&e))?;
        let client = CouchbaseClient::new(options).map_err(|e| invalid(&e))?;

        client.ping().await.map_err(|e| {
            vec![
                Diagnostic::error(format!("cannot connect to couchbase {}", management_url))
                    .with_detail(e.to_string()),
            ]
        })?;
        Ok(client)
    }
}

#[async_trait::async_trait]
impl ProviderService for CouchbaseProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.values().fold(
            ProviderSchema::new().with_provider_config(provider_schema()),
            |schema, resource| schema.with_resource(resource.type_name(), resource.schema()),
        )
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(match ProviderConfig::resolve(&config, &self.env) {
            Ok(_) => Vec::new(),
            Err(diagnostics) => diagnostics,
        })
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        match self.connect(&config).await {
            Ok(client) => {
                info!(url = client.management_url(), "Connected to Couchbase");
                *self.client.write().await = Some(Arc::new(client));
                Ok(Vec::new())
            }
            Err(diagnostics) => {
                warn!(errors = diagnostics.len(), "Provider configuration failed");
                Ok(diagnostics)
            }
        }
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validate(&resource.schema(), &config);
        diagnostics.extend(resource.validate(&config));
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let current = self.resource(resource_type)?.schema().version;
        if version > current as i64 {
            return Err(ProviderError::InvalidRequest(format!(
                "{} state version {} is newer than schema version {}",
                resource_type, version, current
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        Ok(plan(&schema, prior_state.as_ref(), proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await?;
        let mut planned = planned_state;
        resource.schema().apply_defaults(&mut planned);

        info!(resource_type, "Creating resource");
        resource.create(&ctx, planned).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await?;
        match resource.read(&ctx, current_state).await? {
            Some(state) => Ok(state),
            None => {
                info!(resource_type, "Resource no longer exists");
                Ok(Value::Null)
            }
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await?;
        let mut planned = planned_state;
        resource.schema().apply_defaults(&mut planned);

        info!(resource_type, "Updating resource");
        resource.update(&ctx, prior_state, planned).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await?;

        info!(resource_type, "Deleting resource");
        resource.delete(&ctx, current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context().await?;

        info!(resource_type, id, "Importing resource");
        match resource.import(&ctx, id).await? {
            Some(state) => Ok(vec![ImportedResource::new(resource_type, state)]),
            None => Err(ProviderError::NotFound(format!("{} {}", resource_type, id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvLookup;
    use serde_json::json;

    fn no_env() -> EnvLookup {
        Arc::new(|_| None)
    }

    #[test]
    fn test_schema_lists_every_resource() {
        let schema = CouchbaseProvider::new().schema();
        let names: Vec<_> = schema.resources.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "couchbase_bucket_manager",
                "couchbase_collection",
                "couchbase_primary_query_index",
                "couchbase_query_index",
                "couchbase_scope",
                "couchbase_security_group",
                "couchbase_security_user",
            ]
        );
        assert!(schema.provider.block.attributes["password"].flags.sensitive);
        assert!(schema.data_sources.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_precondition() {
        let provider = CouchbaseProvider::new().with_env_lookup(no_env());
        assert!(!provider.is_configured().await);

        let err = provider
            .read("couchbase_scope", json!({"id": "b/s"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let provider = CouchbaseProvider::new();
        let err = provider
            .plan("couchbase_cluster", None, json!({}), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config_combines_checks() {
        let provider = CouchbaseProvider::new();
        let diagnostics = provider
            .validate_resource_config(
                "couchbase_bucket_manager",
                json!({"name": "b", "compression_mode": "zstd"}),
            )
            .await
            .unwrap();

        let summaries: Vec<_> = diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert!(summaries.iter().any(|s| s.contains("ram_quota_mb")));
        assert!(summaries.contains(&"Compression mode doesn't exist zstd"));
    }

    #[tokio::test]
    async fn test_upgrade_rejects_future_versions() {
        let provider = CouchbaseProvider::new();
        let state = json!({"id": "b"});
        assert_eq!(
            provider
                .upgrade_resource_state("couchbase_bucket_manager", 0, state.clone())
                .await
                .unwrap(),
            state
        );
        assert!(provider
            .upgrade_resource_state("couchbase_bucket_manager", 3, state)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_validate_provider_config_reports_missing() {
        let provider = CouchbaseProvider::new().with_env_lookup(no_env());
        let diagnostics = provider
            .validate_provider_config(json!({"address": "127.0.0.1"}))
            .await
            .unwrap();
        assert!(!diagnostics.is_empty());
    }
}
