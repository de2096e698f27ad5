//! `couchbase_bucket_manager`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{found, from_state, ignore_not_found, retry_on_not_found, to_state, Resource, ResourceContext};
use crate::client::{
    BucketInfo, BucketSettings, BucketType, CompressionMode, ConflictResolutionType,
    DurabilityLevel, EvictionPolicy, StorageBackend,
};
use crate::error::ProviderError;
use crate::retry::retry_until;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation::{check_int_one_of, check_non_negative, check_one_of};

/// `couchbase_bucket_manager`.
pub struct BucketResource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct BucketState {
    id: Option<String>,
    name: String,
    flush_enabled: bool,
    ram_quota_mb: i64,
    replica_index_disable: bool,
    max_expire: i64,
    num_replicas: i64,
    bucket_type: BucketType,
    eviction_policy_type: EvictionPolicy,
    compression_mode: CompressionMode,
    conflict_resolution_type: ConflictResolutionType,
    durability_level: i64,
    storage_backend: StorageBackend,
}

impl Default for BucketState {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            flush_enabled: true,
            ram_quota_mb: 0,
            replica_index_disable: true,
            max_expire: 10,
            num_replicas: 1,
            bucket_type: BucketType::Couchbase,
            eviction_policy_type: EvictionPolicy::ValueOnly,
            compression_mode: CompressionMode::Off,
            conflict_resolution_type: ConflictResolutionType::SequenceNumber,
            durability_level: DurabilityLevel::None.code(),
            storage_backend: StorageBackend::Couchstore,
        }
    }
}

fn non_negative<T: TryFrom<i64>>(value: i64, attribute: &str) -> Result<T, ProviderError> {
    T::try_from(value).map_err(|_| {
        ProviderError::Validation(format!("{} is out of range: {}", attribute, value))
    })
}

impl BucketState {
    /// The bucket this state refers to; imports only carry the id.
    fn bucket_name(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.name,
        }
    }

    fn to_settings(&self) -> Result<BucketSettings, ProviderError> {
        let durability_level = DurabilityLevel::from_code(self.durability_level).ok_or_else(|| {
            ProviderError::Validation(format!(
                "Durability level doesn't exist {}",
                self.durability_level
            ))
        })?;

        Ok(BucketSettings {
            name: self.name.clone(),
            bucket_type: self.bucket_type,
            ram_quota_mb: non_negative(self.ram_quota_mb, "ram_quota_mb")?,
            flush_enabled: self.flush_enabled,
            replica_index_disabled: self.replica_index_disable,
            num_replicas: non_negative(self.num_replicas, "num_replicas")?,
            max_expiry: non_negative(self.max_expire, "max_expire")?,
            eviction_policy: self.eviction_policy_type,
            compression_mode: self.compression_mode,
            conflict_resolution_type: self.conflict_resolution_type,
            durability_level,
            storage_backend: self.storage_backend,
        })
    }

    fn from_info(info: BucketInfo) -> Self {
        let settings = info.into_settings();
        Self {
            id: Some(settings.name.clone()),
            flush_enabled: settings.flush_enabled,
            ram_quota_mb: settings.ram_quota_mb as i64,
            replica_index_disable: settings.replica_index_disabled,
            max_expire: settings.max_expiry as i64,
            num_replicas: i64::from(settings.num_replicas),
            bucket_type: settings.bucket_type,
            eviction_policy_type: settings.eviction_policy,
            compression_mode: settings.compression_mode,
            conflict_resolution_type: settings.conflict_resolution_type,
            durability_level: settings.durability_level.code(),
            storage_backend: settings.storage_backend,
            name: settings.name,
        }
    }
}

impl BucketResource {
    async fn read_bucket(ctx: &ResourceContext, name: &str) -> Result<Option<Value>, ProviderError> {
        debug!(bucket = name, "Reading bucket");
        match found(ctx.client.get_bucket(name).await)? {
            Some(info) => Ok(Some(to_state(&BucketState::from_info(info))?)),
            None => Ok(None),
        }
    }

    async fn read_existing(ctx: &ResourceContext, name: &str) -> Result<Value, ProviderError> {
        Self::read_bucket(ctx, name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("bucket {}", name)))
    }
}

#[async_trait]
impl Resource for BucketResource {
    fn type_name(&self) -> &'static str {
        "couchbase_bucket_manager"
    }

    fn schema(&self) -> Schema {
        let defaults = BucketState::default();
        Schema::v0()
            .with_description("Manage buckets in couchbase")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Bucket name"),
            )
            .with_attribute(
                "flush_enabled",
                Attribute::optional_bool()
                    .with_default(Value::Bool(defaults.flush_enabled))
                    .with_description("Bucket flush enable/disable"),
            )
            .with_attribute(
                "ram_quota_mb",
                Attribute::required_int64().with_description("Ram quota for bucket"),
            )
            .with_attribute(
                "replica_index_disable",
                Attribute::optional_bool()
                    .with_default(Value::Bool(defaults.replica_index_disable))
                    .with_force_new()
                    .with_description("Bucket index replicas"),
            )
            .with_attribute(
                "max_expire",
                Attribute::optional_int64()
                    .with_default(Value::from(defaults.max_expire))
                    .with_description("Max expiry in seconds"),
            )
            .with_attribute(
                "num_replicas",
                Attribute::optional_int64()
                    .with_default(Value::from(defaults.num_replicas))
                    .with_description("Number of bucket replicas"),
            )
            .with_attribute(
                "bucket_type",
                Attribute::optional_string()
                    .with_default(Value::from(defaults.bucket_type.as_str()))
                    .with_force_new()
                    .with_description(format!(
                        "Bucket type: {}",
                        BucketType::allowed_values().join(", ")
                    )),
            )
            .with_attribute(
                "eviction_policy_type",
                Attribute::optional_string()
                    .with_default(Value::from(defaults.eviction_policy_type.as_str()))
                    .with_description(format!(
                        "Eviction policy type: {}",
                        EvictionPolicy::allowed_values().join(", ")
                    )),
            )
            .with_attribute(
                "compression_mode",
                Attribute::optional_string()
                    .with_default(Value::from(defaults.compression_mode.as_str()))
                    .with_description(format!(
                        "Compression mode: {}",
                        CompressionMode::allowed_values().join(", ")
                    )),
            )
            .with_attribute(
                "conflict_resolution_type",
                Attribute::optional_string()
                    .with_default(Value::from(defaults.conflict_resolution_type.as_str()))
                    .with_force_new()
                    .with_description(format!(
                        "Conflict resolution type: {}",
                        ConflictResolutionType::allowed_values().join(", ")
                    )),
            )
            .with_attribute(
                "durability_level",
                Attribute::optional_int64()
                    .with_default(Value::from(defaults.durability_level))
                    .with_description(
                        "Durability level: 1 none, 2 majority, 3 majorityAndPersistActive, 4 persistToMajority",
                    ),
            )
            .with_attribute(
                "storage_backend",
                Attribute::optional_string()
                    .with_default(Value::from(defaults.storage_backend.as_str()))
                    .with_force_new()
                    .with_description(format!(
                        "Storage backend: {}",
                        StorageBackend::allowed_values().join(", ")
                    )),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        check_one_of(config, "bucket_type", "Bucket type", &BucketType::allowed_values(), &mut diagnostics);
        check_one_of(
            config,
            "eviction_policy_type",
            "Eviction policy type",
            &EvictionPolicy::allowed_values(),
            &mut diagnostics,
        );
        check_one_of(
            config,
            "compression_mode",
            "Compression mode",
            &CompressionMode::allowed_values(),
            &mut diagnostics,
        );
        check_one_of(
            config,
            "conflict_resolution_type",
            "Conflict resolution type",
            &ConflictResolutionType::allowed_values(),
            &mut diagnostics,
        );
        check_one_of(
            config,
            "storage_backend",
            "Storage backend",
            &StorageBackend::allowed_values(),
            &mut diagnostics,
        );
        check_int_one_of(
            config,
            "durability_level",
            "Durability level",
            &DurabilityLevel::CODES,
            &mut diagnostics,
        );
        for attribute in ["ram_quota_mb", "max_expire", "num_replicas"] {
            check_non_negative(config, attribute, &mut diagnostics);
        }
        diagnostics
    }

    async fn create(&self, ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
        let state: BucketState = from_state(planned)?;
        let settings = state.to_settings()?;

        ctx.client.create_bucket(&settings).await?;

        let name = settings.name.as_str();
        let info = retry_until(ctx.retry, &format!("bucket {}", name), || async move {
            retry_on_not_found(ctx.client.get_bucket(name).await)
        })
        .await?;
        to_state(&BucketState::from_info(info))
    }

    async fn read(&self, ctx: &ResourceContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: BucketState = from_state(state)?;
        Self::read_bucket(ctx, state.bucket_name()).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: BucketState = from_state(prior)?;
        let mut planned: BucketState = from_state(planned)?;
        planned.name = prior.bucket_name().to_string();

        let settings = planned.to_settings()?;
        ctx.client.update_bucket(&settings).await?;

        Self::read_existing(ctx, &settings.name).await
    }

    async fn delete(&self, ctx: &ResourceContext, state: Value) -> Result<(), ProviderError> {
        let state: BucketState = from_state(state)?;
        ignore_not_found(ctx.client.drop_bucket(state.bucket_name()).await)
    }
}
