//! Bucket management: `/pools/default/buckets`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{segment, ClientResult, CouchbaseClient};

/// Declare a closed set of wire strings as an enum with parsing helpers.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[doc = concat!("`", $wire, "`")] #[serde(rename = $wire)] $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            /// The wire strings, for validation messages.
            pub fn allowed_values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("unknown {} {:?}", stringify!($name), s))
            }
        }
    };
}

string_enum! {
    /// `membase` is the REST name of a Couchbase (persistent) bucket.
    BucketType {
        Couchbase => "membase",
        Memcached => "memcached",
        Ephemeral => "ephemeral",
    }
}

string_enum! {
    /// How a bucket ejects items when memory runs out.
    EvictionPolicy {
        Full => "fullEviction",
        ValueOnly => "valueOnly",
        NotRecentlyUsed => "nruEviction",
        NoEviction => "noEviction",
    }
}

string_enum! {
    /// Document compression mode.
    CompressionMode {
        Off => "off",
        Passive => "passive",
        Active => "active",
    }
}

string_enum! {
    /// XDCR conflict resolution; fixed at creation.
    ConflictResolutionType {
        SequenceNumber => "seqno",
        Timestamp => "lww",
    }
}

string_enum! {
    /// Storage engine; fixed at creation.
    StorageBackend {
        Couchstore => "couchstore",
        Magma => "magma",
    }
}

string_enum! {
    /// Minimum durability level; exposed to users as the integers 1 to 4.
    DurabilityLevel {
        None => "none",
        Majority => "majority",
        MajorityAndPersistOnMaster => "majorityAndPersistActive",
        PersistToMajority => "persistToMajority",
    }
}

impl DurabilityLevel {
    /// Integer codes accepted in configuration.
    pub const CODES: [i64; 4] = [1, 2, 3, 4];

    /// Level for a configuration code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::None),
            2 => Some(Self::Majority),
            3 => Some(Self::MajorityAndPersistOnMaster),
            4 => Some(Self::PersistToMajority),
            _ => None,
        }
    }

    /// Configuration code of this level.
    pub fn code(&self) -> i64 {
        match self {
            Self::None => 1,
            Self::Majority => 2,
            Self::MajorityAndPersistOnMaster => 3,
            Self::PersistToMajority => 4,
        }
    }
}

/// Bucket settings as managed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSettings {
    /// Bucket name.
    pub name: String,
    /// Bucket type.
    pub bucket_type: BucketType,
    /// Per-node RAM quota in MiB.
    pub ram_quota_mb: u64,
    /// Whether the flush endpoint is enabled.
    pub flush_enabled: bool,
    /// Whether view index replicas are disabled.
    pub replica_index_disabled: bool,
    /// Number of replicas.
    pub num_replicas: u32,
    /// Document expiry in seconds.
    pub max_expiry: u64,
    /// Ejection policy.
    pub eviction_policy: EvictionPolicy,
    /// Compression mode.
    pub compression_mode: CompressionMode,
    /// Conflict resolution type.
    pub conflict_resolution_type: ConflictResolutionType,
    /// Minimum durability level.
    pub durability_level: DurabilityLevel,
    /// Storage engine.
    pub storage_backend: StorageBackend,
}

impl BucketSettings {
    fn flag(value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    /// Fields accepted by both create and update.
    fn mutable_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("ramQuota", self.ram_quota_mb.to_string()),
            ("flushEnabled", Self::flag(self.flush_enabled)),
        ];
        if self.bucket_type != BucketType::Memcached {
            form.extend([
                ("replicaNumber", self.num_replicas.to_string()),
                ("evictionPolicy", self.eviction_policy.to_string()),
                ("maxTTL", self.max_expiry.to_string()),
                ("compressionMode", self.compression_mode.to_string()),
                ("durabilityMinLevel", self.durability_level.to_string()),
            ]);
        }
        form
    }

    fn create_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("name", self.name.clone()),
            ("bucketType", self.bucket_type.to_string()),
        ];
        form.extend(self.mutable_form());
        if self.bucket_type != BucketType::Memcached {
            form.push((
                "conflictResolutionType",
                self.conflict_resolution_type.to_string(),
            ));
        }
        if self.bucket_type == BucketType::Couchbase {
            form.push(("replicaIndex", Self::flag(!self.replica_index_disabled)));
            form.push(("storageBackend", self.storage_backend.to_string()));
        }
        form
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Quota {
    #[serde(default, rename = "rawRAM")]
    raw_ram: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Controllers {
    flush: Option<String>,
}

/// A bucket as reported by `GET /pools/default/buckets/{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Bucket type.
    pub bucket_type: BucketType,
    #[serde(default)]
    quota: Quota,
    #[serde(default)]
    controllers: Controllers,
    /// Number of replicas.
    #[serde(default)]
    pub replica_number: u32,
    /// Whether view index replicas are enabled.
    #[serde(default)]
    pub replica_index: bool,
    /// Document expiry in seconds.
    #[serde(default, rename = "maxTTL")]
    pub max_ttl: u64,
    /// Absent for memcached buckets.
    pub eviction_policy: Option<EvictionPolicy>,
    /// Absent for memcached buckets.
    pub compression_mode: Option<CompressionMode>,
    /// Absent for memcached buckets.
    pub conflict_resolution_type: Option<ConflictResolutionType>,
    /// Absent for memcached buckets.
    pub durability_min_level: Option<DurabilityLevel>,
    /// Absent for memcached and ephemeral buckets.
    pub storage_backend: Option<StorageBackend>,
}

impl BucketInfo {
    /// Per-node RAM quota in MiB.
    pub fn ram_quota_mb(&self) -> u64 {
        self.quota.raw_ram / 1024 / 1024
    }

    /// The flush controller is only present when flush is enabled.
    pub fn flush_enabled(&self) -> bool {
        self.controllers.flush.is_some()
    }

    /// Convert into settings, filling fields the bucket type lacks with their defaults.
    pub fn into_settings(self) -> BucketSettings {
        BucketSettings {
            ram_quota_mb: self.ram_quota_mb(),
            flush_enabled: self.flush_enabled(),
            replica_index_disabled: !self.replica_index,
            num_replicas: self.replica_number,
            max_expiry: self.max_ttl,
            eviction_policy: self.eviction_policy.unwrap_or(EvictionPolicy::ValueOnly),
            compression_mode: self.compression_mode.unwrap_or(CompressionMode::Off),
            conflict_resolution_type: self
                .conflict_resolution_type
                .unwrap_or(ConflictResolutionType::SequenceNumber),
            durability_level: self.durability_min_level.unwrap_or(DurabilityLevel::None),
            storage_backend: self.storage_backend.unwrap_or(StorageBackend::Couchstore),
            bucket_type: self.bucket_type,
            name: self.name,
        }
    }
}

impl CouchbaseClient {
    /// Read a bucket by name.
    pub async fn get_bucket(&self, name: &str) -> ClientResult<BucketInfo> {
        self.get_json(
            &format!("/pools/default/buckets/{}", segment(name)),
            &format!("bucket {}", name),
        )
        .await
    }

    /// Create a bucket. The cluster creates it asynchronously.
    pub async fn create_bucket(&self, settings: &BucketSettings) -> ClientResult<()> {
        info!(bucket = %settings.name, bucket_type = %settings.bucket_type, "Creating bucket");
        self.post_form(
            "/pools/default/buckets",
            &settings.create_form(),
            &format!("bucket {}", settings.name),
        )
        .await
    }

    /// Apply the mutable settings to an existing bucket.
    pub async fn update_bucket(&self, settings: &BucketSettings) -> ClientResult<()> {
        info!(bucket = %settings.name, "Updating bucket");
        self.post_form(
            &format!("/pools/default/buckets/{}", segment(&settings.name)),
            &settings.mutable_form(),
            &format!("bucket {}", settings.name),
        )
        .await
    }

    /// Drop a bucket.
    pub async fn drop_bucket(&self, name: &str) -> ClientResult<()> {
        info!(bucket = %name, "Dropping bucket");
        self.delete(
            &format!("/pools/default/buckets/{}", segment(name)),
            &format!("bucket {}", name),
        )
        .await
    }
}
