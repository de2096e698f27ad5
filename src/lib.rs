//! # Hemmer provider for Couchbase
//!
//! Manages Couchbase Server objects through the cluster's management and
//! query REST APIs, exposed to Hemmer over the provider gRPC protocol.
//!
//! | Resource | Object |
//! |----------|--------|
//! | `couchbase_bucket_manager` | Bucket |
//! | `couchbase_scope` | Scope in a bucket |
//! | `couchbase_collection` | Collection in a scope |
//! | `couchbase_primary_query_index` | Primary N1QL index |
//! | `couchbase_query_index` | Secondary N1QL index |
//! | `couchbase_security_user` | Local RBAC user |
//! | `couchbase_security_group` | RBAC group |
//!
//! ## Provider configuration
//!
//! ```hcl
//! provider "couchbase" {
//!   address            = "127.0.0.1"
//!   client_port        = 8091
//!   username           = "Administrator"
//!   password           = "password"
//!   management_timeout = 15
//! }
//! ```
//!
//! Every attribute falls back to an environment variable when unset; see
//! [`config::ENV_DEFAULTS`]. Setting `tls_root_cert` switches both the
//! management and query endpoints to HTTPS.
//!
//! ## Handshake
//!
//! On startup the binary prints `HEMMER_PROVIDER|1|<address>` to stdout and
//! logs to stderr. Run with `--debug [addr]` to listen on a fixed address.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated {
    tonic::include_proto!("hemmer.provider.v1");
}

pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::CouchbaseProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
