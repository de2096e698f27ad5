//! Provider configuration.
//!
//! Attributes left out of the provider block fall back to environment
//! variables (`CB_ADDRESS`, `CB_USERNAME`, ...). The merged value is checked
//! against [`provider_schema`] and then turned into [`ClientOptions`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::client::ClientOptions;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use crate::validation::validate;

/// Resolves environment variables; injectable for tests.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read from the process environment.
pub fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

/// Provider attribute and the environment variable that backs it.
pub const ENV_DEFAULTS: [(&str, &str); 8] = [
    ("address", "CB_ADDRESS"),
    ("client_port", "CB_CLIENT_PORT"),
    ("query_port", "CB_QUERY_PORT"),
    ("username", "CB_USERNAME"),
    ("password", "CB_PASSWORD"),
    ("management_timeout", "CB_MANAGEMENT_TIMEOUT"),
    ("tls_root_cert_skip_verify", "TLS_ROOT_CERT_SKIP_VERIFY"),
    ("tls_root_cert", "TLS_ROOT_CERT"),
];

const DEFAULT_MANAGEMENT_TIMEOUT: u64 = 15;
const DEFAULT_QUERY_PORT: u16 = 8093;
const DEFAULT_QUERY_TLS_PORT: u16 = 18093;

/// Schema of the provider block.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Couchbase cluster connection")
        .with_attribute(
            "address",
            Attribute::required_string().with_description("Couchbase address, without scheme"),
        )
        .with_attribute(
            "client_port",
            Attribute::required_int64()
                .with_description("Cluster manager REST port (8091, or 18091 with TLS)"),
        )
        .with_attribute(
            "query_port",
            Attribute::optional_int64()
                .with_description("Query service port (default 8093, or 18093 with TLS)"),
        )
        .with_attribute("username", Attribute::required_string())
        .with_attribute("password", Attribute::required_string().sensitive())
        .with_attribute(
            "management_timeout",
            Attribute::optional_int64()
                .with_default(Value::from(DEFAULT_MANAGEMENT_TIMEOUT))
                .with_description("Timeout in seconds for management requests"),
        )
        .with_attribute(
            "tls_root_cert_skip_verify",
            Attribute::optional_bool().with_default(Value::Bool(false)),
        )
        .with_attribute(
            "tls_root_cert",
            Attribute::optional_string().with_description("Path to a PEM root certificate"),
        )
}

/// Resolved provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Host name or IP, without scheme.
    pub address: String,
    /// Cluster manager port.
    pub client_port: u16,
    /// Query service port; derived from the scheme when unset.
    #[serde(default)]
    pub query_port: Option<u16>,
    /// Cluster user.
    pub username: String,
    /// Cluster password.
    pub password: String,
    /// Seconds.
    #[serde(default = "default_management_timeout")]
    pub management_timeout: u64,
    /// Skip certificate verification.
    #[serde(default)]
    pub tls_root_cert_skip_verify: bool,
    /// Path to a PEM root certificate; enables HTTPS.
    #[serde(default)]
    pub tls_root_cert: Option<String>,
}

fn default_management_timeout() -> u64 {
    DEFAULT_MANAGEMENT_TIMEOUT
}

impl ProviderConfig {
    /// Merge `config` with the environment, validate it and deserialize it.
    pub fn resolve(config: &Value, env: &EnvLookup) -> Result<Self, Vec<Diagnostic>> {
        let schema = provider_schema();
        let mut merged = merge_env(config, &schema, env)?;
        schema.apply_defaults(&mut merged);

        let mut diagnostics = validate(&schema, &merged);
        diagnostics.extend(check_ports(&merged));
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        serde_json::from_value(merged).map_err(|e| {
            vec![Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())]
        })
    }

    fn tls_root_cert(&self) -> Option<&str> {
        self.tls_root_cert.as_deref().filter(|path| !path.is_empty())
    }

    /// `https` when a root certificate is configured.
    pub fn scheme(&self) -> &'static str {
        if self.tls_root_cert().is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL of the cluster manager.
    pub fn management_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.address, self.client_port)
    }

    /// Base URL of the query service.
    pub fn query_url(&self) -> String {
        let port = self.query_port.unwrap_or(if self.tls_root_cert().is_some() {
            DEFAULT_QUERY_TLS_PORT
        } else {
            DEFAULT_QUERY_PORT
        });
        format!("{}://{}:{}", self.scheme(), self.address, port)
    }

    /// Load the root certificate, if any, and build client options.
    pub fn client_options(&self) -> Result<ClientOptions, ProviderError> {
        let root_certificates = match self.tls_root_cert() {
            Some(path) => load_certificates(Path::new(path))?,
            None => Vec::new(),
        };

        Ok(ClientOptions {
            management_url: self.management_url(),
            query_url: self.query_url(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.management_timeout),
            root_certificates,
            accept_invalid_certs: self.tls_root_cert_skip_verify,
        })
    }
}

fn load_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, ProviderError> {
    let pem = std::fs::read(path).map_err(|e| {
        ProviderError::Configuration(format!(
            "cannot read tls_root_cert {}: {}",
            path.display(),
            e
        ))
    })?;
    let certificates = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
        ProviderError::Configuration(format!("invalid tls_root_cert {}: {}", path.display(), e))
    })?;
    if certificates.is_empty() {
        return Err(ProviderError::Configuration(format!(
            "invalid tls_root_cert {}: no PEM certificate found",
            path.display()
        )));
    }
    Ok(certificates)
}

/// Fill attributes missing from `config` from their environment variables.
fn merge_env(config: &Value, schema: &Schema, env: &EnvLookup) -> Result<Value, Vec<Diagnostic>> {
    let mut merged = match config {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(vec![Diagnostic::error("Provider configuration must be an object")
                .with_detail(format!("Got {}", other))])
        }
    };

    let mut diagnostics = Vec::new();
    for (attribute, variable) in ENV_DEFAULTS {
        if merged.get(attribute).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let Some(raw) = env(variable) else {
            continue;
        };
        let Some(attr_type) = schema.block.attributes.get(attribute).map(|a| &a.attr_type) else {
            continue;
        };
        match parse_env_value(attr_type, &raw) {
            Some(value) => {
                merged.insert(attribute.to_string(), value);
            }
            None => diagnostics.push(
                Diagnostic::error(format!("Invalid value for {}", variable))
                    .with_detail(format!("{:?} is not a valid {}", raw, attribute))
                    .with_attribute(attribute),
            ),
        }
    }

    if diagnostics.is_empty() {
        Ok(Value::Object(merged))
    } else {
        Err(diagnostics)
    }
}

fn parse_env_value(attr_type: &AttributeType, raw: &str) -> Option<Value> {
    let raw = raw.trim();
    match attr_type {
        AttributeType::String => Some(Value::from(raw)),
        AttributeType::Int64 => raw.parse::<i64>().ok().map(Value::from),
        AttributeType::Bool => parse_bool(raw).map(Value::Bool),
        AttributeType::List(_) | AttributeType::Set(_) => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn check_ports(config: &Value) -> Vec<Diagnostic> {
    ["client_port", "query_port"]
        .into_iter()
        .filter_map(|name| {
            let port = config.get(name)?.as_i64()?;
            (!(1..=i64::from(u16::MAX)).contains(&port)).then(|| {
                Diagnostic::error(format!("Invalid {}", name))
                    .with_detail(format!("{} is not a valid TCP port", port))
                    .with_attribute(name)
            })
        })
        .collect()
}
