//! Async client for the Couchbase cluster management and query REST APIs.
//!
//! One [`CouchbaseClient`] is built per `Configure` call and shared by every
//! resource. Management requests go to the client port; N1QL statements go to
//! `/query/service` on the query port.

mod buckets;
mod collections;
mod error;
mod query;
mod security;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub use buckets::{
    BucketInfo, BucketSettings, BucketType, CompressionMode, ConflictResolutionType,
    DurabilityLevel, EvictionPolicy, StorageBackend,
};
pub use collections::{CollectionSpec, CreateCollectionSettings, ScopeSpec};
pub use error::ClientError;
pub use query::{drop_index_statement, index_state, QueryIndex, QueryIndexSpec};
pub use security::{Group, Role, User};

/// Result of a client request.
pub type ClientResult<T> = Result<T, ClientError>;

/// Connection settings for [`CouchbaseClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// e.g. `http://127.0.0.1:8091`
    pub management_url: String,
    /// e.g. `http://127.0.0.1:8093`
    pub query_url: String,
    /// Basic auth user.
    pub username: String,
    /// Basic auth password.
    pub password: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra trusted roots for HTTPS.
    pub root_certificates: Vec<reqwest::Certificate>,
    /// Skip certificate verification.
    pub accept_invalid_certs: bool,
}

/// Authenticated client for one cluster.
#[derive(Debug, Clone)]
pub struct CouchbaseClient {
    http: reqwest::Client,
    management_url: String,
    query_url: String,
    username: String,
    password: String,
}

impl CouchbaseClient {
    /// Build the underlying HTTP client. No request is sent.
    pub fn new(options: ClientOptions) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs);
        for cert in options.root_certificates {
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            http: builder.build()?,
            management_url: options.management_url.trim_end_matches('/').to_string(),
            query_url: options.query_url.trim_end_matches('/').to_string(),
            username: options.username,
            password: options.password,
        })
    }

    /// Base URL of the cluster manager.
    pub fn management_url(&self) -> &str {
        &self.management_url
    }

    /// Check that the cluster manager answers authenticated requests.
    pub async fn ping(&self) -> ClientResult<()> {
        self.send(self.management(Method::GET, "/pools"), "cluster")
            .await
            .map(|_| ())
    }

    fn management(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.management_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Send a request, mapping 404 to `NotFound(what)` and other failures to `Http`.
    async fn send(&self, request: RequestBuilder, what: &str) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), what, "Couchbase response");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> ClientResult<T> {
        let response = self.send(self.management(Method::GET, path), what).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post_form<F: Serialize + ?Sized>(&self, path: &str, form: &F, what: &str) -> ClientResult<()> {
        self.send(self.management(Method::POST, path).form(form), what)
            .await
            .map(|_| ())
    }

    async fn put_form<F: Serialize + ?Sized>(&self, path: &str, form: &F, what: &str) -> ClientResult<()> {
        self.send(self.management(Method::PUT, path).form(form), what)
            .await
            .map(|_| ())
    }

    async fn delete(&self, path: &str, what: &str) -> ClientResult<()> {
        self.send(self.management(Method::DELETE, path), what)
            .await
            .map(|_| ())
    }
}

/// Percent-encode one path segment.
fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn client_for(server: &MockServer) -> CouchbaseClient {
        CouchbaseClient::new(ClientOptions {
            management_url: server.uri(),
            query_url: server.uri(),
            username: "Administrator".to_string(),
            password: "password".to_string(),
            timeout: Duration::from_secs(5),
            root_certificates: Vec::new(),
            accept_invalid_certs: false,
        })
        .unwrap()
    }

    #[test]
    fn test_segment_encoding() {
        assert_eq!(segment("beer-sample"), "beer-sample");
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
    }

    #[tokio::test]
    async fn test_ping_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pools"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pools": []})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pools"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client_for(&server).ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 401, .. }));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = CouchbaseClient::new(ClientOptions {
            management_url: "http://127.0.0.1:8091/".to_string(),
            query_url: "http://127.0.0.1:8093".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            timeout: Duration::from_secs(1),
            root_certificates: Vec::new(),
            accept_invalid_certs: true,
        })
        .unwrap();
        assert_eq!(client.management_url(), "http://127.0.0.1:8091");
    }
}
