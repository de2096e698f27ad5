//! Shared setup for the integration suites: a wiremock cluster and a tester
//! configured against it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hemmer_provider_couchbase::config::EnvLookup;
use hemmer_provider_couchbase::retry::RetryPolicy;
use hemmer_provider_couchbase::testing::ProviderTester;
use hemmer_provider_couchbase::CouchbaseProvider;
use serde_json::{json, Value};
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const USERNAME: &str = "Administrator";
pub const PASSWORD: &str = "password";

pub fn no_env() -> EnvLookup {
    Arc::new(|_| None)
}

pub fn env(vars: &[(&str, &str)]) -> EnvLookup {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(move |name| {
        vars.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    })
}

pub fn provider() -> CouchbaseProvider {
    CouchbaseProvider::new()
        .with_env_lookup(no_env())
        .with_retry_policy(RetryPolicy::new(
            Duration::from_secs(2),
            Duration::from_millis(10),
        ))
}

/// A mock cluster that accepts the admin credentials on `/pools`.
pub async fn cluster() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pools"))
        .and(basic_auth(USERNAME, PASSWORD))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isAdminCreds": true,
            "implementationVersion": "7.2.0-5325-enterprise"
        })))
        .mount(&server)
        .await;
    server
}

/// Provider configuration pointing both management and query at `server`.
pub fn provider_config(server: &MockServer) -> Value {
    json!({
        "address": server.address().ip().to_string(),
        "client_port": server.address().port(),
        "query_port": server.address().port(),
        "username": USERNAME,
        "password": PASSWORD
    })
}

pub async fn configured(server: &MockServer) -> ProviderTester<CouchbaseProvider> {
    let tester = ProviderTester::new(provider());
    tester
        .configure(provider_config(server))
        .await
        .expect("configure against mock cluster");
    tester
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn form(request: &Request) -> Vec<(String, String)> {
    let body = String::from_utf8_lossy(&request.body).replace('+', " ");
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(key).map(|k| k.into_owned()).unwrap_or_default(),
                urlencoding::decode(value).map(|v| v.into_owned()).unwrap_or_default(),
            )
        })
        .collect()
}

pub fn form_value(request: &Request, key: &str) -> Option<String> {
    form(request)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// A N1QL response carrying `results`.
pub fn query_rows(results: Vec<Value>) -> ResponseTemplate {
    let count = results.len();
    ResponseTemplate::new(200).set_body_json(json!({
        "requestID": "6c1d9f38-1b1a-4f1b-9c61-4c1f4c1e1f00",
        "status": "success",
        "results": results,
        "metrics": {"resultCount": count}
    }))
}
