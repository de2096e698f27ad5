//! Scope and collection management: `/pools/default/buckets/{bucket}/scopes`.

use serde::Deserialize;
use tracing::info;

use super::{segment, ClientError, ClientResult, CouchbaseClient};

/// A scope in the bucket manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScopeSpec {
    /// Scope name.
    pub name: String,
    /// Collections in the scope.
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

/// A collection in the bucket manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// Seconds; 0 means the bucket setting applies.
    #[serde(default, rename = "maxTTL")]
    pub max_expiry: i64,
    /// Only reported by magma buckets.
    #[serde(default)]
    pub history: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ScopesManifest {
    #[serde(default)]
    scopes: Vec<ScopeSpec>,
}

/// Settings sent when creating a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCollectionSettings {
    /// Seconds.
    pub max_expiry: i64,
    /// Sent only when set; the cluster rejects it for non-magma buckets.
    pub history: Option<bool>,
}

fn scopes_path(bucket: &str) -> String {
    format!("/pools/default/buckets/{}/scopes", segment(bucket))
}

impl CouchbaseClient {
    /// Scopes of a bucket with their collections.
    pub async fn get_all_scopes(&self, bucket: &str) -> ClientResult<Vec<ScopeSpec>> {
        let manifest: ScopesManifest = self
            .get_json(&scopes_path(bucket), &format!("bucket {}", bucket))
            .await?;
        Ok(manifest.scopes)
    }

    /// Find a scope by name, or fail with `ScopeNotFound`.
    pub async fn find_scope(&self, bucket: &str, scope: &str) -> ClientResult<ScopeSpec> {
        self.get_all_scopes(bucket)
            .await?
            .into_iter()
            .find(|s| s.name == scope)
            .ok_or_else(|| ClientError::ScopeNotFound(scope.to_string()))
    }

    /// Find a collection inside a scope, or fail with `ScopeNotFound`/`CollectionNotFound`.
    pub async fn find_collection(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
    ) -> ClientResult<CollectionSpec> {
        self.find_scope(bucket, scope)
            .await?
            .collections
            .into_iter()
            .find(|c| c.name == collection)
            .ok_or_else(|| ClientError::CollectionNotFound(collection.to_string()))
    }

    /// Create a scope.
    pub async fn create_scope(&self, bucket: &str, scope: &str) -> ClientResult<()> {
        info!(bucket, scope, "Creating scope");
        self.post_form(&scopes_path(bucket), &[("name", scope)], &format!("bucket {}", bucket))
            .await
    }

    /// Drop a scope and every collection in it.
    pub async fn drop_scope(&self, bucket: &str, scope: &str) -> ClientResult<()> {
        info!(bucket, scope, "Dropping scope");
        self.delete(
            &format!("{}/{}", scopes_path(bucket), segment(scope)),
            &format!("scope {}", scope),
        )
        .await
    }

    /// Create a collection inside an existing scope.
    pub async fn create_collection(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
        settings: &CreateCollectionSettings,
    ) -> ClientResult<()> {
        info!(bucket, scope, collection, "Creating collection");
        let mut form = vec![
            ("name", collection.to_string()),
            ("maxTTL", settings.max_expiry.to_string()),
        ];
        if let Some(history) = settings.history {
            form.push(("history", history.to_string()));
        }
        self.post_form(
            &format!("{}/{}/collections", scopes_path(bucket), segment(scope)),
            &form,
            &format!("scope {}", scope),
        )
        .await
    }

    /// Drop a collection.
    pub async fn drop_collection(&self, bucket: &str, scope: &str, collection: &str) -> ClientResult<()> {
        info!(bucket, scope, collection, "Dropping collection");
        self.delete(
            &format!(
                "{}/{}/collections/{}",
                scopes_path(bucket),
                segment(scope),
                segment(collection)
            ),
            &format!("collection {}", collection),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_manifest(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/pools/default/buckets/travel-sample/scopes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": "8",
                "scopes": [
                    {"name": "_default", "uid": "0", "collections": [
                        {"name": "_default", "uid": "0", "maxTTL": 0}
                    ]},
                    {"name": "inventory", "uid": "8", "collections": [
                        {"name": "airline", "uid": "9", "maxTTL": 10, "history": false}
                    ]}
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_find_collection() {
        let server = MockServer::start().await;
        mount_manifest(&server).await;
        let client = client_for(&server);

        let collection = client
            .find_collection("travel-sample", "inventory", "airline")
            .await
            .unwrap();
        assert_eq!(collection.max_expiry, 10);
        assert_eq!(collection.history, Some(false));

        let err = client
            .find_collection("travel-sample", "inventory", "hotel")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::CollectionNotFound(ref name) if name == "hotel"));

        let err = client
            .find_collection("travel-sample", "tenant", "airline")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ScopeNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_collection_history_only_when_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pools/default/buckets/travel-sample/scopes/inventory/collections"))
            .and(body_string_contains("history=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uid": "a"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .create_collection(
                "travel-sample",
                "inventory",
                "route",
                &CreateCollectionSettings {
                    max_expiry: 10,
                    history: Some(true),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_scope_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/pools/default/buckets/travel-sample/scopes/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Scope with name \"gone\" is not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .drop_scope("travel-sample", "gone")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
