//! N1QL query service: index DDL and `system:indexes` lookups.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{ClientError, ClientResult, CouchbaseClient};

/// A row of `system:indexes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryIndex {
    /// `WHERE` clause of a partial index.
    #[serde(default)]
    pub condition: String,
    /// Index id assigned by the cluster.
    pub id: String,
    /// Indexed expressions, as normalised by the query service.
    #[serde(default)]
    pub index_key: Vec<String>,
    /// Whether this is a primary index.
    #[serde(default)]
    pub is_primary: bool,
    /// Bucket the index belongs to.
    pub keyspace_id: String,
    /// Index name.
    pub name: String,
    /// `pending`, `deferred`, `building` or `online`.
    pub state: String,
    /// Index service, `gsi`.
    #[serde(default)]
    pub using: String,
}

/// Everything needed to issue a `CREATE [PRIMARY] INDEX` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryIndexSpec {
    /// Index name.
    pub name: String,
    /// Bucket to index.
    pub bucket: String,
    /// Empty for a primary index.
    pub fields: Vec<String>,
    /// Optional `WHERE` clause.
    pub condition: String,
    /// Leave the index deferred instead of building it.
    pub deferred: bool,
    /// Number of index replicas.
    pub num_replica: i64,
    /// Create a primary index.
    pub primary: bool,
}

impl QueryIndexSpec {
    fn with_clause(&self) -> String {
        format!(
            "WITH {{\"defer_build\":{}, \"num_replica\":{}}}",
            self.deferred, self.num_replica
        )
    }

    /// Build the DDL statement for this index.
    pub fn create_statement(&self) -> ClientResult<String> {
        if self.primary {
            return Ok(format!(
                "CREATE PRIMARY INDEX `{}` ON `{}` {}",
                self.name,
                self.bucket,
                self.with_clause()
            ));
        }

        if self.fields.is_empty() {
            return Err(ClientError::Statement(
                "you must specify at least one field to index".to_string(),
            ));
        }
        let condition = if self.condition.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", self.condition)
        };
        Ok(format!(
            "CREATE INDEX `{}` ON `{}`({}) {}{}",
            self.name,
            self.bucket,
            self.fields.join(","),
            condition,
            self.with_clause()
        ))
    }
}

/// The `system:indexes` state an index reaches once its create has finished.
pub fn index_state(deferred: bool) -> &'static str {
    if deferred {
        "deferred"
    } else {
        "online"
    }
}

/// `DROP INDEX` statement for a named index.
pub fn drop_index_statement(bucket: &str, name: &str) -> String {
    format!("DROP INDEX `{}`.`{}`", bucket, name)
}

#[derive(Debug, Deserialize)]
struct QueryErrorEntry {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<QueryErrorEntry>,
}

impl CouchbaseClient {
    /// Run a statement with positional `args` and return its result rows.
    pub async fn query<T: DeserializeOwned>(
        &self,
        statement: &str,
        args: &[Value],
        readonly: bool,
    ) -> ClientResult<Vec<T>> {
        debug!(statement, "Running query");
        let mut form = vec![
            ("statement", statement.to_string()),
            ("readonly", readonly.to_string()),
        ];
        if !args.is_empty() {
            form.push(("args", serde_json::to_string(args)?));
        }

        let response = self
            .http
            .post(format!("{}/query/service", self.query_url))
            .basic_auth(&self.username, Some(&self.password))
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        // The query service reports statement errors in the body, often with a non-2xx status.
        let parsed: QueryResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = parsed.errors.into_iter().next() {
            return Err(ClientError::Query {
                code: error.code,
                message: error.msg,
            });
        }
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        parsed
            .results
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(ClientError::from))
            .collect()
    }

    /// Issue the `CREATE INDEX` statement for `spec`.
    pub async fn create_query_index(&self, spec: &QueryIndexSpec) -> ClientResult<()> {
        let statement = spec.create_statement()?;
        info!(index = %spec.name, bucket = %spec.bucket, primary = spec.primary, "Creating query index");
        self.query::<Value>(&statement, &[], false).await.map(|_| ())
    }

    /// Look up a GSI index by id.
    pub async fn query_index_by_id(&self, id: &str) -> ClientResult<QueryIndex> {
        let rows: Vec<QueryIndex> = self
            .query(
                "SELECT `indexes`.* FROM system:indexes WHERE id=? AND `using`=\"gsi\"",
                &[Value::from(id)],
                true,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("index id {}", id)))
    }

    /// Look up a GSI index by bucket and name.
    pub async fn query_index_by_name(&self, bucket: &str, name: &str) -> ClientResult<QueryIndex> {
        let rows: Vec<QueryIndex> = self
            .query(
                "SELECT `indexes`.* FROM system:indexes WHERE keyspace_id=? AND name=? AND `using`=\"gsi\"",
                &[Value::from(bucket), Value::from(name)],
                true,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("index {} on bucket {}", name, bucket)))
    }

    /// Drop an index; a missing index is not an error when `ignore_if_not_exists` is set.
    pub async fn drop_index(&self, bucket: &str, name: &str, ignore_if_not_exists: bool) -> ClientResult<()> {
        info!(index = name, bucket, "Dropping query index");
        match self
            .query::<Value>(&drop_index_statement(bucket, name), &[], false)
            .await
        {
            Err(e) if ignore_if_not_exists && e.is_not_found() => {
                debug!(index = name, bucket, "Index already gone");
                Ok(())
            }
            result => result.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(primary: bool) -> QueryIndexSpec {
        QueryIndexSpec {
            name: "idx_type".to_string(),
            bucket: "beer-sample".to_string(),
            fields: if primary {
                vec![]
            } else {
                vec!["`type`".to_string(), "`name`".to_string()]
            },
            condition: String::new(),
            deferred: true,
            num_replica: 0,
            primary,
        }
    }

    #[test]
    fn test_primary_statement() {
        assert_eq!(
            spec(true).create_statement().unwrap(),
            "CREATE PRIMARY INDEX `idx_type` ON `beer-sample` WITH {\"defer_build\":true, \"num_replica\":0}"
        );
    }

    #[test]
    fn test_secondary_statement() {
        let mut with_condition = spec(false);
        with_condition.condition = "`type`=\"beer\"".to_string();
        with_condition.deferred = false;
        with_condition.num_replica = 1;
        assert_eq!(
            with_condition.create_statement().unwrap(),
            "CREATE INDEX `idx_type` ON `beer-sample`(`type`,`name`) WHERE `type`=\"beer\" WITH {\"defer_build\":false, \"num_replica\":1}"
        );

        assert_eq!(
            spec(false).create_statement().unwrap(),
            "CREATE INDEX `idx_type` ON `beer-sample`(`type`,`name`) WITH {\"defer_build\":true, \"num_replica\":0}"
        );
    }

    #[test]
    fn test_secondary_without_fields() {
        let mut empty = spec(false);
        empty.fields.clear();
        assert!(matches!(empty.create_statement(), Err(ClientError::Statement(_))));
    }

    #[test]
    fn test_index_state_and_drop() {
        assert_eq!(index_state(true), "deferred");
        assert_eq!(index_state(false), "online");
        assert_eq!(drop_index_statement("b", "i"), "DROP INDEX `b`.`i`");
    }

    #[tokio::test]
    async fn test_query_index_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .and(body_string_contains("readonly=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "results": [{
                    "id": "8f3c2a",
                    "name": "idx_type",
                    "keyspace_id": "beer-sample",
                    "namespace_id": "default",
                    "datastore_id": "http://127.0.0.1:8091",
                    "index_key": ["`type`"],
                    "is_primary": false,
                    "state": "deferred",
                    "using": "gsi"
                }]
            })))
            .mount(&server)
            .await;

        let index = client_for(&server)
            .query_index_by_name("beer-sample", "idx_type")
            .await
            .unwrap();
        assert_eq!(index.id, "8f3c2a");
        assert_eq!(index.index_key, vec!["`type`".to_string()]);
        assert_eq!(index.condition, "");
    }

    #[tokio::test]
    async fn test_query_no_rows_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success", "results": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).query_index_by_id("nope").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_error_in_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query/service"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": "fatal",
                "errors": [{"code": 12016, "msg": "Index Not Found - cause: GSI index idx_type not found."}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.drop_index("beer-sample", "idx_type", true).await.unwrap();

        let err = client
            .drop_index("beer-sample", "idx_type", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Query { code: 12016, .. }));
    }
}
