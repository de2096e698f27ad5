//! Errors returned by the Couchbase REST client.

use thiserror::Error;

use crate::error::ProviderError;

/// Query service error codes that mean the index does not exist.
const INDEX_NOT_FOUND_CODES: [i64; 2] = [12004, 12016];

/// Failure of a single REST or query request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The cluster answered 404, or a lookup found no match.
    #[error("{0} not found")]
    NotFound(String),

    /// The bucket manifest has no such scope.
    #[error("cannot find scope with name: {0}")]
    ScopeNotFound(String),

    /// The scope has no such collection.
    #[error("cannot find collection with name: {0}")]
    CollectionNotFound(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// The query service reported an error for a statement.
    #[error("query error {code}: {message}")]
    Query {
        /// Query service error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// Transport failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body did not decode.
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A statement could not be built from the given settings.
    #[error("invalid statement: {0}")]
    Statement(String),
}

impl ClientError {
    /// Whether the object addressed by the request does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::ScopeNotFound(_) | Self::CollectionNotFound(_)
        ) || self.is_index_not_found()
    }

    /// Whether the query service rejected a statement because the index is missing.
    pub fn is_index_not_found(&self) -> bool {
        match self {
            Self::Query { code, message } => {
                INDEX_NOT_FOUND_CODES.contains(code) || message.to_lowercase().contains("not found")
            }
            _ => false,
        }
    }
}

impl From<ClientError> for ProviderError {
    fn from(err: ClientError) -> Self {
        let message = err.to_string();
        match err {
            ClientError::NotFound(_)
            | ClientError::ScopeNotFound(_)
            | ClientError::CollectionNotFound(_) => ProviderError::NotFound(message),
            ClientError::Http { status: 401 | 403, .. } => ProviderError::PermissionDenied(message),
            ClientError::Http { status: 404, .. } => ProviderError::NotFound(message),
            ClientError::Http { status, .. } if status >= 500 => ProviderError::Unavailable(message),
            ClientError::Request(_) => ProviderError::Unavailable(message),
            ClientError::Statement(_) => ProviderError::Validation(message),
            ClientError::Http { .. } | ClientError::Query { .. } | ClientError::Decode(_) => {
                ProviderError::Sdk(message)
            }
        }
    }
}
