//! Composite `/`-separated resource ids.

use crate::error::ProviderError;

pub(crate) const SEPARATOR: char = '/';

pub(crate) fn join(parts: &[&str]) -> String {
    parts.join("/")
}

/// Split `bucket/scope`; everything after the first separator is the scope.
pub(crate) fn scope_id(id: &str) -> Result<(&str, &str), ProviderError> {
    match id.split_once(SEPARATOR) {
        Some((bucket, scope)) if !bucket.is_empty() && !scope.is_empty() => Ok((bucket, scope)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "malformed ID for scope: {}",
            id
        ))),
    }
}

/// Split `bucket/scope/collection`; exactly three parts.
pub(crate) fn collection_id(id: &str) -> Result<(&str, &str, &str), ProviderError> {
    let parts: Vec<&str> = id.split(SEPARATOR).collect();
    match parts.as_slice() {
        &[bucket, scope, collection] => Ok((bucket, scope, collection)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "malformed ID for collection: {}",
            id
        ))),
    }
}

/// Split an index import id `<index id>,<num_replica>`.
pub(crate) fn index_import_id(id: &str) -> Result<(&str, i64), ProviderError> {
    let parts: Vec<&str> = id.split(',').collect();
    let &[index_id, replicas] = parts.as_slice() else {
        return Err(ProviderError::InvalidRequest(format!(
            "cannot parse id during import id: {}",
            id
        )));
    };
    let replicas = replicas.parse::<i64>().map_err(|_| {
        ProviderError::InvalidRequest(format!("cannot convert part of id to int id: {}", id))
    })?;
    Ok((index_id, replicas))
}
